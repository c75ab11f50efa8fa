// Core domain models for Circuit Flow
// Plain data: what travels on wires, how pins are addressed, how circuits are described

//! # Domain Models Module
//!
//! This module contains the data structures the engine is built on. None of them
//! know anything about channels or tasks.
//!
//! - `message`: [`Message`] and [`Tag`], the values carried on wires
//! - `pin`: [`PinName`], [`Direction`] and [`PinSpec`], how pins are addressed and declared
//! - `description`: [`CircuitDescription`], the serialisable snapshot of a circuit
//!
//! ## Rust Learning Notes:
//!
//! ### Module Declarations
//! Each `pub mod` declaration tells Rust to look for a `.rs` file with that name
//! in this directory and include it as a public submodule.
//!
//! ### Re-exports for Clean APIs
//! The `pub use` statements below flatten the hierarchy, so users can write
//! `use circuit_flow::models::Message` instead of
//! `use circuit_flow::models::message::Message`.

// Opaque message payloads and tagged messages
pub mod message;

// Pin names (`gadget.Pin`), directions and pin declarations
pub mod pin;

// Serialisable circuit snapshots used by `describe` and the CLI
pub mod description;

pub use message::{Message, Tag};
pub use pin::{Direction, PinName, PinSpec, QUALIFIER};
pub use description::{CircuitDescription, FeedEntry, GadgetEntry, WireEntry};
