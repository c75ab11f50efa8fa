// Circuit Flow Engine
// Registry, channel plumbing, wire resolution, circuits and the scheduler

//! # Circuit Flow Engine Module
//!
//! This module contains the runtime that turns declared circuits into running
//! tokio tasks. The domain models (`models/`) describe *what* travels and how it
//! is addressed; the engine decides *where* it goes and *when* things run.
//!
//! ## Engine Components
//!
//! ### Registry (`registry` module)
//! - Maps a gadget type name to a factory
//! - Process-wide default instance, or explicit instances for isolation
//!
//! ### Ports (`ports` module)
//! - Wire groups: one bounded channel plus a fan-in counter
//! - Input/output port handles, including the null and discard fallbacks
//!
//! ### Wire Resolver (`resolver` module)
//! - Union-find over qualified pin names
//! - Capacity computation from declared wires and feeds
//!
//! ### Discard Sink (`discard` module)
//! - Drains everything sent to unconnected outputs and reports it
//!
//! ### Gadgets and Scheduling (`gadget` module)
//! - The [`Gadget`] trait and the [`GadgetContext`] handed to a running gadget
//! - The per-task guard that closes outputs and applies the panic policy
//!
//! ### Capabilities (`capability` module)
//! - Service objects offered and requested outside of the data-flow graph
//!
//! ### Circuits (`circuit` module)
//! - Batch and online construction, hierarchical composition, `describe`
//!
//! ## Rust Learning Notes:
//!
//! ### Module Organization Pattern
//! The directory is the module, `mod.rs` is its root. Submodules are declared
//! here and the types callers actually need are re-exported, so users write
//! `circuit_flow::engine::Circuit` (or just `circuit_flow::Circuit`).
//!
//! ### Poisoned Mutexes
//! A `std::sync::Mutex` is poisoned when a thread panics while holding it. The
//! engine's critical sections never leave data half-updated, so [`lock`] simply
//! takes the guard back out of the poison error.

use std::sync::{Mutex, MutexGuard};

/// Gadget type registry
pub mod registry;

/// Wire groups and the port handles gadgets use
pub mod ports;

/// Union-find based wire resolution and capacity planning
pub mod resolver;

/// Sink for messages sent to unconnected outputs
pub mod discard;

/// Gadget trait, run-time context and task supervision
pub mod gadget;

/// Capability injection
pub mod capability;

/// Registry, capability table and configuration bundled for circuit construction
pub mod environment;

/// Composable circuits, batch and online mode
pub mod circuit;

#[cfg(test)]
mod tests;

pub use registry::{GadgetFactory, Registry};

pub use ports::{InputPort, OutputPort, WireGroup};

pub use resolver::{plan_groups, DisjointSet, PlannedGroup, WireSet};

pub use discard::{LostMessage, LostReceiver};

pub use gadget::{Gadget, GadgetContext, GadgetState};

pub use capability::{
    Capability, CapabilityRequest, CapabilityTable, KvStoreApi, MemorySettings, Provision,
    SettingsApi, KV_STORE_API, SETTINGS_API,
};

pub use environment::Environment;

pub use circuit::Circuit;

/// Lock a std mutex, recovering the guard if a panicking task poisoned it
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
