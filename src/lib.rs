// Circuit Flow - flow-based programming engine
// Gadgets exchange messages over bounded wires inside composable circuits

//! # Circuit Flow Library
//!
//! This is the library root for Circuit Flow, a flow-based-programming engine.
//! Independent units of computation (**gadgets**) talk to each other only through
//! named, capacity-bounded **pins**. Pins are wired together into a **circuit**,
//! and running a circuit launches every gadget as its own tokio task.
//!
//! ## Core Components
//!
//! ### Domain Models
//! - [`Message`] / [`Tag`]: the opaque values carried on wires
//! - [`PinName`] / [`PinSpec`]: pin addressing and pin declarations
//! - [`CircuitDescription`]: serialisable snapshot of a declared circuit
//!
//! ### Engine
//! - [`Circuit`]: named, composable container of gadgets, wires, feeds and labels.
//!   A circuit is itself a [`Gadget`], which is how circuits nest.
//! - [`Registry`]: type name -> gadget factory
//! - [`InputPort`] / [`OutputPort`]: the channel endpoints handed to a running gadget
//! - [`CapabilityTable`]: service objects offered and requested by gadgets outside
//!   of the data-flow graph
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use circuit_flow::{Circuit, Message, Transformer};
//!
//! # async fn demo() -> circuit_flow::Result<()> {
//! let upper = Transformer::new(|m: Message| match m.downcast::<String>() {
//!     Ok(s) => Message::new(s.to_uppercase()),
//!     Err(other) => other,
//! });
//!
//! let circuit = Circuit::new();
//! circuit.add_circuitry("u", upper)?;
//! circuit.feed("u.In", "abc")?;
//! circuit.feed("u.In", "def")?;
//! circuit.run().await?; // prints "Lost String: ABC" and "Lost String: DEF"
//! # Ok(())
//! # }
//! ```
//!
//! ## Rust Learning Notes:
//!
//! ### Re-exports
//! `pub use` statements create shortcuts so users don't need to know the internal
//! module structure: `circuit_flow::Circuit` instead of
//! `circuit_flow::engine::circuit::Circuit`.

// Core domain models (messages, pin names, descriptions)
pub mod models;

// Runtime: registry, ports, wire resolution, circuits and scheduling
pub mod engine;

// Standard gadget library used by the CLI and the scenario tests
pub mod gadgets;

// Layered configuration (defaults, file, environment)
pub mod config;

/// Version of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use models::{
    CircuitDescription, Direction, FeedEntry, GadgetEntry, Message, PinName, PinSpec, Tag,
    WireEntry,
};

pub use engine::{
    Capability, CapabilityRequest, CapabilityTable, Circuit, Environment, Gadget,
    GadgetContext, GadgetState, InputPort, KvStoreApi, LostMessage, LostReceiver, MemorySettings,
    OutputPort, Provision, Registry, SettingsApi,
};

pub use config::{FlowConfig, InjectionOptions, PanicPolicy};

pub use gadgets::Transformer;

// Core error types
// Using the `thiserror` crate to make error handling easier
use thiserror::Error;

/// Error types for circuit construction and execution
///
/// Construction problems (bad names, unknown types, capability mismatches) are
/// always reported through this type. Run-time problems inside a gadget are
/// fail-fast by default and only show up here under
/// [`PanicPolicy::Propagate`].
#[derive(Error, Debug)]
pub enum FlowError {
    /// No factory registered under this type name
    #[error("Unknown gadget type: {type_name}")]
    UnknownGadgetType { type_name: String },

    /// A factory is already registered under this type name
    #[error("Gadget type already registered: {type_name}")]
    DuplicateRegistration { type_name: String },

    /// A gadget with this name already exists in the circuit
    #[error("Gadget {name} already exists in circuit {circuit}")]
    DuplicateGadget { circuit: String, name: String },

    /// A gadget name that the circuit does not contain
    #[error("Unknown gadget {name} in circuit {circuit}")]
    UnknownGadget { circuit: String, name: String },

    /// A pin name that resolves neither to a gadget pin nor to a label
    #[error("Unresolved pin {pin} in circuit {circuit}")]
    UnresolvedPin { circuit: String, pin: String },

    /// A pin used against its direction (feeding an output, wiring input to input)
    #[error("Pin {pin} is an {actual}, expected an {expected}")]
    PinDirection {
        pin: String,
        expected: crate::Direction,
        actual: crate::Direction,
    },

    /// External label names must not contain the qualifier separator
    #[error("External pin should not include a dot: {0}")]
    QualifiedLabel(String),

    /// Online connect that would merge two channels that are already live
    #[error("Cannot join live wires {from} -> {to}")]
    LiveRewire { from: String, to: String },

    /// A labeled pin that carries data from the parent circuit and from inside
    #[error("Pin {pin} in circuit {circuit} is driven both from outside and inside")]
    BoundaryConflict { circuit: String, pin: String },

    /// More feed data than the live channel can take without blocking
    #[error("Feed into {pin} exceeds its wire capacity")]
    FeedOverflow { pin: String },

    /// Operation needs a running circuit
    #[error("Circuit {0} is not running")]
    NotRunning(String),

    /// `run()` called twice on the same circuit
    #[error("Circuit {0} has already been started")]
    AlreadyStarted(String),

    /// `launch()` called for a gadget that is running or finished
    #[error("Gadget {0} has already been launched")]
    AlreadyLaunched(String),

    /// Sending on an output port after `close()`
    #[error("Send after close on {0}")]
    SendAfterClose(String),

    /// The consuming side of a wire is gone
    #[error("Wire {0} has no receiver left")]
    Disconnected(String),

    /// Capability injection failure (missing provider, type mismatch, unknown api)
    #[error("Capability error: {0}")]
    Capability(String),

    /// A gadget returned an error or panicked (only under the propagate policy)
    #[error("Gadget {gadget} failed: {reason}")]
    GadgetFailed { gadget: String, reason: String },

    /// Configuration loading failed
    #[error("Configuration error: {0}")]
    Config(#[from] ::config::ConfigError),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Type alias for Results that use our error type
pub type Result<T> = std::result::Result<T, FlowError>;
