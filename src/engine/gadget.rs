// Gadget contract, run-time context and task supervision

//! # Gadgets
//!
//! A gadget is one schedulable unit of work. It declares its pins up front with
//! [`Gadget::pins`], and when launched receives a [`GadgetContext`] holding the
//! ports bound to those pins. Its behavior is typically "consume until every
//! input reports end-of-stream, emit along the way, return".
//!
//! ## Lifecycle
//!
//! ```text
//! Declared --bind--> Bound --launch--> Running --return--> Finished
//! ```
//!
//! - *Declared*: added to a circuit, ports not bound yet
//! - *Bound*: every pin has a wire group or a fallback (null input, discard output)
//! - *Running*: the task has been spawned
//! - *Finished*: `run` returned; the supervisor has closed all of its outputs
//!
//! ## Supervision
//!
//! Every gadget task runs under a guard that
//! 1. catches panics as well as returned errors,
//! 2. waits for helper tasks spawned through [`GadgetContext::spawn`],
//! 3. closes every output port the gadget owns, so downstream fan-in counters
//!    always reach zero,
//! 4. applies the [`PanicPolicy`]: log a trace and exit the process, or record the
//!    failure for `Circuit::run` to return.
//!
//! ## Rust Learning Notes:
//!
//! ### `self: Box<Self>`
//! `run` consumes the boxed gadget. The gadget owns its state for the whole run
//! and nothing else can touch it afterwards, which is exactly the ownership the
//! task model needs.
//!
//! ### async-trait
//! Trait objects cannot have native `async fn` methods yet, so `#[async_trait]`
//! rewrites `run` to return a boxed `Send` future.
//!
//! ### catch_unwind on Futures
//! `FutureExt::catch_unwind` turns a panic while polling into an `Err` payload.
//! `AssertUnwindSafe` is our promise that nothing observes half-updated state
//! after the unwind; the ports' own locks are never held across user code.

use std::any::Any;
use std::backtrace::Backtrace;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;

use super::capability::{CapabilityRequest, ErasedCapability, Provision};
use super::circuit::Circuit;
use super::discard::LostTap;
use super::ports::{InputPort, OutputPort};
use crate::{FlowError, PanicPolicy, PinSpec, Result};

/// The worker contract shared by leaf gadgets and circuits
#[async_trait]
pub trait Gadget: Send + 'static {
    /// Pins this gadget exposes
    fn pins(&self) -> Vec<PinSpec>;

    /// Capabilities this gadget offers to others
    fn provides(&mut self) -> Vec<Provision> {
        Vec::new()
    }

    /// Capabilities this gadget needs before it can run
    fn consumes(&self) -> Vec<CapabilityRequest> {
        Vec::new()
    }

    /// The gadget's behavior; outputs are closed by the runtime when it returns
    async fn run(self: Box<Self>, ctx: GadgetContext) -> Result<()>;
}

/// Where a gadget is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GadgetState {
    Declared,
    Bound,
    Running,
    Finished,
}

/// Everything a running gadget gets from its circuit
pub struct GadgetContext {
    pub(crate) name: String,
    pub(crate) path: String,
    pub(crate) inputs: HashMap<String, InputPort>,
    pub(crate) outputs: HashMap<String, OutputPort>,
    pub(crate) capabilities: HashMap<String, ErasedCapability>,
    pub(crate) circuit: Circuit,
    pub(crate) helpers: TaskTracker,
    pub(crate) lost_tap: Option<LostTap>,
}

impl GadgetContext {
    /// Name of the gadget inside its circuit
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Qualified path from the outermost circuit, e.g. `main.c.r`
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The enclosing circuit, for online `add`/`connect`/`launch`
    pub fn circuit(&self) -> &Circuit {
        &self.circuit
    }

    pub fn input(&self, pin: &str) -> Result<InputPort> {
        self.inputs.get(pin).cloned().ok_or_else(|| FlowError::UnresolvedPin {
            circuit: self.path.clone(),
            pin: pin.to_string(),
        })
    }

    pub fn output(&self, pin: &str) -> Result<OutputPort> {
        self.outputs.get(pin).cloned().ok_or_else(|| FlowError::UnresolvedPin {
            circuit: self.path.clone(),
            pin: pin.to_string(),
        })
    }

    /// An injected capability, `None` when it was not requested or not granted
    pub fn capability<T: ?Sized + 'static>(&self, api: &str) -> Option<Arc<T>> {
        self.capabilities.get(api).and_then(|c| c.get::<T>())
    }

    /// Run a helper task; the gadget counts as finished only after it completes
    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.helpers.spawn(future)
    }
}

impl std::fmt::Debug for GadgetContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut inputs: Vec<&String> = self.inputs.keys().collect();
        let mut outputs: Vec<&String> = self.outputs.keys().collect();
        inputs.sort();
        outputs.sort();
        f.debug_struct("GadgetContext")
            .field("path", &self.path)
            .field("inputs", &inputs)
            .field("outputs", &outputs)
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Run one gadget to completion under the failure guard
///
/// Returns the failure only under [`PanicPolicy::Propagate`]; under
/// [`PanicPolicy::Abort`] a failing gadget ends the process.
pub(crate) async fn supervise(
    gadget: Box<dyn Gadget>,
    ctx: GadgetContext,
    policy: PanicPolicy,
) -> Option<FlowError> {
    let path = ctx.path.clone();
    let outputs: Vec<OutputPort> = ctx.outputs.values().cloned().collect();
    let helpers = ctx.helpers.clone();

    tracing::debug!(gadget = %path, "gadget running");
    let outcome = AssertUnwindSafe(gadget.run(ctx)).catch_unwind().await;

    helpers.close();
    helpers.wait().await;
    for output in &outputs {
        output.close();
    }

    let reason = match outcome {
        Ok(Ok(())) => {
            tracing::debug!(gadget = %path, "gadget finished");
            return None;
        }
        Ok(Err(e)) => e.to_string(),
        Err(payload) => format!("panicked: {}", panic_message(payload.as_ref())),
    };

    match policy {
        PanicPolicy::Abort => {
            let trace = Backtrace::force_capture();
            tracing::error!(gadget = %path, "gadget failed: {}", reason);
            eprintln!("gadget {} failed: {}\n{}", path, reason, trace);
            std::process::exit(1);
        }
        PanicPolicy::Propagate => {
            tracing::error!(gadget = %path, "gadget failed: {}", reason);
            Some(FlowError::GadgetFailed {
                gadget: path,
                reason,
            })
        }
    }
}
