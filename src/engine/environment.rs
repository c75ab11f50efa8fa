// Environment - what a circuit needs from the outside world

//! # Environment
//!
//! A circuit never reaches for global state on its own. Everything it needs from
//! outside, namely the gadget registry, the capability table and the engine
//! configuration, comes in through an [`Environment`].
//!
//! [`Environment::global`] bundles the process-wide registry and capability
//! table with default settings and is what `Circuit::new()` uses. Tests and
//! embedders build isolated environments instead, so that registrations and
//! the run-once provider collection do not leak between them.

use std::sync::Arc;

use super::capability::CapabilityTable;
use super::registry::Registry;
use crate::FlowConfig;

/// Registry, capability table and configuration shared by a circuit tree
#[derive(Clone)]
pub struct Environment {
    pub registry: Arc<Registry>,
    pub capabilities: Arc<CapabilityTable>,
    pub config: FlowConfig,
}

impl Environment {
    pub fn new(registry: Arc<Registry>, capabilities: Arc<CapabilityTable>, config: FlowConfig) -> Self {
        Self {
            registry,
            capabilities,
            config,
        }
    }

    /// Process-wide registry and capability table, default configuration
    pub fn global() -> Self {
        Self::new(Registry::global(), CapabilityTable::global(), FlowConfig::default())
    }

    /// Fresh registry and standard capability table, nothing shared
    pub fn isolated(config: FlowConfig) -> Self {
        Self::new(
            Arc::new(Registry::new()),
            Arc::new(CapabilityTable::standard()),
            config,
        )
    }

    /// Same registry and capabilities, different configuration
    pub fn with_config(mut self, config: FlowConfig) -> Self {
        self.config = config;
        self
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::global()
    }
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Environment")
            .field("gadget_types", &self.registry.len())
            .field("config", &self.config)
            .finish()
    }
}
