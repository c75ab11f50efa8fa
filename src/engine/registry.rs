// Gadget registry - type name to factory lookup

//! # Gadget Registry
//!
//! The registry maps a type name (`"Repeater"`, `"Counter"`, ...) to a factory
//! that produces a fresh gadget instance. `Circuit::add(name, type)` goes through
//! it; `Circuit::add_circuitry` bypasses it for ready-made instances.
//!
//! Registration is write-once per key. Lookups are safe from any task at any
//! time, which is what lets running gadgets extend their own circuit.
//!
//! ## Rust Learning Notes:
//!
//! ### DashMap
//! `DashMap` is a sharded concurrent hash map: readers on different shards never
//! contend, and no outer `RwLock` is needed.
//!
//! ### lazy_static
//! The process-wide default registry is created on first use and lives for the
//! rest of the process.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use lazy_static::lazy_static;

use super::gadget::Gadget;
use crate::{FlowError, Result};

/// Zero-argument constructor for one gadget type
pub type GadgetFactory = Arc<dyn Fn() -> Box<dyn Gadget> + Send + Sync>;

lazy_static! {
    static ref GLOBAL_REGISTRY: Arc<Registry> = Arc::new(Registry::new());
}

/// Type name -> factory map
#[derive(Default)]
pub struct Registry {
    factories: DashMap<String, GadgetFactory>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The shared process-level registry
    pub fn global() -> Arc<Registry> {
        GLOBAL_REGISTRY.clone()
    }

    /// Register a factory; a second registration under the same name is refused
    ///
    /// ```rust
    /// use circuit_flow::{Registry, Transformer};
    ///
    /// let registry = Registry::new();
    /// registry.register("Identity", || Transformer::new(|m| m)).unwrap();
    /// assert!(registry.register("Identity", || Transformer::new(|m| m)).is_err());
    /// ```
    pub fn register<G, F>(&self, type_name: &str, factory: F) -> Result<()>
    where
        G: Gadget,
        F: Fn() -> G + Send + Sync + 'static,
    {
        let factory: GadgetFactory = Arc::new(move || Box::new(factory()) as Box<dyn Gadget>);
        self.register_factory(type_name, factory)
    }

    pub fn register_factory(&self, type_name: &str, factory: GadgetFactory) -> Result<()> {
        match self.factories.entry(type_name.to_string()) {
            Entry::Occupied(_) => Err(FlowError::DuplicateRegistration {
                type_name: type_name.to_string(),
            }),
            Entry::Vacant(slot) => {
                slot.insert(factory);
                tracing::debug!(type_name, "gadget type registered");
                Ok(())
            }
        }
    }

    /// Build a fresh instance, `None` if the type is unknown
    pub fn create(&self, type_name: &str) -> Option<Box<dyn Gadget>> {
        // clone the factory out so the shard lock is not held while it runs
        let factory = self.factories.get(type_name).map(|f| f.value().clone())?;
        Some(factory())
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.factories.contains_key(type_name)
    }

    /// Registered type names, sorted
    pub fn type_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}
