// Capability injection - service objects outside of the data-flow graph

//! # Capability Injection
//!
//! Besides pins, a gadget can **provide** or **consume** named service objects
//! ("capabilities"), such as a settings store. The circuit runtime arbitrates:
//!
//! 1. Before the first launch, providers are collected from every gadget of the
//!    tree, exactly once per [`CapabilityTable`]. The default table is process
//!    wide, so with it this happens once per process.
//! 2. Before each gadget is launched, every capability it requests is looked up
//!    and type-checked, and the value is placed in its [`GadgetContext`].
//! 3. The value's [`Capability::init_api`] hook is called with the consumer's name
//!    and path, so per-consumer instances can specialise themselves.
//!
//! A provider either shares one instance with every consumer
//! ([`Provision::shared`]) or hands each consumer a fresh one
//! ([`Provision::per_consumer`]).
//!
//! What counts as an error is decided by [`InjectionOptions`]: four independent
//! flags, strict on the consumer side and lenient on the provider side by default.
//!
//! [`GadgetContext`]: super::gadget::GadgetContext

use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use lazy_static::lazy_static;

use super::lock;
use crate::{FlowError, InjectionOptions, Result};

/// Base trait for every service object that can be injected
pub trait Capability: Send + Sync {
    /// Called once per consumer with its name and qualified path
    fn init_api(&self, _gadget: &str, _path: &str) {}
}

/// Settings storage offered to gadgets
pub trait SettingsApi: Capability {
    /// All setting keys that start with `prefix`
    fn keys(&self, prefix: &str) -> Result<Vec<String>>;
    fn get(&self, key: &str) -> Result<Option<serde_json::Value>>;
    fn put(&self, key: &str, value: serde_json::Value) -> Result<()>;
}

/// Generic read/write key-value store offered to gadgets
pub trait KvStoreApi: Capability {
    fn keys(&self, prefix: &str) -> Result<Vec<String>>;
    fn get(&self, key: &str) -> Result<Option<serde_json::Value>>;
    fn put(&self, key: &str, value: serde_json::Value) -> Result<()>;
}

/// Api name under which [`SettingsApi`] is accepted by the standard table
pub const SETTINGS_API: &str = "SettingsAPI";
/// Api name under which [`KvStoreApi`] is accepted by the standard table
pub const KV_STORE_API: &str = "KvStoreAPI";

/// A type-erased `Arc<T>` plus the hook to initialise it
#[derive(Clone)]
pub(crate) struct ErasedCapability {
    value: Arc<dyn Any + Send + Sync>,
    init: fn(&(dyn Any + Send + Sync), &str, &str),
}

fn init_erased<T: ?Sized + Capability + 'static>(value: &(dyn Any + Send + Sync), gadget: &str, path: &str) {
    if let Some(arc) = value.downcast_ref::<Arc<T>>() {
        arc.init_api(gadget, path);
    }
}

impl ErasedCapability {
    fn new<T: ?Sized + Capability + 'static>(value: Arc<T>) -> Self {
        Self {
            value: Arc::new(value),
            init: init_erased::<T>,
        }
    }

    pub(crate) fn get<T: ?Sized + 'static>(&self) -> Option<Arc<T>> {
        self.value.downcast_ref::<Arc<T>>().cloned()
    }

    fn init(&self, gadget: &str, path: &str) {
        (self.init)(self.value.as_ref(), gadget, path)
    }
}

type CapabilityFactory = Arc<dyn Fn() -> ErasedCapability + Send + Sync>;

#[derive(Clone)]
enum ProvisionSource {
    Shared(ErasedCapability),
    PerConsumer(CapabilityFactory),
}

/// A capability offered by a provider gadget
#[derive(Clone)]
pub struct Provision {
    api: String,
    type_id: TypeId,
    type_name: &'static str,
    source: ProvisionSource,
}

impl Provision {
    /// One instance shared by every consumer
    pub fn shared<T: ?Sized + Capability + 'static>(api: &str, value: Arc<T>) -> Self {
        Self {
            api: api.to_string(),
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
            source: ProvisionSource::Shared(ErasedCapability::new(value)),
        }
    }

    /// A fresh instance for each consumer
    pub fn per_consumer<T, F>(api: &str, factory: F) -> Self
    where
        T: ?Sized + Capability + 'static,
        F: Fn() -> Arc<T> + Send + Sync + 'static,
    {
        Self {
            api: api.to_string(),
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
            source: ProvisionSource::PerConsumer(Arc::new(move || ErasedCapability::new(factory()))),
        }
    }

    pub fn api(&self) -> &str {
        &self.api
    }

    pub fn is_per_consumer(&self) -> bool {
        matches!(self.source, ProvisionSource::PerConsumer(_))
    }

    fn instance(&self) -> ErasedCapability {
        match &self.source {
            ProvisionSource::Shared(value) => value.clone(),
            ProvisionSource::PerConsumer(factory) => factory(),
        }
    }
}

impl std::fmt::Debug for Provision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provision")
            .field("api", &self.api)
            .field("type", &self.type_name)
            .field("per_consumer", &self.is_per_consumer())
            .finish()
    }
}

/// A capability a consumer gadget asks for
#[derive(Debug, Clone)]
pub struct CapabilityRequest {
    pub api: String,
    type_id: TypeId,
    type_name: &'static str,
}

impl CapabilityRequest {
    /// Request api `api` as an `Arc<T>`
    pub fn of<T: ?Sized + 'static>(api: &str) -> Self {
        Self {
            api: api.to_string(),
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct AcceptedApi {
    type_id: TypeId,
    type_name: &'static str,
}

lazy_static! {
    static ref GLOBAL_CAPABILITIES: Arc<CapabilityTable> = Arc::new(CapabilityTable::standard());
}

/// The apis a process arbitrates, and the providers installed for them
#[derive(Default)]
pub struct CapabilityTable {
    accepted: DashMap<String, AcceptedApi>,
    providers: DashMap<String, Provision>,
    collected: AtomicBool,
}

impl CapabilityTable {
    /// A table that accepts nothing
    pub fn new() -> Self {
        Self::default()
    }

    /// A table accepting [`SettingsApi`] and [`KvStoreApi`]
    pub fn standard() -> Self {
        let table = Self::new();
        table.accept::<dyn SettingsApi>(SETTINGS_API);
        table.accept::<dyn KvStoreApi>(KV_STORE_API);
        table
    }

    /// The shared process-level table
    pub fn global() -> Arc<CapabilityTable> {
        GLOBAL_CAPABILITIES.clone()
    }

    /// Declare that api `api` is arbitrated with type `Arc<T>`
    pub fn accept<T: ?Sized + 'static>(&self, api: &str) {
        self.accepted.insert(
            api.to_string(),
            AcceptedApi {
                type_id: TypeId::of::<T>(),
                type_name: type_name::<T>(),
            },
        );
    }

    pub fn has_provider(&self, api: &str) -> bool {
        self.providers.contains_key(api)
    }

    pub fn is_collected(&self) -> bool {
        self.collected.load(Ordering::SeqCst)
    }

    /// Run provider collection, once per table
    ///
    /// `gather` is only invoked by the first caller; later calls return
    /// `Ok(false)` without looking at any gadget.
    pub fn collect_once<F>(&self, gather: F, options: &InjectionOptions) -> Result<bool>
    where
        F: FnOnce() -> Vec<(String, Provision)>,
    {
        if self
            .collected
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(false);
        }
        for (path, provision) in gather() {
            self.install(&path, provision, options)?;
        }
        Ok(true)
    }

    /// Install one provider
    pub fn install(&self, path: &str, provision: Provision, options: &InjectionOptions) -> Result<()> {
        let Some(accepted) = self.accepted.get(provision.api()).map(|a| *a) else {
            if options.error_on_provider_offering {
                return Err(FlowError::Capability(format!(
                    "api {} is not accepted (offered by {})",
                    provision.api, path
                )));
            }
            tracing::warn!(api = %provision.api, provider = path, "offered api is not accepted");
            return Ok(());
        };

        if accepted.type_id != provision.type_id {
            if options.error_on_provider_assignment {
                return Err(FlowError::Capability(format!(
                    "provider {} offers {} as {}, expected {}",
                    path, provision.api, provision.type_name, accepted.type_name
                )));
            }
            tracing::warn!(api = %provision.api, provider = path, "offered api has the wrong type");
            return Ok(());
        }

        tracing::info!(api = %provision.api, provider = path, "provider installed");
        self.providers.insert(provision.api.clone(), provision);
        Ok(())
    }

    /// Resolve every request of one consumer
    pub(crate) fn inject(
        &self,
        gadget: &str,
        path: &str,
        requests: &[CapabilityRequest],
        options: &InjectionOptions,
    ) -> Result<HashMap<String, ErasedCapability>> {
        let mut injected = HashMap::new();

        for request in requests {
            let Some(accepted) = self.accepted.get(&request.api).map(|a| *a) else {
                if options.error_on_consumer_request {
                    return Err(FlowError::Capability(format!(
                        "api {} is not provided (requested by {})",
                        request.api, path
                    )));
                }
                continue;
            };

            if accepted.type_id != request.type_id {
                if options.error_on_consumer_assignment {
                    return Err(FlowError::Capability(format!(
                        "{} requests {} as {}, api provides {}",
                        path, request.api, request.type_name, accepted.type_name
                    )));
                }
                continue;
            }

            let Some(instance) = self.providers.get(&request.api).map(|p| p.instance()) else {
                if options.error_on_consumer_request {
                    return Err(FlowError::Capability(format!(
                        "missing provider for {} (requested by {})",
                        request.api, path
                    )));
                }
                continue;
            };

            instance.init(gadget, path);
            tracing::debug!(api = %request.api, gadget, path, "capability injected");
            injected.insert(request.api.clone(), instance);
        }

        Ok(injected)
    }
}

/// In-memory [`SettingsApi`] provider
///
/// When handed out per consumer, each instance scopes its keys under the
/// consumer's path (set through `init_api`).
#[derive(Default)]
pub struct MemorySettings {
    scope: Mutex<Option<String>>,
    values: DashMap<String, serde_json::Value>,
}

impl MemorySettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Path of the consumer this instance was initialised for
    pub fn scope(&self) -> Option<String> {
        lock(&self.scope).clone()
    }

    fn scoped(&self, key: &str) -> String {
        match &*lock(&self.scope) {
            Some(scope) => format!("{}/{}", scope, key),
            None => key.to_string(),
        }
    }
}

impl Capability for MemorySettings {
    fn init_api(&self, _gadget: &str, path: &str) {
        let mut scope = lock(&self.scope);
        if scope.is_none() {
            *scope = Some(path.to_string());
        }
    }
}

impl SettingsApi for MemorySettings {
    fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        let full = self.scoped(prefix);
        let strip = self.scoped("");
        let mut keys: Vec<String> = self
            .values
            .iter()
            .filter(|e| e.key().starts_with(&full))
            .map(|e| e.key()[strip.len()..].to_string())
            .collect();
        keys.sort();
        Ok(keys)
    }

    fn get(&self, key: &str) -> Result<Option<serde_json::Value>> {
        Ok(self.values.get(&self.scoped(key)).map(|v| v.clone()))
    }

    fn put(&self, key: &str, value: serde_json::Value) -> Result<()> {
        self.values.insert(self.scoped(key), value);
        Ok(())
    }
}
