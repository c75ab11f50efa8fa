// Engine configuration
// Defaults, then an optional config file, then FLOW__* environment variables

//! # Configuration
//!
//! [`FlowConfig`] holds the knobs that decide how strict circuit construction
//! is and what happens when a gadget blows up at run time.
//!
//! Values are layered with the `config` crate:
//! 1. built-in defaults ([`FlowConfig::default`])
//! 2. an optional file (`flow.toml`, `flow.json`, ...)
//! 3. environment variables with prefix `FLOW` and separator `__`, e.g.
//!    `FLOW__STRICT_REGISTRY=true` or `FLOW__INJECTION__ERROR_ON_PROVIDER_OFFERING=true`

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::Result;

/// What the scheduler does when a gadget panics or returns an error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PanicPolicy {
    /// Print a diagnostic trace and exit the process
    #[default]
    Abort,
    /// Record the failure and return it from `Circuit::run`
    Propagate,
}

/// Strictness of capability injection; each flag is independent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InjectionOptions {
    /// A provider offers an api the table does not accept
    pub error_on_provider_offering: bool,
    /// A provider offers an accepted api with the wrong type
    pub error_on_provider_assignment: bool,
    /// A consumer requests an api that is unknown or has no provider
    pub error_on_consumer_request: bool,
    /// A consumer requests an api with a type it cannot accept
    pub error_on_consumer_assignment: bool,
}

impl Default for InjectionOptions {
    fn default() -> Self {
        Self {
            error_on_provider_offering: false,
            error_on_provider_assignment: false,
            error_on_consumer_request: true,
            error_on_consumer_assignment: true,
        }
    }
}

/// Engine-wide settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    /// Treat an unknown gadget type on `add` as an error instead of a warning
    pub strict_registry: bool,
    pub panic_policy: PanicPolicy,
    /// Print every discarded message to stdout as `Lost <type>: <value>`
    pub print_lost: bool,
    pub injection: InjectionOptions,
    pub log_level: String,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            strict_registry: false,
            panic_policy: PanicPolicy::Abort,
            print_lost: true,
            injection: InjectionOptions::default(),
            log_level: "info".to_string(),
        }
    }
}

impl FlowConfig {
    /// Load defaults, an optional file and `FLOW__*` environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let defaults = ::config::Config::try_from(&FlowConfig::default())?;
        let mut builder = ::config::Config::builder().add_source(defaults);

        builder = match path {
            Some(path) => builder.add_source(::config::File::from(path)),
            None => builder.add_source(::config::File::with_name("flow").required(false)),
        };

        let settings = builder
            .add_source(
                ::config::Environment::with_prefix("FLOW")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Settings for embedding and tests: failures come back from `run()`
    /// and nothing is printed to stdout
    pub fn quiet() -> Self {
        Self {
            panic_policy: PanicPolicy::Propagate,
            print_lost: false,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = FlowConfig::default();
        assert!(!config.strict_registry);
        assert!(config.print_lost);
        assert_eq!(config.panic_policy, PanicPolicy::Abort);
        assert!(config.injection.error_on_consumer_request);
        assert!(config.injection.error_on_consumer_assignment);
        assert!(!config.injection.error_on_provider_offering);
        assert!(!config.injection.error_on_provider_assignment);
    }

    #[test]
    fn test_load_from_file() {
        let dir = std::env::temp_dir().join(format!("flow-config-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("flow.toml");
        std::fs::write(
            &path,
            "strict_registry = true\npanic_policy = \"propagate\"\n\n[injection]\nerror_on_provider_offering = true\n",
        )
        .unwrap();

        let config = FlowConfig::load(Some(&path)).unwrap();
        assert!(config.strict_registry);
        assert_eq!(config.panic_policy, PanicPolicy::Propagate);
        assert!(config.injection.error_on_provider_offering);
        // untouched fields keep their defaults
        assert!(config.injection.error_on_consumer_request);
        assert!(config.print_lost);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_quiet_profile() {
        let config = FlowConfig::quiet();
        assert_eq!(config.panic_policy, PanicPolicy::Propagate);
        assert!(!config.print_lost);
    }
}
