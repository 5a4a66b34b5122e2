//! # Reconciliation Configuration
//!
//! Requeue timing, install locations and identity of the running operator.

use super::env_var_or_default;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Delay before the next pass while the managing resource is not yet available (seconds)
    pub requeue_period_secs: u64,
    /// Delay between teardown passes (seconds)
    pub finalizer_requeue_secs: u64,
    /// Root of the packaged component manifests
    pub templates_dir: String,
    /// Namespace the operator runs in; image overrides are read from here
    pub operator_namespace: String,
    /// Install namespace when the spec does not set one
    pub default_target_namespace: String,
    /// Version stamped on installed resources and reported as desired
    pub operator_version: String,
    /// Console plugin registered by the console component
    pub console_plugin: String,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        use crate::constants::*;
        Self {
            requeue_period_secs: DEFAULT_REQUEUE_PERIOD_SECS,
            finalizer_requeue_secs: DEFAULT_FINALIZER_REQUEUE_SECS,
            templates_dir: DEFAULT_TEMPLATES_DIR.to_string(),
            operator_namespace: DEFAULT_OPERATOR_NAMESPACE.to_string(),
            default_target_namespace: DEFAULT_TARGET_NAMESPACE.to_string(),
            operator_version: DEFAULT_OPERATOR_VERSION.to_string(),
            console_plugin: DEFAULT_CONSOLE_PLUGIN.to_string(),
        }
    }
}

impl ControllerConfig {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        use crate::constants::*;
        Self {
            requeue_period_secs: env_var_or_default(
                "REQUEUE_PERIOD_SECS",
                DEFAULT_REQUEUE_PERIOD_SECS,
            ),
            finalizer_requeue_secs: env_var_or_default(
                "FINALIZER_REQUEUE_SECS",
                DEFAULT_FINALIZER_REQUEUE_SECS,
            ),
            templates_dir: env_var_or_default("TEMPLATES_DIR", DEFAULT_TEMPLATES_DIR.to_string()),
            operator_namespace: env_var_or_default(
                "POD_NAMESPACE",
                DEFAULT_OPERATOR_NAMESPACE.to_string(),
            ),
            default_target_namespace: env_var_or_default(
                "TARGET_NAMESPACE",
                DEFAULT_TARGET_NAMESPACE.to_string(),
            ),
            operator_version: env_var_or_default(
                "OPERATOR_VERSION",
                DEFAULT_OPERATOR_VERSION.to_string(),
            ),
            console_plugin: env_var_or_default(
                "CONSOLE_PLUGIN_NAME",
                DEFAULT_CONSOLE_PLUGIN.to_string(),
            ),
        }
    }

    pub fn requeue_period(&self) -> Duration {
        Duration::from_secs(self.requeue_period_secs)
    }

    pub fn finalizer_requeue(&self) -> Duration {
        Duration::from_secs(self.finalizer_requeue_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ControllerConfig::default();
        assert_eq!(config.requeue_period(), Duration::from_secs(15));
        assert_eq!(config.finalizer_requeue(), Duration::from_secs(5));
        assert_eq!(config.default_target_namespace, "platform-engine");
    }
}
