//! # Controller Configuration
//!
//! Configuration loaded from environment variables, normally populated from a
//! ConfigMap through `envFrom` in the operator Deployment.
//!
//! Every setting has a default in [`crate::constants`].

mod controller;
mod server;

pub use controller::ControllerConfig;
pub use server::ServerConfig;

/// Load configuration from environment variables with defaults
pub fn load_config() -> (ControllerConfig, ServerConfig) {
    (ControllerConfig::from_env(), ServerConfig::from_env())
}

/// Read environment variable or return default value
pub(crate) fn env_var_or_default<T: std::str::FromStr>(key: &str, default: T) -> T
where
    <T as std::str::FromStr>::Err: std::fmt::Debug,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_var_or_default_falls_back_on_unparsable() {
        assert_eq!(
            env_var_or_default("PLATFORM_ENGINE_TEST_UNSET_VARIABLE", 42u64),
            42
        );
    }
}
