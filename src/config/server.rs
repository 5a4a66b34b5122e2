//! # Server Configuration
//!
//! Where the probe and metrics server listens, and how long start-up waits for it.

use super::env_var_or_default;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// IP address the probe server binds to
    pub bind_address: IpAddr,
    /// Port serving `/metrics`, `/healthz` and `/readyz`
    pub metrics_port: u16,
    /// Start-up fails if the server is not bound within this many seconds
    pub startup_timeout_secs: u64,
    /// Readiness poll interval during start-up (milliseconds)
    pub poll_interval_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        use crate::constants::*;
        Self {
            bind_address: default_bind_address(),
            metrics_port: DEFAULT_METRICS_PORT,
            startup_timeout_secs: DEFAULT_SERVER_STARTUP_TIMEOUT_SECS,
            poll_interval_ms: DEFAULT_SERVER_POLL_INTERVAL_MS,
        }
    }
}

fn default_bind_address() -> IpAddr {
    crate::constants::DEFAULT_BIND_ADDRESS
        .parse()
        .unwrap_or(IpAddr::from([0, 0, 0, 0]))
}

impl ServerConfig {
    pub fn from_env() -> Self {
        use crate::constants::*;
        Self {
            bind_address: env_var_or_default("METRICS_BIND_ADDRESS", default_bind_address()),
            metrics_port: env_var_or_default("METRICS_PORT", DEFAULT_METRICS_PORT),
            startup_timeout_secs: env_var_or_default(
                "SERVER_STARTUP_TIMEOUT_SECS",
                DEFAULT_SERVER_STARTUP_TIMEOUT_SECS,
            ),
            poll_interval_ms: env_var_or_default(
                "SERVER_POLL_INTERVAL_MS",
                DEFAULT_SERVER_POLL_INTERVAL_MS,
            ),
        }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.metrics_port)
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
