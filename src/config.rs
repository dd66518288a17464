//! Server configuration.
//!
//! Every knob has a sensible default and can be overridden through a
//! `DECOY_*` environment variable or programmatically before start.

use crate::error::MockError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// TLS material for the HTTPS listener collaborator.
///
/// The core binds plain TCP; termination happens in front of it. The paths
/// are carried here so the launcher can hand them to the TLS layer.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to the certificate file (PEM format)
    pub cert_path: String,
    /// Path to the private key file (PEM format)
    pub key_path: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    /// IP address listeners bind to
    #[serde(default = "default_bound_ip")]
    pub local_bound_ip: String,
    /// Ports bound at startup; 0 lets the OS pick an ephemeral port
    #[serde(default)]
    pub ports: Vec<u16>,
    /// Worker threads for the tokio runtime (0 = number of cores)
    #[serde(default)]
    pub event_loop_threads: usize,
    /// Capacity of the recorded-interaction ring
    #[serde(default = "default_max_log_entries")]
    pub max_log_entries: usize,
    /// Maximum number of live expectations
    #[serde(default = "default_max_expectations")]
    pub max_expectations: usize,
    /// Per-registration callback send-queue depth
    #[serde(default = "default_max_callback_queue")]
    pub max_callback_queue: usize,
    /// How long to wait for a remote callback client to answer
    #[serde(default = "default_callback_response_timeout_ms")]
    pub callback_response_timeout_ms: u64,
    /// Connect timeout for forwarded requests
    #[serde(default = "default_socket_connection_timeout_ms")]
    pub socket_connection_timeout_ms: u64,
    /// Upper bound on the time any dispatched action may take
    #[serde(default = "default_max_response_time_ms")]
    pub max_response_time_ms: u64,
    /// Additional forward attempts after a connect-level failure
    #[serde(default = "default_forward_retries")]
    pub forward_retries: u32,
    /// Concurrent deferred tasks the scheduler will run
    #[serde(default = "default_scheduler_workers")]
    pub scheduler_workers: usize,
    /// Hard upper bound on graceful shutdown
    #[serde(default = "default_stop_timeout_ms")]
    pub stop_timeout_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsConfig>,
}

fn default_bound_ip() -> String {
    "0.0.0.0".to_string()
}

fn default_max_log_entries() -> usize {
    1000
}

fn default_max_expectations() -> usize {
    1000
}

fn default_max_callback_queue() -> usize {
    64
}

fn default_callback_response_timeout_ms() -> u64 {
    120_000
}

fn default_socket_connection_timeout_ms() -> u64 {
    10_000
}

fn default_max_response_time_ms() -> u64 {
    60_000
}

fn default_forward_retries() -> u32 {
    2
}

fn default_scheduler_workers() -> usize {
    16
}

fn default_stop_timeout_ms() -> u64 {
    15_000
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            local_bound_ip: default_bound_ip(),
            ports: Vec::new(),
            event_loop_threads: 0,
            max_log_entries: default_max_log_entries(),
            max_expectations: default_max_expectations(),
            max_callback_queue: default_max_callback_queue(),
            callback_response_timeout_ms: default_callback_response_timeout_ms(),
            socket_connection_timeout_ms: default_socket_connection_timeout_ms(),
            max_response_time_ms: default_max_response_time_ms(),
            forward_retries: default_forward_retries(),
            scheduler_workers: default_scheduler_workers(),
            stop_timeout_ms: default_stop_timeout_ms(),
            tls: None,
        }
    }
}

impl Settings {
    /// Defaults overlaid with any `DECOY_*` environment variables.
    pub fn from_env() -> Result<Self, MockError> {
        let mut settings = Settings::default();
        if let Some(ip) = env_var("DECOY_LOCAL_BOUND_IP") {
            settings.local_bound_ip = ip;
        }
        if let Some(ports) = env_var("DECOY_PORTS") {
            settings.ports = parse_port_list(&ports)?;
        }
        if let Some(n) = env_parsed("DECOY_EVENT_LOOP_THREADS")? {
            settings.event_loop_threads = n;
        }
        if let Some(n) = env_parsed("DECOY_MAX_LOG_ENTRIES")? {
            settings.max_log_entries = n;
        }
        if let Some(n) = env_parsed("DECOY_MAX_EXPECTATIONS")? {
            settings.max_expectations = n;
        }
        if let Some(n) = env_parsed("DECOY_MAX_CALLBACK_QUEUE")? {
            settings.max_callback_queue = n;
        }
        if let Some(n) = env_parsed("DECOY_CALLBACK_RESPONSE_TIMEOUT_MS")? {
            settings.callback_response_timeout_ms = n;
        }
        if let Some(n) = env_parsed("DECOY_SOCKET_CONNECTION_TIMEOUT_MS")? {
            settings.socket_connection_timeout_ms = n;
        }
        if let Some(n) = env_parsed("DECOY_MAX_RESPONSE_TIME_MS")? {
            settings.max_response_time_ms = n;
        }
        if let Some(n) = env_parsed("DECOY_FORWARD_RETRIES")? {
            settings.forward_retries = n;
        }
        if let (Some(cert), Some(key)) = (
            env_var("DECOY_TLS_CERT_PATH"),
            env_var("DECOY_TLS_KEY_PATH"),
        ) {
            settings.tls = Some(TlsConfig {
                cert_path: cert,
                key_path: key,
            });
        }
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), MockError> {
        if self.local_bound_ip.parse::<std::net::IpAddr>().is_err() {
            return Err(MockError::Configuration(format!(
                "'{}' is not a valid bind address",
                self.local_bound_ip
            )));
        }
        if self.max_log_entries == 0 {
            return Err(MockError::Configuration(
                "maxLogEntries must be at least 1".to_string(),
            ));
        }
        if self.max_expectations == 0 {
            return Err(MockError::Configuration(
                "maxExpectations must be at least 1".to_string(),
            ));
        }
        if self.max_callback_queue == 0 {
            return Err(MockError::Configuration(
                "maxCallbackQueue must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn callback_response_timeout(&self) -> Duration {
        Duration::from_millis(self.callback_response_timeout_ms)
    }

    pub fn socket_connection_timeout(&self) -> Duration {
        Duration::from_millis(self.socket_connection_timeout_ms)
    }

    pub fn max_response_time(&self) -> Duration {
        Duration::from_millis(self.max_response_time_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_parsed<T: std::str::FromStr>(name: &str) -> Result<Option<T>, MockError> {
    match env_var(name) {
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| MockError::Configuration(format!("{name}='{raw}' is not a valid value"))),
        None => Ok(None),
    }
}

fn parse_port_list(raw: &str) -> Result<Vec<u16>, MockError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<u16>()
                .map_err(|_| MockError::Configuration(format!("'{s}' is not a valid port")))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let settings = Settings::default();
        assert_eq!(settings.local_bound_ip, "0.0.0.0");
        assert_eq!(settings.callback_response_timeout_ms, 120_000);
        assert_eq!(settings.max_log_entries, 1000);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn rejects_bad_bind_address() {
        let settings = Settings {
            local_bound_ip: "not-an-ip".to_string(),
            ..Settings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn parses_port_lists() {
        assert_eq!(parse_port_list("1080, 1081").unwrap(), vec![1080, 1081]);
        assert!(parse_port_list("1080,banana").is_err());
    }

    #[test]
    fn deserializes_with_defaults() {
        let settings: Settings = serde_json::from_str(r#"{"ports": [1080]}"#).unwrap();
        assert_eq!(settings.ports, vec![1080]);
        assert_eq!(settings.max_expectations, 1000);
    }
}
