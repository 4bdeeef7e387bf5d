// SPDX-FileCopyrightText: 2026 Fieldsync Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model structs for the Fieldsync resilience core.
//!
//! All structs use `#[serde(deny_unknown_fields)]` so a misspelled key fails
//! at startup instead of silently falling back to a default.

use serde::{Deserialize, Serialize};

/// Top-level Fieldsync configuration.
///
/// Every section is optional and defaults to values that work against a
/// local development backend.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct FieldsyncConfig {
    /// Process-level settings.
    #[serde(default)]
    pub agent: AgentConfig,

    /// Backend API endpoints and keys.
    #[serde(default)]
    pub api: ApiConfig,

    /// SQLite database location.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Credential encryption settings.
    #[serde(default)]
    pub vault: VaultConfig,

    /// Request outbox settings.
    #[serde(default)]
    pub outbox: OutboxConfig,

    /// Background drain trigger settings.
    #[serde(default)]
    pub sync: SyncConfig,

    /// Reachability probe settings.
    #[serde(default)]
    pub connectivity: ConnectivityConfig,

    /// Realtime order feed settings.
    #[serde(default)]
    pub realtime: RealtimeConfig,
}

/// Process-level configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AgentConfig {
    /// Identifier of the field agent this device is signed in as, if known.
    #[serde(default)]
    pub agent_id: Option<String>,

    /// Logging level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            agent_id: None,
            log_level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Backend API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ApiConfig {
    /// Base URL that relative outbox URLs are resolved against.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Project API key sent as the `apikey` header on every request.
    #[serde(default)]
    pub api_key: String,

    /// Anonymous key used as bearer for authentication endpoints.
    #[serde(default)]
    pub anon_key: String,

    /// Path of the token refresh endpoint, relative to `base_url`.
    #[serde(default = "default_refresh_path")]
    pub refresh_path: String,

    /// Path suffixes treated as authentication endpoints.
    #[serde(default = "default_auth_paths")]
    pub auth_paths: Vec<String>,

    /// How many prior 401 responses a request may carry and still trigger a refresh.
    #[serde(default = "default_max_refresh_chain")]
    pub max_refresh_chain: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: String::new(),
            anon_key: String::new(),
            refresh_path: default_refresh_path(),
            auth_paths: default_auth_paths(),
            max_refresh_chain: default_max_refresh_chain(),
        }
    }
}

fn default_base_url() -> String {
    "http://127.0.0.1:54321".to_string()
}

fn default_refresh_path() -> String {
    "/refresh-token".to_string()
}

fn default_auth_paths() -> Vec<String> {
    vec!["/login".to_string(), "/refresh-token".to_string()]
}

fn default_max_refresh_chain() -> usize {
    1
}

/// Storage backend configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_database_path")]
    pub database_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

fn default_database_path() -> String {
    dirs::data_dir()
        .map(|p| p.join("fieldsync").join("fieldsync.db"))
        .unwrap_or_else(|| std::path::PathBuf::from("fieldsync.db"))
        .display()
        .to_string()
}

/// Credential encryption configuration (Argon2id parameters).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct VaultConfig {
    /// Argon2id memory cost in KiB.
    #[serde(default = "default_kdf_memory_cost")]
    pub kdf_memory_cost: u32,

    /// Argon2id iteration count.
    #[serde(default = "default_kdf_iterations")]
    pub kdf_iterations: u32,

    /// Argon2id lanes.
    #[serde(default = "default_kdf_parallelism")]
    pub kdf_parallelism: u32,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            kdf_memory_cost: default_kdf_memory_cost(),
            kdf_iterations: default_kdf_iterations(),
            kdf_parallelism: default_kdf_parallelism(),
        }
    }
}

fn default_kdf_memory_cost() -> u32 {
    65536
}

fn default_kdf_iterations() -> u32 {
    3
}

fn default_kdf_parallelism() -> u32 {
    4
}

/// Request outbox configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct OutboxConfig {
    /// Capacity of the bounded pipe between `enqueue` and the consumer loop.
    #[serde(default = "default_pipe_capacity")]
    pub pipe_capacity: usize,

    /// Upper bound for a single queued request execution.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            pipe_capacity: default_pipe_capacity(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn default_pipe_capacity() -> usize {
    200
}

fn default_request_timeout_secs() -> u64 {
    30
}

/// Background drain trigger configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SyncConfig {
    /// Enable the periodic drain trigger.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Seconds between forced full drains.
    #[serde(default = "default_sync_interval_secs")]
    pub interval_secs: u64,

    /// Run one full drain as soon as the trigger starts.
    #[serde(default = "default_true")]
    pub run_on_start: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_sync_interval_secs(),
            run_on_start: true,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_sync_interval_secs() -> u64 {
    900
}

/// Reachability probe configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectivityConfig {
    /// Seconds between reachability probes.
    #[serde(default = "default_probe_interval_secs")]
    pub probe_interval_secs: u64,

    /// Timeout for a single probe connection attempt.
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,

    /// `host:port` to probe. Defaults to the host of `api.base_url`.
    #[serde(default)]
    pub probe_target: Option<String>,
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            probe_interval_secs: default_probe_interval_secs(),
            probe_timeout_ms: default_probe_timeout_ms(),
            probe_target: None,
        }
    }
}

fn default_probe_interval_secs() -> u64 {
    10
}

fn default_probe_timeout_ms() -> u64 {
    3000
}

/// Realtime order feed configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RealtimeConfig {
    /// WebSocket endpoint of the realtime service.
    #[serde(default = "default_realtime_url")]
    pub url: String,

    /// Topic joined by `fieldsync serve`.
    #[serde(default = "default_topic")]
    pub topic: String,

    /// Database schema of the watched table.
    #[serde(default = "default_schema")]
    pub schema: String,

    /// Watched table.
    #[serde(default = "default_table")]
    pub table: String,

    /// Reconnect delay policy: "fixed" or "exponential".
    #[serde(default = "default_reconnect_policy")]
    pub reconnect_policy: String,

    /// Delay before a reconnect attempt (initial delay for exponential).
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    /// Cap for exponential reconnect delays.
    #[serde(default = "default_max_reconnect_delay_ms")]
    pub max_reconnect_delay_ms: u64,

    /// Timeout for the WebSocket handshake.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Interval between protocol heartbeats on an open socket (0 disables).
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            url: default_realtime_url(),
            topic: default_topic(),
            schema: default_schema(),
            table: default_table(),
            reconnect_policy: default_reconnect_policy(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            max_reconnect_delay_ms: default_max_reconnect_delay_ms(),
            connect_timeout_secs: default_connect_timeout_secs(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
        }
    }
}

fn default_realtime_url() -> String {
    "ws://127.0.0.1:54321/realtime/v1/websocket".to_string()
}

fn default_topic() -> String {
    "realtime:public:orders".to_string()
}

fn default_schema() -> String {
    "public".to_string()
}

fn default_table() -> String {
    "orders".to_string()
}

fn default_reconnect_policy() -> String {
    "fixed".to_string()
}

fn default_reconnect_delay_ms() -> u64 {
    5000
}

fn default_max_reconnect_delay_ms() -> u64 {
    60_000
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_heartbeat_interval_secs() -> u64 {
    30
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = FieldsyncConfig::default();
        assert_eq!(config.outbox.pipe_capacity, 200);
        assert_eq!(config.outbox.request_timeout_secs, 30);
        assert_eq!(config.api.refresh_path, "/refresh-token");
        assert_eq!(config.api.max_refresh_chain, 1);
        assert_eq!(config.realtime.topic, "realtime:public:orders");
        assert_eq!(config.realtime.reconnect_policy, "fixed");
        assert!(config.sync.run_on_start);
    }

    #[test]
    fn default_database_path_ends_with_db_file() {
        assert!(default_database_path().ends_with("fieldsync.db"));
    }
}
