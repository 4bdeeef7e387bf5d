// SPDX-FileCopyrightText: 2026 Fieldsync Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Post-deserialization validation for configuration values.
//!
//! Serde guarantees shape; this module checks meaning (parseable URLs,
//! positive timeouts, KDF minimums). All errors are collected, not just the first.

use crate::diagnostic::ConfigError;
use crate::model::FieldsyncConfig;

/// Validate a deserialized configuration for semantic correctness.
pub fn validate_config(config: &FieldsyncConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();
    let mut fail = |message: String| errors.push(ConfigError::Validation { message });

    if !is_url_with_scheme(&config.api.base_url, &["http", "https"]) {
        fail(format!(
            "api.base_url `{}` must be an http(s) URL",
            config.api.base_url
        ));
    }

    if !config.api.refresh_path.starts_with('/') {
        fail(format!(
            "api.refresh_path `{}` must start with `/`",
            config.api.refresh_path
        ));
    }

    if config.storage.database_path.trim().is_empty() {
        fail("storage.database_path must not be empty".to_string());
    }

    if config.vault.kdf_memory_cost < 32768 {
        fail(format!(
            "vault.kdf_memory_cost must be at least 32768 (32 MiB), got {}",
            config.vault.kdf_memory_cost
        ));
    }
    if config.vault.kdf_iterations < 2 {
        fail(format!(
            "vault.kdf_iterations must be at least 2, got {}",
            config.vault.kdf_iterations
        ));
    }
    if config.vault.kdf_parallelism < 1 {
        fail(format!(
            "vault.kdf_parallelism must be at least 1, got {}",
            config.vault.kdf_parallelism
        ));
    }

    if config.outbox.pipe_capacity == 0 {
        fail("outbox.pipe_capacity must be greater than 0".to_string());
    }
    if config.outbox.request_timeout_secs == 0 {
        fail("outbox.request_timeout_secs must be greater than 0".to_string());
    }

    if config.sync.enabled && config.sync.interval_secs == 0 {
        fail("sync.interval_secs must be greater than 0 when sync is enabled".to_string());
    }

    if config.connectivity.probe_interval_secs == 0 {
        fail("connectivity.probe_interval_secs must be greater than 0".to_string());
    }

    if !is_url_with_scheme(&config.realtime.url, &["ws", "wss"]) {
        fail(format!(
            "realtime.url `{}` must be a ws(s) URL",
            config.realtime.url
        ));
    }
    if config.realtime.topic.trim().is_empty() {
        fail("realtime.topic must not be empty".to_string());
    }
    match config.realtime.reconnect_policy.as_str() {
        "fixed" | "exponential" => {}
        other => fail(format!(
            "realtime.reconnect_policy must be `fixed` or `exponential`, got `{other}`"
        )),
    }
    if config.realtime.reconnect_delay_ms == 0 {
        fail("realtime.reconnect_delay_ms must be greater than 0".to_string());
    }
    if config.realtime.max_reconnect_delay_ms < config.realtime.reconnect_delay_ms {
        fail(format!(
            "realtime.max_reconnect_delay_ms ({}) must not be below reconnect_delay_ms ({})",
            config.realtime.max_reconnect_delay_ms, config.realtime.reconnect_delay_ms
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn is_url_with_scheme(value: &str, schemes: &[&str]) -> bool {
    match value.split_once("://") {
        Some((scheme, rest)) => schemes.contains(&scheme) && !rest.trim().is_empty(),
        None => false,
    }
}
