// SPDX-FileCopyrightText: 2026 Fieldsync Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Layered configuration loading with Figment.
//!
//! Lookup order: `./fieldsync.toml` > `~/.config/fieldsync/fieldsync.toml` >
//! `/etc/fieldsync/fieldsync.toml`, with `FIELDSYNC_` environment overrides on top.

#![allow(clippy::result_large_err)] // figment::Error is external and cannot be boxed without wrapper

use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};

use crate::model::FieldsyncConfig;

/// Sections recognised when mapping `FIELDSYNC_<SECTION>_<KEY>` variables.
const ENV_SECTIONS: &[&str] = &[
    "agent",
    "api",
    "storage",
    "vault",
    "outbox",
    "sync",
    "connectivity",
    "realtime",
];

/// Prefix-stripped name of the passphrase variable, excluded from config.
const PASSPHRASE_ENV_KEY: &str = "vault_key";

pub(crate) const SYSTEM_CONFIG_PATH: &str = "/etc/fieldsync/fieldsync.toml";
pub(crate) const LOCAL_CONFIG_PATH: &str = "fieldsync.toml";

pub(crate) fn user_config_path() -> PathBuf {
    dirs::config_dir()
        .map(|d| d.join("fieldsync/fieldsync.toml"))
        .unwrap_or_default()
}

/// Build the full layered Figment.
///
/// Merge order (later overrides earlier):
/// 1. Compiled defaults
/// 2. `/etc/fieldsync/fieldsync.toml`
/// 3. `~/.config/fieldsync/fieldsync.toml`
/// 4. `./fieldsync.toml`
/// 5. `FIELDSYNC_*` environment variables
pub fn build_figment() -> Figment {
    Figment::new()
        .merge(Serialized::defaults(FieldsyncConfig::default()))
        .merge(Toml::file(SYSTEM_CONFIG_PATH))
        .merge(Toml::file(user_config_path()))
        .merge(Toml::file(LOCAL_CONFIG_PATH))
        .merge(env_provider())
}

/// Load configuration from the standard hierarchy with env var overrides.
pub fn load_config() -> Result<FieldsyncConfig, figment::Error> {
    build_figment().extract()
}

/// Load configuration from a TOML string on top of the defaults only.
pub fn load_config_from_str(toml_content: &str) -> Result<FieldsyncConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(FieldsyncConfig::default()))
        .merge(Toml::string(toml_content))
        .extract()
}

/// Load configuration from an explicit file path plus env var overrides.
pub fn load_config_from_path(path: &Path) -> Result<FieldsyncConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(FieldsyncConfig::default()))
        .merge(Toml::file(path))
        .merge(env_provider())
        .extract()
}

/// Map `FIELDSYNC_REALTIME_RECONNECT_DELAY_MS` to `realtime.reconnect_delay_ms`.
///
/// Only the first underscore after a known section name becomes a dot, so
/// key names keep their own underscores. `FIELDSYNC_VAULT_KEY` carries the
/// credential passphrase and is not a config key.
fn env_provider() -> Env {
    Env::prefixed("FIELDSYNC_")
        .filter(|key| !key.as_str().eq_ignore_ascii_case(PASSPHRASE_ENV_KEY))
        .map(|key| map_env_key(key.as_str()).into())
}

fn map_env_key(key: &str) -> String {
    for section in ENV_SECTIONS {
        if let Some(rest) = key.strip_prefix(section).and_then(|r| r.strip_prefix('_')) {
            return format!("{section}.{rest}");
        }
    }
    key.to_string()
}
