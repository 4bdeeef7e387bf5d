// SPDX-FileCopyrightText: 2026 Fieldsync Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Temp-database test environment.
//!
//! `TestHarness` opens a migrated SQLite database in a temp directory, unlocks
//! a [`CredentialStore`] with cheap KDF parameters, and carries a config whose
//! endpoints point at whatever mock servers the test started.

use std::sync::Arc;

use fieldsync_config::model::{FieldsyncConfig, VaultConfig};
use fieldsync_core::{Credential, FieldsyncError};
use fieldsync_storage::Database;
use fieldsync_vault::CredentialStore;
use secrecy::SecretString;

const TEST_PASSPHRASE: &str = "fieldsync-test-passphrase";

/// Builder for [`TestHarness`].
pub struct TestHarnessBuilder {
    credential: Option<(String, String)>,
    base_url: Option<String>,
    realtime_url: Option<String>,
}

impl TestHarnessBuilder {
    fn new() -> Self {
        Self {
            credential: None,
            base_url: None,
            realtime_url: None,
        }
    }

    /// Seed the credential store with an access/refresh pair.
    pub fn with_credential(mut self, access: &str, refresh: &str) -> Self {
        self.credential = Some((access.to_string(), refresh.to_string()));
        self
    }

    /// Point `api.base_url` at a mock HTTP server.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Point `realtime.url` at a mock socket server.
    pub fn with_realtime_url(mut self, url: impl Into<String>) -> Self {
        self.realtime_url = Some(url.into());
        self
    }

    pub async fn build(self) -> Result<TestHarness, FieldsyncError> {
        let temp_dir =
            tempfile::TempDir::new().map_err(|e| FieldsyncError::Storage { source: e.into() })?;
        let db_path = temp_dir.path().join("test.db").to_string_lossy().to_string();

        let mut config = FieldsyncConfig::default();
        config.storage.database_path = db_path.clone();
        config.api.api_key = "test-api-key".to_string();
        config.api.anon_key = "test-anon-key".to_string();
        config.vault = VaultConfig {
            kdf_memory_cost: 32768,
            kdf_iterations: 2,
            kdf_parallelism: 1,
        };
        config.realtime.reconnect_delay_ms = 50;
        config.realtime.connect_timeout_secs = 2;
        if let Some(url) = self.base_url {
            config.api.base_url = url;
        }
        if let Some(url) = self.realtime_url {
            config.realtime.url = url;
        }

        let db = Database::open(&db_path).await?;
        let credentials = Arc::new(
            CredentialStore::open(
                &db,
                &SecretString::from(TEST_PASSPHRASE.to_string()),
                &config.vault,
            )
            .await?,
        );
        if let Some((access, refresh)) = self.credential {
            credentials.save(Credential::new(access, refresh)?).await?;
        }

        Ok(TestHarness {
            db,
            credentials,
            config,
            _temp_dir: temp_dir,
        })
    }
}

/// A migrated temp database plus an unlocked credential store.
pub struct TestHarness {
    pub db: Database,
    pub credentials: Arc<CredentialStore>,
    pub config: FieldsyncConfig,
    /// Kept alive so the database file outlives the test.
    _temp_dir: tempfile::TempDir,
}

impl TestHarness {
    pub fn builder() -> TestHarnessBuilder {
        TestHarnessBuilder::new()
    }

    /// Harness with defaults and no stored credential.
    pub async fn new() -> Result<Self, FieldsyncError> {
        Self::builder().build().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn builder_seeds_credentials_and_urls() {
        let harness = TestHarness::builder()
            .with_credential("access", "refresh")
            .with_base_url("http://127.0.0.1:9")
            .build()
            .await
            .unwrap();

        assert_eq!(
            harness.credentials.access_token().await.as_deref(),
            Some("access")
        );
        assert_eq!(harness.config.api.base_url, "http://127.0.0.1:9");
        assert!(harness.config.storage.database_path.ends_with("test.db"));
    }

    #[tokio::test]
    async fn default_harness_has_no_credential() {
        let harness = TestHarness::new().await.unwrap();
        assert!(harness.credentials.get().await.is_none());
    }
}
