// SPDX-FileCopyrightText: 2026 Fieldsync Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Shared startup for every subcommand: database, credential store, HTTP client.

use std::sync::Arc;
use std::time::Duration;

use fieldsync_auth::AuthenticatedClient;
use fieldsync_config::model::FieldsyncConfig;
use fieldsync_core::FieldsyncError;
use fieldsync_outbox::{ConnectivityMonitor, RequestOutbox};
use fieldsync_storage::Database;
use fieldsync_vault::{get_vault_passphrase, CredentialStore};
use tracing::debug;

/// Opened resources that outlive a single operation.
pub struct AppContext {
    pub config: FieldsyncConfig,
    pub db: Database,
    pub credentials: Arc<CredentialStore>,
}

impl AppContext {
    /// Open the database and unlock the credential store.
    pub async fn open(config: FieldsyncConfig) -> Result<Self, FieldsyncError> {
        let db = Database::open(&config.storage.database_path).await?;
        let passphrase = get_vault_passphrase()?;
        let credentials =
            Arc::new(CredentialStore::open(&db, &passphrase, &config.vault).await?);
        debug!(path = %config.storage.database_path, "application context ready");
        Ok(Self {
            config,
            db,
            credentials,
        })
    }

    pub fn client(&self) -> Result<AuthenticatedClient, FieldsyncError> {
        AuthenticatedClient::new(
            Arc::clone(&self.credentials),
            &self.config.api,
            Duration::from_secs(self.config.outbox.request_timeout_secs),
        )
    }

    pub fn outbox(
        &self,
        connectivity: Arc<ConnectivityMonitor>,
    ) -> Result<Arc<RequestOutbox>, FieldsyncError> {
        Ok(Arc::new(RequestOutbox::new(
            self.db.clone(),
            self.client()?,
            connectivity,
            &self.config.outbox,
        )))
    }

    /// Checkpoint the WAL and release the database.
    pub async fn close(self) -> Result<(), FieldsyncError> {
        self.db.close().await
    }
}
