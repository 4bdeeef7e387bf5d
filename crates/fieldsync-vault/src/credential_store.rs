// SPDX-FileCopyrightText: 2026 Fieldsync Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Encrypted, durable holder of the session credential pair.
//!
//! The pair is JSON-serialized and sealed with AES-256-GCM under a key derived
//! from the operator passphrase. The Argon2id salt, its cost parameters, and a
//! sealed key check live in `credential_meta`; the sealed credential lives in
//! the single `credentials` row. Reads are served from an in-memory copy, and
//! every save or clear is broadcast as a [`CredentialEvent`].

use std::collections::HashMap;

use fieldsync_config::model::VaultConfig;
use fieldsync_core::{Credential, CredentialEvent, FieldsyncError};
use fieldsync_storage::Database;
use rusqlite::params;
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::crypto::{self, Sealed};
use crate::kdf::{self, KdfParams, SALT_LEN};

const CREDENTIAL_CONTEXT: &[u8] = b"fieldsync.credentials";
const KEY_CHECK_CONTEXT: &[u8] = b"fieldsync.key_check";
const KEY_CHECK_PLAINTEXT: &[u8] = b"fieldsync";

const META_SALT: &str = "kdf_salt";
const META_PARAMS: &str = "kdf_params";
const META_CHECK: &str = "key_check";
const META_CHECK_NONCE: &str = "key_check_nonce";

/// Capacity of the change broadcast. Lagging listeners only miss stale events.
const EVENT_CAPACITY: usize = 16;

/// Single source of truth for the access/refresh token pair.
pub struct CredentialStore {
    conn: tokio_rusqlite::Connection,
    key: Zeroizing<[u8; 32]>,
    current: RwLock<Option<Credential>>,
    changes: broadcast::Sender<CredentialEvent>,
}

impl std::fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialStore")
            .field("key", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl CredentialStore {
    /// Unlock the store, initializing key material on first use.
    ///
    /// Fails with [`FieldsyncError::Vault`] when the passphrase does not match
    /// the one the store was created with.
    pub async fn open(
        db: &Database,
        passphrase: &SecretString,
        config: &VaultConfig,
    ) -> Result<Self, FieldsyncError> {
        let conn = db.connection().clone();
        let meta = read_meta(&conn).await?;

        let key = match meta.get(META_SALT) {
            Some(salt) => unlock(&meta, salt, passphrase)?,
            None => initialize(&conn, passphrase, KdfParams::from(config)).await?,
        };

        let current = load_credential(&conn, &key).await?;
        debug!(present = current.is_some(), "credential store unlocked");

        let (changes, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            conn,
            key,
            current: RwLock::new(current),
            changes,
        })
    }

    /// The stored credential, if any.
    pub async fn get(&self) -> Option<Credential> {
        self.current.read().await.clone()
    }

    /// Current access token when present and non-blank.
    pub async fn access_token(&self) -> Option<String> {
        self.current
            .read()
            .await
            .as_ref()
            .and_then(|c| c.usable_access_token().map(str::to_owned))
    }

    /// Persist `credential`, replacing any previous pair, and notify listeners.
    pub async fn save(&self, credential: Credential) -> Result<(), FieldsyncError> {
        credential.validate()?;
        let plaintext = Zeroizing::new(
            serde_json::to_vec(&credential)
                .map_err(|e| FieldsyncError::Vault(format!("failed to encode credential: {e}")))?,
        );
        let sealed = crypto::seal(&self.key, CREDENTIAL_CONTEXT, &plaintext)?;

        // Holding the write lock across the insert keeps cache and row in step.
        let mut current = self.current.write().await;
        let Sealed { ciphertext, nonce } = sealed;
        let nonce = nonce.to_vec();
        self.conn
            .call(move |conn| -> Result<(), rusqlite::Error> {
                conn.execute(
                    "INSERT INTO credentials (slot, ciphertext, nonce) VALUES (1, ?1, ?2)
                     ON CONFLICT(slot) DO UPDATE SET
                         ciphertext = excluded.ciphertext,
                         nonce = excluded.nonce,
                         updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')",
                    params![ciphertext, nonce],
                )?;
                Ok(())
            })
            .await
            .map_err(map_tr_err)?;
        *current = Some(credential.clone());
        drop(current);

        info!("credentials saved");
        let _ = self.changes.send(CredentialEvent::Saved(credential));
        Ok(())
    }

    /// Remove both tokens at once and notify listeners (logout).
    pub async fn clear(&self) -> Result<(), FieldsyncError> {
        let mut current = self.current.write().await;
        self.conn
            .call(|conn| -> Result<(), rusqlite::Error> {
                conn.execute("DELETE FROM credentials WHERE slot = 1", [])?;
                Ok(())
            })
            .await
            .map_err(map_tr_err)?;
        *current = None;
        drop(current);

        info!("credentials cleared");
        let _ = self.changes.send(CredentialEvent::Cleared);
        Ok(())
    }

    /// Listen for saves and clears made after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<CredentialEvent> {
        self.changes.subscribe()
    }
}

async fn read_meta(
    conn: &tokio_rusqlite::Connection,
) -> Result<HashMap<String, Vec<u8>>, FieldsyncError> {
    conn.call(|conn| -> Result<HashMap<String, Vec<u8>>, rusqlite::Error> {
        let mut stmt = conn.prepare("SELECT key, value FROM credential_meta")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<HashMap<_, _>, _>>()?;
        Ok(rows)
    })
    .await
    .map_err(map_tr_err)
}

fn unlock(
    meta: &HashMap<String, Vec<u8>>,
    salt: &[u8],
    passphrase: &SecretString,
) -> Result<Zeroizing<[u8; 32]>, FieldsyncError> {
    let missing = |name: &str| FieldsyncError::Vault(format!("credential_meta is missing {name}"));

    let salt: [u8; SALT_LEN] = salt
        .try_into()
        .map_err(|_| FieldsyncError::Vault("corrupted salt (expected 16 bytes)".to_string()))?;
    let params = KdfParams::from_json_bytes(meta.get(META_PARAMS).ok_or_else(|| missing(META_PARAMS))?)?;
    let check = Sealed::from_parts(
        meta.get(META_CHECK).cloned().ok_or_else(|| missing(META_CHECK))?,
        meta.get(META_CHECK_NONCE)
            .cloned()
            .ok_or_else(|| missing(META_CHECK_NONCE))?,
    )?;

    let key = kdf::derive_key(passphrase.expose_secret().as_bytes(), &salt, params)?;
    match crypto::open(&key, KEY_CHECK_CONTEXT, &check) {
        Ok(plain) if plain == KEY_CHECK_PLAINTEXT => Ok(key),
        _ => Err(FieldsyncError::Vault(
            "invalid passphrase for the credential store".to_string(),
        )),
    }
}

async fn initialize(
    conn: &tokio_rusqlite::Connection,
    passphrase: &SecretString,
    params: KdfParams,
) -> Result<Zeroizing<[u8; 32]>, FieldsyncError> {
    let salt = kdf::generate_salt()?;
    let key = kdf::derive_key(passphrase.expose_secret().as_bytes(), &salt, params)?;
    let check = crypto::seal(&key, KEY_CHECK_CONTEXT, KEY_CHECK_PLAINTEXT)?;

    let rows: Vec<(&'static str, Vec<u8>)> = vec![
        (META_SALT, salt.to_vec()),
        (META_PARAMS, params.to_json_bytes()),
        (META_CHECK, check.ciphertext),
        (META_CHECK_NONCE, check.nonce.to_vec()),
    ];
    conn.call(move |conn| -> Result<(), rusqlite::Error> {
        let tx = conn.transaction()?;
        // Stale rows sealed under another key would never open again.
        tx.execute("DELETE FROM credentials", [])?;
        for (key, value) in rows {
            tx.execute(
                "INSERT OR REPLACE INTO credential_meta (key, value) VALUES (?1, ?2)",
                params![key, value],
            )?;
        }
        tx.commit()?;
        Ok(())
    })
    .await
    .map_err(map_tr_err)?;

    info!("credential store initialized");
    Ok(key)
}

async fn load_credential(
    conn: &tokio_rusqlite::Connection,
    key: &[u8; 32],
) -> Result<Option<Credential>, FieldsyncError> {
    let row = conn
        .call(|conn| -> Result<Option<(Vec<u8>, Vec<u8>)>, rusqlite::Error> {
            let result = conn.query_row(
                "SELECT ciphertext, nonce FROM credentials WHERE slot = 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            );
            match result {
                Ok(row) => Ok(Some(row)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e),
            }
        })
        .await
        .map_err(map_tr_err)?;

    let Some((ciphertext, nonce)) = row else {
        return Ok(None);
    };
    let plaintext = Zeroizing::new(crypto::open(
        key,
        CREDENTIAL_CONTEXT,
        &Sealed::from_parts(ciphertext, nonce)?,
    )?);
    let credential = serde_json::from_slice(&plaintext)
        .map_err(|e| FieldsyncError::Vault(format!("corrupted credential row: {e}")))?;
    Ok(Some(credential))
}

fn map_tr_err(e: tokio_rusqlite::Error<rusqlite::Error>) -> FieldsyncError {
    FieldsyncError::Vault(format!("credential database error: {e}"))
}
