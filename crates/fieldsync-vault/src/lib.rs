// SPDX-FileCopyrightText: 2026 Fieldsync Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Encrypted credential storage for the Fieldsync resilience core.
//!
//! The access/refresh token pair is sealed with AES-256-GCM under a key
//! derived from a passphrase via Argon2id. [`CredentialStore`] is the only
//! writer of that pair; everything else reads through it.

pub mod credential_store;
pub mod crypto;
pub mod kdf;
pub mod prompt;

pub use credential_store::CredentialStore;
pub use prompt::get_vault_passphrase;
