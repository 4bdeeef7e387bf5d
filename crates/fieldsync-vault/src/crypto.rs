// SPDX-FileCopyrightText: 2026 Fieldsync Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! AES-256-GCM sealing of credential blobs.
//!
//! Every [`seal`] draws a fresh 96-bit nonce from the system CSPRNG; a nonce
//! must never repeat under the same key.

use fieldsync_core::FieldsyncError;
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};
use ring::rand::{SecureRandom, SystemRandom};

/// Ciphertext (with appended GCM tag) and the nonce needed to open it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    pub ciphertext: Vec<u8>,
    pub nonce: [u8; NONCE_LEN],
}

impl Sealed {
    /// Rebuild from the raw columns stored in SQLite.
    pub fn from_parts(ciphertext: Vec<u8>, nonce: Vec<u8>) -> Result<Self, FieldsyncError> {
        let nonce: [u8; NONCE_LEN] = nonce
            .try_into()
            .map_err(|_| FieldsyncError::Vault("corrupted nonce (expected 12 bytes)".to_string()))?;
        Ok(Self { ciphertext, nonce })
    }
}

fn aead_key(key: &[u8; 32]) -> Result<LessSafeKey, FieldsyncError> {
    let unbound = UnboundKey::new(&AES_256_GCM, key)
        .map_err(|_| FieldsyncError::Vault("failed to create AES-256-GCM key".to_string()))?;
    Ok(LessSafeKey::new(unbound))
}

/// Encrypt `plaintext` under `key`, binding it to `context` as associated data.
pub fn seal(key: &[u8; 32], context: &[u8], plaintext: &[u8]) -> Result<Sealed, FieldsyncError> {
    let key = aead_key(key)?;

    let mut nonce = [0u8; NONCE_LEN];
    SystemRandom::new()
        .fill(&mut nonce)
        .map_err(|_| FieldsyncError::Vault("failed to generate random nonce".to_string()))?;

    let mut in_out = plaintext.to_vec();
    key.seal_in_place_append_tag(
        Nonce::assume_unique_for_key(nonce),
        Aad::from(context),
        &mut in_out,
    )
    .map_err(|_| FieldsyncError::Vault("AES-256-GCM encryption failed".to_string()))?;

    Ok(Sealed {
        ciphertext: in_out,
        nonce,
    })
}

/// Decrypt a [`Sealed`] blob. Fails on a wrong key, wrong context, or tampering.
pub fn open(key: &[u8; 32], context: &[u8], sealed: &Sealed) -> Result<Vec<u8>, FieldsyncError> {
    let key = aead_key(key)?;
    let mut in_out = sealed.ciphertext.clone();
    let plaintext = key
        .open_in_place(
            Nonce::assume_unique_for_key(sealed.nonce),
            Aad::from(context),
            &mut in_out,
        )
        .map_err(|_| {
            FieldsyncError::Vault("decryption failed: wrong passphrase or corrupted data".to_string())
        })?;
    Ok(plaintext.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: [u8; 32] = [7u8; 32];

    #[test]
    fn seal_then_open_returns_plaintext() {
        let sealed = seal(&KEY, b"credentials", b"{\"accessToken\":\"a\"}").unwrap();
        assert_eq!(sealed.ciphertext.len(), 19 + 16);
        let plain = open(&KEY, b"credentials", &sealed).unwrap();
        assert_eq!(plain, b"{\"accessToken\":\"a\"}");
    }

    #[test]
    fn nonces_are_fresh() {
        let a = seal(&KEY, b"ctx", b"same").unwrap();
        let b = seal(&KEY, b"ctx", b"same").unwrap();
        assert_ne!(a.nonce, b.nonce);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn wrong_key_or_context_fails() {
        let sealed = seal(&KEY, b"credentials", b"secret").unwrap();
        assert!(open(&[8u8; 32], b"credentials", &sealed).is_err());
        assert!(open(&KEY, b"key_check", &sealed).is_err());
    }

    #[test]
    fn tampering_is_detected() {
        let mut sealed = seal(&KEY, b"ctx", b"do not tamper").unwrap();
        sealed.ciphertext[0] ^= 0x01;
        assert!(open(&KEY, b"ctx", &sealed).is_err());
    }

    #[test]
    fn from_parts_rejects_short_nonce() {
        assert!(Sealed::from_parts(vec![1, 2, 3], vec![0; 11]).is_err());
        assert!(Sealed::from_parts(vec![1, 2, 3], vec![0; 12]).is_ok());
    }
}
