// SPDX-FileCopyrightText: 2026 Fieldsync Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Argon2id key derivation for the credential store.

use fieldsync_config::model::VaultConfig;
use fieldsync_core::FieldsyncError;
use ring::rand::{SecureRandom, SystemRandom};
use zeroize::Zeroizing;

pub const SALT_LEN: usize = 16;

/// Argon2id cost parameters, persisted next to the salt so that a later
/// config change does not lock out existing credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    pub memory_cost: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl From<&VaultConfig> for KdfParams {
    fn from(config: &VaultConfig) -> Self {
        Self {
            memory_cost: config.kdf_memory_cost,
            iterations: config.kdf_iterations,
            parallelism: config.kdf_parallelism,
        }
    }
}

impl KdfParams {
    pub fn to_json_bytes(self) -> Vec<u8> {
        serde_json::json!({
            "memory_cost": self.memory_cost,
            "iterations": self.iterations,
            "parallelism": self.parallelism,
        })
        .to_string()
        .into_bytes()
    }

    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self, FieldsyncError> {
        let value: serde_json::Value = serde_json::from_slice(bytes)
            .map_err(|e| FieldsyncError::Vault(format!("corrupted KDF params: {e}")))?;
        let field = |name: &str| -> Result<u32, FieldsyncError> {
            value[name]
                .as_u64()
                .and_then(|n| u32::try_from(n).ok())
                .ok_or_else(|| FieldsyncError::Vault(format!("missing {name} in KDF params")))
        };
        Ok(Self {
            memory_cost: field("memory_cost")?,
            iterations: field("iterations")?,
            parallelism: field("parallelism")?,
        })
    }
}

/// Derive a 32-byte key from `passphrase`. Zeroed on drop.
pub fn derive_key(
    passphrase: &[u8],
    salt: &[u8; SALT_LEN],
    params: KdfParams,
) -> Result<Zeroizing<[u8; 32]>, FieldsyncError> {
    let argon_params = argon2::Params::new(
        params.memory_cost,
        params.iterations,
        params.parallelism,
        Some(32),
    )
    .map_err(|e| FieldsyncError::Vault(format!("invalid Argon2id parameters: {e}")))?;
    let argon2 =
        argon2::Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, argon_params);

    let mut output = Zeroizing::new([0u8; 32]);
    argon2
        .hash_password_into(passphrase, salt, output.as_mut())
        .map_err(|e| FieldsyncError::Vault(format!("Argon2id key derivation failed: {e}")))?;
    Ok(output)
}

pub fn generate_salt() -> Result<[u8; SALT_LEN], FieldsyncError> {
    let mut salt = [0u8; SALT_LEN];
    SystemRandom::new()
        .fill(&mut salt)
        .map_err(|_| FieldsyncError::Vault("failed to generate random salt".to_string()))?;
    Ok(salt)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHEAP: KdfParams = KdfParams {
        memory_cost: 32768,
        iterations: 2,
        parallelism: 1,
    };

    #[test]
    fn same_inputs_same_key() {
        let salt = [1u8; SALT_LEN];
        let a = derive_key(b"agent passphrase", &salt, CHEAP).unwrap();
        let b = derive_key(b"agent passphrase", &salt, CHEAP).unwrap();
        assert_eq!(*a, *b);
    }

    #[test]
    fn passphrase_and_salt_both_matter() {
        let base = derive_key(b"one", &[1u8; SALT_LEN], CHEAP).unwrap();
        let other_pass = derive_key(b"two", &[1u8; SALT_LEN], CHEAP).unwrap();
        let other_salt = derive_key(b"one", &[2u8; SALT_LEN], CHEAP).unwrap();
        assert_ne!(*base, *other_pass);
        assert_ne!(*base, *other_salt);
    }

    #[test]
    fn salts_are_random() {
        assert_ne!(generate_salt().unwrap(), generate_salt().unwrap());
    }

    #[test]
    fn params_json_roundtrip_and_corruption() {
        let bytes = CHEAP.to_json_bytes();
        assert_eq!(KdfParams::from_json_bytes(&bytes).unwrap(), CHEAP);
        assert!(KdfParams::from_json_bytes(b"{\"memory_cost\":1}").is_err());
        assert!(KdfParams::from_json_bytes(b"not json").is_err());
    }
}
