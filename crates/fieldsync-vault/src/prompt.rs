// SPDX-FileCopyrightText: 2026 Fieldsync Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Passphrase acquisition via `FIELDSYNC_VAULT_KEY` or a TTY prompt.

use fieldsync_core::FieldsyncError;
use secrecy::SecretString;

/// Environment variable holding the credential store passphrase.
pub const VAULT_KEY_ENV_VAR: &str = "FIELDSYNC_VAULT_KEY";

/// Read the passphrase from the environment, falling back to an interactive
/// prompt when stdin is a terminal.
pub fn get_vault_passphrase() -> Result<SecretString, FieldsyncError> {
    if let Some(key) = env_passphrase() {
        return Ok(key);
    }

    if std::io::IsTerminal::is_terminal(&std::io::stdin()) {
        eprint!("Credential store passphrase: ");
        let passphrase = rpassword::read_password()
            .map_err(|e| FieldsyncError::Vault(format!("failed to read passphrase: {e}")))?;
        if passphrase.is_empty() {
            return Err(FieldsyncError::Vault("empty passphrase not allowed".to_string()));
        }
        return Ok(SecretString::from(passphrase));
    }

    Err(FieldsyncError::Vault(format!(
        "no passphrase provided; set {VAULT_KEY_ENV_VAR} or run interactively"
    )))
}

fn env_passphrase() -> Option<SecretString> {
    std::env::var(VAULT_KEY_ENV_VAR)
        .ok()
        .filter(|key| !key.is_empty())
        .map(SecretString::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use serial_test::serial;

    #[test]
    #[serial]
    fn passphrase_from_env_var() {
        // SAFETY: env mutation is confined to #[serial] tests.
        unsafe { std::env::set_var(VAULT_KEY_ENV_VAR, "field-agent") };
        let result = get_vault_passphrase();
        unsafe { std::env::remove_var(VAULT_KEY_ENV_VAR) };

        assert_eq!(result.unwrap().expose_secret(), "field-agent");
    }

    #[test]
    #[serial]
    fn empty_env_var_is_ignored() {
        unsafe { std::env::set_var(VAULT_KEY_ENV_VAR, "") };
        let env = env_passphrase();
        unsafe { std::env::remove_var(VAULT_KEY_ENV_VAR) };

        assert!(env.is_none());
    }
}
