//! Thin wrapper around the OS keyring for credential storage.

use crate::error::OAuthError;

const SERVICE: &str = "assignsync";

pub fn get(key: &str) -> Result<Option<String>, OAuthError> {
    let entry = keyring::Entry::new(SERVICE, key)?;
    match entry.get_password() {
        Ok(pw) => Ok(Some(pw)),
        Err(keyring::Error::NoEntry) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn set(key: &str, value: &str) -> Result<(), OAuthError> {
    let entry = keyring::Entry::new(SERVICE, key)?;
    entry.set_password(value)?;
    Ok(())
}

pub fn delete(key: &str) -> Result<(), OAuthError> {
    let entry = keyring::Entry::new(SERVICE, key)?;
    match entry.delete_credential() {
        Ok(()) => Ok(()),
        Err(keyring::Error::NoEntry) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Keyring key of an OAuth client credential, e.g. `google_client_id`.
pub fn credential_key(service: &str, field: &str) -> String {
    format!("{service}_{field}")
}

/// Client credential, or [`OAuthError::CredentialsNotConfigured`].
pub fn require_credential(service: &str, field: &str) -> Result<String, OAuthError> {
    get(&credential_key(service, field))?
        .filter(|v| !v.is_empty())
        .ok_or_else(|| OAuthError::CredentialsNotConfigured {
            service: service.to_string(),
        })
}
