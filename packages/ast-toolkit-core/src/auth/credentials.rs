//! Credential storage with platform keyring and file-based fallback.
//!
//! Storage priority:
//! 1. Platform keyring (if `keyring-storage` feature enabled and available)
//! 2. File-based storage (owner-only permissions on Unix)

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

#[cfg(feature = "keyring-storage")]
use keyring::Entry;

/// Service name used for keyring storage
#[cfg(feature = "keyring-storage")]
const KEYRING_SERVICE: &str = "ast-toolkit";
/// Username used for keyring entry
#[cfg(feature = "keyring-storage")]
const KEYRING_USER: &str = "credentials";

/// Long-lived API key plus the tenant and region it belongs to.
#[derive(Clone, Serialize, Deserialize, PartialEq)]
pub struct Credential {
    pub tenant: String,
    /// Empty selects the global (non-regional) hosts.
    pub region: String,
    api_key: String,
}

impl Credential {
    /// Build a credential, rejecting an empty tenant or API key.
    pub fn new(
        tenant: impl Into<String>,
        region: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Result<Self> {
        let creds = Self {
            tenant: tenant.into().trim().to_string(),
            region: region.into().trim().to_string(),
            api_key: api_key.into().trim().to_string(),
        };
        creds.validate()?;
        Ok(creds)
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    fn validate(&self) -> Result<()> {
        if self.tenant.is_empty() {
            return Err(Error::InvalidCredential("tenant name is empty".into()));
        }
        if self.api_key.is_empty() {
            return Err(Error::InvalidCredential("API key is empty".into()));
        }
        Ok(())
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("tenant", &self.tenant)
            .field("region", &self.region)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthStatus {
    pub authenticated: bool,
    pub tenant: Option<String>,
    pub region: Option<String>,
    /// Seconds until the freshly issued bearer token expires
    pub token_expires_in: Option<i64>,
}

fn store_err(context: &str, e: impl std::fmt::Display) -> Error {
    Error::CredentialStore(format!("{}: {}", context, e))
}

/// Get the ast-toolkit config directory
fn get_config_dir() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join(".config")))
        .ok_or_else(|| Error::CredentialStore("Failed to find config directory".into()))?;
    Ok(config_dir.join("ast-toolkit"))
}

/// Get the credentials file path for file-based storage
fn get_credentials_file_path() -> Result<PathBuf> {
    let config_dir = get_config_dir()?;
    // Create directory if it doesn't exist
    if !config_dir.exists() {
        fs::create_dir_all(&config_dir)
            .map_err(|e| store_err("Failed to create config directory", e))?;
    }
    Ok(config_dir.join(".credentials"))
}

// ============================================================================
// File-based credential storage (always available)
// ============================================================================

fn save_credentials_to_file(creds: &Credential) -> Result<()> {
    let path = get_credentials_file_path()?;
    let json =
        serde_json::to_string(creds).map_err(|e| store_err("Failed to serialize credentials", e))?;

    // Set restrictive permissions on Unix before writing
    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        let file = std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600) // Owner read/write only
            .open(&path)
            .map_err(|e| store_err("Failed to create credentials file", e))?;
        let mut file = std::io::BufWriter::new(file);
        file.write_all(json.as_bytes())
            .map_err(|e| store_err("Failed to write credentials", e))?;
    }

    #[cfg(not(unix))]
    {
        fs::write(&path, &json).map_err(|e| store_err("Failed to write credentials file", e))?;
    }

    tracing::debug!("Credentials saved to file: {:?}", path);
    Ok(())
}

fn load_credentials_from_file() -> Result<Option<Credential>> {
    let path = get_credentials_file_path()?;
    if !path.exists() {
        return Ok(None);
    }
    let content =
        fs::read_to_string(&path).map_err(|e| store_err("Failed to read credentials file", e))?;
    let creds: Credential = serde_json::from_str(&content)
        .map_err(|e| store_err("Failed to parse credentials file", e))?;
    tracing::debug!("Credentials loaded from file");
    Ok(Some(creds))
}

fn delete_credentials_from_file() {
    if let Ok(path) = get_credentials_file_path() {
        if path.exists() {
            if let Err(e) = fs::remove_file(&path) {
                tracing::warn!("Failed to delete credentials file: {}", e);
            }
        }
    }
}

// ============================================================================
// Keyring-based credential storage (optional, platform-specific)
// ============================================================================

#[cfg(feature = "keyring-storage")]
fn get_keyring_entry() -> Result<Entry> {
    Entry::new(KEYRING_SERVICE, KEYRING_USER).map_err(|e| {
        tracing::error!(
            "Failed to create keyring entry (service='{}', user='{}'): {}",
            KEYRING_SERVICE,
            KEYRING_USER,
            e
        );
        store_err("Failed to create keyring entry", e)
    })
}

#[cfg(feature = "keyring-storage")]
fn save_credentials_to_keyring(creds: &Credential) -> Result<()> {
    let entry = match get_keyring_entry() {
        Ok(e) => e,
        Err(e) => {
            tracing::warn!("{}, using file storage", e);
            return save_credentials_to_file(creds);
        }
    };

    let json =
        serde_json::to_string(creds).map_err(|e| store_err("Failed to serialize credentials", e))?;

    if let Err(e) = entry.set_password(&json) {
        tracing::warn!(
            "Failed to save credentials to keyring: {}, using file storage",
            e
        );
        return save_credentials_to_file(creds);
    }

    // Some secret-service backends accept the write and silently drop it
    match get_keyring_entry()?.get_password() {
        Ok(stored_json) if stored_json == json => {
            tracing::debug!("Credentials verified in keyring after save");
            Ok(())
        }
        Ok(_) | Err(keyring::Error::NoEntry) => {
            tracing::warn!("Credentials not readable after save, using file storage");
            save_credentials_to_file(creds)
        }
        Err(e) => {
            tracing::warn!("Could not verify credentials after save: {}", e);
            save_credentials_to_file(creds)
        }
    }
}

#[cfg(feature = "keyring-storage")]
fn load_credentials_from_keyring() -> Result<Option<Credential>> {
    let entry = match get_keyring_entry() {
        Ok(e) => e,
        Err(e) => {
            tracing::warn!("{}, trying file fallback", e);
            return load_credentials_from_file();
        }
    };

    match entry.get_password() {
        Ok(json) => {
            tracing::debug!("Credentials loaded from keyring");
            let creds: Credential = serde_json::from_str(&json)
                .map_err(|e| store_err("Failed to parse credentials from keyring", e))?;
            Ok(Some(creds))
        }
        Err(keyring::Error::NoEntry) => {
            tracing::debug!("No credentials in keyring, trying file fallback");
            load_credentials_from_file()
        }
        Err(e) => {
            tracing::warn!(
                "Failed to load credentials from keyring: {}, trying file fallback",
                e
            );
            load_credentials_from_file()
        }
    }
}

#[cfg(feature = "keyring-storage")]
fn delete_credentials_from_keyring() -> Result<()> {
    // Always delete from file as well
    delete_credentials_from_file();

    let entry = get_keyring_entry()?;
    match entry.delete_credential() {
        Ok(()) => Ok(()),
        Err(keyring::Error::NoEntry) => Ok(()), // Already deleted
        Err(e) => Err(store_err("Failed to delete credentials from keyring", e)),
    }
}

// ============================================================================
// Public API
// ============================================================================

/// Load the stored credential, if any.
///
/// Uses keyring storage if available, falling back to file storage. A stored
/// credential that no longer validates is treated as absent.
pub fn load_credentials() -> Result<Option<Credential>> {
    #[cfg(feature = "keyring-storage")]
    let creds = load_credentials_from_keyring()?;

    #[cfg(not(feature = "keyring-storage"))]
    let creds = load_credentials_from_file()?;

    match creds {
        Some(c) if c.validate().is_err() => {
            tracing::warn!("Stored credential is incomplete, ignoring it");
            Ok(None)
        }
        other => Ok(other),
    }
}

/// Save a credential to secure storage.
pub fn save_credentials(creds: &Credential) -> Result<()> {
    creds.validate()?;

    #[cfg(feature = "keyring-storage")]
    save_credentials_to_keyring(creds)?;

    #[cfg(not(feature = "keyring-storage"))]
    save_credentials_to_file(creds)?;

    tracing::info!("Credentials saved securely for tenant: {}", creds.tenant);
    Ok(())
}

/// Delete credentials from all storage locations.
pub fn delete_credentials() -> Result<()> {
    #[cfg(feature = "keyring-storage")]
    delete_credentials_from_keyring()?;

    #[cfg(not(feature = "keyring-storage"))]
    delete_credentials_from_file();

    Ok(())
}

/// Get information about credential storage location (for documentation/debugging)
pub fn get_credential_storage_info() -> String {
    #[cfg(all(feature = "keyring-storage", target_os = "windows"))]
    {
        "Windows Credential Manager (with file fallback)".to_string()
    }
    #[cfg(all(feature = "keyring-storage", target_os = "macos"))]
    {
        "macOS Keychain (with file fallback)".to_string()
    }
    #[cfg(all(
        feature = "keyring-storage",
        not(any(target_os = "windows", target_os = "macos"))
    ))]
    {
        "Linux Secret Service (GNOME Keyring/KWallet, with file fallback)".to_string()
    }
    #[cfg(not(feature = "keyring-storage"))]
    {
        let path = get_credentials_file_path()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|_| "~/.config/ast-toolkit/.credentials".to_string());
        format!("File-based storage: {}", path)
    }
}
