//! API token storage in the OS keyring
//!
//! Tokens live under service `comfyui-agent-sdk-<service>` with user
//! `api_token`. Short aliases (`hf`, `el`) map to their full service names.

use crate::errors::{ClientError, ClientResult};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{error, warn};

const SERVICE_PREFIX: &str = "comfyui-agent-sdk";
const CREDENTIAL_USER: &str = "api_token";

/// Services reported by `status()`.
pub const KNOWN_SERVICES: &[&str] = &["huggingface", "civitai", "elevenlabs"];

/// Storage seam so tests can run without a desktop keyring.
pub trait SecretBackend: Send + Sync {
    fn get(&self, service: &str, user: &str) -> ClientResult<Option<String>>;
    fn set(&self, service: &str, user: &str, secret: &str) -> ClientResult<()>;
    /// Deleting a missing entry is not an error.
    fn delete(&self, service: &str, user: &str) -> ClientResult<()>;
}

/// The platform keyring (macOS Keychain, Windows Credential Manager, Secret Service).
pub struct KeyringBackend;

impl SecretBackend for KeyringBackend {
    fn get(&self, service: &str, user: &str) -> ClientResult<Option<String>> {
        let entry = keyring::Entry::new(service, user).map_err(|e| ClientError::Credential(e.to_string()))?;
        match entry.get_password() {
            Ok(secret) => Ok(Some(secret)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(ClientError::Credential(e.to_string())),
        }
    }

    fn set(&self, service: &str, user: &str, secret: &str) -> ClientResult<()> {
        let entry = keyring::Entry::new(service, user).map_err(|e| ClientError::Credential(e.to_string()))?;
        entry
            .set_password(secret)
            .map_err(|e| ClientError::Credential(e.to_string()))
    }

    fn delete(&self, service: &str, user: &str) -> ClientResult<()> {
        let entry = keyring::Entry::new(service, user).map_err(|e| ClientError::Credential(e.to_string()))?;
        match entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(ClientError::Credential(e.to_string())),
        }
    }
}

/// Process-local backend.
#[derive(Default)]
pub struct MemoryBackend {
    entries: Mutex<HashMap<(String, String), String>>,
}

impl SecretBackend for MemoryBackend {
    fn get(&self, service: &str, user: &str) -> ClientResult<Option<String>> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| ClientError::Credential("credential store poisoned".into()))?;
        Ok(entries.get(&(service.to_string(), user.to_string())).cloned())
    }

    fn set(&self, service: &str, user: &str, secret: &str) -> ClientResult<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| ClientError::Credential("credential store poisoned".into()))?;
        entries.insert((service.to_string(), user.to_string()), secret.to_string());
        Ok(())
    }

    fn delete(&self, service: &str, user: &str) -> ClientResult<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| ClientError::Credential("credential store poisoned".into()))?;
        entries.remove(&(service.to_string(), user.to_string()));
        Ok(())
    }
}

#[derive(Clone)]
pub struct CredentialStore {
    backend: Arc<dyn SecretBackend>,
}

impl Default for CredentialStore {
    fn default() -> Self {
        Self::keyring()
    }
}

impl CredentialStore {
    pub fn keyring() -> Self {
        Self::with_backend(Arc::new(KeyringBackend))
    }

    pub fn in_memory() -> Self {
        Self::with_backend(Arc::new(MemoryBackend::default()))
    }

    pub fn with_backend(backend: Arc<dyn SecretBackend>) -> Self {
        Self { backend }
    }

    /// Keyring service name for a user-facing service id.
    pub fn service_name(service: &str) -> String {
        let lower = service.to_lowercase();
        let canonical = match lower.as_str() {
            "hf" => "huggingface",
            "el" => "elevenlabs",
            other => other,
        };
        format!("{}-{}", SERVICE_PREFIX, canonical)
    }

    /// Lookup failures are logged and reported as absent.
    pub fn get(&self, service: &str) -> Option<String> {
        match self.backend.get(&Self::service_name(service), CREDENTIAL_USER) {
            Ok(secret) => secret,
            Err(e) => {
                warn!("Failed to retrieve credential for {}: {}", service, e);
                None
            }
        }
    }

    pub fn set(&self, service: &str, token: &str) -> ClientResult<()> {
        self.backend
            .set(&Self::service_name(service), CREDENTIAL_USER, token)
            .inspect_err(|e| error!("Failed to store credential for {}: {}", service, e))
    }

    pub fn delete(&self, service: &str) -> ClientResult<()> {
        self.backend
            .delete(&Self::service_name(service), CREDENTIAL_USER)
            .inspect_err(|e| error!("Failed to delete credential for {}: {}", service, e))
    }

    pub fn has(&self, service: &str) -> bool {
        self.get(service).is_some()
    }

    /// Presence of each known service's token. Never exposes values.
    pub fn status(&self) -> Vec<(&'static str, bool)> {
        KNOWN_SERVICES.iter().map(|s| (*s, self.has(s))).collect()
    }
}
