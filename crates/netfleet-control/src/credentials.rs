//! API-key and signing-key tables.
//!
//! Loaded once at startup, read-only afterwards. Signing secrets are only
//! ever handed to the HMAC verifier; `Debug` output redacts them.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use crate::config::ConfigError;

#[derive(Clone, Default)]
pub struct CredentialStore {
    api_keys: HashMap<String, BTreeSet<String>>,
    signing_keys: HashMap<String, String>,
}

impl CredentialStore {
    pub fn new(
        api_keys: HashMap<String, BTreeSet<String>>,
        signing_keys: HashMap<String, String>,
    ) -> Self {
        Self {
            api_keys,
            signing_keys,
        }
    }

    /// Parse the JSON tables from configuration:
    /// `{"key": ["role", ...]}` and `{"key_id": "secret"}`.
    pub fn from_json(api_keys: &str, signing_keys: &str) -> Result<Self, ConfigError> {
        let api_keys: HashMap<String, BTreeSet<String>> = if api_keys.trim().is_empty() {
            HashMap::new()
        } else {
            serde_json::from_str(api_keys).map_err(ConfigError::ApiKeys)?
        };
        let signing_keys: HashMap<String, String> = if signing_keys.trim().is_empty() {
            HashMap::new()
        } else {
            serde_json::from_str(signing_keys).map_err(ConfigError::SigningKeys)?
        };

        if api_keys.keys().any(|k| k.is_empty()) {
            return Err(ConfigError::Invalid("API key table contains an empty key".into()));
        }
        if let Some((key_id, _)) = signing_keys.iter().find(|(_, secret)| secret.is_empty()) {
            return Err(ConfigError::Invalid(format!(
                "signing key {key_id:?} has an empty secret"
            )));
        }
        Ok(Self::new(api_keys, signing_keys))
    }

    pub fn roles_for(&self, api_key: &str) -> Option<&BTreeSet<String>> {
        self.api_keys.get(api_key)
    }

    pub fn signing_secret(&self, key_id: &str) -> Option<&str> {
        self.signing_keys.get(key_id).map(String::as_str)
    }

    pub fn api_key_count(&self) -> usize {
        self.api_keys.len()
    }

    pub fn signing_key_count(&self) -> usize {
        self.signing_keys.len()
    }
}

impl fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut key_ids: Vec<_> = self.signing_keys.keys().collect();
        key_ids.sort();
        f.debug_struct("CredentialStore")
            .field("api_keys", &self.api_keys.len())
            .field("signing_key_ids", &key_ids)
            .finish()
    }
}
