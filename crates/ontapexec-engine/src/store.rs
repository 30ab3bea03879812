use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use serde::{Deserialize, Serialize};
use tracing::debug;

use ontapexec_traits::batch::ConnectionContext;

use crate::error::StoreError;

/// The persisted part of a connection context. Passwords are never written;
/// they are asked for again when the context is reused.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
struct StoredContext {
    username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    instance_connect_endpoint_id: Option<String>,
    private_ip_address: String,
}

/// Connection contexts keyed by target, kept in a JSON file.
pub struct ContextStore {
    path: PathBuf,
}

impl ContextStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<BTreeMap<String, StoredContext>, StoreError> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let content = fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        Ok(serde_json::from_str(&content)?)
    }

    fn write_all(&self, entries: &BTreeMap<String, StoredContext>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_json::to_string_pretty(entries)?)?;
        Ok(())
    }

    pub fn load(&self, key: &str) -> Result<Option<ConnectionContext>, StoreError> {
        let entry = self.read_all()?.remove(key);
        debug!(key, found = entry.is_some(), "Looked up stored connection context");
        Ok(entry.map(|stored| {
            ConnectionContext::new(
                stored.username,
                String::new(),
                stored.instance_connect_endpoint_id,
                stored.private_ip_address,
            )
        }))
    }

    pub fn save(&self, key: &str, context: &ConnectionContext) -> Result<(), StoreError> {
        let mut entries = self.read_all()?;
        entries.insert(
            key.to_string(),
            StoredContext {
                username: context.username.clone(),
                instance_connect_endpoint_id: context.endpoint_id().map(str::to_string),
                private_ip_address: context.private_ip_address.clone(),
            },
        );
        self.write_all(&entries)?;
        debug!(key, path = %self.path.display(), "Stored connection context");
        Ok(())
    }

    /// Returns whether an entry was removed.
    pub fn remove(&self, key: &str) -> Result<bool, StoreError> {
        let mut entries = self.read_all()?;
        let removed = entries.remove(key).is_some();
        if removed {
            self.write_all(&entries)?;
        }
        Ok(removed)
    }
}
