// Durable local key/value store.
//
// Holds the pending lead while onboarding is unfinished, plus the bearer
// tokens from registration. FileStore keeps a single JSON object on disk and
// re-reads it on every access, so a second process (e.g. `lead remind`) sees
// changes made by another.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};

use super::api::AuthTokens;
use super::lead::LeadRecord;

/// Key holding the serialized pending lead.
pub const PENDING_LEAD_KEY: &str = "coiFormData";
pub const ACCESS_TOKEN_KEY: &str = "access_token";
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";

/// String key/value storage that survives restarts.
pub trait LocalStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

/// What the store holds under the pending-lead key.
#[derive(Debug)]
pub enum StoredLead {
    Missing,
    Present(LeadRecord),
    /// The value exists but doesn't decode as a lead.
    Corrupt(serde_json::Error),
}

pub fn load_pending_lead(store: &dyn LocalStore) -> Result<StoredLead> {
    Ok(match store.get(PENDING_LEAD_KEY)? {
        None => StoredLead::Missing,
        Some(json) => match serde_json::from_str(&json) {
            Ok(lead) => StoredLead::Present(lead),
            Err(e) => StoredLead::Corrupt(e),
        },
    })
}

pub fn save_pending_lead(store: &dyn LocalStore, lead: &LeadRecord) -> Result<()> {
    let json = serde_json::to_string(lead).context("Failed to serialize lead")?;
    store.set(PENDING_LEAD_KEY, &json)
}

pub fn clear_pending_lead(store: &dyn LocalStore) -> Result<()> {
    store.remove(PENDING_LEAD_KEY)
}

pub fn save_tokens(store: &dyn LocalStore, tokens: &AuthTokens) -> Result<()> {
    store.set(ACCESS_TOKEN_KEY, &tokens.access)?;
    store.set(REFRESH_TOKEN_KEY, &tokens.refresh)
}

/// JSON-file backed store.
pub struct FileStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<BTreeMap<String, String>> {
        match std::fs::read_to_string(&self.path) {
            Ok(json) if json.trim().is_empty() => Ok(BTreeMap::new()),
            Ok(json) => serde_json::from_str(&json)
                .with_context(|| format!("Local store {} is not valid JSON", self.path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e)
                .with_context(|| format!("Failed to read local store {}", self.path.display())),
        }
    }

    fn write_all(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create store directory {}", parent.display())
                })?;
            }
        }

        // Write then rename so a reader never sees a half-written file.
        let tmp = self.path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(entries)?;
        std::fs::write(&tmp, json)
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace {}", self.path.display()))
    }

    fn update(&self, f: impl FnOnce(&mut BTreeMap<String, String>)) -> Result<()> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| anyhow::anyhow!("Local store lock poisoned"))?;
        let mut entries = self.read_all()?;
        f(&mut entries);
        self.write_all(&entries)
    }
}

impl LocalStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.read_all()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.update(|entries| {
            entries.insert(key.to_string(), value.to_string());
        })
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.update(|entries| {
            entries.remove(key);
        })
    }
}

/// In-memory store for tests and one-off sessions.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, String>>> {
        self.entries
            .lock()
            .map_err(|_| anyhow::anyhow!("Memory store lock poisoned"))
    }
}

impl LocalStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.lock()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.lock()?.remove(key);
        Ok(())
    }
}
