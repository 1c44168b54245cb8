//! Keyed record repositories with change notification.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::mpsc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::StoreError;
use crate::constants::CAT_STORE;
use crate::log_debug;
use crate::state::{AutomaticMode, WifiNetwork};

/// A record with a unique string key.
pub trait Keyed {
    fn key(&self) -> &str;
}

impl Keyed for WifiNetwork {
    fn key(&self) -> &str {
        &self.ssid
    }
}

impl Keyed for AutomaticMode {
    fn key(&self) -> &str {
        &self.ssid
    }
}

/// CRUD by key plus a change stream.
pub trait Repository<V>: Send {
    fn get(&self, key: &str) -> Option<V>;

    /// Inserts or replaces the record with the same key and notifies observers.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be persisted.
    fn put(&mut self, value: V) -> Result<(), StoreError>;

    /// All records, ordered by key.
    fn all(&self) -> Vec<V>;

    /// Every successful `put` is delivered to the returned receiver.
    fn observe(&mut self) -> mpsc::Receiver<V>;
}

/// Volatile repository.
pub struct MemoryRepository<V> {
    records: BTreeMap<String, V>,
    observers: Vec<mpsc::Sender<V>>,
}

impl<V> Default for MemoryRepository<V> {
    fn default() -> Self {
        Self {
            records: BTreeMap::new(),
            observers: Vec::new(),
        }
    }
}

impl<V: Keyed + Clone> MemoryRepository<V> {
    #[must_use]
    pub fn with_records(records: impl IntoIterator<Item = V>) -> Self {
        Self {
            records: records
                .into_iter()
                .map(|v| (v.key().to_string(), v))
                .collect(),
            observers: Vec::new(),
        }
    }

    fn insert(&mut self, value: V) {
        self.records.insert(value.key().to_string(), value.clone());
        // Drop observers whose receiver is gone.
        self.observers.retain(|tx| tx.send(value.clone()).is_ok());
    }
}

impl<V: Keyed + Clone + Send> Repository<V> for MemoryRepository<V> {
    fn get(&self, key: &str) -> Option<V> {
        self.records.get(key).cloned()
    }

    fn put(&mut self, value: V) -> Result<(), StoreError> {
        self.insert(value);
        Ok(())
    }

    fn all(&self) -> Vec<V> {
        self.records.values().cloned().collect()
    }

    fn observe(&mut self) -> mpsc::Receiver<V> {
        let (tx, rx) = mpsc::channel();
        self.observers.push(tx);
        rx
    }
}

/// Repository persisted as a JSON array, rewritten on every `put`.
pub struct JsonRepository<V> {
    path: PathBuf,
    inner: MemoryRepository<V>,
}

impl<V: Keyed + Clone + Serialize + DeserializeOwned> JsonRepository<V> {
    /// Opens the store at `path`. A missing file is an empty store.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let records: Vec<V> = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            if content.trim().is_empty() {
                Vec::new()
            } else {
                serde_json::from_str(&content)?
            }
        } else {
            Vec::new()
        };
        log_debug!(
            CAT_STORE,
            "Loaded {} record(s) from {}",
            records.len(),
            path.display()
        );
        Ok(Self {
            path: path.to_path_buf(),
            inner: MemoryRepository::with_records(records),
        })
    }

    fn save(&self, records: &[&V]) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(records)?;
        std::fs::write(&self.path, content)?;
        Ok(())
    }
}

impl<V: Keyed + Clone + Send + Serialize + DeserializeOwned> Repository<V> for JsonRepository<V> {
    fn get(&self, key: &str) -> Option<V> {
        self.inner.get(key)
    }

    /// Writes the file first; memory and observers only see saved records.
    fn put(&mut self, value: V) -> Result<(), StoreError> {
        let mut records: Vec<&V> = self
            .inner
            .records
            .values()
            .filter(|v| v.key() != value.key())
            .collect();
        records.push(&value);
        records.sort_by(|a, b| a.key().cmp(b.key()));
        self.save(&records)?;
        self.inner.insert(value);
        Ok(())
    }

    fn all(&self) -> Vec<V> {
        self.inner.all()
    }

    fn observe(&mut self) -> mpsc::Receiver<V> {
        self.inner.observe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{Protocol, ProtocolPort};

    fn network(ssid: &str) -> WifiNetwork {
        WifiNetwork::new(ssid, false, ProtocolPort::new(Protocol::WireGuard, 443))
    }

    #[test]
    fn test_put_replaces_by_key_and_notifies() {
        let mut repo = MemoryRepository::default();
        let rx = repo.observe();

        repo.put(network("Home")).unwrap();
        let mut trusted = network("Home");
        trusted.trusted = true;
        repo.put(trusted).unwrap();

        assert_eq!(repo.all().len(), 1);
        assert!(repo.get("Home").unwrap().trusted);
        assert_eq!(rx.try_iter().count(), 2);
    }

    #[test]
    fn test_dropped_observer_is_pruned() {
        let mut repo = MemoryRepository::default();
        drop(repo.observe());
        repo.put(network("Cafe")).unwrap();
        assert!(repo.observers.is_empty());
    }

    #[test]
    fn test_json_repository_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("networks.json");

        let mut repo = JsonRepository::<WifiNetwork>::open(&path).unwrap();
        assert!(repo.all().is_empty());
        repo.put(network("Office")).unwrap();

        let reopened = JsonRepository::<WifiNetwork>::open(&path).unwrap();
        assert_eq!(reopened.get("Office"), Some(network("Office")));
    }

    #[test]
    fn test_json_repository_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("automatic_mode.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            JsonRepository::<AutomaticMode>::open(&path),
            Err(StoreError::Json(_))
        ));
    }

    #[test]
    fn test_failed_save_leaves_store_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "").unwrap();

        let mut repo = JsonRepository::<WifiNetwork>::open(&blocker.join("networks.json")).unwrap();
        let rx = repo.observe();
        assert!(matches!(repo.put(network("Office")), Err(StoreError::Io(_))));

        assert_eq!(repo.get("Office"), None);
        assert!(rx.try_iter().next().is_none());
    }

    #[test]
    fn test_json_repository_replaces_in_key_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("networks.json");
        let mut repo = JsonRepository::<WifiNetwork>::open(&path).unwrap();
        repo.put(network("Office")).unwrap();
        repo.put(network("Cafe")).unwrap();
        let mut office = network("Office");
        office.trusted = true;
        repo.put(office).unwrap();

        let reopened = JsonRepository::<WifiNetwork>::open(&path).unwrap();
        let ssids: Vec<String> = reopened.all().into_iter().map(|n| n.ssid).collect();
        assert_eq!(ssids, vec!["Cafe", "Office"]);
        assert!(reopened.get("Office").unwrap().trusted);
    }
}
