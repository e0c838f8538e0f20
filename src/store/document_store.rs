use log::{debug, info, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("concurrent write detected on {0}")]
    Conflict(String),

    #[error("transaction gave up after {0} attempts")]
    Exhausted(u32),

    #[error("store lock poisoned")]
    Poisoned,

    #[error("document {path} could not be (de)serialized: {reason}")]
    Serde { path: String, reason: String },

    #[error("store file error: {0}")]
    Io(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct VersionedDocument {
    version: u64,
    value: Value,
}

/// Versioned JSON documents addressed by slash separated paths.
///
/// Every mutation of shared state goes through [`DocumentStore::run_transaction`]:
/// reads remember the version they saw, writes are staged, and the commit only
/// lands if none of the read documents moved in the meantime. A conflicting
/// commit reruns the whole closure against fresh data.
pub struct DocumentStore {
    documents: RwLock<BTreeMap<String, VersionedDocument>>,
    max_attempts: u32,
}

impl DocumentStore {
    pub fn new(max_attempts: u32) -> Self {
        DocumentStore {
            documents: RwLock::new(BTreeMap::new()),
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn get<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>, StoreError> {
        let (_, value) = self.read_versioned(path)?;

        value.map(|value| decode(path, value)).transpose()
    }

    /// Blind write outside of any transaction. Used for seeding collaborator data.
    pub fn set<T: Serialize>(&self, path: &str, value: &T) -> Result<(), StoreError> {
        let value = encode(path, value)?;
        let mut documents = self.documents.write().map_err(|_| StoreError::Poisoned)?;

        let version = documents.get(path).map_or(0, |x| x.version) + 1;
        documents.insert(path.to_string(), VersionedDocument { version, value });

        Ok(())
    }

    /// Direct children of `collection`, e.g. `users/u1/pvpSessionHistory`.
    pub fn list<T: DeserializeOwned>(&self, collection: &str) -> Result<Vec<(String, T)>, StoreError> {
        let prefix = format!("{}/", collection.trim_end_matches('/'));
        let documents = self.documents.read().map_err(|_| StoreError::Poisoned)?;

        documents
            .range(prefix.clone()..)
            .take_while(|(path, _)| path.starts_with(&prefix))
            .filter(|(path, _)| !path[prefix.len()..].contains('/'))
            .map(|(path, document)| {
                let id = path[prefix.len()..].to_string();
                decode(path, document.value.clone()).map(|value| (id, value))
            })
            .collect()
    }

    pub fn begin(&self) -> Transaction<'_> {
        Transaction {
            store: self,
            reads: HashMap::new(),
            writes: BTreeMap::new(),
        }
    }

    /// Runs `operation` as one atomic read-compute-write cycle, retrying on write conflicts.
    ///
    /// The closure may run more than once and must not have side effects outside the
    /// transaction it is handed. Errors returned by the closure abort without writing.
    pub fn run_transaction<T, E, F>(&self, mut operation: F) -> Result<T, E>
    where
        F: FnMut(&mut Transaction<'_>) -> Result<T, E>,
        E: From<StoreError>,
    {
        for attempt in 1..=self.max_attempts {
            let mut transaction = self.begin();
            let result = operation(&mut transaction)?;

            match transaction.commit() {
                Ok(_) => return Ok(result),
                Err(StoreError::Conflict(path)) => {
                    debug!(
                        "Transaction attempt {} conflicted on {}, retrying",
                        attempt, path
                    );
                }
                Err(err) => return Err(err.into()),
            }
        }

        warn!(
            "Transaction abandoned after {} conflicting attempts",
            self.max_attempts
        );
        Err(StoreError::Exhausted(self.max_attempts).into())
    }

    fn read_versioned(&self, path: &str) -> Result<(u64, Option<Value>), StoreError> {
        let documents = self.documents.read().map_err(|_| StoreError::Poisoned)?;

        Ok(documents
            .get(path)
            .map_or((0, None), |x| (x.version, Some(x.value.clone()))))
    }
}

// Flat file persistence
impl DocumentStore {
    pub fn load_from_file<P: AsRef<Path>>(path: P, max_attempts: u32) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if !path.exists() {
            info!("No store file at {}, starting empty", path.display());
            return Ok(Self::new(max_attempts));
        }

        let file = File::open(path).map_err(|x| StoreError::Io(x.to_string()))?;
        let documents: BTreeMap<String, VersionedDocument> =
            serde_json::from_reader(BufReader::new(file)).map_err(|x| StoreError::Serde {
                path: path.display().to_string(),
                reason: x.to_string(),
            })?;

        info!("Loaded {} documents from {}", documents.len(), path.display());

        Ok(DocumentStore {
            documents: RwLock::new(documents),
            max_attempts: max_attempts.max(1),
        })
    }

    /// Writes a sibling `.tmp` file, syncs it, then renames it over `path`.
    /// The previous snapshot stays intact if anything fails on the way.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<usize, StoreError> {
        let path = path.as_ref();
        let documents = self.documents.read().map_err(|_| StoreError::Poisoned)?;

        let staging = staging_path(path);
        let written = write_snapshot(&staging, &documents).and_then(|_| {
            fs::rename(&staging, path).map_err(|x| StoreError::Io(x.to_string()))
        });
        if let Err(err) = written {
            let _ = fs::remove_file(&staging);
            return Err(err);
        }

        Ok(documents.len())
    }
}

fn staging_path(path: &Path) -> PathBuf {
    let mut staging = path.as_os_str().to_owned();
    staging.push(".tmp");
    PathBuf::from(staging)
}

fn write_snapshot(
    path: &Path,
    documents: &BTreeMap<String, VersionedDocument>,
) -> Result<(), StoreError> {
    let io_error = |x: std::io::Error| StoreError::Io(format!("{}: {}", path.display(), x));

    let file = File::create(path).map_err(io_error)?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer(&mut writer, documents).map_err(|x| StoreError::Serde {
        path: path.display().to_string(),
        reason: x.to_string(),
    })?;
    writer.flush().map_err(io_error)?;

    let file = writer.into_inner().map_err(|x| io_error(x.into_error()))?;
    file.sync_all().map_err(io_error)
}

pub struct Transaction<'a> {
    store: &'a DocumentStore,
    reads: HashMap<String, (u64, Option<Value>)>,
    writes: BTreeMap<String, Value>,
}

impl Transaction<'_> {
    /// Reads are repeatable within a transaction and see the transaction's own writes.
    pub fn get<T: DeserializeOwned>(&mut self, path: &str) -> Result<Option<T>, StoreError> {
        if let Some(value) = self.writes.get(path) {
            return decode(path, value.clone()).map(Some);
        }

        if !self.reads.contains_key(path) {
            let snapshot = self.store.read_versioned(path)?;
            self.reads.insert(path.to_string(), snapshot);
        }

        match self.reads.get(path) {
            Some((_, Some(value))) => decode(path, value.clone()).map(Some),
            _ => Ok(None),
        }
    }

    pub fn set<T: Serialize>(&mut self, path: &str, value: &T) -> Result<(), StoreError> {
        let value = encode(path, value)?;
        self.writes.insert(path.to_string(), value);

        Ok(())
    }

    /// Applies every staged write at once, or none of them if a read went stale.
    pub fn commit(self) -> Result<usize, StoreError> {
        let mut documents = self
            .store
            .documents
            .write()
            .map_err(|_| StoreError::Poisoned)?;

        for (path, (seen_version, _)) in &self.reads {
            let current_version = documents.get(path).map_or(0, |x| x.version);
            if current_version != *seen_version {
                return Err(StoreError::Conflict(path.clone()));
            }
        }

        let written = self.writes.len();
        for (path, value) in self.writes {
            let version = documents.get(&path).map_or(0, |x| x.version) + 1;
            documents.insert(path, VersionedDocument { version, value });
        }

        Ok(written)
    }
}

fn decode<T: DeserializeOwned>(path: &str, value: Value) -> Result<T, StoreError> {
    serde_json::from_value(value).map_err(|x| StoreError::Serde {
        path: path.to_string(),
        reason: x.to_string(),
    })
}

fn encode<T: Serialize>(path: &str, value: &T) -> Result<Value, StoreError> {
    serde_json::to_value(value).map_err(|x| StoreError::Serde {
        path: path.to_string(),
        reason: x.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_interleaved_commit_conflicts() {
        let store = DocumentStore::new(3);
        store.set("counters/a", &json!(0)).unwrap();

        let mut first = store.begin();
        let mut second = store.begin();

        let a: i64 = first.get("counters/a").unwrap().unwrap();
        let b: i64 = second.get("counters/a").unwrap().unwrap();

        first.set("counters/a", &(a + 1)).unwrap();
        second.set("counters/a", &(b + 1)).unwrap();

        assert!(first.commit().is_ok());
        assert!(matches!(second.commit(), Err(StoreError::Conflict(_))));

        let value: i64 = store.get("counters/a").unwrap().unwrap();
        assert_eq!(value, 1);
    }

    #[test]
    fn test_failed_commit_applies_nothing() {
        let store = DocumentStore::new(3);
        store.set("things/x", &json!("old")).unwrap();

        let mut stale = store.begin();
        let _: Option<String> = stale.get("things/x").unwrap();
        stale.set("things/x", &"stale").unwrap();
        stale.set("things/y", &"side effect").unwrap();

        store.set("things/x", &json!("new")).unwrap();

        assert!(stale.commit().is_err());
        assert_eq!(store.get::<String>("things/x").unwrap().unwrap(), "new");
        assert!(store.get::<String>("things/y").unwrap().is_none());
    }

    #[test]
    fn test_run_transaction_retries_until_clean() {
        let store = DocumentStore::new(5);
        store.set("counters/a", &json!(10)).unwrap();

        let mut attempts = 0;
        let result: Result<i64, StoreError> = store.run_transaction(|tx| {
            attempts += 1;
            let current: i64 = tx.get("counters/a")?.unwrap_or(0);
            if attempts == 1 {
                // Someone else lands a write between our read and our commit.
                store.set("counters/a", &json!(current + 100))?;
            }
            tx.set("counters/a", &(current + 1))?;
            Ok(current + 1)
        });

        assert_eq!(attempts, 2);
        assert_eq!(result.unwrap(), 111);
        assert_eq!(store.get::<i64>("counters/a").unwrap().unwrap(), 111);
    }

    #[test]
    fn test_run_transaction_gives_up() {
        let store = DocumentStore::new(2);
        store.set("counters/a", &json!(0)).unwrap();

        let result: Result<(), StoreError> = store.run_transaction(|tx| {
            let current: i64 = tx.get("counters/a")?.unwrap_or(0);
            store.set("counters/a", &json!(current + 1))?;
            tx.set("counters/a", &current)?;
            Ok(())
        });

        assert!(matches!(result, Err(StoreError::Exhausted(2))));
    }

    #[test]
    fn test_absent_read_conflicts_with_concurrent_create() {
        let store = DocumentStore::new(1);

        let mut tx = store.begin();
        assert!(tx.get::<String>("things/new").unwrap().is_none());
        tx.set("things/new", &"mine").unwrap();

        store.set("things/new", &json!("theirs")).unwrap();

        assert!(matches!(tx.commit(), Err(StoreError::Conflict(_))));
    }

    #[test]
    fn test_list_returns_direct_children_only() {
        let store = DocumentStore::new(1);
        store.set("users/u1", &json!({"n": 1})).unwrap();
        store.set("users/u2", &json!({"n": 2})).unwrap();
        store.set("users/u1/pvpSessionHistory/m1", &json!({"n": 3})).unwrap();
        store.set("usersx/u3", &json!({"n": 4})).unwrap();

        let users: Vec<(String, Value)> = store.list("users").unwrap();
        let ids: Vec<&str> = users.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["u1", "u2"]);

        let history: Vec<(String, Value)> = store.list("users/u1/pvpSessionHistory").unwrap();
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn test_flat_file_round_trip() {
        let path = std::env::temp_dir().join(format!("pvp-store-{}.json", uuid::Uuid::new_v4()));

        let store = DocumentStore::new(1);
        store.set("pvpSessions/a", &json!({"status": "waiting"})).unwrap();
        assert_eq!(store.save_to_file(&path).unwrap(), 1);

        let loaded = DocumentStore::load_from_file(&path, 1).unwrap();
        let value: Value = loaded.get("pvpSessions/a").unwrap().unwrap();
        assert_eq!(value["status"], "waiting");

        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn test_failed_save_is_reported() {
        let store = DocumentStore::new(1);
        store.set("pvpSessions/a", &json!({"status": "waiting"})).unwrap();

        let missing_dir = std::env::temp_dir()
            .join(format!("pvp-missing-{}", uuid::Uuid::new_v4()))
            .join("store.json");
        assert!(matches!(store.save_to_file(&missing_dir), Err(StoreError::Io(_))));

        // A full device accepts the open and the buffered write but fails the flush.
        let full = Path::new("/dev/full");
        if full.exists() {
            let documents = store.documents.read().unwrap();
            assert!(matches!(write_snapshot(full, &documents), Err(StoreError::Io(_))));
        }
    }

    #[test]
    fn test_save_replaces_snapshot_without_leftovers() {
        let path = std::env::temp_dir().join(format!("pvp-store-{}.json", uuid::Uuid::new_v4()));
        std::fs::write(&path, "previous snapshot").unwrap();

        let store = DocumentStore::new(1);
        store.set("pvpSessions/a", &json!({"status": "ready"})).unwrap();
        store.save_to_file(&path).unwrap();

        let loaded = DocumentStore::load_from_file(&path, 1).unwrap();
        let value: Value = loaded.get("pvpSessions/a").unwrap().unwrap();
        assert_eq!(value["status"], "ready");
        assert!(!staging_path(&path).exists());

        let _ = std::fs::remove_file(path);
    }
}
