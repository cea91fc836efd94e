//! Durable key-value state
//!
//! Records survive restarts and are shared by every session on the machine.
//! Writes hit the disk before returning and reads always go back to it, so
//! a value set by one session is visible to the next read in another.
//!
//! Layout under the state directory:
//!
//! ```text
//! global.json
//! global.json.lock
//! workspaces/<percent-encoded workspace root>.json
//! workspaces/<percent-encoded workspace root>.json.lock
//! ```

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use fs2::FileExt;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use nhlink_core::prelude::*;

/// Which document a record lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    /// Shared by every session
    Global,
    /// Private to the current workspace root
    Workspace,
}

/// Durable record storage. Last writer wins.
pub trait StateStore: Send + Sync {
    fn get(&self, scope: Scope, key: &str) -> Result<Option<Value>>;

    /// Persist `value` under `key`. Returns once the write is durable.
    fn set(&self, scope: Scope, key: &str, value: Value) -> Result<()>;

    /// Delete `key`. Removing an absent key is not an error.
    fn remove(&self, scope: Scope, key: &str) -> Result<()>;
}

/// Typed helpers over [`StateStore`].
pub trait StateStoreExt: StateStore {
    fn get_as<T: DeserializeOwned>(&self, scope: Scope, key: &str) -> Result<Option<T>> {
        match self.get(scope, key)? {
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|e| Error::store(key, format!("unexpected value shape: {}", e))),
            None => Ok(None),
        }
    }

    fn set_as<T: Serialize + ?Sized>(&self, scope: Scope, key: &str, value: &T) -> Result<()> {
        let value =
            serde_json::to_value(value).map_err(|e| Error::store_serialize(key, e.to_string()))?;
        self.set(scope, key, value)
    }

    /// String record. Non-string values are treated as absent.
    fn get_string(&self, scope: Scope, key: &str) -> Result<Option<String>> {
        Ok(match self.get(scope, key)? {
            Some(Value::String(s)) => Some(s),
            _ => None,
        })
    }

    /// Boolean record. Absent and non-boolean values read as `false`.
    fn get_flag(&self, scope: Scope, key: &str) -> Result<bool> {
        Ok(matches!(self.get(scope, key)?, Some(Value::Bool(true))))
    }
}

impl<S: StateStore + ?Sized> StateStoreExt for S {}

// ─────────────────────────────────────────────────────────────────
// File Store
// ─────────────────────────────────────────────────────────────────

const GLOBAL_FILENAME: &str = "global.json";
const WORKSPACES_DIR: &str = "workspaces";

/// JSON documents on disk, guarded by fs2 file locks.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
    workspace: Option<PathBuf>,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>, workspace: Option<&Path>) -> Self {
        Self {
            dir: dir.into(),
            workspace: workspace.map(Path::to_path_buf),
        }
    }

    /// `<data_local_dir>/nhlink/state`
    pub fn default_dir() -> PathBuf {
        nhlink_core::logging::data_directory().join("state")
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn document_path(&self, scope: Scope) -> Result<PathBuf> {
        match scope {
            Scope::Global => Ok(self.dir.join(GLOBAL_FILENAME)),
            Scope::Workspace => {
                let root = self.workspace.as_ref().ok_or(Error::NoWorkspace)?;
                let encoded =
                    utf8_percent_encode(&root.to_string_lossy(), NON_ALPHANUMERIC).to_string();
                Ok(self
                    .dir
                    .join(WORKSPACES_DIR)
                    .join(format!("{}.json", encoded)))
            }
        }
    }

    fn open_lock(doc: &Path, key: &str) -> Result<File> {
        let mut lock_path = doc.as_os_str().to_owned();
        lock_path.push(".lock");
        if let Some(parent) = doc.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::store(key, format!("create {:?}: {}", parent, e)))?;
        }
        OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(PathBuf::from(lock_path))
            .map_err(|e| Error::store(key, format!("open lock for {:?}: {}", doc, e)))
    }

    fn read_document(doc: &Path, key: &str) -> Result<Map<String, Value>> {
        let content = match std::fs::read_to_string(doc) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Map::new()),
            Err(e) => return Err(Error::store(key, format!("read {:?}: {}", doc, e))),
        };
        if content.trim().is_empty() {
            return Ok(Map::new());
        }
        serde_json::from_str(&content)
            .map_err(|e| Error::store(key, format!("corrupt document {:?}: {}", doc, e)))
    }

    /// Atomic write: temp file in the same directory, then rename
    fn write_document(doc: &Path, key: &str, document: &Map<String, Value>) -> Result<()> {
        let content = serde_json::to_string_pretty(document)
            .map_err(|e| Error::store_serialize(key, e.to_string()))?;

        let mut temp_path = doc.as_os_str().to_owned();
        temp_path.push(".tmp");
        let temp_path = PathBuf::from(temp_path);

        let mut file = File::create(&temp_path)
            .map_err(|e| Error::store(key, format!("create {:?}: {}", temp_path, e)))?;
        file.write_all(content.as_bytes())
            .and_then(|_| file.sync_all())
            .map_err(|e| Error::store(key, format!("write {:?}: {}", temp_path, e)))?;

        std::fs::rename(&temp_path, doc)
            .map_err(|e| Error::store(key, format!("rename into {:?}: {}", doc, e)))
    }

    /// Read-modify-write under the exclusive lock.
    fn update(
        &self,
        scope: Scope,
        key: &str,
        apply: impl FnOnce(&mut Map<String, Value>),
    ) -> Result<()> {
        let doc = self.document_path(scope)?;
        let lock = Self::open_lock(&doc, key)?;
        lock.lock_exclusive()
            .map_err(|e| Error::store(key, format!("lock {:?}: {}", doc, e)))?;

        let result = Self::read_document(&doc, key).and_then(|mut document| {
            apply(&mut document);
            Self::write_document(&doc, key, &document)
        });

        // Lock is released on drop as well; unlock eagerly so waiters proceed
        let _ = FileExt::unlock(&lock);
        result
    }
}

impl StateStore for FileStore {
    fn get(&self, scope: Scope, key: &str) -> Result<Option<Value>> {
        let doc = self.document_path(scope)?;
        if !doc.exists() {
            return Ok(None);
        }

        let lock = Self::open_lock(&doc, key)?;
        FileExt::lock_shared(&lock)
            .map_err(|e| Error::store(key, format!("lock {:?}: {}", doc, e)))?;
        let document = Self::read_document(&doc, key);
        let _ = FileExt::unlock(&lock);

        Ok(document?.get(key).cloned())
    }

    fn set(&self, scope: Scope, key: &str, value: Value) -> Result<()> {
        self.update(scope, key, |document| {
            document.insert(key.to_string(), value);
        })?;
        trace!("Stored {:?}/{}", scope, key);
        Ok(())
    }

    fn remove(&self, scope: Scope, key: &str) -> Result<()> {
        let doc = self.document_path(scope)?;
        if !doc.exists() {
            return Ok(());
        }
        self.update(scope, key, |document| {
            document.remove(key);
        })?;
        trace!("Removed {:?}/{}", scope, key);
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────
// Memory Store
// ─────────────────────────────────────────────────────────────────

/// In-memory store for tests and throwaway sessions.
#[derive(Debug)]
pub struct MemoryStore {
    has_workspace: bool,
    records: RwLock<HashMap<(Scope, String), Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            has_workspace: true,
            records: RwLock::new(HashMap::new()),
        }
    }

    /// A store whose session has no workspace root.
    pub fn without_workspace() -> Self {
        Self {
            has_workspace: false,
            ..Self::new()
        }
    }

    fn check_scope(&self, scope: Scope) -> Result<()> {
        if scope == Scope::Workspace && !self.has_workspace {
            return Err(Error::NoWorkspace);
        }
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateStore for MemoryStore {
    fn get(&self, scope: Scope, key: &str) -> Result<Option<Value>> {
        self.check_scope(scope)?;
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        Ok(records.get(&(scope, key.to_string())).cloned())
    }

    fn set(&self, scope: Scope, key: &str, value: Value) -> Result<()> {
        self.check_scope(scope)?;
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        records.insert((scope, key.to_string()), value);
        Ok(())
    }

    fn remove(&self, scope: Scope, key: &str) -> Result<()> {
        self.check_scope(scope)?;
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        records.remove(&(scope, key.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serializer;
    use serde_json::json;
    use tempfile::tempdir;

    struct Unserializable;

    impl Serialize for Unserializable {
        fn serialize<S: Serializer>(&self, _serializer: S) -> std::result::Result<S::Ok, S::Error> {
            Err(serde::ser::Error::custom("refuses to serialize"))
        }
    }

    #[test]
    fn test_set_then_get_across_instances() {
        let temp = tempdir().unwrap();
        let a = FileStore::new(temp.path(), None);
        let b = FileStore::new(temp.path(), None);

        a.set(Scope::Global, "tmpApp", json!("shop")).unwrap();
        assert_eq!(b.get(Scope::Global, "tmpApp").unwrap(), Some(json!("shop")));
    }

    #[test]
    fn test_last_writer_wins() {
        let temp = tempdir().unwrap();
        let a = FileStore::new(temp.path(), None);
        let b = FileStore::new(temp.path(), None);

        a.set(Scope::Global, "tmpWorkload", json!("api")).unwrap();
        b.set(Scope::Global, "tmpWorkload", json!("web")).unwrap();
        assert_eq!(
            a.get_string(Scope::Global, "tmpWorkload").unwrap().as_deref(),
            Some("web")
        );
    }

    #[test]
    fn test_survives_restart() {
        let temp = tempdir().unwrap();
        FileStore::new(temp.path(), None)
            .set(Scope::Global, "welcomeDidShow", json!(true))
            .unwrap();

        let reopened = FileStore::new(temp.path(), None);
        assert!(reopened.get_flag(Scope::Global, "welcomeDidShow").unwrap());
    }

    #[test]
    fn test_remove_and_absent_key() {
        let temp = tempdir().unwrap();
        let store = FileStore::new(temp.path(), None);

        store.remove(Scope::Global, "never-set").unwrap();
        store.set(Scope::Global, "tmpId", json!("node-1")).unwrap();
        store.set(Scope::Global, "tmpApp", json!("shop")).unwrap();
        store.remove(Scope::Global, "tmpId").unwrap();

        assert_eq!(store.get(Scope::Global, "tmpId").unwrap(), None);
        assert_eq!(store.get(Scope::Global, "tmpApp").unwrap(), Some(json!("shop")));
    }

    #[test]
    fn test_workspace_scope_is_per_root() {
        let temp = tempdir().unwrap();
        let a = FileStore::new(temp.path(), Some(Path::new("/work/a")));
        let b = FileStore::new(temp.path(), Some(Path::new("/work/b")));

        a.set(Scope::Workspace, "k", json!(1)).unwrap();
        assert_eq!(b.get(Scope::Workspace, "k").unwrap(), None);
        assert_eq!(a.get(Scope::Workspace, "k").unwrap(), Some(json!(1)));
        assert!(temp
            .path()
            .join("workspaces")
            .join("%2Fwork%2Fa.json")
            .exists());
    }

    #[test]
    fn test_workspace_scope_without_root() {
        let temp = tempdir().unwrap();
        let store = FileStore::new(temp.path(), None);
        let err = store.set(Scope::Workspace, "k", json!(1)).unwrap_err();
        assert!(matches!(err, Error::NoWorkspace));

        let memory = MemoryStore::without_workspace();
        assert!(matches!(
            memory.get(Scope::Workspace, "k"),
            Err(Error::NoWorkspace)
        ));
    }

    #[test]
    fn test_serialize_failure_is_loud() {
        let store = MemoryStore::new();
        let err = store
            .set_as(Scope::Global, "tmpCommand", &Unserializable)
            .unwrap_err();
        assert!(matches!(err, Error::StoreSerialize { .. }));
        assert!(err.is_fatal());
        assert_eq!(store.get(Scope::Global, "tmpCommand").unwrap(), None);
    }

    #[test]
    fn test_corrupt_document_is_store_error() {
        let temp = tempdir().unwrap();
        std::fs::write(temp.path().join("global.json"), "{not json").unwrap();
        let store = FileStore::new(temp.path(), None);
        let err = store.get(Scope::Global, "k").unwrap_err();
        assert!(matches!(err, Error::Store { .. }));
    }

    #[test]
    fn test_typed_round_trip() {
        #[derive(Debug, PartialEq, Serialize, serde::Deserialize)]
        struct Account {
            email: String,
            token: String,
        }

        let temp = tempdir().unwrap();
        let store = FileStore::new(temp.path(), None);
        let account = Account {
            email: "dev@example.com".into(),
            token: "t0k".into(),
        };
        store.set_as(Scope::Global, "accountToken", &account).unwrap();
        let loaded: Option<Account> = store.get_as(Scope::Global, "accountToken").unwrap();
        assert_eq!(loaded, Some(account));
    }

    #[test]
    fn test_flag_defaults_to_false() {
        let store = MemoryStore::new();
        assert!(!store.get_flag(Scope::Global, "welcomeDidShow").unwrap());
        store.set(Scope::Global, "welcomeDidShow", json!("yes")).unwrap();
        assert!(!store.get_flag(Scope::Global, "welcomeDidShow").unwrap());
    }
}
