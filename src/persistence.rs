//! # Resolver Persistence
//!
//! Storage backends for the resolver edge set. Every backend saves the full
//! edge set atomically: a reader sees either the previous snapshot or the new
//! one, never a mix.

use crate::resolver::Edge;
use parking_lot::Mutex;
use rocksdb::{ColumnFamilyDescriptor, IteratorMode, Options, WriteBatch, WriteOptions, DB};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, warn};

const CF_EDGES: &str = "edges";
const CF_METADATA: &str = "metadata";
const KEY_MANIFEST: &[u8] = b"manifest";

const STORAGE_FORMAT_VERSION: u32 = 1;

/// Errors raised while loading or saving resolver state.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid JSON snapshot: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid encoded edge: {0}")]
    Bincode(#[from] bincode::Error),

    #[error("rocksdb error: {0}")]
    Rocks(#[from] rocksdb::Error),

    #[error("storage format version mismatch: expected {expected}, found {found}")]
    Version { expected: u32, found: u32 },

    #[error("corrupt resolver store: {0}")]
    Corrupt(String),
}

impl PersistenceError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Backend holding the saved resolver edge set.
pub trait ResolverStore: Send + Sync {
    /// The last saved edge set; empty if nothing was saved yet.
    fn load(&self) -> Result<Vec<Edge>, PersistenceError>;

    /// Replace the saved edge set with `edges` in one atomic step.
    fn save(&self, edges: &[Edge]) -> Result<(), PersistenceError>;

    /// Short description for logs.
    fn describe(&self) -> String;
}

/// Process-local store. Clones share the same snapshot.
#[derive(Debug, Clone, Default)]
pub struct MemoryResolverStore {
    edges: Arc<Mutex<Vec<Edge>>>,
}

impl MemoryResolverStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ResolverStore for MemoryResolverStore {
    fn load(&self) -> Result<Vec<Edge>, PersistenceError> {
        Ok(self.edges.lock().clone())
    }

    fn save(&self, edges: &[Edge]) -> Result<(), PersistenceError> {
        *self.edges.lock() = edges.to_vec();
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    format_version: u32,
    edges: Vec<Edge>,
}

/// JSON snapshot file, replaced atomically through a synced temp file.
#[derive(Debug, Clone)]
pub struct FileResolverStore {
    path: PathBuf,
}

impl FileResolverStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn parent_dir(&self) -> PathBuf {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }
}

impl ResolverStore for FileResolverStore {
    fn load(&self) -> Result<Vec<Edge>, PersistenceError> {
        let file = match fs::File::open(&self.path) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No resolver snapshot yet");
                return Ok(Vec::new());
            }
            Err(err) => return Err(PersistenceError::io(&self.path, err)),
        };
        let snapshot: Snapshot = serde_json::from_reader(BufReader::new(file))?;
        if snapshot.format_version != STORAGE_FORMAT_VERSION {
            return Err(PersistenceError::Version {
                expected: STORAGE_FORMAT_VERSION,
                found: snapshot.format_version,
            });
        }
        Ok(snapshot.edges)
    }

    fn save(&self, edges: &[Edge]) -> Result<(), PersistenceError> {
        let dir = self.parent_dir();
        fs::create_dir_all(&dir).map_err(|err| PersistenceError::io(&dir, err))?;

        let snapshot = Snapshot {
            format_version: STORAGE_FORMAT_VERSION,
            edges: edges.to_vec(),
        };
        let mut tmp = NamedTempFile::new_in(&dir).map_err(|err| PersistenceError::io(&dir, err))?;
        serde_json::to_writer(&mut tmp, &snapshot)?;
        tmp.write_all(b"\n")
            .and_then(|_| tmp.as_file().sync_all())
            .map_err(|err| PersistenceError::io(tmp.path(), err))?;
        tmp.persist(&self.path)
            .map_err(|err| PersistenceError::io(&self.path, err.error))?;
        sync_dir(&dir)
    }

    fn describe(&self) -> String {
        format!("file:{}", self.path.display())
    }
}

/// Flush a directory entry so a rename into it survives a crash.
#[cfg(unix)]
fn sync_dir(dir: &Path) -> Result<(), PersistenceError> {
    fs::File::open(dir)
        .and_then(|handle| handle.sync_all())
        .map_err(|err| PersistenceError::io(dir, err))
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> Result<(), PersistenceError> {
    Ok(())
}

#[derive(Debug, Serialize, Deserialize)]
struct StorageManifest {
    format_version: u32,
    app_version: String,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RocksOpenOptions {
    /// Run RocksDB repair before opening.
    pub repair: bool,
}

/// RocksDB-backed store; each save is a single synced write batch.
pub struct RocksResolverStore {
    db: DB,
    path: PathBuf,
}

impl std::fmt::Debug for RocksResolverStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RocksResolverStore")
            .field("path", &self.path)
            .finish()
    }
}

impl RocksResolverStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PersistenceError> {
        Self::open_with_options(path, RocksOpenOptions::default())
    }

    pub fn open_with_options(
        path: impl AsRef<Path>,
        options: RocksOpenOptions,
    ) -> Result<Self, PersistenceError> {
        let path = path.as_ref();
        if options.repair {
            warn!(path = %path.display(), "Repairing resolver database");
            repair_db(path)?;
        }
        let db = open_db(path)?;
        validate_or_init_manifest(&db)?;
        Ok(Self {
            db,
            path: path.to_path_buf(),
        })
    }
}

impl ResolverStore for RocksResolverStore {
    fn load(&self) -> Result<Vec<Edge>, PersistenceError> {
        let cf = edges_cf(&self.db)?;
        let mut edges = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_, value) = item?;
            edges.push(bincode::deserialize::<Edge>(&value)?);
        }
        Ok(edges)
    }

    fn save(&self, edges: &[Edge]) -> Result<(), PersistenceError> {
        let cf = edges_cf(&self.db)?;
        let mut batch = WriteBatch::default();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (key, _) = item?;
            batch.delete_cf(cf, key);
        }
        for edge in edges {
            batch.put_cf(cf, edge_key(edge), bincode::serialize(edge)?);
        }
        let mut write_options = WriteOptions::default();
        write_options.set_sync(true);
        self.db.write_opt(batch, &write_options)?;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("rocksdb:{}", self.path.display())
    }
}

fn edge_key(edge: &Edge) -> Vec<u8> {
    let key = edge.key();
    let mut out = Vec::with_capacity(key.left.len() + key.right.len() + 1);
    out.extend_from_slice(key.left.as_bytes());
    out.push(0);
    out.extend_from_slice(key.right.as_bytes());
    out
}

fn open_db(path: &Path) -> Result<DB, PersistenceError> {
    let mut options = Options::default();
    options.create_if_missing(true);
    options.create_missing_column_families(true);
    options.set_paranoid_checks(true);
    let cfs = vec![
        ColumnFamilyDescriptor::new(CF_EDGES, Options::default()),
        ColumnFamilyDescriptor::new(CF_METADATA, Options::default()),
    ];
    Ok(DB::open_cf_descriptors(&options, path, cfs)?)
}

fn repair_db(path: &Path) -> Result<(), PersistenceError> {
    let mut options = Options::default();
    options.create_if_missing(true);
    DB::repair(&options, path)?;
    Ok(())
}

fn edges_cf(db: &DB) -> Result<&rocksdb::ColumnFamily, PersistenceError> {
    db.cf_handle(CF_EDGES)
        .ok_or_else(|| PersistenceError::Corrupt("missing edges column family".to_string()))
}

fn validate_or_init_manifest(db: &DB) -> Result<(), PersistenceError> {
    let metadata_cf = db
        .cf_handle(CF_METADATA)
        .ok_or_else(|| PersistenceError::Corrupt("missing metadata column family".to_string()))?;
    if let Some(bytes) = db.get_cf(metadata_cf, KEY_MANIFEST)? {
        let manifest: StorageManifest = bincode::deserialize(&bytes)?;
        if manifest.format_version != STORAGE_FORMAT_VERSION {
            return Err(PersistenceError::Version {
                expected: STORAGE_FORMAT_VERSION,
                found: manifest.format_version,
            });
        }
        return Ok(());
    }

    let manifest = StorageManifest {
        format_version: STORAGE_FORMAT_VERSION,
        app_version: env!("CARGO_PKG_VERSION").to_string(),
    };
    db.put_cf(metadata_cf, KEY_MANIFEST, bincode::serialize(&manifest)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::Judgement;
    use tempfile::tempdir;

    fn edge(left: &str, right: &str, judgement: Judgement, score: Option<f64>) -> Edge {
        Edge {
            left: left.to_string(),
            right: right.to_string(),
            judgement,
            score,
            timestamp: 1_700_000_000,
        }
    }

    fn sample() -> Vec<Edge> {
        vec![
            edge("a", "b", Judgement::Confirmed, Some(0.9)),
            edge("a", "c", Judgement::Rejected, None),
            edge("c", "d", Judgement::Pending, Some(0.4)),
        ]
    }

    #[test]
    fn test_memory_store_clones_share_state() {
        let store = MemoryResolverStore::new();
        let other = store.clone();
        store.save(&sample()).unwrap();
        assert_eq!(other.load().unwrap(), sample());
    }

    #[test]
    fn test_file_store_roundtrip_and_replace() {
        let dir = tempdir().unwrap();
        let store = FileResolverStore::new(dir.path().join("nested").join("resolver.json"));
        assert!(store.load().unwrap().is_empty());

        store.save(&sample()).unwrap();
        assert_eq!(store.load().unwrap(), sample());

        store.save(&sample()[..1]).unwrap();
        assert_eq!(store.load().unwrap().len(), 1);
        // Only the snapshot itself is left behind in the directory.
        let entries = fs::read_dir(store.path().parent().unwrap()).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_sync_dir_reports_missing_directory() {
        let dir = tempdir().unwrap();
        sync_dir(dir.path()).unwrap();
        let gone = dir.path().join("gone");
        let err = sync_dir(&gone).unwrap_err();
        assert!(matches!(err, PersistenceError::Io { .. }));
    }

    #[test]
    fn test_file_store_rejects_unknown_version() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("resolver.json");
        fs::write(&path, r#"{"format_version": 99, "edges": []}"#).unwrap();
        let err = FileResolverStore::new(&path).load().unwrap_err();
        assert!(matches!(err, PersistenceError::Version { found: 99, .. }));
    }

    #[test]
    fn test_rocks_store_roundtrip() {
        let dir = tempdir().unwrap();
        {
            let store = RocksResolverStore::open(dir.path()).unwrap();
            store.save(&sample()).unwrap();
            store
                .save(&[edge("x", "y", Judgement::Pending, Some(0.7))])
                .unwrap();
        }
        let store = RocksResolverStore::open(dir.path()).unwrap();
        let loaded = store.load().unwrap();
        assert_eq!(loaded, vec![edge("x", "y", Judgement::Pending, Some(0.7))]);
        assert!(store.describe().starts_with("rocksdb:"));
    }
}
