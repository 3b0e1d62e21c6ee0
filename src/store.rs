//! # Store: Shared Document Store Seen by Every Worker and Monitor
//!
//! Workers are separate processes with no shared memory; everything they
//! exchange goes through this store. The core only depends on the [`Store`]
//! trait: read, atomic replace, exclusive create, list, and size.
//!
//! ## Atomic Writes
//!
//! [`FsStore::write`] writes to a uniquely named temp file and renames it over
//! the target, so a crash mid-write leaves the previous version intact and a
//! concurrent reader sees either the old or the new document.
//!
//! ## Exclusive Create
//!
//! [`FsStore::create_exclusive`] writes the full document to a temp file, then
//! hard-links it to the target name. `link(2)` fails with `EEXIST` when the
//! target already exists, which makes it an atomic create-if-absent across
//! processes, and the document is complete the moment it becomes visible.
//!
//! ## Key Layout
//!
//! Keys are `/`-separated paths relative to the store root; see [`keys`].

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, BufRead, BufReader, Cursor};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Unique temp-file suffixes so threads in one process never share a temp path.
static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

pub trait Store: Send + Sync {
    /// Whole document, or `None` if absent.
    fn read(&self, key: &str) -> io::Result<Option<Vec<u8>>>;

    /// Buffered line reader over the document, or `None` if absent.
    fn open_lines(&self, key: &str) -> io::Result<Option<Box<dyn BufRead>>>;

    /// Replace the document atomically.
    fn write(&self, key: &str, data: &[u8]) -> io::Result<()>;

    /// Create the document only if absent. `Ok(false)` means another writer
    /// got there first; the existing document is untouched.
    fn create_exclusive(&self, key: &str, data: &[u8]) -> io::Result<bool>;

    fn exists(&self, key: &str) -> io::Result<bool>;

    /// Size in bytes, or `None` if absent.
    fn size(&self, key: &str) -> io::Result<Option<u64>>;

    /// File names (not full keys) directly under `dir`, sorted.
    fn list(&self, dir: &str) -> io::Result<Vec<String>>;
}

/// Canonical key layout shared by workers, monitor and statistics.
pub mod keys {
    pub const WORK_DIR: &str = "kangaroo_work";
    pub const CHECKPOINT_DIR: &str = "checkpoints";
    pub const DP_DIR: &str = "distinguished_points";
    pub const RESULTS_DIR: &str = "results";

    pub const MERGED_DP: &str = "distinguished_points/merged_dp.txt";
    pub const SOLUTION_JSON: &str = "results/SOLUTION.json";
    pub const SOLUTION_TXT: &str = "results/SOLUTION.txt";

    pub fn status(worker_id: u32) -> String {
        format!("{}/worker_{}_status.json", WORK_DIR, worker_id)
    }

    pub fn work_file(worker_id: u32) -> String {
        format!("{}/worker_{}.work", WORK_DIR, worker_id)
    }

    pub fn input_file(worker_id: u32) -> String {
        format!("{}/worker_{}_input.txt", WORK_DIR, worker_id)
    }

    pub fn checkpoint(worker_id: u32) -> String {
        format!("{}/worker_{}.json", CHECKPOINT_DIR, worker_id)
    }

    pub fn dp_file(worker_id: u32) -> String {
        format!("{}/worker_{}_dp.txt", DP_DIR, worker_id)
    }

    pub fn candidate_json(worker_id: u32) -> String {
        format!("{}/SOLUTION_FOUND_worker_{}.json", RESULTS_DIR, worker_id)
    }

    pub fn candidate_txt(worker_id: u32) -> String {
        format!("{}/SOLUTION_FOUND_worker_{}.txt", RESULTS_DIR, worker_id)
    }

    /// Matches `worker_<digits>_dp.txt`, excluding the merged artifact.
    pub fn is_worker_dp_file(name: &str) -> bool {
        name.strip_prefix("worker_")
            .and_then(|rest| rest.strip_suffix("_dp.txt"))
            .is_some_and(|id| !id.is_empty() && id.bytes().all(|b| b.is_ascii_digit()))
    }
}

/// Write `data` to `path` via temp file + rename, creating parent directories.
pub fn write_atomic(path: &Path, data: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = tmp_path(path);
    fs::write(&tmp, data)?;
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }
    Ok(())
}

fn tmp_path(path: &Path) -> PathBuf {
    let id = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    let mut p = path.as_os_str().to_os_string();
    p.push(format!(".tmp.{}.{}", std::process::id(), id));
    PathBuf::from(p)
}

/// Filesystem-backed store rooted at a data directory.
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FsStore { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Filesystem path for a key, for collaborators that need real files
    /// (the external solver reads its input and work files by path).
    pub fn path(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

fn absent_as_none<T>(r: io::Result<T>) -> io::Result<Option<T>> {
    match r {
        Ok(v) => Ok(Some(v)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

impl Store for FsStore {
    fn read(&self, key: &str) -> io::Result<Option<Vec<u8>>> {
        absent_as_none(fs::read(self.path(key)))
    }

    fn open_lines(&self, key: &str) -> io::Result<Option<Box<dyn BufRead>>> {
        Ok(absent_as_none(fs::File::open(self.path(key)))?
            .map(|f| Box::new(BufReader::new(f)) as Box<dyn BufRead>))
    }

    fn write(&self, key: &str, data: &[u8]) -> io::Result<()> {
        write_atomic(&self.path(key), data)
    }

    fn create_exclusive(&self, key: &str, data: &[u8]) -> io::Result<bool> {
        let path = self.path(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = tmp_path(&path);
        fs::write(&tmp, data)?;
        let linked = fs::hard_link(&tmp, &path);
        let _ = fs::remove_file(&tmp);
        match linked {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn exists(&self, key: &str) -> io::Result<bool> {
        self.path(key).try_exists()
    }

    fn size(&self, key: &str) -> io::Result<Option<u64>> {
        Ok(absent_as_none(fs::metadata(self.path(key)))?.map(|m| m.len()))
    }

    fn list(&self, dir: &str) -> io::Result<Vec<String>> {
        let entries = match absent_as_none(fs::read_dir(self.path(dir)))? {
            Some(entries) => entries,
            None => return Ok(Vec::new()),
        };
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }
}

/// In-process store with the same semantics, for tests and single-host tools.
#[derive(Debug, Default)]
pub struct MemoryStore {
    docs: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn docs(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Vec<u8>>> {
        self.docs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Store for MemoryStore {
    fn read(&self, key: &str) -> io::Result<Option<Vec<u8>>> {
        Ok(self.docs().get(key).cloned())
    }

    fn open_lines(&self, key: &str) -> io::Result<Option<Box<dyn BufRead>>> {
        Ok(self
            .docs()
            .get(key)
            .cloned()
            .map(|data| Box::new(Cursor::new(data)) as Box<dyn BufRead>))
    }

    fn write(&self, key: &str, data: &[u8]) -> io::Result<()> {
        self.docs().insert(key.to_string(), data.to_vec());
        Ok(())
    }

    fn create_exclusive(&self, key: &str, data: &[u8]) -> io::Result<bool> {
        let mut docs = self.docs();
        if docs.contains_key(key) {
            return Ok(false);
        }
        docs.insert(key.to_string(), data.to_vec());
        Ok(true)
    }

    fn exists(&self, key: &str) -> io::Result<bool> {
        Ok(self.docs().contains_key(key))
    }

    fn size(&self, key: &str) -> io::Result<Option<u64>> {
        Ok(self.docs().get(key).map(|d| d.len() as u64))
    }

    fn list(&self, dir: &str) -> io::Result<Vec<String>> {
        let prefix = format!("{}/", dir.trim_end_matches('/'));
        Ok(self
            .docs()
            .keys()
            .filter_map(|k| k.strip_prefix(&prefix))
            .filter(|rest| !rest.contains('/'))
            .map(str::to_string)
            .collect())
    }
}

/// Read and deserialize a JSON document. Absent, unreadable, or partially
/// written documents all come back as `None`: readers never fail on what a
/// concurrent writer is doing.
pub fn read_json<T: serde::de::DeserializeOwned>(store: &dyn Store, key: &str) -> Option<T> {
    let raw = store.read(key).ok()??;
    serde_json::from_slice(&raw).ok()
}
