//! Content-addressed local cache for remote objects.
//!
//! The cache maps checksums to stored copies under a root directory laid out
//! as `<root>/<store_id>/<key...>[/<version>]`, with a `checksums.json` index
//! at the root. The index is an optimization only: [`Cache::repair`] can
//! rebuild it entirely from the directory tree, which is the source of truth.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;

use cadenza_core::types::{Checksum, ObjectRef, VersionedObjectRef};

const INDEX_FILE: &str = "checksums.json";

/// Cache errors.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The index file exists but does not parse. Recover with [`Cache::repair`].
    #[error("corrupt checksum index at {path}: {reason}")]
    CorruptIndex { path: PathBuf, reason: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

/// A single physical copy recorded in the cache.
///
/// Multiple entries may share a checksum (hash collisions across distinct
/// logical objects are tolerated) or an object ref (multiple versions).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Object the copy came from or is destined for. Unversioned; the
    /// version lives in the last path component of `local_path`.
    pub object: ObjectRef,
    /// Absolute path of the stored copy.
    pub local_path: PathBuf,
    /// Content checksum of the stored copy.
    pub checksum: Checksum,
}

impl CacheEntry {
    /// Stable textual key used to order the serialized index.
    ///
    /// Purely cosmetic, for human diffability of `checksums.json`.
    fn sort_key(&self) -> (ObjectRef, PathBuf) {
        (self.object.clone(), self.local_path.clone())
    }
}

/// Something we can derive a cache path from: a bare or versioned ref.
pub trait CacheableRef {
    fn path_pieces(&self) -> Vec<&str>;
    fn unversioned_ref(&self) -> ObjectRef;
}

impl CacheableRef for ObjectRef {
    fn path_pieces(&self) -> Vec<&str> {
        let mut pieces = vec![self.store_id.as_str()];
        pieces.extend(self.key.split('/'));
        pieces
    }

    fn unversioned_ref(&self) -> ObjectRef {
        self.clone()
    }
}

impl CacheableRef for VersionedObjectRef {
    fn path_pieces(&self) -> Vec<&str> {
        let mut pieces = vec![self.store_id.as_str()];
        pieces.extend(self.key.split('/'));
        pieces.push(self.version.as_str());
        pieces
    }

    fn unversioned_ref(&self) -> ObjectRef {
        self.unversioned()
    }
}

/// Interface to the local cache of remote objects.
pub struct Cache {
    root: PathBuf,
    index_path: PathBuf,
    // Serializes concurrent finalize() read-modify-write cycles.
    index: Mutex<BTreeMap<Checksum, Vec<CacheEntry>>>,
}

impl Cache {
    /// Open a cache rooted at `root`, loading the checksum index.
    ///
    /// Fails with [`CacheError::CorruptIndex`] if the index exists but does
    /// not parse; use [`Cache::open_or_repair`] to recover automatically.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let root = root.into();
        let index_path = root.join(INDEX_FILE);
        let index = Self::load_index(&index_path)?;
        Ok(Self {
            root,
            index_path,
            index: Mutex::new(index),
        })
    }

    /// Open a cache, rebuilding the index from disk if it is corrupt.
    pub fn open_or_repair(root: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let root = root.into();
        match Self::open(root.clone()) {
            Ok(cache) => Ok(cache),
            Err(CacheError::CorruptIndex { path, reason }) => {
                tracing::warn!(
                    index = %path.display(),
                    reason = %reason,
                    "checksum index corrupt; rebuilding from directory tree"
                );
                let cache = Self {
                    index_path: root.join(INDEX_FILE),
                    root,
                    index: Mutex::new(BTreeMap::new()),
                };
                cache.repair()?;
                Ok(cache)
            }
            Err(other) => Err(other),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn load_index(index_path: &Path) -> Result<BTreeMap<Checksum, Vec<CacheEntry>>, CacheError> {
        if !index_path.exists() {
            return Ok(BTreeMap::new());
        }
        let bytes = fs::read(index_path)?;
        let entries: Vec<CacheEntry> =
            serde_json::from_slice(&bytes).map_err(|e| CacheError::CorruptIndex {
                path: index_path.to_path_buf(),
                reason: e.to_string(),
            })?;

        let mut index: BTreeMap<Checksum, Vec<CacheEntry>> = BTreeMap::new();
        for entry in entries {
            index.entry(entry.checksum.clone()).or_default().push(entry);
        }
        Ok(index)
    }

    /// Storage location in the cache for an object.
    ///
    /// Pure function of the ref (`root/store_id/key[/version]`); does not
    /// consult the index.
    pub fn path_for<R: CacheableRef>(
        &self,
        object: &R,
        create_parents: bool,
    ) -> Result<PathBuf, CacheError> {
        let mut path = self.root.clone();
        for piece in object.path_pieces() {
            path.push(piece);
        }
        if create_parents {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
        }
        Ok(path)
    }

    /// Look up which version of `object` already holds content `checksum`.
    ///
    /// Returns the version encoded in the matching entry's stored path, or
    /// `None`. Used to detect "we already uploaded exactly this content".
    pub fn lookup_version(
        &self,
        object: &ObjectRef,
        checksum: &Checksum,
    ) -> Result<Option<String>, CacheError> {
        let index = self
            .index
            .lock()
            .map_err(|e| CacheError::Internal(e.to_string()))?;
        let Some(entries) = index.get(checksum) else {
            return Ok(None);
        };
        for entry in entries {
            if entry.object != *object {
                continue;
            }
            // The last path component of a cached file is its version id.
            let version = entry
                .local_path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned());
            return Ok(version);
        }
        Ok(None)
    }

    /// Record a file that was just physically placed at `path_for(object)`.
    ///
    /// Must be called exactly once per added file. Computes the checksum when
    /// not supplied, optionally propagates the source modification time,
    /// marks the file read-only, and rewrites the index atomically.
    pub fn finalize(
        &self,
        cached_path: &Path,
        object: ObjectRef,
        checksum: Option<Checksum>,
        mtime: Option<SystemTime>,
    ) -> Result<(), CacheError> {
        if let Some(mtime) = mtime {
            let file = fs::File::options().write(true).open(cached_path)?;
            file.set_times(fs::FileTimes::new().set_accessed(mtime).set_modified(mtime))?;
        }

        // Cache contents are immutable; guard against accidental local edits.
        let mut permissions = fs::metadata(cached_path)?.permissions();
        permissions.set_readonly(true);
        fs::set_permissions(cached_path, permissions)?;

        let checksum = match checksum {
            Some(checksum) => checksum,
            None => Checksum::of_file(cached_path)?,
        };
        let entry = CacheEntry {
            object,
            local_path: cached_path.to_path_buf(),
            checksum: checksum.clone(),
        };

        let mut index = self
            .index
            .lock()
            .map_err(|e| CacheError::Internal(e.to_string()))?;
        // Re-finalizing a path replaces its entry; the old record may hold a
        // stale checksum when the file was overwritten in place.
        for entries in index.values_mut() {
            entries.retain(|existing| existing.local_path != entry.local_path);
        }
        index.retain(|_, entries| !entries.is_empty());
        index.entry(checksum).or_default().push(entry);
        self.write_index(&index)
    }

    /// Delete and regenerate the checksum index from the directory tree.
    ///
    /// Walks every file under the root (skipping root-level metadata files
    /// such as the index itself), recomputes checksums, and treats the
    /// layout `store_id/key.../version` as authoritative.
    pub fn repair(&self) -> Result<(), CacheError> {
        let mut rebuilt: BTreeMap<Checksum, Vec<CacheEntry>> = BTreeMap::new();
        let mut files = Vec::new();
        collect_files(&self.root, &mut files)?;
        files.sort();

        for path in files {
            // Files directly in the cache root are metadata, not content.
            if path.parent() == Some(self.root.as_path()) {
                continue;
            }
            tracing::info!(file = %path.display(), "checksumming");
            let Ok(relative) = path.strip_prefix(&self.root) else {
                continue;
            };
            let pieces: Vec<String> = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect();
            // Need at least store_id / key / version.
            if pieces.len() < 3 {
                continue;
            }
            let store_id = &pieces[0];
            let key = pieces[1..pieces.len() - 1].join("/");
            let checksum = Checksum::of_file(&path)?;
            let entry = CacheEntry {
                object: ObjectRef::new(store_id.clone(), key),
                local_path: path,
                checksum: checksum.clone(),
            };
            rebuilt.entry(checksum).or_default().push(entry);
        }

        let mut index = self
            .index
            .lock()
            .map_err(|e| CacheError::Internal(e.to_string()))?;
        *index = rebuilt;
        self.write_index(&index)
    }

    /// Rewrite the whole index file atomically (temp file + rename).
    fn write_index(&self, index: &BTreeMap<Checksum, Vec<CacheEntry>>) -> Result<(), CacheError> {
        let mut all_entries: Vec<&CacheEntry> = index.values().flatten().collect();
        // Stable ordering keeps the JSON human-diffable; nothing relies on it.
        all_entries.sort_by_key(|entry| entry.sort_key());
        let jsonified = serde_json::to_vec_pretty(&all_entries)
            .map_err(|e| CacheError::Internal(e.to_string()))?;

        fs::create_dir_all(&self.root)?;
        let tmp_path = self.index_path.with_extension("json.tmp");
        fs::write(&tmp_path, jsonified)?;
        fs::rename(&tmp_path, &self.index_path)?;
        Ok(())
    }
}

fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
    if !dir.exists() {
        return Ok(());
    }
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            collect_files(&path, out)?;
        } else {
            out.push(path);
        }
    }
    Ok(())
}
