//! Directory-backed namespace.
//!
//! Each key lives in its own entry file under `entries/`. Short keys name
//! the file by their hex encoding; longer ones by the hex SHA-256 of the
//! key, so names stay within filesystem limits. Every entry file also
//! carries its key. Single writes go through a temp file and a rename;
//! batches are journaled first so they replay as a unit after a crash,
//! and are undone if a write fails partway.

use super::journal::Journal;
use super::{Namespace, WriteBatch, WriteOp};
use crate::error::{Result, StoreError};
use fs2::FileExt;
use lru::LruCache;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{Read, Write};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

/// Magic bytes for entry files.
const ENTRY_MAGIC: &[u8; 4] = b"KVE\0";

/// Current entry format version.
const ENTRY_VERSION: u8 = 2;

/// Suffix of in-flight entry files.
const TEMP_SUFFIX: &str = ".tmp";

/// Longest key named by its hex encoding (200 characters).
const MAX_HEX_KEY_LEN: usize = 100;

/// File name prefix for keys named by digest.
const DIGEST_PREFIX: &str = "sha256-";

/// File namespace configuration.
#[derive(Clone, Debug)]
pub struct FileNamespaceConfig {
    /// Directory holding the namespace.
    pub path: PathBuf,

    /// Read cache size (number of entries).
    pub cache_size: usize,

    /// Whether to create the namespace if it doesn't exist.
    pub create_if_missing: bool,
}

impl Default for FileNamespaceConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./keystash"),
            cache_size: 1000,
            create_if_missing: true,
        }
    }
}

/// Persistent namespace in a directory.
pub struct FileNamespace {
    config: FileNamespaceConfig,

    /// Lock file for exclusive access.
    _lock_file: File,

    entries_dir: PathBuf,

    /// Recently read or written values.
    cache: Mutex<LruCache<String, String>>,

    journal: Journal,

    /// Serializes writers and cache fills so the cache never holds a value
    /// older than the entry file.
    write_lock: Mutex<()>,
}

impl FileNamespace {
    /// Open an existing namespace or create a new one.
    pub fn open_or_create(config: FileNamespaceConfig) -> Result<Self> {
        if config.path.join("entries").exists() {
            Self::open(config)
        } else if config.create_if_missing {
            Self::create(config)
        } else {
            Err(StoreError::InvalidFormat(format!(
                "no namespace at {}",
                config.path.display()
            )))
        }
    }

    /// Create a new namespace directory.
    pub fn create(config: FileNamespaceConfig) -> Result<Self> {
        fs::create_dir_all(config.path.join("entries"))?;
        Self::open(config)
    }

    /// Open an existing namespace, replaying any unfinished batches.
    pub fn open(config: FileNamespaceConfig) -> Result<Self> {
        let entries_dir = config.path.join("entries");
        if !entries_dir.is_dir() {
            return Err(StoreError::InvalidFormat(format!(
                "missing entries directory in {}",
                config.path.display()
            )));
        }

        let lock_file = Self::acquire_lock(&config.path)?;
        let journal = Journal::open(config.path.join("journal.wal"))?;
        let cache_size = NonZeroUsize::new(config.cache_size.max(1)).unwrap_or(NonZeroUsize::MIN);

        let namespace = Self {
            config,
            _lock_file: lock_file,
            entries_dir,
            cache: Mutex::new(LruCache::new(cache_size)),
            journal,
            write_lock: Mutex::new(()),
        };
        namespace.recover()?;

        Ok(namespace)
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    /// Replay journaled batches that never committed.
    fn recover(&self) -> Result<()> {
        let pending = self.journal.pending()?;
        if !pending.is_empty() {
            tracing::info!(
                path = %self.config.path.display(),
                batches = pending.len(),
                "replaying unfinished batches"
            );
            for entry in &pending {
                for op in &entry.ops {
                    self.apply_op(op)?;
                }
                self.journal.commit(entry.seq)?;
            }
        }
        self.journal.checkpoint()?;
        Ok(())
    }

    fn apply_op(&self, op: &WriteOp) -> Result<()> {
        match op {
            WriteOp::Set { key, value } => self.write_entry(key, value),
            WriteOp::Remove { key } => self.delete_entry(key),
        }
    }

    /// Put keys back to the values they had before batch `seq`.
    ///
    /// On failure the batch stays pending and is finished on next open.
    fn roll_back(&self, seq: u64, before: &[(&str, Option<String>)]) {
        let restored = before
            .iter()
            .try_for_each(|(key, value)| match value {
                Some(value) => self.write_entry(key, value),
                None => self.delete_entry(key),
            })
            .and_then(|()| self.journal.abort(seq));

        match restored {
            Ok(()) => tracing::warn!(seq, "batch failed, rolled back"),
            Err(e) => tracing::error!(
                seq,
                error = %e,
                "batch rollback failed, left for replay on open"
            ),
        }
    }

    fn entry_path(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() {
            return Err(StoreError::InvalidKey("empty key".into()));
        }

        let name = if key.len() <= MAX_HEX_KEY_LEN {
            hex::encode(key.as_bytes())
        } else {
            format!("{}{}", DIGEST_PREFIX, hex::encode(Sha256::digest(key.as_bytes())))
        };
        Ok(self.entries_dir.join(name))
    }

    /// Cached value of `key`, or the entry file's, filling the cache.
    ///
    /// Callers hold `write_lock`.
    fn load(&self, key: &str) -> Result<Option<String>> {
        if let Some(value) = self.cache.lock().get(key).cloned() {
            return Ok(Some(value));
        }

        let path = self.entry_path(key)?;
        if !path.exists() {
            tracing::trace!(key, "file get: absent");
            return Ok(None);
        }

        let (stored_key, value) = self.read_entry(&path)?;
        if stored_key != key {
            return Err(StoreError::Corruption(format!(
                "entry {} holds key {:?}, expected {:?}",
                path.display(),
                stored_key,
                key
            )));
        }

        tracing::trace!(key, len = value.len(), "file get");
        self.cache.lock().put(key.to_string(), value.clone());
        Ok(Some(value))
    }

    fn write_entry(&self, key: &str, value: &str) -> Result<()> {
        let path = self.entry_path(key)?;
        let temp_path = path.with_extension(&TEMP_SUFFIX[1..]);

        let mut body = Vec::with_capacity(key.len() + value.len() + 8);
        Self::push_field(&mut body, key.as_bytes())?;
        Self::push_field(&mut body, value.as_bytes())?;

        let mut file = File::create(&temp_path)?;

        file.write_all(ENTRY_MAGIC)?;
        file.write_all(&[ENTRY_VERSION])?;
        file.write_all(&body)?;
        file.write_all(&crc32fast::hash(&body).to_le_bytes())?;
        file.sync_all()?;

        fs::rename(&temp_path, &path)?;

        self.cache.lock().put(key.to_string(), value.to_string());
        Ok(())
    }

    fn push_field(body: &mut Vec<u8>, bytes: &[u8]) -> Result<()> {
        let len = u32::try_from(bytes.len()).map_err(|_| {
            StoreError::Serialization(format!("entry field of {} bytes is too large", bytes.len()))
        })?;
        body.extend_from_slice(&len.to_le_bytes());
        body.extend_from_slice(bytes);
        Ok(())
    }

    fn delete_entry(&self, key: &str) -> Result<()> {
        let path = self.entry_path(key)?;
        self.cache.lock().pop(key);

        if path.exists() {
            fs::remove_file(&path)?;
        }
        Ok(())
    }

    /// Read an entry file. Returns its key and value.
    fn read_entry(&self, path: &Path) -> Result<(String, String)> {
        let mut file = File::open(path)?;
        let size = file.metadata()?.len();

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if &magic != ENTRY_MAGIC {
            return Err(StoreError::InvalidFormat("Invalid entry magic".into()));
        }

        let mut version = [0u8; 1];
        file.read_exact(&mut version)?;
        if version[0] != ENTRY_VERSION {
            return Err(StoreError::InvalidFormat(format!(
                "Unsupported entry version: {}",
                version[0]
            )));
        }

        let mut hasher = crc32fast::Hasher::new();
        let key = Self::read_field(&mut file, size, &mut hasher)?;
        let value = Self::read_field(&mut file, size, &mut hasher)?;

        let mut checksum_bytes = [0u8; 4];
        file.read_exact(&mut checksum_bytes)?;
        let expected = u32::from_le_bytes(checksum_bytes);
        let got = hasher.finalize();
        if expected != got {
            return Err(StoreError::ChecksumMismatch { expected, got });
        }

        let text = |bytes: Vec<u8>| {
            String::from_utf8(bytes)
                .map_err(|e| StoreError::Corruption(format!("entry is not UTF-8: {}", e)))
        };
        Ok((text(key)?, text(value)?))
    }

    /// Read one length-prefixed field, bounded by the file size.
    fn read_field(file: &mut File, size: u64, hasher: &mut crc32fast::Hasher) -> Result<Vec<u8>> {
        let mut len_bytes = [0u8; 4];
        file.read_exact(&mut len_bytes)?;
        hasher.update(&len_bytes);

        let len = u64::from(u32::from_le_bytes(len_bytes));
        if len > size {
            return Err(StoreError::Corruption(format!(
                "entry field length {} exceeds file size {}",
                len, size
            )));
        }

        let mut bytes = vec![0u8; len as usize];
        file.read_exact(&mut bytes)?;
        hasher.update(&bytes);
        Ok(bytes)
    }

    fn acquire_lock(path: &Path) -> Result<File> {
        let lock_file = File::create(path.join("LOCK"))?;

        lock_file
            .try_lock_exclusive()
            .map_err(|_| StoreError::Locked)?;

        Ok(lock_file)
    }
}

impl Namespace for FileNamespace {
    fn get_item(&self, key: &str) -> Result<Option<String>> {
        if let Some(value) = self.cache.lock().get(key).cloned() {
            return Ok(Some(value));
        }

        let _lock = self.write_lock.lock();
        self.load(key)
    }

    fn set_item(&self, key: &str, value: &str) -> Result<()> {
        let _lock = self.write_lock.lock();
        tracing::trace!(key, len = value.len(), "file set");
        self.write_entry(key, value)
    }

    fn remove_item(&self, key: &str) -> Result<()> {
        let _lock = self.write_lock.lock();
        tracing::trace!(key, "file remove");
        self.delete_entry(key)
    }

    fn keys(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();

        for entry in fs::read_dir(&self.entries_dir)? {
            let entry = entry?;
            let filename = entry.file_name();
            let filename = filename.to_string_lossy();
            if filename.ends_with(TEMP_SUFFIX) {
                continue;
            }

            let key = if filename.starts_with(DIGEST_PREFIX) {
                self.read_entry(&entry.path())?.0
            } else {
                hex::decode(filename.as_bytes())
                    .ok()
                    .and_then(|bytes| String::from_utf8(bytes).ok())
                    .ok_or_else(|| StoreError::InvalidKey(filename.to_string()))?
            };
            keys.push(key);
        }

        Ok(keys)
    }

    fn apply(&self, batch: WriteBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let _lock = self.write_lock.lock();

        let mut before: Vec<(&str, Option<String>)> = Vec::new();
        for op in batch.ops() {
            if !before.iter().any(|(key, _)| *key == op.key()) {
                before.push((op.key(), self.load(op.key())?));
            }
        }

        let seq = self.journal.log(batch.ops())?;
        for op in batch.ops() {
            if let Err(e) = self.apply_op(op) {
                self.roll_back(seq, &before);
                return Err(e);
            }
        }
        self.journal.commit(seq)?;
        self.journal.checkpoint()?;
        Ok(())
    }
}
