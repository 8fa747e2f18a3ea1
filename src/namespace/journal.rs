//! Batch journal for crash recovery.
//!
//! A batch of writes is logged before it touches entry files. Once all of
//! its writes are on disk a commit marker follows. On open, batches with
//! no commit marker are replayed; set and remove are idempotent, so a
//! partially applied batch can simply be applied again. A batch that was
//! undone after a failed write gets an abort marker instead.
//!
//! The journal only shrinks back to its header once every logged batch is
//! resolved, and that rewrite goes through a temp file and a rename.

use super::WriteOp;
use crate::error::{Result, StoreError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Magic bytes for journal file.
const JOURNAL_MAGIC: &[u8; 4] = b"JNL\0";

/// Current journal format version.
const JOURNAL_VERSION: u8 = 1;

/// Header size (magic + version).
const JOURNAL_HEADER_LEN: u64 = 5;

/// Largest entry accepted when reading back.
const MAX_ENTRY_LEN: usize = 64 * 1024 * 1024;

/// Journal entry status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum JournalEntryStatus {
    /// Batch logged, writes not yet known to be on disk.
    Pending,
    /// All writes of the batch are on disk.
    Committed,
    /// The batch was undone and must not be replayed.
    Aborted,
}

/// A single journal entry.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JournalEntry {
    pub seq: u64,
    pub status: JournalEntryStatus,
    /// Writes of the batch; empty for commit and abort markers.
    pub ops: Vec<WriteOp>,
}

/// Append-only batch journal.
pub struct Journal {
    path: PathBuf,
    next_seq: Mutex<u64>,
    /// Logged batches with neither a commit nor an abort marker.
    unresolved: Mutex<BTreeSet<u64>>,
    writer: Mutex<BufWriter<File>>,
}

impl Journal {
    /// Create or open a journal file.
    ///
    /// A file shorter than the header is what a crash during creation
    /// leaves behind; it holds no batches and is started afresh.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let (next_seq, unresolved): (u64, BTreeSet<u64>) = match fs::metadata(&path) {
            Ok(meta) if meta.len() >= JOURNAL_HEADER_LEN => {
                let mut reader = BufReader::new(File::open(&path)?);
                Self::read_header(&mut reader)?;

                let (max_seq, pending) = Self::scan(&mut reader);
                (max_seq + 1, pending.into_keys().collect())
            }
            Ok(meta) => {
                tracing::warn!(
                    path = %path.display(),
                    len = meta.len(),
                    "journal shorter than its header, starting empty"
                );
                Self::write_header(&path)?;
                (1, BTreeSet::new())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Self::write_header(&path)?;
                (1, BTreeSet::new())
            }
            Err(e) => return Err(e.into()),
        };

        let writer = BufWriter::new(OpenOptions::new().append(true).open(&path)?);

        Ok(Self {
            path,
            next_seq: Mutex::new(next_seq),
            unresolved: Mutex::new(unresolved),
            writer: Mutex::new(writer),
        })
    }

    /// Log a batch as pending. Returns its sequence number.
    pub fn log(&self, ops: &[WriteOp]) -> Result<u64> {
        let mut next_seq = self.next_seq.lock();
        let seq = *next_seq;
        *next_seq += 1;

        self.append(&JournalEntry {
            seq,
            status: JournalEntryStatus::Pending,
            ops: ops.to_vec(),
        })?;
        self.unresolved.lock().insert(seq);

        Ok(seq)
    }

    /// Mark a batch as committed.
    pub fn commit(&self, seq: u64) -> Result<()> {
        self.resolve(seq, JournalEntryStatus::Committed)
    }

    /// Mark a batch as undone.
    pub fn abort(&self, seq: u64) -> Result<()> {
        self.resolve(seq, JournalEntryStatus::Aborted)
    }

    /// Batches logged without a commit or abort marker, in sequence order.
    pub fn pending(&self) -> Result<Vec<JournalEntry>> {
        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(JOURNAL_HEADER_LEN))?;

        let (_, pending) = Self::scan(&mut BufReader::new(file));
        Ok(pending.into_values().collect())
    }

    pub fn has_pending(&self) -> Result<bool> {
        Ok(!self.pending()?.is_empty())
    }

    /// Truncate the journal back to its header if no batch is unresolved.
    ///
    /// Returns whether the journal was truncated.
    pub fn checkpoint(&self) -> Result<bool> {
        let mut next_seq = self.next_seq.lock();
        let mut writer = self.writer.lock();

        if !self.unresolved.lock().is_empty() {
            return Ok(false);
        }

        writer.flush()?;
        Self::write_header(&self.path)?;
        *writer = BufWriter::new(OpenOptions::new().append(true).open(&self.path)?);
        *next_seq = 1;

        Ok(true)
    }

    fn resolve(&self, seq: u64, status: JournalEntryStatus) -> Result<()> {
        self.append(&JournalEntry {
            seq,
            status,
            ops: Vec::new(),
        })?;
        self.unresolved.lock().remove(&seq);
        Ok(())
    }

    /// Read entries up to the end or a torn tail. Returns the highest
    /// sequence seen and the unresolved batches by sequence.
    fn scan(reader: &mut impl Read) -> (u64, BTreeMap<u64, JournalEntry>) {
        let mut max_seq = 0u64;
        let mut logged = BTreeMap::new();
        let mut resolved = HashSet::new();

        while let Ok(entry) = Self::read_entry(reader) {
            max_seq = max_seq.max(entry.seq);
            match entry.status {
                JournalEntryStatus::Committed | JournalEntryStatus::Aborted => {
                    resolved.insert(entry.seq);
                }
                JournalEntryStatus::Pending => {
                    logged.insert(entry.seq, entry);
                }
            }
        }

        logged.retain(|seq, _| !resolved.contains(seq));
        (max_seq, logged)
    }

    fn append(&self, entry: &JournalEntry) -> Result<()> {
        let mut writer = self.writer.lock();
        Self::write_entry(&mut *writer, entry)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        Ok(())
    }

    /// Replace the file with a bare header.
    fn write_header(path: &Path) -> Result<()> {
        let mut temp_path = path.as_os_str().to_owned();
        temp_path.push(".tmp");

        let mut file = File::create(&temp_path)?;
        file.write_all(JOURNAL_MAGIC)?;
        file.write_all(&[JOURNAL_VERSION])?;
        file.sync_all()?;

        fs::rename(&temp_path, path)?;
        Ok(())
    }

    fn read_header(reader: &mut impl Read) -> Result<()> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if &magic != JOURNAL_MAGIC {
            return Err(StoreError::InvalidFormat("Invalid journal magic".into()));
        }

        let mut version = [0u8; 1];
        reader.read_exact(&mut version)?;
        if version[0] != JOURNAL_VERSION {
            return Err(StoreError::InvalidFormat(format!(
                "Unsupported journal version: {}",
                version[0]
            )));
        }
        Ok(())
    }

    fn write_entry(writer: &mut impl Write, entry: &JournalEntry) -> Result<()> {
        let encoded = rmp_serde::to_vec(entry)?;
        let len = u32::try_from(encoded.len()).map_err(|_| {
            StoreError::Serialization(format!(
                "journal entry of {} bytes is too large",
                encoded.len()
            ))
        })?;

        writer.write_all(&len.to_le_bytes())?;
        writer.write_all(&encoded)?;
        writer.write_all(&crc32fast::hash(&encoded).to_le_bytes())?;

        Ok(())
    }

    fn read_entry(reader: &mut impl Read) -> Result<JournalEntry> {
        let mut len_bytes = [0u8; 4];
        reader.read_exact(&mut len_bytes)?;
        let len = u32::from_le_bytes(len_bytes) as usize;

        if len > MAX_ENTRY_LEN {
            return Err(StoreError::Corruption("Journal entry too large".into()));
        }

        let mut encoded = vec![0u8; len];
        reader.read_exact(&mut encoded)?;

        let mut checksum_bytes = [0u8; 4];
        reader.read_exact(&mut checksum_bytes)?;
        let expected = u32::from_le_bytes(checksum_bytes);
        let got = crc32fast::hash(&encoded);
        if expected != got {
            return Err(StoreError::ChecksumMismatch { expected, got });
        }

        Ok(rmp_serde::from_slice(&encoded)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn set(key: &str, value: &str) -> WriteOp {
        WriteOp::Set {
            key: key.to_string(),
            value: value.to_string(),
        }
    }

    #[test]
    fn test_log_and_commit() {
        let dir = TempDir::new().unwrap();
        let journal = Journal::open(dir.path().join("journal.wal")).unwrap();

        let seq = journal.log(&[set("a", "1")]).unwrap();
        assert_eq!(seq, 1);

        let pending = journal.pending().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].ops, vec![set("a", "1")]);

        journal.commit(seq).unwrap();
        assert!(!journal.has_pending().unwrap());
    }

    #[test]
    fn test_only_uncommitted_are_pending() {
        let dir = TempDir::new().unwrap();
        let journal = Journal::open(dir.path().join("journal.wal")).unwrap();

        let s1 = journal.log(&[set("a", "1")]).unwrap();
        let s2 = journal
            .log(&[WriteOp::Remove {
                key: "b".to_string(),
            }])
            .unwrap();
        let s3 = journal.log(&[set("c", "3")]).unwrap();

        journal.commit(s1).unwrap();
        journal.commit(s3).unwrap();

        let pending = journal.pending().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].seq, s2);
    }

    #[test]
    fn test_pending_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("journal.wal");

        {
            let journal = Journal::open(&path).unwrap();
            journal.log(&[set("k", "v"), set("idx", "k")]).unwrap();
        }

        let journal = Journal::open(&path).unwrap();
        let pending = journal.pending().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].ops.len(), 2);

        // sequence continues after the highest seen
        assert_eq!(journal.log(&[]).unwrap(), 2);
    }

    #[test]
    fn test_checkpoint_resets_once_resolved() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("journal.wal");
        let journal = Journal::open(&path).unwrap();

        let seq = journal.log(&[set("a", "1")]).unwrap();
        assert!(!journal.checkpoint().unwrap());
        assert!(journal.has_pending().unwrap());

        journal.commit(seq).unwrap();
        assert!(journal.checkpoint().unwrap());
        assert_eq!(std::fs::metadata(&path).unwrap().len(), JOURNAL_HEADER_LEN);
        assert_eq!(journal.log(&[set("b", "2")]).unwrap(), 1);
    }

    #[test]
    fn test_checkpoint_keeps_pending_batches() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("journal.wal");

        {
            let journal = Journal::open(&path).unwrap();
            journal.log(&[set("stuck", "1")]).unwrap();
            let later = journal.log(&[set("b", "2")]).unwrap();
            journal.commit(later).unwrap();
            assert!(!journal.checkpoint().unwrap());
        }

        let journal = Journal::open(&path).unwrap();
        let pending = journal.pending().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].ops, vec![set("stuck", "1")]);
    }

    #[test]
    fn test_aborted_batch_not_pending() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("journal.wal");

        {
            let journal = Journal::open(&path).unwrap();
            let seq = journal.log(&[set("a", "1")]).unwrap();
            journal.abort(seq).unwrap();
            assert!(journal.checkpoint().unwrap());
        }

        assert!(!Journal::open(&path).unwrap().has_pending().unwrap());
    }

    #[test]
    fn test_short_file_starts_empty() {
        let dir = TempDir::new().unwrap();

        for contents in [&b""[..], &b"JN"[..]] {
            let path = dir.path().join("journal.wal");
            std::fs::write(&path, contents).unwrap();

            let journal = Journal::open(&path).unwrap();
            assert!(!journal.has_pending().unwrap());
            assert_eq!(journal.log(&[set("a", "1")]).unwrap(), 1);
        }
    }

    #[test]
    fn test_bad_magic_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("journal.wal");
        std::fs::write(&path, b"NOPE\x01").unwrap();

        assert!(matches!(
            Journal::open(&path),
            Err(StoreError::InvalidFormat(_))
        ));
    }
}
