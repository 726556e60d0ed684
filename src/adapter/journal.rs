//! In-process store backed by an append-only command journal.
//!
//! Every mutating command is appended to `JOURNAL` inside the store
//! directory before it touches memory. A command whose entry cannot be
//! written fails without changing the store, and the partial entry is cut
//! back off the file. Opening the directory again replays the journal, so
//! counters and history lists survive process restarts.
//!
//! Journal layout:
//! - header: magic `JRN\0` + version byte
//! - entries: `len: u32 LE` + MessagePack command + `crc32: u32 LE`
//!
//! A torn entry at the tail (crash mid-write) is cut off on open. A
//! checksum failure on a complete entry is reported as corruption.
//!
//! On open the replayed contents are compacted: when a snapshot of the
//! current keys takes fewer entries than the journal holds, the journal is
//! rewritten to that snapshot (`JOURNAL.tmp` + rename). Counters collapse
//! to a single `SET`, lists to one `RPUSH` per element.

use super::memory::Entry;
use super::{MemoryStore, StoreAdapter};
use crate::error::{CacheError, Result};
use fs2::FileExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

/// Magic bytes for the journal file.
const JOURNAL_MAGIC: &[u8; 4] = b"JRN\0";

/// Current journal format version.
const JOURNAL_VERSION: u8 = 1;

/// Header size (magic + version).
const HEADER_SIZE: usize = 5;

/// Sanity bound on a single entry.
const MAX_ENTRY_SIZE: usize = 64 * 1024 * 1024;

/// A mutating command as written to the journal.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
enum JournalCommand {
    Set { key: String, value: Vec<u8> },
    Incr { key: String },
    Rpush { key: String, value: Vec<u8> },
}

struct JournalWriter {
    /// Append handle. `None` after a failed rollback; reopened on next use.
    writer: Option<BufWriter<File>>,

    /// Length of the journal up to the last fully written entry.
    committed_len: u64,

    writes_since_sync: u64,

    #[cfg(test)]
    fail_writes: bool,
}

impl JournalWriter {
    fn new(committed_len: u64) -> Self {
        Self {
            writer: None,
            committed_len,
            writes_since_sync: 0,
            #[cfg(test)]
            fail_writes: false,
        }
    }

    /// Append one encoded entry. On failure the file is cut back to the
    /// last committed entry and nothing buffered survives.
    fn append(&mut self, journal_path: &Path, entry: &[u8], sync_interval: u64) -> Result<()> {
        let mut writer = match self.writer.take() {
            Some(writer) => writer,
            None => open_append(journal_path, self.committed_len)?,
        };

        match self.write_entry(&mut writer, entry, sync_interval) {
            Ok(()) => {
                self.committed_len += entry.len() as u64;
                self.writer = Some(writer);
                Ok(())
            }
            Err(err) => {
                self.rollback(writer);
                Err(err)
            }
        }
    }

    fn write_entry(
        &mut self,
        writer: &mut BufWriter<File>,
        entry: &[u8],
        sync_interval: u64,
    ) -> Result<()> {
        #[cfg(test)]
        if self.fail_writes {
            writer.write_all(&entry[..entry.len() / 2])?;
            writer.flush()?;
            return Err(injected_failure());
        }

        writer.write_all(entry)?;
        writer.flush()?;

        self.writes_since_sync += 1;
        if self.writes_since_sync >= sync_interval {
            writer.get_ref().sync_data()?;
            self.writes_since_sync = 0;
        }

        Ok(())
    }

    fn rollback(&mut self, writer: BufWriter<File>) {
        // Unflushed bytes are dropped, never written.
        let (file, _unwritten) = writer.into_parts();
        match file.set_len(self.committed_len) {
            Ok(()) => self.writer = Some(BufWriter::new(file)),
            Err(err) => tracing::error!(
                error = %err,
                committed_len = self.committed_len,
                "failed to cut back journal tail, reopening on next write"
            ),
        }
    }

    fn sync(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.as_mut() {
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        self.writes_since_sync = 0;
        Ok(())
    }
}

#[cfg(test)]
fn injected_failure() -> CacheError {
    std::io::Error::new(std::io::ErrorKind::Other, "injected write failure").into()
}

/// Open the journal for appending, dropping anything past `committed_len`.
fn open_append(journal_path: &Path, committed_len: u64) -> Result<BufWriter<File>> {
    let file = OpenOptions::new().append(true).open(journal_path)?;
    file.set_len(committed_len)?;
    Ok(BufWriter::new(file))
}

/// Memory store whose mutations are journaled to disk.
pub struct JournaledStore {
    /// Store directory.
    path: PathBuf,

    /// Current contents.
    memory: MemoryStore,

    /// Journal append handle. Held across append + apply so journal order
    /// matches apply order.
    journal: Mutex<JournalWriter>,

    /// Sync every N writes.
    sync_interval: u64,

    /// Lock file for exclusive access.
    _lock_file: File,
}

impl JournaledStore {
    /// Default sync interval.
    pub const DEFAULT_SYNC_INTERVAL: u64 = 100;

    /// Open or create a journaled store with the default sync interval.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_sync_interval(path, Self::DEFAULT_SYNC_INTERVAL)
    }

    /// Open or create a journaled store.
    /// - sync_interval = 0 or 1: fsync after every write
    /// - sync_interval = N: fsync after every N writes
    pub fn open_with_sync_interval(path: impl AsRef<Path>, sync_interval: u64) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        fs::create_dir_all(&path)?;

        let lock_file = Self::acquire_lock(&path)?;

        let journal_path = path.join("JOURNAL");
        let memory = MemoryStore::new();

        let existing_len = fs::metadata(&journal_path).map(|m| m.len()).unwrap_or(0);
        if existing_len > 0 {
            let replayed = Self::replay_into(&journal_path, &memory)?;
            tracing::info!(
                path = %path.display(),
                entries = replayed,
                keys = memory.len(),
                "replayed journal"
            );
            Self::compact(&journal_path, &memory, replayed)?;
        } else {
            Self::rewrite(&journal_path, &[])?;
        }

        let committed_len = fs::metadata(&journal_path)?.len();
        let mut journal = JournalWriter::new(committed_len);
        journal.writer = Some(open_append(&journal_path, committed_len)?);

        Ok(Self {
            path,
            memory,
            journal: Mutex::new(journal),
            sync_interval: sync_interval.max(1),
            _lock_file: lock_file,
        })
    }

    /// Directory this store lives in.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn journal_path(&self) -> PathBuf {
        self.path.join("JOURNAL")
    }

    fn acquire_lock(path: &Path) -> Result<File> {
        let lock_file = File::create(path.join("LOCK"))?;

        lock_file
            .try_lock_exclusive()
            .map_err(|_| CacheError::Locked)?;

        Ok(lock_file)
    }

    /// Replace the journal with a header followed by `commands`.
    /// Returns the new journal length.
    fn rewrite(journal_path: &Path, commands: &[JournalCommand]) -> Result<u64> {
        let tmp_path = journal_path.with_extension("tmp");
        let mut len = HEADER_SIZE as u64;

        {
            let mut writer = BufWriter::new(File::create(&tmp_path)?);
            writer.write_all(JOURNAL_MAGIC)?;
            writer.write_all(&[JOURNAL_VERSION])?;
            for command in commands {
                let entry = Self::encode_entry(command)?;
                writer.write_all(&entry)?;
                len += entry.len() as u64;
            }
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }

        fs::rename(&tmp_path, journal_path)?;
        Ok(len)
    }

    /// Rewrite the journal as a snapshot of `memory` if that is shorter.
    fn compact(journal_path: &Path, memory: &MemoryStore, replayed: u64) -> Result<()> {
        let mut commands = Vec::new();
        for (key, entry) in memory.snapshot() {
            match entry {
                Entry::Plain(value) => commands.push(JournalCommand::Set { key, value }),
                Entry::List(items) => commands.extend(items.into_iter().map(|value| {
                    JournalCommand::Rpush {
                        key: key.clone(),
                        value,
                    }
                })),
            }
        }

        if commands.len() as u64 >= replayed {
            return Ok(());
        }

        let len = Self::rewrite(journal_path, &commands)?;
        tracing::info!(
            entries_before = replayed,
            entries_after = commands.len(),
            bytes = len,
            "compacted journal"
        );
        Ok(())
    }
    /// Apply every journaled command to `memory`. Returns the entry count.
    fn replay_into(journal_path: &Path, memory: &MemoryStore) -> Result<u64> {
        let mut data = Vec::new();
        File::open(journal_path)?.read_to_end(&mut data)?;

        if data.len() < HEADER_SIZE || &data[0..4] != JOURNAL_MAGIC {
            return Err(CacheError::InvalidFormat("Invalid journal magic".into()));
        }
        if data[4] != JOURNAL_VERSION {
            return Err(CacheError::InvalidFormat(format!(
                "Unsupported journal version: {}",
                data[4]
            )));
        }

        let mut offset = HEADER_SIZE;
        let mut count = 0u64;

        while offset < data.len() {
            match Self::decode_entry(&data[offset..])? {
                Some((command, consumed)) => {
                    Self::apply(memory, &command)?;
                    offset += consumed;
                    count += 1;
                }
                None => {
                    tracing::warn!(
                        offset,
                        discarded = data.len() - offset,
                        "truncating torn journal tail"
                    );
                    let file = OpenOptions::new().write(true).open(journal_path)?;
                    file.set_len(offset as u64)?;
                    file.sync_all()?;
                    break;
                }
            }
        }

        Ok(count)
    }

    /// Decode one entry. `None` means the buffer ends mid-entry.
    fn decode_entry(buf: &[u8]) -> Result<Option<(JournalCommand, usize)>> {
        if buf.len() < 4 {
            return Ok(None);
        }

        let mut len_bytes = [0u8; 4];
        len_bytes.copy_from_slice(&buf[0..4]);
        let len = u32::from_le_bytes(len_bytes) as usize;

        if len > MAX_ENTRY_SIZE {
            return Err(CacheError::Corruption("Journal entry too large".into()));
        }

        let total = 4 + len + 4;
        if buf.len() < total {
            return Ok(None);
        }

        let encoded = &buf[4..4 + len];
        let mut checksum_bytes = [0u8; 4];
        checksum_bytes.copy_from_slice(&buf[4 + len..total]);
        let stored_checksum = u32::from_le_bytes(checksum_bytes);
        let computed_checksum = crc32fast::hash(encoded);

        if stored_checksum != computed_checksum {
            return Err(CacheError::ChecksumMismatch {
                expected: stored_checksum,
                got: computed_checksum,
            });
        }

        let command: JournalCommand = rmp_serde::from_slice(encoded)?;
        Ok(Some((command, total)))
    }

    fn encode_entry(command: &JournalCommand) -> Result<Vec<u8>> {
        let encoded = rmp_serde::to_vec(command)?;
        let mut entry = Vec::with_capacity(encoded.len() + 8);
        entry.extend_from_slice(&(encoded.len() as u32).to_le_bytes());
        entry.extend_from_slice(&encoded);
        entry.extend_from_slice(&crc32fast::hash(&encoded).to_le_bytes());
        Ok(entry)
    }

    fn apply(memory: &MemoryStore, command: &JournalCommand) -> Result<()> {
        match command {
            JournalCommand::Set { key, value } => memory.set(key, value),
            JournalCommand::Incr { key } => memory.incr(key).map(|_| ()),
            JournalCommand::Rpush { key, value } => memory.rpush(key, value).map(|_| ()),
        }
    }

    fn append(&self, journal: &mut JournalWriter, command: &JournalCommand) -> Result<()> {
        let entry = Self::encode_entry(command)?;
        journal.append(&self.journal_path(), &entry, self.sync_interval)
    }
}

impl StoreAdapter for JournaledStore {
    fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        let mut journal = self.journal.lock();
        self.append(
            &mut journal,
            &JournalCommand::Set {
                key: key.to_string(),
                value: value.to_vec(),
            },
        )?;
        self.memory.set(key, value)
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.memory.get(key)
    }

    fn incr(&self, key: &str) -> Result<i64> {
        let mut journal = self.journal.lock();
        let next = self.memory.peek_incr(key)?;
        self.append(&mut journal, &JournalCommand::Incr { key: key.to_string() })?;
        self.memory.incr(key)?;
        Ok(next)
    }

    fn rpush(&self, key: &str, value: &[u8]) -> Result<usize> {
        let mut journal = self.journal.lock();
        self.memory.check_list(key)?;
        self.append(
            &mut journal,
            &JournalCommand::Rpush {
                key: key.to_string(),
                value: value.to_vec(),
            },
        )?;
        self.memory.rpush(key, value)
    }

    fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<Vec<u8>>> {
        self.memory.lrange(key, start, stop)
    }

    fn flush_all(&self) -> Result<()> {
        let mut journal = self.journal.lock();

        #[cfg(test)]
        if journal.fail_writes {
            return Err(injected_failure());
        }

        // An empty store needs no history: restart the journal.
        let committed_len = Self::rewrite(&self.journal_path(), &[])?;
        journal.writer = None;
        journal.committed_len = committed_len;
        journal.writes_since_sync = 0;
        self.memory.flush_all()?;

        tracing::debug!(path = %self.path.display(), "flushed journaled store");
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        self.journal.lock().sync()
    }
}

impl Drop for JournaledStore {
    fn drop(&mut self) {
        // Best-effort sync on drop
        let _ = self.sync();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::{call_count, count_calls, from_fn, Operation};
    use crate::types::OperationId;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;
    #[test]
    fn test_commands_survive_reopen() {
        let dir = TempDir::new().unwrap();

        {
            let store = JournaledStore::open(dir.path()).unwrap();
            store.set("k", b"v").unwrap();
            store.incr("n").unwrap();
            store.incr("n").unwrap();
            store.rpush("l", b"a").unwrap();
            store.rpush("l", b"b").unwrap();
        }

        let store = JournaledStore::open(dir.path()).unwrap();
        assert_eq!(store.get("k").unwrap(), Some(b"v".to_vec()));
        assert_eq!(store.get("n").unwrap(), Some(b"2".to_vec()));
        assert_eq!(
            store.lrange("l", 0, -1).unwrap(),
            vec![b"a".to_vec(), b"b".to_vec()]
        );
    }

    #[test]
    fn test_failed_commands_are_not_journaled() {
        let dir = TempDir::new().unwrap();

        {
            let store = JournaledStore::open(dir.path()).unwrap();
            store.set("k", b"text").unwrap();
            assert!(store.incr("k").is_err());
            assert!(store.rpush("k", b"x").is_err());
        }

        // Replay would fail if the rejected commands had been written.
        let store = JournaledStore::open(dir.path()).unwrap();
        assert_eq!(store.get("k").unwrap(), Some(b"text".to_vec()));
    }

    #[test]
    fn test_flush_resets_journal() {
        let dir = TempDir::new().unwrap();

        {
            let store = JournaledStore::open(dir.path()).unwrap();
            store.set("a", b"1").unwrap();
            store.flush_all().unwrap();
            store.set("b", b"2").unwrap();
        }

        let store = JournaledStore::open(dir.path()).unwrap();
        assert_eq!(store.get("a").unwrap(), None);
        assert_eq!(store.get("b").unwrap(), Some(b"2".to_vec()));
    }

    #[test]
    fn test_exclusive_lock() {
        let dir = TempDir::new().unwrap();
        let _store = JournaledStore::open(dir.path()).unwrap();

        let second = JournaledStore::open(dir.path());
        assert!(matches!(second, Err(CacheError::Locked)));
    }

    #[test]
    fn test_torn_tail_is_truncated() {
        let dir = TempDir::new().unwrap();

        {
            let store = JournaledStore::open_with_sync_interval(dir.path(), 1).unwrap();
            store.set("a", b"1").unwrap();
            store.set("b", b"2").unwrap();
        }

        let journal = dir.path().join("JOURNAL");
        let full_len = fs::metadata(&journal).unwrap().len();
        let file = OpenOptions::new().write(true).open(&journal).unwrap();
        file.set_len(full_len - 3).unwrap();
        drop(file);

        {
            let store = JournaledStore::open(dir.path()).unwrap();
            assert_eq!(store.get("a").unwrap(), Some(b"1".to_vec()));
            assert_eq!(store.get("b").unwrap(), None);
            store.set("c", b"3").unwrap();
        }

        let store = JournaledStore::open(dir.path()).unwrap();
        assert_eq!(store.get("c").unwrap(), Some(b"3".to_vec()));
    }

    #[test]
    fn test_checksum_mismatch_detected() {
        let dir = TempDir::new().unwrap();

        {
            let store = JournaledStore::open_with_sync_interval(dir.path(), 1).unwrap();
            store.set("a", b"value").unwrap();
        }

        let journal = dir.path().join("JOURNAL");
        let mut data = fs::read(&journal).unwrap();
        // Flip a byte inside the first entry's payload.
        data[HEADER_SIZE + 6] ^= 0xff;
        fs::write(&journal, data).unwrap();

        let result = JournaledStore::open(dir.path());
        assert!(matches!(result, Err(CacheError::ChecksumMismatch { .. })));
    }

    #[test]
    fn test_invalid_magic() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("JOURNAL"), b"NOPE\x01").unwrap();

        let result = JournaledStore::open(dir.path());
        assert!(matches!(result, Err(CacheError::InvalidFormat(_))));
    }

    #[test]
    fn test_failed_write_leaves_store_unchanged() {
        let dir = TempDir::new().unwrap();

        {
            let store = JournaledStore::open_with_sync_interval(dir.path(), 1).unwrap();
            assert_eq!(store.incr("n").unwrap(), 1);
            let committed = fs::metadata(dir.path().join("JOURNAL")).unwrap().len();

            store.journal.lock().fail_writes = true;
            assert!(matches!(store.incr("n"), Err(CacheError::Io(_))));
            assert!(store.set("k", b"v").is_err());
            assert!(store.rpush("l", b"a").is_err());

            assert_eq!(store.get("n").unwrap(), Some(b"1".to_vec()));
            assert_eq!(store.get("k").unwrap(), None);
            assert!(store.lrange("l", 0, -1).unwrap().is_empty());
            assert_eq!(
                fs::metadata(dir.path().join("JOURNAL")).unwrap().len(),
                committed
            );

            store.journal.lock().fail_writes = false;
            assert_eq!(store.incr("n").unwrap(), 2);
        }

        // A half-written entry left behind would fail replay.
        let store = JournaledStore::open(dir.path()).unwrap();
        assert_eq!(store.get("n").unwrap(), Some(b"2".to_vec()));
        assert_eq!(store.get("k").unwrap(), None);
        assert!(store.lrange("l", 0, -1).unwrap().is_empty());
    }

    #[test]
    fn test_failed_flush_keeps_contents() {
        let dir = TempDir::new().unwrap();

        {
            let store = JournaledStore::open(dir.path()).unwrap();
            store.set("a", b"1").unwrap();

            store.journal.lock().fail_writes = true;
            assert!(store.flush_all().is_err());
            assert_eq!(store.get("a").unwrap(), Some(b"1".to_vec()));
            store.journal.lock().fail_writes = false;
        }

        let store = JournaledStore::open(dir.path()).unwrap();
        assert_eq!(store.get("a").unwrap(), Some(b"1".to_vec()));
    }

    #[test]
    fn test_failed_increment_does_not_count_call() {
        let dir = TempDir::new().unwrap();
        let journaled = Arc::new(JournaledStore::open(dir.path()).unwrap());
        let store: Arc<dyn StoreAdapter> = journaled.clone();
        let id = OperationId::new("work").unwrap();

        let runs = Arc::new(AtomicUsize::new(0));
        let runs_in = Arc::clone(&runs);
        let op = count_calls(
            from_fn(move |(): ()| {
                runs_in.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
            id.clone(),
            store.clone(),
        );

        op.invoke(()).unwrap();
        journaled.journal.lock().fail_writes = true;
        assert!(op.invoke(()).is_err());
        journaled.journal.lock().fail_writes = false;
        op.invoke(()).unwrap();

        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert_eq!(call_count(store.as_ref(), &id).unwrap(), 2);
    }

    #[test]
    fn test_journal_compacted_on_open() {
        let dir = TempDir::new().unwrap();
        let journal = dir.path().join("JOURNAL");

        {
            let store = JournaledStore::open(dir.path()).unwrap();
            for _ in 0..50 {
                store.incr("n").unwrap();
            }
            store.rpush("l", b"a").unwrap();
            store.rpush("l", b"b").unwrap();
        }
        let before = fs::metadata(&journal).unwrap().len();

        {
            let store = JournaledStore::open(dir.path()).unwrap();
            assert!(fs::metadata(&journal).unwrap().len() < before);
            assert!(!dir.path().join("JOURNAL.tmp").exists());
            assert_eq!(store.get("n").unwrap(), Some(b"50".to_vec()));
            assert_eq!(
                store.lrange("l", 0, -1).unwrap(),
                vec![b"a".to_vec(), b"b".to_vec()]
            );
            assert_eq!(store.incr("n").unwrap(), 51);
        }

        let store = JournaledStore::open(dir.path()).unwrap();
        assert_eq!(store.get("n").unwrap(), Some(b"51".to_vec()));
        assert_eq!(store.lrange("l", 0, -1).unwrap().len(), 2);
    }
}
