//! File-backed record log acting as a system of record
//!
//! File layout:
//! - `cachet.log`: header followed by append-only put/delete records
//!
//! Opening a log replays every record into an in-memory index that maps each
//! live key to the offset of its latest value.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use ahash::RandomState;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::error::{Result, StoreError};
use crate::parser::{
    create_header, encode_record, parse_header, parse_record, RecordOp, HEADER_LEN, LOG_VERSION,
    RECORD_PREFIX_LEN,
};
use crate::traits::{CacheLoader, CacheWriter};

/// Maximum value size (1 MB)
const MAX_VALUE_SIZE: usize = 1024 * 1024;

const LOG_FILE: &str = "cachet.log";
const COMPACT_FILE: &str = "cachet.log.compact";

/// Location of a live value inside the log file
#[derive(Debug, Clone, Copy)]
struct ValueSlot {
    offset: u64,
    len: u32,
}

/// Append target of the log: a file, or an in-memory buffer in tests
trait LogSink: Write + Seek {
    fn truncate(&mut self, len: u64) -> io::Result<()>;
}

impl LogSink for File {
    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }
}

/// An append that failed part way
struct TornAppend {
    error: io::Error,
    /// Whether the partial bytes were cut back off
    rewound: bool,
}

/// Write `buf` at the end of `sink` and return the offset it starts at.
///
/// On failure the sink is truncated back to that offset, so a later append
/// never lands behind a half-written record.
fn append_at_end<S: LogSink>(sink: &mut S, buf: &[u8]) -> std::result::Result<u64, TornAppend> {
    let base = sink.seek(SeekFrom::End(0)).map_err(|error| TornAppend {
        error,
        rewound: true,
    })?;

    if let Err(error) = sink.write_all(buf) {
        let rewound = match sink.truncate(base) {
            Ok(()) => true,
            Err(cut) => {
                warn!(offset = base, error = %cut, "Failed to drop partial record");
                false
            }
        };
        return Err(TornAppend { error, rewound });
    }

    Ok(base)
}

/// LogStore is an append-only, file-backed key-value store for string keys
pub struct LogStore {
    /// Path to the store directory
    path: PathBuf,

    /// Log file handle
    file: Mutex<File>,

    /// In-memory index: key -> latest value location
    index: RwLock<HashMap<String, ValueSlot, RandomState>>,

    /// Is the store closed?
    closed: RwLock<bool>,
}

impl LogStore {
    /// Open or create a record log in the given directory
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        std::fs::create_dir_all(path)?;

        let log_path = path.join(LOG_FILE);
        let (file, index) = if log_path.exists() {
            Self::open_existing(&log_path)?
        } else {
            Self::create_new(&log_path)?
        };

        debug!(path = %log_path.display(), keys = index.len(), "Opened record log");

        Ok(LogStore {
            path: path.to_path_buf(),
            file: Mutex::new(file),
            index: RwLock::new(index),
            closed: RwLock::new(false),
        })
    }

    fn open_existing(log_path: &Path) -> Result<(File, HashMap<String, ValueSlot, RandomState>)> {
        let mut file = OpenOptions::new().read(true).write(true).open(log_path)?;

        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;
        parse_header(&buf)?;

        let mut index = HashMap::with_hasher(RandomState::new());
        let mut offset = HEADER_LEN;

        while offset < buf.len() {
            match parse_record(&buf[offset..]) {
                Ok((_, record)) => {
                    let key = String::from_utf8(record.key.to_vec())
                        .map_err(|_| StoreError::Parse(format!("Non UTF-8 key at offset {}", offset)))?;
                    match record.op {
                        RecordOp::Put => {
                            let slot = ValueSlot {
                                offset: (offset + RECORD_PREFIX_LEN + record.key.len()) as u64,
                                len: record.value.len() as u32,
                            };
                            index.insert(key, slot);
                        }
                        RecordOp::Delete => {
                            index.remove(&key);
                        }
                    }
                    offset += record.encoded_len();
                }
                Err(nom::Err::Failure(err)) => return Err(nom::Err::Failure(err).into()),
                Err(_) => {
                    warn!(
                        path = %log_path.display(),
                        offset,
                        dropped = buf.len() - offset,
                        "Truncating torn record at end of log"
                    );
                    file.set_len(offset as u64)?;
                    break;
                }
            }
        }

        Ok((file, index))
    }

    fn create_new(log_path: &Path) -> Result<(File, HashMap<String, ValueSlot, RandomState>)> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(log_path)?;

        file.write_all(&create_header(LOG_VERSION))?;

        Ok((file, HashMap::with_hasher(RandomState::new())))
    }

    fn ensure_open(&self) -> Result<()> {
        if *self.closed.read() {
            return Err(StoreError::Closed);
        }
        Ok(())
    }

    /// Append encoded records in a single write, then update the index
    fn append(&self, records: &[(RecordOp, &str, &[u8])]) -> Result<()> {
        self.ensure_open()?;

        for (_, _, value) in records {
            if value.len() > MAX_VALUE_SIZE {
                return Err(StoreError::ValueTooLarge(value.len()));
            }
        }

        let mut buf = Vec::new();
        let mut slots = Vec::with_capacity(records.len());
        for (op, key, value) in records {
            slots.push((buf.len() + RECORD_PREFIX_LEN + key.len(), value.len()));
            buf.extend(encode_record(*op, key.as_bytes(), value));
        }

        let mut file = self.file.lock();
        let base = match append_at_end(&mut *file, &buf) {
            Ok(base) => base,
            Err(torn) => {
                if !torn.rewound {
                    // Anything appended now would be read as part of the torn record
                    warn!(path = %self.path.display(), "Closing record log after a torn append");
                    *self.closed.write() = true;
                }
                return Err(torn.error.into());
            }
        };

        let mut index = self.index.write();
        for ((op, key, _), (rel, len)) in records.iter().zip(slots) {
            match op {
                RecordOp::Put => {
                    index.insert(
                        key.to_string(),
                        ValueSlot {
                            offset: base + rel as u64,
                            len: len as u32,
                        },
                    );
                }
                RecordOp::Delete => {
                    index.remove(*key);
                }
            }
        }

        Ok(())
    }

    /// Store a value under `key`
    pub fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        self.append(&[(RecordOp::Put, key, value)])
    }

    /// Read the latest value for `key`
    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.ensure_open()?;

        let slot = match self.index.read().get(key) {
            Some(slot) => *slot,
            None => return Ok(None),
        };

        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(slot.offset))?;
        let mut value = vec![0u8; slot.len as usize];
        file.read_exact(&mut value)?;

        Ok(Some(value))
    }

    /// Delete `key`. Deleting a missing key still appends a tombstone.
    pub fn remove(&self, key: &str) -> Result<()> {
        self.append(&[(RecordOp::Delete, key, &b""[..])])
    }

    /// Live keys, in no particular order
    pub fn keys(&self) -> Vec<String> {
        self.index.read().keys().cloned().collect()
    }

    /// Get the number of live keys
    pub fn len(&self) -> usize {
        self.index.read().len()
    }

    /// Check if the store is empty
    pub fn is_empty(&self) -> bool {
        self.index.read().is_empty()
    }

    /// Flush buffered writes to disk
    pub fn sync(&self) -> Result<()> {
        self.ensure_open()?;
        self.file.lock().sync_all()?;
        Ok(())
    }

    /// Rewrite the log keeping only the latest value of each live key
    pub fn compact(&self) -> Result<()> {
        self.ensure_open()?;

        let mut file = self.file.lock();
        let mut index = self.index.write();

        let compact_path = self.path.join(COMPACT_FILE);
        let mut out = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&compact_path)?;
        out.write_all(&create_header(LOG_VERSION))?;

        let mut offset = HEADER_LEN as u64;
        let mut rebuilt = HashMap::with_capacity_and_hasher(index.len(), RandomState::new());
        for (key, slot) in index.iter() {
            file.seek(SeekFrom::Start(slot.offset))?;
            let mut value = vec![0u8; slot.len as usize];
            file.read_exact(&mut value)?;

            let record = encode_record(RecordOp::Put, key.as_bytes(), &value);
            out.write_all(&record)?;
            rebuilt.insert(
                key.clone(),
                ValueSlot {
                    offset: offset + (RECORD_PREFIX_LEN + key.len()) as u64,
                    len: slot.len,
                },
            );
            offset += record.len() as u64;
        }
        out.sync_all()?;

        std::fs::rename(&compact_path, self.path.join(LOG_FILE))?;
        debug!(keys = rebuilt.len(), bytes = offset, "Compacted record log");

        *file = out;
        *index = rebuilt;

        Ok(())
    }

    /// Close the store and fsync all changes
    pub fn close(&mut self) -> Result<()> {
        if *self.closed.read() {
            return Ok(());
        }

        self.file.lock().sync_all()?;
        *self.closed.write() = true;

        Ok(())
    }
}

impl Drop for LogStore {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

impl CacheLoader<String> for LogStore {
    fn load(&self, key: &String) -> Result<Option<Vec<u8>>> {
        self.get(key)
    }
}

impl CacheWriter<String> for LogStore {
    fn write(&self, key: &String, value: &[u8]) -> Result<()> {
        self.put(key, value)
    }

    fn write_all(&self, entries: &[(String, Vec<u8>)]) -> Result<()> {
        let records: Vec<_> = entries
            .iter()
            .map(|(key, value)| (RecordOp::Put, key.as_str(), value.as_slice()))
            .collect();
        self.append(&records)
    }

    fn delete(&self, key: &String) -> Result<()> {
        self.remove(key)
    }

    fn delete_all(&self, keys: &[String]) -> Result<()> {
        let records: Vec<_> = keys
            .iter()
            .map(|key| (RecordOp::Delete, key.as_str(), &b""[..]))
            .collect();
        self.append(&records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::TempDir;

    /// In-memory sink that runs out of space after `budget` bytes
    struct ShortSink {
        data: Cursor<Vec<u8>>,
        budget: Option<usize>,
        truncate_fails: bool,
    }

    impl ShortSink {
        fn new(contents: Vec<u8>) -> Self {
            Self {
                data: Cursor::new(contents),
                budget: None,
                truncate_fails: false,
            }
        }
    }

    impl Write for ShortSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            match self.budget {
                Some(0) => Err(io::Error::new(io::ErrorKind::Other, "no space left")),
                Some(left) => {
                    let n = left.min(buf.len());
                    self.budget = Some(left - n);
                    self.data.write(&buf[..n])
                }
                None => self.data.write(buf),
            }
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Seek for ShortSink {
        fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
            self.data.seek(pos)
        }
    }

    impl LogSink for ShortSink {
        fn truncate(&mut self, len: u64) -> io::Result<()> {
            if self.truncate_fails {
                return Err(io::Error::new(io::ErrorKind::Other, "read-only"));
            }
            self.data.get_mut().truncate(len as usize);
            Ok(())
        }
    }

    #[test]
    fn test_failed_append_is_cut_off() {
        let mut sink = ShortSink::new(create_header(LOG_VERSION));
        sink.budget = Some(RECORD_PREFIX_LEN + 1);

        let lost = encode_record(RecordOp::Put, b"a", b"lost");
        let torn = append_at_end(&mut sink, &lost).err().unwrap();
        assert!(torn.rewound);
        assert_eq!(sink.data.get_ref().len(), HEADER_LEN);

        sink.budget = None;
        let kept = encode_record(RecordOp::Put, b"b", b"kept");
        assert_eq!(append_at_end(&mut sink, &kept).ok(), Some(HEADER_LEN as u64));

        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(LOG_FILE), sink.data.get_ref()).unwrap();

        let store = LogStore::open(dir.path()).unwrap();
        assert_eq!(store.get("b").unwrap(), Some(b"kept".to_vec()));
        assert_eq!(store.get("a").unwrap(), None);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_failed_cut_is_reported() {
        let mut sink = ShortSink::new(create_header(LOG_VERSION));
        sink.budget = Some(3);
        sink.truncate_fails = true;

        let record = encode_record(RecordOp::Put, b"a", b"value");
        let torn = append_at_end(&mut sink, &record).err().unwrap();

        assert!(!torn.rewound);
        assert_eq!(torn.error.kind(), io::ErrorKind::Other);
        assert_eq!(sink.data.get_ref().len(), HEADER_LEN + 3);
    }

    #[test]
    fn test_create_and_open() {
        let dir = TempDir::new().unwrap();
        let mut store = LogStore::open(dir.path()).unwrap();

        assert_eq!(store.len(), 0);
        assert!(store.is_empty());

        store.close().unwrap();

        let store = LogStore::open(dir.path()).unwrap();
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn test_put_and_get() {
        let dir = TempDir::new().unwrap();
        let store = LogStore::open(dir.path()).unwrap();

        store.put("key1", b"value1").unwrap();

        assert_eq!(store.get("key1").unwrap(), Some(b"value1".to_vec()));
        assert_eq!(store.get("missing").unwrap(), None);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_overwrite_keeps_latest() {
        let dir = TempDir::new().unwrap();
        let store = LogStore::open(dir.path()).unwrap();

        store.put("key1", b"old").unwrap();
        store.put("key1", b"new").unwrap();

        assert_eq!(store.get("key1").unwrap(), Some(b"new".to_vec()));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_persistence() {
        let dir = TempDir::new().unwrap();

        {
            let mut store = LogStore::open(dir.path()).unwrap();
            store.put("key1", b"value1").unwrap();
            store.put("key2", b"value2").unwrap();
            store.remove("key1").unwrap();
            store.close().unwrap();
        }

        {
            let store = LogStore::open(dir.path()).unwrap();
            assert_eq!(store.len(), 1);
            assert_eq!(store.get("key1").unwrap(), None);
            assert_eq!(store.get("key2").unwrap(), Some(b"value2".to_vec()));
        }
    }

    #[test]
    fn test_torn_tail_is_truncated() {
        let dir = TempDir::new().unwrap();

        {
            let mut store = LogStore::open(dir.path()).unwrap();
            store.put("key1", b"value1").unwrap();
            store.close().unwrap();
        }

        let log_path = dir.path().join(LOG_FILE);
        let mut file = OpenOptions::new().append(true).open(&log_path).unwrap();
        let torn = encode_record(RecordOp::Put, b"key2", b"value2");
        file.write_all(&torn[..torn.len() - 3]).unwrap();
        drop(file);

        let store = LogStore::open(dir.path()).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("key2").unwrap(), None);

        store.put("key3", b"value3").unwrap();
        assert_eq!(store.get("key3").unwrap(), Some(b"value3".to_vec()));
    }

    #[test]
    fn test_value_too_large() {
        let dir = TempDir::new().unwrap();
        let store = LogStore::open(dir.path()).unwrap();

        let large = vec![b'x'; MAX_VALUE_SIZE + 1];
        let result = store.put("big", &large);
        assert!(matches!(result, Err(StoreError::ValueTooLarge(_))));
        assert!(store.is_empty());
    }

    #[test]
    fn test_batch_write_and_delete() {
        let dir = TempDir::new().unwrap();
        let store = LogStore::open(dir.path()).unwrap();

        store
            .write_all(&[
                ("a".to_string(), b"1".to_vec()),
                ("b".to_string(), b"2".to_vec()),
                ("c".to_string(), b"3".to_vec()),
            ])
            .unwrap();
        store.delete_all(&["a".to_string(), "c".to_string()]).unwrap();

        assert_eq!(store.keys(), vec!["b".to_string()]);
        assert_eq!(store.load(&"b".to_string()).unwrap(), Some(b"2".to_vec()));
    }

    #[test]
    fn test_compact() {
        let dir = TempDir::new().unwrap();
        let store = LogStore::open(dir.path()).unwrap();

        for i in 0..10 {
            store.put("hot", format!("v{}", i).as_bytes()).unwrap();
        }
        store.put("cold", b"c").unwrap();
        store.remove("cold").unwrap();

        let before = std::fs::metadata(dir.path().join(LOG_FILE)).unwrap().len();
        store.compact().unwrap();
        let after = std::fs::metadata(dir.path().join(LOG_FILE)).unwrap().len();

        assert!(after < before);
        assert_eq!(store.get("hot").unwrap(), Some(b"v9".to_vec()));
        assert_eq!(store.get("cold").unwrap(), None);

        store.put("new", b"n").unwrap();
        drop(store);

        let store = LogStore::open(dir.path()).unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(store.get("new").unwrap(), Some(b"n".to_vec()));
    }

    #[test]
    fn test_close_twice() {
        let dir = TempDir::new().unwrap();
        let mut store = LogStore::open(dir.path()).unwrap();

        store.close().unwrap();
        store.close().unwrap();
    }

    #[test]
    fn test_put_after_close() {
        let dir = TempDir::new().unwrap();
        let mut store = LogStore::open(dir.path()).unwrap();

        store.close().unwrap();

        assert!(matches!(store.put("k", b"v"), Err(StoreError::Closed)));
        assert!(matches!(store.get("k"), Err(StoreError::Closed)));
    }
}
