//! The persistence log.
//!
//! An append-only file of mutating invocations in wire encoding. Replaying
//! it through the normal command path rebuilds the keyspace at startup.

use crate::error::PersistError;
use crate::resp::{self, Invocation};
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Destination for records of mutating invocations.
pub trait Journal: Send + Sync {
    /// Records one invocation. On error the invocation is not durable and
    /// must not be applied.
    fn append(&self, inv: &Invocation) -> Result<(), PersistError>;

    /// Forces written records to stable storage.
    fn flush(&self) -> Result<(), PersistError>;
}

/// File-backed [`Journal`].
pub struct AppendLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl AppendLog {
    /// Opens the log at `path`, creating it and its parent directories if
    /// they do not exist.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, PersistError> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;

        debug!(path = %path.display(), "opened append log");
        Ok(AppendLog { path, file: Mutex::new(file) })
    }

    /// Decodes every record from the start of the file and hands each one to
    /// `apply`, in order. Returns the number of records replayed.
    ///
    /// Appends are blocked for the duration. An incomplete record at the end
    /// of the file is dropped and the file truncated before it, so that new
    /// records follow the last complete one.
    pub fn replay<F>(&self, mut apply: F) -> Result<usize, PersistError>
    where
        F: FnMut(Invocation),
    {
        let file = self.file.lock();
        let data = fs::read(&self.path)?;

        let mut offset = 0;
        let mut replayed = 0;
        while offset < data.len() {
            match resp::parse(&data[offset..]) {
                Ok(Some((value, used))) => {
                    match Invocation::from_value(value) {
                        Some(inv) => {
                            apply(inv);
                            replayed += 1;
                        }
                        None => warn!(offset, "skipping log record that is not a command"),
                    }
                    offset += used;
                }
                Ok(None) => {
                    warn!(
                        offset,
                        dropped = data.len() - offset,
                        "truncating incomplete record at end of log"
                    );
                    file.set_len(offset as u64)?;
                    break;
                }
                Err(source) => return Err(PersistError::Corrupt { offset, source }),
            }
        }

        info!(path = %self.path.display(), records = replayed, "replayed append log");
        Ok(replayed)
    }
}

impl Journal for AppendLog {
    fn append(&self, inv: &Invocation) -> Result<(), PersistError> {
        let record = inv.to_value().to_bytes();
        let mut file = self.file.lock();
        write_record(&mut *file, &record)?;
        Ok(())
    }

    fn flush(&self) -> Result<(), PersistError> {
        self.file.lock().sync_data()?;
        Ok(())
    }
}

/// File operations an append needs to undo a partial write.
trait LogFile: Write {
    fn size(&self) -> io::Result<u64>;
    fn truncate(&mut self, len: u64) -> io::Result<()>;
}

impl LogFile for File {
    fn size(&self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }
}

/// Writes the whole record or nothing. On a failed write the bytes that did
/// land are cut off again, so the next record never follows a torn one.
fn write_record<F: LogFile>(file: &mut F, record: &[u8]) -> io::Result<()> {
    let start = file.size()?;
    if let Err(err) = file.write_all(record) {
        if let Err(undo) = file.truncate(start) {
            warn!(error = %undo, offset = start, "failed to roll back partial log record");
        }
        return Err(err);
    }
    Ok(())
}

#[cfg(test)]
mod aof_test {
    use super::*;
    use crate::resp::Value;

    fn inv(line: &str) -> Invocation {
        Invocation::from_line(line).unwrap()
    }

    fn collect(log: &AppendLog) -> Vec<Invocation> {
        let mut seen = Vec::new();
        log.replay(|inv| seen.push(inv)).unwrap();
        seen
    }

    #[test]
    fn test_open_creates_missing_file_and_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("db.aof");

        let log = AppendLog::open(&path).unwrap();
        assert!(path.exists());
        assert!(collect(&log).is_empty());
    }

    #[test]
    fn test_append_then_replay_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.aof");

        let log = AppendLog::open(&path).unwrap();
        log.append(&inv("SET a 1")).unwrap();
        log.append(&inv("HSET h f v")).unwrap();
        log.append(&inv("DEL a")).unwrap();
        log.flush().unwrap();

        let seen = collect(&log);
        assert_eq!(seen, vec![inv("SET a 1"), inv("HSET h f v"), inv("DEL a")]);
    }

    #[test]
    fn test_records_use_wire_encoding() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.aof");

        let log = AppendLog::open(&path).unwrap();
        log.append(&inv("SET foo bar")).unwrap();

        let data = fs::read(&path).unwrap();
        assert_eq!(data, b"*3\r\n$3\r\nSET\r\n$3\r\nfoo\r\n$3\r\nbar\r\n");
    }

    #[test]
    fn test_reopen_appends_after_existing_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.aof");

        AppendLog::open(&path).unwrap().append(&inv("SET a 1")).unwrap();
        let log = AppendLog::open(&path).unwrap();
        log.append(&inv("SET b 2")).unwrap();

        assert_eq!(collect(&log), vec![inv("SET a 1"), inv("SET b 2")]);
    }

    #[test]
    fn test_replay_does_not_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.aof");

        let log = AppendLog::open(&path).unwrap();
        log.append(&inv("SET a 1")).unwrap();
        let before = fs::metadata(&path).unwrap().len();

        collect(&log);
        collect(&log);
        assert_eq!(fs::metadata(&path).unwrap().len(), before);
    }

    #[test]
    fn test_torn_tail_is_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.aof");

        let log = AppendLog::open(&path).unwrap();
        log.append(&inv("SET a 1")).unwrap();
        let good_len = fs::metadata(&path).unwrap().len();

        // Simulate a crash half way through the next record
        let partial = inv("SET b 2").to_value().to_bytes();
        {
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            file.write_all(&partial[..partial.len() - 4]).unwrap();
        }

        assert_eq!(collect(&log), vec![inv("SET a 1")]);
        assert_eq!(fs::metadata(&path).unwrap().len(), good_len);

        log.append(&inv("SET c 3")).unwrap();
        assert_eq!(collect(&log), vec![inv("SET a 1"), inv("SET c 3")]);
    }

    #[test]
    fn test_corrupt_record_fails_replay() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.aof");

        let mut data = inv("SET a 1").to_value().to_bytes();
        data.extend_from_slice(b"!garbage\r\n");
        data.extend_from_slice(&inv("SET b 2").to_value().to_bytes());
        fs::write(&path, &data).unwrap();

        let log = AppendLog::open(&path).unwrap();
        match log.replay(|_| {}) {
            Err(PersistError::Corrupt { offset, .. }) => {
                assert_eq!(offset, inv("SET a 1").to_value().to_bytes().len());
            }
            other => panic!("expected corrupt log, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_non_command_records_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.aof");

        let mut data = Value::Bulk("stray".to_string()).to_bytes();
        data.extend_from_slice(&inv("SET a 1").to_value().to_bytes());
        fs::write(&path, &data).unwrap();

        let log = AppendLog::open(&path).unwrap();
        assert_eq!(collect(&log), vec![inv("SET a 1")]);
    }

    #[test]
    fn test_nested_record_fails_replay() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.aof");
        fs::write(&path, b"*1\r\n".repeat(100_000)).unwrap();

        let log = AppendLog::open(&path).unwrap();
        assert!(matches!(log.replay(|_| {}), Err(PersistError::Corrupt { offset: 0, .. })));
    }

    /// In-memory log file that accepts `budget` more bytes, then fails.
    struct ShortFile {
        data: Vec<u8>,
        budget: usize,
    }

    impl Write for ShortFile {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.budget == 0 {
                return Err(io::Error::new(io::ErrorKind::Other, "disk full"));
            }
            let n = buf.len().min(self.budget);
            self.data.extend_from_slice(&buf[..n]);
            self.budget -= n;
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl LogFile for ShortFile {
        fn size(&self) -> io::Result<u64> {
            Ok(self.data.len() as u64)
        }

        fn truncate(&mut self, len: u64) -> io::Result<()> {
            self.data.truncate(len as usize);
            Ok(())
        }
    }

    #[test]
    fn test_failed_write_leaves_no_partial_record() {
        let first = inv("SET a 1").to_value().to_bytes();
        let second = inv("SET b 2").to_value().to_bytes();
        let third = inv("SET c 3").to_value().to_bytes();
        let mut file = ShortFile { data: Vec::new(), budget: first.len() + 5 };

        write_record(&mut file, &first).unwrap();
        assert!(write_record(&mut file, &second).is_err());
        assert_eq!(file.data, first);

        file.budget = usize::MAX;
        write_record(&mut file, &third).unwrap();

        // Both surviving records decode back to back
        let (value, used) = resp::parse(&file.data).unwrap().unwrap();
        assert_eq!(Invocation::from_value(value).unwrap(), inv("SET a 1"));
        let (value, _) = resp::parse(&file.data[used..]).unwrap().unwrap();
        assert_eq!(Invocation::from_value(value).unwrap(), inv("SET c 3"));
    }
}
