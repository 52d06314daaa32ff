use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::record::{self, Record, RecordKind};
use crate::Log;

/// Configuration for [`LocalLog`].
#[derive(Clone, Debug)]
pub struct LocalLogOptions {
    /// Read-ahead buffer size used when scanning the file for recovery and
    /// for `read_records`.
    pub buffer_size: usize,
    /// How long a polling subscriber should sleep between empty reads. Not
    /// used by `LocalLog` itself; surfaced here so `txlog-subscription` can
    /// read it off the same config struct the log was opened with.
    pub poll_sleep_duration: Duration,
}

impl Default for LocalLogOptions {
    fn default() -> Self {
        Self {
            buffer_size: 64 * 1024,
            poll_sleep_duration: Duration::from_millis(50),
        }
    }
}

struct Index {
    /// Byte offset of the start of each record's frame, indexed by its log
    /// offset, plus one trailing entry for the current end-of-file position.
    positions: Vec<u64>,
}

impl Index {
    fn start_of(&self, offset: u64) -> Option<u64> {
        self.positions.get(offset as usize).copied()
    }

    fn next_offset(&self) -> u64 {
        self.positions.len() as u64 - 1
    }
}

struct Inner {
    file: File,
    index: Index,
}

/// A durable, single-file append-only log backend.
///
/// On open, the file is scanned from the beginning: every frame's checksum
/// is validated, and a trailing partial or corrupt frame (the signature of a
/// crash mid-write) is truncated away so the log resumes cleanly after the
/// last good record.
pub struct LocalLog {
    path: PathBuf,
    opts: LocalLogOptions,
    inner: Arc<Mutex<Inner>>,
    notify: Arc<Notify>,
}

impl LocalLog {
    pub fn open(path: impl AsRef<Path>, opts: LocalLogOptions) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new().create(true).read(true).append(true).open(&path)?;
        let index = recover(&mut file)?;
        Ok(Self {
            path,
            opts,
            inner: Arc::new(Mutex::new(Inner { file, index })),
            notify: Arc::new(Notify::new()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn options(&self) -> &LocalLogOptions {
        &self.opts
    }

    /// Append a frame and fsync it before returning the assigned offset.
    ///
    /// Runs on a blocking-pool thread: `File::sync_data` is a blocking
    /// syscall and must not run on a `tokio` worker thread.
    async fn append(&self, kind: RecordKind, payload: Vec<u8>) -> Result<u64> {
        let inner = self.inner.clone();
        let offset = tokio::task::spawn_blocking(move || -> Result<u64> {
            let mut inner = inner.lock();
            let offset = inner.index.next_offset();
            let pos = inner.file.stream_position().map_err(Error::Append)?;
            record::write_frame(&mut inner.file, kind, &payload).map_err(Error::Append)?;
            inner.file.sync_data().map_err(Error::Append)?;
            inner.index.positions.push(pos);
            let end = inner.file.stream_position().map_err(Error::Append)?;
            inner.index.positions[offset as usize + 1] = end;
            Ok(offset)
        })
        .await
        .map_err(|e| Error::Append(std::io::Error::other(e)))??;
        self.notify.notify_waiters();
        Ok(offset)
    }
}

/// Scan `file` from the start, validating each frame's checksum, and
/// truncate a corrupt or partial trailing frame. Returns the index of
/// record start positions (one past the last is EOF).
fn recover(file: &mut File) -> Result<Index> {
    file.seek(SeekFrom::Start(0))?;
    let mut reader = BufReader::new(&*file);
    let mut positions = vec![0u64];
    let mut pos = 0u64;
    let mut offset = 0u64;
    loop {
        let mut probe = [0u8; 1];
        let n = reader.read(&mut probe)?;
        if n == 0 {
            break;
        }
        let mut rest = std::io::Cursor::new(probe).chain(&mut reader);
        match record::read_frame(&mut rest, offset) {
            Ok(Some(rec)) => {
                pos += 5 + rec.payload.len() as u64 + 4;
                positions.push(pos);
                offset += 1;
            }
            Ok(None) => break,
            Err(err) => {
                warn!(%err, at = pos, "truncating corrupt tail on log recovery");
                file.set_len(pos)?;
                break;
            }
        }
    }
    file.seek(SeekFrom::End(0))?;
    info!(records = offset, "recovered local log");
    Ok(Index { positions })
}

#[async_trait]
impl Log for LocalLog {
    async fn append_tx(&self, bytes: Vec<u8>) -> Result<u64> {
        self.append(RecordKind::Tx, bytes).await
    }

    async fn append_message(&self, kind: RecordKind, bytes: Vec<u8>) -> Result<u64> {
        self.append(kind, bytes).await
    }

    fn read_records(&self, after_offset: Option<u64>, max: usize) -> Result<Vec<Record>> {
        let inner = self.inner.lock();
        let start_offset = after_offset.map(|o| o + 1).unwrap_or(0);
        let Some(start_pos) = inner.index.start_of(start_offset) else {
            return Ok(Vec::new());
        };
        let mut file = inner.file.try_clone()?;
        drop(inner);
        file.seek(SeekFrom::Start(start_pos))?;
        let mut reader = BufReader::with_capacity(self.opts.buffer_size, file);
        let mut out = Vec::new();
        let mut offset = start_offset;
        while out.len() < max {
            match record::read_frame(&mut reader, offset) {
                Ok(Some(rec)) => {
                    out.push(rec);
                    offset += 1;
                }
                Ok(None) => break,
                Err(err) => return Err(Error::Read { offset, source: err }),
            }
        }
        Ok(out)
    }

    fn latest_submitted_offset(&self) -> Option<u64> {
        let next = self.inner.lock().index.next_offset();
        (next > 0).then(|| next - 1)
    }

    fn notify_handle(&self) -> Arc<Notify> {
        self.notify.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn appends_and_reads_back_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let log = LocalLog::open(dir.path().join("log"), LocalLogOptions::default()).unwrap();
        for i in 0..3u8 {
            log.append_tx(vec![i]).await.unwrap();
        }
        let records = log.read_records(None, 10).unwrap();
        assert_eq!(records.iter().map(|r| r.payload.clone()).collect::<Vec<_>>(), vec![vec![0], vec![1], vec![2]]);
    }

    #[tokio::test]
    async fn recovers_by_truncating_a_corrupt_tail() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log");
        {
            let log = LocalLog::open(&path, LocalLogOptions::default()).unwrap();
            log.append_tx(b"good".to_vec()).await.unwrap();
        }
        // Simulate a crash mid-write: append a partial frame with no trailing checksum.
        {
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            file.write_all(&[record::KIND_TX, 5, 0, 0, 0, b'h', b'i']).unwrap();
        }
        let log = LocalLog::open(&path, LocalLogOptions::default()).unwrap();
        assert_eq!(log.latest_submitted_offset(), Some(0));
        let records = log.read_records(None, 10).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].payload, b"good");

        let offset = log.append_tx(b"after-recovery".to_vec()).await.unwrap();
        assert_eq!(offset, 1);
    }
}
