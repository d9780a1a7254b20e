use bytes::Bytes;
use futures::StreamExt;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use strum_macros::{Display, EnumString};
use tokio::task::JoinHandle;
use tokio::time::{self, Duration, Instant};
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::codec::FrameCodec;
use crate::commands::Command;
use crate::db::Database;
use crate::frame::Frame;

/// When the append-only file is flushed and synced to disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum SyncPolicy {
    /// After every appended command.
    Always,
    /// Once per second, from a background task.
    EverySec,
    /// Whenever the operating system decides to.
    No,
}

/// Commands that change the data set and get logged. Some of them are not served yet, listing
/// them keeps logs written by a fuller server replayable.
pub fn is_write_command(name: &str) -> bool {
    matches!(
        name,
        "SET"
            | "SETWITHTTL"
            | "DEL"
            | "FLUSHDB"
            | "PEXPIREAT"
            | "EXPIRE"
            | "HSET"
            | "LPUSH"
            | "SADD"
    )
}

struct Writer {
    file: BufWriter<File>,
    // Partition the last record was written for. `None` until the first append, so every
    // session starts with an explicit `SELECT`.
    partition: Option<usize>,
}

impl Writer {
    fn sync(&mut self) -> io::Result<()> {
        self.file.flush()?;
        self.file.get_ref().sync_data()
    }
}

/// Append-only log of write commands, stored in their wire format.
pub struct Aof {
    path: PathBuf,
    policy: SyncPolicy,
    writer: Arc<Mutex<Option<Writer>>>,
    cancel: CancellationToken,
    sync_task: Mutex<Option<JoinHandle<()>>>,
}

impl Aof {
    /// Opens `path` for appending, creating it if needed. With [`SyncPolicy::EverySec`] this
    /// spawns the background sync task, so it has to run inside a tokio runtime.
    pub fn open(path: impl AsRef<Path>, policy: SyncPolicy) -> io::Result<Aof> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        let writer = Arc::new(Mutex::new(Some(Writer {
            file: BufWriter::new(file),
            partition: None,
        })));
        let cancel = CancellationToken::new();

        let sync_task = match policy {
            SyncPolicy::EverySec => Some(tokio::spawn(sync_every_second(
                writer.clone(),
                cancel.clone(),
            ))),
            SyncPolicy::Always | SyncPolicy::No => None,
        };

        info!(path = %path.display(), %policy, "Append-only file opened");

        Ok(Aof {
            path,
            policy,
            writer,
            cancel,
            sync_task: Mutex::new(sync_task),
        })
    }

    /// Appends an encoded command that was applied to `partition`. A `SELECT` record is written
    /// first whenever the partition differs from the previous append.
    pub fn append(&self, partition: usize, record: &[u8]) -> io::Result<()> {
        let mut guard = lock(&self.writer);
        let writer = guard
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "append-only file is closed"))?;

        if writer.partition != Some(partition) {
            let select = Frame::command(&[
                Bytes::from_static(b"SELECT"),
                Bytes::from(partition.to_string()),
            ]);
            writer.file.write_all(&select.serialize())?;
            writer.partition = Some(partition);
        }

        writer.file.write_all(record)?;

        if self.policy == SyncPolicy::Always {
            writer.sync()?;
        }

        Ok(())
    }

    /// Pushes buffered records to the operating system without syncing.
    pub fn flush(&self) -> io::Result<()> {
        match lock(&self.writer).as_mut() {
            Some(writer) => writer.file.flush(),
            None => Ok(()),
        }
    }

    /// Stops the background task, then flushes and syncs what is left. Closing twice is a
    /// no-op.
    pub async fn close(&self) -> io::Result<()> {
        self.cancel.cancel();

        let task = lock(&self.sync_task).take();
        if let Some(task) = task {
            if let Err(err) = task.await {
                warn!("Append-only sync task failed: {}", err);
            }
        }

        let writer = lock(&self.writer).take();
        if let Some(mut writer) = writer {
            writer.file.flush()?;
            writer.file.get_ref().sync_all()?;
            info!(path = %self.path.display(), "Append-only file closed");
        }

        Ok(())
    }
}

impl Drop for Aof {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn sync_every_second(writer: Arc<Mutex<Option<Writer>>>, cancel: CancellationToken) {
    let period = Duration::from_secs(1);
    let mut interval = time::interval_at(Instant::now() + period, period);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                let res = match lock(&writer).as_mut() {
                    Some(writer) => writer.sync(),
                    None => break,
                };
                if let Err(err) = res {
                    warn!("Failed to sync append-only file: {}", err);
                }
            }
        }
    }

    debug!("Append-only sync task stopped");
}

// A panic while holding the lock can only interrupt a write, leaving at most a torn record that
// replay skips.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Rebuilds `db` from the log at `path` and returns how many commands were applied.
///
/// Replay starts on partition 0 and follows `SELECT` records. Records that are not commands or
/// fail to run are skipped, and a terminal decode error (usually a torn last record) stops the
/// replay, keeping everything applied before it. A missing file replays nothing.
pub async fn replay(path: impl AsRef<Path>, db: &Database) -> io::Result<usize> {
    let path = path.as_ref();
    let file = match tokio::fs::File::open(path).await {
        Ok(file) => file,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "No append-only file to replay");
            return Ok(0);
        }
        Err(err) => return Err(err),
    };

    let mut frames = FramedRead::new(file, FrameCodec::default());
    let mut partition = 0;
    let mut applied = 0;

    while let Some(item) = frames.next().await {
        let frame = match item {
            Ok(Ok(frame)) => frame,
            Ok(Err(err)) => {
                warn!("Skipping malformed append-only record: {}", err);
                continue;
            }
            Err(err) => {
                warn!("Stopping append-only replay early: {}", err);
                break;
            }
        };

        let Some(args) = frame.into_args() else {
            warn!("Skipping append-only record that is not a command");
            continue;
        };

        let command = match Command::try_from(args) {
            Ok(command) => command,
            Err(err) => {
                warn!("Skipping append-only record: {}", err);
                continue;
            }
        };

        if let Command::Select(select) = &command {
            partition = select.index;
            continue;
        }

        match db.apply(partition, command) {
            Ok(_) => applied += 1,
            Err(err) => warn!("Skipping append-only record: {}", err),
        }
    }

    info!(path = %path.display(), applied, "Append-only file replayed");
    Ok(applied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn record(parts: &[&'static str]) -> Vec<u8> {
        let args: Vec<Bytes> = parts
            .iter()
            .copied()
            .map(|part| Bytes::from_static(part.as_bytes()))
            .collect();
        Frame::command(&args).serialize()
    }

    #[test]
    fn sync_policy_names() {
        assert_eq!("always".parse::<SyncPolicy>().unwrap(), SyncPolicy::Always);
        assert_eq!("everysec".parse::<SyncPolicy>().unwrap(), SyncPolicy::EverySec);
        assert_eq!("no".parse::<SyncPolicy>().unwrap(), SyncPolicy::No);
        assert!("sometimes".parse::<SyncPolicy>().is_err());

        assert_eq!(SyncPolicy::EverySec.to_string(), "everysec");
    }

    #[test]
    fn write_commands() {
        for name in [
            "SET", "SETWITHTTL", "DEL", "FLUSHDB", "PEXPIREAT", "EXPIRE", "HSET", "LPUSH", "SADD",
        ] {
            assert!(is_write_command(name), "{name}");
        }
        for name in ["GET", "SELECT", "PING", "DBSIZE", "CLIENT"] {
            assert!(!is_write_command(name), "{name}");
        }
    }

    #[tokio::test]
    async fn append_tags_partitions() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.aof");

        let aof = Aof::open(&path, SyncPolicy::Always).unwrap();
        aof.append(0, &record(&["SET", "a", "1"])).unwrap();
        aof.append(0, &record(&["SET", "b", "2"])).unwrap();
        aof.append(3, &record(&["DEL", "a"])).unwrap();

        // Synced on every append, nothing is waiting in the buffer.
        let expected = [
            record(&["SELECT", "0"]),
            record(&["SET", "a", "1"]),
            record(&["SET", "b", "2"]),
            record(&["SELECT", "3"]),
            record(&["DEL", "a"]),
        ]
        .concat();
        assert_eq!(fs::read(&path).unwrap(), expected);

        aof.close().await.unwrap();
    }

    #[tokio::test]
    async fn close_flushes_and_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.aof");

        let aof = Aof::open(&path, SyncPolicy::No).unwrap();
        aof.append(0, &record(&["SET", "a", "1"])).unwrap();
        aof.close().await.unwrap();
        aof.close().await.unwrap();

        let expected = [record(&["SELECT", "0"]), record(&["SET", "a", "1"])].concat();
        assert_eq!(fs::read(&path).unwrap(), expected);

        let err = aof.append(0, &record(&["SET", "b", "2"])).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[tokio::test]
    async fn flush_without_sync_policy() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.aof");

        let aof = Aof::open(&path, SyncPolicy::No).unwrap();
        aof.append(1, &record(&["SET", "a", "1"])).unwrap();
        assert!(fs::read(&path).unwrap().is_empty());

        aof.flush().unwrap();

        let expected = [record(&["SELECT", "1"]), record(&["SET", "a", "1"])].concat();
        assert_eq!(fs::read(&path).unwrap(), expected);

        aof.close().await.unwrap();
        aof.flush().unwrap();
    }

    #[tokio::test]
    async fn every_second_syncs_in_the_background() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.aof");

        let aof = Aof::open(&path, SyncPolicy::EverySec).unwrap();
        aof.append(0, &record(&["SET", "a", "1"])).unwrap();
        assert!(fs::read(&path).unwrap().is_empty());

        time::sleep(Duration::from_millis(1500)).await;

        let expected = [record(&["SELECT", "0"]), record(&["SET", "a", "1"])].concat();
        assert_eq!(fs::read(&path).unwrap(), expected);

        aof.close().await.unwrap();
    }

    #[tokio::test]
    async fn reopening_appends() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.aof");

        let aof = Aof::open(&path, SyncPolicy::Always).unwrap();
        aof.append(2, &record(&["SET", "a", "1"])).unwrap();
        aof.close().await.unwrap();

        let aof = Aof::open(&path, SyncPolicy::Always).unwrap();
        aof.append(0, &record(&["SET", "b", "2"])).unwrap();
        aof.close().await.unwrap();

        let expected = [
            record(&["SELECT", "2"]),
            record(&["SET", "a", "1"]),
            record(&["SELECT", "0"]),
            record(&["SET", "b", "2"]),
        ]
        .concat();
        assert_eq!(fs::read(&path).unwrap(), expected);
    }

    #[tokio::test]
    async fn replay_missing_file() {
        let dir = TempDir::new().unwrap();
        let db = Database::new(0);

        let applied = replay(dir.path().join("missing.aof"), &db).await.unwrap();

        assert_eq!(applied, 0);
    }

    #[tokio::test]
    async fn replay_follows_selects_and_skips_bad_records() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.aof");

        let contents = [
            record(&["SET", "a", "1"]),
            b"+not a command\r\n".to_vec(),
            record(&["NOPE"]),
            record(&["SELECT", "5"]),
            record(&["SET", "b", "2"]),
            record(&["SELECT", "0"]),
            record(&["DEL", "a"]),
            record(&["SET", "c", "3"]),
            // Torn last record.
            b"*3\r\n$3\r\nSET\r\n$1\r\nd".to_vec(),
        ]
        .concat();
        fs::write(&path, contents).unwrap();

        let db = Database::new(0);
        let applied = replay(&path, &db).await.unwrap();

        assert_eq!(applied, 4);

        let get = |partition, key: &str| {
            db.exec(partition, vec![Bytes::from("GET"), Bytes::copy_from_slice(key.as_bytes())])
                .unwrap()
        };
        assert_eq!(get(0, "a"), Frame::Bulk(None));
        assert_eq!(get(0, "b"), Frame::Bulk(None));
        assert_eq!(get(0, "c"), Frame::Bulk(Some(Bytes::from("3"))));
        assert_eq!(get(5, "b"), Frame::Bulk(Some(Bytes::from("2"))));
        assert_eq!(get(0, "d"), Frame::Bulk(None));
    }
}
