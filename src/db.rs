use bytes::Bytes;
use std::io;
use std::sync::{Mutex, PoisonError};
use std::time::SystemTime;
use tracing::error;

use crate::aof::Aof;
use crate::commands::executable::Executable;
use crate::commands::pexpireat::unix_millis;
use crate::commands::{Command, CommandError};
use crate::frame::Frame;
use crate::store::{Sizeable, Store, DEFAULT_CAPACITY};

/// Number of logical databases, addressed as `0..PARTITIONS`.
pub const PARTITIONS: usize = 16;

/// A stored string value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Value(Bytes);

impl Value {
    pub fn into_bytes(self) -> Bytes {
        self.0
    }
}

impl From<Bytes> for Value {
    fn from(bytes: Bytes) -> Self {
        Value(bytes)
    }
}

impl Sizeable for Value {
    fn byte_len(&self) -> usize {
        self.0.len()
    }
}

struct Partition {
    store: Store<Value>,
    // Held by write commands across the store mutation and the log append, so records land in
    // the log in the order they were applied.
    write_gate: Mutex<()>,
}

/// The logical databases and the optional append-only file every write is recorded in.
///
/// The database keeps no per-client state: every call names the partition it runs against.
pub struct Database {
    partitions: Vec<Partition>,
    aof: Option<Aof>,
}

impl Database {
    /// Creates the partitions, each bounded to `capacity` bytes (zero means unbounded).
    pub fn new(capacity: usize) -> Database {
        let partitions = (0..PARTITIONS)
            .map(|_| Partition {
                store: Store::with_capacity(capacity),
                write_gate: Mutex::new(()),
            })
            .collect();

        Database {
            partitions,
            aof: None,
        }
    }

    /// Records every successful write command in `aof` from now on.
    pub fn with_aof(mut self, aof: Aof) -> Database {
        self.aof = Some(aof);
        self
    }

    pub fn partition(&self, index: usize) -> Result<&Store<Value>, CommandError> {
        self.get(index).map(|partition| &partition.store)
    }

    /// Runs the command in `args` against partition `index`.
    ///
    /// Failed commands change nothing and are not logged. A failure to append to the log is
    /// reported but does not fail the command.
    pub fn exec(&self, index: usize, args: Vec<Bytes>) -> Result<Frame, CommandError> {
        let command = Command::try_from(args.clone())?;

        // Validated while parsing, it only matters to the caller.
        if let Command::Select(_) = command {
            return Ok(Frame::Simple("OK".to_string()));
        }

        let partition = self.get(index)?;

        if !command.is_write() {
            return command.exec(&partition.store);
        }

        let _gate = partition
            .write_gate
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let logged = self.aof.as_ref().map(|aof| (aof, log_record(&command, &args)));
        let res = command.exec(&partition.store)?;

        if let Some((aof, record)) = logged {
            if let Err(err) = aof.append(index, &record) {
                error!(partition = index, "Failed to append to the append-only file: {}", err);
            }
        }

        Ok(res)
    }

    /// Runs an already parsed command without logging it.
    pub(crate) fn apply(&self, index: usize, command: Command) -> Result<Frame, CommandError> {
        command.exec(self.partition(index)?)
    }

    /// Closes the append-only file, if there is one.
    pub async fn close(&self) -> io::Result<()> {
        match &self.aof {
            Some(aof) => aof.close().await,
            None => Ok(()),
        }
    }

    fn get(&self, index: usize) -> Result<&Partition, CommandError> {
        self.partitions
            .get(index)
            .ok_or(CommandError::IndexOutOfRange)
    }
}

/// Encodes `command` for the append-only file. A relative TTL is logged as `SET` followed by a
/// `PEXPIREAT` with the absolute deadline, so replaying the log later does not restart it.
fn log_record(command: &Command, args: &[Bytes]) -> Vec<u8> {
    match command {
        Command::SetWithTtl(cmd) if !cmd.ttl.is_zero() => {
            let key = Bytes::from(cmd.key.clone());
            let deadline = unix_millis(SystemTime::now() + cmd.ttl);
            let set = Frame::command(&[Bytes::from_static(b"SET"), key.clone(), cmd.value.clone()]);
            let expire = Frame::command(&[
                Bytes::from_static(b"PEXPIREAT"),
                key,
                Bytes::from(deadline.to_string()),
            ]);
            [set.serialize(), expire.serialize()].concat()
        }
        _ => Frame::command(args).serialize(),
    }
}

impl Default for Database {
    fn default() -> Self {
        Database::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aof::{self, SyncPolicy};
    use crate::codec::FrameCodec;
    use bytes::BytesMut;
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio_util::codec::Decoder;

    fn args(parts: &[&str]) -> Vec<Bytes> {
        parts
            .iter()
            .map(|part| Bytes::copy_from_slice(part.as_bytes()))
            .collect()
    }

    #[test]
    fn set_get_del() {
        let db = Database::default();

        assert_eq!(
            db.exec(0, args(&["SET", "k", "v"])).unwrap(),
            Frame::Simple("OK".to_string())
        );
        assert_eq!(
            db.exec(0, args(&["GET", "k"])).unwrap(),
            Frame::Bulk(Some(Bytes::from("v")))
        );
        assert_eq!(db.exec(0, args(&["DEL", "k"])).unwrap(), Frame::Integer(1));
        assert_eq!(db.exec(0, args(&["DEL", "k"])).unwrap(), Frame::Integer(0));
    }

    #[test]
    fn failed_set_does_not_create_the_key() {
        let db = Database::default();

        let err = db.exec(0, args(&["SET", "k"])).unwrap_err();

        assert!(matches!(err, CommandError::WrongArity { .. }));
        assert_eq!(db.exec(0, args(&["GET", "k"])).unwrap(), Frame::Bulk(None));
        assert!(db.partition(0).unwrap().is_empty());
    }

    #[test]
    fn out_of_range_partition() {
        let db = Database::default();

        let err = db.exec(99, args(&["GET", "k"])).unwrap_err();

        assert_eq!(err, CommandError::IndexOutOfRange);
        assert!(db.partition(PARTITIONS).is_err());
    }

    #[test]
    fn select_is_validated_but_stateless() {
        let db = Database::default();

        assert_eq!(
            db.exec(0, args(&["SELECT", "3"])).unwrap(),
            Frame::Simple("OK".to_string())
        );
        assert_eq!(
            db.exec(0, args(&["SELECT", "16"])).unwrap_err(),
            CommandError::IndexOutOfRange
        );

        db.exec(0, args(&["SET", "k", "v"])).unwrap();
        assert_eq!(db.exec(3, args(&["GET", "k"])).unwrap(), Frame::Bulk(None));
    }

    #[test]
    fn partitions_are_independent() {
        let db = Database::default();

        db.exec(0, args(&["SET", "k", "zero"])).unwrap();
        db.exec(1, args(&["SET", "k", "one"])).unwrap();
        db.exec(1, args(&["FLUSHDB"])).unwrap();

        assert_eq!(
            db.exec(0, args(&["GET", "k"])).unwrap(),
            Frame::Bulk(Some(Bytes::from("zero")))
        );
        assert_eq!(db.exec(1, args(&["DBSIZE"])).unwrap(), Frame::Integer(0));
    }

    #[test]
    fn partitions_share_the_capacity_setting() {
        let db = Database::new(4);

        db.exec(0, args(&["SET", "a", "1"])).unwrap();
        db.exec(0, args(&["SET", "b", "2"])).unwrap();
        db.exec(0, args(&["SET", "c", "3"])).unwrap();

        assert_eq!(db.exec(0, args(&["GET", "a"])).unwrap(), Frame::Bulk(None));
        assert_eq!(db.partition(0).unwrap().capacity(), 4);
        assert_eq!(db.partition(0).unwrap().used_bytes(), 4);
    }

    #[tokio::test]
    async fn only_successful_writes_are_logged() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.aof");

        let db = Database::default().with_aof(Aof::open(&path, SyncPolicy::Always).unwrap());
        db.exec(0, args(&["SET", "k", "v"])).unwrap();
        db.exec(0, args(&["GET", "k"])).unwrap();
        db.exec(0, args(&["SET", "k"])).unwrap_err();
        db.exec(2, args(&["SELECT", "1"])).unwrap();
        db.exec(0, args(&["DEL", "k"])).unwrap();
        db.close().await.unwrap();

        let expected = [
            Frame::command(&args(&["SELECT", "0"])).serialize(),
            Frame::command(&args(&["SET", "k", "v"])).serialize(),
            Frame::command(&args(&["DEL", "k"])).serialize(),
        ]
        .concat();
        assert_eq!(fs::read(&path).unwrap(), expected);
    }

    #[tokio::test]
    async fn ttl_is_logged_as_a_deadline() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.aof");

        let db = Database::default().with_aof(Aof::open(&path, SyncPolicy::Always).unwrap());
        let before = unix_millis(SystemTime::now());
        db.exec(0, args(&["SETWITHTTL", "k", "v", "60000"])).unwrap();
        let after = unix_millis(SystemTime::now());
        db.close().await.unwrap();

        let contents = fs::read(&path).unwrap();
        let head = [
            Frame::command(&args(&["SELECT", "0"])).serialize(),
            Frame::command(&args(&["SET", "k", "v"])).serialize(),
        ]
        .concat();
        assert!(contents.starts_with(&head));

        let mut tail = BytesMut::from(&contents[head.len()..]);
        let frame = FrameCodec::default()
            .decode(&mut tail)
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(tail.is_empty());

        let command = Command::try_from(frame.into_args().unwrap()).unwrap();
        let Command::PExpireAt(expire) = command else {
            panic!("unexpected record {command:?}");
        };
        assert_eq!(expire.key, "k");
        assert!(expire.timestamp >= before + 60_000, "{}", expire.timestamp);
        assert!(expire.timestamp <= after + 60_000, "{}", expire.timestamp);
    }

    #[tokio::test]
    async fn expired_key_stays_expired_after_replay() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.aof");

        let db = Database::default().with_aof(Aof::open(&path, SyncPolicy::Always).unwrap());
        db.exec(0, args(&["SETWITHTTL", "gone", "v", "50"])).unwrap();
        db.exec(0, args(&["SETWITHTTL", "kept", "v", "60000"])).unwrap();
        db.exec(0, args(&["SETWITHTTL", "forever", "v", "0"])).unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(db.exec(0, args(&["GET", "gone"])).unwrap(), Frame::Bulk(None));
        db.close().await.unwrap();

        let restored = Database::default();
        aof::replay(&path, &restored).await.unwrap();

        assert_eq!(
            restored.exec(0, args(&["GET", "gone"])).unwrap(),
            Frame::Bulk(None)
        );
        assert_eq!(
            restored.exec(0, args(&["GET", "kept"])).unwrap(),
            Frame::Bulk(Some(Bytes::from("v")))
        );
        assert_eq!(
            restored.exec(0, args(&["GET", "forever"])).unwrap(),
            Frame::Bulk(Some(Bytes::from("v")))
        );
        assert_eq!(restored.partition(0).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn replay_reproduces_direct_execution() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.aof");

        let commands = [
            (0, &["SET", "a", "1"][..]),
            (0, &["SET", "b", "2"][..]),
            (4, &["SET", "a", "four"][..]),
            (0, &["DEL", "a", "missing"][..]),
            (0, &["SET", "c", "3"][..]),
            (4, &["SET", "d", "4"][..]),
            (0, &["SET", "b", "22"][..]),
        ];

        let db = Database::default().with_aof(Aof::open(&path, SyncPolicy::No).unwrap());
        for (index, command) in commands {
            db.exec(index, args(command)).unwrap();
        }
        db.close().await.unwrap();

        let restored = Database::default();
        let applied = aof::replay(&path, &restored).await.unwrap();
        assert_eq!(applied, commands.len());

        for index in [0, 4] {
            for key in ["a", "b", "c", "d"] {
                assert_eq!(
                    restored.exec(index, args(&["GET", key])).unwrap(),
                    db.exec(index, args(&["GET", key])).unwrap(),
                    "partition {index} key {key}"
                );
            }
            assert_eq!(
                restored.partition(index).unwrap().len(),
                db.partition(index).unwrap().len()
            );
        }
    }
}
