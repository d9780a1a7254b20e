use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::commands::executable::Executable;
use crate::commands::{CommandError, CommandParser};
use crate::db::Value;
use crate::frame::Frame;
use crate::store::Store;

/// Make `key` expire at `timestamp`, given in milliseconds since the Unix epoch. A timestamp that
/// already passed deletes the key. Replies 1 when the key existed and 0 otherwise.
///
/// Ref: <https://redis.io/docs/latest/commands/pexpireat/>
#[derive(Debug, PartialEq)]
pub struct PExpireAt {
    pub key: String,
    pub timestamp: i64,
}

impl Executable for PExpireAt {
    fn exec(self, store: &Store<Value>) -> Result<Frame, CommandError> {
        let now = unix_millis(SystemTime::now());

        let updated = match u64::try_from(self.timestamp.saturating_sub(now)) {
            Ok(left) if left > 0 => store.expire(&self.key, Duration::from_millis(left)),
            _ => store.remove(&self.key),
        };

        Ok(Frame::Integer(i64::from(updated)))
    }
}

impl TryFrom<&mut CommandParser> for PExpireAt {
    type Error = CommandError;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let key = parser.next_string()?;
        let timestamp = parser.next_integer()?;

        Ok(Self { key, timestamp })
    }
}

/// Milliseconds between the Unix epoch and `time`, zero for anything before it.
pub fn unix_millis(time: SystemTime) -> i64 {
    time.duration_since(UNIX_EPOCH)
        .map(|elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}
