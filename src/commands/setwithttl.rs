use bytes::Bytes;
use std::time::Duration;

use crate::commands::executable::Executable;
use crate::commands::{CommandError, CommandParser};
use crate::db::Value;
use crate::frame::Frame;
use crate::store::Store;

/// Set `key` to hold `value` for `ttl` milliseconds. A `ttl` of zero or less stores the value
/// without expiry.
#[derive(Debug, PartialEq)]
pub struct SetWithTtl {
    pub key: String,
    pub value: Bytes,
    pub ttl: Duration,
}

impl Executable for SetWithTtl {
    fn exec(self, store: &Store<Value>) -> Result<Frame, CommandError> {
        store.set_with_ttl(self.key, Value::from(self.value), self.ttl);
        Ok(Frame::Simple("OK".to_string()))
    }
}

impl TryFrom<&mut CommandParser> for SetWithTtl {
    type Error = CommandError;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let key = parser.next_string()?;
        let value = parser.next_bytes()?;
        let millis = parser.next_integer()?;

        let ttl = u64::try_from(millis)
            .map(Duration::from_millis)
            .unwrap_or(Duration::ZERO);

        Ok(Self { key, value, ttl })
    }
}
