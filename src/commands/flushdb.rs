use crate::commands::executable::Executable;
use crate::commands::{CommandError, CommandParser};
use crate::db::Value;
use crate::frame::Frame;
use crate::store::Store;

/// Delete all the keys of the currently selected database.
///
/// Ref: <https://redis.io/docs/latest/commands/flushdb/>
#[derive(Debug, PartialEq)]
pub struct FlushDb;

impl Executable for FlushDb {
    fn exec(self, store: &Store<Value>) -> Result<Frame, CommandError> {
        store.clear();
        Ok(Frame::Simple("OK".to_string()))
    }
}

impl TryFrom<&mut CommandParser> for FlushDb {
    type Error = CommandError;

    fn try_from(_parser: &mut CommandParser) -> Result<Self, Self::Error> {
        Ok(Self)
    }
}
