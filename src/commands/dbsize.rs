use crate::commands::executable::Executable;
use crate::commands::{CommandError, CommandParser};
use crate::db::Value;
use crate::frame::Frame;
use crate::store::Store;

/// Return the number of keys in the currently-selected database.
///
/// Ref: <https://redis.io/docs/latest/commands/dbsize/>
#[derive(Debug, PartialEq)]
pub struct DBSize;

impl Executable for DBSize {
    fn exec(self, store: &Store<Value>) -> Result<Frame, CommandError> {
        Ok(Frame::Integer(store.len() as i64))
    }
}

impl TryFrom<&mut CommandParser> for DBSize {
    type Error = CommandError;

    fn try_from(_parser: &mut CommandParser) -> Result<Self, Self::Error> {
        Ok(Self)
    }
}
