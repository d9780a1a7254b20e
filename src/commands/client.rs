use bytes::Bytes;

use crate::commands::executable::Executable;
use crate::commands::{CommandError, CommandParser};
use crate::db::Value;
use crate::frame::Frame;
use crate::store::Store;

/// Client connection management. Clients send `CLIENT SETINFO` and friends right after
/// connecting; every subcommand is accepted and acknowledged without effect.
///
/// Ref: <https://redis.io/docs/latest/commands/client/>
#[derive(Debug, PartialEq)]
pub struct Client {
    pub args: Vec<Bytes>,
}

impl Executable for Client {
    fn exec(self, _store: &Store<Value>) -> Result<Frame, CommandError> {
        Ok(Frame::Simple("OK".to_string()))
    }
}

impl TryFrom<&mut CommandParser> for Client {
    type Error = CommandError;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let mut args = vec![];
        while parser.has_next() {
            args.push(parser.next_bytes()?);
        }

        Ok(Self { args })
    }
}
