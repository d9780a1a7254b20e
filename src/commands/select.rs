use crate::commands::executable::Executable;
use crate::commands::{CommandError, CommandParser};
use crate::db::{Value, PARTITIONS};
use crate::frame::Frame;
use crate::store::Store;

/// Select the logical database having the specified zero-based numeric index. New connections
/// always use the database 0.
///
/// Executing it changes nothing: the caller owns the selected index and switches to it once the
/// command succeeds.
///
/// Ref: <https://redis.io/docs/latest/commands/select>
#[derive(Debug, PartialEq)]
pub struct Select {
    pub index: usize,
}

impl Executable for Select {
    fn exec(self, _store: &Store<Value>) -> Result<Frame, CommandError> {
        Ok(Frame::Simple("OK".to_string()))
    }
}

impl TryFrom<&mut CommandParser> for Select {
    type Error = CommandError;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let index = parser.next_integer()?;

        match usize::try_from(index) {
            Ok(index) if index < PARTITIONS => Ok(Self { index }),
            _ => Err(CommandError::IndexOutOfRange),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::tests::args;
    use crate::commands::Command;

    #[test]
    fn valid_index() {
        let cmd = Command::try_from(args(&["SELECT", "15"])).unwrap();

        assert_eq!(cmd, Command::Select(Select { index: 15 }));
    }

    #[test]
    fn out_of_range() {
        for index in ["16", "-1", "99"] {
            let err = Command::try_from(args(&["SELECT", index])).unwrap_err();
            assert_eq!(err, CommandError::IndexOutOfRange);
        }
    }

    #[test]
    fn not_a_number() {
        let err = Command::try_from(args(&["SELECT", "one"])).unwrap_err();

        assert_eq!(err, CommandError::NotAnInteger);
    }

    #[test]
    fn arity() {
        let err = Command::try_from(args(&["SELECT"])).unwrap_err();
        assert!(matches!(err, CommandError::WrongArity { .. }));

        let err = Command::try_from(args(&["SELECT", "1", "2"])).unwrap_err();
        assert!(matches!(err, CommandError::WrongArity { .. }));
    }
}
