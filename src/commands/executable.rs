use crate::commands::CommandError;
use crate::db::Value;
use crate::frame::Frame;
use crate::store::Store;

pub trait Executable {
    fn exec(self, store: &Store<Value>) -> Result<Frame, CommandError>;
}
