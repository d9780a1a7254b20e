pub mod client;
pub mod dbsize;
pub mod del;
pub mod executable;
pub mod flushdb;
pub mod get;
pub mod pexpireat;
pub mod ping;
pub mod select;
pub mod set;
pub mod setwithttl;

use bytes::Bytes;
use std::{str, vec};
use thiserror::Error as ThisError;

use crate::aof;
use crate::commands::executable::Executable;
use crate::db::Value;
use crate::frame::Frame;
use crate::store::Store;

use client::Client;
use dbsize::DBSize;
use del::Del;
use flushdb::FlushDb;
use get::Get;
use pexpireat::PExpireAt;
use ping::Ping;
use select::Select;
use set::Set;
use setwithttl::SetWithTtl;

#[derive(Debug, PartialEq)]
pub enum Command {
    DBsize(DBSize),
    Del(Del),
    FlushDb(FlushDb),
    Get(Get),
    PExpireAt(PExpireAt),
    Set(Set),
    SetWithTtl(SetWithTtl),

    Client(Client),
    Ping(Ping),
    Select(Select),
}

impl Command {
    /// The upper-case command name, as it appears on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Client(_) => "CLIENT",
            Command::DBsize(_) => "DBSIZE",
            Command::Del(_) => "DEL",
            Command::FlushDb(_) => "FLUSHDB",
            Command::Get(_) => "GET",
            Command::PExpireAt(_) => "PEXPIREAT",
            Command::Ping(_) => "PING",
            Command::Select(_) => "SELECT",
            Command::Set(_) => "SET",
            Command::SetWithTtl(_) => "SETWITHTTL",
        }
    }

    /// Whether the command changes the data set and therefore goes to the append-only file.
    pub fn is_write(&self) -> bool {
        aof::is_write_command(self.name())
    }
}

impl Executable for Command {
    fn exec(self, store: &Store<Value>) -> Result<Frame, CommandError> {
        match self {
            Command::Client(cmd) => cmd.exec(store),
            Command::DBsize(cmd) => cmd.exec(store),
            Command::Del(cmd) => cmd.exec(store),
            Command::FlushDb(cmd) => cmd.exec(store),
            Command::Get(cmd) => cmd.exec(store),
            Command::PExpireAt(cmd) => cmd.exec(store),
            Command::Ping(cmd) => cmd.exec(store),
            Command::Select(cmd) => cmd.exec(store),
            Command::Set(cmd) => cmd.exec(store),
            Command::SetWithTtl(cmd) => cmd.exec(store),
        }
    }
}

impl TryFrom<Vec<Bytes>> for Command {
    type Error = CommandError;

    fn try_from(args: Vec<Bytes>) -> Result<Self, Self::Error> {
        let mut parts = args.into_iter();
        let name = parts.next().ok_or(CommandError::Empty)?;
        let name = str::from_utf8(&name)?.to_uppercase();

        let parser = &mut CommandParser {
            name: name.clone(),
            parts,
        };

        let command = match &name[..] {
            "CLIENT" => Client::try_from(&mut *parser).map(Command::Client),
            "DBSIZE" => DBSize::try_from(&mut *parser).map(Command::DBsize),
            "DEL" => Del::try_from(&mut *parser).map(Command::Del),
            "FLUSHDB" => FlushDb::try_from(&mut *parser).map(Command::FlushDb),
            "GET" => Get::try_from(&mut *parser).map(Command::Get),
            "PEXPIREAT" => PExpireAt::try_from(&mut *parser).map(Command::PExpireAt),
            "PING" => Ping::try_from(&mut *parser).map(Command::Ping),
            "SELECT" => Select::try_from(&mut *parser).map(Command::Select),
            "SET" => Set::try_from(&mut *parser).map(Command::Set),
            "SETWITHTTL" => SetWithTtl::try_from(&mut *parser).map(Command::SetWithTtl),
            _ => Err(CommandError::UnknownCommand { command: name }),
        }?;

        parser.finish()?;
        Ok(command)
    }
}

/// Walks the arguments that follow the command name.
pub struct CommandParser {
    name: String,
    parts: vec::IntoIter<Bytes>,
}

impl CommandParser {
    fn next_bytes(&mut self) -> Result<Bytes, CommandError> {
        self.parts.next().ok_or_else(|| self.wrong_arity())
    }

    fn next_string(&mut self) -> Result<String, CommandError> {
        let bytes = self.next_bytes()?;
        let string = str::from_utf8(&bytes)?;
        Ok(string.to_string())
    }

    fn next_integer(&mut self) -> Result<i64, CommandError> {
        let bytes = self.next_bytes()?;
        str::from_utf8(&bytes)
            .ok()
            .and_then(|s| s.parse::<i64>().ok())
            .ok_or(CommandError::NotAnInteger)
    }

    fn has_next(&self) -> bool {
        self.parts.len() > 0
    }

    /// Every argument has to be consumed by the command.
    fn finish(&self) -> Result<(), CommandError> {
        if self.has_next() {
            return Err(self.wrong_arity());
        }
        Ok(())
    }

    fn wrong_arity(&self) -> CommandError {
        CommandError::WrongArity {
            command: self.name.to_lowercase(),
        }
    }
}

#[derive(Debug, ThisError, PartialEq)]
pub enum CommandError {
    #[error("ERR empty command")]
    Empty,
    #[error("ERR unknown command '{command}'")]
    UnknownCommand { command: String },
    #[error("ERR wrong number of arguments for '{command}' command")]
    WrongArity { command: String },
    #[error("ERR value is not an integer or out of range")]
    NotAnInteger,
    #[error("ERR DB index is out of range")]
    IndexOutOfRange,
    #[error("ERR invalid UTF-8 string")]
    InvalidUtf8String(#[from] str::Utf8Error),
}
