use clap::Parser;
use std::path::PathBuf;

use crate::aof::SyncPolicy;
use crate::codec::DEFAULT_MAX_FRAME_SIZE;
use crate::store::DEFAULT_CAPACITY;

/// Server settings. Every flag can also be set through its `PARTDIS_*` environment variable.
#[derive(Parser, Debug, Clone)]
#[command(version, about = "A small Redis compatible key-value server")]
pub struct Config {
    /// The address to listen on
    #[arg(long, env = "PARTDIS_BIND", default_value = "127.0.0.1")]
    pub bind: String,

    /// The port to listen on
    #[arg(short, long, env = "PARTDIS_PORT", default_value_t = 6379)]
    pub port: u16,

    /// Maximum number of clients served at the same time
    #[arg(long, env = "PARTDIS_MAX_CONNECTIONS", default_value_t = 1000)]
    pub max_connections: usize,

    /// Close a connection after this many idle seconds, 0 disables the timeout
    #[arg(long, env = "PARTDIS_TIMEOUT", default_value_t = 0)]
    pub timeout: u64,

    /// Byte capacity of every logical database, 0 disables eviction
    #[arg(long, env = "PARTDIS_CAPACITY", default_value_t = DEFAULT_CAPACITY)]
    pub capacity: usize,

    /// Log every write command to the append-only file
    #[arg(long, env = "PARTDIS_APPENDONLY")]
    pub appendonly: bool,

    /// Path of the append-only file, read back on startup
    #[arg(long, env = "PARTDIS_APPENDFILENAME", default_value = "partdis.aof")]
    pub appendfilename: PathBuf,

    /// When to sync the append-only file: always, everysec or no
    #[arg(long, env = "PARTDIS_APPENDFSYNC", default_value_t = SyncPolicy::EverySec)]
    pub appendfsync: SyncPolicy,

    /// Largest request the server buffers before giving up on a connection
    #[arg(long, env = "PARTDIS_MAX_FRAME_SIZE", default_value_t = DEFAULT_MAX_FRAME_SIZE)]
    pub max_frame_size: usize,
}

impl Config {
    pub fn address(&self) -> (&str, u16) {
        (&self.bind, self.port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind: "127.0.0.1".to_string(),
            port: 6379,
            max_connections: 1000,
            timeout: 0,
            capacity: DEFAULT_CAPACITY,
            appendonly: false,
            appendfilename: PathBuf::from("partdis.aof"),
            appendfsync: SyncPolicy::EverySec,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_command_line() {
        let parsed = Config::try_parse_from(["partdis"]).unwrap();
        let default = Config::default();

        assert_eq!(parsed.bind, default.bind);
        assert_eq!(parsed.port, default.port);
        assert_eq!(parsed.max_connections, default.max_connections);
        assert_eq!(parsed.timeout, default.timeout);
        assert_eq!(parsed.capacity, default.capacity);
        assert_eq!(parsed.appendonly, default.appendonly);
        assert_eq!(parsed.appendfilename, default.appendfilename);
        assert_eq!(parsed.appendfsync, default.appendfsync);
        assert_eq!(parsed.max_frame_size, default.max_frame_size);
    }

    #[test]
    fn flags() {
        let config = Config::try_parse_from([
            "partdis",
            "--port",
            "7000",
            "--appendonly",
            "--appendfsync",
            "always",
            "--capacity",
            "0",
        ])
        .unwrap();

        assert_eq!(config.port, 7000);
        assert!(config.appendonly);
        assert_eq!(config.appendfsync, SyncPolicy::Always);
        assert_eq!(config.capacity, 0);
    }

    #[test]
    fn unknown_sync_policy() {
        assert!(Config::try_parse_from(["partdis", "--appendfsync", "sometimes"]).is_err());
    }
}
