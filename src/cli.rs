//! Command-line flags of `corekv-server`.

use clap::Parser;

use crate::config::{Config, DEFAULT_DATABASES, DEFAULT_PORT, DEFAULT_SETSIZE};

#[derive(Debug, Parser)]
#[command(name = "corekv-server", about = "Single-node in-memory key-value server")]
pub struct Args {
    /// Address to bind.
    #[arg(long, default_value = "127.0.0.1")]
    pub bind: String,

    /// TCP port (0 lets the OS pick one).
    #[arg(long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Reactor fd capacity.
    #[arg(long, default_value_t = DEFAULT_SETSIZE)]
    pub setsize: usize,

    /// Number of databases addressable with SELECT.
    #[arg(long, default_value_t = DEFAULT_DATABASES)]
    pub databases: usize,

    /// Log level filter (error, warn, info, debug, trace).
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl Args {
    pub fn into_config(self) -> Config {
        Config {
            bind: self.bind,
            port: self.port,
            setsize: self.setsize,
            databases: self.databases,
            ..Config::default()
        }
    }
}
