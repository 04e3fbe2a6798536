use std::{fs::read_to_string, net::SocketAddr, path::PathBuf};

use clap::Parser;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Server {
    /// address the registry's HTTP API listens on.
    #[serde(default = "Server::listen")]
    pub listen: SocketAddr,
}

impl Server {
    fn listen() -> SocketAddr {
        "127.0.0.1:8088".parse().unwrap()
    }
}

impl Default for Server {
    fn default() -> Self {
        Self { listen: Self::listen() }
    }
}

#[derive(Debug, Deserialize)]
pub struct Storage {
    /// path of the JSON file the peer entries are persisted to.
    #[serde(default = "Storage::path")]
    pub path: PathBuf,
}

impl Storage {
    fn path() -> PathBuf {
        PathBuf::from("nodes.json")
    }
}

impl Default for Storage {
    fn default() -> Self {
        Self { path: Self::path() }
    }
}

#[derive(Debug, Deserialize)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl Default for LogLevel {
    fn default() -> Self {
        Self::Info
    }
}

impl LogLevel {
    pub fn as_level(&self) -> log::Level {
        match *self {
            Self::Error => log::Level::Error,
            Self::Warn => log::Level::Warn,
            Self::Info => log::Level::Info,
            Self::Debug => log::Level::Debug,
            Self::Trace => log::Level::Trace,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct Log {
    #[serde(default)]
    pub level: LogLevel,
}

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: Server,
    #[serde(default)]
    pub storage: Storage,
    #[serde(default)]
    pub log: Log,
}

#[derive(Parser)]
#[command(about = "Signaling registry for the peer rendezvous overlay")]
struct Cli {
    /// path to a TOML config file.
    #[arg(long)]
    config: Option<String>,
}

impl Config {
    pub fn load() -> Self {
        let cfg_str = Cli::parse()
            .config
            .and_then(|path| read_to_string(path).ok())
            .unwrap_or_default();

        toml::from_str(&cfg_str).expect("read registry config file failed!")
    }
}
