use std::{fs::read_to_string, net::IpAddr};

use clap::Parser;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Registry {
    /// base URL of the signaling registry's HTTP API.
    #[serde(default = "Registry::base_url")]
    pub base_url: String,
}

impl Registry {
    fn base_url() -> String {
        "http://127.0.0.1:8088".to_string()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self { base_url: Self::base_url() }
    }
}

#[derive(Debug, Deserialize)]
pub struct Stun {
    #[serde(default = "Stun::host")]
    pub host: String,
    #[serde(default = "Stun::port")]
    pub port: u16,
}

impl Stun {
    fn host() -> String {
        "stun.l.google.com".to_string()
    }

    fn port() -> u16 {
        19302
    }
}

impl Default for Stun {
    fn default() -> Self {
        Self { host: Self::host(), port: Self::port() }
    }
}

#[derive(Debug, Deserialize)]
pub struct Bind {
    /// bind address for the datagram endpoint. Defaults to unspecified.
    #[serde(default = "Bind::local_ip")]
    pub local_ip: IpAddr,
    /// the single port used both for STUN discovery and the bound socket —
    /// Invariant P1 of spec.md §3 depends on these being the same value.
    #[serde(default = "Bind::local_port")]
    pub local_port: u16,
}

impl Bind {
    fn local_ip() -> IpAddr {
        "0.0.0.0".parse().unwrap()
    }

    fn local_port() -> u16 {
        0
    }
}

impl Default for Bind {
    fn default() -> Self {
        Self { local_ip: Self::local_ip(), local_port: Self::local_port() }
    }
}

#[derive(Debug, Deserialize)]
pub struct Timing {
    #[serde(default = "Timing::keep_alive_interval_secs")]
    pub keep_alive_interval_secs: u64,
    #[serde(default = "Timing::connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "Timing::punch_attempts")]
    pub punch_attempts: u32,
    #[serde(default = "Timing::punch_spacing_secs")]
    pub punch_spacing_secs: u64,
}

impl Timing {
    fn keep_alive_interval_secs() -> u64 {
        30
    }

    fn connect_timeout_secs() -> u64 {
        30
    }

    fn punch_attempts() -> u32 {
        30
    }

    fn punch_spacing_secs() -> u64 {
        1
    }
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            keep_alive_interval_secs: Self::keep_alive_interval_secs(),
            connect_timeout_secs: Self::connect_timeout_secs(),
            punch_attempts: Self::punch_attempts(),
            punch_spacing_secs: Self::punch_spacing_secs(),
        }
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

#[derive(Debug, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub registry: Registry,
    #[serde(default)]
    pub stun: Stun,
    #[serde(default)]
    pub bind: Bind,
    #[serde(default)]
    pub timing: Timing,
    #[serde(default)]
    pub log: Log,
}

#[derive(Parser)]
#[command(about = "Peer runtime for UDP hole punching over a signaling registry")]
struct Cli {
    /// path to a TOML config file.
    #[arg(long)]
    config: Option<String>,

    /// public peer to rendezvous with once joined, as `ip:port`.
    #[arg(long)]
    connect: Option<String>,
}

impl Config {
    /// Load command line parameters, layering an optional config file over
    /// built-in defaults, the way `turn-server`'s own `Config::load` does.
    pub fn load() -> (Self, Option<String>) {
        let cli = Cli::parse();
        let cfg_str = cli
            .config
            .and_then(|path| read_to_string(path).ok())
            .unwrap_or_default();

        let config = toml::from_str(&cfg_str).expect("read peer config file failed!");
        (config, cli.connect)
    }
}
