pub mod config;
pub mod endpoint;
pub mod error;
pub mod keepalive;
pub mod peer;
pub mod registry_client;
pub mod rendezvous;
pub mod runtime;
pub mod shared;
pub mod stun_prober;

pub use error::{Error, Result};
pub use runtime::PeerRuntime;
pub use shared::ConnectionStatus;
