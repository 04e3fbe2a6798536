use std::fmt;

/// Error kinds surfaced by the peer runtime's public operations, per the
/// propagation policy in spec.md §7.
#[derive(Debug)]
pub enum Error {
    /// STUN was unreachable, or its response could not be parsed.
    DiscoveryFailed(String),
    /// An HTTP call to the signaling registry failed.
    RegistryUnavailable(String),
    /// The local UDP socket bind was refused (typically `EADDRINUSE`).
    BindFailed(String),
    /// `connect_to` was invoked before `join_network`, or against a peer
    /// missing a public address.
    PreconditionUnmet(&'static str),
    /// A rendezvous did not complete before its deadline.
    Timeout,
    /// A single datagram send failed. Transient; callers must not treat
    /// this as a connection-level failure.
    SendFailed(String),
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DiscoveryFailed(reason) => write!(f, "stun discovery failed: {reason}"),
            Self::RegistryUnavailable(reason) => write!(f, "registry unavailable: {reason}"),
            Self::BindFailed(reason) => write!(f, "socket bind failed: {reason}"),
            Self::PreconditionUnmet(reason) => write!(f, "precondition unmet: {reason}"),
            Self::Timeout => write!(f, "rendezvous timed out"),
            Self::SendFailed(reason) => write!(f, "datagram send failed: {reason}"),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
