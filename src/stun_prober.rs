use std::{
    net::{IpAddr, SocketAddr, ToSocketAddrs, UdpSocket as StdUdpSocket},
    time::Duration,
};

use socket2::{Domain, Socket, Type};

use crate::error::{Error, Result};

const READ_TIMEOUT: Duration = Duration::from_secs(3);

/// Discover this peer's reflexive `(ip, port)` by sending a classical STUN
/// Binding request from `local_port` — the same port the datagram endpoint
/// will later bind (Invariant P1: otherwise the reflexive mapping describes
/// a different NAT binding than the one actually used to communicate).
///
/// This runs synchronously at the wire level, so callers MUST dispatch it
/// to a blocking-friendly executor (`tokio::task::spawn_blocking`) rather
/// than calling it directly from the event loop.
pub fn discover(
    stun_host: &str,
    stun_port: u16,
    local_ip: IpAddr,
    local_port: u16,
) -> Result<(IpAddr, u16)> {
    let server_addr = resolve(stun_host, stun_port)?;
    let socket = bind_reusable(local_ip, local_port)?;
    socket
        .set_read_timeout(Some(READ_TIMEOUT))
        .map_err(|e| Error::DiscoveryFailed(e.to_string()))?;

    let transaction_id = stun::new_transaction_id();
    let request = stun::encode_binding_request(&transaction_id);
    socket
        .send_to(&request, server_addr)
        .map_err(|e| Error::DiscoveryFailed(e.to_string()))?;

    let mut buf = [0u8; 512];
    let size = socket
        .recv(&mut buf)
        .map_err(|e| Error::DiscoveryFailed(e.to_string()))?;

    stun::decode_binding_response(&buf[..size], &transaction_id)
        .map(|addr| (addr.ip(), addr.port()))
        .map_err(|e| Error::DiscoveryFailed(e.to_string()))
}

fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
    (host, port)
        .to_socket_addrs()
        .map_err(|e| Error::DiscoveryFailed(e.to_string()))?
        .next()
        .ok_or_else(|| Error::DiscoveryFailed(format!("could not resolve {host}:{port}")))
}

/// Bind with `SO_REUSEADDR`/`SO_REUSEPORT` so this transient probing socket
/// can share `local_port` with the datagram endpoint that binds there
/// immediately after (on join) or that is already bound there (on a
/// keep-alive re-probe).
fn bind_reusable(local_ip: IpAddr, local_port: u16) -> Result<StdUdpSocket> {
    let domain = if local_ip.is_ipv4() { Domain::IPV4 } else { Domain::IPV6 };
    let socket = Socket::new(domain, Type::DGRAM, None)
        .map_err(|e| Error::DiscoveryFailed(e.to_string()))?;

    socket
        .set_reuse_address(true)
        .map_err(|e| Error::DiscoveryFailed(e.to_string()))?;
    #[cfg(unix)]
    socket
        .set_reuse_port(true)
        .map_err(|e| Error::DiscoveryFailed(e.to_string()))?;

    socket
        .bind(&SocketAddr::new(local_ip, local_port).into())
        .map_err(|e| Error::DiscoveryFailed(e.to_string()))?;

    Ok(socket.into())
}
