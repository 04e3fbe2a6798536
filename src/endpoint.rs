use std::{net::SocketAddr, sync::Arc};

use tokio::{net::UdpSocket, sync::mpsc, task::JoinHandle};

use crate::error::{Error, Result};

/// Delivers `(payload, sender_addr)` for every received datagram.
pub type Sink = mpsc::UnboundedSender<(Vec<u8>, SocketAddr)>;

const MAX_DATAGRAM: usize = 1500;

/// A single bound UDP socket used for both sending and receiving.
///
/// Reusing one socket for both directions is mandatory for hole punching:
/// the source port a peer presents to the remote side must be the same
/// port STUN measured. A separate "send socket" bound to a different
/// ephemeral port — seen in early drafts of this design — breaks NAT
/// traversal.
pub struct Endpoint {
    socket: Option<Arc<UdpSocket>>,
    recv_task: Option<JoinHandle<()>>,
}

impl Endpoint {
    pub fn new() -> Self {
        Self { socket: None, recv_task: None }
    }

    pub fn is_bound(&self) -> bool {
        self.socket.is_some()
    }

    /// Bind and spawn the receive task. Fails with `Error::BindFailed` if
    /// the bind itself fails (e.g. `EADDRINUSE`).
    pub async fn start(&mut self, local_ip: std::net::IpAddr, local_port: u16, sink: Sink) -> Result<u16> {
        let socket = UdpSocket::bind((local_ip, local_port))
            .await
            .map_err(|e| Error::BindFailed(e.to_string()))?;

        let bound_port = socket
            .local_addr()
            .map_err(|e| Error::BindFailed(e.to_string()))?
            .port();

        let socket = Arc::new(socket);
        let recv_socket = socket.clone();
        let recv_task = tokio::spawn(async move {
            receive_loop(recv_socket, sink).await;
        });

        self.socket = Some(socket);
        self.recv_task = Some(recv_task);
        Ok(bound_port)
    }

    /// Idempotent: closing an already-closed (or never-started) endpoint is
    /// a no-op.
    pub async fn stop(&mut self) {
        self.socket = None;
        if let Some(task) = self.recv_task.take() {
            task.abort();
        }
    }

    /// Enqueue a single outbound datagram on the shared socket. Fails with
    /// `Error::SendFailed` on a syscall failure (transient, never a
    /// connection-level failure) or `Error::PreconditionUnmet` if the
    /// endpoint isn't bound.
    pub async fn send(&self, payload: &[u8], dst: SocketAddr) -> Result<()> {
        let socket = self
            .socket
            .as_ref()
            .ok_or(Error::PreconditionUnmet("endpoint is not bound"))?;

        socket
            .send_to(payload, dst)
            .await
            .map(|_| ())
            .map_err(|e| Error::SendFailed(e.to_string()))
    }

    /// A cheap, `'static`, cloneable send handle sharing this endpoint's
    /// socket — used by tasks (the punch sender) that must outlive a single
    /// borrow of the `Endpoint` itself.
    pub fn sender(&self) -> Result<DatagramSender> {
        self.socket
            .clone()
            .map(DatagramSender)
            .ok_or(Error::PreconditionUnmet("endpoint is not bound"))
    }
}

#[derive(Clone)]
pub struct DatagramSender(Arc<UdpSocket>);

impl DatagramSender {
    pub async fn send(&self, payload: &[u8], dst: SocketAddr) -> Result<()> {
        self.0
            .send_to(payload, dst)
            .await
            .map(|_| ())
            .map_err(|e| Error::SendFailed(e.to_string()))
    }
}

impl Default for Endpoint {
    fn default() -> Self {
        Self::new()
    }
}

async fn receive_loop(socket: Arc<UdpSocket>, sink: Sink) {
    let mut buf = vec![0u8; MAX_DATAGRAM];

    loop {
        let (size, addr) = match socket.recv_from(&mut buf).await {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::ConnectionReset => {
                log::warn!("endpoint: connection reset on recv, continuing");
                continue;
            }
            Err(e) => {
                log::info!("endpoint: socket closed, receive task exiting ({e})");
                return;
            }
        };

        log::trace!("endpoint: received {size} bytes from {addr}");
        if sink.send((buf[..size].to_vec(), addr)).is_err() {
            log::info!("endpoint: dispatcher gone, receive task exiting");
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn start_stop_is_idempotent_and_frees_the_port() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut endpoint = Endpoint::new();
        let port = endpoint
            .start("127.0.0.1".parse().unwrap(), 0, tx)
            .await
            .unwrap();
        assert!(port > 0);
        assert!(endpoint.is_bound());

        endpoint.stop().await;
        endpoint.stop().await;
        assert!(!endpoint.is_bound());
    }

    #[tokio::test]
    async fn send_before_bind_fails_with_precondition_unmet() {
        let endpoint = Endpoint::new();
        let err = endpoint
            .send(b"hi", "127.0.0.1:1".parse().unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PreconditionUnmet(_)));
    }

    #[tokio::test]
    async fn round_trips_a_datagram_between_two_endpoints() {
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();

        let mut a = Endpoint::new();
        let port_a = a.start("127.0.0.1".parse().unwrap(), 0, tx_a).await.unwrap();

        let mut b = Endpoint::new();
        let _port_b = b.start("127.0.0.1".parse().unwrap(), 0, tx_b).await.unwrap();

        b.send(b"hello", format!("127.0.0.1:{port_a}").parse().unwrap())
            .await
            .unwrap();

        let (payload, _from) = rx_a.recv().await.unwrap();
        assert_eq!(payload, b"hello");

        drop(rx_b);
        a.stop().await;
        b.stop().await;
    }
}
