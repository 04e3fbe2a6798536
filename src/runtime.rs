use std::{
    net::{IpAddr, SocketAddr, UdpSocket as StdUdpSocket},
    sync::{atomic::Ordering, Arc},
    time::Duration,
};

use parking_lot::Mutex as SyncMutex;
use tokio::{sync::mpsc, task::JoinHandle};

use crate::config::Config;
use crate::endpoint::Endpoint;
use crate::error::{Error, Result};
use crate::peer::Peer;
use crate::registry_client::{PeerEntry, RegistryClient};
use crate::rendezvous::RendezvousEngine;
use crate::shared::{ConnectionStatus, Shared};

/// Ties the endpoint, STUN prober, registry client, rendezvous engine, and
/// keep-alive loop together into the single object a driver (the CLI
/// binary, or an integration test) talks to.
///
/// Two background tasks run for the lifetime of a `PeerRuntime`: the
/// dispatcher (reads every received datagram off the endpoint's sink and
/// routes it through the rendezvous engine) and, only while joined, the
/// keep-alive loop.
pub struct PeerRuntime {
    shared: Arc<Shared>,
    keepalive_handle: SyncMutex<Option<JoinHandle<()>>>,
    _dispatcher_handle: JoinHandle<()>,
    stun_host: String,
    stun_port: u16,
    keep_alive_interval: Duration,
    connect_timeout: Duration,
    punch_attempts: u32,
    punch_spacing: Duration,
}

impl PeerRuntime {
    pub fn new(config: &Config) -> Self {
        let peer = Peer::new(config.bind.local_ip, config.bind.local_port);
        let (sink, mut rx) = mpsc::unbounded_channel();

        let shared = Arc::new(Shared {
            peer: tokio::sync::Mutex::new(peer),
            endpoint: tokio::sync::Mutex::new(Endpoint::new()),
            registry: RegistryClient::new(config.registry.base_url.clone()),
            rendezvous: RendezvousEngine::new(),
            status: SyncMutex::new(ConnectionStatus::Off),
            joined: std::sync::atomic::AtomicBool::new(false),
            sink,
        });

        let dispatch_shared = shared.clone();
        let dispatcher_handle = tokio::spawn(async move {
            while let Some((payload, from)) = rx.recv().await {
                let sender = match dispatch_shared.endpoint.lock().await.sender() {
                    Ok(sender) => sender,
                    Err(_) => {
                        log::trace!("runtime: dropping datagram from {from}, endpoint not bound");
                        continue;
                    }
                };
                dispatch_shared.rendezvous.dispatch(&sender, &payload, from).await;
            }
        });

        Self {
            shared,
            keepalive_handle: SyncMutex::new(None),
            _dispatcher_handle: dispatcher_handle,
            stun_host: config.stun.host.clone(),
            stun_port: config.stun.port,
            keep_alive_interval: Duration::from_secs(config.timing.keep_alive_interval_secs),
            connect_timeout: Duration::from_secs(config.timing.connect_timeout_secs),
            punch_attempts: config.timing.punch_attempts,
            punch_spacing: Duration::from_secs(config.timing.punch_spacing_secs),
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.shared.status()
    }

    /// Discover the reflexive address, register it, and bind the
    /// long-lived endpoint. On a bind failure the registry insert made
    /// moments earlier is rolled back, per spec.md §7's propagation table.
    pub async fn join_network(&self) -> Result<()> {
        self.shared.set_status(ConnectionStatus::Connecting);

        let (local_ip, configured_port) = {
            let peer = self.shared.peer.lock().await;
            (peer.local_ip, peer.local_port)
        };
        let local_port = resolve_local_port(local_ip, configured_port)?;

        let stun_host = self.stun_host.clone();
        let stun_port = self.stun_port;
        let (public_ip, public_port) = tokio::task::spawn_blocking(move || {
            crate::stun_prober::discover(&stun_host, stun_port, local_ip, local_port)
        })
        .await
        .map_err(|e| Error::DiscoveryFailed(e.to_string()))??;

        {
            let mut peer = self.shared.peer.lock().await;
            peer.local_port = local_port;
            peer.set_public(public_ip, public_port);
        }

        let entry = PeerEntry { public_ip, public_port };
        if let Err(e) = self.shared.registry.insert(entry).await {
            self.shared.set_status(ConnectionStatus::Error);
            return Err(e);
        }

        let bind_result = {
            let mut endpoint = self.shared.endpoint.lock().await;
            endpoint.start(local_ip, local_port, self.shared.sink.clone()).await
        };

        if let Err(e) = bind_result {
            log::warn!("runtime: bind failed after registering, rolling back registry insert");
            if let Err(rollback_err) = self.shared.registry.delete(public_ip, public_port).await {
                log::error!("runtime: rollback delete also failed, registry now has a stale entry: {rollback_err}");
            }
            self.shared.set_status(ConnectionStatus::Error);
            return Err(e);
        }

        self.shared.joined.store(true, Ordering::Relaxed);
        self.shared.set_status(ConnectionStatus::On);

        let keepalive_shared = self.shared.clone();
        let handle = tokio::spawn(crate::keepalive::run(
            keepalive_shared,
            self.stun_host.clone(),
            self.stun_port,
            self.keep_alive_interval,
        ));
        *self.keepalive_handle.lock() = Some(handle);

        Ok(())
    }

    /// Stops the endpoint unconditionally, then attempts the registry
    /// delete — a failed delete is reported but never blocks the local
    /// teardown, per spec.md §7.
    pub async fn leave_network(&self) -> Result<()> {
        self.shared.joined.store(false, Ordering::Relaxed);
        if let Some(handle) = self.keepalive_handle.lock().take() {
            handle.abort();
        }

        self.shared.endpoint.lock().await.stop().await;
        self.shared.set_status(ConnectionStatus::Off);

        let public_pair = self.shared.peer.lock().await.public_pair();
        let Some((ip, port)) = public_pair else {
            return Ok(());
        };

        self.shared.registry.delete(ip, port).await
    }

    /// Punch `target` until a `pong` arrives or `connect_timeout` elapses.
    pub async fn connect_to(&self, target: SocketAddr) -> Result<()> {
        if !self.shared.joined.load(Ordering::Relaxed) {
            return Err(Error::PreconditionUnmet("not joined"));
        }

        let self_public = self
            .shared
            .peer
            .lock()
            .await
            .public_pair()
            .ok_or(Error::PreconditionUnmet("no discovered public address yet"))?;

        let sender = self.shared.endpoint.lock().await.sender()?;

        self.shared
            .rendezvous
            .connect_to(sender, self_public, target, self.punch_attempts, self.punch_spacing, self.connect_timeout)
            .await
    }
}

/// Resolve the port the endpoint (and the STUN probe pinned to it) will
/// use. A configured non-zero port is used as-is; `0` means "any" and is
/// resolved once here by a throwaway bind so the rest of join_network
/// operates against a concrete value.
fn resolve_local_port(local_ip: IpAddr, configured_port: u16) -> Result<u16> {
    if configured_port != 0 {
        return Ok(configured_port);
    }

    let probe = StdUdpSocket::bind((local_ip, 0)).map_err(|e| Error::BindFailed(e.to_string()))?;
    probe.local_addr().map(|addr| addr.port()).map_err(|e| Error::BindFailed(e.to_string()))
}
