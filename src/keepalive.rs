use std::{
    sync::{atomic::Ordering, Arc},
    time::Duration,
};

use crate::registry_client::PeerEntry;
use crate::shared::Shared;

/// Periodically re-runs STUN discovery, updates the registry on any
/// change, and rebinds the endpoint when the observed port shifts.
///
/// Never returns an error to its caller (there is no caller to return to —
/// it runs for the lifetime of the `join_network`/`leave_network` pair) and
/// never aborts the loop on a single failed tick: a STUN miss or a
/// registry hiccup is logged and retried on the next interval, per
/// spec.md §7.
pub async fn run(
    shared: Arc<Shared>,
    stun_host: String,
    stun_port: u16,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await; // first tick fires immediately; join_network already probed once.

    loop {
        ticker.tick().await;
        if !shared.joined.load(Ordering::Relaxed) {
            return;
        }

        tick(&shared, &stun_host, stun_port).await;
    }
}

async fn tick(shared: &Arc<Shared>, stun_host: &str, stun_port: u16) {
    let (local_ip, local_port, previous_public) = {
        let peer = shared.peer.lock().await;
        (peer.local_ip, peer.local_port, peer.public_pair())
    };

    let stun_host = stun_host.to_string();
    let discovered = tokio::task::spawn_blocking(move || {
        crate::stun_prober::discover(&stun_host, stun_port, local_ip, local_port)
    })
    .await;

    let (public_ip, public_port) = match discovered {
        Ok(Ok(pair)) => pair,
        Ok(Err(e)) => {
            log::warn!("keepalive: stun re-probe failed, keeping last-known address: {e}");
            return;
        }
        Err(e) => {
            log::warn!("keepalive: stun probe task panicked: {e}");
            return;
        }
    };

    if previous_public == Some((public_ip, public_port)) {
        log::trace!("keepalive: reflexive address unchanged ({public_ip}:{public_port})");
        return;
    }

    log::info!("keepalive: reflexive address changed to {public_ip}:{public_port}, updating");

    // Invariant P1: the bound local port must track the reflexive port, so a
    // port migration rebinds the endpoint to the newly observed port, not
    // the stale `local_port` read at the top of this tick.
    if public_port != local_port {
        log::info!("keepalive: observed port shifted from {local_port} to {public_port}, rebinding endpoint");
        let mut endpoint = shared.endpoint.lock().await;
        endpoint.stop().await;
        if let Err(e) = endpoint.start(local_ip, public_port, shared.sink.clone()).await {
            log::error!("keepalive: endpoint rebind failed, connectivity is now degraded: {e}");
            return;
        }
    }

    {
        let mut peer = shared.peer.lock().await;
        peer.set_public(public_ip, public_port);
        peer.local_port = public_port;
    }

    let entry = PeerEntry { public_ip, public_port };
    if let Err(e) = shared.registry.update(entry).await {
        log::warn!("keepalive: registry update failed, will retry next tick: {e}");
    }

    // The registry is keyed by the full (ip, port) pair, so a port
    // migration must delete the old key explicitly — a PUT with a new port
    // inserts a second entry rather than replacing the first.
    if let Some((old_ip, old_port)) = previous_public {
        if let Err(e) = shared.registry.delete(old_ip, old_port).await {
            log::warn!("keepalive: failed to delete stale registry entry {old_ip}:{old_port}: {e}");
        }
    }
}
