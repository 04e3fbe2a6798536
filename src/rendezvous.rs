use std::{
    collections::HashMap,
    net::{IpAddr, SocketAddr},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio::sync::{oneshot, Mutex};

use crate::endpoint::DatagramSender;
use crate::error::{Error, Result};

const PONG: &[u8] = b"pong";
const PUNCH_PREFIX: &str = "punch:";

#[derive(Debug, PartialEq, Eq)]
pub enum WireMessage {
    Punch { sender_public_ip: IpAddr, sender_public_port: u16 },
    Pong,
}

/// Parse a received datagram per the wire grammar in spec.md §6. Anything
/// not matching either grammar is logged and ignored by the caller.
pub fn parse(payload: &[u8]) -> Option<WireMessage> {
    if payload == PONG {
        return Some(WireMessage::Pong);
    }

    let text = std::str::from_utf8(payload).ok()?;
    let rest = text.strip_prefix(PUNCH_PREFIX)?;
    let (ip_text, port_text) = rest.rsplit_once(':')?;
    let sender_public_ip: IpAddr = ip_text.parse().ok()?;
    let sender_public_port: u16 = port_text.parse().ok()?;
    Some(WireMessage::Punch { sender_public_ip, sender_public_port })
}

pub fn encode_punch(public_ip: IpAddr, public_port: u16) -> Vec<u8> {
    format!("{PUNCH_PREFIX}{public_ip}:{public_port}").into_bytes()
}

type TargetKey = (IpAddr, u16);

/// Tracks rendezvous sessions awaiting a `pong`. A `pong` completes *every*
/// outstanding session toward the peer whose public pair matches, since
/// spec.md §4.5 requires tolerating overlapping `connect_to` calls to the
/// same target.
#[derive(Default)]
pub struct Sessions {
    waiters: Mutex<HashMap<TargetKey, Vec<oneshot::Sender<()>>>>,
}

impl Sessions {
    pub fn new() -> Self {
        Self::default()
    }

    async fn register(&self, target: TargetKey) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        self.waiters.lock().await.entry(target).or_default().push(tx);
        rx
    }

    /// Complete every waiter registered against `target`.
    pub async fn complete(&self, target: TargetKey) {
        if let Some(waiters) = self.waiters.lock().await.remove(&target) {
            for waiter in waiters {
                let _ = waiter.send(());
            }
        }
    }
}

/// Drives the punch/pong handshake for a single outbound `connect_to` call.
/// Responsibility for *answering* received punches lives in `dispatch`
/// below, run from the endpoint's single receive task.
pub struct RendezvousEngine {
    sessions: Arc<Sessions>,
}

impl RendezvousEngine {
    pub fn new() -> Self {
        Self { sessions: Arc::new(Sessions::new()) }
    }

    pub fn sessions(&self) -> Arc<Sessions> {
        self.sessions.clone()
    }

    /// Punch `target` up to `attempts` times, spaced `spacing` apart,
    /// stopping early on success, and await completion within `timeout`.
    pub async fn connect_to(
        &self,
        sender: DatagramSender,
        self_public: (IpAddr, u16),
        target: SocketAddr,
        attempts: u32,
        spacing: Duration,
        timeout: Duration,
    ) -> Result<()> {
        let target_key = (target.ip(), target.port());
        let done = self.sessions.register(target_key).await;
        let cancelled = Arc::new(AtomicBool::new(false));

        let punch_payload = encode_punch(self_public.0, self_public.1);
        tokio::spawn(punch_sender(sender, target, punch_payload, attempts, spacing, cancelled.clone()));

        let result = tokio::select! {
            biased;
            recv = done => {
                recv.map_err(|_| Error::Timeout)
            }
            _ = tokio::time::sleep(timeout) => {
                Err(Error::Timeout)
            }
        };

        cancelled.store(true, Ordering::Relaxed);
        result
    }

    /// Dispatch a received datagram: answer a `punch` with a `pong`, or
    /// complete any outstanding session on a `pong`. Every `punch` is
    /// answered unconditionally — the registry is the source of
    /// authorization, and refusing here would prevent the sender from
    /// completing its own handshake in the reverse direction.
    pub async fn dispatch(&self, sender: &DatagramSender, payload: &[u8], from: SocketAddr) {
        match parse(payload) {
            Some(WireMessage::Punch { .. }) => {
                log::trace!("rendezvous: punch from {from}, replying pong");
                if let Err(e) = sender.send(PONG, from).await {
                    log::warn!("rendezvous: pong send to {from} failed: {e}");
                }
            }
            Some(WireMessage::Pong) => {
                log::debug!("rendezvous: pong from {from}");
                self.sessions.complete((from.ip(), from.port())).await;
            }
            None => {
                log::warn!("rendezvous: ignoring {} unrecognized bytes from {from}", payload.len());
            }
        }
    }
}

impl Default for RendezvousEngine {
    fn default() -> Self {
        Self::new()
    }
}

async fn punch_sender(
    sender: DatagramSender,
    target: SocketAddr,
    payload: Vec<u8>,
    attempts: u32,
    spacing: Duration,
    cancelled: Arc<AtomicBool>,
) {
    for attempt in 0..attempts {
        if cancelled.load(Ordering::Relaxed) {
            return;
        }

        if let Err(e) = sender.send(&payload, target).await {
            log::warn!("rendezvous: punch attempt {attempt} to {target} failed: {e}");
        }

        tokio::time::sleep(spacing).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_punch_payload() {
        let payload = encode_punch("203.0.113.1".parse().unwrap(), 40000);
        assert_eq!(
            parse(&payload),
            Some(WireMessage::Punch {
                sender_public_ip: "203.0.113.1".parse().unwrap(),
                sender_public_port: 40000,
            })
        );
    }

    #[test]
    fn parses_pong() {
        assert_eq!(parse(b"pong"), Some(WireMessage::Pong));
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(parse(b"not a known payload"), None);
        assert_eq!(parse(&[0xffu8; 32]), None);
    }

    #[tokio::test]
    async fn pong_completes_every_waiter_on_the_same_target() {
        let sessions = Sessions::new();
        let target = ("203.0.113.5".parse().unwrap(), 40000);
        let a = sessions.register(target).await;
        let b = sessions.register(target).await;

        sessions.complete(target).await;
        assert!(a.await.is_ok());
        assert!(b.await.is_ok());
    }
}
