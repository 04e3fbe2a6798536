use std::{
    collections::HashMap,
    fs,
    net::IpAddr,
    path::{Path, PathBuf},
};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// The serialized projection of a peer: the public pair only. `local_ip`
/// and `local_port` are never transmitted to or stored by the registry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PeerEntry {
    pub public_ip: IpAddr,
    pub public_port: u16,
}

impl PeerEntry {
    fn key(&self) -> String {
        format!("{}:{}", self.public_ip, self.public_port)
    }
}

/// Persisted key/value map of peer entries, keyed by `"<public_ip>:<public_port>"`
/// so inserts and updates are idempotent.
///
/// Persistence is a flat JSON file rewritten on every mutation. This is a
/// signaling registry, not a database: write volume is one flush per
/// join/leave/keep-alive tick across the whole swarm, so a full rewrite is
/// cheap and keeps the dependency list free of an embedded-database crate
/// the rest of the workspace never reaches for.
pub struct Store {
    path: PathBuf,
    entries: RwLock<HashMap<String, PeerEntry>>,
}

impl Store {
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let entries = match fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path,
            entries: RwLock::new(entries),
        })
    }

    pub fn list(&self) -> Vec<PeerEntry> {
        self.entries.read().values().copied().collect()
    }

    /// Upsert a peer entry. Used for both `insert` and `update` — the
    /// registry contract in spec.md §6 makes both idempotent by key.
    pub fn upsert(&self, entry: PeerEntry) -> anyhow::Result<()> {
        self.entries.write().insert(entry.key(), entry);
        self.persist()
    }

    /// Delete is not an error when the entry does not exist.
    pub fn delete(&self, public_ip: IpAddr, public_port: u16) -> anyhow::Result<()> {
        let key = format!("{public_ip}:{public_port}");
        self.entries.write().remove(&key);
        self.persist()
    }

    fn persist(&self) -> anyhow::Result<()> {
        let snapshot = self.entries.read().clone();
        let raw = serde_json::to_string_pretty(&snapshot)?;
        fs::write(&self.path, raw)?;
        Ok(())
    }
}
