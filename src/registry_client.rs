use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PeerEntry {
    pub public_ip: IpAddr,
    pub public_port: u16,
}

/// HTTP client for the signaling registry described in spec.md §6.
///
/// All operations are idempotent at the registry level; transient HTTP
/// errors are surfaced here, not retried — retry policy belongs to the
/// keep-alive loop and the join/leave operations.
pub struct RegistryClient {
    base_url: String,
    http: reqwest::Client,
}

impl RegistryClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            http: reqwest::Client::new(),
        }
    }

    pub async fn insert(&self, entry: PeerEntry) -> Result<()> {
        let res = self
            .http
            .post(format!("{}/nodes", self.base_url))
            .json(&entry)
            .send()
            .await
            .map_err(|e| Error::RegistryUnavailable(e.to_string()))?;

        expect_success(res).await
    }

    pub async fn update(&self, entry: PeerEntry) -> Result<()> {
        let res = self
            .http
            .put(format!("{}/nodes", self.base_url))
            .json(&entry)
            .send()
            .await
            .map_err(|e| Error::RegistryUnavailable(e.to_string()))?;

        expect_success(res).await
    }

    pub async fn delete(&self, public_ip: IpAddr, public_port: u16) -> Result<()> {
        let res = self
            .http
            .delete(format!("{}/nodes", self.base_url))
            .query(&[("public_ip", public_ip.to_string()), ("public_port", public_port.to_string())])
            .send()
            .await
            .map_err(|e| Error::RegistryUnavailable(e.to_string()))?;

        expect_success(res).await
    }

    pub async fn list(&self) -> Result<Vec<PeerEntry>> {
        let res = self
            .http
            .get(format!("{}/nodes", self.base_url))
            .send()
            .await
            .map_err(|e| Error::RegistryUnavailable(e.to_string()))?;

        if !res.status().is_success() {
            return Err(Error::RegistryUnavailable(format!("list: status {}", res.status())));
        }

        res.json()
            .await
            .map_err(|e| Error::RegistryUnavailable(e.to_string()))
    }
}

async fn expect_success(res: reqwest::Response) -> Result<()> {
    if res.status().is_success() {
        Ok(())
    } else {
        Err(Error::RegistryUnavailable(format!("status {}", res.status())))
    }
}
