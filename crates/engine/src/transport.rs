//! Outbound HTTP to the peer node.
//!
//! Everything the engine sends over the wire goes through `PeerClient`,
//! so protocol logic is testable without a network and the HTTP client
//! lives in exactly one place.

use async_trait::async_trait;
use serde_json::Value;

use edumesh_core::SeedingId;
use edumesh_replication::wire::{CodeResponse, SeedCompleteRequest, SeedRequest, SyncRequest, SyncResponse};

use crate::roles::SyncDestination;

/// Outbound transport error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Http(String),
    #[error("peer returned status {0}")]
    Status(u16),
    #[error("undecodable peer response: {0}")]
    Decode(String),
}

#[async_trait]
pub trait PeerClient: Send + Sync {
    /// `PATCH {url}/api/satellite/sync`.
    async fn deliver_sync(
        &self,
        destination: &SyncDestination,
        request: &SyncRequest,
    ) -> Result<SyncResponse, TransportError>;

    /// `POST {hub}/api/satellite/seedRequest`. The response is returned
    /// raw; the caller type-checks it defensively.
    async fn seed_request(
        &self,
        hub_url: &str,
        request: &SeedRequest,
    ) -> Result<Value, TransportError>;

    /// `POST {hub}/api/satellite/seedComplete`.
    async fn seed_complete(
        &self,
        hub_url: &str,
        request: &SeedCompleteRequest,
    ) -> Result<CodeResponse, TransportError>;

    /// `GET {base}/api/contents/{token}`, with the seed access token
    /// as a bearer when the fetch is part of a bootstrap.
    async fn fetch_contents(
        &self,
        base_url: &str,
        token: &str,
        access_token: Option<&str>,
    ) -> Result<Vec<Value>, TransportError>;

    /// `GET {hub}/api/satellite/seed/{seeding_id}`, gated by the seed
    /// access token issued alongside the seeding id.
    async fn fetch_seed(
        &self,
        hub_url: &str,
        seeding_id: SeedingId,
        access_token: &str,
    ) -> Result<Vec<u8>, TransportError>;

    /// Download one raw object (media file).
    async fn fetch_object(&self, url: &str) -> Result<Vec<u8>, TransportError>;
}

/// reqwest-backed peer client.
#[derive(Debug, Clone)]
pub struct HttpPeerClient {
    client: reqwest::Client,
}

impl HttpPeerClient {
    pub fn new(request_timeout: std::time::Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| TransportError::Http(e.to_string()))?;
        Ok(Self { client })
    }

    async fn decode_json<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, TransportError> {
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()));
        }
        response
            .json::<T>()
            .await
            .map_err(|e| TransportError::Decode(e.to_string()))
    }

    async fn read_bytes(response: reqwest::Response) -> Result<Vec<u8>, TransportError> {
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl PeerClient for HttpPeerClient {
    async fn deliver_sync(
        &self,
        destination: &SyncDestination,
        request: &SyncRequest,
    ) -> Result<SyncResponse, TransportError> {
        let url = format!("{}/api/satellite/sync", destination.url.trim_end_matches('/'));
        let response = self
            .client
            .patch(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))?;
        Self::decode_json(response).await
    }

    async fn seed_request(
        &self,
        hub_url: &str,
        request: &SeedRequest,
    ) -> Result<Value, TransportError> {
        let url = format!("{}/api/satellite/seedRequest", hub_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))?;
        Self::decode_json(response).await
    }

    async fn seed_complete(
        &self,
        hub_url: &str,
        request: &SeedCompleteRequest,
    ) -> Result<CodeResponse, TransportError> {
        let url = format!("{}/api/satellite/seedComplete", hub_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))?;
        Self::decode_json(response).await
    }

    async fn fetch_contents(
        &self,
        base_url: &str,
        token: &str,
        access_token: Option<&str>,
    ) -> Result<Vec<Value>, TransportError> {
        let url = format!("{}/api/contents/{token}", base_url.trim_end_matches('/'));
        let mut request = self.client.get(&url);
        if let Some(bearer) = access_token {
            request = request.bearer_auth(bearer);
        }
        let response = request
            .send()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))?;
        Self::decode_json(response).await
    }

    async fn fetch_seed(
        &self,
        hub_url: &str,
        seeding_id: SeedingId,
        access_token: &str,
    ) -> Result<Vec<u8>, TransportError> {
        let url = format!(
            "{}/api/satellite/seed/{seeding_id}",
            hub_url.trim_end_matches('/')
        );
        let response = self
            .client
            .get(&url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))?;
        Self::read_bytes(response).await
    }

    async fn fetch_object(&self, url: &str) -> Result<Vec<u8>, TransportError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))?;
        Self::read_bytes(response).await
    }
}
