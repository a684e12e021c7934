use std::time::Duration;

use async_trait::async_trait;
use bitcoin::Txid;
use futures_util::StreamExt;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::types::{Address, Outpoint};

pub mod sse;
pub mod types;

pub use sse::OwnerEventStream;
pub use types::{
    BroadcastCallback, BroadcastResponse, ChainHeader, ContentInfo, OrdfsMetadata, StreamMessage,
    SyncOutput, TokenDetails, TokenTxData, TxStatus,
};

pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Indexer call failure. `NotFound` is a domain signal for several decoders
/// (absent metadata, unknown token), not a fault.
#[derive(Error, Debug, Clone)]
pub enum ApiError {
    #[error("not found")]
    NotFound,

    #[error("http {0}: {1}")]
    Http(u16, String),

    #[error("transport error: {0}")]
    Transport(String),
}

impl ApiError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ApiError::NotFound)
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        ApiError::Transport(err.to_string())
    }
}

/// Typed surface over the upstream indexer's HTTP + SSE endpoints.
#[async_trait]
pub trait IndexerApi: Send + Sync {
    /// Self-contained transaction bytes (with ancestor proofs).
    async fn fetch_beef(&self, txid: &Txid) -> Result<Vec<u8>, ApiError>;

    /// Raw transaction bytes.
    async fn fetch_raw_tx(&self, txid: &Txid) -> Result<Vec<u8>, ApiError>;

    /// Merkle-path bytes for a mined transaction.
    async fn fetch_proof(&self, txid: &Txid) -> Result<Vec<u8>, ApiError>;

    async fn tip(&self) -> Result<ChainHeader, ApiError>;

    async fn header_at(&self, height: u64) -> Result<ChainHeader, ApiError>;

    /// `count` raw 80-byte headers starting at `height`, concatenated.
    async fn headers(&self, height: u64, count: u64) -> Result<Vec<u8>, ApiError>;

    async fn ordfs_metadata(
        &self,
        outpoint: &Outpoint,
        seq: Option<u64>,
    ) -> Result<OrdfsMetadata, ApiError>;

    async fn ordfs_content(&self, outpoint: &Outpoint)
    -> Result<(Vec<u8>, ContentInfo), ApiError>;

    async fn token_details(&self, token_id: &str) -> Result<TokenDetails, ApiError>;

    async fn token_tx(&self, token_id: &str, txid: &Txid) -> Result<TokenTxData, ApiError>;

    async fn broadcast(
        &self,
        raw_tx: Vec<u8>,
        callback: Option<BroadcastCallback>,
    ) -> Result<BroadcastResponse, ApiError>;

    /// Open the owner sync stream, delivering outputs affecting `owners`
    /// starting at `from`.
    async fn subscribe_owner_events(
        &self,
        owners: &[Address],
        from: f64,
    ) -> Result<OwnerEventStream, ApiError>;
}

pub struct HttpIndexerClient {
    http: reqwest::Client,
    // no request timeout; the owner stream stays open until the server is done
    stream_http: reqwest::Client,
    base_url: String,
}

impl HttpIndexerClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(DEFAULT_HTTP_TIMEOUT)
            .build()?;

        let stream_http = reqwest::Client::builder().build()?;

        Ok(Self {
            http,
            stream_http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        let status = response.status();

        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ApiError::NotFound);
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Http(status.as_u16(), body));
        }

        Ok(response)
    }

    async fn get_bytes(&self, path: &str) -> Result<Vec<u8>, ApiError> {
        let response = self.http.get(self.url(path)).send().await?;
        let response = Self::check(response).await?;
        Ok(response.bytes().await?.to_vec())
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let response = self.http.get(self.url(path)).send().await?;
        let response = Self::check(response).await?;
        Ok(response.json().await?)
    }
}

#[async_trait]
impl IndexerApi for HttpIndexerClient {
    async fn fetch_beef(&self, txid: &Txid) -> Result<Vec<u8>, ApiError> {
        self.get_bytes(&format!("/api/beef/{txid}")).await
    }

    async fn fetch_raw_tx(&self, txid: &Txid) -> Result<Vec<u8>, ApiError> {
        self.get_bytes(&format!("/api/beef/{txid}/raw")).await
    }

    async fn fetch_proof(&self, txid: &Txid) -> Result<Vec<u8>, ApiError> {
        self.get_bytes(&format!("/api/beef/{txid}/proof")).await
    }

    async fn tip(&self) -> Result<ChainHeader, ApiError> {
        self.get_json("/api/chaintracks/tip").await
    }

    async fn header_at(&self, height: u64) -> Result<ChainHeader, ApiError> {
        self.get_json(&format!("/api/chaintracks/header/height/{height}"))
            .await
    }

    async fn headers(&self, height: u64, count: u64) -> Result<Vec<u8>, ApiError> {
        self.get_bytes(&format!(
            "/api/chaintracks/headers?height={height}&count={count}"
        ))
        .await
    }

    async fn ordfs_metadata(
        &self,
        outpoint: &Outpoint,
        seq: Option<u64>,
    ) -> Result<OrdfsMetadata, ApiError> {
        let path = match seq {
            Some(seq) => format!("/api/ordfs/metadata/{outpoint}:{seq}"),
            None => format!("/api/ordfs/metadata/{outpoint}"),
        };

        self.get_json(&path).await
    }

    async fn ordfs_content(
        &self,
        outpoint: &Outpoint,
    ) -> Result<(Vec<u8>, ContentInfo), ApiError> {
        let response = self.http.get(self.url(&format!("/content/{outpoint}"))).send().await?;
        let response = Self::check(response).await?;

        let header = |name: &str| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(|v| v.to_string())
        };

        let info = ContentInfo {
            content_type: header("content-type"),
            outpoint: header("x-outpoint"),
            origin: header("x-origin"),
            seq: header("x-ord-seq").and_then(|v| v.parse().ok()),
            map: header("x-map").and_then(|v| serde_json::from_str(&v).ok()),
            parent: header("x-parent"),
        };

        let bytes = response.bytes().await?.to_vec();

        Ok((bytes, info))
    }

    async fn token_details(&self, token_id: &str) -> Result<TokenDetails, ApiError> {
        self.get_json(&format!("/api/bsv21/{token_id}")).await
    }

    async fn token_tx(&self, token_id: &str, txid: &Txid) -> Result<TokenTxData, ApiError> {
        self.get_json(&format!("/api/bsv21/{token_id}/tx/{txid}"))
            .await
    }

    async fn broadcast(
        &self,
        raw_tx: Vec<u8>,
        callback: Option<BroadcastCallback>,
    ) -> Result<BroadcastResponse, ApiError> {
        let mut request = self
            .http
            .post(self.url("/api/arcade/tx"))
            .header("content-type", "application/octet-stream")
            .body(raw_tx);

        if let Some(callback) = callback {
            request = request.header("X-CallbackUrl", callback.url);
            if let Some(token) = callback.token {
                request = request.header("X-CallbackToken", token);
            }
        }

        let response = Self::check(request.send().await?).await?;
        Ok(response.json().await?)
    }

    async fn subscribe_owner_events(
        &self,
        owners: &[Address],
        from: f64,
    ) -> Result<OwnerEventStream, ApiError> {
        let query: String = owners
            .iter()
            .map(|owner| format!("owner={owner}&"))
            .collect();

        let url = self.url(&format!("/api/owner/sync?{query}from={from}"));

        debug!(%url, "opening owner event stream");

        let response = Self::check(self.stream_http.get(&url).send().await?).await?;

        let (tx, rx) = mpsc::channel(64);

        let task = tokio::spawn(async move {
            let mut parser = sse::SseParser::new();
            let mut stream = response.bytes_stream();

            while let Some(chunk) = stream.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(err) => {
                        let _ = tx.send(Err(ApiError::Transport(err.to_string()))).await;
                        return;
                    }
                };

                for event in parser.push(&chunk) {
                    let Some(message) = sse::to_stream_message(&event) else {
                        warn!(event = ?event.event, "unknown stream event");
                        continue;
                    };

                    let done = matches!(message, Ok(StreamMessage::Done));

                    if tx.send(message).await.is_err() || done {
                        return;
                    }
                }
            }
        });

        Ok(OwnerEventStream::new(rx, task))
    }
}
