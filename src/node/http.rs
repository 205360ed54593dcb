//! REST client for a chain node

use super::{Account, BlockStatus, ChainNode, ChainTip, RetryPolicy};
use crate::config::NodeConfig;
use crate::core::{SolvedWork, WorkPackage};
use crate::wallet::SignedTransfer;
use crate::{Error, Result};
use async_trait::async_trait;
use reqwest::{Client, ClientBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use url::Url;

#[derive(Debug, Deserialize)]
struct NonceResponse {
    nonce: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: BlockStatus,
}

#[derive(Debug, Deserialize)]
struct HeightResponse {
    height: Option<u64>,
}

/// Chain node reached over HTTP
pub struct HttpNode {
    client: Client,
    base_url: Url,
    retry: RetryPolicy,
}

impl HttpNode {
    /// Create a client for the node API rooted at `config.url`
    pub fn new(config: &NodeConfig) -> Result<Self> {
        let mut base = config.url.clone();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base)
            .map_err(|e| Error::config(format!("Invalid node URL: {}", e)))?;

        let client = ClientBuilder::new()
            .timeout(config.timeout)
            .build()
            .map_err(Error::from)?;

        Ok(Self {
            client,
            base_url,
            retry: RetryPolicy::from_config(config),
        })
    }

    /// Replace the retry policy
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| Error::network(format!("Failed to build URL for {}: {}", path, e)))
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>> {
        let url = self.url(path)?;
        self.retry
            .execute(path, || {
                let url = url.clone();
                async move {
                    debug!("GET {}", url);
                    let response = self.client.get(url).send().await?;
                    if response.status() == StatusCode::NOT_FOUND {
                        return Ok(None);
                    }
                    let response = check_status(response).await?;
                    Ok(Some(response.json::<T>().await?))
                }
            })
            .await
    }

    async fn post_json<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<Option<T>> {
        let url = self.url(path)?;
        self.retry
            .execute(path, || {
                let url = url.clone();
                async move {
                    debug!("POST {}", url);
                    let response = self.client.post(url).json(body).send().await?;
                    let response = check_status(response).await?;
                    let bytes = response.bytes().await?;
                    if bytes.is_empty() {
                        return Ok(None);
                    }
                    Ok(Some(serde_json::from_slice(&bytes)?))
                }
            })
            .await
    }

    async fn post<B: Serialize + Sync>(&self, path: &str, body: &B) -> Result<()> {
        self.post_json::<B, serde_json::Value>(path, body).await?;
        Ok(())
    }
}

/// Turn non-success responses into errors; server errors are retryable
async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    if status.is_server_error() {
        Err(Error::node(format!("HTTP {}: {}", status, body)))
    } else {
        Err(Error::protocol(format!("Node rejected request: HTTP {}: {}", status, body)))
    }
}

#[async_trait]
impl ChainNode for HttpNode {
    #[instrument(skip(self))]
    async fn get_work(&self) -> Result<WorkPackage> {
        self.get_json("work")
            .await?
            .ok_or_else(|| Error::node("No candidate block available"))
    }

    #[instrument(skip(self))]
    async fn get_account(&self, address: &str) -> Result<Option<Account>> {
        self.get_json(&format!("account/{}", address)).await
    }

    #[instrument(skip(self))]
    async fn pending_nonce(&self, address: &str) -> Result<Option<u64>> {
        let response: Option<NonceResponse> =
            self.get_json(&format!("txs/pending/{}", address)).await?;
        Ok(response.and_then(|r| r.nonce))
    }

    #[instrument(skip(self, txs), fields(count = txs.len()))]
    async fn put_txs(&self, txs: &[SignedTransfer]) -> Result<Vec<SignedTransfer>> {
        Ok(self.post_json("txs", &txs).await?.unwrap_or_default())
    }

    #[instrument(skip(self, txs), fields(count = txs.len()))]
    async fn broadcast_txs(&self, txs: &[SignedTransfer]) -> Result<()> {
        self.post("txs/broadcast", &txs).await
    }

    #[instrument(skip(self, solved), fields(hash = %solved.hash))]
    async fn put_block(&self, solved: &SolvedWork) -> Result<()> {
        self.post("blocks", solved).await
    }

    #[instrument(skip(self, solved), fields(hash = %solved.hash))]
    async fn broadcast_blocks(&self, solved: &SolvedWork) -> Result<()> {
        self.post("blocks/broadcast", solved).await
    }

    #[instrument(skip(self))]
    async fn get_block_status(&self, hash: &str) -> Result<BlockStatus> {
        let response: Option<StatusResponse> =
            self.get_json(&format!("block/{}/status", hash)).await?;
        Ok(response.map(|r| r.status).unwrap_or(BlockStatus::Unknown))
    }

    #[instrument(skip(self))]
    async fn get_block_height(&self, hash: &str) -> Result<Option<u64>> {
        let response: Option<HeightResponse> =
            self.get_json(&format!("block/{}/height", hash)).await?;
        Ok(response.and_then(|r| r.height))
    }

    #[instrument(skip(self))]
    async fn get_blocks_tip(&self) -> Result<ChainTip> {
        self.get_json("tip")
            .await?
            .ok_or_else(|| Error::node("Node has no chain tip"))
    }
}
