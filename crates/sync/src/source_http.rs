//! JSON-over-HTTP client for the scraper service.

use std::time::Duration;

use {async_trait::async_trait, serde::de::DeserializeOwned, tracing::debug};

use crate::{
    Error, Result,
    source::DataSourceClient,
    types::{HealthStatus, SourceSyncResult, SyncResult},
};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(300);
const DEFAULT_HEALTH_TIMEOUT: Duration = Duration::from_secs(10);

/// Talks to a scraper service exposing `/health` and `/sync/{events,news,all}`.
pub struct HttpDataSource {
    client: reqwest::Client,
    base_url: String,
    health_timeout: Duration,
}

impl HttpDataSource {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        Self::with_timeouts(base_url, DEFAULT_REQUEST_TIMEOUT, DEFAULT_HEALTH_TIMEOUT)
    }

    pub fn with_timeouts(
        base_url: impl Into<String>,
        request_timeout: Duration,
        health_timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .user_agent(concat!("racefeed/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            health_timeout,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn post_sync<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        debug!(path, "requesting sync from data source");
        let response = self.client.post(self.url(path)).send().await?;
        decode(response).await
    }
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let status = response.status();
    if !status.is_success() {
        let path = response.url().path().to_string();
        let body = response.text().await.unwrap_or_default();
        let snippet: String = body.chars().take(200).collect();
        return Err(Error::data_source(format!(
            "{path} returned {status}: {snippet}"
        )));
    }
    Ok(response.json::<T>().await?)
}

#[async_trait]
impl DataSourceClient for HttpDataSource {
    async fn check_health(&self) -> Result<HealthStatus> {
        let response = self
            .client
            .get(self.url("/health"))
            .timeout(self.health_timeout)
            .send()
            .await?;
        decode(response).await
    }

    async fn sync_events(&self) -> Result<SourceSyncResult> {
        self.post_sync("/sync/events").await
    }

    async fn sync_news(&self) -> Result<SourceSyncResult> {
        self.post_sync("/sync/news").await
    }

    async fn sync_all(&self) -> Result<SyncResult> {
        self.post_sync("/sync/all").await
    }
}
