use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::Url;

use crate::config::Config;
use crate::error::{Result, StreamError};
use crate::model::{AllData, DataKind, Snapshot, VersionedItem};

pub const LATEST_ALL_PATH: &str = "/sdk/latest-all";
pub const LATEST_FLAGS_PATH: &str = "/sdk/latest-flags";
pub const LATEST_SEGMENTS_PATH: &str = "/sdk/latest-segments";

/// On-demand pulls used when the stream only says that data changed.
///
/// No retries here: the stream processor owns the retry policy.
#[async_trait]
pub trait Requestor: Send + Sync {
    async fn fetch_all(&self) -> Result<Snapshot>;

    async fn fetch_flag(&self, key: &str) -> Result<VersionedItem>;

    async fn fetch_segment(&self, key: &str) -> Result<VersionedItem>;

    async fn fetch_item(&self, kind: DataKind, key: &str) -> Result<VersionedItem> {
        match kind {
            DataKind::Flags => self.fetch_flag(key).await,
            DataKind::Segments => self.fetch_segment(key).await,
        }
    }
}

/// Pulls from the polling endpoints over HTTP.
pub struct HttpRequestor {
    client: reqwest::Client,
    config: Config,
}

impl HttpRequestor {
    pub fn new(config: &Config) -> Self {
        Self {
            client: config.http_client(),
            config: config.clone(),
        }
    }

    /// Pull URL for `path`, with `key` (if any) appended as one
    /// percent-encoded path segment.
    fn url(&self, path: &str, key: Option<&str>) -> Result<Url> {
        let raw = self.config.poll_url(path);
        let mut url =
            Url::parse(&raw).map_err(|e| StreamError::InvalidUrl(format!("{}: {}", raw, e)))?;
        if let Some(key) = key {
            url.path_segments_mut()
                .map_err(|_| StreamError::InvalidUrl(raw.clone()))?
                .pop_if_empty()
                .push(key);
        }
        Ok(url)
    }

    async fn get_json(&self, url: Url) -> Result<serde_json::Value> {
        tracing::debug!(%url, "pulling data");

        let response = self
            .client
            .get(url)
            .header(AUTHORIZATION, &self.config.sdk_key)
            .header(USER_AGENT, &self.config.user_agent)
            .header(ACCEPT, "application/json")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(StreamError::Http {
                status: status.as_u16(),
            });
        }
        Ok(response.json().await?)
    }

    async fn fetch_single(&self, base: &str, key: &str) -> Result<VersionedItem> {
        let value = self.get_json(self.url(base, Some(key))?).await?;
        Ok(VersionedItem::from_json(value, Some(key))?)
    }
}

#[async_trait]
impl Requestor for HttpRequestor {
    async fn fetch_all(&self) -> Result<Snapshot> {
        let value = self.get_json(self.url(LATEST_ALL_PATH, None)?).await?;
        let data: AllData = serde_json::from_value(value)?;
        Ok(data.into_snapshot()?)
    }

    async fn fetch_flag(&self, key: &str) -> Result<VersionedItem> {
        self.fetch_single(LATEST_FLAGS_PATH, key).await
    }

    async fn fetch_segment(&self, key: &str) -> Result<VersionedItem> {
        self.fetch_single(LATEST_SEGMENTS_PATH, key).await
    }
}
