//! Readwise tag source.

use std::collections::{BTreeSet, HashSet};
use std::time::Duration;

use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{debug, info};

use tagsync_core::error::{Result, TagsyncError};

pub const DEFAULT_API_URL: &str = "https://readwise.io";
pub const DEFAULT_TOKEN_ENV: &str = "READWISE_TOKEN";

const SOURCE_NAME: &str = "readwise";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct TagPage {
    #[serde(default)]
    results: Vec<TagEntry>,
    #[serde(default)]
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TagEntry {
    #[serde(default)]
    name: Option<String>,
}

fn unavailable(reason: impl Into<String>) -> TagsyncError {
    TagsyncError::SourceUnavailable {
        source_name: SOURCE_NAME.to_string(),
        reason: reason.into(),
    }
}

pub struct ReadwiseClient {
    base_url: String,
    token: String,
    token_env: String,
    client: reqwest::Client,
}

impl ReadwiseClient {
    /// Build a client with the token read from `token_env`.
    ///
    /// # Errors
    ///
    /// [`TagsyncError::SourceUnavailable`] if the variable is unset or empty.
    pub fn from_env(base_url: &str, token_env: &str) -> Result<Self> {
        let token = std::env::var(token_env)
            .ok()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| {
                unavailable(format!(
                    "token not found in environment variable {token_env}"
                ))
            })?;
        Self::new(base_url, token, token_env)
    }

    /// # Errors
    ///
    /// [`TagsyncError::SourceUnavailable`] if the HTTP client cannot be built.
    pub fn new(base_url: &str, token: String, token_env: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| unavailable(format!("cannot build HTTP client: {e}")))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            token_env: token_env.to_string(),
            client,
        })
    }

    /// Every tag name, following pagination, sorted and deduplicated.
    ///
    /// # Errors
    ///
    /// [`TagsyncError::SourceUnavailable`] on any transport, HTTP or decoding
    /// failure. Authorization failures name the token variable.
    pub async fn fetch_tags(&self) -> Result<Vec<String>> {
        info!(url = %self.base_url, "fetching tags from Readwise");
        let mut tags = BTreeSet::new();
        let mut seen = HashSet::new();
        let mut next = Some(format!("{}/api/v2/tags/", self.base_url));

        while let Some(url) = next.take() {
            if !seen.insert(url.clone()) {
                return Err(unavailable(format!("pagination loops back to {url}")));
            }
            let page = self.fetch_page(&url).await?;
            debug!(url = %url, count = page.results.len(), "fetched tag page");
            tags.extend(page.results.into_iter().filter_map(|t| t.name));
            next = page.next.filter(|n| !n.is_empty());
        }

        info!(count = tags.len(), "fetched Readwise tags");
        Ok(tags.into_iter().collect())
    }

    async fn fetch_page(&self, url: &str) -> Result<TagPage> {
        let resp = self
            .client
            .get(url)
            .header("Authorization", format!("Token {}", self.token))
            .send()
            .await
            .map_err(|e| unavailable(format!("request failed: {e}")))?;

        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(unavailable(format!(
                "unauthorized ({status}); verify that {} holds a valid Readwise API token",
                self.token_env
            )));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            debug!(%status, body = %body, "Readwise error response");
            return Err(unavailable(format!("HTTP {status}")));
        }

        resp.json::<TagPage>()
            .await
            .map_err(|e| unavailable(format!("unexpected response: {e}")))
    }
}
