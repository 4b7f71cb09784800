//! Paginated upstream source fetchers.
//!
//! One module per upstream source: contribution credits, issue comments (with
//! uid resolution and batched node lookups), and merge requests (listing +
//! detail enrichment). All fetchers share the same acquisition discipline:
//! consult the cache first, page strictly in ascending order with a politeness
//! delay, unwrap inconsistently-shaped payloads defensively, normalize rows
//! through field-alias tables, and turn mid-sequence failures into partial
//! results instead of errors.

pub mod comments;
pub mod credits;
pub mod gitlab;
mod shape;

use std::sync::Arc;

use reqwest::Client;
use serde_json::Value;
use tracing::debug;

use orgpulse_cache::CacheStore;
use orgpulse_shared::{OrgPulseError, Result, SessionConfig};

/// User-Agent string for API requests.
const USER_AGENT: &str = concat!("orgpulse/", env!("CARGO_PKG_VERSION"));

/// Client timeout for API requests.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Fixed politeness delay between page requests. Not configurable per call:
/// naive parallelization would defeat the upstream-courtesy intent, so the
/// delay is a constant of the fetchers themselves.
pub(crate) const PAGE_DELAY: std::time::Duration = std::time::Duration::from_millis(200);

/// Sentinel for rows missing an attributable value.
pub(crate) const UNKNOWN: &str = "unknown";

/// Progress callback invoked with the cumulative record count after each page.
pub type ProgressFn<'a> = &'a (dyn Fn(usize) + Send + Sync);

// ---------------------------------------------------------------------------
// Sources
// ---------------------------------------------------------------------------

/// Handle bundling the HTTP client, cache store, and upstream endpoints for
/// all source fetchers.
pub struct Sources {
    http: Client,
    cache: Arc<CacheStore>,
    credits_base: String,
    platform_base: String,
    gitlab_base: String,
    gitlab_token: Option<String>,
}

impl Sources {
    /// Create a sources handle from a session configuration.
    pub fn new(config: &SessionConfig, cache: Arc<CacheStore>) -> Result<Self> {
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(5))
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| OrgPulseError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            cache,
            credits_base: config.credits_api_base.clone(),
            platform_base: config.platform_api_base.clone(),
            gitlab_base: config.gitlab_api_base.clone(),
            gitlab_token: config.gitlab_token.clone(),
        })
    }

    /// GET a JSON payload, treating any non-2xx status as an error.
    pub(crate) async fn fetch_json(&self, url: &str, token: Option<&str>) -> Result<Value> {
        debug!(url, "fetching json");

        let mut request = self.http.get(url);
        if let Some(token) = token {
            request = request.header("PRIVATE-TOKEN", token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| OrgPulseError::Network(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(OrgPulseError::Network(format!("{url}: HTTP {status}")));
        }

        response
            .json()
            .await
            .map_err(|e| OrgPulseError::parse(format!("{url}: invalid JSON: {e}")))
    }

    /// GET a listing payload and defensively unwrap it into rows.
    /// An unrecognized payload shape degrades to an empty page.
    pub(crate) async fn fetch_rows(&self, url: &str) -> Result<Vec<Value>> {
        let payload = self.fetch_json(url, None).await?;
        Ok(shape::unwrap_rows(&payload).cloned().unwrap_or_default())
    }
}

impl std::fmt::Debug for Sources {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sources")
            .field("credits_base", &self.credits_base)
            .field("platform_base", &self.platform_base)
            .field("gitlab_base", &self.gitlab_base)
            .field("gitlab_token", &self.gitlab_token.is_some())
            .finish_non_exhaustive()
    }
}

/// URL-encode a single query/path component.
pub(crate) fn encode(component: &str) -> String {
    url::form_urlencoded::byte_serialize(component.as_bytes()).collect()
}
