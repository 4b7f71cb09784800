//! Merge-request fetchers: project listing and per-MR detail enrichment.
//!
//! The listing endpoint is public and paginated like the other sources. The
//! detail endpoint is rate-limited for anonymous callers, so detail requests
//! are only issued when an access token is configured; without one the parsed
//! URL identity is returned with state `Unknown` and no call is attempted.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use tokio::time::sleep;
use tracing::{debug, instrument, warn};

use orgpulse_cache::cache_key;
use orgpulse_shared::{FetchOutcome, MergeRequest, MrState};

use crate::shape::{date_field, string_field, u64_field};
use crate::{PAGE_DELAY, ProgressFn, Sources, encode};

/// Nominal page size for the listing endpoint.
const PAGE_LIMIT: usize = 50;

/// Defensive cap on listing pages per project.
const MAX_PAGES: u32 = 50;

// Field-alias tables, highest priority first.
const IID_ALIASES: &[&str] = &["iid"];
const STATE_ALIASES: &[&str] = &["state"];
const CREATED_ALIASES: &[&str] = &["created_at"];
const MERGED_ALIASES: &[&str] = &["merged_at"];
const CLOSED_ALIASES: &[&str] = &["closed_at"];
const AUTHOR_ALIASES: &[&str] = &["author.username"];
const WEB_URL_ALIASES: &[&str] = &["web_url"];

/// Canonical MR web URL shape: `…/{project_path}/-/merge_requests/{iid}`.
static MR_URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^/(.+)/-/merge_requests/(\d+)$").expect("MR URL regex"));

// ---------------------------------------------------------------------------
// URL parsing
// ---------------------------------------------------------------------------

/// Parse a merge-request web URL into `(project_path, iid)`.
pub fn parse_mr_url(mr_url: &str) -> Option<(String, u64)> {
    let parsed = url::Url::parse(mr_url).ok()?;
    let caps = MR_URL_RE.captures(parsed.path())?;
    let project_path = caps.get(1)?.as_str().to_string();
    let iid = caps.get(2)?.as_str().parse().ok()?;
    Some((project_path, iid))
}

/// The `{state: Unknown}` record returned when a URL cannot be parsed or a
/// detail request is unavailable.
fn placeholder(mr_url: &str, project_path: String, iid: u64) -> MergeRequest {
    MergeRequest {
        url: mr_url.to_string(),
        project_path,
        iid,
        state: MrState::Unknown,
        created_at: chrono::DateTime::UNIX_EPOCH,
        merged_at: None,
        closed_at: None,
        author_username: None,
        web_url: mr_url.to_string(),
    }
}

impl Sources {
    /// Fetch merge requests for a project, optionally filtered by state.
    #[instrument(skip_all, fields(project = %project_path))]
    pub async fn merge_requests(
        &self,
        project_path: &str,
        state: Option<&str>,
        progress: Option<ProgressFn<'_>>,
    ) -> FetchOutcome<MergeRequest> {
        let key = cache_key(
            "mrs",
            &[
                ("project", project_path.to_string()),
                ("state", state.unwrap_or("all").to_string()),
            ],
        );
        if let Some(cached) = self.cache.get::<Vec<MergeRequest>>(&key).await {
            debug!(mrs = cached.len(), "merge requests served from cache");
            return FetchOutcome::complete(cached);
        }

        let state_filter = state
            .map(|s| format!("&state={}", encode(s)))
            .unwrap_or_default();

        let mut records: Vec<MergeRequest> = Vec::new();
        let mut page: u32 = 0;

        loop {
            let url = format!(
                "{}/projects/{}/merge_requests?per_page={}&page={}{}",
                self.gitlab_base,
                encode(project_path),
                PAGE_LIMIT,
                page,
                state_filter
            );

            let rows = match self.fetch_rows(&url).await {
                Ok(rows) => rows,
                Err(e) => {
                    warn!(project_path, page, error = %e, "MR page failed, keeping prior pages");
                    return if page == 0 {
                        FetchOutcome::failed(e.to_string())
                    } else {
                        FetchOutcome::partial(records, page, e.to_string())
                    };
                }
            };

            if rows.is_empty() {
                break;
            }
            let undersized = rows.len() < PAGE_LIMIT;

            records.extend(rows.iter().map(|row| mr_from_row(row, project_path)));
            if let Some(report) = progress {
                report(records.len());
            }

            page += 1;
            if undersized || page >= MAX_PAGES {
                break;
            }
            sleep(PAGE_DELAY).await;
        }

        debug!(project_path, mrs = records.len(), "MR fetch complete");
        self.cache.set(&key, &records).await;
        FetchOutcome::complete(records)
    }

    /// Fetch full detail for one merge request identified by its web URL.
    ///
    /// A URL that does not match the canonical pattern yields a placeholder
    /// with state `Unknown`. Without a configured token this never goes to the
    /// network: the anonymous detail endpoint is aggressively rate-limited, so
    /// only the parsed identity fields are returned.
    pub async fn merge_request_details(&self, mr_url: &str) -> MergeRequest {
        let Some((project_path, iid)) = parse_mr_url(mr_url) else {
            debug!(mr_url, "unparseable MR URL");
            return placeholder(mr_url, String::new(), 0);
        };

        let key = cache_key(
            "mr-detail",
            &[("project", project_path.clone()), ("iid", iid.to_string())],
        );
        if let Some(cached) = self.cache.get::<MergeRequest>(&key).await {
            return cached;
        }

        let Some(token) = self.gitlab_token.as_deref() else {
            return placeholder(mr_url, project_path, iid);
        };

        let url = format!(
            "{}/projects/{}/merge_requests/{}",
            self.gitlab_base,
            encode(&project_path),
            iid
        );

        let payload = match self.fetch_json(&url, Some(token)).await {
            Ok(payload) => payload,
            Err(e) => {
                warn!(mr_url, error = %e, "MR detail fetch failed");
                return placeholder(mr_url, project_path, iid);
            }
        };

        let mut mr = mr_from_row(&payload, &project_path);
        mr.url = mr_url.to_string();
        mr.iid = iid;
        self.cache.set(&key, &mr).await;
        mr
    }
}

/// Normalize one listing/detail payload into a [`MergeRequest`].
fn mr_from_row(row: &Value, project_path: &str) -> MergeRequest {
    let web_url = string_field(row, WEB_URL_ALIASES).unwrap_or_default();
    MergeRequest {
        url: web_url.clone(),
        project_path: project_path.to_string(),
        iid: u64_field(row, IID_ALIASES).unwrap_or(0),
        state: MrState::from_api(&string_field(row, STATE_ALIASES).unwrap_or_default()),
        created_at: date_field(row, CREATED_ALIASES).unwrap_or(chrono::DateTime::UNIX_EPOCH),
        merged_at: date_field(row, MERGED_ALIASES),
        closed_at: date_field(row, CLOSED_ALIASES),
        author_username: string_field(row, AUTHOR_ALIASES),
        web_url,
    }
}
