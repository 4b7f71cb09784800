//! Issue-comment fetcher, uid resolution, and batched node lookups.
//!
//! The comment listing is queried per author uid in descending creation
//! order, so pagination stops early once rows age out of the lookback window.
//! Comment rows reference a parent content node by id only; attributing a
//! comment to a project requires the separate batched node lookup, cached per
//! node so repeated runs amortize the cost.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::time::sleep;
use tracing::{debug, instrument, warn};

use orgpulse_cache::cache_key;
use orgpulse_shared::{CommentEvent, FetchOutcome, IssueDetails};

use crate::shape::{date_field, string_field, u64_field};
use crate::{PAGE_DELAY, Sources, UNKNOWN, encode};

/// Defensive cap on comment pages per user.
const MAX_PAGES_PER_USER: u32 = 10;

/// A page with fewer rows than this is taken as the last one. The endpoint
/// does not expose total counts or next-page links.
const LAST_PAGE_THRESHOLD: usize = 10;

/// Node ids are looked up in batches of this size.
const NODE_BATCH_SIZE: usize = 10;

// Field-alias tables, highest priority first.
const CID_ALIASES: &[&str] = &["cid"];
const NODE_REF_ALIASES: &[&str] = &["node.id", "nid"];
const CREATED_ALIASES: &[&str] = &["created", "timestamp"];
const UID_ALIASES: &[&str] = &["uid"];
const NODE_ID_ALIASES: &[&str] = &["nid", "id"];
const NODE_TYPE_ALIASES: &[&str] = &["type"];
const NODE_PROJECT_ALIASES: &[&str] = &["field_project.id", "field_project_machine_name"];

impl Sources {
    /// Resolve a username to its numeric uid via the cached user lookup.
    ///
    /// Failure is soft: an unreachable endpoint or unknown name yields `None`
    /// and that member simply contributes no comments to the session.
    pub async fn resolve_uid(&self, username: &str) -> Option<u64> {
        let key = cache_key("uid", &[("name", username.to_string())]);
        if let Some(uid) = self.cache.get::<u64>(&key).await {
            return Some(uid);
        }

        let url = format!("{}/user.json?name={}", self.platform_base, encode(username));
        let rows = match self.fetch_rows(&url).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!(username, error = %e, "uid resolution failed");
                return None;
            }
        };

        let uid = rows.first().and_then(|row| u64_field(row, UID_ALIASES))?;
        self.cache.set(&key, &uid).await;
        Some(uid)
    }

    /// Fetch comments authored by `uid`, newest first, back to `since`.
    ///
    /// Rows older than `since` end the fetch (the listing is sorted by
    /// creation date descending) and are not collected. `project_key` and
    /// `author_username` are left unset here; the orchestrator fills them in.
    #[instrument(skip_all, fields(uid = uid))]
    pub async fn comments_for_user(
        &self,
        uid: u64,
        since: DateTime<Utc>,
    ) -> FetchOutcome<CommentEvent> {
        let key = cache_key(
            "comments",
            &[
                ("uid", uid.to_string()),
                ("since", since.timestamp().to_string()),
            ],
        );
        if let Some(cached) = self.cache.get::<Vec<CommentEvent>>(&key).await {
            debug!(comments = cached.len(), "comments served from cache");
            return FetchOutcome::complete(cached);
        }

        let mut events: Vec<CommentEvent> = Vec::new();
        let mut page: u32 = 0;
        let mut reached_window_edge = false;

        loop {
            let url = format!(
                "{}/comment.json?uid={}&sort=created&direction=DESC&page={}",
                self.platform_base, uid, page
            );

            let rows = match self.fetch_rows(&url).await {
                Ok(rows) => rows,
                Err(e) => {
                    warn!(uid, page, error = %e, "comment page failed, keeping prior pages");
                    return if page == 0 {
                        FetchOutcome::failed(e.to_string())
                    } else {
                        FetchOutcome::partial(events, page, e.to_string())
                    };
                }
            };

            if rows.is_empty() {
                break;
            }
            let undersized = rows.len() < LAST_PAGE_THRESHOLD;

            for row in &rows {
                let Some(created_at) = date_field(row, CREATED_ALIASES) else {
                    debug!(uid, "comment row without parsable timestamp, skipped");
                    continue;
                };
                if created_at < since {
                    reached_window_edge = true;
                    break;
                }
                events.push(CommentEvent {
                    comment_id: u64_field(row, CID_ALIASES).unwrap_or(0),
                    node_id: u64_field(row, NODE_REF_ALIASES).unwrap_or(0),
                    author_uid: uid,
                    author_username: None,
                    created_at,
                    project_key: None,
                });
            }

            if reached_window_edge {
                break;
            }
            page += 1;
            if undersized || page >= MAX_PAGES_PER_USER {
                break;
            }
            sleep(PAGE_DELAY).await;
        }

        debug!(uid, comments = events.len(), "comment fetch complete");
        self.cache.set(&key, &events).await;
        FetchOutcome::complete(events)
    }

    /// Resolve node ids to their content type and owning project, in batches.
    ///
    /// Each node's details are cached individually. A failed batch is skipped
    /// (its comments keep `project_key` unset); remaining batches still run.
    #[instrument(skip_all, fields(nodes = node_ids.len()))]
    pub async fn issue_details(&self, node_ids: &[u64]) -> HashMap<u64, IssueDetails> {
        let mut results = HashMap::new();
        let mut to_fetch: Vec<u64> = Vec::new();

        for &nid in node_ids {
            if let Some(details) = self.cache.get::<IssueDetails>(&node_key(nid)).await {
                let _ = results.insert(nid, details);
            } else {
                to_fetch.push(nid);
            }
        }

        if to_fetch.is_empty() {
            return results;
        }
        debug!(cached = results.len(), to_fetch = to_fetch.len(), "node lookup");

        for batch in to_fetch.chunks(NODE_BATCH_SIZE) {
            // Indexed array parameters: nid[0]=…&nid[1]=…
            let params = batch
                .iter()
                .enumerate()
                .map(|(i, nid)| format!("nid[{i}]={nid}"))
                .collect::<Vec<_>>()
                .join("&");
            let url = format!("{}/node.json?{}", self.platform_base, params);

            let rows = match self.fetch_rows(&url).await {
                Ok(rows) => rows,
                Err(e) => {
                    warn!(batch = batch.len(), error = %e, "node batch lookup failed");
                    continue;
                }
            };

            for row in &rows {
                let Some(nid) = u64_field(row, NODE_ID_ALIASES) else {
                    continue;
                };
                let details = IssueDetails {
                    node_type: string_field(row, NODE_TYPE_ALIASES).unwrap_or_default(),
                    project_key: string_field(row, NODE_PROJECT_ALIASES)
                        .unwrap_or_else(|| UNKNOWN.into()),
                };
                self.cache.set(&node_key(nid), &details).await;
                let _ = results.insert(nid, details);
            }
        }

        results
    }
}

fn node_key(nid: u64) -> String {
    cache_key("node", &[("nid", nid.to_string())])
}
