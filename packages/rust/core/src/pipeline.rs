//! End-to-end fetch session: roster → credits → comments → merge requests →
//! aggregation.
//!
//! Sources run sequentially, never in parallel: the per-page politeness delay
//! only means something when one request is in flight at a time. The roster is
//! the only fatal step; every other source degrades to an empty or partial
//! sequence recorded in the session result, and this module alone decides the
//! degraded-but-partial vs. fatal outcome exposed to the caller.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};
use url::Url;

use orgpulse_cache::CacheStore;
use orgpulse_roster::RosterOptions;
use orgpulse_shared::{
    AggregatedData, CommentEvent, CreditRecord, FetchStatus, MergeRequest, MrState, OrgPulseError,
    Person, Result, SessionConfig,
};
use orgpulse_sources::Sources;

use crate::aggregate::{aggregate, month_labels};

/// Namespace prepended to a credit project key to form its repository path
/// when the merge-request project list is derived rather than configured.
const GITLAB_PROJECT_NAMESPACE: &str = "project";

/// Cap on derived merge-request projects per session.
const MAX_DERIVED_PROJECTS: usize = 10;

// ---------------------------------------------------------------------------
// Progress reporting
// ---------------------------------------------------------------------------

/// Progress callback for reporting session status.
pub trait ProgressReporter: Send + Sync {
    /// A transient status string ("Fetching roster...").
    fn phase(&self, status: &str);
    /// Cumulative record count for a source after each parsed page.
    fn source_progress(&self, source: &str, count: usize);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _status: &str) {}
    fn source_progress(&self, _source: &str, _count: usize) {}
}

// ---------------------------------------------------------------------------
// Session result
// ---------------------------------------------------------------------------

/// A non-fatal source failure recorded against the session.
#[derive(Debug, Clone)]
pub struct SourceError {
    pub source: String,
    pub message: String,
}

/// Everything a fetch session produced, including the degraded parts.
#[derive(Debug)]
pub struct SessionResult {
    pub roster: Vec<Person>,
    pub credits: Vec<CreditRecord>,
    pub comments: Vec<CommentEvent>,
    pub merge_requests: Vec<MergeRequest>,
    pub aggregated: AggregatedData,
    pub month_labels: Vec<String>,
    /// Sources that failed or terminated early; their data is empty/partial.
    pub source_errors: Vec<SourceError>,
    pub generated_at: DateTime<Utc>,
}

impl SessionResult {
    /// Whether any source degraded to empty or partial data.
    pub fn is_degraded(&self) -> bool {
        !self.source_errors.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Run a full fetch session and aggregate the results.
///
/// Fails only when the roster cannot be acquired; there is no meaningful
/// aggregation without one.
#[instrument(skip_all, fields(org = %config.org, months = config.months))]
pub async fn run_session(
    config: &SessionConfig,
    cache: Arc<CacheStore>,
    progress: &dyn ProgressReporter,
) -> Result<SessionResult> {
    let mut source_errors: Vec<SourceError> = Vec::new();

    // --- Roster (fatal on failure) ---
    progress.phase("Fetching roster...");
    let roster_url = Url::parse(&config.roster_url)
        .map_err(|e| OrgPulseError::validation(format!("bad roster URL: {e}")))?;
    let roster_opts = RosterOptions {
        proxy_url: config.proxy_url.clone(),
        ..RosterOptions::default()
    };
    let mut roster = orgpulse_roster::fetch_roster(&roster_url, &roster_opts).await?;
    info!(members = roster.len(), "roster fetched");

    let sources = Sources::new(config, cache)?;
    let labels = month_labels(config.months);

    // --- Contribution credits ---
    progress.phase("Fetching contribution credits...");
    let report = |n: usize| progress.source_progress("credits", n);
    let outcome = sources
        .credit_records(&config.org, config.months, Some(&report))
        .await;
    note_status(&mut source_errors, "credits", &outcome.status);
    let credits = outcome.records;

    // --- Comments (per member, uid-resolved) ---
    progress.phase("Fetching issue comments...");
    let since = window_start(&labels);
    let mut comments: Vec<CommentEvent> = Vec::new();
    for person in &mut roster {
        let Some(uid) = sources.resolve_uid(&person.username).await else {
            debug!(username = %person.username, "no uid, member contributes no comments");
            continue;
        };
        person.uid = Some(uid);
        let outcome = sources.comments_for_user(uid, since).await;
        note_status(
            &mut source_errors,
            &format!("comments/{}", person.username),
            &outcome.status,
        );
        comments.extend(outcome.records.into_iter().map(|mut c| {
            c.author_username = Some(person.username.clone());
            c
        }));
        progress.source_progress("comments", comments.len());
    }

    // --- Comment-to-project attribution via node lookup ---
    progress.phase("Resolving issue project links...");
    let node_ids: Vec<u64> = comments
        .iter()
        .map(|c| c.node_id)
        .filter(|&nid| nid != 0)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let details = sources.issue_details(&node_ids).await;
    for comment in &mut comments {
        if let Some(detail) = details.get(&comment.node_id) {
            comment.project_key = Some(detail.project_key.clone());
        }
    }

    // --- Merge requests ---
    progress.phase("Fetching merge requests...");
    let projects = mr_projects(config, &credits);
    let mut merge_requests: Vec<MergeRequest> = Vec::new();
    for project in &projects {
        let report = |n: usize| progress.source_progress("merge requests", n);
        let outcome = sources.merge_requests(project, None, Some(&report)).await;
        note_status(&mut source_errors, &format!("mrs/{project}"), &outcome.status);
        merge_requests.extend(outcome.records);
    }

    // Listing rows with an unrecognized state get the detail treatment when a
    // token makes that endpoint usable
    if config.gitlab_token.is_some() {
        for mr in &mut merge_requests {
            if mr.state == MrState::Unknown && !mr.web_url.is_empty() {
                let web_url = mr.web_url.clone();
                *mr = sources.merge_request_details(&web_url).await;
            }
        }
    }

    // --- Aggregation ---
    progress.phase("Aggregating...");
    let usernames: Vec<String> = roster.iter().map(|p| p.username.clone()).collect();
    let aggregated = aggregate(&credits, &comments, &merge_requests, &usernames, &labels);

    info!(
        credits = credits.len(),
        comments = comments.len(),
        merge_requests = merge_requests.len(),
        degraded_sources = source_errors.len(),
        "session complete"
    );

    Ok(SessionResult {
        roster,
        credits,
        comments,
        merge_requests,
        aggregated,
        month_labels: labels,
        source_errors,
        generated_at: Utc::now(),
    })
}

/// Record a non-complete fetch status against its source name.
fn note_status(errors: &mut Vec<SourceError>, source: &str, status: &FetchStatus) {
    if let Some(message) = status.error() {
        warn!(source, message, "source degraded");
        errors.push(SourceError {
            source: source.to_string(),
            message: message.to_string(),
        });
    }
}

/// Start of the oldest month in the window (records older than this are out
/// of scope for the comment fetch).
fn window_start(labels: &[String]) -> DateTime<Utc> {
    labels
        .first()
        .and_then(|label| {
            chrono::NaiveDate::parse_from_str(&format!("{label}-01"), "%Y-%m-%d").ok()
        })
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .unwrap_or_else(Utc::now)
}

/// Merge-request projects: the configured list verbatim, or the projects seen
/// in credit records mapped into the repository namespace.
fn mr_projects(config: &SessionConfig, credits: &[CreditRecord]) -> Vec<String> {
    if !config.mr_projects.is_empty() {
        return config.mr_projects.clone();
    }

    let derived: Vec<String> = credits
        .iter()
        .map(|c| c.project_key.as_str())
        .filter(|key| !key.is_empty() && *key != "unknown")
        .collect::<BTreeSet<_>>()
        .into_iter()
        .take(MAX_DERIVED_PROJECTS)
        .map(|key| format!("{GITLAB_PROJECT_NAMESPACE}/{key}"))
        .collect();

    debug!(projects = derived.len(), "derived MR project list from credits");
    derived
}
