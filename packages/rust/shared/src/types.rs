//! Core domain types for OrgPulse contribution aggregation.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Person
// ---------------------------------------------------------------------------

/// An organization member from the roster page.
///
/// Identity is the lower-cased username; aggregation keys must be lower-cased
/// before lookup or insertion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Person {
    /// Platform username as displayed (identity key is the lowercase form).
    pub username: String,
    /// Absolute URL of the member's profile page.
    pub profile_url: String,
    /// Numeric user id, populated by a later resolution lookup.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<u64>,
}

impl Person {
    /// The case-insensitive identity key used for per-person aggregation.
    pub fn identity(&self) -> String {
        self.username.to_lowercase()
    }
}

// ---------------------------------------------------------------------------
// CreditRecord
// ---------------------------------------------------------------------------

/// One contribution credit event attributed to a person and a project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditRecord {
    pub username: String,
    pub project_key: String,
    /// Point in time of the credit (approximate if only a month was available).
    pub date: DateTime<Utc>,
    /// Credit weight, usually 1.
    pub weight: u32,
    #[serde(default)]
    pub is_security_advisory: bool,
}

// ---------------------------------------------------------------------------
// CommentEvent
// ---------------------------------------------------------------------------

/// One issue comment authored by an organization member.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommentEvent {
    pub comment_id: u64,
    /// Parent content node (issue) id.
    pub node_id: u64,
    pub author_uid: u64,
    /// Set by the orchestrator, which knows whose uid it queried.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_username: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Requires the secondary node lookup; may remain unset on lookup failure.
    /// Such comments count toward totals but not per-project rollups.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_key: Option<String>,
}

// ---------------------------------------------------------------------------
// IssueDetails
// ---------------------------------------------------------------------------

/// Node lookup result: the content type and owning project of an issue node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueDetails {
    pub node_type: String,
    pub project_key: String,
}

// ---------------------------------------------------------------------------
// MergeRequest
// ---------------------------------------------------------------------------

/// Lifecycle state of a merge request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MrState {
    Opened,
    Merged,
    Closed,
    Locked,
    #[default]
    Unknown,
}

impl MrState {
    /// Map an upstream state string; anything unrecognized degrades to `Unknown`.
    pub fn from_api(s: &str) -> Self {
        match s {
            "opened" => Self::Opened,
            "merged" => Self::Merged,
            "closed" => Self::Closed,
            "locked" => Self::Locked,
            _ => Self::Unknown,
        }
    }
}

/// One merge request from the code-hosting platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeRequest {
    /// Canonical URL this record was derived from.
    pub url: String,
    /// Project path, e.g. `project/webform`.
    pub project_path: String,
    /// Per-project sequence number.
    pub iid: u64,
    pub state: MrState,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merged_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_username: Option<String>,
    pub web_url: String,
}

// ---------------------------------------------------------------------------
// Aggregated output
// ---------------------------------------------------------------------------

/// Per-person contribution totals (unbounded by the month window).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonTotals {
    pub comments: u64,
    pub mrs: u64,
    pub credits: u64,
}

/// Per-project rollup across all record kinds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectActivity {
    pub project_key: String,
    pub comment_count: u64,
    pub mr_count: u64,
    pub credit_count: u64,
    /// Most recent activity seen for this project, if any record carried a date.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_activity: Option<DateTime<Utc>>,
}

impl ProjectActivity {
    /// A zeroed rollup for a project seen for the first time.
    pub fn new(project_key: impl Into<String>) -> Self {
        Self {
            project_key: project_key.into(),
            comment_count: 0,
            mr_count: 0,
            credit_count: 0,
            last_activity: None,
        }
    }
}

/// Monthly merge-request series, split by lifecycle transition.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MrSeries {
    pub opened: BTreeMap<String, u64>,
    pub merged: BTreeMap<String, u64>,
    pub closed: BTreeMap<String, u64>,
}

/// Derived aggregation output. Never persisted independently; always
/// regenerated from source records.
///
/// Month keys are `"YYYY-MM"` labels; every label of the requested window is
/// present (zero-initialized) even when no record fell into it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AggregatedData {
    pub comments_by_month: BTreeMap<String, u64>,
    pub mrs_by_month: MrSeries,
    pub credits_by_month: BTreeMap<String, u64>,
    pub by_person: BTreeMap<String, PersonTotals>,
    pub by_project: BTreeMap<String, ProjectActivity>,
}

// ---------------------------------------------------------------------------
// Fetch outcome
// ---------------------------------------------------------------------------

/// How a paginated fetch terminated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FetchStatus {
    /// All pages were retrieved (or the last-page heuristic fired cleanly).
    Complete,
    /// A mid-sequence page failed; the accumulated prior pages were kept.
    Partial { pages_fetched: u32, error: String },
    /// The very first page failed; no data was retrieved.
    Failed { error: String },
}

impl FetchStatus {
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Complete)
    }

    /// The failure message, if the fetch did not complete.
    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Complete => None,
            Self::Partial { error, .. } | Self::Failed { error } => Some(error),
        }
    }
}

/// A paginated fetcher's result: accumulated records plus how the sequence
/// ended. Partial success is a value, not an exception.
#[derive(Debug, Clone)]
pub struct FetchOutcome<T> {
    pub records: Vec<T>,
    pub status: FetchStatus,
}

impl<T> FetchOutcome<T> {
    pub fn complete(records: Vec<T>) -> Self {
        Self {
            records,
            status: FetchStatus::Complete,
        }
    }

    pub fn partial(records: Vec<T>, pages_fetched: u32, error: impl Into<String>) -> Self {
        Self {
            records,
            status: FetchStatus::Partial {
                pages_fetched,
                error: error.into(),
            },
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            records: Vec::new(),
            status: FetchStatus::Failed {
                error: error.into(),
            },
        }
    }
}
