//! Shared types, error model, and configuration for OrgPulse.
//!
//! This crate is the foundation depended on by all other OrgPulse crates.
//! It provides:
//! - [`OrgPulseError`] — the unified error type
//! - Domain types ([`Person`], [`CreditRecord`], [`CommentEvent`], [`MergeRequest`], [`AggregatedData`])
//! - Fetch outcome model ([`FetchOutcome`], [`FetchStatus`])
//! - Configuration ([`AppConfig`], [`SessionConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, CacheConfig, DefaultsConfig, GitlabConfig, SessionConfig, SnapshotConfig,
    UpstreamConfig, config_dir, config_file_path, gitlab_token, init_config, load_config,
    load_config_from,
};
pub use error::{OrgPulseError, Result};
pub use types::{
    AggregatedData, CommentEvent, CreditRecord, FetchOutcome, FetchStatus, IssueDetails,
    MergeRequest, MrSeries, MrState, Person, PersonTotals, ProjectActivity,
};
