//! Aggregation and orchestration for OrgPulse.
//!
//! This crate ties the cache store, roster scrape, and source fetchers into
//! an end-to-end fetch session, folds the results into monthly and per-entity
//! summaries, and serializes them for the offline snapshot mode.

pub mod aggregate;
pub mod pipeline;
pub mod snapshot;
