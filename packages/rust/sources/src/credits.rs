//! Contribution-credit fetcher.
//!
//! Pages through the credit listing endpoint for an organization and a
//! lookback window, normalizing each row into a [`CreditRecord`].

use chrono::Utc;
use serde_json::Value;
use tokio::time::sleep;
use tracing::{debug, instrument, warn};

use orgpulse_cache::cache_key;
use orgpulse_shared::{CreditRecord, FetchOutcome};

use crate::shape::{bool_field, date_field, string_field};
use crate::{PAGE_DELAY, ProgressFn, Sources, UNKNOWN, encode};

/// Nominal page size requested from the listing endpoint; a page smaller than
/// this is taken as the last one.
const PAGE_LIMIT: usize = 50;

/// Defensive cap on pages per fetch.
const MAX_PAGES: u32 = 50;

/// Credit weight applied to every record.
const DEFAULT_WEIGHT: u32 = 1;

// Field-alias tables, highest priority first. Provisional: the upstream has
// renamed these between API versions and not all spellings are confirmed.
const USERNAME_ALIASES: &[&str] = &["username", "user_name", "author.name"];
const PROJECT_ALIASES: &[&str] = &["project_machine_name", "project"];
const DATE_ALIASES: &[&str] = &["created"];
const SECURITY_ALIASES: &[&str] = &["is_sa"];

impl Sources {
    /// Fetch all contribution credits for `org` over the last `months` months.
    ///
    /// Serves from cache when a fresh entry exists; otherwise pages through
    /// the listing, reporting cumulative counts through `progress`. A
    /// mid-sequence page failure yields the accumulated prior pages as a
    /// partial outcome. Only complete outcomes are written back to the cache.
    #[instrument(skip_all, fields(org = %org, months = months))]
    pub async fn credit_records(
        &self,
        org: &str,
        months: u32,
        progress: Option<ProgressFn<'_>>,
    ) -> FetchOutcome<CreditRecord> {
        let key = cache_key(
            "credits",
            &[("org", org.to_string()), ("months", months.to_string())],
        );
        if let Some(cached) = self.cache.get::<Vec<CreditRecord>>(&key).await {
            debug!(records = cached.len(), "credit records served from cache");
            return FetchOutcome::complete(cached);
        }

        let mut records: Vec<CreditRecord> = Vec::new();
        let mut page: u32 = 0;

        loop {
            let url = format!(
                "{}?organization={}&months={}&page={}&limit={}",
                self.credits_base,
                encode(org),
                months,
                page,
                PAGE_LIMIT
            );

            let rows = match self.fetch_rows(&url).await {
                Ok(rows) => rows,
                Err(e) => {
                    warn!(page, error = %e, "credit page failed, keeping prior pages");
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

            records.extend(rows.iter().map(credit_from_row));
            if let Some(report) = progress {
                report(records.len());
            }

            page += 1;
            if undersized || page >= MAX_PAGES {
                break;
            }
            sleep(PAGE_DELAY).await;
        }

        debug!(records = records.len(), pages = page, "credit fetch complete");
        self.cache.set(&key, &records).await;
        FetchOutcome::complete(records)
    }
}

/// Normalize one listing row. Missing fields degrade to documented defaults
/// rather than failing the fetch.
fn credit_from_row(row: &Value) -> CreditRecord {
    CreditRecord {
        username: string_field(row, USERNAME_ALIASES).unwrap_or_else(|| UNKNOWN.into()),
        project_key: string_field(row, PROJECT_ALIASES).unwrap_or_else(|| UNKNOWN.into()),
        date: date_field(row, DATE_ALIASES).unwrap_or_else(Utc::now),
        weight: DEFAULT_WEIGHT,
        is_security_advisory: bool_field(row, SECURITY_ALIASES),
    }
}
