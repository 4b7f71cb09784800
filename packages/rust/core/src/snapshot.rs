//! Static snapshot writer for the batch/offline mode.
//!
//! Serializes a session's data to JSON files a static dashboard can consume
//! without any server component: `roster.json`, `credits.json`,
//! `comments_by_month.json`, `mrs.json`, plus a generation timestamp.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{info, instrument};

use orgpulse_shared::{OrgPulseError, Result};

use crate::pipeline::SessionResult;

/// Timestamp file name, RFC 3339 content.
const TIMESTAMP_FILE: &str = "snapshot_timestamp.txt";

/// Output of a successful snapshot write.
#[derive(Debug, Clone)]
pub struct SnapshotResult {
    /// Directory the snapshot was written into.
    pub out_dir: PathBuf,
    /// File names written, in write order.
    pub files: Vec<String>,
}

/// Write a session's data as static JSON files into `out_dir`.
#[instrument(skip_all, fields(out_dir = %out_dir.display()))]
pub fn write_snapshot(out_dir: &Path, session: &SessionResult) -> Result<SnapshotResult> {
    std::fs::create_dir_all(out_dir).map_err(|e| OrgPulseError::io(out_dir, e))?;

    let mut files = Vec::new();

    write_json(out_dir, "roster.json", &session.roster, &mut files)?;
    write_json(out_dir, "credits.json", &session.credits, &mut files)?;
    write_json(
        out_dir,
        "comments_by_month.json",
        &session.aggregated.comments_by_month,
        &mut files,
    )?;
    write_json(out_dir, "mrs.json", &session.merge_requests, &mut files)?;

    let timestamp_path = out_dir.join(TIMESTAMP_FILE);
    std::fs::write(&timestamp_path, session.generated_at.to_rfc3339())
        .map_err(|e| OrgPulseError::io(&timestamp_path, e))?;
    files.push(TIMESTAMP_FILE.to_string());

    info!(files = files.len(), "snapshot written");

    Ok(SnapshotResult {
        out_dir: out_dir.to_path_buf(),
        files,
    })
}

fn write_json<T: Serialize>(
    out_dir: &Path,
    name: &str,
    value: &T,
    files: &mut Vec<String>,
) -> Result<()> {
    let path = out_dir.join(name);
    let content = serde_json::to_string_pretty(value)
        .map_err(|e| OrgPulseError::validation(format!("{name}: serialization failed: {e}")))?;
    std::fs::write(&path, content).map_err(|e| OrgPulseError::io(&path, e))?;
    files.push(name.to_string());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::{aggregate, month_labels_from};
    use chrono::{TimeZone, Utc};
    use orgpulse_shared::{CreditRecord, Person};
    use uuid::Uuid;

    fn sample_session() -> SessionResult {
        let now = Utc.with_ymd_and_hms(2026, 3, 10, 0, 0, 0).single().expect("date");
        let labels = month_labels_from(now, 3);
        let roster = vec![Person {
            username: "alice".into(),
            profile_url: "https://www.drupal.org/u/alice".into(),
            uid: None,
        }];
        let credits = vec![CreditRecord {
            username: "alice".into(),
            project_key: "webform".into(),
            date: now,
            weight: 1,
            is_security_advisory: false,
        }];
        let usernames = vec!["alice".to_string()];
        let aggregated = aggregate(&credits, &[], &[], &usernames, &labels);

        SessionResult {
            roster,
            credits,
            comments: Vec::new(),
            merge_requests: Vec::new(),
            aggregated,
            month_labels: labels,
            source_errors: Vec::new(),
            generated_at: now,
        }
    }

    #[test]
    fn writes_all_snapshot_files() {
        let out_dir = std::env::temp_dir().join(format!("orgpulse-snap-{}", Uuid::now_v7()));
        let session = sample_session();

        let result = write_snapshot(&out_dir, &session).expect("write snapshot");
        assert_eq!(
            result.files,
            vec![
                "roster.json",
                "credits.json",
                "comments_by_month.json",
                "mrs.json",
                "snapshot_timestamp.txt",
            ]
        );

        for name in &result.files {
            assert!(out_dir.join(name).exists(), "missing {name}");
        }

        // Files parse back into their source shapes
        let roster: Vec<Person> = serde_json::from_str(
            &std::fs::read_to_string(out_dir.join("roster.json")).expect("read roster"),
        )
        .expect("parse roster");
        assert_eq!(roster.len(), 1);
        assert_eq!(roster[0].username, "alice");

        let by_month: std::collections::BTreeMap<String, u64> = serde_json::from_str(
            &std::fs::read_to_string(out_dir.join("comments_by_month.json"))
                .expect("read comments"),
        )
        .expect("parse comments");
        assert_eq!(by_month.len(), 3);

        let timestamp =
            std::fs::read_to_string(out_dir.join("snapshot_timestamp.txt")).expect("read ts");
        assert!(timestamp.starts_with("2026-03-10"));

        let _ = std::fs::remove_dir_all(&out_dir);
    }

    #[test]
    fn overwrites_existing_snapshot() {
        let out_dir = std::env::temp_dir().join(format!("orgpulse-snap-{}", Uuid::now_v7()));
        let session = sample_session();

        write_snapshot(&out_dir, &session).expect("first write");
        let result = write_snapshot(&out_dir, &session).expect("second write");
        assert_eq!(result.files.len(), 5);

        let _ = std::fs::remove_dir_all(&out_dir);
    }
}
