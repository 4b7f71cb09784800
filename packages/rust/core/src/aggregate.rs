//! Pure aggregation of normalized records into monthly and per-entity summaries.
//!
//! No I/O, deterministic for identical inputs. Month buckets for the requested
//! window are zero-initialized up front, so months with no activity still
//! appear with value 0. Records dated outside the window are dropped silently
//! from the month series but still count toward per-person and per-project
//! totals.

use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, Utc};

use orgpulse_shared::{
    AggregatedData, CommentEvent, CreditRecord, MergeRequest, PersonTotals, ProjectActivity,
};

/// Month labels for the last `months` months including the current one,
/// ascending (`["2025-09", …, "2026-08"]` for a 12-month window ending today).
pub fn month_labels(months: u32) -> Vec<String> {
    month_labels_from(Utc::now(), months)
}

/// As [`month_labels`], anchored at an explicit point in time.
pub fn month_labels_from(now: DateTime<Utc>, months: u32) -> Vec<String> {
    let mut year = now.year();
    let mut month = now.month();
    let mut labels = Vec::with_capacity(months as usize);

    for _ in 0..months {
        labels.push(format!("{year:04}-{month:02}"));
        if month == 1 {
            month = 12;
            year -= 1;
        } else {
            month -= 1;
        }
    }

    labels.reverse();
    labels
}

/// The `"YYYY-MM"` bucket key for a record date.
pub fn month_key(date: &DateTime<Utc>) -> String {
    date.format("%Y-%m").to_string()
}

/// Fold all record kinds into month-bucketed series and per-person /
/// per-project rollups.
pub fn aggregate(
    credits: &[CreditRecord],
    comments: &[CommentEvent],
    mrs: &[MergeRequest],
    person_usernames: &[String],
    month_labels: &[String],
) -> AggregatedData {
    let mut data = AggregatedData::default();

    // Pre-initialize every month bucket so quiet months render as zero
    for label in month_labels {
        let _ = data.comments_by_month.insert(label.clone(), 0);
        let _ = data.credits_by_month.insert(label.clone(), 0);
        let _ = data.mrs_by_month.opened.insert(label.clone(), 0);
        let _ = data.mrs_by_month.merged.insert(label.clone(), 0);
        let _ = data.mrs_by_month.closed.insert(label.clone(), 0);
    }

    // Pre-initialize every roster member, keyed case-insensitively
    for username in person_usernames {
        let _ = data
            .by_person
            .insert(username.to_lowercase(), PersonTotals::default());
    }

    for credit in credits {
        bump(&mut data.credits_by_month, &credit.date, credit.weight.into());

        let person = data
            .by_person
            .entry(credit.username.to_lowercase())
            .or_default();
        person.credits += u64::from(credit.weight);

        let project = project_entry(&mut data.by_project, &credit.project_key);
        project.credit_count += u64::from(credit.weight);
        touch(project, &credit.date);
    }

    for comment in comments {
        bump(&mut data.comments_by_month, &comment.created_at, 1);

        // Attribution is best-effort: it depends on upstream resolution having
        // populated the author username and project key
        if let Some(username) = &comment.author_username {
            let person = data.by_person.entry(username.to_lowercase()).or_default();
            person.comments += 1;
        }
        if let Some(project_key) = &comment.project_key {
            let project = project_entry(&mut data.by_project, project_key);
            project.comment_count += 1;
            touch(project, &comment.created_at);
        }
    }

    for mr in mrs {
        bump(&mut data.mrs_by_month.opened, &mr.created_at, 1);
        if let Some(merged_at) = &mr.merged_at {
            bump(&mut data.mrs_by_month.merged, merged_at, 1);
        }

        // Author only counts when already a known person; the project rollup
        // increments unconditionally
        if let Some(author) = &mr.author_username {
            if let Some(person) = data.by_person.get_mut(&author.to_lowercase()) {
                person.mrs += 1;
            }
        }

        let project = project_entry(&mut data.by_project, &mr.project_path);
        project.mr_count += 1;
        touch(project, &mr.created_at);
    }

    data
}

/// Add to a month bucket if its label is inside the initialized window;
/// out-of-window dates are skipped without creating an entry.
fn bump(series: &mut BTreeMap<String, u64>, date: &DateTime<Utc>, amount: u64) {
    if let Some(bucket) = series.get_mut(&month_key(date)) {
        *bucket += amount;
    }
}

fn project_entry<'a>(
    map: &'a mut BTreeMap<String, ProjectActivity>,
    project_key: &str,
) -> &'a mut ProjectActivity {
    map.entry(project_key.to_string())
        .or_insert_with(|| ProjectActivity::new(project_key))
}

/// Advance a project's last-activity high-water mark.
fn touch(project: &mut ProjectActivity, date: &DateTime<Utc>) {
    if project.last_activity.is_none_or(|current| *date > current) {
        project.last_activity = Some(*date);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use orgpulse_shared::MrState;

    fn ts(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).single().expect("valid date")
    }

    fn labels() -> Vec<String> {
        month_labels_from(ts(2026, 3, 15), 3) // ["2026-01", "2026-02", "2026-03"]
    }

    fn credit(username: &str, project: &str, date: DateTime<Utc>, weight: u32) -> CreditRecord {
        CreditRecord {
            username: username.into(),
            project_key: project.into(),
            date,
            weight,
            is_security_advisory: false,
        }
    }

    fn mr(author: Option<&str>, project: &str, created: DateTime<Utc>) -> MergeRequest {
        MergeRequest {
            url: format!("https://git.example.com/{project}/-/merge_requests/1"),
            project_path: project.into(),
            iid: 1,
            state: MrState::Opened,
            created_at: created,
            merged_at: None,
            closed_at: None,
            author_username: author.map(String::from),
            web_url: format!("https://git.example.com/{project}/-/merge_requests/1"),
        }
    }

    #[test]
    fn month_labels_are_ascending_and_padded() {
        let labels = month_labels_from(ts(2026, 2, 10), 4);
        assert_eq!(labels, vec!["2025-11", "2025-12", "2026-01", "2026-02"]);
    }

    #[test]
    fn every_series_is_zero_initialized_for_empty_inputs() {
        let labels = labels();
        let data = aggregate(&[], &[], &[], &[], &labels);

        for series in [
            &data.comments_by_month,
            &data.credits_by_month,
            &data.mrs_by_month.opened,
            &data.mrs_by_month.merged,
            &data.mrs_by_month.closed,
        ] {
            assert_eq!(series.len(), 3);
            assert!(series.keys().eq(labels.iter()));
            assert!(series.values().all(|&v| v == 0));
        }
        assert!(data.by_person.is_empty());
        assert!(data.by_project.is_empty());
    }

    #[test]
    fn roster_members_are_pre_initialized_lowercase() {
        let data = aggregate(&[], &[], &[], &["Alice".into(), "BOB".into()], &labels());
        assert_eq!(data.by_person.len(), 2);
        assert_eq!(data.by_person["alice"], PersonTotals::default());
        assert_eq!(data.by_person["bob"], PersonTotals::default());
    }

    #[test]
    fn in_window_credit_hits_month_person_and_project() {
        let credits = vec![credit("Alice", "webform", ts(2026, 2, 5), 2)];
        let data = aggregate(&credits, &[], &[], &["alice".into()], &labels());

        assert_eq!(data.credits_by_month["2026-02"], 2);
        assert_eq!(data.by_person["alice"].credits, 2);
        assert_eq!(data.by_project["webform"].credit_count, 2);
        assert_eq!(data.by_project["webform"].last_activity, Some(ts(2026, 2, 5)));
    }

    #[test]
    fn out_of_window_credit_skips_month_but_counts_totals() {
        let credits = vec![credit("alice", "webform", ts(2024, 6, 1), 1)];
        let data = aggregate(&credits, &[], &[], &["alice".into()], &labels());

        // No month bucket gained anything, and no stray key appeared
        assert!(data.credits_by_month.values().all(|&v| v == 0));
        assert_eq!(data.credits_by_month.len(), 3);

        assert_eq!(data.by_person["alice"].credits, 1);
        assert_eq!(data.by_project["webform"].credit_count, 1);
    }

    #[test]
    fn person_lookup_is_case_insensitive() {
        let credits = vec![
            credit("Alice", "webform", ts(2026, 1, 1), 1),
            credit("aLiCe", "webform", ts(2026, 2, 1), 1),
        ];
        let data = aggregate(&credits, &[], &[], &["alice".into()], &labels());

        assert_eq!(data.by_person.len(), 1);
        assert_eq!(data.by_person["alice"].credits, 2);
    }

    #[test]
    fn unrostered_credit_author_gets_an_entry() {
        let credits = vec![credit("stranger", "webform", ts(2026, 1, 1), 1)];
        let data = aggregate(&credits, &[], &[], &[], &labels());
        assert_eq!(data.by_person["stranger"].credits, 1);
    }

    #[test]
    fn comment_attribution_is_best_effort() {
        let comments = vec![
            CommentEvent {
                comment_id: 1,
                node_id: 10,
                author_uid: 42,
                author_username: Some("Alice".into()),
                created_at: ts(2026, 1, 20),
                project_key: Some("webform".into()),
            },
            // Unresolved comment: month bucket only
            CommentEvent {
                comment_id: 2,
                node_id: 0,
                author_uid: 43,
                author_username: None,
                created_at: ts(2026, 2, 2),
                project_key: None,
            },
        ];
        let data = aggregate(&[], &comments, &[], &["alice".into()], &labels());

        assert_eq!(data.comments_by_month["2026-01"], 1);
        assert_eq!(data.comments_by_month["2026-02"], 1);
        assert_eq!(data.by_person["alice"].comments, 1);
        assert_eq!(data.by_project.len(), 1);
        assert_eq!(data.by_project["webform"].comment_count, 1);
    }

    #[test]
    fn mr_buckets_opened_and_merged() {
        let mut merged = mr(Some("alice"), "project/webform", ts(2026, 1, 10));
        merged.merged_at = Some(ts(2026, 2, 1));
        merged.state = MrState::Merged;

        let data = aggregate(&[], &[], &[merged], &["alice".into()], &labels());

        assert_eq!(data.mrs_by_month.opened["2026-01"], 1);
        assert_eq!(data.mrs_by_month.merged["2026-02"], 1);
        assert!(data.mrs_by_month.closed.values().all(|&v| v == 0));
        assert_eq!(data.by_person["alice"].mrs, 1);
        assert_eq!(data.by_project["project/webform"].mr_count, 1);
    }

    #[test]
    fn unknown_mr_author_counts_for_project_only() {
        let mrs = vec![mr(Some("outsider"), "project/webform", ts(2026, 1, 10))];
        let data = aggregate(&[], &[], &mrs, &["alice".into()], &labels());

        // No person entry is created for an unrostered MR author
        assert!(!data.by_person.contains_key("outsider"));
        assert_eq!(data.by_person["alice"].mrs, 0);
        assert_eq!(data.by_project["project/webform"].mr_count, 1);
    }

    #[test]
    fn last_activity_is_the_maximum() {
        let credits = vec![
            credit("a", "webform", ts(2026, 2, 20), 1),
            credit("b", "webform", ts(2026, 1, 5), 1),
        ];
        let data = aggregate(&credits, &[], &[], &[], &labels());
        assert_eq!(data.by_project["webform"].last_activity, Some(ts(2026, 2, 20)));
    }
}
