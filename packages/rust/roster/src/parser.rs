//! Roster HTML parser.
//!
//! Extracts a deduplicated member list from an organization roster page using
//! an ordered list of structural selector strategies. Most-specific selectors
//! come first; a generic profile-link sweep is the guarded last resort.

use std::collections::HashSet;

use scraper::{Html, Selector};
use tracing::debug;
use url::Url;

use orgpulse_shared::{OrgPulseError, Person, Result};

/// Selector strategies in priority order. The first one yielding at least one
/// match wins. Based on observed markup of platform organization pages
/// (views tables, list/grid variants, bare name cells).
const SELECTOR_STRATEGIES: &[&str] = &[
    ".view-content td.views-field-name a, .view-content .views-field-name a",
    ".view-content .views-row .views-field-name a",
    "td.views-field-name a",
    ".user-name",
];

/// Generic fallback: any link into a user profile.
const FALLBACK_SELECTOR: &str = r#"a[href^="/u/"], a[href^="/user/"]"#;

/// The fallback is only trusted when it yields strictly more than this many
/// matches. Guards against unrelated pages that happen to contain a handful
/// of profile links.
const FALLBACK_MIN_MATCHES: usize = 5;

/// Derived usernames shorter than this are rejected as junk.
const MIN_USERNAME_LEN: usize = 2;

/// Known non-name strings that aggressive scraping can pick up.
const EXCLUDED_NAMES: &[&str] = &["Name"];

/// Pager element present when the roster listing has a following page.
const NEXT_PAGE_SELECTOR: &str = ".pager-next a, li.pager-next";

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse a roster document into a deduplicated member list.
///
/// Fails with [`OrgPulseError::EmptyRoster`] when zero valid entries are
/// produced: an empty roster almost always means the page layout changed, not
/// that the organization has no members, so downstream must not proceed
/// silently with a size-0 list.
pub fn parse_roster_html(html: &str, base: &Url) -> Result<Vec<Person>> {
    let people = collect_members(html, base);
    if people.is_empty() {
        return Err(OrgPulseError::EmptyRoster);
    }
    Ok(people)
}

/// Collect member candidates from one roster page without the empty check.
/// The multi-page fetch loop dedups across pages and applies the empty check
/// to the combined result.
pub(crate) fn collect_members(html: &str, base: &Url) -> Vec<Person> {
    let doc = Html::parse_document(html);
    let mut people = Vec::new();
    let mut seen = HashSet::new();

    for element in candidate_elements(&doc) {
        let href = element.value().attr("href").unwrap_or_default();
        let text = element.text().collect::<String>();
        let text = text.trim();

        if href.is_empty() || text.is_empty() {
            continue;
        }

        if let Some(person) = member_from_link(href, text, base) {
            if seen.insert(person.identity()) {
                people.push(person);
            }
        }
    }

    people
}

/// Run the selector strategies in priority order; fall back to the generic
/// profile-link sweep only past the match threshold.
fn candidate_elements<'a>(doc: &'a Html) -> Vec<scraper::ElementRef<'a>> {
    for strategy in SELECTOR_STRATEGIES {
        let selector = Selector::parse(strategy).expect("static selector");
        let matches: Vec<_> = doc.select(&selector).collect();
        if !matches.is_empty() {
            debug!(strategy, matches = matches.len(), "selector strategy matched");
            return matches;
        }
    }

    let fallback = Selector::parse(FALLBACK_SELECTOR).expect("static selector");
    let matches: Vec<_> = doc.select(&fallback).collect();
    if matches.len() > FALLBACK_MIN_MATCHES {
        debug!(matches = matches.len(), "generic profile-link fallback activated");
        return matches;
    }

    Vec::new()
}

/// Build a [`Person`] from a candidate link, or reject it as junk.
///
/// The username comes from the `/u/<name>` path segment when the URL encodes
/// it directly, otherwise from the link's visible text (profile links of the
/// `/user/<uid>` form carry only the numeric id).
fn member_from_link(href: &str, text: &str, base: &Url) -> Option<Person> {
    let resolved = base.join(href).ok()?;

    let username = match resolved.path().strip_prefix("/u/") {
        Some(segment) if !segment.is_empty() => segment.trim_end_matches('/').to_string(),
        _ => text.to_string(),
    };

    if username.len() < MIN_USERNAME_LEN || EXCLUDED_NAMES.contains(&username.as_str()) {
        return None;
    }

    Some(Person {
        username,
        profile_url: resolved.to_string(),
        uid: None,
    })
}

/// Whether the document links to a following roster page.
pub(crate) fn has_next_page(html: &str) -> bool {
    let doc = Html::parse_document(html);
    let selector = Selector::parse(NEXT_PAGE_SELECTOR).expect("static selector");
    doc.select(&selector).next().is_some()
}
