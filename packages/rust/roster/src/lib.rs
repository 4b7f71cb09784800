//! Organization roster fetching and parsing.
//!
//! The roster is an HTML page without CORS-friendly JSON anywhere near it, so
//! acquisition is a scrape: try the page directly, and on any failure retry
//! once through a URL-forwarding proxy. The listing is paginated; pages are
//! walked while a pager-next link is present, under a defensive cap.

mod parser;

use std::collections::HashSet;

use reqwest::Client;
use tracing::{debug, info, instrument, warn};
use url::Url;

use orgpulse_shared::{OrgPulseError, Person, Result};

pub use parser::parse_roster_html;

/// User-Agent string for roster requests.
const USER_AGENT: &str = concat!("orgpulse/", env!("CARGO_PKG_VERSION"));

/// Default timeout in seconds for roster page requests.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Defensive cap on roster listing pages.
const MAX_ROSTER_PAGES: u32 = 20;

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Configuration for roster fetching.
#[derive(Debug, Clone)]
pub struct RosterOptions {
    /// URL-forwarding proxy; the target URL is appended URL-encoded.
    /// `None` disables the fallback.
    pub proxy_url: Option<String>,
    /// Timeout for HTTP requests in seconds.
    pub timeout_secs: u64,
}

impl Default for RosterOptions {
    fn default() -> Self {
        Self {
            proxy_url: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

// ---------------------------------------------------------------------------
// Fetching
// ---------------------------------------------------------------------------

/// Fetch and parse the organization roster.
///
/// Walks the paginated listing, deduplicates members across pages by
/// lower-cased username, and fails with [`OrgPulseError::EmptyRoster`] when
/// the combined result is empty.
#[instrument(skip_all, fields(url = %url))]
pub async fn fetch_roster(url: &Url, opts: &RosterOptions) -> Result<Vec<Person>> {
    let client = build_client(opts)?;

    let mut people: Vec<Person> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    let mut page: u32 = 0;

    loop {
        let page_url = page_url(url, page);
        let html = fetch_page_html(&client, &page_url, opts.proxy_url.as_deref()).await?;

        let has_next = parser::has_next_page(&html);
        for person in parser::collect_members(&html, url) {
            if seen.insert(person.identity()) {
                people.push(person);
            }
        }
        debug!(page, members = people.len(), has_next, "roster page parsed");

        page += 1;
        if !has_next || page >= MAX_ROSTER_PAGES {
            break;
        }
    }

    if people.is_empty() {
        return Err(OrgPulseError::EmptyRoster);
    }

    info!(members = people.len(), pages = page, "roster fetched");
    Ok(people)
}

/// The roster URL for a given page index (page 0 is the bare URL).
fn page_url(url: &Url, page: u32) -> Url {
    if page == 0 {
        return url.clone();
    }
    let mut paged = url.clone();
    paged.query_pairs_mut().append_pair("page", &page.to_string());
    paged
}

/// Fetch one roster page: direct request first, proxy fallback second.
async fn fetch_page_html(client: &Client, url: &Url, proxy: Option<&str>) -> Result<String> {
    match fetch_html(client, url.as_str()).await {
        Ok(html) => Ok(html),
        Err(direct_err) => {
            let Some(proxy) = proxy else {
                return Err(direct_err);
            };
            warn!(error = %direct_err, "direct roster fetch failed, trying proxy");

            let encoded: String =
                url::form_urlencoded::byte_serialize(url.as_str().as_bytes()).collect();
            let proxied = format!("{proxy}{encoded}");
            fetch_html(client, &proxied).await
        }
    }
}

/// GET a URL and return its body, treating any non-2xx status as an error.
async fn fetch_html(client: &Client, url: &str) -> Result<String> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| OrgPulseError::Network(format!("{url}: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        return Err(OrgPulseError::Network(format!("{url}: HTTP {status}")));
    }

    response
        .text()
        .await
        .map_err(|e| OrgPulseError::Network(format!("{url}: body read failed: {e}")))
}

/// Build a reqwest client with appropriate settings.
fn build_client(opts: &RosterOptions) -> Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .redirect(reqwest::redirect::Policy::limited(5))
        .timeout(std::time::Duration::from_secs(opts.timeout_secs))
        .build()
        .map_err(|e| OrgPulseError::Network(format!("failed to build HTTP client: {e}")))
}
