//! Application configuration for OrgPulse.
//!
//! User config lives at `~/.orgpulse/orgpulse.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{OrgPulseError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "orgpulse.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".orgpulse";

// ---------------------------------------------------------------------------
// Config structs (matching orgpulse.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Upstream endpoint URLs.
    #[serde(default)]
    pub upstream: UpstreamConfig,

    /// Cache settings.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Code-hosting (merge request) settings.
    #[serde(default)]
    pub gitlab: GitlabConfig,

    /// Snapshot export settings.
    #[serde(default)]
    pub snapshot: SnapshotConfig,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Organization whose members are aggregated.
    #[serde(default = "default_org")]
    pub organization: String,

    /// Lookback window in months.
    #[serde(default = "default_months")]
    pub months: u32,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            organization: default_org(),
            months: default_months(),
        }
    }
}

fn default_org() -> String {
    "CivicActions".into()
}
fn default_months() -> u32 {
    12
}

/// `[upstream]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// HTML roster page listing organization members.
    #[serde(default = "default_roster_url")]
    pub roster_url: String,

    /// Contribution-credit listing endpoint.
    #[serde(default = "default_credits_base")]
    pub credits_api_base: String,

    /// Platform REST base (user lookup, comments, node details).
    #[serde(default = "default_platform_base")]
    pub platform_api_base: String,

    /// Code-hosting API base (merge requests).
    #[serde(default = "default_gitlab_base")]
    pub gitlab_api_base: String,

    /// URL-forwarding proxy used when a direct roster fetch fails.
    /// The target URL is appended, URL-encoded.
    #[serde(default = "default_proxy_url")]
    pub proxy_url: String,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            roster_url: default_roster_url(),
            credits_api_base: default_credits_base(),
            platform_api_base: default_platform_base(),
            gitlab_api_base: default_gitlab_base(),
            proxy_url: default_proxy_url(),
        }
    }
}

fn default_roster_url() -> String {
    "https://www.drupal.org/node/1121122/users".into()
}
fn default_credits_base() -> String {
    "https://new.drupal.org/contribution-records-by-organization-by-user".into()
}
fn default_platform_base() -> String {
    "https://www.drupal.org/api-d7".into()
}
fn default_gitlab_base() -> String {
    "https://git.drupalcode.org/api/v4".into()
}
fn default_proxy_url() -> String {
    "https://api.allorigins.win/raw?url=".into()
}

/// `[cache]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Entry time-to-live in seconds.
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
        }
    }
}

fn default_ttl_secs() -> u64 {
    6 * 60 * 60
}

/// `[gitlab]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitlabConfig {
    /// Name of the env var holding the access token (never store the token itself).
    #[serde(default = "default_token_env")]
    pub token_env: String,

    /// Project paths to fetch merge requests for. When empty, the set is
    /// derived from the projects seen in credit records.
    #[serde(default)]
    pub projects: Vec<String>,
}

impl Default for GitlabConfig {
    fn default() -> Self {
        Self {
            token_env: default_token_env(),
            projects: Vec::new(),
        }
    }
}

fn default_token_env() -> String {
    "ORGPULSE_GITLAB_TOKEN".into()
}

/// `[snapshot]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotConfig {
    /// Default output directory for static snapshot files.
    #[serde(default = "default_snapshot_dir")]
    pub out_dir: String,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            out_dir: default_snapshot_dir(),
        }
    }
}

fn default_snapshot_dir() -> String {
    "public/data".into()
}

// ---------------------------------------------------------------------------
// Session config (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime fetch-session configuration merged from config file + CLI flags.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Organization whose members are aggregated.
    pub org: String,
    /// Lookback window in months.
    pub months: u32,
    /// HTML roster page URL.
    pub roster_url: String,
    /// Contribution-credit listing endpoint.
    pub credits_api_base: String,
    /// Platform REST base (user lookup, comments, node details).
    pub platform_api_base: String,
    /// Code-hosting API base (merge requests).
    pub gitlab_api_base: String,
    /// Roster fallback proxy.
    pub proxy_url: Option<String>,
    /// Merge-request projects; empty means derive from credit records.
    pub mr_projects: Vec<String>,
    /// Access token for the merge-request detail endpoint, resolved from the
    /// env var named in config. Never written back to disk or durable cache.
    pub gitlab_token: Option<String>,
}

impl From<&AppConfig> for SessionConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            org: config.defaults.organization.clone(),
            months: config.defaults.months,
            roster_url: config.upstream.roster_url.clone(),
            credits_api_base: config.upstream.credits_api_base.clone(),
            platform_api_base: config.upstream.platform_api_base.clone(),
            gitlab_api_base: config.upstream.gitlab_api_base.clone(),
            proxy_url: if config.upstream.proxy_url.is_empty() {
                None
            } else {
                Some(config.upstream.proxy_url.clone())
            },
            mr_projects: config.gitlab.projects.clone(),
            gitlab_token: gitlab_token(config),
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.orgpulse/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| OrgPulseError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.orgpulse/orgpulse.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| OrgPulseError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| OrgPulseError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| OrgPulseError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| OrgPulseError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| OrgPulseError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Read the merge-request access token from the env var named in config.
/// Returns `None` when unset or empty; the value is never persisted.
pub fn gitlab_token(config: &AppConfig) -> Option<String> {
    match std::env::var(&config.gitlab.token_env) {
        Ok(val) if !val.is_empty() => Some(val),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("roster_url"));
        assert!(toml_str.contains("ORGPULSE_GITLAB_TOKEN"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.defaults.months, 12);
        assert_eq!(parsed.defaults.organization, "CivicActions");
        assert_eq!(parsed.cache.ttl_secs, 6 * 60 * 60);
    }

    #[test]
    fn config_with_projects() {
        let toml_str = r#"
[defaults]
organization = "Example Org"
months = 6

[gitlab]
projects = ["project/webform", "project/pathauto"]
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.defaults.organization, "Example Org");
        assert_eq!(config.defaults.months, 6);
        assert_eq!(config.gitlab.projects.len(), 2);
        // Unspecified sections fall back to defaults
        assert!(config.upstream.roster_url.contains("drupal.org"));
    }

    #[test]
    fn session_config_from_app_config() {
        let app = AppConfig::default();
        let session = SessionConfig::from(&app);
        assert_eq!(session.months, 12);
        assert_eq!(session.org, "CivicActions");
        assert!(session.proxy_url.is_some());
        assert!(session.mr_projects.is_empty());
    }

    #[test]
    fn token_env_unset_is_none() {
        let mut config = AppConfig::default();
        // Use a unique env var name to avoid interfering with other tests
        config.gitlab.token_env = "ORGPULSE_TEST_NONEXISTENT_TOKEN_12345".into();
        assert!(gitlab_token(&config).is_none());
    }
}
