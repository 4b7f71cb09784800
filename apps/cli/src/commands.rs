//! CLI command definitions, routing, and tracing setup.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::Result;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::warn;

use orgpulse_cache::CacheStore;
use orgpulse_core::pipeline::{ProgressReporter, SessionResult, run_session};
use orgpulse_core::snapshot::write_snapshot;
use orgpulse_shared::{AppConfig, SessionConfig, config_dir, init_config, load_config};

/// Durable cache database file name under the config directory.
const CACHE_DB_FILE: &str = "cache.db";

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// OrgPulse — monthly contribution activity for an organization's members.
#[derive(Parser)]
#[command(
    name = "orgpulse",
    version,
    about = "Aggregate an organization's roster, credits, comments, and merge requests.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Run a fetch session and print the aggregated report.
    Fetch {
        /// Organization name (overrides config).
        #[arg(short, long)]
        org: Option<String>,

        /// Lookback window in months (overrides config).
        #[arg(short, long)]
        months: Option<u32>,
    },

    /// Run a fetch session and write static snapshot files.
    Snapshot {
        /// Output directory (overrides config).
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Organization name (overrides config).
        #[arg(long)]
        org: Option<String>,

        /// Lookback window in months (overrides config).
        #[arg(long)]
        months: Option<u32>,
    },

    /// Cache management.
    Cache {
        /// Cache subcommand.
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Cache subcommands.
#[derive(Subcommand)]
pub(crate) enum CacheAction {
    /// Drop every cached entry from both tiers.
    Clear,
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .init();
        }
        LogFormat::Json => {
            fmt().json().with_env_filter(env_filter).init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Fetch { org, months } => {
            let config = load_config()?;
            let session = fetch_session(&config, org, months).await?;
            print_report(&session);
            Ok(())
        }

        Command::Snapshot { out, org, months } => {
            let config = load_config()?;
            let session = fetch_session(&config, org, months).await?;

            let out_dir = out.unwrap_or_else(|| PathBuf::from(&config.snapshot.out_dir));
            let result = write_snapshot(&out_dir, &session)?;

            println!(
                "Snapshot written to {} ({} files)",
                result.out_dir.display(),
                result.files.len()
            );
            for error in &session.source_errors {
                println!("  warning: {} degraded: {}", error.source, error.message);
            }
            Ok(())
        }

        Command::Cache { action } => match action {
            CacheAction::Clear => {
                let config = load_config()?;
                let cache = open_cache(&config).await;
                cache.clear().await;
                println!("Cache cleared");
                Ok(())
            }
        },

        Command::Config { action } => match action {
            ConfigAction::Init => {
                let path = init_config()?;
                println!("Config written to {}", path.display());
                Ok(())
            }
            ConfigAction::Show => {
                let config = load_config()?;
                println!("{}", toml::to_string_pretty(&config)?);
                Ok(())
            }
        },
    }
}

/// Run a fetch session with CLI overrides applied and a spinner for progress.
async fn fetch_session(
    config: &AppConfig,
    org: Option<String>,
    months: Option<u32>,
) -> Result<SessionResult> {
    let mut session_config = SessionConfig::from(config);
    if let Some(org) = org {
        session_config.org = org;
    }
    if let Some(months) = months {
        session_config.months = months;
    }

    let cache = open_cache(config).await;
    let progress = SpinnerProgress::new();
    let session = run_session(&session_config, cache, &progress).await;
    progress.finish();
    Ok(session?)
}

/// Open the durable cache; fall back to a memory-only store when the durable
/// tier is unavailable rather than refusing to run.
async fn open_cache(config: &AppConfig) -> Arc<CacheStore> {
    let ttl = Duration::from_secs(config.cache.ttl_secs);

    let path = match config_dir() {
        Ok(dir) => dir.join(CACHE_DB_FILE),
        Err(e) => {
            warn!(error = %e, "no config directory, cache is memory-only");
            return Arc::new(CacheStore::in_memory(ttl));
        }
    };

    match CacheStore::open(&path, ttl).await {
        Ok(store) => Arc::new(store),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "durable cache unavailable, cache is memory-only");
            Arc::new(CacheStore::in_memory(ttl))
        }
    }
}

// ---------------------------------------------------------------------------
// Progress + report rendering
// ---------------------------------------------------------------------------

/// Spinner-backed progress reporter for interactive runs.
struct SpinnerProgress {
    bar: ProgressBar,
}

impl SpinnerProgress {
    fn new() -> Self {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::with_template("{spinner} {msg}").expect("static spinner template"),
        );
        bar.enable_steady_tick(Duration::from_millis(120));
        Self { bar }
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl ProgressReporter for SpinnerProgress {
    fn phase(&self, status: &str) {
        self.bar.set_message(status.to_string());
    }

    fn source_progress(&self, source: &str, count: usize) {
        self.bar.set_message(format!("Fetched {count} {source}..."));
    }
}

/// Print the aggregated report for a completed session.
fn print_report(session: &SessionResult) {
    println!(
        "Roster: {} members | {} credits, {} comments, {} merge requests",
        session.roster.len(),
        session.credits.len(),
        session.comments.len(),
        session.merge_requests.len(),
    );
    println!();

    println!(
        "{:<10} {:>8} {:>9} {:>10} {:>10}",
        "Month", "Credits", "Comments", "MRs open", "MRs merged"
    );
    for label in &session.month_labels {
        println!(
            "{:<10} {:>8} {:>9} {:>10} {:>10}",
            label,
            session.aggregated.credits_by_month.get(label).copied().unwrap_or(0),
            session.aggregated.comments_by_month.get(label).copied().unwrap_or(0),
            session.aggregated.mrs_by_month.opened.get(label).copied().unwrap_or(0),
            session.aggregated.mrs_by_month.merged.get(label).copied().unwrap_or(0),
        );
    }
    println!();

    let mut people: Vec<_> = session.aggregated.by_person.iter().collect();
    people.sort_by(|(_, a), (_, b)| {
        (b.credits + b.comments + b.mrs).cmp(&(a.credits + a.comments + a.mrs))
    });

    println!("Top contributors:");
    for (username, totals) in people.iter().take(10) {
        println!(
            "  {username:<24} {:>4} credits {:>4} comments {:>4} MRs",
            totals.credits, totals.comments, totals.mrs
        );
    }

    if session.is_degraded() {
        println!();
        println!("Degraded sources:");
        for error in &session.source_errors {
            println!("  {}: {}", error.source, error.message);
        }
    }
}
