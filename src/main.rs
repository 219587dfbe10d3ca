//! Star-Harvest main entry point
//!
//! This is the command-line interface for the Star-Harvest repository crawler.

use anyhow::Context;
use clap::Parser;
use std::path::{Path, PathBuf};
use star_harvest::api::ApiEndpoints;
use star_harvest::config::{load_config_with_hash, Config, DiscoverySourceKind};
use star_harvest::crawler::{build_http_client, check_quota, run_crawl};
use star_harvest::output::{format_quota, load_statistics, print_run_summary, print_statistics};
use star_harvest::storage::{SqliteStateCache, SqliteStore, SqliteWorkQueue};
use tracing_subscriber::EnvFilter;

/// Star-Harvest: a rate-limit aware crawler for highly-starred repositories
///
/// Star-Harvest discovers popular repositories, queues them durably, and
/// ingests their releases and commit history into SQLite. Repeat runs only
/// fetch history newer than the last ingested release.
#[derive(Parser, Debug)]
#[command(name = "star-harvest")]
#[command(version = "1.0.0")]
#[command(about = "A rate-limit aware crawler for highly-starred repositories", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Clear the work queue and state cache before crawling
    #[arg(long)]
    fresh: bool,

    /// Validate config and show what would be crawled without crawling
    #[arg(long, conflicts_with_all = ["stats", "check_tokens"])]
    dry_run: bool,

    /// Show statistics from the database and exit
    #[arg(long, conflicts_with_all = ["dry_run", "check_tokens"])]
    stats: bool,

    /// Query the remaining quota of every configured token and exit
    #[arg(long, conflicts_with_all = ["dry_run", "stats"])]
    check_tokens: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("Failed to load configuration {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    if cli.dry_run {
        handle_dry_run(&config);
    } else if cli.stats {
        handle_stats(&config)?;
    } else if cli.check_tokens {
        handle_check_tokens(&config).await?;
    } else {
        handle_crawl(config, config_hash, cli.fresh).await?;
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("star_harvest=info,warn"),
            1 => EnvFilter::new("star_harvest=debug,info"),
            2 => EnvFilter::new("star_harvest=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles the --dry-run mode: validates config and shows what would run
fn handle_dry_run(config: &Config) {
    println!("=== Star-Harvest Dry Run ===\n");

    println!("API:");
    println!("  Base URL: {}", config.api.base_url);
    println!("  Credentials: {}", config.api.tokens.len());
    println!(
        "  Timeouts: {}s request, {}s connect",
        config.api.request_timeout_secs, config.api.connect_timeout_secs
    );

    println!("\nFetch Policy:");
    println!("  Max retries: {}", config.fetch.max_retries);
    println!(
        "  Backoff: {}ms base, {}ms cap",
        config.fetch.base_retry_delay_ms, config.fetch.max_retry_delay_ms
    );
    println!(
        "  Circuit breaker: {} failures, {}s recovery",
        config.circuit_breaker.failure_threshold, config.circuit_breaker.recovery_timeout_secs
    );

    println!("\nDiscovery:");
    match config.discovery.source {
        DiscoverySourceKind::Search => {
            println!(
                "  Search, {} per page, {} pages per range",
                config.discovery.per_page, config.discovery.max_pages
            );
            for range in &config.discovery.star_ranges {
                println!("    * {}", range);
            }
        }
        DiscoverySourceKind::Ranking => {
            println!("  Ranking pages at {}", config.discovery.ranking_url);
        }
    }
    println!("  Limit: {}", config.discovery.limit);

    println!("\nWorkers:");
    println!(
        "  {} workers ({:?}, {:?} mode)",
        config.crawler.concurrency, config.crawler.strategy, config.crawler.mode
    );
    println!("  Database permits: {}", config.crawler.db_permits);

    println!("\nOutput:");
    println!("  Database: {}", config.output.database_path);

    println!("\n✓ Configuration is valid");
}

/// Handles the --stats mode: shows statistics from the database
fn handle_stats(config: &Config) -> anyhow::Result<()> {
    println!("Database: {}\n", config.output.database_path);

    let path = Path::new(&config.output.database_path);
    let store = SqliteStore::open(path).context("Failed to open database")?;
    let queue = SqliteWorkQueue::open(path)?;
    let cache = SqliteStateCache::open(path)?;

    let stats = load_statistics(&store, &queue, &cache, 10)?;
    print_statistics(&stats);

    Ok(())
}

/// Handles the --check-tokens mode: prints quota for every credential
async fn handle_check_tokens(config: &Config) -> anyhow::Result<()> {
    let client = build_http_client(&config.user_agent, &config.api)?;
    let endpoints = ApiEndpoints::new(&config.api.base_url)?;

    println!("=== Credential Quota ===\n");
    for (index, token) in config.api.tokens.iter().enumerate() {
        let label = format!("#{}", index);
        match check_quota(&client, &endpoints, token).await {
            Ok(rate) => println!("{}", format_quota(&label, &rate)),
            Err(e) => println!("  {}: unavailable ({})", label, e),
        }
    }

    Ok(())
}

/// Handles the main crawl operation
async fn handle_crawl(config: Config, config_hash: String, fresh: bool) -> anyhow::Result<()> {
    if fresh {
        tracing::info!("Starting fresh crawl (queue and cache cleared)");
    }

    let summary = run_crawl(config, config_hash, fresh)
        .await
        .context("Crawl failed")?;

    print_run_summary(summary.run_id, &summary.tally, &summary.metrics);
    Ok(())
}
