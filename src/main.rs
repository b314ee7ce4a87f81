// 🏛️ disclosure-monitor CLI
// run / status / list / show / reset / delete / extract

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use disclosure_monitor::{
    Admin, BarkNotifier, ExtractionReport, Extractor, FilingFilter, FilingStatus,
    HouseClerkScraper, LoggingConfig, MonitorConfig, Pipeline, RecordStore, RetryPolicy,
    RunOptions,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "disclosure-monitor", version, about = "Congressional trading disclosure monitor")]
struct Cli {
    /// Directory with default.toml and <DISCLOSURE_ENV>.toml
    #[arg(long, env = "DISCLOSURE_CONFIG_DIR", default_value = "config")]
    config_dir: PathBuf,

    /// Override the data directory from configuration
    #[arg(long)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scrape, extract and notify once
    Run {
        /// Scrape even if the last scrape is recent
        #[arg(long)]
        force: bool,
    },
    /// Filing counts per status
    Status,
    /// List filings, newest first
    List {
        #[arg(long)]
        status: Option<String>,
        /// Member name substring
        #[arg(long)]
        member: Option<String>,
    },
    /// Show one filing with its transactions
    Show { filing_id: String },
    /// Give a failed filing its retries back
    Reset { filing_id: String },
    /// Remove a filing and its transactions
    Delete {
        filing_id: String,
        /// Report what would be removed without removing it
        #[arg(long)]
        dry_run: bool,
    },
    /// Extract a local document without touching the store
    Extract {
        path: PathBuf,
        #[arg(long, default_value = "local")]
        filing_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let mut config = MonitorConfig::load_from(&cli.config_dir)
        .with_context(|| format!("failed to load configuration from {}", cli.config_dir.display()))?;
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = data_dir;
    }
    if let Err(errors) = config.validate() {
        bail!("invalid configuration:\n  {}", errors.join("\n  "));
    }

    init_logging(&config.logging);

    match cli.command {
        Commands::Run { force } => run(&config, force).await,
        Commands::Status => show_status(&config),
        Commands::List { status, member } => list(&config, status, member),
        Commands::Show { filing_id } => show(&config, &filing_id),
        Commands::Reset { filing_id } => reset(&config, &filing_id),
        Commands::Delete { filing_id, dry_run } => delete(&config, &filing_id, dry_run),
        Commands::Extract { path, filing_id } => extract(&path, &filing_id),
    }
}

fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("{},disclosure_monitor=debug", config.level))
    });

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if config.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn open_store(config: &MonitorConfig) -> Result<Arc<RecordStore>> {
    let store = RecordStore::open(&config.data_dir)
        .with_context(|| format!("failed to open store at {}", config.data_dir.display()))?;
    Ok(Arc::new(store))
}

fn admin(config: &MonitorConfig) -> Result<Admin> {
    Ok(Admin::new(open_store(config)?, config.pipeline.max_retry_attempts))
}

async fn run(config: &MonitorConfig, force: bool) -> Result<()> {
    let store = open_store(config)?;
    let retry = RetryPolicy::from_config(&config.network);
    let scraper = HouseClerkScraper::new(&config.scraper, retry.clone())
        .context("failed to build scraper")?;
    let notifier =
        BarkNotifier::new(&config.notifier, retry).context("failed to build notifier")?;

    let pipeline = Pipeline::new(
        store,
        Arc::new(scraper),
        Arc::new(notifier),
        config.pipeline.clone(),
    );
    let summary = pipeline
        .run(RunOptions {
            force_scrape: force,
        })
        .await
        .context("pipeline run aborted")?;

    println!("{}", summary);
    Ok(())
}

fn show_status(config: &MonitorConfig) -> Result<()> {
    let admin = admin(config)?;
    let summary = admin.tracker().summary()?;

    println!("📊 Filings: {}", summary.total);
    for (status, count) in &summary.by_status {
        println!("   {:<12} {}", status.as_str(), count);
    }
    if summary.terminal_failed > 0 {
        println!("   ❌ {} failed with no retries left", summary.terminal_failed);
    }
    Ok(())
}

fn list(config: &MonitorConfig, status: Option<String>, member: Option<String>) -> Result<()> {
    let status = match status {
        Some(raw) => match FilingStatus::parse(&raw) {
            Some(status) => Some(status),
            None => bail!("unknown status '{}'", raw),
        },
        None => None,
    };

    let filings = admin(config)?.list_filings(&FilingFilter { status, member })?;
    for filing in &filings {
        println!(
            "{:<10} {:<11} {} {:<32} {}",
            filing.filing_id,
            filing.status.as_str(),
            filing.filing_date.format("%Y-%m-%d"),
            filing.member_name,
            filing.office.as_deref().unwrap_or("-")
        );
    }
    println!("({} filings)", filings.len());
    Ok(())
}

fn show(config: &MonitorConfig, filing_id: &str) -> Result<()> {
    let detail = admin(config)?.show_filing(filing_id)?;
    let filing = &detail.filing;

    println!("📄 {} - {}", filing.filing_id, filing.member_name);
    println!("   Status:   {} (attempts: {})", filing.status, filing.attempt_count);
    println!("   Filed:    {}", filing.filing_date);
    println!("   Document: {}", filing.document_url);
    if let Some(error) = &filing.last_error {
        println!("   Error:    {}", error);
    }
    for diagnostic in &filing.diagnostics {
        println!("   ⚠️  {}", diagnostic);
    }
    for transaction in &detail.transactions {
        println!("   {:>3}. {}", transaction.line_index, transaction.headline());
    }
    Ok(())
}

fn reset(config: &MonitorConfig, filing_id: &str) -> Result<()> {
    let filing = admin(config)?.reset_filing(filing_id)?;
    println!("✓ {} reset, will be retried on the next run", filing.filing_id);
    Ok(())
}

fn delete(config: &MonitorConfig, filing_id: &str, dry_run: bool) -> Result<()> {
    let admin = admin(config)?;
    if dry_run {
        let report = admin.preview_deletion(filing_id)?;
        println!(
            "🔍 Would delete {} and {} transaction(s)",
            report.filing_id, report.transactions_removed
        );
        return Ok(());
    }

    let report = admin.delete_filing(filing_id)?;
    println!(
        "🗑️  Deleted {} and {} transaction(s)",
        report.filing_id, report.transactions_removed
    );
    Ok(())
}

fn extract(path: &Path, filing_id: &str) -> Result<()> {
    let stream = Extractor::new()
        .extract_path(filing_id, path)
        .with_context(|| format!("failed to extract {}", path.display()))?;
    println!("📑 Layout: {}", stream.layout().name());

    let report = ExtractionReport::collect(stream);
    for transaction in &report.transactions {
        println!("   {:>3}. {}", transaction.line_index, transaction.headline());
    }
    for line in report.diagnostic_lines() {
        println!("   ⚠️  {}", line);
    }
    println!("{}", report.summary());
    Ok(())
}
