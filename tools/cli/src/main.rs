//! tallyfeed CLI - Command line interface for feed sync and report jobs.
//!
//! This tool syncs an item's transactions from the upstream aggregation API
//! into a local SQLite database and runs asynchronous report jobs.

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use tallyfeed_common::{ItemCredential, ItemId};
use tallyfeed_feed::{
    Artifact, ConsumerReportProduct, Environment, FeedClient, PlaidClient, PlaidConfig,
    RawTransaction, ReportParams, ScriptedFeed, ScriptedReports,
};
use tallyfeed_storage::{CursorStore, SqliteStore};
use tallyfeed_sync::{
    ArtifactPlan, CancellationToken, CompletedReport, ReportOrchestrator, SyncCoordinator,
    SyncOutcome, TallyfeedConfig,
};

#[derive(Parser)]
#[command(name = "tallyfeed")]
#[command(about = "tallyfeed - Incremental transaction sync and report jobs")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// JSON configuration file (sync and report tuning).
    #[arg(short, long, env = "TALLYFEED_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Upstream API credentials.
#[derive(Args)]
struct UpstreamArgs {
    /// API client id.
    #[arg(long, env = "TALLYFEED_CLIENT_ID", hide_env_values = true)]
    client_id: String,

    /// API secret.
    #[arg(long, env = "TALLYFEED_SECRET", hide_env_values = true)]
    secret: String,

    /// Upstream environment: "sandbox" or "production".
    #[arg(long = "env", env = "TALLYFEED_ENV", default_value = "sandbox")]
    environment: String,

    /// Override the environment's base URL.
    #[arg(long)]
    base_url: Option<String>,
}

#[derive(Clone, Copy, ValueEnum)]
enum ReportArg {
    /// Asset report over one item.
    Asset,
    /// Consumer report base report, with PDF.
    Base,
    /// Consumer report income insights, with PDF.
    Income,
    /// Consumer report partner insights.
    Partner,
    /// Statement list of one item, with one statement PDF.
    Statements,
}

#[derive(Subcommand)]
enum Commands {
    /// Sync an item's transactions into the database.
    Sync {
        /// Item identifier.
        #[arg(short, long)]
        item: String,

        /// Access token for the item.
        #[arg(short, long, env = "TALLYFEED_ACCESS_TOKEN", hide_env_values = true)]
        access_token: String,

        /// SQLite database path.
        #[arg(short, long)]
        db: PathBuf,

        /// Rewind the cursor and replay the item's full history.
        #[arg(long)]
        resync: bool,

        #[command(flatten)]
        upstream: UpstreamArgs,
    },

    /// Show the committed cursor of an item.
    Cursor {
        /// Item identifier.
        #[arg(short, long)]
        item: String,

        /// SQLite database path.
        #[arg(short, long)]
        db: PathBuf,
    },

    /// List stored transactions of an item, newest first.
    Transactions {
        /// Item identifier.
        #[arg(short, long)]
        item: String,

        /// SQLite database path.
        #[arg(short, long)]
        db: PathBuf,

        /// Number of transactions to show.
        #[arg(short, long, default_value_t = 9)]
        latest: usize,
    },

    /// Run a report job and print its artifacts as JSON.
    Report {
        /// Report to run.
        #[arg(value_enum)]
        kind: ReportArg,

        /// Access token (asset reports and statements).
        #[arg(long, env = "TALLYFEED_ACCESS_TOKEN", hide_env_values = true)]
        access_token: Option<String>,

        /// User token (consumer reports).
        #[arg(long, env = "TALLYFEED_USER_TOKEN", hide_env_values = true)]
        user_token: Option<String>,

        /// History window in days (default from configuration).
        #[arg(long)]
        days: Option<u32>,

        /// Statement to download (default: the first one listed).
        #[arg(long)]
        statement_id: Option<String>,

        #[command(flatten)]
        upstream: UpstreamArgs,
    },

    /// Run a scripted feed and report end to end, without network access.
    Demo {
        /// SQLite database path.
        #[arg(short, long)]
        db: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = match &cli.config {
        Some(path) => TallyfeedConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => TallyfeedConfig::default(),
    };
    let cancel = cancel_on_ctrl_c();

    match cli.command {
        Commands::Sync {
            item,
            access_token,
            db,
            resync,
            upstream,
        } => cmd_sync(&config, &upstream, &item, access_token, &db, resync, &cancel).await,

        Commands::Cursor { item, db } => cmd_cursor(&item, &db).await,

        Commands::Transactions { item, db, latest } => cmd_transactions(&item, &db, latest).await,

        Commands::Report {
            kind,
            access_token,
            user_token,
            days,
            statement_id,
            upstream,
        } => {
            let tokens = ReportTokens {
                access_token,
                user_token,
                statement_id,
            };
            cmd_report(&config, &upstream, kind, tokens, days, &cancel).await
        }

        Commands::Demo { db } => cmd_demo(&config, &db, &cancel).await,
    }
}

/// Token cancelled on the first Ctrl-C.
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling");
            trigger.cancel();
        }
    });
    cancel
}

fn plaid_client(upstream: &UpstreamArgs) -> Result<PlaidClient> {
    let environment: Environment = upstream.environment.parse()?;
    let mut config = PlaidConfig::new(&upstream.client_id, &upstream.secret, environment)
        .context("Invalid API credentials")?;
    if let Some(base_url) = &upstream.base_url {
        config = config.with_base_url(base_url);
    }
    PlaidClient::new(config).context("Failed to create API client")
}

fn open_store(db: &Path) -> Result<Arc<SqliteStore>> {
    let store = SqliteStore::open(db)
        .with_context(|| format!("Failed to open database {}", db.display()))?;
    Ok(Arc::new(store))
}

fn print_outcome(item: &ItemId, outcome: &SyncOutcome) {
    let delta = outcome.delta();
    println!("Item: {}", item);
    println!("  Added: {}", delta.added.len());
    println!("  Modified: {}", delta.modified.len());
    println!("  Removed: {}", delta.removed.len());
    println!("  Cursor: {}", delta.next_cursor);
    if let SyncOutcome::Stalled(stalled) = outcome {
        println!(
            "Upstream is still preparing data ({} empty pages). Progress saved; try again later.",
            stalled.stalled_fetches
        );
    }
}

/// Run one pass through the coordinator.
async fn run_sync<F, S>(
    coordinator: &SyncCoordinator<F, S>,
    item: &ItemId,
    credential: &ItemCredential,
    resync: bool,
    cancel: &CancellationToken,
) -> Result<SyncOutcome>
where
    F: FeedClient + ?Sized,
    S: CursorStore + ?Sized,
{
    let outcome = if resync {
        coordinator.resync(item, credential, cancel).await
    } else {
        coordinator.sync(item, credential, cancel).await
    };
    outcome.with_context(|| format!("Sync failed for item {}", item))
}

/// Sync an item from the upstream API.
async fn cmd_sync(
    config: &TallyfeedConfig,
    upstream: &UpstreamArgs,
    item: &str,
    access_token: String,
    db: &Path,
    resync: bool,
    cancel: &CancellationToken,
) -> Result<()> {
    let item = ItemId::new(item).context("Invalid item id")?;
    let credential = ItemCredential::new(access_token);
    info!("Syncing item {} into {}", item, db.display());

    let feed = Arc::new(plaid_client(upstream)?);
    let coordinator = SyncCoordinator::new(feed, open_store(db)?, config.sync.clone());

    let outcome = run_sync(&coordinator, &item, &credential, resync, cancel).await?;
    print_outcome(&item, &outcome);
    Ok(())
}

/// Show the committed cursor.
async fn cmd_cursor(item: &str, db: &Path) -> Result<()> {
    let item = ItemId::new(item).context("Invalid item id")?;
    let store = open_store(db)?;

    let cursor = store.load(&item).await.context("Failed to load cursor")?;
    println!("{}: {}", item, cursor);
    Ok(())
}

/// List the newest stored transactions.
async fn cmd_transactions(item: &str, db: &Path, latest: usize) -> Result<()> {
    let item = ItemId::new(item).context("Invalid item id")?;
    let store = open_store(db)?;

    let transactions = store
        .transactions(&item)
        .await
        .context("Failed to read transactions")?;

    if transactions.is_empty() {
        println!("No transactions stored for {}.", item);
        return Ok(());
    }

    println!("Latest transactions of {} ({} stored):", item, transactions.len());
    for tx in transactions.iter().rev().take(latest) {
        let pending = if tx.pending { " [pending]" } else { "" };
        let merchant = tx.merchant_name.as_deref().unwrap_or(&tx.name);
        println!(
            "  {}  {:>10.2} {}  {}{}",
            tx.posted_date, tx.amount, tx.currency_code, merchant, pending
        );
    }
    Ok(())
}

fn report_json(report: &CompletedReport<impl Sized>) -> serde_json::Value {
    let artifacts: Vec<serde_json::Value> = report
        .artifacts
        .iter()
        .map(|artifact| match artifact {
            Artifact::Structured(body) => serde_json::json!({
                "kind": "structured",
                "body": body,
            }),
            Artifact::Document(bytes) => serde_json::json!({
                "kind": "document",
                "base64": STANDARD.encode(bytes),
            }),
        })
        .collect();
    serde_json::json!({ "artifacts": artifacts })
}

/// Caller-supplied identifiers for a report run.
struct ReportTokens {
    access_token: Option<String>,
    user_token: Option<String>,
    statement_id: Option<String>,
}

/// Parameters and artifact plan for a report run.
fn report_request(
    kind: ReportArg,
    tokens: ReportTokens,
    days_requested: u32,
) -> Result<(ReportParams, ArtifactPlan)> {
    let access_token = |what: &str| -> Result<ItemCredential> {
        let token = tokens
            .access_token
            .clone()
            .with_context(|| format!("--access-token is required for {}", what))?;
        Ok(ItemCredential::new(token))
    };
    let consumer = |product: ConsumerReportProduct| -> Result<ReportParams> {
        let token = tokens
            .user_token
            .clone()
            .context("--user-token is required for consumer reports")?;
        Ok(ReportParams::ConsumerReport {
            user_token: ItemCredential::new(token),
            product,
            days_requested,
        })
    };

    let params = match kind {
        ReportArg::Asset => ReportParams::Asset {
            access_tokens: vec![access_token("asset reports")?],
            days_requested,
        },
        ReportArg::Base => consumer(ConsumerReportProduct::BaseReport)?,
        ReportArg::Income => consumer(ConsumerReportProduct::IncomeInsights)?,
        ReportArg::Partner => consumer(ConsumerReportProduct::PartnerInsights)?,
        ReportArg::Statements => ReportParams::Statements {
            access_token: access_token("statements")?,
        },
    };

    let plan = match (&params, tokens.statement_id) {
        (ReportParams::Statements { .. }, Some(id)) => ArtifactPlan::structured_with_document([id]),
        _ => ArtifactPlan::for_kind(params.kind()),
    };
    Ok((params, plan))
}

/// Run a report job against the upstream API.
async fn cmd_report(
    config: &TallyfeedConfig,
    upstream: &UpstreamArgs,
    kind: ReportArg,
    tokens: ReportTokens,
    days: Option<u32>,
    cancel: &CancellationToken,
) -> Result<()> {
    let days_requested = days.unwrap_or(config.report.days_requested);
    let (params, plan) = report_request(kind, tokens, days_requested)?;

    let orchestrator = ReportOrchestrator::new(plaid_client(upstream)?, config.report.policy.clone());
    let report = match orchestrator.run(&params, &plan, cancel).await {
        Ok(report) => report,
        Err(e) if e.is_retryable_later() => {
            anyhow::bail!("Report is still being generated ({}). Try again later.", e)
        }
        Err(e) => return Err(e).context("Report job failed"),
    };

    println!("{}", serde_json::to_string_pretty(&report_json(&report))?);
    Ok(())
}

fn demo_tx(id: &str, amount: f64, date: &str, name: &str) -> RawTransaction {
    RawTransaction::new(id, "demo-checking", amount, date).with_name(name)
}

/// Scripted sync and report run against a real database.
async fn cmd_demo(config: &TallyfeedConfig, db: &Path, cancel: &CancellationToken) -> Result<()> {
    info!("Running scripted demo into {}", db.display());

    let feed = Arc::new(ScriptedFeed::new());
    feed.push_page(
        vec![
            demo_tx("demo-1", 12.5, "2024-03-01", "Blue Bottle Coffee"),
            demo_tx("demo-2", 89.4, "2024-03-02", "SparkFun"),
            demo_tx("demo-3", -1500.0, "2024-03-03", "Payroll"),
        ],
        vec![],
        vec![],
        true,
    );
    feed.push_page(
        vec![demo_tx("demo-4", 4.33, "2024-03-04", "Metro")],
        vec![demo_tx("demo-2", 79.4, "2024-03-02", "SparkFun").with_pending(false)],
        vec!["demo-1"],
        false,
    );
    // The upstream needs one extra round before publishing the second page.
    feed.stall_at("c1", 1)?;

    let item = ItemId::new("demo-item")?;
    let credential = ItemCredential::new("access-demo");
    let coordinator = SyncCoordinator::new(feed, open_store(db)?, config.sync.clone());

    let outcome = run_sync(&coordinator, &item, &credential, false, cancel).await?;
    print_outcome(&item, &outcome);
    cmd_transactions(item.as_str(), db, 9).await?;

    let orchestrator = ReportOrchestrator::new(ScriptedReports::new(2), config.report.policy.clone());
    let params = ReportParams::Asset {
        access_tokens: vec![credential],
        days_requested: config.report.days_requested,
    };
    let report = orchestrator
        .run(&params, &ArtifactPlan::for_kind(params.kind()), cancel)
        .await
        .context("Demo report failed")?;

    println!(
        "Report ready after {} status checks:",
        orchestrator.client().status_calls()
    );
    println!("{}", serde_json::to_string_pretty(&report_json(&report))?);
    Ok(())
}
