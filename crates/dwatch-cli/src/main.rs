use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use dwatch_adapters::{FixtureRecordSource, RecordSource};
use dwatch_storage::{ImportStore, MemoryStore, PgStore};
use dwatch_sync::{
    kokkai_source_from_config, load_rules, maybe_build_scheduler, parse_sessions, run_session, write_run_report,
    ImportDriver, ImportKind, ImportRunRecord, SessionPlan, SyncConfig,
};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "dwatch")]
#[command(about = "Democracy Watcher importer for Diet proceedings")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Walk sessions page by page, pausing between pages
    Import(ImportArgs),
    /// Print row counts and answerers
    Status,
    /// Link stored speeches to legislators registered after them
    Relink,
    Migrate,
    Serve,
    /// Run the cron-driven import until interrupted
    Schedule,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum KindArg {
    Legislators,
    Speeches,
    All,
}

impl KindArg {
    fn kinds(self) -> &'static [ImportKind] {
        match self {
            Self::Legislators => &[ImportKind::Legislators],
            Self::Speeches => &[ImportKind::Speeches],
            Self::All => &[ImportKind::Legislators, ImportKind::Speeches],
        }
    }
}

#[derive(Debug, Clone, clap::Args)]
struct ImportArgs {
    #[arg(long, value_enum, default_value = "all")]
    kind: KindArg,
    /// `215`, `211,213` or `211-216`; defaults to DW_SESSIONS
    #[arg(long)]
    sessions: Option<String>,
    #[arg(long, default_value_t = 1)]
    start_record: u32,
    #[arg(long)]
    max_pages: Option<u32>,
    /// Milliseconds between pages; defaults to DW_PAGE_DELAY_MS
    #[arg(long)]
    delay_ms: Option<u64>,
    /// Write into an in-memory store instead of Postgres
    #[arg(long)]
    dry_run: bool,
    /// Read `session-{S}-start-{C}.json` envelopes from this directory instead of the API
    #[arg(long)]
    fixtures: Option<PathBuf>,
    #[arg(long)]
    no_report: bool,
}

impl Default for ImportArgs {
    fn default() -> Self {
        Self {
            kind: KindArg::All,
            sessions: None,
            start_record: 1,
            max_pages: None,
            delay_ms: None,
            dry_run: false,
            fixtures: None,
            no_report: false,
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = SyncConfig::from_env();

    match cli.command.unwrap_or_else(|| Commands::Import(ImportArgs::default())) {
        Commands::Import(args) => import(&config, args).await?,
        Commands::Status => {
            let store = open_store(&config, false).await?;
            let rules = load_rules(&config)?;
            let status = store.import_status(&rules.answerer_keywords).await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Commands::Relink => {
            let store = open_store(&config, false).await?;
            let linked = store.link_unmatched_speeches().await?;
            println!("relink complete: linked={linked}");
        }
        Commands::Migrate => {
            let store = PgStore::connect(&config.database_url).await?;
            store.migrate().await.context("applying migrations")?;
            println!("migrations applied");
        }
        Commands::Serve => dwatch_web::serve_from_env().await?,
        Commands::Schedule => schedule(config).await?,
    }

    Ok(())
}

async fn open_store(config: &SyncConfig, dry_run: bool) -> Result<Arc<dyn ImportStore>> {
    if dry_run {
        return Ok(Arc::new(MemoryStore::new()));
    }
    let store = PgStore::connect(&config.database_url)
        .await
        .context("connecting to DATABASE_URL")?;
    Ok(Arc::new(store))
}

fn open_source(config: &SyncConfig, fixtures: Option<PathBuf>) -> Result<Arc<dyn RecordSource>> {
    match fixtures {
        Some(dir) => Ok(Arc::new(FixtureRecordSource::new(dir))),
        None => kokkai_source_from_config(config),
    }
}

async fn import(config: &SyncConfig, args: ImportArgs) -> Result<()> {
    let sessions = match &args.sessions {
        Some(raw) => parse_sessions(raw)?,
        None => config.sessions.clone(),
    };
    let delay = args
        .delay_ms
        .map(Duration::from_millis)
        .unwrap_or_else(|| config.page_delay());

    let source = open_source(config, args.fixtures.clone())?;
    let source_id = source.source_id();
    let store = open_store(config, args.dry_run).await?;
    let driver = ImportDriver::new(source, store.clone(), load_rules(config)?);

    let mode = if args.dry_run { "memory" } else { "postgres" };
    let mut run = ImportRunRecord::new(source_id, mode, Utc::now());
    for &session in &sessions {
        for &kind in args.kind.kinds() {
            let summary = run_session(
                &driver,
                SessionPlan {
                    kind,
                    session,
                    start: args.start_record,
                    page_size: config.page_size,
                    delay,
                    max_pages: args.max_pages,
                },
            )
            .await;
            println!(
                "session {session} {kind}: pages={} fetched={} inserted={} updated={} imported={} skipped={} done={}{}",
                summary.pages,
                summary.fetched,
                summary.inserted,
                summary.updated,
                summary.imported,
                summary.skipped,
                summary.done,
                summary
                    .error
                    .as_deref()
                    .map(|e| format!(" error={e}"))
                    .unwrap_or_default()
            );
            run.sessions.push(summary);
        }
    }

    match store.link_unmatched_speeches().await {
        Ok(linked) => info!(linked, "relinked speeches"),
        Err(err) => warn!(error = %err, "relink after import failed"),
    }

    let run = run.finish(Utc::now());
    if !args.no_report {
        let dir = write_run_report(&config.reports_dir, &run).await?;
        println!("report written to {}", dir.display());
    }
    Ok(())
}

async fn schedule(mut config: SyncConfig) -> Result<()> {
    config.scheduler_enabled = true;
    let store = PgStore::connect(&config.database_url).await?;
    let driver = Arc::new(ImportDriver::new(
        kokkai_source_from_config(&config)?,
        Arc::new(store),
        load_rules(&config)?,
    ));

    let Some(mut sched) = maybe_build_scheduler(&config, driver).await? else {
        return Ok(());
    };
    sched.start().await.context("starting scheduler")?;
    info!(cron = %config.sync_cron, sessions = ?config.sessions, "scheduler running; ctrl-c to stop");

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    sched.shutdown().await.context("stopping scheduler")?;
    Ok(())
}
