mod browser;
mod credentials;
mod db;
mod error;
mod ingest;
mod parser;
mod portal;
mod settings;

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Context;
use chrono::{SecondsFormat, Utc};
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::browser::HttpPageSession;
use crate::credentials::Credentials;
use crate::error::IngestError;
use crate::ingest::IngestReport;
use crate::parser::assembler::RecordShape;
use crate::portal::FieldExtractionAdapter;
use crate::settings::Settings;

#[derive(Parser)]
#[command(name = "proquest_ingest", about = "ProQuest export and portal ingestion into SQLite")]
struct Cli {
    /// Settings file (default: ./ingest.toml if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan congressional index exports for date/permalink pairs
    Congress {
        /// Directory of *.txt exports (default: congress_dir setting)
        #[arg(short, long)]
        dir: Option<PathBuf>,
        /// Max files to scan
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Scan newspaper exports for document ids and full text
    News {
        /// Directory of *.txt exports (default: news_dir setting)
        #[arg(short, long)]
        dir: Option<PathBuf>,
        /// Max files to scan
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Visit permalinks not yet scraped and store their document pages
    Scrape {
        /// Max pages to visit (default: all unscraped)
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Show row counts
    Stats,
    /// Show recent runs and their data-quality reports
    Runs {
        #[arg(short = 'n', long, default_value = "10")]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref()).context("Failed to load settings")?;
    init_tracing(&settings)?;

    let t0 = Instant::now();

    let result = match cli.command {
        Commands::Congress { dir, limit } => {
            let dir = dir.unwrap_or_else(|| settings.congress_dir.clone());
            run_file_pass("congress", RecordShape::Meta, &dir, limit, &settings)
        }
        Commands::News { dir, limit } => {
            let dir = dir.unwrap_or_else(|| settings.news_dir.clone());
            run_file_pass("news", RecordShape::Document, &dir, limit, &settings)
        }
        Commands::Scrape { limit } => run_scrape(limit, &settings).await,
        Commands::Stats => {
            let conn = db::connect(&settings.db_path)?;
            db::init_schema(&conn)?;
            let s = db::get_stats(&conn)?;
            println!("Meta rows:     {} ({} undated)", s.meta, s.meta_undated);
            println!("News rows:     {}", s.news);
            println!("Congress rows: {}", s.congress);
            println!("Unscraped:     {}", s.unscraped);
            println!("Runs:          {}", s.runs);
            Ok(())
        }
        Commands::Runs { limit } => {
            let conn = db::connect(&settings.db_path)?;
            db::init_schema(&conn)?;
            let rows = db::fetch_runs(&conn, limit)?;
            if rows.is_empty() {
                println!("No runs recorded.");
                return Ok(());
            }
            for r in &rows {
                println!("{} | {:<8} | {} -> {}", r.run_id, r.pass, r.started_at, r.finished_at);
                println!("    {}", r.report);
            }
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn init_tracing(settings: &Settings) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.log_level.as_str()));
    match &settings.log_file {
        Some(path) => {
            if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
                std::fs::create_dir_all(dir)
                    .with_context(|| format!("Failed to create {:?}", dir))?;
            }
            let file = std::fs::File::create(path)
                .with_context(|| format!("Failed to open log file {:?}", path))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
    Ok(())
}

fn run_file_pass(
    pass: &str,
    shape: RecordShape,
    dir: &Path,
    limit: Option<usize>,
    settings: &Settings,
) -> anyhow::Result<()> {
    let conn = db::connect(&settings.db_path)?;
    db::init_schema(&conn)?;

    let mut paths = ingest::list_sources(dir)?;
    if let Some(n) = limit {
        paths.truncate(n);
    }
    if paths.is_empty() {
        println!("No *.txt sources in {}.", dir.display());
        return Ok(());
    }
    println!("Scanning {} files from {}...", paths.len(), dir.display());

    let started = Utc::now();
    let store = db::SqliteStore::new(&settings.db_path);
    let mut report = IngestReport::default();
    let outcome = ingest::ingest_files(
        &paths,
        shape,
        &store,
        settings.accept_unterminated_body,
        &mut report,
    );
    finish_run(&conn, pass, started, &report, outcome)
}

async fn run_scrape(limit: Option<usize>, settings: &Settings) -> anyhow::Result<()> {
    let conn = db::connect(&settings.db_path)?;
    db::init_schema(&conn)?;

    let permalinks = db::fetch_unscraped_permalinks(&conn, limit)?;
    if permalinks.is_empty() {
        println!("No unscraped permalinks. Run 'congress' first or all pages are stored.");
        return Ok(());
    }
    let credentials = Credentials::load(&settings.credentials_path)?;
    println!("Scraping {} pages...", permalinks.len());

    let started = Utc::now();
    let store = db::SqliteStore::new(&settings.db_path);
    let session = HttpPageSession::new(&settings.portal)?;
    let mut adapter = FieldExtractionAdapter::new(session, &credentials, &settings.portal);
    let mut report = IngestReport::default();
    let outcome =
        portal::scrape_permalinks(&mut adapter, &permalinks, &store, &mut report).await;
    finish_run(&conn, "scrape", started, &report, outcome)
}

/// Print and record the run's report, then surface a fatal pass error if there was one.
fn finish_run(
    conn: &rusqlite::Connection,
    pass: &str,
    started: chrono::DateTime<Utc>,
    report: &IngestReport,
    outcome: Result<(), IngestError>,
) -> anyhow::Result<()> {
    let finished = Utc::now();
    report.print();

    let row = db::RunRow {
        run_id: format!("{}-{}", pass, started.format("%Y%m%dT%H%M%S%.3f")),
        pass: pass.to_string(),
        started_at: started.to_rfc3339_opts(SecondsFormat::Secs, true),
        finished_at: finished.to_rfc3339_opts(SecondsFormat::Secs, true),
        report: serde_json::to_string(report)?,
    };
    if let Err(e) = db::insert_run(conn, &row) {
        error!(run = %row.run_id, error = %e, "failed to record run");
    } else {
        info!(run = %row.run_id, pass, "run recorded");
    }

    outcome.with_context(|| format!("{} pass aborted", pass))
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
