use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use rusqlite::Connection;
use tracing::{debug, warn};

use crate::error::IngestError;
use crate::parser::assembler::{CongressRecord, DocumentRecord, MetaRecord, Record};

/// Persistence boundary: one call per completed record, committed immediately.
pub trait RecordSink {
    fn persist(&mut self, record: &Record) -> Result<(), IngestError>;
}

/// Opens a fresh sink for each source; dropping the sink releases it.
pub trait SinkFactory {
    type Sink: RecordSink;

    fn open(&self) -> Result<Self::Sink, IngestError>;
}

pub fn connect(path: &Path) -> Result<Connection> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {:?}", dir))?;
    }
    let conn = Connection::open(path).with_context(|| format!("Failed to open {:?}", path))?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS congress_meta_tbl (
            id          INTEGER PRIMARY KEY,
            pubdate     TEXT NOT NULL,
            pubdate_iso TEXT,
            permalink   TEXT UNIQUE NOT NULL,
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS news_tbl (
            id         INTEGER PRIMARY KEY,
            doc_id     TEXT UNIQUE NOT NULL,
            doc_text   TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS congress_tbl (
            id         INTEGER PRIMARY KEY,
            title      TEXT NOT NULL,
            committee  TEXT NOT NULL,
            meta       TEXT NOT NULL,
            full_text  TEXT NOT NULL,
            permalink  TEXT UNIQUE NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS ingest_runs (
            run_id      TEXT PRIMARY KEY,
            pass        TEXT NOT NULL,
            started_at  TEXT NOT NULL,
            finished_at TEXT NOT NULL,
            report      TEXT NOT NULL
        );
        ",
    )?;
    Ok(())
}

// ── Sink ──

/// SQLite-backed sink factory. Each `open` gets its own connection.
pub struct SqliteStore {
    path: PathBuf,
}

impl SqliteStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        SqliteStore { path: path.into() }
    }
}

impl SinkFactory for SqliteStore {
    type Sink = SqliteSink;

    fn open(&self) -> Result<SqliteSink, IngestError> {
        let conn = connect(&self.path).map_err(|e| IngestError::SinkUnavailable(format!("{:#}", e)))?;
        Ok(SqliteSink { conn })
    }
}

pub struct SqliteSink {
    conn: Connection,
}

impl SqliteSink {
    fn insert_meta(&self, r: &MetaRecord) -> rusqlite::Result<usize> {
        let iso = parse_pubdate(&r.pubdate).map(|d| d.to_string());
        if iso.is_none() {
            warn!(pubdate = %r.pubdate, permalink = %r.permalink, "publication date is not a calendar date");
        }
        self.conn.prepare_cached(
            "INSERT INTO congress_meta_tbl (pubdate, pubdate_iso, permalink) VALUES (?1, ?2, ?3)",
        )?
        .execute(rusqlite::params![r.pubdate, iso, r.permalink])
    }

    fn insert_document(&self, r: &DocumentRecord) -> rusqlite::Result<usize> {
        self.conn
            .prepare_cached("INSERT INTO news_tbl (doc_id, doc_text) VALUES (?1, ?2)")?
            .execute(rusqlite::params![r.doc_id, r.text])
    }

    fn insert_congress(&self, r: &CongressRecord) -> rusqlite::Result<usize> {
        self.conn
            .prepare_cached(
                "INSERT INTO congress_tbl (title, committee, meta, full_text, permalink)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?
            .execute(rusqlite::params![r.title, r.committee, r.meta, r.full_text, r.permalink])
    }
}

impl RecordSink for SqliteSink {
    fn persist(&mut self, record: &Record) -> Result<(), IngestError> {
        // Autocommit: each insert is durable on return.
        match record {
            Record::Meta(r) => self.insert_meta(r)?,
            Record::Document(r) => self.insert_document(r)?,
            Record::Congress(r) => self.insert_congress(r)?,
        };
        debug!(key = %record.key(), "record persisted");
        Ok(())
    }
}

/// "January 01, 2020" or "Jan 01, 2020" as a calendar date.
pub fn parse_pubdate(raw: &str) -> Option<NaiveDate> {
    let normalized = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    // Allow a missing space between month and day, as the date pattern does.
    let spaced = match normalized.find(|c: char| c.is_ascii_digit()) {
        Some(i) if i > 0 && !normalized[..i].ends_with(' ') => {
            format!("{} {}", &normalized[..i], &normalized[i..])
        }
        _ => normalized,
    };
    NaiveDate::parse_from_str(&spaced, "%B %d, %Y")
        .or_else(|_| NaiveDate::parse_from_str(&spaced, "%b %d, %Y"))
        .ok()
}

// ── Page pass input ──

/// Permalinks from the index pass that have no scraped document yet, in insertion order.
pub fn fetch_unscraped_permalinks(conn: &Connection, limit: Option<usize>) -> Result<Vec<String>> {
    let sql = format!(
        "SELECT m.permalink
         FROM congress_meta_tbl m
         LEFT JOIN congress_tbl c ON c.permalink = m.permalink
         WHERE c.permalink IS NULL
         ORDER BY m.id{}",
        match limit {
            Some(n) => format!(" LIMIT {}", n),
            None => String::new(),
        }
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(rows)
}

// ── Run ledger ──

pub struct RunRow {
    pub run_id: String,
    pub pass: String,
    pub started_at: String,
    pub finished_at: String,
    pub report: String,
}

pub fn insert_run(conn: &Connection, row: &RunRow) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO ingest_runs (run_id, pass, started_at, finished_at, report)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        rusqlite::params![row.run_id, row.pass, row.started_at, row.finished_at, row.report],
    )?;
    Ok(())
}

pub fn fetch_runs(conn: &Connection, limit: usize) -> Result<Vec<RunRow>> {
    let mut stmt = conn.prepare(
        "SELECT run_id, pass, started_at, finished_at, report
         FROM ingest_runs
         ORDER BY started_at DESC
         LIMIT ?1",
    )?;
    let rows = stmt
        .query_map([limit as i64], |row| {
            Ok(RunRow {
                run_id: row.get(0)?,
                pass: row.get(1)?,
                started_at: row.get(2)?,
                finished_at: row.get(3)?,
                report: row.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ── Stats ──

pub struct Stats {
    pub meta: usize,
    pub meta_undated: usize,
    pub news: usize,
    pub congress: usize,
    pub unscraped: usize,
    pub runs: usize,
}

pub fn get_stats(conn: &Connection) -> Result<Stats> {
    let meta: usize = conn.query_row("SELECT COUNT(*) FROM congress_meta_tbl", [], |r| r.get(0))?;
    let meta_undated: usize = conn.query_row(
        "SELECT COUNT(*) FROM congress_meta_tbl WHERE pubdate_iso IS NULL",
        [],
        |r| r.get(0),
    )?;
    let news: usize = conn.query_row("SELECT COUNT(*) FROM news_tbl", [], |r| r.get(0))?;
    let congress: usize = conn.query_row("SELECT COUNT(*) FROM congress_tbl", [], |r| r.get(0))?;
    let unscraped: usize = conn.query_row(
        "SELECT COUNT(*) FROM congress_meta_tbl m
         WHERE NOT EXISTS (SELECT 1 FROM congress_tbl c WHERE c.permalink = m.permalink)",
        [],
        |r| r.get(0),
    )?;
    let runs: usize = conn.query_row("SELECT COUNT(*) FROM ingest_runs", [], |r| r.get(0))?;
    Ok(Stats {
        meta,
        meta_undated,
        news,
        congress,
        unscraped,
        runs,
    })
}
