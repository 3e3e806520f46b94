//! JSONL session log with credential scrubbing and retention.
//!
//! Records land in `<root>/<yyyy>/<mm>/session.jsonl`. When a record had
//! anything masked, a line naming the masked kinds is appended to the sibling
//! `audit.jsonl`.

use anyhow::{Context, Result};
use chrono::{DateTime, Datelike, Utc};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};

const LOG_DIR_ENV: &str = "DEEPSEARCH_LOG_DIR";
const RETENTION_ENV: &str = "DEEPSEARCH_LOG_RETENTION_DAYS";
const DEFAULT_LOG_DIR: &str = "data/logs";
const DEFAULT_RETENTION_DAYS: u64 = 90;
const SESSION_FILE: &str = "session.jsonl";
const AUDIT_FILE: &str = "audit.jsonl";

static CREDENTIAL_PATTERNS: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    vec![
        (
            "api_key",
            Regex::new(r"(?i)(api[_-]?key\s*[:=]\s*)([A-Za-z0-9\-_.+/]+)")
                .expect("invalid api_key regex"),
        ),
        (
            "secret",
            Regex::new(r"(?i)(secret\s*[:=]\s*)([A-Za-z0-9\-_.+/]+)")
                .expect("invalid secret regex"),
        ),
        (
            "bearer",
            Regex::new(r"(?i)(bearer\s+)([A-Za-z0-9\-_.+=/]+)").expect("invalid bearer regex"),
        ),
        (
            "sk_token",
            Regex::new(r"(sk-[A-Za-z0-9]{16,})").expect("invalid sk_token regex"),
        ),
    ]
});

/// What gets recorded about a finished research session.
#[derive(Debug, Clone)]
pub struct SessionLogInput {
    pub session_id: String,
    pub question: Option<String>,
    pub answer: String,
    pub is_final: bool,
    pub steps: u32,
    pub sources: Vec<String>,
    pub trace_path: Option<String>,
}

#[derive(Serialize)]
struct SessionRecord {
    timestamp: String,
    session_id: String,
    question: Option<String>,
    answer: String,
    is_final: bool,
    steps: u32,
    sources: Vec<String>,
    trace_path: Option<String>,
    redactions: Vec<&'static str>,
}

#[derive(Serialize)]
struct AuditRecord<'a> {
    timestamp: &'a str,
    session_id: &'a str,
    redactions: &'a [&'static str],
}

/// Masks credential-looking substrings and remembers which kinds it hit.
#[derive(Default)]
struct Scrubber {
    hits: BTreeSet<&'static str>,
}

impl Scrubber {
    fn scrub(&mut self, text: &str) -> String {
        let mut output = text.to_string();
        for (kind, pattern) in CREDENTIAL_PATTERNS.iter() {
            if !pattern.is_match(&output) {
                continue;
            }
            self.hits.insert(*kind);
            output = pattern
                .replace_all(&output, |caps: &Captures| {
                    // Keep the `key=` prefix when the pattern captured one.
                    if caps.len() > 2 {
                        format!("{}[REDACTED]", &caps[1])
                    } else {
                        "[REDACTED]".to_string()
                    }
                })
                .into_owned();
        }
        output
    }

    fn into_kinds(self) -> Vec<&'static str> {
        self.hits.into_iter().collect()
    }
}

/// Configured directory, else `DEEPSEARCH_LOG_DIR`, else `data/logs`.
pub fn log_base_dir(configured: Option<&Path>) -> PathBuf {
    if let Some(dir) = configured {
        return dir.to_path_buf();
    }
    std::env::var(LOG_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_LOG_DIR))
}

/// A session log rooted at one directory.
#[derive(Debug, Clone)]
pub struct SessionLog {
    root: PathBuf,
    retention: Option<Duration>,
}

impl SessionLog {
    /// Resolve the root via [`log_base_dir`] and the retention window from
    /// `DEEPSEARCH_LOG_RETENTION_DAYS` (default 90, `0` keeps everything).
    pub fn open(dir: Option<&Path>) -> Self {
        let days = std::env::var(RETENTION_ENV)
            .ok()
            .and_then(|value| value.trim().parse::<u64>().ok())
            .unwrap_or(DEFAULT_RETENTION_DAYS);
        Self {
            root: log_base_dir(dir),
            retention: (days > 0).then(|| Duration::from_secs(days.saturating_mul(86_400))),
        }
    }

    pub fn with_retention(mut self, retention: Option<Duration>) -> Self {
        self.retention = retention;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Append a scrubbed record and return the session file it went to.
    pub fn append(&self, input: SessionLogInput) -> Result<PathBuf> {
        let now = Utc::now();
        let mut scrubber = Scrubber::default();

        let question = input.question.as_deref().map(|text| scrubber.scrub(text));
        let answer = scrubber.scrub(&input.answer);
        let sources = input
            .sources
            .iter()
            .map(|source| scrubber.scrub(source))
            .collect();

        let record = SessionRecord {
            timestamp: now.to_rfc3339(),
            session_id: input.session_id,
            question,
            answer,
            is_final: input.is_final,
            steps: input.steps,
            sources,
            trace_path: input.trace_path,
            redactions: scrubber.into_kinds(),
        };

        let month = self.month_dir(now);
        let session_path = month.join(SESSION_FILE);
        append_line(&session_path, &record)?;

        if !record.redactions.is_empty() {
            let audit = AuditRecord {
                timestamp: &record.timestamp,
                session_id: &record.session_id,
                redactions: &record.redactions,
            };
            append_line(&month.join(AUDIT_FILE), &audit)?;
            warn!(
                session_id = %record.session_id,
                kinds = ?record.redactions,
                "masked credentials in session log"
            );
        }

        self.prune()?;
        Ok(session_path)
    }

    /// Drop every session and audit line for `session_id`; returns how many went.
    pub fn forget(&self, session_id: &str) -> Result<usize> {
        let mut removed = 0;
        for month in self.month_dirs()? {
            for name in [SESSION_FILE, AUDIT_FILE] {
                removed += drop_session_lines(&month.join(name), session_id)?;
            }
            remove_if_empty(&month);
        }
        self.remove_empty_years()?;
        Ok(removed)
    }

    fn month_dir(&self, at: DateTime<Utc>) -> PathBuf {
        self.root
            .join(format!("{:04}", at.year()))
            .join(format!("{:02}", at.month()))
    }

    fn month_dirs(&self) -> Result<Vec<PathBuf>> {
        let mut months = Vec::new();
        for year in subdirectories(&self.root)? {
            months.extend(subdirectories(&year)?);
        }
        Ok(months)
    }

    fn remove_empty_years(&self) -> Result<()> {
        for year in subdirectories(&self.root)? {
            remove_if_empty(&year);
        }
        Ok(())
    }

    fn prune(&self) -> Result<()> {
        let Some(retention) = self.retention else {
            return Ok(());
        };
        let cutoff = SystemTime::now()
            .checked_sub(retention)
            .unwrap_or(SystemTime::UNIX_EPOCH);

        for month in self.month_dirs()? {
            for entry in fs::read_dir(&month)? {
                let entry = entry?;
                let expired = entry
                    .metadata()
                    .and_then(|meta| meta.modified())
                    .is_ok_and(|modified| modified < cutoff);
                if expired {
                    debug!(path = %entry.path().display(), "pruning expired session log");
                    fs::remove_file(entry.path()).ok();
                }
            }
            remove_if_empty(&month);
        }
        self.remove_empty_years()
    }
}

/// Append to the session log rooted at `dir` (see [`log_base_dir`]).
pub fn log_session_completion(input: SessionLogInput, dir: Option<&Path>) -> Result<PathBuf> {
    SessionLog::open(dir).append(input)
}

/// Remove every logged line for `session_id` under `dir`.
pub fn remove_session_logs(session_id: &str, dir: Option<&Path>) -> Result<usize> {
    SessionLog::open(dir).forget(session_id)
}

fn append_line<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create log directory {}", parent.display()))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open log file {}", path.display()))?;

    let mut writer = BufWriter::new(file);
    serde_json::to_writer(&mut writer, value)?;
    writer.write_all(b"\n")?;
    writer
        .flush()
        .with_context(|| format!("failed to append to {}", path.display()))
}

fn drop_session_lines(path: &Path, session_id: &str) -> Result<usize> {
    if !path.is_file() {
        return Ok(0);
    }
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read log file {}", path.display()))?;

    let belongs_to_session = |line: &str| {
        serde_json::from_str::<serde_json::Value>(line)
            .ok()
            .and_then(|value| value.get("session_id")?.as_str().map(|id| id == session_id))
            .unwrap_or(false)
    };
    let (dropped, kept): (Vec<&str>, Vec<&str>) = contents
        .lines()
        .filter(|line| !line.trim().is_empty())
        .partition(|line| belongs_to_session(*line));

    if dropped.is_empty() {
        return Ok(0);
    }
    if kept.is_empty() {
        fs::remove_file(path)
            .with_context(|| format!("failed to remove log file {}", path.display()))?;
    } else {
        let mut rewritten = kept.join("\n");
        rewritten.push('\n');
        fs::write(path, rewritten)
            .with_context(|| format!("failed to rewrite log file {}", path.display()))?;
    }
    Ok(dropped.len())
}

fn subdirectories(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut dirs = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            dirs.push(entry.path());
        }
    }
    Ok(dirs)
}

fn remove_if_empty(dir: &Path) {
    let empty = fs::read_dir(dir).is_ok_and(|mut entries| entries.next().is_none());
    if empty {
        fs::remove_dir(dir).ok();
    }
}
