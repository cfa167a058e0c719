//! Log record provider.
//!
//! Serves the tail of a container log file as parsed records. Container
//! runtimes write one line per chunk in the CRI format:
//!
//! ```text
//! 2024-05-01T12:00:00.000000000Z stdout F hello world
//! <timestamp>                    <stream> <tag> <message>
//! ```
//!
//! A `P` tag marks a partial line continued by the next chunk; `F` ends it.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;

use crate::lifecycle::registry::{HookError, Subsystem};

pub const LOG_RECORDS_PATH: &str = "/v1/log-records";

const DEFAULT_TAIL: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStream {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogRecord {
    pub timestamp: String,
    pub stream: LogStream,
    pub message: String,
}

/// One CRI line before partial chunks are joined.
#[derive(Debug, PartialEq, Eq)]
struct CriLine<'a> {
    timestamp: &'a str,
    stream: LogStream,
    partial: bool,
    message: &'a str,
}

fn parse_cri_line(line: &str) -> Option<CriLine<'_>> {
    let mut fields = line.splitn(4, ' ');
    let timestamp = fields.next().filter(|ts| !ts.is_empty())?;
    let stream = match fields.next()? {
        "stdout" => LogStream::Stdout,
        "stderr" => LogStream::Stderr,
        _ => return None,
    };
    let partial = match fields.next()? {
        "P" => true,
        "F" => false,
        _ => return None,
    };
    Some(CriLine {
        timestamp,
        stream,
        partial,
        message: fields.next().unwrap_or(""),
    })
}

/// Parse a CRI log, joining partial chunks. Unparseable lines are skipped.
pub fn parse_records(content: &str) -> Vec<LogRecord> {
    let mut tail = RecordTail::new(usize::MAX);
    for line in content.lines() {
        tail.push_line(line);
    }
    tail.finish()
}

/// Joins CRI chunks into records, keeping only the most recent `limit`.
struct RecordTail {
    limit: usize,
    records: VecDeque<LogRecord>,
    pending: Option<LogRecord>,
}

impl RecordTail {
    fn new(limit: usize) -> Self {
        Self {
            limit,
            records: VecDeque::new(),
            pending: None,
        }
    }

    fn push_line(&mut self, line: &str) {
        let Some(cri) = parse_cri_line(line) else {
            return;
        };

        let record = match self.pending.take() {
            Some(mut record) if record.stream == cri.stream => {
                record.message.push_str(cri.message);
                record
            }
            Some(orphan) => {
                self.push_record(orphan);
                new_record(&cri)
            }
            None => new_record(&cri),
        };

        if cri.partial {
            self.pending = Some(record);
        } else {
            self.push_record(record);
        }
    }

    fn push_record(&mut self, record: LogRecord) {
        if self.limit == 0 {
            return;
        }
        if self.records.len() == self.limit {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    /// A trailing partial chunk is still a record.
    fn finish(mut self) -> Vec<LogRecord> {
        if let Some(pending) = self.pending.take() {
            self.push_record(pending);
        }
        self.records.into()
    }
}

/// Stream `path` line by line, keeping the last `limit` records.
///
/// Invalid UTF-8 is replaced rather than failing the read.
async fn read_tail(path: PathBuf, limit: usize) -> std::io::Result<Vec<LogRecord>> {
    let mut reader = BufReader::new(File::open(path).await?);
    let mut tail = RecordTail::new(limit);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            break;
        }
        let line = String::from_utf8_lossy(&buf);
        tail.push_line(line.trim_end_matches('\n').trim_end_matches('\r'));
    }
    Ok(tail.finish())
}

fn new_record(cri: &CriLine<'_>) -> LogRecord {
    LogRecord {
        timestamp: cri.timestamp.to_string(),
        stream: cri.stream,
        message: cri.message.to_string(),
    }
}

/// Reject anything that could escape the logs directory.
fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains(['/', '\\'])
}

#[derive(Debug, Deserialize)]
pub struct RecordsQuery {
    pub file: String,
    #[serde(default = "default_tail")]
    pub tail: usize,
}

fn default_tail() -> usize {
    DEFAULT_TAIL
}

#[derive(Debug, Serialize)]
pub struct RecordsResponse {
    pub file: String,
    pub records: Vec<LogRecord>,
}

struct RecordsInner {
    logs_dir: PathBuf,
    closed: watch::Sender<bool>,
}

/// Log record provider.
#[derive(Clone)]
pub struct LogRecordsService {
    inner: Arc<RecordsInner>,
}

impl LogRecordsService {
    pub fn new(logs_dir: impl Into<PathBuf>) -> Self {
        let logs_dir = logs_dir.into();
        tracing::info!(logs_dir = %logs_dir.display(), "Log records service initialized");
        Self {
            inner: Arc::new(RecordsInner {
                logs_dir,
                closed: watch::channel(false).0,
            }),
        }
    }

    pub fn is_closed(&self) -> bool {
        *self.inner.closed.borrow()
    }

    /// Last `tail` records of `file`. Returns `None` if the service shuts
    /// down before the read completes.
    pub async fn tail(&self, file: &str, tail: usize) -> Option<std::io::Result<Vec<LogRecord>>> {
        let mut closed = self.inner.closed.subscribe();
        let path = self.inner.logs_dir.join(file);

        tokio::select! {
            biased;
            _ = closed.wait_for(|closed| *closed) => None,
            read = read_tail(path, tail) => Some(read),
        }
    }
}

#[async_trait]
impl Subsystem for LogRecordsService {
    fn name(&self) -> &str {
        "log-records"
    }

    fn routes(&self) -> Router {
        Router::new()
            .route(LOG_RECORDS_PATH, get(get_log_records))
            .with_state(self.clone())
    }

    async fn shutdown(&self) -> Result<(), HookError> {
        if self.inner.closed.send_replace(true) {
            tracing::debug!("Log records service already shut down");
        } else {
            tracing::info!("Log records service shut down, in-flight reads cancelled");
        }
        Ok(())
    }
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}

async fn get_log_records(
    State(service): State<LogRecordsService>,
    Query(query): Query<RecordsQuery>,
) -> Response {
    if !is_plain_file_name(&query.file) {
        return error_response(StatusCode::BAD_REQUEST, "file must be a plain file name");
    }
    if service.is_closed() {
        return error_response(StatusCode::SERVICE_UNAVAILABLE, "service is shutting down");
    }

    match service.tail(&query.file, query.tail).await {
        Some(Ok(records)) => Json(RecordsResponse {
            file: query.file,
            records,
        })
        .into_response(),
        Some(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
            error_response(StatusCode::NOT_FOUND, "log file not found")
        }
        Some(Err(e)) => {
            tracing::error!(file = %query.file, error = %e, "Failed to read log file");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to read log file")
        }
        None => error_response(StatusCode::SERVICE_UNAVAILABLE, "service is shutting down"),
    }
}
