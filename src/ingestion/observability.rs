//! Upload outcome reporting: the [`IngestionObserver`] hook, severities and stock observers.

use std::borrow::Cow;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tracing::{error, info, warn};
use zip::result::ZipError;

use crate::error::{ErrorKind, IngestionError};
use crate::types::IngestionResult;

/// Severity classification used for observer callbacks and alerting thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestionSeverity {
    /// Informational event.
    Info,
    /// Warning-level event (non-fatal).
    Warning,
    /// Error-level event (the upload was rejected).
    Error,
    /// Critical error (local I/O or other infrastructure failures).
    Critical,
}

/// Context about one upload attempt.
#[derive(Debug, Clone)]
pub struct IngestionContext {
    pub dataset_id: u64,
    /// Source label (`file`, `url`, `server_dir`, `path_paste`, `composite`).
    pub source: &'static str,
    /// The location given by the request.
    pub path: PathBuf,
}

/// Stats reported on a successful upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestionStats {
    pub ext: String,
    /// Lines written by text normalization, when it ran.
    pub line_count: Option<usize>,
}

impl IngestionStats {
    pub fn from_record(record: &IngestionResult) -> Self {
        Self {
            ext: record.ext.clone(),
            line_count: record.line_count,
        }
    }
}

/// Observer interface for upload outcomes.
///
/// Implementors can record metrics, logs, or trigger alerts.
pub trait IngestionObserver: Send + Sync {
    /// Called when an upload is accepted.
    fn on_success(&self, _ctx: &IngestionContext, _stats: &IngestionStats) {}

    /// Called when an upload is rejected or fails.
    fn on_failure(&self, _ctx: &IngestionContext, _severity: IngestionSeverity, _error: &IngestionError) {}

    /// Called when a failure meets an alert threshold.
    ///
    /// Default behavior forwards to [`Self::on_failure`].
    fn on_alert(&self, ctx: &IngestionContext, severity: IngestionSeverity, error: &IngestionError) {
        self.on_failure(ctx, severity, error)
    }
}

/// Ordered fan-out to several observers.
///
/// ```ignore
/// let observer = CompositeObserver::new()
///     .with(Arc::new(TracingObserver))
///     .with(Arc::new(FileObserver::open("upload.log")?));
/// ```
#[derive(Default)]
pub struct CompositeObserver {
    members: Vec<Arc<dyn IngestionObserver>>,
}

impl CompositeObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `observer`; callbacks reach members in insertion order.
    pub fn with(mut self, observer: Arc<dyn IngestionObserver>) -> Self {
        self.members.push(observer);
        self
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

impl fmt::Debug for CompositeObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CompositeObserver({} members)", self.members.len())
    }
}

impl IngestionObserver for CompositeObserver {
    fn on_success(&self, ctx: &IngestionContext, stats: &IngestionStats) {
        self.members.iter().for_each(|m| m.on_success(ctx, stats));
    }

    fn on_failure(&self, ctx: &IngestionContext, severity: IngestionSeverity, error: &IngestionError) {
        self.members.iter().for_each(|m| m.on_failure(ctx, severity, error));
    }

    fn on_alert(&self, ctx: &IngestionContext, severity: IngestionSeverity, error: &IngestionError) {
        self.members.iter().for_each(|m| m.on_alert(ctx, severity, error));
    }
}

/// Reports upload outcomes as `tracing` events under the `upload` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl IngestionObserver for TracingObserver {
    fn on_success(&self, ctx: &IngestionContext, stats: &IngestionStats) {
        info!(
            target: "upload",
            dataset_id = ctx.dataset_id,
            source = ctx.source,
            path = %ctx.path.display(),
            ext = %stats.ext,
            line_count = ?stats.line_count,
            "upload accepted"
        );
    }

    fn on_failure(&self, ctx: &IngestionContext, severity: IngestionSeverity, error: &IngestionError) {
        warn!(
            target: "upload",
            dataset_id = ctx.dataset_id,
            source = ctx.source,
            path = %ctx.path.display(),
            ?severity,
            %error,
            "upload rejected"
        );
    }

    fn on_alert(&self, ctx: &IngestionContext, severity: IngestionSeverity, error: &IngestionError) {
        error!(
            target: "upload",
            dataset_id = ctx.dataset_id,
            source = ctx.source,
            path = %ctx.path.display(),
            ?severity,
            %error,
            "upload failure needs attention"
        );
    }
}

/// One line of a [`FileObserver`] log.
#[derive(Debug, Serialize)]
struct LogEntry<'a> {
    ts_ms: u64,
    event: &'static str,
    dataset_id: u64,
    source: &'static str,
    path: Cow<'a, str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ext: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    line_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    severity: Option<IngestionSeverity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<'a> LogEntry<'a> {
    fn new(event: &'static str, ctx: &'a IngestionContext) -> Self {
        Self {
            ts_ms: now_ms(),
            event,
            dataset_id: ctx.dataset_id,
            source: ctx.source,
            path: ctx.path.to_string_lossy(),
            ext: None,
            line_count: None,
            severity: None,
            error: None,
        }
    }

    fn failed(mut self, severity: IngestionSeverity, error: &IngestionError) -> Self {
        self.severity = Some(severity);
        self.error = Some(error.to_string());
        self
    }
}

/// Appends one JSON object per upload outcome to a log file.
///
/// The file is opened once, in append mode. A failed write is reported through `tracing` and
/// never fails the upload.
#[derive(Debug)]
pub struct FileObserver {
    path: PathBuf,
    file: Mutex<File>,
}

impl FileObserver {
    pub fn open(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    fn write(&self, entry: &LogEntry<'_>) {
        let mut line = match serde_json::to_vec(entry) {
            Ok(line) => line,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "could not encode upload log entry");
                return;
            }
        };
        line.push(b'\n');
        let mut file = self.file.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Err(e) = file.write_all(&line) {
            warn!(path = %self.path.display(), error = %e, "could not append to upload log");
        }
    }
}

impl IngestionObserver for FileObserver {
    fn on_success(&self, ctx: &IngestionContext, stats: &IngestionStats) {
        let mut entry = LogEntry::new("accepted", ctx);
        entry.ext = Some(stats.ext.as_str());
        entry.line_count = stats.line_count;
        self.write(&entry);
    }

    fn on_failure(&self, ctx: &IngestionContext, severity: IngestionSeverity, error: &IngestionError) {
        self.write(&LogEntry::new("rejected", ctx).failed(severity, error));
    }

    fn on_alert(&self, ctx: &IngestionContext, severity: IngestionSeverity, error: &IngestionError) {
        self.write(&LogEntry::new("alert", ctx).failed(severity, error));
    }
}

/// Infrastructure and source failures are critical; rejected content is an ordinary error.
pub fn severity_for_error(e: &IngestionError) -> IngestionSeverity {
    match e {
        IngestionError::Zip(ZipError::Io(_)) => IngestionSeverity::Critical,
        _ => match e.kind() {
            ErrorKind::Infrastructure | ErrorKind::Source => IngestionSeverity::Critical,
            ErrorKind::Safety | ErrorKind::Transform | ErrorKind::Schema => IngestionSeverity::Error,
        },
    }
}

/// Report `outcome` to `observer`, raising an alert at or above `alert_at_or_above`.
pub(crate) fn report(
    observer: Option<&Arc<dyn IngestionObserver>>,
    alert_at_or_above: IngestionSeverity,
    ctx: &IngestionContext,
    outcome: Result<&IngestionResult, &IngestionError>,
) {
    let Some(obs) = observer else {
        return;
    };
    match outcome {
        Ok(record) => obs.on_success(ctx, &IngestionStats::from_record(record)),
        Err(e) => {
            let sev = severity_for_error(e);
            obs.on_failure(ctx, sev, e);
            if sev >= alert_at_or_above {
                obs.on_alert(ctx, sev, e);
            }
        }
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}
