//! Batch execution of upload requests.
//!
//! This module sits "above" [`crate::ingestion`] and provides:
//!
//! - a sequential runner over a JSON-lines parameter file, one request per line
//! - output-target lookup by dataset id
//! - real-time metrics + observer hooks for monitoring
//!
//! Requests are processed strictly in order and each one completes (record written) before the
//! next starts.

mod observer;

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tracing::warn;

use crate::error::{IngestionError, PipelineResult};
use crate::ingestion::{Ingestor, ResultSink};
use crate::types::{IngestionResult, OutputTarget, UploadRequest};

pub use observer::{BatchEvent, BatchMetrics, BatchMetricsSnapshot, BatchObserver, TracingBatchObserver};

/// Runs every request of a parameter file through an [`Ingestor`].
pub struct BatchRunner {
    ingestor: Ingestor,
    outputs: HashMap<u64, OutputTarget>,
    observer: Option<Arc<dyn BatchObserver>>,
    metrics: Arc<BatchMetrics>,
}

impl BatchRunner {
    pub fn new(ingestor: Ingestor, outputs: HashMap<u64, OutputTarget>) -> Self {
        Self {
            ingestor,
            outputs,
            observer: None,
            metrics: Arc::new(BatchMetrics::new()),
        }
    }

    /// Build the output table from `id:files_path:path` specs.
    pub fn from_output_specs<S: AsRef<str>>(ingestor: Ingestor, specs: &[S]) -> PipelineResult<Self> {
        let outputs = specs
            .iter()
            .map(|spec| OutputTarget::parse_spec(spec.as_ref()))
            .collect::<PipelineResult<HashMap<_, _>>>()?;
        Ok(Self::new(ingestor, outputs))
    }

    /// Attach an observer for batch events (metrics/logging).
    pub fn with_observer(mut self, observer: Arc<dyn BatchObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Get a handle to real-time batch metrics.
    pub fn metrics(&self) -> Arc<BatchMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn ingestor(&self) -> &Ingestor {
        &self.ingestor
    }

    /// Process the parameter file at `path`.
    pub fn run_path(&self, path: impl AsRef<Path>, sink: &mut dyn ResultSink) -> PipelineResult<BatchMetricsSnapshot> {
        let file = File::open(path.as_ref())?;
        self.run_reader(BufReader::new(file), sink)
    }

    /// Process one request per non-blank line of `reader`.
    ///
    /// Each request yields exactly one record in `sink`. The run stops early only when a line's
    /// `dataset_id` cannot be read (no record can be attributed to it) or the sink fails.
    pub fn run_reader<R: BufRead>(&self, reader: R, sink: &mut dyn ResultSink) -> PipelineResult<BatchMetricsSnapshot> {
        let start = Instant::now();
        self.metrics.begin_run();
        self.emit(BatchEvent::RunStarted);

        let outcome = self.run_lines(reader, sink);

        self.metrics.end_run(start.elapsed());
        let snapshot = self.metrics.snapshot();
        self.emit(BatchEvent::RunFinished {
            elapsed: start.elapsed(),
            metrics: snapshot.clone(),
        });
        outcome.map(|()| snapshot)
    }

    fn run_lines<R: BufRead>(&self, reader: R, sink: &mut dyn ResultSink) -> PipelineResult<()> {
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                self.metrics.on_line_skipped();
                continue;
            }
            self.run_line(&line, sink)?;
        }
        Ok(())
    }

    /// Process a single request line and return the record written for it.
    pub fn run_line(&self, line: &str, sink: &mut dyn ResultSink) -> PipelineResult<IngestionResult> {
        let value: Value = serde_json::from_str(line)?;
        let dataset_id = value
            .get("dataset_id")
            .and_then(Value::as_u64)
            .ok_or_else(|| IngestionError::InvalidRequest {
                message: "request has no readable dataset_id".to_string(),
            })?;

        let start = Instant::now();
        self.metrics.on_request_start();
        self.emit(BatchEvent::RequestStarted { dataset_id });

        let record = match self.outputs.get(&dataset_id) {
            None => self.reject(dataset_id, IngestionError::MissingOutput { dataset_id }, sink)?,
            Some(target) => match serde_json::from_value::<UploadRequest>(value) {
                Ok(request) => self.ingestor.ingest(&request, target, sink)?,
                Err(e) => self.reject(
                    dataset_id,
                    IngestionError::InvalidRequest { message: e.to_string() },
                    sink,
                )?,
            },
        };

        self.metrics.on_request_end(record.is_success());
        self.emit(BatchEvent::RequestFinished {
            dataset_id,
            success: record.is_success(),
            elapsed: start.elapsed(),
        });
        Ok(record)
    }

    fn reject(
        &self,
        dataset_id: u64,
        error: IngestionError,
        sink: &mut dyn ResultSink,
    ) -> PipelineResult<IngestionResult> {
        warn!(dataset_id, error = %error, "request rejected before ingestion");
        let ext = self.ingestor.registry().default_extension();
        let record = IngestionResult::failure(dataset_id, ext, &error);
        sink.write_record(&record)?;
        Ok(record)
    }

    fn emit(&self, event: BatchEvent) {
        if let Some(obs) = &self.observer {
            obs.on_event(&event);
        }
    }
}
