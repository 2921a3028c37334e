//! `upload-ingest` turns user-submitted files into datasets with a resolved format.
//!
//! Each upload request (one JSON object per dataset) is classified by content, screened for
//! active markup, decompressed one layer deep, normalized to `\n` line endings and placed at a
//! caller-supplied output path. Every request produces exactly one [`types::IngestionResult`]
//! record, in request order.
//!
//! The primary entrypoint is [`ingestion::Ingestor::ingest`]; [`execution::BatchRunner`] drives a
//! whole JSON-lines parameter file.
//!
//! ## What gets recognized
//!
//! **By content (never by name):**
//!
//! - multi-byte (UTF-8) text
//! - sniffable binaries: BAM (BGZF with a `BAM\1` payload), SFF, PDF, bigWig, bigBed
//! - containers: gzip, bzip2 (Cargo feature `bzip2`), zip (first file entry only)
//! - other binary content, accepted only for allow-listed extensions declared explicitly
//! - plain text, whose format is declared or guessed by the [`registry`]
//!
//! ## Quick example
//!
//! ```no_run
//! use upload_ingest::ingestion::{Ingestor, JsonLinesSink, PipelineOptions};
//! use upload_ingest::types::{OutputTarget, UploadRequest};
//!
//! # fn main() -> Result<(), upload_ingest::IngestionError> {
//! let request = UploadRequest::from_json(
//!     r#"{"type":"file","dataset_id":7,"path":"/tmp/upload_7","file_type":"auto","name":"reads.fq.gz"}"#,
//! )?;
//! let mut sink = JsonLinesSink::new(std::io::stdout());
//! let record = Ingestor::new(PipelineOptions::default()).ingest(
//!     &request,
//!     &OutputTarget::new("/data/dataset_7.dat"),
//!     &mut sink,
//! )?;
//! println!("ext={}", record.ext);
//! # Ok(())
//! # }
//! ```
//!
//! ## Batch example
//!
//! ```no_run
//! use upload_ingest::execution::BatchRunner;
//! use upload_ingest::ingestion::{Ingestor, JsonLinesSink, PipelineOptions};
//!
//! # fn main() -> Result<(), upload_ingest::IngestionError> {
//! let runner = BatchRunner::from_output_specs(
//!     Ingestor::new(PipelineOptions::default()),
//!     &["7:None:/data/dataset_7.dat"],
//! )?;
//! let mut sink = JsonLinesSink::new(std::fs::File::create("galaxy.json")?);
//! let metrics = runner.run_path("params.jsonl", &mut sink)?;
//! println!("{metrics}");
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`ingestion`]: classification, screening, decompression, normalization, placement
//! - [`registry`]: format lookup, text sniffing and grooming
//! - [`execution`]: sequential batch runner with metrics and observer hooks
//! - [`types`]: request/record data model
//! - [`error`]: the error type used across the crate

pub mod error;
pub mod execution;
pub mod ingestion;
pub mod registry;
pub mod types;

pub use error::{ErrorKind, IngestionError, PipelineResult};
