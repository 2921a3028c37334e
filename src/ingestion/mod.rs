//! Upload ingestion: classification, safety screening, decompression, normalization and
//! placement.
//!
//! Most callers should use [`Ingestor::ingest`] (from [`upload`]) which:
//!
//! - classifies the upload by content ([`classify`]), never by name
//! - screens and unpacks one layer of gzip/bzip2/zip ([`decompress`], [`screen`])
//! - normalizes text line endings ([`normalize`])
//! - places the dataset and writes one record to a [`ResultSink`]
//! - optionally reports success/failure/alerts to an [`IngestionObserver`]

pub mod classify;
mod composite;
pub mod decompress;
pub mod detect;
pub mod fetch;
pub(crate) mod lines;
pub mod normalize;
pub mod observability;
pub mod screen;
pub mod sink;
pub mod upload;
mod working;

pub use classify::{Classifier, ClassifierStep};
#[cfg(feature = "remote")]
pub use fetch::HttpFetcher;
pub use fetch::{DisabledFetcher, Fetcher, default_fetcher};
pub use normalize::{Normalized, TextNormalizer};
pub use observability::{
    CompositeObserver, FileObserver, IngestionContext, IngestionObserver, IngestionSeverity, IngestionStats,
    TracingObserver, severity_for_error,
};
pub use screen::{TextSource, contains_unsafe_markup};
pub use sink::{JsonLinesSink, ResultSink};
pub use upload::{Ingestor, PipelineOptions};
