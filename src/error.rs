use std::path::PathBuf;

use thiserror::Error;

use crate::types::ContainerKind;

/// Convenience result type for pipeline operations.
pub type PipelineResult<T> = Result<T, IngestionError>;

/// Broad class of an [`IngestionError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Missing, empty or unfetchable input.
    Source,
    /// Content rejected by the markup screen or the binary allow-list.
    Safety,
    /// Decompression or extraction failed mid-stream.
    Transform,
    /// Request shape problems: missing composite part, link-only content that must be mutated.
    Schema,
    /// Local I/O and other environment failures.
    Infrastructure,
}

/// Error type returned by the ingestion pipeline.
///
/// The `Display` text of each variant is the message reported in a failure record's `stderr`.
#[derive(Debug, Error)]
pub enum IngestionError {
    /// Underlying I/O error (e.g. permission denied, disk full).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The zip central directory could not be read.
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// Malformed JSON in a request line or registry configuration.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unable to fetch {location}\n{message}")]
    Fetch { location: String, message: String },

    #[error("Uploaded temporary file ({}) does not exist.", path.display())]
    SourceMissing { path: PathBuf },

    #[error("The uploaded file is empty")]
    EmptySource,

    #[error("The {} uploaded file contains inappropriate content", container.adjective())]
    UnsafeContainer { container: ContainerKind },

    #[error("The uploaded binary file contains inappropriate content")]
    UnsafeBinary,

    /// An allow-listed binary format was uploaded without declaring it explicitly.
    #[error("You must manually set the 'File Format' to '{}' when uploading {extension} files.", capitalize(extension))]
    DeclaredFormatRequired { extension: String },

    #[error("Problem decompressing {} data", container.adjective())]
    Decompression {
        container: ContainerKind,
        #[source]
        source: std::io::Error,
    },

    #[error("The ZIP archive does not contain any files")]
    EmptyArchive,

    #[error("A required composite data file was not provided ({name})")]
    MissingCompositePart { name: String },

    /// A link-only source would have to be rewritten (`action` is e.g. "grooming").
    #[error(
        "The uploaded files need {action}, so change the copy setting to 'copy files' instead of 'link to files without copying' so {action} can be performed."
    )]
    LinkedContentMutation { action: &'static str },

    #[error("Output path for dataset {dataset_id} not found")]
    MissingOutput { dataset_id: u64 },

    #[error("Unable to process uploaded file: {message}")]
    InvalidRequest { message: String },

    #[error("registry error: {message}")]
    Registry { message: String },
}

impl IngestionError {
    /// Which part of the error taxonomy this error belongs to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            IngestionError::Fetch { .. }
            | IngestionError::SourceMissing { .. }
            | IngestionError::EmptySource => ErrorKind::Source,
            IngestionError::UnsafeContainer { .. }
            | IngestionError::UnsafeBinary
            | IngestionError::DeclaredFormatRequired { .. } => ErrorKind::Safety,
            IngestionError::Decompression { .. }
            | IngestionError::EmptyArchive
            | IngestionError::Zip(_) => ErrorKind::Transform,
            IngestionError::MissingCompositePart { .. }
            | IngestionError::LinkedContentMutation { .. }
            | IngestionError::MissingOutput { .. }
            | IngestionError::InvalidRequest { .. }
            | IngestionError::Json(_) => ErrorKind::Schema,
            IngestionError::Io(_) | IngestionError::Registry { .. } => ErrorKind::Infrastructure,
        }
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
