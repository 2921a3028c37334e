//! Core data model types for ingestion.
//!
//! Requests arrive as one JSON object per dataset ([`UploadRequest`]); every request produces
//! exactly one [`IngestionResult`] record.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{IngestionError, PipelineResult};

/// Binary formats recognized directly from their content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SniffedBinary {
    /// BGZF-compressed read alignments.
    Bam,
    /// Standard flowgram format.
    Sff,
    Pdf,
    BigWig,
    BigBed,
}

impl SniffedBinary {
    /// Fixed detector priority; the first positive probe wins.
    pub const PRIORITY: [SniffedBinary; 5] = [
        SniffedBinary::Bam,
        SniffedBinary::Sff,
        SniffedBinary::Pdf,
        SniffedBinary::BigWig,
        SniffedBinary::BigBed,
    ];

    /// Registry extension for this format.
    pub fn extension(self) -> &'static str {
        match self {
            SniffedBinary::Bam => "bam",
            SniffedBinary::Sff => "sff",
            SniffedBinary::Pdf => "pdf",
            SniffedBinary::BigWig => "bigwig",
            SniffedBinary::BigBed => "bigbed",
        }
    }
}

/// Single-layer compression/archive containers, in probe priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContainerKind {
    Gzip,
    Bzip2,
    Zip,
}

impl ContainerKind {
    /// Probe order; at most one kind is attempted per upload.
    pub const PRIORITY: [ContainerKind; 3] =
        [ContainerKind::Gzip, ContainerKind::Bzip2, ContainerKind::Zip];

    /// Tag reported as the upload's data type after decompression.
    pub fn tag(self) -> &'static str {
        match self {
            ContainerKind::Gzip => "gzip",
            ContainerKind::Bzip2 => "bz2",
            ContainerKind::Zip => "zip",
        }
    }

    /// Used in user-facing messages ("The gzipped uploaded file ...").
    pub fn adjective(self) -> &'static str {
        match self {
            ContainerKind::Gzip => "gzipped",
            ContainerKind::Bzip2 => "bz2 compressed",
            ContainerKind::Zip => "zipped",
        }
    }

    /// Display-name suffix removed after decompression. Zip entries carry their own name.
    pub fn name_suffix(self) -> Option<&'static str> {
        match self {
            ContainerKind::Gzip => Some(".gz"),
            ContainerKind::Bzip2 => Some(".bz2"),
            ContainerKind::Zip => None,
        }
    }
}

/// Outcome of the content classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    MultiByteText,
    SniffableBinary(SniffedBinary),
    CompressedContainer(ContainerKind),
    UnrecognizedBinary,
    PlainText,
}

/// The format the user asked for: `auto` or an explicit extension.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum DeclaredFormat {
    Auto,
    Explicit(String),
}

impl From<String> for DeclaredFormat {
    fn from(value: String) -> Self {
        if value.trim().eq_ignore_ascii_case("auto") {
            DeclaredFormat::Auto
        } else {
            DeclaredFormat::Explicit(value.trim().to_string())
        }
    }
}

impl DeclaredFormat {
    /// The explicit extension, if the user chose one.
    pub fn explicit(&self) -> Option<&str> {
        match self {
            DeclaredFormat::Auto => None,
            DeclaredFormat::Explicit(ext) => Some(ext.as_str()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            DeclaredFormat::Auto => "auto",
            DeclaredFormat::Explicit(ext) => ext.as_str(),
        }
    }
}

/// Whether a server-local source is copied into owned storage or only referenced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkMode {
    #[default]
    CopyFiles,
    LinkToFiles,
}

/// Where the bytes of an upload come from.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UploadSource {
    /// A temporary file written by the upload transport; owned by the pipeline.
    File { path: PathBuf },
    /// A remote location fetched into a temporary file.
    Url { path: String },
    /// A file in a server-side import directory; never mutated or deleted.
    ServerDir { path: PathBuf },
    /// A server path pasted by the user; never mutated or deleted.
    PathPaste { path: PathBuf },
    /// A multi-file dataset.
    Composite(CompositeManifest),
}

impl UploadSource {
    /// Short label used in logs and observer contexts.
    pub fn label(&self) -> &'static str {
        match self {
            UploadSource::File { .. } => "file",
            UploadSource::Url { .. } => "url",
            UploadSource::ServerDir { .. } => "server_dir",
            UploadSource::PathPaste { .. } => "path_paste",
            UploadSource::Composite(_) => "composite",
        }
    }

    /// Server-local sources are not owned copies and must never be mutated.
    pub fn is_server_local(&self) -> bool {
        matches!(self, UploadSource::ServerDir { .. } | UploadSource::PathPaste { .. })
    }

    /// Location as given by the request, for diagnostics.
    pub fn location(&self) -> PathBuf {
        match self {
            UploadSource::File { path }
            | UploadSource::ServerDir { path }
            | UploadSource::PathPaste { path } => path.clone(),
            UploadSource::Url { path } => PathBuf::from(path),
            UploadSource::Composite(manifest) => manifest.primary_file.clone(),
        }
    }
}

/// One user-submitted dataset.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UploadRequest {
    pub dataset_id: u64,
    #[serde(flatten)]
    pub source: UploadSource,
    /// Declared format (`auto` to sniff).
    pub file_type: DeclaredFormat,
    /// Display name; may be rewritten by decompression.
    #[serde(default)]
    pub name: String,
    /// Convert whitespace separators to tabs while normalizing.
    #[serde(default)]
    pub space_to_tab: bool,
    #[serde(default)]
    pub link_data_only: LinkMode,
}

impl UploadRequest {
    /// Parse a single request from its JSON representation.
    pub fn from_json(line: &str) -> PipelineResult<Self> {
        Ok(serde_json::from_str(line)?)
    }

    /// True when the backing file is only referenced in place, never copied.
    pub fn is_link_only(&self) -> bool {
        self.source.is_server_local() && self.link_data_only == LinkMode::LinkToFiles
    }
}

/// Declared schema of one composite part.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PartSchema {
    pub optional: bool,
    pub is_binary: bool,
    pub space_to_tab: bool,
}

/// A user-supplied location for one composite part.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PartSource {
    pub path: String,
    /// Per-part override of the schema's separator policy.
    #[serde(default)]
    pub space_to_tab: Option<bool>,
}

/// The manifest of a composite upload.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CompositeManifest {
    /// Descriptor file moved to the dataset's output location.
    pub primary_file: PathBuf,
    #[serde(default)]
    pub composite_files: BTreeMap<String, PartSchema>,
    #[serde(default)]
    pub composite_file_paths: BTreeMap<String, Option<PartSource>>,
}

impl CompositeManifest {
    /// Join the schema with the supplied locations, in part-name order.
    pub fn parts(&self) -> Vec<CompositePart> {
        self.composite_files
            .iter()
            .map(|(name, schema)| {
                let supplied = self.composite_file_paths.get(name).and_then(Option::as_ref);
                CompositePart {
                    name: name.clone(),
                    required: !schema.optional,
                    binary: schema.is_binary,
                    space_to_tab: supplied
                        .and_then(|s| s.space_to_tab)
                        .unwrap_or(schema.space_to_tab),
                    location: supplied.map(|s| PartLocation::parse(&s.path)),
                    state: PartState::Declared,
                }
            })
            .collect()
    }
}

/// Resolved-or-not location of a composite part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartLocation {
    Local(PathBuf),
    Remote(String),
}

impl PartLocation {
    /// Anything with a URL scheme separator is fetched.
    pub fn parse(raw: &str) -> Self {
        if raw.contains("://") {
            PartLocation::Remote(raw.to_string())
        } else {
            PartLocation::Local(PathBuf::from(raw))
        }
    }
}

/// Lifecycle of a composite part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartState {
    Declared,
    /// A local file holds the part's content.
    Resolved(PathBuf),
    /// Moved into the composite's files directory.
    Placed(PathBuf),
}

/// One member of a composite dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompositePart {
    pub name: String,
    pub required: bool,
    pub binary: bool,
    /// Effective separator policy (override or schema default).
    pub space_to_tab: bool,
    pub location: Option<PartLocation>,
    pub state: PartState,
}

/// Fixed record tag.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordType {
    #[default]
    Dataset,
}

/// Human status (`stdout`) or error (`stderr`); never both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Stdout(String),
    Stderr(String),
}

/// The record emitted for every request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestionResult {
    #[serde(rename = "type")]
    pub record_type: RecordType,
    pub dataset_id: u64,
    pub ext: String,
    #[serde(flatten)]
    pub outcome: Outcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_count: Option<usize>,
}

impl IngestionResult {
    /// `ext` is the registry's default extension; the error text becomes `stderr`.
    pub fn failure(dataset_id: u64, ext: impl Into<String>, error: &IngestionError) -> Self {
        Self {
            record_type: RecordType::Dataset,
            dataset_id,
            ext: ext.into(),
            outcome: Outcome::Stderr(error.to_string()),
            name: None,
            line_count: None,
        }
    }

    pub fn success(dataset_id: u64, ext: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            record_type: RecordType::Dataset,
            dataset_id,
            ext: ext.into(),
            outcome: Outcome::Stdout(status.into()),
            name: None,
            line_count: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_line_count(mut self, line_count: Option<usize>) -> Self {
        self.line_count = line_count;
        self
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, Outcome::Stdout(_))
    }

    /// The status line or error message.
    pub fn message(&self) -> &str {
        match &self.outcome {
            Outcome::Stdout(s) | Outcome::Stderr(s) => s.as_str(),
        }
    }
}

/// Caller-supplied output locations for one dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputTarget {
    /// Permanent location of the dataset file (or composite primary descriptor).
    pub path: PathBuf,
    /// Directory for composite parts.
    pub files_path: Option<PathBuf>,
}

impl OutputTarget {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            files_path: None,
        }
    }

    pub fn with_files_path(mut self, files_path: impl AsRef<Path>) -> Self {
        self.files_path = Some(files_path.as_ref().to_path_buf());
        self
    }

    /// Parse an `id:files_path:path` output spec.
    pub fn parse_spec(spec: &str) -> PipelineResult<(u64, Self)> {
        let mut parts = spec.splitn(3, ':');
        let (Some(id), Some(files_path), Some(path)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(IngestionError::InvalidRequest {
                message: format!("malformed output spec '{spec}', expected id:files_path:path"),
            });
        };
        let id = id.trim().parse::<u64>().map_err(|e| IngestionError::InvalidRequest {
            message: format!("malformed dataset id in output spec '{spec}': {e}"),
        })?;
        let mut target = OutputTarget::new(path);
        if !files_path.is_empty() && files_path != "None" {
            target = target.with_files_path(files_path);
        }
        Ok((id, target))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_file_request_with_defaults() {
        let req = UploadRequest::from_json(
            r#"{"type":"file","dataset_id":7,"path":"/tmp/upload_1","file_type":"auto","name":"reads.fq"}"#,
        )
        .unwrap();
        assert_eq!(req.dataset_id, 7);
        assert_eq!(
            req.source,
            UploadSource::File {
                path: PathBuf::from("/tmp/upload_1")
            }
        );
        assert_eq!(req.file_type, DeclaredFormat::Auto);
        assert_eq!(req.link_data_only, LinkMode::CopyFiles);
        assert!(!req.space_to_tab);
        assert!(!req.is_link_only());
    }

    #[test]
    fn missing_file_type_is_rejected_at_parse_time() {
        let err = UploadRequest::from_json(r#"{"type":"file","dataset_id":7,"path":"/tmp/x"}"#)
            .unwrap_err();
        assert!(err.to_string().contains("file_type"));
    }

    #[test]
    fn link_only_applies_to_server_local_sources() {
        let req = UploadRequest::from_json(
            r#"{"type":"server_dir","dataset_id":1,"path":"/data/a.bed","file_type":"bed","link_data_only":"link_to_files"}"#,
        )
        .unwrap();
        assert!(req.is_link_only());
        assert_eq!(req.file_type.explicit(), Some("bed"));
    }

    #[test]
    fn composite_parts_merge_schema_and_overrides() {
        let req = UploadRequest::from_json(
            r#"{
                "type":"composite","dataset_id":3,"file_type":"pathway","primary_file":"/tmp/p.html",
                "composite_files":{
                    "edges.sif":{"optional":false,"is_binary":false,"space_to_tab":true},
                    "image.png":{"optional":true,"is_binary":true}
                },
                "composite_file_paths":{
                    "edges.sif":{"path":"http://example.org/edges.sif","space_to_tab":false},
                    "image.png":null
                }
            }"#,
        )
        .unwrap();
        let UploadSource::Composite(manifest) = &req.source else {
            panic!("expected composite source");
        };
        let parts = manifest.parts();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].name, "edges.sif");
        assert!(parts[0].required);
        assert!(!parts[0].space_to_tab);
        assert_eq!(
            parts[0].location,
            Some(PartLocation::Remote("http://example.org/edges.sif".to_string()))
        );
        assert!(!parts[1].required);
        assert!(parts[1].binary);
        assert_eq!(parts[1].location, None);
    }

    #[test]
    fn records_serialize_stdout_or_stderr() {
        let ok = IngestionResult::success(4, "bed", "uploaded bed file")
            .with_name("a.bed")
            .with_line_count(Some(3));
        let json = serde_json::to_value(&ok).unwrap();
        assert_eq!(json["type"], "dataset");
        assert_eq!(json["stdout"], "uploaded bed file");
        assert_eq!(json["line_count"], 3);
        assert!(json.get("stderr").is_none());

        let failed = IngestionResult::failure(4, "data", &IngestionError::EmptySource);
        let json = serde_json::to_value(&failed).unwrap();
        assert_eq!(json["ext"], "data");
        assert_eq!(json["stderr"], "The uploaded file is empty");
        assert!(json.get("stdout").is_none());
        assert!(json.get("name").is_none());
    }

    #[test]
    fn parses_output_specs() {
        let (id, target) = OutputTarget::parse_spec("12:/db/files_12:/db/dataset_12.dat").unwrap();
        assert_eq!(id, 12);
        assert_eq!(target.path, PathBuf::from("/db/dataset_12.dat"));
        assert_eq!(target.files_path, Some(PathBuf::from("/db/files_12")));

        let (_, target) = OutputTarget::parse_spec("5:None:/db/dataset_5.dat").unwrap();
        assert_eq!(target.files_path, None);

        assert!(OutputTarget::parse_spec("oops").is_err());
    }
}
