//! Upload ingestion entrypoint.
//!
//! [`Ingestor::ingest`] takes one [`UploadRequest`], turns it into a dataset at the caller's
//! [`OutputTarget`] and writes exactly one [`IngestionResult`] record to a [`ResultSink`]:
//!
//! - single-file sources are classified, decompressed (one layer), screened, normalized and
//!   placed (see [`Ingestor::ingest`])
//! - composite sources have their parts placed into the target's files directory
//! - if an [`IngestionObserver`] is configured, success/failure/alerts are reported to it
//!
//! Every failure becomes a failure record; the error is never propagated past the request
//! boundary, except when the sink itself cannot be written.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, error};

use crate::error::{IngestionError, PipelineResult};
use crate::registry::{FormatRegistry, Registry};
use crate::types::{
    Classification, ContainerKind, DeclaredFormat, IngestionResult, OutputTarget, UploadRequest,
    UploadSource,
};

use super::classify::{Classifier, SNIFF_PREFIX_LEN, has_high_bit};
use super::decompress::{self, ZIP_EXTRA_ENTRIES_WARNING};
use super::detect::read_prefix;
use super::fetch::{Fetcher, default_fetcher};
use super::normalize::TextNormalizer;
use super::observability::{IngestionContext, IngestionObserver, IngestionSeverity, report};
use super::sink::ResultSink;
use super::working::WorkingFile;

/// Options controlling ingestion behavior.
///
/// Use [`Default`] for common cases.
#[derive(Clone)]
pub struct PipelineOptions {
    /// Scratch directory for fetched files and for temporaries derived from server-local
    /// sources. Defaults to the system temporary directory.
    pub work_dir: PathBuf,
    /// Optional observer for logging/alerts.
    pub observer: Option<Arc<dyn IngestionObserver>>,
    /// Severity threshold at which `on_alert` is invoked.
    pub alert_at_or_above: IngestionSeverity,
}

impl fmt::Debug for PipelineOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineOptions")
            .field("work_dir", &self.work_dir)
            .field("observer_set", &self.observer.is_some())
            .field("alert_at_or_above", &self.alert_at_or_above)
            .finish()
    }
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            work_dir: std::env::temp_dir(),
            observer: None,
            alert_at_or_above: IngestionSeverity::Critical,
        }
    }
}

/// An accepted request: its record and the placed file to groom once the record is written.
#[derive(Debug)]
pub(crate) struct Accepted {
    pub(crate) record: IngestionResult,
    pub(crate) placed: Option<PathBuf>,
}

/// Where a single-file upload ended up before placement.
#[derive(Debug)]
struct Prepared {
    ext: String,
    tag: String,
    name: String,
    line_count: Option<usize>,
    warning: Option<String>,
}

/// Turns upload requests into datasets.
pub struct Ingestor {
    registry: Arc<dyn FormatRegistry>,
    fetcher: Arc<dyn Fetcher>,
    classifier: Classifier,
    single_layer: Classifier,
    options: PipelineOptions,
}

impl fmt::Debug for Ingestor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ingestor")
            .field("classifier", &self.classifier)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Default for Ingestor {
    fn default() -> Self {
        Self::new(PipelineOptions::default())
    }
}

impl Ingestor {
    /// An ingestor with the built-in registry and the default fetcher.
    pub fn new(options: PipelineOptions) -> Self {
        Self {
            registry: Arc::new(Registry::builtin()),
            fetcher: default_fetcher(),
            classifier: Classifier::standard(),
            single_layer: Classifier::single_layer(),
            options,
        }
    }

    pub fn with_registry(mut self, registry: Arc<dyn FormatRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_fetcher(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.fetcher = fetcher;
        self
    }

    pub fn registry(&self) -> &dyn FormatRegistry {
        self.registry.as_ref()
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    pub(crate) fn fetcher(&self) -> &dyn Fetcher {
        self.fetcher.as_ref()
    }

    /// Ingest one request and write its record to `sink`.
    ///
    /// For a single-file source:
    ///
    /// 1. the source is resolved (URLs are fetched into the work directory) and must exist and
    ///    be non-empty
    /// 2. multi-byte text and sniffable binaries (bam, sff, pdf, bigwig, bigbed) are recognized
    /// 3. a gzip/bzip2/zip container is screened and unpacked, then re-classified
    /// 4. other binary content is only accepted for allow-listed extensions declared explicitly
    /// 5. text is normalized to `\n` line endings and its extension declared or guessed
    /// 6. the file is moved (owned) or copied (server-local) to `target.path`; link-only
    ///    sources are referenced in place
    ///
    /// After the record is written, the placed file is groomed if its format requires it;
    /// grooming failures are logged and do not change the record.
    ///
    /// Returns the record that was written. Fails only if the sink cannot be written.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use upload_ingest::ingestion::{Ingestor, PipelineOptions};
    /// use upload_ingest::types::{IngestionResult, OutputTarget, UploadRequest};
    ///
    /// # fn main() -> Result<(), upload_ingest::IngestionError> {
    /// let request = UploadRequest::from_json(
    ///     r#"{"type":"file","dataset_id":1,"path":"/tmp/upload_1","file_type":"auto","name":"peaks.bed.gz"}"#,
    /// )?;
    /// let mut records: Vec<IngestionResult> = Vec::new();
    /// let record = Ingestor::new(PipelineOptions::default()).ingest(
    ///     &request,
    ///     &OutputTarget::new("/data/dataset_1.dat"),
    ///     &mut records,
    /// )?;
    /// println!("{}", record.message());
    /// # Ok(())
    /// # }
    /// ```
    pub fn ingest(
        &self,
        request: &UploadRequest,
        target: &OutputTarget,
        sink: &mut dyn ResultSink,
    ) -> PipelineResult<IngestionResult> {
        let ctx = IngestionContext {
            dataset_id: request.dataset_id,
            source: request.source.label(),
            path: request.source.location(),
        };

        let outcome = match &request.source {
            UploadSource::Composite(manifest) => self.add_composite(request, manifest, target),
            _ => self.add_file(request, target),
        };
        report(
            self.options.observer.as_ref(),
            self.options.alert_at_or_above,
            &ctx,
            outcome.as_ref().map(|accepted| &accepted.record),
        );

        let (record, placed) = match outcome {
            Ok(accepted) => (accepted.record, accepted.placed),
            Err(e) => {
                debug!(dataset_id = request.dataset_id, error = %e, "upload rejected");
                (
                    IngestionResult::failure(request.dataset_id, self.registry().default_extension(), &e),
                    None,
                )
            }
        };
        sink.write_record(&record)?;

        if let Some(path) = placed {
            self.groom_placed(&record.ext, &path);
        }
        Ok(record)
    }

    fn groom_placed(&self, ext: &str, path: &Path) {
        let descriptor = self.registry.lookup(ext);
        let groomed = descriptor.needs_grooming(path).and_then(|needed| {
            if needed {
                debug!(path = %path.display(), ext, "grooming dataset");
                descriptor.groom(path)
            } else {
                Ok(())
            }
        });
        if let Err(e) = groomed {
            error!(path = %path.display(), ext, error = %e, "grooming failed after the record was written");
        }
    }

    fn add_file(&self, request: &UploadRequest, target: &OutputTarget) -> PipelineResult<Accepted> {
        let mut working = self.resolve_source(&request.source)?;
        let prepared = match self.prepare(request, &mut working) {
            Ok(prepared) => prepared,
            Err(e) => {
                working.discard();
                return Err(e);
            }
        };

        let placed = if request.is_link_only() {
            debug!(path = %working.path().display(), "link-only source referenced in place");
            None
        } else {
            working.place(&target.path)?;
            Some(target.path.clone())
        };

        let status = prepared
            .warning
            .unwrap_or_else(|| format!("uploaded {} file", prepared.tag));
        let record = IngestionResult::success(request.dataset_id, prepared.ext, status)
            .with_name(prepared.name)
            .with_line_count(prepared.line_count);
        Ok(Accepted { record, placed })
    }

    fn resolve_source(&self, source: &UploadSource) -> PipelineResult<WorkingFile> {
        Ok(match source {
            UploadSource::File { path } => WorkingFile::upload(path.clone()),
            UploadSource::Url { path } => {
                WorkingFile::fetched(self.fetcher.fetch(path, &self.options.work_dir)?)
            }
            UploadSource::ServerDir { path } | UploadSource::PathPaste { path } => {
                WorkingFile::borrowed(path.clone())
            }
            UploadSource::Composite(_) => {
                return Err(IngestionError::InvalidRequest {
                    message: "composite uploads have no single source file".to_string(),
                });
            }
        })
    }

    fn prepare(&self, request: &UploadRequest, working: &mut WorkingFile) -> PipelineResult<Prepared> {
        let metadata = working
            .path()
            .metadata()
            .map_err(|_| IngestionError::SourceMissing {
                path: working.path().to_path_buf(),
            })?;
        if metadata.len() == 0 {
            return Err(IngestionError::EmptySource);
        }

        let mut prepared = Prepared {
            ext: String::new(),
            tag: String::new(),
            name: display_name(request),
            line_count: None,
            warning: None,
        };

        let mut classification = self.classifier.classify(working.path())?;
        if let Classification::CompressedContainer(kind) = classification {
            classification = self.unpack(kind, request, working, &mut prepared)?;
        }

        match classification {
            Classification::SniffableBinary(kind) => {
                prepared.ext = kind.extension().to_string();
                prepared.tag = kind.extension().to_string();
            }
            Classification::UnrecognizedBinary | Classification::CompressedContainer(_) => {
                prepared.ext = self.check_binary(&prepared.name, &request.file_type)?;
                prepared.tag = "binary".to_string();
            }
            Classification::MultiByteText => self.prepare_text(request, working, true, &mut prepared)?,
            Classification::PlainText => self.prepare_text(request, working, false, &mut prepared)?,
        }

        if request.is_link_only() && self.registry.lookup(&prepared.ext).needs_grooming(working.path())? {
            return Err(IngestionError::LinkedContentMutation { action: "grooming" });
        }
        Ok(prepared)
    }

    /// Screen and unpack one container layer, then classify what came out of it.
    fn unpack(
        &self,
        kind: ContainerKind,
        request: &UploadRequest,
        working: &mut WorkingFile,
        prepared: &mut Prepared,
    ) -> PipelineResult<Classification> {
        let probe = decompress::probe_and_validate(kind, working.path())?;
        if !probe.is_container {
            debug!(container = kind.tag(), "magic matched but the container is unreadable");
            let prefix = read_prefix(working.path(), SNIFF_PREFIX_LEN)?;
            return Ok(if has_high_bit(&prefix) {
                Classification::UnrecognizedBinary
            } else {
                Classification::PlainText
            });
        }
        if !probe.is_safe {
            return Err(IngestionError::UnsafeContainer { container: kind });
        }
        if request.is_link_only() {
            return Err(IngestionError::LinkedContentMutation {
                action: "decompression",
            });
        }

        let dest = working.scratch_dir(&self.options.work_dir);
        let unpacked = decompress::decompress(kind, working.path(), &dest, request.dataset_id)?;
        working.replace_with(unpacked.temp)?;

        match (unpacked.entry_name, kind.name_suffix()) {
            (Some(entry), _) => prepared.name = entry,
            (None, Some(suffix)) => {
                if let Some(stripped) = prepared.name.strip_suffix(suffix) {
                    prepared.name = stripped.to_string();
                }
            }
            (None, None) => {}
        }
        if unpacked.extra_entries_ignored {
            prepared.warning = Some(ZIP_EXTRA_ENTRIES_WARNING.to_string());
        }
        prepared.tag = kind.tag().to_string();
        debug!(container = kind.tag(), name = %prepared.name, "unpacked upload");

        self.single_layer.classify(working.path())
    }

    /// Extension of an unrecognized binary upload, taken from the display name.
    fn check_binary(&self, name: &str, declared: &DeclaredFormat) -> PipelineResult<String> {
        let ext = name
            .rsplit_once('.')
            .map(|(_, suffix)| suffix.trim().to_ascii_lowercase())
            .filter(|suffix| !suffix.is_empty())
            .ok_or(IngestionError::UnsafeBinary)?;
        if !self
            .registry
            .unsniffable_binary_formats()
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(&ext))
        {
            return Err(IngestionError::UnsafeBinary);
        }
        if !declared.explicit().is_some_and(|d| d.eq_ignore_ascii_case(&ext)) {
            return Err(IngestionError::DeclaredFormatRequired { extension: ext });
        }
        Ok(ext)
    }

    fn prepare_text(
        &self,
        request: &UploadRequest,
        working: &mut WorkingFile,
        multi_byte: bool,
        prepared: &mut Prepared,
    ) -> PipelineResult<()> {
        if !request.is_link_only() {
            let normalizer = TextNormalizer::new(&self.options.work_dir);
            prepared.line_count = Some(working.normalize(&normalizer, request.space_to_tab)?);
        }
        prepared.ext = match request.file_type.explicit() {
            Some(ext) => ext.to_string(),
            None => self.registry.guess_extension(working.path(), multi_byte)?,
        };
        prepared.tag = if multi_byte {
            "multi-byte char".to_string()
        } else {
            prepared.ext.clone()
        };
        Ok(())
    }
}

/// The request's display name, falling back to the source file name.
pub(crate) fn display_name(request: &UploadRequest) -> String {
    if !request.name.is_empty() {
        return request.name.clone();
    }
    request
        .source
        .location()
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
