//! Content classification.
//!
//! The classifier is an ordered list of [`ClassifierStep`]s; the first step that recognizes the
//! file decides its [`Classification`], and files no step recognizes are plain text. Every step
//! looks only at a bounded prefix of the file.

use std::path::Path;

use tracing::debug;

use crate::error::PipelineResult;
use crate::types::{Classification, ContainerKind};

use super::detect::{read_prefix, sniff_binary};

/// Bytes examined by the text/binary checks.
pub const SNIFF_PREFIX_LEN: usize = 100;

const GZIP_MAGIC: &[u8] = &[0x1f, 0x8b];
#[cfg(feature = "bzip2")]
const BZIP2_MAGIC: &[u8] = b"BZh";
const ZIP_LOCAL_HEADER: &[u8] = b"PK\x03\x04";

/// One predicate in the classification chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassifierStep {
    /// Valid UTF-8 prefix containing a character wider than one byte.
    MultiByteText,
    /// One of the fixed binary-format detectors matched.
    SniffableBinary,
    /// gzip, bzip2 or zip magic.
    CompressedContainer,
    /// A prefix byte with the high bit set.
    UnrecognizedBinary,
}

impl ClassifierStep {
    fn evaluate(self, path: &Path, prefix: &[u8]) -> PipelineResult<Option<Classification>> {
        Ok(match self {
            ClassifierStep::MultiByteText => {
                is_multi_byte(prefix).then_some(Classification::MultiByteText)
            }
            ClassifierStep::SniffableBinary => {
                sniff_binary(path)?.map(Classification::SniffableBinary)
            }
            ClassifierStep::CompressedContainer => {
                container_magic(prefix).map(Classification::CompressedContainer)
            }
            ClassifierStep::UnrecognizedBinary => {
                has_high_bit(prefix).then_some(Classification::UnrecognizedBinary)
            }
        })
    }
}

/// Ordered classification chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classifier {
    steps: Vec<ClassifierStep>,
}

impl Default for Classifier {
    fn default() -> Self {
        Self::standard()
    }
}

impl Classifier {
    /// The upload classifier: text encoding, binary sniffers, containers, generic binary.
    pub fn standard() -> Self {
        Self::new(vec![
            ClassifierStep::MultiByteText,
            ClassifierStep::SniffableBinary,
            ClassifierStep::CompressedContainer,
            ClassifierStep::UnrecognizedBinary,
        ])
    }

    /// Used on decompressed content: containers are only unpacked one layer deep, so a nested
    /// container is just binary.
    pub fn single_layer() -> Self {
        Self::new(vec![
            ClassifierStep::MultiByteText,
            ClassifierStep::SniffableBinary,
            ClassifierStep::UnrecognizedBinary,
        ])
    }

    pub fn new(steps: Vec<ClassifierStep>) -> Self {
        Self { steps }
    }

    pub fn steps(&self) -> &[ClassifierStep] {
        &self.steps
    }

    /// Classify the file at `path`. Read-only.
    pub fn classify(&self, path: &Path) -> PipelineResult<Classification> {
        let prefix = read_prefix(path, SNIFF_PREFIX_LEN)?;
        for step in &self.steps {
            if let Some(found) = step.evaluate(path, &prefix)? {
                debug!(path = %path.display(), ?step, ?found, "classified upload");
                return Ok(found);
            }
        }
        Ok(Classification::PlainText)
    }
}

/// True when `prefix` is UTF-8 with at least one multi-byte character.
///
/// A sequence cut off by the end of the prefix does not make it invalid.
pub fn is_multi_byte(prefix: &[u8]) -> bool {
    let text = match std::str::from_utf8(prefix) {
        Ok(text) => text,
        Err(e) if e.error_len().is_none() => {
            std::str::from_utf8(&prefix[..e.valid_up_to()]).unwrap_or_default()
        }
        Err(_) => return false,
    };
    text.chars().any(|c| c.len_utf8() > 1)
}

pub fn has_high_bit(prefix: &[u8]) -> bool {
    prefix.iter().any(|b| b & 0x80 != 0)
}

/// Container kind announced by the leading magic bytes, in [`ContainerKind::PRIORITY`] order.
pub fn container_magic(prefix: &[u8]) -> Option<ContainerKind> {
    ContainerKind::PRIORITY.into_iter().find(|kind| match kind {
        ContainerKind::Gzip => prefix.starts_with(GZIP_MAGIC),
        #[cfg(feature = "bzip2")]
        ContainerKind::Bzip2 => prefix.starts_with(BZIP2_MAGIC),
        #[cfg(not(feature = "bzip2"))]
        ContainerKind::Bzip2 => false,
        ContainerKind::Zip => prefix.starts_with(ZIP_LOCAL_HEADER),
    })
}
