//! Format registry: extension lookup, text sniffing and grooming policies.
//!
//! The ingestion pipeline only talks to [`FormatRegistry`] and [`FormatDescriptor`]; [`Registry`]
//! is the built-in implementation and can be configured from JSON:
//!
//! ```json
//! {
//!   "default_extension": "data",
//!   "sniff_order": ["vcf", "bed", "tabular"],
//!   "unsniffable_binary_formats": ["ab1", "scf"],
//!   "formats": [{ "extension": "bed", "grooming": "sort_intervals" }]
//! }
//! ```

pub mod grooming;
pub mod sniffers;

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{IngestionError, PipelineResult};
use crate::types::SniffedBinary;

pub use grooming::GroomingPolicy;
pub use sniffers::{DEFAULT_SNIFF_ORDER, FALLBACK_TEXT_EXTENSION, TextSniffer};

/// Behavior attached to one extension.
pub trait FormatDescriptor: Send + Sync {
    fn extension(&self) -> &str;

    /// Whether the placed dataset at `path` must be rewritten before use.
    fn needs_grooming(&self, path: &Path) -> PipelineResult<bool>;

    fn groom(&self, path: &Path) -> PipelineResult<()>;
}

/// Lookup interface used by the ingestors.
pub trait FormatRegistry: Send + Sync {
    /// Descriptor for `extension`; unknown extensions resolve to a generic descriptor.
    fn lookup(&self, extension: &str) -> &dyn FormatDescriptor;

    /// Guess the extension of a text file. With `multi_byte`, only sniffers that tolerate
    /// multi-byte text are consulted.
    fn guess_extension(&self, path: &Path, multi_byte: bool) -> PipelineResult<String>;

    /// Text sniffers in the order [`FormatRegistry::guess_extension`] consults them.
    fn sniff_order(&self) -> &[TextSniffer];

    /// Binary extensions accepted without content sniffing (when declared explicitly).
    fn unsniffable_binary_formats(&self) -> &[String];

    /// Extension used when nothing more specific is known: failure records and `auto`
    /// composites.
    fn default_extension(&self) -> &str;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataFormat {
    pub extension: String,
    #[serde(default)]
    pub grooming: GroomingPolicy,
}

impl DataFormat {
    pub fn new(extension: impl Into<String>) -> Self {
        Self {
            extension: extension.into(),
            grooming: GroomingPolicy::None,
        }
    }

    pub fn with_grooming(mut self, grooming: GroomingPolicy) -> Self {
        self.grooming = grooming;
        self
    }
}

impl FormatDescriptor for DataFormat {
    fn extension(&self) -> &str {
        &self.extension
    }

    fn needs_grooming(&self, path: &Path) -> PipelineResult<bool> {
        self.grooming.needs_grooming(path)
    }

    fn groom(&self, path: &Path) -> PipelineResult<()> {
        self.grooming.groom(path)
    }
}

/// Serialized form of a [`Registry`]. Missing fields take the built-in values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub default_extension: String,
    pub sniff_order: Vec<TextSniffer>,
    pub unsniffable_binary_formats: Vec<String>,
    pub formats: Vec<DataFormat>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        let mut formats: Vec<DataFormat> = SniffedBinary::PRIORITY
            .iter()
            .map(|kind| DataFormat::new(kind.extension()))
            .collect();
        formats.extend(DEFAULT_SNIFF_ORDER.iter().map(|sniffer| {
            let format = DataFormat::new(sniffer.extension());
            match sniffer {
                TextSniffer::Bed => format.with_grooming(GroomingPolicy::SortIntervals),
                _ => format,
            }
        }));
        formats.push(DataFormat::new(FALLBACK_TEXT_EXTENSION));

        let unsniffable = vec!["ab1".to_string(), "scf".to_string(), "h5".to_string()];
        formats.extend(unsniffable.iter().map(DataFormat::new));

        Self {
            default_extension: "data".to_string(),
            sniff_order: DEFAULT_SNIFF_ORDER.to_vec(),
            unsniffable_binary_formats: unsniffable,
            formats,
        }
    }
}

/// The built-in [`FormatRegistry`].
#[derive(Debug, Clone)]
pub struct Registry {
    formats: HashMap<String, DataFormat>,
    fallback: DataFormat,
    sniff_order: Vec<TextSniffer>,
    unsniffable: Vec<String>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl Registry {
    pub fn builtin() -> Self {
        Self::from_config(RegistryConfig::default())
    }

    /// Extensions are matched case-insensitively.
    pub fn from_config(config: RegistryConfig) -> Self {
        let formats = config
            .formats
            .into_iter()
            .map(|format| (format.extension.to_ascii_lowercase(), format))
            .collect();
        Self {
            formats,
            fallback: DataFormat::new(config.default_extension),
            sniff_order: config.sniff_order,
            unsniffable: config
                .unsniffable_binary_formats
                .iter()
                .map(|ext| ext.to_ascii_lowercase())
                .collect(),
        }
    }

    /// Load a JSON [`RegistryConfig`].
    pub fn from_path(path: impl AsRef<Path>) -> PipelineResult<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)?;
        let config: RegistryConfig = serde_json::from_str(&text)?;
        if config.default_extension.trim().is_empty() {
            return Err(IngestionError::Registry {
                message: format!("{}: default_extension must not be empty", path.display()),
            });
        }
        Ok(Self::from_config(config))
    }
}

impl FormatRegistry for Registry {
    fn lookup(&self, extension: &str) -> &dyn FormatDescriptor {
        self.formats
            .get(&extension.to_ascii_lowercase())
            .unwrap_or(&self.fallback)
    }

    fn guess_extension(&self, path: &Path, multi_byte: bool) -> PipelineResult<String> {
        let head = sniffers::read_head(path)?;
        let found = self
            .sniff_order
            .iter()
            .filter(|s| !multi_byte || s.supports_multi_byte())
            .find(|s| s.matches(&head));
        Ok(found
            .map_or(FALLBACK_TEXT_EXTENSION, |s| s.extension())
            .to_string())
    }

    fn sniff_order(&self) -> &[TextSniffer] {
        &self.sniff_order
    }

    fn unsniffable_binary_formats(&self) -> &[String] {
        &self.unsniffable
    }

    fn default_extension(&self) -> &str {
        &self.fallback.extension
    }
}
