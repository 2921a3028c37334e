//! Fetching remote sources into scratch storage.

use std::fs::File;
use std::io;
use std::path::Path;

use tempfile::TempPath;
use tracing::debug;

use crate::error::{IngestionError, PipelineResult};

/// Prefix of temporary files holding fetched content.
pub const FETCH_PREFIX: &str = "url_paste";

/// Pulls the bytes behind a location into a temporary file inside `dir`.
///
/// The returned [`TempPath`] removes the file when dropped unless it is persisted.
pub trait Fetcher: Send + Sync {
    fn fetch(&self, location: &str, dir: &Path) -> PipelineResult<TempPath>;
}

/// `file://` locations are served from the local filesystem by every fetcher.
fn fetch_local(path: &str, dir: &Path) -> PipelineResult<TempPath> {
    let mut source = File::open(path).map_err(|e| IngestionError::Fetch {
        location: format!("file://{path}"),
        message: e.to_string(),
    })?;
    let mut temp = tempfile::Builder::new()
        .prefix(FETCH_PREFIX)
        .tempfile_in(dir)?;
    io::copy(&mut source, temp.as_file_mut())?;
    Ok(temp.into_temp_path())
}

/// HTTP(S) fetcher backed by a blocking `reqwest` client.
#[cfg(feature = "remote")]
#[derive(Debug, Clone, Default)]
pub struct HttpFetcher {
    client: reqwest::blocking::Client,
}

#[cfg(feature = "remote")]
impl HttpFetcher {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(feature = "remote")]
impl Fetcher for HttpFetcher {
    fn fetch(&self, location: &str, dir: &Path) -> PipelineResult<TempPath> {
        if let Some(path) = location.strip_prefix("file://") {
            return fetch_local(path, dir);
        }
        let fetch_error = |message: String| IngestionError::Fetch {
            location: location.to_string(),
            message,
        };

        let mut response = self
            .client
            .get(location)
            .send()
            .and_then(reqwest::blocking::Response::error_for_status)
            .map_err(|e| fetch_error(e.to_string()))?;

        let mut temp = tempfile::Builder::new()
            .prefix(FETCH_PREFIX)
            .tempfile_in(dir)?;
        let bytes = response
            .copy_to(temp.as_file_mut())
            .map_err(|e| fetch_error(e.to_string()))?;
        debug!(location, bytes, "fetched remote source");
        Ok(temp.into_temp_path())
    }
}

/// Fetcher used when remote support is compiled out: only `file://` locations resolve.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledFetcher;

impl Fetcher for DisabledFetcher {
    fn fetch(&self, location: &str, dir: &Path) -> PipelineResult<TempPath> {
        match location.strip_prefix("file://") {
            Some(path) => fetch_local(path, dir),
            None => Err(IngestionError::Fetch {
                location: location.to_string(),
                message: "remote fetching is not enabled in this build".to_string(),
            }),
        }
    }
}

/// The fetcher matching the enabled features.
pub fn default_fetcher() -> std::sync::Arc<dyn Fetcher> {
    #[cfg(feature = "remote")]
    {
        std::sync::Arc::new(HttpFetcher::new())
    }
    #[cfg(not(feature = "remote"))]
    {
        std::sync::Arc::new(DisabledFetcher)
    }
}
