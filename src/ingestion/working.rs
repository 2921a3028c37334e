//! The file an ingestion is currently operating on, and who owns it.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempPath;
use tracing::warn;

use crate::error::{IngestionError, PipelineResult};

use super::normalize::TextNormalizer;

#[derive(Debug)]
enum Backing {
    /// Written by the upload transport; the pipeline owns it and deletes it on failure.
    Upload(PathBuf),
    /// Fetched, decompressed or converted content; removed when dropped.
    Temp(TempPath),
    /// A server-local original. Never modified, moved or deleted.
    Borrowed(PathBuf),
}

#[derive(Debug)]
pub(crate) struct WorkingFile {
    backing: Backing,
}

impl WorkingFile {
    pub(crate) fn upload(path: PathBuf) -> Self {
        Self {
            backing: Backing::Upload(path),
        }
    }

    pub(crate) fn fetched(temp: TempPath) -> Self {
        Self {
            backing: Backing::Temp(temp),
        }
    }

    pub(crate) fn borrowed(path: PathBuf) -> Self {
        Self {
            backing: Backing::Borrowed(path),
        }
    }

    pub(crate) fn path(&self) -> &Path {
        match &self.backing {
            Backing::Upload(path) | Backing::Borrowed(path) => path,
            Backing::Temp(temp) => temp,
        }
    }

    /// False for server-local originals, which must not be rewritten.
    pub(crate) fn is_owned(&self) -> bool {
        !matches!(self.backing, Backing::Borrowed(_))
    }

    /// Directory for temporaries derived from this file: next to owned files, so the result can
    /// be renamed over them, otherwise `work_dir`.
    pub(crate) fn scratch_dir(&self, work_dir: &Path) -> PathBuf {
        match &self.backing {
            Backing::Borrowed(_) => work_dir.to_path_buf(),
            Backing::Upload(_) | Backing::Temp(_) => self
                .path()
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map_or_else(|| PathBuf::from("."), Path::to_path_buf),
        }
    }

    /// Swap in new content. An owned upload is overwritten in place; otherwise the temporary
    /// becomes the working file.
    pub(crate) fn replace_with(&mut self, temp: TempPath) -> PipelineResult<()> {
        if let Backing::Upload(path) = &self.backing {
            temp.persist(path).map_err(|e| IngestionError::Io(e.error))?;
        } else {
            self.backing = Backing::Temp(temp);
        }
        Ok(())
    }

    /// Normalize line endings, in place for owned files. Returns the line count.
    pub(crate) fn normalize(
        &mut self,
        normalizer: &TextNormalizer,
        space_to_tab: bool,
    ) -> PipelineResult<usize> {
        let normalized = normalizer.normalize(self.path(), space_to_tab, self.is_owned())?;
        let line_count = normalized.line_count;
        if let Some(converted) = normalized.converted {
            self.replace_with(converted)?;
        }
        Ok(line_count)
    }

    /// Put the content at `dest`: owned content is moved, borrowed content copied.
    pub(crate) fn place(self, dest: &Path) -> PipelineResult<()> {
        match self.backing {
            Backing::Upload(path) => {
                if fs::rename(&path, dest).is_ok() {
                    return Ok(());
                }
                let copied = fs::copy(&path, dest);
                remove_quietly(&path);
                copied?;
            }
            Backing::Temp(temp) => {
                if let Err(e) = temp.persist(dest) {
                    fs::copy(&e.path, dest)?;
                }
            }
            Backing::Borrowed(path) => {
                fs::copy(&path, dest)?;
            }
        }
        Ok(())
    }

    /// Drop the content after a failure. Server-local originals are left alone.
    pub(crate) fn discard(self) {
        if let Backing::Upload(path) = &self.backing {
            remove_quietly(path);
        }
    }
}

/// Cleanup is best effort and never replaces the error being reported.
fn remove_quietly(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "failed to remove working file");
        }
    }
}
