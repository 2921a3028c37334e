//! Multi-file (composite) uploads.

use std::fs;
use std::path::{Component, Path};

use tracing::debug;

use crate::error::{IngestionError, PipelineResult};
use crate::types::{
    CompositeManifest, CompositePart, IngestionResult, OutputTarget, PartLocation, PartState,
    UploadRequest,
};

use super::normalize::TextNormalizer;
use super::upload::{Accepted, Ingestor, display_name};
use super::working::WorkingFile;

impl Ingestor {
    /// Place every supplied part under `target.files_path`, then move the primary descriptor to
    /// `target.path`.
    ///
    /// Required parts are checked before anything is created, so a missing part leaves no files
    /// directory behind. A part that fails after that aborts the upload; siblings already placed
    /// stay where they are.
    pub(crate) fn add_composite(
        &self,
        request: &UploadRequest,
        manifest: &CompositeManifest,
        target: &OutputTarget,
    ) -> PipelineResult<Accepted> {
        let files_path = target
            .files_path
            .as_deref()
            .ok_or(IngestionError::MissingOutput {
                dataset_id: request.dataset_id,
            })?;

        let mut parts = manifest.parts();
        for part in &parts {
            if part.required && part.location.is_none() {
                return Err(IngestionError::MissingCompositePart {
                    name: part.name.clone(),
                });
            }
            validate_part_name(&part.name)?;
        }

        fs::create_dir_all(files_path)?;
        for part in &mut parts {
            self.place_part(part, files_path)?;
        }

        let primary = &manifest.primary_file;
        if !primary.exists() {
            return Err(IngestionError::SourceMissing {
                path: primary.clone(),
            });
        }
        WorkingFile::upload(primary.clone()).place(&target.path)?;

        let file_type = request
            .file_type
            .explicit()
            .unwrap_or_else(|| self.registry().default_extension());
        let placed = parts
            .iter()
            .filter(|p| matches!(p.state, PartState::Placed(_)))
            .count();
        debug!(dataset_id = request.dataset_id, placed, file_type, "composite upload placed");

        let record = IngestionResult::success(
            request.dataset_id,
            file_type,
            format!("uploaded {file_type} file"),
        )
        .with_name(display_name(request));
        Ok(Accepted {
            record,
            placed: None,
        })
    }

    fn place_part(&self, part: &mut CompositePart, files_path: &Path) -> PipelineResult<()> {
        let Some(location) = &part.location else {
            debug!(part = %part.name, "optional part not supplied");
            return Ok(());
        };

        let work_dir = &self.options().work_dir;
        let mut working = match location {
            PartLocation::Local(path) => {
                if !path.exists() {
                    return Err(IngestionError::SourceMissing { path: path.clone() });
                }
                WorkingFile::upload(path.clone())
            }
            PartLocation::Remote(url) => WorkingFile::fetched(self.fetcher().fetch(url, work_dir)?),
        };
        part.state = PartState::Resolved(working.path().to_path_buf());

        if !part.binary {
            let normalizer = TextNormalizer::new(work_dir);
            if let Err(e) = working.normalize(&normalizer, part.space_to_tab) {
                working.discard();
                return Err(e);
            }
        }

        let dest = files_path.join(&part.name);
        working.place(&dest)?;
        debug!(part = %part.name, dest = %dest.display(), "composite part placed");
        part.state = PartState::Placed(dest);
        Ok(())
    }
}

/// Part names become file names inside the files directory and may not leave it.
fn validate_part_name(name: &str) -> PipelineResult<()> {
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(IngestionError::InvalidRequest {
            message: format!("composite part name '{name}' is not a plain file name"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn part_names_must_be_plain_file_names() {
        assert!(validate_part_name("edges.sif").is_ok());
        assert!(validate_part_name("../escape").is_err());
        assert!(validate_part_name("nested/part").is_err());
        assert!(validate_part_name("/abs").is_err());
        assert!(validate_part_name("").is_err());
    }
}
