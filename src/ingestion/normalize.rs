//! Line-ending normalization.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::bytes::{NoExpand, Regex};
use tempfile::TempPath;

use crate::error::{IngestionError, PipelineResult};

use super::lines::Lines;

static WHITESPACE_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?-u:\s)+").expect("whitespace pattern is valid"));

/// Outcome of [`TextNormalizer::normalize`].
#[derive(Debug)]
pub struct Normalized {
    pub line_count: usize,
    /// Present when the input was not rewritten in place.
    pub converted: Option<TempPath>,
}

/// Rewrites text to `\n` line endings, optionally turning whitespace runs into tabs.
#[derive(Debug, Clone)]
pub struct TextNormalizer {
    scratch_dir: PathBuf,
}

impl TextNormalizer {
    /// `scratch_dir` receives the output when normalizing a file that must not be modified.
    pub fn new(scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            scratch_dir: scratch_dir.into(),
        }
    }

    /// Normalize `path`.
    ///
    /// With `in_place` the file is atomically replaced; otherwise the original is left untouched
    /// and the output is a temporary file in the scratch directory.
    pub fn normalize(
        &self,
        path: &Path,
        convert_separators_to_tabs: bool,
        in_place: bool,
    ) -> PipelineResult<Normalized> {
        let dir = if in_place {
            path.parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or(Path::new("."))
        } else {
            self.scratch_dir.as_path()
        };
        let mut temp = tempfile::Builder::new()
            .prefix("upload_convert_")
            .tempfile_in(dir)?;

        let line_count = {
            let reader = BufReader::new(File::open(path)?);
            let mut writer = BufWriter::new(temp.as_file_mut());
            let count = rewrite_lines(reader, &mut writer, convert_separators_to_tabs)?;
            writer.flush()?;
            count
        };

        if in_place {
            temp.persist(path).map_err(|e| IngestionError::Io(e.error))?;
            Ok(Normalized {
                line_count,
                converted: None,
            })
        } else {
            Ok(Normalized {
                line_count,
                converted: Some(temp.into_temp_path()),
            })
        }
    }
}

fn rewrite_lines<R: BufRead, W: Write>(
    reader: R,
    out: &mut W,
    convert_separators_to_tabs: bool,
) -> PipelineResult<usize> {
    let mut count = 0;
    for line in Lines::new(reader) {
        let line = line?;
        if convert_separators_to_tabs {
            out.write_all(&WHITESPACE_RUN.replace_all(&line, NoExpand(b"\t")))?;
        } else {
            out.write_all(&line)?;
        }
        out.write_all(b"\n")?;
        count += 1;
    }
    Ok(count)
}
