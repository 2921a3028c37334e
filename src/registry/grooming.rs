//! Post-placement grooming policies.

use std::cmp::Ordering;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{IngestionError, PipelineResult};
use crate::ingestion::lines::Lines;

/// What, if anything, must be done to a placed dataset before it is usable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroomingPolicy {
    #[default]
    None,
    /// Interval rows sorted by `(chrom, start)`; header lines stay on top.
    SortIntervals,
}

impl GroomingPolicy {
    pub fn needs_grooming(self, path: &Path) -> PipelineResult<bool> {
        match self {
            GroomingPolicy::None => Ok(false),
            GroomingPolicy::SortIntervals => {
                let (_, rows) = read_interval_rows(path)?;
                Ok(rows
                    .windows(2)
                    .any(|w| interval_order(&w[0], &w[1]) == Ordering::Greater))
            }
        }
    }

    /// Rewrite `path`; the file is replaced atomically.
    pub fn groom(self, path: &Path) -> PipelineResult<()> {
        match self {
            GroomingPolicy::None => Ok(()),
            GroomingPolicy::SortIntervals => sort_intervals(path),
        }
    }
}

fn is_header(line: &[u8]) -> bool {
    line.is_empty()
        || line.starts_with(b"#")
        || line.starts_with(b"track")
        || line.starts_with(b"browser")
}

fn read_interval_rows(path: &Path) -> PipelineResult<(Vec<Vec<u8>>, Vec<Vec<u8>>)> {
    let mut headers = Vec::new();
    let mut rows = Vec::new();
    for line in Lines::new(BufReader::new(File::open(path)?)) {
        let line = line?;
        if is_header(&line) {
            headers.push(line);
        } else {
            rows.push(line);
        }
    }
    Ok((headers, rows))
}

fn interval_key(line: &[u8]) -> (&[u8], u64) {
    let mut fields = line.split(|b| *b == b'\t');
    let chrom = fields.next().unwrap_or_default();
    let start = fields
        .next()
        .and_then(|f| std::str::from_utf8(f).ok())
        .and_then(|f| f.trim().parse::<u64>().ok())
        .unwrap_or(u64::MAX);
    (chrom, start)
}

fn interval_order(a: &[u8], b: &[u8]) -> Ordering {
    interval_key(a).cmp(&interval_key(b))
}

fn sort_intervals(path: &Path) -> PipelineResult<()> {
    let (headers, mut rows) = read_interval_rows(path)?;
    rows.sort_by(|a, b| interval_order(a, b));

    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let mut temp = tempfile::Builder::new()
        .prefix("upload_groom_")
        .tempfile_in(dir)?;
    {
        let mut out = BufWriter::new(temp.as_file_mut());
        for line in headers.iter().chain(rows.iter()) {
            out.write_all(line)?;
            out.write_all(b"\n")?;
        }
        out.flush()?;
    }
    temp.persist(path).map_err(|e| IngestionError::Io(e.error))?;
    debug!(path = %path.display(), rows = rows.len(), "sorted interval file");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;

    #[test]
    fn sorted_file_needs_nothing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.bed");
        fs::write(&path, "chr1\t5\t9\nchr1\t10\t20\nchr2\t1\t2\n").unwrap();
        assert!(!GroomingPolicy::SortIntervals.needs_grooming(&path).unwrap());
        assert!(!GroomingPolicy::None.needs_grooming(&path).unwrap());
    }

    #[test]
    fn sorts_rows_and_keeps_headers_first() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.bed");
        fs::write(&path, "track name=t\nchr2\t1\t2\nchr1\t10\t20\n#note\nchr1\t5\t9\n").unwrap();

        assert!(GroomingPolicy::SortIntervals.needs_grooming(&path).unwrap());
        GroomingPolicy::SortIntervals.groom(&path).unwrap();

        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "track name=t\n#note\nchr1\t5\t9\nchr1\t10\t20\nchr2\t1\t2\n"
        );
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
