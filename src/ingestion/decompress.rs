//! Single-layer decompression of gzip, bzip2 and zip uploads.
//!
//! Probing validates the container signature and screens a bounded lookahead of the
//! decompressed stream; [`decompress`] then unpacks the whole container into a fresh temporary
//! file. The temporary file is deleted on every error path (it is only handed out as a
//! [`TempPath`], which removes the file when dropped).

use std::fs::File;
use std::io::{self, BufReader, Read, Write};
use std::path::Path;

use flate2::read::MultiGzDecoder;
use tempfile::TempPath;
use tracing::debug;
use zip::ZipArchive;

use crate::error::{IngestionError, PipelineResult};
use crate::types::ContainerKind;

use super::classify::container_magic;
use super::detect::{SFF_MAGIC, read_prefix};
use super::screen::{TextSource, contains_unsafe_markup};

/// Decompressed bytes screened before a gzip/bzip2 upload is accepted.
pub const LOOKAHEAD_LEN: usize = 32 * 1024;
/// Read size used while unpacking.
pub const COPY_CHUNK_LEN: usize = 1 << 20;

/// Status reported when a zip archive had more than one file entry.
pub const ZIP_EXTRA_ENTRIES_WARNING: &str =
    "ZIP file contained more than one file, only the first file was added.";

/// Result of probing one container kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Probe {
    pub is_container: bool,
    pub is_safe: bool,
}

impl Probe {
    pub const NOT_CONTAINER: Probe = Probe {
        is_container: false,
        is_safe: false,
    };
    pub const SAFE: Probe = Probe {
        is_container: true,
        is_safe: true,
    };
    pub const UNSAFE: Probe = Probe {
        is_container: true,
        is_safe: false,
    };
}

/// Check the signature of `kind` and, for streams, screen the decompressed lookahead.
pub fn probe_and_validate(kind: ContainerKind, path: &Path) -> PipelineResult<Probe> {
    if container_magic(&read_prefix(path, 4)?) != Some(kind) {
        return Ok(Probe::NOT_CONTAINER);
    }
    match kind {
        ContainerKind::Gzip => probe_gzip(path),
        ContainerKind::Bzip2 => probe_bzip2(path),
        ContainerKind::Zip => Ok(if ZipArchive::new(File::open(path)?).is_ok() {
            Probe::SAFE
        } else {
            Probe::NOT_CONTAINER
        }),
    }
}

fn probe_gzip(path: &Path) -> PipelineResult<Probe> {
    let mut head = Vec::with_capacity(SFF_MAGIC.len());
    let header_ok = MultiGzDecoder::new(File::open(path)?)
        .take(SFF_MAGIC.len() as u64)
        .read_to_end(&mut head)
        .is_ok();
    if !header_ok {
        return Ok(Probe::NOT_CONTAINER);
    }
    // Gzipped SFF is a supported binary payload; it is not screened as text.
    if head == SFF_MAGIC {
        return Ok(Probe::SAFE);
    }
    screen_lookahead(MultiGzDecoder::new(File::open(path)?))
}

#[cfg(feature = "bzip2")]
fn probe_bzip2(path: &Path) -> PipelineResult<Probe> {
    screen_lookahead(bzip2::read::MultiBzDecoder::new(BufReader::new(File::open(path)?)))
}

#[cfg(not(feature = "bzip2"))]
fn probe_bzip2(_path: &Path) -> PipelineResult<Probe> {
    Ok(Probe::NOT_CONTAINER)
}

fn screen_lookahead<R: Read>(reader: R) -> PipelineResult<Probe> {
    let mut chunk = Vec::with_capacity(LOOKAHEAD_LEN);
    // A corrupt stream surfaces during full decompression; screen what was readable.
    if let Err(e) = reader.take(LOOKAHEAD_LEN as u64).read_to_end(&mut chunk) {
        debug!(error = %e, read = chunk.len(), "lookahead stopped early");
    }
    Ok(if contains_unsafe_markup(TextSource::Chunk(&chunk))? {
        Probe::UNSAFE
    } else {
        Probe::SAFE
    })
}

/// A fully unpacked container.
#[derive(Debug)]
pub struct Unpacked {
    /// Decompressed content; removed when dropped unless persisted.
    pub temp: TempPath,
    /// Name of the extracted zip entry.
    pub entry_name: Option<String>,
    /// The zip archive had further file entries that were skipped.
    pub extra_entries_ignored: bool,
}

/// Unpack `path` into a new temporary file inside `dest_dir`.
///
/// gzip/bzip2 streams are decompressed whole; for zip only the first non-directory entry is
/// extracted.
pub fn decompress(
    kind: ContainerKind,
    path: &Path,
    dest_dir: &Path,
    dataset_id: u64,
) -> PipelineResult<Unpacked> {
    let verb = match kind {
        ContainerKind::Gzip => "gunzip",
        ContainerKind::Bzip2 => "bunzip2",
        ContainerKind::Zip => "zip",
    };
    let mut temp = tempfile::Builder::new()
        .prefix(&format!("data_id_{dataset_id}_upload_{verb}_"))
        .tempfile_in(dest_dir)?;

    let mut unpacked_entry = None;
    match kind {
        ContainerKind::Gzip => {
            let decoder = MultiGzDecoder::new(File::open(path)?);
            stream_into(decoder, temp.as_file_mut(), kind)?;
        }
        ContainerKind::Bzip2 => {
            stream_into(open_bzip2(path)?, temp.as_file_mut(), kind)?;
        }
        ContainerKind::Zip => {
            unpacked_entry = Some(unzip_first(path, temp.as_file_mut())?);
        }
    }
    temp.as_file_mut().flush()?;

    let (entry_name, extra_entries_ignored) = match unpacked_entry {
        Some((name, ignored)) => (Some(name), ignored),
        None => (None, false),
    };
    Ok(Unpacked {
        temp: temp.into_temp_path(),
        entry_name,
        extra_entries_ignored,
    })
}

#[cfg(feature = "bzip2")]
fn open_bzip2(path: &Path) -> PipelineResult<impl Read> {
    Ok(bzip2::read::MultiBzDecoder::new(BufReader::new(File::open(path)?)))
}

#[cfg(not(feature = "bzip2"))]
fn open_bzip2(_path: &Path) -> PipelineResult<io::Empty> {
    Err(IngestionError::Decompression {
        container: ContainerKind::Bzip2,
        source: io::Error::new(io::ErrorKind::Unsupported, "bzip2 support is not enabled"),
    })
}

/// Extract the first file entry. Returns its name and whether other file entries were skipped.
fn unzip_first(path: &Path, out: &mut File) -> PipelineResult<(String, bool)> {
    let mut archive = ZipArchive::new(BufReader::new(File::open(path)?))?;
    let mut file_entries = Vec::new();
    for i in 0..archive.len() {
        if !archive.by_index_raw(i)?.is_dir() {
            file_entries.push(i);
        }
    }
    let Some((&first, rest)) = file_entries.split_first() else {
        return Err(IngestionError::EmptyArchive);
    };

    let mut entry = archive.by_index(first)?;
    let name = entry.name().to_string();
    stream_into(&mut entry, out, ContainerKind::Zip)?;
    Ok((name, !rest.is_empty()))
}

/// Copy a decoding reader into `out` in [`COPY_CHUNK_LEN`] reads.
///
/// Read errors are decompression failures; write errors stay plain I/O errors.
fn stream_into<R: Read>(mut reader: R, out: &mut File, container: ContainerKind) -> PipelineResult<u64> {
    let mut buf = vec![0u8; COPY_CHUNK_LEN];
    let mut total = 0u64;
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(source) => return Err(IngestionError::Decompression { container, source }),
        };
        out.write_all(&buf[..n])?;
        total += n as u64;
    }
    Ok(total)
}
