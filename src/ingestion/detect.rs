//! Magic-byte probes for the binary formats recognized ahead of decompression.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use flate2::read::MultiGzDecoder;

use crate::error::PipelineResult;
use crate::types::SniffedBinary;

/// Decompressed SFF magic, also used to let gzipped SFF through the container screen.
pub const SFF_MAGIC: [u8; 4] = *b".sff";
const BAM_MAGIC: [u8; 4] = *b"BAM\x01";
const PDF_MAGIC: &[u8] = b"%PDF";
const BIGWIG_MAGIC: u32 = 0x888F_FC26;
const BIGBED_MAGIC: u32 = 0x8789_F2EB;

/// Bytes needed to recognize a BGZF block header.
const HEADER_LEN: usize = 18;

/// Probe `path` against every detector in [`SniffedBinary::PRIORITY`] order.
pub fn sniff_binary(path: &Path) -> PipelineResult<Option<SniffedBinary>> {
    let header = read_prefix(path, HEADER_LEN)?;
    for kind in SniffedBinary::PRIORITY {
        if probe_with_header(kind, &header, path)? {
            return Ok(Some(kind));
        }
    }
    Ok(None)
}

fn probe_with_header(kind: SniffedBinary, header: &[u8], path: &Path) -> PipelineResult<bool> {
    Ok(match kind {
        SniffedBinary::Bam => is_bgzf_header(header) && bam_payload(path),
        SniffedBinary::Sff => header.starts_with(&SFF_MAGIC),
        SniffedBinary::Pdf => header.starts_with(PDF_MAGIC),
        SniffedBinary::BigWig => has_u32_magic(header, BIGWIG_MAGIC),
        SniffedBinary::BigBed => has_u32_magic(header, BIGBED_MAGIC),
    })
}

/// gzip member with the `BC` extra subfield that marks a BGZF block.
fn is_bgzf_header(h: &[u8]) -> bool {
    h.len() >= HEADER_LEN
        && h[0] == 0x1f
        && h[1] == 0x8b
        && h[2] == 8
        && h[3] & 0x04 != 0
        && h[12] == b'B'
        && h[13] == b'C'
}

fn bam_payload(path: &Path) -> bool {
    let Ok(file) = File::open(path) else {
        return false;
    };
    let mut magic = [0u8; 4];
    MultiGzDecoder::new(file).read_exact(&mut magic).is_ok() && magic == BAM_MAGIC
}

/// Track files may be written in either byte order.
fn has_u32_magic(header: &[u8], magic: u32) -> bool {
    let Some(first) = header.get(..4) else {
        return false;
    };
    let bytes = [first[0], first[1], first[2], first[3]];
    u32::from_le_bytes(bytes) == magic || u32::from_be_bytes(bytes) == magic
}

/// Read up to `len` bytes from the start of `path`.
pub(crate) fn read_prefix(path: &Path, len: usize) -> PipelineResult<Vec<u8>> {
    let file = File::open(path)?;
    let mut buf = Vec::with_capacity(len);
    file.take(len as u64).read_to_end(&mut buf)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use flate2::write::GzEncoder;
    use flate2::{Compression, GzBuilder};
    use tempfile::NamedTempFile;

    use super::*;

    fn file_with(bytes: &[u8]) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(bytes).unwrap();
        f.flush().unwrap();
        f
    }

    fn bgzf(payload: &[u8]) -> Vec<u8> {
        let mut enc = GzBuilder::new()
            .extra(vec![b'B', b'C', 2, 0, 0, 0])
            .write(Vec::new(), Compression::default());
        enc.write_all(payload).unwrap();
        enc.finish().unwrap()
    }

    #[test]
    fn recognizes_bam_only_with_bgzf_header_and_payload() {
        let bam = file_with(&bgzf(b"BAM\x01rest-of-header"));
        assert_eq!(sniff_binary(bam.path()).unwrap(), Some(SniffedBinary::Bam));

        let bgzf_text = file_with(&bgzf(b"just text"));
        assert_eq!(sniff_binary(bgzf_text.path()).unwrap(), None);

        let mut plain = GzEncoder::new(Vec::new(), Compression::default());
        plain.write_all(b"BAM\x01").unwrap();
        let plain_gz = file_with(&plain.finish().unwrap());
        assert_eq!(sniff_binary(plain_gz.path()).unwrap(), None);
    }

    #[test]
    fn recognizes_fixed_magics() {
        let sff = file_with(b".sff\x00\x00\x00\x01");
        assert_eq!(sniff_binary(sff.path()).unwrap(), Some(SniffedBinary::Sff));

        let pdf = file_with(b"%PDF-1.4\n%\xe2\xe3\xcf\xd3\n");
        assert_eq!(sniff_binary(pdf.path()).unwrap(), Some(SniffedBinary::Pdf));

        let bigwig = file_with(&BIGWIG_MAGIC.to_le_bytes());
        assert_eq!(sniff_binary(bigwig.path()).unwrap(), Some(SniffedBinary::BigWig));

        let bigbed = file_with(&BIGBED_MAGIC.to_be_bytes());
        assert_eq!(sniff_binary(bigbed.path()).unwrap(), Some(SniffedBinary::BigBed));
    }

    #[test]
    fn short_and_text_files_match_nothing() {
        let tiny = file_with(b"ab");
        assert_eq!(sniff_binary(tiny.path()).unwrap(), None);

        let text = file_with(b"chr1\t10\t20\n");
        assert_eq!(sniff_binary(text.path()).unwrap(), None);
    }
}
