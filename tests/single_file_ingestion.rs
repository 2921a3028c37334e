use std::fs;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};

use flate2::Compression;
use flate2::write::GzEncoder;
use serde_json::json;
use tempfile::TempDir;
use walkdir::WalkDir;

use upload_ingest::ingestion::{Ingestor, PipelineOptions};
use upload_ingest::types::{IngestionResult, OutputTarget, UploadRequest};

const TEMP_PREFIXES: [&str; 4] = ["data_id_", "upload_convert_", "upload_groom_", "url_paste"];

struct Fixture {
    dir: TempDir,
}

impl Fixture {
    fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
        }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn write(&self, name: &str, bytes: &[u8]) -> PathBuf {
        let path = self.path(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, bytes).unwrap();
        path
    }

    fn ingestor(&self) -> Ingestor {
        let work = self.path("work");
        fs::create_dir_all(&work).unwrap();
        Ingestor::new(PipelineOptions {
            work_dir: work,
            ..Default::default()
        })
    }

    fn ingest(&self, request: serde_json::Value) -> (IngestionResult, PathBuf) {
        let request = UploadRequest::from_json(&request.to_string()).unwrap();
        let out = self.path(&format!("dataset_{}.dat", request.dataset_id));
        let mut records: Vec<IngestionResult> = Vec::new();
        let record = self
            .ingestor()
            .ingest(&request, &OutputTarget::new(&out), &mut records)
            .unwrap();
        assert_eq!(records, vec![record.clone()]);
        (record, out)
    }

    /// Temporaries created by the pipeline that are still on disk.
    fn leftovers(&self) -> Vec<PathBuf> {
        WalkDir::new(self.dir.path())
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
            .filter(|e| {
                let name = e.file_name().to_string_lossy();
                TEMP_PREFIXES.iter().any(|p| name.starts_with(p))
            })
            .map(|e| e.path().to_path_buf())
            .collect()
    }
}

fn gzip(bytes: &[u8]) -> Vec<u8> {
    let mut enc = GzEncoder::new(Vec::new(), Compression::default());
    enc.write_all(bytes).unwrap();
    enc.finish().unwrap()
}

fn zip_of(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, body) in entries {
        writer
            .start_file(*name, zip::write::SimpleFileOptions::default())
            .unwrap();
        writer.write_all(body).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

fn file_request(id: u64, path: &Path, file_type: &str, name: &str) -> serde_json::Value {
    json!({"type": "file", "dataset_id": id, "path": path, "file_type": file_type, "name": name})
}

#[test]
fn gzip_round_trip_restores_text_and_counts_lines() {
    let fx = Fixture::new();
    let text = b"x\ty\n".repeat(100);
    let upload = fx.write("upload_1", &gzip(&text));

    let (record, out) = fx.ingest(file_request(1, &upload, "auto", "table.tsv.gz"));

    assert!(record.is_success(), "{}", record.message());
    assert_eq!(record.ext, "tabular");
    assert_eq!(record.name.as_deref(), Some("table.tsv"));
    assert_eq!(record.message(), "uploaded tabular file");
    assert_eq!(record.line_count, Some(100));
    assert_eq!(fs::read(&out).unwrap(), text);
    assert!(!upload.exists());
    assert!(fx.leftovers().is_empty());
}

#[test]
fn gzip_with_script_markup_is_rejected_and_nothing_is_placed() {
    let fx = Fixture::new();
    let upload = fx.write(
        "upload_2",
        &gzip(b"header\nrow\n<script src=\"x.js\"></script>\nrow\n"),
    );

    let (record, out) = fx.ingest(file_request(2, &upload, "auto", "page.txt.gz"));

    assert!(!record.is_success());
    assert_eq!(record.ext, "data");
    assert_eq!(record.message(), "The gzipped uploaded file contains inappropriate content");
    assert!(!out.exists());
    assert!(!upload.exists());
    let pattern = format!("{}/**/data_id_*", fx.dir.path().display());
    assert_eq!(glob::glob(&pattern).unwrap().count(), 0);
}

#[test]
fn zip_with_three_members_places_only_the_first() {
    let fx = Fixture::new();
    let upload = fx.write(
        "upload_3",
        &zip_of(&[
            ("first.txt", b"one\n"),
            ("second.txt", b"two\n"),
            ("third.txt", b"three\n"),
        ]),
    );

    let (record, out) = fx.ingest(file_request(3, &upload, "txt", "bundle.zip"));

    assert!(record.is_success());
    assert_eq!(
        record.message(),
        "ZIP file contained more than one file, only the first file was added."
    );
    assert_eq!(record.name.as_deref(), Some("first.txt"));
    assert_eq!(record.ext, "txt");
    assert_eq!(fs::read_to_string(&out).unwrap(), "one\n");
    assert!(fx.leftovers().is_empty());
}

#[cfg(feature = "bzip2")]
#[test]
fn bzip2_round_trip_restores_text() {
    let fx = Fixture::new();
    let text = b">seq1\nACGTACGT\n>seq2\nTTGA\n".to_vec();
    let mut enc = bzip2::write::BzEncoder::new(Vec::new(), bzip2::Compression::default());
    enc.write_all(&text).unwrap();
    let upload = fx.write("upload_4", &enc.finish().unwrap());

    let (record, out) = fx.ingest(file_request(4, &upload, "auto", "reads.fa.bz2"));

    assert!(record.is_success(), "{}", record.message());
    assert_eq!(record.ext, "fasta");
    assert_eq!(record.name.as_deref(), Some("reads.fa"));
    assert_eq!(record.line_count, Some(4));
    assert_eq!(fs::read(&out).unwrap(), text);
}

#[test]
fn gzipped_sff_is_unpacked_but_not_normalized() {
    let fx = Fixture::new();
    let mut sff = b".sff\x00\x00\x00\x01".to_vec();
    sff.extend_from_slice(b"\r\n\x00\x10flows\r");
    let upload = fx.write("upload_5", &gzip(&sff));

    let (record, out) = fx.ingest(file_request(5, &upload, "auto", "run.sff.gz"));

    assert_eq!(record.ext, "sff");
    assert_eq!(record.message(), "uploaded sff file");
    assert_eq!(record.name.as_deref(), Some("run.sff"));
    assert_eq!(record.line_count, None);
    assert_eq!(fs::read(&out).unwrap(), sff);
}

#[test]
fn server_dir_source_is_copied_and_never_modified() {
    let fx = Fixture::new();
    let original = b"a b\r\nc d\r\n".to_vec();
    let source = fx.write("library/notes.txt", &original);

    let (record, out) = fx.ingest(json!({
        "type": "server_dir", "dataset_id": 6, "path": source,
        "file_type": "txt", "name": "notes.txt", "space_to_tab": true
    }));

    assert!(record.is_success());
    assert_eq!(record.line_count, Some(2));
    assert_eq!(fs::read(&out).unwrap(), b"a\tb\nc\td\n");
    assert_eq!(fs::read(&source).unwrap(), original);
    assert!(fx.leftovers().is_empty());
}

#[test]
fn link_only_source_is_referenced_in_place() {
    let fx = Fixture::new();
    let original = b"plain words\r\n".to_vec();
    let source = fx.write("library/words.txt", &original);

    let (record, out) = fx.ingest(json!({
        "type": "path_paste", "dataset_id": 7, "path": source,
        "file_type": "txt", "link_data_only": "link_to_files"
    }));

    assert!(record.is_success());
    assert_eq!(record.name.as_deref(), Some("words.txt"));
    assert_eq!(record.line_count, None);
    assert!(!out.exists());
    assert_eq!(fs::read(&source).unwrap(), original);
}

#[test]
fn link_only_content_that_must_change_is_rejected() {
    let fx = Fixture::new();
    let unsorted = fx.write("library/peaks.bed", b"chr2\t1\t5\nchr1\t1\t5\n");
    let (record, _) = fx.ingest(json!({
        "type": "server_dir", "dataset_id": 8, "path": unsorted,
        "file_type": "bed", "link_data_only": "link_to_files"
    }));
    assert!(record.message().starts_with("The uploaded files need grooming"));
    assert!(unsorted.exists());

    let compressed = fx.write("library/peaks.bed.gz", &gzip(b"chr1\t1\t5\n"));
    let (record, _) = fx.ingest(json!({
        "type": "server_dir", "dataset_id": 9, "path": compressed,
        "file_type": "bed", "link_data_only": "link_to_files"
    }));
    assert!(record.message().starts_with("The uploaded files need decompression"));
    assert!(compressed.exists());
}

#[test]
fn copied_interval_file_is_groomed_after_placement() {
    let fx = Fixture::new();
    let upload = fx.write("upload_10", b"track name=p\nchr2\t1\t5\nchr1\t9\t12\nchr1\t2\t3\n");

    let (record, out) = fx.ingest(file_request(10, &upload, "bed", "p.bed"));

    assert!(record.is_success());
    assert_eq!(
        fs::read_to_string(&out).unwrap(),
        "track name=p\nchr1\t2\t3\nchr1\t9\t12\nchr2\t1\t5\n"
    );
    assert!(fx.leftovers().is_empty());
}

#[test]
fn unrecognized_binary_needs_an_allow_listed_declared_extension() {
    let fx = Fixture::new();
    let bytes = b"\x00\x01\x02\xff\xfe\xfd trace data".to_vec();

    let upload = fx.write("upload_11", &bytes);
    let (record, out) = fx.ingest(file_request(11, &upload, "ab1", "sample.AB1"));
    assert!(record.is_success(), "{}", record.message());
    assert_eq!(record.ext, "ab1");
    assert_eq!(record.message(), "uploaded binary file");
    assert_eq!(fs::read(&out).unwrap(), bytes);

    let upload = fx.write("upload_12", &bytes);
    let (record, _) = fx.ingest(file_request(12, &upload, "auto", "sample.ab1"));
    assert_eq!(
        record.message(),
        "You must manually set the 'File Format' to 'Ab1' when uploading ab1 files."
    );

    let upload = fx.write("upload_13", &bytes);
    let (record, out) = fx.ingest(file_request(13, &upload, "auto", "picture.png"));
    assert_eq!(record.message(), "The uploaded binary file contains inappropriate content");
    assert!(!out.exists());
    assert!(!upload.exists());
}

#[test]
fn multi_byte_text_is_tagged_and_sniffed_by_layout() {
    let fx = Fixture::new();
    let upload = fx.write("upload_14", "名前\t値\r\n遺伝子\t3\r\n".as_bytes());

    let (record, out) = fx.ingest(file_request(14, &upload, "auto", "genes.tsv"));

    assert_eq!(record.ext, "tabular");
    assert_eq!(record.message(), "uploaded multi-byte char file");
    assert_eq!(fs::read_to_string(&out).unwrap(), "名前\t値\n遺伝子\t3\n");
}

#[test]
fn url_sources_are_fetched_into_the_work_dir() {
    let fx = Fixture::new();
    let remote = fx.write("remote/reads.fq", b"@r1\nACGT\n+\nIIII\n");

    let (record, out) = fx.ingest(json!({
        "type": "url", "dataset_id": 15,
        "path": format!("file://{}", remote.display()),
        "file_type": "auto", "name": "reads.fq"
    }));

    assert!(record.is_success(), "{}", record.message());
    assert_eq!(record.ext, "fastq");
    assert_eq!(fs::read(&out).unwrap(), fs::read(&remote).unwrap());
    assert!(fx.leftovers().is_empty());
}

#[test]
fn missing_url_reports_the_location() {
    let fx = Fixture::new();
    let (record, _) = fx.ingest(json!({
        "type": "url", "dataset_id": 16, "path": "file:///no/such/file.txt", "file_type": "auto"
    }));
    assert!(record
        .message()
        .starts_with("Unable to fetch file:///no/such/file.txt\n"));
    assert!(fx.leftovers().is_empty());
}

#[test]
fn invalid_utf8_inside_a_script_tag_does_not_hide_it() {
    let fx = Fixture::new();
    let mut text = b"col\tval\n".repeat(12);
    text.extend_from_slice(b"<script \xff src=\"http://evil/x.js\"></script>\n");
    let upload = fx.write("upload_21", &gzip(&text));

    let (record, out) = fx.ingest(file_request(21, &upload, "auto", "notes.txt.gz"));

    assert!(!record.is_success());
    assert_eq!(record.message(), "The gzipped uploaded file contains inappropriate content");
    assert!(!out.exists());
    assert!(!upload.exists());
}

#[cfg(feature = "bzip2")]
#[test]
fn bzip2_with_markup_is_rejected() {
    let fx = Fixture::new();
    let mut enc = bzip2::write::BzEncoder::new(Vec::new(), bzip2::Compression::default());
    enc.write_all(b"title\n<meta http-equiv=\"refresh\" content=\"0\">\n").unwrap();
    let upload = fx.write("upload_22", &enc.finish().unwrap());

    let (record, out) = fx.ingest(file_request(22, &upload, "auto", "page.txt.bz2"));

    assert_eq!(record.message(), "The bz2 compressed uploaded file contains inappropriate content");
    assert_eq!(record.ext, "data");
    assert!(!out.exists());
    assert!(!upload.exists());
    assert!(fx.leftovers().is_empty());
}

#[test]
fn gzip_failing_mid_stream_leaves_nothing_behind() {
    let fx = Fixture::new();
    let mut bytes = gzip(&b"payload line\n".repeat(500));
    // The trailer CRC no longer matches, so decoding fails after the lookahead passed.
    let crc_at = bytes.len() - 8;
    bytes[crc_at] ^= 0xff;
    let upload = fx.write("upload_23", &bytes);

    let (record, out) = fx.ingest(file_request(23, &upload, "auto", "lines.txt.gz"));

    assert!(!record.is_success());
    assert_eq!(record.message(), "Problem decompressing gzipped data");
    assert_eq!(record.ext, "data");
    assert!(!out.exists());
    assert!(!upload.exists());
    let pattern = format!("{}/**/data_id_*", fx.dir.path().display());
    assert_eq!(glob::glob(&pattern).unwrap().count(), 0);
}

#[test]
fn zip_failing_mid_stream_leaves_nothing_behind() {
    let fx = Fixture::new();
    let mut bytes = zip_of(&[("rows.txt", &b"row\tvalue\n".repeat(200))]);
    // Break the CRC recorded in the central directory; the entry fails its checksum on read.
    let central = bytes
        .windows(4)
        .position(|w| w == b"PK\x01\x02")
        .unwrap();
    bytes[central + 16] ^= 0xff;
    let upload = fx.write("upload_24", &bytes);

    let (record, out) = fx.ingest(file_request(24, &upload, "auto", "rows.zip"));

    assert_eq!(record.message(), "Problem decompressing zipped data");
    assert!(!out.exists());
    assert!(!upload.exists());
    assert!(fx.leftovers().is_empty());
}
