//! Text-format sniffers used to guess an extension for `auto` uploads.
//!
//! Each sniffer looks at the first [`HEAD_LINES`] lines only.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::PipelineResult;
use crate::ingestion::lines::Lines;

/// Lines read from the top of a file for sniffing.
pub const HEAD_LINES: usize = 50;

/// Extension used when no sniffer matches.
pub const FALLBACK_TEXT_EXTENSION: &str = "txt";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextSniffer {
    Xml,
    Vcf,
    Sam,
    Gff3,
    Fastq,
    Fasta,
    Wig,
    Bed,
    /// Simple interaction format: `node<TAB>relation<TAB>node...`.
    Sif,
    Tabular,
}

/// Most specific formats first; `tabular` is the catch-all for column data.
pub const DEFAULT_SNIFF_ORDER: [TextSniffer; 10] = [
    TextSniffer::Xml,
    TextSniffer::Vcf,
    TextSniffer::Sam,
    TextSniffer::Gff3,
    TextSniffer::Fastq,
    TextSniffer::Fasta,
    TextSniffer::Wig,
    TextSniffer::Bed,
    TextSniffer::Sif,
    TextSniffer::Tabular,
];

impl TextSniffer {
    pub fn extension(self) -> &'static str {
        match self {
            TextSniffer::Xml => "xml",
            TextSniffer::Vcf => "vcf",
            TextSniffer::Sam => "sam",
            TextSniffer::Gff3 => "gff3",
            TextSniffer::Fastq => "fastq",
            TextSniffer::Fasta => "fasta",
            TextSniffer::Wig => "wig",
            TextSniffer::Bed => "bed",
            TextSniffer::Sif => "sif",
            TextSniffer::Tabular => "tabular",
        }
    }

    /// Only layout-based sniffers make sense for multi-byte text.
    pub fn supports_multi_byte(self) -> bool {
        matches!(self, TextSniffer::Tabular)
    }

    pub fn matches(self, head: &[String]) -> bool {
        match self {
            TextSniffer::Xml => first_non_empty(head).is_some_and(|l| l.trim_start().starts_with("<?xml")),
            TextSniffer::Vcf => head.first().is_some_and(|l| l.starts_with("##fileformat=VCF")),
            TextSniffer::Sam => sniff_sam(head),
            TextSniffer::Gff3 => head.first().is_some_and(|l| l.starts_with("##gff-version 3")),
            TextSniffer::Fastq => sniff_fastq(head),
            TextSniffer::Fasta => sniff_fasta(head),
            TextSniffer::Wig => head.iter().any(|l| {
                l.starts_with("track type=wiggle_0")
                    || l.starts_with("variableStep")
                    || l.starts_with("fixedStep")
            }),
            TextSniffer::Bed => sniff_bed(head),
            TextSniffer::Sif => sniff_sif(head),
            TextSniffer::Tabular => sniff_tabular(head),
        }
    }
}

/// Read the first [`HEAD_LINES`] lines of `path`, lossily decoded.
pub fn read_head(path: &Path) -> PipelineResult<Vec<String>> {
    let reader = BufReader::new(File::open(path)?);
    Lines::new(reader)
        .take(HEAD_LINES)
        .map(|line| Ok(String::from_utf8_lossy(&line?).into_owned()))
        .collect()
}

fn first_non_empty(head: &[String]) -> Option<&str> {
    head.iter().map(String::as_str).find(|l| !l.trim().is_empty())
}

/// Non-empty lines that are not `#` comments.
fn data_lines(head: &[String]) -> impl Iterator<Item = &str> {
    head.iter()
        .map(String::as_str)
        .filter(|l| !l.trim().is_empty() && !l.starts_with('#'))
}

fn sniff_sam(head: &[String]) -> bool {
    const HEADER_TAGS: [&str; 4] = ["@HD\t", "@SQ\t", "@RG\t", "@PG\t"];
    if first_non_empty(head).is_some_and(|l| HEADER_TAGS.iter().any(|t| l.starts_with(t))) {
        return true;
    }
    let mut seen = 0;
    for line in data_lines(head) {
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 11
            || fields[1].parse::<u32>().is_err()
            || fields[3].parse::<u64>().is_err()
        {
            return false;
        }
        seen += 1;
    }
    seen > 0
}

fn sniff_fastq(head: &[String]) -> bool {
    let lines: Vec<&str> = head
        .iter()
        .map(String::as_str)
        .filter(|l| !l.is_empty())
        .take(4)
        .collect();
    matches!(lines.as_slice(), [title, seq, plus, qual]
        if title.starts_with('@') && plus.starts_with('+') && !seq.is_empty() && seq.len() == qual.len())
}

fn sniff_fasta(head: &[String]) -> bool {
    let mut lines = head.iter().map(String::as_str).filter(|l| !l.trim().is_empty());
    match (lines.next(), lines.next()) {
        (Some(title), Some(seq)) => title.starts_with('>') && !seq.starts_with('>'),
        _ => false,
    }
}

fn sniff_bed(head: &[String]) -> bool {
    let mut seen = 0;
    for line in data_lines(head) {
        if line.starts_with("track") || line.starts_with("browser") {
            continue;
        }
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 3 {
            return false;
        }
        match (fields[1].parse::<u64>(), fields[2].parse::<u64>()) {
            (Ok(start), Ok(end)) if start <= end => seen += 1,
            _ => return false,
        }
    }
    seen > 0
}

fn sniff_sif(head: &[String]) -> bool {
    let is_relation = |f: &str| {
        !f.is_empty()
            && f.chars().any(|c| c.is_ascii_alphabetic())
            && f.chars().all(|c| c.is_ascii_alphanumeric() || "-_:.".contains(c))
    };
    let mut seen = 0;
    for line in data_lines(head) {
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 3
            || !is_relation(fields[1])
            || fields.iter().any(|f| f.trim().is_empty())
            || fields[0].parse::<f64>().is_ok()
            || fields[2].parse::<f64>().is_ok()
        {
            return false;
        }
        seen += 1;
    }
    seen > 0
}

fn sniff_tabular(head: &[String]) -> bool {
    let mut columns = None;
    for line in data_lines(head) {
        let n = line.split('\t').count();
        if n < 2 || columns.is_some_and(|c| c != n) {
            return false;
        }
        columns = Some(n);
    }
    columns.is_some()
}
