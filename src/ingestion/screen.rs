//! Active-markup screening.
//!
//! Uploaded text is later served back to browsers, so content carrying hyperlinks, frames,
//! meta refreshes or scripts in its leading lines is refused.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::LazyLock;

use regex::bytes::RegexSet;

use crate::error::PipelineResult;

use super::lines::Lines;

/// Number of leading lines inspected. A match on line 101 or later is not seen.
pub const SCREEN_LINE_LIMIT: usize = 100;

// Unicode mode is off so `[^>]` also matches bytes that are not valid UTF-8.
static UNSAFE_MARKUP: LazyLock<RegexSet> = LazyLock::new(|| {
    RegexSet::new([
        r"(?i-u)<A\s+[^>]*HREF[^>]+>",
        r"(?i-u)<IFRAME[^>]*>",
        r"(?i-u)<FRAMESET[^>]*>",
        r"(?i-u)<META[^>]*>",
        r"(?i-u)<SCRIPT[^>]*>",
    ])
    .expect("markup patterns are valid")
});

/// What to screen: a file on disk or an already-read chunk (e.g. decompressed lookahead).
#[derive(Debug, Clone, Copy)]
pub enum TextSource<'a> {
    Path(&'a Path),
    Chunk(&'a [u8]),
}

/// True when one of the first [`SCREEN_LINE_LIMIT`] lines carries active markup.
pub fn contains_unsafe_markup(source: TextSource<'_>) -> PipelineResult<bool> {
    match source {
        TextSource::Path(path) => {
            let file = File::open(path)?;
            scan(BufReader::new(file))
        }
        TextSource::Chunk(bytes) => scan(bytes),
    }
}

fn scan<R: BufRead>(reader: R) -> PipelineResult<bool> {
    for line in Lines::new(reader).take(SCREEN_LINE_LIMIT) {
        if UNSAFE_MARKUP.is_match(&line?) {
            return Ok(true);
        }
    }
    Ok(false)
}
