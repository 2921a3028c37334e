//! Destinations for result records.

use std::io::Write;

use crate::error::PipelineResult;
use crate::types::IngestionResult;

/// Receives one record per processed request.
pub trait ResultSink {
    fn write_record(&mut self, record: &IngestionResult) -> PipelineResult<()>;
}

/// Writes each record as one JSON line and flushes it immediately.
#[derive(Debug)]
pub struct JsonLinesSink<W: Write> {
    writer: W,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> ResultSink for JsonLinesSink<W> {
    fn write_record(&mut self, record: &IngestionResult) -> PipelineResult<()> {
        serde_json::to_writer(&mut self.writer, record)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }
}

/// Collects records in memory.
impl ResultSink for Vec<IngestionResult> {
    fn write_record(&mut self, record: &IngestionResult) -> PipelineResult<()> {
        self.push(record.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_one_line_per_record() {
        let mut sink = JsonLinesSink::new(Vec::new());
        sink.write_record(&IngestionResult::success(1, "bed", "uploaded bed file"))
            .unwrap();
        sink.write_record(&IngestionResult::success(2, "txt", "uploaded txt file"))
            .unwrap();

        let text = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let second: IngestionResult = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second.dataset_id, 2);
        assert_eq!(second.message(), "uploaded txt file");
    }
}
