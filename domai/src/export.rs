//! JSON-lines export of outbound records
//!
//! One [`OutboundRecord`] per line, in the order the envelopes are written.
//! Each stream a caller exports contributes its own records, so a file fed
//! from both streams holds two records per event (one per `stream`).

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use domai_common::OutboundRecord;

use crate::dispatch::Envelope;
use crate::domain::ExportError;

pub struct EventExporter<W: Write> {
    writer: W,
    written: u64,
}

impl EventExporter<BufWriter<File>> {
    /// Create (or truncate) `path` for export
    ///
    /// # Errors
    /// Returns `WriteFailed` if the file cannot be created.
    pub fn create(path: &Path) -> Result<Self, ExportError> {
        Ok(Self::new(BufWriter::new(File::create(path)?)))
    }
}

impl<W: Write> EventExporter<W> {
    #[must_use]
    pub fn new(writer: W) -> Self {
        Self { writer, written: 0 }
    }

    /// # Errors
    /// Returns an error if serialization or the underlying write fails.
    pub fn write(&mut self, envelope: &Envelope) -> Result<(), ExportError> {
        self.write_record(&envelope.to_record())
    }

    /// # Errors
    /// Returns an error if serialization or the underlying write fails.
    pub fn write_record(&mut self, record: &OutboundRecord) -> Result<(), ExportError> {
        serde_json::to_writer(&mut self.writer, record)?;
        self.writer.write_all(b"\n")?;
        self.written += 1;
        Ok(())
    }

    /// Records written so far
    #[must_use]
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Flush and hand back the writer
    ///
    /// # Errors
    /// Returns `WriteFailed` if the flush fails.
    pub fn finish(mut self) -> Result<W, ExportError> {
        self.writer.flush()?;
        Ok(self.writer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DispatchConfig, ParserConfig};
    use crate::dispatch::{Dispatcher, SubscribeOptions};
    use crate::parser::LineParser;
    use domai_common::{EventSource, Severity, StreamKind, Tier};
    use std::io::{BufRead, BufReader};
    use std::sync::Arc;

    #[test]
    fn test_one_record_per_line() {
        let dispatcher = Dispatcher::new(DispatchConfig::default());
        let crisis = dispatcher.subscribe(StreamKind::Crisis, SubscribeOptions::default());
        let mut parser = LineParser::new(EventSource::Tcpdump, ParserConfig::default());
        for line in [
            "2024-01-01 10:00:00.000000 IP 10.0.0.66.40000 > 10.0.0.9.23: Flags [S], length 0",
            "2024-01-01 10:00:01.000000 IP 10.0.0.66.40001 > 10.0.0.9.31337: Flags [S], length 0",
        ] {
            dispatcher.publish(Arc::new(parser.parse(line).unwrap()));
        }

        let mut exporter = EventExporter::new(Vec::new());
        for envelope in crisis.try_next_batch(10) {
            exporter.write(&envelope).unwrap();
        }
        assert_eq!(exporter.written(), 2);
        let bytes = exporter.finish().unwrap();

        let records: Vec<OutboundRecord> = BufReader::new(bytes.as_slice())
            .lines()
            .map(|line| serde_json::from_str(&line.unwrap()).unwrap())
            .collect();
        assert_eq!(records.len(), 2);
        assert!(records[0].seq < records[1].seq);
        assert_eq!(records[1].severity, Severity::Critical);
        assert_eq!(records[1].stream, StreamKind::Crisis);
        assert_eq!(records[1].tier, Tier::Novice);
        assert!(records[1].explanation.starts_with("ALERT [CRITICAL]"));
    }

    #[test]
    fn test_create_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        let mut parser = LineParser::new(EventSource::Lsof, ParserConfig::default());
        let dispatcher = Dispatcher::new(DispatchConfig::default());
        let knowledge = dispatcher.subscribe(StreamKind::Knowledge, SubscribeOptions::default());
        dispatcher.publish(Arc::new(parser.parse("sshd 1234 root 3u IPv4 12345 0t0 TCP *:22 (LISTEN)").unwrap()));

        let mut exporter = EventExporter::create(&path).unwrap();
        for envelope in knowledge.try_next_batch(10) {
            exporter.write(&envelope).unwrap();
        }
        exporter.finish().unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 1);
        assert!(text.contains("\"stream\":\"knowledge\""));
    }
}
