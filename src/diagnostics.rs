use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Append-only JSONL diagnostics sink. Degraded-output events (default
/// template used, sizing floor hit, pages skipped in a batch) are recorded
/// here so operators can audit what actually went to the printer.
#[derive(Clone)]
pub struct DiagnosticsLogger {
    inner: Arc<Mutex<DiagnosticsState>>,
}

struct DiagnosticsState {
    writer: BufWriter<File>,
    counters: HashMap<String, u64>,
}

impl DiagnosticsLogger {
    pub fn new(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = File::create(path)?;
        Ok(Self {
            inner: Arc::new(Mutex::new(DiagnosticsState {
                writer: BufWriter::new(file),
                counters: HashMap::new(),
            })),
        })
    }

    /// Writes one event line: `{"type":<kind>, <field>:<value>, ...}`.
    pub fn event(&self, kind: &str, fields: &[(&str, String)]) {
        let mut line = String::with_capacity(48);
        line.push_str("{\"type\":\"");
        line.push_str(&json_escape(kind));
        line.push('"');
        for (key, value) in fields {
            line.push_str(",\"");
            line.push_str(&json_escape(key));
            line.push_str("\":\"");
            line.push_str(&json_escape(value));
            line.push('"');
        }
        line.push('}');
        if let Ok(mut state) = self.inner.lock() {
            let _ = writeln!(state.writer, "{line}");
        }
    }

    pub fn increment(&self, key: &str, amount: u64) {
        if let Ok(mut state) = self.inner.lock() {
            let entry = state.counters.entry(key.to_string()).or_insert(0);
            *entry = entry.saturating_add(amount);
        }
    }

    /// Drains counters into a single summary line, keyed for stable ordering.
    pub fn emit_summary(&self, context: &str) {
        if let Ok(mut state) = self.inner.lock() {
            let mut counters: Vec<(String, u64)> = state.counters.drain().collect();
            counters.sort_by(|a, b| a.0.cmp(&b.0));
            let mut counts = String::from("{");
            for (idx, (key, value)) in counters.iter().enumerate() {
                if idx > 0 {
                    counts.push(',');
                }
                counts.push_str(&format!("\"{}\":{}", json_escape(key), value));
            }
            counts.push('}');
            let line = format!(
                "{{\"type\":\"summary\",\"context\":\"{}\",\"counts\":{}}}",
                json_escape(context),
                counts
            );
            let _ = writeln!(state.writer, "{line}");
        }
    }

    pub fn flush(&self) {
        if let Ok(mut state) = self.inner.lock() {
            let _ = state.writer.flush();
        }
    }
}

pub(crate) fn json_escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len() + 8);
    for ch in raw.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            _ => out.push(ch),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_and_summary_are_written_as_jsonl() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("diag.jsonl");
        let logger = DiagnosticsLogger::new(&path).expect("create logger");
        logger.event("template.fallback", &[("event_id", "ev-1".to_string())]);
        logger.increment("sizing.floor_reached", 2);
        logger.emit_summary("export");
        logger.flush();

        let text = std::fs::read_to_string(&path).expect("read log");
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("\"type\":\"template.fallback\""));
        assert!(lines[0].contains("\"event_id\":\"ev-1\""));
        assert!(lines[1].contains("\"sizing.floor_reached\":2"));
    }

    #[test]
    fn escape_handles_quotes_and_newlines() {
        assert_eq!(json_escape("a\"b\nc"), "a\\\"b\\nc");
    }
}
