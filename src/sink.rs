//! Output sinks for inventory results
//!
//! Results render either as `fact: value` lines or as JSON. A sink writes
//! one rendered result per call.

use std::path::PathBuf;
use std::str::FromStr;

use async_trait::async_trait;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{info, warn};

use crate::inventory::{FactOutcome, InventoryError, InventoryResult};

/// Rendering of an inventory result
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl OutputFormat {
    pub fn render(self, result: &InventoryResult) -> Result<String, serde_json::Error> {
        match self {
            Self::Text => Ok(result.to_string()),
            Self::Json => serde_json::to_string_pretty(result).map(|mut json| {
                json.push('\n');
                json
            }),
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown output format '{other}' (expected text or json)")),
        }
    }
}

/// Destination for inventory results
#[async_trait]
pub trait InventorySink: Send {
    async fn write(&mut self, result: &InventoryResult) -> Result<(), InventoryError>;
}

/// Writes rendered results to an async writer (stdout by default)
pub struct WriterSink<W> {
    writer: W,
    format: OutputFormat,
    target: String,
}

impl WriterSink<tokio::io::Stdout> {
    pub fn stdout(format: OutputFormat) -> Self {
        Self {
            writer: tokio::io::stdout(),
            format,
            target: "stdout".to_string(),
        }
    }
}

impl<W> WriterSink<W> {
    pub fn new(writer: W, format: OutputFormat, target: impl Into<String>) -> Self {
        Self {
            writer,
            format,
            target: target.into(),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> InventorySink for WriterSink<W> {
    async fn write(&mut self, result: &InventoryResult) -> Result<(), InventoryError> {
        let rendered = self
            .format
            .render(result)
            .map_err(|e| InventoryError::sink(&self.target, std::io::Error::other(e)))?;
        self.writer
            .write_all(rendered.as_bytes())
            .await
            .map_err(|e| InventoryError::sink(&self.target, e))?;
        self.writer
            .flush()
            .await
            .map_err(|e| InventoryError::sink(&self.target, e))
    }
}

/// Replaces a file with the rendered result
#[derive(Debug, Clone)]
pub struct FileSink {
    path: PathBuf,
    format: OutputFormat,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>, format: OutputFormat) -> Self {
        Self {
            path: path.into(),
            format,
        }
    }
}

#[async_trait]
impl InventorySink for FileSink {
    async fn write(&mut self, result: &InventoryResult) -> Result<(), InventoryError> {
        let target = self.path.display().to_string();
        let rendered = self
            .format
            .render(result)
            .map_err(|e| InventoryError::sink(&target, std::io::Error::other(e)))?;
        tokio::fs::write(&self.path, rendered)
            .await
            .map_err(|e| InventoryError::sink(&target, e))?;
        info!("Inventory written to {}", target);
        Ok(())
    }
}

/// Emits each fact as a structured log event
#[derive(Debug, Default)]
pub struct LogSink;

#[async_trait]
impl InventorySink for LogSink {
    async fn write(&mut self, result: &InventoryResult) -> Result<(), InventoryError> {
        for entry in &result.facts {
            match &entry.outcome {
                FactOutcome::Available(value) => info!(
                    pass_id = %result.pass_id,
                    fact = %entry.name,
                    value = %value,
                    "Inventory fact"
                ),
                FactOutcome::Unavailable(reason) => warn!(
                    pass_id = %result.pass_id,
                    fact = %entry.name,
                    reason = %reason,
                    "Inventory fact unavailable"
                ),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::FactEntry;
    use crate::query::PropertyValue;
    use std::sync::{Arc, Mutex};
    use tempfile::tempdir;

    fn sample() -> InventoryResult {
        InventoryResult {
            pass_id: uuid::Uuid::new_v4(),
            collected_at: chrono::Utc::now(),
            namespace: "root\\cimv2".to_string(),
            facts: vec![
                FactEntry {
                    name: "serial_number".to_string(),
                    outcome: FactOutcome::Available(PropertyValue::from("ABC123")),
                },
                FactEntry {
                    name: "vendor".to_string(),
                    outcome: FactOutcome::unavailable("no matching record"),
                },
            ],
        }
    }

    #[tokio::test]
    async fn test_writer_sink_text() {
        let mut sink = WriterSink::new(Vec::new(), OutputFormat::Text, "buffer");
        sink.write(&sample()).await.unwrap();
        let written = String::from_utf8(sink.into_inner()).unwrap();
        assert_eq!(
            written,
            "serial_number: ABC123\nvendor: unavailable: no matching record\n"
        );
    }

    #[tokio::test]
    async fn test_file_sink_json() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("inventory.json");
        let result = sample();

        FileSink::new(&path, OutputFormat::Json)
            .write(&result)
            .await
            .unwrap();

        let parsed: InventoryResult =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(parsed, result);
    }

    #[tokio::test]
    async fn test_file_sink_reports_target() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing").join("inventory.txt");
        let err = FileSink::new(&path, OutputFormat::Text)
            .write(&sample())
            .await
            .unwrap_err();
        assert!(matches!(err, InventoryError::Sink { .. }));
        assert!(err.to_string().contains("inventory.txt"));
    }

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_log_sink_emits_event_per_fact() {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::INFO)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        LogSink.write(&sample()).await.unwrap();

        let logged = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        let lines: Vec<&str> = logged.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("INFO"));
        assert!(lines[0].contains("fact=serial_number"));
        assert!(lines[0].contains("value=ABC123"));
        assert!(lines[1].contains("WARN"));
        assert!(lines[1].contains("fact=vendor"));
        assert!(lines[1].contains("reason=no matching record"));
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!("JSON".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert!("yaml".parse::<OutputFormat>().is_err());
    }
}
