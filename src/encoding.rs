//! Output encodings for file-oriented destinations.
//!
//! JSON Lines is always available. Parquet needs the `parquet` cargo feature; without it a
//! Parquet request resolves to JSON Lines when the encoder is built, with a warning.

use crate::error::SinkError;
use crate::event::Event;

/// Requested file encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// One compact JSON object per line.
    #[default]
    Jsonl,
    /// Columnar Parquet with a schema inferred from the records.
    Parquet,
}

impl OutputFormat {
    /// File extension, without the dot.
    pub const fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Jsonl => "jsonl",
            OutputFormat::Parquet => "parquet",
        }
    }

    /// Whether this build can produce the format.
    pub const fn is_supported(&self) -> bool {
        match self {
            OutputFormat::Jsonl => true,
            OutputFormat::Parquet => cfg!(feature = "parquet"),
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "jsonl" | "json" => Some(OutputFormat::Jsonl),
            "parquet" => Some(OutputFormat::Parquet),
            _ => None,
        }
    }
}

/// Encoder with the requested format resolved against what this build supports.
#[derive(Debug, Clone, Copy)]
pub struct Encoder {
    requested: OutputFormat,
    effective: OutputFormat,
}

impl Encoder {
    pub fn new(requested: OutputFormat) -> Self {
        let effective = if requested.is_supported() {
            requested
        } else {
            tracing::warn!(
                requested = requested.extension(),
                "columnar writer not compiled in (enable the `parquet` feature); writing jsonl"
            );
            OutputFormat::Jsonl
        };
        Self { requested, effective }
    }

    pub fn requested(&self) -> OutputFormat {
        self.requested
    }

    /// Format actually written, and therefore the file extension.
    pub fn format(&self) -> OutputFormat {
        self.effective
    }

    pub fn encode(&self, events: &[&Event]) -> Result<Vec<u8>, SinkError> {
        match self.effective {
            OutputFormat::Jsonl => encode_jsonl(events),
            OutputFormat::Parquet => encode_parquet(events),
        }
    }
}

/// JSON Lines: each record followed by `\n`.
pub fn encode_jsonl(events: &[&Event]) -> Result<Vec<u8>, SinkError> {
    let mut out = Vec::with_capacity(events.len() * 256);
    for event in events {
        serde_json::to_writer(&mut out, event.fields())?;
        out.push(b'\n');
    }
    Ok(out)
}

#[cfg(feature = "parquet")]
fn encode_parquet(events: &[&Event]) -> Result<Vec<u8>, SinkError> {
    use arrow::error::ArrowError;
    use arrow::json::reader::{infer_json_schema_from_iterator, ReaderBuilder};
    use parquet::arrow::ArrowWriter;
    use parquet::basic::Compression;
    use parquet::file::properties::WriterProperties;
    use std::sync::Arc;

    if events.is_empty() {
        return Ok(Vec::new());
    }
    let rows: Vec<&serde_json::Map<String, serde_json::Value>> =
        events.iter().map(|e| e.fields()).collect();
    let values: Vec<serde_json::Value> =
        rows.iter().map(|r| serde_json::Value::Object((*r).clone())).collect();

    let encode_err = |e: ArrowError| SinkError::Encode(e.to_string());
    let schema = infer_json_schema_from_iterator(values.iter().map(Ok::<_, ArrowError>))
        .map_err(encode_err)?;
    let schema = Arc::new(schema);

    let mut decoder = ReaderBuilder::new(Arc::clone(&schema))
        .with_batch_size(values.len())
        .build_decoder()
        .map_err(encode_err)?;
    decoder.serialize(&rows).map_err(encode_err)?;
    let batch = decoder
        .flush()
        .map_err(encode_err)?
        .ok_or_else(|| SinkError::Encode("no rows decoded".into()))?;

    let props = WriterProperties::builder().set_compression(Compression::SNAPPY).build();
    let mut out = Vec::new();
    let mut writer = ArrowWriter::try_new(&mut out, schema, Some(props))
        .map_err(|e| SinkError::Encode(e.to_string()))?;
    writer.write(&batch).map_err(|e| SinkError::Encode(e.to_string()))?;
    writer.close().map_err(|e| SinkError::Encode(e.to_string()))?;
    Ok(out)
}

#[cfg(not(feature = "parquet"))]
fn encode_parquet(events: &[&Event]) -> Result<Vec<u8>, SinkError> {
    encode_jsonl(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EventType;

    #[test]
    fn jsonl_one_line_per_event() {
        let a = Event::new(EventType::OrderPlaced).with("order_id", "o1");
        let b = Event::new(EventType::OrderPlaced).with("order_id", "o2");
        let bytes = encode_jsonl(&[&a, &b]).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("\"o1\""));
        assert!(lines[1].contains("\"o2\""));
        assert!(text.ends_with('\n'));
    }

    #[test]
    fn format_parse_and_extension() {
        assert_eq!(OutputFormat::parse("Parquet"), Some(OutputFormat::Parquet));
        assert_eq!(OutputFormat::parse("csv"), None);
        assert_eq!(OutputFormat::Jsonl.extension(), "jsonl");
    }

    #[cfg(not(feature = "parquet"))]
    #[test]
    fn parquet_falls_back_without_feature() {
        let encoder = Encoder::new(OutputFormat::Parquet);
        assert_eq!(encoder.requested(), OutputFormat::Parquet);
        assert_eq!(encoder.format(), OutputFormat::Jsonl);
    }

    #[cfg(feature = "parquet")]
    #[test]
    fn parquet_output_has_magic_bytes() {
        let encoder = Encoder::new(OutputFormat::Parquet);
        assert_eq!(encoder.format(), OutputFormat::Parquet);
        let a = Event::new(EventType::OrderPlaced).with("order_id", "o1").with("total", 3.5);
        let bytes = encoder.encode(&[&a]).unwrap();
        assert_eq!(&bytes[..4], b"PAR1");
        assert_eq!(&bytes[bytes.len() - 4..], b"PAR1");
    }
}
