//! Human-readable and JSON rendering of decoded trace records.

use std::fmt::Write as _;
use std::io::{self, Write};
use std::sync::Arc;

use colored::Colorize;
use parking_lot::Mutex;
use serde::Serialize;

use crate::codec::{DataPayload, DataRef, DataValues, TraceRecord};
use crate::kind::Severity;
use crate::time::{format_elapsed, TimeUnits};

/// Output stage of the rendering task.
pub trait RecordRenderer: Send + 'static {
    fn render(&mut self, record: &TraceRecord) -> io::Result<()>;

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Where console lines go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConsoleStyle {
    /// Write lines to the renderer's writer.
    #[default]
    Plain,
    /// Emit lines through the `log` facade under the `trace` target.
    Log,
}

/// Formats records as console lines.
pub struct ConsoleRenderer<W> {
    out: W,
    units: TimeUnits,
    style: ConsoleStyle,
    color: bool,
}

impl ConsoleRenderer<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write + Send + 'static> ConsoleRenderer<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            units: TimeUnits::default(),
            style: ConsoleStyle::default(),
            color: false,
        }
    }

    pub fn with_units(mut self, units: TimeUnits) -> Self {
        self.units = units;
        self
    }

    pub fn with_style(mut self, style: ConsoleStyle) -> Self {
        self.style = style;
        self
    }

    /// Colour message lines by severity.
    pub fn with_color(mut self, color: bool) -> Self {
        self.color = color;
        self
    }

    /// Formats a record without writing it.
    pub fn format(&self, record: &TraceRecord) -> String {
        match record {
            TraceRecord::Message {
                elapsed_us,
                code,
                text,
                ..
            } => {
                let hdr = format_elapsed(*elapsed_us, 1, self.units);
                if text.is_empty() {
                    format!("{hdr}: {code}")
                } else {
                    format!("{hdr}: {code}:{text}")
                }
            }
            TraceRecord::Isr { code, text } => format!("{code}:{text}"),
            TraceRecord::StopTime {
                elapsed_us,
                divisor,
                text,
            } => format!("{} {text}", format_elapsed(*elapsed_us, *divisor, self.units)),
            TraceRecord::Print { text } => text.clone(),
            TraceRecord::Data {
                elapsed_us,
                data,
                text,
            } => {
                let mut line = format!(
                    "{}{text} {}:",
                    format_elapsed(*elapsed_us, 1, self.units),
                    data.len()
                );
                match data {
                    DataPayload::Inline(values) => push_console_values(&mut line, values),
                    DataPayload::Reference { address, .. } => {
                        let _ = write!(line, " @{address:#x}");
                    }
                }
                line
            }
        }
    }

    fn emit(&mut self, line: &str, severity: Severity) -> io::Result<()> {
        match self.style {
            ConsoleStyle::Log => {
                let level = severity.to_log_level().unwrap_or(log::Level::Info);
                log::log!(target: "trace", level, "{line}");
                Ok(())
            }
            ConsoleStyle::Plain if self.color => {
                let painted = match severity {
                    Severity::Error => line.bright_red().bold().to_string(),
                    Severity::Warning => line.yellow().to_string(),
                    Severity::Info => line.green().to_string(),
                    _ => line.to_string(),
                };
                writeln!(self.out, "{painted}")
            }
            ConsoleStyle::Plain => writeln!(self.out, "{line}"),
        }
    }
}

impl<W: Write + Send + 'static> RecordRenderer for ConsoleRenderer<W> {
    fn render(&mut self, record: &TraceRecord) -> io::Result<()> {
        let severity = match record {
            TraceRecord::Message { severity, .. } => *severity,
            TraceRecord::Isr { .. } => Severity::Error,
            _ => Severity::Info,
        };
        let line = self.format(record);
        self.emit(&line, severity)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }
}

fn push_console_values(line: &mut String, values: &DataValues) {
    fn join<T>(line: &mut String, data: &[T], fmt: impl Fn(&T) -> String) {
        for (i, value) in data.iter().enumerate() {
            line.push(if i == 0 { ' ' } else { ',' });
            line.push_str(&fmt(value));
        }
    }
    match values.as_data_ref() {
        DataRef::U8(d) => join(line, d, |v| format!("0x{v:02x}")),
        DataRef::U16(d) => join(line, d, |v| format!("0x{v:04x}")),
        DataRef::U32(d) => join(line, d, |v| format!("0x{v:08x}")),
        DataRef::I8(d) => join(line, d, |v| v.to_string()),
        DataRef::I16(d) => join(line, d, |v| v.to_string()),
        DataRef::I32(d) => join(line, d, |v| v.to_string()),
    }
}

#[derive(Serialize)]
struct JsonLine<'a> {
    log: JsonBody<'a>,
}

#[derive(Serialize)]
struct JsonBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    level: Option<u8>,
    value: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<JsonData>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum JsonData {
    Hex(String),
    Numbers(Vec<i64>),
}

impl JsonData {
    fn from_values(values: &DataValues) -> Self {
        fn hex<const N: usize>(bytes: impl Iterator<Item = [u8; N]>) -> String {
            let mut out = String::new();
            for chunk in bytes {
                for b in chunk {
                    let _ = write!(out, "{b:02x}");
                }
            }
            out
        }
        match values {
            DataValues::U8(d) => Self::Hex(hex(d.iter().map(|v| v.to_le_bytes()))),
            DataValues::U16(d) => Self::Hex(hex(d.iter().map(|v| v.to_le_bytes()))),
            DataValues::U32(d) => Self::Hex(hex(d.iter().map(|v| v.to_le_bytes()))),
            DataValues::I8(d) => Self::Numbers(d.iter().map(|v| i64::from(*v)).collect()),
            DataValues::I16(d) => Self::Numbers(d.iter().map(|v| i64::from(*v)).collect()),
            DataValues::I32(d) => Self::Numbers(d.iter().map(|v| i64::from(*v)).collect()),
        }
    }
}

/// Formats records as one JSON object per line.
pub struct JsonRenderer<W> {
    out: W,
    units: TimeUnits,
    last_answer: String,
}

impl<W: Write + Send + 'static> JsonRenderer<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            units: TimeUnits::default(),
            last_answer: String::new(),
        }
    }

    pub fn with_units(mut self, units: TimeUnits) -> Self {
        self.units = units;
        self
    }

    /// The most recently rendered object.
    pub fn last_answer(&self) -> &str {
        &self.last_answer
    }

    /// Serialises a record without writing it.
    pub fn format(&self, record: &TraceRecord) -> serde_json::Result<String> {
        let time = |elapsed: u64, divisor: u32| Some(format_elapsed(elapsed, divisor, self.units));
        let body = match record {
            TraceRecord::Message {
                elapsed_us,
                code,
                severity,
                text,
                ..
            } => JsonBody {
                time: time(*elapsed_us, 1),
                code: Some(*code),
                level: Some(severity.as_u8()),
                value: text,
                data: None,
            },
            TraceRecord::Isr { code, text } => JsonBody {
                time: None,
                code: Some(i32::from(*code)),
                level: None,
                value: text,
                data: None,
            },
            TraceRecord::StopTime {
                elapsed_us,
                divisor,
                text,
            } => JsonBody {
                time: time(*elapsed_us, *divisor),
                code: None,
                level: None,
                value: text,
                data: None,
            },
            TraceRecord::Print { text } => JsonBody {
                time: None,
                code: None,
                level: None,
                value: text,
                data: None,
            },
            TraceRecord::Data {
                elapsed_us,
                data,
                text,
            } => JsonBody {
                time: time(*elapsed_us, 1),
                code: None,
                level: None,
                value: text,
                data: match data {
                    DataPayload::Inline(values) => Some(JsonData::from_values(values)),
                    DataPayload::Reference { address, .. } => {
                        Some(JsonData::Hex(format!("{address:x}")))
                    }
                },
            },
        };
        serde_json::to_string(&JsonLine { log: body })
    }
}

impl<W: Write + Send + 'static> RecordRenderer for JsonRenderer<W> {
    fn render(&mut self, record: &TraceRecord) -> io::Result<()> {
        self.last_answer = self.format(record).map_err(io::Error::from)?;
        writeln!(self.out, "{}", self.last_answer)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }
}

/// Cloneable in-memory writer for capturing rendered output.
#[derive(Clone, Default)]
pub struct SharedBuffer {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl SharedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.bytes.lock()).into_owned()
    }

    pub fn lines(&self) -> Vec<String> {
        self.contents().lines().map(str::to_owned).collect()
    }

    pub fn clear(&self) {
        self.bytes.lock().clear();
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.bytes.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
