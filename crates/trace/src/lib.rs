//! # rtkit-trace
//!
//! Diagnostic tracing on top of [`rtkit`]: callers report messages, arrays
//! and elapsed times through a [`TraceList`] which fans them out to every
//! registered [`TraceSink`]. The deferred sink, [`TraceTask`], encodes each
//! call into a single envelope and renders it later on its own task.
//!
//! ## Module Overview
//! - [`kind`]      – Envelope kind tags, element types and severities.
//! - [`codec`]     – Payload layouts, encoders and the decoder.
//! - [`time`]      – Elapsed-time stopwatch and unit formatting.
//! - [`sink`]      – The sink capability and restart hook.
//! - [`registry`]  – Fan-out list of sinks.
//! - [`render`]    – Console and JSON renderers.
//! - [`task`]      – The rendering task and its encoder front end.
//! - [`print_log`] – Synchronous console sink.
//!
//! ## Features
//! - `trace` (default): call-site macros expand to calls; otherwise to nothing.
//! - `usec-time`: elapsed times always print in microseconds.
//! - `auto-reset`: the elapsed-time clock restarts after every message.

pub mod codec;
pub mod kind;
mod macros;
pub mod print_log;
pub mod registry;
pub mod render;
pub mod sink;
pub mod task;
pub mod time;

pub use codec::{DataPayload, DataRef, DataValues, DecodeError, EncodeError, TraceRecord, TraceScalar};
pub use kind::{ElemType, Severity, TraceKind, SUPPRESS_CODE};
pub use print_log::PrintLog;
pub use registry::{TraceList, DEFAULT_REBOOT_DELAY};
pub use render::{ConsoleRenderer, ConsoleStyle, JsonRenderer, RecordRenderer, SharedBuffer};
pub use rtkit::IsrSend;
pub use sink::{ProcessRestart, RestartHandler, TraceSink, TraceSinkExt};
pub use task::{JsonTraceTask, TraceConfig, TraceTask};
pub use time::{format_elapsed, Stopwatch, TimeUnits};

#[cfg(test)]
mod tests;
