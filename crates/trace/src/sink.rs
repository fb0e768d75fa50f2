//! The sink capability shared by every trace destination.

use std::io::Write;

use rtkit::IsrSend;

use crate::codec::{DataRef, TraceScalar};
use crate::kind::Severity;

/// A destination for trace events.
///
/// Implementations either render immediately ([`PrintLog`](crate::PrintLog))
/// or encode and queue for a rendering task ([`TraceTask`](crate::TraceTask)).
pub trait TraceSink: Send + Sync {
    /// Reports a message with an error code.
    fn trace(&self, text: &str, code: i32, severity: Severity, reboot: bool);

    /// Reports an array of numbers.
    ///
    /// Deferred sinks copy the array into the message. An array whose copy
    /// exceeds the 16-bit body size is dropped with a warning; send such
    /// arrays through [`trace_data_by_ref`](Self::trace_data_by_ref).
    fn trace_data(&self, text: &str, data: DataRef<'_>);

    /// Reports an array by address, without copying it.
    ///
    /// Sinks that render on the calling thread read the array immediately;
    /// the default does exactly that through [`trace_data`](Self::trace_data).
    ///
    /// # Safety
    ///
    /// `data` must stay alive and unmodified until every sink has rendered
    /// the message. For a deferred sink that is after its rendering task has
    /// processed it.
    unsafe fn trace_data_by_ref(&self, text: &str, data: DataRef<'_>) {
        self.trace_data(text, data);
    }

    /// Interrupt-context message. Must not block.
    fn trace_from_isr(&self, _text: &'static str, _code: i16) -> IsrSend {
        IsrSend::default()
    }

    /// Whether [`trace_from_isr`](Self::trace_from_isr) does anything.
    fn supports_interrupt_context(&self) -> bool {
        false
    }

    /// Restarts the elapsed-time clock.
    fn start_time(&self) {}

    /// Reports the time since the last restart averaged over `divisor`.
    fn stop_time(&self, text: &str, divisor: u32) {
        self.trace(text, i32::try_from(divisor).unwrap_or(i32::MAX), Severity::Info, false);
    }

    /// Prints a plain line.
    fn log(&self, text: &str) {
        self.stop_time(text, 1);
    }

    /// Writes out anything buffered.
    fn flush(&self) {}
}

/// Typed convenience over [`TraceSink::trace_data`].
pub trait TraceSinkExt: TraceSink {
    fn trace_values<T: TraceScalar>(&self, text: &str, data: &[T]) {
        self.trace_data(text, T::data_ref(data));
    }

    /// Typed form of [`TraceSink::trace_data_by_ref`].
    ///
    /// # Safety
    ///
    /// Same contract as [`TraceSink::trace_data_by_ref`].
    unsafe fn trace_values_by_ref<T: TraceScalar>(&self, text: &str, data: &[T]) {
        // SAFETY: forwarded from the caller.
        unsafe { self.trace_data_by_ref(text, T::data_ref(data)) }
    }
}

impl<S: TraceSink + ?Sized> TraceSinkExt for S {}

/// The system restart primitive.
pub trait RestartHandler: Send + Sync {
    fn restart(&self);
}

impl<F> RestartHandler for F
where
    F: Fn() + Send + Sync,
{
    fn restart(&self) {
        self()
    }
}

/// Restart by ending the process with a failure status.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRestart;

impl RestartHandler for ProcessRestart {
    fn restart(&self) {
        log::error!("restart requested");
        let _ = std::io::stdout().flush();
        std::process::exit(1);
    }
}
