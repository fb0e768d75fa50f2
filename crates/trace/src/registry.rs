//! Registry of trace sinks.
//!
//! [`TraceList`] fans every call out to its sinks while holding one lock, so
//! a fan-out never interleaves with `add`/`remove`/`clear`. Interrupt-context
//! calls cannot take that lock; they read a snapshot republished on every
//! mutation and give up instead of waiting when it is being replaced.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use rtkit::IsrSend;

use crate::codec::{DataRef, TraceScalar};
use crate::kind::Severity;
use crate::sink::{ProcessRestart, RestartHandler, TraceSink};

/// Pause between a reboot request and the restart.
pub const DEFAULT_REBOOT_DELAY: Duration = Duration::from_millis(1000);

type SinkList = Vec<Arc<dyn TraceSink>>;

/// Ordered set of sinks behind a lock.
pub struct TraceList {
    sinks: Mutex<SinkList>,
    isr_view: RwLock<Arc<[Arc<dyn TraceSink>]>>,
    restart: Arc<dyn RestartHandler>,
    reboot_delay: Duration,
}

impl Default for TraceList {
    fn default() -> Self {
        Self::new()
    }
}

impl TraceList {
    /// Creates an empty registry that restarts by exiting the process.
    pub fn new() -> Self {
        Self::with_restart(ProcessRestart)
    }

    pub fn with_restart(restart: impl RestartHandler + 'static) -> Self {
        Self::with_restart_handler(Arc::new(restart))
    }

    pub fn with_restart_handler(restart: Arc<dyn RestartHandler>) -> Self {
        Self {
            sinks: Mutex::new(Vec::new()),
            isr_view: RwLock::new(Arc::from(Vec::new())),
            restart,
            reboot_delay: DEFAULT_REBOOT_DELAY,
        }
    }

    pub fn with_reboot_delay(mut self, delay: Duration) -> Self {
        self.reboot_delay = delay;
        self
    }

    /// Appends a sink. Adding the same sink twice is a no-op.
    pub fn add(&self, sink: Arc<dyn TraceSink>) -> bool {
        let mut sinks = self.sinks.lock();
        if sinks.iter().any(|s| Arc::ptr_eq(s, &sink)) {
            return false;
        }
        sinks.push(sink);
        self.publish(&sinks);
        true
    }

    /// Removes a previously added sink.
    pub fn remove(&self, sink: &Arc<dyn TraceSink>) -> bool {
        let mut sinks = self.sinks.lock();
        let before = sinks.len();
        sinks.retain(|s| !Arc::ptr_eq(s, sink));
        let removed = sinks.len() != before;
        if removed {
            self.publish(&sinks);
        }
        removed
    }

    /// Drops every sink.
    pub fn clear(&self) {
        let mut sinks = self.sinks.lock();
        sinks.clear();
        self.publish(&sinks);
    }

    pub fn len(&self) -> usize {
        self.sinks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forwards a message to every sink; restarts afterwards if `reboot` is set.
    pub fn trace(&self, text: &str, code: i32, severity: Severity, reboot: bool) {
        {
            let sinks = self.sinks.lock();
            for sink in sinks.iter() {
                sink.trace(text, code, severity, reboot);
            }
        }

        if reboot {
            log::error!("trace reboot...");
            self.flush();
            std::thread::sleep(self.reboot_delay);
            self.restart.restart();
        }
    }

    pub fn error(&self, text: &str, code: i32) {
        self.trace(text, code, Severity::Error, false);
    }

    pub fn warning(&self, text: &str, code: i32) {
        self.trace(text, code, Severity::Warning, false);
    }

    pub fn info(&self, text: &str, code: i32) {
        self.trace(text, code, Severity::Info, false);
    }

    /// Interrupt-context fan-out. Never blocks; returns whether any sink
    /// asked for a reschedule.
    pub fn trace_from_isr(&self, text: &'static str, code: i16) -> IsrSend {
        let Some(view) = self.isr_view.try_read() else {
            return IsrSend::default();
        };
        let mut result = IsrSend::default();
        for sink in view.iter().filter(|s| s.supports_interrupt_context()) {
            result.yield_requested |= sink.trace_from_isr(text, code).yield_requested;
        }
        result
    }

    pub fn trace_data(&self, text: &str, data: DataRef<'_>) {
        let sinks = self.sinks.lock();
        for sink in sinks.iter() {
            sink.trace_data(text, data);
        }
    }

    /// Typed form of [`trace_data`](Self::trace_data).
    pub fn trace_values<T: TraceScalar>(&self, text: &str, data: &[T]) {
        self.trace_data(text, T::data_ref(data));
    }

    /// Forwards an array by address to every sink.
    ///
    /// # Safety
    ///
    /// `data` must stay alive and unmodified until every sink has rendered
    /// it; see [`TraceSink::trace_data_by_ref`].
    pub unsafe fn trace_data_by_ref(&self, text: &str, data: DataRef<'_>) {
        let sinks = self.sinks.lock();
        for sink in sinks.iter() {
            // SAFETY: forwarded from the caller.
            unsafe { sink.trace_data_by_ref(text, data) };
        }
    }

    /// Typed form of [`trace_data_by_ref`](Self::trace_data_by_ref).
    ///
    /// # Safety
    ///
    /// Same contract as [`trace_data_by_ref`](Self::trace_data_by_ref).
    pub unsafe fn trace_values_by_ref<T: TraceScalar>(&self, text: &str, data: &[T]) {
        // SAFETY: forwarded from the caller.
        unsafe { self.trace_data_by_ref(text, T::data_ref(data)) }
    }

    pub fn log(&self, text: &str) {
        let sinks = self.sinks.lock();
        for sink in sinks.iter() {
            sink.log(text);
        }
    }

    pub fn start_time(&self) {
        let sinks = self.sinks.lock();
        for sink in sinks.iter() {
            sink.start_time();
        }
    }

    pub fn stop_time(&self, text: &str, divisor: u32) {
        let sinks = self.sinks.lock();
        for sink in sinks.iter() {
            sink.stop_time(text, divisor);
        }
    }

    pub fn flush(&self) {
        let sinks = self.sinks.lock();
        for sink in sinks.iter() {
            sink.flush();
        }
    }

    fn publish(&self, sinks: &SinkList) {
        *self.isr_view.write() = Arc::from(sinks.as_slice());
    }
}
