//! The trace-rendering task.
//!
//! [`TraceTask`] is both halves of the deferred trace path. As a
//! [`TraceSink`] it encodes each call into one envelope and queues it without
//! waiting; its own execution unit drains the queue, decodes and hands every
//! record to a [`RecordRenderer`]. A full queue drops the message.

use std::cell::RefCell;
use std::io::Write;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use rtkit::{
    CoreAffinity, Envelope, IsrSend, Release, Task, TaskBody, TaskConfig, TaskContext, TaskError,
    TaskState, Timeout, MSG_END_TASK,
};

use crate::codec::{self, DataPayload, DataRef, DecodeError, EncodeError, TraceRecord};
use crate::kind::{Severity, SUPPRESS_CODE};
use crate::render::{ConsoleRenderer, JsonRenderer, RecordRenderer};
use crate::sink::{RestartHandler, TraceSink};
use crate::time::{Stopwatch, TimeUnits};

/// Runtime settings of a [`TraceTask`].
#[derive(Debug, Clone)]
pub struct TraceConfig {
    pub name: String,
    pub stack_size: usize,
    pub priority: u8,
    pub queue_len: usize,
    pub affinity: CoreAffinity,
    /// Units used by the convenience constructors' renderers.
    pub units: TimeUnits,
    /// Restart the elapsed-time clock on every message.
    pub auto_reset: bool,
    /// Delay after each rendered envelope.
    pub pacing: Duration,
    /// Delay between rendering a reboot message and restarting.
    pub reboot_pause: Duration,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            name: "trace".into(),
            stack_size: 2048 + 1024,
            priority: 0,
            queue_len: 30,
            affinity: CoreAffinity::Core(1),
            units: TimeUnits::default(),
            auto_reset: cfg!(feature = "auto-reset"),
            pacing: Duration::from_millis(2),
            reboot_pause: Duration::from_millis(150),
        }
    }
}

impl TraceConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_stack_size(mut self, size: usize) -> Self {
        self.stack_size = size;
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_queue_len(mut self, len: usize) -> Self {
        self.queue_len = len;
        self
    }

    pub fn with_affinity(mut self, affinity: CoreAffinity) -> Self {
        self.affinity = affinity;
        self
    }

    pub fn with_units(mut self, units: TimeUnits) -> Self {
        self.units = units;
        self
    }

    pub fn with_auto_reset(mut self, auto_reset: bool) -> Self {
        self.auto_reset = auto_reset;
        self
    }

    pub fn with_pacing(mut self, pacing: Duration) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn with_reboot_pause(mut self, pause: Duration) -> Self {
        self.reboot_pause = pause;
        self
    }

    fn task_config(&self) -> TaskConfig {
        TaskConfig::new(self.name.clone())
            .with_stack_size(self.stack_size)
            .with_priority(self.priority)
            .with_queue_len(self.queue_len)
            .with_affinity(self.affinity)
    }
}

/// Deferred trace sink backed by its own rendering task.
pub struct TraceTask<R> {
    task: Task,
    clock: critical_section::Mutex<RefCell<Stopwatch>>,
    auto_reset: bool,
    _renderer: PhantomData<fn() -> R>,
}

/// A [`TraceTask`] that writes one JSON object per line.
pub type JsonTraceTask<W> = TraceTask<JsonRenderer<W>>;

impl<R: RecordRenderer> TraceTask<R> {
    /// Starts the rendering task.
    pub fn start(
        config: TraceConfig,
        renderer: R,
        restart: impl RestartHandler + 'static,
    ) -> Result<Arc<Self>, TaskError> {
        let consumer = Consumer {
            renderer,
            restart: Box::new(restart),
            pacing: config.pacing,
            reboot_pause: config.reboot_pause,
        };
        let task = Task::spawn(config.task_config(), consumer)?;
        Ok(Arc::new(Self {
            task,
            clock: critical_section::Mutex::new(RefCell::new(Stopwatch::new())),
            auto_reset: config.auto_reset,
            _renderer: PhantomData,
        }))
    }

    pub fn state(&self) -> TaskState {
        self.task.state()
    }

    pub fn is_running(&self) -> bool {
        self.task.is_running()
    }

    /// Asks the rendering task to finish and waits for it.
    ///
    /// The end command queues behind pending messages, so everything traced
    /// before the call is rendered first.
    pub fn shutdown(&self) -> Result<(), TaskError> {
        let end = Envelope::command(MSG_END_TASK, 0, 0);
        if self
            .task
            .send_back(end, Timeout::Forever, Release::OnFailure)
            .is_err()
        {
            log::debug!("trace: end command not delivered, task already stopped");
        }
        self.task.join()
    }

    fn elapsed(&self, reset: bool) -> u64 {
        critical_section::with(|cs| self.clock.borrow(cs).borrow_mut().lap(reset))
    }

    fn submit(&self, encoded: Result<Envelope, EncodeError>) {
        match encoded {
            // A failed send is already logged by the task.
            Ok(envelope) => {
                let _ = self
                    .task
                    .send_back(envelope, Timeout::Immediate, Release::OnFailure);
            }
            Err(err) => log::warn!("trace: {err}"),
        }
    }
}

impl<W: Write + Send + 'static> TraceTask<JsonRenderer<W>> {
    pub fn start_json(
        config: TraceConfig,
        out: W,
        restart: impl RestartHandler + 'static,
    ) -> Result<Arc<Self>, TaskError> {
        let renderer = JsonRenderer::new(out).with_units(config.units);
        Self::start(config, renderer, restart)
    }
}

impl<W: Write + Send + 'static> TraceTask<ConsoleRenderer<W>> {
    pub fn start_console(
        config: TraceConfig,
        out: W,
        restart: impl RestartHandler + 'static,
    ) -> Result<Arc<Self>, TaskError> {
        let renderer = ConsoleRenderer::new(out).with_units(config.units);
        Self::start(config, renderer, restart)
    }
}

impl<R: RecordRenderer> TraceSink for TraceTask<R> {
    fn trace(&self, text: &str, code: i32, severity: Severity, reboot: bool) {
        if code == SUPPRESS_CODE {
            return;
        }
        let elapsed = self.elapsed(self.auto_reset);
        self.submit(codec::encode_message(elapsed, code, severity, text, reboot));
    }

    fn trace_data(&self, text: &str, data: DataRef<'_>) {
        let elapsed = self.elapsed(self.auto_reset);
        self.submit(codec::encode_data(elapsed, data, text));
    }

    /// Queues the array by address instead of copying it. Dropping or
    /// reusing the buffer before the rendering task reaches the message makes
    /// the consumer read freed or changing memory.
    unsafe fn trace_data_by_ref(&self, text: &str, data: DataRef<'_>) {
        let elapsed = self.elapsed(self.auto_reset);
        self.submit(codec::encode_data_by_reference(elapsed, data, text));
    }

    fn trace_from_isr(&self, text: &'static str, code: i16) -> IsrSend {
        self.task
            .send_front_from_isr(codec::encode_isr(text, code))
            .unwrap_or_default()
    }

    fn supports_interrupt_context(&self) -> bool {
        true
    }

    fn start_time(&self) {
        critical_section::with(|cs| self.clock.borrow(cs).borrow_mut().restart());
    }

    fn stop_time(&self, text: &str, divisor: u32) {
        let elapsed = self.elapsed(true);
        self.submit(codec::encode_stop_time(elapsed, divisor, text));
    }

    fn log(&self, text: &str) {
        self.submit(codec::encode_print(text));
    }
}

struct Consumer<R> {
    renderer: R,
    restart: Box<dyn RestartHandler>,
    pacing: Duration,
    reboot_pause: Duration,
}

impl<R: RecordRenderer> Consumer<R> {
    fn handle(&mut self, name: &str, envelope: Envelope) {
        let record = match codec::decode(&envelope) {
            Ok(record) => record,
            Err(DecodeError::UnknownKind(kind)) => {
                log::warn!("{name}: unknown message kind {kind} dropped");
                return;
            }
            Err(err) => {
                log::warn!("{name}: {err}");
                return;
            }
        };

        let record = match record {
            TraceRecord::Data {
                elapsed_us,
                data,
                text,
            } => TraceRecord::Data {
                elapsed_us,
                // SAFETY: reference kinds are only queued by
                // `TraceSink::trace_data_by_ref`, whose caller keeps the
                // buffer alive until it is rendered here.
                data: DataPayload::Inline(unsafe { data.resolve() }),
                text,
            },
            other => other,
        };

        if let Err(err) = self.renderer.render(&record) {
            log::warn!("{name}: render failed: {err}");
        }

        if record.is_reboot() {
            let _ = self.renderer.flush();
            std::thread::sleep(self.reboot_pause);
            self.restart.restart();
        }
    }
}

impl<R: RecordRenderer> TaskBody for Consumer<R> {
    fn run(&mut self, ctx: &mut TaskContext) {
        let name = ctx.name().to_owned();
        while let Some(envelope) = ctx.receive(Timeout::Forever) {
            if envelope.kind == MSG_END_TASK {
                break;
            }
            self.handle(&name, envelope);
            if !self.pacing.is_zero() {
                std::thread::sleep(self.pacing);
            }
        }
        let _ = self.renderer.flush();
        log::debug!("{name}: stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::SharedBuffer;

    fn consumer(out: SharedBuffer) -> Consumer<ConsoleRenderer<SharedBuffer>> {
        Consumer {
            renderer: ConsoleRenderer::new(out).with_units(TimeUnits::Auto),
            restart: Box::new(|| {}),
            pacing: Duration::ZERO,
            reboot_pause: Duration::ZERO,
        }
    }

    #[test]
    fn unknown_kinds_are_dropped_without_output() {
        let out = SharedBuffer::new();
        let mut consumer = consumer(out.clone());
        consumer.handle("trace", Envelope::command(4000, 0, 0));
        consumer.handle("trace", Envelope::with_params(5999, 1, 2, 3));
        assert!(out.contents().is_empty());
    }

    #[test]
    fn known_kinds_are_rendered() {
        let out = SharedBuffer::new();
        let mut consumer = consumer(out.clone());
        consumer.handle("trace", codec::encode_print("ready").unwrap());
        consumer.handle("trace", codec::encode_isr("irq", 4));
        assert_eq!(out.lines(), vec!["ready", "4:irq"]);
    }

    #[test]
    fn default_config_matches_the_platform_task() {
        let config = TraceConfig::default();
        assert_eq!(config.name, "trace");
        assert_eq!(config.stack_size, 3072);
        assert_eq!(config.queue_len, 30);
        assert_eq!(config.affinity, CoreAffinity::Core(1));
        assert!(config.task_config().validate().is_ok());
    }
}
