//! Synchronous console sink.

use std::io::{self, Write};
use std::time::Duration;

use parking_lot::Mutex;
use rtkit::IsrSend;

use crate::codec::{DataPayload, DataRef, TraceRecord};
use crate::kind::{Severity, SUPPRESS_CODE};
use crate::registry::DEFAULT_REBOOT_DELAY;
use crate::render::{ConsoleRenderer, RecordRenderer};
use crate::sink::{ProcessRestart, RestartHandler, TraceSink};
use crate::time::Stopwatch;

struct State<W> {
    renderer: ConsoleRenderer<W>,
    clock: Stopwatch,
}

/// Renders every call immediately on the calling thread.
pub struct PrintLog<W> {
    state: Mutex<State<W>>,
    restart: Box<dyn RestartHandler>,
    reboot_delay: Duration,
    auto_reset: bool,
}

impl PrintLog<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(ConsoleRenderer::stdout())
    }
}

impl<W: Write + Send + 'static> PrintLog<W> {
    pub fn new(renderer: ConsoleRenderer<W>) -> Self {
        Self {
            state: Mutex::new(State {
                renderer,
                clock: Stopwatch::new(),
            }),
            restart: Box::new(ProcessRestart),
            reboot_delay: DEFAULT_REBOOT_DELAY,
            auto_reset: cfg!(feature = "auto-reset"),
        }
    }

    pub fn with_restart(mut self, restart: impl RestartHandler + 'static) -> Self {
        self.restart = Box::new(restart);
        self
    }

    pub fn with_reboot_delay(mut self, delay: Duration) -> Self {
        self.reboot_delay = delay;
        self
    }

    pub fn with_auto_reset(mut self, auto_reset: bool) -> Self {
        self.auto_reset = auto_reset;
        self
    }

    fn emit(state: &mut State<W>, record: &TraceRecord) {
        if let Err(err) = state.renderer.render(record) {
            log::warn!("print log: {err}");
        }
    }
}

impl<W: Write + Send + 'static> TraceSink for PrintLog<W> {
    fn trace(&self, text: &str, code: i32, severity: Severity, reboot: bool) {
        if code == SUPPRESS_CODE {
            return;
        }
        {
            let mut state = self.state.lock();
            let elapsed_us = state.clock.lap(self.auto_reset);
            let record = TraceRecord::Message {
                elapsed_us,
                code,
                severity,
                text: text.to_owned(),
                reboot,
            };
            Self::emit(&mut state, &record);
            if !reboot {
                return;
            }
            Self::emit(&mut state, &TraceRecord::Print { text: "abort".into() });
            let _ = state.renderer.flush();
        }
        std::thread::sleep(self.reboot_delay);
        self.restart.restart();
    }

    fn trace_data(&self, text: &str, data: DataRef<'_>) {
        let mut state = self.state.lock();
        let elapsed_us = state.clock.lap(self.auto_reset);
        let record = TraceRecord::Data {
            elapsed_us,
            data: DataPayload::Inline(data.to_values()),
            text: text.to_owned(),
        };
        Self::emit(&mut state, &record);
    }

    fn trace_from_isr(&self, text: &'static str, code: i16) -> IsrSend {
        if let Some(mut state) = self.state.try_lock() {
            Self::emit(&mut state, &TraceRecord::Isr { code, text });
        }
        IsrSend::default()
    }

    fn supports_interrupt_context(&self) -> bool {
        true
    }

    fn start_time(&self) {
        self.state.lock().clock.restart();
    }

    fn stop_time(&self, text: &str, divisor: u32) {
        let mut state = self.state.lock();
        let elapsed_us = state.clock.lap(true);
        let record = TraceRecord::StopTime {
            elapsed_us,
            divisor,
            text: text.to_owned(),
        };
        Self::emit(&mut state, &record);
    }

    fn log(&self, text: &str) {
        let mut state = self.state.lock();
        Self::emit(&mut state, &TraceRecord::Print { text: text.to_owned() });
    }

    fn flush(&self) {
        let _ = self.state.lock().renderer.flush();
    }
}
