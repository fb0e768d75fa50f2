use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rtkit::IsrSend;

use crate::codec::DataRef;
use crate::kind::Severity;
use crate::registry::TraceList;
use crate::sink::TraceSink;

#[derive(Default)]
struct Recorder {
    calls: Mutex<Vec<String>>,
    isr: bool,
}

impl Recorder {
    fn isr_capable() -> Self {
        Self {
            isr: true,
            ..Self::default()
        }
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

impl TraceSink for Recorder {
    fn trace(&self, text: &str, code: i32, severity: Severity, reboot: bool) {
        self.calls
            .lock()
            .push(format!("trace {text} {code} {severity:?} {reboot}"));
    }

    fn trace_data(&self, text: &str, data: DataRef<'_>) {
        self.calls.lock().push(format!("data {text} {}", data.len()));
    }

    fn trace_from_isr(&self, text: &'static str, code: i16) -> IsrSend {
        self.calls.lock().push(format!("isr {text} {code}"));
        IsrSend {
            yield_requested: true,
        }
    }

    fn supports_interrupt_context(&self) -> bool {
        self.isr
    }
}

fn list_with(sinks: &[Arc<Recorder>]) -> TraceList {
    let list = TraceList::with_restart(|| {});
    for sink in sinks {
        assert!(list.add(sink.clone()));
    }
    list
}

#[test]
fn every_sink_sees_each_message_once() {
    let a = Arc::new(Recorder::default());
    let b = Arc::new(Recorder::default());
    let list = list_with(&[a.clone(), b.clone()]);

    list.warning("low battery", 12);

    let expected = vec!["trace low battery 12 Warning false".to_string()];
    assert_eq!(a.calls(), expected);
    assert_eq!(b.calls(), expected);
}

#[test]
fn duplicate_add_is_ignored_and_remove_detaches() {
    let a = Arc::new(Recorder::default());
    let list = list_with(&[a.clone()]);
    let handle: Arc<dyn TraceSink> = a.clone();

    assert!(!list.add(handle.clone()));
    assert_eq!(list.len(), 1);

    list.info("once", 1);
    assert!(list.remove(&handle));
    assert!(!list.remove(&handle));
    list.info("twice", 2);

    assert_eq!(a.calls().len(), 1);
    assert!(list.is_empty());
}

#[test]
fn default_log_and_stop_time_route_through_trace() {
    let a = Arc::new(Recorder::default());
    let list = list_with(&[a.clone()]);

    list.log("hello");
    list.stop_time("loop", 4);
    list.trace_values("bytes", &[1u8, 2, 3]);

    assert_eq!(
        a.calls(),
        vec![
            "trace hello 1 Info false",
            "trace loop 4 Info false",
            "data bytes 3",
        ]
    );
}

#[test]
fn interrupt_fan_out_skips_sinks_without_support() {
    let task_only = Arc::new(Recorder::default());
    let isr = Arc::new(Recorder::isr_capable());
    let list = list_with(&[task_only.clone(), isr.clone()]);

    let sent = list.trace_from_isr("tick", 3);

    assert!(sent.yield_requested);
    assert!(task_only.calls().is_empty());
    assert_eq!(isr.calls(), vec!["isr tick 3"]);
}

#[test]
fn cleared_list_reaches_no_sink() {
    let isr = Arc::new(Recorder::isr_capable());
    let list = list_with(&[isr.clone()]);
    list.clear();

    list.error("gone", 1);
    assert!(!list.trace_from_isr("gone", 1).yield_requested);
    assert!(isr.calls().is_empty());
}

#[test]
fn reboot_restarts_after_every_sink_reported() {
    let restarts = Arc::new(AtomicUsize::new(0));
    let counter = restarts.clone();
    let list = TraceList::with_restart(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    })
    .with_reboot_delay(Duration::from_millis(10));

    let a = Arc::new(Recorder::default());
    list.add(a.clone());

    list.trace("fatal", 99, Severity::Error, true);

    assert_eq!(a.calls(), vec!["trace fatal 99 Error true"]);
    assert_eq!(restarts.load(Ordering::SeqCst), 1);
}
