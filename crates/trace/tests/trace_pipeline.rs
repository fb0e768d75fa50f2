use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rtkit::TaskState;
use rtkit_trace::{
    ConsoleRenderer, DataRef, PrintLog, Severity, SharedBuffer, TimeUnits, TraceConfig, TraceList,
    TraceSink, TraceSinkExt, TraceTask, SUPPRESS_CODE,
};

type ConsoleTask = TraceTask<ConsoleRenderer<SharedBuffer>>;

fn config() -> TraceConfig {
    TraceConfig::new()
        .with_pacing(Duration::ZERO)
        .with_units(TimeUnits::Auto)
        .with_reboot_pause(Duration::from_millis(5))
}

fn console_task(out: &SharedBuffer) -> Arc<ConsoleTask> {
    TraceTask::start_console(config(), out.clone(), || {}).unwrap()
}

fn print_log(out: &SharedBuffer) -> PrintLog<SharedBuffer> {
    PrintLog::new(ConsoleRenderer::new(out.clone()).with_units(TimeUnits::Auto))
}

#[test]
fn queued_messages_render_in_order_before_shutdown_returns() {
    let out = SharedBuffer::new();
    let sink = console_task(&out);

    sink.trace("boot", 1, Severity::Info, false);
    sink.trace_values("bytes", &[1u8, 2]);
    sink.log("plain");
    sink.shutdown().unwrap();

    let lines = out.lines();
    assert_eq!(lines.len(), 3, "{lines:?}");
    assert!(lines[0].starts_with("(+"), "{}", lines[0]);
    assert!(lines[0].ends_with(": 1:boot"), "{}", lines[0]);
    assert!(lines[1].ends_with("bytes 2: 0x01,0x02"), "{}", lines[1]);
    assert_eq!(lines[2], "plain");
    assert_eq!(sink.state(), TaskState::Terminated);
    assert!(!sink.is_running());
}

#[test]
fn suppressed_code_never_reaches_the_renderer() {
    let out = SharedBuffer::new();
    let sink = console_task(&out);

    sink.trace("hidden", SUPPRESS_CODE, Severity::Error, false);
    sink.log("visible");
    sink.shutdown().unwrap();

    assert_eq!(out.lines(), vec!["visible"]);
}

#[test]
fn reference_data_is_read_when_rendered() {
    let out = SharedBuffer::new();
    let sink = console_task(&out);
    let words = [1u16, 0xbeef];

    // SAFETY: `words` outlives the shutdown below, which waits for rendering.
    unsafe { sink.trace_data_by_ref("words", DataRef::U16(&words)) };
    sink.shutdown().unwrap();

    let lines = out.lines();
    assert_eq!(lines.len(), 1);
    assert!(lines[0].ends_with("words 2: 0x0001,0xbeef"), "{}", lines[0]);
}

#[test]
fn oversized_inline_array_is_dropped() {
    let out = SharedBuffer::new();
    let list = TraceList::with_restart(|| {});
    let sink = console_task(&out);
    list.add(sink.clone());
    let big = vec![0xabu8; 70_000];

    list.trace_data("big", DataRef::U8(&big));
    list.trace_data("small", DataRef::U8(&big[..2]));
    sink.shutdown().unwrap();

    let lines = out.lines();
    assert_eq!(lines.len(), 1, "{lines:?}");
    assert!(lines[0].ends_with("small 2: 0xab,0xab"), "{}", lines[0]);
}

#[test]
fn oversized_array_passes_by_reference_through_the_list() {
    let out = SharedBuffer::new();
    let direct_out = SharedBuffer::new();
    let list = TraceList::with_restart(|| {});
    let sink = console_task(&out);
    list.add(sink.clone());
    list.add(Arc::new(print_log(&direct_out)));
    let big = vec![0xabu8; 70_000];

    // SAFETY: `big` outlives the shutdown below, which waits for rendering.
    unsafe { rtkit_trace::trace_data!(list, "big", by_ref &big[..]) };
    sink.shutdown().unwrap();

    for lines in [out.lines(), direct_out.lines()] {
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("big 70000: 0xab,0xab,"), "{}", &lines[0][..40]);
        assert!(lines[0].ends_with("0xab"));
    }
}

#[test]
fn stop_time_reports_the_interval() {
    let out = SharedBuffer::new();
    let sink = console_task(&out);

    sink.start_time();
    std::thread::sleep(Duration::from_millis(2));
    sink.stop_time("lap", 1);
    sink.shutdown().unwrap();

    let lines = out.lines();
    assert_eq!(lines.len(), 1);
    assert!(lines[0].starts_with("(+"), "{}", lines[0]);
    assert!(lines[0].ends_with(") lap"), "{}", lines[0]);
}

#[test]
fn reboot_message_renders_then_restarts() {
    let out = SharedBuffer::new();
    let restarts = Arc::new(AtomicUsize::new(0));
    let counter = restarts.clone();
    let sink = TraceTask::start_console(config(), out.clone(), move || {
        counter.fetch_add(1, Ordering::SeqCst);
    })
    .unwrap();

    sink.trace("fatal", 13, Severity::Error, true);
    sink.shutdown().unwrap();

    let lines = out.lines();
    assert!(lines[0].ends_with(": 13:fatal"), "{}", lines[0]);
    assert_eq!(restarts.load(Ordering::SeqCst), 1);
}

#[test]
fn json_task_writes_one_object_per_line() {
    let out = SharedBuffer::new();
    let sink = TraceTask::start_json(config(), out.clone(), || {}).unwrap();

    sink.trace("ready", 5, Severity::Info, false);
    sink.log("hi");
    sink.shutdown().unwrap();

    let lines = out.lines();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].starts_with(r#"{"log":{"time":"(+"#), "{}", lines[0]);
    assert!(
        lines[0].ends_with(r#","code":5,"level":3,"value":"ready"}}"#),
        "{}",
        lines[0]
    );
    assert_eq!(lines[1], r#"{"log":{"value":"hi"}}"#);
}

#[test]
fn registry_fans_out_to_deferred_and_direct_sinks() {
    let deferred_out = SharedBuffer::new();
    let direct_out = SharedBuffer::new();
    let deferred = console_task(&deferred_out);
    let direct = Arc::new(print_log(&direct_out));

    let list = TraceList::with_restart(|| {});
    list.add(deferred.clone());
    list.add(direct.clone());

    list.warning("hot", 80);
    list.trace_from_isr("tick", -2);
    deferred.shutdown().unwrap();

    for lines in [deferred_out.lines(), direct_out.lines()] {
        assert_eq!(lines.len(), 2, "{lines:?}");
        assert!(lines.iter().any(|l| l.ends_with(": 80:hot")), "{lines:?}");
        assert!(lines.iter().any(|l| l == "-2:tick"), "{lines:?}");
    }
}

#[test]
fn print_log_reboot_prints_abort_before_restarting() {
    let out = SharedBuffer::new();
    let restarts = Arc::new(AtomicUsize::new(0));
    let counter = restarts.clone();
    let sink = print_log(&out)
        .with_restart(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .with_reboot_delay(Duration::from_millis(5));

    sink.trace("panic", 3, Severity::Error, true);

    let lines = out.lines();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].ends_with(": 3:panic"), "{}", lines[0]);
    assert_eq!(lines[1], "abort");
    assert_eq!(restarts.load(Ordering::SeqCst), 1);
}

#[test]
fn call_site_macros_reach_the_sinks() {
    let out = SharedBuffer::new();
    let list = TraceList::with_restart(|| {});
    list.add(Arc::new(print_log(&out)));

    rtkit_trace::trace_info!(list, "ready", 1);
    rtkit_trace::trace_hex!(list, "reg", 0xabu8);
    rtkit_trace::trace_data!(list, "arr", &[1i16, -1]);
    rtkit_trace::trace_log!(list, "bare");
    rtkit_trace::trace_dec!(list, "count", 42u8);

    let lines = out.lines();
    assert_eq!(lines.len(), 5, "{lines:?}");
    assert!(lines[0].ends_with(": 1:ready"));
    assert!(lines[1].ends_with("reg 1: 0xab"));
    assert!(lines[2].ends_with("arr 2: 1,-1"));
    assert_eq!(lines[3], "bare");
    assert!(lines[4].ends_with(": 42:count"));
}
