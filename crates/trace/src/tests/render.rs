use crate::codec::{DataPayload, DataValues, TraceRecord};
use crate::kind::Severity;
use crate::render::{ConsoleRenderer, JsonRenderer, RecordRenderer, SharedBuffer};
use crate::time::TimeUnits;

fn message(text: &str) -> TraceRecord {
    TraceRecord::Message {
        elapsed_us: 1_500,
        code: 7,
        severity: Severity::Error,
        text: text.into(),
        reboot: false,
    }
}

fn data(values: DataValues, text: &str) -> TraceRecord {
    TraceRecord::Data {
        elapsed_us: 20,
        data: DataPayload::Inline(values),
        text: text.into(),
    }
}

fn stop_time() -> TraceRecord {
    TraceRecord::StopTime {
        elapsed_us: 50_000,
        divisor: 2,
        text: "loop".into(),
    }
}

fn console() -> ConsoleRenderer<SharedBuffer> {
    ConsoleRenderer::new(SharedBuffer::new()).with_units(TimeUnits::Auto)
}

fn json() -> JsonRenderer<SharedBuffer> {
    JsonRenderer::new(SharedBuffer::new()).with_units(TimeUnits::Auto)
}

#[test]
fn console_message_lines() {
    let r = console();
    assert_eq!(r.format(&message("boom")), "(+1500usec): 7:boom");
    assert_eq!(r.format(&message("")), "(+1500usec): 7");
    assert_eq!(r.format(&stop_time()), "(+25msec) loop");
    assert_eq!(r.format(&TraceRecord::Print { text: "plain".into() }), "plain");
    assert_eq!(
        r.format(&TraceRecord::Isr {
            code: -3,
            text: "irq"
        }),
        "-3:irq"
    );
}

#[test]
fn console_data_lines() {
    let r = console();
    assert_eq!(
        r.format(&data(DataValues::U8(vec![1, 2, 0xff]), "bytes")),
        "(+20usec)bytes 3: 0x01,0x02,0xff"
    );
    assert_eq!(
        r.format(&data(DataValues::U16(vec![0x1234, 0x0a]), "words")),
        "(+20usec)words 2: 0x1234,0x000a"
    );
    assert_eq!(
        r.format(&data(DataValues::U32(vec![0xdead]), "dword")),
        "(+20usec)dword 1: 0x0000dead"
    );
    assert_eq!(
        r.format(&data(DataValues::I16(vec![-1, 5]), "signed")),
        "(+20usec)signed 2: -1,5"
    );
    assert_eq!(
        r.format(&data(DataValues::I8(Vec::new()), "none")),
        "(+20usec)none 0:"
    );
}

#[test]
fn console_render_appends_lines() {
    let out = SharedBuffer::new();
    let mut r = ConsoleRenderer::new(out.clone()).with_units(TimeUnits::Micros);
    r.render(&message("first")).unwrap();
    r.render(&TraceRecord::Print { text: "second".into() }).unwrap();
    assert_eq!(out.lines(), vec!["(+1500usec): 7:first", "second"]);
}

#[test]
fn json_string_print_and_stop_time() {
    let r = json();
    assert_eq!(
        r.format(&message("boom")).unwrap(),
        r#"{"log":{"time":"(+1500usec)","code":7,"level":1,"value":"boom"}}"#
    );
    assert_eq!(
        r.format(&TraceRecord::Print { text: "hi".into() }).unwrap(),
        r#"{"log":{"value":"hi"}}"#
    );
    assert_eq!(
        r.format(&stop_time()).unwrap(),
        r#"{"log":{"time":"(+25msec)","value":"loop"}}"#
    );
}

#[test]
fn json_unsigned_data_is_little_endian_hex() {
    let r = json();
    assert_eq!(
        r.format(&data(DataValues::U16(vec![0x1234, 0x00ff]), "w")).unwrap(),
        r#"{"log":{"time":"(+20usec)","value":"w","data":"3412ff00"}}"#
    );
    assert_eq!(
        r.format(&data(DataValues::U8(vec![0xab, 0x01]), "b")).unwrap(),
        r#"{"log":{"time":"(+20usec)","value":"b","data":"ab01"}}"#
    );
}

#[test]
fn json_signed_data_is_an_array() {
    let r = json();
    assert_eq!(
        r.format(&data(DataValues::I8(vec![-1, 2]), "s")).unwrap(),
        r#"{"log":{"time":"(+20usec)","value":"s","data":[-1,2]}}"#
    );
}

#[test]
fn json_escapes_text_and_keeps_last_answer() {
    let out = SharedBuffer::new();
    let mut r = JsonRenderer::new(out.clone()).with_units(TimeUnits::Auto);
    r.render(&TraceRecord::Print {
        text: "say \"hi\"".into(),
    })
    .unwrap();
    assert_eq!(r.last_answer(), r#"{"log":{"value":"say \"hi\""}}"#);
    assert_eq!(out.lines(), vec![r.last_answer().to_string()]);
}
