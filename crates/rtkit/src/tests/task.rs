use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::channel::{Release, Timeout};
use crate::envelope::{Envelope, MemoryRegion, MSG_END_TASK};
use crate::task::{Task, TaskConfig, TaskContext, TaskError, TaskExit, TaskState};

const MSG_ECHO: u16 = 1;

fn echo_body(flag: Arc<AtomicBool>) -> impl FnMut(&mut TaskContext) + Send + 'static {
    move |ctx: &mut TaskContext| {
        while let Some(env) = ctx.receive(Timeout::Forever) {
            match env.kind {
                MSG_END_TASK => break,
                MSG_ECHO => flag.store(true, Ordering::SeqCst),
                _ => {}
            }
        }
    }
}

fn wait_for(limit: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = std::time::Instant::now() + limit;
    while !cond() {
        if std::time::Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    true
}

#[test]
fn echo_then_terminate() {
    let flag = Arc::new(AtomicBool::new(false));
    let task = Task::new();
    assert_eq!(task.state(), TaskState::Uninitialized);

    task.init(
        TaskConfig::new("echo").with_queue_len(1),
        echo_body(flag.clone()),
    )
    .unwrap();
    assert!(task.is_running());

    task.send_cmd(MSG_ECHO, 0, 0, Timeout::Forever).unwrap();
    assert!(wait_for(Duration::from_secs(2), || flag.load(Ordering::SeqCst)));

    task.send_cmd(MSG_END_TASK, 0, 0, Timeout::Forever).unwrap();
    task.join().unwrap();
    assert!(!task.is_running());
    assert_eq!(task.state(), TaskState::Terminated);
}

#[test]
fn init_is_single_use() {
    let task = Task::spawn(TaskConfig::new("once"), |ctx: &mut TaskContext| {
        ctx.receive(Timeout::Forever);
    })
    .unwrap();
    let second = task.init(TaskConfig::new("twice"), |_: &mut TaskContext| {});
    assert!(matches!(second, Err(TaskError::AlreadyInitialized)));

    task.send_cmd(MSG_END_TASK, 0, 0, Timeout::Forever).unwrap();
    task.join().unwrap();
}

#[test]
fn invalid_config_is_rejected() {
    let task = Task::new();
    let err = task
        .init(TaskConfig::new("a-name-that-is-far-too-long"), |_: &mut TaskContext| {})
        .unwrap_err();
    assert!(matches!(err, TaskError::InvalidConfig("name length")));
    let err = task
        .init(TaskConfig::new("tiny").with_stack_size(16), |_: &mut TaskContext| {})
        .unwrap_err();
    assert!(matches!(err, TaskError::InvalidConfig("stack size")));
    assert_eq!(task.state(), TaskState::Uninitialized);
}

#[test]
fn send_to_uninitialized_task_hands_envelope_back() {
    let task = Task::new();
    let env = Envelope::allocate(3, 8, MemoryRegion::Default).unwrap();
    let err = task.send_back(env, Timeout::Immediate, Release::Keep).unwrap_err();
    assert_eq!(err.into_envelope().unwrap().kind, 3);
}

#[test]
fn notify_bits_accompany_each_send() {
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = seen.clone();
    let task = Task::spawn(
        TaskConfig::new("notified").with_notify_bits(0b10),
        move |ctx: &mut TaskContext| loop {
            if ctx.wait_notification(0b10, Timeout::Forever).is_some() {
                counter.fetch_add(1, Ordering::SeqCst);
            }
            if let Some(env) = ctx.receive(Timeout::Immediate) {
                if env.kind == MSG_END_TASK {
                    break;
                }
            }
        },
    )
    .unwrap();

    task.send_cmd(42, 0, 0, Timeout::Forever).unwrap();
    assert!(wait_for(Duration::from_secs(2), || seen.load(Ordering::SeqCst) >= 1));
    task.send_front(
        Envelope::command(MSG_END_TASK, 0, 0),
        Timeout::Forever,
        Release::OnFailure,
    )
    .unwrap();
    task.join().unwrap();
}

#[test]
fn parked_unit_reports_not_running() {
    let task = Task::spawn(
        TaskConfig::new("parked").with_exit(TaskExit::Park),
        |ctx: &mut TaskContext| {
            ctx.receive(Timeout::Forever);
        },
    )
    .unwrap();
    task.send_cmd(MSG_END_TASK, 0, 0, Timeout::Forever).unwrap();
    assert!(task.wait_terminated(Duration::from_secs(2)));
    assert!(!task.is_running());
    assert!(task.send_cmd(1, 0, 0, Timeout::Immediate).is_err());
}

#[test]
fn pending_envelopes_are_released_at_teardown() {
    let task = Task::spawn(TaskConfig::new("drop").with_queue_len(4), |ctx: &mut TaskContext| {
        ctx.receive(Timeout::Forever);
    })
    .unwrap();
    for kind in 0..3u16 {
        let env = Envelope::allocate(kind + 10, 16, MemoryRegion::Secondary).unwrap();
        let _ = task.send_back(env, Timeout::Forever, Release::OnFailure);
    }
    task.join().unwrap();
    assert!(!task.is_running());
}
