//! Heap payloads are released exactly once and static payloads never.
//!
//! A wrapping allocator counts deallocations of one watched block.

use std::alloc::{GlobalAlloc, Layout, System};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;
use rtkit::{Channel, Envelope, MemoryRegion, Release, SendError, Timeout};

struct CountingAllocator;

static WATCHED: AtomicUsize = AtomicUsize::new(0);
static RELEASED: AtomicUsize = AtomicUsize::new(0);

unsafe impl GlobalAlloc for CountingAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        unsafe { System.alloc(layout) }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        if ptr as usize == WATCHED.load(Ordering::SeqCst) {
            RELEASED.fetch_add(1, Ordering::SeqCst);
        }
        unsafe { System.dealloc(ptr, layout) }
    }
}

#[global_allocator]
static ALLOC: CountingAllocator = CountingAllocator;

// Tests share the watch slot.
static SERIAL: Mutex<()> = parking_lot::const_mutex(());

fn watch(ptr: *const u8) {
    RELEASED.store(0, Ordering::SeqCst);
    WATCHED.store(ptr as usize, Ordering::SeqCst);
}

fn released() -> usize {
    RELEASED.load(Ordering::SeqCst)
}

fn unwatch() {
    WATCHED.store(0, Ordering::SeqCst);
}

fn owned(kind: u16) -> Envelope {
    let envelope = Envelope::allocate(kind, 4093, MemoryRegion::Default).unwrap();
    watch(envelope.body().unwrap().as_ptr());
    envelope
}

fn full_channel() -> Channel {
    let channel = Channel::new(1);
    channel
        .send_back(Envelope::command(1, 0, 0), Timeout::Immediate, Release::Keep)
        .unwrap();
    channel
}

#[test]
fn failed_send_with_release_frees_the_body_once() {
    let _serial = SERIAL.lock();
    let channel = full_channel();

    let err = channel
        .send_back(owned(5), Timeout::Immediate, Release::OnFailure)
        .unwrap_err();
    assert!(matches!(err, SendError::Full(None)));
    assert_eq!(released(), 1);

    drop(err);
    drop(channel);
    assert_eq!(released(), 1);
    unwatch();
}

#[test]
fn failed_send_with_keep_returns_the_body_intact() {
    let _serial = SERIAL.lock();
    let channel = full_channel();

    let err = channel
        .send_front(owned(5), Timeout::Immediate, Release::Keep)
        .unwrap_err();
    assert_eq!(released(), 0);

    let returned = err.into_envelope().unwrap();
    assert_eq!(returned.kind, 5);
    assert_eq!(released(), 0);

    drop(returned);
    assert_eq!(released(), 1);
    unwatch();
}

#[test]
fn receiver_releases_the_body_on_drop() {
    let _serial = SERIAL.lock();
    let channel = Arc::new(Channel::new(2));

    channel
        .send_back(owned(6), Timeout::Immediate, Release::OnFailure)
        .unwrap();
    assert_eq!(released(), 0);

    let consumer = {
        let channel = channel.clone();
        thread::spawn(move || {
            let envelope = channel.receive(Timeout::Forever).unwrap();
            assert!(envelope.releases_payload());
            envelope.kind
        })
    };
    assert_eq!(consumer.join().unwrap(), 6);
    assert_eq!(released(), 1);
    unwatch();
}

#[test]
fn static_text_is_never_released() {
    let _serial = SERIAL.lock();
    static TEXT: &str = "sensor irq";
    watch(TEXT.as_ptr());

    let channel = Channel::new(1);
    channel
        .send_front_from_isr(Envelope::with_static(7, 0, TEXT))
        .unwrap();
    let received = channel.receive(Timeout::Immediate).unwrap();
    assert!(!received.releases_payload());
    drop(received);

    let rejected = full_channel()
        .send_back(Envelope::with_static(7, 0, TEXT), Timeout::Immediate, Release::OnFailure)
        .unwrap_err();
    drop(rejected);

    assert_eq!(released(), 0);
    unwatch();
}
