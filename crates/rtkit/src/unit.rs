//! Execution units and their notification words.
//!
//! Every execution unit owns a 32-bit notification value that other units,
//! timers and interrupt handlers can set bits in. A unit blocks on its own
//! word with [`wait_notification`] or [`wait_bits`].

use std::cell::RefCell;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Condvar, Mutex};

use crate::channel::{IsrSend, Timeout};

static NEXT_UNIT_ID: AtomicU32 = AtomicU32::new(1);

thread_local! {
    static CURRENT: RefCell<Option<UnitHandle>> = const { RefCell::new(None) };
}

/// Identifier of an execution unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UnitId(pub u32);

struct NotifyState {
    value: u32,
    waiting: usize,
}

struct UnitInner {
    id: UnitId,
    name: String,
    state: Mutex<NotifyState>,
    cond: Condvar,
}

/// Handle to an execution unit, used to deliver notifications.
#[derive(Clone)]
pub struct UnitHandle {
    inner: Arc<UnitInner>,
}

impl UnitHandle {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            inner: Arc::new(UnitInner {
                id: UnitId(NEXT_UNIT_ID.fetch_add(1, Ordering::Relaxed)),
                name: name.to_owned(),
                state: Mutex::new(NotifyState {
                    value: 0,
                    waiting: 0,
                }),
                cond: Condvar::new(),
            }),
        }
    }

    pub fn id(&self) -> UnitId {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Sets `bits` in the unit's notification word.
    pub fn notify(&self, bits: u32) {
        self.set_bits(bits);
    }

    /// Interrupt-context notify; reports whether a waiting unit was woken.
    pub fn notify_from_isr(&self, bits: u32) -> IsrSend {
        IsrSend {
            yield_requested: self.set_bits(bits),
        }
    }

    /// Clears `bits` without waiting.
    pub fn clear(&self, bits: u32) {
        self.inner.state.lock().value &= !bits;
    }

    /// Current notification word without clearing it.
    pub fn pending(&self) -> u32 {
        self.inner.state.lock().value
    }

    fn set_bits(&self, bits: u32) -> bool {
        let mut state = self.inner.state.lock();
        state.value |= bits;
        let woke = state.waiting > 0;
        drop(state);
        self.inner.cond.notify_all();
        woke
    }

    fn wait_masked(&self, mask: u32, clear_on_exit: u32, timeout: Timeout) -> Option<u32> {
        let deadline = match timeout {
            Timeout::After(duration) => Instant::now().checked_add(duration),
            _ => None,
        };
        let mut state = self.inner.state.lock();
        loop {
            if state.value & mask != 0 {
                let value = state.value;
                state.value &= !clear_on_exit;
                return Some(value);
            }
            state.waiting += 1;
            let timed_out = match (timeout, deadline) {
                (Timeout::Immediate, _) => true,
                (Timeout::After(_), Some(deadline)) => {
                    self.inner.cond.wait_until(&mut state, deadline).timed_out()
                }
                _ => {
                    self.inner.cond.wait(&mut state);
                    false
                }
            };
            state.waiting -= 1;
            if timed_out && state.value & mask == 0 {
                return None;
            }
        }
    }
}

impl PartialEq for UnitHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for UnitHandle {}

impl fmt::Debug for UnitHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnitHandle")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .finish()
    }
}

/// Returns the handle of the calling execution unit.
///
/// Threads not started through a [`Task`](crate::task::Task) get a handle on
/// first use, named after the thread.
pub fn current() -> UnitHandle {
    CURRENT.with(|slot| {
        slot.borrow_mut()
            .get_or_insert_with(|| {
                let thread = std::thread::current();
                UnitHandle::new(thread.name().unwrap_or("unnamed"))
            })
            .clone()
    })
}

pub(crate) fn bind(handle: UnitHandle) {
    CURRENT.with(|slot| *slot.borrow_mut() = Some(handle));
}

/// Blocks the calling unit until any notification bit is set.
///
/// Returns the notification word as it was before `clear_on_exit` bits were
/// cleared, or `None` on timeout.
pub fn wait_notification(clear_on_exit: u32, timeout: Timeout) -> Option<u32> {
    current().wait_masked(u32::MAX, clear_on_exit, timeout)
}

/// Blocks the calling unit until one of `mask` is set, then clears those bits.
pub fn wait_bits(mask: u32, timeout: Timeout) -> Option<u32> {
    current().wait_masked(mask, mask, timeout)
}
