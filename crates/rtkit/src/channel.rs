//! Bounded FIFO channel of [`Envelope`]s.
//!
//! The channel mirrors an RTOS queue: capacity is fixed at creation, back
//! inserts keep FIFO order, front inserts jump the queue, and every blocking
//! call takes a [`Timeout`]. The `*_from_isr` variants never wait and report
//! whether a blocked receiver was woken so the caller can request a yield.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use thiserror::Error;

use crate::envelope::Envelope;

/// How long a channel operation may wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    /// Fail immediately instead of waiting.
    Immediate,
    /// Wait at most the given duration.
    After(Duration),
    /// Wait until the operation can complete.
    Forever,
}

impl Timeout {
    /// Shorthand for `Timeout::After(Duration::from_millis(ms))`.
    pub const fn millis(ms: u64) -> Self {
        if ms == 0 {
            Self::Immediate
        } else {
            Self::After(Duration::from_millis(ms))
        }
    }

    fn deadline(self) -> Option<Instant> {
        match self {
            Self::After(duration) => Instant::now().checked_add(duration),
            _ => None,
        }
    }
}

impl From<Duration> for Timeout {
    fn from(duration: Duration) -> Self {
        if duration.is_zero() {
            Self::Immediate
        } else {
            Self::After(duration)
        }
    }
}

/// What to do with a heap payload when a send fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    /// Drop the envelope (and its payload) on failure.
    OnFailure,
    /// Hand the envelope back inside the error.
    Keep,
}

/// Outcome of an interrupt-context send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IsrSend {
    /// A receiver was blocked and has been woken; the caller should yield.
    pub yield_requested: bool,
}

/// Channel send failure.
#[derive(Debug, Error)]
pub enum SendError {
    /// The channel stayed full for the whole timeout.
    #[error("channel full")]
    Full(Option<Envelope>),
    /// The channel has been closed by its owner.
    #[error("channel closed")]
    Closed(Option<Envelope>),
}

impl SendError {
    /// Returns the envelope if it was kept rather than released.
    pub fn into_envelope(self) -> Option<Envelope> {
        match self {
            Self::Full(env) | Self::Closed(env) => env,
        }
    }

    pub fn is_full(&self) -> bool {
        matches!(self, Self::Full(_))
    }
}

struct Inner {
    queue: VecDeque<Envelope>,
    closed: bool,
    waiting_receivers: usize,
}

/// Bounded multi-producer, single-consumer envelope queue.
pub struct Channel {
    capacity: usize,
    inner: Mutex<Inner>,
    not_empty: Condvar,
    not_full: Condvar,
}

#[derive(Clone, Copy)]
enum End {
    Back,
    Front,
}

impl Channel {
    /// Creates a channel holding at most `capacity` envelopes.
    pub fn new(capacity: usize) -> Self {
        debug_assert!(capacity > 0, "channel capacity must be positive");
        Self {
            capacity,
            inner: Mutex::new(Inner {
                queue: VecDeque::with_capacity(capacity),
                closed: false,
                waiting_receivers: 0,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of queued envelopes.
    pub fn len(&self) -> usize {
        self.inner.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Appends an envelope, waiting up to `timeout` for space.
    pub fn send_back(
        &self,
        envelope: Envelope,
        timeout: Timeout,
        release: Release,
    ) -> Result<(), SendError> {
        self.send(envelope, timeout, release, End::Back)
    }

    /// Inserts an envelope at the head so it is received next.
    pub fn send_front(
        &self,
        envelope: Envelope,
        timeout: Timeout,
        release: Release,
    ) -> Result<(), SendError> {
        self.send(envelope, timeout, release, End::Front)
    }

    /// Interrupt-context append. Never waits; a full channel drops the envelope.
    pub fn send_back_from_isr(&self, envelope: Envelope) -> Result<IsrSend, SendError> {
        self.send_from_isr(envelope, End::Back)
    }

    /// Interrupt-context head insert. Never waits; a full channel drops the envelope.
    pub fn send_front_from_isr(&self, envelope: Envelope) -> Result<IsrSend, SendError> {
        self.send_from_isr(envelope, End::Front)
    }

    /// Removes the oldest envelope, waiting up to `timeout` for one to arrive.
    pub fn receive(&self, timeout: Timeout) -> Option<Envelope> {
        let deadline = timeout.deadline();
        let mut inner = self.inner.lock();
        loop {
            if let Some(envelope) = inner.queue.pop_front() {
                drop(inner);
                self.not_full.notify_one();
                return Some(envelope);
            }
            if inner.closed {
                return None;
            }
            inner.waiting_receivers += 1;
            let timed_out = match (timeout, deadline) {
                (Timeout::Immediate, _) => true,
                (Timeout::Forever, _) | (Timeout::After(_), None) => {
                    self.not_empty.wait(&mut inner);
                    false
                }
                (Timeout::After(_), Some(deadline)) => {
                    self.not_empty.wait_until(&mut inner, deadline).timed_out()
                }
            };
            inner.waiting_receivers -= 1;
            if timed_out {
                return inner.queue.pop_front().inspect(|_| {
                    self.not_full.notify_one();
                });
            }
        }
    }

    /// Closes the channel and wakes every blocked party.
    ///
    /// Queued envelopes remain receivable; new sends fail.
    pub fn close(&self) {
        self.inner.lock().closed = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// Drops every queued envelope, releasing owned payloads.
    pub fn drain(&self) -> usize {
        let drained: Vec<Envelope> = self.inner.lock().queue.drain(..).collect();
        self.not_full.notify_all();
        drained.len()
    }

    fn send(
        &self,
        envelope: Envelope,
        timeout: Timeout,
        release: Release,
        end: End,
    ) -> Result<(), SendError> {
        let deadline = timeout.deadline();
        let mut inner = self.inner.lock();
        loop {
            if inner.closed {
                return Err(SendError::Closed(keep(envelope, release)));
            }
            if inner.queue.len() < self.capacity {
                push(&mut inner.queue, envelope, end);
                drop(inner);
                self.not_empty.notify_one();
                return Ok(());
            }
            let timed_out = match (timeout, deadline) {
                (Timeout::Immediate, _) => true,
                (Timeout::Forever, _) | (Timeout::After(_), None) => {
                    self.not_full.wait(&mut inner);
                    false
                }
                (Timeout::After(_), Some(deadline)) => {
                    self.not_full.wait_until(&mut inner, deadline).timed_out()
                }
            };
            if timed_out && inner.queue.len() >= self.capacity {
                return Err(SendError::Full(keep(envelope, release)));
            }
        }
    }

    fn send_from_isr(&self, envelope: Envelope, end: End) -> Result<IsrSend, SendError> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(SendError::Closed(None));
        }
        if inner.queue.len() >= self.capacity {
            return Err(SendError::Full(None));
        }
        push(&mut inner.queue, envelope, end);
        let yield_requested = inner.waiting_receivers > 0;
        drop(inner);
        self.not_empty.notify_one();
        Ok(IsrSend { yield_requested })
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        let pending = self.inner.get_mut().queue.len();
        if pending > 0 {
            log::debug!("channel dropped with {pending} pending envelopes");
        }
    }
}

fn push(queue: &mut VecDeque<Envelope>, envelope: Envelope, end: End) {
    match end {
        End::Back => queue.push_back(envelope),
        End::Front => queue.push_front(envelope),
    }
}

fn keep(envelope: Envelope, release: Release) -> Option<Envelope> {
    match release {
        Release::OnFailure => None,
        Release::Keep => Some(envelope),
    }
}
