//! Tasks: one execution unit paired with one owned [`Channel`].
//!
//! A [`Task`] starts out uninitialized. [`Task::init`] creates the channel and
//! spawns the execution unit running the supplied [`TaskBody`]. When the body
//! returns, the channel is closed and dropped, so [`Task::is_running`] reports
//! `false` even if the unit itself is parked rather than terminated.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use thiserror::Error;

use crate::channel::{Channel, IsrSend, Release, SendError, Timeout};
use crate::envelope::{Envelope, MemoryRegion};
use crate::unit::{self, UnitHandle};

/// Longest accepted task name, in bytes.
pub const MAX_NAME_LEN: usize = 16;
/// Smallest accepted stack budget, in bytes.
pub const MIN_STACK_SIZE: usize = 768;
/// Highest accepted priority.
pub const MAX_PRIORITY: u8 = 25;
/// Host threads never get less stack than this, whatever the budget says.
pub const HOST_STACK_FLOOR: usize = 256 * 1024;

/// Scheduling priority of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct TaskPriority(pub u8);

/// Core the execution unit should be pinned to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CoreAffinity {
    #[default]
    Any,
    Core(u8),
}

/// What the execution unit does once its body has returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskExit {
    /// Delete the unit.
    Terminate,
    /// Keep the unit alive in an idle loop.
    Park,
}

impl Default for TaskExit {
    fn default() -> Self {
        if cfg!(feature = "park-on-exit") {
            Self::Park
        } else {
            Self::Terminate
        }
    }
}

/// Lifecycle of a [`Task`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Uninitialized,
    Running,
    Terminated,
}

const STATE_UNINIT: u8 = 0;
const STATE_RUNNING: u8 = 1;
const STATE_TERMINATED: u8 = 2;

/// Configuration used by [`Task::init`].
#[derive(Debug, Clone)]
pub struct TaskConfig {
    pub name: String,
    /// Stack budget in bytes.
    pub stack_size: usize,
    pub priority: TaskPriority,
    /// Channel capacity.
    pub queue_len: usize,
    pub affinity: CoreAffinity,
    /// Bits set in the unit's notification word after every successful send.
    pub notify_bits: u32,
    pub exit: TaskExit,
}

impl TaskConfig {
    /// Creates a configuration with a 4 KiB stack, priority 1 and a queue of 10.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stack_size: 4096,
            priority: TaskPriority(1),
            queue_len: 10,
            affinity: CoreAffinity::Any,
            notify_bits: 0,
            exit: TaskExit::default(),
        }
    }

    pub fn with_stack_size(mut self, size: usize) -> Self {
        self.stack_size = size;
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = TaskPriority(priority);
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

    /// Notify the task with `bits` after each successful send.
    pub fn with_notify_bits(mut self, bits: u32) -> Self {
        self.notify_bits = bits;
        self
    }

    pub fn with_exit(mut self, exit: TaskExit) -> Self {
        self.exit = exit;
        self
    }

    /// Checks name length, stack size, priority and queue length.
    pub fn validate(&self) -> Result<(), TaskError> {
        if self.name.is_empty() || self.name.len() >= MAX_NAME_LEN {
            return Err(TaskError::InvalidConfig("name length"));
        }
        if self.stack_size < MIN_STACK_SIZE {
            return Err(TaskError::InvalidConfig("stack size"));
        }
        if self.priority.0 > MAX_PRIORITY {
            return Err(TaskError::InvalidConfig("priority"));
        }
        if self.queue_len == 0 {
            return Err(TaskError::InvalidConfig("queue length"));
        }
        Ok(())
    }
}

/// Task lifecycle errors.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("task already initialized")]
    AlreadyInitialized,
    #[error("invalid task configuration: {0}")]
    InvalidConfig(&'static str),
    #[error("failed to spawn execution unit: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("task execution unit panicked")]
    Panicked,
}

/// The processing loop of a task.
///
/// `run` must keep receiving from the context and return to terminate.
pub trait TaskBody: Send + 'static {
    fn run(&mut self, ctx: &mut TaskContext);
}

impl<F> TaskBody for F
where
    F: FnMut(&mut TaskContext) + Send + 'static,
{
    fn run(&mut self, ctx: &mut TaskContext) {
        self(ctx)
    }
}

/// Receiving side handed to a running [`TaskBody`].
pub struct TaskContext {
    channel: Arc<Channel>,
    unit: UnitHandle,
}

impl TaskContext {
    /// Receives the next envelope, waiting up to `timeout`.
    pub fn receive(&self, timeout: Timeout) -> Option<Envelope> {
        self.channel.receive(timeout)
    }

    /// Waits on this unit's notification word.
    pub fn wait_notification(&self, clear_on_exit: u32, timeout: Timeout) -> Option<u32> {
        unit::wait_notification(clear_on_exit, timeout)
    }

    pub fn unit(&self) -> &UnitHandle {
        &self.unit
    }

    pub fn name(&self) -> &str {
        self.unit.name()
    }

    /// Number of envelopes waiting in the channel.
    pub fn pending(&self) -> usize {
        self.channel.len()
    }
}

struct Shared {
    config: TaskConfig,
    unit: UnitHandle,
    channel: Mutex<Option<Arc<Channel>>>,
    state: AtomicU8,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Shared {
    fn channel(&self) -> Option<Arc<Channel>> {
        self.channel.lock().clone()
    }

    fn teardown(&self) {
        if let Some(channel) = self.channel.lock().take() {
            channel.close();
            let dropped = channel.drain();
            if dropped > 0 {
                log::debug!("{}: released {dropped} unread envelopes", self.config.name);
            }
        }
        self.state.store(STATE_TERMINATED, Ordering::Release);
    }
}

/// Handle to a task. Clones refer to the same task.
#[derive(Clone, Default)]
pub struct Task {
    shared: Arc<OnceCell<Shared>>,
}

impl Task {
    /// Creates an uninitialized task.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates and initializes a task in one step.
    pub fn spawn(config: TaskConfig, body: impl TaskBody) -> Result<Self, TaskError> {
        let task = Self::new();
        task.init(config, body)?;
        Ok(task)
    }

    /// Creates the channel and starts the execution unit. Callable once.
    pub fn init(&self, config: TaskConfig, body: impl TaskBody) -> Result<(), TaskError> {
        config.validate()?;
        if self.shared.get().is_some() {
            return Err(TaskError::AlreadyInitialized);
        }

        let channel = Arc::new(Channel::new(config.queue_len));
        let unit = UnitHandle::new(&config.name);
        let shared = Shared {
            config: config.clone(),
            unit: unit.clone(),
            channel: Mutex::new(Some(channel.clone())),
            state: AtomicU8::new(STATE_RUNNING),
            thread: Mutex::new(None),
        };
        self.shared
            .set(shared)
            .map_err(|_| TaskError::AlreadyInitialized)?;

        log::debug!(
            "{}: starting (stack {}, {:?}, queue {}, {:?})",
            config.name,
            config.stack_size,
            config.priority,
            config.queue_len,
            config.affinity
        );

        let cell = self.shared.clone();
        let exit = config.exit;
        let spawned = std::thread::Builder::new()
            .name(config.name.clone())
            .stack_size(config.stack_size.max(HOST_STACK_FLOOR))
            .spawn(move || run_unit(cell, channel, unit, body, exit));

        match spawned {
            Ok(handle) => {
                if let Some(shared) = self.shared.get() {
                    *shared.thread.lock() = Some(handle);
                }
                Ok(())
            }
            Err(err) => {
                if let Some(shared) = self.shared.get() {
                    shared.teardown();
                }
                Err(TaskError::Spawn(err))
            }
        }
    }

    pub fn state(&self) -> TaskState {
        match self.shared.get().map(|s| s.state.load(Ordering::Acquire)) {
            None | Some(STATE_UNINIT) => TaskState::Uninitialized,
            Some(STATE_RUNNING) => TaskState::Running,
            Some(_) => TaskState::Terminated,
        }
    }

    /// True while the task's channel exists.
    ///
    /// This says nothing about the execution unit: a parked unit whose body
    /// has returned is not running.
    pub fn is_running(&self) -> bool {
        self.shared
            .get()
            .is_some_and(|s| s.channel.lock().is_some())
    }

    pub fn name(&self) -> Option<&str> {
        self.shared.get().map(|s| s.config.name.as_str())
    }

    pub fn config(&self) -> Option<&TaskConfig> {
        self.shared.get().map(|s| &s.config)
    }

    /// Handle used by timers and other units to notify this task.
    pub fn unit(&self) -> Option<UnitHandle> {
        self.shared.get().map(|s| s.unit.clone())
    }

    pub fn send_back(
        &self,
        envelope: Envelope,
        timeout: Timeout,
        release: Release,
    ) -> Result<(), SendError> {
        self.send_with(envelope, release, |ch, env| ch.send_back(env, timeout, release))
    }

    pub fn send_front(
        &self,
        envelope: Envelope,
        timeout: Timeout,
        release: Release,
    ) -> Result<(), SendError> {
        self.send_with(envelope, release, |ch, env| ch.send_front(env, timeout, release))
    }

    pub fn send_back_from_isr(&self, envelope: Envelope) -> Result<IsrSend, SendError> {
        self.send_from_isr_with(envelope, |ch, env| ch.send_back_from_isr(env))
    }

    pub fn send_front_from_isr(&self, envelope: Envelope) -> Result<IsrSend, SendError> {
        self.send_from_isr_with(envelope, |ch, env| ch.send_front_from_isr(env))
    }

    /// Sends a fully inline command envelope.
    pub fn send_cmd(
        &self,
        kind: u16,
        short_param: u16,
        id: u32,
        timeout: Timeout,
    ) -> Result<(), SendError> {
        self.send_back(
            Envelope::command(kind, short_param, id),
            timeout,
            Release::OnFailure,
        )
    }

    /// Allocates an envelope body for a message destined to this task.
    pub fn allocate_payload(&self, kind: u16, size: u16, region: MemoryRegion) -> Option<Envelope> {
        Envelope::allocate(kind, size, region)
    }

    /// Waits for the execution unit to finish.
    ///
    /// Never returns for a unit configured with [`TaskExit::Park`].
    pub fn join(&self) -> Result<(), TaskError> {
        let handle = self.shared.get().and_then(|s| s.thread.lock().take());
        match handle {
            Some(handle) => handle.join().map_err(|_| TaskError::Panicked),
            None => Ok(()),
        }
    }

    /// Waits up to `limit` for the task to reach [`TaskState::Terminated`].
    pub fn wait_terminated(&self, limit: Duration) -> bool {
        let deadline = std::time::Instant::now() + limit;
        while self.state() != TaskState::Terminated {
            if std::time::Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        true
    }

    fn send_with(
        &self,
        envelope: Envelope,
        release: Release,
        send: impl FnOnce(&Channel, Envelope) -> Result<(), SendError>,
    ) -> Result<(), SendError> {
        let Some(shared) = self.shared.get() else {
            return Err(closed(envelope, release));
        };
        let Some(channel) = shared.channel() else {
            return Err(closed(envelope, release));
        };
        let kind = envelope.kind;
        match send(&channel, envelope) {
            Ok(()) => {
                if shared.config.notify_bits != 0 {
                    shared.unit.notify(shared.config.notify_bits);
                }
                Ok(())
            }
            Err(err) => {
                log::warn!("{}: send of kind {kind} failed: {err}", shared.config.name);
                Err(err)
            }
        }
    }

    fn send_from_isr_with(
        &self,
        envelope: Envelope,
        send: impl FnOnce(&Channel, Envelope) -> Result<IsrSend, SendError>,
    ) -> Result<IsrSend, SendError> {
        let Some(shared) = self.shared.get() else {
            return Err(SendError::Closed(None));
        };
        let Some(channel) = shared.channel() else {
            return Err(SendError::Closed(None));
        };
        let kind = envelope.kind;
        match send(&channel, envelope) {
            Ok(mut sent) => {
                if shared.config.notify_bits != 0 {
                    let notified = shared.unit.notify_from_isr(shared.config.notify_bits);
                    sent.yield_requested |= notified.yield_requested;
                }
                Ok(sent)
            }
            Err(err) => {
                log::warn!("{}: isr send of kind {kind} failed: {err}", shared.config.name);
                Err(err)
            }
        }
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name())
            .field("state", &self.state())
            .finish()
    }
}

fn closed(envelope: Envelope, release: Release) -> SendError {
    match release {
        Release::OnFailure => SendError::Closed(None),
        Release::Keep => SendError::Closed(Some(envelope)),
    }
}

fn run_unit(
    cell: Arc<OnceCell<Shared>>,
    channel: Arc<Channel>,
    unit: UnitHandle,
    mut body: impl TaskBody,
    exit: TaskExit,
) {
    unit::bind(unit.clone());
    let mut ctx = TaskContext { channel, unit };
    body.run(&mut ctx);
    drop(ctx);

    if let Some(shared) = cell.get() {
        shared.teardown();
        log::debug!("{}: exit", shared.config.name);
    }
    drop(cell);

    if exit == TaskExit::Park {
        loop {
            std::thread::sleep(Duration::from_secs(1));
        }
    }
}
