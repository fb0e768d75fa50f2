//! # rtkit
//!
//! Host-side rendition of a small set of RTOS wrappers: bounded message
//! channels, tasks that own one channel each, execution-unit notifications and
//! one-shot/periodic alarm timers. Execution units are OS threads.
//!
//! ## Module Overview
//! - [`envelope`] – Move-only message unit with inline or owned payloads.
//! - [`channel`]  – Bounded FIFO with timeouts and interrupt-context sends.
//! - [`unit`]     – Execution-unit handles and 32-bit notification words.
//! - [`task`]     – Single-use task lifecycle around a [`TaskBody`] loop.
//! - [`timer`]    – Millisecond software and microsecond hardware alarms.
//! - [`fifo`]     – Overwriting circular buffer.

pub mod channel;
pub mod envelope;
pub mod fifo;
pub mod task;
pub mod timer;
pub mod unit;

pub use channel::{Channel, IsrSend, Release, SendError, Timeout};
pub use envelope::{Envelope, MemoryRegion, Payload, MSG_END_TASK};
pub use fifo::FifoArray;
pub use task::{
    CoreAffinity, Task, TaskBody, TaskConfig, TaskContext, TaskError, TaskExit, TaskPriority,
    TaskState,
};
pub use timer::{AlarmTimer, Delivery, HardwareTimer, SoftwareTimer, TimerError};
pub use unit::{UnitHandle, UnitId};

#[cfg(test)]
mod tests;
