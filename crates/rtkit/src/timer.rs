//! One-shot and periodic alarms.
//!
//! Two interchangeable timers share the [`AlarmTimer`] contract:
//!
//! - [`SoftwareTimer`] ticks in milliseconds and delivers from task context.
//! - [`HardwareTimer`] ticks in microseconds and delivers from interrupt
//!   context, so expiry only ever uses the `*_from_isr` send paths.
//!
//! On expiry a timer either sets its notification bit on a unit or sends its
//! command kind to a task. One-shot alarms disarm before delivering.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};
use thiserror::Error;

use crate::channel::{Release, Timeout};
use crate::envelope::Envelope;
use crate::task::Task;
use crate::unit::{self, UnitHandle};

/// Extra time [`AlarmTimer::wait`] allows beyond the period.
pub const WAIT_MARGIN: Duration = Duration::from_millis(10);

/// Timeout used by software timers when sending to a task.
const SEND_TIMEOUT: Timeout = Timeout::millis(1);

/// How expiry reaches a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Set the notification bit on the task's unit.
    Notify,
    /// Append the command envelope to the task's channel.
    SendBack,
    /// Insert the command envelope at the head of the task's channel.
    SendFront,
}

/// Timer errors. [`TimerError::code`] gives the legacy negative status.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TimerError {
    #[error("timer not running")]
    NotRunning,
    #[error("invalid timer parameter")]
    InvalidParameter,
    #[error("timer wait timed out")]
    Timeout,
    #[error("timer service unavailable")]
    Closed,
}

impl TimerError {
    pub fn code(self) -> i32 {
        match self {
            Self::NotRunning => -1,
            Self::InvalidParameter => -2,
            Self::Timeout => -3,
            Self::Closed => -4,
        }
    }
}

/// Shared contract of software and hardware timers.
pub trait AlarmTimer {
    /// Bit (0..32) set on notification delivery.
    fn notify_bit(&self) -> u8;

    /// Mask of [`notify_bit`](Self::notify_bit); `InvalidParameter` when the
    /// bit does not fit the 32-bit notification word.
    fn notify_mask(&self) -> Result<u32, TimerError> {
        1u32.checked_shl(u32::from(self.notify_bit()))
            .ok_or(TimerError::InvalidParameter)
    }

    /// Arms the timer to notify the calling unit.
    fn start_notify(&self, period: Duration, auto_repeat: bool) -> Result<(), TimerError>;

    /// Arms the timer to signal `task` with the given delivery mode.
    fn start_message(
        &self,
        task: &Task,
        delivery: Delivery,
        period: Duration,
        auto_repeat: bool,
    ) -> Result<(), TimerError>;

    /// Disarms the timer.
    fn stop(&self) -> Result<(), TimerError>;

    fn is_running(&self) -> bool;

    /// Sleeps the calling unit for `period` using a one-shot notification.
    fn wait(&self, period: Duration) -> Result<(), TimerError> {
        let bit = self.notify_mask()?;
        unit::current().clear(bit);
        self.start_notify(period, false)?;
        let fired = unit::wait_bits(bit, Timeout::After(period + WAIT_MARGIN));
        let _ = self.stop();
        fired.map(|_| ()).ok_or(TimerError::Timeout)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FireContext {
    Task,
    Interrupt,
}

#[derive(Clone)]
enum Action {
    Notify { unit: UnitHandle, bits: u32 },
    Send { task: Task, front: bool, cmd: u16 },
}

impl Action {
    fn fire(&self, context: FireContext) {
        match (self, context) {
            (Self::Notify { unit, bits }, FireContext::Task) => unit.notify(*bits),
            (Self::Notify { unit, bits }, FireContext::Interrupt) => {
                unit.notify_from_isr(*bits);
            }
            (Self::Send { task, front, cmd }, FireContext::Task) => {
                let envelope = Envelope::command(*cmd, 0, 0);
                let _ = if *front {
                    task.send_front(envelope, SEND_TIMEOUT, Release::OnFailure)
                } else {
                    task.send_back(envelope, SEND_TIMEOUT, Release::OnFailure)
                };
            }
            (Self::Send { task, front, cmd }, FireContext::Interrupt) => {
                let envelope = Envelope::command(*cmd, 0, 0);
                let _ = if *front {
                    task.send_front_from_isr(envelope)
                } else {
                    task.send_back_from_isr(envelope)
                };
            }
        }
    }
}

struct Arming {
    period: Duration,
    auto_repeat: bool,
    deadline: Instant,
    action: Action,
}

#[derive(Default)]
struct AlarmState {
    armed: Option<Arming>,
    /// Bumped by every arm and disarm. An expiry fires only if the
    /// generation it was taken under is still current.
    generation: u64,
    shutdown: bool,
}

struct AlarmShared {
    state: Mutex<AlarmState>,
    cond: Condvar,
    /// Held across the generation check and the delivery.
    firing: Mutex<()>,
}

/// Worker-backed alarm shared by both timer flavours.
struct Alarm {
    shared: Arc<AlarmShared>,
    worker: Option<JoinHandle<()>>,
}

impl Alarm {
    fn new(name: &str, context: FireContext) -> Self {
        let shared = Arc::new(AlarmShared {
            state: Mutex::new(AlarmState::default()),
            cond: Condvar::new(),
            firing: Mutex::new(()),
        });
        let worker_shared = shared.clone();
        let worker = std::thread::Builder::new()
            .name(name.to_owned())
            .spawn(move || alarm_loop(&worker_shared, context));
        let worker = match worker {
            Ok(handle) => Some(handle),
            Err(err) => {
                log::error!("{name}: timer service has not been created: {err}");
                None
            }
        };
        Self { shared, worker }
    }

    fn arm(&self, period: Duration, auto_repeat: bool, action: Action) -> Result<(), TimerError> {
        if self.worker.is_none() {
            return Err(TimerError::Closed);
        }
        let mut state = self.shared.state.lock();
        state.generation = state.generation.wrapping_add(1);
        state.armed = Some(Arming {
            period,
            auto_repeat,
            deadline: Instant::now() + period,
            action,
        });
        drop(state);
        self.shared.cond.notify_all();
        Ok(())
    }

    /// Cancels the alarm. An expiry already being delivered completes before
    /// this returns; none is delivered afterwards.
    fn disarm(&self) -> Result<(), TimerError> {
        let was_armed = {
            let mut state = self.shared.state.lock();
            state.generation = state.generation.wrapping_add(1);
            state.armed.take().is_some()
        };
        self.shared.cond.notify_all();
        drop(self.shared.firing.lock());
        if was_armed {
            Ok(())
        } else {
            Err(TimerError::NotRunning)
        }
    }

    fn is_armed(&self) -> bool {
        self.shared.state.lock().armed.is_some()
    }
}

impl Drop for Alarm {
    fn drop(&mut self) {
        {
            let mut state = self.shared.state.lock();
            state.armed = None;
            state.shutdown = true;
        }
        self.shared.cond.notify_all();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn alarm_loop(shared: &AlarmShared, context: FireContext) {
    let mut state = shared.state.lock();
    loop {
        if state.shutdown {
            return;
        }
        let Some(deadline) = state.armed.as_ref().map(|a| a.deadline) else {
            shared.cond.wait(&mut state);
            continue;
        };
        if Instant::now() < deadline {
            shared.cond.wait_until(&mut state, deadline);
            continue;
        }
        if let Some((action, generation)) = expire(&mut state, Instant::now()) {
            MutexGuard::unlocked(&mut state, || {
                let _firing = shared.firing.lock();
                if shared.state.lock().generation == generation {
                    action.fire(context);
                }
            });
        }
    }
}

/// Takes the due expiry. A periodic alarm that fell behind is rebased on
/// `now` instead of replaying the missed periods.
fn expire(state: &mut AlarmState, now: Instant) -> Option<(Action, u64)> {
    let generation = state.generation;
    let arming = state.armed.as_mut()?;
    let action = arming.action.clone();
    if arming.auto_repeat {
        arming.deadline = (arming.deadline + arming.period).max(now);
    } else {
        state.armed = None;
    }
    Some((action, generation))
}

struct TimerCore {
    notify_bit: u8,
    timer_cmd: u16,
    tick: Duration,
    alarm: Alarm,
}

impl TimerCore {
    fn new(name: &str, notify_bit: u8, timer_cmd: u16, tick: Duration, context: FireContext) -> Self {
        if notify_bit >= 32 {
            log::warn!("{name}: notification bit {notify_bit} out of range");
        }
        Self {
            notify_bit,
            timer_cmd,
            tick,
            alarm: Alarm::new(name, context),
        }
    }

    fn bits(&self) -> Result<u32, TimerError> {
        1u32.checked_shl(u32::from(self.notify_bit))
            .ok_or(TimerError::InvalidParameter)
    }

    /// Rounds `period` down to whole ticks; zero ticks is rejected.
    fn quantize(&self, period: Duration) -> Result<Duration, TimerError> {
        let tick_ns = self.tick.as_nanos();
        let ticks = period.as_nanos() / tick_ns;
        if ticks == 0 {
            return Err(TimerError::InvalidParameter);
        }
        let nanos = u64::try_from(ticks * tick_ns).map_err(|_| TimerError::InvalidParameter)?;
        Ok(Duration::from_nanos(nanos))
    }

    fn start_notify(&self, period: Duration, auto_repeat: bool) -> Result<(), TimerError> {
        let bits = self.bits()?;
        let period = self.quantize(period)?;
        let _ = self.alarm.disarm();
        self.alarm.arm(
            period,
            auto_repeat,
            Action::Notify {
                unit: unit::current(),
                bits,
            },
        )
    }

    fn start_message(
        &self,
        task: &Task,
        delivery: Delivery,
        period: Duration,
        auto_repeat: bool,
    ) -> Result<(), TimerError> {
        let period = self.quantize(period)?;
        let action = match delivery {
            Delivery::Notify => Action::Notify {
                unit: task.unit().ok_or(TimerError::InvalidParameter)?,
                bits: self.bits()?,
            },
            Delivery::SendBack | Delivery::SendFront => {
                if task.unit().is_none() {
                    return Err(TimerError::InvalidParameter);
                }
                Action::Send {
                    task: task.clone(),
                    front: delivery == Delivery::SendFront,
                    cmd: self.timer_cmd,
                }
            }
        };
        let _ = self.alarm.disarm();
        self.alarm.arm(period, auto_repeat, action)
    }
}

macro_rules! impl_alarm_timer {
    ($ty:ty) => {
        impl AlarmTimer for $ty {
            fn notify_bit(&self) -> u8 {
                self.core.notify_bit
            }

            fn start_notify(&self, period: Duration, auto_repeat: bool) -> Result<(), TimerError> {
                self.core.start_notify(period, auto_repeat)
            }

            fn start_message(
                &self,
                task: &Task,
                delivery: Delivery,
                period: Duration,
                auto_repeat: bool,
            ) -> Result<(), TimerError> {
                self.core.start_message(task, delivery, period, auto_repeat)
            }

            fn stop(&self) -> Result<(), TimerError> {
                self.core.alarm.disarm()
            }

            fn is_running(&self) -> bool {
                self.core.alarm.is_armed()
            }
        }
    };
}

/// Millisecond-resolution timer delivering from task context.
pub struct SoftwareTimer {
    core: TimerCore,
}

impl SoftwareTimer {
    /// `notify_bit` is used for notifications, `timer_cmd` is the kind of the
    /// envelope sent on message delivery.
    pub fn new(notify_bit: u8, timer_cmd: u16) -> Self {
        Self {
            core: TimerCore::new(
                "stimer",
                notify_bit,
                timer_cmd,
                Duration::from_millis(1),
                FireContext::Task,
            ),
        }
    }
}

impl_alarm_timer!(SoftwareTimer);

/// Microsecond-resolution timer delivering from interrupt context.
pub struct HardwareTimer {
    core: TimerCore,
}

impl HardwareTimer {
    pub fn new(notify_bit: u8, timer_cmd: u16) -> Self {
        Self {
            core: TimerCore::new(
                "htimer",
                notify_bit,
                timer_cmd,
                Duration::from_micros(1),
                FireContext::Interrupt,
            ),
        }
    }
}

impl_alarm_timer!(HardwareTimer);

#[cfg(test)]
mod tests {
    use super::*;

    fn periodic(deadline: Instant, period: Duration) -> AlarmState {
        AlarmState {
            armed: Some(Arming {
                period,
                auto_repeat: true,
                deadline,
                action: Action::Notify {
                    unit: unit::current(),
                    bits: 1,
                },
            }),
            generation: 3,
            shutdown: false,
        }
    }

    #[test]
    fn stalled_periodic_alarm_is_rebased_on_now() {
        let period = Duration::from_millis(10);
        let now = Instant::now();
        let mut state = periodic(now - period * 8, period);

        let (_, generation) = expire(&mut state, now).unwrap();
        assert_eq!(generation, 3);
        let deadline = state.armed.as_ref().unwrap().deadline;
        assert_eq!(deadline, now);

        expire(&mut state, now).unwrap();
        assert_eq!(state.armed.as_ref().unwrap().deadline, now + period);
    }

    #[test]
    fn punctual_periodic_alarm_keeps_its_phase() {
        let period = Duration::from_millis(10);
        let now = Instant::now();
        let mut state = periodic(now, period);

        expire(&mut state, now).unwrap();
        assert_eq!(state.armed.as_ref().unwrap().deadline, now + period);
    }
}
