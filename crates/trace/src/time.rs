//! Elapsed-time measurement and formatting.

use std::time::Instant;

/// Display unit policy for elapsed times.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeUnits {
    /// Pick nsec/usec/msec/sec by magnitude.
    Auto,
    /// Always print microseconds.
    Micros,
}

impl Default for TimeUnits {
    fn default() -> Self {
        if cfg!(feature = "usec-time") {
            Self::Micros
        } else {
            Self::Auto
        }
    }
}

/// Formats `elapsed_us / divisor` as `"(+<value><unit>)"`.
///
/// With [`TimeUnits::Auto`] the unit is chosen from the averaged value `res`:
/// below 10 prints nanoseconds, below 10 000 microseconds, below 10 000 000
/// milliseconds, anything larger seconds. Each boundary belongs to the
/// coarser unit. A zero divisor counts as one.
pub fn format_elapsed(elapsed_us: u64, divisor: u32, units: TimeUnits) -> String {
    let n = u64::from(divisor.max(1));
    let res = elapsed_us / n;
    match units {
        TimeUnits::Micros => format!("(+{res}usec)"),
        TimeUnits::Auto if res >= 10_000_000 => format!("(+{}sec)", res / 1_000_000),
        TimeUnits::Auto if res < 10 => {
            let nanos = (elapsed_us as f64 / n as f64 * 1000.0) as i64;
            format!("(+{nanos}nsec)")
        }
        TimeUnits::Auto if res < 10_000 => format!("(+{res}usec)"),
        TimeUnits::Auto => format!("(+{}msec)", res / 1000),
    }
}

/// Monotonic microsecond stopwatch.
#[derive(Debug, Clone)]
pub struct Stopwatch {
    origin: Instant,
    mark_us: u64,
}

impl Default for Stopwatch {
    fn default() -> Self {
        Self::new()
    }
}

impl Stopwatch {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            mark_us: 0,
        }
    }

    /// Microseconds since the stopwatch was created.
    pub fn now_us(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_micros()).unwrap_or(u64::MAX)
    }

    /// Microseconds since the last restart; restarts when `reset` is set.
    pub fn lap(&mut self, reset: bool) -> u64 {
        let now = self.now_us();
        let elapsed = now.saturating_sub(self.mark_us);
        if reset {
            self.mark_us = now;
        }
        elapsed
    }

    pub fn restart(&mut self) {
        self.mark_us = self.now_us();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_boundaries_select_the_coarser_unit() {
        assert_eq!(format_elapsed(9, 1, TimeUnits::Auto), "(+9000nsec)");
        assert_eq!(format_elapsed(10, 1, TimeUnits::Auto), "(+10usec)");
        assert_eq!(format_elapsed(9_999, 1, TimeUnits::Auto), "(+9999usec)");
        assert_eq!(format_elapsed(10_000, 1, TimeUnits::Auto), "(+10msec)");
        assert_eq!(format_elapsed(9_999_999, 1, TimeUnits::Auto), "(+9999msec)");
        assert_eq!(format_elapsed(10_000_000, 1, TimeUnits::Auto), "(+10sec)");
    }

    #[test]
    fn divisor_averages_before_choosing_unit() {
        assert_eq!(format_elapsed(25, 10, TimeUnits::Auto), "(+2500nsec)");
        assert_eq!(format_elapsed(50_000, 2, TimeUnits::Auto), "(+25msec)");
        assert_eq!(format_elapsed(7, 0, TimeUnits::Auto), "(+7000nsec)");
    }

    #[test]
    fn micros_mode_never_rescales() {
        assert_eq!(format_elapsed(3, 1, TimeUnits::Micros), "(+3usec)");
        assert_eq!(format_elapsed(20_000_000, 2, TimeUnits::Micros), "(+10000000usec)");
    }

    #[test]
    fn stopwatch_lap_resets_only_on_request() {
        let mut watch = Stopwatch::new();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let first = watch.lap(false);
        let second = watch.lap(true);
        assert!(first >= 5_000);
        assert!(second >= first);
        assert!(watch.lap(false) < second);
    }
}
