//! Call-site macros over a [`TraceList`](crate::TraceList).
//!
//! Every macro takes the list as its first argument. Without the `trace`
//! feature they expand to an empty block.

#[cfg(feature = "trace")]
mod enabled {
    /// Reports a message with a code; `reboot` restarts after the fan-out.
    #[macro_export]
    macro_rules! trace {
        ($list:expr, $text:expr, $code:expr, $reboot:expr) => {
            $list.trace($text, $code, $crate::Severity::Error, $reboot)
        };
        ($list:expr, $text:expr, $code:expr) => {
            $list.trace($text, $code, $crate::Severity::Error, false)
        };
    }

    #[macro_export]
    macro_rules! trace_error {
        ($list:expr, $text:expr, $code:expr) => {
            $list.error($text, $code)
        };
    }

    #[macro_export]
    macro_rules! trace_warning {
        ($list:expr, $text:expr, $code:expr) => {
            $list.warning($text, $code)
        };
    }

    #[macro_export]
    macro_rules! trace_info {
        ($list:expr, $text:expr, $code:expr) => {
            $list.info($text, $code)
        };
    }

    /// Prints a value in decimal as the message code.
    #[macro_export]
    macro_rules! trace_dec {
        ($list:expr, $text:expr, $value:expr) => {
            $list.trace($text, ($value) as i32, $crate::Severity::Info, false)
        };
    }

    /// Prints a single unsigned value in hexadecimal.
    #[macro_export]
    macro_rules! trace_hex {
        ($list:expr, $text:expr, $value:expr) => {{
            let value = $value;
            $list.trace_values($text, ::core::slice::from_ref(&value))
        }};
    }

    #[macro_export]
    macro_rules! trace_isr {
        ($list:expr, $text:expr, $code:expr) => {
            $list.trace_from_isr($text, $code)
        };
    }

    /// Reports an array. The `by_ref` form passes it by address and must be
    /// used inside an `unsafe` block that upholds
    /// [`TraceList::trace_data_by_ref`](crate::TraceList::trace_data_by_ref).
    #[macro_export]
    macro_rules! trace_data {
        ($list:expr, $text:expr, by_ref $data:expr) => {
            $list.trace_values_by_ref($text, $data)
        };
        ($list:expr, $text:expr, $data:expr) => {
            $list.trace_values($text, $data)
        };
    }

    /// Prints a line through the stop-time path with a divisor of one.
    #[macro_export]
    macro_rules! trace_print {
        ($list:expr, $text:expr) => {
            $list.stop_time($text, 1)
        };
    }

    #[macro_export]
    macro_rules! trace_log {
        ($list:expr, $text:expr) => {
            $list.log($text)
        };
    }

    #[macro_export]
    macro_rules! start_time_shot {
        ($list:expr) => {
            $list.start_time()
        };
    }

    #[macro_export]
    macro_rules! stop_time_shot {
        ($list:expr, $text:expr) => {
            $list.stop_time($text, 1)
        };
    }

    #[macro_export]
    macro_rules! stop_time {
        ($list:expr, $text:expr, $n:expr) => {
            $list.stop_time($text, $n)
        };
    }
}

#[cfg(not(feature = "trace"))]
mod disabled {
    #[macro_export]
    macro_rules! trace {
        ($($arg:tt)*) => {{}};
    }

    #[macro_export]
    macro_rules! trace_error {
        ($($arg:tt)*) => {{}};
    }

    #[macro_export]
    macro_rules! trace_warning {
        ($($arg:tt)*) => {{}};
    }

    #[macro_export]
    macro_rules! trace_info {
        ($($arg:tt)*) => {{}};
    }

    #[macro_export]
    macro_rules! trace_dec {
        ($($arg:tt)*) => {{}};
    }

    #[macro_export]
    macro_rules! trace_hex {
        ($($arg:tt)*) => {{}};
    }

    #[macro_export]
    macro_rules! trace_isr {
        ($($arg:tt)*) => {
            $crate::IsrSend::default()
        };
    }

    #[macro_export]
    macro_rules! trace_data {
        ($($arg:tt)*) => {{}};
    }

    #[macro_export]
    macro_rules! trace_print {
        ($($arg:tt)*) => {{}};
    }

    #[macro_export]
    macro_rules! trace_log {
        ($($arg:tt)*) => {{}};
    }

    #[macro_export]
    macro_rules! start_time_shot {
        ($($arg:tt)*) => {{}};
    }

    #[macro_export]
    macro_rules! stop_time_shot {
        ($($arg:tt)*) => {{}};
    }

    #[macro_export]
    macro_rules! stop_time {
        ($($arg:tt)*) => {{}};
    }
}
