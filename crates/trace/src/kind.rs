//! Envelope kinds and severities used by the trace subsystem.

use core::fmt;

/// Error code that suppresses a message before any work is done.
pub const SUPPRESS_CODE: i32 = i32::MAX;

/// Envelope kind tags produced by the trace encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum TraceKind {
    /// Interrupt string; payload is a caller-owned static string.
    IsrString = 5024,
    String = 5025,
    StringReboot = 5026,
    U8 = 5027,
    U16 = 5028,
    U32 = 5029,
    StopTime = 5030,
    I8 = 5031,
    I16 = 5032,
    I32 = 5033,
    Print = 5034,
    U8Ref = 5127,
    U16Ref = 5128,
    U32Ref = 5129,
    I8Ref = 5131,
    I16Ref = 5132,
    I32Ref = 5133,
}

impl TraceKind {
    pub fn from_tag(tag: u16) -> Option<Self> {
        Some(match tag {
            5024 => Self::IsrString,
            5025 => Self::String,
            5026 => Self::StringReboot,
            5027 => Self::U8,
            5028 => Self::U16,
            5029 => Self::U32,
            5030 => Self::StopTime,
            5031 => Self::I8,
            5032 => Self::I16,
            5033 => Self::I32,
            5034 => Self::Print,
            5127 => Self::U8Ref,
            5128 => Self::U16Ref,
            5129 => Self::U32Ref,
            5131 => Self::I8Ref,
            5132 => Self::I16Ref,
            5133 => Self::I32Ref,
            _ => return None,
        })
    }

    pub const fn tag(self) -> u16 {
        self as u16
    }

    /// Element type of array kinds.
    pub fn element(self) -> Option<ElemType> {
        match self {
            Self::U8 | Self::U8Ref => Some(ElemType::U8),
            Self::I8 | Self::I8Ref => Some(ElemType::I8),
            Self::U16 | Self::U16Ref => Some(ElemType::U16),
            Self::I16 | Self::I16Ref => Some(ElemType::I16),
            Self::U32 | Self::U32Ref => Some(ElemType::U32),
            Self::I32 | Self::I32Ref => Some(ElemType::I32),
            _ => None,
        }
    }

    /// True for array kinds that carry an address instead of the data.
    pub fn is_reference(self) -> bool {
        matches!(
            self,
            Self::U8Ref | Self::U16Ref | Self::U32Ref | Self::I8Ref | Self::I16Ref | Self::I32Ref
        )
    }
}

impl fmt::Display for TraceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self, self.tag())
    }
}

/// Array element types supported by data traces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElemType {
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
}

impl ElemType {
    /// Size of one element in bytes.
    pub const fn width(self) -> usize {
        match self {
            Self::U8 | Self::I8 => 1,
            Self::U16 | Self::I16 => 2,
            Self::U32 | Self::I32 => 4,
        }
    }

    pub const fn is_signed(self) -> bool {
        matches!(self, Self::I8 | Self::I16 | Self::I32)
    }

    /// Envelope kind carrying this element type.
    pub const fn kind(self, by_reference: bool) -> TraceKind {
        match (self, by_reference) {
            (Self::U8, false) => TraceKind::U8,
            (Self::I8, false) => TraceKind::I8,
            (Self::U16, false) => TraceKind::U16,
            (Self::I16, false) => TraceKind::I16,
            (Self::U32, false) => TraceKind::U32,
            (Self::I32, false) => TraceKind::I32,
            (Self::U8, true) => TraceKind::U8Ref,
            (Self::I8, true) => TraceKind::I8Ref,
            (Self::U16, true) => TraceKind::U16Ref,
            (Self::I16, true) => TraceKind::I16Ref,
            (Self::U32, true) => TraceKind::U32Ref,
            (Self::I32, true) => TraceKind::I32Ref,
        }
    }
}

/// Message severity, numbered like the platform log levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(u8)]
pub enum Severity {
    None = 0,
    #[default]
    Error = 1,
    Warning = 2,
    Info = 3,
    Debug = 4,
    Verbose = 5,
}

impl Severity {
    /// Decodes a severity byte; out-of-range values map to `Verbose`.
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::None,
            1 => Self::Error,
            2 => Self::Warning,
            3 => Self::Info,
            4 => Self::Debug,
            _ => Self::Verbose,
        }
    }

    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Matching `log` level; `None` has no counterpart.
    pub fn to_log_level(self) -> Option<log::Level> {
        match self {
            Self::None => None,
            Self::Error => Some(log::Level::Error),
            Self::Warning => Some(log::Level::Warn),
            Self::Info => Some(log::Level::Info),
            Self::Debug => Some(log::Level::Debug),
            Self::Verbose => Some(log::Level::Trace),
        }
    }
}
