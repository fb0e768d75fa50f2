//! Binary layout of trace envelopes.
//!
//! Each trace call becomes one envelope whose body is sized exactly for its
//! fields. All integers are little-endian and every string-bearing kind ends
//! with a NUL-terminated description:
//!
//! | kind              | body                                               |
//! |-------------------|----------------------------------------------------|
//! | string / reboot   | `elapsed u64, code i32, severity u8, text\0`        |
//! | inline array      | `elapsed u64, count u32, count * element, text\0`  |
//! | by-reference array| `elapsed u64, count u32, address usize, text\0`    |
//! | stop time         | `elapsed u64, divisor u32, text\0`                 |
//! | print             | `text\0`                                           |
//!
//! Interrupt strings carry no body: the code travels in `short_param` and the
//! payload is a caller-owned static string.

use std::mem::size_of;

use rtkit::{Envelope, MemoryRegion};
use thiserror::Error;

use crate::kind::{ElemType, Severity, TraceKind};

const TIME_LEN: usize = 8;
const COUNT_LEN: usize = 4;
const CODE_LEN: usize = 4;
const ADDR_LEN: usize = size_of::<usize>();

/// Largest body an envelope can carry.
pub const MAX_BODY_LEN: usize = u16::MAX as usize;

/// Encoding failures. The message is dropped; nothing is sent.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum EncodeError {
    #[error("trace payload too large: {0} bytes")]
    TooLarge(usize),
    #[error("trace payload allocation of {0} bytes failed")]
    OutOfMemory(usize),
    #[error("trace payload overflow while writing")]
    Overflow,
}

/// Decoding failures.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    #[error("unknown trace kind {0}")]
    UnknownKind(u16),
    #[error("{0} envelope has no usable payload")]
    MissingBody(TraceKind),
    #[error("{0} payload truncated")]
    Truncated(TraceKind),
    #[error("{0} payload text is not terminated")]
    MissingTerminator(TraceKind),
}

/// Borrowed array handed to a data trace.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DataRef<'a> {
    U8(&'a [u8]),
    I8(&'a [i8]),
    U16(&'a [u16]),
    I16(&'a [i16]),
    U32(&'a [u32]),
    I32(&'a [i32]),
}

/// Owned array reconstructed by the decoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataValues {
    U8(Vec<u8>),
    I8(Vec<i8>),
    U16(Vec<u16>),
    I16(Vec<i16>),
    U32(Vec<u32>),
    I32(Vec<i32>),
}

macro_rules! each_variant {
    ($value:expr, $ty:ident, $inner:ident => $body:expr) => {
        match $value {
            $ty::U8($inner) => $body,
            $ty::I8($inner) => $body,
            $ty::U16($inner) => $body,
            $ty::I16($inner) => $body,
            $ty::U32($inner) => $body,
            $ty::I32($inner) => $body,
        }
    };
}

/// Scalar types accepted by data traces.
pub trait TraceScalar: Copy + Send + Sync + 'static {
    const ELEM: ElemType;
    fn data_ref(data: &[Self]) -> DataRef<'_>;
}

macro_rules! impl_scalar {
    ($($t:ty => $variant:ident),* $(,)?) => {
        $(
            impl TraceScalar for $t {
                const ELEM: ElemType = ElemType::$variant;
                fn data_ref(data: &[Self]) -> DataRef<'_> {
                    DataRef::$variant(data)
                }
            }

            impl<'a> From<&'a [$t]> for DataRef<'a> {
                fn from(data: &'a [$t]) -> Self {
                    DataRef::$variant(data)
                }
            }
        )*
    };
}

impl_scalar!(u8 => U8, i8 => I8, u16 => U16, i16 => I16, u32 => U32, i32 => I32);

impl<'a> DataRef<'a> {
    pub fn elem(&self) -> ElemType {
        match self {
            Self::U8(_) => ElemType::U8,
            Self::I8(_) => ElemType::I8,
            Self::U16(_) => ElemType::U16,
            Self::I16(_) => ElemType::I16,
            Self::U32(_) => ElemType::U32,
            Self::I32(_) => ElemType::I32,
        }
    }

    pub fn len(&self) -> usize {
        each_variant!(self, DataRef, data => data.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Size of the array in bytes.
    pub fn byte_len(&self) -> usize {
        self.len() * self.elem().width()
    }

    fn address(&self) -> usize {
        each_variant!(self, DataRef, data => data.as_ptr() as usize)
    }

    fn write_le(&self, writer: &mut PayloadWriter<'_>) -> Result<(), EncodeError> {
        each_variant!(self, DataRef, data => {
            for value in data.iter() {
                writer.push_bytes(&value.to_le_bytes())?;
            }
            Ok(())
        })
    }

    pub fn to_values(&self) -> DataValues {
        match *self {
            Self::U8(d) => DataValues::U8(d.to_vec()),
            Self::I8(d) => DataValues::I8(d.to_vec()),
            Self::U16(d) => DataValues::U16(d.to_vec()),
            Self::I16(d) => DataValues::I16(d.to_vec()),
            Self::U32(d) => DataValues::U32(d.to_vec()),
            Self::I32(d) => DataValues::I32(d.to_vec()),
        }
    }
}

impl DataValues {
    pub fn as_data_ref(&self) -> DataRef<'_> {
        match self {
            Self::U8(d) => DataRef::U8(d),
            Self::I8(d) => DataRef::I8(d),
            Self::U16(d) => DataRef::U16(d),
            Self::I16(d) => DataRef::I16(d),
            Self::U32(d) => DataRef::U32(d),
            Self::I32(d) => DataRef::I32(d),
        }
    }

    pub fn len(&self) -> usize {
        each_variant!(self, DataValues, data => data.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn from_le_bytes(elem: ElemType, bytes: &[u8]) -> Self {
        match elem {
            ElemType::U8 => Self::U8(bytes.to_vec()),
            ElemType::I8 => Self::I8(bytes.iter().map(|b| *b as i8).collect()),
            ElemType::U16 => Self::U16(
                bytes
                    .chunks_exact(2)
                    .map(|c| u16::from_le_bytes([c[0], c[1]]))
                    .collect(),
            ),
            ElemType::I16 => Self::I16(
                bytes
                    .chunks_exact(2)
                    .map(|c| i16::from_le_bytes([c[0], c[1]]))
                    .collect(),
            ),
            ElemType::U32 => Self::U32(
                bytes
                    .chunks_exact(4)
                    .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                    .collect(),
            ),
            ElemType::I32 => Self::I32(
                bytes
                    .chunks_exact(4)
                    .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                    .collect(),
            ),
        }
    }
}

/// Array content of a decoded data record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataPayload {
    /// Values copied into the envelope.
    Inline(DataValues),
    /// Address and length of caller-owned memory.
    Reference {
        elem: ElemType,
        address: usize,
        count: usize,
    },
}

impl DataPayload {
    pub fn len(&self) -> usize {
        match self {
            Self::Inline(values) => values.len(),
            Self::Reference { count, .. } => *count,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reads referenced memory into owned values.
    ///
    /// # Safety
    ///
    /// A `Reference` must describe an array that was passed to a
    /// by-reference data trace and is still alive and unmodified.
    pub unsafe fn resolve(self) -> DataValues {
        match self {
            Self::Inline(values) => values,
            Self::Reference {
                elem,
                address,
                count,
            } => {
                if count == 0 || address == 0 {
                    return DataValues::from_le_bytes(elem, &[]);
                }
                // SAFETY: guaranteed by the caller.
                unsafe { read_referenced(elem, address, count) }
            }
        }
    }
}

unsafe fn read_referenced(elem: ElemType, address: usize, count: usize) -> DataValues {
    match elem {
        ElemType::U8 => DataValues::U8(std::slice::from_raw_parts(address as *const u8, count).to_vec()),
        ElemType::I8 => DataValues::I8(std::slice::from_raw_parts(address as *const i8, count).to_vec()),
        ElemType::U16 => DataValues::U16(std::slice::from_raw_parts(address as *const u16, count).to_vec()),
        ElemType::I16 => DataValues::I16(std::slice::from_raw_parts(address as *const i16, count).to_vec()),
        ElemType::U32 => DataValues::U32(std::slice::from_raw_parts(address as *const u32, count).to_vec()),
        ElemType::I32 => DataValues::I32(std::slice::from_raw_parts(address as *const i32, count).to_vec()),
    }
}

/// A decoded trace envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceRecord {
    Message {
        elapsed_us: u64,
        code: i32,
        severity: Severity,
        text: String,
        reboot: bool,
    },
    Isr {
        code: i16,
        text: &'static str,
    },
    Data {
        elapsed_us: u64,
        data: DataPayload,
        text: String,
    },
    StopTime {
        elapsed_us: u64,
        divisor: u32,
        text: String,
    },
    Print {
        text: String,
    },
}

impl TraceRecord {
    /// True for messages that end with a restart.
    pub fn is_reboot(&self) -> bool {
        matches!(self, Self::Message { reboot: true, .. })
    }
}

/// Sequential writer over an exactly sized envelope body.
pub struct PayloadWriter<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> PayloadWriter<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn push_bytes(&mut self, bytes: &[u8]) -> Result<&mut Self, EncodeError> {
        let end = self.pos + bytes.len();
        self.buf
            .get_mut(self.pos..end)
            .ok_or(EncodeError::Overflow)?
            .copy_from_slice(bytes);
        self.pos = end;
        Ok(self)
    }

    pub fn push_u8(&mut self, value: u8) -> Result<&mut Self, EncodeError> {
        self.push_bytes(&[value])
    }

    pub fn push_u32(&mut self, value: u32) -> Result<&mut Self, EncodeError> {
        self.push_bytes(&value.to_le_bytes())
    }

    pub fn push_i32(&mut self, value: i32) -> Result<&mut Self, EncodeError> {
        self.push_bytes(&value.to_le_bytes())
    }

    pub fn push_u64(&mut self, value: u64) -> Result<&mut Self, EncodeError> {
        self.push_bytes(&value.to_le_bytes())
    }

    pub fn push_usize(&mut self, value: usize) -> Result<&mut Self, EncodeError> {
        self.push_bytes(&value.to_le_bytes())
    }

    /// Appends the string followed by a NUL terminator.
    pub fn push_str(&mut self, value: &str) -> Result<&mut Self, EncodeError> {
        self.push_bytes(value.as_bytes())?.push_u8(0)
    }

    /// Bytes written so far.
    pub fn position(&self) -> usize {
        self.pos
    }
}

/// Sequential reader over an envelope body.
pub struct PayloadReader<'a> {
    buf: &'a [u8],
    pos: usize,
    kind: TraceKind,
}

impl<'a> PayloadReader<'a> {
    pub fn new(buf: &'a [u8], kind: TraceKind) -> Self {
        Self { buf, pos: 0, kind }
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        let end = self
            .pos
            .checked_add(len)
            .ok_or(DecodeError::Truncated(self.kind))?;
        let bytes = self
            .buf
            .get(self.pos..end)
            .ok_or(DecodeError::Truncated(self.kind))?;
        self.pos = end;
        Ok(bytes)
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.read_array::<1>()?[0])
    }

    pub fn read_u32(&mut self) -> Result<u32, DecodeError> {
        self.read_array().map(u32::from_le_bytes)
    }

    pub fn read_i32(&mut self) -> Result<i32, DecodeError> {
        self.read_array().map(i32::from_le_bytes)
    }

    pub fn read_u64(&mut self) -> Result<u64, DecodeError> {
        self.read_array().map(u64::from_le_bytes)
    }

    pub fn read_usize(&mut self) -> Result<usize, DecodeError> {
        self.read_array().map(usize::from_le_bytes)
    }

    /// Reads up to the next NUL and consumes the terminator.
    pub fn read_cstr(&mut self) -> Result<String, DecodeError> {
        let rest = self.buf.get(self.pos..).unwrap_or_default();
        let len = rest
            .iter()
            .position(|b| *b == 0)
            .ok_or(DecodeError::MissingTerminator(self.kind))?;
        let text = String::from_utf8_lossy(&rest[..len]).into_owned();
        self.pos += len + 1;
        Ok(text)
    }
}

fn allocate(kind: TraceKind, size: usize) -> Result<Envelope, EncodeError> {
    let size16 = u16::try_from(size).map_err(|_| EncodeError::TooLarge(size))?;
    Envelope::allocate(kind.tag(), size16, MemoryRegion::Default).ok_or(EncodeError::OutOfMemory(size))
}

fn build(
    kind: TraceKind,
    size: usize,
    write: impl FnOnce(&mut PayloadWriter<'_>) -> Result<(), EncodeError>,
) -> Result<Envelope, EncodeError> {
    let mut envelope = allocate(kind, size)?;
    let body = envelope.body_mut().ok_or(EncodeError::Overflow)?;
    let mut writer = PayloadWriter::new(body);
    write(&mut writer)?;
    debug_assert_eq!(writer.position(), size);
    Ok(envelope)
}

/// Encodes a string message (optionally flagged for reboot).
pub fn encode_message(
    elapsed_us: u64,
    code: i32,
    severity: Severity,
    text: &str,
    reboot: bool,
) -> Result<Envelope, EncodeError> {
    let kind = if reboot {
        TraceKind::StringReboot
    } else {
        TraceKind::String
    };
    let size = TIME_LEN + CODE_LEN + 1 + text.len() + 1;
    build(kind, size, |w| {
        w.push_u64(elapsed_us)?
            .push_i32(code)?
            .push_u8(severity.as_u8())?
            .push_str(text)?;
        Ok(())
    })
}

/// Encodes an array by copying its values into the envelope.
pub fn encode_data(elapsed_us: u64, data: DataRef<'_>, text: &str) -> Result<Envelope, EncodeError> {
    let count = u32::try_from(data.len()).map_err(|_| EncodeError::TooLarge(data.byte_len()))?;
    let size = TIME_LEN + COUNT_LEN + data.byte_len() + text.len() + 1;
    build(data.elem().kind(false), size, |w| {
        w.push_u64(elapsed_us)?.push_u32(count)?;
        data.write_le(w)?;
        w.push_str(text)?;
        Ok(())
    })
}

/// Encodes an array by recording only its address and length.
///
/// The caller's memory is read later by the consumer; see
/// [`DataPayload::resolve`] for the contract this relies on.
pub fn encode_data_by_reference(
    elapsed_us: u64,
    data: DataRef<'_>,
    text: &str,
) -> Result<Envelope, EncodeError> {
    let count = u32::try_from(data.len()).map_err(|_| EncodeError::TooLarge(data.byte_len()))?;
    let size = TIME_LEN + COUNT_LEN + ADDR_LEN + text.len() + 1;
    build(data.elem().kind(true), size, |w| {
        w.push_u64(elapsed_us)?
            .push_u32(count)?
            .push_usize(data.address())?
            .push_str(text)?;
        Ok(())
    })
}

/// Encodes an elapsed-time report averaged over `divisor` iterations.
pub fn encode_stop_time(elapsed_us: u64, divisor: u32, text: &str) -> Result<Envelope, EncodeError> {
    let size = TIME_LEN + COUNT_LEN + text.len() + 1;
    build(TraceKind::StopTime, size, |w| {
        w.push_u64(elapsed_us)?.push_u32(divisor)?.push_str(text)?;
        Ok(())
    })
}

/// Encodes a plain print string.
pub fn encode_print(text: &str) -> Result<Envelope, EncodeError> {
    build(TraceKind::Print, text.len() + 1, |w| {
        w.push_str(text)?;
        Ok(())
    })
}

/// Builds the body-less interrupt string envelope.
pub fn encode_isr(text: &'static str, code: i16) -> Envelope {
    Envelope::with_static(TraceKind::IsrString.tag(), code as u16, text)
}

/// Largest element count an inline array trace can carry with `text_len`
/// bytes of description.
pub fn max_inline_len(elem: ElemType, text_len: usize) -> usize {
    MAX_BODY_LEN.saturating_sub(TIME_LEN + COUNT_LEN + text_len + 1) / elem.width()
}

/// Rebuilds the typed record from an envelope produced by this module.
pub fn decode(envelope: &Envelope) -> Result<TraceRecord, DecodeError> {
    let kind = TraceKind::from_tag(envelope.kind).ok_or(DecodeError::UnknownKind(envelope.kind))?;

    if kind == TraceKind::IsrString {
        let text = envelope
            .static_text()
            .ok_or(DecodeError::MissingBody(kind))?;
        return Ok(TraceRecord::Isr {
            code: envelope.short_param as i16,
            text,
        });
    }

    let body = envelope.body().ok_or(DecodeError::MissingBody(kind))?;
    let mut r = PayloadReader::new(body, kind);

    let record = match kind {
        TraceKind::String | TraceKind::StringReboot => TraceRecord::Message {
            elapsed_us: r.read_u64()?,
            code: r.read_i32()?,
            severity: Severity::from_u8(r.read_u8()?),
            text: r.read_cstr()?,
            reboot: kind == TraceKind::StringReboot,
        },
        TraceKind::StopTime => TraceRecord::StopTime {
            elapsed_us: r.read_u64()?,
            divisor: r.read_u32()?,
            text: r.read_cstr()?,
        },
        TraceKind::Print => TraceRecord::Print {
            text: r.read_cstr()?,
        },
        _ => {
            let elem = kind.element().ok_or(DecodeError::UnknownKind(envelope.kind))?;
            let elapsed_us = r.read_u64()?;
            let count = r.read_u32()? as usize;
            let data = if kind.is_reference() {
                DataPayload::Reference {
                    elem,
                    address: r.read_usize()?,
                    count,
                }
            } else {
                let len = count
                    .checked_mul(elem.width())
                    .ok_or(DecodeError::Truncated(kind))?;
                DataPayload::Inline(DataValues::from_le_bytes(elem, r.read_bytes(len)?))
            };
            TraceRecord::Data {
                elapsed_us,
                data,
                text: r.read_cstr()?,
            }
        }
    };
    Ok(record)
}
