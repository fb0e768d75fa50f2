//! Message envelopes exchanged through a [`Channel`](crate::channel::Channel).
//!
//! An envelope is a small fixed header (`kind`, `short_param`) plus a payload
//! whose variant decides ownership. Heap payloads are owned by the envelope and
//! released exactly once when it is dropped; static payloads belong to the
//! caller and are never released.

use core::fmt;

/// Conventional kind asking a task loop to return.
pub const MSG_END_TASK: u16 = 0;

/// Allocation preference for envelope bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MemoryRegion {
    /// Default internal heap.
    #[default]
    Default,
    /// Secondary (external) heap when the platform has one.
    Secondary,
}

/// Envelope payload.
pub enum Payload {
    /// No payload at all.
    Empty,
    /// Two inline 16-bit parameters.
    Params { param1: u16, param2: u16 },
    /// One inline 32-bit parameter.
    Id(u32),
    /// Heap block owned by the envelope.
    Owned(Box<[u8]>),
    /// Caller-owned string (typically a literal passed from interrupt context).
    Static(&'static str),
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "Empty"),
            Self::Params { param1, param2 } => write!(f, "Params({param1}, {param2})"),
            Self::Id(id) => write!(f, "Id({id:#010x})"),
            Self::Owned(body) => write!(f, "Owned({} bytes)", body.len()),
            Self::Static(text) => write!(f, "Static({text:?})"),
        }
    }
}

/// The unit of transfer through a channel.
///
/// Envelopes are move-only: handing one to a channel transfers the payload,
/// and the receiver is the only party that can release it.
#[derive(Debug)]
pub struct Envelope {
    pub kind: u16,
    pub short_param: u16,
    pub payload: Payload,
}

impl Envelope {
    /// Builds a fully inline command envelope.
    pub fn command(kind: u16, short_param: u16, id: u32) -> Self {
        Self {
            kind,
            short_param,
            payload: Payload::Id(id),
        }
    }

    /// Builds an envelope carrying two inline parameters.
    pub fn with_params(kind: u16, short_param: u16, param1: u16, param2: u16) -> Self {
        Self {
            kind,
            short_param,
            payload: Payload::Params { param1, param2 },
        }
    }

    /// Builds an envelope referencing a caller-owned static string.
    pub fn with_static(kind: u16, short_param: u16, text: &'static str) -> Self {
        Self {
            kind,
            short_param,
            payload: Payload::Static(text),
        }
    }

    /// Allocates a zeroed body of `size` bytes and pre-fills the header.
    ///
    /// `short_param` receives the body size. Returns `None` when the allocator
    /// cannot satisfy the request; callers must check before use.
    pub fn allocate(kind: u16, size: u16, region: MemoryRegion) -> Option<Self> {
        debug_assert!(size > 0, "envelope body must not be empty");

        let mut body = Vec::new();
        if body.try_reserve_exact(usize::from(size)).is_err() {
            log::warn!("envelope allocation of {size} bytes failed (kind {kind})");
            return None;
        }
        body.resize(usize::from(size), 0);
        log::trace!("allocated {size} byte body for kind {kind} in {region:?} region");

        Some(Self {
            kind,
            short_param: size,
            payload: Payload::Owned(body.into_boxed_slice()),
        })
    }

    /// Wraps an already serialised body.
    ///
    /// Returns `None` if the body does not fit the 16-bit size field.
    pub fn from_body(kind: u16, body: Vec<u8>) -> Option<Self> {
        let size = u16::try_from(body.len()).ok()?;
        Some(Self {
            kind,
            short_param: size,
            payload: Payload::Owned(body.into_boxed_slice()),
        })
    }

    /// Returns the owned body, if any.
    pub fn body(&self) -> Option<&[u8]> {
        match &self.payload {
            Payload::Owned(body) => Some(body),
            _ => None,
        }
    }

    /// Returns the owned body mutably, if any.
    pub fn body_mut(&mut self) -> Option<&mut [u8]> {
        match &mut self.payload {
            Payload::Owned(body) => Some(body),
            _ => None,
        }
    }

    /// Returns the static text, if the payload is caller-owned.
    pub fn static_text(&self) -> Option<&'static str> {
        match self.payload {
            Payload::Static(text) => Some(text),
            _ => None,
        }
    }

    /// Inline 32-bit parameter, if present.
    pub fn id(&self) -> Option<u32> {
        match self.payload {
            Payload::Id(id) => Some(id),
            _ => None,
        }
    }

    /// True when dropping this envelope frees heap memory.
    pub fn releases_payload(&self) -> bool {
        matches!(self.payload, Payload::Owned(_))
    }

    /// Consumes the envelope and returns its payload.
    pub fn into_payload(self) -> Payload {
        self.payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_sets_size_and_zeroes_body() {
        let env = Envelope::allocate(7, 12, MemoryRegion::Default).unwrap();
        assert_eq!(env.kind, 7);
        assert_eq!(env.short_param, 12);
        assert_eq!(env.body().unwrap(), &[0u8; 12]);
        assert!(env.releases_payload());
    }

    #[test]
    fn static_payload_is_not_released() {
        let env = Envelope::with_static(3, 42, "isr");
        assert!(!env.releases_payload());
        assert_eq!(env.static_text(), Some("isr"));
        assert!(env.body().is_none());
    }

    #[test]
    fn from_body_rejects_oversized_bodies() {
        assert!(Envelope::from_body(1, vec![0; usize::from(u16::MAX) + 1]).is_none());
        let env = Envelope::from_body(1, vec![1, 2, 3]).unwrap();
        assert_eq!(env.short_param, 3);
    }
}
