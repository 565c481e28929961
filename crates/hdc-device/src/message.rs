//! Message-layer identifiers.
//!
//! The first byte of every message names its class; reserved classes live
//! at `0xF0` and above, everything below is available to application-defined
//! message routers.

/// First message-type id reserved for the protocol itself.
pub const FIRST_RESERVED_TYPE: u8 = 0xF0;

/// The four reserved message classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum MessageType {
    /// Self-description queries: protocol version, limits, JSON model.
    Meta = 0xF0,
    /// Loopback: the reply repeats the request verbatim.
    Echo = 0xF1,
    /// Command request (host to device) and command reply (device to host).
    Command = 0xF2,
    /// Asynchronous event, device to host only.
    Event = 0xF3,
}

impl MessageType {
    /// Decode a wire byte into a reserved message class.
    #[must_use]
    pub const fn from_wire(byte: u8) -> Option<Self> {
        match byte {
            0xF0 => Some(Self::Meta),
            0xF1 => Some(Self::Echo),
            0xF2 => Some(Self::Command),
            0xF3 => Some(Self::Event),
            _ => None,
        }
    }

    /// The raw wire byte.
    #[must_use]
    pub const fn wire(self) -> u8 {
        self as u8
    }
}

/// Second byte of a Meta request, selecting the query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum MetaId {
    /// Protocol version string.
    HdcVersion = 0xF0,
    /// Largest accepted request message, as a little-endian u32.
    MaxReq = 0xF1,
    /// The streamed JSON description of the device.
    IdlJson = 0xF2,
}

impl MetaId {
    /// Decode a wire byte into a Meta query id.
    #[must_use]
    pub const fn from_wire(byte: u8) -> Option<Self> {
        match byte {
            0xF0 => Some(Self::HdcVersion),
            0xF1 => Some(Self::MaxReq),
            0xF2 => Some(Self::IdlJson),
            _ => None,
        }
    }

    /// The raw wire byte.
    #[must_use]
    pub const fn wire(self) -> u8 {
        self as u8
    }
}
