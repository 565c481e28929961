//! Command dispatch surface: reserved exceptions, typed command failures,
//! and the context handed to command handlers.
//!
//! A handler is a plain function pointer; it receives a [`CommandContext`]
//! and must come back with a [`Reply`] token, which is only obtainable from
//! the context's reply builders. That turns the C convention "every code
//! path calls exactly one reply function" into a property the compiler
//! checks.

use core::any::Any;

use crate::descriptor::{ExceptionDescriptor, FeatureDescriptor, FeatureRuntime};
use crate::event::{self, EmitError, LogLevel};
use crate::message::MessageType;
use crate::property::{PoolView, PropertyBuf};
use crate::txbuf::MessageTx;

/// Exception byte of a successful command reply.
pub const NO_ERROR: u8 = 0x00;

/// Longest error detail the engine carries alongside an exception id.
pub(crate) const MAX_ERROR_DETAIL: usize = 64;

/// The exceptions every device knows, ids `0xF0..=0xF6`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum ReservedException {
    /// Generic failure, reserved for application handlers; the engine
    /// itself never raises it.
    CommandFailed = 0xF0,
    /// The addressed feature does not exist.
    UnknownFeature = 0xF1,
    /// The addressed command does not exist on the feature.
    UnknownCommand = 0xF2,
    /// The request payload does not match the command's signature.
    InvalidArgs = 0xF3,
    /// The command is valid but cannot run in the current state.
    NotNow = 0xF4,
    /// The addressed property does not exist on the feature.
    UnknownProperty = 0xF5,
    /// The property exists but rejects writes.
    ReadOnlyProperty = 0xF6,
}

impl ReservedException {
    /// Decode a wire byte into a reserved exception.
    #[must_use]
    pub const fn from_wire(byte: u8) -> Option<Self> {
        match byte {
            0xF0 => Some(Self::CommandFailed),
            0xF1 => Some(Self::UnknownFeature),
            0xF2 => Some(Self::UnknownCommand),
            0xF3 => Some(Self::InvalidArgs),
            0xF4 => Some(Self::NotNow),
            0xF5 => Some(Self::UnknownProperty),
            0xF6 => Some(Self::ReadOnlyProperty),
            _ => None,
        }
    }

    /// The raw wire byte.
    #[must_use]
    pub const fn wire(self) -> u8 {
        self as u8
    }

    /// Exception name as published in the JSON description.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::CommandFailed => "CommandFailed",
            Self::UnknownFeature => "UnknownFeature",
            Self::UnknownCommand => "UnknownCommand",
            Self::InvalidArgs => "InvalidArgs",
            Self::NotNow => "NotNow",
            Self::UnknownProperty => "UnknownProperty",
            Self::ReadOnlyProperty => "ReadOnlyProperty",
        }
    }

    /// Descriptor form, for `raises` lists.
    #[must_use]
    pub const fn descriptor(self) -> ExceptionDescriptor<'static> {
        ExceptionDescriptor {
            id: self as u8,
            name: self.name(),
            doc: None,
        }
    }
}

/// A failed command: the exception id put on the wire plus an optional
/// UTF-8 detail carried in the reply payload.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("command exception {exception_id:#04x}: {detail}")]
pub struct CommandError {
    exception_id: u8,
    detail: heapless::String<MAX_ERROR_DETAIL>,
}

impl CommandError {
    /// A failure with the given exception id and no detail text.
    #[must_use]
    pub fn new(exception_id: u8) -> Self {
        Self {
            exception_id,
            detail: heapless::String::new(),
        }
    }

    /// A failure with a detail text, truncated to what the engine carries.
    #[must_use]
    pub fn with_detail(exception_id: u8, detail: &str) -> Self {
        let mut text = heapless::String::new();
        for c in detail.chars() {
            if text.push(c).is_err() {
                break;
            }
        }
        Self {
            exception_id,
            detail: text,
        }
    }

    /// The exception id put on the wire.
    #[must_use]
    pub fn exception_id(&self) -> u8 {
        self.exception_id
    }

    /// The detail text, possibly empty.
    #[must_use]
    pub fn detail(&self) -> &str {
        self.detail.as_str()
    }
}

impl From<ReservedException> for CommandError {
    fn from(exception: ReservedException) -> Self {
        Self::new(exception.wire())
    }
}

/// Proof that a handler composed its reply. Only the reply builders on
/// [`CommandContext`] can mint one.
#[must_use]
pub struct Reply(());

/// Handler of one command.
pub type CommandHandler = fn(&mut CommandContext<'_>) -> Result<Reply, CommandError>;

/// Serializer of a computed property value.
pub type PropertyGetter = fn(&mut CommandContext<'_>, &mut PropertyBuf) -> Result<(), CommandError>;

/// Consumer of a new computed property value; size-checked by the engine
/// for fixed-width dtypes before it runs.
pub type PropertySetter = fn(&mut CommandContext<'_>, &[u8]) -> Result<(), CommandError>;

/// Handler of application-defined message classes (type byte `< 0xF0`).
pub type RawMessageHandler = fn(&mut MessageContext<'_>, &[u8]);

/// Everything a command handler may touch while it runs.
pub struct CommandContext<'a> {
    pub(crate) tx: &'a mut dyn MessageTx,
    pub(crate) feature: &'a FeatureDescriptor<'a>,
    pub(crate) feature_index: usize,
    pub(crate) command_id: u8,
    pub(crate) runtime: &'a mut FeatureRuntime,
    pub(crate) pool: PoolView<'a>,
    pub(crate) app: &'a mut dyn Any,
    pub(crate) request: &'a [u8],
    pub(crate) replied: bool,
}

impl<'a> CommandContext<'a> {
    /// The raw request message, message-type byte included.
    #[must_use]
    pub fn request(&self) -> &'a [u8] {
        self.request
    }

    /// The argument bytes following the three-byte command header.
    #[must_use]
    pub fn args(&self) -> &'a [u8] {
        self.request.get(3..).unwrap_or(&[])
    }

    /// Descriptor of the feature the command was addressed to.
    #[must_use]
    pub fn feature(&self) -> &'a FeatureDescriptor<'a> {
        self.feature
    }

    /// Downcast the opaque application handle.
    pub fn app<A: Any>(&mut self) -> Option<&mut A> {
        self.app.downcast_mut()
    }

    /// The feature's current state byte.
    #[must_use]
    pub fn feature_state(&self) -> u8 {
        self.runtime.feature_state
    }

    /// The feature's current log-event threshold.
    #[must_use]
    pub fn log_event_threshold(&self) -> u8 {
        self.runtime.log_event_threshold
    }

    /// Switch the feature's state, emitting the transition event.
    ///
    /// # Errors
    ///
    /// Refuses states missing from a non-empty state table.
    pub fn set_feature_state(&mut self, new_state: u8) -> Result<(), EmitError> {
        event::transition(
            self.tx,
            self.feature.id,
            self.feature.states,
            self.runtime,
            new_state,
        )
    }

    /// Emit a `Log` event on this feature, subject to its threshold.
    pub fn log(&mut self, level: LogLevel, text: &str) {
        event::emit_log(
            self.tx,
            self.feature.id,
            self.runtime.log_event_threshold,
            level,
            text,
        );
    }

    /// Emit an event on this feature with a contiguous payload.
    pub fn emit_event(&mut self, event_id: u8, payload: &[u8]) {
        event::emit(self.tx, self.feature.id, event_id, &[payload]);
    }

    /// Emit an event on this feature, payload given in pieces.
    pub fn emit_event_parts(&mut self, event_id: u8, parts: &[&[u8]]) {
        event::emit(self.tx, self.feature.id, event_id, parts);
    }

    /// Compose the success reply with a contiguous payload.
    pub fn reply(&mut self, payload: &[u8]) -> Reply {
        self.reply_parts(&[payload])
    }

    /// Compose an empty success reply.
    pub fn reply_void(&mut self) -> Reply {
        self.reply_parts(&[])
    }

    /// Compose the success reply, payload given in pieces.
    pub fn reply_parts(&mut self, parts: &[&[u8]]) -> Reply {
        debug_assert!(!self.replied, "command replied twice");
        if !self.replied {
            self.replied = true;
            self.tx.begin();
            self.tx.push(&[
                MessageType::Command.wire(),
                self.feature.id,
                self.command_id,
                NO_ERROR,
            ]);
            for part in parts {
                self.tx.push(part);
            }
            self.tx.end();
        }
        Reply(())
    }

    /// Compose the failure reply for `error`. Used by the engine when a
    /// handler returns without having replied.
    pub(crate) fn reply_error(&mut self, error: &CommandError) {
        debug_assert!(!self.replied, "error reply after success reply");
        if self.replied {
            return;
        }
        self.replied = true;
        self.tx.send_parts(&[
            &[
                MessageType::Command.wire(),
                self.feature.id,
                self.command_id,
                error.exception_id(),
            ],
            error.detail().as_bytes(),
        ]);
    }

    pub(crate) fn has_replied(&self) -> bool {
        self.replied
    }
}

/// Context handed to the application's raw-message router.
pub struct MessageContext<'a> {
    pub(crate) tx: &'a mut dyn MessageTx,
    pub(crate) app: &'a mut dyn Any,
}

impl MessageContext<'_> {
    /// Send one reply message verbatim.
    pub fn reply(&mut self, message: &[u8]) {
        self.tx.send_parts(&[message]);
    }

    /// Send one reply message assembled from pieces.
    pub fn reply_parts(&mut self, parts: &[&[u8]]) {
        self.tx.send_parts(parts);
    }

    /// Downcast the opaque application handle.
    pub fn app<A: Any>(&mut self) -> Option<&mut A> {
        self.app.downcast_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::{CommandError, ReservedException};

    #[test]
    fn test_reserved_exception_wire_values() {
        assert_eq!(ReservedException::CommandFailed.wire(), 0xF0);
        assert_eq!(ReservedException::UnknownFeature.wire(), 0xF1);
        assert_eq!(ReservedException::UnknownCommand.wire(), 0xF2);
        assert_eq!(ReservedException::InvalidArgs.wire(), 0xF3);
        assert_eq!(ReservedException::NotNow.wire(), 0xF4);
        assert_eq!(ReservedException::UnknownProperty.wire(), 0xF5);
        assert_eq!(ReservedException::ReadOnlyProperty.wire(), 0xF6);
    }

    #[test]
    fn test_reserved_exception_round_trip() {
        for byte in 0xF0..=0xF6u8 {
            let exc = ReservedException::from_wire(byte);
            assert!(exc.is_some());
            assert_eq!(exc.map(ReservedException::wire), Some(byte));
        }
        assert!(ReservedException::from_wire(0xF7).is_none());
        assert!(ReservedException::from_wire(0x00).is_none());
    }

    #[test]
    fn test_command_error_detail_truncates() {
        let long = "x".repeat(200);
        let err = CommandError::with_detail(0xF3, &long);
        assert_eq!(err.detail().len(), super::MAX_ERROR_DETAIL);
        assert_eq!(err.exception_id(), 0xF3);
    }
}
