//! Event emission: the generic path plus the two mandatory events every
//! feature carries, `Log` and `FeatureStateTransition`.

use core::fmt::Write as _;

use crate::descriptor::{ArgDescriptor, EventDescriptor, FeatureRuntime, StateDescriptor};
use crate::dtype::DataType;
use crate::message::MessageType;
use crate::txbuf::MessageTx;

/// Id of the mandatory `Log` event.
pub const EVENT_LOG: u8 = 0xF0;

/// Id of the mandatory `FeatureStateTransition` event.
pub const EVENT_FEATURE_STATE_TRANSITION: u8 = 0xF1;

/// Longest log line the engine itself formats.
pub(crate) const MAX_LOG_LINE: usize = 64;

/// Severity of a `Log` event, matching Python's logging levels so host-side
/// tooling can hand the values straight to its logger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum LogLevel {
    /// Diagnostic chatter.
    Debug = 10,
    /// Normal operation.
    Info = 20,
    /// Something unexpected but recoverable.
    Warning = 30,
    /// An operation failed.
    Error = 40,
    /// The device is in trouble.
    Critical = 50,
}

impl LogLevel {
    /// Coerce an arbitrary byte to the nearest valid threshold: clamp into
    /// `[10, 50]`, then round to the nearest multiple of ten.
    #[must_use]
    #[allow(clippy::arithmetic_side_effects)] // clamped <= 50 bounds all terms
    pub const fn coerce(raw: u8) -> u8 {
        let clamped = if raw < 10 {
            10
        } else if raw > 50 {
            50
        } else {
            raw
        };
        // clamped <= 50, so the +5 cannot overflow a u8.
        (clamped + 5) / 10 * 10
    }
}

/// Descriptor of the mandatory `Log` event, appended to every feature's
/// event list in the JSON description.
pub(crate) static LOG_EVENT: EventDescriptor<'static> = EventDescriptor {
    id: EVENT_LOG,
    name: "Log",
    doc: Some("Forwards a log line to the host."),
    args: &[
        ArgDescriptor {
            dtype: DataType::UInt8,
            name: Some("log_level"),
            doc: None,
        },
        ArgDescriptor {
            dtype: DataType::Utf8,
            name: Some("log_msg"),
            doc: None,
        },
    ],
};

/// Descriptor of the mandatory `FeatureStateTransition` event.
pub(crate) static FEATURE_STATE_TRANSITION_EVENT: EventDescriptor<'static> = EventDescriptor {
    id: EVENT_FEATURE_STATE_TRANSITION,
    name: "FeatureStateTransition",
    doc: Some("Reports that the feature's state changed."),
    args: &[
        ArgDescriptor {
            dtype: DataType::UInt8,
            name: Some("previous_state"),
            doc: None,
        },
        ArgDescriptor {
            dtype: DataType::UInt8,
            name: Some("current_state"),
            doc: None,
        },
    ],
};

/// Reasons an emission request is refused before anything hits the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EmitError {
    /// The given feature id is not part of the device.
    #[error("unknown feature id {0:#04x}")]
    UnknownFeature(u8),
    /// The new state is not in the feature's declared state table.
    #[error("state {0:#04x} is not declared by the feature")]
    UnknownState(u8),
}

/// Compose `[Event][feature][event][parts…]` into the transmit path.
pub(crate) fn emit(tx: &mut dyn MessageTx, feature_id: u8, event_id: u8, parts: &[&[u8]]) {
    tx.begin();
    tx.push(&[MessageType::Event.wire(), feature_id, event_id]);
    for part in parts {
        tx.push(part);
    }
    tx.end();
}

/// Emit a `Log` event unless the feature's threshold filters it out.
pub(crate) fn emit_log(
    tx: &mut dyn MessageTx,
    feature_id: u8,
    threshold: u8,
    level: LogLevel,
    text: &str,
) {
    if (level as u8) < threshold {
        return;
    }
    emit(tx, feature_id, EVENT_LOG, &[&[level as u8], text.as_bytes()]);
}

/// Best-effort warning about reading-frame errors, sent on the Core
/// feature after the offending buffer has been dispatched.
pub(crate) fn emit_frame_error_log(tx: &mut dyn MessageTx, threshold: u8, count: u16) {
    let mut line: heapless::String<MAX_LOG_LINE> = heapless::String::new();
    if write!(line, "Reading-frame errors: {count}").is_err() {
        return;
    }
    emit_log(tx, 0, threshold, LogLevel::Warning, line.as_str());
}

/// Switch a feature to `new_state`, emitting the transition event.
///
/// Setting the current state again is a no-op. When the feature declares a
/// state table, undeclared states are refused.
pub(crate) fn transition(
    tx: &mut dyn MessageTx,
    feature_id: u8,
    states: &[StateDescriptor<'_>],
    runtime: &mut FeatureRuntime,
    new_state: u8,
) -> Result<(), EmitError> {
    if new_state == runtime.feature_state {
        return Ok(());
    }
    if !states.is_empty() && !states.iter().any(|s| s.id == new_state) {
        return Err(EmitError::UnknownState(new_state));
    }
    let previous = runtime.feature_state;
    runtime.feature_state = new_state;
    emit(
        tx,
        feature_id,
        EVENT_FEATURE_STATE_TRANSITION,
        &[&[previous, new_state]],
    );
    Ok(())
}
