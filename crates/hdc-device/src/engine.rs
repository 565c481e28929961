//! The protocol engine: construction-time validation, the cooperative
//! `work()` entry point, message routing and command dispatch.
//!
//! There is no separate init step and no "uninitialized" state: a
//! successfully constructed [`Engine`] is running. All descriptor-integrity
//! errors surface from [`Engine::new`] as [`InitError`]s; the dispatch
//! paths afterwards rely on validated tables and never allocate.

use core::any::Any;

use crate::command::{
    CommandContext, MessageContext, RawMessageHandler, ReservedException,
};
use crate::descriptor::{
    self, DeviceDescriptor, FeatureRuntime, InitError, MAX_FEATURES, MAX_STORED_PROPERTIES,
};
use crate::event::{self, EmitError, LogLevel};
use crate::frame::{self, MAX_REQUEST_CEILING, MIN_REQUEST_SIZE, PACKET_OVERHEAD};
use crate::idl;
use crate::message::{MessageType, MetaId, FIRST_RESERVED_TYPE};
use crate::property::{self, PoolSlot, PoolView};
use crate::transport::Transport;
use crate::txbuf::{MessageTx, TxBuffers, TxPath};

/// Smallest workable transmit buffer: one packet with a few payload bytes.
const MIN_TX_CAP: usize = 8;

/// Optional engine configuration.
#[derive(Default)]
pub struct EngineOptions {
    /// Router for application-defined message classes (type byte
    /// `< 0xF0`). Reserved classes are never delegated.
    pub raw_message_handler: Option<RawMessageHandler>,
}

/// The device-side protocol engine.
///
/// Const parameters fix the buffer geometry at build time:
/// `RX_CAP` bounds the receive buffer (the accepted request size is
/// `RX_CAP - 3`, capped at 254), `TX_CAP` sizes each of the two transmit
/// buffers (258 or more keeps multi-packet replies available), and `POOL`
/// sizes the byte pool backing stored properties. Nothing in the engine
/// touches a heap.
pub struct Engine<
    'd,
    T: Transport,
    const RX_CAP: usize = 131,
    const TX_CAP: usize = 512,
    const POOL: usize = 256,
> {
    device: &'d DeviceDescriptor<'d>,
    transport: T,
    options: EngineOptions,
    rx: [u8; RX_CAP],
    rx_len: usize,
    tx: TxBuffers<TX_CAP>,
    runtime: heapless::Vec<FeatureRuntime, MAX_FEATURES>,
    pool: [u8; POOL],
    pool_slots: heapless::Vec<PoolSlot, MAX_STORED_PROPERTIES>,
    core_index: usize,
    max_request: usize,
}

impl<'d, T: Transport, const RX_CAP: usize, const TX_CAP: usize, const POOL: usize>
    Engine<'d, T, RX_CAP, TX_CAP, POOL>
{
    /// Validate the descriptor tables and bring the engine up.
    ///
    /// # Errors
    ///
    /// Any violated descriptor-integrity rule or an unusable buffer
    /// geometry is reported as the matching [`InitError`].
    pub fn new(device: &'d DeviceDescriptor<'d>, transport: T) -> Result<Self, InitError> {
        Self::with_options(device, transport, EngineOptions::default())
    }

    /// [`Engine::new`] with explicit [`EngineOptions`].
    ///
    /// # Errors
    ///
    /// See [`Engine::new`].
    pub fn with_options(
        device: &'d DeviceDescriptor<'d>,
        transport: T,
        options: EngineOptions,
    ) -> Result<Self, InitError> {
        let max_request = RX_CAP
            .saturating_sub(PACKET_OVERHEAD)
            .min(MAX_REQUEST_CEILING);
        if max_request < MIN_REQUEST_SIZE {
            return Err(InitError::RxBufferTooSmall);
        }
        if TX_CAP < MIN_TX_CAP {
            return Err(InitError::TxBufferTooSmall);
        }
        let core_index = descriptor::validate(device)?;

        let mut runtime = heapless::Vec::new();
        for feature in device.features {
            let slot = FeatureRuntime {
                feature_state: feature.initial_state,
                log_event_threshold: LogLevel::coerce(feature.initial_log_threshold),
            };
            runtime.push(slot).map_err(|_| InitError::TooManyFeatures)?;
        }

        let mut pool = [0u8; POOL];
        let mut pool_slots = heapless::Vec::new();
        property::build_pool(device, &mut pool, &mut pool_slots)?;

        Ok(Self {
            device,
            transport,
            options,
            rx: [0; RX_CAP],
            rx_len: 0,
            tx: TxBuffers::new(),
            runtime,
            pool,
            pool_slots,
            core_index,
            max_request,
        })
    }

    /// One iteration of the cooperative super-loop.
    ///
    /// Polls the transport for a completed RX burst, parses and dispatches
    /// at most one request, then starts transmitting anything composed
    /// while the link was busy. `app` is the opaque handle command
    /// handlers downcast; pass `&mut ()` when there is none.
    pub fn work(&mut self, app: &mut dyn Any) {
        let burst = {
            let free = self.rx.get_mut(self.rx_len..).unwrap_or(&mut []);
            if free.is_empty() {
                0
            } else {
                self.transport.poll_receive(free)
            }
        };
        if burst > 0 {
            self.rx_len = self.rx_len.saturating_add(burst).min(RX_CAP);
            self.process_rx(app);
        }

        let mut path = TxPath::new(&mut self.tx, &mut self.transport);
        path.service();
    }

    /// Force out everything composed so far and wait for the wire to
    /// drain, bounded by the transport's flush deadline.
    pub fn flush(&mut self) {
        let mut path = TxPath::new(&mut self.tx, &mut self.transport);
        path.flush();
    }

    fn core_threshold(&self) -> u8 {
        self.runtime
            .get(self.core_index)
            .map_or(LogLevel::Warning as u8, |r| r.log_event_threshold)
    }

    fn process_rx(&mut self, app: &mut dyn Any) {
        let mut request: heapless::Vec<u8, 255> = heapless::Vec::new();
        let (got_message, errors, restart) = {
            let report = frame::scan(
                self.rx.get(..self.rx_len).unwrap_or(&[]),
                self.max_request,
            );
            if let Some(message) = report.message {
                // Accepted payloads are bounded by max_request <= 254.
                let _ = request.extend_from_slice(message);
            }
            (report.message.is_some(), report.frame_errors, report.restart)
        };

        if got_message {
            self.dispatch(request.as_slice(), app);
        }
        // The frame-error warning goes out after the dispatched reply and
        // before reception restarts.
        if errors > 0 {
            #[cfg(feature = "defmt")]
            defmt::warn!("dropped {} bytes while reframing", errors);
            let threshold = self.core_threshold();
            let mut path = TxPath::new(&mut self.tx, &mut self.transport);
            event::emit_frame_error_log(&mut path, threshold, errors);
        }
        if got_message || restart {
            self.rx_len = 0;
            self.transport.reset_receive();
        }
    }

    fn dispatch(&mut self, request: &[u8], app: &mut dyn Any) {
        // Empty messages are legal and ignored.
        let Some(&message_type) = request.first() else {
            return;
        };
        let device = self.device;
        let core_threshold = self.core_threshold();
        let mut path = TxPath::new(&mut self.tx, &mut self.transport);

        if message_type < FIRST_RESERVED_TYPE {
            if let Some(handler) = self.options.raw_message_handler {
                let mut ctx = MessageContext {
                    tx: &mut path,
                    app,
                };
                handler(&mut ctx, request);
            } else {
                event::emit_log(
                    &mut path,
                    0,
                    core_threshold,
                    LogLevel::Error,
                    "Unknown message type",
                );
            }
            return;
        }

        match MessageType::from_wire(message_type) {
            Some(MessageType::Meta) => {
                handle_meta(&mut path, device, core_threshold, self.max_request, request);
            }
            Some(MessageType::Echo) => path.send_parts(&[request]),
            Some(MessageType::Command) => {
                let pool = PoolView {
                    bytes: &mut self.pool,
                    slots: &self.pool_slots,
                };
                dispatch_command(
                    &mut path,
                    device,
                    &mut self.runtime,
                    pool,
                    core_threshold,
                    request,
                    app,
                );
            }
            // Events only ever travel device-to-host.
            _ => event::emit_log(
                &mut path,
                0,
                core_threshold,
                LogLevel::Error,
                "Unknown message type",
            ),
        }
    }

    fn feature_index(&self, feature_id: Option<u8>) -> Result<usize, EmitError> {
        match feature_id {
            None => Ok(self.core_index),
            Some(id) => self
                .device
                .features
                .iter()
                .position(|f| f.id == id)
                .ok_or(EmitError::UnknownFeature(id)),
        }
    }

    /// Emit an event with a contiguous payload. `None` addresses Core.
    ///
    /// # Errors
    ///
    /// Refuses feature ids the device does not declare.
    pub fn emit_event(
        &mut self,
        feature_id: Option<u8>,
        event_id: u8,
        payload: &[u8],
    ) -> Result<(), EmitError> {
        self.emit_event_parts(feature_id, event_id, &[payload])
    }

    /// Emit an event whose payload is assembled from `parts`.
    ///
    /// # Errors
    ///
    /// Refuses feature ids the device does not declare.
    pub fn emit_event_parts(
        &mut self,
        feature_id: Option<u8>,
        event_id: u8,
        parts: &[&[u8]],
    ) -> Result<(), EmitError> {
        let index = self.feature_index(feature_id)?;
        let id = self.device.features.get(index).map_or(0, |f| f.id);
        let mut path = TxPath::new(&mut self.tx, &mut self.transport);
        event::emit(&mut path, id, event_id, parts);
        Ok(())
    }

    /// Emit a `Log` event, dropped silently when `level` is below the
    /// feature's threshold. `None` addresses Core.
    ///
    /// # Errors
    ///
    /// Refuses feature ids the device does not declare.
    pub fn emit_log(
        &mut self,
        feature_id: Option<u8>,
        level: LogLevel,
        text: &str,
    ) -> Result<(), EmitError> {
        let index = self.feature_index(feature_id)?;
        let Some(feature) = self.device.features.get(index) else {
            return Ok(());
        };
        let threshold = self
            .runtime
            .get(index)
            .map_or(LogLevel::Warning as u8, |r| r.log_event_threshold);
        let mut path = TxPath::new(&mut self.tx, &mut self.transport);
        event::emit_log(&mut path, feature.id, threshold, level, text);
        Ok(())
    }

    /// Switch a feature's state, emitting the transition event when the
    /// state actually changes. `None` addresses Core.
    ///
    /// # Errors
    ///
    /// Refuses undeclared feature ids and, for features with a state
    /// table, undeclared states.
    pub fn set_feature_state(
        &mut self,
        feature_id: Option<u8>,
        new_state: u8,
    ) -> Result<(), EmitError> {
        let index = self.feature_index(feature_id)?;
        let Some(feature) = self.device.features.get(index) else {
            return Ok(());
        };
        let Some(runtime) = self.runtime.get_mut(index) else {
            return Ok(());
        };
        let mut path = TxPath::new(&mut self.tx, &mut self.transport);
        event::transition(&mut path, feature.id, feature.states, runtime, new_state)
    }

    /// Largest request message the engine accepts, in bytes.
    #[must_use]
    pub fn max_request_size(&self) -> usize {
        self.max_request
    }

    /// Current state byte of the given feature.
    #[must_use]
    pub fn feature_state(&self, feature_id: u8) -> Option<u8> {
        let index = self.feature_index(Some(feature_id)).ok()?;
        self.runtime.get(index).map(|r| r.feature_state)
    }

    /// Current log-event threshold of the given feature.
    #[must_use]
    pub fn log_event_threshold(&self, feature_id: u8) -> Option<u8> {
        let index = self.feature_index(Some(feature_id)).ok()?;
        self.runtime.get(index).map(|r| r.log_event_threshold)
    }

    /// The descriptor tree the engine was built from.
    #[must_use]
    pub fn device(&self) -> &'d DeviceDescriptor<'d> {
        self.device
    }

    /// Borrow the transport.
    #[must_use]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Mutably borrow the transport.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Raw pool bytes of a stored property, serialized in wire format.
    #[must_use]
    pub fn stored_property_bytes(&self, feature_id: u8, property_id: u8) -> Option<&[u8]> {
        property::stored_bytes(
            self.device,
            &self.pool,
            &self.pool_slots,
            feature_id,
            property_id,
        )
    }

    /// A stored `UINT8` property's current value.
    #[must_use]
    pub fn stored_property_u8(&self, feature_id: u8, property_id: u8) -> Option<u8> {
        match self.stored_property_bytes(feature_id, property_id)? {
            [value] => Some(*value),
            _ => None,
        }
    }

    /// A stored `UINT32` property's current value.
    #[must_use]
    pub fn stored_property_u32(&self, feature_id: u8, property_id: u8) -> Option<u32> {
        let bytes: [u8; 4] = self
            .stored_property_bytes(feature_id, property_id)?
            .try_into()
            .ok()?;
        Some(u32::from_le_bytes(bytes))
    }

    /// A stored `UTF8` property's current text, up to its NUL terminator.
    #[must_use]
    pub fn stored_property_str(&self, feature_id: u8, property_id: u8) -> Option<&str> {
        let bytes = self.stored_property_bytes(feature_id, property_id)?;
        let len = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        core::str::from_utf8(bytes.get(..len)?).ok()
    }

    /// Overwrite a stored property's value from application code.
    ///
    /// The read-only flag guards host writes only; the application owns its
    /// values. Returns false when the property is unknown, not stored, or
    /// `value` does not fit the slot (fixed widths must match exactly,
    /// UTF-8 keeps one byte reserved for its NUL terminator).
    pub fn write_stored_property(&mut self, feature_id: u8, property_id: u8, value: &[u8]) -> bool {
        let Some((slot, dtype)) = property::stored_bytes_mut(
            self.device,
            &mut self.pool,
            &self.pool_slots,
            feature_id,
            property_id,
        ) else {
            return false;
        };
        let fits = match dtype.fixed_size() {
            Some(width) => value.len() == width,
            None if dtype == crate::dtype::DataType::Utf8 => value.len() < slot.len(),
            None => value.len() <= slot.len(),
        };
        if !fits {
            return false;
        }
        if let Some(dst) = slot.get_mut(..value.len()) {
            dst.copy_from_slice(value);
        }
        if dtype == crate::dtype::DataType::Utf8 {
            if let Some(nul) = slot.get_mut(value.len()) {
                *nul = 0;
            }
        }
        true
    }
}

fn handle_meta(
    tx: &mut dyn MessageTx,
    device: &DeviceDescriptor<'_>,
    core_threshold: u8,
    max_request: usize,
    request: &[u8],
) {
    let max_request = u32::try_from(max_request).unwrap_or(u32::MAX);
    match request {
        [_, id] if *id == MetaId::HdcVersion.wire() => {
            tx.send_parts(&[
                &[MessageType::Meta.wire(), MetaId::HdcVersion.wire()],
                crate::PROTOCOL_VERSION.as_bytes(),
            ]);
        }
        [_, id] if *id == MetaId::MaxReq.wire() => {
            tx.send_parts(&[
                &[MessageType::Meta.wire(), MetaId::MaxReq.wire()],
                &max_request.to_le_bytes(),
            ]);
        }
        [_, id] if *id == MetaId::IdlJson.wire() => {
            idl::stream(tx, device, max_request);
        }
        _ => {
            // A Meta request with a missing or unknown query, or with
            // trailing payload bytes, is echoed back verbatim so the host
            // can see what arrived.
            tx.send_parts(&[request]);
            event::emit_log(
                tx,
                0,
                core_threshold,
                LogLevel::Error,
                "Malformed meta request",
            );
        }
    }
}

fn dispatch_command(
    tx: &mut dyn MessageTx,
    device: &DeviceDescriptor<'_>,
    runtime: &mut [FeatureRuntime],
    pool: PoolView<'_>,
    core_threshold: u8,
    request: &[u8],
    app: &mut dyn Any,
) {
    let (Some(&feature_id), Some(&command_id)) = (request.get(1), request.get(2)) else {
        event::emit_log(
            tx,
            0,
            core_threshold,
            LogLevel::Error,
            "Command request too short",
        );
        return;
    };

    let Some(feature_index) = device.features.iter().position(|f| f.id == feature_id) else {
        tx.send_parts(&[&[
            MessageType::Command.wire(),
            feature_id,
            command_id,
            ReservedException::UnknownFeature.wire(),
        ]]);
        return;
    };
    let Some(feature) = device.features.get(feature_index) else {
        return;
    };

    let command = feature
        .commands
        .iter()
        .find(|c| c.id == command_id)
        .or_else(|| property::mandatory_command(command_id));
    let Some(command) = command else {
        tx.send_parts(&[&[
            MessageType::Command.wire(),
            feature_id,
            command_id,
            ReservedException::UnknownCommand.wire(),
        ]]);
        return;
    };

    let Some(runtime_slot) = runtime.get_mut(feature_index) else {
        return;
    };
    let mut ctx = CommandContext {
        tx,
        feature,
        feature_index,
        command_id,
        runtime: runtime_slot,
        pool,
        app,
        request,
        replied: false,
    };
    match (command.handler)(&mut ctx) {
        Ok(_reply) => {}
        Err(error) => {
            if ctx.has_replied() {
                // The reply is already on the wire; all that is left is to
                // note the late failure.
                ctx.log(LogLevel::Error, "Command failed after replying");
            } else {
                ctx.reply_error(&error);
            }
        }
    }
}
