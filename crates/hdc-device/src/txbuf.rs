//! Double-buffered transmit composer.
//!
//! Two equal TX buffers: while one is being transmitted, replies and events
//! are packetized into the other. Swapping happens at packet boundaries
//! only, so a partially written packet is never handed to the transport.
//! The PS byte of each packet is written last, after payload and checksum
//! are already in place.

use crate::frame::{checksum, MAX_PAYLOAD, PACKET_OVERHEAD, TERMINATOR};
use crate::transport::Transport;

/// The pair of transmit buffers plus composition bookkeeping.
///
/// `compose` indexes the buffer currently being written; the other one is
/// owned by the transport while `in_flight` is set.
pub(crate) struct TxBuffers<const CAP: usize> {
    bufs: [[u8; CAP]; 2],
    compose: usize,
    compose_len: usize,
    in_flight: bool,
}

impl<const CAP: usize> TxBuffers<CAP> {
    pub(crate) const fn new() -> Self {
        Self {
            bufs: [[0; CAP]; 2],
            compose: 1,
            compose_len: 0,
            in_flight: false,
        }
    }
}

/// Sink for one or more outgoing messages.
///
/// Object-safe so that command handlers and the JSON generator can write
/// through `&mut dyn MessageTx` without seeing the engine's buffer
/// geometry. `begin`/`push`/`end` stream one message; `send_parts` is the
/// common shortcut for replies whose payload is a concatenation of slices.
pub(crate) trait MessageTx {
    /// Open a new outgoing message.
    fn begin(&mut self);
    /// Append payload bytes to the open message.
    fn push(&mut self, bytes: &[u8]);
    /// Close the open message, finalizing its last packet.
    fn end(&mut self);

    /// Compose one whole message from concatenated `parts`.
    fn send_parts(&mut self, parts: &[&[u8]]) {
        self.begin();
        for part in parts {
            self.push(part);
        }
        self.end();
    }
}

/// Borrowed pairing of the TX buffers with the transport, valid for one
/// dispatch. Also owns the streaming packetizer state, making the C
/// original's hidden `static` composition state an explicit value.
pub(crate) struct TxPath<'a, T: Transport, const CAP: usize> {
    buffers: &'a mut TxBuffers<CAP>,
    transport: &'a mut T,
    open: bool,
    packet_base: usize,
    packet_payload: usize,
}

impl<'a, T: Transport, const CAP: usize> TxPath<'a, T, CAP> {
    pub(crate) fn new(buffers: &'a mut TxBuffers<CAP>, transport: &'a mut T) -> Self {
        Self {
            buffers,
            transport,
            open: false,
            packet_base: 0,
            packet_payload: 0,
        }
    }

    /// Largest payload one packet can carry in a `CAP`-sized buffer.
    /// Below the recommended buffer size this truncates to `CAP - 3`,
    /// which disables multi-packet messages.
    const fn max_packet_payload() -> usize {
        let by_buffer = CAP.saturating_sub(PACKET_OVERHEAD);
        if by_buffer < MAX_PAYLOAD {
            by_buffer
        } else {
            MAX_PAYLOAD
        }
    }

    /// Room a maximal packet needs, reserved before each packet starts so
    /// that a swap can never fall mid-packet.
    const fn packet_room() -> usize {
        Self::max_packet_payload().saturating_add(PACKET_OVERHEAD)
    }

    /// Housekeeping entry point: retire a finished transfer and start
    /// transmitting anything composed while the link was busy.
    pub(crate) fn service(&mut self) {
        if self.buffers.in_flight && self.transport.tx_complete() {
            self.buffers.in_flight = false;
        }
        if !self.buffers.in_flight && self.buffers.compose_len > 0 && !self.open {
            self.swap_and_send();
        }
    }

    /// Force everything composed so far onto the wire and wait for it.
    pub(crate) fn flush(&mut self) {
        debug_assert!(!self.open, "flush during message composition");
        self.drain_and_swap();
        if self.buffers.in_flight {
            // A false return means the transport missed its deadline; the
            // reply path is silent about that and the host re-times-out.
            let _ = self.transport.wait_tx_complete();
            self.buffers.in_flight = false;
        }
    }

    fn swap_and_send(&mut self) {
        debug_assert!(!self.buffers.in_flight);
        let sending = self.buffers.compose;
        let len = self.buffers.compose_len;
        self.buffers.compose = 1_usize.saturating_sub(sending);
        self.buffers.compose_len = 0;
        self.buffers.in_flight = true;
        if let Some(data) = self.buffers.bufs.get(sending).and_then(|b| b.get(..len)) {
            self.transport.start_transmit(data);
        }
    }

    /// Wait out the in-flight transfer, then hand the composed bytes over.
    fn drain_and_swap(&mut self) {
        if self.buffers.compose_len == 0 {
            return;
        }
        if self.buffers.in_flight {
            let _ = self.transport.wait_tx_complete();
            self.buffers.in_flight = false;
        }
        self.swap_and_send();
    }

    fn ensure_packet_room(&mut self) {
        let free = CAP.saturating_sub(self.buffers.compose_len);
        if free < Self::packet_room() {
            self.drain_and_swap();
        }
    }

    /// Reserve the PS slot of a fresh packet.
    fn open_packet(&mut self) {
        self.ensure_packet_room();
        self.packet_base = self.buffers.compose_len;
        self.buffers.compose_len = self.buffers.compose_len.saturating_add(1);
        self.packet_payload = 0;
    }

    /// Write CHK and TERM, then the PS byte last.
    #[allow(
        clippy::indexing_slicing,
        clippy::arithmetic_side_effects,
        clippy::cast_possible_truncation
    )]
    // compose < 2, packet_base + payload + 3 <= CAP and payload <= 255 are
    // maintained by open_packet's room reservation.
    fn finalize_packet(&mut self) {
        let ps = self.packet_payload;
        let base = self.packet_base;
        let buf = &mut self.buffers.bufs[self.buffers.compose];
        let chk = checksum(ps as u8, &buf[base + 1..base + 1 + ps]);
        buf[base + 1 + ps] = chk;
        buf[base + 2 + ps] = TERMINATOR;
        buf[base] = ps as u8;
        self.buffers.compose_len = base + ps + PACKET_OVERHEAD;
    }
}

impl<T: Transport, const CAP: usize> MessageTx for TxPath<'_, T, CAP> {
    fn begin(&mut self) {
        debug_assert!(!self.open, "previous message still open");
        if self.open {
            return;
        }
        self.open_packet();
        self.open = true;
    }

    #[allow(clippy::indexing_slicing, clippy::arithmetic_side_effects)]
    // Same bound as finalize_packet: the copy target lies inside the room
    // reserved by open_packet.
    fn push(&mut self, mut bytes: &[u8]) {
        debug_assert!(self.open, "push outside begin/end");
        if !self.open {
            return;
        }
        while !bytes.is_empty() {
            let cap = Self::max_packet_payload();
            if self.packet_payload == cap {
                self.finalize_packet();
                self.open_packet();
            }
            let take = bytes.len().min(cap - self.packet_payload);
            let dst = self.buffers.compose_len;
            self.buffers.bufs[self.buffers.compose][dst..dst + take]
                .copy_from_slice(&bytes[..take]);
            self.buffers.compose_len += take;
            self.packet_payload += take;
            bytes = &bytes[take..];
        }
    }

    fn end(&mut self) {
        debug_assert!(self.open, "end without begin");
        if !self.open {
            return;
        }
        // A final packet of exactly 255 bytes would read as "more follows",
        // so such a message is closed with an extra empty packet.
        let needs_empty_tail = self.packet_payload == MAX_PAYLOAD;
        self.finalize_packet();
        if needs_empty_tail {
            self.open_packet();
            self.finalize_packet();
        }
        self.open = false;
    }
}
