//! Byte-transport abstraction between the engine and the wire driver.
//!
//! The engine never touches UART/USB registers. A [`Transport`]
//! implementation wraps whatever moves bytes (interrupt-driven UART with
//! DMA, USB-CDC endpoint, an in-memory mock) and exposes reception as
//! idle-delimited bursts and transmission as a non-blocking transfer with a
//! completion flag. The interrupt service routines of a real target do
//! nothing but set the flags this trait reports; all protocol work happens
//! in the engine's cooperative `work()` call.

/// Burst-oriented byte transport.
///
/// Buffer discipline: a slice handed to [`Transport::start_transmit`] stays
/// logically lent to the transport until [`Transport::tx_complete`] reports
/// true. The engine upholds this by never writing to a buffer while its
/// transfer is in flight.
pub trait Transport {
    /// Append a completed RX burst into `buf`.
    ///
    /// Returns the number of bytes written, or 0 when no burst boundary has
    /// been observed since the last call. A burst ends when the line goes
    /// idle (UART idle interrupt, USB packet boundary, …).
    fn poll_receive(&mut self, buf: &mut [u8]) -> usize;

    /// Drop any partially received bytes and re-arm reception at a burst
    /// boundary. Called after every parsed packet and after frame errors.
    fn reset_receive(&mut self);

    /// Begin a non-blocking transmission of `data`.
    fn start_transmit(&mut self, data: &[u8]);

    /// True when no transmission is in flight.
    fn tx_complete(&self) -> bool;

    /// Block until the in-flight transmission drains or the transport's
    /// flush deadline (on the order of 100 ms) passes.
    ///
    /// Returns false on deadline. The default implementation spins on
    /// [`Transport::tx_complete`] without a deadline, which is only
    /// appropriate for transports that cannot stall.
    fn wait_tx_complete(&mut self) -> bool {
        while !self.tx_complete() {
            core::hint::spin_loop();
        }
        true
    }
}
