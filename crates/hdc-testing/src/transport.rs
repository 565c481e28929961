//! A scripted transport: RX bursts are queued by the test, TX bytes are
//! captured for inspection.

use std::collections::VecDeque;

use hdc_device::Transport;

/// In-memory [`Transport`] with scripted reception and captured
/// transmission.
///
/// Tests queue host-to-device bytes with [`MockTransport::push_burst`];
/// each queued burst is delivered by one `poll_receive` call, mirroring an
/// idle-delimited UART burst. Transmissions complete instantly unless a
/// busy period is scripted with [`MockTransport::set_busy_polls`].
#[derive(Debug, Default)]
pub struct MockTransport {
    bursts: VecDeque<Vec<u8>>,
    wire: Vec<u8>,
    busy_polls: u32,
    resets: usize,
    transmits: usize,
}

impl MockTransport {
    /// A transport with nothing queued.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue one RX burst for the engine's next poll.
    pub fn push_burst(&mut self, bytes: &[u8]) {
        self.bursts.push_back(bytes.to_vec());
    }

    /// All bytes transmitted so far, in order.
    #[must_use]
    pub fn wire(&self) -> &[u8] {
        &self.wire
    }

    /// Take and clear the captured TX bytes.
    pub fn take_wire(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.wire)
    }

    /// Number of `reset_receive` calls observed.
    #[must_use]
    pub fn resets(&self) -> usize {
        self.resets
    }

    /// Number of transfers started.
    #[must_use]
    pub fn transmits(&self) -> usize {
        self.transmits
    }

    /// Let the next `n` completion polls report a busy link.
    pub fn set_busy_polls(&mut self, n: u32) {
        self.busy_polls = n;
    }
}

impl Transport for MockTransport {
    fn poll_receive(&mut self, buf: &mut [u8]) -> usize {
        let Some(burst) = self.bursts.pop_front() else {
            return 0;
        };
        let n = burst.len().min(buf.len());
        if let (Some(dst), Some(src)) = (buf.get_mut(..n), burst.get(..n)) {
            dst.copy_from_slice(src);
        }
        n
    }

    fn reset_receive(&mut self) {
        self.resets = self.resets.saturating_add(1);
    }

    fn start_transmit(&mut self, data: &[u8]) {
        self.wire.extend_from_slice(data);
        self.transmits = self.transmits.saturating_add(1);
    }

    fn tx_complete(&self) -> bool {
        self.busy_polls == 0
    }

    fn wait_tx_complete(&mut self) -> bool {
        self.busy_polls = 0;
        true
    }
}
