//! Host-side packetizer and deframer, the mirror image of the device's
//! framing.

use hdc_device::frame::{checksum, MAX_PAYLOAD, TERMINATOR};

/// Why a captured wire stream failed to deframe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeframeError {
    /// The stream ended in the middle of a packet.
    Truncated,
    /// A packet's bytes do not fold to zero.
    BadChecksum,
    /// A packet is not closed by the terminator byte.
    MissingTerminator,
    /// The stream ended with a message still open (a 255-byte packet was
    /// not followed by a closing packet).
    OpenMessage,
}

/// Frame one payload as a single packet.
fn packet(payload: &[u8]) -> Vec<u8> {
    assert!(payload.len() <= MAX_PAYLOAD, "payload exceeds one packet");
    let ps = u8::try_from(payload.len()).unwrap();
    let mut out = Vec::with_capacity(payload.len() + 3);
    out.push(ps);
    out.extend_from_slice(payload);
    out.push(checksum(ps, payload));
    out.push(TERMINATOR);
    out
}

/// Frame a single-packet request, panicking when `payload` would not fit
/// one packet (the device accepts single-packet requests only).
#[must_use]
pub fn frame_request(payload: &[u8]) -> Vec<u8> {
    assert!(payload.len() < MAX_PAYLOAD, "requests are single-packet");
    packet(payload)
}

/// Frame an arbitrary-length message, splitting at 255-byte packets and
/// appending the empty closing packet for exact multiples of 255.
#[must_use]
pub fn frame_message(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut rest = payload;
    loop {
        let take = rest.len().min(MAX_PAYLOAD);
        out.extend_from_slice(&packet(&rest[..take]));
        rest = &rest[take..];
        if take < MAX_PAYLOAD {
            break;
        }
        if rest.is_empty() {
            out.extend_from_slice(&packet(&[]));
            break;
        }
    }
    out
}

/// Split a captured wire stream back into logical messages.
///
/// # Errors
///
/// Any framing violation in the stream is reported; device output must
/// always deframe cleanly.
pub fn deframe(wire: &[u8]) -> Result<Vec<Vec<u8>>, DeframeError> {
    let mut messages = Vec::new();
    let mut current: Vec<u8> = Vec::new();
    let mut open = false;
    let mut pos = 0usize;
    while pos < wire.len() {
        let ps = wire[pos] as usize;
        let end = pos + ps + 3;
        if end > wire.len() {
            return Err(DeframeError::Truncated);
        }
        let body = &wire[pos..end - 1];
        if body.iter().fold(0u8, |a, &b| a.wrapping_add(b)) != 0 {
            return Err(DeframeError::BadChecksum);
        }
        if wire[end - 1] != TERMINATOR {
            return Err(DeframeError::MissingTerminator);
        }
        current.extend_from_slice(&wire[pos + 1..pos + 1 + ps]);
        if ps == MAX_PAYLOAD {
            open = true;
        } else {
            messages.push(std::mem::take(&mut current));
            open = false;
        }
        pos = end;
    }
    if open {
        return Err(DeframeError::OpenMessage);
    }
    Ok(messages)
}

#[cfg(test)]
mod tests {
    use super::{deframe, frame_message, frame_request};

    #[test]
    fn test_request_round_trip() {
        let wire = frame_request(&[0xF1, b'p', b'i', b'n', b'g']);
        let messages = deframe(&wire).unwrap();
        assert_eq!(messages, vec![b"\xF1ping".to_vec()]);
    }

    #[test]
    fn test_empty_message() {
        let wire = frame_message(&[]);
        assert_eq!(wire, vec![0x00, 0x00, 0x1E]);
        assert_eq!(deframe(&wire).unwrap(), vec![Vec::<u8>::new()]);
    }

    #[test]
    fn test_multiple_of_255_round_trip() {
        let payload = vec![0x5A; 510];
        let wire = frame_message(&payload);
        // Two full packets plus the empty closing packet.
        assert_eq!(wire.len(), 2 * 258 + 3);
        assert_eq!(deframe(&wire).unwrap(), vec![payload]);
    }

    #[test]
    fn test_unterminated_long_message_is_detected() {
        let payload = vec![0x5A; 255];
        let mut wire = frame_message(&payload);
        // Drop the closing empty packet.
        wire.truncate(258);
        assert!(deframe(&wire).is_err());
    }
}
