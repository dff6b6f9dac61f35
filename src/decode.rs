//! MQTT 3.1.1 wire format, inbound side.
//!
//! The modem delivers bytes in whatever chunk sizes the radio produced, so
//! the decoder is a resumable state machine fed one byte at a time. A frame
//! whose body is larger than the frame buffer is discarded byte-by-byte
//! without losing the frame boundary; only structurally corrupt input is
//! unrecoverable.

use heapless::Vec;

/// Unrecoverable framing faults. Once the stream is corrupt the position of
/// the next frame is unknowable and the link has to be torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DecodeError {
    /// Reserved or unknown packet-type nibble.
    BadType,
    /// The remaining-length field ran past its 4-byte limit.
    BadLength,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecodeState {
    /// Waiting for a fixed-header byte.
    Header,
    /// Collecting remaining-length bytes.
    Length,
    /// Collecting body bytes into the frame buffer.
    Body,
    /// Discarding the body of a frame too large for the buffer.
    Skip,
}

pub(crate) struct Decoder<const N: usize> {
    state: DecodeState,
    header: u8,
    remaining: usize,
    shift: u32,
    body: Vec<u8, N>,
}

impl<const N: usize> Decoder<N> {
    pub(crate) fn new() -> Self {
        Self {
            state: DecodeState::Header,
            header: 0,
            remaining: 0,
            shift: 0,
            body: Vec::new(),
        }
    }

    /// Feeds one byte. `Ok(true)` means a complete frame is buffered and
    /// readable through [`header`](Self::header) / [`body`](Self::body)
    /// until the next byte is pushed.
    pub(crate) fn push(&mut self, byte: u8) -> Result<bool, DecodeError> {
        match self.state {
            DecodeState::Header => {
                let kind = byte & 0xF0;
                if kind == 0x00 || kind == 0xF0 {
                    return Err(DecodeError::BadType);
                }
                self.header = byte;
                self.remaining = 0;
                self.shift = 0;
                self.body.clear();
                self.state = DecodeState::Length;
                Ok(false)
            }
            DecodeState::Length => {
                if self.shift > 21 {
                    return Err(DecodeError::BadLength);
                }
                self.remaining |= ((byte & 0x7F) as usize) << self.shift;
                self.shift += 7;
                if byte & 0x80 == 0 {
                    if self.remaining == 0 {
                        self.state = DecodeState::Header;
                        return Ok(true);
                    }
                    if self.remaining <= N {
                        self.state = DecodeState::Body;
                    } else {
                        warn!(
                            "inbound frame body of {} bytes exceeds the {} byte buffer, skipping",
                            self.remaining, N
                        );
                        self.state = DecodeState::Skip;
                    }
                }
                Ok(false)
            }
            DecodeState::Body => {
                // remaining <= N was checked on entry, push cannot fail
                let _ = self.body.push(byte);
                if self.body.len() == self.remaining {
                    self.state = DecodeState::Header;
                    return Ok(true);
                }
                Ok(false)
            }
            DecodeState::Skip => {
                self.remaining -= 1;
                if self.remaining == 0 {
                    self.state = DecodeState::Header;
                }
                Ok(false)
            }
        }
    }

    /// Fixed-header byte of the frame last reported complete.
    pub(crate) fn header(&self) -> u8 {
        self.header
    }

    /// Body of the frame last reported complete.
    pub(crate) fn body(&self) -> &[u8] {
        &self.body
    }

    /// Drops any partial frame, e.g. on connection teardown.
    pub(crate) fn reset(&mut self) {
        self.state = DecodeState::Header;
        self.remaining = 0;
        self.shift = 0;
        self.body.clear();
    }
}
