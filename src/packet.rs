//! MQTT 3.1.1 wire format, outbound side.
//!
//! Frames are written straight into the outbound ring: every encoder first
//! sizes the complete frame and checks it against the free space, then
//! stages the bytes. A frame is therefore queued entirely or not at all,
//! which is what lets callers treat [`Error::CapacityExceeded`] as "nothing
//! happened, try again later".

use crate::buffer::StreamBuffer;
use crate::client::ClientInfo;
use crate::error::Error;
use heapless::Vec;

// Control packet type values, the high nibble of the fixed header.
pub(crate) const CONNECT: u8 = 0x10;
pub(crate) const CONNACK: u8 = 0x20;
pub(crate) const PUBLISH: u8 = 0x30;
pub(crate) const PUBACK: u8 = 0x40;
pub(crate) const PUBREC: u8 = 0x50;
pub(crate) const PUBREL: u8 = 0x60;
pub(crate) const PUBCOMP: u8 = 0x70;
pub(crate) const SUBSCRIBE: u8 = 0x80;
pub(crate) const SUBACK: u8 = 0x90;
pub(crate) const UNSUBSCRIBE: u8 = 0xA0;
pub(crate) const UNSUBACK: u8 = 0xB0;
pub(crate) const PINGREQ: u8 = 0xC0;
pub(crate) const PINGRESP: u8 = 0xD0;
pub(crate) const DISCONNECT: u8 = 0xE0;

/// Fixed-header flag bits mandated for SUBSCRIBE, UNSUBSCRIBE and PUBREL.
pub(crate) const MANDATED_FLAGS: u8 = 0x02;

/// Protocol name every MQTT 3.1.1 CONNECT carries.
const PROTOCOL_NAME: &[u8] = b"MQTT";
/// MQTT protocol level for version 3.1.1.
const PROTOCOL_LEVEL: u8 = 4; // MQTT 3.1.1

/// Largest value the remaining-length field can carry (4 encoded bytes).
pub(crate) const MAX_REMAINING_LENGTH: usize = 268_435_455;

/// Quality of Service levels for MQTT messages.
///
/// QoS defines the delivery guarantee for a message. Higher levels provide
/// stronger guarantees at the cost of extra round-trips and request-table
/// bookkeeping.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum QoS {
    /// **QoS 0**: at most once. Fire and forget; no packet id, no
    /// completion event.
    AtMostOnce = 0,
    /// **QoS 1**: at least once. Acknowledged with PUBACK; duplicates are
    /// possible.
    AtLeastOnce = 1,
    /// **QoS 2**: exactly once on the wire, via the PUBREC/PUBREL/PUBCOMP
    /// exchange.
    ExactlyOnce = 2,
}

impl QoS {
    pub(crate) fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0 => Some(QoS::AtMostOnce),
            1 => Some(QoS::AtLeastOnce),
            2 => Some(QoS::ExactlyOnce),
            _ => None,
        }
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for QoS {
    fn format(&self, f: defmt::Formatter) {
        match self {
            QoS::AtMostOnce => defmt::write!(f, "QoS0"),
            QoS::AtLeastOnce => defmt::write!(f, "QoS1"),
            QoS::ExactlyOnce => defmt::write!(f, "QoS2"),
        }
    }
}

/// Encodes the MQTT variable-length remaining-length field.
///
/// Each byte carries 7 bits of the value; the most significant bit marks a
/// continuation. Values up to 268,435,455 take at most 4 bytes.
pub(crate) fn encode_remaining_length(buf: &mut Vec<u8, 5>, mut len: usize) -> Result<(), ()> {
    loop {
        if buf.is_full() {
            return Err(());
        }
        let mut byte = (len % 128) as u8;
        len /= 128;
        if len > 0 {
            byte |= 0x80;
        }
        buf.push(byte).unwrap(); // `is_full` check above ensures this won't panic
        if len == 0 {
            break;
        }
    }
    Ok(())
}

/// Number of bytes `encode_remaining_length` produces for `len`.
pub(crate) fn remaining_length_width(len: usize) -> usize {
    match len {
        0..=127 => 1,
        128..=16_383 => 2,
        16_384..=2_097_151 => 3,
        _ => 4,
    }
}

/// Total frame size on the wire for a given remaining length.
fn frame_size(remaining: usize) -> usize {
    1 + remaining_length_width(remaining) + remaining
}

/// Size of a length-prefixed string/bytes field, refusing anything that
/// cannot carry a u16 prefix.
fn prefixed_len(len: usize) -> Result<usize, Error> {
    if len > u16::MAX as usize {
        return Err(Error::CapacityExceeded);
    }
    Ok(2 + len)
}

fn connect_remaining(info: &ClientInfo<'_>) -> Result<usize, Error> {
    let mut remaining = 10 + prefixed_len(info.client_id.len())?;
    if let Some(will) = &info.will {
        remaining += prefixed_len(will.topic.len())?;
        remaining += prefixed_len(will.message.len())?;
    }
    if let Some(user) = info.username {
        remaining += prefixed_len(user.len())?;
    }
    if let Some(pass) = info.password {
        remaining += prefixed_len(pass.len())?;
    }
    Ok(remaining)
}

fn publish_remaining(topic: &str, payload: &[u8], qos: QoS) -> Result<usize, Error> {
    let pkid_len = if qos == QoS::AtMostOnce { 0 } else { 2 };
    let remaining = prefixed_len(topic.len())? + pkid_len + payload.len();
    if remaining > MAX_REMAINING_LENGTH {
        return Err(Error::CapacityExceeded);
    }
    Ok(remaining)
}

fn subscribe_remaining(topic: &str) -> Result<usize, Error> {
    Ok(2 + prefixed_len(topic.len())? + 1)
}

fn unsubscribe_remaining(topic: &str) -> Result<usize, Error> {
    Ok(2 + prefixed_len(topic.len())?)
}

/// On-the-wire size of the CONNECT frame for `info`, used to validate that
/// a connect attempt can ever fit the outbound buffer.
pub(crate) fn connect_frame_size(info: &ClientInfo<'_>) -> Result<usize, Error> {
    Ok(frame_size(connect_remaining(info)?))
}

fn put<const N: usize>(ring: &mut StreamBuffer<N>, bytes: &[u8]) {
    let accepted = ring.write(bytes);
    debug_assert!(accepted); // frame sized against free space before any write
}

fn put_header<const N: usize>(ring: &mut StreamBuffer<N>, header: u8, remaining: usize) {
    let mut fixed: Vec<u8, 5> = Vec::new();
    fixed.push(header).unwrap(); // 5-byte buffer, first push cannot fail
    let _ = encode_remaining_length(&mut fixed, remaining);
    put(ring, &fixed);
}

fn put_prefixed<const N: usize>(ring: &mut StreamBuffer<N>, bytes: &[u8]) {
    put(ring, &(bytes.len() as u16).to_be_bytes());
    put(ring, bytes);
}

fn check_fit<const N: usize>(ring: &StreamBuffer<N>, remaining: usize) -> Result<(), Error> {
    if remaining > MAX_REMAINING_LENGTH || frame_size(remaining) > ring.free() {
        return Err(Error::CapacityExceeded);
    }
    Ok(())
}

/// Queues a CONNECT frame built from `info`. Clean session is always
/// requested; will/credential fields and flags follow the option fields.
pub(crate) fn encode_connect<const N: usize>(
    ring: &mut StreamBuffer<N>,
    info: &ClientInfo<'_>,
) -> Result<(), Error> {
    let remaining = connect_remaining(info)?;
    check_fit(ring, remaining)?;

    let mut flags: u8 = 0x02; // clean session
    if let Some(will) = &info.will {
        flags |= 0x04 | ((will.qos as u8) << 3);
    }
    if info.username.is_some() {
        flags |= 0x80;
    }
    if info.password.is_some() {
        flags |= 0x40;
    }

    put_header(ring, CONNECT, remaining);

    // --- Variable Header ---
    put_prefixed(ring, PROTOCOL_NAME);
    put(ring, &[PROTOCOL_LEVEL, flags]);
    put(ring, &info.keep_alive_seconds.to_be_bytes());

    // --- Payload ---
    put_prefixed(ring, info.client_id.as_bytes());
    if let Some(will) = &info.will {
        put_prefixed(ring, will.topic.as_bytes());
        put_prefixed(ring, will.message);
    }
    if let Some(user) = info.username {
        put_prefixed(ring, user.as_bytes());
    }
    if let Some(pass) = info.password {
        put_prefixed(ring, pass.as_bytes());
    }
    Ok(())
}

/// Queues a PUBLISH frame. The packet id is written only for QoS 1/2.
pub(crate) fn encode_publish<const N: usize>(
    ring: &mut StreamBuffer<N>,
    topic: &str,
    payload: &[u8],
    qos: QoS,
    retain: bool,
    dup: bool,
    packet_id: u16,
) -> Result<(), Error> {
    let remaining = publish_remaining(topic, payload, qos)?;
    check_fit(ring, remaining)?;

    let mut header = PUBLISH | ((qos as u8) << 1);
    if retain {
        header |= 0x01;
    }
    if dup {
        header |= 0x08;
    }

    put_header(ring, header, remaining);
    put_prefixed(ring, topic.as_bytes());
    if qos != QoS::AtMostOnce {
        put(ring, &packet_id.to_be_bytes());
    }
    put(ring, payload);
    Ok(())
}

/// Queues a SUBSCRIBE frame for a single topic filter.
pub(crate) fn encode_subscribe<const N: usize>(
    ring: &mut StreamBuffer<N>,
    topic: &str,
    qos: QoS,
    packet_id: u16,
) -> Result<(), Error> {
    let remaining = subscribe_remaining(topic)?;
    check_fit(ring, remaining)?;

    put_header(ring, SUBSCRIBE | MANDATED_FLAGS, remaining);
    put(ring, &packet_id.to_be_bytes());
    put_prefixed(ring, topic.as_bytes());
    put(ring, &[qos as u8]);
    Ok(())
}

/// Queues an UNSUBSCRIBE frame for a single topic filter.
pub(crate) fn encode_unsubscribe<const N: usize>(
    ring: &mut StreamBuffer<N>,
    topic: &str,
    packet_id: u16,
) -> Result<(), Error> {
    let remaining = unsubscribe_remaining(topic)?;
    check_fit(ring, remaining)?;

    put_header(ring, UNSUBSCRIBE | MANDATED_FLAGS, remaining);
    put(ring, &packet_id.to_be_bytes());
    put_prefixed(ring, topic.as_bytes());
    Ok(())
}

/// Queues one of the two-byte acknowledgement frames (PUBACK, PUBREC,
/// PUBREL, PUBCOMP). `header` carries the full fixed-header byte.
pub(crate) fn encode_ack<const N: usize>(
    ring: &mut StreamBuffer<N>,
    header: u8,
    packet_id: u16,
) -> Result<(), Error> {
    check_fit(ring, 2)?;
    put_header(ring, header, 2);
    put(ring, &packet_id.to_be_bytes());
    Ok(())
}

/// Queues a bodyless frame (PINGREQ, DISCONNECT).
pub(crate) fn encode_empty<const N: usize>(
    ring: &mut StreamBuffer<N>,
    header: u8,
) -> Result<(), Error> {
    check_fit(ring, 0)?;
    put_header(ring, header, 0);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ClientInfo, Will};
    use std::vec::Vec as StdVec;

    fn drain<const N: usize>(ring: &mut StreamBuffer<N>) -> StdVec<u8> {
        let mut out = StdVec::new();
        while !ring.is_empty() {
            let part = ring.read_slice().to_vec();
            ring.consume(part.len());
            out.extend_from_slice(&part);
        }
        out
    }

    fn varlen(len: usize) -> StdVec<u8> {
        let mut buf: Vec<u8, 5> = Vec::new();
        encode_remaining_length(&mut buf, len).unwrap();
        buf.to_vec()
    }

    #[test]
    fn remaining_length_boundaries() {
        assert_eq!(varlen(0), [0x00]);
        assert_eq!(varlen(127), [0x7F]);
        assert_eq!(varlen(128), [0x80, 0x01]);
        assert_eq!(varlen(16_383), [0xFF, 0x7F]);
        assert_eq!(varlen(16_384), [0x80, 0x80, 0x01]);
        assert_eq!(varlen(2_097_151), [0xFF, 0xFF, 0x7F]);
        assert_eq!(varlen(2_097_152), [0x80, 0x80, 0x80, 0x01]);
        assert_eq!(varlen(MAX_REMAINING_LENGTH), [0xFF, 0xFF, 0xFF, 0x7F]);

        for len in [0, 127, 128, 16_383, 16_384, 2_097_152, MAX_REMAINING_LENGTH] {
            assert_eq!(varlen(len).len(), remaining_length_width(len));
        }
    }

    #[test]
    fn connect_frame_minimal() {
        let mut ring: StreamBuffer<64> = StreamBuffer::new();
        let info = ClientInfo::new("dev1").keep_alive(60);
        encode_connect(&mut ring, &info).unwrap();
        assert_eq!(
            drain(&mut ring),
            [
                0x10, 0x10, // CONNECT, remaining 16
                0x00, 0x04, b'M', b'Q', b'T', b'T', 0x04, 0x02, 0x00, 0x3C,
                0x00, 0x04, b'd', b'e', b'v', b'1',
            ]
        );
    }

    #[test]
    fn connect_frame_with_will_and_credentials() {
        let mut ring: StreamBuffer<64> = StreamBuffer::new();
        let info = ClientInfo::new("d")
            .keep_alive(10)
            .credentials("u", Some("p"))
            .will(Will {
                topic: "w",
                message: b"m",
                qos: QoS::AtLeastOnce,
            });
        encode_connect(&mut ring, &info).unwrap();
        assert_eq!(
            drain(&mut ring),
            [
                0x10, 0x19, // remaining 25
                0x00, 0x04, b'M', b'Q', b'T', b'T', 0x04, 0xCE, 0x00, 0x0A,
                0x00, 0x01, b'd', // client id
                0x00, 0x01, b'w', 0x00, 0x01, b'm', // will topic + message
                0x00, 0x01, b'u', 0x00, 0x01, b'p', // credentials
            ]
        );
    }

    #[test]
    fn publish_qos1_carries_packet_id() {
        let mut ring: StreamBuffer<64> = StreamBuffer::new();
        encode_publish(&mut ring, "t/1", b"hi", QoS::AtLeastOnce, false, false, 1).unwrap();
        assert_eq!(
            drain(&mut ring),
            [0x32, 0x09, 0x00, 0x03, b't', b'/', b'1', 0x00, 0x01, b'h', b'i']
        );
    }

    #[test]
    fn publish_qos0_omits_packet_id() {
        let mut ring: StreamBuffer<64> = StreamBuffer::new();
        encode_publish(&mut ring, "t/1", b"hi", QoS::AtMostOnce, false, false, 0).unwrap();
        assert_eq!(
            drain(&mut ring),
            [0x30, 0x07, 0x00, 0x03, b't', b'/', b'1', b'h', b'i']
        );
    }

    #[test]
    fn publish_flag_bits() {
        let mut ring: StreamBuffer<64> = StreamBuffer::new();
        encode_publish(&mut ring, "t", b"", QoS::AtLeastOnce, true, true, 7).unwrap();
        let bytes = drain(&mut ring);
        assert_eq!(bytes[0], 0x3B); // DUP | QoS1 | RETAIN
        assert_eq!(&bytes[5..7], &[0x00, 0x07]);
    }

    #[test]
    fn subscribe_frame() {
        let mut ring: StreamBuffer<64> = StreamBuffer::new();
        encode_subscribe(&mut ring, "t/1", QoS::AtLeastOnce, 1).unwrap();
        assert_eq!(
            drain(&mut ring),
            [0x82, 0x08, 0x00, 0x01, 0x00, 0x03, b't', b'/', b'1', 0x01]
        );
    }

    #[test]
    fn unsubscribe_frame() {
        let mut ring: StreamBuffer<64> = StreamBuffer::new();
        encode_unsubscribe(&mut ring, "t/1", 2).unwrap();
        assert_eq!(
            drain(&mut ring),
            [0xA2, 0x07, 0x00, 0x02, 0x00, 0x03, b't', b'/', b'1']
        );
    }

    #[test]
    fn ack_and_bodyless_frames() {
        let mut ring: StreamBuffer<64> = StreamBuffer::new();
        encode_ack(&mut ring, PUBACK, 1).unwrap();
        encode_ack(&mut ring, PUBREL | MANDATED_FLAGS, 2).unwrap();
        encode_empty(&mut ring, PINGREQ).unwrap();
        encode_empty(&mut ring, DISCONNECT).unwrap();
        assert_eq!(
            drain(&mut ring),
            [0x40, 0x02, 0x00, 0x01, 0x62, 0x02, 0x00, 0x02, 0xC0, 0x00, 0xE0, 0x00]
        );
    }

    #[test]
    fn capacity_refusal_leaves_ring_untouched() {
        let mut ring: StreamBuffer<16> = StreamBuffer::new();
        let err = encode_publish(
            &mut ring,
            "a/rather/long/topic",
            b"payload",
            QoS::AtMostOnce,
            false,
            false,
            0,
        )
        .unwrap_err();
        assert_eq!(err, Error::CapacityExceeded);
        assert!(ring.is_empty());
        assert_eq!(ring.total_written(), 0);
    }

    #[test]
    fn field_too_long_for_u16_prefix() {
        let mut ring: StreamBuffer<64> = StreamBuffer::new();
        let topic = "x".repeat(u16::MAX as usize + 1);
        let err =
            encode_publish(&mut ring, &topic, b"", QoS::AtMostOnce, false, false, 0).unwrap_err();
        assert_eq!(err, Error::CapacityExceeded);
        assert!(ring.is_empty());
    }
}
