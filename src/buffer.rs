//! Fixed-capacity outbound byte ring

use core::sync::atomic::{AtomicU32, Ordering};

/// Returns `true` once the cumulative counter `current` has passed `target`.
///
/// Counters are free-running and wrap; the comparison uses signed sequence
/// distance, valid while the two stay within `i32::MAX` of each other.
#[inline]
pub(crate) fn watermark_reached(current: u32, target: u32) -> bool {
    current.wrapping_sub(target) as i32 >= 0
}

/// Byte ring between the encoding side and the drain side.
///
/// `N` must be a power of two. The ring keeps free-running cumulative
/// counters instead of wrapped indices: `written` is advanced only by the
/// producer, `consumed` only by the consumer, and positions are derived
/// with a mask. The counters are atomics with acquire/release ordering so
/// a producer running in a brief interrupt context stays coherent with
/// the foreground consumer, and they double as the sent-watermark clock
/// for the request tracker.
pub(crate) struct StreamBuffer<const N: usize> {
    buf: [u8; N],
    written: AtomicU32,
    consumed: AtomicU32,
}

impl<const N: usize> StreamBuffer<N> {
    pub(crate) fn new() -> Self {
        const {
            assert!(N > 0 && N.is_power_of_two(), "capacity must be a power of two");
        }
        Self {
            buf: [0; N],
            written: AtomicU32::new(0),
            consumed: AtomicU32::new(0),
        }
    }

    #[inline]
    fn mask(pos: u32) -> usize {
        pos as usize & (N - 1)
    }

    /// Number of buffered, not yet consumed bytes.
    #[inline]
    pub(crate) fn len(&self) -> usize {
        let written = self.written.load(Ordering::Acquire);
        let consumed = self.consumed.load(Ordering::Acquire);
        written.wrapping_sub(consumed) as usize
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Free space available to the producer.
    #[inline]
    pub(crate) fn free(&self) -> usize {
        N - self.len()
    }

    /// Cumulative bytes ever accepted by `write`.
    #[inline]
    pub(crate) fn total_written(&self) -> u32 {
        self.written.load(Ordering::Acquire)
    }

    /// Cumulative bytes ever released by `consume`.
    #[inline]
    pub(crate) fn total_consumed(&self) -> u32 {
        self.consumed.load(Ordering::Acquire)
    }

    /// Appends `data`, all or nothing. Returns `false` when the free space
    /// is insufficient, leaving the ring untouched.
    pub(crate) fn write(&mut self, data: &[u8]) -> bool {
        if data.len() > self.free() {
            return false;
        }
        let written = self.written.load(Ordering::Acquire);
        let pos = Self::mask(written);

        // Copy up to the physical end, then wrap for the remainder.
        let first = (N - pos).min(data.len());
        self.buf[pos..pos + first].copy_from_slice(&data[..first]);
        if first < data.len() {
            self.buf[..data.len() - first].copy_from_slice(&data[first..]);
        }

        self.written
            .store(written.wrapping_add(data.len() as u32), Ordering::Release);
        true
    }

    /// Longest contiguous readable span starting at the consumer position.
    /// After a wrap the remainder shows up on the next call.
    pub(crate) fn read_slice(&self) -> &[u8] {
        let pos = Self::mask(self.consumed.load(Ordering::Acquire));
        let contiguous = self.len().min(N - pos);
        &self.buf[pos..pos + contiguous]
    }

    /// Releases `n` bytes previously observed through [`read_slice`].
    pub(crate) fn consume(&mut self, n: usize) {
        debug_assert!(n <= self.len());
        let consumed = self.consumed.load(Ordering::Acquire);
        self.consumed
            .store(consumed.wrapping_add(n as u32), Ordering::Release);
    }

    /// Drops all buffered bytes. The cumulative counters keep advancing so
    /// recorded watermarks stay comparable.
    pub(crate) fn clear(&mut self) {
        let written = self.written.load(Ordering::Acquire);
        self.consumed.store(written, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::vec::Vec;

    #[test]
    fn write_then_read_roundtrip() {
        let mut ring: StreamBuffer<16> = StreamBuffer::new();
        assert!(ring.write(b"hello"));
        assert_eq!(ring.len(), 5);
        assert_eq!(ring.read_slice(), b"hello");
        ring.consume(5);
        assert!(ring.is_empty());
        assert_eq!(ring.total_written(), 5);
        assert_eq!(ring.total_consumed(), 5);
    }

    #[test]
    fn rejects_oversized_write_untouched() {
        let mut ring: StreamBuffer<8> = StreamBuffer::new();
        assert!(ring.write(b"abcdef"));
        assert!(!ring.write(b"ghi"));
        assert_eq!(ring.len(), 6);
        assert_eq!(ring.read_slice(), b"abcdef");
        // Exactly the remaining space still fits.
        assert!(ring.write(b"gh"));
        assert_eq!(ring.free(), 0);
    }

    #[test]
    fn wraparound_preserves_byte_order() {
        let mut ring: StreamBuffer<8> = StreamBuffer::new();
        assert!(ring.write(b"abcdef"));
        ring.consume(4);
        assert!(ring.write(b"ghijk"));
        assert_eq!(ring.len(), 7);

        let mut drained = Vec::new();
        while !ring.is_empty() {
            let part = ring.read_slice().to_vec();
            ring.consume(part.len());
            drained.extend_from_slice(&part);
        }
        assert_eq!(drained, b"efghijk");
    }

    #[test]
    fn clear_keeps_counters_monotonic() {
        let mut ring: StreamBuffer<16> = StreamBuffer::new();
        assert!(ring.write(b"abcd"));
        ring.clear();
        assert!(ring.is_empty());
        assert_eq!(ring.total_consumed(), ring.total_written());
        assert!(ring.write(b"ef"));
        assert_eq!(ring.total_written(), 6);
    }

    #[test]
    fn watermark_comparison_survives_wrap() {
        assert!(watermark_reached(5, 5));
        assert!(watermark_reached(6, 5));
        assert!(!watermark_reached(4, 5));
        // Counter wrapped past the target.
        assert!(watermark_reached(1, u32::MAX));
        assert!(!watermark_reached(u32::MAX, 1));
    }

    #[test]
    fn randomized_against_model() {
        use rand::{Rng, SeedableRng, rngs::StdRng};

        let mut rng = StdRng::seed_from_u64(0xce11);
        let mut ring: StreamBuffer<64> = StreamBuffer::new();
        let mut model: VecDeque<u8> = VecDeque::new();

        for _ in 0..4000 {
            if rng.gen_bool(0.5) {
                let n = rng.gen_range(0..=24usize);
                let chunk: Vec<u8> = (0..n).map(|_| rng.r#gen()).collect();
                let fits = chunk.len() <= ring.free();
                assert_eq!(ring.write(&chunk), fits);
                if fits {
                    model.extend(chunk.iter().copied());
                }
            } else {
                let mut want = rng.gen_range(0..=24usize);
                while want > 0 {
                    let part = ring.read_slice().to_vec();
                    if part.is_empty() {
                        break;
                    }
                    let step = part.len().min(want);
                    for &b in &part[..step] {
                        assert_eq!(Some(b), model.pop_front());
                    }
                    ring.consume(step);
                    want -= step;
                }
            }
            assert_eq!(ring.len(), model.len());
        }
    }
}
