//! In-flight request table.
//!
//! Every QoS 1/2 publish, subscribe and unsubscribe occupies one slot from
//! the moment it is queued until its final acknowledgement, its timeout, or
//! a disconnect. The timeout clock for a slot starts only once the frame
//! has fully left the outbound ring, measured against the ring's cumulative
//! drain counter.

use crate::buffer::watermark_reached;
use crate::error::Error;
use heapless::Vec;

/// Number of request slots, bounding how many acknowledged exchanges can be
/// in flight at once.
pub const MAX_REQUESTS: usize = 8;

/// How long a request may stay unanswered after its frame fully drained.
pub(crate) const REQUEST_TIMEOUT_MS: u32 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Kind {
    Publish,
    Subscribe,
    Unsubscribe,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Frame bytes still (at least partly) in the outbound ring.
    Queued,
    /// Frame fully on the wire; the timeout clock is running.
    Sent,
}

#[derive(Debug, Clone, Copy)]
struct Slot<A> {
    packet_id: u16,
    kind: Kind,
    arg: Option<A>,
    phase: Phase,
    /// Cumulative drain count at which the frame has fully left the ring.
    sent_watermark: u32,
    sent_at: u32,
}

pub(crate) struct RequestTable<A> {
    slots: [Option<Slot<A>>; MAX_REQUESTS],
    last_packet_id: u16,
}

impl<A: Copy> RequestTable<A> {
    pub(crate) fn new() -> Self {
        Self {
            slots: [None; MAX_REQUESTS],
            last_packet_id: 0,
        }
    }

    fn next_packet_id(&mut self) -> u16 {
        loop {
            self.last_packet_id = self.last_packet_id.wrapping_add(1);
            if self.last_packet_id == 0 {
                continue;
            }
            let id = self.last_packet_id;
            if !self.slots.iter().flatten().any(|s| s.packet_id == id) {
                return id;
            }
        }
    }

    /// Claims a slot and a fresh packet id. The slot is not tracked for
    /// sending until [`commit`](Self::commit) records its watermark.
    pub(crate) fn begin(&mut self, kind: Kind, arg: Option<A>) -> Result<u16, Error> {
        let free = self
            .slots
            .iter()
            .position(|s| s.is_none())
            .ok_or(Error::PendingQueueFull)?;
        let packet_id = self.next_packet_id();
        self.slots[free] = Some(Slot {
            packet_id,
            kind,
            arg,
            phase: Phase::Queued,
            sent_watermark: 0,
            sent_at: 0,
        });
        Ok(packet_id)
    }

    /// Records the drain watermark at which the encoded frame ends.
    pub(crate) fn commit(&mut self, packet_id: u16, watermark: u32) {
        if let Some(slot) = self.slot_mut(packet_id) {
            slot.sent_watermark = watermark;
        }
    }

    /// Releases a slot whose frame never made it into the ring.
    pub(crate) fn abort(&mut self, packet_id: u16) {
        for i in 0..MAX_REQUESTS {
            if let Some(slot) = self.slots[i] {
                if slot.packet_id == packet_id {
                    self.slots[i] = None;
                }
            }
        }
    }

    pub(crate) fn has(&self, packet_id: u16, kind: Kind) -> bool {
        self.slots
            .iter()
            .flatten()
            .any(|s| s.packet_id == packet_id && s.kind == kind)
    }

    /// Promotes queued slots whose bytes have fully drained, starting their
    /// timeout clock at `now`.
    pub(crate) fn mark_sent(&mut self, drained: u32, now: u32) {
        for slot in self.slots.iter_mut().flatten() {
            if slot.phase == Phase::Queued && watermark_reached(drained, slot.sent_watermark) {
                slot.phase = Phase::Sent;
                slot.sent_at = now;
            }
        }
    }

    /// Frees the slot matching `packet_id` and `kind`, yielding its arg.
    /// `None` means the ack was unsolicited or arrived after a timeout.
    pub(crate) fn complete(&mut self, packet_id: u16, kind: Kind) -> Option<Option<A>> {
        for i in 0..MAX_REQUESTS {
            if let Some(slot) = self.slots[i] {
                if slot.packet_id == packet_id && slot.kind == kind {
                    self.slots[i] = None;
                    return Some(slot.arg);
                }
            }
        }
        None
    }

    /// Puts a publish slot back into the queued phase with a new watermark.
    /// Used when PUBREC arrives and the follow-up PUBREL gets its own
    /// sent/timeout leg.
    pub(crate) fn requeue(&mut self, packet_id: u16, watermark: u32) -> bool {
        for slot in self.slots.iter_mut().flatten() {
            if slot.packet_id == packet_id && slot.kind == Kind::Publish {
                slot.phase = Phase::Queued;
                slot.sent_watermark = watermark;
                return true;
            }
        }
        false
    }

    /// Frees every sent slot past its deadline, returning what to report.
    pub(crate) fn expire(&mut self, now: u32) -> Vec<(Kind, Option<A>), MAX_REQUESTS> {
        let mut expired = Vec::new();
        for i in 0..MAX_REQUESTS {
            if let Some(slot) = self.slots[i] {
                if slot.phase == Phase::Sent && now.wrapping_sub(slot.sent_at) >= REQUEST_TIMEOUT_MS
                {
                    // Capacity matches the slot count, push cannot fail.
                    let _ = expired.push((slot.kind, slot.arg));
                    self.slots[i] = None;
                }
            }
        }
        expired
    }

    /// Discards every tracked request without reporting them.
    pub(crate) fn clear(&mut self) {
        self.slots = [None; MAX_REQUESTS];
    }

    fn slot_mut(&mut self, packet_id: u16) -> Option<&mut Slot<A>> {
        self.slots
            .iter_mut()
            .flatten()
            .find(|s| s.packet_id == packet_id)
    }
}
