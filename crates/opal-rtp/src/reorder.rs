use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use crate::packet::RtpPacket;

/// Extended (32-bit) sequence number: cycle count in the high bits so the
/// pending map stays correctly ordered across a 16-bit wraparound.
fn extend(seq: u16, cycles: u32) -> u32 {
    (cycles << 16) | seq as u32
}

/// Out-of-order resequencing buffer (spec §4.7.3), active only while no
/// jitter buffer is attached to the session. Holds packets that arrived
/// ahead of the expected sequence number, ascending, until either the
/// gap closes or the patience budget runs out.
pub struct ReorderBuffer {
    pending: BTreeMap<u32, (RtpPacket, Instant)>,
    max_packets: usize,
    wait_time: Duration,
}

impl ReorderBuffer {
    pub fn new(max_packets: usize, wait_time: Duration) -> Self {
        ReorderBuffer {
            pending: BTreeMap::new(),
            max_packets,
            wait_time,
        }
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Insert an early-arriving packet, keyed by its extended sequence.
    pub fn insert(&mut self, seq: u16, cycles: u32, packet: RtpPacket, now: Instant) {
        self.pending.insert(extend(seq, cycles), (packet, now));
    }

    /// Pull the packet at `expected` (if present, i.e. the gap closed).
    pub fn take_expected(&mut self, expected: u16, cycles: u32) -> Option<RtpPacket> {
        self.pending
            .remove(&extend(expected, cycles))
            .map(|(packet, _)| packet)
    }

    /// True once the buffer has given up waiting for the gap to close:
    /// too many packets held, or the oldest has waited past `wait_time`.
    pub fn should_give_up(&self, now: Instant) -> bool {
        if self.pending.len() > self.max_packets {
            return true;
        }
        self.pending
            .values()
            .next()
            .is_some_and(|(_, arrival)| now.duration_since(*arrival) >= self.wait_time)
    }

    /// Deliver the lowest held packet and report the new expected sequence
    /// (the next one after it), used when [`should_give_up`] fires.
    pub fn take_lowest(&mut self) -> Option<(RtpPacket, u16)> {
        let key = *self.pending.keys().next()?;
        let (packet, _) = self.pending.remove(&key).unwrap();
        let next_expected = (key.wrapping_add(1) & 0xFFFF) as u16;
        Some((packet, next_expected))
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::RtpHeader;
    use bytes::Bytes;

    fn packet(seq: u16) -> RtpPacket {
        RtpPacket::new(RtpHeader::new(0, seq, 0, 1), Bytes::new())
    }

    #[test]
    fn reassembles_in_ascending_order() {
        let mut buf = ReorderBuffer::new(20, Duration::from_millis(50));
        let now = Instant::now();
        buf.insert(103, 0, packet(103), now);
        buf.insert(102, 0, packet(102), now);

        assert!(buf.take_expected(102, 0).is_some());
        assert!(buf.take_expected(103, 0).is_some());
        assert!(buf.is_empty());
    }

    #[test]
    fn gives_up_after_capacity_exceeded() {
        let mut buf = ReorderBuffer::new(2, Duration::from_secs(10));
        let now = Instant::now();
        buf.insert(10, 0, packet(10), now);
        buf.insert(11, 0, packet(11), now);
        buf.insert(12, 0, packet(12), now);
        assert!(buf.should_give_up(now));
        let (packet, next) = buf.take_lowest().unwrap();
        assert_eq!(packet.header.sequence_number, 10);
        assert_eq!(next, 11);
    }
}
