//! Byte ring over the precache scratch buffer.
//!
//! The ring owns a fixed scratch allocation and a FIFO of cached packets,
//! each recorded as a `[offset, offset + len)` region of the scratch plus
//! its shape and stream index. Packets are pushed in strictly ascending
//! index order and popped from the front, so the queue always covers a
//! contiguous index range.
//!
//! # Invariants
//! - `head` is the offset of the oldest queued packet and `tail` the next
//!   write offset; both are meaningful only while the queue is non-empty
//!   (emptiness is the queue's emptiness, never an offset sentinel).
//! - Occupied bytes are `tail - head` when `head < tail`, else
//!   `capacity - head + tail`; `head == tail` cannot occur while non-empty.
//! - No packet straddles the wrap boundary. A packet that will not fit at
//!   `tail` is placed at offset 0 when the prefix before `head` is free,
//!   otherwise the push fails and the caller stops filling.

use crate::packet::{Packet, PacketShape};
use std::collections::VecDeque;
use std::sync::Arc;

struct CachedPacket {
    index: u64,
    offset: usize,
    len: usize,
    shape: PacketShape,
}

pub(super) struct CacheRing {
    scratch: Box<[u8]>,
    slots: VecDeque<CachedPacket>,
    head: usize,
    tail: usize,
}

impl CacheRing {
    pub(super) fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "cache ring capacity must be > 0");
        Self {
            scratch: vec![0u8; capacity].into_boxed_slice(),
            slots: VecDeque::new(),
            head: 0,
            tail: 0,
        }
    }

    pub(super) fn capacity(&self) -> usize {
        self.scratch.len()
    }

    pub(super) fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub(super) fn used_bytes(&self) -> usize {
        if self.slots.is_empty() {
            0
        } else if self.head < self.tail {
            self.tail - self.head
        } else {
            self.capacity() - self.head + self.tail
        }
    }

    /// Stream index of the oldest queued packet, if any.
    pub(super) fn front_index(&self) -> Option<u64> {
        self.slots.front().map(|s| s.index)
    }

    /// Copies the given packet into the scratch and queues it under
    /// `index`. Returns false (leaving the ring untouched) when no free
    /// region can hold it.
    pub(super) fn try_push(&mut self, index: u64, packet: &Packet) -> bool {
        let len = packet.len();
        debug_assert!(len > 0, "empty packets are never cached");
        debug_assert!(
            self.slots.back().map_or(true, |b| b.index + 1 == index),
            "cache ring indices must be pushed contiguously"
        );
        let Some(offset) = self.placement_for(len) else {
            return false;
        };
        self.scratch[offset..offset + len].copy_from_slice(packet.bytes());
        if self.slots.is_empty() {
            self.head = offset;
        }
        self.tail = offset + len;
        self.slots.push_back(CachedPacket {
            index,
            offset,
            len,
            shape: packet.shape(),
        });
        true
    }

    fn placement_for(&self, len: usize) -> Option<usize> {
        let cap = self.capacity();
        if len > cap {
            return None;
        }
        if self.slots.is_empty() {
            // Keep appending where the last packet ended to avoid churn;
            // wrap freely since nothing is live.
            if self.tail + len <= cap {
                Some(self.tail)
            } else {
                Some(0)
            }
        } else if self.head < self.tail {
            if self.tail + len <= cap {
                Some(self.tail)
            } else if len < self.head {
                // Wrap jump: the region [tail, cap) is abandoned until the
                // reader catches up past it.
                Some(0)
            } else {
                None
            }
        } else {
            // Already wrapped; free region is [tail, head). Strict `<`
            // keeps head == tail unreachable while non-empty.
            if self.tail + len < self.head {
                Some(self.tail)
            } else {
                None
            }
        }
    }

    /// Drops the oldest queued packet, reclaiming its bytes.
    pub(super) fn discard_front(&mut self) {
        self.slots.pop_front();
        match self.slots.front() {
            Some(next) => self.head = next.offset,
            None => self.head = self.tail,
        }
    }

    /// Pops the oldest queued packet, copying its bytes out of the scratch
    /// into an owned packet.
    pub(super) fn take_front(&mut self) -> Option<Packet> {
        let slot = self.slots.front()?;
        let payload: Arc<[u8]> = Arc::from(&self.scratch[slot.offset..slot.offset + slot.len]);
        let packet = Packet::from_shared(payload, slot.shape);
        self.discard_front();
        Some(packet)
    }

    /// Drops every queued packet and rewinds the write position.
    pub(super) fn flush(&mut self) {
        self.slots.clear();
        self.head = 0;
        self.tail = 0;
    }

    #[cfg(test)]
    fn indices(&self) -> Vec<u64> {
        self.slots.iter().map(|s| s.index).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet(len: usize, fill: u8) -> Packet {
        Packet::from_vec(vec![fill; len])
    }

    /// Pushes `count` packets of `len` bytes starting at index `first`,
    /// returning how many were accepted.
    fn push_run(ring: &mut CacheRing, first: u64, count: u64, len: usize) -> u64 {
        let mut accepted = 0;
        for i in 0..count {
            if !ring.try_push(first + i, &packet(len, (first + i) as u8)) {
                break;
            }
            accepted += 1;
        }
        accepted
    }

    #[test]
    fn fills_to_exact_capacity() {
        let mut ring = CacheRing::new(1024);
        assert_eq!(push_run(&mut ring, 0, 100, 256), 4);
        assert_eq!(ring.used_bytes(), 1024);
        assert!(!ring.try_push(4, &packet(1, 0)));
    }

    #[test]
    fn occupancy_never_exceeds_capacity() {
        let mut ring = CacheRing::new(1000);
        let mut next = push_run(&mut ring, 0, 100, 300);
        for _ in 0..50 {
            ring.discard_front();
            next += push_run(&mut ring, next, 100, 300);
            assert!(ring.used_bytes() <= ring.capacity());
        }
    }

    #[test]
    fn queued_indices_stay_contiguous() {
        let mut ring = CacheRing::new(4096);
        let next = push_run(&mut ring, 0, 6, 512);
        ring.discard_front();
        ring.discard_front();
        push_run(&mut ring, next, 2, 512);
        let indices = ring.indices();
        let expected: Vec<u64> = (2..2 + indices.len() as u64).collect();
        assert_eq!(indices, expected);
    }

    #[test]
    fn wrap_jump_never_straddles_boundary() {
        let mut ring = CacheRing::new(1000);
        // Two 400-byte packets leave 200 free at the end.
        assert_eq!(push_run(&mut ring, 0, 2, 400), 2);
        // A third cannot fit at the tail nor before head (head == 0).
        assert!(!ring.try_push(2, &packet(300, 2)));
        // Free the first packet; the wrap jump to offset 0 now succeeds.
        ring.discard_front();
        assert!(ring.try_push(2, &packet(300, 2)));
        // The packet landed at the start, not across the boundary.
        assert_eq!(ring.take_front().unwrap().bytes(), &[1u8; 400][..]);
        assert_eq!(ring.take_front().unwrap().bytes(), &[2u8; 300][..]);
    }

    #[test]
    fn wrapped_region_refuses_overrun_into_head() {
        let mut ring = CacheRing::new(1000);
        assert_eq!(push_run(&mut ring, 0, 2, 400), 2);
        ring.discard_front(); // head -> 400
        assert!(ring.try_push(2, &packet(300, 2))); // wraps to 0, tail = 300
        // Free region is [300, 400): a 100-byte packet needs strict room.
        assert!(!ring.try_push(3, &packet(100, 3)));
        assert!(ring.try_push(3, &packet(99, 3)));
    }

    #[test]
    fn take_front_returns_cached_bytes_and_shape() {
        let mut ring = CacheRing::new(4096);
        let shape = PacketShape::new(4, 2, 3, 1);
        let img = Packet::image((0u8..24).collect(), shape).unwrap();
        assert!(ring.try_push(0, &img));
        let out = ring.take_front().unwrap();
        assert_eq!(out.shape(), shape);
        assert_eq!(out.bytes(), img.bytes());
        assert!(ring.is_empty());
        assert_eq!(ring.used_bytes(), 0);
    }

    #[test]
    fn flush_resets_write_position() {
        let mut ring = CacheRing::new(1024);
        push_run(&mut ring, 0, 3, 256);
        ring.flush();
        assert!(ring.is_empty());
        assert_eq!(ring.used_bytes(), 0);
        assert_eq!(push_run(&mut ring, 7, 4, 256), 4);
        assert_eq!(ring.front_index(), Some(7));
    }

    #[test]
    fn oversized_packet_is_rejected() {
        let mut ring = CacheRing::new(100);
        assert!(!ring.try_push(0, &packet(101, 0)));
        assert!(ring.is_empty());
    }
}
