// Pre-roll packet ring for retroactive event capture
//
// Holds the most recent packets while no fragment is open. When an event is
// saved, the ring is searched backward for the keyframe that starts the
// requested window and everything from there on is handed to the fragment.

use ringbuf::{traits::*, HeapRb};

use crate::video::{log_packet, Packet};

/// Default number of packets retained while buffering
pub const DEFAULT_RING_CAPACITY: usize = 1000;

// ============================================================================
// Packet Pre-roll Ring
// ============================================================================

pub struct PacketPrerollRing {
    rb: HeapRb<Packet>,
    capacity: usize,
}

impl PacketPrerollRing {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            rb: HeapRb::new(capacity),
            capacity,
        }
    }

    /// Append a packet, evicting and returning the oldest one when full
    pub fn push(&mut self, packet: Packet) -> Option<Packet> {
        self.rb.push_overwrite(packet)
    }

    pub fn len(&self) -> usize {
        self.rb.occupied_len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.rb.is_empty()
    }

    /// Oldest to newest
    pub fn iter(&self) -> impl Iterator<Item = &Packet> {
        self.rb.iter()
    }

    pub fn clear(&mut self) {
        self.rb.clear();
    }

    /// Remove and return every packet from index `start` (0 = oldest) to the
    /// newest. Packets before `start` are discarded; the ring ends up empty.
    pub fn drain_from(&mut self, start: usize) -> Vec<Packet> {
        self.rb.skip(start.min(self.len()));
        let packets: Vec<Packet> = self.rb.pop_iter().collect();
        self.rb.clear();
        packets
    }

    /// Find where a save whose window begins at `target_dts` has to start.
    ///
    /// Walks back from the newest packet to the first video packet at or
    /// before `target_dts`. If that is not a keyframe, keeps walking back to
    /// the previous video keyframe; if there is none, walks forward to the
    /// next one instead. Returns `None` when the ring holds no usable keyframe.
    pub fn find_event_start(&self, video_stream: usize, target_dts: i64) -> Option<usize> {
        let packets: Vec<&Packet> = self.rb.iter().collect();
        if packets.is_empty() {
            return None;
        }
        let is_video = |p: &Packet| p.stream_index == video_stream;
        let is_video_key = |p: &Packet| is_video(p) && p.keyframe;

        // An empty match leaves the walk at the oldest packet, which the
        // forward scan below then covers
        let at_target = packets
            .iter()
            .rposition(|p| is_video(p) && p.dts <= target_dts)
            .unwrap_or(0);
        log_packet("going_back", packets[at_target]);

        if is_video_key(packets[at_target]) {
            return Some(at_target);
        }

        if let Some(key) = packets[..at_target].iter().rposition(|p| is_video_key(p)) {
            log_packet("going_back_key", packets[key]);
            return Some(key);
        }

        let key = packets[at_target..]
            .iter()
            .position(|p| is_video_key(p))
            .map(|offset| at_target + offset)?;
        log_packet("going_forward", packets[key]);
        Some(key)
    }

    /// Drain the packets that make up a save starting at `target_dts`.
    ///
    /// The result begins with a video keyframe (or is empty) and the ring is
    /// left empty either way.
    pub fn drain_event_window(&mut self, video_stream: usize, target_dts: i64) -> Vec<Packet> {
        match self.find_event_start(video_stream, target_dts) {
            Some(start) => self.drain_from(start),
            None => {
                log::warn!(
                    "[PreRoll] No keyframe among {} buffered packets, starting save empty",
                    self.len()
                );
                self.clear();
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const VIDEO: usize = 0;
    const AUDIO: usize = 1;

    fn video(dts: i64, key: bool) -> Packet {
        Packet::new(VIDEO, dts, dts, key, vec![0; 4])
    }

    fn audio(dts: i64) -> Packet {
        Packet::new(AUDIO, dts, dts, true, vec![0; 2])
    }

    /// 1000 ticks/s, one video packet every 10 ticks, keyframe every 250
    fn filled(up_to: i64) -> PacketPrerollRing {
        let mut ring = PacketPrerollRing::new(1000);
        for dts in (0..=up_to).step_by(10) {
            ring.push(video(dts, dts % 250 == 0));
        }
        ring
    }

    #[test]
    fn target_on_keyframe_starts_there() {
        let mut ring = filled(900);
        let drained = ring.drain_event_window(VIDEO, 500);
        assert_eq!(drained.first().map(|p| p.dts), Some(500));
        assert_eq!(drained.last().map(|p| p.dts), Some(900));
        assert!(ring.is_empty());
    }

    #[test]
    fn target_between_keyframes_goes_back() {
        let mut ring = filled(900);
        let drained = ring.drain_event_window(VIDEO, 620);
        assert_eq!(drained[0].dts, 500);
        assert!(drained[0].keyframe);
    }

    #[test]
    fn missing_history_falls_forward_to_first_keyframe() {
        let mut ring = PacketPrerollRing::new(1000);
        for dts in (260..=900).step_by(10) {
            ring.push(video(dts, dts % 250 == 0));
        }
        // target precedes everything and the oldest packet is a delta frame
        let drained = ring.drain_event_window(VIDEO, 0);
        assert_eq!(drained[0].dts, 500);
    }

    #[test]
    fn audio_packets_are_not_seek_points() {
        let mut ring = PacketPrerollRing::new(16);
        ring.push(video(0, true));
        ring.push(audio(5));
        ring.push(video(10, false));
        ring.push(audio(15));
        ring.push(video(20, false));
        assert_eq!(ring.find_event_start(VIDEO, 16), Some(0));

        let drained = ring.drain_from(0);
        assert_eq!(drained.len(), 5);
        assert_eq!(drained[1].stream_index, AUDIO);
    }

    #[test]
    fn no_keyframe_drains_nothing() {
        let mut ring = PacketPrerollRing::new(8);
        ring.push(video(0, false));
        ring.push(video(10, false));
        assert!(ring.drain_event_window(VIDEO, 5).is_empty());
        assert!(ring.is_empty());
    }

    #[test]
    fn overflow_evicts_oldest() {
        let mut ring = PacketPrerollRing::new(3);
        for dts in 0..3 {
            assert!(ring.push(video(dts, false)).is_none());
        }
        let evicted = ring.push(video(3, false)).unwrap();
        assert_eq!(evicted.dts, 0);
        let dts: Vec<i64> = ring.iter().map(|p| p.dts).collect();
        assert_eq!(dts, vec![1, 2, 3]);
    }

    proptest! {
        #[test]
        fn capacity_is_never_exceeded(capacity in 1usize..64, extra in 1usize..64) {
            let mut ring = PacketPrerollRing::new(capacity);
            for dts in 0..(capacity + extra) as i64 {
                ring.push(video(dts, false));
            }
            prop_assert_eq!(ring.len(), capacity);
            prop_assert!(ring.iter().all(|p| p.dts != 0));
            let first = ring.iter().next().map(|p| p.dts);
            prop_assert_eq!(first, Some(extra as i64));
        }

        #[test]
        fn saves_start_on_a_keyframe(
            keys in proptest::collection::vec(any::<bool>(), 1..200),
            target in 0i64..2000,
        ) {
            let mut ring = PacketPrerollRing::new(128);
            for (i, key) in keys.iter().enumerate() {
                ring.push(video(i as i64 * 10, *key));
                ring.push(audio(i as i64 * 10 + 5));
            }
            let any_key = ring.iter().any(|p| p.stream_index == VIDEO && p.keyframe);
            let drained = ring.drain_event_window(VIDEO, target);
            prop_assert!(ring.is_empty());
            if any_key {
                prop_assert!(drained[0].keyframe);
                prop_assert_eq!(drained[0].stream_index, VIDEO);
            } else {
                prop_assert!(drained.is_empty());
            }
        }
    }
}
