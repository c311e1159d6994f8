//! Deterministic synthetic packet source.
//!
//! `MockLink` stands in for the network link in integration tests and
//! benchmarks. It produces well-formed packets with a monotonically advancing
//! instrument clock and seeded random payloads, so a test run is repeatable
//! while still exercising realistic data.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::packet::{Packet, TrackCoords, MAX_UNITS};

/// Synthetic packet source with a seeded random payload generator.
pub struct MockLink {
    rng: StdRng,
    time: u64,
    group: u16,
    period: u32,
    channel_ids: Vec<u16>,
}

impl MockLink {
    /// Create a link producing sample frames for one group.
    ///
    /// `period` is the group sampling period in clock ticks; the mock clock
    /// advances by one period per sample frame.
    pub fn new(seed: u64, group: u16, period: u32, channel_ids: Vec<u16>) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            time: 0,
            group,
            period,
            channel_ids,
        }
    }

    /// Current mock instrument time.
    pub fn time(&self) -> u64 {
        self.time
    }

    /// One sample frame for the configured group, advancing the clock.
    pub fn sample_packet(&mut self) -> Packet {
        self.time += u64::from(self.period);
        let data: Vec<i16> = (0..self.channel_ids.len())
            .map(|_| self.rng.gen_range(-2048..=2048))
            .collect();
        Packet::sample(
            self.time,
            self.group,
            self.period,
            self.channel_ids.clone(),
            data,
        )
    }

    /// A spike on `channel` with a random unit, at the current clock.
    pub fn spike_packet(&mut self, channel: u16) -> Packet {
        let unit = self.rng.gen_range(0..=MAX_UNITS as u32);
        Packet::spike(self.time, channel, unit)
    }

    /// A digital input event at the current clock.
    pub fn digital_packet(&mut self, value: u32) -> Packet {
        Packet::digital(self.time, value)
    }

    /// A comment at the current clock.
    pub fn comment_packet(&mut self, text: &str) -> Packet {
        Packet::comment(self.time, 0x00FF_8800, 0, text)
    }

    /// A tracking packet with random point coordinates at the current clock.
    pub fn track_packet(&mut self, node_id: u16, points: usize) -> Packet {
        let coords: Vec<i16> = (0..points * 2).map(|_| self.rng.gen_range(0..640)).collect();
        Packet::track(
            self.time,
            node_id,
            1,
            "mock-node",
            points as u16,
            TrackCoords::Points(coords),
        )
    }

    /// A mixed stream: sample frames with a spike roughly every tenth frame.
    pub fn stream(&mut self, frames: usize, spike_channel: u16) -> Vec<Packet> {
        let mut packets = Vec::with_capacity(frames + frames / 10 + 1);
        for _ in 0..frames {
            packets.push(self.sample_packet());
            if self.rng.gen_ratio(1, 10) {
                packets.push(self.spike_packet(spike_channel));
            }
        }
        packets
    }
}
