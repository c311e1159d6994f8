//! Per-channel event caches.
//!
//! Every event-capable channel owns one [`ChannelEventBuffer`]: a ring of
//! `(timestamp, value)` pairs sharing the one-slot-free discipline of the
//! continuous cache. For spike channels the value is the classified unit;
//! for the digital and serial channels it is the sampled data word, tallied
//! under unit 0.
//!
//! The whole channel space is allocated together at one shared capacity, as
//! the trial configuration requests it, so ingestion never allocates.

use crate::error::{AcqError, AcqResult};
use crate::packet::{MAX_CHANS, MAX_UNITS, UNIT_NOISE, UNIT_SLOTS};

/// Map an event value to its tally slot: units 0..=5 keep their index, noise
/// goes to the last slot, anything else folds into unit 0.
pub fn unit_slot(value: u32) -> usize {
    if value <= MAX_UNITS as u32 {
        value as usize
    } else if value == UNIT_NOISE {
        UNIT_SLOTS - 1
    } else {
        0
    }
}

/// Events read out of one channel, split by unit.
#[derive(Debug, Default, Clone)]
pub struct ChannelEvents {
    /// Event timestamps per tally slot.
    pub timestamps: Vec<Vec<u64>>,
    /// Data words for valued channels, parallel to slot 0 timestamps.
    pub values: Vec<u32>,
}

/// Route a raw event window into per-unit timestamp lists.
///
/// For valued channels everything lands in slot 0 and the data words are kept
/// in a parallel list.
pub fn route_by_unit(window: &[(u64, u32)], valued: bool) -> ChannelEvents {
    let mut out = ChannelEvents {
        timestamps: vec![Vec::new(); UNIT_SLOTS],
        values: Vec::new(),
    };
    for &(timestamp, value) in window {
        let slot = if valued { 0 } else { unit_slot(value) };
        out.timestamps[slot].push(timestamp);
        if valued {
            out.values.push(value);
        }
    }
    out
}

/// Ring buffer of events for one channel.
#[derive(Debug)]
pub struct ChannelEventBuffer {
    timestamps: Vec<u64>,
    values: Vec<u32>,
    capacity: usize,
    write_index: usize,
    write_start_index: usize,
    read_end_index: usize,
    overflow_count: u64,
}

impl ChannelEventBuffer {
    fn allocate(capacity: usize) -> AcqResult<Self> {
        let slots = capacity + 1;
        let mut timestamps = Vec::new();
        timestamps
            .try_reserve_exact(slots)
            .map_err(|_| AcqError::TrialCacheMemory)?;
        timestamps.resize(slots, 0);
        let mut values = Vec::new();
        values
            .try_reserve_exact(slots)
            .map_err(|_| AcqError::TrialCacheMemory)?;
        values.resize(slots, 0);
        Ok(Self {
            timestamps,
            values,
            capacity,
            write_index: 0,
            write_start_index: 0,
            read_end_index: 0,
            overflow_count: 0,
        })
    }

    /// Events dropped so far to make room for newer ones.
    pub fn overflow_count(&self) -> u64 {
        self.overflow_count
    }

    /// Append one event, dropping the oldest when the ring is full.
    pub fn push(&mut self, timestamp: u64, value: u32) {
        let slots = self.capacity + 1;
        self.timestamps[self.write_index] = timestamp;
        self.values[self.write_index] = value;
        self.write_index = (self.write_index + 1) % slots;
        if self.write_index == self.write_start_index {
            let next = (self.write_start_index + 1) % slots;
            // A latched boundary the writer has caught up to moves with the
            // cursor, so a stale snapshot collapses to empty instead of
            // spanning live data.
            if self.read_end_index == self.write_start_index {
                self.read_end_index = next;
            }
            self.write_start_index = next;
            self.overflow_count += 1;
        }
    }

    /// Latch the snapshot boundary at the current write position.
    pub fn latch_read_end(&mut self) {
        self.read_end_index = self.write_index;
    }

    /// Events between the read cursor and the latched boundary.
    pub fn available(&self) -> usize {
        let slots = self.capacity + 1;
        (self.read_end_index + slots - self.write_start_index) % slots
    }

    /// Per-unit event counts up to the latched boundary.
    ///
    /// For valued channels everything tallies under unit 0 regardless of the
    /// stored word.
    pub fn count_by_unit(&self, valued: bool) -> [u32; UNIT_SLOTS] {
        let slots = self.capacity + 1;
        let mut counts = [0u32; UNIT_SLOTS];
        let mut idx = self.write_start_index;
        while idx != self.read_end_index {
            let slot = if valued { 0 } else { unit_slot(self.values[idx]) };
            counts[slot] += 1;
            idx = (idx + 1) % slots;
        }
        counts
    }

    /// Copy out the raw `(timestamp, value)` window up to the latched
    /// boundary.
    ///
    /// `caps` bounds the events taken per tally slot; the scan stops entirely
    /// as soon as one destination fills, so the read cursor never skips an
    /// undelivered event. With `consume` the cursor advances to the final
    /// scanned position.
    ///
    /// This is the only per-event work that runs under the cache lock; unit
    /// routing happens in [`route_by_unit`] on the returned window with no
    /// lock held.
    pub fn take_window(
        &mut self,
        caps: &[u32; UNIT_SLOTS],
        valued: bool,
        consume: bool,
    ) -> Vec<(u64, u32)> {
        let slots = self.capacity + 1;
        let mut taken = [0u32; UNIT_SLOTS];
        let mut out = Vec::new();
        let mut idx = self.write_start_index;
        while idx != self.read_end_index {
            let slot = if valued { 0 } else { unit_slot(self.values[idx]) };
            if taken[slot] >= caps[slot] {
                break;
            }
            taken[slot] += 1;
            out.push((self.timestamps[idx], self.values[idx]));
            idx = (idx + 1) % slots;
        }
        if consume {
            self.write_start_index = idx;
        }
        out
    }

    /// Reset all ring indices, keeping the allocation.
    pub fn reset(&mut self) {
        self.write_index = 0;
        self.write_start_index = 0;
        self.read_end_index = 0;
    }
}

/// Event rings for the whole channel space at one shared capacity.
#[derive(Debug)]
pub struct EventCache {
    capacity: usize,
    channels: Vec<ChannelEventBuffer>,
}

impl EventCache {
    /// Allocate rings for every channel. All-or-nothing: a failed channel
    /// allocation drops what was built so far.
    pub fn allocate(capacity: u32) -> AcqResult<Self> {
        if capacity == 0 {
            return Err(AcqError::InvalidCapacity(0));
        }
        let mut channels = Vec::new();
        channels
            .try_reserve_exact(MAX_CHANS)
            .map_err(|_| AcqError::TrialCacheMemory)?;
        for _ in 0..MAX_CHANS {
            channels.push(ChannelEventBuffer::allocate(capacity as usize)?);
        }
        Ok(Self {
            capacity: capacity as usize,
            channels,
        })
    }

    /// Shared per-channel event capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn slot(&self, channel: u16) -> AcqResult<usize> {
        if channel == 0 || channel as usize > MAX_CHANS {
            return Err(AcqError::InvalidChannel(channel));
        }
        Ok(channel as usize - 1)
    }

    /// The ring for one 1-based channel id.
    pub fn channel(&self, channel: u16) -> AcqResult<&ChannelEventBuffer> {
        let slot = self.slot(channel)?;
        Ok(&self.channels[slot])
    }

    /// Mutable access to the ring for one 1-based channel id.
    pub fn channel_mut(&mut self, channel: u16) -> AcqResult<&mut ChannelEventBuffer> {
        let slot = self.slot(channel)?;
        Ok(&mut self.channels[slot])
    }

    /// Append one event on `channel`.
    pub fn push(&mut self, channel: u16, timestamp: u64, value: u32) -> AcqResult<()> {
        self.channel_mut(channel)?.push(timestamp, value);
        Ok(())
    }

    /// Reset the ring indices of every channel.
    pub fn reset_all(&mut self) {
        for buffer in &mut self.channels {
            buffer.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_slot_mapping() {
        assert_eq!(unit_slot(0), 0);
        assert_eq!(unit_slot(5), 5);
        assert_eq!(unit_slot(255), UNIT_SLOTS - 1);
        // Out-of-range non-noise folds into unsorted.
        assert_eq!(unit_slot(6), 0);
        assert_eq!(unit_slot(42), 0);
    }

    #[test]
    fn counts_split_by_unit() {
        let mut buffer = ChannelEventBuffer::allocate(16).unwrap();
        buffer.push(1, 0);
        buffer.push(2, 1);
        buffer.push(3, 1);
        buffer.push(4, 255);
        buffer.latch_read_end();

        let counts = buffer.count_by_unit(false);
        assert_eq!(counts[0], 1);
        assert_eq!(counts[1], 2);
        assert_eq!(counts[UNIT_SLOTS - 1], 1);
    }

    #[test]
    fn valued_channel_counts_under_unit_zero() {
        let mut buffer = ChannelEventBuffer::allocate(16).unwrap();
        buffer.push(10, 0x0002);
        buffer.push(11, 0x0004);
        buffer.latch_read_end();

        let counts = buffer.count_by_unit(true);
        assert_eq!(counts[0], 2);
        assert_eq!(counts[1..].iter().sum::<u32>(), 0);

        let events = route_by_unit(&buffer.take_window(&counts, true, true), true);
        assert_eq!(events.timestamps[0], vec![10, 11]);
        assert_eq!(events.values, vec![0x0002, 0x0004]);
    }

    #[test]
    fn overflow_drops_oldest_event() {
        let mut buffer = ChannelEventBuffer::allocate(4).unwrap();
        for i in 0..5u64 {
            buffer.push(i, 0);
        }
        assert_eq!(buffer.overflow_count(), 1);
        buffer.latch_read_end();
        let counts = buffer.count_by_unit(false);
        assert_eq!(counts[0], 4);
        let events = route_by_unit(&buffer.take_window(&counts, false, false), false);
        assert_eq!(events.timestamps[0], vec![1, 2, 3, 4]);
    }

    #[test]
    fn take_stops_when_a_destination_fills() {
        let mut buffer = ChannelEventBuffer::allocate(16).unwrap();
        buffer.push(1, 0);
        buffer.push(2, 1);
        buffer.push(3, 0);
        buffer.push(4, 1);
        buffer.latch_read_end();

        // Room for one unit-0 event only: the scan must stop at the second
        // one, leaving the unit-1 event behind it undelivered too.
        let mut caps = [u32::MAX; UNIT_SLOTS];
        caps[0] = 1;
        let events = route_by_unit(&buffer.take_window(&caps, false, true), false);
        assert_eq!(events.timestamps[0], vec![1]);
        assert_eq!(events.timestamps[1], vec![2]);

        // The cursor stayed at the undelivered event.
        buffer.latch_read_end();
        let counts = buffer.count_by_unit(false);
        assert_eq!(counts[0], 1);
        assert_eq!(counts[1], 1);
    }

    #[test]
    fn lapped_boundary_collapses_instead_of_spanning_live_data() {
        let mut buffer = ChannelEventBuffer::allocate(4).unwrap();
        buffer.push(0, 0);
        buffer.push(1, 0);
        buffer.latch_read_end();

        // The writer laps the latched boundary several times over.
        for t in 2..12u64 {
            buffer.push(t, 0);
        }
        assert_eq!(buffer.available(), 0);
        let caps = [u32::MAX; UNIT_SLOTS];
        assert!(buffer.take_window(&caps, false, true).is_empty());

        // A fresh latch recovers the newest contiguous window.
        buffer.latch_read_end();
        let window = buffer.take_window(&caps, false, false);
        let times: Vec<u64> = window.iter().map(|&(t, _)| t).collect();
        assert_eq!(times, vec![8, 9, 10, 11]);
    }

    #[test]
    fn cache_validates_channel_ids() {
        let mut cache = EventCache::allocate(8).unwrap();
        assert!(matches!(
            cache.push(0, 0, 0),
            Err(AcqError::InvalidChannel(0))
        ));
        assert!(matches!(
            cache.push(285, 0, 0),
            Err(AcqError::InvalidChannel(285))
        ));
        cache.push(284, 1, 0).unwrap();
    }
}
