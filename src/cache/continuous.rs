//! Per-group continuous sample caches.
//!
//! Each sample group owns one [`GroupBuffer`]: a ring of sample frames stored
//! in a flat, sample-major `i16` array with a parallel timestamp array. A
//! frame is one `i16` per member channel, so frame `i` for channel slot `c`
//! lives at `samples[i * channel_count + c]`.
//!
//! The ring keeps one slot free to tell full from empty, so a buffer
//! allocated for `capacity` frames stores exactly `capacity` of them before
//! the oldest frame is dropped. Overflow never blocks the writer; it advances
//! the read cursor past the oldest frame and bumps a per-buffer counter that
//! readers can poll.

use crate::error::{AcqError, AcqResult};
use crate::packet::{MAX_GROUPS, TICKS_PER_SECOND};

/// Ring buffer of sample frames for one sample group.
#[derive(Debug)]
pub struct GroupBuffer {
    /// Member channel ids in sample order.
    channel_ids: Vec<u16>,
    /// Sampling rate in Hz, derived from the group period.
    sample_rate: u32,
    /// Requested frame capacity. The ring holds `capacity + 1` slots.
    capacity: usize,
    /// Flat sample storage, `(capacity + 1) * channel_count` entries.
    samples: Vec<i16>,
    /// Frame timestamps, `capacity + 1` entries.
    timestamps: Vec<u64>,
    /// Next slot to write.
    write_index: usize,
    /// Oldest unread slot.
    write_start_index: usize,
    /// Snapshot boundary latched by the last init call.
    read_end_index: usize,
    /// Frames dropped to make room for newer ones.
    overflow_count: u64,
}

impl GroupBuffer {
    /// Allocate a buffer for `capacity` frames of `channel_ids.len()` samples.
    ///
    /// Storage is reserved fallibly; an allocation failure reports
    /// `TrialCacheMemory` and leaves nothing behind.
    pub fn allocate(channel_ids: Vec<u16>, capacity: usize, sample_rate: u32) -> AcqResult<Self> {
        if capacity == 0 {
            return Err(AcqError::InvalidCapacity(0));
        }
        let slots = capacity + 1;
        let samples = alloc_zeroed::<i16>(slots * channel_ids.len())?;
        let timestamps = alloc_zeroed::<u64>(slots)?;
        Ok(Self {
            channel_ids,
            sample_rate,
            capacity,
            samples,
            timestamps,
            write_index: 0,
            write_start_index: 0,
            read_end_index: 0,
            overflow_count: 0,
        })
    }

    /// Member channel ids in sample order.
    pub fn channel_ids(&self) -> &[u16] {
        &self.channel_ids
    }

    /// Sampling rate in Hz.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Requested frame capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Frames dropped so far to make room for newer ones.
    pub fn overflow_count(&self) -> u64 {
        self.overflow_count
    }

    /// True when the buffer must be rebuilt for a new channel membership.
    ///
    /// The first packet after allocation-for-zero-channels, a channel count
    /// change and a membership change all qualify. Identical membership is a
    /// data-preserving no-op.
    pub fn needs_reallocation(&self, channel_ids: &[u16]) -> bool {
        self.channel_ids != channel_ids
    }

    /// Append one sample frame.
    ///
    /// When the ring is full the oldest frame is dropped and the overflow
    /// counter bumped.
    pub fn push(&mut self, timestamp: u64, frame: &[i16]) -> AcqResult<()> {
        let chans = self.channel_ids.len();
        if frame.len() != chans {
            return Err(AcqError::ChannelCountMismatch {
                expected: chans,
                got: frame.len(),
            });
        }
        let slots = self.capacity + 1;
        let base = self.write_index * chans;
        self.samples[base..base + chans].copy_from_slice(frame);
        self.timestamps[self.write_index] = timestamp;
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
        Ok(())
    }

    /// Latch the snapshot boundary at the current write position and return
    /// the number of frames available behind it.
    pub fn latch_read_end(&mut self) -> usize {
        self.read_end_index = self.write_index;
        self.available()
    }

    /// Frames between the read cursor and the latched snapshot boundary.
    pub fn available(&self) -> usize {
        let slots = self.capacity + 1;
        (self.read_end_index + slots - self.write_start_index) % slots
    }

    /// Copy out all frames up to the latched snapshot boundary.
    ///
    /// Returns `(timestamps, samples)` where `samples` is sample-major with
    /// one frame per timestamp. With `consume` the read cursor advances to
    /// the boundary; without it a later read sees the same frames again.
    ///
    /// The window is at most two contiguous regions of the ring, so the copy
    /// is a bounded pair of memcpys.
    pub fn read(&mut self, consume: bool) -> (Vec<u64>, Vec<i16>) {
        let n = self.available();
        let chans = self.channel_ids.len();
        let slots = self.capacity + 1;
        let start = self.write_start_index;
        let end = self.read_end_index;
        let mut timestamps = Vec::with_capacity(n);
        let mut samples = Vec::with_capacity(n * chans);
        if start <= end {
            timestamps.extend_from_slice(&self.timestamps[start..end]);
            samples.extend_from_slice(&self.samples[start * chans..end * chans]);
        } else {
            timestamps.extend_from_slice(&self.timestamps[start..slots]);
            timestamps.extend_from_slice(&self.timestamps[..end]);
            samples.extend_from_slice(&self.samples[start * chans..slots * chans]);
            samples.extend_from_slice(&self.samples[..end * chans]);
        }
        if consume {
            self.write_start_index = end;
        }
        (timestamps, samples)
    }

    /// Reset all ring indices, keeping the allocation.
    pub fn reset(&mut self) {
        self.write_index = 0;
        self.write_start_index = 0;
        self.read_end_index = 0;
    }
}

/// All continuous group buffers of one trial.
///
/// Group buffers are allocated lazily on the first sample packet seen for the
/// group, using the configured default frame capacity. A membership change
/// rebuilds the group's buffer at its existing capacity and discards the old
/// frames.
#[derive(Debug)]
pub struct ContinuousCache {
    default_capacity: usize,
    groups: Vec<Option<GroupBuffer>>,
}

impl ContinuousCache {
    /// Create an empty cache with a default per-group frame capacity.
    pub fn new(default_capacity: u32) -> AcqResult<Self> {
        if default_capacity == 0 {
            return Err(AcqError::InvalidCapacity(0));
        }
        let mut groups = Vec::new();
        groups
            .try_reserve_exact(MAX_GROUPS)
            .map_err(|_| AcqError::TrialCacheMemory)?;
        groups.resize_with(MAX_GROUPS, || None);
        Ok(Self {
            default_capacity: default_capacity as usize,
            groups,
        })
    }

    fn slot(&self, group: u16) -> AcqResult<usize> {
        if group == 0 || group as usize > MAX_GROUPS {
            return Err(AcqError::InvalidGroup(group));
        }
        Ok(group as usize - 1)
    }

    /// The group's buffer, if a sample packet has been seen for it.
    pub fn group(&self, group: u16) -> AcqResult<Option<&GroupBuffer>> {
        let slot = self.slot(group)?;
        Ok(self.groups[slot].as_ref())
    }

    /// Mutable access to the group's buffer.
    pub fn group_mut(&mut self, group: u16) -> AcqResult<Option<&mut GroupBuffer>> {
        let slot = self.slot(group)?;
        Ok(self.groups[slot].as_mut())
    }

    /// Ingest one sample frame for `group`.
    ///
    /// Allocates the group buffer on first contact and rebuilds it when the
    /// channel membership changes.
    pub fn ingest(
        &mut self,
        group: u16,
        period: u32,
        channel_ids: &[u16],
        timestamp: u64,
        frame: &[i16],
    ) -> AcqResult<()> {
        let slot = self.slot(group)?;
        let sample_rate = if period > 0 {
            TICKS_PER_SECOND / period
        } else {
            0
        };
        let rebuild = match &self.groups[slot] {
            Some(buffer) => buffer.needs_reallocation(channel_ids),
            None => true,
        };
        if rebuild {
            let capacity = self.groups[slot]
                .as_ref()
                .map_or(self.default_capacity, GroupBuffer::capacity);
            self.groups[slot] = Some(GroupBuffer::allocate(
                channel_ids.to_vec(),
                capacity,
                sample_rate,
            )?);
        }
        match &mut self.groups[slot] {
            Some(buffer) => buffer.push(timestamp, frame),
            // Unreachable: the slot was just filled above.
            None => Err(AcqError::InvalidGroup(group)),
        }
    }

    /// Reset the ring indices of every allocated group buffer.
    pub fn reset_all(&mut self) {
        for buffer in self.groups.iter_mut().flatten() {
            buffer.reset();
        }
    }
}

fn alloc_zeroed<T: Clone + Default>(len: usize) -> AcqResult<Vec<T>> {
    let mut v = Vec::new();
    v.try_reserve_exact(len).map_err(|_| AcqError::TrialCacheMemory)?;
    v.resize(len, T::default());
    Ok(v)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frames(buffer: &mut GroupBuffer) -> (Vec<u64>, Vec<i16>) {
        buffer.latch_read_end();
        buffer.read(false)
    }

    #[test]
    fn zero_capacity_is_rejected() {
        assert!(matches!(
            GroupBuffer::allocate(vec![1, 2], 0, 1000),
            Err(AcqError::InvalidCapacity(0))
        ));
    }

    #[test]
    fn stores_exactly_capacity_frames_before_overflow() {
        let mut buffer = GroupBuffer::allocate(vec![11, 12], 8, 30_000).unwrap();
        for i in 0..8u64 {
            buffer.push(i, &[i as i16, -(i as i16)]).unwrap();
        }
        assert_eq!(buffer.overflow_count(), 0);
        let (ts, samples) = frames(&mut buffer);
        assert_eq!(ts.len(), 8);
        assert_eq!(ts[0], 0);
        assert_eq!(samples.len(), 16);

        // The ninth frame drops the oldest.
        buffer.push(8, &[8, -8]).unwrap();
        assert_eq!(buffer.overflow_count(), 1);
        let (ts, samples) = frames(&mut buffer);
        assert_eq!(ts.len(), 8);
        assert_eq!(ts[0], 1);
        assert_eq!(ts[7], 8);
        assert_eq!(&samples[14..16], &[8, -8]);
    }

    #[test]
    fn channel_count_mismatch_is_rejected() {
        let mut buffer = GroupBuffer::allocate(vec![11, 12], 4, 30_000).unwrap();
        let err = buffer.push(0, &[1, 2, 3]).unwrap_err();
        assert!(matches!(
            err,
            AcqError::ChannelCountMismatch { expected: 2, got: 3 }
        ));
    }

    #[test]
    fn peek_then_consume() {
        let mut buffer = GroupBuffer::allocate(vec![7], 4, 1000).unwrap();
        buffer.push(10, &[1]).unwrap();
        buffer.push(11, &[2]).unwrap();
        assert_eq!(buffer.latch_read_end(), 2);

        let (ts, _) = buffer.read(false);
        assert_eq!(ts, vec![10, 11]);
        // Nothing consumed, a second read sees the same frames.
        let (ts, _) = buffer.read(false);
        assert_eq!(ts, vec![10, 11]);

        let (ts, _) = buffer.read(true);
        assert_eq!(ts, vec![10, 11]);
        assert_eq!(buffer.latch_read_end(), 0);
    }

    #[test]
    fn snapshot_excludes_frames_after_latch() {
        let mut buffer = GroupBuffer::allocate(vec![7], 8, 1000).unwrap();
        buffer.push(1, &[1]).unwrap();
        buffer.push(2, &[2]).unwrap();
        assert_eq!(buffer.latch_read_end(), 2);
        buffer.push(3, &[3]).unwrap();

        let (ts, _) = buffer.read(true);
        assert_eq!(ts, vec![1, 2]);
        // The late frame is still there for the next snapshot.
        assert_eq!(buffer.latch_read_end(), 1);
    }

    #[test]
    fn lapped_boundary_collapses_instead_of_spanning_live_data() {
        let mut buffer = GroupBuffer::allocate(vec![7], 4, 1000).unwrap();
        buffer.push(0, &[0]).unwrap();
        buffer.push(1, &[1]).unwrap();
        assert_eq!(buffer.latch_read_end(), 2);

        // The writer laps the latched boundary several times over.
        for t in 2..12u64 {
            buffer.push(t, &[t as i16]).unwrap();
        }
        assert_eq!(buffer.available(), 0);
        let (ts, _) = buffer.read(true);
        assert!(ts.is_empty());

        // A fresh latch recovers the newest contiguous window.
        assert_eq!(buffer.latch_read_end(), 4);
        let (ts, _) = buffer.read(false);
        assert_eq!(ts, vec![8, 9, 10, 11]);
    }

    #[test]
    fn membership_change_triggers_reallocation() {
        let buffer = GroupBuffer::allocate(vec![11, 12], 8, 1000).unwrap();
        assert!(!buffer.needs_reallocation(&[11, 12]));
        assert!(buffer.needs_reallocation(&[11, 13]));
        assert!(buffer.needs_reallocation(&[11, 12, 13]));
    }

    #[test]
    fn cache_allocates_lazily_and_rebuilds_on_membership_change() {
        let mut cache = ContinuousCache::new(8).unwrap();
        assert!(cache.group(3).unwrap().is_none());

        cache.ingest(3, 1, &[11, 12], 100, &[5, 6]).unwrap();
        {
            let buffer = cache.group(3).unwrap().unwrap();
            assert_eq!(buffer.channel_ids(), &[11, 12]);
            assert_eq!(buffer.sample_rate(), 30_000);
            assert_eq!(buffer.capacity(), 8);
        }

        // Membership change discards cached frames but keeps the capacity.
        cache.ingest(3, 1, &[11, 12, 13], 101, &[1, 2, 3]).unwrap();
        let buffer = cache.group_mut(3).unwrap().unwrap();
        assert_eq!(buffer.channel_ids(), &[11, 12, 13]);
        assert_eq!(buffer.capacity(), 8);
        assert_eq!(buffer.latch_read_end(), 1);
    }

    #[test]
    fn group_zero_and_out_of_range_are_invalid() {
        let mut cache = ContinuousCache::new(8).unwrap();
        assert!(matches!(
            cache.ingest(0, 1, &[1], 0, &[0]),
            Err(AcqError::InvalidGroup(0))
        ));
        assert!(matches!(cache.group(9), Err(AcqError::InvalidGroup(9))));
    }
}
