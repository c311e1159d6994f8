//! Tracking cache.
//!
//! Motion tracking packets carry coordinate blobs for up to `MAX_TRACK_OBJ`
//! trackable objects. Each object gets its own ring of [`TrackRecord`]s plus
//! node metadata captured from the packets themselves: the label and type of
//! the first packet that announces the node, refreshed whenever the type
//! changes.
//!
//! Tracking data is only meaningful relative to the video stream, so records
//! are accepted only once a video sync pulse has been seen, and each record
//! carries the sync time and frame that were current when it arrived.

use crate::error::{AcqError, AcqResult};
use crate::packet::{TrackCoords, MAX_TRACK_COORDS, MAX_TRACK_OBJ};

/// Node type whose coordinate payload is 1-D word sizes.
pub const NODE_TYPE_SIZE: u16 = 4;

/// Video sync state captured from the last sync pulse.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncState {
    /// Effective video time of the pulse.
    pub etime: u32,
    /// Frame number of the pulse.
    pub frame: u32,
    /// Frame rate in frames per second.
    pub fps: u32,
}

/// Metadata for one trackable object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeInfo {
    /// Node label from the announcing packet.
    pub name: String,
    /// Node type discriminator.
    pub node_type: u16,
    /// Largest point count seen for the node.
    pub max_point_count: u16,
}

/// One cached tracking record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackRecord {
    /// Instrument timestamp of the tracking packet.
    pub timestamp: u64,
    /// Effective video time of the associated sync pulse.
    pub sync_etime: u32,
    /// Frame number of the associated sync pulse.
    pub sync_frame: u32,
    /// Number of tracked points.
    pub point_count: u16,
    /// Coordinate payload, clipped to `MAX_TRACK_COORDS` words.
    pub coords: TrackCoords,
}

/// Ring of tracking records for one trackable object.
#[derive(Debug)]
pub struct NodeBuffer {
    /// Node metadata.
    info: NodeInfo,
    records: Vec<TrackRecord>,
    capacity: usize,
    write_index: usize,
    write_start_index: usize,
    read_end_index: usize,
    overflow_count: u64,
}

impl NodeBuffer {
    fn allocate(info: NodeInfo, capacity: usize) -> AcqResult<Self> {
        let slots = capacity + 1;
        let mut records = Vec::new();
        records
            .try_reserve_exact(slots)
            .map_err(|_| AcqError::TrialCacheMemory)?;
        records.resize_with(slots, TrackRecord::default);
        Ok(Self {
            info,
            records,
            capacity,
            write_index: 0,
            write_start_index: 0,
            read_end_index: 0,
            overflow_count: 0,
        })
    }

    /// Node metadata.
    pub fn info(&self) -> &NodeInfo {
        &self.info
    }

    /// Records dropped so far to make room for newer ones.
    pub fn overflow_count(&self) -> u64 {
        self.overflow_count
    }

    fn push(&mut self, record: TrackRecord) {
        let slots = self.capacity + 1;
        self.records[self.write_index] = record;
        self.write_index = (self.write_index + 1) % slots;
        if self.write_index == self.write_start_index {
            let next = (self.write_start_index + 1) % slots;
            // Keep a lapped snapshot boundary inside the live window.
            if self.read_end_index == self.write_start_index {
                self.read_end_index = next;
            }
            self.write_start_index = next;
            self.overflow_count += 1;
        }
    }

    /// Latch the snapshot boundary and return the records behind it.
    pub fn latch_read_end(&mut self) -> usize {
        self.read_end_index = self.write_index;
        self.available()
    }

    /// Records between the read cursor and the latched boundary.
    pub fn available(&self) -> usize {
        let slots = self.capacity + 1;
        (self.read_end_index + slots - self.write_start_index) % slots
    }

    /// Copy out records up to the latched boundary, oldest first.
    ///
    /// A consuming read moves the records out instead of cloning them, so no
    /// coordinate allocation happens while the caller holds the cache.
    pub fn read(&mut self, consume: bool) -> Vec<TrackRecord> {
        let n = self.available();
        let slots = self.capacity + 1;
        let mut out = Vec::with_capacity(n);
        let mut idx = self.write_start_index;
        for _ in 0..n {
            let record = if consume {
                std::mem::take(&mut self.records[idx])
            } else {
                self.records[idx].clone()
            };
            out.push(record);
            idx = (idx + 1) % slots;
        }
        if consume {
            self.write_start_index = self.read_end_index;
        }
        out
    }

    fn reset(&mut self) {
        self.write_index = 0;
        self.write_start_index = 0;
        self.read_end_index = 0;
    }
}

/// Tracking rings for all trackable objects plus the video sync association.
#[derive(Debug)]
pub struct TrackingCache {
    capacity: usize,
    nodes: Vec<Option<NodeBuffer>>,
    last_sync: Option<SyncState>,
}

impl TrackingCache {
    /// Create an empty cache with a per-node record capacity. Node rings are
    /// allocated lazily as packets announce the nodes.
    pub fn new(capacity: u32) -> AcqResult<Self> {
        if capacity == 0 {
            return Err(AcqError::InvalidCapacity(0));
        }
        let mut nodes = Vec::new();
        nodes
            .try_reserve_exact(MAX_TRACK_OBJ)
            .map_err(|_| AcqError::TrialCacheMemory)?;
        nodes.resize_with(MAX_TRACK_OBJ, || None);
        Ok(Self {
            capacity: capacity as usize,
            nodes,
            last_sync: None,
        })
    }

    /// Record a video sync pulse.
    pub fn note_sync(&mut self, sync: SyncState) {
        self.last_sync = Some(sync);
    }

    /// The last seen sync pulse, if any.
    pub fn last_sync(&self) -> Option<SyncState> {
        self.last_sync
    }

    fn slot(&self, node_id: u16) -> AcqResult<usize> {
        if node_id as usize >= MAX_TRACK_OBJ {
            return Err(AcqError::InvalidTrackable(node_id));
        }
        Ok(node_id as usize)
    }

    /// The ring for one trackable object, if it has been announced.
    pub fn node(&self, node_id: u16) -> AcqResult<Option<&NodeBuffer>> {
        let slot = self.slot(node_id)?;
        Ok(self.nodes[slot].as_ref())
    }

    /// Mutable access to the ring for one trackable object.
    pub fn node_mut(&mut self, node_id: u16) -> AcqResult<Option<&mut NodeBuffer>> {
        let slot = self.slot(node_id)?;
        Ok(self.nodes[slot].as_mut())
    }

    /// Ingest one tracking packet.
    ///
    /// Dropped silently until a sync pulse has been seen. The node ring is
    /// allocated on first contact and rebuilt when the node type changes.
    pub fn ingest(
        &mut self,
        node_id: u16,
        node_type: u16,
        name: &str,
        timestamp: u64,
        point_count: u16,
        coords: &TrackCoords,
    ) -> AcqResult<()> {
        let slot = self.slot(node_id)?;
        let Some(sync) = self.last_sync else {
            return Ok(());
        };

        let rebuild = match &self.nodes[slot] {
            Some(node) => node.info.node_type != node_type,
            None => true,
        };
        if rebuild {
            let info = NodeInfo {
                name: name.to_string(),
                node_type,
                max_point_count: point_count,
            };
            self.nodes[slot] = Some(NodeBuffer::allocate(info, self.capacity)?);
        }

        let coords = clip_coords(coords);
        match &mut self.nodes[slot] {
            Some(node) => {
                if point_count > node.info.max_point_count {
                    node.info.max_point_count = point_count;
                }
                node.push(TrackRecord {
                    timestamp,
                    sync_etime: sync.etime,
                    sync_frame: sync.frame,
                    point_count,
                    coords,
                });
                Ok(())
            }
            // Unreachable: the slot was just filled above.
            None => Err(AcqError::InvalidTrackable(node_id)),
        }
    }

    /// Reset every node ring and forget the sync association.
    pub fn reset_all(&mut self) {
        for node in self.nodes.iter_mut().flatten() {
            node.reset();
        }
        self.last_sync = None;
    }
}

fn clip_coords(coords: &TrackCoords) -> TrackCoords {
    match coords {
        TrackCoords::Points(v) => {
            TrackCoords::Points(v[..v.len().min(MAX_TRACK_COORDS)].to_vec())
        }
        TrackCoords::Sizes(v) => TrackCoords::Sizes(v[..v.len().min(MAX_TRACK_COORDS)].to_vec()),
    }
}
