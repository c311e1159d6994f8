//! Wire packet model shared by the dispatcher, the trial caches and the mock
//! link.
//!
//! The external link delivers framed packets with a fixed header followed by a
//! type-dependent payload. The framing and transport themselves live outside
//! this crate; what arrives here is one [`Packet`] at a time, already decoded
//! into a [`PacketBody`] variant. Decoding once at the boundary keeps the
//! caches free of union-style field reuse: a spike packet carries a unit, a
//! digital packet carries a value, and the type system keeps them apart.
//!
//! # Channel space
//!
//! Channel ids are 1-based and fixed by the instrument wire format:
//!
//! ```text
//!   1..=256   front-end analog channels
//! 257..=272   auxiliary analog inputs
//! 273..=276   analog outputs
//! 277..=278   audio outputs
//!       279   digital input
//!       280   serial input
//! 281..=284   digital outputs
//! ```

/// Total addressable channel count (ids are `1..=MAX_CHANS`).
pub const MAX_CHANS: usize = 284;
/// Number of front-end analog channels.
pub const FRONTEND_CHANS: u16 = 256;
/// Number of auxiliary analog input channels.
pub const ANALOG_IN_CHANS: u16 = 16;
/// Last analog input channel id.
pub const LAST_ANALOG_IN: u16 = FRONTEND_CHANS + ANALOG_IN_CHANS;
/// Digital input channel id.
pub const DIGITAL_IN_CHAN: u16 = 279;
/// Serial input channel id.
pub const SERIAL_CHAN: u16 = 280;

/// Number of sample groups (group numbers are `1..=MAX_GROUPS`).
pub const MAX_GROUPS: usize = 8;
/// Highest sorted spike unit.
pub const MAX_UNITS: usize = 5;
/// Sentinel unit for events classified as noise.
pub const UNIT_NOISE: u32 = 255;
/// Tally slots per channel: units 0..=5 plus one slot for noise.
pub const UNIT_SLOTS: usize = MAX_UNITS + 2;
/// Number of trackable objects.
pub const MAX_TRACK_OBJ: usize = 20;
/// Maximum comment text length in bytes.
pub const MAX_COMMENT: usize = 128;
/// Maximum coordinate words in one tracking packet.
pub const MAX_TRACK_COORDS: usize = 128;
/// Fixed size of the instance table.
pub const MAX_INSTANCES: usize = 4;
/// Instrument clock rate in ticks per second.
pub const TICKS_PER_SECOND: u32 = 30_000;

/// True for analog channels that can produce spike events.
pub fn is_analog_in(channel: u16) -> bool {
    (1..=LAST_ANALOG_IN).contains(&channel)
}

/// True for the digital input channel.
pub fn is_digital_in(channel: u16) -> bool {
    channel == DIGITAL_IN_CHAN
}

/// True for the serial input channel.
pub fn is_serial(channel: u16) -> bool {
    channel == SERIAL_CHAN
}

/// True for any channel whose packets land in the event cache.
pub fn is_event_channel(channel: u16) -> bool {
    is_analog_in(channel) || is_digital_in(channel) || is_serial(channel)
}

/// True for channels whose event payload is a data word rather than a spike
/// unit. Their events are tallied under unit 0.
pub fn is_valued_channel(channel: u16) -> bool {
    is_digital_in(channel) || is_serial(channel)
}

/// Fixed packet header, field for field as the link delivers it.
///
/// `dlen` is the payload length in 32-bit words.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Instrument timestamp in clock ticks.
    pub time: u64,
    /// Originating channel id, or 0 for group and broadcast packets.
    pub chid: u16,
    /// Raw packet type discriminator from the wire.
    pub pkt_type: u16,
    /// Payload length in 32-bit words.
    pub dlen: u16,
    /// Originating instrument index.
    pub instrument: u8,
}

/// Tracking coordinate payload. Point nodes carry interleaved i16
/// coordinates; 1-D size nodes carry word data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackCoords {
    /// Interleaved signed coordinates for point-style nodes.
    Points(Vec<i16>),
    /// Word data for 1-D size nodes.
    Sizes(Vec<u32>),
}

impl Default for TrackCoords {
    fn default() -> Self {
        TrackCoords::Points(Vec::new())
    }
}

impl TrackCoords {
    /// Number of coordinate words carried.
    pub fn len(&self) -> usize {
        match self {
            TrackCoords::Points(v) => v.len(),
            TrackCoords::Sizes(v) => v.len(),
        }
    }

    /// True when no coordinates are carried.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Which configuration table a config report announces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportKind {
    /// Sample group definition changed.
    Group,
    /// Channel configuration changed.
    Channel,
    /// Any other system report.
    System,
}

/// Decoded packet payload.
#[derive(Debug, Clone, PartialEq)]
pub enum PacketBody {
    /// One sample frame for a sample group: one i16 per member channel.
    Sample {
        /// 1-based sample group number.
        group: u16,
        /// Sampling period in clock ticks.
        period: u32,
        /// Member channel ids, in sample order.
        channel_ids: Vec<u16>,
        /// One sample per member channel.
        data: Vec<i16>,
    },
    /// Sorted spike event on an analog channel.
    Spike {
        /// Classified unit, 0 for unsorted, `UNIT_NOISE` for noise.
        unit: u32,
    },
    /// Digital input event.
    Digital {
        /// Sampled port value.
        value: u32,
    },
    /// Serial input event.
    Serial {
        /// Received byte value.
        value: u32,
    },
    /// User comment.
    Comment {
        /// Display color as packed RGBA.
        rgba: u32,
        /// Character set discriminator.
        charset: u8,
        /// Comment text.
        text: String,
    },
    /// System log line, cached alongside comments.
    Log {
        /// Log text.
        text: String,
    },
    /// Tracking coordinates for one trackable object.
    Track {
        /// Trackable object id, `0..MAX_TRACK_OBJ`.
        node_id: u16,
        /// Node type discriminator.
        node_type: u16,
        /// Node label.
        name: String,
        /// Number of tracked points.
        point_count: u16,
        /// Coordinate payload.
        coords: TrackCoords,
    },
    /// Video synchronization pulse.
    VideoSync {
        /// Effective video time.
        etime: u32,
        /// Frame number.
        frame: u32,
        /// Frame rate in frames per second.
        fps: u32,
    },
    /// Configuration report, forwarded to callbacks only.
    ConfigReport {
        /// Which table the report covers.
        kind: ReportKind,
    },
    /// Link heartbeat.
    Heartbeat,
}

/// One decoded packet from the link.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    /// Fixed header.
    pub header: PacketHeader,
    /// Decoded payload.
    pub body: PacketBody,
}

// Raw type discriminators, kept for header fidelity with the wire format.
const TYPE_HEARTBEAT: u16 = 0x04;
const TYPE_VIDEO_SYNC: u16 = 0x29;
const TYPE_TRACK: u16 = 0x2E;
const TYPE_COMMENT: u16 = 0x31;
const TYPE_LOG: u16 = 0x63;
const TYPE_REPORT: u16 = 0x10;

impl Packet {
    fn with_header(time: u64, chid: u16, pkt_type: u16, body: PacketBody) -> Self {
        let dlen = body_words(&body);
        Packet {
            header: PacketHeader {
                time,
                chid,
                pkt_type,
                dlen,
                instrument: 0,
            },
            body,
        }
    }

    /// One sample frame for a group. `data` is one i16 per channel id.
    pub fn sample(time: u64, group: u16, period: u32, channel_ids: Vec<u16>, data: Vec<i16>) -> Self {
        Self::with_header(time, 0, group, PacketBody::Sample { group, period, channel_ids, data })
    }

    /// Spike event on `channel` classified as `unit`.
    pub fn spike(time: u64, channel: u16, unit: u32) -> Self {
        Self::with_header(time, channel, unit as u16, PacketBody::Spike { unit })
    }

    /// Digital input event.
    pub fn digital(time: u64, value: u32) -> Self {
        Self::with_header(time, DIGITAL_IN_CHAN, 0, PacketBody::Digital { value })
    }

    /// Serial input event.
    pub fn serial(time: u64, value: u32) -> Self {
        Self::with_header(time, SERIAL_CHAN, 0, PacketBody::Serial { value })
    }

    /// User comment.
    pub fn comment(time: u64, rgba: u32, charset: u8, text: impl Into<String>) -> Self {
        Self::with_header(
            time,
            0,
            TYPE_COMMENT,
            PacketBody::Comment { rgba, charset, text: text.into() },
        )
    }

    /// System log line.
    pub fn log(time: u64, text: impl Into<String>) -> Self {
        Self::with_header(time, 0, TYPE_LOG, PacketBody::Log { text: text.into() })
    }

    /// Tracking coordinates for one trackable object.
    pub fn track(
        time: u64,
        node_id: u16,
        node_type: u16,
        name: impl Into<String>,
        point_count: u16,
        coords: TrackCoords,
    ) -> Self {
        Self::with_header(
            time,
            0,
            TYPE_TRACK,
            PacketBody::Track {
                node_id,
                node_type,
                name: name.into(),
                point_count,
                coords,
            },
        )
    }

    /// Video synchronization pulse.
    pub fn video_sync(time: u64, etime: u32, frame: u32, fps: u32) -> Self {
        Self::with_header(time, 0, TYPE_VIDEO_SYNC, PacketBody::VideoSync { etime, frame, fps })
    }

    /// Configuration report.
    pub fn config_report(time: u64, kind: ReportKind) -> Self {
        Self::with_header(time, 0, TYPE_REPORT, PacketBody::ConfigReport { kind })
    }

    /// Link heartbeat.
    pub fn heartbeat(time: u64) -> Self {
        Self::with_header(time, 0, TYPE_HEARTBEAT, PacketBody::Heartbeat)
    }
}

/// Payload length in 32-bit words, rounded up.
fn body_words(body: &PacketBody) -> u16 {
    let bytes = match body {
        PacketBody::Sample { channel_ids, data, .. } => {
            4 + channel_ids.len() * 2 + data.len() * 2
        }
        PacketBody::Spike { .. } | PacketBody::Digital { .. } | PacketBody::Serial { .. } => 4,
        PacketBody::Comment { text, .. } => 8 + text.len(),
        PacketBody::Log { text } => text.len(),
        PacketBody::Track { name, coords, .. } => 8 + name.len() + coords.len() * 4,
        PacketBody::VideoSync { .. } => 12,
        PacketBody::ConfigReport { .. } => 4,
        PacketBody::Heartbeat => 0,
    };
    bytes.div_ceil(4) as u16
}
