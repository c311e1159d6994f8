//! Trial controller.
//!
//! The controller owns the four trial caches and everything that decides what
//! goes into them: the trial-active flag, the begin/end trigger, the
//! per-channel accept mask and the allocate/read/reset/teardown lifecycle.
//!
//! The API is poll-style and split per cache kind. An `init_*` call latches a
//! snapshot boundary and reports what is available behind it; the matching
//! `get_*` call copies that data out, either consuming it or leaving it for
//! the next reader. Comment and tracking inits can block for a bounded time
//! waiting for data newer than the trial start; the ingestion paths wake
//! those waits early.
//!
//! Ingestion is conditioned on a running trial: while no trial is active the
//! packets still drive the clock and the triggers, but nothing is written
//! into the caches.
//!
//! Locking is one mutex per cache. The packet thread holds a lock for one
//! ring write; readers hold it for one bounded raw copy per channel, group or
//! node and do all routing and per-record allocation outside it. Handlers and
//! readers on other threads never deadlock with the packet thread because
//! nothing is ever invoked while a cache lock is held.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{debug, info};

use crate::cache::comment::CommentCache;
use crate::cache::continuous::ContinuousCache;
use crate::cache::event::{route_by_unit, ChannelEvents, EventCache};
use crate::cache::tracking::{NodeInfo, SyncState, TrackRecord, TrackingCache};
use crate::cache::CommentRecord;
use crate::config::TrialDefaults;
use crate::error::{AcqError, AcqResult};
use crate::packet::{is_valued_channel, TrackCoords, MAX_CHANS, UNIT_SLOTS};

/// The four independently configurable trial caches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrialKind {
    /// Per-channel event cache.
    Events,
    /// Per-group continuous cache.
    Continuous,
    /// Comment and log cache.
    Comments,
    /// Tracking cache.
    Tracking,
}

/// Trial configuration: trigger definition plus cache capacities.
///
/// A capacity of zero leaves that cache unconfigured. A trigger channel of
/// zero disables that trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrialConfig {
    /// Start the trial immediately (rising edge latches the start time).
    pub active: bool,
    /// Channel whose events can start the trial, 0 for none.
    pub begin_channel: u16,
    /// Mask applied to the event value before the begin comparison.
    pub begin_mask: u32,
    /// Value the masked event must equal to start the trial.
    pub begin_value: u32,
    /// Channel whose events can end the trial, 0 for none.
    pub end_channel: u16,
    /// Mask applied to the event value before the end comparison.
    pub end_mask: u32,
    /// Value the masked event must equal to end the trial.
    pub end_value: u32,
    /// Continuous frames cached per sample group, 0 to skip the cache.
    pub continuous_samples: u32,
    /// Events cached per channel, 0 to skip the cache.
    pub event_samples: u32,
    /// Comment slots, 0 to skip the cache.
    pub comment_slots: u32,
    /// Tracking slots per trackable object, 0 to skip the cache.
    pub tracking_slots: u32,
    /// Requested spike waveform samples, stored for read-back only.
    pub waveform_samples: u32,
}

impl TrialConfig {
    /// Build an inactive, trigger-less configuration from the crate defaults.
    pub fn from_defaults(defaults: &TrialDefaults) -> Self {
        Self {
            active: false,
            begin_channel: 0,
            begin_mask: 0,
            begin_value: 0,
            end_channel: 0,
            end_mask: 0,
            end_value: 0,
            continuous_samples: defaults.continuous_samples,
            event_samples: defaults.event_samples,
            comment_slots: defaults.comment_slots,
            tracking_slots: defaults.tracking_slots,
            waveform_samples: 0,
        }
    }
}

impl Default for TrialConfig {
    fn default() -> Self {
        Self::from_defaults(&TrialDefaults::default())
    }
}

/// Read-back of the trial configuration plus the live trial-active flag.
#[derive(Debug, Clone)]
pub struct TrialStatus {
    /// Last configuration applied.
    pub config: TrialConfig,
    /// Whether a trial is currently running.
    pub active: bool,
}

/// Per-channel per-unit event counts from an events init snapshot.
#[derive(Debug, Clone)]
pub struct ChannelEventCounts {
    /// 1-based channel id.
    pub channel: u16,
    /// Event counts per tally slot.
    pub counts: [u32; UNIT_SLOTS],
}

/// Events init snapshot: unmasked channels that have data.
#[derive(Debug, Clone, Default)]
pub struct EventsInit {
    /// Channels with at least one cached event.
    pub channels: Vec<ChannelEventCounts>,
}

/// Events read for one channel.
#[derive(Debug, Clone)]
pub struct TrialEventsChannel {
    /// 1-based channel id.
    pub channel: u16,
    /// Unit-routed timestamps and values.
    pub events: ChannelEvents,
}

/// Events read across all unmasked channels.
#[derive(Debug, Clone, Default)]
pub struct TrialEvents {
    /// Channels with at least one delivered event.
    pub channels: Vec<TrialEventsChannel>,
}

/// Continuous init snapshot for one sample group.
#[derive(Debug, Clone, Default)]
pub struct ContinuousInit {
    /// 1-based sample group number.
    pub group: u16,
    /// Member channel ids in sample order.
    pub channel_ids: Vec<u16>,
    /// Sampling rate in Hz.
    pub sample_rate: u32,
    /// Frames available behind the latched boundary.
    pub available: usize,
}

/// Continuous frames read for one sample group.
#[derive(Debug, Clone, Default)]
pub struct ContinuousData {
    /// 1-based sample group number.
    pub group: u16,
    /// Member channel ids in sample order.
    pub channel_ids: Vec<u16>,
    /// Sampling rate in Hz.
    pub sample_rate: u32,
    /// Frame timestamps.
    pub timestamps: Vec<u64>,
    /// Sample-major frames, one i16 per channel per timestamp.
    pub samples: Vec<i16>,
}

/// Tracking availability for one trackable object.
#[derive(Debug, Clone)]
pub struct NodeAvailability {
    /// Trackable object id.
    pub node_id: u16,
    /// Node metadata.
    pub info: NodeInfo,
    /// Records available behind the latched boundary.
    pub available: usize,
}

/// Tracking init snapshot.
#[derive(Debug, Clone, Default)]
pub struct TrackingInit {
    /// Announced nodes with their availability.
    pub nodes: Vec<NodeAvailability>,
    /// Last seen video sync pulse, if any.
    pub last_sync: Option<SyncState>,
}

/// Tracking records read for one trackable object.
#[derive(Debug, Clone)]
pub struct NodeRecords {
    /// Trackable object id.
    pub node_id: u16,
    /// Node metadata.
    pub info: NodeInfo,
    /// Records oldest first.
    pub records: Vec<TrackRecord>,
}

/// Tracking records read across all announced nodes.
#[derive(Debug, Clone, Default)]
pub struct TrackingData {
    /// Nodes with at least one delivered record.
    pub nodes: Vec<NodeRecords>,
}

/// Bounded arrival notifier.
///
/// An init call arms the gate; the matching ingest path fires it when a
/// packet newer than the trial start arrives. Firing an unarmed gate is a
/// no-op, so stale arrivals never satisfy a later wait.
struct ArrivalGate {
    inner: Mutex<GateState>,
    cond: Condvar,
}

#[derive(Default)]
struct GateState {
    armed: bool,
    fired: bool,
}

impl ArrivalGate {
    fn new() -> Self {
        Self {
            inner: Mutex::new(GateState::default()),
            cond: Condvar::new(),
        }
    }

    fn arm(&self) {
        let mut state = lock(&self.inner);
        state.armed = true;
        state.fired = false;
    }

    fn fire(&self) {
        let mut state = lock(&self.inner);
        if state.armed {
            state.armed = false;
            state.fired = true;
            self.cond.notify_all();
        }
    }

    /// Wait until the gate fires or the timeout elapses. Returns whether it
    /// fired.
    fn wait(&self, timeout: Duration) -> bool {
        let state = lock(&self.inner);
        let (state, _timed_out) = self
            .cond
            .wait_timeout_while(state, timeout, |s| !s.fired)
            .unwrap_or_else(PoisonError::into_inner);
        state.fired
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Owns the trial caches and the trial state machine of one instance.
pub struct TrialController {
    link_open: AtomicBool,
    within_trial: AtomicBool,
    trial_start_time: AtomicU64,
    current_time: AtomicU64,
    defaults: TrialDefaults,
    default_wait: Duration,
    config: Mutex<TrialConfig>,
    channel_mask: Vec<AtomicBool>,
    continuous: Mutex<Option<ContinuousCache>>,
    events: Mutex<Option<EventCache>>,
    comments: Mutex<Option<CommentCache>>,
    tracking: Mutex<Option<TrackingCache>>,
    event_gate: ArrivalGate,
    comment_gate: ArrivalGate,
    tracking_gate: ArrivalGate,
}

impl TrialController {
    /// Create a closed controller. All channels start unmasked (accepted).
    pub fn new(defaults: &TrialDefaults) -> Self {
        let mut channel_mask = Vec::with_capacity(MAX_CHANS + 1);
        channel_mask.resize_with(MAX_CHANS + 1, || AtomicBool::new(true));
        Self {
            link_open: AtomicBool::new(false),
            within_trial: AtomicBool::new(false),
            trial_start_time: AtomicU64::new(0),
            current_time: AtomicU64::new(0),
            defaults: defaults.clone(),
            default_wait: Duration::from_millis(defaults.wait_ms),
            config: Mutex::new(TrialConfig::from_defaults(defaults)),
            channel_mask,
            continuous: Mutex::new(None),
            events: Mutex::new(None),
            comments: Mutex::new(None),
            tracking: Mutex::new(None),
            event_gate: ArrivalGate::new(),
            comment_gate: ArrivalGate::new(),
            tracking_gate: ArrivalGate::new(),
        }
    }

    /// Default bounded wait for comment and tracking inits.
    pub fn default_wait(&self) -> Duration {
        self.default_wait
    }

    /// Mark the link open.
    pub fn open(&self) {
        self.link_open.store(true, Ordering::SeqCst);
        debug!("trial controller opened");
    }

    /// Whether the link is open.
    pub fn is_open(&self) -> bool {
        self.link_open.load(Ordering::SeqCst)
    }

    /// Tear down all caches, clear the trigger state and re-accept every
    /// channel.
    pub fn close(&self) {
        self.link_open.store(false, Ordering::SeqCst);
        self.within_trial.store(false, Ordering::SeqCst);
        *lock(&self.continuous) = None;
        *lock(&self.events) = None;
        *lock(&self.comments) = None;
        *lock(&self.tracking) = None;
        *lock(&self.config) = TrialConfig::from_defaults(&self.defaults);
        for accepted in &self.channel_mask {
            accepted.store(true, Ordering::SeqCst);
        }
        info!("trial controller closed");
    }

    /// Instrument time of the last ingested packet.
    pub fn current_time(&self) -> u64 {
        self.current_time.load(Ordering::SeqCst)
    }

    /// Record the timestamp of a packet passing through the dispatcher.
    pub fn observe_time(&self, time: u64) {
        self.current_time.store(time, Ordering::SeqCst);
    }

    /// Instrument time latched when the current trial started.
    pub fn trial_start_time(&self) -> u64 {
        self.trial_start_time.load(Ordering::SeqCst)
    }

    /// Whether a trial is currently running.
    pub fn within_trial(&self) -> bool {
        self.within_trial.load(Ordering::SeqCst)
    }

    /// Apply a trial configuration.
    ///
    /// Caches with non-zero capacities that are not yet allocated are
    /// allocated here; an already-allocated cache is never silently resized.
    /// An allocation failure leaves that cache unallocated and reports
    /// `TrialCacheMemory`. A rising edge of `active` starts the trial:
    /// the start time is latched from the controller clock and every ring
    /// index is reset.
    pub fn configure(&self, config: TrialConfig) -> AcqResult<()> {
        for channel in [config.begin_channel, config.end_channel] {
            if channel as usize > MAX_CHANS {
                return Err(AcqError::InvalidChannel(channel));
            }
        }

        if config.event_samples > 0 {
            let mut guard = lock(&self.events);
            if guard.is_none() {
                *guard = Some(EventCache::allocate(config.event_samples)?);
            }
        }
        if config.continuous_samples > 0 {
            let mut guard = lock(&self.continuous);
            if guard.is_none() {
                *guard = Some(ContinuousCache::new(config.continuous_samples)?);
            }
        }
        if config.comment_slots > 0 {
            let mut guard = lock(&self.comments);
            if guard.is_none() {
                *guard = Some(CommentCache::allocate(config.comment_slots)?);
            }
        }
        if config.tracking_slots > 0 {
            let mut guard = lock(&self.tracking);
            if guard.is_none() {
                *guard = Some(TrackingCache::new(config.tracking_slots)?);
            }
        }

        let activate = config.active;
        info!(
            active = activate,
            begin_channel = config.begin_channel,
            end_channel = config.end_channel,
            "trial configured"
        );
        *lock(&self.config) = config;

        let was_active = self.within_trial.load(Ordering::SeqCst);
        if activate && !was_active {
            self.start_trial(self.current_time());
        } else if !activate {
            self.within_trial.store(false, Ordering::SeqCst);
        }
        Ok(())
    }

    /// Drop exactly one trial cache.
    pub fn unconfigure(&self, kind: TrialKind) -> AcqResult<()> {
        let taken = match kind {
            TrialKind::Events => lock(&self.events).take().is_some(),
            TrialKind::Continuous => lock(&self.continuous).take().is_some(),
            TrialKind::Comments => lock(&self.comments).take().is_some(),
            TrialKind::Tracking => lock(&self.tracking).take().is_some(),
        };
        if taken {
            debug!(?kind, "trial cache dropped");
            Ok(())
        } else {
            Err(AcqError::NotConfigured(kind))
        }
    }

    /// Read back the last applied configuration and the live trial flag.
    pub fn trial_status(&self) -> TrialStatus {
        TrialStatus {
            config: lock(&self.config).clone(),
            active: self.within_trial(),
        }
    }

    /// Accept or reject a channel's event packets. Channel 0 applies to the
    /// whole channel space.
    pub fn set_channel_mask(&self, channel: u16, accept: bool) -> AcqResult<()> {
        if channel == 0 {
            for accepted in &self.channel_mask[1..] {
                accepted.store(accept, Ordering::SeqCst);
            }
            return Ok(());
        }
        if channel as usize > MAX_CHANS {
            return Err(AcqError::InvalidChannel(channel));
        }
        self.channel_mask[channel as usize].store(accept, Ordering::SeqCst);
        Ok(())
    }

    /// Whether the mask currently accepts a channel.
    pub fn channel_accepted(&self, channel: u16) -> bool {
        channel != 0
            && channel as usize <= MAX_CHANS
            && self.channel_mask[channel as usize].load(Ordering::SeqCst)
    }

    fn start_trial(&self, time: u64) {
        self.trial_start_time.store(time, Ordering::SeqCst);
        self.within_trial.store(true, Ordering::SeqCst);
        if let Some(cache) = lock(&self.continuous).as_mut() {
            cache.reset_all();
        }
        if let Some(cache) = lock(&self.events).as_mut() {
            cache.reset_all();
        }
        if let Some(cache) = lock(&self.comments).as_mut() {
            cache.reset();
        }
        if let Some(cache) = lock(&self.tracking).as_mut() {
            cache.reset_all();
        }
        debug!(time, "trial started");
    }

    // --- ingestion paths, driven by the dispatcher ---

    /// Cache one continuous sample frame.
    ///
    /// Frames are dropped while no trial is running or when no continuous
    /// cache is configured.
    pub fn ingest_sample(
        &self,
        time: u64,
        group: u16,
        period: u32,
        channel_ids: &[u16],
        frame: &[i16],
    ) -> AcqResult<()> {
        if !self.within_trial() {
            return Ok(());
        }
        let mut guard = lock(&self.continuous);
        match guard.as_mut() {
            Some(cache) => cache.ingest(group, period, channel_ids, time, frame),
            None => Ok(()),
        }
    }

    /// Cache one event (spike, digital or serial) and evaluate the trial
    /// triggers.
    ///
    /// The begin trigger is checked before the write and the end trigger
    /// after it, so the triggering event itself is cached inside the trial
    /// and events outside a trial only ever act as triggers. A masked-off
    /// channel skips the cache write but its trigger role is still honored.
    pub fn ingest_event(&self, time: u64, channel: u16, value: u32) -> AcqResult<()> {
        if channel == 0 || channel as usize > MAX_CHANS {
            return Err(AcqError::InvalidChannel(channel));
        }
        let (begin, end) = {
            let config = lock(&self.config);
            (
                (config.begin_channel, config.begin_mask, config.begin_value),
                (config.end_channel, config.end_mask, config.end_value),
            )
        };

        if !self.within_trial() && begin.0 != 0 && channel == begin.0 && value & begin.1 == begin.2
        {
            self.start_trial(time);
        }

        if self.within_trial() && self.channel_accepted(channel) {
            let mut cached = false;
            {
                let mut guard = lock(&self.events);
                if let Some(cache) = guard.as_mut() {
                    cache.push(channel, time, value)?;
                    cached = true;
                }
            }
            if cached && time > self.trial_start_time() {
                self.event_gate.fire();
            }
        }

        if self.within_trial() && end.0 != 0 && channel == end.0 && value & end.1 == end.2 {
            self.within_trial.store(false, Ordering::SeqCst);
            debug!(time, "trial ended by trigger");
        }
        Ok(())
    }

    /// Cache one comment. Dropped while no trial is running.
    pub fn ingest_comment(&self, time: u64, rgba: u32, charset: u8, text: &str) -> AcqResult<()> {
        if !self.within_trial() {
            return Ok(());
        }
        let mut cached = false;
        {
            let mut guard = lock(&self.comments);
            if let Some(cache) = guard.as_mut() {
                cache.push(time, rgba, charset, text);
                cached = true;
            }
        }
        if cached && time > self.trial_start_time() {
            self.comment_gate.fire();
        }
        Ok(())
    }

    /// Cache one log line as a comment. Dropped while no trial is running.
    pub fn ingest_log(&self, time: u64, text: &str) -> AcqResult<()> {
        if !self.within_trial() {
            return Ok(());
        }
        let mut cached = false;
        {
            let mut guard = lock(&self.comments);
            if let Some(cache) = guard.as_mut() {
                cache.push_log(time, text);
                cached = true;
            }
        }
        if cached && time > self.trial_start_time() {
            self.comment_gate.fire();
        }
        Ok(())
    }

    /// Cache one tracking record. Dropped while no trial is running.
    pub fn ingest_track(
        &self,
        time: u64,
        node_id: u16,
        node_type: u16,
        name: &str,
        point_count: u16,
        coords: &TrackCoords,
    ) -> AcqResult<()> {
        if !self.within_trial() {
            return Ok(());
        }
        {
            let mut guard = lock(&self.tracking);
            if let Some(cache) = guard.as_mut() {
                cache.ingest(node_id, node_type, name, time, point_count, coords)?;
            } else {
                return Ok(());
            }
        }
        if time > self.trial_start_time() {
            self.tracking_gate.fire();
        }
        Ok(())
    }

    /// Record a video sync pulse for tracking association.
    pub fn note_sync(&self, sync: SyncState) {
        if let Some(cache) = lock(&self.tracking).as_mut() {
            cache.note_sync(sync);
        }
    }

    // --- poll API ---

    /// Latch an events snapshot and report per-channel per-unit counts for
    /// unmasked channels with data.
    ///
    /// Arms the event notifier first; when the snapshot is empty and `wait`
    /// is non-zero the call blocks up to `wait` for a fresh event and then
    /// snapshots again.
    pub fn init_events(&self, wait: Duration) -> AcqResult<EventsInit> {
        self.event_gate.arm();
        let snapshot = self.snapshot_events()?;
        if snapshot.channels.is_empty() && !wait.is_zero() && self.event_gate.wait(wait) {
            return self.snapshot_events();
        }
        Ok(snapshot)
    }

    fn snapshot_events(&self) -> AcqResult<EventsInit> {
        let mut guard = lock(&self.events);
        let cache = guard.as_mut().ok_or(AcqError::NotConfigured(TrialKind::Events))?;
        let mut channels = Vec::new();
        for channel in 1..=MAX_CHANS as u16 {
            if !self.channel_accepted(channel) {
                continue;
            }
            let buffer = cache.channel_mut(channel)?;
            buffer.latch_read_end();
            let counts = buffer.count_by_unit(is_valued_channel(channel));
            if counts.iter().sum::<u32>() > 0 {
                channels.push(ChannelEventCounts { channel, counts });
            }
        }
        Ok(EventsInit { channels })
    }

    /// Copy out events up to the boundaries latched by the last
    /// [`init_events`](Self::init_events).
    ///
    /// The cache lock is taken per channel and held for one bounded raw copy;
    /// unit routing runs with no lock held, so the packet thread is never
    /// stalled for the whole multi-channel read.
    pub fn get_events(&self, consume: bool) -> AcqResult<TrialEvents> {
        if lock(&self.events).is_none() {
            return Err(AcqError::NotConfigured(TrialKind::Events));
        }
        let mut channels = Vec::new();
        for channel in 1..=MAX_CHANS as u16 {
            if !self.channel_accepted(channel) {
                continue;
            }
            let valued = is_valued_channel(channel);
            let window = {
                let mut guard = lock(&self.events);
                let cache = guard
                    .as_mut()
                    .ok_or(AcqError::NotConfigured(TrialKind::Events))?;
                let buffer = cache.channel_mut(channel)?;
                let counts = buffer.count_by_unit(valued);
                if counts.iter().sum::<u32>() == 0 {
                    continue;
                }
                buffer.take_window(&counts, valued, consume)
            };
            let events = route_by_unit(&window, valued);
            channels.push(TrialEventsChannel { channel, events });
        }
        Ok(TrialEvents { channels })
    }

    /// Latch a continuous snapshot for one sample group.
    ///
    /// A group that has not seen any sample packets reports zero availability
    /// with an empty channel list.
    pub fn init_continuous(&self, group: u16) -> AcqResult<ContinuousInit> {
        let mut guard = lock(&self.continuous);
        let cache = guard
            .as_mut()
            .ok_or(AcqError::NotConfigured(TrialKind::Continuous))?;
        match cache.group_mut(group)? {
            Some(buffer) => {
                let available = buffer.latch_read_end();
                Ok(ContinuousInit {
                    group,
                    channel_ids: buffer.channel_ids().to_vec(),
                    sample_rate: buffer.sample_rate(),
                    available,
                })
            }
            None => Ok(ContinuousInit {
                group,
                ..ContinuousInit::default()
            }),
        }
    }

    /// Copy out continuous frames up to the boundary latched by the last
    /// [`init_continuous`](Self::init_continuous) for the group.
    pub fn get_continuous(&self, group: u16, consume: bool) -> AcqResult<ContinuousData> {
        let mut guard = lock(&self.continuous);
        let cache = guard
            .as_mut()
            .ok_or(AcqError::NotConfigured(TrialKind::Continuous))?;
        match cache.group_mut(group)? {
            Some(buffer) => {
                let (timestamps, samples) = buffer.read(consume);
                Ok(ContinuousData {
                    group,
                    channel_ids: buffer.channel_ids().to_vec(),
                    sample_rate: buffer.sample_rate(),
                    timestamps,
                    samples,
                })
            }
            None => Ok(ContinuousData {
                group,
                ..ContinuousData::default()
            }),
        }
    }

    /// Latch a comments snapshot and return the number of comments behind it,
    /// blocking up to `wait` for a fresh comment when none is cached.
    pub fn init_comments(&self, wait: Duration) -> AcqResult<usize> {
        self.comment_gate.arm();
        let available = {
            let mut guard = lock(&self.comments);
            let cache = guard
                .as_mut()
                .ok_or(AcqError::NotConfigured(TrialKind::Comments))?;
            cache.latch_read_end()
        };
        if available == 0 && !wait.is_zero() && self.comment_gate.wait(wait) {
            let mut guard = lock(&self.comments);
            let cache = guard
                .as_mut()
                .ok_or(AcqError::NotConfigured(TrialKind::Comments))?;
            return Ok(cache.latch_read_end());
        }
        Ok(available)
    }

    /// Copy out comments up to the boundary latched by the last
    /// [`init_comments`](Self::init_comments).
    pub fn get_comments(&self, consume: bool) -> AcqResult<Vec<CommentRecord>> {
        let mut guard = lock(&self.comments);
        let cache = guard
            .as_mut()
            .ok_or(AcqError::NotConfigured(TrialKind::Comments))?;
        Ok(cache.read(consume))
    }

    /// Latch a tracking snapshot across all announced nodes, blocking up to
    /// `wait` for fresh data when nothing is cached.
    pub fn init_tracking(&self, wait: Duration) -> AcqResult<TrackingInit> {
        self.tracking_gate.arm();
        let snapshot = self.snapshot_tracking()?;
        let empty = snapshot.nodes.iter().all(|n| n.available == 0);
        if empty && !wait.is_zero() && self.tracking_gate.wait(wait) {
            return self.snapshot_tracking();
        }
        Ok(snapshot)
    }

    fn snapshot_tracking(&self) -> AcqResult<TrackingInit> {
        let mut guard = lock(&self.tracking);
        let cache = guard
            .as_mut()
            .ok_or(AcqError::NotConfigured(TrialKind::Tracking))?;
        let last_sync = cache.last_sync();
        let mut nodes = Vec::new();
        for node_id in 0..crate::packet::MAX_TRACK_OBJ as u16 {
            if let Some(node) = cache.node_mut(node_id)? {
                let available = node.latch_read_end();
                nodes.push(NodeAvailability {
                    node_id,
                    info: node.info().clone(),
                    available,
                });
            }
        }
        Ok(TrackingInit { nodes, last_sync })
    }

    /// Copy out tracking records up to the boundaries latched by the last
    /// [`init_tracking`](Self::init_tracking).
    ///
    /// The cache lock is taken per node and held for one bounded copy, so the
    /// packet thread is never stalled for the whole multi-node read.
    pub fn get_tracking(&self, consume: bool) -> AcqResult<TrackingData> {
        if lock(&self.tracking).is_none() {
            return Err(AcqError::NotConfigured(TrialKind::Tracking));
        }
        let mut nodes = Vec::new();
        for node_id in 0..crate::packet::MAX_TRACK_OBJ as u16 {
            let taken = {
                let mut guard = lock(&self.tracking);
                let cache = guard
                    .as_mut()
                    .ok_or(AcqError::NotConfigured(TrialKind::Tracking))?;
                match cache.node_mut(node_id)? {
                    Some(node) => {
                        let records = node.read(consume);
                        if records.is_empty() {
                            None
                        } else {
                            Some((node.info().clone(), records))
                        }
                    }
                    None => None,
                }
            };
            if let Some((info, records)) = taken {
                nodes.push(NodeRecords {
                    node_id,
                    info,
                    records,
                });
            }
        }
        Ok(TrackingData { nodes })
    }
}
