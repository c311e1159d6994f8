//! Packet classification and callback dispatch.
//!
//! Every packet from the link is classified into exactly one
//! [`CallbackKind`]. At most one handler can be registered per kind, plus a
//! catch-all under [`CallbackKind::All`] that sees every classified packet
//! before the specific handler does.
//!
//! Handlers are late-bound: dispatch copies the handler `Arc` under a short
//! table lock and invokes it with no lock held, so a handler may freely
//! re-enter the registry or the trial controller, including to register or
//! unregister callbacks.
//!
//! After the callbacks, cacheable packet classes are handed to the trial
//! controller's ingestion path. Configuration reports, sync pulses and
//! heartbeats go to callbacks only; sync pulses additionally update the
//! controller's tracking association.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::{AcqError, AcqResult};
use crate::packet::{is_event_channel, Packet, PacketBody, ReportKind};
use crate::registry::InstanceId;
use crate::trial::TrialController;

/// Packet categories a handler can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackKind {
    /// Catch-all, fired before the specific handler for every packet.
    All,
    /// Spike events.
    Spike,
    /// Digital input events.
    Digital,
    /// Serial input events.
    Serial,
    /// Continuous sample frames.
    Continuous,
    /// Tracking packets.
    Tracking,
    /// Comments.
    Comment,
    /// Sample group definition reports.
    GroupInfo,
    /// Channel configuration reports.
    ChanInfo,
    /// Video sync pulses.
    Sync,
    /// Link heartbeats.
    Heartbeat,
    /// System log lines.
    Log,
    /// Other configuration reports.
    ConfigReport,
}

/// Number of callback slots.
const KIND_COUNT: usize = 13;

impl CallbackKind {
    fn index(self) -> usize {
        match self {
            CallbackKind::All => 0,
            CallbackKind::Spike => 1,
            CallbackKind::Digital => 2,
            CallbackKind::Serial => 3,
            CallbackKind::Continuous => 4,
            CallbackKind::Tracking => 5,
            CallbackKind::Comment => 6,
            CallbackKind::GroupInfo => 7,
            CallbackKind::ChanInfo => 8,
            CallbackKind::Sync => 9,
            CallbackKind::Heartbeat => 10,
            CallbackKind::Log => 11,
            CallbackKind::ConfigReport => 12,
        }
    }
}

/// Handler invoked with the owning instance id and the packet.
pub type Callback = Arc<dyn Fn(InstanceId, &Packet) + Send + Sync>;

/// One handler slot per packet category.
pub struct CallbackTable {
    slots: Mutex<Vec<Option<Callback>>>,
}

impl Default for CallbackTable {
    fn default() -> Self {
        Self::new()
    }
}

impl CallbackTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(vec![None; KIND_COUNT]),
        }
    }

    fn slots(&self) -> MutexGuard<'_, Vec<Option<Callback>>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a handler. Registering over an existing handler fails; the
    /// caller must unregister first.
    pub fn register(&self, kind: CallbackKind, callback: Callback) -> AcqResult<()> {
        let mut slots = self.slots();
        let slot = &mut slots[kind.index()];
        if slot.is_some() {
            return Err(AcqError::CallbackRegistered(kind));
        }
        *slot = Some(callback);
        Ok(())
    }

    /// Remove the handler for a category.
    pub fn unregister(&self, kind: CallbackKind) -> AcqResult<()> {
        let mut slots = self.slots();
        if slots[kind.index()].take().is_none() {
            return Err(AcqError::CallbackNotRegistered(kind));
        }
        Ok(())
    }

    /// Whether a handler is registered for the category.
    pub fn is_registered(&self, kind: CallbackKind) -> bool {
        self.slots()[kind.index()].is_some()
    }

    /// Copy out the handler for a category.
    fn handler(&self, kind: CallbackKind) -> Option<Callback> {
        self.slots()[kind.index()].clone()
    }
}

/// Which category a packet belongs to.
pub fn classify(packet: &Packet) -> CallbackKind {
    match &packet.body {
        PacketBody::Sample { .. } => CallbackKind::Continuous,
        PacketBody::Spike { .. } => CallbackKind::Spike,
        PacketBody::Digital { .. } => CallbackKind::Digital,
        PacketBody::Serial { .. } => CallbackKind::Serial,
        PacketBody::Comment { .. } => CallbackKind::Comment,
        PacketBody::Log { .. } => CallbackKind::Log,
        PacketBody::Track { .. } => CallbackKind::Tracking,
        PacketBody::VideoSync { .. } => CallbackKind::Sync,
        PacketBody::ConfigReport { kind } => match kind {
            ReportKind::Group => CallbackKind::GroupInfo,
            ReportKind::Channel => CallbackKind::ChanInfo,
            ReportKind::System => CallbackKind::ConfigReport,
        },
        PacketBody::Heartbeat => CallbackKind::Heartbeat,
    }
}

/// Run one packet through callbacks and the controller's ingestion path.
///
/// The link delivers packets sequentially per instance, so this is the only
/// writer into the caches for a given instance.
pub fn process_packet(
    id: InstanceId,
    callbacks: &CallbackTable,
    controller: &TrialController,
    packet: &Packet,
) -> AcqResult<()> {
    controller.observe_time(packet.header.time);

    let kind = classify(packet);
    if let Some(handler) = callbacks.handler(CallbackKind::All) {
        handler(id, packet);
    }
    if let Some(handler) = callbacks.handler(kind) {
        handler(id, packet);
    }

    let time = packet.header.time;
    match &packet.body {
        PacketBody::Sample {
            group,
            period,
            channel_ids,
            data,
        } => controller.ingest_sample(time, *group, *period, channel_ids, data),
        // A malformed event on a non-event channel (an analog output, say)
        // goes to callbacks only; the event cache never sees it.
        PacketBody::Spike { unit } if is_event_channel(packet.header.chid) => {
            controller.ingest_event(time, packet.header.chid, *unit)
        }
        PacketBody::Digital { value } | PacketBody::Serial { value }
            if is_event_channel(packet.header.chid) =>
        {
            controller.ingest_event(time, packet.header.chid, *value)
        }
        PacketBody::Spike { .. } | PacketBody::Digital { .. } | PacketBody::Serial { .. } => {
            Ok(())
        }
        PacketBody::Comment { rgba, charset, text } => {
            controller.ingest_comment(time, *rgba, *charset, text)
        }
        PacketBody::Log { text } => controller.ingest_log(time, text),
        PacketBody::Track {
            node_id,
            node_type,
            name,
            point_count,
            coords,
        } => controller.ingest_track(time, *node_id, *node_type, name, *point_count, coords),
        PacketBody::VideoSync { etime, frame, fps } => {
            controller.note_sync(crate::cache::SyncState {
                etime: *etime,
                frame: *frame,
                fps: *fps,
            });
            Ok(())
        }
        PacketBody::ConfigReport { .. } | PacketBody::Heartbeat => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrialDefaults;
    use crate::packet::TrackCoords;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn controller() -> TrialController {
        TrialController::new(&TrialDefaults::default())
    }

    #[test]
    fn classification_covers_every_body() {
        assert_eq!(
            classify(&Packet::sample(0, 1, 1, vec![1], vec![0])),
            CallbackKind::Continuous
        );
        assert_eq!(classify(&Packet::spike(0, 1, 0)), CallbackKind::Spike);
        assert_eq!(classify(&Packet::digital(0, 1)), CallbackKind::Digital);
        assert_eq!(classify(&Packet::serial(0, 1)), CallbackKind::Serial);
        assert_eq!(classify(&Packet::comment(0, 0, 0, "x")), CallbackKind::Comment);
        assert_eq!(classify(&Packet::log(0, "x")), CallbackKind::Log);
        assert_eq!(
            classify(&Packet::track(0, 0, 1, "n", 0, TrackCoords::Points(vec![]))),
            CallbackKind::Tracking
        );
        assert_eq!(classify(&Packet::video_sync(0, 0, 0, 30)), CallbackKind::Sync);
        assert_eq!(
            classify(&Packet::config_report(0, ReportKind::Group)),
            CallbackKind::GroupInfo
        );
        assert_eq!(
            classify(&Packet::config_report(0, ReportKind::Channel)),
            CallbackKind::ChanInfo
        );
        assert_eq!(
            classify(&Packet::config_report(0, ReportKind::System)),
            CallbackKind::ConfigReport
        );
        assert_eq!(classify(&Packet::heartbeat(0)), CallbackKind::Heartbeat);
    }

    #[test]
    fn double_registration_is_rejected() {
        let table = CallbackTable::new();
        table
            .register(CallbackKind::Spike, Arc::new(|_, _| {}))
            .unwrap();
        let err = table
            .register(CallbackKind::Spike, Arc::new(|_, _| {}))
            .unwrap_err();
        assert!(matches!(err, AcqError::CallbackRegistered(CallbackKind::Spike)));

        table.unregister(CallbackKind::Spike).unwrap();
        assert!(!table.is_registered(CallbackKind::Spike));
        assert!(matches!(
            table.unregister(CallbackKind::Spike),
            Err(AcqError::CallbackNotRegistered(CallbackKind::Spike))
        ));
    }

    #[test]
    fn catch_all_fires_before_specific() {
        let table = CallbackTable::new();
        let ctl = controller();
        let order = Arc::new(Mutex::new(Vec::new()));

        let o = Arc::clone(&order);
        table
            .register(
                CallbackKind::All,
                Arc::new(move |_, _| o.lock().unwrap().push("all")),
            )
            .unwrap();
        let o = Arc::clone(&order);
        table
            .register(
                CallbackKind::Heartbeat,
                Arc::new(move |_, _| o.lock().unwrap().push("heartbeat")),
            )
            .unwrap();

        process_packet(0, &table, &ctl, &Packet::heartbeat(5)).unwrap();
        assert_eq!(*order.lock().unwrap(), vec!["all", "heartbeat"]);
        assert_eq!(ctl.current_time(), 5);
    }

    #[test]
    fn handler_can_reenter_the_table() {
        let table = Arc::new(CallbackTable::new());
        let ctl = controller();
        let hits = Arc::new(AtomicUsize::new(0));

        let t = Arc::clone(&table);
        let h = Arc::clone(&hits);
        table
            .register(
                CallbackKind::Heartbeat,
                Arc::new(move |_, _| {
                    h.fetch_add(1, Ordering::SeqCst);
                    // Must not deadlock against the dispatching thread.
                    let _ = t.unregister(CallbackKind::Heartbeat);
                }),
            )
            .unwrap();

        process_packet(0, &table, &ctl, &Packet::heartbeat(1)).unwrap();
        process_packet(0, &table, &ctl, &Packet::heartbeat(2)).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn events_on_output_channels_never_reach_the_cache() {
        let ctl = controller();
        ctl.configure(crate::trial::TrialConfig {
            active: true,
            event_samples: 16,
            ..crate::trial::TrialConfig::default()
        })
        .unwrap();
        let table = CallbackTable::new();

        // Channel 282 is a digital output: the spike is classified and
        // dispatched but never cached.
        process_packet(0, &table, &ctl, &Packet::spike(5, 282, 1)).unwrap();
        let init = ctl.init_events(std::time::Duration::ZERO).unwrap();
        assert!(init.channels.is_empty());

        process_packet(0, &table, &ctl, &Packet::spike(6, 17, 1)).unwrap();
        let init = ctl.init_events(std::time::Duration::ZERO).unwrap();
        assert_eq!(init.channels.len(), 1);
        assert_eq!(init.channels[0].channel, 17);
    }

    #[test]
    fn sync_updates_tracking_association_without_a_cache_write() {
        let ctl = controller();
        ctl.configure(crate::trial::TrialConfig {
            tracking_slots: 4,
            ..crate::trial::TrialConfig::default()
        })
        .unwrap();
        let table = CallbackTable::new();

        process_packet(0, &table, &ctl, &Packet::video_sync(10, 33, 2, 30)).unwrap();
        let init = ctl.init_tracking(std::time::Duration::ZERO).unwrap();
        assert_eq!(
            init.last_sync,
            Some(crate::cache::SyncState {
                etime: 33,
                frame: 2,
                fps: 30
            })
        );
        assert!(init.nodes.is_empty());
    }
}
