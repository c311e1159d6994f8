//! Multi-instance registry.
//!
//! An application can hold connections to several instruments at once. The
//! registry is a fixed table of [`MAX_INSTANCES`](crate::packet::MAX_INSTANCES)
//! slots, each holding one open [`Instance`] (trial controller plus callback
//! table). Every public operation takes the instance id first and fails with
//! `Closed` when the slot is empty.
//!
//! Slot locks are held only long enough to clone the instance handle out, so
//! a packet being processed on one thread never blocks API calls for the
//! same instance on another.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::info;

use crate::cache::CommentRecord;
use crate::config::AcqConfig;
use crate::dispatch::{self, Callback, CallbackKind, CallbackTable};
use crate::error::{AcqError, AcqResult};
use crate::packet::{Packet, MAX_INSTANCES};
use crate::trial::{
    ContinuousData, ContinuousInit, EventsInit, TrackingData, TrackingInit, TrialConfig,
    TrialController, TrialEvents, TrialKind, TrialStatus,
};

/// Index into the registry's instance table.
pub type InstanceId = u32;

/// Selects which caches an aggregate trial poll touches.
///
/// [`Registry::init_trial`] and [`Registry::get_trial`] fan out to the
/// per-kind calls for every selected cache; a kind left unselected is
/// skipped entirely, configured or not.
#[derive(Debug, Clone, Default)]
pub struct TrialRequest {
    /// Poll the event cache.
    pub events: bool,
    /// Sample groups to poll from the continuous cache.
    pub continuous_groups: Vec<u16>,
    /// Poll the comment cache.
    pub comments: bool,
    /// Poll the tracking cache.
    pub tracking: bool,
    /// Bounded wait passed to the selected init calls; `None` keeps each
    /// call's own default.
    pub wait: Option<Duration>,
}

/// Aggregate init snapshot across the selected caches.
#[derive(Debug, Clone, Default)]
pub struct TrialInit {
    /// Events snapshot, when requested.
    pub events: Option<EventsInit>,
    /// One continuous snapshot per requested group, in request order.
    pub continuous: Vec<ContinuousInit>,
    /// Comments behind the latched boundary, when requested.
    pub comments: Option<usize>,
    /// Tracking snapshot, when requested.
    pub tracking: Option<TrackingInit>,
}

/// Aggregate data read across the selected caches.
#[derive(Debug, Clone, Default)]
pub struct TrialData {
    /// Events, when requested.
    pub events: Option<TrialEvents>,
    /// One continuous read per requested group, in request order.
    pub continuous: Vec<ContinuousData>,
    /// Comments, when requested.
    pub comments: Option<Vec<CommentRecord>>,
    /// Tracking records, when requested.
    pub tracking: Option<TrackingData>,
}

/// One open instrument connection: trial state plus registered callbacks.
pub struct Instance {
    controller: TrialController,
    callbacks: CallbackTable,
}

impl Instance {
    /// The instance's trial controller.
    pub fn controller(&self) -> &TrialController {
        &self.controller
    }

    /// The instance's callback table.
    pub fn callbacks(&self) -> &CallbackTable {
        &self.callbacks
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Fixed table of instrument instances.
pub struct Registry {
    slots: Vec<Mutex<Option<Arc<Instance>>>>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    /// Create a registry with all slots empty.
    pub fn new() -> Self {
        let mut slots = Vec::with_capacity(MAX_INSTANCES);
        slots.resize_with(MAX_INSTANCES, || Mutex::new(None));
        Self { slots }
    }

    fn slot(&self, id: InstanceId) -> AcqResult<&Mutex<Option<Arc<Instance>>>> {
        self.slots
            .get(id as usize)
            .ok_or(AcqError::InvalidInstance(id))
    }

    /// Clone the instance handle out of its slot.
    pub fn instance(&self, id: InstanceId) -> AcqResult<Arc<Instance>> {
        lock(self.slot(id)?).clone().ok_or(AcqError::Closed)
    }

    /// Open an instance with default configuration.
    pub fn open(&self, id: InstanceId) -> AcqResult<()> {
        self.open_with_config(id, &AcqConfig::default())
    }

    /// Open an instance with explicit configuration.
    pub fn open_with_config(&self, id: InstanceId, config: &AcqConfig) -> AcqResult<()> {
        let mut guard = lock(self.slot(id)?);
        if guard.is_some() {
            return Err(AcqError::AlreadyOpen);
        }
        let controller = TrialController::new(&config.trial);
        controller.open();
        *guard = Some(Arc::new(Instance {
            controller,
            callbacks: CallbackTable::new(),
        }));
        info!(id, application = %config.application.name, "instance opened");
        Ok(())
    }

    /// Close an instance, tearing down its caches and callbacks.
    pub fn close(&self, id: InstanceId) -> AcqResult<()> {
        let instance = lock(self.slot(id)?).take().ok_or(AcqError::Closed)?;
        instance.controller.close();
        info!(id, "instance closed");
        Ok(())
    }

    /// Run one packet from the link through the instance.
    pub fn process_packet(&self, id: InstanceId, packet: &Packet) -> AcqResult<()> {
        let instance = self.instance(id)?;
        dispatch::process_packet(id, &instance.callbacks, &instance.controller, packet)
    }

    /// Register a handler for one packet category.
    pub fn register_callback(
        &self,
        id: InstanceId,
        kind: CallbackKind,
        callback: Callback,
    ) -> AcqResult<()> {
        self.instance(id)?.callbacks.register(kind, callback)
    }

    /// Remove the handler for one packet category.
    pub fn unregister_callback(&self, id: InstanceId, kind: CallbackKind) -> AcqResult<()> {
        self.instance(id)?.callbacks.unregister(kind)
    }

    /// Whether a handler is registered for the category.
    pub fn callback_status(&self, id: InstanceId, kind: CallbackKind) -> AcqResult<bool> {
        Ok(self.instance(id)?.callbacks.is_registered(kind))
    }

    /// Apply a trial configuration.
    pub fn configure_trial(&self, id: InstanceId, config: TrialConfig) -> AcqResult<()> {
        self.instance(id)?.controller.configure(config)
    }

    /// Drop exactly one trial cache.
    pub fn unconfigure_trial(&self, id: InstanceId, kind: TrialKind) -> AcqResult<()> {
        self.instance(id)?.controller.unconfigure(kind)
    }

    /// Read back the trial configuration and the live trial flag.
    pub fn trial_status(&self, id: InstanceId) -> AcqResult<TrialStatus> {
        Ok(self.instance(id)?.controller.trial_status())
    }

    /// Accept or reject a channel's event packets; channel 0 covers all.
    pub fn set_channel_mask(&self, id: InstanceId, channel: u16, accept: bool) -> AcqResult<()> {
        self.instance(id)?.controller.set_channel_mask(channel, accept)
    }

    /// Instrument time of the last packet seen by the instance.
    pub fn current_time(&self, id: InstanceId) -> AcqResult<u64> {
        Ok(self.instance(id)?.controller.current_time())
    }

    /// Latch an events snapshot. `wait` of `None` snapshots without
    /// blocking.
    pub fn init_events(&self, id: InstanceId, wait: Option<Duration>) -> AcqResult<EventsInit> {
        self.instance(id)?
            .controller
            .init_events(wait.unwrap_or(Duration::ZERO))
    }

    /// Copy out events up to the latched snapshot.
    pub fn get_events(&self, id: InstanceId, consume: bool) -> AcqResult<TrialEvents> {
        self.instance(id)?.controller.get_events(consume)
    }

    /// Latch a continuous snapshot for one sample group.
    pub fn init_continuous(&self, id: InstanceId, group: u16) -> AcqResult<ContinuousInit> {
        self.instance(id)?.controller.init_continuous(group)
    }

    /// Copy out continuous frames for one sample group.
    pub fn get_continuous(
        &self,
        id: InstanceId,
        group: u16,
        consume: bool,
    ) -> AcqResult<ContinuousData> {
        self.instance(id)?.controller.get_continuous(group, consume)
    }

    /// Latch a comments snapshot. `wait` of `None` uses the configured
    /// default bounded wait.
    pub fn init_comments(&self, id: InstanceId, wait: Option<Duration>) -> AcqResult<usize> {
        let instance = self.instance(id)?;
        let wait = wait.unwrap_or_else(|| instance.controller.default_wait());
        instance.controller.init_comments(wait)
    }

    /// Copy out comments up to the latched snapshot.
    pub fn get_comments(&self, id: InstanceId, consume: bool) -> AcqResult<Vec<CommentRecord>> {
        self.instance(id)?.controller.get_comments(consume)
    }

    /// Latch a tracking snapshot. `wait` of `None` uses the configured
    /// default bounded wait.
    pub fn init_tracking(&self, id: InstanceId, wait: Option<Duration>) -> AcqResult<TrackingInit> {
        let instance = self.instance(id)?;
        let wait = wait.unwrap_or_else(|| instance.controller.default_wait());
        instance.controller.init_tracking(wait)
    }

    /// Copy out tracking records up to the latched snapshot.
    pub fn get_tracking(&self, id: InstanceId, consume: bool) -> AcqResult<TrackingData> {
        self.instance(id)?.controller.get_tracking(consume)
    }

    /// Latch snapshots across all caches selected by `request` in one call.
    pub fn init_trial(&self, id: InstanceId, request: &TrialRequest) -> AcqResult<TrialInit> {
        let mut init = TrialInit::default();
        if request.events {
            init.events = Some(self.init_events(id, request.wait)?);
        }
        for &group in &request.continuous_groups {
            init.continuous.push(self.init_continuous(id, group)?);
        }
        if request.comments {
            init.comments = Some(self.init_comments(id, request.wait)?);
        }
        if request.tracking {
            init.tracking = Some(self.init_tracking(id, request.wait)?);
        }
        Ok(init)
    }

    /// Copy out data across all caches selected by `request` in one call,
    /// up to the boundaries latched by the matching
    /// [`init_trial`](Self::init_trial).
    pub fn get_trial(
        &self,
        id: InstanceId,
        request: &TrialRequest,
        consume: bool,
    ) -> AcqResult<TrialData> {
        let mut data = TrialData::default();
        if request.events {
            data.events = Some(self.get_events(id, consume)?);
        }
        for &group in &request.continuous_groups {
            data.continuous.push(self.get_continuous(id, group, consume)?);
        }
        if request.comments {
            data.comments = Some(self.get_comments(id, consume)?);
        }
        if request.tracking {
            data.tracking = Some(self.get_tracking(id, consume)?);
        }
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_close_lifecycle() {
        let registry = Registry::new();
        registry.open(0).unwrap();
        assert!(matches!(registry.open(0), Err(AcqError::AlreadyOpen)));
        registry.close(0).unwrap();
        assert!(matches!(registry.close(0), Err(AcqError::Closed)));
        registry.open(0).unwrap();
    }

    #[test]
    fn instance_ids_are_bounded() {
        let registry = Registry::new();
        assert!(matches!(
            registry.open(MAX_INSTANCES as u32),
            Err(AcqError::InvalidInstance(4))
        ));
    }

    #[test]
    fn operations_on_a_closed_slot_fail() {
        let registry = Registry::new();
        assert!(matches!(registry.current_time(1), Err(AcqError::Closed)));
        assert!(matches!(
            registry.process_packet(1, &Packet::heartbeat(0)),
            Err(AcqError::Closed)
        ));
    }

    #[test]
    fn instances_are_independent() {
        let registry = Registry::new();
        registry.open(0).unwrap();
        registry.open(1).unwrap();

        registry
            .configure_trial(
                0,
                TrialConfig {
                    active: true,
                    comment_slots: 4,
                    ..TrialConfig::default()
                },
            )
            .unwrap();

        registry
            .process_packet(0, &Packet::comment(10, 0, 0, "only on zero"))
            .unwrap();

        assert_eq!(registry.init_comments(0, Some(Duration::ZERO)).unwrap(), 1);
        // Instance 1 never configured a comment cache.
        assert!(matches!(
            registry.init_comments(1, Some(Duration::ZERO)),
            Err(AcqError::NotConfigured(TrialKind::Comments))
        ));
    }

    #[test]
    fn aggregate_poll_fans_out_to_the_selected_caches() {
        let registry = Registry::new();
        registry.open(0).unwrap();
        registry
            .configure_trial(
                0,
                TrialConfig {
                    active: true,
                    continuous_samples: 32,
                    event_samples: 32,
                    comment_slots: 4,
                    ..TrialConfig::default()
                },
            )
            .unwrap();

        registry
            .process_packet(0, &Packet::sample(5, 1, 1, vec![11, 12], vec![1, 2]))
            .unwrap();
        registry.process_packet(0, &Packet::spike(6, 17, 2)).unwrap();
        registry
            .process_packet(0, &Packet::comment(7, 0, 0, "mark"))
            .unwrap();

        let request = TrialRequest {
            events: true,
            continuous_groups: vec![1],
            comments: true,
            tracking: false,
            wait: Some(Duration::ZERO),
        };
        let init = registry.init_trial(0, &request).unwrap();
        assert_eq!(init.events.as_ref().unwrap().channels[0].channel, 17);
        assert_eq!(init.continuous[0].available, 1);
        assert_eq!(init.comments, Some(1));
        // Tracking was not selected, so its missing cache is not an error.
        assert!(init.tracking.is_none());

        let data = registry.get_trial(0, &request, true).unwrap();
        assert_eq!(
            data.events.as_ref().unwrap().channels[0].events.timestamps[2],
            vec![6]
        );
        assert_eq!(data.continuous[0].timestamps, vec![5]);
        assert_eq!(data.comments.as_ref().unwrap()[0].text, "mark");

        // Everything was consumed in one pass.
        let init = registry.init_trial(0, &request).unwrap();
        assert!(init.events.as_ref().unwrap().channels.is_empty());
        assert_eq!(init.continuous[0].available, 0);
        assert_eq!(init.comments, Some(0));
    }
}
