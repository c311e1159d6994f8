//! Integration tests for callback registration and dispatch through the
//! registry.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use neuro_daq::mock::MockLink;
use neuro_daq::{AcqError, CallbackKind, Packet, PacketBody, Registry, TrialConfig};

#[test]
fn catch_all_sees_every_packet_once_before_the_specific_handler() {
    let registry = Registry::new();
    registry.open(0).unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));

    let s = Arc::clone(&seen);
    registry
        .register_callback(
            0,
            CallbackKind::All,
            Arc::new(move |_, pkt| s.lock().unwrap().push(("all", pkt.header.time))),
        )
        .unwrap();
    let s = Arc::clone(&seen);
    registry
        .register_callback(
            0,
            CallbackKind::Spike,
            Arc::new(move |_, pkt| s.lock().unwrap().push(("spike", pkt.header.time))),
        )
        .unwrap();

    registry.process_packet(0, &Packet::spike(1, 5, 0)).unwrap();
    registry.process_packet(0, &Packet::heartbeat(2)).unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(
        *seen,
        vec![("all", 1), ("spike", 1), ("all", 2)],
        "catch-all first, specific second, exactly once each"
    );
}

#[test]
fn one_handler_per_category() {
    let registry = Registry::new();
    registry.open(0).unwrap();

    registry
        .register_callback(0, CallbackKind::Digital, Arc::new(|_, _| {}))
        .unwrap();
    assert!(registry.callback_status(0, CallbackKind::Digital).unwrap());
    assert!(!registry.callback_status(0, CallbackKind::Serial).unwrap());

    let err = registry
        .register_callback(0, CallbackKind::Digital, Arc::new(|_, _| {}))
        .unwrap_err();
    assert!(matches!(
        err,
        AcqError::CallbackRegistered(CallbackKind::Digital)
    ));

    registry
        .unregister_callback(0, CallbackKind::Digital)
        .unwrap();
    registry
        .register_callback(0, CallbackKind::Digital, Arc::new(|_, _| {}))
        .unwrap();
}

#[test]
fn handlers_receive_the_owning_instance_id() {
    let registry = Registry::new();
    registry.open(0).unwrap();
    registry.open(2).unwrap();

    let ids = Arc::new(Mutex::new(Vec::new()));
    for instance in [0, 2] {
        let seen = Arc::clone(&ids);
        registry
            .register_callback(
                instance,
                CallbackKind::Heartbeat,
                Arc::new(move |id, _| seen.lock().unwrap().push(id)),
            )
            .unwrap();
    }

    registry.process_packet(2, &Packet::heartbeat(1)).unwrap();
    registry.process_packet(0, &Packet::heartbeat(2)).unwrap();
    assert_eq!(*ids.lock().unwrap(), vec![2, 0]);
}

#[test]
fn callbacks_and_caching_both_observe_a_mixed_stream() {
    let registry = Registry::new();
    registry.open(0).unwrap();
    registry
        .configure_trial(
            0,
            TrialConfig {
                active: true,
                continuous_samples: 4096,
                event_samples: 1024,
                ..TrialConfig::default()
            },
        )
        .unwrap();

    let spikes_seen = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&spikes_seen);
    registry
        .register_callback(
            0,
            CallbackKind::Spike,
            Arc::new(move |_, pkt| {
                assert!(matches!(pkt.body, PacketBody::Spike { .. }));
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .unwrap();

    let mut link = MockLink::new(3, 2, 1, vec![20, 21]);
    let packets = link.stream(500, 33);
    let spikes_sent = packets
        .iter()
        .filter(|p| matches!(p.body, PacketBody::Spike { .. }))
        .count();
    for packet in &packets {
        registry.process_packet(0, packet).unwrap();
    }

    assert_eq!(spikes_seen.load(Ordering::SeqCst), spikes_sent);

    // The same stream landed in the caches.
    let init = registry.init_continuous(0, 2).unwrap();
    assert_eq!(init.available, 500);
    let events = registry.init_events(0, None).unwrap();
    assert_eq!(
        events.channels[0].counts.iter().sum::<u32>() as usize,
        spikes_sent
    );
}

#[test]
fn closing_an_instance_drops_its_callbacks() {
    let registry = Registry::new();
    registry.open(1).unwrap();
    registry
        .register_callback(1, CallbackKind::Comment, Arc::new(|_, _| {}))
        .unwrap();
    registry.close(1).unwrap();

    assert!(matches!(
        registry.callback_status(1, CallbackKind::Comment),
        Err(AcqError::Closed)
    ));

    // A fresh open starts with an empty table.
    registry.open(1).unwrap();
    assert!(!registry.callback_status(1, CallbackKind::Comment).unwrap());
}
