//! Producer signals on event-signaled sources.

mod common;

use std::thread;
use std::time::{Duration, Instant};

use common::{build, build_with, wait_until, FakeModule};
use quasar_core::prelude::*;
use quasar_core::{RendezvousError, SignalError};
use serde_json::json;

fn signaled(name: &str) -> FakeModule {
    FakeModule::new(name)
        .source("event", DeliveryClass::EventSignaled)
        .source("poll", DeliveryClass::poll_on_demand())
        .reply("event", DataReply::value(json!({"fired": true})))
}

#[test]
fn test_signal_without_subscribers_returns_immediately() {
    let harness = build(signaled("idle"));
    let host = harness.recorder.host().unwrap();
    let uid = harness.extension.source_uid("event").unwrap();

    let started = Instant::now();
    host.signal_data_ready(uid).unwrap();
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(harness.recorder.calls("event"), 0);
    assert_eq!(harness.broker.count("idle/event"), 0);
}

#[test]
fn test_signal_publishes_before_returning() {
    let harness = build(signaled("bell"));
    let host = harness.recorder.host().unwrap();
    let uid = harness.extension.source_uid("event").unwrap();

    assert!(harness.extension.add_subscriber(ClientId::next(), "event"));
    assert_eq!(harness.extension.active_schedulers(), 1);

    host.signal_data_ready(uid).unwrap();
    assert_eq!(harness.broker.count("bell/event"), 1);

    host.signal_data_ready(uid).unwrap();
    assert_eq!(harness.broker.count("bell/event"), 2);

    let payload = &harness.broker.payloads("bell/event")[0];
    assert_eq!(payload["data"]["bell"]["event"], json!({"fired": true}));
}

#[test]
fn test_signal_from_producer_thread() {
    let harness = build(signaled("worker"));
    let host = harness.recorder.host().unwrap();
    let uid = harness.extension.source_uid("event").unwrap();
    assert!(harness.extension.add_subscriber(ClientId::next(), "event"));

    let producer = thread::spawn(move || {
        for _ in 0..3 {
            host.signal_data_ready(uid).unwrap();
        }
    });
    producer.join().unwrap();

    assert_eq!(harness.broker.count("worker/event"), 3);
}

#[test]
fn test_signal_rejects_bad_uids() {
    let harness = build(signaled("strict"));
    let host = harness.recorder.host().unwrap();
    let poll_uid = harness.extension.source_uid("poll").unwrap();

    assert!(matches!(
        host.signal_data_ready(SourceUid::from_raw(u64::MAX)),
        Err(SignalError::UnknownSource(_))
    ));
    assert!(matches!(
        host.signal_data_ready(poll_uid),
        Err(SignalError::NotSignaled(ref name)) if name == "poll"
    ));
}

#[test]
fn test_signal_times_out_on_slow_push() {
    let config = HostConfig {
        rendezvous_timeout_ms: 100,
        ..HostConfig::default()
    };
    let harness = build_with(signaled("slow"), config).unwrap();
    harness.extension.initialize().unwrap();
    harness.recorder.set_delay("event", Duration::from_millis(400));

    let host = harness.recorder.host().unwrap();
    let uid = harness.extension.source_uid("event").unwrap();
    assert!(harness.extension.add_subscriber(ClientId::next(), "event"));

    assert!(matches!(
        host.signal_data_ready(uid),
        Err(SignalError::Rendezvous(RendezvousError::Timeout(_)))
    ));
}

#[test]
fn test_timed_out_signal_does_not_acknowledge_the_next() {
    let config = HostConfig {
        rendezvous_timeout_ms: 300,
        ..HostConfig::default()
    };
    let harness = build_with(signaled("late"), config).unwrap();
    harness.extension.initialize().unwrap();
    harness.recorder.set_delay("event", Duration::from_millis(500));

    let host = harness.recorder.host().unwrap();
    let uid = harness.extension.source_uid("event").unwrap();
    assert!(harness.extension.add_subscriber(ClientId::next(), "event"));

    assert!(matches!(
        host.signal_data_ready(uid),
        Err(SignalError::Rendezvous(RendezvousError::Timeout(_)))
    ));

    // The first push lands while the second signal waits; only the second
    // push may release it.
    let second = host.signal_data_ready(uid);
    assert!(matches!(
        second,
        Err(SignalError::Rendezvous(RendezvousError::Timeout(_)))
    ));
    assert_eq!(harness.broker.count("late/event"), 1);

    harness.recorder.set_delay("event", Duration::ZERO);
    assert!(wait_until(Duration::from_secs(2), || {
        harness.broker.count("late/event") == 2
    }));

    host.signal_data_ready(uid).unwrap();
    assert_eq!(harness.broker.count("late/event"), 3);
}

#[test]
fn test_signal_during_unload_never_overlaps_shutdown() {
    let harness = build(signaled("racing"));
    harness.recorder.set_delay("event", Duration::from_millis(300));

    let recorder = harness.recorder.clone();
    let host = recorder.host().unwrap();
    let uid = harness.extension.source_uid("event").unwrap();
    assert!(harness.extension.add_subscriber(ClientId::next(), "event"));

    let first = {
        let host = host.clone();
        thread::spawn(move || host.signal_data_ready(uid))
    };
    assert!(wait_until(Duration::from_secs(2), || recorder.calls("event") == 1));

    let unload = thread::spawn(move || drop(harness));
    thread::sleep(Duration::from_millis(50));
    let second = thread::spawn(move || host.signal_data_ready(uid));

    unload.join().unwrap();
    let _ = first.join().unwrap();
    let _ = second.join().unwrap();

    assert!(!recorder.called_after_shutdown());
    assert_eq!(recorder.log(), vec!["init", "shutdown", "destroy"]);
}

#[test]
fn test_unsubscribe_releases_waiting_producer() {
    let harness = build(signaled("release"));
    harness.recorder.set_delay("event", Duration::from_millis(200));

    let host = harness.recorder.host().unwrap();
    let uid = harness.extension.source_uid("event").unwrap();
    let client = ClientId::next();
    assert!(harness.extension.add_subscriber(client, "event"));

    let producer = thread::spawn(move || host.signal_data_ready(uid));
    thread::sleep(Duration::from_millis(50));
    harness.extension.remove_subscriber(client);

    assert!(producer.join().unwrap().is_ok());
}

#[test]
fn test_signal_after_unload_fails() {
    let harness = build(signaled("gone"));
    let host = harness.recorder.host().unwrap();
    let uid = harness.extension.source_uid("event").unwrap();

    drop(harness.extension);

    assert!(matches!(
        host.signal_data_ready(uid),
        Err(SignalError::ExtensionGone)
    ));
}
