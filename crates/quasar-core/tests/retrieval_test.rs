//! Poll path: caching, args, nulls, delayed results and batches.

mod common;

use std::thread;
use std::time::Duration;

use common::{build, FakeModule};
use quasar_core::prelude::*;
use serde_json::{json, Value};

#[test]
fn test_ttl_cache_serves_until_expiry() {
    let harness = build(
        FakeModule::new("cache")
            .source("temp", DeliveryClass::cached(Duration::from_millis(500)))
            .reply("temp", DataReply::value(json!(21.5))),
    );
    let client = ClientId::next();

    let first = harness.extension.poll_data_for_sending(&["temp"], None, client);
    let second = harness.extension.poll_data_for_sending(&["temp"], None, client);
    assert_eq!(first.get("cache", "temp"), Some(&json!(21.5)));
    assert_eq!(second.get("cache", "temp"), Some(&json!(21.5)));
    assert_eq!(harness.recorder.calls("temp"), 1);

    thread::sleep(Duration::from_millis(600));
    harness.extension.poll_data_for_sending(&["temp"], None, client);
    assert_eq!(harness.recorder.calls("temp"), 2);
}

#[test]
fn test_uncached_source_calls_every_time() {
    let harness = build(
        FakeModule::new("live")
            .source("now", DeliveryClass::poll_on_demand())
            .reply("now", DataReply::value(json!("t"))),
    );
    let client = ClientId::next();

    for _ in 0..3 {
        harness.extension.poll_data_for_sending(&["now"], None, client);
    }
    assert_eq!(harness.recorder.calls("now"), 3);
}

#[test]
fn test_empty_args_treated_as_absent() {
    let harness = build(
        FakeModule::new("args")
            .source("q", DeliveryClass::poll_on_demand())
            .reply("q", DataReply::value(json!(0))),
    );
    let client = ClientId::next();

    harness.extension.poll_data_for_sending(&["q"], Some(""), client);
    assert_eq!(harness.recorder.last_args(), Some(None));

    harness.extension.poll_data_for_sending(&["q"], Some("depth=2"), client);
    assert_eq!(harness.recorder.last_args(), Some(Some("depth=2".to_string())));
}

#[test]
fn test_explicit_null_is_written() {
    let harness = build(
        FakeModule::new("nulls")
            .source("empty", DeliveryClass::cached(Duration::from_secs(60)))
            .reply("empty", DataReply::value(Value::Null)),
    );

    let envelope = harness
        .extension
        .poll_data_for_sending(&["empty"], None, ClientId::next());
    assert_eq!(envelope.get("nulls", "empty"), Some(&Value::Null));
    assert!(envelope.errors.is_empty());

    let parsed: Value = serde_json::from_str(&envelope.to_json()).unwrap();
    assert_eq!(parsed, json!({"data": {"nulls": {"empty": null}}, "errors": []}));
}

#[test]
fn test_module_errors_reach_envelope() {
    let harness = build(
        FakeModule::new("noisy")
            .source("a", DeliveryClass::poll_on_demand())
            .reply("a", DataReply::value(json!(3)).with_error("sensor drift")),
    );

    let envelope = harness
        .extension
        .poll_data_for_sending(&["a"], None, ClientId::next());
    assert_eq!(envelope.get("noisy", "a"), Some(&json!(3)));
    assert_eq!(envelope.errors, vec!["sensor drift"]);
}

#[test]
fn test_batch_with_unknown_and_delayed_sources() {
    let harness = build(
        FakeModule::new("ext")
            .source("A", DeliveryClass::poll_on_demand())
            .source("B", DeliveryClass::poll_on_demand())
            .reply("A", DataReply::value(json!({"load": 0.4})))
            .reply("B", DataReply::no_data()),
    );
    let client = ClientId::next();

    let envelope = harness
        .extension
        .poll_data_for_sending(&["A", "Unknown", "B"], None, client);

    assert_eq!(envelope.get("ext", "A"), Some(&json!({"load": 0.4})));
    assert!(envelope.get("ext", "B").is_none());
    assert_eq!(envelope.errors.len(), 1);
    assert!(envelope.errors[0].contains("Unknown"));
    assert!(envelope.errors[0].contains("ext"));

    assert_eq!(harness.extension.pending_polls("B"), Some(vec![client]));
    assert_eq!(harness.extension.take_pending_polls("B"), vec![client]);
    assert_eq!(harness.extension.pending_polls("B"), Some(vec![]));
}

#[test]
fn test_failed_source_does_not_abort_batch() {
    let harness = build(
        FakeModule::new("mixed")
            .source("bad", DeliveryClass::poll_on_demand())
            .source("good", DeliveryClass::poll_on_demand())
            .reply("bad", DataReply::failed())
            .reply("good", DataReply::value(json!(true))),
    );

    let envelope = harness
        .extension
        .poll_data_for_sending(&["bad", "good"], None, ClientId::next());

    assert!(envelope.get("mixed", "bad").is_none());
    assert_eq!(envelope.get("mixed", "good"), Some(&json!(true)));
    assert_eq!(envelope.errors.len(), 1);
    assert!(envelope.errors[0].contains("bad"));
}

#[test]
fn test_empty_request_yields_empty_data() {
    let harness = build(FakeModule::new("idle").source("a", DeliveryClass::poll_on_demand()));
    let none: [&str; 0] = [];

    let envelope = harness
        .extension
        .poll_data_for_sending(&none, None, ClientId::next());
    let parsed: Value = serde_json::from_str(&envelope.to_json()).unwrap();
    assert_eq!(parsed, json!({"data": {"idle": {}}, "errors": []}));
}

#[test]
fn test_removing_client_clears_pending_polls() {
    let harness = build(
        FakeModule::new("later")
            .source("slow", DeliveryClass::poll_on_demand())
            .reply("slow", DataReply::no_data()),
    );
    let client = ClientId::next();

    harness
        .extension
        .poll_data_for_sending(&["slow"], None, client);
    assert_eq!(harness.extension.pending_polls("slow").unwrap().len(), 1);

    harness.extension.remove_subscriber(client);
    assert!(harness.extension.pending_polls("slow").unwrap().is_empty());
}
