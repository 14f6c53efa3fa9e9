//! Message records flowing from the add-message-metadata action to a broker

mod common;

use common::builders::single_object_batches;
use common::mock_helpers::RecordingBroker;
use common::{wait_for_state, PERSON};
use odeflow::ode::{TriggerFilter, TriggerLimit};
use odeflow::pipeline::{ComponentKind, Pad, ScriptedEngine};
use odeflow::sink::{MessageSinkSettings, PayloadSchema, PublishReport};
use odeflow::{EngineConfig, PipelineState, Registry, ResultCode};

fn registry() -> Registry {
    let mut config = EngineConfig::default();
    config.message_sink.retry_backoff_ms = 1;
    Registry::with_config(config).unwrap()
}

fn message_pipeline(registry: &Registry, broker: RecordingBroker, frames: u64) {
    registry.action_message_meta_add_new("add-meta", false).unwrap();
    registry
        .trigger_occurrence_new("person", TriggerFilter::class(PERSON), TriggerLimit::None)
        .unwrap();
    registry.trigger_action_add("person", "add-meta").unwrap();
    registry.pph_ode_new("pph").unwrap();
    registry.pph_ode_trigger_add("pph", "person").unwrap();

    registry
        .component_new(
            "camera",
            ComponentKind::FileSource {
                path: "sample_720p.mp4".into(),
                repeat_enabled: false,
            },
        )
        .unwrap();
    registry
        .component_new(
            "osd",
            ComponentKind::OnScreenDisplay {
                text_enabled: true,
                clock_enabled: false,
                bbox_enabled: true,
                mask_enabled: false,
            },
        )
        .unwrap();
    registry.component_pph_add("osd", "pph", Pad::Sink).unwrap();

    let mut settings = MessageSinkSettings::new("ode-events", "localhost;9092");
    settings.payload_schema = PayloadSchema::Minimal;
    registry
        .sink_message_new("msg-sink", settings, Box::new(broker))
        .unwrap();

    registry
        .pipeline_new_with_engine(
            "main",
            Box::new(ScriptedEngine::from_batches(single_object_batches(PERSON, frames))),
        )
        .unwrap();
    registry
        .pipeline_component_add_many("main", &["msg-sink", "osd", "camera"])
        .unwrap();
}

#[test]
fn test_records_reach_the_broker() {
    let registry = registry();
    let broker = RecordingBroker::new();
    message_pipeline(&registry, broker.clone(), 3);
    let reports = registry
        .component("msg-sink")
        .unwrap()
        .message_sink()
        .unwrap()
        .reports();

    registry.pipeline_play("main").unwrap();
    wait_for_state(&registry.pipeline("main").unwrap(), PipelineState::Null);
    registry.pipeline_stop("main").unwrap();

    // Stopping the pipeline drains and joins the publisher.
    let published = broker.published();
    assert_eq!(published.len(), 3);
    assert_eq!(broker.connects(), 1);
    let payload: serde_json::Value = serde_json::from_slice(&published[2].1).unwrap();
    assert_eq!(published[2].0, "ode-events");
    assert_eq!(payload["trigger"], "person");
    assert_eq!(payload["source"], "camera");
    assert_eq!(payload["frame"], 2);
    assert_eq!(payload["track_id"], 3);

    let sink = registry.component("msg-sink").unwrap();
    assert_eq!(sink.message_sink().unwrap().published_count(), 3);
    assert_eq!(reports.try_iter().count(), 0);
}

#[test]
fn test_publish_failures_are_retried_and_reported() {
    let registry = registry();
    let broker = RecordingBroker::new().failing(4);
    message_pipeline(&registry, broker.clone(), 2);
    let reports = registry
        .component("msg-sink")
        .unwrap()
        .message_sink()
        .unwrap()
        .reports();

    registry.pipeline_play("main").unwrap();
    wait_for_state(&registry.pipeline("main").unwrap(), PipelineState::Null);
    registry.pipeline_stop("main").unwrap();

    // Three attempts per record: the first record fails outright, the
    // second gets through on its second attempt.
    let collected: Vec<PublishReport> = reports.try_iter().collect();
    assert!(collected.iter().any(|r| matches!(
        r,
        PublishReport::Failed { trigger, attempts: 3, .. } if trigger == "person"
    )));
    assert!(collected
        .iter()
        .any(|r| matches!(r, PublishReport::Published { attempts: 2, .. })));
    assert_eq!(broker.published().len(), 1);
}

#[test]
fn test_message_sink_in_use_and_deleted() {
    let registry = registry();
    message_pipeline(&registry, RecordingBroker::new(), 1);

    let err = registry.delete("msg-sink").unwrap_err();
    assert_eq!(err.code(), ResultCode::InUse);
    registry.pipeline_component_remove("main", "msg-sink").unwrap();
    registry.delete("msg-sink").unwrap();

    let err = registry
        .sink_message_new(
            "broken",
            MessageSinkSettings::new("", "localhost"),
            Box::new(RecordingBroker::new()),
        )
        .unwrap_err();
    assert_eq!(err.code(), ResultCode::InvalidParameter);
    assert!(!registry.contains("broken"));
}
