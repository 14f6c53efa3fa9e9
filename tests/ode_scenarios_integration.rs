//! End-to-end ODE scenarios driven through the registry and a scripted engine

mod common;

use common::builders::{single_object_batches, FrameBuilder, ObjectBuilder};
use common::mock_helpers::RecordingWriter;
use common::{wait_for_state, PERSON, VEHICLE};
use odeflow::ode::{ActionKind, OccurrenceInfo, TriggerFilter, TriggerLimit};
use odeflow::pipeline::{ComponentKind, Pad, ScriptedEngine};
use odeflow::{ObjectSpec, PipelineState, Registry};
use std::sync::{Arc, Mutex};

fn file_source() -> ComponentKind {
    ComponentKind::FileSource {
        path: "sample_720p.mp4".into(),
        repeat_enabled: false,
    }
}

/// camera → sink with `handler` on the sink's sink pad, fed by `engine`
fn build_pipeline(registry: &Registry, handler: &str, engine: ScriptedEngine) {
    registry.component_new("camera", file_source()).unwrap();
    registry.component_new("sink", ComponentKind::FakeSink).unwrap();
    registry.component_pph_add("sink", handler, Pad::Sink).unwrap();
    registry
        .pipeline_new_with_engine("main", Box::new(engine))
        .unwrap();
    registry
        .pipeline_component_add_many("main", &["camera", "sink"])
        .unwrap();
}

fn run_to_eos(registry: &Registry) {
    let pipeline = registry.pipeline("main").unwrap();
    registry.pipeline_play("main").unwrap();
    wait_for_state(&pipeline, PipelineState::Null);
    registry.pipeline_stop("main").unwrap();
}

#[test]
fn test_person_limit_two_prints_twice() {
    let registry = Registry::new();
    let writer = RecordingWriter::new();

    registry
        .create(
            "print",
            ObjectSpec::Action(ActionKind::print_with_writer(true, Box::new(writer.clone()))),
        )
        .unwrap();
    registry
        .trigger_instance_new("person", TriggerFilter::class(PERSON), TriggerLimit::Count(2))
        .unwrap();
    registry.trigger_action_add("person", "print").unwrap();
    registry.pph_ode_new("pph").unwrap();
    registry.pph_ode_trigger_add("pph", "person").unwrap();
    build_pipeline(
        &registry,
        "pph",
        ScriptedEngine::from_batches(single_object_batches(PERSON, 3)),
    );

    let eos = Arc::new(Mutex::new(0));
    let eos_seen = eos.clone();
    registry
        .pipeline_eos_listener_add("main", move || *eos_seen.lock().unwrap() += 1)
        .unwrap();

    run_to_eos(&registry);

    let lines = writer.lines();
    assert_eq!(lines.len(), 2, "printed: {:?}", lines);
    assert!(lines[0].contains("trigger=person source=camera(0) frame=0"));
    assert!(lines[1].contains("frame=1"));
    assert!(lines[1].contains("track=2"));
    assert_eq!(registry.trigger_remaining("person").unwrap(), Some(0));
    assert_eq!(*eos.lock().unwrap(), 1);

    // A reset makes the trigger fire again on a replay.
    registry.trigger_reset("person").unwrap();
    assert_eq!(registry.trigger_remaining("person").unwrap(), Some(2));
    run_to_eos(&registry);
    assert_eq!(writer.lines().len(), 4);
}

#[test]
fn test_trigger_and_action_order() {
    let registry = Registry::new();
    let log = Arc::new(Mutex::new(Vec::new()));

    for action in ["a", "b", "c"] {
        let log = log.clone();
        registry
            .action_monitor_new(action, move |info: &OccurrenceInfo| {
                log.lock().unwrap().push(format!(
                    "{}/{}/{}",
                    info.trigger,
                    action,
                    info.track_id.unwrap_or_default()
                ));
            })
            .unwrap();
    }
    registry
        .trigger_occurrence_new("first", TriggerFilter::any(), TriggerLimit::None)
        .unwrap();
    registry
        .trigger_occurrence_new("second", TriggerFilter::any(), TriggerLimit::None)
        .unwrap();
    registry.trigger_action_add_many("first", &["b", "a"]).unwrap();
    registry.trigger_action_add("second", "c").unwrap();
    registry.pph_ode_new("pph").unwrap();
    registry
        .pph_ode_trigger_add_many("pph", &["first", "second"])
        .unwrap();

    let batch = FrameBuilder::new(0)
        .object(ObjectBuilder::new(PERSON).track(10))
        .object(ObjectBuilder::new(VEHICLE).track(20))
        .batch();
    build_pipeline(&registry, "pph", ScriptedEngine::from_batches(vec![batch]));
    run_to_eos(&registry);

    assert_eq!(
        *log.lock().unwrap(),
        vec![
            "first/b/10",
            "first/a/10",
            "second/c/10",
            "first/b/20",
            "first/a/20",
            "second/c/20",
        ]
    );
}

#[test]
fn test_instance_matches_each_track_once() {
    let registry = Registry::new();
    let hits = Arc::new(Mutex::new(Vec::new()));
    let sink = hits.clone();
    registry
        .action_monitor_new("monitor", move |info: &OccurrenceInfo| {
            sink.lock()
                .unwrap()
                .push((info.source_id, info.track_id.unwrap_or_default()));
        })
        .unwrap();
    registry
        .trigger_instance_new("new-person", TriggerFilter::class(PERSON), TriggerLimit::None)
        .unwrap();
    registry.trigger_action_add("new-person", "monitor").unwrap();
    registry.pph_ode_new("pph").unwrap();
    registry.pph_ode_trigger_add("pph", "new-person").unwrap();

    // Track 1 lingers for three frames, track 2 joins later, track 0 is untracked.
    let batches = vec![
        FrameBuilder::new(0)
            .object(ObjectBuilder::new(PERSON).track(1))
            .batch(),
        FrameBuilder::new(1)
            .object(ObjectBuilder::new(PERSON).track(1))
            .object(ObjectBuilder::new(PERSON).track(2))
            .object(ObjectBuilder::new(PERSON))
            .batch(),
        FrameBuilder::new(2)
            .object(ObjectBuilder::new(PERSON).track(2))
            .object(ObjectBuilder::new(PERSON).track(1))
            .batch(),
    ];
    build_pipeline(&registry, "pph", ScriptedEngine::from_batches(batches));
    run_to_eos(&registry);

    assert_eq!(*hits.lock().unwrap(), vec![(0, 1), (0, 2)]);
}

#[test]
fn test_source_filter_uses_component_names() {
    let registry = Registry::new();
    let hits = Arc::new(Mutex::new(Vec::new()));
    let sink = hits.clone();
    registry
        .action_monitor_new("monitor", move |info: &OccurrenceInfo| {
            sink.lock().unwrap().push(info.frame_number);
        })
        .unwrap();
    registry
        .trigger_occurrence_new(
            "rear-only",
            TriggerFilter {
                source: Some("rear".to_string()),
                class_id: None,
            },
            TriggerLimit::None,
        )
        .unwrap();
    registry.trigger_action_add("rear-only", "monitor").unwrap();
    registry.pph_ode_new("pph").unwrap();
    registry.pph_ode_trigger_add("pph", "rear-only").unwrap();

    registry.component_new("front", file_source()).unwrap();
    registry.component_new("rear", file_source()).unwrap();
    registry.component_new("tiler", ComponentKind::Tiler { width: 1280, height: 720 }).unwrap();
    registry.component_pph_add("tiler", "pph", Pad::Src).unwrap();

    let batch = odeflow::BatchMeta::new(vec![
        FrameBuilder::new(100).source(0).object(ObjectBuilder::new(PERSON)).build(),
        FrameBuilder::new(200).source(1).object(ObjectBuilder::new(PERSON)).build(),
    ]);
    registry
        .pipeline_new_with_engine("main", Box::new(ScriptedEngine::from_batches(vec![batch])))
        .unwrap();
    registry
        .pipeline_component_add_many("main", &["tiler", "front", "rear"])
        .unwrap();
    run_to_eos(&registry);

    assert_eq!(*hits.lock().unwrap(), vec![200]);
}

#[test]
fn test_per_frame_triggers_see_whole_frames() {
    let registry = Registry::new();
    let hits = Arc::new(Mutex::new(Vec::new()));
    let sink = hits.clone();
    registry
        .action_monitor_new("monitor", move |info: &OccurrenceInfo| {
            sink.lock()
                .unwrap()
                .push(format!("{}@{}:{}", info.trigger, info.frame_number, info.object_count));
        })
        .unwrap();
    registry
        .trigger_absence_new("no-vehicle", TriggerFilter::class(VEHICLE), TriggerLimit::None)
        .unwrap();
    registry
        .trigger_count_new("crowd", TriggerFilter::class(PERSON), TriggerLimit::None, 2, None)
        .unwrap();
    registry
        .trigger_interval_new("every-other", TriggerFilter::any(), TriggerLimit::None, 2)
        .unwrap();
    for trigger in ["no-vehicle", "crowd", "every-other"] {
        registry.trigger_action_add(trigger, "monitor").unwrap();
    }
    registry.pph_ode_new("pph").unwrap();
    registry
        .pph_ode_trigger_add_many("pph", &["no-vehicle", "crowd", "every-other"])
        .unwrap();

    let batches = vec![
        FrameBuilder::new(0)
            .object(ObjectBuilder::new(PERSON).track(1))
            .object(ObjectBuilder::new(PERSON).track(2))
            .batch(),
        FrameBuilder::new(1)
            .object(ObjectBuilder::new(VEHICLE).track(3))
            .batch(),
    ];
    build_pipeline(&registry, "pph", ScriptedEngine::from_batches(batches));
    run_to_eos(&registry);

    assert_eq!(
        *hits.lock().unwrap(),
        vec!["no-vehicle@0:0", "crowd@0:2", "every-other@1:1"]
    );
}
