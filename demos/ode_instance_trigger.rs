//! ODE instance-trigger demo
//!
//! Builds a two-camera pipeline with primary inference, an IOU tracker, a
//! tiler, an on-screen display and a message sink, then feeds it scripted
//! detection metadata. A new PERSON or VEHICLE is printed and published
//! once per track; person boxes are filled in red.
//!
//! Run with: cargo run --example ode_instance_trigger

use anyhow::Context;
use odeflow::ode::{TriggerFilter, TriggerLimit};
use odeflow::pipeline::{ComponentKind, Pad, ScriptedEngine, TrackerKind};
use odeflow::sink::{BrokerClient, MessageSinkSettings};
use odeflow::{BatchMeta, BoundingBox, EngineConfig, FrameMeta, ObjectMeta, PipelineState, Registry};
use std::time::Duration;

const VEHICLE: u16 = 0;
const PERSON: u16 = 2;

/// Broker client that logs instead of connecting anywhere.
struct LoggingBroker;

impl BrokerClient for LoggingBroker {
    fn connect(&mut self, settings: &MessageSinkSettings) -> odeflow::Result<()> {
        tracing::info!("Connecting to '{}'", settings.connection_string);
        Ok(())
    }

    fn publish(&mut self, topic: &str, payload: &[u8]) -> odeflow::Result<()> {
        tracing::info!("[{}] {}", topic, String::from_utf8_lossy(payload));
        Ok(())
    }
}

/// Two cameras, 30 frames each; people and cars walk through with stable track ids.
fn scripted_batches() -> Vec<BatchMeta> {
    (0..30u64)
        .map(|n| {
            let frames = (0..2u32)
                .map(|source| {
                    let mut frame = FrameMeta::new(source, n, Duration::from_millis(n * 33));
                    let base = u64::from(source) * 100;
                    frame = frame.with_object(ObjectMeta::new(
                        base + 1 + n / 10,
                        PERSON,
                        BoundingBox::new(100.0 + n as f32 * 4.0, 200.0, 60.0, 160.0),
                        0.87,
                    ));
                    if n % 3 == 0 {
                        frame = frame.with_object(ObjectMeta::new(
                            base + 50 + n / 15,
                            VEHICLE,
                            BoundingBox::new(600.0, 300.0, 220.0, 120.0),
                            0.93,
                        ));
                    }
                    frame
                })
                .collect();
            BatchMeta::new(frames)
        })
        .collect()
}

fn main() -> anyhow::Result<()> {
    let config = EngineConfig::load_or_default(
        EngineConfig::default_path().unwrap_or_else(|| "odeflow.toml".into()),
    );
    let _logging = odeflow::logging::init(&config.logging)?;
    let registry = Registry::with_config(config)?;

    // Display resources and actions
    registry.display_color_new("opaque-red", 1.0, 0.0, 0.0, 0.25)?;
    registry.action_format_bbox_new("fill-red", 0, None, Some("opaque-red"))?;
    registry.action_print_new("print", false)?;
    registry.action_message_meta_add_new("add-meta", true)?;

    // One instance trigger per class, sharing the print and message actions
    registry.trigger_instance_new("new-person", TriggerFilter::class(PERSON), TriggerLimit::None)?;
    registry.trigger_instance_new("new-vehicle", TriggerFilter::class(VEHICLE), TriggerLimit::None)?;
    registry.trigger_action_add_many("new-person", &["fill-red", "print", "add-meta"])?;
    registry.trigger_action_add_many("new-vehicle", &["print", "add-meta"])?;

    registry.pph_ode_new("ode-handler")?;
    registry.pph_ode_trigger_add_many("ode-handler", &["new-person", "new-vehicle"])?;

    // Components
    for (name, uri) in [
        ("camera-1", "file:///opt/streams/sample_1080p_h264.mp4"),
        ("camera-2", "file:///opt/streams/sample_1080p_h265.mp4"),
    ] {
        registry.component_new(
            name,
            ComponentKind::UriSource {
                uri: uri.into(),
                is_live: false,
                intra_decode: false,
                drop_frame_interval: 0,
            },
        )?;
    }
    registry.component_new(
        "primary-gie",
        ComponentKind::PrimaryInference {
            config_file: "config_infer_primary.txt".into(),
            model_engine_file: None,
            interval: 0,
        },
    )?;
    registry.component_new(
        "iou-tracker",
        ComponentKind::Tracker {
            kind: TrackerKind::Iou,
            config_file: None,
            width: 480,
            height: 272,
        },
    )?;
    registry.component_new("tiler", ComponentKind::Tiler { width: 1280, height: 720 })?;
    registry.component_new(
        "on-screen-display",
        ComponentKind::OnScreenDisplay {
            text_enabled: true,
            clock_enabled: true,
            bbox_enabled: true,
            mask_enabled: false,
        },
    )?;
    registry.component_new("fake-sink", ComponentKind::FakeSink)?;
    registry.sink_message_new(
        "message-sink",
        MessageSinkSettings::new("ode-events", "localhost;9092"),
        Box::new(LoggingBroker),
    )?;

    // Evaluate on the tiler's input, where every frame still carries its source
    registry.component_pph_add("tiler", "ode-handler", Pad::Sink)?;

    registry.pipeline_new_with_engine(
        "pipeline",
        Box::new(
            ScriptedEngine::from_batches(scripted_batches())
                .with_frame_interval(Duration::from_millis(33)),
        ),
    )?;
    registry.pipeline_component_add_many(
        "pipeline",
        &[
            "camera-1",
            "camera-2",
            "primary-gie",
            "iou-tracker",
            "tiler",
            "on-screen-display",
            "fake-sink",
            "message-sink",
        ],
    )?;
    println!("{}", registry.pipeline_dump_to_dot("pipeline")?);

    let (done_tx, done_rx) = crossbeam_channel::bounded(1);
    registry.pipeline_eos_listener_add("pipeline", move || {
        let _ = done_tx.try_send(());
    })?;
    registry.pipeline_state_change_listener_add("pipeline", |old, new| {
        tracing::info!("State change: {} -> {}", old, new);
    })?;

    let message_sink = registry.component("message-sink")?;
    let reports = message_sink
        .message_sink()
        .context("message-sink is not a message sink")?
        .reports();

    registry.pipeline_play("pipeline")?;
    done_rx
        .recv_timeout(Duration::from_secs(30))
        .context("pipeline did not reach end of stream")?;
    registry.pipeline_stop("pipeline")?;
    assert_eq!(registry.pipeline_state("pipeline")?, PipelineState::Null);

    let published = message_sink
        .message_sink()
        .map_or(0, |sink| sink.published_count());
    for report in reports.try_iter() {
        tracing::warn!("Publisher report: {:?}", report);
    }
    tracing::info!("{} messages published", published);

    registry.delete_all()?;
    Ok(())
}
