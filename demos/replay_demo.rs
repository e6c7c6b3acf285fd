//! Demonstration of the Watchpost agent running on replayed detections.
//!
//! This example shows how to:
//! 1. Describe detector output as replay annotations
//! 2. Configure generated video and audio sources
//! 3. Run the agent until alerts are raised
//! 4. Review and annotate the stored alerts
//!
//! Run with: cargo run --example replay_demo

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use watchpost_agent::alerts::AlertStore;
use watchpost_agent::config::{AudioSourceConfig, Config, VideoSourceConfig};
use watchpost_agent::detection::{load_capabilities, AnnotationReplay, FrameAnnotation};
use watchpost_agent::stats::AgentStats;
use watchpost_agent::{Agent, AgentMode};

/// Frames per replay loop at the demo frame rate.
const LOOP_FRAMES: u64 = 100;

fn main() -> anyhow::Result<()> {
    println!("Watchpost Agent - Replay Demo");
    println!("=============================");
    println!();

    let workspace = tempfile::tempdir()?;
    let data = workspace.path();

    // A laptop on the desk for the first second of each loop, then gone.
    let annotations: Vec<FrameAnnotation> = (0..10)
        .map(|frame| {
            serde_json::from_value(serde_json::json!({
                "frame": frame,
                "objects": [{
                    "label": "laptop",
                    "bbox": { "x1": 40.0, "y1": 60.0, "x2": 120.0, "y2": 110.0 },
                    "confidence": 0.92
                }]
            }))
        })
        .collect::<Result<_, _>>()?;
    let lines: Vec<String> = annotations
        .iter()
        .map(serde_json::to_string)
        .collect::<Result<_, _>>()?;
    let annotation_path = data.join("annotations.jsonl");
    std::fs::write(&annotation_path, lines.join("\n"))?;

    let transcript_path = data.join("transcripts.txt");
    std::fs::write(&transcript_path, "hello there\nget out you idiot\n")?;

    let mut config = Config::default();
    config.data_path = data.join("watchpost");
    config.video_sources = vec![VideoSourceConfig::TestPattern {
        name: "desk".to_string(),
    }];
    config.audio = Some(AudioSourceConfig::Silence);
    config.capture.frame_width = 160;
    config.capture.frame_height = 120;
    config.capture.fps = 10;
    config.capture.video_evidence_secs = 2;
    config.detection.contact_source = 0;
    config.detection.theft.grace_period = Duration::from_millis(500);
    config.detection.speech.window_secs = 1.0;
    config.detection.speech.lexicon = vec!["idiot".to_string()];
    config.capabilities.pose_annotations = Some(annotation_path.clone());
    config.capabilities.object_annotations = Some(annotation_path);
    config.capabilities.transcripts = Some(transcript_path);
    config.ensure_directories()?;

    // Loop the annotations with the frame counter.
    let mut capabilities = load_capabilities(&config.capabilities)?;
    let replay = Arc::new(AnnotationReplay::from_annotations(annotations).with_period(LOOP_FRAMES));
    capabilities.pose = replay.clone();
    capabilities.objects = replay;

    let store = Arc::new(AlertStore::open(config.alerts_path()));
    let stats = Arc::new(AgentStats::new());
    let mut agent = Agent::new(config, store.clone(), stats.clone(), Ok(capabilities));
    assert_eq!(agent.mode(), &AgentMode::Full);

    agent.start()?;
    println!("Agent running for 4 seconds...");
    thread::sleep(Duration::from_secs(4));
    agent.stop();
    println!();

    let alerts = store.get_all();
    println!("Recorded {} alert(s):", alerts.len());
    for alert in &alerts {
        println!(
            "  [{}] {} - {}",
            alert.id,
            alert.kind.title(),
            alert.description
        );
        for path in alert.evidence_paths() {
            println!("      evidence: {}", path.display());
        }
    }

    if let Some(first) = alerts.last() {
        store.mark_false_positive(&first.id, "demo review")?;
        println!();
        println!("Marked {} as a false positive.", first.id);
    }

    println!();
    println!("{}", stats.summary());
    Ok(())
}
