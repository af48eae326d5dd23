use anyhow::Result;
use crossbeam::channel::{bounded, unbounded};
use mouthpiece::Error;
use mouthpiece::assets::{Assets, PendingAssets};
use mouthpiece::control::feature::{FeatureFrame, Point};
use mouthpiece::control::feed::spawn_feed;
use mouthpiece::control::modulation::{
    ChannelDetector, DetectorError, FeedItem, LoopExit, ModulationLoop,
};
use mouthpiece::control::range::RangeTracker;
use mouthpiece::control::rig::{AudioEngine, Command, FixedInput};
use mouthpiece::control::selection::Effect;
use mouthpiece::fx::chain::EffectChainManager;
use mouthpiece::fx::graph::Graph;
use mouthpiece::fx::stages::Param;
use mouthpiece::fx::stages::pitch_shifter::PitchShiftStage;
use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

const SAMPLE_RATE: f32 = 48_000.0;
const POLL: Duration = Duration::from_millis(5);

fn rig(effect: Effect) -> Result<AudioEngine<Graph, FixedInput>> {
    let assets = PendingAssets::ready(Assets {
        impulse_response: vec![1.0],
        pitch_shifter: PitchShiftStage::new(),
    });
    let chain = EffectChainManager::new(Graph::new(SAMPLE_RATE), assets, SAMPLE_RATE);
    let mut rig = AudioEngine::new(chain, FixedInput, RangeTracker::default(), "mouth", effect);
    rig.start()?;
    Ok(rig)
}

fn mouth(extent: f32) -> FeatureFrame {
    FeatureFrame::default().with_region(
        "mouth",
        vec![Point { x: 0.0, y: 0.0 }, Point { x: 0.0, y: extent }],
    )
}

#[test]
fn cleared_flag_stops_before_reading() -> Result<()> {
    let mut rig = rig(Effect::Volume)?;
    let (results_tx, results_rx) = unbounded();
    results_tx.send(FeedItem::Detection(Ok(Some(mouth(30.0)))))?;

    let mut modulation = ModulationLoop::new(
        ChannelDetector::new(results_rx),
        Arc::new(AtomicBool::new(false)),
    );

    assert_eq!(modulation.run(&mut rig)?, LoopExit::Stopped);
    assert_eq!(modulation.frames_processed(), 0);

    Ok(())
}

#[test]
fn frames_are_applied_until_detector_closes() -> Result<()> {
    let mut rig = rig(Effect::Volume)?;
    let pending_after_start = rig.backend().pending_writes();

    let (results_tx, results_rx) = unbounded();
    results_tx.send(FeedItem::Detection(Ok(Some(mouth(20.0)))))?;
    results_tx.send(FeedItem::Detection(Ok(None)))?;
    results_tx.send(FeedItem::Detection(Ok(Some(mouth(50.0)))))?;
    drop(results_tx);

    let mut modulation = ModulationLoop::new(
        ChannelDetector::new(results_rx),
        Arc::new(AtomicBool::new(true)),
    )
    .with_poll_interval(POLL);

    assert_eq!(modulation.run(&mut rig)?, LoopExit::DetectorClosed);
    assert_eq!(modulation.frames_processed(), 2);
    assert_eq!(rig.backend().pending_writes(), pending_after_start + 2);

    Ok(())
}

#[test]
fn detector_failure_ends_the_loop() -> Result<()> {
    let mut rig = rig(Effect::Wah)?;
    let (results_tx, results_rx) = bounded(4);
    results_tx.send(FeedItem::Detection(Err(DetectorError::new(
        "camera unplugged",
    ))))?;

    let mut modulation = ModulationLoop::new(
        ChannelDetector::new(results_rx),
        Arc::new(AtomicBool::new(true)),
    )
    .with_poll_interval(POLL);

    let err = modulation.run(&mut rig).unwrap_err();
    assert!(matches!(err, Error::Detector(ref e) if e.message == "camera unplugged"));

    Ok(())
}

#[test]
fn commands_are_applied_between_frames() -> Result<()> {
    let mut rig = rig(Effect::Volume)?;
    let (results_tx, results_rx) = unbounded();
    let (commands_tx, commands_rx) = unbounded();
    commands_tx.send(Command::SelectEffect(Effect::Wah))?;
    commands_tx.send(Command::ToggleConvolution(false))?;
    results_tx.send(FeedItem::Detection(Ok(Some(mouth(40.0)))))?;
    drop(results_tx);

    let mut modulation = ModulationLoop::new(
        ChannelDetector::new(results_rx),
        Arc::new(AtomicBool::new(true)),
    )
    .with_commands(commands_rx)
    .with_poll_interval(POLL);

    assert_eq!(modulation.run(&mut rig)?, LoopExit::DetectorClosed);
    assert_eq!(rig.selection(), Effect::Wah);
    assert!(!rig.chain_manager().convolution_enabled());
    assert_eq!(rig.chain().map(|c| c.len()), Some(5));

    Ok(())
}

#[test]
fn restart_is_forwarded_to_hook() -> Result<()> {
    let (_results_tx, results_rx) = unbounded();
    let (restart_tx, restart_rx) = unbounded();

    let mut modulation = ModulationLoop::new(
        ChannelDetector::new(results_rx).with_restart(restart_tx),
        Arc::new(AtomicBool::new(true)),
    );

    modulation.restart_detector()?;
    assert!(restart_rx.try_recv().is_ok());

    drop(restart_rx);
    assert!(modulation.restart_detector().is_err());

    Ok(())
}

#[test]
fn feed_command_applies_before_the_frame_after_it() -> Result<()> {
    let mut rig = rig(Effect::Volume)?;
    let feed = spawn_feed(Cursor::new(concat!(
        r#"{"type": "select_effect", "effect": "wah"}"#,
        "\n",
        r#"{"type": "frame", "regions": {"mouth": [{"x": 0, "y": 0}, {"x": 0, "y": 37.5}]}}"#,
        "\n",
    )));

    let mut modulation = ModulationLoop::new(feed.detector, Arc::new(AtomicBool::new(true)))
        .with_poll_interval(POLL);

    assert_eq!(modulation.run(&mut rig)?, LoopExit::DetectorClosed);
    assert_eq!(modulation.frames_processed(), 1);
    assert_eq!(rig.selection(), Effect::Wah);

    rig.backend_mut().process_block(&mut [0.0; 256]);
    let wah = rig.chain_manager().stages().expect("stages").wah;
    assert_eq!(rig.backend().parameter(wah, Param::Frequency)?, 1100.0);

    Ok(())
}
