use anyhow::{anyhow, bail};
use crossbeam::channel::{Receiver, RecvTimeoutError, Sender};
use log::{debug, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;

use crate::control::feature::FeatureFrame;
use crate::control::rig::{AudioEngine, Command, InputDevices};
use crate::error::Result;
use crate::fx::graph::GraphBackend;

/// How long the loop waits on the detector before checking commands and the stop flag.
pub const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("feature detector failed: {message}")]
pub struct DetectorError {
    pub message: String,
}

impl DetectorError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// One detector result. `Ok(None)` means nothing was detected in that frame.
pub type DetectorResult = std::result::Result<Option<FeatureFrame>, DetectorError>;

/// An item on a detector feed. Results and commands keep the order they were sent in.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedItem {
    Detection(DetectorResult),
    Command(Command),
}

impl From<Command> for FeedItem {
    fn from(command: Command) -> Self {
        Self::Command(command)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DetectorEvent {
    Frame(Option<FeatureFrame>),
    /// A command sent in-band. It applies before anything sent after it.
    Command(Command),
    /// Nothing arrived within the timeout.
    Idle,
    /// The detector will produce no more results.
    Closed,
}

/// The external feature detector.
pub trait Detector {
    fn next_event(
        &mut self,
        timeout: Duration,
    ) -> std::result::Result<DetectorEvent, DetectorError>;

    /// Restarts the detection pipeline after a failure.
    fn restart(&mut self) -> anyhow::Result<()>;
}

/// Detector fed through a channel by whatever runs the detection model.
pub struct ChannelDetector {
    items: Receiver<FeedItem>,
    restart: Option<Sender<()>>,
}

impl ChannelDetector {
    pub fn new(items: Receiver<FeedItem>) -> Self {
        Self {
            items,
            restart: None,
        }
    }

    /// Restart requests are forwarded to `restart`.
    pub fn with_restart(mut self, restart: Sender<()>) -> Self {
        self.restart = Some(restart);
        self
    }
}

impl Detector for ChannelDetector {
    fn next_event(
        &mut self,
        timeout: Duration,
    ) -> std::result::Result<DetectorEvent, DetectorError> {
        match self.items.recv_timeout(timeout) {
            Ok(FeedItem::Detection(Ok(frame))) => Ok(DetectorEvent::Frame(frame)),
            Ok(FeedItem::Detection(Err(e))) => Err(e),
            Ok(FeedItem::Command(command)) => Ok(DetectorEvent::Command(command)),
            Err(RecvTimeoutError::Timeout) => Ok(DetectorEvent::Idle),
            Err(RecvTimeoutError::Disconnected) => Ok(DetectorEvent::Closed),
        }
    }

    fn restart(&mut self) -> anyhow::Result<()> {
        let Some(restart) = &self.restart else {
            bail!("detector has no restart hook");
        };
        restart
            .send(())
            .map_err(|_| anyhow!("detector restart hook is closed"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// The stop flag was cleared.
    Stopped,
    DetectorClosed,
}

/// Per-frame driver: one detector event is fully applied before the next is read.
///
/// Commands arriving on the detector feed are applied in feed order. Commands from a
/// side channel are drained between events. Both run on this thread, so rebuilds and
/// parameter writes never interleave.
pub struct ModulationLoop<T: Detector> {
    detector: T,
    commands: Option<Receiver<Command>>,
    running: Arc<AtomicBool>,
    poll_interval: Duration,
    frames: u64,
}

impl<T: Detector> ModulationLoop<T> {
    pub fn new(detector: T, running: Arc<AtomicBool>) -> Self {
        Self {
            detector,
            commands: None,
            running,
            poll_interval: POLL_INTERVAL,
            frames: 0,
        }
    }

    /// Also takes commands from `commands`, for callers outside the detector feed.
    pub fn with_commands(mut self, commands: Receiver<Command>) -> Self {
        self.commands = Some(commands);
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Runs until stopped or the detector closes.
    ///
    /// A detector failure ends the loop with [`crate::Error::Detector`]; nothing is
    /// retried here. A failing command is logged and the current chain kept.
    pub fn run<G: GraphBackend, D: InputDevices>(
        &mut self,
        engine: &mut AudioEngine<G, D>,
    ) -> Result<LoopExit> {
        loop {
            if !self.running.load(Ordering::SeqCst) {
                debug!("Modulation loop stopped after {} frames", self.frames);
                return Ok(LoopExit::Stopped);
            }

            self.drain_commands(engine);

            match self.detector.next_event(self.poll_interval)? {
                DetectorEvent::Frame(Some(frame)) => {
                    self.frames += 1;
                    engine.on_frame(&frame)?;
                }
                DetectorEvent::Command(command) => Self::apply_command(engine, command),
                DetectorEvent::Frame(None) | DetectorEvent::Idle => {}
                DetectorEvent::Closed => {
                    debug!("Detector closed after {} frames", self.frames);
                    return Ok(LoopExit::DetectorClosed);
                }
            }
        }
    }

    fn drain_commands<G: GraphBackend, D: InputDevices>(&self, engine: &mut AudioEngine<G, D>) {
        let Some(commands) = &self.commands else {
            return;
        };
        while let Ok(command) = commands.try_recv() {
            Self::apply_command(engine, command);
        }
    }

    fn apply_command<G: GraphBackend, D: InputDevices>(
        engine: &mut AudioEngine<G, D>,
        command: Command,
    ) {
        debug!("Command: {command:?}");
        if let Err(e) = engine.handle(command) {
            warn!("Command failed, keeping current chain: {e}");
        }
    }

    pub fn restart_detector(&mut self) -> anyhow::Result<()> {
        self.detector.restart()
    }

    pub fn frames_processed(&self) -> u64 {
        self.frames
    }
}
