use anyhow::{Context, Result};
use jack::{Client, Control, Frames, ProcessScope};
use log::{debug, error, warn};

use crate::audio::engine::Engine;
use crate::audio::ports::Ports;

/// Server notifications. Stages are tuned for the rate the client started with, so a
/// later rate change is only reported.
pub struct NotificationHandler {
    sample_rate: Frames,
    xruns: u64,
}

impl NotificationHandler {
    pub fn new(sample_rate: Frames) -> Self {
        Self {
            sample_rate,
            xruns: 0,
        }
    }
}

impl jack::NotificationHandler for NotificationHandler {
    fn sample_rate(&mut self, _: &Client, sample_rate: Frames) -> Control {
        if sample_rate == self.sample_rate {
            debug!("JACK sample rate confirmed at {sample_rate}");
        } else {
            warn!(
                "JACK sample rate changed from {} to {sample_rate}; effects keep the old tuning",
                self.sample_rate
            );
        }
        Control::Continue
    }

    fn xrun(&mut self, _: &Client) -> Control {
        self.xruns += 1;
        debug!("JACK xrun #{}", self.xruns);
        Control::Continue
    }
}

/// Renders the graph once per JACK cycle.
pub struct ProcessHandler {
    ports: Ports,
    engine: Engine,
    rendered: Vec<f32>,
}

impl ProcessHandler {
    pub fn new(client: &Client, engine: Engine) -> Result<Self> {
        Ok(Self {
            ports: Ports::register(client).context("failed to create audio ports")?,
            engine,
            rendered: vec![0.0; client.buffer_size() as usize],
        })
    }
}

impl jack::ProcessHandler for ProcessHandler {
    fn process(&mut self, _: &Client, ps: &ProcessScope) -> Control {
        let input = self.ports.input(ps);
        let frames = input.len().min(self.rendered.len());
        let rendered = &mut self.rendered[..frames];

        match self.engine.process(&input[..frames], rendered) {
            Ok(()) => self.ports.emit(ps, Some(&*rendered)),
            Err(e) => {
                error!("Audio processing error: {e}");
                self.ports.emit(ps, None);
            }
        }
        Control::Continue
    }

    fn buffer_size(&mut self, _: &Client, frames: Frames) -> Control {
        debug!("JACK buffer size now {frames} frames");
        self.rendered.resize(frames as usize, 0.0);
        Control::Continue
    }
}
