use anyhow::anyhow;
use crossbeam::channel::{self, Receiver};
use log::{debug, warn};
use std::path::PathBuf;
use std::thread;

use crate::error::{Error, Result};
use crate::fx::stages::pitch_shifter::PitchShiftStage;
use crate::ir::load_impulse_response;

/// Resources the chain cannot be wired without.
pub struct Assets {
    pub impulse_response: Vec<f32>,
    pub pitch_shifter: PitchShiftStage,
}

/// Assets being prepared on loader threads.
///
/// The impulse response is decoded and the pitch shifter's FFTs are planned in the
/// background; [`PendingAssets::wait`] blocks until both have reported.
pub struct PendingAssets {
    impulse_response: Receiver<anyhow::Result<Vec<f32>>>,
    pitch_shifter: Receiver<PitchShiftStage>,
}

impl PendingAssets {
    pub fn load(ir_path: PathBuf, sample_rate: usize) -> Self {
        let (ir_tx, ir_rx) = channel::bounded(1);
        let (pitch_tx, pitch_rx) = channel::bounded(1);

        thread::spawn(move || {
            debug!("Decoding impulse response {}", ir_path.display());
            let result = load_impulse_response(&ir_path, sample_rate);
            if let Err(e) = &result {
                warn!("Failed to load impulse response: {e:#}");
            }
            let _ = ir_tx.send(result);
        });

        thread::spawn(move || {
            let _ = pitch_tx.send(PitchShiftStage::new());
            debug!("Pitch shifter ready");
        });

        Self {
            impulse_response: ir_rx,
            pitch_shifter: pitch_rx,
        }
    }

    /// Already-resolved assets, for offline rendering and tests.
    pub fn ready(assets: Assets) -> Self {
        let (ir_tx, ir_rx) = channel::bounded(1);
        let (pitch_tx, pitch_rx) = channel::bounded(1);
        let _ = ir_tx.send(Ok(assets.impulse_response));
        let _ = pitch_tx.send(assets.pitch_shifter);

        Self {
            impulse_response: ir_rx,
            pitch_shifter: pitch_rx,
        }
    }

    pub fn wait(self) -> Result<Assets> {
        let impulse_response = self
            .impulse_response
            .recv()
            .map_err(|_| anyhow!("impulse response loader exited"))
            .and_then(|r| r)
            .map_err(|e| Error::resource("impulse response", e))?;

        let pitch_shifter = self.pitch_shifter.recv().map_err(|_| {
            Error::resource("pitch shifter", anyhow!("pitch shifter loader exited"))
        })?;

        Ok(Assets {
            impulse_response,
            pitch_shifter,
        })
    }
}
