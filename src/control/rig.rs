use log::{debug, info};

use crate::control::feature::FeatureFrame;
use crate::control::modulator::ParameterModulator;
use crate::control::range::RangeTracker;
use crate::control::selection::Effect;
use crate::error::{Error, Result};
use crate::fx::chain::{EffectChain, EffectChainManager};
use crate::fx::graph::{GraphBackend, ParamWrite};

/// Switches the capture stream feeding the graph's source.
pub trait InputDevices {
    fn acquire(&mut self, device_id: &str) -> anyhow::Result<()>;
}

/// Input for graphs fed directly by the caller, such as offline renders.
pub struct FixedInput;

impl InputDevices for FixedInput {
    fn acquire(&mut self, device_id: &str) -> anyhow::Result<()> {
        debug!("Fixed input ignores device change to '{device_id}'");
        Ok(())
    }
}

/// Control requests. Each one rebuilds the chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    SelectEffect(Effect),
    SetInputDevice(String),
    ToggleConvolution(bool),
    /// Re-seeds the feature range. Does not touch the chain.
    ResetCalibration,
}

/// Everything on the control timeline: the chain, the feature range, the modulator,
/// and the current selection.
pub struct AudioEngine<G: GraphBackend, D: InputDevices> {
    chain: EffectChainManager<G>,
    devices: D,
    range: RangeTracker,
    modulator: ParameterModulator,
    selection: Effect,
    region: String,
}

impl<G: GraphBackend, D: InputDevices> AudioEngine<G, D> {
    pub fn new(
        chain: EffectChainManager<G>,
        devices: D,
        range: RangeTracker,
        region: impl Into<String>,
        selection: Effect,
    ) -> Self {
        Self {
            chain,
            devices,
            range,
            modulator: ParameterModulator::new(),
            selection,
            region: region.into(),
        }
    }

    /// Builds the first chain, waiting for assets if they are still loading.
    pub fn start(&mut self) -> Result<()> {
        self.chain.rebuild(self.selection)?;
        info!("Chain ready, effect: {}", self.selection);
        Ok(())
    }

    /// On failure the selection and the wired chain stay as they were.
    pub fn select_effect(&mut self, effect: Effect) -> Result<()> {
        self.chain.rebuild(effect)?;
        self.selection = effect;
        info!("Effect: {effect}");
        Ok(())
    }

    pub fn set_input_device(&mut self, device_id: &str) -> Result<()> {
        self.devices
            .acquire(device_id)
            .map_err(|e| Error::resource("input device", e))?;
        self.chain.rebuild(self.selection)?;
        info!("Input device: {device_id}");
        Ok(())
    }

    pub fn toggle_convolution(&mut self, enabled: bool) -> Result<()> {
        let previous = self.chain.convolution_enabled();
        self.chain.set_convolution_enabled(enabled);
        if let Err(e) = self.chain.rebuild(self.selection) {
            self.chain.set_convolution_enabled(previous);
            return Err(e);
        }
        info!("Convolution {}", if enabled { "enabled" } else { "disabled" });
        Ok(())
    }

    pub fn reset_calibration(&mut self) {
        self.range.reset();
        debug!("Feature range reset");
    }

    pub fn handle(&mut self, command: Command) -> Result<()> {
        match command {
            Command::SelectEffect(effect) => self.select_effect(effect),
            Command::SetInputDevice(device_id) => self.set_input_device(&device_id),
            Command::ToggleConvolution(enabled) => self.toggle_convolution(enabled),
            Command::ResetCalibration => {
                self.reset_calibration();
                Ok(())
            }
        }
    }

    /// Measures the tracked region, normalises it and writes the selected parameter.
    ///
    /// Frames without the region, with an unmeasurable extent, or arriving before the
    /// first chain are skipped.
    pub fn on_frame(&mut self, frame: &FeatureFrame) -> Result<Option<ParamWrite>> {
        let Some(measurement) = frame
            .vertical_extent(&self.region)
            .filter(|extent| extent.is_finite())
        else {
            return Ok(None);
        };
        let scale = self.range.observe(measurement);

        let Some((chain, backend)) = self.chain.live() else {
            return Ok(None);
        };
        let now = backend.current_time();
        self.modulator
            .apply(self.selection, scale, chain, backend, now)
    }

    pub fn selection(&self) -> Effect {
        self.selection
    }

    pub fn range(&self) -> &RangeTracker {
        &self.range
    }

    pub fn chain(&self) -> Option<&EffectChain> {
        self.chain.chain()
    }

    pub fn chain_manager(&self) -> &EffectChainManager<G> {
        &self.chain
    }

    pub fn backend(&self) -> &G {
        self.chain.backend()
    }

    pub fn backend_mut(&mut self) -> &mut G {
        self.chain.backend_mut()
    }
}
