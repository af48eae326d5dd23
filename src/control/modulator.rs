use log::trace;

use crate::control::selection::Effect;
use crate::error::Result;
use crate::fx::chain::{EffectChain, StageRole};
use crate::fx::graph::{GraphBackend, ParamWrite};
use crate::fx::stages::Param;

pub const MAX_VOLUME_GAIN: f32 = 1.5;
pub const MAX_WAH_FREQUENCY_HZ: f32 = 2200.0;
pub const MAX_PITCH_RATIO: f32 = 3.0;
/// Shifting further down than this is too distorted to be musical.
pub const MIN_PITCH_RATIO: f32 = 0.5;
/// Ratio changes smaller than this are not applied.
pub const PITCH_HYSTERESIS: f32 = 0.15;

/// Pitch ratio state carried between frames.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ModulationMemory {
    /// Most recently computed ratio, applied or not. `None` until the first frame.
    pub last_ratio: Option<f32>,
}

/// Turns a normalised scale into one parameter write for the selected effect.
#[derive(Debug, Clone, Default)]
pub struct ParameterModulator {
    memory: ModulationMemory,
}

/// Quantises to 0.1 steps with a floor of [`MIN_PITCH_RATIO`].
pub fn pitch_ratio(scale: f32) -> f32 {
    let raw = scale.clamp(0.0, 1.0) * MAX_PITCH_RATIO;
    ((raw * 10.0).round() / 10.0).max(MIN_PITCH_RATIO)
}

impl ParameterModulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_memory(memory: ModulationMemory) -> Self {
        Self { memory }
    }

    pub fn memory(&self) -> ModulationMemory {
        self.memory
    }

    /// Writes the selected effect's parameter at `now`.
    ///
    /// Returns the write issued, or `None` when pitch hysteresis suppressed it or the
    /// target stage is not on the chain.
    pub fn apply<G: GraphBackend + ?Sized>(
        &mut self,
        selection: Effect,
        scale: f32,
        chain: &EffectChain,
        backend: &mut G,
        now: f64,
    ) -> Result<Option<ParamWrite>> {
        let scale = if scale.is_finite() {
            scale.clamp(0.0, 1.0)
        } else {
            0.0
        };

        let (role, param, value) = match selection {
            Effect::Volume => (StageRole::OutputGain, Param::Gain, scale * MAX_VOLUME_GAIN),
            Effect::Wah => (StageRole::Wah, Param::Frequency, scale * MAX_WAH_FREQUENCY_HZ),
            Effect::PitchShift => {
                let ratio = pitch_ratio(scale);
                let last = self.memory.last_ratio.replace(ratio);
                if let Some(last) = last
                    && (ratio - last).abs() < PITCH_HYSTERESIS
                {
                    trace!("Pitch ratio {ratio} within hysteresis of {last}");
                    return Ok(None);
                }
                (StageRole::PitchShifter, Param::PitchRatio, ratio)
            }
        };

        let Some(stage) = chain.find(role) else {
            trace!("{role:?} not on the chain, skipping");
            return Ok(None);
        };

        let write = ParamWrite {
            stage,
            param,
            value,
            at: now,
        };
        backend.schedule(write)?;
        Ok(Some(write))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fx::chain::{ChainStages, plan};
    use crate::fx::graph::{GraphOp, StageId};
    use crate::fx::stages::Stage;

    #[derive(Default)]
    struct Writes(Vec<ParamWrite>);

    impl GraphBackend for Writes {
        fn install(&mut self, _id: StageId, _stage: Box<dyn Stage>) -> Result<()> {
            Ok(())
        }

        fn rewire(&mut self, _ops: Vec<GraphOp>) -> Result<()> {
            Ok(())
        }

        fn schedule(&mut self, write: ParamWrite) -> Result<()> {
            self.0.push(write);
            Ok(())
        }

        fn current_time(&self) -> f64 {
            0.0
        }
    }

    fn stages() -> ChainStages {
        ChainStages {
            splitter: StageId::new(0),
            pitch_shifter: StageId::new(1),
            wah: StageId::new(2),
            convolution: StageId::new(3),
            makeup_gain: StageId::new(4),
            saturator: StageId::new(5),
            output_gain: StageId::new(6),
        }
    }

    #[test]
    fn pitch_ratio_is_quantised_and_floored() {
        for i in 0..=1000 {
            let ratio = pitch_ratio(i as f32 / 1000.0);
            assert!(ratio >= MIN_PITCH_RATIO);
            let tenths = ratio * 10.0;
            assert!((tenths - tenths.round()).abs() < 1e-4, "{ratio} not a 0.1 step");
        }
        assert_eq!(pitch_ratio(0.0), 0.5);
        assert_eq!(pitch_ratio(1.0), 3.0);
    }

    #[test]
    fn volume_writes_every_frame() -> anyhow::Result<()> {
        let chain = plan(Effect::Volume, true, &stages());
        let mut backend = Writes::default();
        let mut modulator = ParameterModulator::new();

        for (scale, now) in [(0.0, 0.1), (0.5, 0.2), (1.0, 0.3)] {
            modulator.apply(Effect::Volume, scale, &chain, &mut backend, now)?;
        }

        let values: Vec<f32> = backend.0.iter().map(|w| w.value).collect();
        let times: Vec<f64> = backend.0.iter().map(|w| w.at).collect();
        assert_eq!(values, vec![0.0, 0.75, 1.5]);
        assert_eq!(times, vec![0.1, 0.2, 0.3]);
        assert!(backend.0.iter().all(|w| w.stage == StageId::new(6)));
        Ok(())
    }

    #[test]
    fn wah_sweeps_filter_frequency() -> anyhow::Result<()> {
        let chain = plan(Effect::Wah, true, &stages());
        let mut backend = Writes::default();
        let mut modulator = ParameterModulator::new();

        let write = modulator
            .apply(Effect::Wah, 0.5, &chain, &mut backend, 0.0)?
            .expect("wah write");
        assert_eq!(write.stage, StageId::new(2));
        assert_eq!(write.param, Param::Frequency);
        assert_eq!(write.value, 1100.0);
        Ok(())
    }

    #[test]
    fn first_pitch_frame_always_writes() -> anyhow::Result<()> {
        let chain = plan(Effect::PitchShift, true, &stages());
        let mut backend = Writes::default();
        let mut modulator = ParameterModulator::new();

        let write = modulator.apply(Effect::PitchShift, 0.34, &chain, &mut backend, 0.0)?;
        assert_eq!(write.map(|w| w.value), Some(1.0));
        Ok(())
    }

    #[test]
    fn small_pitch_changes_are_suppressed() -> anyhow::Result<()> {
        let chain = plan(Effect::PitchShift, true, &stages());
        let mut backend = Writes::default();
        let mut modulator = ParameterModulator::with_memory(ModulationMemory {
            last_ratio: Some(1.0),
        });

        // 0.37 * 3 = 1.11 -> 1.1, a 0.1 step.
        let suppressed = modulator.apply(Effect::PitchShift, 0.37, &chain, &mut backend, 0.0)?;
        assert_eq!(suppressed, None);
        assert!(backend.0.is_empty());
        assert_eq!(modulator.memory().last_ratio, Some(1.1));

        let mut modulator = ParameterModulator::with_memory(ModulationMemory {
            last_ratio: Some(1.0),
        });
        // 0.4 * 3 = 1.2, a 0.2 step.
        let written = modulator.apply(Effect::PitchShift, 0.4, &chain, &mut backend, 0.0)?;
        assert_eq!(written.map(|w| w.value), Some(1.2));
        assert_eq!(backend.0.len(), 1);
        Ok(())
    }

    #[test]
    fn hysteresis_compares_against_last_computed_ratio() -> anyhow::Result<()> {
        let chain = plan(Effect::PitchShift, true, &stages());
        let mut backend = Writes::default();
        let mut modulator = ParameterModulator::with_memory(ModulationMemory {
            last_ratio: Some(1.0),
        });

        // 1.0 -> 1.1 (suppressed) -> 1.2 (only 0.1 from the computed 1.1, suppressed too)
        assert_eq!(
            modulator.apply(Effect::PitchShift, 0.37, &chain, &mut backend, 0.0)?,
            None
        );
        assert_eq!(
            modulator.apply(Effect::PitchShift, 0.4, &chain, &mut backend, 0.0)?,
            None
        );
        assert!(backend.0.is_empty());
        Ok(())
    }

    #[test]
    fn absent_stage_is_never_written() -> anyhow::Result<()> {
        // Chain built for volume has no wah filter.
        let chain = plan(Effect::Volume, true, &stages());
        let mut backend = Writes::default();
        let mut modulator = ParameterModulator::new();

        let write = modulator.apply(Effect::Wah, 0.8, &chain, &mut backend, 0.0)?;
        assert_eq!(write, None);
        assert!(backend.0.is_empty());
        Ok(())
    }
}
