pub mod bandpass;
pub mod convolution;
pub mod level;
pub mod pitch_shifter;
pub mod saturator;
pub mod splitter;

use std::fmt;

/// What a stage does, independent of where it sits in the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    Splitter,
    BandpassFilter,
    PitchShifter,
    Convolution,
    Saturator,
    Gain,
}

/// Live-adjustable parameter slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Param {
    Gain,
    Frequency,
    Q,
    PitchRatio,
}

impl fmt::Display for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gain => write!(f, "gain"),
            Self::Frequency => write!(f, "frequency"),
            Self::Q => write!(f, "q"),
            Self::PitchRatio => write!(f, "pitch_ratio"),
        }
    }
}

// The core trait that all processing stages must implement
pub trait Stage: Send + Sync + 'static {
    fn kind(&self) -> StageKind;

    // Process a single sample through this stage
    fn process(&mut self, input: f32) -> f32;

    // Process a block of samples through this stage
    fn process_block(&mut self, input: &mut [f32]) {
        for sample in input.iter_mut() {
            *sample = self.process(*sample);
        }
    }

    fn set_parameter(&mut self, param: Param, value: f32) -> Result<(), &'static str>;

    fn get_parameter(&self, param: Param) -> Result<f32, &'static str>;
}
