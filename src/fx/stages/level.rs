use crate::fx::stages::{Param, Stage, StageKind};

pub struct LevelStage {
    gain: f32,
}

impl LevelStage {
    pub const MAX_GAIN: f32 = 10.0;

    pub fn new(gain: f32) -> Self {
        Self {
            gain: gain.clamp(0.0, Self::MAX_GAIN),
        }
    }
}

impl Stage for LevelStage {
    fn kind(&self) -> StageKind {
        StageKind::Gain
    }

    fn process(&mut self, input: f32) -> f32 {
        input * self.gain
    }

    fn set_parameter(&mut self, param: Param, value: f32) -> Result<(), &'static str> {
        match param {
            Param::Gain => {
                if (0.0..=Self::MAX_GAIN).contains(&value) {
                    self.gain = value;
                    Ok(())
                } else {
                    Err("Gain must be between 0.0 and 10.0")
                }
            }
            _ => Err("Unknown parameter"),
        }
    }

    fn get_parameter(&self, param: Param) -> Result<f32, &'static str> {
        match param {
            Param::Gain => Ok(self.gain),
            _ => Err("Unknown parameter"),
        }
    }
}
