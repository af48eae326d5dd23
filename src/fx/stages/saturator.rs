use crate::fx::curve::distortion_curve;
use crate::fx::stages::{Param, Stage, StageKind};

/// Wave-shaper that maps each sample through a fixed transfer table.
///
/// Lookup follows the usual wave-shaper convention: `x` in [-1, 1] lands on
/// `(N - 1) / 2 * (x + 1)` with linear interpolation; anything outside clamps to the ends.
pub struct SaturatorStage {
    curve: Vec<f32>,
}

impl SaturatorStage {
    pub fn new(amount: f32, sample_count: usize) -> Self {
        Self::from_curve(distortion_curve(amount, sample_count.max(2)))
    }

    pub fn from_curve(curve: Vec<f32>) -> Self {
        Self { curve }
    }

    pub fn curve(&self) -> &[f32] {
        &self.curve
    }
}

impl Stage for SaturatorStage {
    fn kind(&self) -> StageKind {
        StageKind::Saturator
    }

    #[inline]
    fn process(&mut self, input: f32) -> f32 {
        let len = self.curve.len();
        match len {
            0 => return input,
            1 => return self.curve[0],
            _ => {}
        }
        if input.is_nan() {
            return 0.0;
        }

        let last = len - 1;
        let position = last as f32 * 0.5 * (input.clamp(-1.0, 1.0) + 1.0);
        let index = position as usize;
        if index >= last {
            return self.curve[last];
        }

        let frac = position - index as f32;
        let a = self.curve[index];
        let b = self.curve[index + 1];
        (b - a).mul_add(frac, a)
    }

    fn set_parameter(&mut self, _param: Param, _value: f32) -> Result<(), &'static str> {
        Err("Saturator curve is fixed")
    }

    fn get_parameter(&self, _param: Param) -> Result<f32, &'static str> {
        Err("Saturator curve is fixed")
    }
}
