use crate::fx::stages::{Param, Stage, StageKind};
use std::f32::consts::PI;

/// Constant 0 dB peak band-pass biquad (RBJ cookbook), swept by the wah modulation.
pub struct BandpassStage {
    frequency: f32,
    q: f32,
    sample_rate: f32,

    b0: f32,
    b2: f32,
    a1: f32,
    a2: f32,

    x1: f32,
    x2: f32,
    y1: f32,
    y2: f32,
}

impl BandpassStage {
    /// A zero centre frequency collapses the poles onto the unit circle, so the
    /// coefficients are computed from at least this.
    const MIN_FREQUENCY_HZ: f32 = 10.0;
    const MIN_Q: f32 = 0.0001;

    pub fn new(frequency: f32, q: f32, sample_rate: f32) -> Self {
        let mut stage = Self {
            frequency,
            q,
            sample_rate,
            b0: 0.0,
            b2: 0.0,
            a1: 0.0,
            a2: 0.0,
            x1: 0.0,
            x2: 0.0,
            y1: 0.0,
            y2: 0.0,
        };
        stage.update_coefficients();
        stage
    }

    fn update_coefficients(&mut self) {
        let nyquist_guard = self.sample_rate * 0.49;
        let frequency = self.frequency.clamp(Self::MIN_FREQUENCY_HZ, nyquist_guard);
        let q = self.q.max(Self::MIN_Q);

        let omega = 2.0 * PI * frequency / self.sample_rate;
        let (sin_omega, cos_omega) = omega.sin_cos();
        let alpha = sin_omega / (2.0 * q);
        let a0 = 1.0 + alpha;

        self.b0 = alpha / a0;
        self.b2 = -alpha / a0;
        self.a1 = -2.0 * cos_omega / a0;
        self.a2 = (1.0 - alpha) / a0;
    }
}

impl Stage for BandpassStage {
    fn kind(&self) -> StageKind {
        StageKind::BandpassFilter
    }

    fn process(&mut self, input: f32) -> f32 {
        let output =
            self.b0.mul_add(input, self.b2 * self.x2) - self.a1 * self.y1 - self.a2 * self.y2;

        self.x2 = self.x1;
        self.x1 = input;
        self.y2 = self.y1;
        self.y1 = output;

        output
    }

    fn set_parameter(&mut self, param: Param, value: f32) -> Result<(), &'static str> {
        match param {
            Param::Frequency => {
                if (0.0..=20000.0).contains(&value) {
                    self.frequency = value;
                    self.update_coefficients();
                    Ok(())
                } else {
                    Err("Frequency must be between 0Hz and 20kHz")
                }
            }
            Param::Q => {
                if (0.0001..=1000.0).contains(&value) {
                    self.q = value;
                    self.update_coefficients();
                    Ok(())
                } else {
                    Err("Q must be between 0.0001 and 1000")
                }
            }
            _ => Err("Unknown parameter"),
        }
    }

    fn get_parameter(&self, param: Param) -> Result<f32, &'static str> {
        match param {
            Param::Frequency => Ok(self.frequency),
            Param::Q => Ok(self.q),
            _ => Err("Unknown parameter"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine_rms(stage: &mut BandpassStage, freq: f32, sample_rate: f32) -> f32 {
        // Warm up so the transient does not dominate the measurement.
        let n = 4800;
        let mut acc = 0.0;
        for i in 0..n * 2 {
            let t = i as f32 / sample_rate;
            let out = stage.process((2.0 * PI * freq * t).sin());
            if i >= n {
                acc += out * out;
            }
        }
        (acc / n as f32).sqrt()
    }

    #[test]
    fn passes_centre_and_attenuates_far_frequencies() {
        let sr = 48_000.0;

        let mut centre = BandpassStage::new(1_000.0, 1.0, sr);
        let centre_rms = sine_rms(&mut centre, 1_000.0, sr);

        let mut far = BandpassStage::new(1_000.0, 1.0, sr);
        let far_rms = sine_rms(&mut far, 12_000.0, sr);

        // Unit-amplitude sine has an RMS of ~0.707.
        assert!(
            centre_rms > 0.6,
            "centre frequency attenuated: rms={centre_rms}"
        );
        assert!(
            far_rms < centre_rms * 0.3,
            "far frequency not attenuated: rms={far_rms}"
        );
    }

    #[test]
    fn zero_frequency_stays_stable() {
        let mut stage = BandpassStage::new(1_000.0, 1.0, 48_000.0);
        stage.set_parameter(Param::Frequency, 0.0).unwrap();

        for _ in 0..48_000 {
            let out = stage.process(1.0);
            assert!(out.is_finite() && out.abs() < 10.0, "unstable output {out}");
        }
        assert_eq!(stage.get_parameter(Param::Frequency), Ok(0.0));
    }

    #[test]
    fn rejects_out_of_range_values() {
        let mut stage = BandpassStage::new(1_000.0, 1.0, 48_000.0);
        assert!(stage.set_parameter(Param::Frequency, -1.0).is_err());
        assert!(stage.set_parameter(Param::Frequency, 30_000.0).is_err());
        assert!(stage.set_parameter(Param::Gain, 1.0).is_err());
    }
}
