use std::f64::consts::TAU;
use std::mem;
use std::sync::Arc;

use realfft::{ComplexToReal, RealFftPlanner, RealToComplex};
use rustfft::num_complex::Complex;

use crate::fx::stages::{Param, Stage, StageKind};

const FRAME_SIZE: usize = 2048;
const HOP_SIZE: usize = FRAME_SIZE / 8;
const BINS: usize = FRAME_SIZE / 2 + 1;
const OUTPUT_RING: usize = FRAME_SIZE * 2;
/// Expected phase advance per hop for bin 1.
const HOP_PHASE: f64 = TAU * HOP_SIZE as f64 / FRAME_SIZE as f64;

/// Phase-vocoder pitch shifter driven by a frequency ratio.
///
/// Every hop, the last frame of input is analysed, each output bin `j` takes the
/// interpolated content of input bin `j / ratio`, and the spectrum is resynthesised with
/// overlap-add. Bins around a spectral peak keep their analysed phase relation to the
/// peak (region-of-influence locking), which avoids the smeared "phasey" sound of a
/// plain vocoder.
///
/// The ratio is read once per block, so a parameter write never lands mid-hop. Building
/// the FFT plans is the expensive part, so the asset loader constructs the stage once.
pub struct PitchShiftStage {
    ratio: f64,

    forward: Arc<dyn RealToComplex<f32>>,
    inverse: Arc<dyn ComplexToReal<f32>>,
    window: Vec<f32>,

    input: Vec<f32>,
    input_pos: usize,
    hop_fill: usize,

    output: Vec<f32>,
    read_pos: usize,
    write_pos: usize,

    analysis: Analysis,
    synthesis: Synthesis,
}

/// Per-bin state of the analysed frame.
struct Analysis {
    frame: Vec<f32>,
    spectrum: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
    last_phase: Vec<f64>,
    magnitude: Vec<f64>,
    /// Phase advance per hop, from the measured instantaneous frequency.
    advance: Vec<f64>,
    phase: Vec<f64>,
}

/// Per-bin state of the shifted frame.
struct Synthesis {
    magnitude: Vec<f64>,
    phase: Vec<f64>,
    running_phase: Vec<f64>,
    peaks: Vec<usize>,
    spectrum: Vec<Complex<f32>>,
    frame: Vec<f32>,
    scratch: Vec<Complex<f32>>,
}

impl PitchShiftStage {
    pub const MIN_RATIO: f32 = 0.25;
    pub const MAX_RATIO: f32 = 4.0;

    pub fn new() -> Self {
        let mut planner = RealFftPlanner::<f32>::new();
        let forward = planner.plan_fft_forward(FRAME_SIZE);
        let inverse = planner.plan_fft_inverse(FRAME_SIZE);

        let window = (0..FRAME_SIZE)
            .map(|i| (0.5 - 0.5 * (TAU * i as f64 / FRAME_SIZE as f64).cos()) as f32)
            .collect();

        let analysis = Analysis {
            frame: vec![0.0; FRAME_SIZE],
            spectrum: forward.make_output_vec(),
            scratch: forward.make_scratch_vec(),
            last_phase: vec![0.0; BINS],
            magnitude: vec![0.0; BINS],
            advance: vec![0.0; BINS],
            phase: vec![0.0; BINS],
        };
        let synthesis = Synthesis {
            magnitude: vec![0.0; BINS],
            phase: vec![0.0; BINS],
            running_phase: vec![0.0; BINS],
            peaks: Vec::with_capacity(BINS),
            spectrum: inverse.make_input_vec(),
            frame: vec![0.0; FRAME_SIZE],
            scratch: inverse.make_scratch_vec(),
        };

        Self {
            ratio: 1.0,
            forward,
            inverse,
            window,
            input: vec![0.0; FRAME_SIZE],
            input_pos: 0,
            hop_fill: 0,
            output: vec![0.0; OUTPUT_RING],
            read_pos: 0,
            write_pos: HOP_SIZE,
            analysis,
            synthesis,
        }
    }

    /// Samples between an input and its shifted output.
    pub const fn latency() -> usize {
        FRAME_SIZE - HOP_SIZE
    }

    fn exchange(&mut self, chunk: &mut [f32]) {
        for sample in chunk {
            self.input[self.input_pos] = *sample;
            self.input_pos = (self.input_pos + 1) % FRAME_SIZE;

            *sample = self.output[self.read_pos];
            self.output[self.read_pos] = 0.0;
            self.read_pos = (self.read_pos + 1) % OUTPUT_RING;
        }
    }

    fn hop(&mut self, ratio: f64) {
        // Oldest sample first.
        let (newer, older) = self.input.split_at(self.input_pos);
        for ((slot, sample), w) in self
            .analysis
            .frame
            .iter_mut()
            .zip(older.iter().chain(newer))
            .zip(&self.window)
        {
            *slot = sample * w;
        }

        if self
            .forward
            .process_with_scratch(
                &mut self.analysis.frame,
                &mut self.analysis.spectrum,
                &mut self.analysis.scratch,
            )
            .is_err()
        {
            return;
        }
        self.analysis.measure();
        self.synthesis.shift(&self.analysis, ratio);
        self.synthesis.lock_to_peaks(&self.analysis, ratio);
        self.synthesis.build_spectrum();

        if self
            .inverse
            .process_with_scratch(
                &mut self.synthesis.spectrum,
                &mut self.synthesis.frame,
                &mut self.synthesis.scratch,
            )
            .is_err()
        {
            return;
        }

        // Hann squared at 8x overlap sums to 3.
        let scale = 1.0 / (FRAME_SIZE as f32 * 3.0);
        for (i, (sample, w)) in self.synthesis.frame.iter().zip(&self.window).enumerate() {
            self.output[(self.write_pos + i) % OUTPUT_RING] += sample * w * scale;
        }
        self.write_pos = (self.write_pos + HOP_SIZE) % OUTPUT_RING;
    }
}

impl Analysis {
    fn measure(&mut self) {
        for (k, bin) in self.spectrum.iter().enumerate() {
            let phase = f64::from(bin.im).atan2(f64::from(bin.re));
            let expected = k as f64 * HOP_PHASE;
            let deviation = phase - self.last_phase[k] - expected;
            let wrapped = deviation - (deviation / TAU).round() * TAU;

            self.last_phase[k] = phase;
            self.phase[k] = phase;
            self.magnitude[k] = f64::from(bin.norm());
            self.advance[k] = expected + wrapped;
        }
    }
}

impl Synthesis {
    fn shift(&mut self, analysis: &Analysis, ratio: f64) {
        self.magnitude.fill(0.0);

        for j in 0..BINS {
            let source = j as f64 / ratio;
            let k = source as usize;
            if k + 1 >= BINS {
                continue;
            }
            let frac = source - k as f64;
            let lerp = |v: &[f64]| (v[k + 1] - v[k]).mul_add(frac, v[k]);

            self.magnitude[j] = lerp(&analysis.magnitude);
            self.running_phase[j] += lerp(&analysis.advance) * ratio;
            self.phase[j] = self.running_phase[j];
        }

        // Keep the frame energy where it was before the shift.
        let energy_in: f64 = analysis.magnitude.iter().map(|m| m * m).sum();
        let energy_out: f64 = self.magnitude.iter().map(|m| m * m).sum();
        if energy_out > 1e-20 {
            let gain = (energy_in / energy_out).sqrt();
            self.magnitude.iter_mut().for_each(|m| *m *= gain);
        }
    }

    /// Splits the spectrum at the quietest bin between neighbouring peaks, and gives
    /// every bin in a peak's region the phase offset it had to that peak on analysis.
    fn lock_to_peaks(&mut self, analysis: &Analysis, ratio: f64) {
        self.peaks.clear();
        self.peaks.extend((1..BINS - 1).filter(|&j| {
            let m = self.magnitude[j];
            m > 0.0 && m >= self.magnitude[j - 1] && m > self.magnitude[j + 1]
        }));
        if self.peaks.is_empty() {
            return;
        }

        let source = |j: usize| ((j as f64 / ratio) as usize).min(BINS - 1);
        let mut start = 0;
        for (n, &peak) in self.peaks.iter().enumerate() {
            let end = match self.peaks.get(n + 1) {
                Some(&next) => (peak..next)
                    .min_by(|&a, &b| self.magnitude[a].total_cmp(&self.magnitude[b]))
                    .map_or(next, |trough| trough + 1),
                None => BINS,
            };

            let peak_phase = self.phase[peak];
            let peak_source = analysis.phase[source(peak)];
            for j in (start..end).filter(|&j| j != peak) {
                self.phase[j] = peak_phase + analysis.phase[source(j)] - peak_source;
            }
            start = end;
        }
    }

    fn build_spectrum(&mut self) {
        let polar = self.magnitude.iter().zip(&self.phase);
        for (bin, (&m, &phase)) in self.spectrum.iter_mut().zip(polar) {
            *bin = if m > 0.0 {
                let (sin, cos) = phase.sin_cos();
                Complex::new((m * cos) as f32, (m * sin) as f32)
            } else {
                Complex::new(0.0, 0.0)
            };
        }
        self.spectrum[0].im = 0.0;
        self.spectrum[BINS - 1].im = 0.0;
    }
}

impl Default for PitchShiftStage {
    fn default() -> Self {
        Self::new()
    }
}

impl Stage for PitchShiftStage {
    fn kind(&self) -> StageKind {
        StageKind::PitchShifter
    }

    fn process(&mut self, input: f32) -> f32 {
        let mut sample = [input];
        self.process_block(&mut sample);
        sample[0]
    }

    fn process_block(&mut self, block: &mut [f32]) {
        let ratio = self.ratio;

        let mut rest = block;
        while !rest.is_empty() {
            let take = (HOP_SIZE - self.hop_fill).min(rest.len());
            let (chunk, tail) = mem::take(&mut rest).split_at_mut(take);
            self.exchange(chunk);

            self.hop_fill += take;
            if self.hop_fill == HOP_SIZE {
                self.hop_fill = 0;
                self.hop(ratio);
            }
            rest = tail;
        }
    }

    fn set_parameter(&mut self, param: Param, value: f32) -> Result<(), &'static str> {
        match param {
            Param::PitchRatio => {
                if (Self::MIN_RATIO..=Self::MAX_RATIO).contains(&value) {
                    self.ratio = f64::from(value);
                    Ok(())
                } else {
                    Err("Pitch ratio must be between 0.25 and 4.0")
                }
            }
            _ => Err("Unknown parameter"),
        }
    }

    fn get_parameter(&self, param: Param) -> Result<f32, &'static str> {
        match param {
            Param::PitchRatio => Ok(self.ratio as f32),
            _ => Err("Unknown parameter"),
        }
    }
}
