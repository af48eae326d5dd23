use anyhow::{Result, anyhow};
use realfft::{ComplexToReal, RealFftPlanner, RealToComplex};
use rustfft::num_complex::Complex;
use std::sync::Arc;

use crate::fx::stages::{Param, Stage, StageKind};

/// Taps handled in the time domain, and the size of each tail partition.
const PARTITION: usize = 256;
const FFT_SIZE: usize = PARTITION * 2;
const BINS: usize = FFT_SIZE / 2 + 1;

/// Convolution with a cabinet impulse response, without added latency.
///
/// The first [`PARTITION`] taps run as a direct FIR. The rest of the response is split
/// into equal partitions convolved by uniformly partitioned overlap-save: every time a
/// partition's worth of input has arrived, the tail output for the next partition is
/// computed, exactly when the direct head stops covering it.
///
/// All state outlives rewiring, so switching effects does not cut off the cabinet tail.
pub struct ConvolutionStage {
    head: Vec<f32>,
    head_history: Vec<f32>,
    head_pos: usize,

    tail: Option<Tail>,
    taps: usize,
}

struct Tail {
    forward: Arc<dyn RealToComplex<f32>>,
    inverse: Arc<dyn ComplexToReal<f32>>,

    /// Spectra of the tail partitions, earliest first.
    partitions: Vec<Vec<Complex<f32>>>,
    /// Spectra of past input windows, `newest` is the latest.
    spectra: Vec<Vec<Complex<f32>>>,
    newest: usize,

    /// Previous and current input partition, back to back.
    window: Vec<f32>,
    filled: usize,
    /// Tail output for the partition being played.
    output: Vec<f32>,

    time: Vec<f32>,
    accumulator: Vec<Complex<f32>>,
    forward_scratch: Vec<Complex<f32>>,
    inverse_scratch: Vec<Complex<f32>>,
}

impl ConvolutionStage {
    /// Two seconds at 48kHz. Longer responses are truncated.
    pub const MAX_TAPS: usize = 96_000;

    pub fn new(impulse_response: &[f32]) -> Result<Self> {
        let taps = impulse_response.len().min(Self::MAX_TAPS);
        let response = &impulse_response[..taps];
        let (head, tail) = response.split_at(taps.min(PARTITION));

        Ok(Self {
            head: head.to_vec(),
            head_history: vec![0.0; head.len()],
            head_pos: 0,
            tail: if tail.is_empty() {
                None
            } else {
                Some(Tail::new(tail)?)
            },
            taps,
        })
    }

    pub fn tap_count(&self) -> usize {
        self.taps
    }

    pub fn partition_count(&self) -> usize {
        self.tail.as_ref().map_or(0, |t| t.partitions.len())
    }

    fn head_output(&mut self, input: f32) -> f32 {
        self.head_history[self.head_pos] = input;

        // Newest sample pairs with tap 0, walking the ring backwards.
        let (newer, older) = self.head_history.split_at(self.head_pos + 1);
        let output = self
            .head
            .iter()
            .zip(newer.iter().rev().chain(older.iter().rev()))
            .map(|(tap, sample)| tap * sample)
            .sum();

        self.head_pos = (self.head_pos + 1) % self.head.len();
        output
    }
}

impl Tail {
    fn new(response: &[f32]) -> Result<Self> {
        let mut planner = RealFftPlanner::<f32>::new();
        let forward = planner.plan_fft_forward(FFT_SIZE);
        let inverse = planner.plan_fft_inverse(FFT_SIZE);
        let mut forward_scratch = forward.make_scratch_vec();

        let mut time = vec![0.0; FFT_SIZE];
        let partitions = response
            .chunks(PARTITION)
            .map(|chunk| {
                time.fill(0.0);
                time[..chunk.len()].copy_from_slice(chunk);
                let mut spectrum = forward.make_output_vec();
                forward
                    .process_with_scratch(&mut time, &mut spectrum, &mut forward_scratch)
                    .map_err(|e| anyhow!("failed to transform impulse response: {e}"))?;
                Ok(spectrum)
            })
            .collect::<Result<Vec<_>>>()?;

        let count = partitions.len();
        Ok(Self {
            inverse_scratch: inverse.make_scratch_vec(),
            forward,
            inverse,
            partitions,
            spectra: vec![vec![Complex::new(0.0, 0.0); BINS]; count],
            newest: 0,
            window: vec![0.0; FFT_SIZE],
            filled: 0,
            output: vec![0.0; PARTITION],
            time,
            accumulator: vec![Complex::new(0.0, 0.0); BINS],
            forward_scratch,
        })
    }

    fn process(&mut self, input: f32) -> f32 {
        let out = self.output[self.filled];
        self.window[PARTITION + self.filled] = input;
        self.filled += 1;

        if self.filled == PARTITION {
            self.filled = 0;
            self.convolve_partition();
            self.window.copy_within(PARTITION.., 0);
        }
        out
    }

    fn convolve_partition(&mut self) {
        self.newest = (self.newest + 1) % self.spectra.len();
        self.time.copy_from_slice(&self.window);
        if self
            .forward
            .process_with_scratch(
                &mut self.time,
                &mut self.spectra[self.newest],
                &mut self.forward_scratch,
            )
            .is_err()
        {
            self.output.fill(0.0);
            return;
        }

        let count = self.spectra.len();
        self.accumulator.fill(Complex::new(0.0, 0.0));
        for (age, partition) in self.partitions.iter().enumerate() {
            let spectrum = &self.spectra[(self.newest + count - age) % count];
            for ((acc, x), h) in self.accumulator.iter_mut().zip(spectrum).zip(partition) {
                *acc += x * h;
            }
        }
        self.accumulator[0].im = 0.0;
        self.accumulator[BINS - 1].im = 0.0;

        if self
            .inverse
            .process_with_scratch(
                &mut self.accumulator,
                &mut self.time,
                &mut self.inverse_scratch,
            )
            .is_err()
        {
            self.output.fill(0.0);
            return;
        }

        // Overlap-save: only the second half is free of circular wrap.
        let scale = 1.0 / FFT_SIZE as f32;
        for (out, &sample) in self.output.iter_mut().zip(&self.time[PARTITION..]) {
            *out = sample * scale;
        }
    }
}

impl Stage for ConvolutionStage {
    fn kind(&self) -> StageKind {
        StageKind::Convolution
    }

    #[inline]
    fn process(&mut self, input: f32) -> f32 {
        if self.head.is_empty() {
            return input;
        }

        let head = self.head_output(input);
        let tail = self.tail.as_mut().map_or(0.0, |t| t.process(input));
        head + tail
    }

    fn set_parameter(&mut self, _param: Param, _value: f32) -> Result<(), &'static str> {
        Err("Convolution has no parameters")
    }

    fn get_parameter(&self, _param: Param) -> Result<f32, &'static str> {
        Err("Convolution has no parameters")
    }
}
