use anyhow::{Context, Result, anyhow};
use hound::WavReader;
use log::debug;
use std::path::Path;

use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

const MAX_IR_LENGTH_SECONDS: u64 = 5;
/// Peak level the decoded response is normalised to.
const NORMALISED_PEAK: f32 = 0.9;

/// Decodes a WAV impulse response into a mono buffer at `target_sample_rate`.
///
/// Multi-channel files are averaged down to one channel and the result is peak
/// normalised so cabinets of different loudness sit at the same level.
pub fn load_impulse_response(path: &Path, target_sample_rate: usize) -> Result<Vec<f32>> {
    let reader = WavReader::open(path)
        .with_context(|| format!("failed to open impulse response {}", path.display()))?;
    let spec = reader.spec();

    if reader.duration() as u64 > spec.sample_rate as u64 * MAX_IR_LENGTH_SECONDS {
        return Err(anyhow!(
            "impulse response is too long: {:.2} seconds (max {})",
            reader.duration() as f64 / spec.sample_rate as f64,
            MAX_IR_LENGTH_SECONDS
        ));
    }

    let samples: Vec<f32> = if spec.sample_format == hound::SampleFormat::Float {
        reader
            .into_samples::<f32>()
            .collect::<Result<Vec<_>, _>>()
            .context("failed to read float samples")?
    } else {
        let max_val = (1_i64 << (spec.bits_per_sample - 1)) as f32;
        reader
            .into_samples::<i32>()
            .map(|s| s.map(|v| v as f32 / max_val))
            .collect::<Result<Vec<_>, _>>()
            .context("failed to read integer samples")?
    };

    let mono = mixdown(samples, spec.channels as usize);
    if mono.is_empty() {
        return Err(anyhow!("impulse response {} is empty", path.display()));
    }

    let mut response = if spec.sample_rate as usize != target_sample_rate {
        debug!(
            "Resampling IR from {} Hz to {} Hz",
            spec.sample_rate, target_sample_rate
        );
        resample(&mono, spec.sample_rate, target_sample_rate as u32)?
    } else {
        mono
    };

    normalise(&mut response);
    Ok(response)
}

fn mixdown(samples: Vec<f32>, channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return samples;
    }
    samples
        .chunks(channels)
        .map(|c| c.iter().sum::<f32>() / channels as f32)
        .collect()
}

fn normalise(samples: &mut [f32]) {
    let peak = samples.iter().fold(0.0_f32, |m, &x| m.max(x.abs()));
    if peak > 0.0 {
        let g = NORMALISED_PEAK / peak;
        for s in samples {
            *s *= g;
        }
    }
}

/// resample takes input samples at a given sample_rate and returns them in the target sample_rate
fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    if from_rate == to_rate {
        return Ok(samples.to_vec());
    }

    let ratio = to_rate as f64 / from_rate as f64;

    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };

    let mut resampler = SincFixedIn::<f32>::new(ratio, 1.0, params, samples.len(), 1)?;

    let input = vec![samples.to_vec()];
    let output = resampler.process(&input, None)?;

    output
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("resampling produced no channels"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use hound::{SampleFormat, WavSpec, WavWriter};
    use tempfile::TempDir;

    fn write_wav(path: &Path, channels: u16, sample_rate: u32, frames: &[i16]) -> Result<()> {
        let spec = WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(path, spec)?;
        for &s in frames {
            writer.write_sample(s)?;
        }
        writer.finalize()?;
        Ok(())
    }

    #[test]
    fn test_decodes_and_normalises_mono() -> Result<()> {
        let tmp = TempDir::new()?;
        let path = tmp.path().join("cab.wav");
        write_wav(&path, 1, 48000, &[16384, -8192, 4096, 0])?;

        let ir = load_impulse_response(&path, 48000)?;

        assert_eq!(ir.len(), 4);
        assert!((ir[0] - 0.9).abs() < 1e-4);
        assert!((ir[1] + 0.45).abs() < 1e-4);
        assert!((ir[2] - 0.225).abs() < 1e-4);
        Ok(())
    }

    #[test]
    fn test_stereo_is_mixed_down() -> Result<()> {
        let tmp = TempDir::new()?;
        let path = tmp.path().join("stereo.wav");
        // Interleaved L/R: the right channel cancels half of the left.
        write_wav(&path, 2, 48000, &[16000, -8000, 8000, -4000])?;

        let ir = load_impulse_response(&path, 48000)?;

        assert_eq!(ir.len(), 2);
        assert!((ir[0] - 0.9).abs() < 1e-4);
        assert!((ir[1] - 0.45).abs() < 1e-4);
        Ok(())
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let result = load_impulse_response(Path::new("/nonexistent/ir.wav"), 48000);
        assert!(result.is_err());
    }

    #[test]
    fn test_resample_halves_length() -> Result<()> {
        let input: Vec<f32> = (0..48000).map(|x| (x as f32).sin()).collect();
        let output = resample(&input, 48000, 24000)?;

        // It's not guaranteed to be exactly half but it should be approximately
        assert!(output.len() > 23000 && output.len() < 25000);
        Ok(())
    }

    #[test]
    fn test_resample_same_rate_unchanged() -> Result<()> {
        let input: Vec<f32> = (0..1000).map(|x| (x as f32).sin()).collect();
        let output = resample(&input, 48000, 48000)?;

        assert_eq!(output, input);
        Ok(())
    }
}
