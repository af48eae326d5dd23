use std::f32::consts::PI;

/// Drive used when the requested amount is not a positive number.
pub const DEFAULT_AMOUNT: f32 = 50.0;

const DEGREES: f32 = PI / 180.0;

/// Builds the saturation transfer table for the overdrive wave-shaper.
///
/// Entry `i` maps `x = 2i/N - 1` through `((3 + k) * x * 20deg) / (PI + k|x|)`.
/// Non-positive or non-finite amounts fall back to [`DEFAULT_AMOUNT`].
pub fn distortion_curve(amount: f32, sample_count: usize) -> Vec<f32> {
    let k = if amount.is_finite() && amount > 0.0 {
        amount
    } else {
        DEFAULT_AMOUNT
    };

    (0..sample_count)
        .map(|i| {
            let x = (i as f32 * 2.0) / sample_count as f32 - 1.0;
            ((3.0 + k) * x * 20.0 * DEGREES) / k.mul_add(x.abs(), PI)
        })
        .collect()
}
