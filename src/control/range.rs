/// Seed window for mouth height in pixels, observed on a typical webcam setup.
pub const DEFAULT_MIN: f32 = 15.0;
pub const DEFAULT_MAX: f32 = 60.0;

/// Expanding min/max window over a scalar feature, mapping samples onto [0, 1].
///
/// The window only ever widens. A single extreme sample therefore desensitises the
/// mapping for the rest of the session; [`RangeTracker::reset`] re-seeds it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RangeTracker {
    seed_min: f32,
    seed_max: f32,
    min_observed: f32,
    max_observed: f32,
}

impl RangeTracker {
    pub fn new(seed_min: f32, seed_max: f32) -> Self {
        let (seed_min, seed_max) = if seed_min <= seed_max {
            (seed_min, seed_max)
        } else {
            (seed_max, seed_min)
        };
        Self {
            seed_min,
            seed_max,
            min_observed: seed_min,
            max_observed: seed_max,
        }
    }

    /// Widens the window to include `sample` and returns its position in it.
    ///
    /// A window with no width yet yields 0. Non-finite samples leave the window alone.
    pub fn observe(&mut self, sample: f32) -> f32 {
        if !sample.is_finite() {
            return 0.0;
        }

        self.min_observed = self.min_observed.min(sample);
        self.max_observed = self.max_observed.max(sample);

        let width = self.max_observed - self.min_observed;
        if width <= 0.0 {
            return 0.0;
        }
        ((sample - self.min_observed) / width).clamp(0.0, 1.0)
    }

    pub fn reset(&mut self) {
        self.min_observed = self.seed_min;
        self.max_observed = self.seed_max;
    }

    pub fn min_observed(&self) -> f32 {
        self.min_observed
    }

    pub fn max_observed(&self) -> f32 {
        self.max_observed
    }
}

impl Default for RangeTracker {
    fn default() -> Self {
        Self::new(DEFAULT_MIN, DEFAULT_MAX)
    }
}
