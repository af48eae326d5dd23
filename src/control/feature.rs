use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

/// One detection: named point sets for the tracked regions ("mouth", "left_eye", ...).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureFrame {
    pub regions: HashMap<String, Vec<Point>>,
}

impl FeatureFrame {
    pub fn with_region(mut self, name: impl Into<String>, points: Vec<Point>) -> Self {
        self.regions.insert(name.into(), points);
        self
    }

    /// `max(y) - min(y)` over the region's points.
    ///
    /// `None` when the region is missing, empty, or holds a non-finite coordinate.
    pub fn vertical_extent(&self, region: &str) -> Option<f32> {
        let points = self.regions.get(region)?;
        if points.is_empty() || points.iter().any(|p| !p.y.is_finite()) {
            return None;
        }

        let (min, max) = points
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), p| {
                (lo.min(p.y), hi.max(p.y))
            });
        Some(max - min)
    }
}
