//! Road Roughness Scoring
//!
//! Converts a window of accelerometer samples into a 0-100 roughness score.
//!
//! The pipeline, in order:
//! 1. Remove gravity with an exponential low-pass filter per axis
//! 2. Smooth the linear-acceleration magnitude with a 3-sample moving average
//! 3. Take the RMS of the smoothed sequence
//! 4. Map RMS 0.1..5.0 linearly onto 0..100
//! 5. Scale by vehicle speed (1.0 at 50 km/h, limited to 0.5..1.5)
//! 6. Bucket the score into a category
//!
//! Confidence blends sample count with how consistent the window was.

use serde::{Deserialize, Serialize};

use crate::types::SensorSample;

/// Standard gravity in m/s²
pub const GRAVITY: f64 = 9.81;

/// Minimum window size for a meaningful score
pub const MIN_SAMPLES: usize = 10;

/// Default evaluation window in milliseconds
pub const DEFAULT_WINDOW_MS: i64 = 5000;

/// Low-pass coefficient for gravity tracking
const GRAVITY_ALPHA: f64 = 0.8;

/// Moving-average width
const SMOOTHING_WINDOW: usize = 3;

/// RMS mapped to a score of 0
const MIN_RMS: f64 = 0.1;

/// RMS mapped to a score of 100
const MAX_RMS: f64 = 5.0;

/// Speed giving a neutral adjustment factor
const REFERENCE_SPEED_KMH: f64 = 50.0;

/// Sample count at which count-based confidence saturates
const FULL_CONFIDENCE_SAMPLES: f64 = 100.0;

/// Variance at which consistency-based confidence reaches zero
const VARIANCE_CEILING: f64 = 10.0;

/// Scores below this are smooth
pub const SMOOTH_THRESHOLD: f64 = 20.0;
/// Scores below this are at most moderate
pub const MODERATE_THRESHOLD: f64 = 50.0;
/// Scores below this are at most rough
pub const ROUGH_THRESHOLD: f64 = 75.0;

/// Roughness bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoughnessCategory {
    /// Score below 20
    Smooth,
    /// Score from 20 to below 50
    Moderate,
    /// Score from 50 to below 75
    Rough,
    /// Score of 75 and above
    VeryRough,
}

impl RoughnessCategory {
    /// Bucket a score
    pub fn from_score(score: f64) -> Self {
        if score < SMOOTH_THRESHOLD {
            RoughnessCategory::Smooth
        } else if score < MODERATE_THRESHOLD {
            RoughnessCategory::Moderate
        } else if score < ROUGH_THRESHOLD {
            RoughnessCategory::Rough
        } else {
            RoughnessCategory::VeryRough
        }
    }

    /// Map colour used when drawing a segment
    pub fn color_hex(&self) -> &'static str {
        match self {
            RoughnessCategory::Smooth => "#22c55e",
            RoughnessCategory::Moderate => "#eab308",
            RoughnessCategory::Rough => "#f97316",
            RoughnessCategory::VeryRough => "#ef4444",
        }
    }

    /// Human-readable label
    pub fn label(&self) -> &'static str {
        match self {
            RoughnessCategory::Smooth => "smooth",
            RoughnessCategory::Moderate => "moderate",
            RoughnessCategory::Rough => "rough",
            RoughnessCategory::VeryRough => "very rough",
        }
    }
}

/// Outcome of scoring one window
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RoughnessResult {
    /// 0..=100
    pub score: f64,
    /// Bucket of the speed-adjusted score
    pub category: RoughnessCategory,
    /// 0..=1
    pub confidence: f64,
}

impl RoughnessResult {
    /// Result for a window too small to score
    pub fn insufficient() -> Self {
        Self {
            score: 0.0,
            category: RoughnessCategory::Smooth,
            confidence: 0.0,
        }
    }

    /// Whether the window had enough samples to be scored
    pub fn is_sufficient(&self) -> bool {
        self.confidence > 0.0
    }
}

/// Stateless roughness scorer
#[derive(Debug, Clone, Copy, Default)]
pub struct RoughnessEngine;

impl RoughnessEngine {
    /// Create an engine
    pub fn new() -> Self {
        Self
    }

    /// Score a window of accelerometer samples
    ///
    /// `speed` is ground speed in m/s; zero or `None` skips speed scaling.
    /// Identical input always yields an identical result.
    pub fn evaluate<'a, I>(&self, samples: I, speed: Option<f64>) -> RoughnessResult
    where
        I: IntoIterator<Item = &'a SensorSample>,
    {
        let window: Vec<&SensorSample> = samples.into_iter().collect();
        if window.len() < MIN_SAMPLES {
            return RoughnessResult::insufficient();
        }

        let magnitudes = remove_gravity(&window);
        let smoothed = moving_average(&magnitudes);
        let rms = rms(&smoothed);
        let variance = variance(&smoothed);

        let mut score = normalize(rms);
        if let Some(speed) = speed.filter(|s| *s > 0.0) {
            score *= speed_factor(speed);
        }
        let score = score.clamp(0.0, 100.0);

        RoughnessResult {
            score,
            category: RoughnessCategory::from_score(score),
            confidence: confidence(window.len(), variance),
        }
    }
}

/// Linear-acceleration magnitude per sample, scaled by standard gravity
fn remove_gravity(samples: &[&SensorSample]) -> Vec<f64> {
    let first = samples[0];
    let (mut gx, mut gy, mut gz) = (first.x, first.y, first.z);

    samples
        .iter()
        .map(|s| {
            gx = GRAVITY_ALPHA * gx + (1.0 - GRAVITY_ALPHA) * s.x;
            gy = GRAVITY_ALPHA * gy + (1.0 - GRAVITY_ALPHA) * s.y;
            gz = GRAVITY_ALPHA * gz + (1.0 - GRAVITY_ALPHA) * s.z;

            let (lx, ly, lz) = (s.x - gx, s.y - gy, s.z - gz);
            (lx * lx + ly * ly + lz * lz).sqrt() * GRAVITY
        })
        .collect()
}

/// Centered moving average; edges average whatever neighbours exist
fn moving_average(data: &[f64]) -> Vec<f64> {
    if data.len() < SMOOTHING_WINDOW {
        return data.to_vec();
    }
    let half = SMOOTHING_WINDOW / 2;

    (0..data.len())
        .map(|i| {
            let start = i.saturating_sub(half);
            let end = (i + half + 1).min(data.len());
            let window = &data[start..end];
            window.iter().sum::<f64>() / window.len() as f64
        })
        .collect()
}

fn rms(data: &[f64]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    (data.iter().map(|v| v * v).sum::<f64>() / data.len() as f64).sqrt()
}

/// Population variance
fn variance(data: &[f64]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    let n = data.len() as f64;
    let mean = data.iter().sum::<f64>() / n;
    data.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n
}

fn normalize(rms: f64) -> f64 {
    if rms <= MIN_RMS {
        return 0.0;
    }
    if rms >= MAX_RMS {
        return 100.0;
    }
    (rms - MIN_RMS) / (MAX_RMS - MIN_RMS) * 100.0
}

fn speed_factor(speed_mps: f64) -> f64 {
    let speed_kmh = speed_mps * 3.6;
    (speed_kmh / REFERENCE_SPEED_KMH).clamp(0.5, 1.5)
}

fn confidence(sample_count: usize, variance: f64) -> f64 {
    let count_confidence = (sample_count as f64 / FULL_CONFIDENCE_SAMPLES).min(1.0);
    let consistency = (1.0 - variance / VARIANCE_CEILING).max(0.0);
    (count_confidence + consistency) / 2.0
}
