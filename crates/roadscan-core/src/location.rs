//! Distance tracking from GPS fixes

use crate::types::{now_ms, LocationSample, TimestampMs};

/// Mean Earth radius in meters
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Great-circle distance between two points in meters (haversine)
pub fn haversine_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lon2 - lon1).to_radians();

    let a = (d_phi / 2.0).sin().powi(2)
        + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    // Rounding can push `a` a hair outside [0, 1] for antipodal points
    let a = a.clamp(0.0, 1.0);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_M * c
}

/// Accumulates travelled distance over a session
///
/// Call [`DistanceTracker::clear`] at session start and stop only.
#[derive(Debug, Clone, Default)]
pub struct DistanceTracker {
    history: Vec<LocationSample>,
    total_m: f64,
}

impl DistanceTracker {
    /// Create an empty tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a fix; returns the distance from the previous fix in meters
    pub fn record(&mut self, fix: LocationSample) -> f64 {
        let step = self
            .history
            .last()
            .map(|prev| haversine_m(prev.latitude, prev.longitude, fix.latitude, fix.longitude))
            .filter(|d| d.is_finite())
            .unwrap_or(0.0);

        self.total_m += step;
        self.history.push(fix);
        step
    }

    /// Total distance since the last clear, in meters
    pub fn total_distance(&self) -> f64 {
        self.total_m
    }

    /// Most recent fix
    pub fn latest(&self) -> Option<&LocationSample> {
        self.history.last()
    }

    /// Fixes with `timestamp >= now - window_ms`
    pub fn recent(&self, window_ms: i64) -> impl Iterator<Item = &LocationSample> + '_ {
        self.recent_as_of(now_ms(), window_ms)
    }

    /// Fixes with `timestamp >= now - window_ms`, against an explicit clock
    pub fn recent_as_of(
        &self,
        now: TimestampMs,
        window_ms: i64,
    ) -> impl Iterator<Item = &LocationSample> + '_ {
        let cutoff = now.saturating_sub(window_ms);
        self.history.iter().filter(move |f| f.timestamp >= cutoff)
    }

    /// Drop old fixes to bound memory; the accumulated total is kept
    pub fn trim_history(&mut self, now: TimestampMs, max_age_ms: i64) {
        let cutoff = now.saturating_sub(max_age_ms);
        let last = self.history.last().copied();
        self.history.retain(|f| f.timestamp >= cutoff);
        // Keep the newest fix so the next step is still measured from it
        if self.history.is_empty() {
            self.history.extend(last);
        }
    }

    /// Number of fixes held
    pub fn len(&self) -> usize {
        self.history.len()
    }

    /// Whether no fix has been recorded
    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// Reset history and total
    pub fn clear(&mut self) {
        self.history.clear();
        self.total_m = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_degree_of_latitude() {
        let d = haversine_m(0.0, 0.0, 1.0, 0.0);
        assert!((d - 111_194.9).abs() < 1.0, "got {d}");
    }

    #[test]
    fn test_total_is_monotonic() {
        let mut tracker = DistanceTracker::new();
        let fixes = [
            (37.7749, -122.4194),
            (37.7750, -122.4194),
            (37.7750, -122.4194),
            (37.7745, -122.4190),
            (37.7760, -122.4200),
        ];
        let mut previous = 0.0;
        for (i, (lat, lon)) in fixes.iter().enumerate() {
            let step = tracker.record(LocationSample::at(*lat, *lon, i as i64 * 1000));
            assert!(step >= 0.0);
            assert!(tracker.total_distance() >= previous);
            previous = tracker.total_distance();
        }
        assert!(previous > 0.0);
    }

    #[test]
    fn test_clear_resets() {
        let mut tracker = DistanceTracker::new();
        tracker.record(LocationSample::at(0.0, 0.0, 0));
        tracker.record(LocationSample::at(0.0, 0.001, 1000));
        assert!(tracker.total_distance() > 0.0);

        tracker.clear();
        assert_eq!(tracker.total_distance(), 0.0);
        assert!(tracker.is_empty());

        // First fix after a clear contributes nothing
        assert_eq!(tracker.record(LocationSample::at(10.0, 10.0, 2000)), 0.0);
    }

    #[test]
    fn test_trim_keeps_total_and_anchor() {
        let mut tracker = DistanceTracker::new();
        tracker.record(LocationSample::at(0.0, 0.0, 0));
        tracker.record(LocationSample::at(0.0, 0.001, 1000));
        let total = tracker.total_distance();

        tracker.trim_history(100_000, 1000);
        assert_eq!(tracker.len(), 1);
        assert_eq!(tracker.total_distance(), total);
        assert_eq!(tracker.recent_as_of(1000, 0).count(), 1);
    }
}
