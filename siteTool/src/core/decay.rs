use serde::{Deserialize, Serialize};

use crate::backend::traits::RasterBackend;
use crate::config::constants::DECAY_BAND_COUNT;
use crate::error::{Result, SiteError};
use crate::models::raster::RasterLayer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecayShape {
    /// Closer is better: 10 at the feature, 1 at `max_distance`.
    Attractive,
    /// Farther is better: 1 at the feature, 10 at `max_distance`.
    Repulsive,
}

fn check_max_distance(max_distance: f64) -> Result<()> {
    if !max_distance.is_finite() || max_distance <= 0.0 {
        return Err(SiteError::Config(format!(
            "decay max distance must be finite and > 0, got {}",
            max_distance
        )));
    }
    Ok(())
}

/// `B - 1` times the clamped distance fraction, plus one: 1 at the feature, B at `max_distance`.
fn linear_rise(distance: f64, max_distance: f64) -> f64 {
    let clamped = distance.clamp(0.0, max_distance);
    (DECAY_BAND_COUNT - 1.0) * clamped / max_distance + 1.0
}

pub fn attractive_decay(distance: f64, max_distance: f64) -> f64 {
    let raw = linear_rise(distance, max_distance);
    (raw - DECAY_BAND_COUNT).abs() + 1.0
}

pub fn repulsive_decay(distance: f64, max_distance: f64) -> f64 {
    linear_rise(distance, max_distance)
}

pub fn decay_score(shape: DecayShape, distance: f64, max_distance: f64) -> f64 {
    match shape {
        DecayShape::Attractive => attractive_decay(distance, max_distance),
        DecayShape::Repulsive => repulsive_decay(distance, max_distance),
    }
}

/// Score a distance raster. Nodata distances count as "beyond `max_distance`".
pub fn apply_decay(distance: &RasterLayer, shape: DecayShape, max_distance: f64) -> Result<RasterLayer> {
    check_max_distance(max_distance)?;
    Ok(distance.map(None, |d| {
        let d = if distance.is_nodata(d) { max_distance } else { d };
        decay_score(shape, d, max_distance)
    }))
}

/// Proximity transform of a binary feature raster followed by decay.
pub fn decay_from_features<B: RasterBackend + ?Sized>(
    backend: &B,
    features: &RasterLayer,
    shape: DecayShape,
    max_distance: f64,
) -> Result<RasterLayer> {
    check_max_distance(max_distance)?;
    let distance = backend.compute_proximity(features, max_distance)?;
    apply_decay(&distance, shape, max_distance)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::native::NativeBackend;
    use crate::core::grid::Grid;
    use approx::assert_relative_eq;

    #[test]
    fn test_attractive_endpoints() {
        assert_relative_eq!(attractive_decay(0.0, 5000.0), 10.0);
        assert_relative_eq!(attractive_decay(2500.0, 5000.0), 5.5);
        assert_relative_eq!(attractive_decay(5000.0, 5000.0), 1.0);
        assert_relative_eq!(attractive_decay(12_000.0, 5000.0), 1.0);
    }

    #[test]
    fn test_repulsive_endpoints() {
        assert_relative_eq!(repulsive_decay(0.0, 15_000.0), 1.0);
        assert_relative_eq!(repulsive_decay(15_000.0, 15_000.0), 10.0);
        assert_relative_eq!(repulsive_decay(40_000.0, 15_000.0), 10.0);
        assert_relative_eq!(repulsive_decay(-3.0, 15_000.0), 1.0);
    }

    #[test]
    fn test_decay_monotonic() {
        let max = 15_000.0;
        let mut prev_attr = f64::INFINITY;
        let mut prev_rep = f64::NEG_INFINITY;
        for step in 0..=400 {
            let d = step as f64 * 50.0;
            let a = attractive_decay(d, max);
            let r = repulsive_decay(d, max);
            assert!(a <= prev_attr + 1e-12, "attractive rose at {}", d);
            assert!(r >= prev_rep - 1e-12, "repulsive fell at {}", d);
            assert!((1.0..=10.0).contains(&a));
            assert!((1.0..=10.0).contains(&r));
            prev_attr = a;
            prev_rep = r;
        }
    }

    #[test]
    fn test_apply_decay_rejects_bad_distance() {
        let grid = Grid::new(0.0, 1.0, 1.0, 1.0, 1, 1, "EPSG:3857").unwrap();
        let layer = RasterLayer::filled(grid, 10.0, None);
        assert!(apply_decay(&layer, DecayShape::Attractive, 0.0).is_err());
        assert!(apply_decay(&layer, DecayShape::Attractive, f64::NAN).is_err());
    }

    #[test]
    fn test_decay_from_features() {
        let grid = Grid::new(0.0, 100.0, 100.0, 100.0, 5, 1, "EPSG:3857").unwrap();
        let roads = RasterLayer::from_vec(grid, vec![1.0, 0.0, 0.0, 0.0, 0.0], Some(0.0)).unwrap();
        let scored = decay_from_features(&NativeBackend::new(), &roads, DecayShape::Attractive, 300.0).unwrap();
        let values: Vec<f64> = scored.data.iter().copied().collect();
        assert_relative_eq!(values[0], 10.0);
        assert_relative_eq!(values[1], 7.0);
        assert_relative_eq!(values[3], 1.0);
        assert_relative_eq!(values[4], 1.0);
    }
}
