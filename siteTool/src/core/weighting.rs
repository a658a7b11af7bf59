use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::core::grid::Grid;
use crate::error::{Result, WeightError};
use crate::models::raster::RasterLayer;

/// Decimal places kept on normalized rates
pub const RATE_DECIMALS: i32 = 3;

/// Value written to cells of the suitability surface that end up below 1
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodataPolicy {
    #[default]
    Zero,
    /// Sum of the raw layer weights
    TotalWeight,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightRate {
    pub name: String,
    pub weight: f64,
    pub rate: f64,
}

/// A reclassified or decayed layer together with its table weight
#[derive(Debug, Clone)]
pub struct ScoredLayer {
    pub name: String,
    pub weight: f64,
    pub score: RasterLayer,
}

#[derive(Debug, Clone)]
pub struct WeightedSurface {
    pub surface: RasterLayer,
    pub rates: Vec<WeightRate>,
    pub sentinel: f64,
}

pub fn round_rate(value: f64) -> f64 {
    let factor = 10f64.powi(RATE_DECIMALS);
    (value * factor).round() / factor
}

/// `rate_i = round3(weight_i / Σ weight_j)`, in input order.
pub fn normalize_weights(weights: &[(String, f64)]) -> std::result::Result<Vec<WeightRate>, WeightError> {
    if weights.is_empty() {
        return Ok(Vec::new());
    }
    for (name, weight) in weights {
        if !weight.is_finite() || *weight < 0.0 {
            return Err(WeightError::Invalid {
                name: name.clone(),
                weight: *weight,
            });
        }
    }

    let total: f64 = weights.iter().map(|(_, w)| w).sum();
    if total == 0.0 {
        return Err(WeightError::ZeroTotal(weights.len()));
    }

    Ok(weights
        .iter()
        .map(|(name, weight)| WeightRate {
            name: name.clone(),
            weight: *weight,
            rate: round_rate(weight / total),
        })
        .collect())
}

pub fn sentinel_for(policy: NodataPolicy, weights: &[(String, f64)]) -> f64 {
    match policy {
        NodataPolicy::Zero => 0.0,
        NodataPolicy::TotalWeight => weights.iter().map(|(_, w)| w).sum(),
    }
}

/// Weighted sum of scored layers, masked by the exclusion and AOI masks.
///
/// Layers accumulate in slice order; nodata scores count as 0. Cells below 1 after masking
/// become the policy's sentinel, which is also recorded as the surface nodata.
pub fn combine_weighted(
    grid: &Grid,
    layers: &[ScoredLayer],
    exclusion_mask: &RasterLayer,
    aoi_mask: &RasterLayer,
    policy: NodataPolicy,
) -> Result<WeightedSurface> {
    let weights: Vec<(String, f64)> = layers.iter().map(|l| (l.name.clone(), l.weight)).collect();
    let rates = normalize_weights(&weights)?;
    let sentinel = sentinel_for(policy, &weights);

    let mut surface = RasterLayer::filled(grid.clone(), 0.0, None);
    for (layer, rate) in layers.iter().zip(&rates) {
        grid.ensure_aligned(&layer.score.grid)?;
        let score = layer.score.fill_nodata(0.0);
        surface.data.scaled_add(rate.rate, &score.data);
        debug!("Added {} with rate {:.3}", layer.name, rate.rate);
    }

    grid.ensure_aligned(&exclusion_mask.grid)?;
    grid.ensure_aligned(&aoi_mask.grid)?;
    let aoi = aoi_mask.map(None, |v| if aoi_mask.is_nodata(v) || v == 0.0 { 0.0 } else { 1.0 });
    surface.data *= &exclusion_mask.data;
    surface.data *= &aoi.data;

    let surface = surface.map(Some(sentinel), |v| if v < 1.0 { sentinel } else { v });

    info!(
        "Suitability surface: {} layers, {} scoring cells, sentinel {}",
        layers.len(),
        surface.count_where(|v| v >= 1.0),
        sentinel
    );

    Ok(WeightedSurface {
        surface,
        rates,
        sentinel,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::exclusion::combine_exclusions;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn grid() -> Grid {
        Grid::new(0.0, 3.0, 1.0, 1.0, 3, 3, "EPSG:3857").unwrap()
    }

    fn layer(values: [f64; 9]) -> RasterLayer {
        RasterLayer::from_vec(grid(), values.to_vec(), None).unwrap()
    }

    fn named(weights: &[f64]) -> Vec<(String, f64)> {
        weights
            .iter()
            .enumerate()
            .map(|(i, w)| (format!("layer_{}", i), *w))
            .collect()
    }

    #[test]
    fn test_rates_sum_to_one() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let n = rng.gen_range(1..12);
            let weights: Vec<f64> = (0..n).map(|_| rng.gen_range(0.0..5.0)).collect();
            let rates = normalize_weights(&named(&weights)).unwrap();
            let sum: f64 = rates.iter().map(|r| r.rate).sum();
            assert!((sum - 1.0).abs() <= n as f64 * 0.0005 + 1e-12, "sum {} for {:?}", sum, weights);
        }
    }

    #[test]
    fn test_reference_weights() {
        let rates = normalize_weights(&named(&[0.26, 0.02, 0.06, 0.19, 0.19, 0.16, 0.12])).unwrap();
        let values: Vec<f64> = rates.iter().map(|r| r.rate).collect();
        assert_eq!(values, vec![0.26, 0.02, 0.06, 0.19, 0.19, 0.16, 0.12]);

        let thirds = normalize_weights(&named(&[1.0, 1.0, 1.0])).unwrap();
        assert_relative_eq!(thirds[0].rate, 0.333);
    }

    #[test]
    fn test_weight_errors() {
        assert_eq!(
            normalize_weights(&named(&[0.0, 0.0])),
            Err(WeightError::ZeroTotal(2))
        );
        assert!(matches!(
            normalize_weights(&named(&[1.0, -0.5])),
            Err(WeightError::Invalid { .. })
        ));
        assert!(normalize_weights(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_exclusion_overrides_high_score() {
        let aoi = layer([1.0; 9]);
        let exclusion = combine_exclusions(
            &grid(),
            &[layer([1.0, 1.0, 1.0, 1.0, 0.0, 1.0, 1.0, 1.0, 1.0])],
        )
        .unwrap();
        // raw [[1,1,1],[1,5,1],[1,1,1]] through most_suitable "4~10": only the center scores 1
        let score = layer([0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0]);
        let layers = vec![ScoredLayer {
            name: "only".to_string(),
            weight: 1.0,
            score,
        }];

        let result = combine_weighted(&grid(), &layers, &exclusion, &aoi, NodataPolicy::Zero).unwrap();
        assert!(result.surface.data.iter().all(|&v| v == 0.0));
        assert_eq!(result.surface.nodata, Some(0.0));
    }

    #[test]
    fn test_weighted_sum_and_sentinels() {
        let aoi = layer([1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 0.0, 0.0, 0.0]);
        let exclusion = layer([1.0; 9]);
        let layers = vec![
            ScoredLayer {
                name: "a".to_string(),
                weight: 3.0,
                score: layer([10.0, 2.0, 1.0, 5.0, 0.0, 10.0, 10.0, 10.0, 10.0]),
            },
            ScoredLayer {
                name: "b".to_string(),
                weight: 1.0,
                score: layer([2.0, 2.0, 1.0, 1.0, 0.0, 10.0, 10.0, 10.0, 10.0]),
            },
        ];

        let zero = combine_weighted(&grid(), &layers, &exclusion, &aoi, NodataPolicy::Zero).unwrap();
        assert_relative_eq!(zero.surface.get(0, 0), 8.0);
        assert_relative_eq!(zero.surface.get(0, 1), 2.0);
        assert_relative_eq!(zero.surface.get(0, 2), 1.0);
        assert_relative_eq!(zero.surface.get(1, 0), 4.0);
        assert_relative_eq!(zero.surface.get(1, 1), 0.0);
        assert_relative_eq!(zero.surface.get(2, 0), 0.0);

        let total = combine_weighted(&grid(), &layers, &exclusion, &aoi, NodataPolicy::TotalWeight).unwrap();
        assert_relative_eq!(total.sentinel, 4.0);
        assert_relative_eq!(total.surface.get(1, 1), 4.0);
        assert_relative_eq!(total.surface.get(2, 2), 4.0);
        assert_eq!(total.surface.nodata, Some(4.0));
    }

    #[test]
    fn test_scored_nodata_counts_as_zero() {
        let aoi = layer([1.0; 9]);
        let exclusion = layer([1.0; 9]);
        let score = RasterLayer::from_vec(grid(), vec![-1.0, 4.0, 4.0, 4.0, 4.0, 4.0, 4.0, 4.0, 4.0], Some(-1.0)).unwrap();
        let layers = vec![ScoredLayer {
            name: "a".to_string(),
            weight: 2.0,
            score,
        }];
        let result = combine_weighted(&grid(), &layers, &exclusion, &aoi, NodataPolicy::Zero).unwrap();
        assert_relative_eq!(result.surface.get(0, 0), 0.0);
        assert_relative_eq!(result.surface.get(0, 1), 4.0);
    }
}
