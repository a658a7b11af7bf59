//! Cost driver classification, per-polygon LCOE and the final composite surface.

use ndarray::{Array2, Zip};
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::backend::traits::RasterBackend;
use crate::config::const_funcs::{
    calc_bathymetry_multiplier, calc_kwp_per_cell, calc_lcoe, calc_system_cost, calc_water_multiplier,
    calc_wind_multiplier,
};
use crate::config::constants::{LCOE_SCALE_SPAN, LCOE_SCALE_TOP};
use crate::config::run_config::CostConfig;
use crate::core::grid::Grid;
use crate::error::{DegenerateScaleError, Result};
use crate::models::cost_record::CostRecord;
use crate::models::polygon::CandidatePolygon;
use crate::models::raster::RasterLayer;
use crate::utils::logging::{start_timing, CostModelType, OperationCategory};

/// Multiplier rasters (percent) feeding the system cost
#[derive(Debug, Clone)]
pub struct CostMultipliers {
    pub wind: RasterLayer,
    pub bathymetry: RasterLayer,
    pub water: RasterLayer,
}

fn classify(layer: &RasterLayer, f: fn(f64) -> f64) -> RasterLayer {
    layer.map(None, |v| if layer.is_nodata(v) { f(f64::NAN) } else { f(v) })
}

/// Bin the raw driver rasters into multipliers. Without a wind class raster every cell takes 100.
pub fn classify_cost_drivers(
    grid: &Grid,
    bathymetry: &RasterLayer,
    water_distance: &RasterLayer,
    wind_class: Option<&RasterLayer>,
) -> Result<CostMultipliers> {
    let _timing = start_timing(
        "classify_cost_drivers",
        OperationCategory::CostModel { subcategory: CostModelType::Classification },
    );
    grid.ensure_aligned(&bathymetry.grid)?;
    grid.ensure_aligned(&water_distance.grid)?;

    let wind = match wind_class {
        Some(layer) => {
            grid.ensure_aligned(&layer.grid)?;
            classify(layer, calc_wind_multiplier)
        }
        None => RasterLayer::filled(grid.clone(), 100.0, None),
    };

    Ok(CostMultipliers {
        wind,
        bathymetry: classify(bathymetry, calc_bathymetry_multiplier),
        water: classify(water_distance, calc_water_multiplier),
    })
}

/// System unit cost where both bathymetry and water multipliers are non-zero, 0 elsewhere.
///
/// The result carries 0 as its nodata so zonal statistics skip invalid cells.
pub fn system_cost_surface(multipliers: &CostMultipliers, cost: &CostConfig) -> Result<RasterLayer> {
    let grid = &multipliers.wind.grid;
    grid.ensure_aligned(&multipliers.bathymetry.grid)?;
    grid.ensure_aligned(&multipliers.water.grid)?;

    let mut data = Array2::zeros(grid.shape());
    Zip::from(&mut data)
        .and(&multipliers.wind.data)
        .and(&multipliers.bathymetry.data)
        .and(&multipliers.water.data)
        .for_each(|out, &wind, &bathymetry, &water| {
            *out = if bathymetry != 0.0 && water != 0.0 {
                calc_system_cost(wind, bathymetry, water, cost.pv_cost, cost.mooring_cost, cost.cable_cost)
            } else {
                0.0
            };
        });

    let mask = RasterLayer::new(grid.clone(), data, Some(0.0))?;
    debug!("System cost surface: {} valid cells", mask.count_where(|v| v != 0.0));
    Ok(mask)
}

/// Result of the inverse 1..5 rescale of the system cost surface
#[derive(Debug, Clone)]
pub enum RescaleOutcome {
    Scaled { layer: RasterLayer, min: f64, max: f64 },
    /// Every live cell held the same value; live cells score 5, the rest 0.
    Degenerate { layer: RasterLayer, value: f64 },
}

impl RescaleOutcome {
    pub fn layer(&self) -> &RasterLayer {
        match self {
            RescaleOutcome::Scaled { layer, .. } | RescaleOutcome::Degenerate { layer, .. } => layer,
        }
    }

    pub fn is_degenerate(&self) -> bool {
        matches!(self, RescaleOutcome::Degenerate { .. })
    }
}

/// Map live (non-zero) costs onto 5 (cheapest) .. 1 (dearest); zero cells map to 0.
pub fn rescale_inverse(surface: &RasterLayer) -> Result<RescaleOutcome> {
    let _timing = start_timing(
        "rescale_inverse",
        OperationCategory::CostModel { subcategory: CostModelType::Rescale },
    );
    let live = |v: f64| v != 0.0 && v.is_finite();

    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for &v in surface.data.iter().filter(|&&v| live(v)) {
        min = min.min(v);
        max = max.max(v);
    }
    if min > max {
        return Err(DegenerateScaleError {
            what: "system cost surface".to_string(),
            reason: "no cell has a non-zero cost".to_string(),
        }
        .into());
    }

    if max == min {
        warn!("System cost is uniform ({}) across every valid cell; LCOE scores are flat", min);
        let layer = surface.map(None, |v| if live(v) { LCOE_SCALE_TOP } else { 0.0 });
        return Ok(RescaleOutcome::Degenerate { layer, value: min });
    }

    let span = max - min;
    let zero_value = min + (LCOE_SCALE_TOP / LCOE_SCALE_SPAN) * span;
    let layer = surface.map(None, |v| {
        let v = if live(v) { v } else { zero_value };
        -LCOE_SCALE_SPAN * (v - min) / span + LCOE_SCALE_TOP
    });
    Ok(RescaleOutcome::Scaled { layer, min, max })
}

/// `(suitability + lcoe_scaled) * exclusion`, with suitability nodata counted as 0.
pub fn final_composite(
    suitability: &RasterLayer,
    lcoe_scaled: &RasterLayer,
    exclusion_mask: &RasterLayer,
) -> Result<RasterLayer> {
    let suitability = suitability.fill_nodata(0.0);
    let summed = suitability.zip_map(lcoe_scaled, None, |s, l| s + l)?;
    Ok(summed.zip_map(exclusion_mask, None, |v, m| v * m)?)
}

/// Rasters the per-polygon costing reads, all on the run grid.
pub struct CostInputs<'a> {
    pub lcoe_mask: &'a RasterLayer,
    pub pvout: &'a RasterLayer,
    pub road_distance: Option<&'a RasterLayer>,
    pub line_distance: Option<&'a RasterLayer>,
    pub suitability: &'a RasterLayer,
    pub final_surface: &'a RasterLayer,
}

/// Zone masks derived from one polygon
pub struct PolygonZones {
    pub inside: RasterLayer,
    /// Cells within `ring_width` of the polygon but outside it
    pub ring: RasterLayer,
    /// The polygon grown by `buffer_width`
    pub buffer: RasterLayer,
}

pub fn polygon_zones<B: RasterBackend + ?Sized>(
    backend: &B,
    polygon: &CandidatePolygon,
    grid: &Grid,
    ring_width: f64,
    buffer_width: f64,
) -> Result<PolygonZones> {
    let inside = backend.rasterize_polygons(std::slice::from_ref(polygon), grid, 1.0, 0.0)?;
    // Cap past both widths so capped cells never land inside either zone
    let cap = ring_width.max(buffer_width) + grid.pixel_size_x + grid.pixel_size_y;
    let distance = backend.compute_proximity(&inside, cap)?;

    let ring = distance.map(None, |d| if d > 0.0 && d <= ring_width { 1.0 } else { 0.0 });
    let buffer = distance.map(None, |d| if d <= buffer_width { 1.0 } else { 0.0 });
    Ok(PolygonZones { inside, ring, buffer })
}

fn connection_cost<B: RasterBackend + ?Sized>(
    backend: &B,
    ring: &RasterLayer,
    distance: Option<&RasterLayer>,
    cost_per_m: f64,
) -> Result<f64> {
    match distance {
        Some(layer) => Ok(backend.zone_statistics(ring, layer)?.mean.unwrap_or(0.0) * cost_per_m),
        None => Ok(0.0),
    }
}

fn polygon_record<B: RasterBackend + ?Sized>(
    backend: &B,
    polygon: &CandidatePolygon,
    inputs: &CostInputs,
    cost: &CostConfig,
) -> Result<CostRecord> {
    let grid = &inputs.lcoe_mask.grid;
    let zones = polygon_zones(backend, polygon, grid, cost.ring_width, cost.rank_buffer)?;

    let system = backend.zone_statistics(&zones.inside, inputs.lcoe_mask)?;
    let pvout = backend.zone_statistics(&zones.inside, inputs.pvout)?;
    let rank = backend.zone_statistics(&zones.buffer, inputs.suitability)?;
    let final_stats = backend.zone_statistics(&zones.inside, inputs.final_surface)?;

    let road_cost = connection_cost(backend, &zones.ring, inputs.road_distance, cost.road_cost)?;
    let line_cost = connection_cost(backend, &zones.ring, inputs.line_distance, cost.transmission_cost)?;

    let kwp_per_cell = calc_kwp_per_cell(grid.cell_area_ha(), cost.kwp_per_ha);
    let pixels = system.count.min(cost.max_pv_cells);
    let installed_kwp = pixels as f64 * kwp_per_cell;

    let capital_cost = road_cost + line_cost + installed_kwp * 1000.0 * (system.mean.unwrap_or(0.0) / 100.0);
    let pv_out_energy = installed_kwp * pvout.mean.unwrap_or(0.0);
    let om_cost = installed_kwp * cost.om_cost;
    let lcoe = if system.count == 0 {
        None
    } else {
        calc_lcoe(capital_cost, om_cost, pv_out_energy, cost.lifetime_years)
    };

    Ok(CostRecord {
        polygon_id: polygon.id.clone(),
        rank_mean: rank.mean,
        road_cost,
        line_cost,
        valid_cells: system.count,
        pv_area_pixels: pixels,
        pv_area_ha: pixels as f64 * grid.cell_area_ha(),
        system_cost_mean: system.mean,
        pv_out_energy,
        om_cost,
        capital_cost,
        lcoe,
        final_mean: final_stats.mean,
    })
}

/// One cost record per polygon, in input order. Polygons are costed in parallel.
pub fn compute_cost_records<B: RasterBackend + ?Sized>(
    backend: &B,
    polygons: &[CandidatePolygon],
    inputs: &CostInputs,
    cost: &CostConfig,
) -> Result<Vec<CostRecord>> {
    let _timing = start_timing(
        "compute_cost_records",
        OperationCategory::CostModel { subcategory: CostModelType::ZonalStatistics },
    );
    let grid = &inputs.lcoe_mask.grid;
    for layer in [inputs.pvout, inputs.suitability, inputs.final_surface] {
        grid.ensure_aligned(&layer.grid)?;
    }
    for layer in [inputs.road_distance, inputs.line_distance].into_iter().flatten() {
        grid.ensure_aligned(&layer.grid)?;
    }

    let records = polygons
        .par_iter()
        .map(|polygon| polygon_record(backend, polygon, inputs, cost))
        .collect::<Result<Vec<_>>>()?;

    info!(
        "Costed {} polygons, {} with a defined LCOE",
        records.len(),
        records.iter().filter(|r| r.has_lcoe()).count()
    );
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::native::NativeBackend;
    use crate::config::constants::*;
    use crate::models::polygon::square;
    use approx::assert_relative_eq;

    fn grid() -> Grid {
        Grid::new(0.0, 500.0, 50.0, 50.0, 10, 10, "EPSG:32736").unwrap()
    }

    fn row_grid(n: usize) -> Grid {
        Grid::new(0.0, 1.0, 1.0, 1.0, n, 1, "EPSG:32736").unwrap()
    }

    #[test]
    fn test_classify_and_system_cost() {
        let g = row_grid(4);
        let bathymetry = RasterLayer::from_vec(g.clone(), vec![1.0, 5.0, 15.0, -9999.0], Some(-9999.0)).unwrap();
        let water = RasterLayer::from_vec(g.clone(), vec![300.0, 300.0, 600.0, 300.0], None).unwrap();
        let wind = RasterLayer::from_vec(g.clone(), vec![7.0, 7.0, 4.0, 7.0], None).unwrap();

        let multipliers = classify_cost_drivers(&g, &bathymetry, &water, Some(&wind)).unwrap();
        assert_eq!(multipliers.bathymetry.data.as_slice().unwrap(), &[0.0, 100.0, 130.0, 0.0]);
        assert_eq!(multipliers.water.data.as_slice().unwrap(), &[100.0, 100.0, 110.0, 100.0]);

        let mask = system_cost_surface(&multipliers, &CostConfig::default()).unwrap();
        assert_eq!(mask.nodata, Some(0.0));
        assert_eq!(mask.get(0, 0), 0.0);
        assert_relative_eq!(mask.get(0, 1), 75.2, epsilon = 1e-9);
        // (1.10 * 0.64 + 1.30 * 0.03 + 1.10 * 0.05) * 100
        assert_relative_eq!(mask.get(0, 2), 79.8, epsilon = 1e-9);
        assert_eq!(mask.get(0, 3), 0.0);
    }

    #[test]
    fn test_missing_wind_is_neutral() {
        let g = row_grid(1);
        let bathymetry = RasterLayer::filled(g.clone(), 5.0, None);
        let water = RasterLayer::filled(g.clone(), 300.0, None);
        let multipliers = classify_cost_drivers(&g, &bathymetry, &water, None).unwrap();
        let mask = system_cost_surface(&multipliers, &CostConfig::default()).unwrap();
        assert_relative_eq!(mask.get(0, 0), 72.0, epsilon = 1e-9);
    }

    #[test]
    fn test_rescale_inverse() {
        let surface = RasterLayer::from_vec(row_grid(4), vec![0.0, 70.0, 80.0, 90.0], Some(0.0)).unwrap();
        let outcome = rescale_inverse(&surface).unwrap();
        assert!(!outcome.is_degenerate());
        let scaled = outcome.layer();
        assert_relative_eq!(scaled.get(0, 0), 0.0, epsilon = 1e-12);
        assert_relative_eq!(scaled.get(0, 1), 5.0);
        assert_relative_eq!(scaled.get(0, 2), 3.0);
        assert_relative_eq!(scaled.get(0, 3), 1.0);
    }

    #[test]
    fn test_rescale_degenerate_and_empty() {
        let flat = RasterLayer::from_vec(row_grid(3), vec![0.0, 75.2, 75.2], Some(0.0)).unwrap();
        let outcome = rescale_inverse(&flat).unwrap();
        assert!(outcome.is_degenerate());
        assert_eq!(outcome.layer().data.as_slice().unwrap(), &[0.0, 5.0, 5.0]);

        let empty = RasterLayer::filled(row_grid(3), 0.0, Some(0.0));
        assert!(matches!(
            rescale_inverse(&empty),
            Err(crate::error::SiteError::DegenerateScale(_))
        ));
    }

    #[test]
    fn test_final_composite() {
        let g = row_grid(3);
        let suitability = RasterLayer::from_vec(g.clone(), vec![0.0, 4.2, 6.0], Some(0.0)).unwrap();
        let lcoe = RasterLayer::from_vec(g.clone(), vec![0.0, 5.0, 1.0], None).unwrap();
        let exclusion = RasterLayer::from_vec(g.clone(), vec![1.0, 1.0, 0.0], None).unwrap();
        let composite = final_composite(&suitability, &lcoe, &exclusion).unwrap();
        assert_eq!(composite.data.as_slice().unwrap(), &[0.0, 9.2, 0.0]);
    }

    #[test]
    fn test_polygon_zones() {
        let backend = NativeBackend::new();
        let polygon = square("a", 100.0, 100.0, 200.0);
        let zones = polygon_zones(&backend, &polygon, &grid(), 50.0, 100.0).unwrap();
        assert_eq!(zones.inside.count_where(|v| v == 1.0), 16);
        assert_eq!(zones.ring.count_where(|v| v == 1.0), 16);
        // 16 inside, 32 within two cells of an edge, 4 diagonal corners
        assert_eq!(zones.buffer.count_where(|v| v == 1.0), 52);
    }

    #[test]
    fn test_cost_records() {
        let backend = NativeBackend::new();
        let g = grid();
        let lcoe_mask = RasterLayer::filled(g.clone(), 75.2, Some(0.0));
        let pvout = RasterLayer::filled(g.clone(), 1500.0, None);
        let roads = RasterLayer::filled(g.clone(), 200.0, None);
        let suitability = RasterLayer::filled(g.clone(), 4.0, Some(0.0));
        let final_surface = RasterLayer::filled(g.clone(), 9.0, None);
        let inputs = CostInputs {
            lcoe_mask: &lcoe_mask,
            pvout: &pvout,
            road_distance: Some(&roads),
            line_distance: None,
            suitability: &suitability,
            final_surface: &final_surface,
        };
        let cost = CostConfig {
            max_pv_cells: 10,
            ..CostConfig::default()
        };
        let polygons = vec![square("a", 100.0, 100.0, 200.0), square("outside", 5000.0, 5000.0, 100.0)];

        let records = compute_cost_records(&backend, &polygons, &inputs, &cost).unwrap();
        assert_eq!(records.len(), 2);

        let a = &records[0];
        assert_eq!(a.polygon_id, "a");
        assert_eq!(a.valid_cells, 16);
        assert_eq!(a.pv_area_pixels, 10);
        assert_relative_eq!(a.pv_area_ha, 2.5);
        assert_relative_eq!(a.road_cost, 200.0 * ROAD_COST);
        assert_eq!(a.line_cost, 0.0);

        let kwp = 10.0 * 250.0;
        let capital = 200.0 * ROAD_COST + kwp * 1000.0 * 0.752;
        assert_relative_eq!(a.capital_cost, capital, epsilon = 1e-6);
        assert_relative_eq!(a.pv_out_energy, kwp * 1500.0);
        assert_relative_eq!(a.om_cost, kwp * O_M_COST);
        let expected = (capital + kwp * O_M_COST * PV_LIFETIME_YEARS) / (kwp * 1500.0 * PV_LIFETIME_YEARS);
        assert_relative_eq!(a.lcoe.unwrap(), expected, epsilon = 1e-12);
        assert_relative_eq!(a.rank_mean.unwrap(), 4.0);
        assert_relative_eq!(a.final_mean.unwrap(), 9.0);

        let outside = &records[1];
        assert_eq!(outside.valid_cells, 0);
        assert_eq!(outside.lcoe, None);
        assert_eq!(outside.final_mean, None);
    }
}
