use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::grid::{Extent, Grid};
use crate::error::Result;
use crate::models::polygon::CandidatePolygon;
use crate::models::raster::RasterLayer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResampleMethod {
    #[default]
    Nearest,
    Bilinear,
}

/// Aggregate of the valid raster cells inside one zone
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ZonalStats {
    pub mean: Option<f64>,
    pub count: usize,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl ZonalStats {
    pub fn from_values<I: IntoIterator<Item = f64>>(values: I) -> Self {
        let mut stats = ZonalStats::default();
        let mut sum = 0.0;
        for v in values {
            sum += v;
            stats.count += 1;
            stats.min = Some(stats.min.map_or(v, |m: f64| m.min(v)));
            stats.max = Some(stats.max.map_or(v, |m: f64| m.max(v)));
        }
        if stats.count > 0 {
            stats.mean = Some(sum / stats.count as f64);
        }
        stats
    }
}

/// Raster/vector operations the engine delegates: I/O, rasterization, reprojection,
/// clipping, proximity, zonal statistics and resampling.
pub trait RasterBackend: Send + Sync {
    fn read_raster(&self, path: &Path) -> Result<RasterLayer>;

    fn write_raster(&self, layer: &RasterLayer, path: &Path) -> Result<()>;

    fn read_polygons(&self, path: &Path) -> Result<Vec<CandidatePolygon>>;

    /// Burn `burn_value` into cells whose centers fall inside any polygon of the file.
    fn rasterize_vector(&self, vector_path: &Path, grid: &Grid, burn_value: f64, nodata_value: f64) -> Result<RasterLayer> {
        let polygons = self.read_polygons(vector_path)?;
        self.rasterize_polygons(&polygons, grid, burn_value, nodata_value)
    }

    fn rasterize_polygons(
        &self,
        polygons: &[CandidatePolygon],
        grid: &Grid,
        burn_value: f64,
        nodata_value: f64,
    ) -> Result<RasterLayer>;

    fn reproject(&self, raster: &RasterLayer, source_crs: &str, target_crs: &str) -> Result<RasterLayer>;

    fn clip_to_extent(&self, raster: &RasterLayer, bbox: &Extent) -> Result<RasterLayer>;

    /// Euclidean distance (CRS units) from each cell to the nearest cell valued 1, capped at `max_distance`.
    fn compute_proximity(&self, binary: &RasterLayer, max_distance: f64) -> Result<RasterLayer>;

    /// Statistics of `raster` over the cells where `zone` is non-zero.
    fn zone_statistics(&self, zone: &RasterLayer, raster: &RasterLayer) -> Result<ZonalStats> {
        zone.grid.ensure_aligned(&raster.grid)?;
        let values = zone
            .data
            .iter()
            .zip(raster.data.iter())
            .filter(|&(&z, &v)| !zone.is_nodata(z) && z != 0.0 && !raster.is_nodata(v))
            .map(|(_, &v)| v);
        Ok(ZonalStats::from_values(values))
    }

    /// Per-polygon statistics; a cell belongs to a polygon when its center does.
    fn zonal_statistics(&self, polygons: &[CandidatePolygon], raster: &RasterLayer) -> Result<Vec<ZonalStats>> {
        polygons
            .iter()
            .map(|polygon| {
                let zone = self.rasterize_polygons(std::slice::from_ref(polygon), &raster.grid, 1.0, 0.0)?;
                self.zone_statistics(&zone, raster)
            })
            .collect()
    }

    /// New grid with `width * x_factor` columns and `height * y_factor` rows over the same extent.
    fn resample(&self, raster: &RasterLayer, x_factor: f64, y_factor: f64, method: ResampleMethod) -> Result<RasterLayer>;
}
