//! Pure-Rust raster backend over ESRI ASCII grids and JSON polygon collections.
//!
//! Reprojection is limited to the identity: layers must already share the run CRS.

use std::path::Path;

use ndarray::Array2;
use tracing::debug;

use crate::backend::traits::{RasterBackend, ResampleMethod};
use crate::core::grid::{Extent, Grid};
use crate::data::ascii_grid::{read_ascii_grid, write_ascii_grid};
use crate::data::polygons_loader::load_polygons;
use crate::error::{BackendError, Result};
use crate::models::polygon::CandidatePolygon;
use crate::models::raster::RasterLayer;

const SNAP_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Default)]
pub struct NativeBackend;

impl NativeBackend {
    pub fn new() -> Self {
        NativeBackend
    }
}

fn extension(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default()
}

/// Exact 1-D squared distance transform (lower envelope of parabolas).
///
/// `f` holds squared distances from the previous pass, `INFINITY` where nothing is known.
fn distance_transform_1d(f: &[f64], spacing: f64, out: &mut [f64]) {
    let n = f.len();
    let s2 = spacing * spacing;
    let sites: Vec<usize> = (0..n).filter(|&q| f[q].is_finite()).collect();
    if sites.is_empty() {
        out.iter_mut().for_each(|v| *v = f64::INFINITY);
        return;
    }

    let intersect = |p: usize, q: usize| -> f64 {
        let (pf, qf) = (p as f64, q as f64);
        ((f[q] + s2 * qf * qf) - (f[p] + s2 * pf * pf)) / (2.0 * s2 * (qf - pf))
    };

    let mut v: Vec<usize> = vec![sites[0]];
    let mut z: Vec<f64> = vec![f64::NEG_INFINITY, f64::INFINITY];
    for &q in &sites[1..] {
        let mut k = v.len() - 1;
        let mut s = intersect(v[k], q);
        while s <= z[k] {
            // z[0] is -inf so k never underflows
            k -= 1;
            s = intersect(v[k], q);
        }
        v.truncate(k + 1);
        z.truncate(k + 1);
        v.push(q);
        z.push(s);
        z.push(f64::INFINITY);
    }

    let mut k = 0;
    for (x, slot) in out.iter_mut().enumerate() {
        while z[k + 1] < x as f64 {
            k += 1;
        }
        let d = x as f64 - v[k] as f64;
        *slot = s2 * d * d + f[v[k]];
    }
}

/// Euclidean distance in CRS units from every cell to the nearest `true` cell.
pub(crate) fn euclidean_distance(features: &Array2<bool>, pixel_size_x: f64, pixel_size_y: f64) -> Array2<f64> {
    let (rows, cols) = features.dim();
    let mut squared = Array2::from_elem((rows, cols), f64::INFINITY);

    let mut column_in = vec![0.0; rows];
    let mut column_out = vec![0.0; rows];
    for c in 0..cols {
        for r in 0..rows {
            column_in[r] = if features[[r, c]] { 0.0 } else { f64::INFINITY };
        }
        distance_transform_1d(&column_in, pixel_size_y, &mut column_out);
        for r in 0..rows {
            squared[[r, c]] = column_out[r];
        }
    }

    let mut row_out = vec![0.0; cols];
    for r in 0..rows {
        let row_in: Vec<f64> = squared.row(r).to_vec();
        distance_transform_1d(&row_in, pixel_size_x, &mut row_out);
        for c in 0..cols {
            squared[[r, c]] = row_out[c];
        }
    }

    squared.mapv_into(f64::sqrt)
}

fn snap_floor(v: f64) -> i64 {
    (v + SNAP_EPSILON).floor() as i64
}

fn snap_ceil(v: f64) -> i64 {
    (v - SNAP_EPSILON).ceil() as i64
}

impl RasterBackend for NativeBackend {
    fn read_raster(&self, path: &Path) -> Result<RasterLayer> {
        match extension(path).as_str() {
            "asc" => read_ascii_grid(path),
            other => Err(BackendError::UnsupportedFormat(format!("raster '.{}'", other)).into()),
        }
    }

    fn write_raster(&self, layer: &RasterLayer, path: &Path) -> Result<()> {
        write_ascii_grid(layer, path)
    }

    fn read_polygons(&self, path: &Path) -> Result<Vec<CandidatePolygon>> {
        match extension(path).as_str() {
            "json" | "geojson" => Ok(load_polygons(path)?.polygons),
            other => Err(BackendError::UnsupportedFormat(format!("vector '.{}'", other)).into()),
        }
    }

    fn rasterize_polygons(
        &self,
        polygons: &[CandidatePolygon],
        grid: &Grid,
        burn_value: f64,
        nodata_value: f64,
    ) -> Result<RasterLayer> {
        let mut layer = RasterLayer::filled(grid.clone(), nodata_value, Some(nodata_value));
        let grid_extent = grid.extent();

        for polygon in polygons {
            let bounds = match polygon.extent().and_then(|e| e.intersection(&grid_extent)) {
                Some(bounds) => bounds,
                None => continue,
            };
            let col0 = snap_floor((bounds.xmin - grid.origin_x) / grid.pixel_size_x).max(0) as usize;
            let col1 = (snap_ceil((bounds.xmax - grid.origin_x) / grid.pixel_size_x).max(0) as usize).min(grid.width);
            let row0 = snap_floor((grid.origin_y - bounds.ymax) / grid.pixel_size_y).max(0) as usize;
            let row1 = (snap_ceil((grid.origin_y - bounds.ymin) / grid.pixel_size_y).max(0) as usize).min(grid.height);

            for row in row0..row1 {
                for col in col0..col1 {
                    let (x, y) = grid.cell_center(row, col);
                    if polygon.contains_point(x, y) {
                        layer.data[[row, col]] = burn_value;
                    }
                }
            }
        }

        debug!(
            "Rasterized {} polygons: {} cells burned",
            polygons.len(),
            layer.count_where(|v| v == burn_value)
        );
        Ok(layer)
    }

    fn reproject(&self, raster: &RasterLayer, source_crs: &str, target_crs: &str) -> Result<RasterLayer> {
        if source_crs.eq_ignore_ascii_case(target_crs) {
            let mut out = raster.clone();
            out.grid.crs = target_crs.to_string();
            return Ok(out);
        }
        Err(BackendError::UnsupportedReprojection {
            from: source_crs.to_string(),
            to: target_crs.to_string(),
        }
        .into())
    }

    /// Window of the raster lattice covering `bbox`; cells outside the source are nodata.
    fn clip_to_extent(&self, raster: &RasterLayer, bbox: &Extent) -> Result<RasterLayer> {
        let source = &raster.grid;
        if !source.extent().intersects(bbox) {
            return Err(BackendError::EmptyClip.into());
        }

        let col0 = snap_floor((bbox.xmin - source.origin_x) / source.pixel_size_x);
        let col1 = snap_ceil((bbox.xmax - source.origin_x) / source.pixel_size_x);
        let row0 = snap_floor((source.origin_y - bbox.ymax) / source.pixel_size_y);
        let row1 = snap_ceil((source.origin_y - bbox.ymin) / source.pixel_size_y);
        if col1 <= col0 || row1 <= row0 {
            return Err(BackendError::EmptyClip.into());
        }

        let grid = Grid::new(
            source.origin_x + col0 as f64 * source.pixel_size_x,
            source.origin_y - row0 as f64 * source.pixel_size_y,
            source.pixel_size_x,
            source.pixel_size_y,
            (col1 - col0) as usize,
            (row1 - row0) as usize,
            &source.crs,
        )?;

        let fill = raster.nodata.unwrap_or(f64::NAN);
        let mut data = Array2::from_elem(grid.shape(), fill);
        for ((r, c), slot) in data.indexed_iter_mut() {
            let src_r = r as i64 + row0;
            let src_c = c as i64 + col0;
            if src_r >= 0 && src_c >= 0 && (src_r as usize) < source.height && (src_c as usize) < source.width {
                *slot = raster.data[[src_r as usize, src_c as usize]];
            }
        }

        Ok(RasterLayer::new(grid, data, raster.nodata)?)
    }

    fn compute_proximity(&self, binary: &RasterLayer, max_distance: f64) -> Result<RasterLayer> {
        let features = binary.data.mapv(|v| !binary.is_nodata(v) && v == 1.0);
        let distance = euclidean_distance(&features, binary.grid.pixel_size_x, binary.grid.pixel_size_y);
        Ok(RasterLayer {
            grid: binary.grid.clone(),
            data: distance.mapv(|d| d.min(max_distance)),
            nodata: None,
        })
    }

    fn resample(&self, raster: &RasterLayer, x_factor: f64, y_factor: f64, method: ResampleMethod) -> Result<RasterLayer> {
        let invalid = |f: f64| !f.is_finite() || f <= 0.0;
        if invalid(x_factor) || invalid(y_factor) {
            return Err(BackendError::InvalidResample { x_factor, y_factor }.into());
        }

        let source = &raster.grid;
        let width = ((source.width as f64 * x_factor).round() as usize).max(1);
        let height = ((source.height as f64 * y_factor).round() as usize).max(1);
        let extent = source.extent();
        let grid = Grid::new(
            source.origin_x,
            source.origin_y,
            extent.width() / width as f64,
            extent.height() / height as f64,
            width,
            height,
            &source.crs,
        )?;

        let fill = raster.nodata.unwrap_or(f64::NAN);
        let mut data = Array2::from_elem(grid.shape(), fill);
        for ((r, c), slot) in data.indexed_iter_mut() {
            let (x, y) = grid.cell_center(r, c);
            // fractional source position measured from cell centers
            let fx = (x - source.origin_x) / source.pixel_size_x - 0.5;
            let fy = (source.origin_y - y) / source.pixel_size_y - 0.5;
            *slot = match method {
                ResampleMethod::Nearest => {
                    let col = (fx.round().max(0.0) as usize).min(source.width - 1);
                    let row = (fy.round().max(0.0) as usize).min(source.height - 1);
                    raster.data[[row, col]]
                }
                ResampleMethod::Bilinear => {
                    let fx = fx.clamp(0.0, (source.width - 1) as f64);
                    let fy = fy.clamp(0.0, (source.height - 1) as f64);
                    let (c0, r0) = (fx.floor() as usize, fy.floor() as usize);
                    let (c1, r1) = ((c0 + 1).min(source.width - 1), (r0 + 1).min(source.height - 1));
                    let (tx, ty) = (fx - c0 as f64, fy - r0 as f64);
                    let neighbours = [
                        (r0, c0, (1.0 - tx) * (1.0 - ty)),
                        (r0, c1, tx * (1.0 - ty)),
                        (r1, c0, (1.0 - tx) * ty),
                        (r1, c1, tx * ty),
                    ];
                    let mut sum = 0.0;
                    let mut weight = 0.0;
                    for (nr, nc, w) in neighbours {
                        let v = raster.data[[nr, nc]];
                        if w > 0.0 && !raster.is_nodata(v) {
                            sum += v * w;
                            weight += w;
                        }
                    }
                    if weight > 0.0 { sum / weight } else { fill }
                }
            };
        }

        Ok(RasterLayer::new(grid, data, raster.nodata)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::polygon::square;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn brute_force(features: &Array2<bool>, px: f64, py: f64) -> Array2<f64> {
        let (rows, cols) = features.dim();
        let sites: Vec<(usize, usize)> = features
            .indexed_iter()
            .filter(|(_, &f)| f)
            .map(|(idx, _)| idx)
            .collect();
        Array2::from_shape_fn((rows, cols), |(r, c)| {
            sites
                .iter()
                .map(|&(sr, sc)| {
                    let dx = (c as f64 - sc as f64) * px;
                    let dy = (r as f64 - sr as f64) * py;
                    (dx * dx + dy * dy).sqrt()
                })
                .fold(f64::INFINITY, f64::min)
        })
    }

    #[test]
    fn test_distance_transform_matches_brute_force() {
        let mut rng = StdRng::seed_from_u64(42);
        for trial in 0..25 {
            let rows = rng.gen_range(1..20);
            let cols = rng.gen_range(1..20);
            let density = rng.gen_range(0.01..0.3);
            let features = Array2::from_shape_fn((rows, cols), |_| rng.gen_bool(density));
            let (px, py) = if trial % 2 == 0 { (50.0, 50.0) } else { (30.0, 70.0) };

            let fast = euclidean_distance(&features, px, py);
            let slow = brute_force(&features, px, py);
            for (a, b) in fast.iter().zip(slow.iter()) {
                if b.is_infinite() {
                    assert!(a.is_infinite());
                } else {
                    assert_relative_eq!(*a, *b, epsilon = 1e-6);
                }
            }
        }
    }

    #[test]
    fn test_proximity_caps_and_ignores_nodata() {
        let grid = Grid::new(0.0, 10.0, 10.0, 10.0, 6, 1, "EPSG:3857").unwrap();
        let binary = RasterLayer::from_vec(grid.clone(), vec![1.0, 0.0, 0.0, 0.0, 0.0, 0.0], Some(0.0)).unwrap();
        let distance = NativeBackend::new().compute_proximity(&binary, 35.0).unwrap();
        let values: Vec<f64> = distance.data.iter().copied().collect();
        assert_eq!(values, vec![0.0, 10.0, 20.0, 30.0, 35.0, 35.0]);

        let empty = RasterLayer::filled(grid, 0.0, None);
        let distance = NativeBackend::new().compute_proximity(&empty, 500.0).unwrap();
        assert!(distance.data.iter().all(|&d| d == 500.0));
    }

    #[test]
    fn test_rasterize_cell_centers() {
        let grid = Grid::new(0.0, 100.0, 10.0, 10.0, 10, 10, "EPSG:3857").unwrap();
        let lake = square("lake", 20.0, 20.0, 30.0);
        let layer = NativeBackend::new()
            .rasterize_polygons(&[lake], &grid, 1.0, 0.0)
            .unwrap();
        assert_eq!(layer.count_where(|v| v == 1.0), 9);
        assert_eq!(layer.get(7, 2), 1.0);
        assert_eq!(layer.get(5, 2), 1.0);
        assert_eq!(layer.get(4, 2), 0.0);
        assert_eq!(layer.nodata, Some(0.0));
    }

    #[test]
    fn test_zonal_statistics() {
        let grid = Grid::new(0.0, 40.0, 10.0, 10.0, 4, 4, "EPSG:3857").unwrap();
        let values: Vec<f64> = (0..16).map(|v| v as f64).collect();
        let raster = RasterLayer::from_vec(grid, values, Some(5.0)).unwrap();
        let polygons = vec![square("left", 0.0, 20.0, 20.0), square("outside", 100.0, 100.0, 5.0)];

        let stats = NativeBackend::new().zonal_statistics(&polygons, &raster).unwrap();
        // upper-left 2x2 block is cells 0, 1, 4, 5; 5 is nodata
        assert_eq!(stats[0].count, 3);
        assert_relative_eq!(stats[0].mean.unwrap(), 5.0 / 3.0);
        assert_eq!(stats[0].max, Some(4.0));
        assert_eq!(stats[1].count, 0);
        assert_eq!(stats[1].mean, None);
    }

    #[test]
    fn test_clip_pads_outside_source() {
        let grid = Grid::new(0.0, 30.0, 10.0, 10.0, 3, 3, "EPSG:3857").unwrap();
        let raster = RasterLayer::from_vec(grid, (1..=9).map(|v| v as f64).collect(), Some(-1.0)).unwrap();

        let clipped = NativeBackend::new()
            .clip_to_extent(&raster, &Extent::new(10.0, 0.0, 40.0, 20.0))
            .unwrap();
        assert_eq!(clipped.shape(), (2, 3));
        assert_relative_eq!(clipped.grid.origin_x, 10.0);
        assert_relative_eq!(clipped.grid.origin_y, 20.0);
        let values: Vec<f64> = clipped.data.iter().copied().collect();
        assert_eq!(values, vec![5.0, 6.0, -1.0, 8.0, 9.0, -1.0]);

        let far = Extent::new(100.0, 100.0, 110.0, 110.0);
        assert!(NativeBackend::new().clip_to_extent(&raster, &far).is_err());
    }

    #[test]
    fn test_resample_nearest_and_bilinear() {
        let grid = Grid::new(0.0, 20.0, 10.0, 10.0, 2, 2, "EPSG:3857").unwrap();
        let raster = RasterLayer::from_vec(grid, vec![0.0, 10.0, 20.0, 30.0], None).unwrap();
        let backend = NativeBackend::new();

        let fine = backend.resample(&raster, 2.0, 2.0, ResampleMethod::Nearest).unwrap();
        assert_eq!(fine.shape(), (4, 4));
        assert_relative_eq!(fine.grid.pixel_size_x, 5.0);
        assert_eq!(fine.get(0, 0), 0.0);
        assert_eq!(fine.get(3, 3), 30.0);

        let smooth = backend.resample(&raster, 2.0, 2.0, ResampleMethod::Bilinear).unwrap();
        assert_relative_eq!(smooth.get(0, 0), 0.0);
        assert_relative_eq!(smooth.get(1, 1), 7.5);
        assert_relative_eq!(smooth.get(3, 3), 30.0);

        let coarse = backend.resample(&raster, 0.5, 0.5, ResampleMethod::Nearest).unwrap();
        assert_eq!(coarse.shape(), (1, 1));

        assert!(backend.resample(&raster, 0.0, 1.0, ResampleMethod::Nearest).is_err());
    }

    #[test]
    fn test_reproject_identity_only() {
        let grid = Grid::new(0.0, 1.0, 1.0, 1.0, 1, 1, "EPSG:3857").unwrap();
        let raster = RasterLayer::filled(grid, 1.0, None);
        let backend = NativeBackend::new();
        assert!(backend.reproject(&raster, "EPSG:3857", "epsg:3857").is_ok());
        assert!(matches!(
            backend.reproject(&raster, "EPSG:4326", "EPSG:3857"),
            Err(crate::error::SiteError::Backend(BackendError::UnsupportedReprojection { .. }))
        ));
    }
}
