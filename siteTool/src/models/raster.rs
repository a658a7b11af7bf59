use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};

use crate::core::grid::Grid;
use crate::error::GridError;

/// Summary of the valid (non-nodata, non-NaN) cells of a layer
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LayerStats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub count: usize,
}

/// A single-band raster on a run grid, stored row-major as `[row, col]`.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterLayer {
    pub grid: Grid,
    pub data: Array2<f64>,
    pub nodata: Option<f64>,
}

impl RasterLayer {
    pub fn new(grid: Grid, data: Array2<f64>, nodata: Option<f64>) -> Result<Self, GridError> {
        let (rows, cols) = data.dim();
        if rows != grid.height || cols != grid.width {
            return Err(GridError::ShapeMismatch {
                rows,
                cols,
                height: grid.height,
                width: grid.width,
            });
        }
        Ok(Self { grid, data, nodata })
    }

    pub fn filled(grid: Grid, value: f64, nodata: Option<f64>) -> Self {
        let data = Array2::from_elem(grid.shape(), value);
        Self { grid, data, nodata }
    }

    pub fn from_vec(grid: Grid, values: Vec<f64>, nodata: Option<f64>) -> Result<Self, GridError> {
        let shape = grid.shape();
        let len = values.len();
        let data = Array2::from_shape_vec(shape, values).map_err(|_| GridError::ShapeMismatch {
            rows: len / grid.width.max(1),
            cols: grid.width,
            height: grid.height,
            width: grid.width,
        })?;
        Ok(Self { grid, data, nodata })
    }

    pub fn shape(&self) -> (usize, usize) {
        self.data.dim()
    }

    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.data[[row, col]]
    }

    pub fn is_nodata(&self, value: f64) -> bool {
        if value.is_nan() {
            return true;
        }
        match self.nodata {
            Some(nd) => value == nd,
            None => false,
        }
    }

    pub fn with_nodata(mut self, nodata: Option<f64>) -> Self {
        self.nodata = nodata;
        self
    }

    /// Min, max and mean over valid cells; `None` when every cell is nodata.
    pub fn statistics(&self) -> Option<LayerStats> {
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        let mut sum = 0.0;
        let mut count = 0usize;
        for &v in self.data.iter() {
            if self.is_nodata(v) {
                continue;
            }
            min = min.min(v);
            max = max.max(v);
            sum += v;
            count += 1;
        }
        if count == 0 {
            return None;
        }
        Some(LayerStats {
            min,
            max,
            mean: sum / count as f64,
            count,
        })
    }

    /// Apply `f` to every cell, keeping the grid.
    pub fn map<F>(&self, nodata: Option<f64>, f: F) -> RasterLayer
    where
        F: Fn(f64) -> f64,
    {
        RasterLayer {
            grid: self.grid.clone(),
            data: self.data.mapv(f),
            nodata,
        }
    }

    /// Copy with nodata and NaN cells replaced by `value`; the copy carries no sentinel.
    pub fn fill_nodata(&self, value: f64) -> RasterLayer {
        self.map(None, |v| if self.is_nodata(v) { value } else { v })
    }

    /// Cellwise combination of two aligned layers.
    pub fn zip_map<F>(&self, other: &RasterLayer, nodata: Option<f64>, f: F) -> Result<RasterLayer, GridError>
    where
        F: Fn(f64, f64) -> f64,
    {
        self.grid.ensure_aligned(&other.grid)?;
        let mut data = Array2::zeros(self.grid.shape());
        Zip::from(&mut data)
            .and(&self.data)
            .and(&other.data)
            .for_each(|out, &a, &b| *out = f(a, b));
        Ok(RasterLayer {
            grid: self.grid.clone(),
            data,
            nodata,
        })
    }

    pub fn count_where<F>(&self, predicate: F) -> usize
    where
        F: Fn(f64) -> bool,
    {
        self.data.iter().filter(|&&v| predicate(v)).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn grid(width: usize, height: usize) -> Grid {
        Grid::new(0.0, height as f64, 1.0, 1.0, width, height, "EPSG:3857").unwrap()
    }

    #[test]
    fn test_shape_checked() {
        let result = RasterLayer::new(grid(3, 2), Array2::zeros((3, 3)), None);
        assert!(matches!(result, Err(GridError::ShapeMismatch { .. })));
        assert!(RasterLayer::from_vec(grid(3, 2), vec![0.0; 5], None).is_err());
    }

    #[test]
    fn test_statistics_skip_nodata() {
        let layer = RasterLayer::from_vec(
            grid(3, 2),
            vec![-9999.0, 2.0, 4.0, f64::NAN, 6.0, -9999.0],
            Some(-9999.0),
        )
        .unwrap();
        let stats = layer.statistics().unwrap();
        assert_relative_eq!(stats.min, 2.0);
        assert_relative_eq!(stats.max, 6.0);
        assert_relative_eq!(stats.mean, 4.0);
        assert_eq!(stats.count, 3);

        let empty = RasterLayer::filled(grid(2, 2), -1.0, Some(-1.0));
        assert!(empty.statistics().is_none());
    }

    #[test]
    fn test_fill_nodata() {
        let layer = RasterLayer::from_vec(grid(2, 1), vec![-1.0, 3.0], Some(-1.0)).unwrap();
        let filled = layer.fill_nodata(0.0);
        assert_eq!(filled.data.as_slice().unwrap(), &[0.0, 3.0]);
        assert_eq!(filled.nodata, None);
    }

    #[test]
    fn test_zip_requires_alignment() {
        let a = RasterLayer::filled(grid(2, 2), 1.0, None);
        let b = RasterLayer::filled(grid(3, 2), 1.0, None);
        assert!(a.zip_map(&b, None, |x, y| x + y).is_err());

        let c = RasterLayer::filled(grid(2, 2), 2.0, None);
        let sum = a.zip_map(&c, None, |x, y| x + y).unwrap();
        assert!(sum.data.iter().all(|&v| v == 3.0));
    }
}
