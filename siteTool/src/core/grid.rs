use serde::{Deserialize, Serialize};

use crate::error::GridError;

const ALIGN_TOLERANCE: f64 = 1e-9;

/// Axis-aligned bounding box in CRS units
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Extent {
    pub xmin: f64,
    pub ymin: f64,
    pub xmax: f64,
    pub ymax: f64,
}

impl Extent {
    pub fn new(xmin: f64, ymin: f64, xmax: f64, ymax: f64) -> Self {
        Self { xmin, ymin, xmax, ymax }
    }

    pub fn width(&self) -> f64 {
        self.xmax - self.xmin
    }

    pub fn height(&self) -> f64 {
        self.ymax - self.ymin
    }

    pub fn area(&self) -> f64 {
        self.width() * self.height()
    }

    /// Strict overlap; extents that only touch along an edge do not intersect.
    pub fn intersects(&self, other: &Extent) -> bool {
        self.xmin < other.xmax
            && self.xmax > other.xmin
            && self.ymin < other.ymax
            && self.ymax > other.ymin
    }

    /// Overlap or shared boundary; a tile whose edge lies on the AOI edge still counts.
    pub fn touches(&self, other: &Extent) -> bool {
        self.xmin <= other.xmax
            && self.xmax >= other.xmin
            && self.ymin <= other.ymax
            && self.ymax >= other.ymin
    }

    pub fn intersection(&self, other: &Extent) -> Option<Extent> {
        if !self.intersects(other) {
            return None;
        }
        Some(Extent {
            xmin: self.xmin.max(other.xmin),
            ymin: self.ymin.max(other.ymin),
            xmax: self.xmax.min(other.xmax),
            ymax: self.ymax.min(other.ymax),
        })
    }
}

/// North-up raster geometry shared by every layer in a run.
///
/// `origin_x`/`origin_y` is the north-west corner; rows run south and columns run east.
/// Pixel sizes are stored positive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Grid {
    pub origin_x: f64,
    pub origin_y: f64,
    pub pixel_size_x: f64,
    pub pixel_size_y: f64,
    pub width: usize,
    pub height: usize,
    pub crs: String,
}

/// Derive the run grid from the AOI extent and a square pixel size.
///
/// Width and height round up so the grid always covers the full extent.
pub fn derive_grid(aoi_extent: &Extent, pixel_size: f64, crs: &str) -> Result<Grid, GridError> {
    if !pixel_size.is_finite() || pixel_size <= 0.0 {
        return Err(GridError::InvalidPixelSize(pixel_size));
    }
    if !(aoi_extent.width() > 0.0 && aoi_extent.height() > 0.0) {
        return Err(GridError::EmptyExtent {
            xmin: aoi_extent.xmin,
            ymin: aoi_extent.ymin,
            xmax: aoi_extent.xmax,
            ymax: aoi_extent.ymax,
        });
    }

    let width = (aoi_extent.width() / pixel_size).ceil() as usize;
    let height = (aoi_extent.height() / pixel_size).ceil() as usize;

    Ok(Grid {
        origin_x: aoi_extent.xmin,
        origin_y: aoi_extent.ymax,
        pixel_size_x: pixel_size,
        pixel_size_y: pixel_size,
        width,
        height,
        crs: crs.to_string(),
    })
}

fn nearly_equal(a: f64, b: f64) -> bool {
    let scale = a.abs().max(b.abs()).max(1.0);
    (a - b).abs() <= ALIGN_TOLERANCE * scale
}

impl Grid {
    pub fn new(
        origin_x: f64,
        origin_y: f64,
        pixel_size_x: f64,
        pixel_size_y: f64,
        width: usize,
        height: usize,
        crs: &str,
    ) -> Result<Self, GridError> {
        for size in [pixel_size_x, pixel_size_y] {
            if !size.is_finite() || size <= 0.0 {
                return Err(GridError::InvalidPixelSize(size));
            }
        }
        if width == 0 || height == 0 {
            return Err(GridError::EmptyExtent {
                xmin: origin_x,
                ymin: origin_y - height as f64 * pixel_size_y,
                xmax: origin_x + width as f64 * pixel_size_x,
                ymax: origin_y,
            });
        }
        Ok(Self {
            origin_x,
            origin_y,
            pixel_size_x,
            pixel_size_y,
            width,
            height,
            crs: crs.to_string(),
        })
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.height, self.width)
    }

    pub fn extent(&self) -> Extent {
        Extent {
            xmin: self.origin_x,
            ymin: self.origin_y - self.height as f64 * self.pixel_size_y,
            xmax: self.origin_x + self.width as f64 * self.pixel_size_x,
            ymax: self.origin_y,
        }
    }

    /// Cell area in squared CRS units (m² for projected grids)
    pub fn cell_area(&self) -> f64 {
        self.pixel_size_x * self.pixel_size_y
    }

    pub fn cell_area_ha(&self) -> f64 {
        self.cell_area() / 10_000.0
    }

    pub fn cell_center(&self, row: usize, col: usize) -> (f64, f64) {
        (
            self.origin_x + (col as f64 + 0.5) * self.pixel_size_x,
            self.origin_y - (row as f64 + 0.5) * self.pixel_size_y,
        )
    }

    /// Cell containing a point, or `None` when the point falls outside the grid.
    pub fn cell_of(&self, x: f64, y: f64) -> Option<(usize, usize)> {
        let col = ((x - self.origin_x) / self.pixel_size_x).floor();
        let row = ((self.origin_y - y) / self.pixel_size_y).floor();
        if col < 0.0 || row < 0.0 || col >= self.width as f64 || row >= self.height as f64 {
            return None;
        }
        Some((row as usize, col as usize))
    }

    pub fn same_crs(&self, other: &str) -> bool {
        self.crs.eq_ignore_ascii_case(other)
    }

    /// Fail unless `other` has exactly this geometry.
    pub fn ensure_aligned(&self, other: &Grid) -> Result<(), GridError> {
        let mismatch = |field: &'static str, expected: String, actual: String| {
            Err(GridError::Mismatch { field, expected, actual })
        };

        if self.width != other.width {
            return mismatch("width", self.width.to_string(), other.width.to_string());
        }
        if self.height != other.height {
            return mismatch("height", self.height.to_string(), other.height.to_string());
        }
        if !nearly_equal(self.pixel_size_x, other.pixel_size_x) {
            return mismatch("pixel_size_x", self.pixel_size_x.to_string(), other.pixel_size_x.to_string());
        }
        if !nearly_equal(self.pixel_size_y, other.pixel_size_y) {
            return mismatch("pixel_size_y", self.pixel_size_y.to_string(), other.pixel_size_y.to_string());
        }
        if !nearly_equal(self.origin_x, other.origin_x) {
            return mismatch("origin_x", self.origin_x.to_string(), other.origin_x.to_string());
        }
        if !nearly_equal(self.origin_y, other.origin_y) {
            return mismatch("origin_y", self.origin_y.to_string(), other.origin_y.to_string());
        }
        if !self.same_crs(&other.crs) {
            return mismatch("crs", self.crs.clone(), other.crs.clone());
        }
        Ok(())
    }
}
