use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use ndarray::Array2;
use tracing::debug;

use crate::core::grid::{Extent, Grid};
use crate::error::{BackendError, Result};
use crate::models::raster::RasterLayer;

const DEFAULT_NODATA: f64 = -9999.0;

/// Header block of an ESRI ASCII grid
#[derive(Debug, Clone, PartialEq)]
pub struct AsciiHeader {
    pub ncols: usize,
    pub nrows: usize,
    pub xllcorner: f64,
    pub yllcorner: f64,
    pub cellsize_x: f64,
    pub cellsize_y: f64,
    pub nodata: Option<f64>,
}

impl AsciiHeader {
    pub fn extent(&self) -> Extent {
        Extent::new(
            self.xllcorner,
            self.yllcorner,
            self.xllcorner + self.ncols as f64 * self.cellsize_x,
            self.yllcorner + self.nrows as f64 * self.cellsize_y,
        )
    }

    pub fn to_grid(&self, crs: &str) -> std::result::Result<Grid, crate::error::GridError> {
        Grid::new(
            self.xllcorner,
            self.yllcorner + self.nrows as f64 * self.cellsize_y,
            self.cellsize_x,
            self.cellsize_y,
            self.ncols,
            self.nrows,
            crs,
        )
    }
}

fn malformed(path: &Path, reason: impl Into<String>) -> BackendError {
    BackendError::MalformedRaster {
        path: path.display().to_string(),
        reason: reason.into(),
    }
}

/// Sidecar file holding the CRS identifier, e.g. `layer.prj` next to `layer.asc`
pub fn prj_path(path: &Path) -> PathBuf {
    path.with_extension("prj")
}

fn read_crs(path: &Path) -> String {
    fs::read_to_string(prj_path(path))
        .map(|s| s.trim().to_string())
        .unwrap_or_default()
}

#[derive(Default)]
struct HeaderFields {
    ncols: Option<usize>,
    nrows: Option<usize>,
    xll: Option<(f64, bool)>, // value, is_center
    yll: Option<(f64, bool)>,
    cellsize: Option<f64>,
    dx: Option<f64>,
    dy: Option<f64>,
    nodata: Option<f64>,
}

impl HeaderFields {
    /// Returns false when `key` is not a header keyword.
    fn set(&mut self, path: &Path, key: &str, value: &str) -> std::result::Result<bool, BackendError> {
        let number = || {
            value
                .parse::<f64>()
                .map_err(|_| malformed(path, format!("{} has non-numeric value '{}'", key, value)))
        };
        let count = || {
            value
                .parse::<usize>()
                .map_err(|_| malformed(path, format!("{} has invalid count '{}'", key, value)))
        };
        match key.to_ascii_lowercase().as_str() {
            "ncols" => self.ncols = Some(count()?),
            "nrows" => self.nrows = Some(count()?),
            "xllcorner" => self.xll = Some((number()?, false)),
            "xllcenter" => self.xll = Some((number()?, true)),
            "yllcorner" => self.yll = Some((number()?, false)),
            "yllcenter" => self.yll = Some((number()?, true)),
            "cellsize" => self.cellsize = Some(number()?),
            "dx" => self.dx = Some(number()?),
            "dy" => self.dy = Some(number()?),
            "nodata_value" => self.nodata = Some(number()?),
            _ => return Ok(false),
        }
        Ok(true)
    }

    fn finish(self, path: &Path) -> std::result::Result<AsciiHeader, BackendError> {
        let ncols = self.ncols.ok_or_else(|| malformed(path, "missing ncols"))?;
        let nrows = self.nrows.ok_or_else(|| malformed(path, "missing nrows"))?;
        let cellsize_x = self
            .dx
            .or(self.cellsize)
            .ok_or_else(|| malformed(path, "missing cellsize"))?;
        let cellsize_y = self.dy.or(self.cellsize).unwrap_or(cellsize_x);
        let (xll, x_center) = self.xll.ok_or_else(|| malformed(path, "missing xllcorner"))?;
        let (yll, y_center) = self.yll.ok_or_else(|| malformed(path, "missing yllcorner"))?;

        Ok(AsciiHeader {
            ncols,
            nrows,
            xllcorner: if x_center { xll - cellsize_x / 2.0 } else { xll },
            yllcorner: if y_center { yll - cellsize_y / 2.0 } else { yll },
            cellsize_x,
            cellsize_y,
            nodata: self.nodata,
        })
    }
}

fn is_header_line(line: &str) -> bool {
    line.trim_start()
        .chars()
        .next()
        .map_or(false, |c| c.is_ascii_alphabetic())
}

/// Read only the header lines; used where the bounds are all that matters.
pub fn read_header<P: AsRef<Path>>(path: P) -> Result<AsciiHeader> {
    let path = path.as_ref();
    let reader = BufReader::new(File::open(path)?);
    let mut fields = HeaderFields::default();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        if !is_header_line(&line) {
            break;
        }
        let mut parts = line.split_whitespace();
        if let (Some(key), Some(value)) = (parts.next(), parts.next()) {
            fields.set(path, key, value)?;
        }
    }
    Ok(fields.finish(path)?)
}

/// Read an ESRI ASCII grid; the CRS comes from a `.prj` sidecar when one exists.
pub fn read_ascii_grid<P: AsRef<Path>>(path: P) -> Result<RasterLayer> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)?;
    let mut tokens = text.split_whitespace().peekable();

    let mut fields = HeaderFields::default();
    while let Some(&token) = tokens.peek() {
        if !token.chars().next().map_or(false, |c| c.is_ascii_alphabetic()) {
            break;
        }
        tokens.next();
        let value = tokens
            .next()
            .ok_or_else(|| malformed(path, format!("{} has no value", token)))?;
        if !fields.set(path, token, value)? {
            return Err(malformed(path, format!("unknown header key '{}'", token)).into());
        }
    }
    let header = fields.finish(path)?;

    let expected = header.ncols * header.nrows;
    let mut values = Vec::with_capacity(expected);
    for token in tokens {
        let v = token
            .parse::<f64>()
            .map_err(|_| malformed(path, format!("non-numeric cell '{}'", token)))?;
        values.push(v);
    }
    if values.len() != expected {
        return Err(malformed(
            path,
            format!("expected {} cells, found {}", expected, values.len()),
        )
        .into());
    }

    let grid = header.to_grid(&read_crs(path))?;
    let data = Array2::from_shape_vec((header.nrows, header.ncols), values)
        .map_err(|e| malformed(path, e.to_string()))?;
    debug!("Read {}x{} grid from {}", header.ncols, header.nrows, path.display());
    Ok(RasterLayer::new(grid, data, header.nodata)?)
}

/// Write an ESRI ASCII grid plus its `.prj` sidecar.
///
/// NaN cells are written as the layer nodata (or -9999 when the layer has none).
pub fn write_ascii_grid<P: AsRef<Path>>(layer: &RasterLayer, path: P) -> Result<()> {
    let path = path.as_ref();
    let grid = &layer.grid;
    let has_nan = layer.data.iter().any(|v| v.is_nan());
    let nodata = match layer.nodata {
        Some(nd) if !nd.is_nan() => Some(nd),
        _ if has_nan => Some(DEFAULT_NODATA),
        _ => None,
    };

    let mut out = BufWriter::new(File::create(path)?);
    writeln!(out, "ncols {}", grid.width)?;
    writeln!(out, "nrows {}", grid.height)?;
    writeln!(out, "xllcorner {}", grid.origin_x)?;
    writeln!(out, "yllcorner {}", grid.extent().ymin)?;
    if grid.pixel_size_x == grid.pixel_size_y {
        writeln!(out, "cellsize {}", grid.pixel_size_x)?;
    } else {
        writeln!(out, "dx {}", grid.pixel_size_x)?;
        writeln!(out, "dy {}", grid.pixel_size_y)?;
    }
    if let Some(nd) = nodata {
        writeln!(out, "NODATA_value {}", nd)?;
    }

    for row in layer.data.rows() {
        let line: Vec<String> = row
            .iter()
            .map(|&v| match nodata {
                Some(nd) if v.is_nan() => nd.to_string(),
                _ => v.to_string(),
            })
            .collect();
        writeln!(out, "{}", line.join(" "))?;
    }
    out.flush()?;

    if !grid.crs.is_empty() {
        fs::write(prj_path(path), &grid.crs)?;
    }
    Ok(())
}
