use thiserror::Error;

/// Raster geometry problems: invalid pixel size, empty extent, or two layers on different grids.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GridError {
    #[error("Invalid pixel size: {0} (must be finite and > 0)")]
    InvalidPixelSize(f64),

    #[error("Extent has zero area: x [{xmin}, {xmax}], y [{ymin}, {ymax}]")]
    EmptyExtent { xmin: f64, ymin: f64, xmax: f64, ymax: f64 },

    #[error("Grid mismatch on {field}: expected {expected}, got {actual}")]
    Mismatch {
        field: &'static str,
        expected: String,
        actual: String,
    },

    #[error("Array shape {rows}x{cols} does not match grid {height}x{width}")]
    ShapeMismatch {
        rows: usize,
        cols: usize,
        height: usize,
        width: usize,
    },
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("Malformed range '{value}' in column '{column}': {reason}")]
pub struct RangeSyntaxError {
    pub column: String,
    pub value: String,
    pub reason: String,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum WeightError {
    #[error("Total layer weight is zero with {0} scored criteria")]
    ZeroTotal(usize),

    #[error("Invalid weight {weight} for criterion '{name}'")]
    Invalid { name: String, weight: f64 },
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("Degenerate value range while rescaling {what}: {reason}")]
pub struct DegenerateScaleError {
    pub what: String,
    pub reason: String,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MissingAoiError {
    #[error("No criterion is tagged AOI")]
    Missing,

    #[error("More than one criterion is tagged AOI: {0:?}")]
    Multiple(Vec<String>),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchemaError {
    #[error("Required column '{0}' is missing from the criterion table")]
    MissingColumn(String),

    #[error("Row {row}: column '{column}' has invalid value '{value}'")]
    InvalidValue {
        row: usize,
        column: String,
        value: String,
    },

    #[error("Criterion table has no rows")]
    Empty,
}

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Unsupported reprojection from {from} to {to}")]
    UnsupportedReprojection { from: String, to: String },

    #[error("Unsupported file type: {0}")]
    UnsupportedFormat(String),

    #[error("Malformed raster file {path}: {reason}")]
    MalformedRaster { path: String, reason: String },

    #[error("Malformed vector file {path}: {reason}")]
    MalformedVector { path: String, reason: String },

    #[error("Invalid resample factors: {x_factor} x {y_factor}")]
    InvalidResample { x_factor: f64, y_factor: f64 },

    #[error("Clip extent does not intersect the raster")]
    EmptyClip,
}

/// Every failure a run can surface. All are precondition failures; a run that hits one writes nothing.
#[derive(Error, Debug)]
pub enum SiteError {
    #[error("Grid error: {0}")]
    Grid(#[from] GridError),

    #[error("Range syntax error: {0}")]
    RangeSyntax(#[from] RangeSyntaxError),

    #[error("Weight error: {0}")]
    Weight(#[from] WeightError),

    #[error("{0}")]
    DegenerateScale(#[from] DegenerateScaleError),

    #[error("AOI error: {0}")]
    MissingAoi(#[from] MissingAoiError),

    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SiteError>;
