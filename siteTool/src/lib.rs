// Main module declarations for the site suitability tool

// Error taxonomy shared by every stage
pub mod error;

// Core raster algebra and the run pipeline
pub mod core {
    pub mod grid;
    pub mod reclassify;
    pub mod exclusion;
    pub mod weighting;
    pub mod decay;
    pub mod lcoe;
    pub mod pipeline;
}

// Configuration modules
pub mod config {
    pub mod constants;
    pub mod const_funcs;
    pub mod run_config;
}

// Model definitions
pub mod models {
    pub mod raster;
    pub mod criterion;
    pub mod polygon;
    pub mod cost_record;
}

// Data loaders
pub mod data {
    pub mod criteria_loader;
    pub mod ascii_grid;
    pub mod polygons_loader;
    pub mod tile_discovery;
}

// Raster/vector backend
pub mod backend {
    pub mod traits;
    pub mod native;
}

// Reporting
pub mod analysis {
    pub mod reporting;
}

// Utility functions
pub mod utils {
    pub mod logging;
    pub mod csv_export;
}

// CLI interface
pub mod cli {
    pub mod cli;
}

// Re-export commonly used items
pub use crate::core::grid::{derive_grid, Extent, Grid};
pub use crate::core::pipeline::{run_pipeline, RunOutputs};
pub use crate::backend::native::NativeBackend;
pub use crate::backend::traits::RasterBackend;
pub use crate::config::run_config::RunConfig;
pub use crate::error::{Result, SiteError};
pub use crate::models::raster::RasterLayer;
