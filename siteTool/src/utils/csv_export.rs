use std::fs::{self, File};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::Local;
use csv::Writer;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::backend::traits::RasterBackend;
use crate::error::Result;
use crate::models::cost_record::CostRecord;
use crate::models::raster::RasterLayer;
use crate::utils::logging::{start_timing, FileIOType, OperationCategory};

pub const POLYGON_RESULTS_FILE: &str = "polygon_results.csv";
pub const RUN_SUMMARY_FILE: &str = "run_summary.json";
const STAGING_SUFFIX: &str = ".partial";

/// Column order of the per-polygon table
pub const POLYGON_COLUMNS: [&str; 10] = [
    "polygon_id",
    "rank_mean",
    "road_cost_mean",
    "line_cost_mean",
    "pv_area_ha",
    "pvout_kWh_year",
    "O&M_year",
    "capital_cost",
    "lcoe",
    "final_mean",
];

fn optional(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// Writes run artifacts for one run.
///
/// Files land in `<output_root>/<run_name>.partial` and only move to `<output_root>/<run_name>`
/// on [`ResultExporter::commit`]. An exporter dropped before committing removes its staging
/// directory, so a failed run leaves nothing behind.
pub struct ResultExporter {
    staging_dir: PathBuf,
    output_dir: PathBuf,
    timestamp: String,
    run_name: String,
    verbose_logging: bool,
    committed: bool,
}

impl ResultExporter {
    /// Stage a new run under `output_root`, named by the local time to the second.
    ///
    /// Runs started within the same second get `_1`, `_2`, ... suffixes.
    pub fn new(output_root: impl AsRef<Path>, verbose_logging: bool) -> Result<Self> {
        let root = output_root.as_ref();
        fs::create_dir_all(root)?;
        let timestamp = Local::now().format("%Y%m%d_%H%M%S").to_string();

        let mut attempt = 0usize;
        loop {
            let run_name = match attempt {
                0 => timestamp.clone(),
                n => format!("{}_{}", timestamp, n),
            };
            let output_dir = root.join(&run_name);
            let staging_dir = root.join(format!("{}{}", run_name, STAGING_SUFFIX));
            attempt += 1;
            if output_dir.exists() {
                continue;
            }
            match fs::create_dir(&staging_dir) {
                Ok(()) => {
                    return Ok(Self {
                        staging_dir,
                        output_dir,
                        timestamp,
                        run_name,
                        verbose_logging,
                        committed: false,
                    })
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Final location of the run's artifacts once committed.
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Where artifacts are written until the run is committed.
    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    pub fn run_name(&self) -> &str {
        &self.run_name
    }

    /// Publish the staged artifacts under the final run directory.
    pub fn commit(mut self) -> Result<PathBuf> {
        fs::rename(&self.staging_dir, &self.output_dir)?;
        self.committed = true;
        if self.verbose_logging {
            info!("Committed run outputs to {}", self.output_dir.display());
        }
        Ok(self.output_dir.clone())
    }

    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    /// Write a raster as `<name>.asc` (or under `subdir` when given).
    pub fn write_raster<B: RasterBackend + ?Sized>(
        &self,
        backend: &B,
        subdir: Option<&str>,
        name: &str,
        layer: &RasterLayer,
    ) -> Result<PathBuf> {
        let dir = match subdir {
            Some(sub) => {
                let dir = self.staging_dir.join(sub);
                fs::create_dir_all(&dir)?;
                dir
            }
            None => self.staging_dir.clone(),
        };
        let path = dir.join(format!("{}.asc", name));
        backend.write_raster(layer, &path)?;
        if self.verbose_logging {
            info!("Wrote {}", path.display());
        }
        Ok(path)
    }

    pub fn export_polygon_results(&self, records: &[CostRecord]) -> Result<PathBuf> {
        let _timing = start_timing(
            "export_polygon_results",
            OperationCategory::FileIO { subcategory: FileIOType::ResultsSave },
        );
        let path = self.staging_dir.join(POLYGON_RESULTS_FILE);
        let mut writer = Writer::from_writer(File::create(&path)?);
        writer.write_record(POLYGON_COLUMNS)?;

        for record in records {
            writer.write_record(&[
                record.polygon_id.clone(),
                optional(record.rank_mean),
                record.road_cost.to_string(),
                record.line_cost.to_string(),
                record.pv_area_ha.to_string(),
                record.pv_out_energy.to_string(),
                record.om_cost.to_string(),
                record.capital_cost.to_string(),
                optional(record.lcoe),
                optional(record.final_mean),
            ])?;
        }
        writer.flush()?;

        info!("Exported {} polygon rows to {}", records.len(), path.display());
        Ok(path)
    }

    pub fn export_run_summary<T: Serialize>(&self, summary: &T) -> Result<PathBuf> {
        let path = self.staging_dir.join(RUN_SUMMARY_FILE);
        let file = File::create(&path)?;
        serde_json::to_writer_pretty(file, summary)?;
        if self.verbose_logging {
            info!("Wrote run summary to {}", path.display());
        }
        Ok(path)
    }
}

impl Drop for ResultExporter {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        if let Err(e) = fs::remove_dir_all(&self.staging_dir) {
            warn!("Failed to remove staged outputs {}: {}", self.staging_dir.display(), e);
        } else {
            debug!("Discarded staged outputs {}", self.staging_dir.display());
        }
    }
}
