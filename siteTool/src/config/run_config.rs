use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::backend::traits::ResampleMethod;
use crate::config::constants::*;
use crate::core::exclusion::ExclusionEncoding;
use crate::core::weighting::NodataPolicy;
use crate::error::{Result, SiteError};

/// Inputs and prices for the cost/LCOE stage. Relative paths resolve against `RunConfig::input_dir`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CostConfig {
    pub polygons_path: String,          // candidate polygons (JSON feature collection)
    pub min_area_ha: f64,
    pub bathymetry_path: String,        // depth raster, metres
    pub pvout_path: String,             // specific yield raster, kWh/kWp/year
    pub wind_class_path: Option<String>,
    /// Distance-to-shore raster; derived from the candidate polygons when absent
    pub water_distance_path: Option<String>,
    pub main_roads_path: Option<String>, // 1 = road cell, or road polygons
    pub substations_path: Option<String>,
    pub pv_cost: f64,                   // $/Wp
    pub mooring_cost: f64,
    pub cable_cost: f64,
    pub road_cost: f64,                 // $/m
    pub transmission_cost: f64,         // $/m
    pub om_cost: f64,                   // $/kWp/year
    pub lifetime_years: f64,
    pub kwp_per_ha: f64,
    pub max_pv_cells: usize,
    pub ring_width: f64,                // metres
    pub rank_buffer: f64,               // metres
    pub proximity_max_distance: f64,    // metres
}

impl Default for CostConfig {
    fn default() -> Self {
        Self {
            polygons_path: "waterbodies.json".to_string(),
            min_area_ha: MIN_AREA_HA,
            bathymetry_path: "bathymetry.asc".to_string(),
            pvout_path: "pvout.asc".to_string(),
            wind_class_path: None,
            water_distance_path: None,
            main_roads_path: None,
            substations_path: None,
            pv_cost: PV_COST,
            mooring_cost: MOORING_COST,
            cable_cost: CABLE_COST,
            road_cost: ROAD_COST,
            transmission_cost: TRANSMISSION_COST,
            om_cost: O_M_COST,
            lifetime_years: PV_LIFETIME_YEARS,
            kwp_per_ha: KWP_PER_HA,
            max_pv_cells: MAX_PV_CELLS,
            ring_width: COST_RING_WIDTH,
            rank_buffer: RANK_BUFFER_WIDTH,
            proximity_max_distance: PROXIMITY_MAX_DISTANCE,
        }
    }
}

/// Everything one run needs besides the criterion table itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub criteria_path: String,
    pub input_dir: String,
    pub output_dir: String,
    pub pixel_size: f64,                // used when the AOI row has no target resolution
    pub crs: String,                    // assumed for layers that declare none
    pub nodata_policy: NodataPolicy,
    pub exclusion_encoding: ExclusionEncoding,
    pub resample_method: ResampleMethod,
    /// Also write each criterion's `_scored` / `_exclusion` layer
    pub write_layers: bool,
    pub cost: Option<CostConfig>,
    pub verbose: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            criteria_path: "criteria.csv".to_string(),
            input_dir: "data".to_string(),
            output_dir: "output".to_string(),
            pixel_size: DEFAULT_PIXEL_SIZE,
            crs: DEFAULT_CRS.to_string(),
            nodata_policy: NodataPolicy::default(),
            exclusion_encoding: ExclusionEncoding::default(),
            resample_method: ResampleMethod::default(),
            write_layers: false,
            cost: None,
            verbose: false,
        }
    }
}

fn check(ok: bool, message: impl FnOnce() -> String) -> Result<()> {
    if ok {
        Ok(())
    } else {
        Err(SiteError::Config(message()))
    }
}

fn positive(name: &str, value: f64) -> Result<()> {
    check(value.is_finite() && value > 0.0, || {
        format!("{} must be finite and > 0, got {}", name, value)
    })
}

fn non_negative(name: &str, value: f64) -> Result<()> {
    check(value.is_finite() && value >= 0.0, || {
        format!("{} must be finite and >= 0, got {}", name, value)
    })
}

impl CostConfig {
    pub fn validate(&self) -> Result<()> {
        check(!self.polygons_path.is_empty(), || "cost.polygons_path is empty".to_string())?;
        check(!self.bathymetry_path.is_empty(), || "cost.bathymetry_path is empty".to_string())?;
        check(!self.pvout_path.is_empty(), || "cost.pvout_path is empty".to_string())?;
        non_negative("cost.min_area_ha", self.min_area_ha)?;
        non_negative("cost.pv_cost", self.pv_cost)?;
        non_negative("cost.mooring_cost", self.mooring_cost)?;
        non_negative("cost.cable_cost", self.cable_cost)?;
        non_negative("cost.road_cost", self.road_cost)?;
        non_negative("cost.transmission_cost", self.transmission_cost)?;
        non_negative("cost.om_cost", self.om_cost)?;
        non_negative("cost.rank_buffer", self.rank_buffer)?;
        positive("cost.lifetime_years", self.lifetime_years)?;
        positive("cost.kwp_per_ha", self.kwp_per_ha)?;
        positive("cost.ring_width", self.ring_width)?;
        positive("cost.proximity_max_distance", self.proximity_max_distance)?;
        check(self.max_pv_cells > 0, || "cost.max_pv_cells must be > 0".to_string())
    }
}

impl RunConfig {
    /// Read a JSON config; missing fields take their defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = fs::read_to_string(path.as_ref())?;
        let config: RunConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        fs::write(path.as_ref(), serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        check(!self.criteria_path.is_empty(), || "criteria_path is empty".to_string())?;
        check(!self.output_dir.is_empty(), || "output_dir is empty".to_string())?;
        positive("pixel_size", self.pixel_size)?;
        check(!self.crs.trim().is_empty(), || "crs is empty".to_string())?;
        if let Some(cost) = &self.cost {
            cost.validate()?;
        }
        Ok(())
    }

    /// `name` as given when absolute, otherwise under `input_dir`.
    pub fn resolve_input(&self, name: &str) -> PathBuf {
        let path = Path::new(name);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            Path::new(&self.input_dir).join(path)
        }
    }

    pub fn criteria_file(&self) -> PathBuf {
        let path = Path::new(&self.criteria_path);
        if path.is_absolute() || path.exists() {
            path.to_path_buf()
        } else {
            self.resolve_input(&self.criteria_path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_validate() {
        let config = RunConfig::default();
        assert!(config.validate().is_ok());

        let with_cost = RunConfig {
            cost: Some(CostConfig::default()),
            ..RunConfig::default()
        };
        assert!(with_cost.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let bad_pixel = RunConfig {
            pixel_size: 0.0,
            ..RunConfig::default()
        };
        assert!(matches!(bad_pixel.validate(), Err(SiteError::Config(_))));

        let bad_cost = RunConfig {
            cost: Some(CostConfig {
                lifetime_years: 0.0,
                ..CostConfig::default()
            }),
            ..RunConfig::default()
        };
        assert!(matches!(bad_cost.validate(), Err(SiteError::Config(_))));

        let no_cells = CostConfig {
            max_pv_cells: 0,
            ..CostConfig::default()
        };
        assert!(no_cells.validate().is_err());
    }

    #[test]
    fn test_load_partial_json() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("run.json");
        fs::write(
            &path,
            r#"{"input_dir": "/data/study", "nodata_policy": "total_weight",
                "exclusion_encoding": "presence",
                "cost": {"pvout_path": "pvout_kenya.asc", "max_pv_cells": 120}}"#,
        )
        .unwrap();

        let config = RunConfig::load(&path).unwrap();
        assert_eq!(config.nodata_policy, NodataPolicy::TotalWeight);
        assert_eq!(config.exclusion_encoding, ExclusionEncoding::Presence);
        assert_eq!(config.pixel_size, DEFAULT_PIXEL_SIZE);
        let cost = config.cost.clone().unwrap();
        assert_eq!(cost.max_pv_cells, 120);
        assert_eq!(cost.road_cost, ROAD_COST);
        assert_eq!(config.resolve_input("slope.asc"), PathBuf::from("/data/study/slope.asc"));

        let copy = dir.path().join("copy.json");
        config.save(&copy).unwrap();
        assert_eq!(RunConfig::load(&copy).unwrap(), config);
    }
}
