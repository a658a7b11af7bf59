use std::path::{Path, PathBuf};

use indicatif::ProgressBar;
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info};

use crate::backend::traits::RasterBackend;
use crate::config::const_funcs::calc_wind_score;
use crate::config::run_config::{CostConfig, RunConfig};
use crate::core::decay::{decay_from_features, DecayShape};
use crate::core::exclusion::{combine_exclusions, mask_from_exclusive_hits, to_mask, ExclusionEncoding};
use crate::core::grid::{derive_grid, Grid};
use crate::core::lcoe::{
    classify_cost_drivers, compute_cost_records, final_composite, rescale_inverse, system_cost_surface, CostInputs,
    RescaleOutcome,
};
use crate::core::reclassify::{reclassify, stretch_to_scale, ReclassMode};
use crate::core::weighting::{combine_weighted, ScoredLayer, WeightRate};
use crate::data::criteria_loader::{load_criteria, Catalog};
use crate::data::polygons_loader::filter_by_min_area;
use crate::error::{Result, SiteError};
use crate::models::cost_record::CostRecord;
use crate::models::criterion::{Criterion, LayerKind, Scoring};
use crate::models::polygon::collection_extent;
use crate::models::raster::{LayerStats, RasterLayer};
use crate::utils::csv_export::ResultExporter;
use crate::utils::logging::{
    start_timing, FileIOType, OperationCategory, PreparationType, ScoringType,
};

/// Source CRS and resolutions to honour when bringing a raster onto the run grid
#[derive(Debug, Clone, Default)]
struct SourceHints<'a> {
    crs: Option<&'a str>,
    source_resolution: Option<f64>,
    target_resolution: Option<f64>,
}

impl<'a> SourceHints<'a> {
    fn from_criterion(criterion: &'a Criterion) -> Self {
        Self {
            crs: criterion.source_crs.as_deref(),
            source_resolution: criterion.source_resolution,
            target_resolution: criterion.target_resolution,
        }
    }
}

/// Cost-stage layers and per-polygon results
#[derive(Debug, Clone)]
pub struct CostOutputs {
    pub lcoe_mask: RasterLayer,
    pub lcoe_scaled: RescaleOutcome,
    pub final_surface: RasterLayer,
    pub records: Vec<CostRecord>,
}

/// Machine-readable record of one run, written as `run_summary.json`
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub timestamp: String,
    pub criteria_file: String,
    pub schema_version: String,
    pub grid: Grid,
    pub rates: Vec<WeightRate>,
    pub sentinel: f64,
    pub suitability: Option<LayerStats>,
    pub excluded_cells: usize,
    pub degenerate_scale: bool,
    pub polygon_count: usize,
    pub lcoe_range: Option<(f64, f64)>,
}

#[derive(Debug, Clone)]
pub struct RunOutputs {
    pub output_dir: PathBuf,
    pub grid: Grid,
    pub suitability: RasterLayer,
    pub exclusion_mask: RasterLayer,
    pub cost: Option<CostOutputs>,
    pub summary: RunSummary,
}

fn apply_crs(mut layer: RasterLayer, crs: &str) -> RasterLayer {
    if layer.grid.crs.is_empty() {
        layer.grid.crs = crs.to_string();
    }
    layer
}

/// Read a raster and bring it onto `grid`: reproject, resample, clip, then check alignment.
fn prepare_raster<B: RasterBackend + ?Sized>(
    backend: &B,
    config: &RunConfig,
    grid: &Grid,
    path: &Path,
    hints: &SourceHints,
) -> Result<RasterLayer> {
    let raw = {
        let _timing = start_timing("read_raster", OperationCategory::Preparation { subcategory: PreparationType::Read });
        backend.read_raster(path)?
    };
    let source_crs = hints
        .crs
        .map(|c| c.to_string())
        .or_else(|| (!raw.grid.crs.is_empty()).then(|| raw.grid.crs.clone()))
        .unwrap_or_else(|| config.crs.clone());
    let mut layer = apply_crs(raw, &source_crs);

    if !grid.same_crs(&source_crs) {
        let _timing = start_timing("reproject", OperationCategory::Preparation { subcategory: PreparationType::Reproject });
        layer = backend.reproject(&layer, &source_crs, &grid.crs)?;
    }
    layer.grid.crs = grid.crs.clone();

    let actual = (
        layer.grid.pixel_size_x / grid.pixel_size_x,
        layer.grid.pixel_size_y / grid.pixel_size_y,
    );
    if (actual.0 - 1.0).abs() > 1e-9 || (actual.1 - 1.0).abs() > 1e-9 {
        // Table resolutions take precedence over header cell sizes
        let (x_factor, y_factor) = match (hints.source_resolution, hints.target_resolution) {
            (Some(source), Some(target)) if source != target => (source / target, source / target),
            _ => actual,
        };
        let _timing = start_timing("resample", OperationCategory::Preparation { subcategory: PreparationType::Resample });
        debug!("Resampling {} by {:.4} x {:.4}", path.display(), x_factor, y_factor);
        layer = backend.resample(&layer, x_factor, y_factor, config.resample_method)?;
    }

    let clipped = {
        let _timing = start_timing("clip_to_extent", OperationCategory::Preparation { subcategory: PreparationType::Clip });
        backend.clip_to_extent(&layer, &grid.extent())?
    };
    grid.ensure_aligned(&clipped.grid)?;
    Ok(clipped)
}

/// A layer of 1 = feature / 0 = background on `grid`, from polygons or a raster.
fn prepare_features<B: RasterBackend + ?Sized>(
    backend: &B,
    config: &RunConfig,
    grid: &Grid,
    path: &Path,
    hints: &SourceHints,
) -> Result<RasterLayer> {
    if is_vector(path) {
        let _timing = start_timing("rasterize_vector", OperationCategory::Preparation { subcategory: PreparationType::Rasterize });
        Ok(backend.rasterize_vector(path, grid, 1.0, 0.0)?.with_nodata(None))
    } else {
        prepare_raster(backend, config, grid, path, hints)
    }
}

fn is_vector(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()).map(|e| e.to_ascii_lowercase()).as_deref(),
        Some("json") | Some("geojson")
    )
}

fn prepare_criterion<B: RasterBackend + ?Sized>(
    backend: &B,
    config: &RunConfig,
    grid: &Grid,
    criterion: &Criterion,
) -> Result<RasterLayer> {
    let path = config.resolve_input(&criterion.file_name);
    let hints = SourceHints::from_criterion(criterion);
    let layer = match criterion.kind() {
        LayerKind::Vector => prepare_features(backend, config, grid, &path, &hints)?,
        LayerKind::Raster => prepare_raster(backend, config, grid, &path, &hints)?,
    };
    debug!("Prepared {} ({:?})", criterion.name(), criterion.roles());
    Ok(layer)
}

/// The run grid and the 0/1 AOI mask on it.
fn build_grid<B: RasterBackend + ?Sized>(
    backend: &B,
    config: &RunConfig,
    aoi: &Criterion,
) -> Result<(Grid, RasterLayer)> {
    let path = config.resolve_input(&aoi.file_name);
    let crs = aoi
        .target_crs
        .clone()
        .or_else(|| aoi.source_crs.clone())
        .unwrap_or_else(|| config.crs.clone());

    match aoi.kind() {
        LayerKind::Vector => {
            let polygons = backend.read_polygons(&path)?;
            let extent = collection_extent(&polygons)
                .ok_or_else(|| SiteError::Config(format!("AOI {} has no polygons", aoi.file_name)))?;
            let pixel_size = aoi.target_resolution.unwrap_or(config.pixel_size);
            let grid = derive_grid(&extent, pixel_size, &crs)?;
            let mask = backend.rasterize_polygons(&polygons, &grid, 1.0, 0.0)?;
            Ok((grid, mask))
        }
        LayerKind::Raster => {
            let layer = apply_crs(backend.read_raster(&path)?, &crs);
            let mask = layer.map(None, |v| if layer.is_nodata(v) || v == 0.0 { 0.0 } else { 1.0 });
            Ok((layer.grid.clone(), mask))
        }
    }
}

fn score_criterion<B: RasterBackend + ?Sized>(
    backend: &B,
    criterion: &Criterion,
    layer: &RasterLayer,
) -> Result<RasterLayer> {
    match criterion.scoring {
        Scoring::Bands => {
            let _timing = start_timing("reclassify", OperationCategory::Scoring { subcategory: ScoringType::Reclassify });
            Ok(reclassify(layer, &criterion.bands, ReclassMode::Scored))
        }
        Scoring::Attractive { max_distance } => {
            let _timing = start_timing("decay", OperationCategory::Scoring { subcategory: ScoringType::Decay });
            decay_from_features(backend, layer, DecayShape::Attractive, max_distance)
        }
        Scoring::Repulsive { max_distance } => {
            let _timing = start_timing("decay", OperationCategory::Scoring { subcategory: ScoringType::Decay });
            decay_from_features(backend, layer, DecayShape::Repulsive, max_distance)
        }
        Scoring::Linear => {
            let _timing = start_timing("stretch", OperationCategory::Scoring { subcategory: ScoringType::Stretch });
            Ok(stretch_to_scale(layer))
        }
        Scoring::WindSpeed => Ok(layer.map(None, |v| {
            if layer.is_nodata(v) {
                0.0
            } else {
                calc_wind_score(v).max(0.0)
            }
        })),
    }
}

/// Encoding of a direct exclusion layer. Rasterized polygons are always 1 = feature, so they
/// read as presence whatever the configured raster encoding is.
fn exclusion_encoding_for(criterion: &Criterion, config: &RunConfig) -> ExclusionEncoding {
    match criterion.kind() {
        LayerKind::Vector => ExclusionEncoding::Presence,
        LayerKind::Raster => config.exclusion_encoding,
    }
}

/// The 1 = allowed mask a criterion contributes: its `exclusion` flag, its
/// `exclusive_range` band, or both multiplied together.
fn exclusion_mask_for(criterion: &Criterion, layer: &RasterLayer, config: &RunConfig) -> Result<RasterLayer> {
    let mut masks = Vec::with_capacity(2);
    if criterion.is_direct_exclusion() {
        masks.push(to_mask(layer, exclusion_encoding_for(criterion, config)));
    }
    if criterion.has_exclusive_range() {
        masks.push(mask_from_exclusive_hits(&reclassify(layer, &criterion.bands, ReclassMode::Exclusive)));
    }
    match masks.len() {
        1 => Ok(masks.remove(0)),
        _ => Ok(combine_exclusions(&layer.grid, &masks)?),
    }
}

fn proximity_from<B: RasterBackend + ?Sized>(
    backend: &B,
    config: &RunConfig,
    grid: &Grid,
    path: Option<&String>,
    max_distance: f64,
) -> Result<Option<RasterLayer>> {
    match path {
        Some(name) => {
            let features = prepare_features(backend, config, grid, &config.resolve_input(name), &SourceHints::default())?;
            Ok(Some(backend.compute_proximity(&features, max_distance)?))
        }
        None => Ok(None),
    }
}

fn run_cost_stage<B: RasterBackend + ?Sized>(
    backend: &B,
    config: &RunConfig,
    cost: &CostConfig,
    grid: &Grid,
    suitability: &RasterLayer,
    exclusion: &RasterLayer,
) -> Result<CostOutputs> {
    let hints = SourceHints::default();
    let all_polygons = backend.read_polygons(&config.resolve_input(&cost.polygons_path))?;
    let water = backend.rasterize_polygons(&all_polygons, grid, 1.0, 0.0)?;
    let polygons = filter_by_min_area(all_polygons, cost.min_area_ha);

    let bathymetry = prepare_raster(backend, config, grid, &config.resolve_input(&cost.bathymetry_path), &hints)?;
    let pvout = prepare_raster(backend, config, grid, &config.resolve_input(&cost.pvout_path), &hints)?;
    let wind = match &cost.wind_class_path {
        Some(name) => Some(prepare_raster(backend, config, grid, &config.resolve_input(name), &hints)?),
        None => None,
    };
    let water_distance = match &cost.water_distance_path {
        Some(name) => prepare_raster(backend, config, grid, &config.resolve_input(name), &hints)?,
        None => {
            // Distance to shore inside the water bodies; land cells stay at 0
            let shore = water.map(None, |v| if v == 1.0 { 0.0 } else { 1.0 });
            let distance = backend.compute_proximity(&shore, cost.proximity_max_distance)?;
            distance.zip_map(&water, None, |d, w| if w == 1.0 { d } else { 0.0 })?
        }
    };
    let road_distance = proximity_from(backend, config, grid, cost.main_roads_path.as_ref(), cost.proximity_max_distance)?;
    let line_distance = proximity_from(backend, config, grid, cost.substations_path.as_ref(), cost.proximity_max_distance)?;

    let multipliers = classify_cost_drivers(grid, &bathymetry, &water_distance, wind.as_ref())?;
    let lcoe_mask = system_cost_surface(&multipliers, cost)?;
    let lcoe_scaled = rescale_inverse(&lcoe_mask)?;
    let final_surface = final_composite(suitability, lcoe_scaled.layer(), exclusion)?;

    let inputs = CostInputs {
        lcoe_mask: &lcoe_mask,
        pvout: &pvout,
        road_distance: road_distance.as_ref(),
        line_distance: line_distance.as_ref(),
        suitability,
        final_surface: &final_surface,
    };
    let records = compute_cost_records(backend, &polygons, &inputs, cost)?;

    Ok(CostOutputs {
        lcoe_mask,
        lcoe_scaled,
        final_surface,
        records,
    })
}

struct Artifacts<'a> {
    catalog: &'a Catalog,
    scored: &'a [ScoredLayer],
    exclusions: &'a [(String, RasterLayer)],
}

fn write_outputs<B: RasterBackend + ?Sized>(
    backend: &B,
    config: &RunConfig,
    grid: &Grid,
    suitability: &RasterLayer,
    exclusion_mask: &RasterLayer,
    rates: Vec<WeightRate>,
    sentinel: f64,
    cost: Option<CostOutputs>,
    artifacts: Artifacts,
) -> Result<RunOutputs> {
    let _timing = start_timing("write_outputs", OperationCategory::FileIO { subcategory: FileIOType::ResultsSave });
    // Dropped on any early return below, taking the staged files with it
    let exporter = ResultExporter::new(&config.output_dir, config.verbose)?;

    exporter.write_raster(backend, None, "suitability", suitability)?;
    exporter.write_raster(backend, None, "exclusion_mask", exclusion_mask)?;
    if config.write_layers {
        for layer in artifacts.scored {
            exporter.write_raster(backend, Some("layers"), &format!("{}_scored", layer.name), &layer.score)?;
        }
        for (name, mask) in artifacts.exclusions {
            exporter.write_raster(backend, Some("layers"), &format!("{}_exclusion", name), mask)?;
        }
    }

    let mut lcoe_range = None;
    if let Some(outputs) = &cost {
        exporter.write_raster(backend, None, "lcoe_mask", &outputs.lcoe_mask)?;
        exporter.write_raster(backend, None, "lcoe_scaled", outputs.lcoe_scaled.layer())?;
        exporter.write_raster(backend, None, "final", &outputs.final_surface)?;
        exporter.export_polygon_results(&outputs.records)?;
        lcoe_range = match &outputs.lcoe_scaled {
            RescaleOutcome::Scaled { min, max, .. } => Some((*min, *max)),
            RescaleOutcome::Degenerate { value, .. } => Some((*value, *value)),
        };
    }

    let summary = RunSummary {
        timestamp: exporter.run_name().to_string(),
        criteria_file: config.criteria_file().display().to_string(),
        schema_version: format!("{:?}", artifacts.catalog.version),
        grid: grid.clone(),
        rates,
        sentinel,
        suitability: suitability.statistics(),
        excluded_cells: exclusion_mask.count_where(|v| v == 0.0),
        degenerate_scale: cost.as_ref().map_or(false, |c| c.lcoe_scaled.is_degenerate()),
        polygon_count: cost.as_ref().map_or(0, |c| c.records.len()),
        lcoe_range,
    };
    exporter.export_run_summary(&summary)?;
    let output_dir = exporter.commit()?;
    info!("Run outputs written to {}", output_dir.display());

    Ok(RunOutputs {
        output_dir,
        grid: grid.clone(),
        suitability: suitability.clone(),
        exclusion_mask: exclusion_mask.clone(),
        cost,
        summary,
    })
}

/// Run the whole model with no progress display.
pub fn run_pipeline<B: RasterBackend + ?Sized>(config: &RunConfig, backend: &B) -> Result<RunOutputs> {
    run_pipeline_with_progress(config, backend, &ProgressBar::hidden())
}

/// Run the whole model; `progress` advances once per prepared layer.
///
/// Nothing is written until every stage has succeeded.
pub fn run_pipeline_with_progress<B: RasterBackend + ?Sized>(
    config: &RunConfig,
    backend: &B,
    progress: &ProgressBar,
) -> Result<RunOutputs> {
    config.validate()?;

    let catalog = {
        let _timing = start_timing("load_criteria", OperationCategory::Catalog);
        load_criteria(config.criteria_file())?
    };
    let aoi = catalog.aoi()?;
    let (grid, aoi_mask) = build_grid(backend, config, aoi)?;
    info!(
        "Run grid {}x{} at {} x {} in {}",
        grid.width, grid.height, grid.pixel_size_x, grid.pixel_size_y, grid.crs
    );

    let active: Vec<&Criterion> = catalog.criteria.iter().filter(|c| !c.is_aoi()).collect();
    progress.set_length(active.len() as u64);
    let prepared = active
        .par_iter()
        .map(|criterion| {
            let layer = prepare_criterion(backend, config, &grid, criterion);
            progress.inc(1);
            layer.map(|layer| (*criterion, layer))
        })
        .collect::<Result<Vec<_>>>()?;
    progress.finish_and_clear();

    let scored = prepared
        .par_iter()
        .filter(|(criterion, _)| criterion.is_scored())
        .map(|(criterion, layer)| -> Result<ScoredLayer> {
            Ok(ScoredLayer {
                name: criterion.name().to_string(),
                weight: criterion.weight.unwrap_or(0.0),
                score: score_criterion(backend, criterion, layer)?,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let exclusions = prepared
        .par_iter()
        .filter(|(criterion, _)| criterion.is_exclusion())
        .map(|(criterion, layer)| -> Result<(String, RasterLayer)> {
            Ok((criterion.name().to_string(), exclusion_mask_for(criterion, layer, config)?))
        })
        .collect::<Result<Vec<_>>>()?;

    let (exclusion_mask, weighted) = {
        let _timing = start_timing("combine", OperationCategory::Combination);
        let masks: Vec<RasterLayer> = exclusions.iter().map(|(_, mask)| mask.clone()).collect();
        let exclusion_mask = combine_exclusions(&grid, &masks)?;
        let weighted = combine_weighted(&grid, &scored, &exclusion_mask, &aoi_mask, config.nodata_policy)?;
        (exclusion_mask, weighted)
    };

    let cost = match &config.cost {
        Some(cost) => Some(run_cost_stage(
            backend,
            config,
            cost,
            &grid,
            &weighted.surface,
            &exclusion_mask,
        )?),
        None => None,
    };

    write_outputs(
        backend,
        config,
        &grid,
        &weighted.surface,
        &exclusion_mask,
        weighted.rates,
        weighted.sentinel,
        cost,
        Artifacts {
            catalog: &catalog,
            scored: &scored,
            exclusions: &exclusions,
        },
    )
}
