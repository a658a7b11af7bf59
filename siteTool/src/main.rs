use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};

use sitetool::analysis::reporting;
use sitetool::cli::cli::{Args, Command};
use sitetool::core::pipeline::run_pipeline_with_progress;
use sitetool::data::criteria_loader::write_template;
use sitetool::data::polygons_loader::load_polygons;
use sitetool::data::tile_discovery::discover_tiles;
use sitetool::models::polygon::collection_extent;
use sitetool::utils::logging::{self, FileIOType, OperationCategory};
use sitetool::{NativeBackend, RunConfig};

fn main() -> Result<()> {
    let args = Args::parse();

    logging::init_logging(args.enable_timing()).context("Failed to initialise logging")?;

    println!("Site Suitability and LCOE Model");

    match args.command() {
        Command::Run { config, criteria, input_dir, output_dir, top, verbose } => {
            let mut run_config = match config {
                Some(path) => RunConfig::load(path)
                    .with_context(|| format!("Failed to load run configuration {}", path))?,
                None => RunConfig::default(),
            };
            if let Some(criteria) = criteria {
                run_config.criteria_path = criteria.clone();
            }
            if let Some(input_dir) = input_dir {
                run_config.input_dir = input_dir.clone();
            }
            if let Some(output_dir) = output_dir {
                run_config.output_dir = output_dir.clone();
            }
            run_config.verbose |= *verbose;

            let progress = ProgressBar::new(0);
            progress.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} Preparing layers [{bar:30.cyan/blue}] {pos}/{len}")
                    .context("Invalid progress template")?,
            );

            let backend = NativeBackend::new();
            let outputs = run_pipeline_with_progress(&run_config, &backend, &progress)
                .context("Suitability run failed")?;

            reporting::print_run_summary(&outputs);
            if let Some(cost) = &outputs.cost {
                reporting::print_polygon_table(&cost.records, *top);
            }
        }
        Command::Template { input_dir, output } => {
            let rows = write_template(input_dir, output)
                .with_context(|| format!("Failed to write criterion template from {}", input_dir))?;
            println!("Wrote {} rows to {}", rows, output);
        }
        Command::Tiles { root, aoi, dest, workers } => {
            let _timing = logging::start_timing("discover_tiles",
                OperationCategory::FileIO { subcategory: FileIOType::TileCopy });
            let polygons = load_polygons(aoi)
                .with_context(|| format!("Failed to read AOI {}", aoi))?;
            let extent = collection_extent(&polygons.polygons)
                .with_context(|| format!("AOI {} has no polygons", aoi))?;
            let report = discover_tiles(Path::new(root), &extent, Path::new(dest), *workers)
                .context("Tile discovery failed")?;
            reporting::print_tile_report(&report);
        }
    }

    logging::print_timing_report();
    Ok(())
}
