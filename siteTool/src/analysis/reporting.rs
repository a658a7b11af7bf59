use crate::core::pipeline::RunOutputs;
use crate::data::tile_discovery::TileReport;
use crate::models::cost_record::CostRecord;

fn opt(value: Option<f64>, precision: usize) -> String {
    match value {
        Some(v) => format!("{:.*}", precision, v),
        None => "-".to_string(),
    }
}

pub fn print_run_summary(outputs: &RunOutputs) {
    let summary = &outputs.summary;
    println!("\nRun {} Summary", summary.timestamp);
    println!("----------------------------------------");
    println!("Grid: {} x {} cells at {} m ({})",
        summary.grid.width, summary.grid.height, summary.grid.pixel_size_x, summary.grid.crs);
    println!("Criteria table: {} ({})", summary.criteria_file, summary.schema_version);
    println!("Weighted Criteria:");
    for rate in &summary.rates {
        println!("  {}: weight {:.3}, rate {:.3}", rate.name, rate.weight, rate.rate);
    }
    println!("Excluded Cells: {}", summary.excluded_cells);
    match &summary.suitability {
        Some(stats) => println!("Suitability: min {:.3}, max {:.3}, mean {:.3} over {} cells",
            stats.min, stats.max, stats.mean, stats.count),
        None => println!("Suitability: no valid cells"),
    }
    if outputs.cost.is_some() {
        println!("Polygons Costed: {}", summary.polygon_count);
        if let Some((min, max)) = summary.lcoe_range {
            println!("System Cost Range: {:.2} - {:.2} c/Wp{}", min, max,
                if summary.degenerate_scale { " (degenerate, flat LCOE scores)" } else { "" });
        }
    }
    println!("Outputs: {}", outputs.output_dir.display());
    println!("----------------------------------------");
}

/// Polygons ordered cheapest LCOE first; polygons without an LCOE go last.
pub fn print_polygon_table(records: &[CostRecord], limit: usize) {
    let mut ranked: Vec<&CostRecord> = records.iter().collect();
    ranked.sort_by(|a, b| match (a.lcoe, b.lcoe) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(std::cmp::Ordering::Equal),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    });

    println!("\nPolygon Results:");
    println!("----------------------------------------");
    println!("{:<20} {:>10} {:>10} {:>14} {:>10} {:>10}", "Polygon", "Rank", "PV (ha)", "Capital ($)", "LCOE", "Final");
    for record in ranked.iter().take(limit) {
        println!("{:<20} {:>10} {:>10.1} {:>14.0} {:>10} {:>10}",
            record.polygon_id,
            opt(record.rank_mean, 2),
            record.pv_area_ha,
            record.capital_cost,
            opt(record.lcoe, 4),
            opt(record.final_mean, 2));
    }
    if ranked.len() > limit {
        println!("... {} more in polygon_results.csv", ranked.len() - limit);
    }
    println!("----------------------------------------");
}

pub fn print_tile_report(report: &TileReport) {
    println!("\nTile Discovery:");
    println!("----------------------------------------");
    println!("Scanned: {}", report.scanned);
    println!("Copied: {}", report.copied);
    println!("Skipped (unreadable): {}", report.skipped);
    for path in &report.copied_paths {
        println!("  {}", path.display());
    }
}
