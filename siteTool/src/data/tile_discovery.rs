use std::fs;
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::core::grid::Extent;
use crate::data::ascii_grid::{prj_path, read_header};
use crate::error::{Result, SiteError};

#[derive(Debug, Clone, Default, Serialize)]
pub struct TileReport {
    pub scanned: usize,
    pub copied: usize,
    pub skipped: usize,
    pub copied_paths: Vec<PathBuf>,
}

enum TileOutcome {
    Copied(PathBuf),
    Outside,
    Unreadable,
}

/// All `.asc` files under `root`, sorted for a stable scan order.
pub fn find_tiles(root: &Path) -> Result<Vec<PathBuf>> {
    let mut tiles = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.is_dir() {
                pending.push(path);
            } else if path
                .extension()
                .and_then(|e| e.to_str())
                .map_or(false, |e| e.eq_ignore_ascii_case("asc"))
            {
                tiles.push(path);
            }
        }
    }
    tiles.sort();
    Ok(tiles)
}

fn process_tile(tile: &Path, aoi: &Extent, dest: &Path) -> TileOutcome {
    let header = match read_header(tile) {
        Ok(header) => header,
        Err(e) => {
            warn!("Skipping unreadable tile {}: {}", tile.display(), e);
            return TileOutcome::Unreadable;
        }
    };
    if !header.extent().touches(aoi) {
        return TileOutcome::Outside;
    }

    let file_name = match tile.file_name() {
        Some(name) => name,
        None => return TileOutcome::Unreadable,
    };
    let target = dest.join(file_name);
    if let Err(e) = fs::copy(tile, &target) {
        warn!("Failed to copy {}: {}", tile.display(), e);
        return TileOutcome::Unreadable;
    }
    let prj = prj_path(tile);
    if prj.exists() {
        if let Err(e) = fs::copy(&prj, prj_path(&target)) {
            warn!("Failed to copy {}: {}", prj.display(), e);
        }
    }
    debug!("Copied tile {}", tile.display());
    TileOutcome::Copied(target)
}

/// Copy every tile under `root` whose bounds overlap `aoi` into `dest`.
///
/// Tiles are checked in parallel; each worker handles one file and outputs never collide
/// unless two tiles share a file name.
pub fn discover_tiles(root: &Path, aoi: &Extent, dest: &Path, workers: Option<usize>) -> Result<TileReport> {
    fs::create_dir_all(dest)?;
    let tiles = find_tiles(root)?;

    let run = || -> Vec<TileOutcome> {
        tiles
            .par_iter()
            .map(|tile| process_tile(tile, aoi, dest))
            .collect()
    };
    let outcomes = match workers {
        Some(n) => rayon::ThreadPoolBuilder::new()
            .num_threads(n)
            .build()
            .map_err(|e| SiteError::Config(format!("tile worker pool: {}", e)))?
            .install(run),
        None => run(),
    };

    let mut report = TileReport {
        scanned: tiles.len(),
        ..TileReport::default()
    };
    for outcome in outcomes {
        match outcome {
            TileOutcome::Copied(path) => {
                report.copied += 1;
                report.copied_paths.push(path);
            }
            TileOutcome::Outside => {}
            TileOutcome::Unreadable => report.skipped += 1,
        }
    }

    info!(
        "Tile scan of {}: {} scanned, {} copied, {} skipped",
        root.display(),
        report.scanned,
        report.copied,
        report.skipped
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_tile(path: &Path, xll: f64, yll: f64) {
        let text = format!("ncols 2\nnrows 2\nxllcorner {}\nyllcorner {}\ncellsize 10\n1 2\n3 4\n", xll, yll);
        fs::write(path, text).unwrap();
    }

    #[test]
    fn test_discover_copies_overlapping_tiles() {
        let root = tempdir().unwrap();
        let dest = tempdir().unwrap();
        fs::create_dir_all(root.path().join("north/deep")).unwrap();

        write_tile(&root.path().join("a_bathymetry.asc"), 0.0, 0.0);
        write_tile(&root.path().join("north/deep/b_bathymetry.asc"), 15.0, 15.0);
        write_tile(&root.path().join("north/c_bathymetry.asc"), 500.0, 500.0);
        fs::write(root.path().join("north/broken.asc"), "not a grid\n").unwrap();
        fs::write(root.path().join("a_bathymetry.prj"), "EPSG:32736").unwrap();
        fs::write(root.path().join("readme.txt"), "ignored").unwrap();

        let aoi = Extent::new(5.0, 5.0, 25.0, 25.0);
        let report = discover_tiles(root.path(), &aoi, dest.path(), Some(2)).unwrap();

        assert_eq!(report.scanned, 4);
        assert_eq!(report.copied, 2);
        assert_eq!(report.skipped, 1);
        assert!(dest.path().join("a_bathymetry.asc").exists());
        assert!(dest.path().join("a_bathymetry.prj").exists());
        assert!(dest.path().join("b_bathymetry.asc").exists());
        assert!(!dest.path().join("c_bathymetry.asc").exists());
    }

    #[test]
    fn test_tile_containing_aoi_is_copied() {
        let root = tempdir().unwrap();
        let dest = tempdir().unwrap();
        write_tile(&root.path().join("big.asc"), 0.0, 0.0);

        let inside = Extent::new(2.0, 2.0, 3.0, 3.0);
        let report = discover_tiles(root.path(), &inside, dest.path(), None).unwrap();
        assert_eq!(report.copied, 1);
    }

    #[test]
    fn test_edge_touching_tile_is_copied() {
        let root = tempdir().unwrap();
        let dest = tempdir().unwrap();
        // tile spans 0..20 in both axes
        write_tile(&root.path().join("east_edge.asc"), 0.0, 0.0);
        write_tile(&root.path().join("gap.asc"), -30.0, 0.0);

        let aoi = Extent::new(20.0, 5.0, 40.0, 15.0);
        let report = discover_tiles(root.path(), &aoi, dest.path(), None).unwrap();
        assert_eq!(report.copied, 1);
        assert!(dest.path().join("east_edge.asc").exists());
        assert!(!dest.path().join("gap.asc").exists());
    }
}
