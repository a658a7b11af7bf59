//! Raw raster values to ordinal suitability scores.
//!
//! Every function here is pure: the input layer is borrowed and a new layer is returned,
//! so independent criteria can be scored in parallel.

use tracing::{debug, warn};

use crate::models::criterion::{BandLevel, Bands, ResolvedBand};
use crate::models::raster::RasterLayer;

/// Which output a reclassification produces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReclassMode {
    /// Score output: band index for the last matching band, 0 elsewhere.
    Scored,
    /// Derived exclusion output: 1 inside the exclusive band, 0 elsewhere.
    Exclusive,
}

/// Resolve the bands a mode evaluates, in evaluation order, paired with the value they write.
pub fn resolve_bands(raw: &RasterLayer, bands: &Bands, mode: ReclassMode) -> Vec<(BandLevel, f64, ResolvedBand)> {
    let stats = raw.statistics();
    let levels: &[BandLevel] = match mode {
        ReclassMode::Exclusive => &BandLevel::ORDER[..1],
        ReclassMode::Scored => &BandLevel::ORDER[..],
    };

    levels
        .iter()
        .filter_map(|&level| {
            let spec = bands.get(level)?;
            let resolved = spec.resolve(stats.as_ref())?;
            let value = match mode {
                ReclassMode::Exclusive => 1.0,
                ReclassMode::Scored => level.score(),
            };
            Some((level, value, resolved))
        })
        .collect()
}

/// Pairs of suitability bands whose ranges share values; the later band wins on those cells.
pub fn overlapping_bands(resolved: &[(BandLevel, f64, ResolvedBand)]) -> Vec<(BandLevel, BandLevel)> {
    let mut pairs = Vec::new();
    let suitability: Vec<_> = resolved
        .iter()
        .filter(|(level, _, _)| *level != BandLevel::Exclusive)
        .collect();
    for (i, (a_level, _, a)) in suitability.iter().enumerate() {
        for (b_level, _, b) in suitability.iter().skip(i + 1) {
            if a.overlaps(b) {
                pairs.push((*a_level, *b_level));
            }
        }
    }
    pairs
}

/// Map a raw layer through its criterion bands.
///
/// Bands are evaluated exclusive → most_suitable → suitable → least_suitable and a later match
/// overwrites an earlier one. Nodata cells score 0 and are left out of the min/max used for
/// open-ended bands.
pub fn reclassify(raw: &RasterLayer, bands: &Bands, mode: ReclassMode) -> RasterLayer {
    let resolved = resolve_bands(raw, bands, mode);

    if mode == ReclassMode::Scored {
        for (earlier, later) in overlapping_bands(&resolved) {
            warn!(
                "Bands {} and {} overlap; cells in both take the {} score",
                earlier, later, later
            );
        }
    }
    if resolved.is_empty() {
        debug!("No bands resolved for {:?} reclassification; output is all zero", mode);
    }

    raw.map(None, |v| {
        if raw.is_nodata(v) {
            return 0.0;
        }
        let mut out = 0.0;
        for (_, value, band) in &resolved {
            if band.contains(v) {
                out = *value;
            }
        }
        out
    })
}

/// Linear stretch of the valid range onto 1..10: `9 * (v - min) / (max - min) + 1`.
///
/// Nodata cells score 0. A layer with a single distinct value scores 1 everywhere it is valid.
pub fn stretch_to_scale(raw: &RasterLayer) -> RasterLayer {
    let stats = match raw.statistics() {
        Some(stats) => stats,
        None => {
            warn!("Linear stretch on a layer with no valid cells");
            return raw.map(None, |_| 0.0);
        }
    };

    let span = stats.max - stats.min;
    if span == 0.0 {
        warn!("Linear stretch on a constant layer ({}); scoring 1", stats.min);
    }

    raw.map(None, |v| {
        if raw.is_nodata(v) {
            0.0
        } else if span == 0.0 {
            1.0
        } else {
            9.0 * (v - stats.min) / span + 1.0
        }
    })
}
