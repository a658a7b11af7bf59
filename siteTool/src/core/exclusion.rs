use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::grid::Grid;
use crate::error::GridError;
use crate::models::raster::RasterLayer;

/// How an exclusion-role raster marks excluded cells
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExclusionEncoding {
    /// 0 = excluded, anything else allowed.
    #[default]
    Mask,
    /// Non-zero marks the excluded feature (e.g. a rasterized protected area); inverted as `1 - v`.
    Presence,
}

/// Normalize an exclusion-role raster to a {0,1} mask. Nodata cells are allowed.
pub fn to_mask(layer: &RasterLayer, encoding: ExclusionEncoding) -> RasterLayer {
    layer.map(None, |v| {
        if layer.is_nodata(v) {
            return 1.0;
        }
        let marked = v != 0.0;
        match encoding {
            ExclusionEncoding::Mask => {
                if marked { 1.0 } else { 0.0 }
            }
            ExclusionEncoding::Presence => {
                if marked { 0.0 } else { 1.0 }
            }
        }
    })
}

/// Turn the 1-marked output of an exclusive-band reclassification into a mask.
pub fn mask_from_exclusive_hits(hits: &RasterLayer) -> RasterLayer {
    to_mask(hits, ExclusionEncoding::Presence)
}

/// Cellwise product of all masks: 1 only where every mask is 1.
///
/// With no masks the result is all ones on `grid`.
pub fn combine_exclusions(grid: &Grid, masks: &[RasterLayer]) -> Result<RasterLayer, GridError> {
    let mut combined = RasterLayer::filled(grid.clone(), 1.0, None);
    for mask in masks {
        grid.ensure_aligned(&mask.grid)?;
        combined.data *= &mask.data;
    }
    debug!(
        "Combined {} exclusion masks: {} of {} cells excluded",
        masks.len(),
        combined.count_where(|v| v == 0.0),
        grid.width * grid.height
    );
    Ok(combined)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid() -> Grid {
        Grid::new(0.0, 3.0, 1.0, 1.0, 3, 3, "EPSG:3857").unwrap()
    }

    fn mask(values: [f64; 9]) -> RasterLayer {
        RasterLayer::from_vec(grid(), values.to_vec(), None).unwrap()
    }

    #[test]
    fn test_and_absorbs_zero() {
        let partial = mask([1.0, 0.0, 1.0, 1.0, 1.0, 1.0, 0.0, 1.0, 1.0]);
        let ones = mask([1.0; 9]);
        let zeros = mask([0.0; 9]);

        let combined = combine_exclusions(&grid(), &[partial.clone(), zeros, ones]).unwrap();
        assert!(combined.data.iter().all(|&v| v == 0.0));

        let combined = combine_exclusions(&grid(), &[partial.clone(), mask([1.0; 9])]).unwrap();
        assert_eq!(combined.data, partial.data);
    }

    #[test]
    fn test_no_masks_is_all_ones() {
        let combined = combine_exclusions(&grid(), &[]).unwrap();
        assert!(combined.data.iter().all(|&v| v == 1.0));
    }

    #[test]
    fn test_misaligned_mask_rejected() {
        let other = Grid::new(0.0, 3.0, 1.0, 1.0, 3, 2, "EPSG:3857").unwrap();
        let small = RasterLayer::filled(other, 1.0, None);
        assert!(combine_exclusions(&grid(), &[small]).is_err());
    }

    #[test]
    fn test_encodings() {
        let raw = RasterLayer::from_vec(
            grid(),
            vec![0.0, 1.0, 255.0, 1.0, 0.0, 1.0, 1.0, 1.0, 1.0],
            Some(255.0),
        )
        .unwrap();

        let as_mask = to_mask(&raw, ExclusionEncoding::Mask);
        assert_eq!(as_mask.data.iter().take(3).copied().collect::<Vec<_>>(), vec![0.0, 1.0, 1.0]);

        let as_presence = to_mask(&raw, ExclusionEncoding::Presence);
        assert_eq!(
            as_presence.data.iter().take(3).copied().collect::<Vec<_>>(),
            vec![1.0, 0.0, 1.0]
        );

        let hits = mask([0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
        let derived = mask_from_exclusive_hits(&hits);
        assert_eq!(derived.get(0, 2), 0.0);
        assert_eq!(derived.get(1, 1), 1.0);
    }
}
