use geo::{Area, BoundingRect, Contains, MultiPolygon, Point};

use crate::core::grid::Extent;

/// A candidate site (reservoir, waterbody or land parcel) in the run CRS
#[derive(Debug, Clone, PartialEq)]
pub struct CandidatePolygon {
    pub id: String,
    pub geometry: MultiPolygon<f64>,
}

impl CandidatePolygon {
    pub fn new(id: &str, geometry: MultiPolygon<f64>) -> Self {
        Self {
            id: id.to_string(),
            geometry,
        }
    }

    /// Planar area in hectares; assumes a metric projected CRS.
    pub fn area_ha(&self) -> f64 {
        self.geometry.unsigned_area() / 10_000.0
    }

    pub fn extent(&self) -> Option<Extent> {
        self.geometry
            .bounding_rect()
            .map(|rect| Extent::new(rect.min().x, rect.min().y, rect.max().x, rect.max().y))
    }

    pub fn contains_point(&self, x: f64, y: f64) -> bool {
        self.geometry.contains(&Point::new(x, y))
    }
}

/// Union of the polygon extents, `None` for an empty slice.
pub fn collection_extent(polygons: &[CandidatePolygon]) -> Option<Extent> {
    polygons
        .iter()
        .filter_map(|p| p.extent())
        .reduce(|a, b| Extent::new(a.xmin.min(b.xmin), a.ymin.min(b.ymin), a.xmax.max(b.xmax), a.ymax.max(b.ymax)))
}

#[cfg(test)]
pub(crate) fn square(id: &str, xmin: f64, ymin: f64, size: f64) -> CandidatePolygon {
    use geo::{LineString, Polygon};
    let ring = LineString::from(vec![
        (xmin, ymin),
        (xmin + size, ymin),
        (xmin + size, ymin + size),
        (xmin, ymin + size),
        (xmin, ymin),
    ]);
    CandidatePolygon::new(id, MultiPolygon::new(vec![Polygon::new(ring, vec![])]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_area_and_extent() {
        let lake = square("lake", 1000.0, 2000.0, 1000.0);
        assert_relative_eq!(lake.area_ha(), 100.0);
        assert_eq!(lake.extent(), Some(Extent::new(1000.0, 2000.0, 2000.0, 3000.0)));
        assert!(lake.contains_point(1500.0, 2500.0));
        assert!(!lake.contains_point(2500.0, 2500.0));
    }

    #[test]
    fn test_collection_extent() {
        let polygons = vec![square("a", 0.0, 0.0, 10.0), square("b", 20.0, -5.0, 10.0)];
        assert_eq!(collection_extent(&polygons), Some(Extent::new(0.0, -5.0, 30.0, 10.0)));
        assert_eq!(collection_extent(&[]), None);
    }
}
