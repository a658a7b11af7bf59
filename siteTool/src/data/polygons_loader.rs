use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use geo::{LineString, MultiPolygon, Polygon};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::error::{BackendError, Result};
use crate::models::polygon::CandidatePolygon;

#[derive(Debug, Deserialize)]
struct FeatureCollectionFile {
    #[serde(default)]
    crs: Option<Value>,
    features: Vec<FeatureRecord>,
}

#[derive(Debug, Deserialize)]
struct FeatureRecord {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    properties: Option<serde_json::Map<String, Value>>,
    geometry: Option<GeometryRecord>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", content = "coordinates")]
enum GeometryRecord {
    Polygon(Vec<Vec<Vec<f64>>>),
    MultiPolygon(Vec<Vec<Vec<Vec<f64>>>>),
}

/// Polygons read from a feature collection file, with the CRS it declares (if any)
#[derive(Debug, Clone)]
pub struct PolygonSet {
    pub crs: Option<String>,
    pub polygons: Vec<CandidatePolygon>,
}

fn malformed(path: &Path, reason: String) -> BackendError {
    BackendError::MalformedVector {
        path: path.display().to_string(),
        reason,
    }
}

fn value_to_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Accepts both `"crs": "EPSG:3857"` and the GeoJSON `{"type":"name","properties":{"name":...}}` form.
fn crs_name(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Object(obj) => obj
            .get("properties")
            .and_then(|p| p.get("name"))
            .and_then(|n| n.as_str())
            .map(|s| s.to_string()),
        _ => None,
    }
}

fn ring(path: &Path, coords: &[Vec<f64>]) -> std::result::Result<LineString<f64>, BackendError> {
    let mut points = Vec::with_capacity(coords.len());
    for c in coords {
        if c.len() < 2 {
            return Err(malformed(path, format!("coordinate with {} values", c.len())));
        }
        points.push((c[0], c[1]));
    }
    if points.len() < 4 {
        return Err(malformed(path, format!("ring with {} positions", points.len())));
    }
    Ok(LineString::from(points))
}

fn polygon(path: &Path, rings: &[Vec<Vec<f64>>]) -> std::result::Result<Polygon<f64>, BackendError> {
    let (exterior, interiors) = rings
        .split_first()
        .ok_or_else(|| malformed(path, "polygon without rings".to_string()))?;
    let holes = interiors
        .iter()
        .map(|r| ring(path, r))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(Polygon::new(ring(path, exterior)?, holes))
}

/// Read a JSON feature collection of Polygon/MultiPolygon features.
///
/// Feature ids come from the feature `id`, then a `name` or `id` property, then the feature index.
pub fn load_polygons<P: AsRef<Path>>(path: P) -> Result<PolygonSet> {
    let path = path.as_ref();
    let file = File::open(path)?;
    let collection: FeatureCollectionFile = serde_json::from_reader(BufReader::new(file))?;

    let mut polygons = Vec::with_capacity(collection.features.len());
    for (index, feature) in collection.features.iter().enumerate() {
        let geometry = match &feature.geometry {
            Some(GeometryRecord::Polygon(rings)) => MultiPolygon::new(vec![polygon(path, rings)?]),
            Some(GeometryRecord::MultiPolygon(parts)) => MultiPolygon::new(
                parts
                    .iter()
                    .map(|rings| polygon(path, rings))
                    .collect::<std::result::Result<Vec<_>, _>>()?,
            ),
            None => {
                debug!("Skipping feature {} without geometry", index);
                continue;
            }
        };

        let from_properties = feature.properties.as_ref().and_then(|props| {
            props
                .get("name")
                .or_else(|| props.get("id"))
                .and_then(value_to_id)
        });
        let id = feature
            .id
            .as_ref()
            .and_then(value_to_id)
            .or(from_properties)
            .unwrap_or_else(|| index.to_string());

        polygons.push(CandidatePolygon::new(&id, geometry));
    }

    info!("Loaded {} polygons from {}", polygons.len(), path.display());
    Ok(PolygonSet {
        crs: collection.crs.as_ref().and_then(crs_name),
        polygons,
    })
}

/// Keep polygons with at least `min_area_ha` hectares.
pub fn filter_by_min_area(polygons: Vec<CandidatePolygon>, min_area_ha: f64) -> Vec<CandidatePolygon> {
    let before = polygons.len();
    let kept: Vec<_> = polygons
        .into_iter()
        .filter(|p| p.area_ha() >= min_area_ha)
        .collect();
    info!(
        "Kept {} of {} polygons with area >= {} ha",
        kept.len(),
        before,
        min_area_ha
    );
    kept
}
