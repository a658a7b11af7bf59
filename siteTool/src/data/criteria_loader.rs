use std::collections::HashMap;
use std::fs;
use std::path::Path;

use csv::{ReaderBuilder, StringRecord, Writer};
use tracing::{info, warn};

use crate::config::const_funcs::default_decay_distance;
use crate::data::ascii_grid::{prj_path, read_header};
use crate::data::polygons_loader::load_polygons;
use crate::error::{MissingAoiError, Result, SchemaError};
use crate::models::criterion::{BandLevel, BandSpec, Criterion, Scoring};

pub const COL_FILE_NAME: &str = "file_name";
pub const COL_SOURCE_RESOLUTION: &str = "source_resolution(m)";
pub const COL_TARGET_RESOLUTION: &str = "target_resolution(m)";
pub const COL_SOURCE_CRS: &str = "source_CRS";
pub const COL_TARGET_CRS: &str = "target_CRS";
pub const COL_AOI: &str = "AOI";
pub const COL_EXCLUSION: &str = "exclusion";
pub const COL_WEIGHT: &str = "layer_weight";
pub const COL_SCORING: &str = "scoring";
pub const COL_MAX_DISTANCE: &str = "max_distance(m)";

/// Columns every table version must carry
pub const REQUIRED_COLUMNS: [&str; 12] = [
    COL_FILE_NAME,
    COL_SOURCE_RESOLUTION,
    COL_TARGET_RESOLUTION,
    COL_SOURCE_CRS,
    COL_TARGET_CRS,
    COL_AOI,
    COL_EXCLUSION,
    "most_suitable",
    "suitable",
    "least_suitable",
    "exclusive_range",
    COL_WEIGHT,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SchemaVersion {
    /// The twelve base columns
    V1,
    /// Adds per-criterion `scoring` and `max_distance(m)`
    V2,
}

/// The validated criterion table for one run
#[derive(Debug, Clone)]
pub struct Catalog {
    pub version: SchemaVersion,
    pub criteria: Vec<Criterion>,
}

impl Catalog {
    /// The single AOI criterion.
    pub fn aoi(&self) -> std::result::Result<&Criterion, MissingAoiError> {
        let aois: Vec<&Criterion> = self.criteria.iter().filter(|c| c.is_aoi()).collect();
        match aois.as_slice() {
            [] => Err(MissingAoiError::Missing),
            [single] => Ok(*single),
            many => Err(MissingAoiError::Multiple(
                many.iter().map(|c| c.file_name.clone()).collect(),
            )),
        }
    }

    pub fn scored(&self) -> impl Iterator<Item = &Criterion> {
        self.criteria.iter().filter(|c| c.is_scored())
    }

    pub fn exclusions(&self) -> impl Iterator<Item = &Criterion> {
        self.criteria.iter().filter(|c| c.is_exclusion())
    }
}

struct RowReader<'a> {
    columns: &'a HashMap<String, usize>,
    record: &'a StringRecord,
    row: usize,
}

impl<'a> RowReader<'a> {
    fn raw(&self, column: &str) -> &'a str {
        self.columns
            .get(column)
            .and_then(|&i| self.record.get(i))
            .map(|s| s.trim())
            .unwrap_or("")
    }

    fn invalid(&self, column: &str) -> SchemaError {
        SchemaError::InvalidValue {
            row: self.row,
            column: column.to_string(),
            value: self.raw(column).to_string(),
        }
    }

    fn text(&self, column: &str) -> Option<String> {
        let value = self.raw(column);
        if value.is_empty() || value.eq_ignore_ascii_case("nan") || value.eq_ignore_ascii_case("none") {
            None
        } else {
            Some(value.to_string())
        }
    }

    fn number(&self, column: &str) -> std::result::Result<Option<f64>, SchemaError> {
        match self.text(column) {
            None => Ok(None),
            Some(value) => match value.parse::<f64>() {
                Ok(v) if v.is_finite() => Ok(Some(v)),
                _ => Err(self.invalid(column)),
            },
        }
    }

    fn flag(&self, column: &str) -> std::result::Result<bool, SchemaError> {
        match self.text(column).map(|v| v.to_ascii_lowercase()).as_deref() {
            None | Some("0") | Some("0.0") | Some("n") | Some("no") | Some("false") => Ok(false),
            Some("1") | Some("1.0") | Some("y") | Some("yes") | Some("true") => Ok(true),
            Some(_) => Err(self.invalid(column)),
        }
    }

    /// Bare EPSG codes (as spreadsheets tend to store them) become `EPSG:<code>`.
    fn crs(&self, column: &str) -> Option<String> {
        self.text(column).map(|value| {
            let code = value.trim_end_matches(".0");
            if !code.is_empty() && code.chars().all(|c| c.is_ascii_digit()) {
                format!("EPSG:{}", code)
            } else {
                value
            }
        })
    }
}

fn parse_scoring(reader: &RowReader, file_name: &str) -> Result<Scoring> {
    let method = reader.text(COL_SCORING).map(|m| m.to_ascii_lowercase());
    let max_distance = || -> Result<f64> {
        let name = Path::new(file_name)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(file_name);
        let distance = reader
            .number(COL_MAX_DISTANCE)?
            .unwrap_or_else(|| default_decay_distance(name));
        if distance <= 0.0 {
            return Err(reader.invalid(COL_MAX_DISTANCE).into());
        }
        Ok(distance)
    };

    let scoring = match method.as_deref() {
        None | Some("bands") => Scoring::Bands,
        Some("attractive") => Scoring::Attractive {
            max_distance: max_distance()?,
        },
        Some("repulsive") => Scoring::Repulsive {
            max_distance: max_distance()?,
        },
        Some("linear") => Scoring::Linear,
        Some("wind") | Some("wind_speed") => Scoring::WindSpeed,
        Some(_) => return Err(reader.invalid(COL_SCORING).into()),
    };
    Ok(scoring)
}

fn parse_row(reader: &RowReader, version: SchemaVersion) -> Result<Criterion> {
    let file_name = reader
        .text(COL_FILE_NAME)
        .ok_or_else(|| reader.invalid(COL_FILE_NAME))?;

    let mut criterion = Criterion::new(&file_name);
    criterion.source_resolution = reader.number(COL_SOURCE_RESOLUTION)?;
    criterion.target_resolution = reader.number(COL_TARGET_RESOLUTION)?;
    criterion.source_crs = reader.crs(COL_SOURCE_CRS);
    criterion.target_crs = reader.crs(COL_TARGET_CRS);
    criterion.aoi = reader.flag(COL_AOI)?;
    criterion.exclusion = reader.flag(COL_EXCLUSION)?;

    for level in BandLevel::ORDER {
        let spec = BandSpec::parse(level.column(), reader.raw(level.column()))?;
        match level {
            BandLevel::Exclusive => criterion.bands.exclusive = spec,
            BandLevel::MostSuitable => criterion.bands.most_suitable = spec,
            BandLevel::Suitable => criterion.bands.suitable = spec,
            BandLevel::LeastSuitable => criterion.bands.least_suitable = spec,
        }
    }

    if version >= SchemaVersion::V2 {
        criterion.scoring = parse_scoring(reader, &file_name)?;
    }

    criterion.weight = reader.number(COL_WEIGHT)?;
    match criterion.weight {
        Some(w) if w < 0.0 => return Err(reader.invalid(COL_WEIGHT).into()),
        None if criterion.is_scored() => return Err(reader.invalid(COL_WEIGHT).into()),
        _ => {}
    }

    Ok(criterion)
}

/// Parse a criterion table from CSV text.
pub fn parse_criteria<R: std::io::Read>(input: R) -> Result<Catalog> {
    let mut reader = ReaderBuilder::new().has_headers(true).trim(csv::Trim::All).from_reader(input);
    let headers = reader.headers()?.clone();
    let columns: HashMap<String, usize> = headers
        .iter()
        .enumerate()
        .map(|(i, name)| (name.trim().to_string(), i))
        .collect();

    for column in REQUIRED_COLUMNS {
        if !columns.contains_key(column) {
            return Err(SchemaError::MissingColumn(column.to_string()).into());
        }
    }
    let version = if columns.contains_key(COL_SCORING) {
        SchemaVersion::V2
    } else {
        SchemaVersion::V1
    };

    let mut criteria = Vec::new();
    for (index, record) in reader.records().enumerate() {
        let record = record?;
        if record.iter().all(|field| field.trim().is_empty()) {
            continue;
        }
        let row = RowReader {
            columns: &columns,
            record: &record,
            row: index + 1,
        };
        criteria.push(parse_row(&row, version)?);
    }

    if criteria.is_empty() {
        return Err(SchemaError::Empty.into());
    }

    let catalog = Catalog { version, criteria };
    catalog.aoi()?;
    Ok(catalog)
}

pub fn load_criteria<P: AsRef<Path>>(path: P) -> Result<Catalog> {
    let path = path.as_ref();
    let file = fs::File::open(path)?;
    let catalog = parse_criteria(file)?;
    info!(
        "Loaded {} criteria ({:?} schema) from {}: {} scored, {} exclusion",
        catalog.criteria.len(),
        catalog.version,
        path.display(),
        catalog.scored().count(),
        catalog.exclusions().count()
    );
    Ok(catalog)
}

/// Write a skeleton criterion table listing the layers found in `input_dir`.
///
/// Raster resolution and CRS are read from headers and `.prj` sidecars; files whose name starts
/// with `aoi` are pre-flagged as the AOI.
pub fn write_template<P: AsRef<Path>, Q: AsRef<Path>>(input_dir: P, output: Q) -> Result<usize> {
    let input_dir = input_dir.as_ref();
    let mut entries: Vec<_> = fs::read_dir(input_dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .collect();
    entries.sort();

    let mut writer = Writer::from_path(output.as_ref())?;
    let mut header: Vec<&str> = REQUIRED_COLUMNS.to_vec();
    header.push(COL_SCORING);
    header.push(COL_MAX_DISTANCE);
    writer.write_record(&header)?;

    let mut rows = 0;
    for path in entries {
        let file_name = match path.file_name().and_then(|n| n.to_str()) {
            Some(name) => name.to_string(),
            None => continue,
        };
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();

        let (resolution, crs) = match ext.as_str() {
            "asc" => match read_header(&path) {
                Ok(h) => (
                    h.cellsize_x.to_string(),
                    fs::read_to_string(prj_path(&path))
                        .map(|s| s.trim().to_string())
                        .unwrap_or_default(),
                ),
                Err(e) => {
                    warn!("Skipping {} in template: {}", file_name, e);
                    continue;
                }
            },
            "json" | "geojson" => match load_polygons(&path) {
                Ok(set) => (String::new(), set.crs.unwrap_or_default()),
                Err(e) => {
                    warn!("Skipping {} in template: {}", file_name, e);
                    continue;
                }
            },
            _ => continue,
        };

        let aoi = if file_name.to_ascii_lowercase().starts_with("aoi") { "1" } else { "" };
        let record = [
            file_name.as_str(),
            resolution.as_str(),
            "",
            crs.as_str(),
            "",
            aoi,
            "",
            "",
            "",
            "",
            "",
            "",
            "",
            "",
        ];
        writer.write_record(&record)?;
        rows += 1;
    }
    writer.flush()?;
    info!("Wrote criterion template with {} rows to {}", rows, output.as_ref().display());
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SiteError;
    use crate::models::criterion::Role;
    use tempfile::tempdir;

    const HEADER: &str = "file_name,source_resolution(m),target_resolution(m),source_CRS,target_CRS,AOI,exclusion,most_suitable,suitable,least_suitable,exclusive_range,layer_weight";

    fn table(rows: &[&str]) -> String {
        let mut text = HEADER.to_string();
        for row in rows {
            text.push('\n');
            text.push_str(row);
        }
        text
    }

    #[test]
    fn test_parse_v1_table() {
        let text = table(&[
            "aoi.json,,50,3857,3857,1,0,,,,,",
            "protected.asc,50,50,EPSG:3857,EPSG:3857,0,1,,,,,",
            "slope.asc,30,50,EPSG:3857,EPSG:3857,0,0,0~5,5~15,15~30,30~,0.4",
            "land_cover.asc,300,50,EPSG:3857,EPSG:3857,,,\"130,150\",\"10,20\",\"160,170\",,0.6",
        ]);
        let catalog = parse_criteria(text.as_bytes()).unwrap();
        assert_eq!(catalog.version, SchemaVersion::V1);
        assert_eq!(catalog.criteria.len(), 4);
        assert_eq!(catalog.aoi().unwrap().file_name, "aoi.json");
        assert_eq!(catalog.criteria[0].source_crs.as_deref(), Some("EPSG:3857"));

        let slope = &catalog.criteria[2];
        assert_eq!(slope.roles(), vec![Role::Exclusion, Role::Scored]);
        assert_eq!(slope.weight, Some(0.4));
        assert_eq!(
            slope.bands.exclusive,
            Some(BandSpec::Interval { min: Some(30.0), max: None })
        );

        let land = &catalog.criteria[3];
        assert_eq!(land.bands.most_suitable, Some(BandSpec::Categorical(vec![130, 150])));
        assert_eq!(catalog.scored().count(), 2);
        assert_eq!(catalog.exclusions().count(), 2);
    }

    #[test]
    fn test_parse_v2_scoring() {
        let text = format!(
            "{},scoring,max_distance(m)\n{}\n{}\n{}",
            HEADER,
            "aoi.json,,50,EPSG:3857,EPSG:3857,1,,,,,,,,",
            "roads.asc,50,50,EPSG:3857,EPSG:3857,,,,,,,0.19,attractive,",
            "protected_dist.asc,50,50,EPSG:3857,EPSG:3857,,,,,,,0.12,repulsive,12000",
        );
        let catalog = parse_criteria(text.as_bytes()).unwrap();
        assert_eq!(catalog.version, SchemaVersion::V2);
        assert_eq!(catalog.criteria[1].scoring, Scoring::Attractive { max_distance: 5000.0 });
        assert_eq!(catalog.criteria[2].scoring, Scoring::Repulsive { max_distance: 12000.0 });
        assert!(catalog.criteria[1].is_scored());
    }

    #[test]
    fn test_flagged_row_keeps_its_bands() {
        let text = table(&[
            "aoi.json,,50,,,1,,,,,,",
            "slope.asc,,,,,,1,1~1,,,5~,1",
        ]);
        let catalog = parse_criteria(text.as_bytes()).unwrap();
        let slope = &catalog.criteria[1];
        assert!(slope.is_direct_exclusion());
        assert!(slope.has_exclusive_range());
        assert_eq!(slope.roles(), vec![Role::Exclusion, Role::Scored]);
        assert_eq!(catalog.scored().count(), 1);
        assert_eq!(catalog.exclusions().count(), 1);

        // scored through its bands, so the weight is required like any other scored row
        let unweighted = table(&["aoi.json,,50,,,1,,,,,,", "slope.asc,,,,,,1,1~1,,,,"]);
        assert!(matches!(
            parse_criteria(unweighted.as_bytes()),
            Err(SiteError::Schema(SchemaError::InvalidValue { row: 2, .. }))
        ));
    }

    #[test]
    fn test_missing_column() {
        let text = "file_name,AOI\naoi.json,1";
        match parse_criteria(text.as_bytes()) {
            Err(SiteError::Schema(SchemaError::MissingColumn(column))) => {
                assert_eq!(column, "source_resolution(m)")
            }
            other => panic!("expected missing column, got {:?}", other),
        }
    }

    #[test]
    fn test_row_errors() {
        let bad_range = table(&[
            "aoi.json,,50,,,1,,,,,,",
            "slope.asc,,,,,,,0~x,,,,1",
        ]);
        assert!(matches!(
            parse_criteria(bad_range.as_bytes()),
            Err(SiteError::RangeSyntax(_))
        ));

        let bad_flag = table(&["aoi.json,,50,,,maybe,,,,,,"]);
        assert!(matches!(
            parse_criteria(bad_flag.as_bytes()),
            Err(SiteError::Schema(SchemaError::InvalidValue { row: 1, .. }))
        ));

        let missing_weight = table(&["aoi.json,,50,,,1,,,,,,", "slope.asc,,,,,,,0~5,,,,"]);
        match parse_criteria(missing_weight.as_bytes()) {
            Err(SiteError::Schema(SchemaError::InvalidValue { row, column, .. })) => {
                assert_eq!(row, 2);
                assert_eq!(column, COL_WEIGHT);
            }
            other => panic!("expected weight error, got {:?}", other),
        }
    }

    #[test]
    fn test_aoi_count_enforced() {
        let none = table(&["slope.asc,,,,,,,0~5,,,,1"]);
        assert!(matches!(
            parse_criteria(none.as_bytes()),
            Err(SiteError::MissingAoi(MissingAoiError::Missing))
        ));

        let two = table(&["a.json,,50,,,1,,,,,,", "b.json,,50,,,1,,,,,,"]);
        assert!(matches!(
            parse_criteria(two.as_bytes()),
            Err(SiteError::MissingAoi(MissingAoiError::Multiple(_)))
        ));

        assert!(matches!(parse_criteria(HEADER.as_bytes()), Err(SiteError::Schema(SchemaError::Empty))));
    }

    #[test]
    fn test_write_template() {
        let input = tempdir().unwrap();
        let out = tempdir().unwrap();
        fs::write(
            input.path().join("ghi.asc"),
            "ncols 1\nnrows 1\nxllcorner 0\nyllcorner 0\ncellsize 250\n5\n",
        )
        .unwrap();
        fs::write(input.path().join("ghi.prj"), "EPSG:32736").unwrap();
        fs::write(
            input.path().join("aoi_boundary.json"),
            r#"{"features": [{"geometry": {"type": "Polygon", "coordinates": [[[0,0],[1,0],[1,1],[0,1],[0,0]]]}}]}"#,
        )
        .unwrap();
        fs::write(input.path().join("notes.txt"), "ignored").unwrap();

        let path = out.path().join("criteria.csv");
        assert_eq!(write_template(input.path(), &path).unwrap(), 2);

        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert!(lines[0].ends_with("scoring,max_distance(m)"));
        assert!(lines[1].starts_with("aoi_boundary.json,,,,,1,"));
        assert!(lines[2].starts_with("ghi.asc,250,,EPSG:32736,"));
    }
}
