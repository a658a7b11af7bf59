use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::RangeSyntaxError;
use crate::models::raster::LayerStats;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Aoi,
    Exclusion,
    Scored,
}

/// Suitability tier; the discriminant is the score written by reclassification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BandLevel {
    Exclusive = 0,
    MostSuitable = 1,
    Suitable = 2,
    LeastSuitable = 3,
}

impl BandLevel {
    /// Fixed evaluation order; later levels overwrite earlier matches.
    pub const ORDER: [BandLevel; 4] = [
        BandLevel::Exclusive,
        BandLevel::MostSuitable,
        BandLevel::Suitable,
        BandLevel::LeastSuitable,
    ];

    pub fn score(&self) -> f64 {
        *self as u8 as f64
    }

    pub fn column(&self) -> &'static str {
        match self {
            BandLevel::Exclusive => "exclusive_range",
            BandLevel::MostSuitable => "most_suitable",
            BandLevel::Suitable => "suitable",
            BandLevel::LeastSuitable => "least_suitable",
        }
    }
}

impl fmt::Display for BandLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.column())
    }
}

/// A parsed range string, before open bounds are resolved against a raster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BandSpec {
    /// `A~B`, `~B` or `A~`; a `None` bound defaults to the raster's observed min or max.
    Interval { min: Option<f64>, max: Option<f64> },
    /// Comma-separated class codes (land-cover style).
    Categorical(Vec<i64>),
}

/// A band ready to test cell values against
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedBand {
    Interval { min: f64, max: f64 },
    Categorical(Vec<i64>),
}

fn is_empty_marker(s: &str) -> bool {
    s.is_empty() || matches!(s.to_ascii_lowercase().as_str(), "nan" | "null" | "none" | "-")
}

impl BandSpec {
    /// Parse one range cell. Empty cells (and `NaN`/`null`/`-`) mean "no band".
    pub fn parse(column: &str, raw: &str) -> Result<Option<BandSpec>, RangeSyntaxError> {
        let compact: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
        if is_empty_marker(&compact) {
            return Ok(None);
        }

        let fail = |reason: &str| RangeSyntaxError {
            column: column.to_string(),
            value: raw.to_string(),
            reason: reason.to_string(),
        };

        if let Some((left, right)) = compact.split_once('~') {
            if right.contains('~') {
                return Err(fail("more than one '~'"));
            }
            let bound = |token: &str| -> Result<Option<f64>, RangeSyntaxError> {
                if token.is_empty() {
                    return Ok(None);
                }
                match token.parse::<f64>() {
                    Ok(v) if v.is_finite() => Ok(Some(v)),
                    _ => Err(fail(&format!("'{}' is not a number", token))),
                }
            };
            let min = bound(left)?;
            let max = bound(right)?;
            if min.is_none() && max.is_none() {
                return Err(fail("interval has no bounds"));
            }
            if let (Some(lo), Some(hi)) = (min, max) {
                if lo > hi {
                    return Err(fail("lower bound exceeds upper bound"));
                }
            }
            return Ok(Some(BandSpec::Interval { min, max }));
        }

        let mut values = Vec::new();
        for token in compact.split(',') {
            if token.is_empty() {
                return Err(fail("empty list entry"));
            }
            let value = token
                .parse::<i64>()
                .map_err(|_| fail(&format!("'{}' is not an integer class", token)))?;
            values.push(value);
        }
        Ok(Some(BandSpec::Categorical(values)))
    }

    pub fn is_open(&self) -> bool {
        matches!(self, BandSpec::Interval { min: None, .. } | BandSpec::Interval { max: None, .. })
    }

    /// Fill open bounds from the raster's valid-cell statistics.
    ///
    /// Returns `None` for an open interval on a raster with no valid cells: it cannot match anything.
    pub fn resolve(&self, stats: Option<&LayerStats>) -> Option<ResolvedBand> {
        match self {
            BandSpec::Categorical(values) => Some(ResolvedBand::Categorical(values.clone())),
            BandSpec::Interval { min, max } => {
                let lo = match min {
                    Some(v) => *v,
                    None => stats?.min,
                };
                let hi = match max {
                    Some(v) => *v,
                    None => stats?.max,
                };
                Some(ResolvedBand::Interval { min: lo, max: hi })
            }
        }
    }
}

impl ResolvedBand {
    pub fn contains(&self, value: f64) -> bool {
        match self {
            ResolvedBand::Interval { min, max } => value >= *min && value <= *max,
            ResolvedBand::Categorical(values) => {
                value.fract() == 0.0 && values.iter().any(|&class| class as f64 == value)
            }
        }
    }

    /// Intervals overlap when they share at least one value; class sets when they share a code.
    pub fn overlaps(&self, other: &ResolvedBand) -> bool {
        match (self, other) {
            (
                ResolvedBand::Interval { min: a_lo, max: a_hi },
                ResolvedBand::Interval { min: b_lo, max: b_hi },
            ) => a_lo <= b_hi && b_lo <= a_hi,
            (ResolvedBand::Categorical(a), ResolvedBand::Categorical(b)) => {
                a.iter().any(|v| b.contains(v))
            }
            _ => false,
        }
    }
}

/// The four range columns of one criterion row
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Bands {
    pub exclusive: Option<BandSpec>,
    pub most_suitable: Option<BandSpec>,
    pub suitable: Option<BandSpec>,
    pub least_suitable: Option<BandSpec>,
}

impl Bands {
    pub fn get(&self, level: BandLevel) -> Option<&BandSpec> {
        match level {
            BandLevel::Exclusive => self.exclusive.as_ref(),
            BandLevel::MostSuitable => self.most_suitable.as_ref(),
            BandLevel::Suitable => self.suitable.as_ref(),
            BandLevel::LeastSuitable => self.least_suitable.as_ref(),
        }
    }

    pub fn has_suitability_band(&self) -> bool {
        self.most_suitable.is_some() || self.suitable.is_some() || self.least_suitable.is_some()
    }
}

/// How a scored criterion turns raw cells into a 0..10 score
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum Scoring {
    Bands,
    Attractive { max_distance: f64 },
    Repulsive { max_distance: f64 },
    Linear,
    /// Wind speed in m/s scored `10 - 10 * (w / 10.7)`
    WindSpeed,
}

impl Default for Scoring {
    fn default() -> Self {
        Scoring::Bands
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerKind {
    Raster,
    Vector,
}

/// One row of the criterion table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Criterion {
    pub file_name: String,
    pub source_resolution: Option<f64>,
    pub target_resolution: Option<f64>,
    pub source_crs: Option<String>,
    pub target_crs: Option<String>,
    pub aoi: bool,
    pub exclusion: bool,
    pub bands: Bands,
    pub weight: Option<f64>,
    pub scoring: Scoring,
}

impl Criterion {
    /// A bare criterion with no role flags set; callers fill in what they need.
    pub fn new(file_name: &str) -> Self {
        Self {
            file_name: file_name.to_string(),
            source_resolution: None,
            target_resolution: None,
            source_crs: None,
            target_crs: None,
            aoi: false,
            exclusion: false,
            bands: Bands::default(),
            weight: None,
            scoring: Scoring::Bands,
        }
    }

    /// File stem, used to name derived outputs and log lines
    pub fn name(&self) -> &str {
        Path::new(&self.file_name)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(&self.file_name)
    }

    pub fn kind(&self) -> LayerKind {
        let ext = Path::new(&self.file_name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        match ext.as_deref() {
            Some("json") | Some("geojson") => LayerKind::Vector,
            _ => LayerKind::Raster,
        }
    }

    pub fn is_aoi(&self) -> bool {
        self.aoi
    }

    /// Raster used directly as an exclusion mask (the `exclusion` flag).
    pub fn is_direct_exclusion(&self) -> bool {
        !self.aoi && self.exclusion
    }

    /// Exclusion derived from the `exclusive_range` band.
    pub fn has_exclusive_range(&self) -> bool {
        !self.aoi && self.bands.exclusive.is_some()
    }

    /// Contributes to the exclusion mask through either route.
    pub fn is_exclusion(&self) -> bool {
        self.is_direct_exclusion() || self.has_exclusive_range()
    }

    /// Contributes to the weighted sum. Independent of the exclusion role: a flagged row
    /// with suitability bands is both excluded from and scored into the surface.
    pub fn is_scored(&self) -> bool {
        if self.aoi {
            return false;
        }
        match self.scoring {
            Scoring::Bands => self.bands.has_suitability_band(),
            _ => true,
        }
    }

    pub fn roles(&self) -> Vec<Role> {
        let mut roles = Vec::new();
        if self.is_aoi() {
            roles.push(Role::Aoi);
        }
        if self.is_exclusion() {
            roles.push(Role::Exclusion);
        }
        if self.is_scored() {
            roles.push(Role::Scored);
        }
        roles
    }
}
