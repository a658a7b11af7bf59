use crate::config::constants::*;

/// Mooring multiplier from water depth. Missing depth gives 0 (invalid cell).
pub fn calc_bathymetry_multiplier(depth: f64) -> f64 {
    if depth.is_nan() {
        return 0.0;
    }
    if depth > BATHY_MEDIUM_MAX {
        BATHY_DEEP_MULTIPLIER
    } else if depth < BATHY_TOO_SHALLOW {
        0.0
    } else if depth <= BATHY_SHALLOW_MAX {
        BATHY_SHALLOW_MULTIPLIER
    } else {
        BATHY_MEDIUM_MULTIPLIER
    }
}

/// Cable multiplier from distance to the water body edge, in metres.
pub fn calc_water_multiplier(distance: f64) -> f64 {
    if distance.is_nan() || distance < WATER_TOO_CLOSE {
        0.0
    } else if distance <= WATER_NEAR_MAX {
        WATER_NEAR_MULTIPLIER
    } else {
        WATER_FAR_MULTIPLIER
    }
}

/// System-cost multiplier from a wind class raster; unlisted classes pass through unchanged.
pub fn calc_wind_multiplier(wind_class: f64) -> f64 {
    if wind_class.is_nan() {
        return 0.0;
    }
    WIND_CLASS_MULTIPLIERS
        .iter()
        .find(|(class, _)| *class == wind_class)
        .map(|(_, multiplier)| *multiplier)
        .unwrap_or(wind_class)
}

/// Wind suitability score: 10 in still air, 0 at `WIND_SCORE_MAX_SPEED`.
pub fn calc_wind_score(speed: f64) -> f64 {
    10.0 - 10.0 * (speed / WIND_SCORE_MAX_SPEED)
}

/// Per-cell system unit cost in cents per Wp
pub fn calc_system_cost(
    wind_multiplier: f64,
    bathymetry_multiplier: f64,
    water_multiplier: f64,
    pv_cost: f64,
    mooring_cost: f64,
    cable_cost: f64,
) -> f64 {
    ((wind_multiplier / 100.0) * pv_cost
        + (bathymetry_multiplier / 100.0) * mooring_cost
        + (water_multiplier / 100.0) * cable_cost)
        * 100.0
}

pub fn calc_kwp_per_cell(cell_area_ha: f64, kwp_per_ha: f64) -> f64 {
    cell_area_ha * kwp_per_ha
}

/// Levelized cost: lifetime spend over lifetime yield. `None` when nothing is generated.
pub fn calc_lcoe(capital_cost: f64, om_cost_year: f64, energy_kwh_year: f64, lifetime_years: f64) -> Option<f64> {
    let lifetime_energy = energy_kwh_year * lifetime_years;
    if !(lifetime_energy > 0.0) || !capital_cost.is_finite() {
        return None;
    }
    Some((capital_cost + om_cost_year * lifetime_years) / lifetime_energy)
}

/// Default decay cut-off for a layer name when the table leaves `max_distance(m)` empty.
pub fn default_decay_distance(layer_name: &str) -> f64 {
    let name = layer_name.to_ascii_lowercase();
    if name.contains("road") {
        ROAD_MAX_DISTANCE
    } else if name.contains("substation") || name.contains("gss") || name.contains("transmission") {
        SUBSTATION_MAX_DISTANCE
    } else {
        PROTECTED_MAX_DISTANCE
    }
}
