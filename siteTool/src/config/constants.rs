// Grid Constants
pub const DEFAULT_PIXEL_SIZE: f64 = 50.0;             // metres
pub const DEFAULT_CRS: &str = "EPSG:3857";

// Candidate Polygon Filtering
pub const MIN_AREA_HA: f64 = 100.0;                   // waterbodies smaller than this are dropped

// Proximity / Decay
pub const DECAY_BAND_COUNT: f64 = 10.0;
pub const ROAD_MAX_DISTANCE: f64 = 5_000.0;           // metres
pub const SUBSTATION_MAX_DISTANCE: f64 = 15_000.0;    // metres
pub const PROTECTED_MAX_DISTANCE: f64 = 15_000.0;     // metres
pub const PROXIMITY_MAX_DISTANCE: f64 = 50_000.0;     // cap for cost-driver proximity rasters

// Wind Scoring
pub const WIND_SCORE_MAX_SPEED: f64 = 10.7;           // m/s scoring 0

// System Cost Components ($/Wp)
pub const PV_COST: f64 = 0.64;
pub const MOORING_COST: f64 = 0.03;
pub const CABLE_COST: f64 = 0.05;

// Grid Connection Costs ($/m)
pub const TRANSMISSION_COST: f64 = 900.0;
pub const ROAD_COST: f64 = 1_500.0;

// Operating Economics
pub const O_M_COST: f64 = 10.0;                       // $/kWp/year
pub const PV_LIFETIME_YEARS: f64 = 25.0;
pub const KWP_PER_HA: f64 = 1_000.0;                  // 250 kWp per 50 m cell
pub const MAX_PV_CELLS: usize = 300;                  // 75 ha at 50 m cells

// Zonal Aggregation Widths (metres)
pub const COST_RING_WIDTH: f64 = 50.0;
pub const RANK_BUFFER_WIDTH: f64 = 500.0;

// Bathymetry Multiplier Thresholds (depth, metres)
pub const BATHY_TOO_SHALLOW: f64 = 2.0;
pub const BATHY_SHALLOW_MAX: f64 = 10.0;
pub const BATHY_MEDIUM_MAX: f64 = 20.0;
pub const BATHY_SHALLOW_MULTIPLIER: f64 = 100.0;
pub const BATHY_MEDIUM_MULTIPLIER: f64 = 130.0;
pub const BATHY_DEEP_MULTIPLIER: f64 = 200.0;

// Water Proximity Multiplier Thresholds (metres)
pub const WATER_TOO_CLOSE: f64 = 100.0;
pub const WATER_NEAR_MAX: f64 = 500.0;
pub const WATER_NEAR_MULTIPLIER: f64 = 100.0;
pub const WATER_FAR_MULTIPLIER: f64 = 110.0;

// Wind Class Multipliers (class value, multiplier)
pub const WIND_CLASS_MULTIPLIERS: [(f64, f64); 3] = [(4.0, 110.0), (7.0, 105.0), (10.0, 100.0)];

// LCOE Rescale
pub const LCOE_SCALE_TOP: f64 = 5.0;
pub const LCOE_SCALE_SPAN: f64 = 4.0;                 // scores run 5 (cheapest) down to 1
