use serde::{Deserialize, Serialize};

/// Per-polygon result of the cost model, one CSV row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostRecord {
    pub polygon_id: String,
    pub rank_mean: Option<f64>,
    pub road_cost: f64,
    pub line_cost: f64,
    pub valid_cells: usize,
    pub pv_area_pixels: usize,
    pub pv_area_ha: f64,
    /// Mean system unit cost over valid cells, cents per Wp
    pub system_cost_mean: Option<f64>,
    pub pv_out_energy: f64,         // kWh/year
    pub om_cost: f64,               // $/year
    pub capital_cost: f64,          // $
    pub lcoe: Option<f64>,          // $/kWh
    pub final_mean: Option<f64>,
}

impl CostRecord {
    pub fn has_lcoe(&self) -> bool {
        self.lcoe.is_some()
    }
}
