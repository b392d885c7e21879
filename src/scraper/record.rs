use serde::{Deserialize, Serialize};

/// Centimetres to inches
const CM_TO_IN: f64 = 0.393701;

/// km/h to mph
const KMH_TO_MPH: f64 = 0.621371;

/// kg to lb
const KG_TO_LB: f64 = 2.20462;

/// Quantities derived from one key event's crush profile, delta-V and weights.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Derived {
    /// Average crush depth (in)
    pub c_bar: f64,
    /// Resultant delta-V (mph)
    pub nass_dv: f64,
    /// Closing speed estimate (mph)
    pub nass_vc: f64,
    /// Restitution coefficient
    pub e: f64,
    /// Delta-V including rebound (mph)
    pub tot_dv: f64,
}

impl Derived {
    /// `crush` in cm, `total_dv` in km/h, weights in kg.
    pub fn compute(crush: [i32; 6], total_dv: i32, curb_weight: i32, a_curb_weight: i32) -> Self {
        let c = crush.map(f64::from);
        let c_bar = CM_TO_IN * ((c[0] + c[5]) * 0.5 + c[1] + c[2] + c[3] + c[4]) / 5.0;

        let nass_dv = f64::from(total_dv) * KMH_TO_MPH;
        let voi_wt = f64::from(curb_weight) * KG_TO_LB;
        let a_wt = f64::from(a_curb_weight) * KG_TO_LB;
        let nass_vc = nass_dv / (a_wt / (voi_wt + a_wt));
        let e = restitution(nass_vc);
        let tot_dv = nass_dv * (1.0 + e);

        Self {
            c_bar,
            nass_dv,
            nass_vc,
            e,
            tot_dv,
        }
    }
}

/// Empirical restitution as a function of closing speed (mph)
pub fn restitution(nass_vc: f64) -> f64 {
    0.5992 * (-0.1125 * nass_vc + 0.003889 * nass_vc.powi(2) - 0.0001153 * nass_vc.powi(3)).exp()
}

/// One vehicle in one collision event, flattened for export.
///
/// Unique per `(case_id, vehicle_num, event_num)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub case_id: String,
    pub case_num: String,
    pub summary: String,
    pub vehicle_num: u32,
    pub event_num: u32,

    pub make: String,
    pub model: String,
    pub model_year: Option<i32>,
    pub curb_weight: i32,
    /// Primary damage location code
    pub damage_location: String,
    pub underride: String,
    pub edr: String,

    pub lon_dv: i32,
    pub lat_dv: i32,
    pub total_dv: i32,
    pub smash_length: Option<i32>,
    pub crush: [i32; 6],

    /// Counterpart vehicle number; `None` for fixed objects
    pub a_vehicle_num: Option<u32>,
    /// Counterpart as labelled in the case (vehicle or object)
    pub a_label: String,
    pub a_make: String,
    pub a_model: String,
    pub a_year: Option<i32>,
    pub a_curb_weight: Option<i32>,

    pub c_bar: f64,
    pub nass_dv: f64,
    pub nass_vc: f64,
    pub e: f64,
    pub tot_dv: f64,
}

impl EventRecord {
    pub fn key(&self) -> (&str, u32, u32) {
        (&self.case_id, self.vehicle_num, self.event_num)
    }

    pub(crate) fn apply(&mut self, derived: Derived) {
        self.c_bar = derived.c_bar;
        self.nass_dv = derived.nass_dv;
        self.nass_vc = derived.nass_vc;
        self.e = derived.e;
        self.tot_dv = derived.tot_dv;
    }
}
