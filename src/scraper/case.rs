//! Variant-neutral view of one case document and the key-event extraction
//! that turns it into [`EventRecord`]s.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::error::{ExtractError, ExtractResult};
use crate::scraper::catalog::{CounterpartWeight, SearchParams, ANY};
use crate::scraper::record::{Derived, EventRecord};

/// One vehicle as listed in the case's vehicle summary
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VehicleSummary {
    pub number: u32,
    pub make: Option<i32>,
    pub model: Option<i32>,
    pub year: Option<i32>,
}

/// One row of the case's event summary.
///
/// Damage areas are already expressed in the search payload's numbering.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventSummary {
    pub event_number: u32,
    pub vehicle_number: u32,
    pub area_of_damage: Option<i32>,
    /// Raw contacted code: a vehicle number or an object code
    pub contacted: Option<i32>,
    pub contacted_label: String,
    pub contacted_area_of_damage: Option<i32>,
}

/// Delta-V and crush measured on one vehicle for one event
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Deformation {
    pub total: Option<i32>,
    pub lateral: Option<i32>,
    pub longitudinal: Option<i32>,
    pub location: String,
    pub override_underride: String,
    pub crush: [Option<i32>; 6],
    pub smash_length: Option<i32>,
}

/// Exterior inspection of one vehicle
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VehicleExterior {
    pub make: String,
    pub model: String,
    pub year: Option<i32>,
    pub curb_weight: Option<i32>,
    pub edr: String,
    /// Keyed by event number
    pub deformations: HashMap<u32, Deformation>,
}

/// Parsed case, independent of the catalog it came from
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CaseDocument {
    pub case_id: String,
    pub case_number: String,
    pub summary: String,
    pub vehicles: Vec<VehicleSummary>,
    pub events: Vec<EventSummary>,
    /// Keyed by vehicle number
    pub exteriors: HashMap<u32, VehicleExterior>,
}

/// An event in which a vehicle of interest took damage in the searched area
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyEvent {
    pub vehicle: u32,
    pub event: u32,
    pub other: Option<u32>,
    pub other_label: String,
}

/// Records of one case plus the key events that could not be completed
#[derive(Debug, Default)]
pub struct CaseExtraction {
    pub records: Vec<EventRecord>,
    pub discarded: Vec<(KeyEvent, ExtractError)>,
}

impl CaseDocument {
    fn is_vehicle(&self, code: Option<i32>) -> Option<u32> {
        let number = u32::try_from(code?).ok()?;
        self.vehicles
            .iter()
            .any(|v| v.number == number)
            .then_some(number)
    }

    /// Vehicle numbers matching the search make, model and year range
    pub fn vehicles_of_interest(&self, search: &SearchParams) -> Vec<u32> {
        self.vehicles
            .iter()
            .filter(|v| matches_code(v.make, search.make))
            .filter(|v| matches_code(v.model, search.model))
            .filter(|v| matches_year(v.year, search.start_year, search.end_year))
            .map(|v| v.number)
            .collect()
    }

    /// Events where a vehicle of interest was damaged in the searched area.
    /// The vehicle may appear on either side of the event row.
    pub fn key_events(&self, search: &SearchParams, vois: &[u32]) -> Vec<KeyEvent> {
        let mut keys: Vec<KeyEvent> = Vec::new();

        for row in &self.events {
            let contacted = self.is_vehicle(row.contacted);

            let candidate = if vois.contains(&row.vehicle_number)
                && matches_code(row.area_of_damage, search.primary_damage)
            {
                Some(KeyEvent {
                    vehicle: row.vehicle_number,
                    event: row.event_number,
                    other: contacted,
                    other_label: row.contacted_label.clone(),
                })
            } else {
                contacted
                    .filter(|c| vois.contains(c))
                    .filter(|_| matches_code(row.contacted_area_of_damage, search.primary_damage))
                    .map(|c| KeyEvent {
                        vehicle: c,
                        event: row.event_number,
                        other: Some(row.vehicle_number),
                        other_label: format!("Vehicle {}", row.vehicle_number),
                    })
            };

            if let Some(key) = candidate {
                if !keys.iter().any(|k| k.vehicle == key.vehicle && k.event == key.event) {
                    keys.push(key);
                }
            }
        }

        keys
    }

    /// Build the complete record for one key event
    pub fn record(&self, key: &KeyEvent, fallback: CounterpartWeight) -> ExtractResult<EventRecord> {
        let exterior = self
            .exteriors
            .get(&key.vehicle)
            .ok_or_else(|| ExtractError::MissingElement(format!("exterior of vehicle {}", key.vehicle)))?;
        let deformation = exterior
            .deformations
            .get(&key.event)
            .ok_or_else(|| ExtractError::MissingElement(format!("deformation for event {}", key.event)))?;

        let total_dv = required(deformation.total, "Total")?;
        let lat_dv = required(deformation.lateral, "Lateral")?;
        let lon_dv = required(deformation.longitudinal, "Longitudinal")?;
        let mut crush = [0; 6];
        for (i, sample) in deformation.crush.iter().enumerate() {
            crush[i] = required(*sample, &format!("C{}", i + 1))?;
        }
        let curb_weight = required(positive(exterior.curb_weight), "CurbWeight")?;

        let other = key.other.and_then(|n| self.exteriors.get(&n));
        let a_curb_weight = other.and_then(|o| positive(o.curb_weight));
        let weight_for_derivation = a_curb_weight.unwrap_or(match fallback {
            CounterpartWeight::SameAsVehicle => curb_weight,
            CounterpartWeight::Fixed(kg) => kg,
        });

        let mut record = EventRecord {
            case_id: self.case_id.clone(),
            case_num: self.case_number.clone(),
            summary: self.summary.clone(),
            vehicle_num: key.vehicle,
            event_num: key.event,
            make: exterior.make.clone(),
            model: exterior.model.clone(),
            model_year: exterior.year,
            curb_weight,
            damage_location: deformation.location.clone(),
            underride: deformation.override_underride.clone(),
            edr: exterior.edr.clone(),
            lon_dv,
            lat_dv,
            total_dv,
            smash_length: deformation.smash_length,
            crush,
            a_vehicle_num: key.other,
            a_label: key.other_label.clone(),
            a_make: other.map(|o| o.make.clone()).unwrap_or_default(),
            a_model: other.map(|o| o.model.clone()).unwrap_or_default(),
            a_year: other.and_then(|o| o.year),
            a_curb_weight,
            c_bar: 0.0,
            nass_dv: 0.0,
            nass_vc: 0.0,
            e: 0.0,
            tot_dv: 0.0,
        };
        record.apply(Derived::compute(crush, total_dv, curb_weight, weight_for_derivation));

        Ok(record)
    }

    /// Filter, find key events and build every record that can be completed.
    ///
    /// Fails when no vehicle or no event matches; incomplete key events are
    /// reported in [`CaseExtraction::discarded`].
    pub fn extract(&self, search: &SearchParams, fallback: CounterpartWeight) -> ExtractResult<CaseExtraction> {
        let vois = self.vehicles_of_interest(search);
        if vois.is_empty() {
            return Err(ExtractError::NoVehicleOfInterest);
        }

        let keys = self.key_events(search, &vois);
        if keys.is_empty() {
            return Err(ExtractError::NoKeyEvent);
        }

        let mut extraction = CaseExtraction::default();
        for key in keys {
            match self.record(&key, fallback) {
                Ok(record) => extraction.records.push(record),
                Err(e) => {
                    warn!(
                        "Case {}: discarding vehicle {} event {}: {}",
                        self.case_id, key.vehicle, key.event, e
                    );
                    extraction.discarded.push((key, e));
                }
            }
        }

        debug!(
            "Case {}: {} record(s), {} discarded",
            self.case_id,
            extraction.records.len(),
            extraction.discarded.len()
        );
        Ok(extraction)
    }
}

fn required(value: Option<i32>, field: &str) -> ExtractResult<i32> {
    value.ok_or_else(|| ExtractError::NotNumeric {
        field: field.to_string(),
    })
}

/// Curb weights of zero or below are placeholders for "unknown"
fn positive(weight: Option<i32>) -> Option<i32> {
    weight.filter(|kg| *kg > 0)
}

fn matches_code(value: Option<i32>, wanted: i32) -> bool {
    wanted == ANY || value == Some(wanted)
}

fn matches_year(year: Option<i32>, start: i32, end: i32) -> bool {
    if start == ANY && end == ANY {
        return true;
    }
    match year {
        None => false,
        Some(y) => (start == ANY || y >= start) && (end == ANY || y <= end),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deformation(total: Option<i32>) -> Deformation {
        Deformation {
            total,
            lateral: Some(-10),
            longitudinal: Some(-30),
            location: "F".to_string(),
            override_underride: "No".to_string(),
            crush: [Some(10), Some(20), Some(30), Some(40), Some(50), Some(60)],
            smash_length: Some(150),
        }
    }

    fn two_car_case() -> CaseDocument {
        let mut voi = VehicleExterior {
            make: "Toyota".to_string(),
            model: "Camry".to_string(),
            year: Some(2005),
            curb_weight: Some(1500),
            edr: "Yes".to_string(),
            ..Default::default()
        };
        voi.deformations.insert(1, deformation(Some(32)));
        voi.deformations.insert(2, deformation(None));

        let other = VehicleExterior {
            make: "Ford".to_string(),
            model: "F-150".to_string(),
            year: Some(2010),
            curb_weight: Some(2200),
            ..Default::default()
        };

        CaseDocument {
            case_id: "100".to_string(),
            case_number: "2009-11-100".to_string(),
            summary: "V1 struck V2".to_string(),
            vehicles: vec![
                VehicleSummary { number: 1, make: Some(35), model: Some(20), year: Some(2005) },
                VehicleSummary { number: 2, make: Some(12), model: Some(5), year: Some(2010) },
            ],
            events: vec![
                EventSummary {
                    event_number: 1,
                    vehicle_number: 1,
                    area_of_damage: Some(0),
                    contacted: Some(2),
                    contacted_label: "Vehicle 2".to_string(),
                    contacted_area_of_damage: Some(2),
                },
                EventSummary {
                    event_number: 2,
                    vehicle_number: 1,
                    area_of_damage: Some(0),
                    contacted: Some(41),
                    contacted_label: "Tree".to_string(),
                    contacted_area_of_damage: None,
                },
            ],
            exteriors: HashMap::from([(1, voi), (2, other)]),
        }
    }

    fn search() -> SearchParams {
        SearchParams {
            make: 35,
            model: 20,
            start_year: 2000,
            end_year: 2008,
            primary_damage: 0,
            ..SearchParams::default()
        }
    }

    #[test]
    fn test_vehicle_filter() {
        let case = two_car_case();
        assert_eq!(case.vehicles_of_interest(&search()), vec![1]);
        assert_eq!(case.vehicles_of_interest(&SearchParams::default()), vec![1, 2]);

        let out_of_range = SearchParams { start_year: 2006, ..search() };
        assert!(case.vehicles_of_interest(&out_of_range).is_empty());
    }

    #[test]
    fn test_key_events_and_records() {
        let case = two_car_case();
        let extraction = case.extract(&search(), CounterpartWeight::SameAsVehicle).unwrap();

        // Event 2 has no total delta-V and is discarded
        assert_eq!(extraction.records.len(), 1);
        assert_eq!(extraction.discarded.len(), 1);
        assert!(matches!(
            extraction.discarded[0].1,
            ExtractError::NotNumeric { ref field } if field == "Total"
        ));

        let record = &extraction.records[0];
        assert_eq!(record.key(), ("100", 1, 1));
        assert_eq!(record.a_vehicle_num, Some(2));
        assert_eq!(record.a_make, "Ford");
        assert_eq!(record.a_curb_weight, Some(2200));
        assert_eq!(record.crush, [10, 20, 30, 40, 50, 60]);

        let expected = Derived::compute([10, 20, 30, 40, 50, 60], 32, 1500, 2200);
        assert_eq!(record.nass_vc, expected.nass_vc);
        assert_eq!(record.tot_dv, expected.tot_dv);
    }

    #[test]
    fn test_vehicle_on_contacted_side() {
        let case = two_car_case();
        let search = SearchParams {
            make: 12,
            primary_damage: 2,
            ..SearchParams::default()
        };

        let keys = case.key_events(&search, &case.vehicles_of_interest(&search));
        assert_eq!(
            keys,
            vec![KeyEvent {
                vehicle: 2,
                event: 1,
                other: Some(1),
                other_label: "Vehicle 1".to_string(),
            }]
        );
    }

    #[test]
    fn test_unknown_counterpart_weight_fallbacks() {
        let mut case = two_car_case();
        case.exteriors.get_mut(&2).unwrap().curb_weight = None;
        let key = KeyEvent { vehicle: 1, event: 1, other: Some(2), other_label: String::new() };

        let same = case.record(&key, CounterpartWeight::SameAsVehicle).unwrap();
        assert!((same.nass_vc - 2.0 * same.nass_dv).abs() < 1e-9);
        assert_eq!(same.a_curb_weight, None);

        let fixed = case.record(&key, CounterpartWeight::Fixed(99_999)).unwrap();
        assert!(fixed.nass_vc < same.nass_vc);
    }

    #[test]
    fn test_zero_curb_weights_are_unknown() {
        let key = KeyEvent { vehicle: 1, event: 1, other: Some(2), other_label: String::new() };

        let mut case = two_car_case();
        case.exteriors.get_mut(&2).unwrap().curb_weight = Some(0);
        let record = case.record(&key, CounterpartWeight::SameAsVehicle).unwrap();
        assert_eq!(record.a_curb_weight, None);
        assert!(record.nass_vc.is_finite());
        assert!(record.e.is_finite());
        assert!(record.tot_dv.is_finite());
        assert!((record.nass_vc - 2.0 * record.nass_dv).abs() < 1e-9);

        let json = serde_json::to_value(&record).unwrap();
        assert!(json["tot_dv"].is_f64());

        let mut case = two_car_case();
        case.exteriors.get_mut(&1).unwrap().curb_weight = Some(0);
        let extraction = case.extract(&search(), CounterpartWeight::SameAsVehicle).unwrap();
        assert!(extraction.records.is_empty());
        assert!(extraction.discarded.iter().any(|(k, e)| {
            k.event == 1 && matches!(e, ExtractError::NotNumeric { field } if field == "CurbWeight")
        }));
    }

    #[test]
    fn test_no_matches() {
        let case = two_car_case();

        let wrong_make = SearchParams { make: 99, ..SearchParams::default() };
        assert!(matches!(
            case.extract(&wrong_make, CounterpartWeight::SameAsVehicle),
            Err(ExtractError::NoVehicleOfInterest)
        ));

        let wrong_damage = SearchParams { primary_damage: 7, ..search() };
        assert!(matches!(
            case.extract(&wrong_damage, CounterpartWeight::SameAsVehicle),
            Err(ExtractError::NoKeyEvent)
        ));
    }
}
