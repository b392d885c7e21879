//! CISS catalog. Every request is a GET; case documents are `CrashData` XML.

use std::collections::HashMap;

use roxmltree::Document;
use tracing::trace;

use crate::crawler::request::{Priority, Request};
use crate::error::{ExtractError, ExtractResult};
use crate::scraper::case::{
    CaseDocument, Deformation, EventSummary, VehicleExterior, VehicleSummary,
};
use crate::scraper::catalog::{
    case_url, collect_case_ids, Catalog, CatalogSettings, CounterpartWeight, Database, SearchParams,
    ANY, DATABASE_TAG,
};
use crate::scraper::xml::{
    attr_index, child, children, descendants, number_of, parse_optional_number, text_of, value_of,
};

/// Weight (kg) assumed for an unknown counterpart: heavy enough to act as a rigid barrier
pub const UNKNOWN_COUNTERPART_KG: i32 = 99_999;

const ANY_FILTERS: &[&str] = &[
    "CaseYear",
    "PSU",
    "CrashType",
    "EventClass",
    "ObjectContacted",
    "BodyType",
    "Rollover",
    "Fire",
    "DirectionOfForce",
    "SeatPosition",
    "InjurySeverity",
    "RestraintUse",
    "AirbagDeployment",
];

pub struct CissCatalog {
    case_list_url: String,
    case_url: String,
}

impl CissCatalog {
    pub fn new(settings: &CatalogSettings) -> Self {
        Self {
            case_list_url: settings.ciss_case_list_url.clone(),
            case_url: settings.ciss_case_url.clone(),
        }
    }

    fn payload(search: &SearchParams, page: u32) -> Vec<(String, String)> {
        let mut payload: Vec<(String, String)> = ANY_FILTERS
            .iter()
            .map(|field| (field.to_string(), ANY.to_string()))
            .collect();

        payload.extend(
            [
                ("VehicleMake", search.make),
                ("VehicleModel", search.model),
                ("ModelYearFrom", search.start_year),
                ("ModelYearTo", search.end_year),
                ("PrimaryDamage", search.primary_damage),
                ("SecondaryDamage", search.secondary_damage),
                ("DeltaVFrom", search.min_dv),
                ("DeltaVTo", search.max_dv),
            ]
            .into_iter()
            .map(|(field, value)| (field.to_string(), value.to_string())),
        );
        payload.push(("PageNumber".to_string(), page.to_string()));
        payload
    }
}

impl Catalog for CissCatalog {
    fn database(&self) -> Database {
        Database::Ciss
    }

    fn case_list_request(&self, search: &SearchParams, page: u32) -> Request {
        Request::get(&self.case_list_url)
            .with_params(Self::payload(search, page))
            .with_priority(Priority::CASE_LIST)
            .with_tag(DATABASE_TAG, Database::Ciss.name())
            .with_tag("page", page.to_string())
    }

    fn case_request(&self, case_id: &str) -> Request {
        Request::get(case_url(&self.case_url, case_id))
            .with_priority(Priority::CASE)
            .with_tag(DATABASE_TAG, Database::Ciss.name())
            .with_tag("case_id", case_id)
    }

    fn case_ids(&self, html: &str) -> Vec<String> {
        collect_case_ids(html, "crashId")
    }

    fn parse_case(&self, body: &str) -> ExtractResult<CaseDocument> {
        let doc = Document::parse(body.trim_start_matches('\u{feff}').trim_start())?;
        let root = doc.root_element();
        if !root.has_tag_name("CrashData") {
            return Err(ExtractError::MissingElement("CrashData".to_string()));
        }

        let case_id = root
            .attribute("CaseId")
            .ok_or_else(|| ExtractError::MissingElement("CrashData@CaseId".to_string()))?
            .to_string();
        let case_number = root
            .attribute("CaseNumber")
            .map(str::to_string)
            .unwrap_or_else(|| case_id.clone());

        let mut vehicles = Vec::new();
        let mut exteriors = HashMap::new();
        for node in descendants(root, "Vehicle") {
            let Some(number) = attr_index(node, "VehicleNumber") else {
                continue;
            };
            let year = number_of(node, "ModelYear");
            vehicles.push(VehicleSummary {
                number,
                make: value_of(node, "Make"),
                model: value_of(node, "Model"),
                year,
            });
            exteriors.insert(
                number,
                VehicleExterior {
                    make: text_of(node, "Make"),
                    model: text_of(node, "Model"),
                    year,
                    curb_weight: number_of(node, "CurbWeight"),
                    edr: text_of(node, "EDR"),
                    deformations: HashMap::new(),
                },
            );
        }

        let events = descendants(root, "Event")
            .filter_map(|node| {
                let other = child(node, "OtherVehicle");
                Some(EventSummary {
                    event_number: attr_index(node, "EventNumber")?,
                    vehicle_number: attr_index(node, "VehicleNumber")?,
                    area_of_damage: value_of(node, "AreaOfDamage"),
                    contacted: other
                        .and_then(|o| o.attribute("value"))
                        .and_then(parse_optional_number),
                    contacted_label: other
                        .and_then(|o| o.text())
                        .map(|t| t.trim().to_string())
                        .unwrap_or_default(),
                    contacted_area_of_damage: value_of(node, "OtherAreaOfDamage"),
                })
            })
            .collect();

        if let Some(deformations) = child(root, "Deformations") {
            for node in children(deformations, "Deformation") {
                let (Some(vehicle), Some(event)) =
                    (attr_index(node, "VehicleNumber"), attr_index(node, "EventNumber"))
                else {
                    continue;
                };
                let Some(exterior) = exteriors.get_mut(&vehicle) else {
                    continue;
                };

                let mut crush = [None; 6];
                for (i, sample) in crush.iter_mut().enumerate() {
                    *sample = value_of(node, &format!("C{}", i + 1));
                }
                exterior.deformations.insert(
                    event,
                    Deformation {
                        total: value_of(node, "Total"),
                        lateral: value_of(node, "Lateral"),
                        longitudinal: value_of(node, "Longitudinal"),
                        location: text_of(node, "Location"),
                        override_underride: text_of(node, "Override"),
                        crush,
                        smash_length: value_of(node, "SmashLength"),
                    },
                );
            }
        }

        trace!("Parsed CISS case {} ({} vehicle(s))", case_id, vehicles.len());
        Ok(CaseDocument {
            case_id,
            case_number,
            summary: text_of(root, "Summary"),
            vehicles,
            events,
            exteriors,
        })
    }

    fn counterpart_weight(&self) -> CounterpartWeight {
        CounterpartWeight::Fixed(UNKNOWN_COUNTERPART_KG)
    }
}
