//! NASS CDS (legacy) catalog.
//!
//! The case list is an HTML search form: page 1 is a plain GET, later pages
//! are posted back with `currentPage` advanced. Case documents are the
//! `CaseForm` XML export.

use std::collections::HashMap;

use roxmltree::{Document, Node};
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

/// Search-form filters this crawler never narrows
const ANY_FILTERS: &[&str] = &[
    "ddlCaseYear",
    "ddlPSU",
    "ddlCaseNumber",
    "ddlCrashType",
    "ddlCrashConfig",
    "ddlEventClass",
    "ddlObjectContacted",
    "ddlVehicleType",
    "ddlBodyType",
    "ddlVehicleUse",
    "ddlRollover",
    "ddlFire",
    "ddlTowedVehicle",
    "ddlDirectionOfForce",
    "ddlDeformationExtent",
    "ddlSpecificLongitudinal",
    "ddlSpecificVertical",
    "ddlDeformationType",
    "ddlSeatPosition",
    "ddlOccupantAge",
    "ddlOccupantSex",
    "ddlInjurySeverity",
    "ddlTreatment",
    "ddlRestraintUse",
    "ddlAirbagDeployment",
    "ddlEjection",
    "ddlEntrapment",
    "ddlFatality",
];

/// Area-of-damage codes in `CaseForm` are one ahead of the search form's ids
const AOD_OFFSET: i32 = 1;

pub struct NassCatalog {
    case_list_url: String,
    case_url: String,
}

impl NassCatalog {
    pub fn new(settings: &CatalogSettings) -> Self {
        Self {
            case_list_url: settings.nass_case_list_url.clone(),
            case_url: settings.nass_case_url.clone(),
        }
    }

    fn payload(search: &SearchParams, page: u32) -> Vec<(String, String)> {
        let mut payload: Vec<(String, String)> = ANY_FILTERS
            .iter()
            .map(|field| (field.to_string(), ANY.to_string()))
            .collect();

        payload.extend(
            [
                ("ddlMake", search.make),
                ("ddlModel", search.model),
                ("ddlStartModelYear", search.start_year),
                ("ddlEndModelYear", search.end_year),
                ("ddlPrimaryDamage", search.primary_damage),
                ("lSecondaryDamage", search.secondary_damage),
                ("tDeltaVFrom", search.min_dv),
                ("tDeltaVTo", search.max_dv),
            ]
            .into_iter()
            .map(|(field, value)| (field.to_string(), value.to_string())),
        );
        payload.push(("currentPage".to_string(), page.to_string()));
        payload
    }
}

impl Catalog for NassCatalog {
    fn database(&self) -> Database {
        Database::Nass
    }

    fn case_list_request(&self, search: &SearchParams, page: u32) -> Request {
        let request = if page <= 1 {
            Request::get(&self.case_list_url)
        } else {
            Request::post(&self.case_list_url)
        };
        request
            .with_params(Self::payload(search, page))
            .with_priority(Priority::CASE_LIST)
            .with_tag(DATABASE_TAG, Database::Nass.name())
            .with_tag("page", page.to_string())
    }

    fn case_request(&self, case_id: &str) -> Request {
        Request::get(case_url(&self.case_url, case_id))
            .with_priority(Priority::CASE)
            .with_tag(DATABASE_TAG, Database::Nass.name())
            .with_tag("case_id", case_id)
    }

    fn case_ids(&self, html: &str) -> Vec<String> {
        collect_case_ids(html, "caseid")
    }

    fn parse_case(&self, body: &str) -> ExtractResult<CaseDocument> {
        let doc = Document::parse(body.trim_start_matches('\u{feff}').trim_start())?;
        let root = doc.root_element();
        if !root.has_tag_name("CaseForm") {
            return Err(ExtractError::MissingElement("CaseForm".to_string()));
        }

        let case_id = root
            .attribute("caseID")
            .ok_or_else(|| ExtractError::MissingElement("CaseForm@caseID".to_string()))?
            .to_string();
        let case_number = root
            .attribute("caseStr")
            .map(str::to_string)
            .unwrap_or_else(|| case_id.clone());

        let vehicles = children(root, "VehicleSum")
            .filter_map(|node| {
                Some(VehicleSummary {
                    number: attr_index(node, "VehicleNumber")?,
                    make: value_of(node, "Make"),
                    model: value_of(node, "Model"),
                    year: number_of(node, "Year"),
                })
            })
            .collect();

        let events = children(root, "EventSum")
            .filter_map(|node| {
                let contacted = child(node, "Contacted");
                Some(EventSummary {
                    event_number: attr_index(node, "EventNumber")?,
                    vehicle_number: attr_index(node, "VehicleNumber")?,
                    area_of_damage: value_of(node, "AreaOfDamage").map(|v| v - AOD_OFFSET),
                    contacted: contacted
                        .and_then(|c| c.attribute("value"))
                        .and_then(parse_optional_number),
                    contacted_label: contacted
                        .and_then(|c| c.text())
                        .map(|t| t.trim().to_string())
                        .unwrap_or_default(),
                    contacted_area_of_damage: value_of(node, "ContactedAreaOfDamage")
                        .map(|v| v - AOD_OFFSET),
                })
            })
            .collect();

        let mut exteriors = HashMap::new();
        for form in descendants(root, "VehicleExteriorForm") {
            if let Some(number) = attr_index(form, "VehicleNumber") {
                exteriors.insert(number, exterior(form));
            }
        }

        trace!("Parsed NASS case {} ({} exterior form(s))", case_id, exteriors.len());
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
        CounterpartWeight::SameAsVehicle
    }
}

fn exterior(form: Node<'_, '_>) -> VehicleExterior {
    let mut deformations = HashMap::new();

    for cdc in descendants(form, "CDCevent") {
        let Some(event) = attr_index(cdc, "eventNumber") else {
            continue;
        };
        deformations.insert(
            event,
            Deformation {
                total: value_of(cdc, "Total"),
                lateral: value_of(cdc, "Lateral"),
                longitudinal: value_of(cdc, "Longitudinal"),
                location: text_of(cdc, "DeformationLocation"),
                override_underride: text_of(cdc, "OverUnderride"),
                ..Default::default()
            },
        );
    }

    for crush in descendants(form, "CrushObject") {
        let Some(event) = number_of(crush, "EventNumber").and_then(|n| u32::try_from(n).ok()) else {
            continue;
        };
        if let Some(deformation) = deformations.get_mut(&event) {
            for (i, sample) in deformation.crush.iter_mut().enumerate() {
                *sample = value_of(crush, &format!("AVG_C{}", i + 1));
            }
            deformation.smash_length = value_of(crush, "SMASHL");
        }
    }

    VehicleExterior {
        make: text_of(form, "Make"),
        model: text_of(form, "Model"),
        year: number_of(form, "ModelYear"),
        curb_weight: number_of(form, "CurbWeight"),
        edr: text_of(form, "EDR"),
        deformations,
    }
}
