use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use regex::Regex;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::crawler::request::{Request, Tag};
use crate::error::{ExtractError, ExtractResult};
use crate::scraper::case::{CaseDocument, CaseExtraction};
use crate::scraper::ciss::CissCatalog;
use crate::scraper::nass::NassCatalog;

/// The catalog's universal "any" value
pub const ANY: i32 = -1;

/// Tag key every scraper request carries
pub const DATABASE_TAG: &str = "database";

/// Supported crash-case catalogs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Database {
    #[serde(rename = "NASS")]
    Nass,
    #[serde(rename = "CISS")]
    Ciss,
}

impl Database {
    pub const ALL: [Database; 2] = [Database::Nass, Database::Ciss];

    pub fn name(&self) -> &'static str {
        match self {
            Database::Nass => "NASS",
            Database::Ciss => "CISS",
        }
    }

    /// Build the catalog variant for this database
    pub fn catalog(&self, settings: &CatalogSettings) -> Arc<dyn Catalog> {
        match self {
            Database::Nass => Arc::new(NassCatalog::new(settings)),
            Database::Ciss => Arc::new(CissCatalog::new(settings)),
        }
    }
}

impl fmt::Display for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Database {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "NASS" => Ok(Database::Nass),
            "CISS" => Ok(Database::Ciss),
            other => Err(format!("unknown database '{}'", other)),
        }
    }
}

/// What the user is searching for. Every field defaults to [`ANY`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchParams {
    pub make: i32,
    pub model: i32,
    pub start_year: i32,
    pub end_year: i32,
    pub primary_damage: i32,
    pub secondary_damage: i32,
    pub min_dv: i32,
    pub max_dv: i32,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            make: ANY,
            model: ANY,
            start_year: ANY,
            end_year: ANY,
            primary_damage: ANY,
            secondary_damage: ANY,
            min_dv: ANY,
            max_dv: ANY,
        }
    }
}

/// Endpoints of both catalogs. Case URL templates use an `{id}` placeholder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogSettings {
    pub nass_case_list_url: String,
    pub nass_case_url: String,
    pub nass_search_url: String,
    pub nass_models_url: String,
    pub ciss_case_list_url: String,
    pub ciss_case_url: String,
}

impl Default for CatalogSettings {
    fn default() -> Self {
        Self {
            nass_case_list_url: "https://crashviewer.nhtsa.dot.gov/LegacyCDS".to_string(),
            nass_case_url:
                "https://crashviewer.nhtsa.dot.gov/nass-cds/CaseForm.aspx?GetXML&caseid={id}&docinfo=0"
                    .to_string(),
            nass_search_url: "https://crashviewer.nhtsa.dot.gov/LegacyCDS/Search".to_string(),
            nass_models_url: "https://crashviewer.nhtsa.dot.gov/LegacyCDS/GetVehicleModels/"
                .to_string(),
            ciss_case_list_url: "https://crashviewer.nhtsa.dot.gov/CISS".to_string(),
            ciss_case_url: "https://crashviewer.nhtsa.dot.gov/CISS/CISSCrashData/?crashId={id}"
                .to_string(),
        }
    }
}

/// Curb weight assumed for a counterpart whose weight is unknown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterpartWeight {
    /// Reuse the vehicle of interest's own weight
    SameAsVehicle,
    /// Fixed weight in kg
    Fixed(i32),
}

/// One catalog variant: how to ask for case lists and cases, and how to read them.
pub trait Catalog: Send + Sync {
    fn database(&self) -> Database;

    /// Request for one page (1-based) of the case list
    fn case_list_request(&self, search: &SearchParams, page: u32) -> Request;

    /// Request for one case document
    fn case_request(&self, case_id: &str) -> Request;

    /// Case identifiers on a case-list page, in page order without duplicates
    fn case_ids(&self, html: &str) -> Vec<String>;

    /// Parse a case document into the variant-neutral shape
    fn parse_case(&self, body: &str) -> ExtractResult<CaseDocument>;

    fn counterpart_weight(&self) -> CounterpartWeight;

    /// Tag identifying this catalog's requests
    fn tag(&self) -> Tag {
        let mut tag = Tag::new();
        tag.insert(DATABASE_TAG.to_string(), self.database().name().to_string());
        tag
    }

    /// Parse a case body and build its event records
    fn extract(&self, body: &str, search: &SearchParams) -> ExtractResult<CaseExtraction> {
        if body.trim().is_empty() {
            return Err(ExtractError::EmptyBody);
        }
        self.parse_case(body)?
            .extract(search, self.counterpart_weight())
    }
}

/// Collect the numeric `key=<n>` query values of every link on a page
pub(crate) fn collect_case_ids(html: &str, key: &str) -> Vec<String> {
    let pattern = match Regex::new(&format!(r"(?i)[?&]{}=(\d+)", regex::escape(key))) {
        Ok(regex) => regex,
        Err(e) => {
            error!("Invalid case id pattern for '{}': {}", key, e);
            return Vec::new();
        }
    };
    let selector = match Selector::parse("a[href]") {
        Ok(selector) => selector,
        Err(e) => {
            error!("Invalid link selector: {:?}", e);
            return Vec::new();
        }
    };

    let document = Html::parse_document(html);
    let mut ids: Vec<String> = Vec::new();
    for link in document.select(&selector) {
        let Some(href) = link.value().attr("href") else {
            continue;
        };
        if let Some(id) = pattern.captures(href).and_then(|c| c.get(1)) {
            let id = id.as_str().to_string();
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
    }

    debug!("Found {} case id(s) for '{}'", ids.len(), key);
    ids
}

/// Substitute `{id}` in a case URL template
pub(crate) fn case_url(template: &str, case_id: &str) -> String {
    template.replace("{id}", case_id)
}
