//! One-shot fetchers that populate search dropdowns. They talk to the
//! catalog directly and never go through the request scheduler.

pub mod model_update;
pub mod search_refresh;

use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::OptionsError;

pub use model_update::{spawn_model_update, update_models, ModelOption};
pub use search_refresh::{parse_search_page, refresh_search_options, spawn_search_refresh};

/// One `<option>` of a search-form select
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionItem {
    pub value: String,
    pub text: String,
}

/// Every select list on the search page, keyed by field name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchOptions {
    pub lists: BTreeMap<String, Vec<OptionItem>>,
}

impl SearchOptions {
    pub fn get(&self, field: &str) -> Option<&[OptionItem]> {
        self.lists.get(field).map(Vec::as_slice)
    }

    pub fn is_empty(&self) -> bool {
        self.lists.is_empty()
    }
}

/// HTTP client for the option fetchers; `timeout` bounds each whole request
pub fn client(user_agent: &str, timeout: Duration) -> Result<Client, OptionsError> {
    Ok(Client::builder()
        .cookie_store(true)
        .user_agent(user_agent)
        .timeout(timeout)
        .build()?)
}
