use std::time::Duration;
use thiserror::Error;

/// Failure of a single HTTP exchange performed by a worker.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} timed out after {timeout:?}")]
    Timeout { url: String, timeout: Duration },

    #[error("transport error for {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

/// Reasons a case document (or one of its key events) yields no record.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("empty response body")]
    EmptyBody,

    #[error("malformed XML: {0}")]
    Xml(#[from] roxmltree::Error),

    #[error("missing element <{0}>")]
    MissingElement(String),

    #[error("field {field} is not numeric")]
    NotNumeric { field: String },

    #[error("no vehicle matches the search make/model/year")]
    NoVehicleOfInterest,

    #[error("no event matches the search damage area")]
    NoKeyEvent,
}

/// Failure of a search-refresh or model-update fetch.
#[derive(Debug, Error)]
pub enum OptionsError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("catalog returned HTTP {0}")]
    Status(u16),

    #[error("could not decode options: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("search page contained no option lists")]
    NoOptions,
}

pub type ExtractResult<T> = std::result::Result<T, ExtractError>;
