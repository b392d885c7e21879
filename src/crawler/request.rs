use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Opaque routing labels attached to a request.
pub type Tag = BTreeMap<String, String>;

/// Well-known priority classes. Lower values are dispatched first.
pub struct Priority;

impl Priority {
    pub const IMMEDIATE: i32 = 0;
    pub const IMAGE: i32 = 1;
    pub const CASE: i32 = 2;
    pub const CASE_LIST: i32 = 3;
}

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestId(u64);

impl RequestId {
    fn next() -> Self {
        Self(NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// HTTP method of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Method::Get),
            "POST" => Ok(Method::Post),
            other => Err(format!("unsupported HTTP method: {}", other)),
        }
    }
}

/// One HTTP call waiting to be performed by the scheduler.
///
/// Requests compare by identity: two requests built from identical fields are
/// still distinct queue items.
#[derive(Debug, Clone)]
pub struct Request {
    id: RequestId,

    /// Target URL (may already carry a query string)
    pub url: String,

    /// GET or POST
    pub method: Method,

    /// Query parameters for GET, form fields for POST
    pub params: BTreeMap<String, String>,

    /// Extra request headers
    pub headers: BTreeMap<String, String>,

    /// Priority class (lower = more urgent)
    pub priority: i32,

    /// Routing labels, opaque to the scheduler
    pub tag: Tag,
}

impl Request {
    fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            id: RequestId::next(),
            url: url.into(),
            method,
            params: BTreeMap::new(),
            headers: BTreeMap::new(),
            priority: Priority::IMMEDIATE,
            tag: Tag::new(),
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::Get, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::Post, url)
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_params<I, K, V>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.params
            .extend(params.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tag.insert(key.into(), value.into());
        self
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    /// True when every entry of `filter` is present in this request's tag.
    pub fn tag_matches(&self, filter: &Tag) -> bool {
        filter
            .iter()
            .all(|(key, value)| self.tag.get(key) == Some(value))
    }

    /// True when the request falls in `priority` (any if `None`) and carries `tag`.
    pub fn matches(&self, priority: Option<i32>, tag: &Tag) -> bool {
        priority.map_or(true, |p| p == self.priority) && self.tag_matches(tag)
    }

    /// True if a header with this name is set, ignoring ASCII case
    pub fn has_header(&self, name: &str) -> bool {
        self.headers.keys().any(|k| k.eq_ignore_ascii_case(name))
    }
}

impl PartialEq for Request {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Request {}

/// Completed HTTP exchange. Shared immutably once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// HTTP status code
    pub status: u16,

    /// Final URL after redirects
    pub url: String,

    /// Response headers, including any set-cookie lines
    pub headers: Vec<(String, String)>,

    /// Raw body
    pub body: Vec<u8>,
}

impl Response {
    pub fn new(status: u16, url: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            url: url.into(),
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_empty(&self) -> bool {
        self.body.iter().all(u8::is_ascii_whitespace)
    }

    /// Body decoded as UTF-8, replacing invalid sequences
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// First header with this name, ignoring ASCII case
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_equality() {
        let a = Request::get("http://x/a");
        let b = Request::get("http://x/a");

        assert_ne!(a, b);
        assert_eq!(a, a.clone());
    }

    #[test]
    fn test_tag_superset_match() {
        let request = Request::get("http://x/a")
            .with_priority(Priority::CASE)
            .with_tag("database", "NASS")
            .with_tag("case_id", "7");

        let mut filter = Tag::new();
        assert!(request.matches(None, &filter));

        filter.insert("database".into(), "NASS".into());
        assert!(request.matches(Some(Priority::CASE), &filter));
        assert!(!request.matches(Some(Priority::CASE_LIST), &filter));

        filter.insert("database".into(), "CISS".into());
        assert!(!request.matches(None, &filter));
    }

    #[test]
    fn test_method_parsing() {
        assert_eq!("post".parse::<Method>(), Ok(Method::Post));
        assert!("DELETE".parse::<Method>().is_err());
    }

    #[test]
    fn test_response_helpers() {
        let mut response = Response::new(204, "http://x/a", "  \n");
        response
            .headers
            .push(("Set-Cookie".to_string(), "sid=1".to_string()));

        assert!(response.is_success());
        assert!(response.is_empty());
        assert_eq!(response.header("set-cookie"), Some("sid=1"));
        assert!(!Response::new(404, "http://x/a", "nope").is_success());
    }
}
