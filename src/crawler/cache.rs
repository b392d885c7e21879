use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::trace;
use url::Url;

use crate::crawler::request::{Request, Response};

/// Default lifetime of a cached response (matches the catalog's cookie TTL)
pub const DEFAULT_TTL: Duration = Duration::from_secs(15 * 60);

/// A cached response and the moment it was stored
#[derive(Debug, Clone)]
struct CachedEntry {
    response: Arc<Response>,
    created: Instant,
}

/// Successful responses keyed by canonicalised request, expiring lazily.
#[derive(Debug)]
pub struct ResponseCache {
    ttl: Duration,
    entries: HashMap<String, CachedEntry>,
}

impl ResponseCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: HashMap::new(),
        }
    }

    pub fn set_ttl(&mut self, ttl: Duration) {
        self.ttl = ttl;
    }

    /// Store a response under `key`, replacing any previous entry
    pub fn insert(&mut self, key: String, response: Arc<Response>) {
        self.entries.insert(
            key,
            CachedEntry {
                response,
                created: Instant::now(),
            },
        );
    }

    /// Look up `key`. An expired entry is removed and reported as absent.
    pub fn get(&mut self, key: &str) -> Option<Arc<Response>> {
        let expired = match self.entries.get(key) {
            None => return None,
            Some(entry) => entry.created.elapsed() > self.ttl,
        };

        if expired {
            trace!("Cache entry expired: {}", key);
            self.entries.remove(key);
            return None;
        }

        self.entries.get(key).map(|entry| Arc::clone(&entry.response))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

/// Canonical cache key for a request: method, normalised URL and the merged,
/// sorted query (URL query plus request params).
pub fn canonical_key(request: &Request) -> String {
    let mut params: Vec<(String, String)> = request
        .params
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    let base = match Url::parse(&request.url) {
        Ok(mut parsed) => {
            params.extend(
                parsed
                    .query_pairs()
                    .map(|(k, v)| (k.into_owned(), v.into_owned())),
            );
            parsed.set_query(None);
            parsed.set_fragment(None);

            // Remove default ports
            if let Some(port) = parsed.port() {
                if (parsed.scheme() == "http" && port == 80)
                    || (parsed.scheme() == "https" && port == 443)
                {
                    let _ = parsed.set_port(None);
                }
            }

            parsed.to_string()
        }
        // Can't normalize, keep the raw string
        Err(_) => request.url.clone(),
    };

    params.sort();

    let query = params
        .iter()
        .map(|(k, v)| if v.is_empty() { k.clone() } else { format!("{}={}", k, v) })
        .collect::<Vec<String>>()
        .join("&");

    if query.is_empty() {
        format!("{} {}", request.method, base)
    } else {
        format!("{} {}?{}", request.method, base, query)
    }
}
