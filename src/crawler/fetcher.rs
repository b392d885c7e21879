use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::USER_AGENT;
use reqwest::Client;
use tracing::debug;

use crate::crawler::request::{Method, Request, Response};
use crate::error::FetchError;

/// User agent sent when a request does not carry its own
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

/// Performs one HTTP exchange for the scheduler's workers.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &Request, timeout: Duration) -> Result<Response, FetchError>;
}

/// `reqwest`-backed fetcher sharing one client (and cookie jar) across workers
pub struct HttpFetcher {
    client: Client,
    user_agent: String,
}

impl HttpFetcher {
    pub fn new(user_agent: impl Into<String>) -> Result<Self, FetchError> {
        let client = Client::builder()
            .cookie_store(true)
            .build()
            .map_err(|source| FetchError::Transport {
                url: String::new(),
                source,
            })?;

        Ok(Self::with_client(client, user_agent))
    }

    pub fn with_client(client: Client, user_agent: impl Into<String>) -> Self {
        Self {
            client,
            user_agent: user_agent.into(),
        }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &Request, timeout: Duration) -> Result<Response, FetchError> {
        if request.url.is_empty() {
            return Err(FetchError::InvalidRequest("empty URL".to_string()));
        }

        let mut builder = match request.method {
            Method::Get => {
                let builder = self.client.get(&request.url);
                if request.params.is_empty() {
                    builder
                } else {
                    builder.query(&request.params)
                }
            }
            Method::Post => self.client.post(&request.url).form(&request.params),
        };

        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if !request.has_header(USER_AGENT.as_str()) {
            builder = builder.header(USER_AGENT, self.user_agent.as_str());
        }

        let transport = |source: reqwest::Error| {
            if source.is_timeout() {
                FetchError::Timeout {
                    url: request.url.clone(),
                    timeout,
                }
            } else {
                FetchError::Transport {
                    url: request.url.clone(),
                    source,
                }
            }
        };

        debug!("{} {}", request.method, request.url);
        let response = builder.timeout(timeout).send().await.map_err(transport)?;

        let status = response.status().as_u16();
        let url = response.url().to_string();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();
        let body = response.bytes().await.map_err(transport)?.to_vec();

        Ok(Response {
            status,
            url,
            headers,
            body,
        })
    }
}
