//! Request description and the retrying fetcher

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, Response};
use std::time::Duration;

use crate::error::FetchError;
use crate::retry::{retry, RetryPolicy};
use crate::Result;

const USER_AGENT: &str = concat!("vessel/", env!("CARGO_PKG_VERSION"));

/// An HTTP-style request: URL, method, headers and an optional body.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: String,
    pub method: Method,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

impl FetchRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: Method::GET,
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn post(url: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            url: url.into(),
            method: Method::POST,
            headers: Vec::new(),
            body: Some(body.into()),
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    fn header_map(&self) -> Result<HeaderMap> {
        let mut map = HeaderMap::with_capacity(self.headers.len());
        for (name, value) in &self.headers {
            let header_name =
                HeaderName::from_bytes(name.as_bytes()).map_err(|e| FetchError::InvalidHeader {
                    name: name.clone(),
                    reason: e.to_string(),
                })?;
            let header_value =
                HeaderValue::from_str(value).map_err(|e| FetchError::InvalidHeader {
                    name: name.clone(),
                    reason: e.to_string(),
                })?;
            map.append(header_name, header_value);
        }
        Ok(map)
    }
}

/// Shared HTTP client. Cloning shares the underlying connection pool.
#[derive(Clone)]
pub struct Fetcher {
    client: reqwest::Client,
}

impl Fetcher {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(Duration::from_secs(15))
            .build()
            .map_err(FetchError::Client)?;

        Ok(Self { client })
    }

    /// Performs the request, retrying network-level failures per `policy`.
    ///
    /// A response that arrives with a non-success status is returned as
    /// [`FetchError::Status`] and is never retried here.
    pub async fn fetch(&self, request: &FetchRequest, policy: &RetryPolicy) -> Result<Response> {
        let url = url::Url::parse(&request.url)
            .map_err(|e| FetchError::InvalidUrl(format!("{}: {e}", request.url)))?;
        let headers = request.header_map()?;

        let response = retry(policy, |attempt| {
            let url = url.clone();
            let headers = headers.clone();
            async move {
                tracing::debug!(url = %url, attempt, "Sending request");
                let mut builder = self
                    .client
                    .request(request.method.clone(), url)
                    .headers(headers);
                if let Some(body) = &request.body {
                    builder = builder.body(body.clone());
                }
                builder.send().await.map_err(|source| FetchError::Network {
                    url: request.url.clone(),
                    source,
                })
            }
        })
        .await?;

        ensure_success(&request.url, response).await
    }
}

async fn ensure_success(url: &str, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let reason = status.canonical_reason().unwrap_or("").to_string();
    let body = response.text().await.ok().filter(|text| !text.is_empty());

    tracing::warn!(url = %url, status = status.as_u16(), "Non-success response");

    Err(FetchError::Status {
        url: url.to_string(),
        status: status.as_u16(),
        reason,
        body,
    })
}
