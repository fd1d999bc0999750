//! HTTP access used by revocation and transparency checks.

use crate::config::Settings;
use crate::error::ProbeError;
use reqwest::blocking::Client;
use reqwest::header::{CONNECTION, CONTENT_TYPE};
use tracing::trace;
use url::Url;

/// Minimal HTTP surface the checks need. Implementations must be shareable
/// between threads.
pub trait Transport: Send + Sync {
    /// Fetches `url` and returns the body. Responses with status >= 300 are errors.
    fn get(&self, url: &str) -> Result<Vec<u8>, ProbeError>;

    /// Posts `body` to `url` and returns the response body.
    fn post(&self, url: &str, content_type: &str, body: &[u8]) -> Result<Vec<u8>, ProbeError>;
}

impl<T: Transport + ?Sized> Transport for &T {
    fn get(&self, url: &str) -> Result<Vec<u8>, ProbeError> {
        (**self).get(url)
    }

    fn post(&self, url: &str, content_type: &str, body: &[u8]) -> Result<Vec<u8>, ProbeError> {
        (**self).post(url, content_type, body)
    }
}

/// [`Transport`] backed by a blocking reqwest client.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(settings: &Settings) -> Result<Self, ProbeError> {
        let client = Client::builder()
            .timeout(settings.http_timeout)
            .user_agent(settings.user_agent.as_str())
            .build()?;
        Ok(HttpTransport { client })
    }
}

fn parse_url(url: &str) -> Result<Url, ProbeError> {
    let parsed = Url::parse(url).map_err(|e| ProbeError::InvalidInput {
        field: "url".to_string(),
        reason: format!("{}: {}", e, url),
    })?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        scheme => Err(ProbeError::InvalidInput {
            field: "url".to_string(),
            reason: format!("unsupported scheme {}: {}", scheme, url),
        }),
    }
}

fn read_body(url: &str, response: reqwest::blocking::Response) -> Result<Vec<u8>, ProbeError> {
    let status = response.status();
    trace!(url, status = status.as_u16(), "HTTP response");
    if status.as_u16() >= 300 {
        return Err(ProbeError::Http {
            url: url.to_string(),
            details: format!("unexpected status {}", status),
        });
    }
    Ok(response.bytes()?.to_vec())
}

impl Transport for HttpTransport {
    fn get(&self, url: &str) -> Result<Vec<u8>, ProbeError> {
        let parsed = parse_url(url)?;
        let response = self.client.get(parsed).send()?;
        read_body(url, response)
    }

    fn post(&self, url: &str, content_type: &str, body: &[u8]) -> Result<Vec<u8>, ProbeError> {
        let parsed = parse_url(url)?;
        let response = self
            .client
            .post(parsed)
            .header(CONTENT_TYPE, content_type)
            .header(CONNECTION, "close")
            .body(body.to_vec())
            .send()?;
        read_body(url, response)
    }
}
