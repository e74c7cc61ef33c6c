//! Outbound HTTP collaborator used by HTTP tasks

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use crate::error::{EngineError, EngineResult};

/// `reqwest`-backed transport
#[cfg(feature = "http-client")]
pub mod client;

#[cfg(feature = "http-client")]
pub use client::ReqwestTransport;

/// HTTP methods an HTTP task may use
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    /// GET
    Get,
    /// POST
    Post,
    /// PUT
    Put,
    /// DELETE
    Delete,
}

impl FromStr for HttpMethod {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "DELETE" => Ok(HttpMethod::Delete),
            _ => Err(EngineError::Validation(format!(
                "Unsupported HTTP method: {}",
                s
            ))),
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
        };
        f.write_str(name)
    }
}

/// A fully validated outbound request
#[derive(Debug, Clone)]
pub struct HttpRequest {
    /// Method
    pub method: HttpMethod,
    /// Target URL
    pub url: Url,
    /// Request headers, in send order
    pub headers: Vec<(String, String)>,
    /// Optional body
    pub body: Option<String>,
    /// Whole-exchange timeout
    pub timeout: Duration,
}

impl HttpRequest {
    /// Build a request, validating the URL
    pub fn new(method: HttpMethod, url: &str, timeout: Duration) -> EngineResult<Self> {
        let url = Url::parse(url)
            .map_err(|e| EngineError::Validation(format!("Invalid URL '{}': {}", url, e)))?;
        Ok(Self {
            method,
            url,
            headers: Vec::new(),
            body: None,
            timeout,
        })
    }

    /// Add a header
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Set the body
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }
}

/// A response received from the remote end
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    /// Status code
    pub status: u16,
    /// Response headers; a name may repeat
    pub headers: Vec<(String, String)>,
    /// Body as text
    pub body: String,
}

/// Performs one HTTP exchange.
///
/// Any response, whatever its status code, is `Ok`. Only transport-level
/// failures (connection errors, timeouts) are [`EngineError::Transport`].
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Send a request and wait for the response
    async fn send(&self, request: HttpRequest) -> EngineResult<HttpResponse>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_parsing() {
        assert_eq!("post".parse::<HttpMethod>().unwrap(), HttpMethod::Post);
        let err = "PATCH".parse::<HttpMethod>().unwrap_err();
        assert_eq!(err.to_string(), "Validation error: Unsupported HTTP method: PATCH");
    }

    #[test]
    fn test_request_rejects_malformed_url() {
        let err = HttpRequest::new(HttpMethod::Get, "not a url", Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }
}
