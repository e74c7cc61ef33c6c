use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method};
use tracing::{debug, instrument, warn};

use super::{HttpMethod, HttpRequest, HttpResponse, HttpTransport};
use crate::error::{EngineError, EngineResult};

/// Transport that performs real network calls through `reqwest`
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// Create a transport with the given connect timeout
    pub fn new(connect_timeout: Duration) -> EngineResult<Self> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| EngineError::Transport(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

fn to_reqwest_method(method: HttpMethod) -> Method {
    match method {
        HttpMethod::Get => Method::GET,
        HttpMethod::Post => Method::POST,
        HttpMethod::Put => Method::PUT,
        HttpMethod::Delete => Method::DELETE,
    }
}

fn describe(err: &reqwest::Error, timeout: Duration) -> String {
    if err.is_timeout() {
        format!("Request timed out after {}s", timeout.as_secs())
    } else if err.is_connect() {
        format!("Connection failed: {}", err)
    } else {
        format!("Request failed: {}", err)
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    #[instrument(skip(self, request), fields(method = %request.method, url = %request.url))]
    async fn send(&self, request: HttpRequest) -> EngineResult<HttpResponse> {
        let timeout = request.timeout;
        let mut builder = self
            .client
            .request(to_reqwest_method(request.method), request.url)
            .timeout(timeout);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(|e| {
            warn!("HTTP exchange failed: {}", e);
            EngineError::Transport(describe(&e, timeout))
        })?;

        let status = response.status().as_u16();
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
        let body = response
            .text()
            .await
            .map_err(|e| EngineError::Transport(describe(&e, timeout)))?;

        debug!(status, "HTTP exchange completed");
        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}
