use std::time::Duration;

use harrow_core::error::AppError;
use harrow_core::request::{ApiRequest, ApiResponse, HttpMethod};
use harrow_core::traits::Transport;
use reqwest::Client;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use url::Url;

const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

/// HTTP transport using reqwest.
///
/// Every response is handed back regardless of status; classifying 4xx/5xx
/// bodies is the executor's job. Only failures to get a response at all are
/// errors: connection failures map to [`AppError::Unreachable`], timeouts to
/// [`AppError::Timeout`], anything else to [`AppError::TransientNetwork`].
#[derive(Clone)]
pub struct ReqwestTransport {
    client: Client,
    timeout_secs: u64,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self, AppError> {
        Self::with_timeout(Duration::from_secs(30))
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, AppError> {
        Self::builder(timeout, DEFAULT_USER_AGENT)
    }

    pub fn builder(timeout: Duration, user_agent: &str) -> Result<Self, AppError> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::ConfigError(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            timeout_secs: timeout.as_secs(),
        })
    }

    fn map_send_error(&self, url: &str, e: reqwest::Error) -> AppError {
        if e.is_timeout() {
            AppError::Timeout(self.timeout_secs)
        } else if e.is_connect() {
            AppError::Unreachable(format!("{url}: {e}"))
        } else {
            AppError::TransientNetwork(format!("{url}: {e}"))
        }
    }
}

impl Transport for ReqwestTransport {
    async fn execute(&self, request: &ApiRequest) -> Result<ApiResponse, AppError> {
        let headers = header_map(&request.headers)?;

        let builder = match request.method {
            HttpMethod::Get => {
                let parsed = if request.params.is_empty() {
                    Url::parse(&request.url)
                } else {
                    Url::parse_with_params(&request.url, &request.params)
                };
                let url = parsed
                    .map_err(|e| AppError::ConfigError(format!("Invalid URL {}: {e}", request.url)))?;
                self.client.get(url)
            }
            HttpMethod::Post => {
                let body = match &request.body {
                    Some(body) => body.clone(),
                    None => params_object(&request.params),
                };
                self.client.post(&request.url).json(&body)
            }
        };

        tracing::debug!(method = %request.method, url = %request.url, "Sending request");

        let response = builder
            .headers(headers)
            .send()
            .await
            .map_err(|e| self.map_send_error(&request.url, e))?;

        let status = response.status().as_u16();
        let url = response.url().to_string();
        let body = response
            .text()
            .await
            .map_err(|e| self.map_send_error(&request.url, e))?;

        Ok(ApiResponse::new(status, url, body))
    }
}

fn header_map(headers: &[(String, String)]) -> Result<HeaderMap, AppError> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| AppError::ConfigError(format!("Invalid header name '{name}': {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| AppError::ConfigError(format!("Invalid value for header {name}: {e}")))?;
        map.append(name, value);
    }
    Ok(map)
}

fn params_object(params: &[(String, String)]) -> serde_json::Value {
    let map: serde_json::Map<String, serde_json::Value> = params
        .iter()
        .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
        .collect();
    serde_json::Value::Object(map)
}
