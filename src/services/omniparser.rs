use std::time::Duration;

use base64::Engine;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use crate::models::instance::ProbeOutcome;
use crate::models::job::ErrorKind;
use crate::models::parse::{ParseOptions, ParseResult, UiElement};

/// HTTP client for OmniParser instances.
///
/// Instances expose `GET /probe/` for liveness and `POST /parse/` for
/// screenshot parsing. One client (and its connection pool) is shared by
/// every instance.
#[derive(Clone)]
pub struct OmniparserClient {
    http: Client,
}

#[derive(Serialize)]
struct ParseRequest<'a> {
    base64_image: String,
    #[serde(flatten)]
    options: &'a ParseOptions,
}

#[derive(Deserialize)]
struct ParseResponse {
    #[serde(default)]
    parsed_content_list: Vec<RawElement>,
    som_image_base64: Option<String>,
    latency: Option<f64>,
}

#[derive(Deserialize)]
struct RawElement {
    bbox: Option<Vec<f64>>,
    #[serde(rename = "type")]
    kind: Option<String>,
    content: Option<String>,
    interactivity: Option<bool>,
    confidence: Option<f64>,
}

impl OmniparserClient {
    pub fn new() -> Result<Self, reqwest::Error> {
        let http = Client::builder()
            .user_agent(concat!("omniparser-queue/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { http })
    }

    /// Probe an instance's liveness endpoint within `timeout`.
    pub async fn probe(&self, base_url: &str, timeout: Duration) -> ProbeOutcome {
        let url = format!("{}/probe/", base_url.trim_end_matches('/'));
        let response = match self.http.get(&url).timeout(timeout).send().await {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                return ProbeOutcome::Unreachable(format!(
                    "probe timed out after {}ms",
                    timeout.as_millis()
                ))
            }
            Err(e) => return ProbeOutcome::Unreachable(e.to_string()),
        };

        let status = response.status();
        if status.is_success() {
            return ProbeOutcome::Reachable;
        }

        if status.is_server_error() {
            if let Ok(body) = response.json::<serde_json::Value>().await {
                let detail = body
                    .get("detail")
                    .or_else(|| body.get("error"))
                    .map(|v| v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string()))
                    .unwrap_or_else(|| body.to_string());
                return ProbeOutcome::ApplicationError(format!("HTTP {}: {}", status.as_u16(), detail));
            }
        }
        ProbeOutcome::Unreachable(format!("HTTP {}", status.as_u16()))
    }

    /// Send a screenshot to an instance and extract the detected UI elements.
    pub async fn parse(
        &self,
        base_url: &str,
        image_bytes: &[u8],
        options: &ParseOptions,
        timeout: Duration,
    ) -> Result<ParseResult, ExecutionError> {
        let url = format!("{}/parse/", base_url.trim_end_matches('/'));
        let request_body = ParseRequest {
            base64_image: base64::engine::general_purpose::STANDARD.encode(image_bytes),
            options,
        };

        let response = self
            .http
            .post(&url)
            .timeout(timeout)
            .json(&request_body)
            .send()
            .await
            .map_err(ExecutionError::from)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ExecutionError::from_status(status, &body));
        }

        let parsed: ParseResponse = response.json().await.map_err(ExecutionError::from)?;
        Ok(ParseResult {
            elements: collect_elements(parsed.parsed_content_list),
            annotated_image: parsed.som_image_base64,
            instance_latency: parsed.latency,
        })
    }
}

fn collect_elements(items: Vec<RawElement>) -> Vec<UiElement> {
    let elements: Vec<UiElement> = items
        .into_iter()
        .filter_map(|item| {
            Some(UiElement {
                bbox: item.bbox?,
                kind: item.kind.unwrap_or_else(|| "unknown".to_string()),
                content: item.content.unwrap_or_default(),
                interactive: item.interactivity.unwrap_or(false),
                confidence: item.confidence.unwrap_or(1.0),
            })
        })
        .collect();
    tracing::debug!(elements = elements.len(), "Parsed UI elements");
    elements
}

/// Failure of one parse call, classified for the retry rule.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecutionError {
    /// Network error, timeout or a server-side failure; worth another attempt.
    #[error("Transient execution error: {0}")]
    Transient(String),

    /// Rejected payload or unreadable response; retrying will not help.
    #[error("Permanent execution error: {0}")]
    Permanent(String),
}

impl ExecutionError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ExecutionError::Transient(_))
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ExecutionError::Transient(_) => ErrorKind::Transient,
            ExecutionError::Permanent(_) => ErrorKind::Permanent,
        }
    }

    pub fn detail(&self) -> &str {
        match self {
            ExecutionError::Transient(detail) | ExecutionError::Permanent(detail) => detail,
        }
    }

    pub fn from_status(status: StatusCode, body: &str) -> Self {
        let mut detail = format!("HTTP {}", status.as_u16());
        if !body.is_empty() {
            let snippet: String = body.chars().take(200).collect();
            detail = format!("{detail}: {snippet}");
        }
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            ExecutionError::Transient(detail)
        } else {
            ExecutionError::Permanent(detail)
        }
    }
}

impl From<reqwest::Error> for ExecutionError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ExecutionError::Permanent(format!("unreadable response: {e}"))
        } else if let Some(status) = e.status() {
            ExecutionError::from_status(status, "")
        } else if e.is_builder() {
            ExecutionError::Permanent(e.to_string())
        } else {
            ExecutionError::Transient(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(ExecutionError::from_status(StatusCode::SERVICE_UNAVAILABLE, "").is_transient());
        assert!(ExecutionError::from_status(StatusCode::BAD_GATEWAY, "").is_transient());
        assert!(ExecutionError::from_status(StatusCode::TOO_MANY_REQUESTS, "").is_transient());
        assert!(!ExecutionError::from_status(StatusCode::BAD_REQUEST, "bad image").is_transient());
        assert!(!ExecutionError::from_status(StatusCode::UNPROCESSABLE_ENTITY, "").is_transient());
    }

    #[test]
    fn test_status_detail_is_truncated() {
        let body = "x".repeat(1000);
        let err = ExecutionError::from_status(StatusCode::BAD_REQUEST, &body);
        assert!(err.detail().len() < 250);
        assert_eq!(err.kind(), ErrorKind::Permanent);
    }

    #[test]
    fn test_elements_without_bbox_are_dropped() {
        let raw: ParseResponse = serde_json::from_value(serde_json::json!({
            "parsed_content_list": [
                {"bbox": [0.1, 0.2, 0.3, 0.4], "type": "icon", "content": "Settings", "interactivity": true},
                {"type": "text", "content": "no box"},
                {"bbox": [0.5, 0.5, 0.6, 0.6]}
            ],
            "som_image_base64": "aGk=",
            "latency": 1.5
        }))
        .unwrap();

        let elements = collect_elements(raw.parsed_content_list);
        assert_eq!(elements.len(), 2);
        assert_eq!(elements[0].kind, "icon");
        assert!(elements[0].interactive);
        assert_eq!(elements[1].kind, "unknown");
        assert_eq!(elements[1].content, "");
        assert_eq!(elements[1].confidence, 1.0);
        assert_eq!(raw.som_image_base64.as_deref(), Some("aGk="));
    }

    #[test]
    fn test_request_body_flattens_options() {
        let options = ParseOptions {
            use_paddleocr: Some(true),
            box_threshold: Some(0.05),
            ..Default::default()
        };
        let body = serde_json::to_value(ParseRequest {
            base64_image: "abc".to_string(),
            options: &options,
        })
        .unwrap();
        assert_eq!(body["base64_image"], "abc");
        assert_eq!(body["use_paddleocr"], true);
        assert_eq!(body["box_threshold"], 0.05);
        assert!(body.get("text_threshold").is_none());
    }
}
