//! HTTP implementation of the remote gateway.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::classifier::classify;
use crate::config::GatewayConfig;
use crate::metrics;
use crate::risk::RiskIndicator;

use super::{GatewayError, Operation, RemoteGateway, SubjectKey, TransactionUpdate};

/// Delay before transport retry number `retry` (0-based): `base * 2^retry`, capped.
pub fn transport_backoff(base_ms: u64, max_ms: u64, retry: u32) -> Duration {
    let factor = 1u64.checked_shl(retry).unwrap_or(u64::MAX);
    Duration::from_millis(base_ms.saturating_mul(factor).min(max_ms))
}

/// Gateway speaking the data-source service's JSON-over-HTTP protocol.
///
/// - Trigger: `POST {base_url}/{data_source}` with the subject parameters as a JSON object.
/// - Poll: `GET {base_url}/{data_source}?uid={uid}`.
/// - Artifacts: `GET {url}`.
///
/// The token travels in the configured header on every request.
pub struct HttpGateway {
    client: Client,
    config: GatewayConfig,
}

impl HttpGateway {
    pub fn new(config: GatewayConfig) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs as u64))
            .build()
            .map_err(|e| GatewayError::Setup(e.to_string()))?;

        Ok(Self { client, config })
    }

    fn base_url(&self) -> &str {
        self.config.base_url.trim_end_matches('/')
    }

    fn trigger_url(&self, subject: &SubjectKey) -> String {
        format!(
            "{}/{}",
            self.base_url(),
            subject.data_source.trim_matches('/')
        )
    }

    fn poll_url(&self, subject: &SubjectKey, remote_uid: &str) -> String {
        format!(
            "{}?uid={}",
            self.trigger_url(subject),
            urlencoding::encode(remote_uid)
        )
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request.header(self.config.token_header.as_str(), self.config.token.as_str())
    }

    /// Run `attempt` until it succeeds, fails permanently, or retries run out.
    async fn with_transport_retry<T, F, Fut>(
        &self,
        operation: Operation,
        mut attempt: F,
    ) -> Result<T, GatewayError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, GatewayError>>,
    {
        let mut retry = 0;
        loop {
            let started = Instant::now();
            let result = attempt().await;
            metrics::GATEWAY_REQUEST_DURATION
                .with_label_values(&[operation.as_str()])
                .observe(started.elapsed().as_secs_f64());

            match result {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && retry < self.config.max_transport_retries => {
                    let delay = transport_backoff(
                        self.config.transport_backoff_base_ms,
                        self.config.transport_backoff_max_ms,
                        retry,
                    );
                    warn!(
                        operation = operation.as_str(),
                        retry = retry + 1,
                        delay_ms = delay.as_millis() as u64,
                        "Transport failure, retrying: {}",
                        e
                    );
                    metrics::TRANSPORT_RETRIES
                        .with_label_values(&[operation.as_str()])
                        .inc();
                    tokio::time::sleep(delay).await;
                    retry += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn send_for_update(
        &self,
        request: RequestBuilder,
    ) -> Result<TransactionUpdate, GatewayError> {
        let response = request.send().await.map_err(map_send_error)?;
        let status = response.status();
        let body = response.text().await.map_err(map_send_error)?;

        // The service reports its own status codes in the body, whatever the HTTP status.
        match parse_update(&body) {
            Ok(update) => Ok(update),
            Err(parse_err) => {
                let snippet: String = body.chars().take(200).collect();
                if status.is_client_error() && status.as_u16() != 408 && status.as_u16() != 429
                {
                    Err(GatewayError::Rejected {
                        status: status.as_u16(),
                        body: snippet,
                    })
                } else if !status.is_success() {
                    Err(GatewayError::Http {
                        status: status.as_u16(),
                        body: snippet,
                    })
                } else {
                    Err(parse_err)
                }
            }
        }
    }
}

#[async_trait]
impl RemoteGateway for HttpGateway {
    fn name(&self) -> &str {
        "http"
    }

    async fn trigger(&self, subject: &SubjectKey) -> Result<TransactionUpdate, GatewayError> {
        let url = self.trigger_url(subject);
        debug!(data_source = %subject.data_source, "Triggering remote execution");

        self.with_transport_retry(Operation::Trigger, move || {
            let request = self.authorized(self.client.post(&url).json(&subject.params));
            self.send_for_update(request)
        })
        .await
    }

    async fn poll(
        &self,
        subject: &SubjectKey,
        remote_uid: &str,
    ) -> Result<TransactionUpdate, GatewayError> {
        let url = self.poll_url(subject, remote_uid);
        debug!(data_source = %subject.data_source, remote_uid, "Polling remote execution");

        self.with_transport_retry(Operation::Poll, move || {
            let request = self.authorized(self.client.get(&url));
            self.send_for_update(request)
        })
        .await
    }

    async fn fetch_artifact(&self, url: &str) -> Result<Vec<u8>, GatewayError> {
        self.with_transport_retry(Operation::ArtifactFetch, move || async move {
            let response = self
                .authorized(self.client.get(url))
                .send()
                .await
                .map_err(map_send_error)?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                let body: String = body.chars().take(200).collect();
                return Err(if status.is_client_error() {
                    GatewayError::Rejected {
                        status: status.as_u16(),
                        body,
                    }
                } else {
                    GatewayError::Http {
                        status: status.as_u16(),
                        body,
                    }
                });
            }

            let bytes = response.bytes().await.map_err(map_send_error)?;
            Ok(bytes.to_vec())
        })
        .await
    }
}

fn map_send_error(e: reqwest::Error) -> GatewayError {
    if e.is_timeout() {
        GatewayError::Timeout
    } else if e.is_connect() {
        GatewayError::ConnectionFailed(e.to_string())
    } else {
        GatewayError::Transport(e.to_string())
    }
}

/// Response body as sent by the service (PascalCase fields).
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireUpdate {
    code: i64,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    status_code: Option<String>,
    #[serde(default)]
    uid: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    date: Option<String>,
    #[serde(default, rename = "ElapsedTimeInMilliseconds")]
    elapsed_ms: Option<u64>,
    #[serde(default)]
    result: Option<serde_json::Value>,
    #[serde(default)]
    has_pdf: Option<bool>,
    #[serde(default)]
    pdf_url: Option<String>,
    #[serde(default)]
    original_files_url: Option<String>,
    #[serde(default)]
    risk_indicators: Option<Vec<WireIndicator>>,
    #[serde(default)]
    cost: Option<serde_json::Number>,
    #[serde(default)]
    balance: Option<serde_json::Number>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireIndicator {
    source: String,
    indicator: String,
}

fn parse_update(body: &str) -> Result<TransactionUpdate, GatewayError> {
    let wire: WireUpdate = serde_json::from_str(body)
        .map_err(|e| GatewayError::Malformed(format!("Failed to parse response: {}", e)))?;

    let outcome = classify(wire.code);
    Ok(TransactionUpdate {
        code: wire.code,
        status: wire
            .status
            .unwrap_or_else(|| outcome.pascal_name().to_string()),
        status_code: wire
            .status_code
            .unwrap_or_else(|| outcome.snake_name().to_string()),
        uid: wire.uid.filter(|u| !u.is_empty()),
        message: wire.message.unwrap_or_default(),
        timestamp: wire.date.unwrap_or_default(),
        elapsed_ms: wire.elapsed_ms.unwrap_or(0),
        result_payload: wire.result.filter(|r| !r.is_null()),
        has_pdf: wire.has_pdf.unwrap_or(false),
        pdf_url: wire.pdf_url.filter(|u| !u.is_empty()),
        original_files_url: wire.original_files_url.filter(|u| !u.is_empty()),
        risk_indicators: wire
            .risk_indicators
            .unwrap_or_default()
            .into_iter()
            .map(|i| RiskIndicator::new(i.source, i.indicator))
            .collect(),
        cost_credits: wire.cost,
        balance_credits: wire.balance,
    })
}
