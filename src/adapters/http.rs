//! reqwest client for the national NFS-e API (Sefin emission, ADN reception).

use crate::domain::api::{BatchReceptionRequest, BatchReceptionResponse, DpsEmissionRequest, EmissionResponse};
use crate::domain::model::AccessKey;
use crate::domain::ports::DfeTransport;
use crate::utils::error::{EmissorError, Result};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

/// Exponential backoff for network-level failures. HTTP statuses are never
/// retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Wait before the attempt following failed attempt `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct NfseApiClient {
    client: Client,
    base_url: String,
    retry: RetryPolicy,
}

impl NfseApiClient {
    /// `identity_pem` is certificate + key in PEM; `None` disables mutual TLS.
    pub fn new(base_url: &str, timeout: Duration, identity_pem: Option<&[u8]>, retry: RetryPolicy) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let mut builder = Client::builder().timeout(timeout).default_headers(headers);
        if let Some(pem) = identity_pem {
            builder = builder.identity(reqwest::Identity::from_pem(pem)?);
        }

        Ok(Self {
            client: builder.build()?,
            base_url: base_url.trim_end_matches('/').to_string(),
            retry,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn health_check(&self) -> bool {
        match self
            .client
            .get(self.url("/health"))
            .timeout(HEALTH_TIMEOUT)
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::debug!("Verificação de disponibilidade falhou: {}", e);
                false
            }
        }
    }

    /// Synchronous emission of one DPS (`POST /SefinNacional/nfse`).
    pub async fn emit_dps(&self, payload: &str) -> Result<EmissionResponse> {
        let body = DpsEmissionRequest {
            dps_xml_gzip_b64: payload.to_string(),
        };
        let url = self.url("/SefinNacional/nfse");
        let (status, text) = self
            .send_with_retry("emit_dps", || self.client.post(&url).json(&body))
            .await?;
        read_json(status, text)
    }

    /// Bulk reception (`POST /adn/DFe`); entries come back in submission order.
    pub async fn submit_batch(&self, payloads: &[String]) -> Result<BatchReceptionResponse> {
        let body = BatchReceptionRequest {
            lote_xml_gzip_b64: payloads.to_vec(),
        };
        let url = self.url("/adn/DFe");
        let (status, text) = self
            .send_with_retry("submit_batch", || self.client.post(&url).json(&body))
            .await?;
        read_json(status, text)
    }

    pub async fn query_nfse(&self, key: &AccessKey) -> Result<serde_json::Value> {
        let url = self.url(&format!("/SefinNacional/nfse/{}", key));
        let (status, text) = self
            .send_with_retry("query_nfse", || self.client.get(&url))
            .await?;
        read_json(status, text)
    }

    /// One attempt is the full exchange: a connection lost while the body is
    /// still arriving counts the same as one lost before the headers.
    async fn send_with_retry<F>(&self, operation: &str, request: F) -> Result<(StatusCode, String)>
    where
        F: Fn() -> RequestBuilder,
    {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            tracing::debug!("🌐 {} tentativa {}/{}", operation, attempt, max_attempts);
            let err = match exchange(request()).await {
                Ok(reply) => return Ok(reply),
                Err(e) => EmissorError::from(e),
            };
            if !err.is_retryable() {
                return Err(err);
            }
            if attempt >= max_attempts {
                tracing::error!("❌ {} falhou após {} tentativas: {}", operation, attempt, err);
                return Err(EmissorError::TransportError {
                    attempts: attempt,
                    message: err.to_string(),
                });
            }
            let delay = self.retry.delay_for(attempt);
            tracing::warn!(
                "🔄 {} tentativa {}/{} falhou ({}), nova tentativa em {:?}",
                operation,
                attempt,
                max_attempts,
                err,
                delay
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

async fn exchange(request: RequestBuilder) -> reqwest::Result<(StatusCode, String)> {
    let response = request.send().await?;
    let status = response.status();
    let body = response.text().await?;
    Ok((status, body))
}

fn read_json<T: DeserializeOwned>(status: StatusCode, body: String) -> Result<T> {
    tracing::debug!("Resposta da API: HTTP {}", status);
    if !status.is_success() {
        return Err(EmissorError::RemoteRejection {
            status: status.as_u16(),
            body,
        });
    }
    Ok(serde_json::from_str(&body)?)
}

#[async_trait::async_trait]
impl DfeTransport for NfseApiClient {
    async fn submit_batch(&self, payloads: &[String]) -> Result<BatchReceptionResponse> {
        NfseApiClient::submit_batch(self, payloads).await
    }

    async fn emit_dps(&self, payload: &str) -> Result<EmissionResponse> {
        NfseApiClient::emit_dps(self, payload).await
    }

    async fn health_check(&self) -> bool {
        NfseApiClient::health_check(self).await
    }
}
