//! Client side of the external provisioning authority.

use crate::config::ProvisioningConfig;
use crate::models::dtos::provisioning::{
    FirmwareTargetRequestDto, FirmwareTargetResponseDto, OsVersionNoticeDto,
};
use anyhow::Context;
use async_trait::async_trait;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;

#[derive(thiserror::Error, Debug)]
pub enum ProvisioningError {
    #[error("provisioning authority unavailable: {0}")]
    Unavailable(#[source] reqwest::Error),
    #[error("provisioning authority did not answer within the deadline")]
    Timeout,
    #[error("provisioning authority rejected the request with status {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("unexpected response from provisioning authority: {0}")]
    Decode(String),
}

impl ProvisioningError {
    /// Client side rejections will not succeed on a second attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProvisioningError::Unavailable(_) | ProvisioningError::Timeout => true,
            ProvisioningError::Rejected { status, .. } => *status >= 500,
            ProvisioningError::Decode(_) => false,
        }
    }
}

impl From<reqwest::Error> for ProvisioningError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProvisioningError::Timeout
        } else if err.is_decode() {
            ProvisioningError::Decode(err.to_string())
        } else {
            ProvisioningError::Unavailable(err)
        }
    }
}

#[async_trait]
pub trait ProvisioningAuthority: Send + Sync {
    async fn get_firmware_target(
        &self,
        request: &FirmwareTargetRequestDto,
    ) -> Result<FirmwareTargetResponseDto, ProvisioningError>;

    async fn notify_os_version(&self, notice: &OsVersionNoticeDto) -> Result<(), ProvisioningError>;
}

pub struct HttpProvisioningClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpProvisioningClient {
    pub fn new(config: &ProvisioningConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .use_rustls_tls()
            .timeout(Duration::from_secs(config.request_timeout))
            .connect_timeout(Duration::from_secs(config.request_timeout));
        if let Some(ca_cert) = &config.ca_cert {
            let pem = std::fs::read(ca_cert)
                .with_context(|| format!("Failed to read provisioning CA '{}'", ca_cert.display()))?;
            builder = builder.add_root_certificate(reqwest::Certificate::from_pem(&pem)?);
        }
        match (&config.tls_cert, &config.tls_key) {
            (Some(cert), Some(key)) => {
                let mut pem = std::fs::read(key).with_context(|| {
                    format!("Failed to read provisioning client key '{}'", key.display())
                })?;
                pem.push(b'\n');
                pem.extend(std::fs::read(cert).with_context(|| {
                    format!("Failed to read provisioning client cert '{}'", cert.display())
                })?);
                builder = builder.identity(reqwest::Identity::from_pem(&pem)?);
            }
            (None, None) => (),
            _ => anyhow::bail!("Provisioning client identity needs both tls_cert and tls_key"),
        }
        Ok(Self {
            client: builder.build()?,
            base_url: config.url.trim_end_matches('/').to_string(),
        })
    }

    async fn post<B: serde::Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<reqwest::Response, ProvisioningError> {
        let response = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .json(body)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProvisioningError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl ProvisioningAuthority for HttpProvisioningClient {
    async fn get_firmware_target(
        &self,
        request: &FirmwareTargetRequestDto,
    ) -> Result<FirmwareTargetResponseDto, ProvisioningError> {
        let response = self.post("/api/v1/firmware/target", request).await?;
        Ok(response.json::<FirmwareTargetResponseDto>().await?)
    }

    async fn notify_os_version(&self, notice: &OsVersionNoticeDto) -> Result<(), ProvisioningError> {
        self.post("/api/v1/gateways/os-version", notice).await?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// total number of calls, at least one
    pub attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Exponential backoff with up to one extra `base_delay` of jitter.
    fn delay(&self, retry: u32) -> Duration {
        let base = self.base_delay.as_millis() as u64;
        let exp = base.saturating_mul(1u64 << retry.min(16));
        let jitter = if base == 0 {
            0
        } else {
            rand::rng().random_range(0..base)
        };
        Duration::from_millis(exp.saturating_add(jitter))
    }
}

/// Delivers an OS version notice, retrying transient failures.
/// Returns the number of calls made on success.
pub async fn notify_with_retry(
    authority: Arc<dyn ProvisioningAuthority>,
    notice: OsVersionNoticeDto,
    policy: RetryPolicy,
) -> Result<u32, ProvisioningError> {
    let attempts = policy.attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match authority.notify_os_version(&notice).await {
            Ok(()) => return Ok(attempt),
            Err(err) if attempt < attempts && err.is_retryable() => {
                let delay = policy.delay(attempt - 1);
                tracing::debug!(
                    mac = %notice.mac,
                    attempt,
                    "os version notice failed, retrying in {}ms: {}",
                    delay.as_millis(),
                    err
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}
