//! Scheduled refresh of the firmware catalog from the provisioning authority.

use crate::models::dtos::provisioning::FirmwareTargetRequestDto;
use crate::models::{GatewayFirmware, HexParseError, Md5Sum};
use crate::services::provisioning::{ProvisioningAuthority, ProvisioningError};
use crate::store::{GatewayStore, StoreError, StoreResult};
use anyhow::Context;
use chrono::Utc;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// How this server is reachable, forwarded so the authority can build links.
#[derive(Debug, Clone)]
pub struct ServerEndpoint {
    pub server_addr: String,
    pub legacy_port: u16,
    pub current_port: u16,
}

#[derive(Debug, Default, Clone, Copy, Eq, PartialEq)]
pub struct SyncReport {
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
}

#[derive(thiserror::Error, Debug)]
enum SyncError {
    #[error(transparent)]
    Provisioning(#[from] ProvisioningError),
    #[error("authority returned an invalid firmware hash: {0}")]
    InvalidHash(#[from] HexParseError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

enum ModelOutcome {
    Updated,
    Unchanged,
    Vanished,
}

pub struct FirmwareSync {
    store: Arc<dyn GatewayStore>,
    authority: Arc<dyn ProvisioningAuthority>,
    endpoint: ServerEndpoint,
    call_timeout: Duration,
}

impl FirmwareSync {
    pub fn new(
        store: Arc<dyn GatewayStore>,
        authority: Arc<dyn ProvisioningAuthority>,
        endpoint: ServerEndpoint,
        call_timeout: Duration,
    ) -> Self {
        Self {
            store,
            authority,
            endpoint,
            call_timeout,
        }
    }

    /// Walks every catalog model in order. A model that fails is logged and
    /// counted, the run goes on with the next one.
    pub async fn run_once(&self) -> StoreResult<SyncReport> {
        let catalog = self.store.list_firmware().await?;
        let mut report = SyncReport::default();
        for entry in &catalog {
            match self.sync_model(entry).await {
                Ok(ModelOutcome::Updated) => report.updated += 1,
                Ok(ModelOutcome::Unchanged) => report.skipped += 1,
                Ok(ModelOutcome::Vanished) => {
                    tracing::warn!(model = %entry.model, "catalog row disappeared during sync");
                    report.skipped += 1;
                }
                Err(err) => {
                    tracing::warn!(model = %entry.model, "failed to sync firmware: {}", err);
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }

    async fn sync_model(&self, current: &GatewayFirmware) -> Result<ModelOutcome, SyncError> {
        let request = FirmwareTargetRequestDto {
            model: current.model.clone(),
            server_addr: self.endpoint.server_addr.clone(),
            legacy_port: self.endpoint.legacy_port,
            current_port: self.endpoint.current_port,
        };
        let response = tokio::time::timeout(
            self.call_timeout,
            self.authority.get_firmware_target(&request),
        )
        .await
        .map_err(|_| ProvisioningError::Timeout)??;
        let target = GatewayFirmware {
            model: current.model.clone(),
            firmware_hash: response.firmware_hash.parse()?,
            resource_link: response.resource_link,
        };
        if &target == current {
            return Ok(ModelOutcome::Unchanged);
        }
        if self.store.update_firmware(&target).await? == 0 {
            return Ok(ModelOutcome::Vanished);
        }
        tracing::debug!(
            model = %target.model,
            hash = %target.firmware_hash,
            "firmware target updated"
        );
        Ok(ModelOutcome::Updated)
    }
}

pub fn parse_schedule(expression: &str) -> anyhow::Result<cron::Schedule> {
    cron::Schedule::from_str(expression)
        .with_context(|| format!("Invalid firmware update schedule '{expression}'"))
}

pub struct FirmwareSyncScheduler {
    schedule: cron::Schedule,
    job: FirmwareSync,
}

impl FirmwareSyncScheduler {
    pub fn new(expression: &str, job: FirmwareSync) -> anyhow::Result<Self> {
        Ok(Self {
            schedule: parse_schedule(expression)?,
            job,
        })
    }

    /// Runs until `shutdown` fires. A run in progress is finished first.
    pub async fn run(self, shutdown: CancellationToken) -> anyhow::Result<()> {
        loop {
            let Some(next) = self.schedule.upcoming(Utc).next() else {
                tracing::warn!("firmware update schedule has no upcoming run");
                shutdown.cancelled().await;
                return Ok(());
            };
            let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
            tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                _ = tokio::time::sleep(wait) => {}
            }
            let started = tokio::time::Instant::now();
            match self.job.run_once().await {
                Ok(report) => tracing::info!(
                    updated = report.updated,
                    skipped = report.skipped,
                    failed = report.failed,
                    "firmware sync finished in {}ms",
                    started.elapsed().as_millis()
                ),
                Err(err) => tracing::error!("firmware sync aborted: {}", err),
            }
        }
    }
}
