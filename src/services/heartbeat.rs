use crate::models::dtos::heartbeat::{HeartbeatRequestDto, HeartbeatResponseDto};
use crate::models::dtos::provisioning::OsVersionNoticeDto;
use crate::models::{DeviceClass, Eui64, HexParseError, Md5Sum};
use crate::services::liveness::{self, LivenessTransition};
use crate::services::provisioning::{self, ProvisioningAuthority, RetryPolicy};
use crate::services::reconcile::{self, ReportedState};
use crate::store::{GatewayStore, StoreError};
use std::sync::Arc;

#[derive(thiserror::Error, Debug)]
pub enum HeartbeatError {
    #[error("invalid gateway identity '{value}': {source}")]
    InvalidIdentity {
        value: String,
        #[source]
        source: HexParseError,
    },
    #[error("invalid config hash: {0}")]
    InvalidArgument(#[source] HexParseError),
    #[error("gateway {0} not found")]
    NotFound(Eui64),
    #[error("gateway {mac} does not match the claimed model '{claimed}'")]
    AuthenticationFailure { mac: Eui64, claimed: String },
    #[error(transparent)]
    Internal(#[from] StoreError),
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// longest gap in seconds between two heartbeats of one online streak
    pub offline_limit: i64,
    pub notify_retry: RetryPolicy,
    /// used for gateways registered without a device class
    pub managed_model_prefixes: Vec<String>,
}

/// Per-heartbeat state machine: liveness bookkeeping plus the correction
/// payload for config and firmware drift.
pub struct HeartbeatEngine {
    store: Arc<dyn GatewayStore>,
    authority: Arc<dyn ProvisioningAuthority>,
    settings: EngineSettings,
}

impl HeartbeatEngine {
    pub fn new(
        store: Arc<dyn GatewayStore>,
        authority: Arc<dyn ProvisioningAuthority>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            store,
            authority,
            settings,
        }
    }

    pub async fn heartbeat(
        &self,
        request: &HeartbeatRequestDto,
    ) -> Result<HeartbeatResponseDto, HeartbeatError> {
        self.heartbeat_at(request, chrono::Utc::now().timestamp())
            .await
    }

    #[tracing::instrument(level = "debug", skip_all, fields(mac = %request.gateway_mac))]
    async fn heartbeat_at(
        &self,
        request: &HeartbeatRequestDto,
        now: i64,
    ) -> Result<HeartbeatResponseDto, HeartbeatError> {
        let mac: Eui64 = request.gateway_mac.parse().map_err(|source| {
            HeartbeatError::InvalidIdentity {
                value: request.gateway_mac.clone(),
                source,
            }
        })?;
        let gateway = self
            .store
            .get_gateway(&mac)
            .await?
            .ok_or(HeartbeatError::NotFound(mac))?;
        if gateway.model != request.model {
            tracing::warn!(
                stored = %gateway.model,
                claimed = %request.model,
                "heartbeat model does not match registration"
            );
            return Err(HeartbeatError::AuthenticationFailure {
                mac,
                claimed: request.model.clone(),
            });
        }
        let class = match gateway.device_class {
            Some(class) => class,
            None => {
                let class =
                    DeviceClass::resolve(&gateway.model, &self.settings.managed_model_prefixes);
                self.store
                    .classify_gateway(&mac, &gateway.model, class)
                    .await?;
                tracing::info!(class = ?class, model = %gateway.model, "classified gateway");
                class
            }
        };
        if class == DeviceClass::Unmanaged {
            return Ok(HeartbeatResponseDto::default());
        }
        let config_hash: Md5Sum = request
            .config_hash
            .parse()
            .map_err(HeartbeatError::InvalidArgument)?;

        let previous = gateway.liveness();
        let (next, transition) = liveness::advance(previous, now, self.settings.offline_limit);
        match transition {
            LivenessTransition::FirstSeen => tracing::info!("first heartbeat"),
            LivenessTransition::StreakReset { gap } => tracing::info!(
                gap,
                since = previous.first_heartbeat,
                "streak reset, gateway was offline"
            ),
            LivenessTransition::Continued => (),
        }
        if next != previous && !self.store.update_heartbeat(&mac, next).await? {
            tracing::debug!("a newer heartbeat was recorded concurrently");
        }

        let catalog = if gateway.auto_update_firmware {
            self.store.get_firmware(&gateway.model).await?
        } else {
            None
        };
        let reported = ReportedState {
            config_hash,
            os_version: &request.os_version,
            statistics: &request.statistics,
        };
        let outcome = reconcile::reconcile(&gateway, &reported, catalog.as_ref());
        if outcome.attributes_changed {
            self.store
                .update_attributes(&mac, &outcome.attributes)
                .await?;
        }
        if outcome.os_version_changed {
            self.notify_os_version(OsVersionNoticeDto {
                mac: mac.to_string(),
                sn: gateway.serial_number.clone(),
                os_version: request.os_version.clone(),
            });
        }
        if let Some(link) = &outcome.firmware_link {
            tracing::info!(link = %link, "pointing gateway at new firmware");
        }
        if outcome.config.is_some() {
            tracing::debug!("configuration drift, sending desired config");
        }
        Ok(HeartbeatResponseDto {
            config: outcome.config,
            new_firmware_link: outcome.firmware_link,
        })
    }

    /// Detached so the heartbeat answer never waits on the authority.
    fn notify_os_version(&self, notice: OsVersionNoticeDto) {
        let authority = self.authority.clone();
        let policy = self.settings.notify_retry;
        tokio::spawn(async move {
            let mac = notice.mac.clone();
            match provisioning::notify_with_retry(authority, notice, policy).await {
                Ok(attempts) => {
                    tracing::debug!(mac = %mac, attempts, "os version reported to authority")
                }
                Err(err) => {
                    tracing::warn!(mac = %mac, "failed to report os version: {}", err)
                }
            }
        });
    }
}
