use crate::services::RetryPolicy;
use crate::services::firmware_sync::parse_schedule;
use anyhow::ensure;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ProvisioningConfig {
    /// base url of the provisioning authority
    pub url: String,
    /// public address of this server, announced in firmware requests
    pub server_address: String,
    /// cron expression with seconds, evaluated in UTC
    pub update_schedule: String,
    /// per call deadline in seconds
    pub request_timeout: u64,
    pub notify_retries: u32,
    pub notify_backoff_ms: u64,
    #[serde(deserialize_with = "super::optional_path")]
    pub ca_cert: Option<PathBuf>,
    #[serde(deserialize_with = "super::optional_path")]
    pub tls_cert: Option<PathBuf>,
    #[serde(deserialize_with = "super::optional_path")]
    pub tls_key: Option<PathBuf>,
}

impl ProvisioningConfig {
    /// Host part of `server_address`, without scheme, port or path.
    pub fn server_addr(&self) -> String {
        let addr = self.server_address.trim();
        let addr = addr
            .strip_prefix("https://")
            .or_else(|| addr.strip_prefix("http://"))
            .unwrap_or(addr);
        let host = addr.split('/').next().unwrap_or_default();
        match host.rsplit_once(':') {
            // keep bare IPv6 literals intact
            Some((name, port)) if !name.ends_with(':') && port.parse::<u16>().is_ok() => {
                name.to_string()
            }
            _ => host.to_string(),
        }
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }

    pub fn notify_retry(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.notify_retries.saturating_add(1),
            base_delay: Duration::from_millis(self.notify_backoff_ms),
        }
    }

    pub(super) fn validate(&self) -> anyhow::Result<()> {
        ensure!(!self.url.trim().is_empty(), "provisioning.url is required");
        ensure!(
            self.request_timeout > 0,
            "provisioning.request_timeout must be positive"
        );
        ensure!(
            self.tls_cert.is_some() == self.tls_key.is_some(),
            "provisioning.tls_cert and provisioning.tls_key must be set together"
        );
        parse_schedule(&self.update_schedule)?;
        Ok(())
    }
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            server_address: String::new(),
            update_schedule: "0 */30 * * * *".to_string(),
            request_timeout: 10,
            notify_retries: 3,
            notify_backoff_ms: 500,
            ca_cert: None,
            tls_cert: None,
            tls_key: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_address(address: &str) -> ProvisioningConfig {
        ProvisioningConfig {
            server_address: address.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_server_addr() {
        assert_eq!(
            with_address("https://supernode.example.net:8080").server_addr(),
            "supernode.example.net"
        );
        assert_eq!(
            with_address("http://supernode.example.net/").server_addr(),
            "supernode.example.net"
        );
        assert_eq!(with_address("10.0.0.8:8080").server_addr(), "10.0.0.8");
        assert_eq!(
            with_address("supernode.example.net").server_addr(),
            "supernode.example.net"
        );
        assert_eq!(with_address("[::1]:8080").server_addr(), "[::1]");
    }
}
