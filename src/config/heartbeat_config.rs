use anyhow::ensure;
use serde::Deserialize;

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct HeartbeatConfig {
    /// seconds without heartbeat after which the online streak restarts
    pub offline_limit: i64,
    /// models starting with one of these are reconciled, others only answered
    pub managed_model_prefixes: Vec<String>,
}

impl HeartbeatConfig {
    pub(super) fn validate(&self) -> anyhow::Result<()> {
        ensure!(
            self.offline_limit > 0,
            "heartbeat.offline_limit must be positive, got {}",
            self.offline_limit
        );
        Ok(())
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            offline_limit: 600,
            managed_model_prefixes: vec!["MX19".to_string()],
        }
    }
}
