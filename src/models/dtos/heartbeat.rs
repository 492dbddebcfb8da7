use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatRequestDto {
    /// EUI-64 as 16 hex digits
    pub gateway_mac: String,
    pub model: String,
    /// hex encoded MD5 of the configuration the device currently runs
    pub config_hash: String,
    #[serde(default)]
    pub os_version: String,
    #[serde(default)]
    pub statistics: String,
}

/// Correction instructions. Both fields absent means the device is converged.
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatResponseDto {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_firmware_link: Option<String>,
}

#[cfg(test)]
impl HeartbeatResponseDto {
    pub fn is_converged(&self) -> bool {
        self.config.is_none() && self.new_firmware_link.is_none()
    }
}
