use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FirmwareTargetRequestDto {
    pub model: String,
    /// public address of this server, without scheme
    pub server_addr: String,
    pub legacy_port: u16,
    pub current_port: u16,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FirmwareTargetResponseDto {
    pub resource_link: String,
    /// hex encoded MD5 of the image
    pub firmware_hash: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OsVersionNoticeDto {
    pub mac: String,
    pub sn: String,
    pub os_version: String,
}
