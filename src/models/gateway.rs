use crate::models::{Eui64, Md5Sum};

/// Whether the server actively reconciles a gateway.
///
/// Resolved once, at registration or on the first heartbeat of a row created
/// without one, and stored with the row, so renaming a model family later
/// never reclassifies existing devices.
#[derive(Debug, Copy, Clone, Eq, PartialEq, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
pub enum DeviceClass {
    Managed,
    Unmanaged,
}

impl DeviceClass {
    pub fn resolve(model: &str, managed_prefixes: &[String]) -> Self {
        if managed_prefixes
            .iter()
            .any(|prefix| !prefix.is_empty() && model.starts_with(prefix.as_str()))
        {
            DeviceClass::Managed
        } else {
            DeviceClass::Unmanaged
        }
    }
}

/// Start of the current online streak and time of the latest heartbeat,
/// both in unix seconds. `0` means unknown.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub struct Liveness {
    pub first_heartbeat: i64,
    pub last_heartbeat: i64,
}

/// Attributes reported by a gateway plus the firmware hash last pushed to it.
#[derive(Debug, Clone, Eq, PartialEq, Default)]
pub struct GatewayAttributes {
    pub firmware_hash: Md5Sum,
    pub os_version: String,
    pub statistics: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Gateway {
    pub mac: Eui64,
    pub model: String,
    pub serial_number: String,
    /// `None` for rows written by a registration flow that does not classify
    pub device_class: Option<DeviceClass>,
    /// desired configuration, delivered verbatim when the device drifts
    pub config: String,
    pub first_heartbeat: i64,
    pub last_heartbeat: i64,
    pub firmware_hash: Md5Sum,
    pub os_version: String,
    pub statistics: String,
    pub auto_update_firmware: bool,
}

impl Gateway {
    #[inline]
    pub fn liveness(&self) -> Liveness {
        Liveness {
            first_heartbeat: self.first_heartbeat,
            last_heartbeat: self.last_heartbeat,
        }
    }
    pub fn attributes(&self) -> GatewayAttributes {
        GatewayAttributes {
            firmware_hash: self.firmware_hash,
            os_version: self.os_version.clone(),
            statistics: self.statistics.clone(),
        }
    }
}

/// Registration input, see `fleetbeat register`.
#[derive(Debug, Clone)]
pub struct NewGateway {
    pub mac: Eui64,
    pub model: String,
    pub serial_number: String,
    pub config: String,
    pub auto_update_firmware: bool,
}
