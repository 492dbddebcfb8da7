use crate::models::{Gateway, GatewayAttributes, GatewayFirmware, Md5Sum};

/// What the device reported in its heartbeat, already validated.
#[derive(Debug, Clone)]
pub struct ReportedState<'a> {
    pub config_hash: Md5Sum,
    pub os_version: &'a str,
    pub statistics: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    /// desired configuration, set only when the device runs something else
    pub config: Option<String>,
    /// download link of a firmware the device has not been pointed at yet
    pub firmware_link: Option<String>,
    /// attributes to persist when `attributes_changed`
    pub attributes: GatewayAttributes,
    pub attributes_changed: bool,
    pub os_version_changed: bool,
}

/// Decides the correction payload for one heartbeat.
///
/// `catalog` is the firmware entry of the gateway's model; it is only
/// consulted when auto update is enabled for the device. The firmware hash is
/// compared against the hash the server last pushed, not against what the
/// device runs, since flashing happens asynchronously on the device.
pub fn reconcile(
    gateway: &Gateway,
    reported: &ReportedState<'_>,
    catalog: Option<&GatewayFirmware>,
) -> Reconciliation {
    let config = if Md5Sum::of(&gateway.config) != reported.config_hash {
        Some(gateway.config.clone())
    } else {
        None
    };

    let mut firmware_hash = gateway.firmware_hash;
    let mut firmware_link = None;
    if gateway.auto_update_firmware {
        if let Some(target) = catalog.filter(|it| !it.is_placeholder()) {
            if target.firmware_hash != gateway.firmware_hash {
                firmware_link = Some(target.resource_link.clone());
                firmware_hash = target.firmware_hash;
            }
        }
    }

    let attributes = GatewayAttributes {
        firmware_hash,
        os_version: reported.os_version.to_string(),
        statistics: reported.statistics.to_string(),
    };
    let attributes_changed = attributes.firmware_hash != gateway.firmware_hash
        || attributes.os_version != gateway.os_version
        || attributes.statistics != gateway.statistics;
    let os_version_changed = attributes.os_version != gateway.os_version;

    Reconciliation {
        config,
        firmware_link,
        attributes,
        attributes_changed,
        os_version_changed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DeviceClass;

    const CONFIG: &str = "{\"region\":\"EU868\"}";

    fn gateway() -> Gateway {
        Gateway {
            mac: "0102030405060708".parse().unwrap(),
            model: "MX1903".to_string(),
            serial_number: "M2XABCDEFGH".to_string(),
            device_class: Some(DeviceClass::Managed),
            config: CONFIG.to_string(),
            first_heartbeat: 1000,
            last_heartbeat: 1000,
            firmware_hash: Md5Sum::of("image-v1"),
            os_version: "5.0.0".to_string(),
            statistics: "rx=1".to_string(),
            auto_update_firmware: true,
        }
    }

    fn converged_report(gateway: &Gateway) -> ReportedState<'_> {
        ReportedState {
            config_hash: Md5Sum::of(&gateway.config),
            os_version: &gateway.os_version,
            statistics: &gateway.statistics,
        }
    }

    fn catalog(image: &str) -> GatewayFirmware {
        GatewayFirmware {
            model: "MX1903".to_string(),
            resource_link: format!("https://fw.example.net/{image}.bin"),
            firmware_hash: Md5Sum::of(image),
        }
    }

    #[test]
    fn test_converged_device_needs_nothing() {
        let gateway = gateway();
        let result = reconcile(&gateway, &converged_report(&gateway), Some(&catalog("image-v1")));
        assert_eq!(result.config, None);
        assert_eq!(result.firmware_link, None);
        assert!(!result.attributes_changed);
        assert!(!result.os_version_changed);
        assert_eq!(result.attributes, gateway.attributes());
    }

    #[test]
    fn test_config_drift_returns_desired_config() {
        let gateway = gateway();
        let report = ReportedState {
            config_hash: Md5Sum::of("something else"),
            ..converged_report(&gateway)
        };
        let result = reconcile(&gateway, &report, None);
        assert_eq!(result.config.as_deref(), Some(CONFIG));
        assert!(!result.attributes_changed);
    }

    #[test]
    fn test_new_firmware_is_pushed_once() {
        let mut gateway = gateway();
        let target = catalog("image-v2");
        let result = reconcile(&gateway, &converged_report(&gateway), Some(&target));
        assert_eq!(result.firmware_link, Some(target.resource_link.clone()));
        assert_eq!(result.attributes.firmware_hash, target.firmware_hash);
        assert!(result.attributes_changed);
        assert!(!result.os_version_changed);

        // once the target hash is persisted the link is not handed out again
        gateway.firmware_hash = result.attributes.firmware_hash;
        let result = reconcile(&gateway, &converged_report(&gateway), Some(&target));
        assert_eq!(result.firmware_link, None);
        assert!(!result.attributes_changed);
    }

    #[test]
    fn test_auto_update_disabled_ignores_catalog() {
        let mut gateway = gateway();
        gateway.auto_update_firmware = false;
        let result = reconcile(&gateway, &converged_report(&gateway), Some(&catalog("image-v2")));
        assert_eq!(result.firmware_link, None);
        assert_eq!(result.attributes.firmware_hash, gateway.firmware_hash);
    }

    #[test]
    fn test_missing_or_placeholder_catalog_means_no_update() {
        let gateway = gateway();
        let result = reconcile(&gateway, &converged_report(&gateway), None);
        assert_eq!(result.firmware_link, None);
        let placeholder = GatewayFirmware::placeholder("MX1903");
        let result = reconcile(&gateway, &converged_report(&gateway), Some(&placeholder));
        assert_eq!(result.firmware_link, None);
        assert!(!result.attributes_changed);
    }

    #[test]
    fn test_os_version_and_statistics_changes() {
        let gateway = gateway();
        let report = ReportedState {
            os_version: "5.1.0",
            ..converged_report(&gateway)
        };
        let result = reconcile(&gateway, &report, None);
        assert!(result.attributes_changed);
        assert!(result.os_version_changed);
        assert_eq!(result.attributes.os_version, "5.1.0");

        let report = ReportedState {
            statistics: "rx=2",
            ..converged_report(&gateway)
        };
        let result = reconcile(&gateway, &report, None);
        assert!(result.attributes_changed);
        assert!(!result.os_version_changed);
        assert_eq!(result.attributes.statistics, "rx=2");
    }
}
