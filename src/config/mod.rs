use anyhow::{Context, anyhow};
use serde::{Deserialize, Deserializer};
use std::path::{Path, PathBuf};

mod database_config;
mod heartbeat_config;
mod listener_config;
mod logs_config;
mod provisioning_config;

pub use database_config::DatabaseConfig;
pub use heartbeat_config::HeartbeatConfig;
pub use listener_config::{ListenerConfig, ListenersConfig};
pub use logs_config::LogsConfig;
pub use provisioning_config::ProvisioningConfig;

#[derive(Deserialize, Debug, Clone)]
pub struct Config {
    pub logs: LogsConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
    pub listeners: ListenersConfig,
    pub provisioning: ProvisioningConfig,
    /// pid file location, defaults to the runtime directory of the user
    #[serde(default, deserialize_with = "optional_path")]
    pub pidfile: Option<PathBuf>,
}

impl Config {
    pub fn from_toml(content: &str, root: &Path) -> anyhow::Result<Self> {
        let mut config: Config = toml::from_str(content).with_context(|| {
            "Error: Failed to parse configuration file.\n\
            Please check the file syntax is valid TOML syntax"
        })?;
        config.resolve_paths(root);
        config.validate()?;
        Ok(config)
    }

    fn resolve_paths(&mut self, root: &Path) {
        let resolve = |path: &mut PathBuf| {
            if path.is_relative() {
                *path = root.join(&*path);
            }
        };
        if let Some(path) = self.logs.storage_path.as_mut() {
            resolve(path);
        }
        resolve(&mut self.database.path);
        for listener in [&mut self.listeners.current, &mut self.listeners.legacy] {
            listener.credential_paths_mut().for_each(resolve);
        }
        [
            &mut self.provisioning.ca_cert,
            &mut self.provisioning.tls_cert,
            &mut self.provisioning.tls_key,
        ]
        .into_iter()
        .flatten()
        .for_each(resolve);
        if let Some(path) = self.pidfile.as_mut() {
            resolve(path);
        }
    }

    fn validate(&self) -> anyhow::Result<()> {
        self.heartbeat.validate()?;
        self.provisioning.validate()?;
        Ok(())
    }
}

/// Empty strings in the file mean "not configured".
pub(crate) fn optional_path<'de, D>(deserializer: D) -> Result<Option<PathBuf>, D::Error>
where
    D: Deserializer<'de>,
{
    let s: Option<String> = Deserialize::deserialize(deserializer)?;
    Ok(s.filter(|it| !it.trim().is_empty()).map(PathBuf::from))
}

pub fn load(path: &Path) -> anyhow::Result<Config> {
    if !path.is_file() {
        return Err(anyhow!(
            "Error: Configuration file not found or invalid.\n\
            Please make sure that the configuration file exists and is a valid TOML file.\n\
            Expected file path: {:?}",
            path
        ));
    }
    let content = std::fs::read_to_string(path).with_context(|| {
        "Error: Failed to read configuration file.\n\
        Please check the file path and file permissions, and make sure the file is valid accessible"
    })?;
    let root = path
        .canonicalize()
        .ok()
        .and_then(|it| it.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."));
    Config::from_toml(&content, &root)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [logs]
        level = "debug"
        storage_path = "logs"

        [database]
        path = "data/fleetbeat.db"

        [heartbeat]
        offline_limit = 300

        [listeners.current]
        bind = "0.0.0.0:8006"
        ca_cert = "certs/ca.crt"
        tls_cert = "certs/server.crt"
        tls_key = "/etc/fleetbeat/server.key"

        [listeners.legacy]
        bind = "0.0.0.0:8005"
        ca_cert = ""
        tls_cert = ""
        tls_key = ""
        allow_unauthenticated = true

        [provisioning]
        url = "https://provision.example.net"
        server_address = "https://supernode.example.net:8080/"
        update_schedule = "0 */30 * * * *"
    "#;

    #[test]
    fn test_parse_sample() {
        let config = Config::from_toml(SAMPLE, Path::new("/srv/fleetbeat")).unwrap();
        assert_eq!(config.logs.level, tracing::Level::DEBUG);
        assert_eq!(
            config.logs.storage_path,
            Some(PathBuf::from("/srv/fleetbeat/logs"))
        );
        assert!(!config.logs.enable_file_logging);
        assert_eq!(
            config.database.path,
            PathBuf::from("/srv/fleetbeat/data/fleetbeat.db")
        );
        assert_eq!(config.heartbeat.offline_limit, 300);
        assert_eq!(config.heartbeat.managed_model_prefixes, vec!["MX19"]);

        let current = &config.listeners.current;
        assert_eq!(current.bind.port(), 8006);
        assert_eq!(
            current.ca_cert,
            Some(PathBuf::from("/srv/fleetbeat/certs/ca.crt"))
        );
        assert_eq!(
            current.tls_key,
            Some(PathBuf::from("/etc/fleetbeat/server.key"))
        );
        assert!(!current.allow_unauthenticated);

        let legacy = &config.listeners.legacy;
        assert_eq!(legacy.ca_cert, None);
        assert!(legacy.allow_unauthenticated);

        assert_eq!(config.provisioning.server_addr(), "supernode.example.net");
        assert_eq!(config.provisioning.request_timeout, 10);
        assert_eq!(config.provisioning.notify_retry().attempts, 4);
        assert_eq!(config.pidfile, None);
    }

    #[test]
    fn test_reject_invalid_values() {
        let bad_schedule = SAMPLE.replace("0 */30 * * * *", "every 30 minutes");
        assert!(Config::from_toml(&bad_schedule, Path::new("/")).is_err());

        let bad_limit = SAMPLE.replace("offline_limit = 300", "offline_limit = 0");
        assert!(Config::from_toml(&bad_limit, Path::new("/")).is_err());

        let bad_bind = SAMPLE.replace("0.0.0.0:8005", "localhost");
        assert!(Config::from_toml(&bad_bind, Path::new("/")).is_err());

        let bad_level = SAMPLE.replace("\"debug\"", "\"loud\"");
        assert!(Config::from_toml(&bad_level, Path::new("/")).is_err());
    }
}
