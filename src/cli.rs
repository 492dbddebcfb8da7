//! Command line: the server itself plus the commands operators use to
//! register gateways and adjust their desired state.

use crate::config::Config;
use crate::models::{Eui64, Md5Sum, NewGateway};
use crate::store::SqliteGatewayStore;
use anyhow::{Context, bail};
use clap::{ArgAction, Parser, Subcommand};
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(name = "fleetbeat", version, about = "Gateway heartbeat and firmware reconciliation server")]
pub struct Cli {
    /// Path of the TOML configuration file
    #[arg(short, long, value_name = "FILE")]
    pub config: PathBuf,
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve both device listeners and run the firmware sync job (default)
    Serve,
    #[command(flatten)]
    Gateway(GatewayCommand),
}

#[derive(Subcommand, Debug)]
pub enum GatewayCommand {
    /// Register a gateway, classifying it from its model
    Register {
        /// EUI-64 as 16 hex digits
        #[arg(long)]
        mac: Eui64,
        #[arg(long)]
        model: String,
        #[arg(long, default_value = "")]
        serial: String,
        /// File holding the desired configuration
        #[arg(long, value_name = "FILE")]
        config_file: Option<PathBuf>,
        /// Push new firmware to the gateway when the catalog has one
        #[arg(long)]
        auto_update: bool,
    },
    /// Replace the desired configuration of a gateway
    SetConfig {
        #[arg(long)]
        mac: Eui64,
        #[arg(long, value_name = "FILE")]
        config_file: PathBuf,
    },
    /// Turn firmware push on or off for a gateway
    SetAutoUpdate {
        #[arg(long)]
        mac: Eui64,
        #[arg(long, action = ArgAction::Set)]
        enabled: bool,
    },
}

fn read_desired_config(path: &Path) -> anyhow::Result<String> {
    std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read gateway configuration file: {:?}", path))
}

pub async fn administer(command: GatewayCommand, config: &Config) -> anyhow::Result<()> {
    let store = SqliteGatewayStore::connect(&config.database.path).await?;
    match command {
        GatewayCommand::Register {
            mac,
            model,
            serial,
            config_file,
            auto_update,
        } => {
            let desired = match config_file {
                Some(path) => read_desired_config(&path)?,
                None => String::new(),
            };
            let class = store
                .create_gateway(
                    &NewGateway {
                        mac,
                        model: model.clone(),
                        serial_number: serial,
                        config: desired,
                        auto_update_firmware: auto_update,
                    },
                    &config.heartbeat.managed_model_prefixes,
                )
                .await?;
            tracing::info!(mac = %mac, model = %model, class = ?class, "gateway registered");
        }
        GatewayCommand::SetConfig { mac, config_file } => {
            let desired = read_desired_config(&config_file)?;
            if !store.set_config(&mac, &desired).await? {
                bail!("gateway {mac} is not registered");
            }
            tracing::info!(mac = %mac, hash = %Md5Sum::of(&desired), "desired configuration updated");
        }
        GatewayCommand::SetAutoUpdate { mac, enabled } => {
            if !store.set_auto_update(&mac, enabled).await? {
                bail!("gateway {mac} is not registered");
            }
            tracing::info!(mac = %mac, enabled, "firmware auto update changed");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DeviceClass;
    use crate::store::GatewayStore;

    fn config(dir: &Path) -> Config {
        let content = r#"
            [logs]
            level = "info"

            [database]
            path = "fleetbeat.db"

            [listeners.current]
            bind = "127.0.0.1:8006"

            [listeners.legacy]
            bind = "127.0.0.1:8005"

            [provisioning]
            url = "https://provision.example.net"
            update_schedule = "0 */30 * * * *"
        "#;
        Config::from_toml(content, dir).unwrap()
    }

    fn gateway_command(args: &[&str]) -> GatewayCommand {
        let base = ["fleetbeat", "-c", "fleetbeat.toml"];
        let cli = Cli::try_parse_from(base.iter().chain(args.iter()).copied())
            .unwrap();
        match cli.command {
            Some(Command::Gateway(command)) => command,
            other => panic!("expected gateway command, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_arguments() {
        let cli = Cli::try_parse_from(["fleetbeat", "--config", "fleetbeat.toml"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("fleetbeat.toml"));
        assert!(cli.command.is_none());

        let cli = Cli::try_parse_from(["fleetbeat", "-c", "fleetbeat.toml", "serve"]).unwrap();
        assert!(matches!(cli.command, Some(Command::Serve)));

        assert!(Cli::try_parse_from(["fleetbeat"]).is_err());
        assert!(
            Cli::try_parse_from([
                "fleetbeat",
                "-c",
                "fleetbeat.toml",
                "register",
                "--mac",
                "0102",
                "--model",
                "MX1903"
            ])
            .is_err()
        );
    }

    #[tokio::test]
    async fn test_register_and_adjust_gateway() {
        let dir = std::env::temp_dir().join(format!("fleetbeat-cli-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let config = config(&dir);
        let desired = dir.join("gateway.json");
        std::fs::write(&desired, "{\"region\":\"EU868\"}").unwrap();
        let desired = desired.to_string_lossy().to_string();

        administer(
            gateway_command(&[
                "register",
                "--mac",
                "0102030405060708",
                "--model",
                "MX1903",
                "--serial",
                "M2XABCDEFGH",
                "--config-file",
                desired.as_str(),
            ]),
            &config,
        )
        .await
        .unwrap();
        administer(
            gateway_command(&[
                "set-auto-update",
                "--mac",
                "0102030405060708",
                "--enabled",
                "true",
            ]),
            &config,
        )
        .await
        .unwrap();
        let unknown = administer(
            gateway_command(&["set-config", "--mac", "ffffffffffffffff", "--config-file", desired.as_str()]),
            &config,
        )
        .await;
        assert!(unknown.is_err());

        let store = SqliteGatewayStore::connect(&config.database.path)
            .await
            .unwrap();
        let mac: Eui64 = "0102030405060708".parse().unwrap();
        let gateway = store.get_gateway(&mac).await.unwrap().unwrap();
        assert_eq!(gateway.device_class, Some(DeviceClass::Managed));
        assert_eq!(gateway.serial_number, "M2XABCDEFGH");
        assert_eq!(gateway.config, "{\"region\":\"EU868\"}");
        assert!(gateway.auto_update_firmware);
        assert!(store.get_firmware("MX1903").await.unwrap().is_some());
        std::fs::remove_dir_all(&dir).ok();
    }
}
