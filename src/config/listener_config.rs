use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Deserialize, Debug, Clone)]
pub struct ListenersConfig {
    /// current device generation
    pub current: ListenerConfig,
    /// previous device generation, usually with its own CA
    pub legacy: ListenerConfig,
}

#[derive(Deserialize, Debug, Clone)]
pub struct ListenerConfig {
    pub bind: SocketAddr,
    #[serde(default, deserialize_with = "super::optional_path")]
    pub ca_cert: Option<PathBuf>,
    #[serde(default, deserialize_with = "super::optional_path")]
    pub tls_cert: Option<PathBuf>,
    #[serde(default, deserialize_with = "super::optional_path")]
    pub tls_key: Option<PathBuf>,
    /// serve plain HTTP when credentials are missing instead of refusing to start
    #[serde(default)]
    pub allow_unauthenticated: bool,
}

impl ListenerConfig {
    pub(super) fn credential_paths_mut(&mut self) -> impl Iterator<Item = &mut PathBuf> {
        [&mut self.ca_cert, &mut self.tls_cert, &mut self.tls_key]
            .into_iter()
            .flatten()
    }
}
