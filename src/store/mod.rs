//! Persistence contract consumed by the heartbeat engine and the firmware sync job.

mod sqlite;

use crate::models::{DeviceClass, Eui64, Gateway, GatewayAttributes, GatewayFirmware, Liveness};
use async_trait::async_trait;

pub use sqlite::SqliteGatewayStore;

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("failed to run migrations: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("gateway {0} already exists")]
    DuplicateGateway(Eui64),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Every write here touches a single row and is applied as one statement.
#[async_trait]
pub trait GatewayStore: Send + Sync {
    async fn get_gateway(&self, mac: &Eui64) -> StoreResult<Option<Gateway>>;

    /// Stores the class of a gateway that was registered without one and adds
    /// the catalog placeholder for its model. A row that already carries a
    /// class keeps it.
    async fn classify_gateway(&self, mac: &Eui64, model: &str, class: DeviceClass)
    -> StoreResult<()>;

    /// Writes both heartbeat timestamps at once. The update is skipped when
    /// the stored `last_heartbeat` is already newer, so a delayed duplicate
    /// never rewinds liveness. Returns whether a row was written.
    async fn update_heartbeat(&self, mac: &Eui64, liveness: Liveness) -> StoreResult<bool>;

    /// Writes firmware hash, OS version and statistics as one unit.
    async fn update_attributes(&self, mac: &Eui64, attributes: &GatewayAttributes)
    -> StoreResult<()>;

    async fn get_firmware(&self, model: &str) -> StoreResult<Option<GatewayFirmware>>;

    async fn list_firmware(&self) -> StoreResult<Vec<GatewayFirmware>>;

    /// Returns the number of rows updated, `0` when the model is unknown.
    async fn update_firmware(&self, firmware: &GatewayFirmware) -> StoreResult<u64>;
}
