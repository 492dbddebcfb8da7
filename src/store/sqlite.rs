use super::{GatewayStore, StoreError, StoreResult};
use crate::models::{
    DeviceClass, Eui64, Gateway, GatewayAttributes, GatewayFirmware, Liveness, NewGateway,
};
use anyhow::Context;
use async_trait::async_trait;
use sqlx::migrate::Migrator;
use sqlx::sqlite;
use sqlx::{SqliteConnection, SqlitePool};
use std::path::Path;

static MIGRATOR: Migrator = sqlx::migrate!();

const SELECT_GATEWAY: &str = r#"
    SELECT mac, model, serial_number, device_class, config,
           first_heartbeat, last_heartbeat, firmware_hash,
           os_version, statistics, auto_update_firmware
    FROM gateway
"#;

#[derive(Clone)]
pub struct SqliteGatewayStore {
    pool: SqlitePool,
}

impl SqliteGatewayStore {
    pub async fn connect(path: &Path) -> anyhow::Result<Self> {
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() && !dir.exists() {
                std::fs::create_dir_all(dir).with_context(|| {
                    format!("Failed to create database directory: {}", dir.display())
                })?;
            }
        }
        let options = sqlite::SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(sqlite::SqliteJournalMode::Wal);
        let pool = SqlitePool::connect_with(options)
            .await
            .with_context(|| format!("Failed to connect to SQLite database: {}", path.display()))?;
        MIGRATOR.run(&pool).await?;
        Ok(Self { pool })
    }

    /// Private database living as long as the store.
    #[cfg(test)]
    pub async fn in_memory() -> StoreResult<Self> {
        // every connection to `:memory:` opens a fresh database, so pin the pool to one
        let pool = sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        MIGRATOR.run(&pool).await?;
        Ok(Self { pool })
    }

    #[cfg(test)]
    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Registers a gateway, classifying it once from its model, and makes sure
    /// the firmware catalog knows the model so the next sync picks it up.
    pub async fn create_gateway(
        &self,
        gateway: &NewGateway,
        managed_prefixes: &[String],
    ) -> StoreResult<DeviceClass> {
        let class = DeviceClass::resolve(&gateway.model, managed_prefixes);
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;
        let inserted = sqlx::query(
            r#"INSERT INTO gateway
                (mac, model, serial_number, device_class, config,
                 auto_update_firmware, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(gateway.mac)
        .bind(&gateway.model)
        .bind(&gateway.serial_number)
        .bind(class)
        .bind(&gateway.config)
        .bind(gateway.auto_update_firmware)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await;
        match inserted {
            Ok(_) => (),
            Err(sqlx::Error::Database(err)) if err.is_unique_violation() => {
                return Err(StoreError::DuplicateGateway(gateway.mac));
            }
            Err(err) => return Err(err.into()),
        }
        insert_placeholder(&mut *tx, &gateway.model).await?;
        tx.commit().await?;
        Ok(class)
    }

    pub async fn set_config(&self, mac: &Eui64, config: &str) -> StoreResult<bool> {
        let result = sqlx::query("UPDATE gateway SET config = ?, updated_at = ? WHERE mac = ?")
            .bind(config)
            .bind(chrono::Utc::now().timestamp())
            .bind(mac)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn set_auto_update(&self, mac: &Eui64, enabled: bool) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE gateway SET auto_update_firmware = ?, updated_at = ? WHERE mac = ?",
        )
        .bind(enabled)
        .bind(chrono::Utc::now().timestamp())
        .bind(mac)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

/// Catalog entry with no target yet, so the next sync asks the authority
/// about the model.
async fn insert_placeholder(conn: &mut SqliteConnection, model: &str) -> StoreResult<()> {
    let placeholder = GatewayFirmware::placeholder(model);
    let added = sqlx::query(
        "INSERT OR IGNORE INTO gateway_firmware (model, resource_link, firmware_hash) VALUES (?, ?, ?)",
    )
    .bind(&placeholder.model)
    .bind(&placeholder.resource_link)
    .bind(placeholder.firmware_hash)
    .execute(conn)
    .await?;
    if added.rows_affected() > 0 {
        tracing::info!(model = %model, "registered firmware placeholder for new model");
    }
    Ok(())
}

#[async_trait]
impl GatewayStore for SqliteGatewayStore {
    async fn get_gateway(&self, mac: &Eui64) -> StoreResult<Option<Gateway>> {
        let sql = format!("{SELECT_GATEWAY} WHERE mac = ?");
        let gateway = sqlx::query_as::<_, Gateway>(&sql)
            .bind(mac)
            .fetch_optional(&self.pool)
            .await?;
        Ok(gateway)
    }

    async fn classify_gateway(
        &self,
        mac: &Eui64,
        model: &str,
        class: DeviceClass,
    ) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "UPDATE gateway SET device_class = ?, updated_at = ? WHERE mac = ? AND device_class IS NULL",
        )
        .bind(class)
        .bind(chrono::Utc::now().timestamp())
        .bind(mac)
        .execute(&mut *tx)
        .await?;
        insert_placeholder(&mut *tx, model).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn update_heartbeat(&self, mac: &Eui64, liveness: Liveness) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"UPDATE gateway
               SET first_heartbeat = ?, last_heartbeat = ?, updated_at = ?
               WHERE mac = ? AND last_heartbeat <= ?"#,
        )
        .bind(liveness.first_heartbeat)
        .bind(liveness.last_heartbeat)
        .bind(chrono::Utc::now().timestamp())
        .bind(mac)
        .bind(liveness.last_heartbeat)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn update_attributes(
        &self,
        mac: &Eui64,
        attributes: &GatewayAttributes,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"UPDATE gateway
               SET firmware_hash = ?, os_version = ?, statistics = ?, updated_at = ?
               WHERE mac = ?"#,
        )
        .bind(attributes.firmware_hash)
        .bind(&attributes.os_version)
        .bind(&attributes.statistics)
        .bind(chrono::Utc::now().timestamp())
        .bind(mac)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_firmware(&self, model: &str) -> StoreResult<Option<GatewayFirmware>> {
        let firmware = sqlx::query_as::<_, GatewayFirmware>(
            "SELECT model, resource_link, firmware_hash FROM gateway_firmware WHERE model = ?",
        )
        .bind(model)
        .fetch_optional(&self.pool)
        .await?;
        Ok(firmware)
    }

    async fn list_firmware(&self) -> StoreResult<Vec<GatewayFirmware>> {
        let list = sqlx::query_as::<_, GatewayFirmware>(
            "SELECT model, resource_link, firmware_hash FROM gateway_firmware ORDER BY model",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(list)
    }

    async fn update_firmware(&self, firmware: &GatewayFirmware) -> StoreResult<u64> {
        let result = sqlx::query(
            r#"UPDATE gateway_firmware
               SET resource_link = ?, firmware_hash = ?, updated_at = ?
               WHERE model = ?"#,
        )
        .bind(&firmware.resource_link)
        .bind(firmware.firmware_hash)
        .bind(chrono::Utc::now().timestamp())
        .bind(&firmware.model)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
