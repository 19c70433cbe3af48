use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::error;
use tokio::time::sleep;
use crate::config::postgres::{MAX_CONNECTIONS, WAIT_FOR};
use crate::database::domain::{Store, StoreError};
use crate::database::tables::device_configs::{clear_config, create_table_device_configs, upsert_config};
use crate::database::tables::devices::{create_table_devices, update_valve_state};
use crate::database::tables::downlink_queue::{claim_next, create_table_downlink_queue, insert_downlink, mark_failed};
use crate::database::tables::firmware_updates::{create_table_firmware_updates, insert_firmware_update};
use crate::database::tables::raw_data::{create_table_raw_data, insert_raw_data};
use crate::database::tables::readings::{create_table_readings, insert_reading};
use crate::decoder::domain::ReadingRecord;
use crate::downlink::domain::QueuedDownlink;


#[derive(Clone, Debug)]
pub struct Repository {
    pool: PgPool,
}

impl Repository {
    pub async fn new(database_url: &str) -> Result<Self, sqlx::Error> {
        let pool = create_pool(database_url).await?;
        init_schema(&pool).await?;
        Ok(Self { pool })
    }

    pub async fn create_repository(database_url: &str) -> Self {
        loop {
            match Self::new(database_url).await {
                Ok(repo) => return repo,
                Err(e) => {
                    error!("Error inicializando repo: {:?}", e);
                    sleep(WAIT_FOR).await;
                }
            }
        }
    }
}


#[async_trait]
impl Store for Repository {

    async fn save_raw(&self, payload: &str, client_addr: &str) -> Result<i64, StoreError> {
        insert_raw_data(&self.pool, payload, client_addr).await
    }

    async fn save_reading(&self, record: &ReadingRecord) -> Result<i64, StoreError> {
        insert_reading(&self.pool, record).await
    }

    async fn enqueue_downlink(&self,
                              device_id: &str,
                              message: &Map<String, Value>,
                              message_type: &str,
    ) -> Result<i64, StoreError> {
        insert_downlink(&self.pool, device_id, message, message_type).await
    }

    async fn claim_downlink(&self, device_id: &str) -> Result<Option<QueuedDownlink>, StoreError> {
        claim_next(&self.pool, device_id).await
    }

    async fn mark_downlink_failed(&self, queue_id: i64, reason: &str) -> Result<(), StoreError> {
        mark_failed(&self.pool, queue_id, reason).await
    }

    async fn update_valve_state(&self,
                                device_id: &str,
                                state: Option<&str>,
                                position: Option<i64>,
    ) -> Result<(), StoreError> {
        update_valve_state(&self.pool, device_id, state, position).await
    }

    async fn update_device_config(&self, device_id: &str, config: &Value) -> Result<(), StoreError> {
        upsert_config(&self.pool, device_id, config).await
    }

    async fn clear_device_config(&self, device_id: &str) -> Result<(), StoreError> {
        clear_config(&self.pool, device_id).await
    }

    async fn insert_firmware_update(&self,
                                    device_id: &str,
                                    version: &str,
                                    status: &str,
    ) -> Result<(), StoreError> {
        insert_firmware_update(&self.pool, device_id, version, status).await
    }
}


async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .connect(database_url)
        .await?;

    Ok(pool)
}


async fn init_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    create_table_raw_data(pool).await?;
    create_table_readings(pool).await?;
    create_table_downlink_queue(pool).await?;
    create_table_devices(pool).await?;
    create_table_device_configs(pool).await?;
    create_table_firmware_updates(pool).await?;
    Ok(())
}
