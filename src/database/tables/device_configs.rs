use serde_json::Value;
use sqlx::{Executor, PgPool};
use crate::database::domain::StoreError;


pub async fn create_table_device_configs(pool: &PgPool) -> Result<(), sqlx::Error> {
    pool.execute(
        r#"
        CREATE TABLE IF NOT EXISTS device_configs (
            device_id            TEXT PRIMARY KEY,
            config               TEXT,
            updated_at           TIMESTAMPTZ NOT NULL DEFAULT NOW()
        );
        "#
    )
        .await?;
    Ok(())
}


pub async fn upsert_config(pool: &PgPool,
                           device_id: &str,
                           config: &Value,
) -> Result<(), StoreError> {

    let config = serde_json::to_string(config)?;

    sqlx::query(
        r#"
        INSERT INTO device_configs (device_id, config, updated_at)
        VALUES ($1, $2, NOW())
        ON CONFLICT (device_id) DO UPDATE SET
            config = EXCLUDED.config,
            updated_at = NOW()
        "#
    )
        .bind(device_id)
        .bind(config)
        .execute(pool)
        .await?;

    Ok(())
}


pub async fn clear_config(pool: &PgPool,
                          device_id: &str,
) -> Result<(), StoreError> {

    sqlx::query(
        r#"
        INSERT INTO device_configs (device_id, config, updated_at)
        VALUES ($1, NULL, NOW())
        ON CONFLICT (device_id) DO UPDATE SET
            config = NULL,
            updated_at = NOW()
        "#
    )
        .bind(device_id)
        .execute(pool)
        .await?;

    Ok(())
}
