use sqlx::{Executor, PgPool};
use crate::database::domain::StoreError;


/// Histórico de actualizaciones de firmware iniciadas por el gateway.
pub async fn create_table_firmware_updates(pool: &PgPool) -> Result<(), sqlx::Error> {
    pool.execute(
        r#"
        CREATE TABLE IF NOT EXISTS firmware_updates (
            id                   BIGSERIAL PRIMARY KEY,
            device_id            TEXT NOT NULL,
            version              TEXT NOT NULL,
            status               TEXT NOT NULL,
            started_at           TIMESTAMPTZ NOT NULL DEFAULT NOW()
        );
        "#
    )
        .await?;
    Ok(())
}


pub async fn insert_firmware_update(pool: &PgPool,
                                    device_id: &str,
                                    version: &str,
                                    status: &str,
) -> Result<(), StoreError> {

    sqlx::query(
        r#"
        INSERT INTO firmware_updates (device_id, version, status)
        VALUES ($1, $2, $3)
        "#
    )
        .bind(device_id)
        .bind(version)
        .bind(status)
        .execute(pool)
        .await?;

    Ok(())
}
