use sqlx::{Executor, PgPool, Row};
use crate::database::domain::StoreError;
use crate::decoder::domain::ReadingRecord;


pub async fn create_table_readings(pool: &PgPool) -> Result<(), sqlx::Error> {
    pool.execute(
        r#"
        CREATE TABLE IF NOT EXISTS meter_readings (
            id                   BIGSERIAL PRIMARY KEY,
            raw_data_id          BIGINT,
            device_id            TEXT,
            meter_reading        DOUBLE PRECISION,
            battery_level        DOUBLE PRECISION,
            valve_status         BIGINT,
            additional_data      TEXT NOT NULL,
            created_at           TIMESTAMPTZ NOT NULL DEFAULT NOW()
        );
        "#
    )
        .await?;
    Ok(())
}


pub async fn insert_reading(pool: &PgPool,
                            record: &ReadingRecord,
) -> Result<i64, StoreError> {

    let additional_data = serde_json::to_string(&record.extra)?;

    let row = sqlx::query(
        r#"
        INSERT INTO meter_readings (
            raw_data_id, device_id, meter_reading,
            battery_level, valve_status, additional_data
        )
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING id
        "#
    )
        .bind(record.raw_record_id)
        .bind(record.device_id.as_deref())
        .bind(record.meter_reading)
        .bind(record.battery_level)
        .bind(record.valve_status)
        .bind(additional_data)
        .fetch_one(pool)
        .await?;

    Ok(row.get("id"))
}
