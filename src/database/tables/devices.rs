use sqlx::{Executor, PgPool};
use crate::database::domain::StoreError;


pub async fn create_table_devices(pool: &PgPool) -> Result<(), sqlx::Error> {
    pool.execute(
        r#"
        CREATE TABLE IF NOT EXISTS devices (
            device_id            TEXT PRIMARY KEY,
            valve_state          TEXT,
            valve_position       BIGINT,
            last_command_at      TIMESTAMPTZ
        );
        "#
    )
        .await?;
    Ok(())
}


/// Upsert del estado de válvula; los campos en `None` conservan su valor.
pub async fn update_valve_state(pool: &PgPool,
                                device_id: &str,
                                state: Option<&str>,
                                position: Option<i64>,
) -> Result<(), StoreError> {

    sqlx::query(
        r#"
        INSERT INTO devices (device_id, valve_state, valve_position, last_command_at)
        VALUES ($1, $2, $3, NOW())
        ON CONFLICT (device_id) DO UPDATE SET
            valve_state = COALESCE(EXCLUDED.valve_state, devices.valve_state),
            valve_position = COALESCE(EXCLUDED.valve_position, devices.valve_position),
            last_command_at = NOW()
        "#
    )
        .bind(device_id)
        .bind(state)
        .bind(position)
        .execute(pool)
        .await?;

    Ok(())
}
