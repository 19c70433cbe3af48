use sqlx::{Executor, PgPool, Row};
use crate::database::domain::StoreError;


/// Inicializa la tabla `raw_meter_data` si no existe.
///
/// Almacena cada transmisión cruda tal como llegó del socket, antes de
/// cualquier decodificación, para auditoría y reproceso.
pub async fn create_table_raw_data(pool: &PgPool) -> Result<(), sqlx::Error> {
    pool.execute(
        r#"
        CREATE TABLE IF NOT EXISTS raw_meter_data (
            id                   BIGSERIAL PRIMARY KEY,
            payload              TEXT NOT NULL,
            client_address       TEXT,
            received_at          TIMESTAMPTZ NOT NULL DEFAULT NOW()
        );
        "#
    )
        .await?;
    Ok(())
}


pub async fn insert_raw_data(pool: &PgPool,
                             payload: &str,
                             client_addr: &str,
) -> Result<i64, StoreError> {

    let row = sqlx::query(
        r#"
        INSERT INTO raw_meter_data (payload, client_address)
        VALUES ($1, $2)
        RETURNING id
        "#
    )
        .bind(payload)
        .bind(client_addr)
        .fetch_one(pool)
        .await?;

    Ok(row.get("id"))
}
