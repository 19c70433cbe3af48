//! Persistencia de la cola de mensajes de downlink.
//!
//! El reclamo usa `FOR UPDATE SKIP LOCKED`: dos gateways (o dos tareas)
//! reclamando a la vez nunca observan la misma fila en `queued`. Las filas
//! nunca se borran desde el núcleo; la limpieza es del colaborador.


use serde_json::{Map, Value};
use sqlx::{Executor, PgPool, Row};
use crate::database::domain::StoreError;
use crate::downlink::domain::{QueuedDownlink, STATUS_FAILED, STATUS_QUEUED, STATUS_SENT};


pub async fn create_table_downlink_queue(pool: &PgPool) -> Result<(), sqlx::Error> {
    pool.execute(
        r#"
        CREATE TABLE IF NOT EXISTS downlink_queue (
            id                   BIGSERIAL PRIMARY KEY,
            device_id            TEXT NOT NULL,
            message              TEXT NOT NULL,
            message_type         TEXT NOT NULL,
            status               TEXT NOT NULL DEFAULT 'queued',
            error                TEXT,
            created_at           TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            sent_at              TIMESTAMPTZ
        );
        "#
    )
        .await?;
    Ok(())
}


pub async fn insert_downlink(pool: &PgPool,
                             device_id: &str,
                             message: &Map<String, Value>,
                             message_type: &str,
) -> Result<i64, StoreError> {

    let message = serde_json::to_string(message)?;

    let row = sqlx::query(
        r#"
        INSERT INTO downlink_queue (device_id, message, message_type, status)
        VALUES ($1, $2, $3, $4)
        RETURNING id
        "#
    )
        .bind(device_id)
        .bind(message)
        .bind(message_type)
        .bind(STATUS_QUEUED)
        .fetch_one(pool)
        .await?;

    Ok(row.get("id"))
}


/// Reclama el mensaje `queued` más antiguo del dispositivo y lo transiciona
/// a `sent` dentro de la misma transacción.
pub async fn claim_next(pool: &PgPool,
                        device_id: &str,
) -> Result<Option<QueuedDownlink>, StoreError> {

    let mut tx = pool.begin().await?;

    let row = sqlx::query(
        r#"
        SELECT id, message FROM downlink_queue
        WHERE device_id = $1 AND status = $2
        ORDER BY created_at
        LIMIT 1
        FOR UPDATE SKIP LOCKED
        "#
    )
        .bind(device_id)
        .bind(STATUS_QUEUED)
        .fetch_optional(&mut *tx)
        .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let id: i64 = row.get("id");
    let message: String = row.get("message");

    sqlx::query(
        r#"
        UPDATE downlink_queue SET
            status = $1,
            sent_at = NOW()
        WHERE id = $2
        "#
    )
        .bind(STATUS_SENT)
        .bind(id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    Ok(Some(QueuedDownlink {
        id,
        device_id: device_id.to_string(),
        message: serde_json::from_str(&message)?,
    }))
}


pub async fn mark_failed(pool: &PgPool,
                         queue_id: i64,
                         reason: &str,
) -> Result<(), StoreError> {

    sqlx::query(
        r#"
        UPDATE downlink_queue SET
            status = $1,
            error = $2,
            sent_at = NOW()
        WHERE id = $3
        "#
    )
        .bind(STATUS_FAILED)
        .bind(reason)
        .bind(queue_id)
        .execute(pool)
        .await?;

    Ok(())
}
