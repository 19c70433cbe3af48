//! Costura de persistencia hacia el colaborador de almacenamiento.
//!
//! El núcleo consume el almacenamiento duradero únicamente a través de este
//! trait (llamadas de guardado y consulta); la durabilidad y los reintentos
//! son asunto del colaborador. La implementación de producción es el
//! `Repository` sobre PostgreSQL.


use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;
use crate::decoder::domain::ReadingRecord;
use crate::downlink::domain::QueuedDownlink;


#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("stored payload is not valid JSON: {0}")]
    Decode(#[from] serde_json::Error),
}


#[async_trait]
pub trait Store: Send + Sync {

    /// Persiste el payload crudo tal como llegó, antes de decodificar.
    async fn save_raw(&self, payload: &str, client_addr: &str) -> Result<i64, StoreError>;

    /// Persiste la lectura canónica producida por un decoder.
    async fn save_reading(&self, record: &ReadingRecord) -> Result<i64, StoreError>;

    /// Inserta un mensaje de downlink con estado `queued`.
    async fn enqueue_downlink(&self,
                              device_id: &str,
                              message: &Map<String, Value>,
                              message_type: &str,
    ) -> Result<i64, StoreError>;

    /// Reclamo de consumidor único: selecciona el `queued` más antiguo del
    /// dispositivo bajo un bloqueo que saltea filas ya bloqueadas y lo
    /// transiciona atómicamente a `sent`.
    async fn claim_downlink(&self, device_id: &str) -> Result<Option<QueuedDownlink>, StoreError>;

    /// Transición terminal `-> failed` con el motivo registrado.
    async fn mark_downlink_failed(&self, queue_id: i64, reason: &str) -> Result<(), StoreError>;

    /// Actualiza el estado de válvula del dispositivo (upsert).
    async fn update_valve_state(&self,
                                device_id: &str,
                                state: Option<&str>,
                                position: Option<i64>,
    ) -> Result<(), StoreError>;

    /// Reemplaza la configuración almacenada del dispositivo (upsert).
    async fn update_device_config(&self, device_id: &str, config: &Value) -> Result<(), StoreError>;

    /// Borra la configuración almacenada del dispositivo.
    async fn clear_device_config(&self, device_id: &str) -> Result<(), StoreError>;

    /// Registra el inicio de una actualización de firmware.
    async fn insert_firmware_update(&self,
                                    device_id: &str,
                                    version: &str,
                                    status: &str,
    ) -> Result<(), StoreError>;
}
