//! Dominio de la cola de downlink.


use serde_json::{Map, Value};
use thiserror::Error;
use crate::database::domain::StoreError;


/// Estados del ciclo de vida de un mensaje encolado. El núcleo nunca borra
/// mensajes; la retención es asunto del colaborador de almacenamiento.
pub const STATUS_QUEUED: &str = "queued";
pub const STATUS_SENT: &str = "sent";
pub const STATUS_FAILED: &str = "failed";

/// Motivo registrado cuando la verificación de firma rechaza un mensaje.
pub const REASON_INVALID_SIGNATURE: &str = "invalid_signature";

/// Claves que agrega la firma y que la verificación excluye del cómputo.
pub const SIGNATURE_FIELD: &str = "signature";
pub const SIGNED_AT_FIELD: &str = "signed_at";


/// Mensaje reclamado de la cola: identificador de fila más carga útil.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedDownlink {
    pub id: i64,
    pub device_id: String,
    pub message: Map<String, Value>,
}


#[derive(Debug, Error)]
pub enum DownlinkError {
    #[error("message {id} failed signature verification")]
    InvalidSignature { id: i64 },
    #[error("message could not be serialized for signing: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
}
