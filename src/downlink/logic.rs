//! Operaciones de la cola de downlink: firma, encolado, reclamo y fallo.
//!
//! La firma es un HMAC-SHA256 con el secreto del servidor sobre la
//! serialización canónica (claves ordenadas) del mensaje sin firmar: cubre
//! exactamente la carga útil al momento de crearla, por lo que mutar el
//! payload después de firmar invalida la firma por construcción. La
//! verificación excluye `signature` y `signed_at` del recómputo.
//!
//! El reclamo es de consumidor único: la selección del más antiguo en
//! estado `queued` y la transición a `sent` son un paso atómico del
//! colaborador de almacenamiento, que saltea filas bloqueadas por reclamos
//! concurrentes.


use chrono::Utc;
use hmac::{Hmac, Mac};
use serde_json::{Map, Value};
use sha2::Sha256;
use tracing::{debug, warn};
use crate::database::domain::Store;
use crate::downlink::domain::{
    DownlinkError, QueuedDownlink,
    REASON_INVALID_SIGNATURE, SIGNATURE_FIELD, SIGNED_AT_FIELD,
};


type HmacSha256 = Hmac<Sha256>;


/// Firma y verifica mensajes de downlink con el secreto del servidor.
///
/// Se construye una sola vez en el arranque: la ausencia del secreto es un
/// fallo de configuración del proceso, nunca un error por mensaje.
#[derive(Clone)]
pub struct Signer {
    mac: HmacSha256,
}


impl Signer {

    pub fn new(secret: &str) -> Self {
        // HMAC admite claves de cualquier longitud; esto no puede fallar
        // con un secreto ya validado en el arranque.
        let mac = HmacSha256::new_from_slice(secret.as_bytes())
            .expect("clave HMAC inválida");
        Self { mac }
    }

    /// Devuelve el mensaje con `signature` (digest hex) y `signed_at`.
    pub fn sign(&self, message: &Map<String, Value>) -> Result<Map<String, Value>, DownlinkError> {
        let digest = self.digest(message)?;

        let mut signed = message.clone();
        signed.insert(SIGNATURE_FIELD.to_string(), Value::String(digest));
        signed.insert(SIGNED_AT_FIELD.to_string(), Value::String(Utc::now().to_rfc3339()));
        Ok(signed)
    }

    /// Recalcula el digest con la firma y el sello temporal excluidos.
    /// Un mensaje sin firma es siempre inválido.
    pub fn verify(&self, message: &Map<String, Value>) -> bool {
        let Some(signature) = message.get(SIGNATURE_FIELD).and_then(Value::as_str) else {
            return false;
        };
        let Ok(signature) = hex::decode(signature) else {
            return false;
        };

        let mut unsigned = message.clone();
        unsigned.remove(SIGNATURE_FIELD);
        unsigned.remove(SIGNED_AT_FIELD);

        let Ok(canonical) = serde_json::to_string(&unsigned) else {
            return false;
        };

        let mut mac = self.mac.clone();
        mac.update(canonical.as_bytes());
        mac.verify_slice(&signature).is_ok()
    }

    fn digest(&self, message: &Map<String, Value>) -> Result<String, DownlinkError> {
        let canonical = serde_json::to_string(message)?;
        let mut mac = self.mac.clone();
        mac.update(canonical.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }
}


/// Encola un mensaje (firmado por defecto) con estado `queued`.
pub async fn enqueue(store: &dyn Store,
                     signer: &Signer,
                     device_id: &str,
                     message: Map<String, Value>,
                     sign: bool,
) -> Result<i64, DownlinkError> {

    let message_type = message.get("type")
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string();

    let to_store = if sign { signer.sign(&message)? } else { message };

    let queue_id = store.enqueue_downlink(device_id, &to_store, &message_type).await?;
    debug!("Debug: mensaje {queue_id} ({message_type}) encolado para {device_id}");

    Ok(queue_id)
}


/// Reclama el mensaje `queued` más antiguo del dispositivo.
///
/// La transición `queued → sent` es atómica en el almacenamiento: dos
/// reclamos concurrentes nunca observan la misma fila. Si se pidió
/// verificación y la firma no valida, el mensaje termina en `failed` con
/// motivo `invalid_signature` y el reclamo falla en lugar de devolver un
/// mensaje adulterado.
pub async fn claim(store: &dyn Store,
                   signer: &Signer,
                   device_id: &str,
                   verify: bool,
) -> Result<Option<QueuedDownlink>, DownlinkError> {

    let Some(claimed) = store.claim_downlink(device_id).await? else {
        return Ok(None);
    };

    if verify && !signer.verify(&claimed.message) {
        warn!("Warning: firma inválida en el mensaje {} para {device_id}", claimed.id);
        store.mark_downlink_failed(claimed.id, REASON_INVALID_SIGNATURE).await?;
        return Err(DownlinkError::InvalidSignature { id: claimed.id });
    }

    Ok(Some(claimed))
}


/// Transición terminal explícita, usada por el fallo de firma y por
/// cualquier fallo de entrega que detecte el llamador.
pub async fn mark_failed(store: &dyn Store,
                         queue_id: i64,
                         reason: &str,
) -> Result<(), DownlinkError> {
    store.mark_downlink_failed(queue_id, reason).await?;
    Ok(())
}
