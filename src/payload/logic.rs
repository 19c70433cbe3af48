//! Normalización del camino binario (Base64 → mapa binario → validación).
//!
//! El resultado queda completamente indexado: las claves canónicas del
//! medidor existen siempre, con nulos explícitos cuando el origen no las
//! envió. Un fallo de decodificación o de validación produce un error
//! distinguible que se reporta y no se reintenta: una transmisión mal
//! formada cuesta exactamente un mensaje descartado.


use chrono::Utc;
use serde_json::{Map, Value};
use thiserror::Error;
use crate::codec::logic::{decode_base64, decode_binary_map, CodecError};
use crate::payload::domain::{NormalizedPayload, PayloadMetadata};


/// Claves que el camino binario garantiza presentes tras la validación.
pub const CANONICAL_FIELDS: [&str; 4] =
    ["serial_number", "meter_reading", "battery_level", "valve_status"];

/// Identificador alternativo de la familia de dispositivos EUI.
pub const DEVICE_EUI_FIELD: &str = "deviceEUI";


#[derive(Debug, Error)]
pub enum PayloadError {
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("decoded payload is empty")]
    Empty,
    #[error("missing required fields: {}", .0.join(", "))]
    MissingFields(Vec<String>),
    #[error("payload failed {0} validation")]
    Validation(&'static str),
}


/// Normaliza una carga útil del camino binario.
///
/// Pasos: decodificación Base64, decodificación del mapa binario (con fusión
/// de fragmentos de una sola clave), validación de presencia del campo
/// identificador (`serial_number` o `deviceEUI`) y de la lectura primaria
/// (`meter_reading`), y relleno de las claves canónicas con nulos explícitos.
///
/// # Errores
/// * `MissingFields`: nombra cada campo requerido ausente.
pub fn normalize_binary(raw: &str) -> Result<NormalizedPayload, PayloadError> {
    let bytes = decode_base64(raw)?;
    let mut fields = decode_binary_map(&bytes)?;

    if fields.is_empty() {
        return Err(PayloadError::Empty);
    }

    let mut missing = Vec::new();
    if !has_value(&fields, "serial_number") && !has_value(&fields, DEVICE_EUI_FIELD) {
        missing.push("serial_number".to_string());
    }
    if !has_value(&fields, "meter_reading") {
        missing.push("meter_reading".to_string());
    }
    if !missing.is_empty() {
        return Err(PayloadError::MissingFields(missing));
    }

    for key in CANONICAL_FIELDS {
        fields.entry(key).or_insert(Value::Null);
    }

    let timestamp = fields.get("timestamp")
        .and_then(Value::as_i64)
        .unwrap_or_else(|| Utc::now().timestamp());

    Ok(NormalizedPayload {
        metadata: PayloadMetadata {
            gateway_type: "binary".to_string(),
            gateway_id: None,
            device_type: None,
            timestamp,
        },
        measurements: Default::default(),
        fields,
        raw: raw.to_string(),
    })
}


fn has_value(fields: &Map<String, Value>, key: &str) -> bool {
    fields.get(key).is_some_and(|value| !value.is_null())
}
