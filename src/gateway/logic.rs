//! Parser del formato ASCII "gatewayTypeA".
//!
//! Pares `CLAVE:VALOR` separados por coma. Los sufijos de unidad llegan con
//! artefactos de codificación según el locale del dispositivo (`°C` puede
//! venir como `Â°C`), así que la extracción numérica descarta todo sufijo
//! de forma defensiva en lugar de asumir ASCII limpio.


use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use crate::payload::domain::{Location, Measurements, NormalizedPayload, PayloadMetadata};
use crate::payload::logic::PayloadError;


pub fn detect_type_a(raw: &str) -> bool {
    raw.contains("GW_ID") && raw.contains("TYPE:")
}


/// El camino binario es el default del registro: acepta cualquier entrada.
pub fn detect_binary(_raw: &str) -> bool {
    true
}


pub fn validate_binary(raw: &str) -> bool {
    !raw.trim().is_empty()
}


pub fn validate_type_a(raw: &str) -> bool {
    raw.contains("GW_ID") && raw.contains("TYPE:") && raw.contains("STAT:")
}


/// Parsea el payload ASCII a la forma normalizada.
///
/// Un campo ausente queda indefinido en las mediciones (no en cero). `Time`
/// se interpreta como RFC 3339; si falta o no parsea, el gateway asigna el
/// momento de decodificación.
pub fn parse_type_a(raw: &str) -> Result<NormalizedPayload, PayloadError> {
    let mut pairs: Map<String, Value> = Map::new();

    for pair in raw.split(',') {
        let Some((key, value)) = pair.split_once(':') else { continue };
        let key = key.trim();
        let value = value.trim();
        if !key.is_empty() && !value.is_empty() {
            pairs.insert(key.to_string(), Value::String(value.to_string()));
        }
    }

    let field = |key: &str| pairs.get(key).and_then(Value::as_str);

    let timestamp = field("Time")
        .and_then(|time| DateTime::parse_from_rfc3339(time).ok())
        .map(|time| time.timestamp())
        .unwrap_or_else(|| Utc::now().timestamp());

    let measurements = Measurements {
        temperature: field("T").and_then(unit_number),
        humidity: field("H").and_then(unit_number),
        voltage: field("V").and_then(unit_number),
        rssi: field("RSSI").and_then(unit_number).map(|value| value as i64),
        location: Location {
            lat: field("N").and_then(unit_number),
            lng: field("E").and_then(unit_number),
        },
    };

    let metadata = PayloadMetadata {
        gateway_type: "gatewayTypeA".to_string(),
        gateway_id: field("GW_ID").map(str::to_string),
        device_type: field("TYPE").map(str::to_string),
        timestamp,
    };

    Ok(NormalizedPayload {
        metadata,
        measurements,
        fields: pairs,
        raw: raw.to_string(),
    })
}


/// Extrae el número inicial de un valor con sufijo de unidad (`21.5°C`,
/// `55%`, `-72dBm`), tolerando bytes de unidad arbitrarios tras el número.
fn unit_number(value: &str) -> Option<f64> {
    let value = value.trim();
    let digits: String = value.chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.' || *c == '-' || *c == '+')
        .collect();
    digits.parse().ok()
}
