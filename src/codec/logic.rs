//! Códec de carga útil binaria: Base64 + mapa binario (CBOR).
//!
//! Funciones puras, sin estado. El camino de subida decodifica el texto Base64
//! que envían los medidores y lo convierte en un mapa JSON dinámico; el camino
//! de bajada codifica el sobre de comandos hacia el dispositivo.


use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use ciborium::value::Value as CborValue;
use serde_json::{Map, Number, Value};
use thiserror::Error;


#[derive(Debug, Error)]
pub enum CodecError {
    #[error("base64 decoding failed: {0}")]
    Base64(String),
    #[error("binary map decoding failed: {0}")]
    Cbor(String),
    #[error("decoded payload is not a field mapping")]
    NotAMap,
}


/// Decodifica el texto Base64 recibido por el socket.
pub fn decode_base64(text: &str) -> Result<Vec<u8>, CodecError> {
    BASE64.decode(text.trim())
        .map_err(|e| CodecError::Base64(e.to_string()))
}


/// Decodifica un mapa binario (CBOR) a un mapa JSON de campos.
///
/// Algunos dispositivos con claves ASCII envuelven los campos como una lista
/// de mapas de una sola entrada; esa forma se fusiona en un único mapa antes
/// de devolverla. Cualquier otra estructura se rechaza con `NotAMap`.
pub fn decode_binary_map(bytes: &[u8]) -> Result<Map<String, Value>, CodecError> {
    let decoded: CborValue = ciborium::from_reader(bytes)
        .map_err(|e| CodecError::Cbor(e.to_string()))?;

    match decoded {
        CborValue::Map(entries) => Ok(map_to_json(entries)),
        CborValue::Array(items) => {
            let mut merged = Map::new();
            for item in items {
                match item {
                    CborValue::Map(entries) => merged.extend(map_to_json(entries)),
                    _ => return Err(CodecError::NotAMap),
                }
            }
            Ok(merged)
        }
        _ => Err(CodecError::NotAMap),
    }
}


/// Codifica un mapa JSON como mapa binario (CBOR) para transmitirlo al dispositivo.
pub fn encode_binary_map(map: &Map<String, Value>) -> Result<Vec<u8>, CodecError> {
    let entries = map.iter()
        .map(|(k, v)| (CborValue::Text(k.clone()), json_to_cbor(v)))
        .collect();

    let mut buffer = Vec::new();
    ciborium::into_writer(&CborValue::Map(entries), &mut buffer)
        .map_err(|e| CodecError::Cbor(e.to_string()))?;

    Ok(buffer)
}


fn map_to_json(entries: Vec<(CborValue, CborValue)>) -> Map<String, Value> {
    let mut map = Map::new();
    for (key, value) in entries {
        let key = match key {
            CborValue::Text(text) => text,
            CborValue::Integer(n) => i128::from(n).to_string(),
            _ => continue,
        };
        map.insert(key, cbor_to_json(value));
    }
    map
}


fn cbor_to_json(value: CborValue) -> Value {
    match value {
        CborValue::Null => Value::Null,
        CborValue::Bool(b) => Value::Bool(b),
        CborValue::Integer(n) => {
            let n = i128::from(n);
            if let Ok(n) = i64::try_from(n) {
                Value::Number(n.into())
            } else if let Ok(n) = u64::try_from(n) {
                Value::Number(n.into())
            } else {
                Number::from_f64(n as f64).map(Value::Number).unwrap_or(Value::Null)
            }
        }
        CborValue::Float(f) => {
            Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
        }
        CborValue::Text(text) => Value::String(text),
        CborValue::Bytes(bytes) => Value::String(hex::encode(bytes)),
        CborValue::Array(items) => {
            Value::Array(items.into_iter().map(cbor_to_json).collect())
        }
        CborValue::Map(entries) => Value::Object(map_to_json(entries)),
        CborValue::Tag(_, inner) => cbor_to_json(*inner),
        _ => Value::Null,
    }
}


fn json_to_cbor(value: &Value) -> CborValue {
    match value {
        Value::Null => CborValue::Null,
        Value::Bool(b) => CborValue::Bool(*b),
        Value::Number(n) => {
            if let Some(n) = n.as_i64() {
                CborValue::Integer(n.into())
            } else if let Some(n) = n.as_u64() {
                CborValue::Integer(n.into())
            } else {
                CborValue::Float(n.as_f64().unwrap_or(0.0))
            }
        }
        Value::String(s) => CborValue::Text(s.clone()),
        Value::Array(items) => {
            CborValue::Array(items.iter().map(json_to_cbor).collect())
        }
        Value::Object(map) => {
            let entries = map.iter()
                .map(|(k, v)| (CborValue::Text(k.clone()), json_to_cbor(v)))
                .collect();
            CborValue::Map(entries)
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cbor_bytes(value: &CborValue) -> Vec<u8> {
        let mut buffer = Vec::new();
        ciborium::into_writer(value, &mut buffer).unwrap();
        buffer
    }

    #[test]
    fn decodes_plain_field_map() {
        let encoded = cbor_bytes(&CborValue::Map(vec![
            (CborValue::Text("serial_number".into()), CborValue::Text("A1".into())),
            (CborValue::Text("meter_reading".into()), CborValue::Integer(42.into())),
        ]));

        let map = decode_binary_map(&encoded).unwrap();
        assert_eq!(map["serial_number"], json!("A1"));
        assert_eq!(map["meter_reading"], json!(42));
    }

    #[test]
    fn merges_single_key_fragment_list() {
        let encoded = cbor_bytes(&CborValue::Array(vec![
            CborValue::Map(vec![
                (CborValue::Text("serial_number".into()), CborValue::Text("A1".into())),
            ]),
            CborValue::Map(vec![
                (CborValue::Text("meter_reading".into()), CborValue::Float(17.5)),
            ]),
        ]));

        let map = decode_binary_map(&encoded).unwrap();
        assert_eq!(map["serial_number"], json!("A1"));
        assert_eq!(map["meter_reading"], json!(17.5));
    }

    #[test]
    fn rejects_non_map_payloads() {
        let encoded = cbor_bytes(&CborValue::Text("hola".into()));
        assert!(matches!(decode_binary_map(&encoded), Err(CodecError::NotAMap)));

        let encoded = cbor_bytes(&CborValue::Array(vec![CborValue::Integer(1.into())]));
        assert!(matches!(decode_binary_map(&encoded), Err(CodecError::NotAMap)));
    }

    #[test]
    fn rejects_malformed_base64() {
        assert!(matches!(decode_base64("%%%no-es-base64%%%"), Err(CodecError::Base64(_))));
    }

    #[test]
    fn envelope_round_trip() {
        let mut envelope = Map::new();
        envelope.insert("timestamp".to_string(), json!(1722470400));
        envelope.insert("command".to_string(), json!({"valve": "open"}));
        envelope.insert("ackRequired".to_string(), json!(true));

        let bytes = encode_binary_map(&envelope).unwrap();
        let decoded = decode_binary_map(&bytes).unwrap();

        assert_eq!(decoded["timestamp"], json!(1722470400));
        assert_eq!(decoded["command"]["valve"], json!("open"));
        assert_eq!(decoded["ackRequired"], json!(true));
    }
}
