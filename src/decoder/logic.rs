//! Enrutamiento de decoders y pipeline de subida.
//!
//! El enrutamiento es estructural: la presencia de `serial_number` elige la
//! familia de medidores seriales, la de `deviceEUI` la familia EUI, y todo
//! lo demás cae al decoder genérico, de modo que la ingesta nunca descarta
//! datos solo por un tipo no reconocido. Cada decoder de familia normaliza
//! los tipos numéricos que espera y delega en el genérico (composición
//! explícita, un solo nivel).


use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, info};
use crate::database::domain::{Store, StoreError};
use crate::decoder::domain::{DecoderKind, ProcessedUplink, ReadingRecord};
use crate::gateway::domain::parse_payload;
use crate::payload::domain::NormalizedPayload;
use crate::payload::logic::{PayloadError, DEVICE_EUI_FIELD};


#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Payload(#[from] PayloadError),
    #[error("persistence failed: {0}")]
    Store(#[from] StoreError),
}


/// Selecciona la familia de decoder por firma estructural.
pub fn route(normalized: &NormalizedPayload) -> DecoderKind {
    if has_value(&normalized.fields, "serial_number") {
        DecoderKind::SerialMeter
    } else if has_value(&normalized.fields, DEVICE_EUI_FIELD) {
        DecoderKind::EuiDevice
    } else {
        DecoderKind::Generic
    }
}


/// Pipeline completo de una trama de subida.
///
/// Orden de pasos: persistir el crudo (auditoría incluso de mensajes que no
/// decodifican), normalizar, enrutar, decodificar y persistir la lectura.
/// Exactamente una llamada de persistencia de lectura por trama.
pub async fn process_uplink(store: &dyn Store,
                            raw: &str,
                            client_addr: &str,
) -> Result<ProcessedUplink, PipelineError> {

    let raw_record_id = store.save_raw(raw, client_addr).await?;

    let normalized = parse_payload(raw)?;
    let kind = route(&normalized);
    debug!("Debug: payload de {client_addr} enrutado a {}", kind.name());

    let record = match kind {
        DecoderKind::SerialMeter => serial_meter_record(normalized, raw_record_id),
        DecoderKind::EuiDevice => eui_device_record(normalized, raw_record_id),
        DecoderKind::Generic => generic_record(normalized, raw_record_id),
    };

    let reading_id = store.save_reading(&record).await?;
    info!("Info: lectura {} persistida ({}) para {client_addr}", reading_id, kind.name());

    Ok(ProcessedUplink {
        device_id: record.device_id,
        reading_id,
    })
}


/// Decoder genérico: paso directo con coerción de tipos y relleno de nulos.
fn generic_record(normalized: NormalizedPayload, raw_record_id: i64) -> ReadingRecord {
    let fields = &normalized.fields;

    let device_id = string_field(fields, "serial_number")
        .or_else(|| string_field(fields, DEVICE_EUI_FIELD))
        .or_else(|| normalized.metadata.gateway_id.clone());

    ReadingRecord {
        device_id,
        meter_reading: number_field(fields, "meter_reading"),
        battery_level: number_field(fields, "battery_level"),
        valve_status: fields.get("valve_status").and_then(Value::as_i64),
        extra: serde_json::to_value(&normalized).unwrap_or(Value::Null),
        raw_record_id,
    }
}


/// Familia de medidores seriales: exige tipos numéricos estrictos en los
/// campos de la familia antes de delegar en el decoder genérico.
fn serial_meter_record(mut normalized: NormalizedPayload, raw_record_id: i64) -> ReadingRecord {
    for key in ["meter_reading", "battery_level", "valve_status"] {
        let non_numeric = normalized.fields.get(key)
            .is_some_and(|value| !value.is_null() && !value.is_number());
        if non_numeric {
            normalized.fields.insert(key.to_string(), Value::Null);
        }
    }
    generic_record(normalized, raw_record_id)
}


/// Familia EUI: el identificador viene en `deviceEUI`; los tipos numéricos
/// se normalizan igual que en la familia serial.
fn eui_device_record(mut normalized: NormalizedPayload, raw_record_id: i64) -> ReadingRecord {
    for key in ["meter_reading", "battery_level"] {
        let non_numeric = normalized.fields.get(key)
            .is_some_and(|value| !value.is_null() && !value.is_number());
        if non_numeric {
            normalized.fields.insert(key.to_string(), Value::Null);
        }
    }
    generic_record(normalized, raw_record_id)
}


fn has_value(fields: &Map<String, Value>, key: &str) -> bool {
    fields.get(key).is_some_and(|value| !value.is_null())
}

fn string_field(fields: &Map<String, Value>, key: &str) -> Option<String> {
    fields.get(key).and_then(Value::as_str).map(str::to_string)
}

fn number_field(fields: &Map<String, Value>, key: &str) -> Option<f64> {
    fields.get(key).and_then(Value::as_f64)
}
