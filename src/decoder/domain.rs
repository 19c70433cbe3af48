//! Dominio del registro de decoders.


use serde::{Serialize, Deserialize};
use serde_json::Value;


/// Familia de decoder seleccionada por la firma estructural del payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderKind {
    /// Medidores que reportan `serial_number`.
    SerialMeter,
    /// Dispositivos identificados por `deviceEUI`.
    EuiDevice,
    /// Paso directo con coerción de tipos, sin semántica de familia.
    Generic,
}


impl DecoderKind {
    pub fn name(&self) -> &'static str {
        match self {
            DecoderKind::SerialMeter => "serial_meter",
            DecoderKind::EuiDevice => "eui_device",
            DecoderKind::Generic => "generic",
        }
    }
}


/// Registro canónico de lectura que produce el decoder y persiste el
/// colaborador de almacenamiento. Inmutable una vez guardado.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReadingRecord {
    pub device_id: Option<String>,
    pub meter_reading: Option<f64>,
    pub battery_level: Option<f64>,
    pub valve_status: Option<i64>,
    /// Campos restantes empaquetados como blob opaco para auditoría.
    pub extra: Value,
    /// Referencia al registro crudo persistido antes de decodificar.
    pub raw_record_id: i64,
}


/// Resultado del pipeline de subida para el gestor de conexiones.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedUplink {
    pub device_id: Option<String>,
    pub reading_id: i64,
}
