//! Dominio de normalización de cargas útiles.
//!
//! Define el contenedor canónico que produce cualquier formato de entrada
//! (binario o ASCII de pasarela) antes de pasar al enrutamiento de decoders.
//! Los campos ausentes en el origen se representan con nulos explícitos,
//! nunca se omiten, para que los consumidores posteriores no necesiten
//! chequeos de existencia.


use serde::{Serialize, Deserialize};
use serde_json::{Map, Value};


/// Metadatos de trazabilidad del payload detectado.
#[derive(Default, Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PayloadMetadata {
    /// Formato de pasarela detectado por sniffing (`binary`, `gatewayTypeA`).
    pub gateway_type: String,
    pub gateway_id: Option<String>,
    pub device_type: Option<String>,
    /// Epoch en segundos: provisto por el dispositivo o asignado por el
    /// gateway al momento de decodificar.
    pub timestamp: i64,
}


/// Posición geográfica reportada por la pasarela (claves `N`/`E`).
#[derive(Default, Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Location {
    pub lat: Option<f64>,
    pub lng: Option<f64>,
}


/// Mediciones ambientales del camino ASCII. Un campo ausente queda en
/// `None`, jamás en cero silencioso.
#[derive(Default, Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Measurements {
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub voltage: Option<f64>,
    pub rssi: Option<i64>,
    pub location: Location,
}


/// Resultado de la normalización, común a todos los formatos de entrada.
#[derive(Default, Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NormalizedPayload {
    pub metadata: PayloadMetadata,
    pub measurements: Measurements,
    /// Mapa de campos canónicos (camino binario) o pares crudos (camino
    /// ASCII), siempre completamente indexado.
    pub fields: Map<String, Value>,
    /// Texto original recibido, conservado para auditoría.
    pub raw: String,
}
