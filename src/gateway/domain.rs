//! Registro de formatos de pasarela.
//!
//! Dispatch por inspección de contenido: una lista ordenada de pares
//! (predicado, handler) evaluada con prioridad fija, primer match gana,
//! con el camino binario como default explícito al final. Agregar un
//! formato nuevo es insertar una entrada antes del default.


use crate::gateway::logic;
use crate::payload::domain::NormalizedPayload;
use crate::payload::logic::{normalize_binary, PayloadError};


/// Handler de un formato de entrada soportado por el listener.
pub struct FormatHandler {
    pub name: &'static str,
    /// Sniffing de contenido para la selección del handler.
    pub detect: fn(&str) -> bool,
    /// Validación estructural previa al parseo.
    pub validate: fn(&str) -> bool,
    pub parse: fn(&str) -> Result<NormalizedPayload, PayloadError>,
}


static REGISTRY: [FormatHandler; 2] = [
    FormatHandler {
        name: "gatewayTypeA",
        detect: logic::detect_type_a,
        validate: logic::validate_type_a,
        parse: logic::parse_type_a,
    },
    // Default: payload binario Base64/CBOR de los medidores.
    FormatHandler {
        name: "binary",
        detect: logic::detect_binary,
        validate: logic::validate_binary,
        parse: normalize_binary,
    },
];


pub fn registry() -> &'static [FormatHandler] {
    &REGISTRY
}


/// Selecciona el handler por sniffing y normaliza la carga útil.
///
/// # Errores
/// * `Validation`: el formato detectado rechazó la estructura del mensaje.
/// * Los errores propios del parseo de cada formato se propagan sin cambios.
pub fn parse_payload(raw: &str) -> Result<NormalizedPayload, PayloadError> {
    for handler in registry() {
        if (handler.detect)(raw) {
            if !(handler.validate)(raw) {
                return Err(PayloadError::Validation(handler.name));
            }
            return (handler.parse)(raw);
        }
    }
    // El default del registro detecta siempre; esto solo cubre un registro vacío.
    Err(PayloadError::Validation("unsupported"))
}
