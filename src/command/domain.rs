//! Dominio del despachador de comandos de operador.
//!
//! El enrutamiento usa un mapeo enumerado tipo → familia de controlador,
//! con coincidencia exacta: un tipo no reconocido falla antes de que corra
//! ningún controlador, y ningún tipo puede coincidir con dos familias.


use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::oneshot;
use crate::database::domain::StoreError;
use crate::downlink::domain::DownlinkError;


/// Familias de controladores de dispositivo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandFamily {
    Valve,
    Firmware,
    Config,
}


/// Tipos de comando aceptados por el gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandType {
    ValveOpen,
    ValveClose,
    ValveSet,
    FirmwareUpdate,
    ConfigUpdate,
    ConfigReset,
}


impl CommandType {

    /// Coincidencia exacta; cualquier otro texto es un comando desconocido.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "valve_open" => Some(CommandType::ValveOpen),
            "valve_close" => Some(CommandType::ValveClose),
            "valve_set" => Some(CommandType::ValveSet),
            "firmware_update" => Some(CommandType::FirmwareUpdate),
            "config_update" => Some(CommandType::ConfigUpdate),
            "config_reset" => Some(CommandType::ConfigReset),
            _ => None,
        }
    }

    pub fn family(&self) -> CommandFamily {
        match self {
            CommandType::ValveOpen | CommandType::ValveClose | CommandType::ValveSet => {
                CommandFamily::Valve
            }
            CommandType::FirmwareUpdate => CommandFamily::Firmware,
            CommandType::ConfigUpdate | CommandType::ConfigReset => CommandFamily::Config,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CommandType::ValveOpen => "valve_open",
            CommandType::ValveClose => "valve_close",
            CommandType::ValveSet => "valve_set",
            CommandType::FirmwareUpdate => "firmware_update",
            CommandType::ConfigUpdate => "config_update",
            CommandType::ConfigReset => "config_reset",
        }
    }
}


/// Pedido de la API de operador (colaborador externo): clona el extremo de
/// envío del canal de comandos y espera el resultado por el oneshot.
#[derive(Debug)]
pub struct CommandRequest {
    pub device_id: String,
    pub command: Map<String, Value>,
    pub respond_to: oneshot::Sender<Result<DispatchOutcome, CommandError>>,
}


/// Resultado uniforme de todos los controladores.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DispatchOutcome {
    pub success: bool,
    pub details: Map<String, Value>,
}


impl DispatchOutcome {
    pub fn ok(details: Map<String, Value>) -> Self {
        Self { success: true, details }
    }
}


#[derive(Debug, Error)]
pub enum CommandError {
    #[error("unknown command type: {0}")]
    UnknownType(String),
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("checksum mismatch: expected {expected}, got {computed}")]
    ChecksumMismatch { expected: String, computed: String },
    #[error("firmware download failed: {0}")]
    Download(String),
    #[error(transparent)]
    Downlink(#[from] DownlinkError),
    #[error(transparent)]
    Store(#[from] StoreError),
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_the_enumerated_command_table() {
        assert_eq!(CommandType::parse("valve_set"), Some(CommandType::ValveSet));
        assert_eq!(CommandType::parse("firmware_update"), Some(CommandType::FirmwareUpdate));
        assert_eq!(CommandType::parse("config_reset"), Some(CommandType::ConfigReset));

        // Sin coincidencia por substring: solo la tabla exacta.
        assert_eq!(CommandType::parse("valve"), None);
        assert_eq!(CommandType::parse("valve_set_extra"), None);
        assert_eq!(CommandType::parse("reboot"), None);
    }

    #[test]
    fn every_type_maps_to_exactly_one_family() {
        assert_eq!(CommandType::ValveOpen.family(), CommandFamily::Valve);
        assert_eq!(CommandType::ValveSet.family(), CommandFamily::Valve);
        assert_eq!(CommandType::FirmwareUpdate.family(), CommandFamily::Firmware);
        assert_eq!(CommandType::ConfigUpdate.family(), CommandFamily::Config);
    }
}
