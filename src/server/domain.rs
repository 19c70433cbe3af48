//! Dominio del gestor de conexiones.
//!
//! El registro de dispositivos vivos es el único lugar que sabe si un
//! dispositivo es alcanzable ahora mismo. Entradas agregadas al aceptar la
//! conexión (por dirección) y tras la primera decodificación exitosa (por
//! identificador de dispositivo); removidas incondicionalmente al cerrar.


use chrono::Utc;
use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use crate::codec::logic::{encode_binary_map, CodecError};


/// Extremo de escritura hacia el socket de una conexión viva.
#[derive(Debug, Clone)]
pub struct DeviceHandle {
    /// Dirección `ip:puerto` de la conexión dueña del handle. Se usa para
    /// que la limpieza no borre la entrada de una reconexión más nueva.
    pub client_addr: String,
    pub outbound: mpsc::Sender<Vec<u8>>,
}


/// Registro explícito de conexiones vivas, creado al arrancar el listener
/// y desmontado con el proceso.
#[derive(Debug, Default)]
pub struct LiveDevices {
    connections: DashMap<String, DeviceHandle>,
}


impl LiveDevices {

    pub fn new() -> Self {
        Self::default()
    }

    /// Registra (o reemplaza) la entrada; una reconexión rápida del mismo
    /// dispositivo simplemente queda con el socket más reciente.
    pub fn register(&self, key: &str, handle: &DeviceHandle) {
        self.connections.insert(key.to_string(), handle.clone());
    }

    /// Remueve la entrada solo si todavía apunta a la conexión que cierra.
    pub fn release(&self, key: &str, client_addr: &str) {
        self.connections.remove_if(key, |_, handle| handle.client_addr == client_addr);
    }

    pub fn handle(&self, key: &str) -> Option<DeviceHandle> {
        self.connections.get(key).map(|entry| entry.value().clone())
    }
}


/// Sobre de comandos hacia el dispositivo, codificado como mapa binario
/// antes de escribirlo al socket.
#[derive(Debug, Clone, Serialize)]
pub struct DownlinkEnvelope {
    pub timestamp: i64,
    pub command: Value,
    #[serde(rename = "ackRequired")]
    pub ack_required: bool,
}


impl DownlinkEnvelope {

    pub fn new(command: Value) -> Self {
        Self {
            timestamp: Utc::now().timestamp(),
            command,
            ack_required: true,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => encode_binary_map(&map),
            _ => Err(CodecError::NotAMap),
        }
    }
}
