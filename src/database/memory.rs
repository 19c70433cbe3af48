//! `Store` en memoria para los tests del pipeline, la cola y el servidor.
//!
//! El reclamo de downlink se resuelve bajo un único mutex, preservando la
//! semántica de consumidor único que en producción garantiza el bloqueo
//! con salteo de filas del almacenamiento.


use std::collections::HashMap;
use std::sync::Mutex;
use async_trait::async_trait;
use serde_json::{Map, Value};
use crate::database::domain::{Store, StoreError};
use crate::decoder::domain::ReadingRecord;
use crate::downlink::domain::{QueuedDownlink, STATUS_FAILED, STATUS_QUEUED, STATUS_SENT};


#[derive(Debug, Clone)]
struct MemDownlink {
    id: i64,
    device_id: String,
    message: Map<String, Value>,
    status: String,
    error: Option<String>,
}


#[derive(Debug, Default)]
struct Inner {
    raws: Vec<(String, String)>,
    readings: Vec<ReadingRecord>,
    downlinks: Vec<MemDownlink>,
    valve_updates: Vec<(String, Option<String>, Option<i64>)>,
    configs: HashMap<String, Option<Value>>,
    firmware_updates: Vec<(String, String, String)>,
}


#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}


impl MemoryStore {

    pub fn new() -> Self {
        Self::default()
    }

    pub fn raws(&self) -> Vec<(String, String)> {
        self.inner.lock().unwrap().raws.clone()
    }

    pub fn readings(&self) -> Vec<ReadingRecord> {
        self.inner.lock().unwrap().readings.clone()
    }

    pub fn downlink_status(&self, id: i64) -> Option<String> {
        self.inner.lock().unwrap().downlinks.iter()
            .find(|entry| entry.id == id)
            .map(|entry| entry.status.clone())
    }

    pub fn downlink_error(&self, id: i64) -> Option<String> {
        self.inner.lock().unwrap().downlinks.iter()
            .find(|entry| entry.id == id)
            .and_then(|entry| entry.error.clone())
    }

    /// Adultera un campo de un mensaje ya encolado, sin refirmarlo.
    pub fn tamper_downlink(&self, id: i64, key: &str, value: Value) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(entry) = inner.downlinks.iter_mut().find(|entry| entry.id == id) {
            entry.message.insert(key.to_string(), value);
        }
    }

    pub fn valve_updates(&self) -> Vec<(String, Option<String>, Option<i64>)> {
        self.inner.lock().unwrap().valve_updates.clone()
    }

    pub fn config(&self, device_id: &str) -> Option<Option<Value>> {
        self.inner.lock().unwrap().configs.get(device_id).cloned()
    }

    pub fn firmware_updates(&self) -> Vec<(String, String, String)> {
        self.inner.lock().unwrap().firmware_updates.clone()
    }
}


#[async_trait]
impl Store for MemoryStore {

    async fn save_raw(&self, payload: &str, client_addr: &str) -> Result<i64, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.raws.push((payload.to_string(), client_addr.to_string()));
        Ok(inner.raws.len() as i64)
    }

    async fn save_reading(&self, record: &ReadingRecord) -> Result<i64, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.readings.push(record.clone());
        Ok(inner.readings.len() as i64)
    }

    async fn enqueue_downlink(&self,
                              device_id: &str,
                              message: &Map<String, Value>,
                              _message_type: &str,
    ) -> Result<i64, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.downlinks.len() as i64 + 1;
        inner.downlinks.push(MemDownlink {
            id,
            device_id: device_id.to_string(),
            message: message.clone(),
            status: STATUS_QUEUED.to_string(),
            error: None,
        });
        Ok(id)
    }

    async fn claim_downlink(&self, device_id: &str) -> Result<Option<QueuedDownlink>, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let claimed = inner.downlinks.iter_mut()
            .filter(|entry| entry.device_id == device_id && entry.status == STATUS_QUEUED)
            .min_by_key(|entry| entry.id);

        match claimed {
            Some(entry) => {
                entry.status = STATUS_SENT.to_string();
                Ok(Some(QueuedDownlink {
                    id: entry.id,
                    device_id: entry.device_id.clone(),
                    message: entry.message.clone(),
                }))
            }
            None => Ok(None),
        }
    }

    async fn mark_downlink_failed(&self, queue_id: i64, reason: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(entry) = inner.downlinks.iter_mut().find(|entry| entry.id == queue_id) {
            entry.status = STATUS_FAILED.to_string();
            entry.error = Some(reason.to_string());
        }
        Ok(())
    }

    async fn update_valve_state(&self,
                                device_id: &str,
                                state: Option<&str>,
                                position: Option<i64>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.valve_updates.push((
            device_id.to_string(),
            state.map(str::to_string),
            position,
        ));
        Ok(())
    }

    async fn update_device_config(&self, device_id: &str, config: &Value) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.configs.insert(device_id.to_string(), Some(config.clone()));
        Ok(())
    }

    async fn clear_device_config(&self, device_id: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.configs.insert(device_id.to_string(), None);
        Ok(())
    }

    async fn insert_firmware_update(&self,
                                    device_id: &str,
                                    version: &str,
                                    status: &str,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.firmware_updates.push((
            device_id.to_string(),
            version.to_string(),
            status.to_string(),
        ));
        Ok(())
    }
}
