//! Controladores de dispositivo y tarea despachadora.
//!
//! Cada controlador valida primero sus campos requeridos (los errores
//! nombran el campo), ejecuta la acción hacia el dispositivo por el puente
//! de entrega inmediata con caída a la cola de downlink, actualiza los
//! colaboradores de estado y devuelve un resultado uniforme. Un dispositivo
//! inalcanzable no es un error: dispara el encolado.


use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tokio::sync::mpsc;
use tracing::{error, info};
use crate::config::commands::{
    FIRMWARE_CHUNK_BYTES, FIRMWARE_DOWNLOAD_TIMEOUT,
    REPORTING_INTERVAL_MAX_SECS, REPORTING_INTERVAL_MIN_SECS,
};
use crate::command::domain::{
    CommandError, CommandFamily, CommandRequest, CommandType, DispatchOutcome,
};
use crate::context::domain::AppContext;
use crate::downlink;
use crate::server::logic::send_command;


/// Bucle de la tarea despachadora: consume pedidos del canal de comandos y
/// responde cada uno por su oneshot.
pub async fn dispatcher_task(mut rx: mpsc::Receiver<CommandRequest>, ctx: AppContext) {

    info!("Info: despachador de comandos iniciado");

    while let Some(request) = rx.recv().await {
        let CommandRequest { device_id, command, respond_to } = request;

        let result = dispatch(&ctx, &device_id, command).await;
        if let Err(e) = &result {
            error!("Error: comando para {device_id} falló: {e}");
        }
        let _ = respond_to.send(result);
    }

    info!("Info: despachador de comandos finalizado");
}


pub fn start_dispatcher(rx_from_command: mpsc::Receiver<CommandRequest>,
                        ctx: AppContext) {

    tokio::spawn(async move {
        dispatcher_task(rx_from_command, ctx).await;
    });
}


/// Enruta un comando por su tipo declarado a exactamente un controlador.
///
/// # Errores
/// * `MissingField("type")`: el comando no declara tipo.
/// * `UnknownType`: tipo fuera de la tabla enumerada; falla antes de que
///   corra ningún controlador.
pub async fn dispatch(ctx: &AppContext,
                      device_id: &str,
                      command: Map<String, Value>,
) -> Result<DispatchOutcome, CommandError> {

    let raw_type = command.get("type")
        .and_then(Value::as_str)
        .ok_or(CommandError::MissingField("type"))?;

    let Some(kind) = CommandType::parse(raw_type) else {
        return Err(CommandError::UnknownType(raw_type.to_string()));
    };

    info!("Info: ejecutando {} para {device_id}", kind.as_str());

    match kind.family() {
        CommandFamily::Valve => valve_command(ctx, device_id, kind, &command).await,
        CommandFamily::Firmware => firmware_update(ctx, device_id, &command).await,
        CommandFamily::Config => config_command(ctx, device_id, kind, &command).await,
    }
}


/// Entrega inmediata si el dispositivo está conectado; si no, encola el
/// mensaje firmado. Devuelve si la entrega fue directa.
async fn deliver_or_enqueue(ctx: &AppContext,
                            device_id: &str,
                            payload: Map<String, Value>,
) -> Result<bool, CommandError> {

    if send_command(&ctx.devices, device_id, Value::Object(payload.clone())).await {
        return Ok(true);
    }

    downlink::logic::enqueue(ctx.store.as_ref(), &ctx.signer, device_id, payload, true).await?;
    Ok(false)
}


fn outcome_details(delivered: bool) -> Map<String, Value> {
    let mut details = Map::new();
    details.insert("delivered".to_string(), Value::Bool(delivered));
    details.insert("queued".to_string(), Value::Bool(!delivered));
    details
}


async fn valve_command(ctx: &AppContext,
                       device_id: &str,
                       kind: CommandType,
                       command: &Map<String, Value>,
) -> Result<DispatchOutcome, CommandError> {

    let mut payload = Map::new();
    payload.insert("type".to_string(), Value::String(kind.as_str().to_string()));

    let (state, position) = match kind {
        CommandType::ValveOpen => {
            payload.insert("valve".to_string(), Value::String("open".to_string()));
            (Some("open"), None)
        }
        CommandType::ValveClose => {
            payload.insert("valve".to_string(), Value::String("close".to_string()));
            (Some("closed"), None)
        }
        _ => {
            let requested = command.get("position")
                .and_then(Value::as_i64)
                .ok_or(CommandError::MissingField("position"))?;
            let position = requested.clamp(0, 100);
            payload.insert("valve".to_string(), Value::String("set".to_string()));
            payload.insert("position".to_string(), Value::Number(position.into()));
            (None, Some(position))
        }
    };

    let delivered = deliver_or_enqueue(ctx, device_id, payload).await?;
    ctx.store.update_valve_state(device_id, state, position).await?;

    let mut details = outcome_details(delivered);
    if let Some(position) = position {
        details.insert("position".to_string(), Value::Number(position.into()));
    }
    Ok(DispatchOutcome::ok(details))
}


async fn firmware_update(ctx: &AppContext,
                         device_id: &str,
                         command: &Map<String, Value>,
) -> Result<DispatchOutcome, CommandError> {

    let version = command.get("version")
        .and_then(Value::as_str)
        .ok_or(CommandError::MissingField("version"))?;
    let url = command.get("url")
        .and_then(Value::as_str)
        .ok_or(CommandError::MissingField("url"))?;

    let firmware = download_firmware(url).await?;

    // La verificación corre antes de cualquier escritura hacia el
    // dispositivo: una imagen corrupta no llega a iniciar nada.
    if let Some(expected) = command.get("checksum").and_then(Value::as_str) {
        verify_checksum(&firmware, expected)?;
    }

    let chunks = firmware.len().div_ceil(FIRMWARE_CHUNK_BYTES);

    let mut payload = Map::new();
    payload.insert("type".to_string(), Value::String("firmware_update".to_string()));
    payload.insert("size".to_string(), Value::Number((firmware.len() as i64).into()));
    payload.insert("chunks".to_string(), Value::Number((chunks as i64).into()));

    let delivered = deliver_or_enqueue(ctx, device_id, payload).await?;
    ctx.store.insert_firmware_update(device_id, version, "initiated").await?;

    let mut details = outcome_details(delivered);
    details.insert("chunks".to_string(), Value::Number((chunks as i64).into()));
    Ok(DispatchOutcome::ok(details))
}


async fn config_command(ctx: &AppContext,
                        device_id: &str,
                        kind: CommandType,
                        command: &Map<String, Value>,
) -> Result<DispatchOutcome, CommandError> {

    let mut payload = Map::new();
    payload.insert("type".to_string(), Value::String(kind.as_str().to_string()));

    let delivered = match kind {
        CommandType::ConfigReset => {
            let delivered = deliver_or_enqueue(ctx, device_id, payload).await?;
            ctx.store.clear_device_config(device_id).await?;
            delivered
        }
        _ => {
            let parameters = command.get("parameters")
                .and_then(Value::as_object)
                .ok_or(CommandError::MissingField("parameters"))?;
            let parameters = validate_parameters(parameters);

            payload.insert("parameters".to_string(), Value::Object(parameters.clone()));
            let delivered = deliver_or_enqueue(ctx, device_id, payload).await?;
            ctx.store.update_device_config(device_id, &Value::Object(parameters)).await?;
            delivered
        }
    };

    Ok(DispatchOutcome::ok(outcome_details(delivered)))
}


/// Filtra los parámetros de configuración aceptados; lo desconocido se
/// descarta en lugar de reenviarse a ciegas al dispositivo.
fn validate_parameters(parameters: &Map<String, Value>) -> Map<String, Value> {
    let mut valid = Map::new();

    if let Some(interval) = parameters.get("reporting_interval").and_then(Value::as_i64) {
        let interval = interval.clamp(REPORTING_INTERVAL_MIN_SECS, REPORTING_INTERVAL_MAX_SECS);
        valid.insert("reporting_interval".to_string(), Value::Number(interval.into()));
    }

    valid
}


async fn download_firmware(url: &str) -> Result<Vec<u8>, CommandError> {
    let client = reqwest::Client::builder()
        .timeout(FIRMWARE_DOWNLOAD_TIMEOUT)
        .build()
        .map_err(|e| CommandError::Download(e.to_string()))?;

    let response = client.get(url)
        .send()
        .await
        .and_then(|response| response.error_for_status())
        .map_err(|e| CommandError::Download(e.to_string()))?;

    let bytes = response.bytes()
        .await
        .map_err(|e| CommandError::Download(e.to_string()))?;

    Ok(bytes.to_vec())
}


/// Compara el digest SHA-256 del contenido descargado con el declarado.
fn verify_checksum(firmware: &[u8], expected: &str) -> Result<(), CommandError> {
    let computed = hex::encode(Sha256::digest(firmware));
    if !computed.eq_ignore_ascii_case(expected) {
        return Err(CommandError::ChecksumMismatch {
            expected: expected.to_string(),
            computed,
        });
    }
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;
    use crate::channels::domain::Channels;
    use crate::codec::logic::decode_binary_map;
    use crate::database::memory::MemoryStore;
    use crate::downlink::domain::STATUS_QUEUED;
    use crate::downlink::logic::Signer;
    use crate::server::domain::{DeviceHandle, LiveDevices};
    use crate::system::domain::System;

    fn test_ctx() -> (AppContext, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let (commands, _rx) = mpsc::channel(8);
        let ctx = AppContext {
            store: store.clone(),
            devices: Arc::new(LiveDevices::new()),
            signer: Arc::new(Signer::new("secreto-de-prueba")),
            commands,
            system: Arc::new(System {
                database_url: String::new(),
                downlink_secret: "secreto-de-prueba".to_string(),
                tcp_port: 0,
                framing_mode: "delimiter".to_string(),
                idle_timeout_secs: 30,
                max_frame_bytes: 64 * 1024,
                environment: "test".to_string(),
                rust_log: "debug".to_string(),
            }),
        };
        (ctx, store)
    }

    fn command(entries: Vec<(&str, Value)>) -> Map<String, Value> {
        entries.into_iter()
            .map(|(key, value)| (key.to_string(), value))
            .collect()
    }

    /// Mini servidor HTTP de un solo uso para la descarga de firmware.
    async fn serve_firmware(body: &'static [u8]) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            if let Ok((mut socket, _)) = listener.accept().await {
                let mut request = [0u8; 1024];
                let _ = socket.read(&mut request).await;
                let head = format!(
                    "HTTP/1.1 200 OK\r\ncontent-length: {}\r\nconnection: close\r\n\r\n",
                    body.len(),
                );
                let _ = socket.write_all(head.as_bytes()).await;
                let _ = socket.write_all(body).await;
                let _ = socket.shutdown().await;
            }
        });

        format!("http://{addr}/firmware.bin")
    }

    #[tokio::test]
    async fn unknown_type_fails_before_any_controller_runs() {
        let (ctx, store) = test_ctx();

        let result = dispatch(&ctx, "D1", command(vec![("type", json!("reboot"))])).await;

        assert!(matches!(result, Err(CommandError::UnknownType(t)) if t == "reboot"));
        assert!(store.valve_updates().is_empty());
        assert!(store.downlink_status(1).is_none());
    }

    #[tokio::test]
    async fn missing_type_names_the_field() {
        let (ctx, _store) = test_ctx();
        let result = dispatch(&ctx, "D1", command(vec![("position", json!(50))])).await;
        assert!(matches!(result, Err(CommandError::MissingField("type"))));
    }

    #[tokio::test]
    async fn valve_set_clamps_the_position_before_dispatch() {
        let (ctx, store) = test_ctx();

        let outcome = dispatch(&ctx, "D1", command(vec![
            ("type", json!("valve_set")),
            ("position", json!(150)),
        ])).await.unwrap();

        assert!(outcome.success);
        assert_eq!(outcome.details["position"], json!(100));
        assert_eq!(outcome.details["queued"], json!(true));
        assert_eq!(store.valve_updates(), vec![("D1".to_string(), None, Some(100))]);

        // Dispositivo desconectado: el comando quedó firmado en la cola.
        assert_eq!(store.downlink_status(1).as_deref(), Some(STATUS_QUEUED));
    }

    #[tokio::test]
    async fn valve_set_requires_the_position_field() {
        let (ctx, _store) = test_ctx();
        let result = dispatch(&ctx, "D1", command(vec![("type", json!("valve_set"))])).await;
        assert!(matches!(result, Err(CommandError::MissingField("position"))));
    }

    #[tokio::test]
    async fn valve_open_delivers_directly_to_a_connected_device() {
        let (ctx, store) = test_ctx();

        let (outbound, mut rx) = mpsc::channel(4);
        ctx.devices.register("D1", &DeviceHandle {
            client_addr: "10.0.0.9:5000".to_string(),
            outbound,
        });

        let outcome = dispatch(&ctx, "D1", command(vec![
            ("type", json!("valve_open")),
        ])).await.unwrap();

        assert_eq!(outcome.details["delivered"], json!(true));
        assert_eq!(store.valve_updates(),
                   vec![("D1".to_string(), Some("open".to_string()), None)]);

        let envelope = decode_binary_map(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(envelope["command"]["type"], json!("valve_open"));
        assert_eq!(envelope["command"]["valve"], json!("open"));
        assert_eq!(envelope["ackRequired"], json!(true));
    }

    #[tokio::test]
    async fn checksum_mismatch_fails_before_any_device_write() {
        let (ctx, store) = test_ctx();
        let url = serve_firmware(b"firmware-image-v2").await;

        let result = dispatch(&ctx, "D1", command(vec![
            ("type", json!("firmware_update")),
            ("version", json!("2.0.0")),
            ("url", json!(url)),
            ("checksum", json!("deadbeef")),
        ])).await;

        match result {
            Err(CommandError::ChecksumMismatch { expected, computed }) => {
                assert_eq!(expected, "deadbeef");
                assert_eq!(computed, hex::encode(Sha256::digest(b"firmware-image-v2")));
            }
            other => panic!("se esperaba ChecksumMismatch, se obtuvo {other:?}"),
        }

        // Nada llegó al dispositivo ni a los colaboradores de estado.
        assert!(store.firmware_updates().is_empty());
        assert!(store.downlink_status(1).is_none());
    }

    #[tokio::test]
    async fn firmware_update_computes_chunks_and_records_the_attempt() {
        let (ctx, store) = test_ctx();
        let body: &'static [u8] = b"firmware-image-v2";
        let url = serve_firmware(body).await;
        let checksum = hex::encode(Sha256::digest(body));

        let outcome = dispatch(&ctx, "D1", command(vec![
            ("type", json!("firmware_update")),
            ("version", json!("2.0.0")),
            ("url", json!(url)),
            ("checksum", json!(checksum)),
        ])).await.unwrap();

        assert_eq!(outcome.details["chunks"], json!(1));
        assert_eq!(outcome.details["queued"], json!(true));
        assert_eq!(store.firmware_updates(),
                   vec![("D1".to_string(), "2.0.0".to_string(), "initiated".to_string())]);
        assert_eq!(store.downlink_status(1).as_deref(), Some(STATUS_QUEUED));
    }

    #[tokio::test]
    async fn firmware_update_requires_version_and_url() {
        let (ctx, _store) = test_ctx();

        let result = dispatch(&ctx, "D1", command(vec![
            ("type", json!("firmware_update")),
            ("url", json!("http://example.invalid/fw.bin")),
        ])).await;
        assert!(matches!(result, Err(CommandError::MissingField("version"))));

        let result = dispatch(&ctx, "D1", command(vec![
            ("type", json!("firmware_update")),
            ("version", json!("2.0.0")),
        ])).await;
        assert!(matches!(result, Err(CommandError::MissingField("url"))));
    }

    #[tokio::test]
    async fn config_update_clamps_and_filters_parameters() {
        let (ctx, store) = test_ctx();

        let outcome = dispatch(&ctx, "D1", command(vec![
            ("type", json!("config_update")),
            ("parameters", json!({"reporting_interval": 30, "desconocido": "x"})),
        ])).await.unwrap();

        assert!(outcome.success);
        let stored = store.config("D1").unwrap().unwrap();
        assert_eq!(stored, json!({"reporting_interval": 60}));
    }

    #[tokio::test]
    async fn config_reset_clears_the_stored_configuration() {
        let (ctx, store) = test_ctx();

        dispatch(&ctx, "D1", command(vec![
            ("type", json!("config_update")),
            ("parameters", json!({"reporting_interval": 600})),
        ])).await.unwrap();

        dispatch(&ctx, "D1", command(vec![
            ("type", json!("config_reset")),
        ])).await.unwrap();

        assert_eq!(store.config("D1"), Some(None));
    }

    #[tokio::test]
    async fn dispatcher_task_answers_through_the_command_channel() {
        let channels = Channels::new();
        let (mut ctx, _store) = test_ctx();
        ctx.commands = channels.command_to_dispatcher.clone();

        start_dispatcher(channels.dispatcher_from_command, ctx.clone());

        let (respond_to, response) = oneshot::channel();
        ctx.commands.send(CommandRequest {
            device_id: "D1".to_string(),
            command: command(vec![("type", json!("valve_close"))]),
            respond_to,
        }).await.unwrap();

        let outcome = response.await.unwrap().unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.details["queued"], json!(true));
    }
}
