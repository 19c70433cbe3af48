//! Listener TCP y máquina de estados por conexión.
//!
//! Cada conexión aceptada corre en su propia tarea como una máquina de
//! estados `Reading → (Complete | TimedOut | Errored) → Closed`. El decode
//! corre inline dentro de la tarea, de modo que el timer de inactividad
//! nunca se consulta con un decode en vuelo. Un fallo de ingesta jamás
//! tumba el listener ni afecta a otras conexiones: cuesta exactamente un
//! mensaje descartado.


use std::io::ErrorKind;
use std::time::Duration;
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};
use crate::config::server::{OUTBOUND_QUEUE, READ_CHUNK_BYTES};
use crate::context::domain::AppContext;
use crate::decoder::logic::process_uplink;
use crate::downlink;
use crate::framing::domain::FrameAssembler;
use crate::server::domain::{DeviceHandle, DownlinkEnvelope, LiveDevices};


#[derive(Debug, Clone, Copy, PartialEq)]
enum ConnState {
    Reading,
    Complete,
    TimedOut,
    Errored,
    Closed,
}


/// Enlaza el listener del gateway. Un fallo de bind es un fallo de
/// arranque: se propaga para abortar el proceso.
pub async fn bind(port: u16) -> std::io::Result<TcpListener> {
    TcpListener::bind(("0.0.0.0", port)).await
}


/// Bucle de aceptación: una tarea por conexión entrante.
pub async fn accept_loop(listener: TcpListener, app_context: AppContext) {
    loop {
        match listener.accept().await {
            Ok((socket, addr)) => {
                let ctx = app_context.clone();
                tokio::spawn(async move {
                    connection_task(socket, addr.to_string(), ctx).await;
                });
            }
            Err(e) => {
                error!("Error: accept falló: {e}");
            }
        }
    }
}


/// Máquina de estados de una conexión de dispositivo.
pub async fn connection_task(socket: TcpStream, client_addr: String, ctx: AppContext) {

    info!("Info: nueva conexión de {client_addr}");

    let (mut reader, mut writer) = socket.into_split();
    let (outbound, mut rx_outbound) = mpsc::channel::<Vec<u8>>(OUTBOUND_QUEUE);

    let handle = DeviceHandle {
        client_addr: client_addr.clone(),
        outbound,
    };
    ctx.devices.register(&client_addr, &handle);

    let mut assembler = FrameAssembler::new(
        ctx.system.framing_policy(),
        ctx.system.max_frame_bytes,
    );
    let idle = Duration::from_secs(ctx.system.idle_timeout_secs);
    let mut chunk = vec![0u8; READ_CHUNK_BYTES];
    let mut registered_device: Option<String> = None;
    let mut processed_any = false;
    let mut state = ConnState::Reading;

    loop {
        match state {
            ConnState::Reading => {
                tokio::select! {
                    read = timeout(idle, reader.read(&mut chunk)) => {
                        state = match read {
                            Err(_) => ConnState::TimedOut,
                            Ok(Ok(0)) => {
                                end_of_stream(
                                    &ctx, &handle, &mut assembler,
                                    &mut registered_device, &client_addr,
                                    processed_any,
                                ).await
                            }
                            Ok(Ok(n)) => {
                                match assembler.feed(&chunk[..n]) {
                                    Ok(frames) => {
                                        let mut next = ConnState::Reading;
                                        for frame in frames {
                                            if handle_frame(&ctx, &handle, &mut registered_device,
                                                            &client_addr, &frame).await {
                                                processed_any = true;
                                            } else {
                                                next = ConnState::Closed;
                                                break;
                                            }
                                        }
                                        next
                                    }
                                    Err(e) => {
                                        error!("Error: framing con {client_addr}: {e}");
                                        ConnState::Errored
                                    }
                                }
                            }
                            Ok(Err(e)) if is_disconnect(&e) => {
                                debug!("Debug: {client_addr} se desconectó abruptamente");
                                ConnState::Closed
                            }
                            Ok(Err(e)) => {
                                error!("Error: socket con {client_addr}: {e}");
                                ConnState::Errored
                            }
                        };
                    }
                    delivery = rx_outbound.recv() => {
                        if let Some(bytes) = delivery {
                            if let Err(e) = write_frame(&mut writer, &bytes).await {
                                error!("Error: escritura de downlink a {client_addr}: {e}");
                                state = ConnState::Errored;
                            }
                        }
                    }
                }
            }

            ConnState::Complete => {
                debug!("Debug: procesamiento completo para {client_addr}");
                let _ = writer.shutdown().await;
                state = ConnState::Closed;
            }

            ConnState::TimedOut => {
                // Cierre prolijo, sin reset: una transferencia lenta pero viva
                // no debe quedar corrupta del lado del dispositivo.
                warn!("Warning: timeout de conexión para {client_addr} ({} bytes sin procesar)",
                      assembler.buffered());
                let _ = writer.shutdown().await;
                state = ConnState::Closed;
            }

            ConnState::Errored => {
                state = ConnState::Closed;
            }

            ConnState::Closed => break,
        }
    }

    // Limpieza idempotente: fuera del mapa de vivos sin importar por qué
    // estado se llegó al cierre.
    ctx.devices.release(&client_addr, &client_addr);
    if let Some(device_id) = &registered_device {
        ctx.devices.release(device_id, &client_addr);
    }
    debug!("Debug: conexión cerrada para {client_addr}");
}


/// Fin de stream: procesa el remanente del buffer y decide el estado final.
async fn end_of_stream(ctx: &AppContext,
                       handle: &DeviceHandle,
                       assembler: &mut FrameAssembler,
                       registered_device: &mut Option<String>,
                       client_addr: &str,
                       processed_any: bool,
) -> ConnState {

    match assembler.finish() {
        Some(frame) => {
            if handle_frame(ctx, handle, registered_device, client_addr, &frame).await {
                ConnState::Complete
            } else {
                ConnState::Closed
            }
        }
        None if processed_any => ConnState::Complete,
        None => {
            warn!("Warning: payload vacío de {client_addr}");
            ConnState::Closed
        }
    }
}


/// Corre el pipeline completo sobre una trama y, si el dispositivo quedó
/// identificado, lo registra y le entrega un downlink pendiente.
///
/// Devuelve `false` ante un fallo de decode o de persistencia: la conexión
/// se descarta después de loguear, el dispositivo retransmitirá según su
/// propio cronograma.
async fn handle_frame(ctx: &AppContext,
                      handle: &DeviceHandle,
                      registered_device: &mut Option<String>,
                      client_addr: &str,
                      frame: &[u8],
) -> bool {

    let Ok(text) = std::str::from_utf8(frame) else {
        error!("Error: payload de {client_addr} no es UTF-8 válido");
        return false;
    };

    let raw = text.trim();
    if raw.is_empty() {
        return true;
    }

    debug!("Debug: procesando {} bytes de {client_addr}", raw.len());

    match process_uplink(ctx.store.as_ref(), raw, client_addr).await {
        Ok(processed) => {
            debug!("Debug: uplink de {client_addr} persistido como lectura {}",
                   processed.reading_id);
            if let Some(device_id) = processed.device_id {
                if registered_device.as_deref() != Some(device_id.as_str()) {
                    ctx.devices.register(&device_id, handle);
                    *registered_device = Some(device_id.clone());
                }
                deliver_pending(ctx, handle, &device_id).await;
            }
            true
        }
        Err(e) => {
            error!("Error: procesamiento falló para {client_addr}: {e}");
            false
        }
    }
}


/// La reconexión de un dispositivo es una oportunidad de entrega: reclama
/// a lo sumo un mensaje encolado y lo empuja por el mismo socket.
async fn deliver_pending(ctx: &AppContext, handle: &DeviceHandle, device_id: &str) {

    let claimed = match downlink::logic::claim(
        ctx.store.as_ref(), &ctx.signer, device_id, true).await {
        Ok(Some(claimed)) => claimed,
        Ok(None) => return,
        Err(e) => {
            error!("Error: reclamo de downlink para {device_id}: {e}");
            return;
        }
    };

    let envelope = DownlinkEnvelope::new(Value::Object(claimed.message));
    let delivered = match envelope.to_bytes() {
        // try_send: esta tarea es también la consumidora del canal, no
        // puede bloquearse esperando su propio drenaje.
        Ok(bytes) => handle.outbound.try_send(bytes).is_ok(),
        Err(e) => {
            error!("Error: no se pudo codificar el sobre para {device_id}: {e}");
            false
        }
    };

    if delivered {
        info!("Info: downlink {} entregado a {}", claimed.id, claimed.device_id);
    } else {
        warn!("Warning: entrega de downlink {} a {device_id} falló", claimed.id);
        if let Err(e) = downlink::logic::mark_failed(
            ctx.store.as_ref(), claimed.id, "delivery_failed").await {
            error!("Error: no se pudo marcar el downlink {}: {e}", claimed.id);
        }
    }
}


/// Puente síncrono de entrega inmediata: si el dispositivo está conectado,
/// escribe el sobre de comando y devuelve `true`; si no, `false` para que
/// el llamador caiga a la cola de downlink.
pub async fn send_command(devices: &LiveDevices, device_id: &str, command: Value) -> bool {

    let Some(handle) = devices.handle(device_id) else {
        return false;
    };

    let envelope = DownlinkEnvelope::new(command);
    let bytes = match envelope.to_bytes() {
        Ok(bytes) => bytes,
        Err(e) => {
            error!("Error: no se pudo codificar el comando para {device_id}: {e}");
            return false;
        }
    };

    handle.outbound.send(bytes).await.is_ok()
}


async fn write_frame(writer: &mut OwnedWriteHalf, bytes: &[u8]) -> std::io::Result<()> {
    writer.write_all(bytes).await?;
    writer.flush().await
}


fn is_disconnect(error: &std::io::Error) -> bool {
    matches!(error.kind(), ErrorKind::ConnectionReset | ErrorKind::BrokenPipe)
}
