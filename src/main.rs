use std::sync::Arc;
use tracing::{debug, info};
use crate::channels::domain::Channels;
use crate::command::logic::{start_dispatcher};
use crate::context::domain::AppContext;
use crate::system::domain::{init_tracing, System};

mod channels;
mod codec;
mod command;
mod config;
mod context;
mod database;
mod decoder;
mod downlink;
mod framing;
mod gateway;
mod payload;
mod server;
mod system;


#[tokio::main]
async fn main() {

    let system = Arc::new(System::new());
    init_tracing(&system);

    let channels = Channels::new();
    let app_context = AppContext::new(system, channels.command_to_dispatcher).await;

    start_dispatcher(channels.dispatcher_from_command, app_context.clone());
    debug!("Debug: intake de comandos listo ({} pendientes máx)",
           app_context.commands.max_capacity());

    let listener = server::logic::bind(app_context.system.tcp_port).await
        .expect("no se pudo enlazar el puerto TCP del gateway");

    info!("Info: gateway escuchando en el puerto {}", app_context.system.tcp_port);
    info!("Info: CTRL+C para detener el servicio");

    tokio::select! {
        _ = server::logic::accept_loop(listener, app_context.clone()) => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Info: señal de apagado recibida, cerrando el gateway");
        }
    }
}
