//! Definición del Contexto de Aplicación (Shared State).
//!
//! Este módulo implementa el patrón de **Estado Compartido** para aplicaciones asíncronas.
//! El `AppContext` actúa como un contenedor de "Inyección de Dependencias" manual,
//! agrupando los recursos que deben ser accesibles por múltiples tareas concurrentes
//! (almacenamiento, registro de dispositivos vivos, firmador de downlink, configuración).


use std::sync::Arc;
use tokio::sync::mpsc;
use crate::command::domain::CommandRequest;
use crate::database::domain::Store;
use crate::database::repository::Repository;
use crate::downlink::logic::Signer;
use crate::server::domain::LiveDevices;
use crate::system::domain::System;


#[derive(Clone)]
pub struct AppContext {
    pub store: Arc<dyn Store>,
    pub devices: Arc<LiveDevices>,
    pub signer: Arc<Signer>,
    /// Costura con la API de operador: el colaborador clona este extremo
    /// para someter comandos al despachador.
    pub commands: mpsc::Sender<CommandRequest>,
    pub system: Arc<System>,
}


impl AppContext {
    pub async fn new(system: Arc<System>,
                     commands: mpsc::Sender<CommandRequest>) -> Self {

        let repo = Repository::create_repository(&system.database_url).await;
        let signer = Arc::new(Signer::new(&system.downlink_secret));

        Self {
            store: Arc::new(repo),
            devices: Arc::new(LiveDevices::new()),
            signer,
            commands,
            system,
        }
    }
}
