use tokio::sync::mpsc;
use crate::command::domain::CommandRequest;
use crate::config::commands::QUEUE;


/// Canales que conectan las tareas del sistema. El extremo de envío de
/// comandos es la costura con la API de operador (colaborador externo),
/// que lo clona desde el `AppContext`.
pub struct Channels {
    pub command_to_dispatcher: mpsc::Sender<CommandRequest>,
    pub dispatcher_from_command: mpsc::Receiver<CommandRequest>,
}


impl Channels {
    pub fn new() -> Channels {
        let (c_to_d, d_from_c) = mpsc::channel::<CommandRequest>(QUEUE);

        Self {
            command_to_dispatcher: c_to_d,
            dispatcher_from_command: d_from_c,
        }
    }
}
