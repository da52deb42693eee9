//! Thread dedicada do loop do cliente.
//!
//! O orquestrador roda num runtime tokio single-thread próprio. A
//! apresentação manda [`Command`]s por um canal `mpsc` e drena
//! [`ClientEvent`]s de um channel crossbeam limitado.

use crate::events::ClientEvent;
use crate::orchestrator::{Command, Orchestrator};
use crossbeam_channel::{Receiver, bounded};
use std::io;
use std::thread::JoinHandle;
use telemetry_core::ClientConfig;
use tokio::sync::mpsc;
use tracing::{error, info};

/// Capacidade da fila loop → apresentação.
pub const EVENT_QUEUE: usize = 256;

/// Handle da thread do loop.
pub struct ClientHandle {
    commands: mpsc::UnboundedSender<Command>,
    events: Receiver<ClientEvent>,
    thread: Option<JoinHandle<()>>,
}

impl ClientHandle {
    /// Enfileira um comando. Retorna `false` se o loop já terminou.
    pub fn send(&self, cmd: Command) -> bool {
        self.commands.send(cmd).is_ok()
    }

    pub fn events(&self) -> &Receiver<ClientEvent> {
        &self.events
    }

    /// Pede o encerramento e espera a thread terminar.
    pub fn shutdown(mut self) {
        let _ = self.commands.send(Command::Shutdown);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Thread do cliente terminou em pânico");
            }
        }
    }
}

/// Inicia a thread do loop. Retorna o handle para comandos e eventos.
pub fn spawn_client_thread(config: ClientConfig) -> io::Result<ClientHandle> {
    let (event_tx, event_rx) = bounded::<ClientEvent>(EVENT_QUEUE);
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();

    let thread = std::thread::Builder::new()
        .name("client-loop".into())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(e) => {
                    error!("Falha ao criar runtime do cliente: {e}");
                    return;
                }
            };

            info!("Loop do cliente iniciado");
            let orchestrator = Orchestrator::new(&config, event_tx);
            runtime.block_on(orchestrator.run(cmd_rx));
            info!("Loop do cliente encerrado");
        })?;

    Ok(ClientHandle {
        commands: cmd_tx,
        events: event_rx,
        thread: Some(thread),
    })
}
