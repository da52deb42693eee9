//! Sessão de um cliente conectado.
//!
//! `Open → (REGISTER | UNREGISTER | POLL | outro)* → Closed`
//!
//! - `REGISTER`: entra nos assinantes; se já há snapshot, envia `DATA`
//!   de catch-up; sempre responde `ACK{"REGISTERED"}`
//! - `UNREGISTER`: sai dos assinantes; `ACK{"UNREGISTERED"}`
//! - `POLL`: envia `DATA` só se o snapshot atual difere do último enviado
//!   a esta conexão
//! - qualquer outro tipo: `ACK{"UNKNOWN"}`

use crate::state::{ConnectionHandle, ServerState};
use std::sync::Arc;
use telemetry_core::protocol::{
    ACK_REGISTERED, ACK_UNKNOWN, ACK_UNREGISTERED, ProtocolError, write_message,
};
use telemetry_core::{FrameReader, LogSink, Message, Snapshot};
use tokio::io::AsyncBufRead;
use tracing::{debug, info};

pub struct Session {
    handle: ConnectionHandle,
    state: Arc<ServerState>,
    sink: LogSink,
    /// Último snapshot entregue via POLL ou catch-up (dedup do POLL).
    last_sent: Option<Snapshot>,
}

impl Session {
    pub fn new(handle: ConnectionHandle, state: Arc<ServerState>, sink: LogSink) -> Self {
        Self {
            handle,
            state,
            sink,
            last_sent: None,
        }
    }

    /// Processa comandos até EOF, erro de transporte ou pedido de
    /// encerramento (push que falhou) e então fecha.
    pub async fn run<R: AsyncBufRead + Unpin>(mut self, mut reader: FrameReader<R>) {
        loop {
            let next = tokio::select! {
                next = reader.next_message() => next,
                _ = self.handle.close_requested() => {
                    debug!("Cliente #{}: encerrado após falha de push", self.handle.id());
                    break;
                }
            };
            match next {
                Ok(Some(msg)) => {
                    if let Err(e) = self.handle_message(msg).await {
                        debug!("Cliente #{}: falha de escrita: {e}", self.handle.id());
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    debug!("Cliente #{}: erro de leitura: {e}", self.handle.id());
                    break;
                }
            }
        }

        self.close().await;
    }

    pub async fn handle_message(&mut self, msg: Message) -> Result<(), ProtocolError> {
        match msg {
            Message::Register => self.on_register().await,
            Message::Unregister => {
                self.state.unsubscribe(self.handle.id());
                info!("Cliente #{} cancelou a assinatura", self.handle.id());
                self.handle.send(&Message::ack(ACK_UNREGISTERED)).await
            }
            Message::Poll => self.on_poll().await,
            other => {
                debug!("Cliente #{}: comando {} sem handler", self.handle.id(), other.kind());
                self.handle.send(&Message::ack(ACK_UNKNOWN)).await
            }
        }
    }

    async fn on_register(&mut self) -> Result<(), ProtocolError> {
        // O writer é travado antes de entrar nos assinantes: um push do
        // monitor para esta conexão só sai depois do catch-up e do ACK.
        let mut out = self.handle.lock().await;
        let current = self.state.subscribe(self.handle.clone());

        if let Some(snapshot) = current {
            write_message(&mut *out, &Message::data(snapshot.clone())).await?;
            self.last_sent = Some(snapshot);
        }
        write_message(&mut *out, &Message::ack(ACK_REGISTERED)).await?;

        info!(
            "Cliente #{} assinou push ({} assinantes)",
            self.handle.id(),
            self.state.subscriber_count()
        );
        Ok(())
    }

    async fn on_poll(&mut self) -> Result<(), ProtocolError> {
        let Some(current) = self.state.current() else {
            return Ok(());
        };
        if self.last_sent.as_ref() == Some(&current) {
            return Ok(());
        }

        self.handle.send(&Message::data(current.clone())).await?;
        self.last_sent = Some(current);
        Ok(())
    }

    /// Limpeza best-effort: sai dos assinantes e fecha o socket.
    async fn close(self) {
        self.state.unsubscribe(self.handle.id());
        self.handle.shutdown().await;

        info!("Cliente #{} desconectou ({})", self.handle.id(), self.handle.peer());
        self.sink
            .info(format!("Client disconnected {}", self.handle.peer()));
    }
}
