//! Eventos observáveis do cliente.
//!
//! Tudo que o loop quer mostrar passa por um único callback
//! `(categoria, payload)`. O loop nunca toca em estado de apresentação.

use crate::peer::PeerId;
use crossbeam_channel::{Sender, TrySendError};
use std::fmt;
use tracing::debug;

/// `log` para mensagens de texto; a tag do peer para dados recebidos.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Log,
    Peer(PeerId),
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Category::Log => f.write_str("log"),
            Category::Peer(peer) => f.write_str(peer.tag()),
        }
    }
}

/// Evento entregue à apresentação. Para peers o payload é o snapshot em
/// JSON; a formatação humana fica do lado de quem consome.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientEvent {
    pub category: Category,
    pub payload: String,
}

/// Destino dos eventos. Chamado na thread do loop.
pub trait EventSink: Send + 'static {
    fn emit(&self, category: Category, payload: String);
}

impl EventSink for Sender<ClientEvent> {
    fn emit(&self, category: Category, payload: String) {
        // Non-blocking: se a apresentação está lenta, descarta o evento
        match self.try_send(ClientEvent { category, payload }) {
            Ok(()) => {}
            Err(TrySendError::Full(ev)) => {
                debug!("Channel cheio, descartando evento {}", ev.category);
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;

    #[test]
    fn category_display() {
        assert_eq!(Category::Log.to_string(), "log");
        assert_eq!(Category::Peer(PeerId::Server1).to_string(), "server1");
    }

    #[test]
    fn full_channel_drops_instead_of_blocking() {
        let (tx, rx) = bounded::<ClientEvent>(1);
        tx.emit(Category::Log, "a".into());
        tx.emit(Category::Log, "b".into());
        assert_eq!(rx.len(), 1);
        assert_eq!(rx.recv().unwrap().payload, "a");
    }

    #[test]
    fn closed_channel_is_ignored() {
        let (tx, rx) = bounded::<ClientEvent>(1);
        drop(rx);
        tx.emit(Category::Log, "ninguém ouvindo".into());
    }
}
