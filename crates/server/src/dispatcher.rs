//! Push de snapshots para os assinantes.
//!
//! Um assinante que falha (erro ou timeout) sai do conjunto e tem a
//! conexão encerrada: um frame cortado no meio não pode seguir no stream,
//! e o cliente só volta a assinar depois de ver a queda.

use crate::state::{ConnectionHandle, ServerState};
use std::time::Duration;
use telemetry_core::protocol::encode_line;
use telemetry_core::{Message, Snapshot};
use tracing::{debug, error, warn};

/// Resultado de um broadcast.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: usize,
    pub pruned: usize,
}

/// Envia `DATA{snapshot}` a todos os assinantes.
///
/// Itera uma cópia do conjunto; quem falhar na escrita (ou estourar
/// `write_timeout`) é removido só depois da iteração.
pub async fn dispatch(
    state: &ServerState,
    snapshot: &Snapshot,
    write_timeout: Duration,
) -> DispatchReport {
    let subscribers = state.subscribers();
    if subscribers.is_empty() {
        return DispatchReport::default();
    }

    let line = match encode_line(&Message::data(snapshot.clone())) {
        Ok(line) => line,
        Err(e) => {
            error!("Erro ao serializar snapshot: {e}");
            return DispatchReport::default();
        }
    };

    let mut delivered = 0;
    let mut dead: Vec<&ConnectionHandle> = Vec::new();
    for subscriber in &subscribers {
        match tokio::time::timeout(write_timeout, subscriber.send_line(&line)).await {
            Ok(Ok(())) => delivered += 1,
            Ok(Err(e)) => {
                debug!("Push para #{} ({}) falhou: {e}", subscriber.id(), subscriber.peer());
                dead.push(subscriber);
            }
            Err(_) => {
                warn!(
                    "Push para #{} ({}) excedeu {:?}",
                    subscriber.id(),
                    subscriber.peer(),
                    write_timeout
                );
                dead.push(subscriber);
            }
        }
    }

    let ids: Vec<_> = dead.iter().map(|s| s.id()).collect();
    let pruned = state.prune(&ids);
    for subscriber in dead {
        subscriber.request_close();
    }

    DispatchReport { delivered, pruned }
}
