//! Estado compartilhado de uma instância de servidor.
//!
//! Um único `Mutex` protege o snapshot atual e o conjunto de assinantes.
//! O lock só é mantido durante comparação/troca e mutação do conjunto;
//! nenhuma escrita de rede acontece com ele travado.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use telemetry_core::protocol::{ProtocolError, write_message};
use telemetry_core::{Message, Snapshot};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{MutexGuard, Notify};

/// Identificador sequencial de conexão.
pub type ConnId = u64;

/// Lado de escrita de uma conexão, apagado para facilitar testes.
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Handle de uma conexão aceita. Clonar compartilha o mesmo writer.
///
/// O writer fica atrás de um mutex assíncrono próprio: sessão e dispatcher
/// escrevem frames inteiros, um de cada vez.
#[derive(Clone)]
pub struct ConnectionHandle {
    id: ConnId,
    peer: Arc<str>,
    writer: Arc<tokio::sync::Mutex<BoxedWriter>>,
    /// Pedido de encerramento vindo de fora da sessão (ex.: push falhou).
    close: Arc<Notify>,
}

impl ConnectionHandle {
    pub fn new<W>(id: ConnId, peer: &str, writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            id,
            peer: Arc::from(peer),
            writer: Arc::new(tokio::sync::Mutex::new(Box::new(writer))),
            close: Arc::new(Notify::new()),
        }
    }

    pub fn id(&self) -> ConnId {
        self.id
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Trava o writer para escrever uma sequência de frames sem intercalação.
    pub async fn lock(&self) -> MutexGuard<'_, BoxedWriter> {
        self.writer.lock().await
    }

    pub async fn send(&self, msg: &Message) -> Result<(), ProtocolError> {
        let mut writer = self.writer.lock().await;
        write_message(&mut *writer, msg).await
    }

    /// Escreve uma linha já codificada.
    pub async fn send_line(&self, line: &[u8]) -> std::io::Result<()> {
        let mut writer = self.writer.lock().await;
        writer.write_all(line).await?;
        writer.flush().await
    }

    /// Pede que a sessão dona desta conexão encerre. O pedido fica
    /// guardado se a sessão ainda não estiver esperando.
    pub fn request_close(&self) {
        self.close.notify_one();
    }

    /// Completa quando alguém chamou [`request_close`](Self::request_close).
    pub async fn close_requested(&self) {
        self.close.notified().await;
    }

    /// Fecha o lado de escrita. Erros são ignorados.
    pub async fn shutdown(&self) {
        let mut writer = self.writer.lock().await;
        let _ = writer.shutdown().await;
    }
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .finish()
    }
}

#[derive(Default)]
struct Shared {
    current: Option<Snapshot>,
    subscribers: HashMap<ConnId, ConnectionHandle>,
}

/// Snapshot atual + assinantes de push.
#[derive(Default)]
pub struct ServerState {
    inner: Mutex<Shared>,
}

impl ServerState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<Snapshot> {
        self.inner.lock().current.clone()
    }

    /// Compara (sem `ts`) e substitui o snapshot atual numa única seção
    /// crítica. A troca acontece sempre; retorna se os dados mudaram.
    pub fn replace_current(&self, snapshot: Snapshot) -> bool {
        let mut shared = self.inner.lock();
        let changed = shared.current.as_ref() != Some(&snapshot);
        shared.current = Some(snapshot);
        changed
    }

    /// Inclui a conexão no conjunto de assinantes e devolve o snapshot atual
    /// lido na mesma seção crítica.
    pub fn subscribe(&self, handle: ConnectionHandle) -> Option<Snapshot> {
        let mut shared = self.inner.lock();
        shared.subscribers.insert(handle.id(), handle);
        shared.current.clone()
    }

    /// Remove a conexão; retorna se ela era assinante.
    pub fn unsubscribe(&self, id: ConnId) -> bool {
        self.inner.lock().subscribers.remove(&id).is_some()
    }

    /// Cópia do conjunto de assinantes, para iterar sem o lock.
    pub fn subscribers(&self) -> Vec<ConnectionHandle> {
        self.inner.lock().subscribers.values().cloned().collect()
    }

    /// Remove assinantes que falharam. Retorna quantos saíram.
    pub fn prune(&self, ids: &[ConnId]) -> usize {
        if ids.is_empty() {
            return 0;
        }
        let mut shared = self.inner.lock();
        ids.iter()
            .filter(|id| shared.subscribers.remove(*id).is_some())
            .count()
    }

    #[cfg(test)]
    pub fn is_subscribed(&self, id: ConnId) -> bool {
        self.inner.lock().subscribers.contains_key(&id)
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().subscribers.len()
    }
}
