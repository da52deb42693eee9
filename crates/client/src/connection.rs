//! Gerenciador de conexão de um peer.
//!
//! Um supervisor por peer: conecta, reenvia `REGISTER` se a assinatura
//! estiver ativa, lê frames até cair e tenta de novo após um backoff
//! constante. Tudo que acontece vira um [`LinkEvent`] para o orquestrador,
//! marcado com a época da tarefa; eventos de épocas antigas são ignorados
//! por quem recebe.

use crate::peer::{PeerId, Targets};
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use telemetry_core::protocol::{ProtocolError, write_message};
use telemetry_core::{FrameReader, Message, PeerAddr, Snapshot};
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::debug;

/// Tempo máximo para um envio de comando.
pub const SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Lado de escrita compartilhado entre supervisor e orquestrador.
pub type PeerWriter = Arc<tokio::sync::Mutex<OwnedWriteHalf>>;

#[derive(Debug)]
pub struct LinkEvent {
    pub peer: PeerId,
    pub epoch: u64,
    pub kind: LinkEventKind,
}

#[derive(Debug)]
pub enum LinkEventKind {
    Connecting(PeerAddr),
    ConnectFailed { addr: PeerAddr, error: String },
    Connected { addr: PeerAddr, writer: PeerWriter },
    Data(Snapshot),
    Ack(String),
    Disconnected(String),
}

/// O que um supervisor compartilha com o orquestrador.
#[derive(Clone)]
pub struct LinkContext {
    pub targets: watch::Receiver<Targets>,
    /// Flag global de assinatura (vale para os dois peers).
    pub registered: Arc<AtomicBool>,
    /// Flag de parada do processo: encerra as tentativas de reconexão.
    pub stop: Arc<AtomicBool>,
    pub backoff: Duration,
    pub events: mpsc::UnboundedSender<LinkEvent>,
}

pub struct ConnectionManager {
    peer: PeerId,
    epoch: u64,
    ctx: LinkContext,
}

impl ConnectionManager {
    pub fn new(peer: PeerId, epoch: u64, ctx: LinkContext) -> Self {
        Self { peer, epoch, ctx }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Loop supervisor: conecta, atende e reconecta até a parada.
    pub async fn run(self) {
        while !self.stopped() {
            let addr = self.ctx.targets.borrow().get(self.peer).clone();
            self.emit(LinkEventKind::Connecting(addr.clone()));

            match TcpStream::connect((addr.host.as_str(), addr.port)).await {
                Ok(stream) => {
                    let reason = self.serve(stream, &addr).await;
                    self.emit(LinkEventKind::Disconnected(reason));
                }
                Err(e) => {
                    self.emit(LinkEventKind::ConnectFailed {
                        addr,
                        error: e.to_string(),
                    });
                }
            }

            if self.stopped() {
                break;
            }
            tokio::time::sleep(self.ctx.backoff).await;
        }
        debug!("{}: supervisor da época {} encerrado", self.peer, self.epoch);
    }

    /// Atende uma conexão aberta até EOF ou erro. Retorna o motivo da queda.
    async fn serve(&self, stream: TcpStream, addr: &PeerAddr) -> String {
        let (read_half, write_half) = stream.into_split();
        let writer: PeerWriter = Arc::new(tokio::sync::Mutex::new(write_half));

        // REGISTER sai antes de o link ser anunciado como conectado.
        if self.ctx.registered.load(Ordering::SeqCst) {
            if let Err(e) = send_message(&writer, &Message::Register).await {
                return format!("falha ao reenviar REGISTER: {e}");
            }
        }

        self.emit(LinkEventKind::Connected {
            addr: addr.clone(),
            writer: writer.clone(),
        });

        let reason = self.read_loop(read_half).await;
        let _ = writer.lock().await.shutdown().await;
        reason
    }

    async fn read_loop(&self, read_half: OwnedReadHalf) -> String {
        let mut reader = FrameReader::new(BufReader::new(read_half));
        loop {
            match reader.next_message().await {
                Ok(Some(Message::Data { payload })) => self.emit(LinkEventKind::Data(payload)),
                Ok(Some(Message::Ack { message })) => self.emit(LinkEventKind::Ack(message)),
                Ok(Some(other)) => {
                    debug!("{}: ignorando {} do servidor", self.peer, other.kind());
                }
                Ok(None) => return "conexão encerrada pelo servidor".into(),
                Err(e) => return e.to_string(),
            }
        }
    }

    fn emit(&self, kind: LinkEventKind) {
        let _ = self.ctx.events.send(LinkEvent {
            peer: self.peer,
            epoch: self.epoch,
            kind,
        });
    }

    fn stopped(&self) -> bool {
        self.ctx.stop.load(Ordering::SeqCst) || self.ctx.events.is_closed()
    }
}

/// Envia um comando com limite de tempo. Best-effort para quem chama.
pub async fn send_message(writer: &PeerWriter, msg: &Message) -> Result<(), ProtocolError> {
    let send = async {
        let mut w = writer.lock().await;
        write_message(&mut *w, msg).await
    };
    match tokio::time::timeout(SEND_TIMEOUT, send).await {
        Ok(result) => result,
        Err(_) => Err(ProtocolError::Io(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("envio de {} excedeu {SEND_TIMEOUT:?}", msg.kind()),
        ))),
    }
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────
