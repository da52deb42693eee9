//! Orquestrador do cliente.
//!
//! Dono do estado dos dois peers. Coordena os supervisores de conexão, o
//! timer de auto-poll e a alternância de assinatura; publica tudo que é
//! observável por um [`EventSink`].
//!
//! Roda inteiro numa única task: comandos da apresentação chegam por um
//! canal `mpsc`, eventos dos supervisores por outro. Cada supervisor nasce
//! com uma época; um `Disconnect` troca a época do peer, e o que ainda vier
//! da tarefa antiga é descartado.

use crate::connection::{
    ConnectionManager, LinkContext, LinkEvent, LinkEventKind, PeerWriter, send_message,
};
use crate::events::{Category, EventSink};
use crate::peer::{LinkStatus, PeerId, Targets};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use telemetry_core::{ClientConfig, Message, PeerAddr};
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

/// Intervalo mínimo de auto-poll.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Comandos vindos da apresentação.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Connect(PeerId),
    ConnectAll,
    Disconnect(PeerId),
    ToggleRegistration,
    SetAutoPoll(bool),
    /// Novos alvos e intervalo. Só valem para as próximas conexões.
    ApplySettings {
        server1: PeerAddr,
        server2: PeerAddr,
        poll_interval: Duration,
    },
    Shutdown,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OrchestratorError {
    #[error("nem todos os servidores estão conectados")]
    NotAllPeersConnected,

    #[error("nenhum servidor aceitou o comando")]
    NoPeerAccepted,
}

#[derive(Default)]
struct PeerLink {
    status: LinkStatus,
    epoch: u64,
    writer: Option<PeerWriter>,
    task: Option<JoinHandle<()>>,
}

pub struct Orchestrator<E> {
    sink: E,
    links: [PeerLink; 2],
    registered: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
    auto_poll: bool,
    poll_interval: Duration,
    next_poll: Instant,
    backoff: Duration,
    targets: watch::Sender<Targets>,
    link_tx: mpsc::UnboundedSender<LinkEvent>,
    link_rx: mpsc::UnboundedReceiver<LinkEvent>,
    next_epoch: u64,
}

impl<E: EventSink> Orchestrator<E> {
    pub fn new(config: &ClientConfig, sink: E) -> Self {
        let (targets, _) = watch::channel(Targets::from_config(config));
        let (link_tx, link_rx) = mpsc::unbounded_channel();
        let poll_interval = config.poll_interval();

        Self {
            sink,
            links: Default::default(),
            registered: Arc::new(AtomicBool::new(false)),
            stop: Arc::new(AtomicBool::new(false)),
            auto_poll: config.auto_poll,
            poll_interval,
            next_poll: Instant::now() + poll_interval,
            backoff: config.reconnect_backoff(),
            targets,
            link_tx,
            link_rx,
            next_epoch: 0,
        }
    }

    pub fn status(&self, peer: PeerId) -> LinkStatus {
        self.links[peer.index()].status
    }

    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::SeqCst)
    }

    #[cfg(test)]
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Loop principal até `Shutdown` ou o canal de comandos fechar.
    pub async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        loop {
            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd).await,
                    None => self.shutdown().await,
                },
                Some(event) = self.link_rx.recv() => self.handle_link_event(event),
                _ = tokio::time::sleep_until(self.next_poll) => {
                    self.poll_tick();
                    self.next_poll = Instant::now() + self.poll_interval;
                }
            }
            if self.stop.load(Ordering::SeqCst) {
                break;
            }
        }
    }

    pub async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Connect(peer) => self.connect(peer),
            Command::ConnectAll => {
                for peer in PeerId::ALL {
                    self.connect(peer);
                }
            }
            Command::Disconnect(peer) => self.disconnect(peer).await,
            Command::ToggleRegistration => {
                let enabling = !self.is_registered();
                match self.toggle_registration().await {
                    Ok(accepted) if enabling => {
                        self.log(format!("Assinatura ativa em {accepted} servidores"))
                    }
                    Ok(accepted) => self.log(format!("Assinatura cancelada em {accepted} servidores")),
                    Err(e) => self.log(format!("Não foi possível alternar a assinatura: {e}")),
                }
            }
            Command::SetAutoPoll(enabled) => {
                self.auto_poll = enabled;
                self.log(if enabled { "Auto-poll ligado" } else { "Auto-poll desligado" });
            }
            Command::ApplySettings {
                server1,
                server2,
                poll_interval,
            } => {
                self.targets.send_replace(Targets { server1, server2 });
                self.poll_interval = poll_interval.max(MIN_POLL_INTERVAL);
                self.next_poll = Instant::now() + self.poll_interval;
                self.log("Novas configurações aplicadas");
            }
            Command::Shutdown => self.shutdown().await,
        }
    }

    /// Inicia o supervisor do peer, se ainda não houver um.
    pub fn connect(&mut self, peer: PeerId) {
        if self.links[peer.index()].task.is_some() {
            self.log(format!("{peer} já está conectado ou conectando"));
            return;
        }

        self.next_epoch += 1;
        let epoch = self.next_epoch;
        let ctx = LinkContext {
            targets: self.targets.subscribe(),
            registered: self.registered.clone(),
            stop: self.stop.clone(),
            backoff: self.backoff,
            events: self.link_tx.clone(),
        };

        let link = &mut self.links[peer.index()];
        link.epoch = epoch;
        link.status = LinkStatus::Connecting;
        link.task = Some(ConnectionManager::new(peer, epoch, ctx).spawn());

        let addr = self.targets.borrow().get(peer).clone();
        self.log(format!("Conectando a {peer} ({addr})..."));
    }

    /// Desconexão explícita: sem reconexão automática.
    pub async fn disconnect(&mut self, peer: PeerId) {
        let registered = self.is_registered();
        self.next_epoch += 1;
        let stale_epoch = self.next_epoch;

        let link = &mut self.links[peer.index()];
        let Some(task) = link.task.take() else {
            self.log(format!("{peer} não está conectado"));
            return;
        };
        task.abort();
        link.epoch = stale_epoch;
        link.status = LinkStatus::Disconnected;
        let writer = link.writer.take();

        if let Some(writer) = writer {
            close_writer(&writer, registered).await;
        }
        self.log(format!("Desconectado de {peer}"));
    }

    /// Alterna a assinatura de push nos dois peers.
    ///
    /// Só é permitido com ambos conectados; caso contrário a flag não muda.
    /// Retorna quantos peers aceitaram o envio.
    pub async fn toggle_registration(&mut self) -> Result<usize, OrchestratorError> {
        if !PeerId::ALL
            .iter()
            .all(|p| self.status(*p) == LinkStatus::Connected)
        {
            return Err(OrchestratorError::NotAllPeersConnected);
        }

        let register = !self.is_registered();
        self.registered.store(register, Ordering::SeqCst);
        let (msg, text) = if register {
            (Message::Register, "Assinando push...")
        } else {
            (Message::Unregister, "Cancelando assinatura...")
        };
        self.log(text);

        let mut accepted = 0;
        for writer in self.links.iter().filter_map(|l| l.writer.as_ref()) {
            match send_message(writer, &msg).await {
                Ok(()) => accepted += 1,
                Err(e) => debug!("Falha ao enviar {}: {e}", msg.kind()),
            }
        }

        if accepted == 0 {
            Err(OrchestratorError::NoPeerAccepted)
        } else {
            Ok(accepted)
        }
    }

    /// Um disparo do timer: `POLL` para cada peer conectado, de forma
    /// independente, enquanto o auto-poll está ligado e sem assinatura.
    pub fn poll_tick(&self) -> usize {
        if !self.auto_poll || self.is_registered() {
            return 0;
        }

        let mut sent = 0;
        for (peer, link) in PeerId::ALL.iter().zip(&self.links) {
            let (LinkStatus::Connected, Some(writer)) = (link.status, link.writer.as_ref()) else {
                continue;
            };
            let writer = writer.clone();
            let peer = *peer;
            tokio::spawn(async move {
                if let Err(e) = send_message(&writer, &Message::Poll).await {
                    debug!("{peer}: POLL falhou: {e}");
                }
            });
            sent += 1;
        }
        sent
    }

    pub fn handle_link_event(&mut self, event: LinkEvent) {
        let peer = event.peer;
        let link = &mut self.links[peer.index()];
        if event.epoch != link.epoch {
            debug!("{peer}: evento da época {} descartado", event.epoch);
            return;
        }

        match event.kind {
            LinkEventKind::Connecting(addr) => {
                link.status = LinkStatus::Connecting;
                debug!("{peer}: tentando {addr}");
            }
            LinkEventKind::ConnectFailed { addr, error } => {
                link.status = LinkStatus::Connecting;
                link.writer = None;
                self.log(format!("Falha ao conectar a {peer} ({addr}): {error}"));
            }
            LinkEventKind::Connected { addr, writer } => {
                link.status = LinkStatus::Connected;
                link.writer = Some(writer);
                self.log(format!("Conectado a {peer} ({addr})"));
            }
            LinkEventKind::Data(snapshot) => {
                self.sink.emit(Category::Peer(peer), snapshot.to_json());
            }
            LinkEventKind::Ack(message) => self.log(format!("{peer}: {message}")),
            LinkEventKind::Disconnected(reason) => {
                link.status = LinkStatus::Disconnected;
                link.writer = None;
                self.log(format!("{peer} desconectou: {reason}"));
            }
        }
    }

    /// Espera o próximo evento de supervisor e o processa.
    #[cfg(test)]
    pub async fn pump(&mut self) -> bool {
        match self.link_rx.recv().await {
            Some(event) => {
                self.handle_link_event(event);
                true
            }
            None => false,
        }
    }

    /// Para as reconexões e fecha os links. Com assinatura ativa, tenta
    /// `UNREGISTER` antes de fechar.
    pub async fn shutdown(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        let registered = self.is_registered();

        for link in &mut self.links {
            if let Some(task) = link.task.take() {
                task.abort();
            }
            link.status = LinkStatus::Disconnected;
            if let Some(writer) = link.writer.take() {
                close_writer(&writer, registered).await;
            }
        }
        self.log("Cliente encerrado");
    }

    fn log(&self, text: impl Into<String>) {
        let text = text.into();
        debug!("{text}");
        self.sink.emit(Category::Log, text);
    }
}

/// Fecha um link de forma best-effort.
async fn close_writer(writer: &PeerWriter, unregister: bool) {
    if unregister {
        let _ = send_message(writer, &Message::Unregister).await;
    }
    let _ = writer.lock().await.shutdown().await;
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ClientEvent;
    use crossbeam_channel::{Receiver, Sender, unbounded};
    use telemetry_core::protocol::write_message;
    use telemetry_core::{FrameReader, Snapshot};
    use tokio::io::BufReader;
    use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
    use tokio::net::{TcpListener, TcpStream};

    type Orch = Orchestrator<Sender<ClientEvent>>;

    struct FakeServer {
        reader: FrameReader<BufReader<OwnedReadHalf>>,
        writer: OwnedWriteHalf,
    }

    impl FakeServer {
        async fn accept(listener: &TcpListener) -> Self {
            let (stream, _) = tokio::time::timeout(Duration::from_secs(3), listener.accept())
                .await
                .expect("cliente não conectou")
                .unwrap();
            Self::from_stream(stream)
        }

        fn from_stream(stream: TcpStream) -> Self {
            let (read_half, writer) = stream.into_split();
            Self {
                reader: FrameReader::new(BufReader::new(read_half)),
                writer,
            }
        }

        async fn recv(&mut self) -> Message {
            tokio::time::timeout(Duration::from_secs(3), self.reader.next_message())
                .await
                .expect("timeout esperando comando")
                .unwrap()
                .expect("EOF inesperado")
        }

        async fn silent(&mut self) -> bool {
            tokio::time::timeout(Duration::from_millis(150), self.reader.next_message())
                .await
                .is_err()
        }
    }

    fn orchestrator(server1: &str, server2: &str) -> (Orch, Receiver<ClientEvent>) {
        let config = ClientConfig {
            server1_addr: server1.into(),
            server2_addr: server2.into(),
            reconnect_backoff_secs: 0.05,
            ..Default::default()
        };
        let (tx, rx) = unbounded();
        (Orchestrator::new(&config, tx), rx)
    }

    async fn listener() -> (TcpListener, String) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        (listener, addr)
    }

    async fn closed_addr() -> String {
        let (listener, addr) = listener().await;
        drop(listener);
        addr
    }

    /// Processa eventos até o peer chegar ao estado pedido.
    async fn pump_until(orch: &mut Orch, peer: PeerId, status: LinkStatus) {
        tokio::time::timeout(Duration::from_secs(3), async {
            while orch.status(peer) != status {
                orch.pump().await;
            }
        })
        .await
        .expect("estado não alcançado");
    }

    fn logs(rx: &Receiver<ClientEvent>) -> Vec<String> {
        rx.try_iter()
            .filter(|ev| ev.category == Category::Log)
            .map(|ev| ev.payload)
            .collect()
    }

    /// Dois servidores falsos com os dois peers conectados.
    async fn both_connected() -> (Orch, Receiver<ClientEvent>, FakeServer, FakeServer) {
        let (l1, a1) = listener().await;
        let (l2, a2) = listener().await;
        let (mut orch, rx) = orchestrator(&a1, &a2);
        orch.handle_command(Command::ConnectAll).await;
        let s1 = FakeServer::accept(&l1).await;
        let s2 = FakeServer::accept(&l2).await;
        pump_until(&mut orch, PeerId::Server1, LinkStatus::Connected).await;
        pump_until(&mut orch, PeerId::Server2, LinkStatus::Connected).await;
        (orch, rx, s1, s2)
    }

    #[tokio::test]
    async fn toggle_rejected_while_a_peer_is_down() {
        let (l1, a1) = listener().await;
        let (mut orch, rx) = orchestrator(&a1, &closed_addr().await);
        orch.handle_command(Command::ConnectAll).await;
        let _s1 = FakeServer::accept(&l1).await;
        pump_until(&mut orch, PeerId::Server1, LinkStatus::Connected).await;
        assert_ne!(orch.status(PeerId::Server2), LinkStatus::Connected);

        assert_eq!(
            orch.toggle_registration().await,
            Err(OrchestratorError::NotAllPeersConnected)
        );
        assert!(!orch.is_registered());

        orch.handle_command(Command::ToggleRegistration).await;
        assert!(!orch.is_registered());
        assert!(logs(&rx).iter().any(|l| l.contains("nem todos os servidores")));
    }

    #[tokio::test]
    async fn toggle_registers_and_unregisters_both_peers() {
        let (mut orch, rx, mut s1, mut s2) = both_connected().await;

        assert_eq!(orch.toggle_registration().await, Ok(2));
        assert!(orch.is_registered());
        assert_eq!(s1.recv().await, Message::Register);
        assert_eq!(s2.recv().await, Message::Register);

        orch.handle_command(Command::ToggleRegistration).await;
        assert!(!orch.is_registered());
        assert_eq!(s1.recv().await, Message::Unregister);
        assert_eq!(s2.recv().await, Message::Unregister);
        assert!(logs(&rx).iter().any(|l| l == "Assinatura cancelada em 2 servidores"));
    }

    #[tokio::test]
    async fn data_is_forwarded_as_peer_event() {
        let (mut orch, rx, mut s1, _s2) = both_connected().await;
        let _ = logs(&rx);

        let snap = Snapshot::at(9).with("swap_total", 2048).with("swap_free", 1024);
        write_message(&mut s1.writer, &Message::data(snap.clone())).await.unwrap();
        orch.pump().await;

        let ev = rx.try_recv().unwrap();
        assert_eq!(ev.category, Category::Peer(PeerId::Server1));
        let got: Snapshot = serde_json::from_str(&ev.payload).unwrap();
        assert_eq!(got, snap);
        assert_eq!(got.ts, 9);
    }

    #[tokio::test]
    async fn auto_poll_only_when_unregistered() {
        let (mut orch, _rx, mut s1, mut s2) = both_connected().await;

        assert_eq!(orch.poll_tick(), 2);
        assert_eq!(s1.recv().await, Message::Poll);
        assert_eq!(s2.recv().await, Message::Poll);

        orch.handle_command(Command::SetAutoPoll(false)).await;
        assert_eq!(orch.poll_tick(), 0);
        assert!(s1.silent().await);

        orch.handle_command(Command::SetAutoPoll(true)).await;
        orch.toggle_registration().await.unwrap();
        s1.recv().await;
        s2.recv().await;
        assert_eq!(orch.poll_tick(), 0);
        assert!(s1.silent().await);
        assert!(s2.silent().await);
    }

    #[tokio::test]
    async fn poll_skips_disconnected_peer() {
        let (l1, a1) = listener().await;
        let (mut orch, _rx) = orchestrator(&a1, &closed_addr().await);
        orch.handle_command(Command::ConnectAll).await;
        let mut s1 = FakeServer::accept(&l1).await;
        pump_until(&mut orch, PeerId::Server1, LinkStatus::Connected).await;

        assert_eq!(orch.poll_tick(), 1);
        assert_eq!(s1.recv().await, Message::Poll);
    }

    #[tokio::test]
    async fn reconnect_resends_register() {
        let (l1, a1) = listener().await;
        let (l2, a2) = listener().await;
        let (mut orch, _rx) = orchestrator(&a1, &a2);
        orch.handle_command(Command::ConnectAll).await;
        let s1 = FakeServer::accept(&l1).await;
        let _s2 = FakeServer::accept(&l2).await;
        pump_until(&mut orch, PeerId::Server1, LinkStatus::Connected).await;
        pump_until(&mut orch, PeerId::Server2, LinkStatus::Connected).await;
        orch.toggle_registration().await.unwrap();

        // Server1 cai; o supervisor reconecta e assina de novo sozinho.
        drop(s1);
        pump_until(&mut orch, PeerId::Server1, LinkStatus::Disconnected).await;
        let mut again = FakeServer::accept(&l1).await;
        assert_eq!(again.recv().await, Message::Register);
        pump_until(&mut orch, PeerId::Server1, LinkStatus::Connected).await;
    }

    #[tokio::test]
    async fn explicit_disconnect_unregisters_and_stays_down() {
        let (mut orch, _rx, mut s1, _s2) = both_connected().await;
        orch.toggle_registration().await.unwrap();
        s1.recv().await;

        orch.handle_command(Command::Disconnect(PeerId::Server1)).await;
        assert_eq!(orch.status(PeerId::Server1), LinkStatus::Disconnected);
        assert_eq!(s1.recv().await, Message::Unregister);
        assert_eq!(s1.reader.next_message().await.unwrap(), None);
        assert!(orch.is_registered());
    }

    #[tokio::test]
    async fn stale_epoch_events_are_ignored() {
        let (mut orch, rx, _s1, _s2) = both_connected().await;
        let _ = logs(&rx);

        orch.handle_link_event(LinkEvent {
            peer: PeerId::Server1,
            epoch: 0,
            kind: LinkEventKind::Data(Snapshot::at(1).with("x", 1)),
        });
        orch.handle_link_event(LinkEvent {
            peer: PeerId::Server2,
            epoch: 0,
            kind: LinkEventKind::Disconnected("velho".into()),
        });
        assert!(rx.try_recv().is_err());
        assert_eq!(orch.status(PeerId::Server2), LinkStatus::Connected);
    }

    #[tokio::test]
    async fn settings_clamp_interval_and_swap_targets() {
        let (mut orch, _rx) = orchestrator("a:1", "b:2");
        orch.handle_command(Command::ApplySettings {
            server1: PeerAddr::new("c", 3),
            server2: PeerAddr::new("d", 4),
            poll_interval: Duration::from_millis(200),
        })
        .await;
        assert_eq!(orch.poll_interval(), MIN_POLL_INTERVAL);
        assert_eq!(orch.targets.borrow().get(PeerId::Server2), &PeerAddr::new("d", 4));
    }

    #[tokio::test]
    async fn unregister_rejected_while_a_peer_is_disconnected() {
        let (mut orch, _rx, mut s1, mut s2) = both_connected().await;
        assert_eq!(orch.toggle_registration().await.unwrap(), 2);
        assert_eq!(s1.recv().await, Message::Register);
        assert_eq!(s2.recv().await, Message::Register);

        orch.handle_command(Command::Disconnect(PeerId::Server2)).await;
        assert_eq!(orch.status(PeerId::Server2), LinkStatus::Disconnected);

        assert_eq!(
            orch.toggle_registration().await,
            Err(OrchestratorError::NotAllPeersConnected)
        );
        assert!(orch.is_registered());
        assert!(s1.silent().await);
    }

    #[tokio::test]
    async fn run_ends_on_shutdown_command() {
        let (mut orch, _rx, mut s1, mut s2) = both_connected().await;
        orch.toggle_registration().await.unwrap();
        s1.recv().await;
        s2.recv().await;

        let (tx, commands) = mpsc::unbounded_channel();
        tx.send(Command::Shutdown).unwrap();
        tokio::time::timeout(Duration::from_secs(3), orch.run(commands))
            .await
            .expect("loop não terminou");
        drop(tx);

        assert_eq!(s1.recv().await, Message::Unregister);
        assert_eq!(s2.recv().await, Message::Unregister);
    }

    #[tokio::test]
    async fn shutdown_unregisters_when_registered() {
        let (mut orch, _rx, mut s1, mut s2) = both_connected().await;
        orch.toggle_registration().await.unwrap();
        s1.recv().await;
        s2.recv().await;

        orch.shutdown().await;
        assert_eq!(s1.recv().await, Message::Unregister);
        assert_eq!(s2.recv().await, Message::Unregister);
        assert_eq!(orch.status(PeerId::Server1), LinkStatus::Disconnected);
    }
}
