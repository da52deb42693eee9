//! Front-end de console.
//!
//! Interpreta linhas digitadas em [`Command`]s e formata os eventos do
//! loop para leitura humana. Nada daqui entra no núcleo.

use crate::events::{Category, ClientEvent};
use crate::orchestrator::Command;
use crate::peer::PeerId;
use std::time::Duration;
use telemetry_core::{ClientConfig, PeerAddr, Snapshot};

pub const HELP: &str = "\
Comandos:
  connect [1|2]        conecta a um servidor (ou aos dois)
  disconnect [1|2]     desconecta de um servidor (ou dos dois)
  register             alterna a assinatura de push
  auto on|off          liga/desliga o auto-poll
  interval <segundos>  intervalo do auto-poll (mínimo 1)
  addr <1|2> <host:porta>
  help
  quit";

/// Resultado de uma linha de console.
#[derive(Debug, PartialEq)]
pub enum Action {
    Send(Vec<Command>),
    Help,
    Quit,
    Nothing,
}

/// Estado local de configurações editáveis pelo console.
pub struct Console {
    server1: PeerAddr,
    server2: PeerAddr,
    poll_interval_secs: u64,
}

impl Console {
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            server1: config.server1(),
            server2: config.server2(),
            poll_interval_secs: config.poll_interval_secs.max(1),
        }
    }

    pub fn interpret(&mut self, line: &str) -> Result<Action, String> {
        let mut words = line.split_whitespace();
        let Some(verb) = words.next() else {
            return Ok(Action::Nothing);
        };
        let arg = words.next();

        let action = match verb.to_ascii_lowercase().as_str() {
            "connect" | "c" => Action::Send(match parse_peer(arg)? {
                Some(peer) => vec![Command::Connect(peer)],
                None => vec![Command::ConnectAll],
            }),
            "disconnect" | "d" => Action::Send(match parse_peer(arg)? {
                Some(peer) => vec![Command::Disconnect(peer)],
                None => PeerId::ALL.into_iter().map(Command::Disconnect).collect(),
            }),
            "register" | "r" => Action::Send(vec![Command::ToggleRegistration]),
            "auto" => match arg {
                Some("on") => Action::Send(vec![Command::SetAutoPoll(true)]),
                Some("off") => Action::Send(vec![Command::SetAutoPoll(false)]),
                _ => return Err("uso: auto on|off".into()),
            },
            "interval" => {
                let secs: u64 = arg
                    .and_then(|s| s.parse().ok())
                    .ok_or("uso: interval <segundos>")?;
                self.poll_interval_secs = secs.max(1);
                Action::Send(vec![self.settings()])
            }
            "addr" => {
                let peer = parse_peer(arg)?.ok_or("uso: addr <1|2> <host:porta>")?;
                let raw = words.next().ok_or("uso: addr <1|2> <host:porta>")?;
                let addr = PeerAddr::parse(raw, peer.instance().default_port());
                match peer {
                    PeerId::Server1 => self.server1 = addr,
                    PeerId::Server2 => self.server2 = addr,
                }
                Action::Send(vec![self.settings()])
            }
            "help" | "?" => Action::Help,
            "quit" | "exit" | "q" => Action::Quit,
            other => return Err(format!("comando desconhecido: {other} (digite help)")),
        };
        Ok(action)
    }

    fn settings(&self) -> Command {
        Command::ApplySettings {
            server1: self.server1.clone(),
            server2: self.server2.clone(),
            poll_interval: Duration::from_secs(self.poll_interval_secs),
        }
    }
}

fn parse_peer(arg: Option<&str>) -> Result<Option<PeerId>, String> {
    match arg {
        None => Ok(None),
        Some("1") | Some("server1") => Ok(Some(PeerId::Server1)),
        Some("2") | Some("server2") => Ok(Some(PeerId::Server2)),
        Some(other) => Err(format!("servidor inválido: {other} (use 1 ou 2)")),
    }
}

// ──────────────────────────────────────────────
// Formatação
// ──────────────────────────────────────────────

/// Linha pronta para o console.
pub fn format_event(event: &ClientEvent) -> String {
    match event.category {
        Category::Log => format!("[log] {}", event.payload),
        Category::Peer(peer) => {
            let text = match serde_json::from_str::<Snapshot>(&event.payload) {
                Ok(snapshot) => describe(peer, &snapshot),
                Err(_) => event.payload.clone(),
            };
            format!("[{}] {text}", peer.tag())
        }
    }
}

fn describe(peer: PeerId, snapshot: &Snapshot) -> String {
    let field = |key| snapshot.get_u64(key).unwrap_or(0);
    match peer {
        PeerId::Server1 => format!(
            "Swap – total: {}  livre: {}",
            format_mb(field("swap_total")),
            format_mb(field("swap_free"))
        ),
        PeerId::Server2 => {
            let (w, h) = (field("screen_width"), field("screen_height"));
            let screen = if w > 0 && h > 0 {
                format!("{w}×{h} px")
            } else {
                "resolução desconhecida".to_string()
            };
            format!(
                "Uptime: {}   Tela: {screen}",
                format_uptime(field("uptime_seconds"))
            )
        }
    }
}

pub fn format_mb(bytes: u64) -> String {
    format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
}

pub fn format_uptime(secs: u64) -> String {
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{h}h {m:02}m {s:02}s")
    } else if m > 0 {
        format!("{m}m {s:02}s")
    } else {
        format!("{s}s")
    }
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────
