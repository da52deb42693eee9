//! Identidade e estado de conexão de cada servidor remoto.

use std::fmt;
use telemetry_core::{ClientConfig, PeerAddr, ServerInstance};

/// Um dos dois servidores observados pelo cliente.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeerId {
    Server1,
    Server2,
}

impl PeerId {
    pub const ALL: [PeerId; 2] = [PeerId::Server1, PeerId::Server2];

    /// Categoria usada nos eventos (`"server1"` / `"server2"`).
    pub fn tag(self) -> &'static str {
        self.instance().name()
    }

    pub fn label(self) -> &'static str {
        match self {
            PeerId::Server1 => "Server1",
            PeerId::Server2 => "Server2",
        }
    }

    pub fn index(self) -> usize {
        match self {
            PeerId::Server1 => 0,
            PeerId::Server2 => 1,
        }
    }

    pub fn instance(self) -> ServerInstance {
        match self {
            PeerId::Server1 => ServerInstance::Server1,
            PeerId::Server2 => ServerInstance::Server2,
        }
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Estado do link com um peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Endereços-alvo dos dois peers. Trocar os alvos só afeta as próximas
/// tentativas de conexão.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Targets {
    pub server1: PeerAddr,
    pub server2: PeerAddr,
}

impl Targets {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            server1: config.server1(),
            server2: config.server2(),
        }
    }

    pub fn get(&self, peer: PeerId) -> &PeerAddr {
        match peer {
            PeerId::Server1 => &self.server1,
            PeerId::Server2 => &self.server2,
        }
    }
}
