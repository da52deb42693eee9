//! Configuração unificada via TOML.
//!
//! Um único `config.toml` cobre os dois servidores, o cliente e o sink de
//! logs centralizado.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Porta padrão do Server1 (swap).
pub const SERVER1_PORT: u16 = 8081;
/// Porta padrão do Server2 (uptime/tela).
pub const SERVER2_PORT: u16 = 8082;
/// Intervalo padrão de auto-poll do cliente (segundos).
pub const POLL_INTERVAL_DEFAULT: u64 = 3;
const MONITOR_INTERVAL_DEFAULT: f64 = 1.0;
const WRITE_TIMEOUT_DEFAULT: f64 = 5.0;
const RECONNECT_BACKOFF_DEFAULT: f64 = 2.0;
const LOG_TIMEOUT_DEFAULT: f64 = 2.0;

/// Converte segundos do TOML em `Duration`. Valores não finitos, zero ou
/// negativos caem para o padrão em vez de abortar o processo.
fn secs_or_default(secs: f64, default: f64) -> Duration {
    if secs.is_finite() && secs > 0.0 {
        if let Ok(d) = Duration::try_from_secs_f64(secs) {
            return d;
        }
    }
    warn!("Duração inválida na configuração: {secs}, usando {default}s");
    Duration::from_secs_f64(default)
}

fn positive_finite(secs: f64) -> bool {
    secs.is_finite() && secs > 0.0
}

/// Identidade de uma instância de servidor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerInstance {
    /// Memória de swap
    Server1,
    /// Uptime e resolução de tela
    Server2,
}

impl ServerInstance {
    /// Nome usado nos logs e como `sender` no sink.
    pub fn name(self) -> &'static str {
        match self {
            ServerInstance::Server1 => "server1",
            ServerInstance::Server2 => "server2",
        }
    }

    pub fn default_port(self) -> u16 {
        match self {
            ServerInstance::Server1 => SERVER1_PORT,
            ServerInstance::Server2 => SERVER2_PORT,
        }
    }
}

/// Configuração de uma instância de servidor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// IP local para bind
    pub bind_ip: String,
    /// Porta TCP (ausente = porta padrão da instância)
    pub port: Option<u16>,
    /// Intervalo do monitor em segundos
    pub monitor_interval_secs: f64,
    /// Tempo máximo de escrita de um push antes de descartar o assinante
    pub write_timeout_secs: f64,
}

impl ServerConfig {
    fn for_instance(instance: ServerInstance) -> Self {
        Self {
            port: Some(instance.default_port()),
            ..Default::default()
        }
    }

    pub fn bind_addr(&self, instance: ServerInstance) -> String {
        format!(
            "{}:{}",
            self.bind_ip,
            self.port.unwrap_or(instance.default_port())
        )
    }

    pub fn monitor_interval(&self) -> Duration {
        secs_or_default(self.monitor_interval_secs, MONITOR_INTERVAL_DEFAULT)
    }

    pub fn write_timeout(&self) -> Duration {
        secs_or_default(self.write_timeout_secs, WRITE_TIMEOUT_DEFAULT)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_ip: "0.0.0.0".into(),
            port: None,
            monitor_interval_secs: MONITOR_INTERVAL_DEFAULT,
            write_timeout_secs: WRITE_TIMEOUT_DEFAULT,
        }
    }
}

/// Configuração do cliente de monitoramento.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Endereço do Server1 ("host:porta")
    pub server1_addr: String,
    /// Endereço do Server2 ("host:porta")
    pub server2_addr: String,
    /// Intervalo de auto-poll em segundos (mínimo 1)
    pub poll_interval_secs: u64,
    /// Auto-poll ligado ao iniciar
    pub auto_poll: bool,
    /// Espera entre tentativas de conexão (segundos, constante)
    pub reconnect_backoff_secs: f64,
    /// Conectar aos dois servidores ao iniciar
    pub connect_on_start: bool,
}

impl ClientConfig {
    pub fn server1(&self) -> PeerAddr {
        PeerAddr::parse(&self.server1_addr, SERVER1_PORT)
    }

    pub fn server2(&self) -> PeerAddr {
        PeerAddr::parse(&self.server2_addr, SERVER2_PORT)
    }

    /// Intervalo de poll já limitado ao mínimo de 1 segundo.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn reconnect_backoff(&self) -> Duration {
        secs_or_default(self.reconnect_backoff_secs, RECONNECT_BACKOFF_DEFAULT)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server1_addr: format!("localhost:{SERVER1_PORT}"),
            server2_addr: format!("localhost:{SERVER2_PORT}"),
            poll_interval_secs: POLL_INTERVAL_DEFAULT,
            auto_poll: true,
            reconnect_backoff_secs: RECONNECT_BACKOFF_DEFAULT,
            connect_on_start: true,
        }
    }
}

/// Configuração do coletor de logs HTTP.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSinkConfig {
    pub enabled: bool,
    /// Endpoint que recebe `POST {sender, level, message, ts}`
    pub url: String,
    pub timeout_secs: f64,
}

impl Default for LogSinkConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: "http://127.0.0.1:8888/log".into(),
            timeout_secs: LOG_TIMEOUT_DEFAULT,
        }
    }
}

impl LogSinkConfig {
    pub fn timeout(&self) -> Duration {
        secs_or_default(self.timeout_secs, LOG_TIMEOUT_DEFAULT)
    }
}

/// Configuração raiz do aplicativo.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server1: ServerConfig,
    pub server2: ServerConfig,
    pub client: ClientConfig,
    pub log_sink: LogSinkConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server1: ServerConfig::for_instance(ServerInstance::Server1),
            server2: ServerConfig::for_instance(ServerInstance::Server2),
            client: ClientConfig::default(),
            log_sink: LogSinkConfig::default(),
        }
    }
}

impl AppConfig {
    /// Seção de configuração de uma instância.
    pub fn server(&self, instance: ServerInstance) -> &ServerConfig {
        match instance {
            ServerInstance::Server1 => &self.server1,
            ServerInstance::Server2 => &self.server2,
        }
    }

    /// Carrega configuração de um arquivo TOML.
    pub fn load(path: &Path) -> Self {
        if path.exists() {
            match std::fs::read_to_string(path) {
                Ok(content) => match toml::from_str::<AppConfig>(&content) {
                    Ok(config) => {
                        info!("Configuração carregada de {}", path.display());
                        return config;
                    }
                    Err(e) => {
                        warn!("Erro ao parsear {}: {}", path.display(), e);
                    }
                },
                Err(e) => {
                    warn!("Erro ao ler {}: {}", path.display(), e);
                }
            }
        }

        info!("Usando configuração padrão");
        AppConfig::default()
    }

    /// Salva configuração em arquivo TOML.
    pub fn save(&self, path: &Path) -> Result<(), String> {
        let content = toml::to_string_pretty(self).map_err(|e| e.to_string())?;
        std::fs::write(path, content).map_err(|e| e.to_string())?;
        info!("Configuração salva em {}", path.display());
        Ok(())
    }

    /// Retorna o caminho padrão do config.toml.
    pub fn default_path() -> PathBuf {
        let exe_dir = std::env::current_exe()
            .map(|p| p.parent().unwrap_or(Path::new(".")).to_path_buf())
            .unwrap_or_else(|_| PathBuf::from("."));
        exe_dir.join("config.toml")
    }

    /// Valida a configuração e retorna lista de erros.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        for instance in [ServerInstance::Server1, ServerInstance::Server2] {
            let server = self.server(instance);
            let name = instance.name();
            if server.port == Some(0) {
                errors.push(format!("Porta do {name} não pode ser 0"));
            }
            if !(0.1..=60.0).contains(&server.monitor_interval_secs) {
                errors.push(format!(
                    "Intervalo do monitor de {name} inválido: {} (0.1–60.0)",
                    server.monitor_interval_secs
                ));
            }
            if !positive_finite(server.write_timeout_secs) {
                errors.push(format!("Timeout de escrita de {name} deve ser positivo"));
            }
        }
        if self.server1.bind_addr(ServerInstance::Server1)
            == self.server2.bind_addr(ServerInstance::Server2)
        {
            errors.push(format!(
                "server1 e server2 usam o mesmo endereço {}",
                self.server1.bind_addr(ServerInstance::Server1)
            ));
        }
        if self.client.poll_interval_secs < 1 {
            errors.push("Intervalo de poll do cliente deve ser ≥ 1s".into());
        }
        if !positive_finite(self.client.reconnect_backoff_secs) {
            errors.push("Backoff de reconexão deve ser positivo".into());
        }
        if !positive_finite(self.log_sink.timeout_secs) {
            errors.push("Timeout do sink de logs deve ser positivo".into());
        }
        if self.log_sink.enabled && self.log_sink.url.is_empty() {
            errors.push("URL do sink de logs vazia".into());
        }

        errors
    }
}

// ──────────────────────────────────────────────
// Endereços de peers
// ──────────────────────────────────────────────

/// Endereço `host:porta` de um servidor remoto.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerAddr {
    pub host: String,
    pub port: u16,
}

impl PeerAddr {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Interpreta `host[:porta]`.
    ///
    /// Vazio resulta em `localhost:default_port`; porta inválida cai para
    /// `default_port`.
    pub fn parse(s: &str, default_port: u16) -> Self {
        let s = s.trim();
        if s.is_empty() {
            return Self::new("localhost", default_port);
        }
        match s.split_once(':') {
            Some((host, port)) => Self::new(host, port.trim().parse().unwrap_or(default_port)),
            None => Self::new(s, default_port),
        }
    }
}

impl fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}
