//! # Telemetry Core
//!
//! Crate compartilhada entre servidores e cliente: o snapshot de
//! telemetria, o protocolo de linhas JSON, a configuração TOML e o envio
//! de eventos ao coletor de logs.
//!
//! ## Módulos
//! - [`types`] – Snapshot comparável (o `ts` não entra na igualdade)
//! - [`protocol`] – Mensagens `REGISTER/UNREGISTER/POLL/DATA/ACK` e framing por linha
//! - [`config`] – Configuração unificada via TOML
//! - [`log_sink`] – Sink HTTP fire-and-forget

pub mod types;
pub mod protocol;
pub mod config;
pub mod log_sink;

// Re-exports convenientes
pub use types::Snapshot;
pub use protocol::{FrameReader, Message, ProtocolError, decode_line, encode_line, write_message};
pub use config::{AppConfig, ClientConfig, PeerAddr, ServerConfig, ServerInstance};
pub use log_sink::LogSink;
