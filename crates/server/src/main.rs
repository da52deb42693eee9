//! # Telemetria Server
//!
//! Amostra uma fonte de telemetria e atende clientes TCP por poll ou push.
//!
//! ## Uso
//! ```bash
//! telemetry_server --instance server1            # swap, porta 8081
//! telemetry_server --instance server2            # uptime + tela, porta 8082
//! telemetry_server --instance server2 --port 9000
//! ```

mod dispatcher;
mod monitor;
mod server;
mod session;
mod source;
mod state;

use clap::{Parser, ValueEnum};
use monitor::Monitor;
use source::{DisplaySource, SwapSource};
use state::ServerState;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use telemetry_core::config::AppConfig;
use telemetry_core::{LogSink, ServerInstance};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum InstanceArg {
    Server1,
    Server2,
}

impl From<InstanceArg> for ServerInstance {
    fn from(arg: InstanceArg) -> Self {
        match arg {
            InstanceArg::Server1 => ServerInstance::Server1,
            InstanceArg::Server2 => ServerInstance::Server2,
        }
    }
}

/// Servidor de telemetria (poll + push sobre TCP)
#[derive(Debug, Parser)]
#[command(name = "telemetry_server", version)]
struct Args {
    /// Qual fonte servir
    #[arg(long, value_enum, default_value = "server1")]
    instance: InstanceArg,

    /// Caminho do config.toml (padrão: ao lado do executável)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Sobrescreve a porta da instância
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    // ── Logging ──
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    let instance = ServerInstance::from(args.instance);

    // ── Carregar config ──
    let config_path = args.config.unwrap_or_else(AppConfig::default_path);
    let config = AppConfig::load(&config_path);

    // Salva config padrão se não existir
    if !config_path.exists() {
        if let Err(e) = config.save(&config_path) {
            warn!("Não foi possível salvar config padrão: {e}");
        }
    }
    for problem in config.validate() {
        warn!("Config: {problem}");
    }

    let mut server_cfg = config.server(instance).clone();
    if args.port.is_some() {
        server_cfg.port = args.port;
    }
    let bind_addr = server_cfg.bind_addr(instance);
    let sink = LogSink::new(&config.log_sink, instance.name());

    // ── Socket TCP ──
    let listener = match TcpListener::bind(&bind_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Falha ao escutar em {bind_addr}: {e}");
            return ExitCode::FAILURE;
        }
    };

    // ── Banner ──
    println!();
    println!("══════════════════════════════════════════════");
    println!("   ⚡ TELEMETRIA {} – ATIVO", instance.name().to_uppercase());
    println!("══════════════════════════════════════════════");
    println!("  Escutando: {bind_addr}");
    println!("  Monitor:   {:.1}s", server_cfg.monitor_interval_secs);
    println!(
        "  Logs:      {}",
        if sink.is_enabled() { config.log_sink.url.as_str() } else { "desativado" }
    );
    println!("══════════════════════════════════════════════");
    println!();

    info!("{} iniciado em {bind_addr}", instance.name());
    sink.info(format!("Started on {bind_addr}"));

    let state = Arc::new(ServerState::new());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Monitor ──
    let interval = server_cfg.monitor_interval();
    let write_timeout = server_cfg.write_timeout();
    match instance {
        ServerInstance::Server1 => {
            let monitor = Monitor::new(SwapSource::new(), state.clone(), sink.clone(), write_timeout);
            tokio::spawn(monitor.run(interval, shutdown_rx.clone()));
        }
        ServerInstance::Server2 => {
            let monitor =
                Monitor::new(DisplaySource::new(), state.clone(), sink.clone(), write_timeout);
            tokio::spawn(monitor.run(interval, shutdown_rx.clone()));
        }
    }

    // ── Ctrl-C ──
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Ctrl-C recebido, encerrando...");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => {
                warn!("Sem suporte a Ctrl-C: {e}");
                // Mantém o sender vivo: soltar o canal encerraria o servidor.
                std::future::pending::<()>().await;
                drop(shutdown_tx);
            }
        }
    });

    server::serve(listener, state, sink, shutdown_rx).await;
    ExitCode::SUCCESS
}
