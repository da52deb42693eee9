//! # Telemetria Client
//!
//! Monitora dois servidores de telemetria por poll ou push, reconectando
//! sozinho quando um deles cai.
//!
//! O loop de rede roda numa thread própria; este binário só lê comandos do
//! stdin e imprime os eventos que chegam.
//!
//! ## Uso
//! ```bash
//! telemetry_client
//! telemetry_client --config ./config.toml
//! ```

mod connection;
mod console;
mod events;
mod orchestrator;
mod peer;
mod runtime;

use clap::Parser;
use console::{Action, Console};
use orchestrator::Command;
use std::io::BufRead;
use std::path::PathBuf;
use std::process::ExitCode;
use telemetry_core::config::AppConfig;
use tracing::{error, warn};

/// Cliente de monitoramento (poll + push)
#[derive(Debug, Parser)]
#[command(name = "telemetry_client", version)]
struct Args {
    /// Caminho do config.toml (padrão: ao lado do executável)
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() -> ExitCode {
    // ── Logging ── (stderr, para não misturar com o console)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    // ── Carregar config ──
    let config_path = args.config.unwrap_or_else(AppConfig::default_path);
    let config = AppConfig::load(&config_path);

    if !config_path.exists() {
        if let Err(e) = config.save(&config_path) {
            warn!("Não foi possível salvar config padrão: {e}");
        }
    }
    for problem in config.validate() {
        warn!("Config: {problem}");
    }

    let client_cfg = config.client.clone();

    // ── Loop de rede ──
    let handle = match runtime::spawn_client_thread(client_cfg.clone()) {
        Ok(handle) => handle,
        Err(e) => {
            error!("Falha ao criar thread do cliente: {e}");
            return ExitCode::FAILURE;
        }
    };

    // ── Impressão dos eventos ──
    let events = handle.events().clone();
    let printer = match std::thread::Builder::new()
        .name("console-out".into())
        .spawn(move || {
            for event in events.iter() {
                println!("{}", console::format_event(&event));
            }
        }) {
        Ok(printer) => printer,
        Err(e) => {
            error!("Falha ao criar thread de saída: {e}");
            handle.shutdown();
            return ExitCode::FAILURE;
        }
    };

    // ── Banner ──
    println!();
    println!("══════════════════════════════════════════════");
    println!("   ⚡ TELEMETRIA CLIENT – ATIVO");
    println!("══════════════════════════════════════════════");
    println!("  Server1:   {}", client_cfg.server1());
    println!("  Server2:   {}", client_cfg.server2());
    println!(
        "  Auto-poll: {} (a cada {}s)",
        if client_cfg.auto_poll { "ligado" } else { "desligado" },
        client_cfg.poll_interval().as_secs()
    );
    println!("══════════════════════════════════════════════");
    println!("{}", console::HELP);
    println!();

    if client_cfg.connect_on_start {
        handle.send(Command::ConnectAll);
    }

    // ── Comandos do stdin ──
    let mut console = Console::new(&client_cfg);
    for line in std::io::stdin().lock().lines() {
        let Ok(line) = line else { break };
        match console.interpret(&line) {
            Ok(Action::Send(commands)) => {
                for cmd in commands {
                    handle.send(cmd);
                }
            }
            Ok(Action::Help) => println!("{}", console::HELP),
            Ok(Action::Quit) => break,
            Ok(Action::Nothing) => {}
            Err(msg) => println!("{msg}"),
        }
    }

    // Encerra o loop; o channel fecha e a thread de saída termina.
    handle.shutdown();
    let _ = printer.join();
    ExitCode::SUCCESS
}
