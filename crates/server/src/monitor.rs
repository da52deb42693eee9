//! Monitor – amostra a fonte em cadência fixa e dispara o push quando
//! os dados mudam.

use crate::dispatcher::dispatch;
use crate::source::SnapshotSource;
use crate::state::ServerState;
use std::sync::Arc;
use std::time::Duration;
use telemetry_core::LogSink;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::info;

pub struct Monitor<S> {
    source: S,
    state: Arc<ServerState>,
    sink: LogSink,
    write_timeout: Duration,
}

impl<S: SnapshotSource> Monitor<S> {
    pub fn new(source: S, state: Arc<ServerState>, sink: LogSink, write_timeout: Duration) -> Self {
        Self {
            source,
            state,
            sink,
            write_timeout,
        }
    }

    /// Um ciclo: captura, compara/substitui e, se mudou, faz o push.
    /// Retorna se os dados mudaram.
    pub async fn tick(&mut self) -> bool {
        let snapshot = self.source.capture();
        if !self.state.replace_current(snapshot.clone()) {
            return false;
        }

        let report = dispatch(&self.state, &snapshot, self.write_timeout).await;
        let json = snapshot.to_json();
        info!(
            "Dados mudaram: {json} → {} assinantes ({} removidos)",
            report.delivered, report.pruned
        );
        self.sink.info(format!("Data changed: {json}"));
        true
    }

    /// Loop até o sinal de shutdown.
    pub async fn run(mut self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick().await;
                }
                _ = shutdown.changed() => break,
            }
        }
        info!("Monitor encerrado");
    }
}
