//! Loop de aceitação TCP: uma [`Session`] por conexão.

use crate::session::Session;
use crate::state::{ConnId, ConnectionHandle, ServerState};
use std::net::SocketAddr;
use std::sync::Arc;
use telemetry_core::{FrameReader, LogSink};
use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{error, info};

/// Aceita conexões até o shutdown. Falhas de `accept` não encerram o loop.
pub async fn serve(
    listener: TcpListener,
    state: Arc<ServerState>,
    sink: LogSink,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut next_id: ConnId = 0;

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    next_id += 1;
                    spawn_session(stream, addr, next_id, &state, &sink);
                }
                Err(e) => error!("Falha ao aceitar conexão: {e}"),
            },
            _ = shutdown.changed() => break,
        }
    }

    info!("Servidor encerrado");
}

fn spawn_session(
    stream: TcpStream,
    addr: SocketAddr,
    id: ConnId,
    state: &Arc<ServerState>,
    sink: &LogSink,
) {
    info!("Cliente #{id} conectou de {addr}");
    sink.info(format!("Client connected {addr}"));

    let (read_half, write_half) = stream.into_split();
    let handle = ConnectionHandle::new(id, &addr.to_string(), write_half);
    let session = Session::new(handle, state.clone(), sink.clone());
    tokio::spawn(session.run(FrameReader::new(BufReader::new(read_half))));
}
