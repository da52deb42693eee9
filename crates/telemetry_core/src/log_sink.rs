//! Envio de eventos ao coletor de logs centralizado.
//!
//! Fire-and-forget: cada evento vira um `POST` JSON disparado numa task
//! separada. Qualquer falha (coletor fora do ar, timeout, sem runtime) é
//! descartada em silêncio e nunca afeta o protocolo.

use crate::config::LogSinkConfig;
use crate::types::unix_now;
use serde::Serialize;
use std::sync::Arc;
use tracing::trace;

/// Corpo do `POST` aceito pelo coletor.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LogRecord {
    pub sender: String,
    pub level: String,
    pub message: String,
    pub ts: u64,
}

/// Cliente do coletor de logs. Clonar é barato.
#[derive(Clone)]
pub struct LogSink {
    inner: Option<Arc<SinkInner>>,
    sender: Arc<str>,
}

struct SinkInner {
    http: reqwest::Client,
    url: String,
}

impl LogSink {
    /// Cria o sink para um remetente (ex.: `"server1"`).
    pub fn new(config: &LogSinkConfig, sender: &str) -> Self {
        let inner = if config.enabled && !config.url.is_empty() {
            reqwest::Client::builder()
                .timeout(config.timeout())
                .build()
                .ok()
                .map(|http| {
                    Arc::new(SinkInner {
                        http,
                        url: config.url.clone(),
                    })
                })
        } else {
            None
        };

        Self {
            inner,
            sender: Arc::from(sender),
        }
    }

    /// Sink que descarta tudo.
    pub fn disabled(sender: &str) -> Self {
        Self {
            inner: None,
            sender: Arc::from(sender),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    pub fn info(&self, message: impl Into<String>) {
        self.send("INFO", message);
    }

    /// Monta o registro que seria enviado.
    pub fn record(&self, level: &str, message: impl Into<String>) -> LogRecord {
        LogRecord {
            sender: self.sender.to_string(),
            level: level.to_string(),
            message: message.into(),
            ts: unix_now(),
        }
    }

    /// Dispara o envio sem esperar resposta.
    pub fn send(&self, level: &str, message: impl Into<String>) {
        let Some(inner) = self.inner.clone() else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };

        let record = self.record(level, message);
        runtime.spawn(async move {
            if let Err(e) = inner.http.post(&inner.url).json(&record).send().await {
                trace!("Coletor de logs indisponível: {e}");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use std::time::Duration;

    #[test]
    fn record_has_collector_shape() {
        let sink = LogSink::disabled("server1");
        let record = sink.record("INFO", "Data changed");
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["sender"], "server1");
        assert_eq!(value["level"], "INFO");
        assert_eq!(value["message"], "Data changed");
        assert!(value["ts"].as_u64().unwrap() > 0);
    }

    #[test]
    fn disabled_sink_is_noop_without_runtime() {
        let config = LogSinkConfig {
            enabled: false,
            ..Default::default()
        };
        let sink = LogSink::new(&config, "server2");
        assert!(!sink.is_enabled());
        sink.info("ignorado");
    }

    #[tokio::test]
    async fn unreachable_collector_is_swallowed() {
        // Porta reservada e liberada: ninguém escuta.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let config = LogSinkConfig {
            enabled: true,
            url: format!("http://{addr}/log"),
            timeout_secs: 0.2,
        };
        let sink = LogSink::new(&config, "server1");
        sink.info("perdido");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn posts_json_body_to_collector() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let config = LogSinkConfig {
            enabled: true,
            url: format!("http://{addr}/log"),
            timeout_secs: 2.0,
        };
        LogSink::new(&config, "server2").info("Client connected");

        let (mut stream, _) = listener.accept().await.unwrap();
        let mut request = Vec::new();
        let mut chunk = [0u8; 1024];
        while !String::from_utf8_lossy(&request).contains("Client connected") {
            let n = stream.read(&mut chunk).await.unwrap();
            assert!(n > 0, "conexão fechada antes do corpo");
            request.extend_from_slice(&chunk[..n]);
        }
        stream
            .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 2\r\n\r\nOK")
            .await
            .unwrap();

        let text = String::from_utf8_lossy(&request);
        assert!(text.starts_with("POST /log"));
        assert!(text.contains("\"sender\":\"server2\""));
        assert!(text.contains("\"level\":\"INFO\""));
    }
}
