//! Protocolo de comunicação em linhas JSON.
//!
//! Cada mensagem é um objeto JSON UTF-8 terminado por `\n`:
//!
//! ```text
//! {"type":"REGISTER"}\n
//! {"type":"POLL"}\n
//! {"type":"DATA","payload":{"swap_total":2048,"swap_free":1024,"ts":1700000000}}\n
//! {"type":"ACK","message":"REGISTERED"}\n
//! ```
//!
//! Não há prefixo de tamanho. Linhas maiores que [`MAX_LINE_BYTES`] são
//! descartadas até o próximo `\n`; linhas inválidas são ignoradas sem
//! derrubar a conexão.

use crate::types::Snapshot;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

/// Tamanho máximo de uma linha (constante de implantação).
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// Resposta a `REGISTER`.
pub const ACK_REGISTERED: &str = "REGISTERED";
/// Resposta a `UNREGISTER`.
pub const ACK_UNREGISTERED: &str = "UNREGISTERED";
/// Resposta a qualquer comando desconhecido.
pub const ACK_UNKNOWN: &str = "UNKNOWN";

/// Erros do protocolo.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Mensagem malformada: {0}")]
    Malformed(String),

    #[error("Linha excede o limite ({0} bytes, máximo {MAX_LINE_BYTES})")]
    LineTooLong(usize),

    #[error("Erro de serialização: {0}")]
    Serialize(String),

    #[error("Erro de transporte: {0}")]
    Io(#[from] std::io::Error),
}

/// Mensagem do protocolo, identificada pelo campo `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Message {
    Register,
    Unregister,
    Poll,
    Data {
        payload: Snapshot,
    },
    Ack {
        #[serde(default)]
        message: String,
    },
    /// Qualquer `type` não reconhecido.
    #[serde(other)]
    Unknown,
}

impl Message {
    pub fn data(payload: Snapshot) -> Self {
        Message::Data { payload }
    }

    pub fn ack(message: impl Into<String>) -> Self {
        Message::Ack {
            message: message.into(),
        }
    }

    /// Nome do tipo no fio (para logs).
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Register => "REGISTER",
            Message::Unregister => "UNREGISTER",
            Message::Poll => "POLL",
            Message::Data { .. } => "DATA",
            Message::Ack { .. } => "ACK",
            Message::Unknown => "UNKNOWN",
        }
    }
}

/// Codifica uma mensagem em exatamente uma linha (com `\n` final).
pub fn encode_line(msg: &Message) -> Result<Vec<u8>, ProtocolError> {
    // serde_json escapa quebras de linha dentro de strings, então a saída
    // compacta nunca contém `\n` literal.
    let mut line = serde_json::to_vec(msg).map_err(|e| ProtocolError::Serialize(e.to_string()))?;
    if line.len() > MAX_LINE_BYTES {
        return Err(ProtocolError::LineTooLong(line.len()));
    }
    line.push(b'\n');
    Ok(line)
}

/// Decodifica uma linha (com ou sem `\n`) em [`Message`].
///
/// Só JSON inválido ou algo que não seja objeto é
/// [`ProtocolError::Malformed`]. Um objeto que não forma um comando
/// conhecido (sem `type`, `type` que não é string, corpo inválido) vira
/// [`Message::Unknown`].
pub fn decode_line(line: &[u8]) -> Result<Message, ProtocolError> {
    let text = std::str::from_utf8(line).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
    let value: Value =
        serde_json::from_str(text.trim()).map_err(|e| ProtocolError::Malformed(e.to_string()))?;

    if !value.is_object() {
        return Err(ProtocolError::Malformed("não é um objeto JSON".into()));
    }

    match serde_json::from_value(value) {
        Ok(msg) => Ok(msg),
        Err(e) => {
            debug!("Objeto sem comando válido: {e}");
            Ok(Message::Unknown)
        }
    }
}

/// Escreve uma mensagem e faz flush.
pub async fn write_message<W>(writer: &mut W, msg: &Message) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let line = encode_line(msg)?;
    writer.write_all(&line).await?;
    writer.flush().await?;
    Ok(())
}

/// Leitor de frames sobre um stream bufferizado.
///
/// Pula linhas em branco, malformadas ou grandes demais; só retorna erro
/// para falhas de transporte.
pub struct FrameReader<R> {
    inner: R,
    buf: Vec<u8>,
}

impl<R: AsyncBufRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: Vec::with_capacity(1024),
        }
    }

    /// Próxima mensagem válida, ou `None` no fim do stream.
    pub async fn next_message(&mut self) -> std::io::Result<Option<Message>> {
        loop {
            self.buf.clear();
            let limit = MAX_LINE_BYTES as u64 + 1;
            let n = (&mut self.inner)
                .take(limit)
                .read_until(b'\n', &mut self.buf)
                .await?;
            if n == 0 {
                return Ok(None);
            }

            if !self.buf.ends_with(b"\n") && self.buf.len() > MAX_LINE_BYTES {
                let dropped = self.buf.len() + self.discard_line().await?;
                warn!("{}", ProtocolError::LineTooLong(dropped));
                continue;
            }

            if self.buf.iter().all(|b| b.is_ascii_whitespace()) {
                continue;
            }

            match decode_line(&self.buf) {
                Ok(msg) => return Ok(Some(msg)),
                Err(e) => debug!("Linha ignorada: {e}"),
            }
        }
    }

    /// Descarta o restante da linha atual. Retorna quantos bytes foram pulados.
    async fn discard_line(&mut self) -> std::io::Result<usize> {
        let mut skipped = 0;
        loop {
            let available = self.inner.fill_buf().await?;
            if available.is_empty() {
                return Ok(skipped);
            }
            match available.iter().position(|b| *b == b'\n') {
                Some(pos) => {
                    self.inner.consume(pos + 1);
                    return Ok(skipped + pos + 1);
                }
                None => {
                    let len = available.len();
                    self.inner.consume(len);
                    skipped += len;
                }
            }
        }
    }
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    #[test]
    fn wire_format_matches_protocol() {
        let line = encode_line(&Message::Register).unwrap();
        assert_eq!(line, b"{\"type\":\"REGISTER\"}\n");

        let line = encode_line(&Message::ack(ACK_REGISTERED)).unwrap();
        assert_eq!(line, b"{\"type\":\"ACK\",\"message\":\"REGISTERED\"}\n");
    }

    #[test]
    fn data_payload_is_flat_snapshot() {
        let snap = Snapshot::at(7).with("x", 1);
        let line = encode_line(&Message::data(snap.clone())).unwrap();
        let value: Value = serde_json::from_slice(&line).unwrap();
        assert_eq!(value["type"], "DATA");
        assert_eq!(value["payload"]["x"], 1);
        assert_eq!(value["payload"]["ts"], 7);

        match decode_line(&line).unwrap() {
            Message::Data { payload } => {
                assert_eq!(payload, snap);
                assert_eq!(payload.ts, 7);
            }
            other => panic!("esperado DATA, veio {other:?}"),
        }
    }

    #[test]
    fn encoded_line_has_single_newline() {
        let snap = Snapshot::at(1).with("note", "linha1\nlinha2");
        let line = encode_line(&Message::data(snap)).unwrap();
        assert_eq!(line.iter().filter(|b| **b == b'\n').count(), 1);
        assert_eq!(line.last(), Some(&b'\n'));
    }

    #[test]
    fn decodes_commands() {
        assert_eq!(decode_line(b"{\"type\":\"POLL\"}\n").unwrap(), Message::Poll);
        assert_eq!(decode_line(b"{\"type\":\"UNREGISTER\"}").unwrap(), Message::Unregister);
        assert_eq!(
            decode_line(b"{\"type\":\"ACK\"}").unwrap(),
            Message::ack(String::new())
        );
    }

    #[test]
    fn unknown_type_is_not_malformed() {
        assert_eq!(decode_line(b"{\"type\":\"HELLO\"}").unwrap(), Message::Unknown);
        assert_eq!(decode_line(b"{\"foo\":1}").unwrap(), Message::Unknown);
        for line in [
            r#"{"type":null}"#,
            r#"{"type":0}"#,
            r#"{"type":"DATA"}"#,
            r#"{"type":"DATA","payload":[1]}"#,
            r#"{"type":"ACK","message":5}"#,
        ] {
            assert_eq!(decode_line(line.as_bytes()).unwrap(), Message::Unknown, "{line}");
        }
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(decode_line(b"not json"), Err(ProtocolError::Malformed(_))));
        assert!(matches!(decode_line(b"[1,2,3]"), Err(ProtocolError::Malformed(_))));
        assert!(matches!(decode_line(&[0xff, 0xfe]), Err(ProtocolError::Malformed(_))));
    }

    #[tokio::test]
    async fn reader_skips_malformed_and_blank_lines() {
        let input: &[u8] = b"garbage\n\n{\"type\":\"POLL\"}\n{broken\n{\"type\":\"REGISTER\"}\n";
        let mut reader = FrameReader::new(BufReader::new(input));
        assert_eq!(reader.next_message().await.unwrap(), Some(Message::Poll));
        assert_eq!(reader.next_message().await.unwrap(), Some(Message::Register));
        assert_eq!(reader.next_message().await.unwrap(), None);
    }

    #[tokio::test]
    async fn reader_accepts_final_line_without_newline() {
        let input: &[u8] = b"{\"type\":\"POLL\"}";
        let mut reader = FrameReader::new(BufReader::new(input));
        assert_eq!(reader.next_message().await.unwrap(), Some(Message::Poll));
        assert_eq!(reader.next_message().await.unwrap(), None);
    }

    #[tokio::test]
    async fn reader_drops_oversized_line_and_continues() {
        let mut input = vec![b'a'; MAX_LINE_BYTES * 2];
        input.push(b'\n');
        input.extend_from_slice(b"{\"type\":\"UNREGISTER\"}\n");
        let mut reader = FrameReader::new(BufReader::new(input.as_slice()));
        assert_eq!(reader.next_message().await.unwrap(), Some(Message::Unregister));
        assert_eq!(reader.next_message().await.unwrap(), None);
    }

    #[tokio::test]
    async fn write_then_read_over_duplex() {
        let (mut client, server) = tokio::io::duplex(1024);

        write_message(&mut client, &Message::ack(ACK_UNKNOWN)).await.unwrap();
        let mut reader = FrameReader::new(BufReader::new(server));
        assert_eq!(
            reader.next_message().await.unwrap(),
            Some(Message::ack(ACK_UNKNOWN))
        );
    }
}
