//! Definição do snapshot de telemetria.
//!
//! Um snapshot é um mapa de campos arbitrários (opaco para o núcleo) mais
//! um timestamp `ts`. O `ts` nunca participa da comparação: dois snapshots
//! com os mesmos campos são iguais mesmo capturados em instantes diferentes.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::{SystemTime, UNIX_EPOCH};

/// Nome do campo de timestamp no objeto JSON.
pub const TS_FIELD: &str = "ts";

/// Uma amostra de uma fonte de telemetria.
///
/// Serializa como um objeto JSON plano: `{"swap_total": 1, ..., "ts": 1700000000}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    /// Campos significativos para detecção de mudança.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
    /// Momento da captura. Ignorado em `==` e guardado como veio: fontes
    /// diferentes podem mandar inteiro, float ou string.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub ts: Value,
}

impl Snapshot {
    /// Snapshot vazio com timestamp explícito.
    pub fn at(ts: u64) -> Self {
        Self {
            fields: Map::new(),
            ts: Value::from(ts),
        }
    }

    /// Snapshot vazio com o timestamp atual.
    pub fn now() -> Self {
        Self::at(unix_now())
    }

    /// Adiciona um campo (builder).
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let key = key.into();
        if key != TS_FIELD {
            self.fields.insert(key, value.into());
        }
        self
    }

    /// Timestamp em segundos Unix, quando é um inteiro não negativo.
    pub fn ts_secs(&self) -> Option<u64> {
        self.ts.as_u64()
    }

    /// Lê um campo inteiro, se presente.
    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.fields.get(key).and_then(Value::as_u64)
    }

    /// Representação JSON compacta (usada nos eventos do cliente e nos logs).
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

impl PartialEq for Snapshot {
    fn eq(&self, other: &Self) -> bool {
        self.fields == other.fields
    }
}

/// Segundos desde a época Unix.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────
