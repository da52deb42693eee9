//! Fontes de snapshot.
//!
//! O núcleo só enxerga [`SnapshotSource`]: uma chamada que devolve um
//! [`Snapshot`] comparável. As coletas concretas ficam aqui:
//!
//! - **Server1** – memória de swap via `sysinfo`
//! - **Server2** – uptime do processo e resolução da tela

use std::time::Instant;
use sysinfo::{MemoryRefreshKind, RefreshKind, System};
use telemetry_core::Snapshot;
use tracing::debug;

/// Resolução usada quando nenhuma detecção responde.
pub const FALLBACK_SCREEN: (u64, u64) = (1920, 1080);

/// Produz um snapshot sob demanda.
pub trait SnapshotSource: Send + 'static {
    fn capture(&mut self) -> Snapshot;
}

// ──────────────────────────────────────────────
// Server1: swap
// ──────────────────────────────────────────────

/// Swap total/livre em bytes.
pub struct SwapSource {
    sys: System,
}

impl SwapSource {
    pub fn new() -> Self {
        let sys = System::new_with_specifics(
            RefreshKind::nothing().with_memory(MemoryRefreshKind::nothing().with_swap()),
        );
        Self { sys }
    }
}

impl Default for SwapSource {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotSource for SwapSource {
    fn capture(&mut self) -> Snapshot {
        self.sys
            .refresh_memory_specifics(MemoryRefreshKind::nothing().with_swap());
        Snapshot::now()
            .with("swap_total", self.sys.total_swap())
            .with("swap_free", self.sys.free_swap())
    }
}

// ──────────────────────────────────────────────
// Server2: uptime + tela
// ──────────────────────────────────────────────

/// Uptime do servidor em segundos e resolução da tela principal.
pub struct DisplaySource {
    started: Instant,
}

impl DisplaySource {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
        }
    }
}

impl Default for DisplaySource {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotSource for DisplaySource {
    fn capture(&mut self) -> Snapshot {
        let (width, height) = detect_screen_size();
        Snapshot::now()
            .with("uptime_seconds", self.started.elapsed().as_secs())
            .with("screen_width", width)
            .with("screen_height", height)
    }
}

/// Lê a resolução do framebuffer (Linux); cai para [`FALLBACK_SCREEN`].
pub fn detect_screen_size() -> (u64, u64) {
    match std::fs::read_to_string("/sys/class/graphics/fb0/virtual_size") {
        Ok(content) => parse_virtual_size(&content).unwrap_or(FALLBACK_SCREEN),
        Err(e) => {
            debug!("Framebuffer indisponível ({e}), usando {FALLBACK_SCREEN:?}");
            FALLBACK_SCREEN
        }
    }
}

/// Formato `"<largura>,<altura>"`.
fn parse_virtual_size(content: &str) -> Option<(u64, u64)> {
    let (w, h) = content.trim().split_once(',')?;
    let w = w.trim().parse().ok()?;
    let h = h.trim().parse().ok()?;
    (w > 0 && h > 0).then_some((w, h))
}

/// Fonte roteirizada para testes: devolve os snapshots na ordem dada e
/// repete o último.
#[cfg(test)]
pub(crate) struct ScriptedSource(std::collections::VecDeque<Snapshot>);

#[cfg(test)]
impl ScriptedSource {
    pub(crate) fn new(snapshots: Vec<Snapshot>) -> Self {
        Self(snapshots.into())
    }
}

#[cfg(test)]
impl SnapshotSource for ScriptedSource {
    fn capture(&mut self) -> Snapshot {
        if self.0.len() > 1 {
            self.0.pop_front().unwrap_or_default()
        } else {
            self.0.front().cloned().unwrap_or_default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_framebuffer_size() {
        assert_eq!(parse_virtual_size("2560,1440\n"), Some((2560, 1440)));
        assert_eq!(parse_virtual_size("0,0"), None);
        assert_eq!(parse_virtual_size("garbage"), None);
    }

    #[test]
    fn swap_snapshot_has_expected_fields() {
        let snap = SwapSource::new().capture();
        assert!(snap.get_u64("swap_total").is_some());
        assert!(snap.get_u64("swap_free").is_some());
        assert!(snap.ts_secs().unwrap_or(0) > 0);
    }

    #[test]
    fn display_snapshot_has_expected_fields() {
        let snap = DisplaySource::new().capture();
        assert_eq!(snap.get_u64("uptime_seconds"), Some(0));
        assert!(snap.get_u64("screen_width").unwrap_or(0) > 0);
        assert!(snap.get_u64("screen_height").unwrap_or(0) > 0);
    }
}
