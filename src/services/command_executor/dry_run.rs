use super::r#trait::{SourceStats, WindowSource};
use crate::events::{RawWindowHandle, WindowBounds};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

const FAKE_WINDOWS: [(u64, &str, u32); 4] = [
    (0x1001, "Bob - Iop - 2.70 - Release", 4101),
    (0x1002, "Alice - Xélor - 2.70 - Release", 4102),
    (0x1003, "Shade - Masqueraider - 2.70 - Release", 4103),
    (0x1004, "Browser - dry_run", 4104),
];

/// Эмуляция окон без запуска внешних утилит; активное окно меняется
/// на каждом проходе
pub struct DryRunSource {
    runs: AtomicU64,
}

impl DryRunSource {
    pub fn new() -> Self {
        info!("Dry-run режим - окна эмулируются");
        Self {
            runs: AtomicU64::new(0),
        }
    }
}

impl Default for DryRunSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl WindowSource for DryRunSource {
    async fn availability(&self) -> bool {
        true
    }

    async fn run(&self) -> Vec<RawWindowHandle> {
        let run = self.runs.fetch_add(1, Ordering::Relaxed);
        let active = (run % FAKE_WINDOWS.len() as u64) as usize;

        FAKE_WINDOWS
            .iter()
            .enumerate()
            .map(|(idx, (handle, title, pid))| {
                RawWindowHandle::new(*handle, *title)
                    .with_pid(*pid)
                    .with_class_name("DryRun")
                    .with_active(idx == active)
                    .with_bounds(WindowBounds {
                        x: idx as i32 * 40,
                        y: idx as i32 * 40,
                        width: 1280,
                        height: 720,
                    })
            })
            .collect()
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            runs: self.runs.load(Ordering::Relaxed),
            available: Some(true),
            ..SourceStats::default()
        }
    }
}
