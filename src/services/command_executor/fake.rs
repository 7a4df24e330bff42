use super::r#trait::{SourceStats, WindowSource};
use crate::events::RawWindowHandle;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::time::{sleep, Duration};

/// Источник окон для тестов: отдаёт заданный список, задержки по очереди
#[derive(Default)]
pub struct ScriptedSource {
    windows: Mutex<Vec<RawWindowHandle>>,
    delays: Mutex<VecDeque<Duration>>,
    default_delay: Mutex<Duration>,
    runs: AtomicU64,
}

impl ScriptedSource {
    pub fn new(windows: Vec<RawWindowHandle>) -> Self {
        Self {
            windows: Mutex::new(windows),
            ..Self::default()
        }
    }

    pub fn set_windows(&self, windows: Vec<RawWindowHandle>) {
        *self.windows.lock() = windows;
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.default_delay.lock() = delay;
    }

    pub fn push_delay(&self, delay: Duration) {
        self.delays.lock().push_back(delay);
    }

    pub fn runs(&self) -> u64 {
        self.runs.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl WindowSource for ScriptedSource {
    async fn availability(&self) -> bool {
        true
    }

    async fn run(&self) -> Vec<RawWindowHandle> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        let delay = self
            .delays
            .lock()
            .pop_front()
            .unwrap_or_else(|| *self.default_delay.lock());
        let windows = self.windows.lock().clone();
        if !delay.is_zero() {
            sleep(delay).await;
        }
        windows
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            runs: self.runs(),
            available: Some(true),
            ..SourceStats::default()
        }
    }
}
