pub mod window;

pub use window::{RawWindowHandle, WindowBounds, WindowRecord};

use std::sync::Arc;

/// Событие завершения цикла детекции: полный канонический список окон
#[derive(Debug, Clone)]
pub struct DetectionEvent {
    pub operation_id: u64,
    pub windows: Arc<Vec<WindowRecord>>,
}

impl DetectionEvent {
    pub fn new(operation_id: u64, windows: Vec<WindowRecord>) -> Self {
        Self {
            operation_id,
            windows: Arc::new(windows),
        }
    }
}
