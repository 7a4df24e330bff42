use crate::config::Config;
use crate::events::RawWindowHandle;
use serde::Serialize;
use std::sync::Arc;

/// Счётчики источника окон для статистики
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceStats {
    pub runs: u64,
    pub retries: u64,
    pub timeouts: u64,
    pub fallbacks: u64,
    pub failures: u64,
    pub available: Option<bool>,
}

/// Trait for sources of raw top-level windows
#[async_trait::async_trait]
pub trait WindowSource: Send + Sync {
    /// Cheap, cached check that the query tool can run at all
    async fn availability(&self) -> bool;

    /// One enumeration pass. Never fails: problems degrade to an empty list.
    async fn run(&self) -> Vec<RawWindowHandle>;

    fn stats(&self) -> SourceStats;
}

/// Factory function to create an appropriate window source based on the dry_run flag
pub fn create_window_source(config: &Config, dry_run: bool) -> Arc<dyn WindowSource> {
    if dry_run {
        Arc::new(super::dry_run::DryRunSource::new())
    } else {
        Arc::new(super::executor::CommandExecutor::new(
            config.executor.clone(),
            config.script_dir(),
        ))
    }
}
