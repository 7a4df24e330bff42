use crate::config::{ActivationConfig, Config};
use crate::debug_if_enabled;
use crate::services::command_executor::run_command;
use std::sync::Arc;
use tokio::time::Duration;
use tracing::{info, warn};

/// Trait for bringing a game window to the foreground
#[async_trait::async_trait]
pub trait WindowActivator: Send + Sync {
    /// Returns whether the window was activated. Never fails.
    async fn activate(&self, title: &str) -> bool;
}

/// Активация через внешнюю команду с подстановкой `{title}`
pub struct CommandActivator {
    config: ActivationConfig,
}

impl CommandActivator {
    pub fn new(config: ActivationConfig) -> Self {
        Self { config }
    }

    fn render_args(&self, title: &str) -> Vec<String> {
        // Заголовок попадает внутрь строки в одинарных кавычках
        let quoted = title.replace('\'', "''");
        self.config.command.render_args(&[("{title}", quoted.as_str())])
    }
}

#[async_trait::async_trait]
impl WindowActivator for CommandActivator {
    async fn activate(&self, title: &str) -> bool {
        let args = self.render_args(title);
        let timeout = Duration::from_millis(self.config.timeout_ms);

        match run_command(&self.config.command.program, &args, timeout).await {
            Ok(stdout) => {
                // AppActivate печатает False, если окно не найдено
                let activated = !stdout.trim().eq_ignore_ascii_case("false");
                if activated {
                    debug_if_enabled!("Окно '{}' активировано", title);
                } else {
                    warn!("Окно '{}' не удалось активировать", title);
                }
                activated
            }
            Err(e) => {
                warn!("Ошибка активации окна '{}': {}", title, e);
                false
            }
        }
    }
}

/// Сухой режим: только логирует
#[derive(Debug, Default)]
pub struct DryRunActivator;

#[async_trait::async_trait]
impl WindowActivator for DryRunActivator {
    async fn activate(&self, title: &str) -> bool {
        info!("[DRY RUN] Активация окна '{}'", title);
        true
    }
}

/// Factory function to create an appropriate activator based on the dry_run flag
pub fn create_window_activator(config: &Config, dry_run: bool) -> Arc<dyn WindowActivator> {
    if dry_run {
        Arc::new(DryRunActivator)
    } else {
        Arc::new(CommandActivator::new(config.activation.clone()))
    }
}
