use thiserror::Error;

#[derive(Error, Debug)]
pub enum DockError {
    #[error("Ошибка ввода-вывода: {0}")]
    Io(#[from] std::io::Error),

    #[error("Ошибка сериализации: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Окно не найдено: {0}")]
    WindowNotFound(String),

    #[error("Недопустимое значение: {0}")]
    Validation(String),

    #[error("Ошибка хранилища: {0}")]
    Persistence(String),
}

impl DockError {
    pub fn window_not_found<T>(id: impl Into<String>) -> Result<T> {
        Err(DockError::WindowNotFound(id.into()))
    }
}

pub type Result<T> = std::result::Result<T, DockError>;

/// Ошибки запуска внешней утилиты опроса окон
#[derive(Error, Debug)]
pub enum ExecError {
    #[error("утилита '{0}' не найдена")]
    ToolNotFound(String),

    #[error("превышен таймаут {0}мс")]
    Timeout(u64),

    #[error("не удалось запустить процесс: {0}")]
    Spawn(std::io::Error),

    #[error("процесс завершился с кодом {code:?}: {stderr}")]
    NonZeroExit { code: Option<i32>, stderr: String },

    #[error("некорректный вывод: {0}")]
    Validation(String),

    #[error("не удалось подготовить скрипт: {0}")]
    Script(std::io::Error),

    #[error("утилита недоступна")]
    Unavailable,
}

impl ExecError {
    /// Временные ошибки повторяются с задержкой, остальные сразу уходят в fallback
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ExecError::Timeout(_) | ExecError::Spawn(_) | ExecError::NonZeroExit { .. }
        )
    }
}

// Удобные макросы для создания ошибок
#[macro_export]
macro_rules! dock_error {
    (validation, $($arg:tt)*) => {
        $crate::error::DockError::Validation(format!($($arg)*))
    };
    (persistence, $($arg:tt)*) => {
        $crate::error::DockError::Persistence(format!($($arg)*))
    };
}
