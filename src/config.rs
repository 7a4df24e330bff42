use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub activation: ActivationConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
    pub filter: String,
}

/// Команда внешней утилиты: программа и аргументы с плейсхолдерами
/// (`{script}`, `{processes}`, `{title}`)
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct QueryCommand {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl QueryCommand {
    pub fn new(program: impl Into<String>, args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }

    /// Подставляет значения плейсхолдеров во все аргументы
    pub fn render_args(&self, replacements: &[(&str, &str)]) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| {
                replacements
                    .iter()
                    .fold(arg.clone(), |acc, (key, value)| acc.replace(key, value))
            })
            .collect()
    }

    pub fn uses_placeholder(&self, placeholder: &str) -> bool {
        self.args.iter().any(|a| a.contains(placeholder))
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Полный перечень окон (скрипт пишется на диск один раз за процесс)
    pub primary: QueryCommand,
    /// Дешёвая проверка наличия утилиты
    pub probe: QueryCommand,
    /// Упрощённый запрос: только главные окна процессов, без координат
    pub fallback: QueryCommand,
    pub process_names: Vec<String>,
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub availability_recheck_ms: u64,
    pub max_output_bytes: usize,
    pub script_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub debounce_ms: u64,
    pub staleness_ms: u64,
    pub max_concurrent: usize,
    pub queue_capacity: usize,
    pub batch_size: usize,
    pub batch_delay_ms: u64,
    pub polling_interval_ms: u64,
    /// Строгая грамматика: ровно 4 сегмента и суффикс "Release"
    pub strict_titles: bool,
    /// Если ни одно окно не включено, организовывать все окна
    pub enable_all_when_none_enabled: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    pub path: Option<PathBuf>,
    pub in_memory: bool,
    pub max_name_len: usize,
    pub max_initiative: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ActivationConfig {
    pub command: QueryCommand,
    pub timeout_ms: u64,
    /// Задержка перед обновлением списка после активации окна
    pub post_action_refresh_ms: u64,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            filter: "multibox_dock=info".to_string(),
        }
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            primary: QueryCommand::new(
                "powershell",
                &["-NoProfile", "-NonInteractive", "-ExecutionPolicy", "Bypass", "-File", "{script}"],
            ),
            probe: QueryCommand::new(
                "powershell",
                &["-NoProfile", "-NonInteractive", "-Command", "$PSVersionTable.PSVersion.Major"],
            ),
            fallback: QueryCommand::new(
                "powershell",
                &[
                    "-NoProfile",
                    "-NonInteractive",
                    "-Command",
                    "Get-Process -Name {processes} -ErrorAction SilentlyContinue | \
                     Where-Object { $_.MainWindowHandle -ne 0 } | \
                     Select-Object Id, MainWindowTitle, @{n='MainWindowHandle';e={[string][int64]$_.MainWindowHandle}} | \
                     ConvertTo-Json -Compress",
                ],
            ),
            process_names: vec!["Dofus".to_string()],
            timeout_ms: 5_000,
            max_retries: 2,
            retry_base_delay_ms: 200,
            retry_max_delay_ms: 2_000,
            availability_recheck_ms: 30_000,
            max_output_bytes: 1024 * 1024,
            script_dir: None,
        }
    }
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 500,
            staleness_ms: 5_000,
            max_concurrent: 2,
            queue_capacity: 8,
            batch_size: 4,
            batch_delay_ms: 5,
            polling_interval_ms: 2_000,
            strict_titles: false,
            enable_all_when_none_enabled: false,
        }
    }
}

impl Default for ActivationConfig {
    fn default() -> Self {
        Self {
            command: QueryCommand::new(
                "powershell",
                &[
                    "-NoProfile",
                    "-NonInteractive",
                    "-Command",
                    "(New-Object -ComObject WScript.Shell).AppActivate('{title}')",
                ],
            ),
            timeout_ms: 3_000,
            post_action_refresh_ms: 150,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: None,
            in_memory: false,
            max_name_len: 50,
            max_initiative: 9_999,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            logging: LoggingConfig::default(),
            executor: ExecutorConfig::default(),
            detection: DetectionConfig::default(),
            storage: StorageConfig::default(),
            activation: ActivationConfig::default(),
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let config_path = config_path.as_ref();

        let figment = Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file(config_path))
            .merge(Env::prefixed("DOCK_").split("__"));

        let config: Config = figment
            .extract()
            .with_context(|| format!("Не удалось загрузить конфигурацию из {:?}", config_path))?;

        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        // Валидация настроек логирования
        match self.logging.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!("Неверный уровень логирования: {}", self.logging.level),
        }

        match self.logging.format.as_str() {
            "pretty" | "compact" => {}
            _ => anyhow::bail!("Неверный формат логирования: {}", self.logging.format),
        }

        // Валидация настроек утилиты опроса
        for (name, cmd) in [
            ("primary", &self.executor.primary),
            ("probe", &self.executor.probe),
            ("fallback", &self.executor.fallback),
            ("activation", &self.activation.command),
        ] {
            if cmd.program.trim().is_empty() {
                anyhow::bail!("Пустая программа в команде {}", name);
            }
        }

        if self.executor.timeout_ms == 0 {
            anyhow::bail!("timeout_ms должно быть больше 0");
        }

        if self.executor.max_retries > 10 {
            anyhow::bail!("max_retries не может быть больше 10");
        }

        if self.executor.retry_base_delay_ms > self.executor.retry_max_delay_ms {
            anyhow::bail!("retry_base_delay_ms не может превышать retry_max_delay_ms");
        }

        if self.executor.max_output_bytes < 1024 {
            anyhow::bail!("max_output_bytes должно быть минимум 1024");
        }

        if self.executor.process_names.iter().any(|p| p.trim().is_empty()) {
            anyhow::bail!("Пустое имя процесса в process_names");
        }

        // Валидация настроек детекции
        if self.detection.max_concurrent == 0 {
            anyhow::bail!("max_concurrent должно быть больше 0");
        }

        if self.detection.batch_size == 0 {
            anyhow::bail!("batch_size должно быть больше 0");
        }

        if self.detection.staleness_ms < self.detection.debounce_ms {
            anyhow::bail!(
                "staleness_ms ({}) не может быть меньше debounce_ms ({})",
                self.detection.staleness_ms,
                self.detection.debounce_ms
            );
        }

        if self.detection.polling_interval_ms < 100 {
            anyhow::bail!("polling_interval_ms должно быть минимум 100");
        }

        if self.storage.max_name_len == 0 {
            anyhow::bail!("storage.max_name_len должно быть больше 0");
        }

        if self.activation.timeout_ms == 0 {
            anyhow::bail!("activation.timeout_ms должно быть больше 0");
        }

        Ok(())
    }

    /// Путь к файлу с пользовательскими настройками окон
    pub fn storage_path(&self) -> PathBuf {
        self.storage.path.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("multibox-dock")
                .join("window-state.json")
        })
    }

    /// Каталог, куда один раз за процесс записывается скрипт перечисления окон
    pub fn script_dir(&self) -> PathBuf {
        self.executor.script_dir.clone().unwrap_or_else(|| {
            dirs::cache_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("multibox-dock")
        })
    }
}
