use super::query::{powershell_name_list, run_command, ScriptInstaller};
use super::records::records_from_value;
use super::r#trait::{SourceStats, WindowSource};
use crate::config::{ExecutorConfig, QueryCommand};
use crate::debug_if_enabled;
use crate::error::ExecError;
use crate::events::RawWindowHandle;
use crate::services::title_parser::safe_json::{parse_loose, ParseStrategy};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::time::{sleep, Duration, Instant};
use tracing::{info, warn};

const SCRIPT_PLACEHOLDER: &str = "{script}";
const PROCESSES_PLACEHOLDER: &str = "{processes}";

#[derive(Debug, Default)]
struct Counters {
    runs: AtomicU64,
    retries: AtomicU64,
    timeouts: AtomicU64,
    fallbacks: AtomicU64,
    failures: AtomicU64,
}

#[derive(Debug, Clone, Copy)]
struct Availability {
    available: bool,
    checked_at: Instant,
}

/// Запуск утилиты опроса окон: кэш доступности, таймауты, повторы с
/// экспоненциальной задержкой, разбор вывода и упрощённый запрос на случай отказа
pub struct CommandExecutor {
    config: ExecutorConfig,
    script: ScriptInstaller,
    availability: Mutex<Option<Availability>>,
    counters: Counters,
}

impl CommandExecutor {
    pub fn new(config: ExecutorConfig, script_dir: PathBuf) -> Self {
        info!(
            "Инициализация CommandExecutor: {} (процессы: {:?})",
            config.primary.program, config.process_names
        );
        let script = ScriptInstaller::new(script_dir, &config.process_names);
        Self {
            config,
            script,
            availability: Mutex::new(None),
            counters: Counters::default(),
        }
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(self.config.timeout_ms)
    }

    fn cached_availability(&self) -> Option<bool> {
        let recheck = Duration::from_millis(self.config.availability_recheck_ms);
        let cached = *self.availability.lock();
        cached
            .filter(|a| a.checked_at.elapsed() < recheck)
            .map(|a| a.available)
    }

    fn set_availability(&self, available: bool) {
        *self.availability.lock() = Some(Availability {
            available,
            checked_at: Instant::now(),
        });
    }

    /// Доступность утилиты; пробный запуск выполняется не чаще интервала перепроверки
    pub async fn check_availability(&self) -> bool {
        if let Some(available) = self.cached_availability() {
            return available;
        }

        let probe = &self.config.probe;
        let args = self.render(probe, None);
        let available = match run_command(&probe.program, &args, self.timeout()).await {
            Ok(_) => true,
            Err(e) => {
                warn!("Утилита {} недоступна: {}", probe.program, e);
                false
            }
        };

        if available {
            debug_if_enabled!("Утилита {} доступна", probe.program);
        }
        self.set_availability(available);
        available
    }

    fn render(&self, command: &QueryCommand, script: Option<&str>) -> Vec<String> {
        let processes = powershell_name_list(&self.config.process_names);
        let mut replacements = vec![(PROCESSES_PLACEHOLDER, processes.as_str())];
        if let Some(script) = script {
            replacements.push((SCRIPT_PLACEHOLDER, script));
        }
        command.render_args(&replacements)
    }

    /// Задержка перед повтором: base * 2^attempt, не больше max
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let ms = self
            .config
            .retry_base_delay_ms
            .saturating_mul(2u64.saturating_pow(attempt))
            .min(self.config.retry_max_delay_ms);
        Duration::from_millis(ms)
    }

    async fn run_with_retry(&self, program: &str, args: &[String]) -> Result<String, ExecError> {
        let mut attempt = 0u32;
        loop {
            match run_command(program, args, self.timeout()).await {
                Ok(stdout) => return Ok(stdout),
                Err(ExecError::ToolNotFound(tool)) => {
                    self.set_availability(false);
                    return Err(ExecError::ToolNotFound(tool));
                }
                Err(e) => {
                    if matches!(e, ExecError::Timeout(_)) {
                        self.counters.timeouts.fetch_add(1, Ordering::Relaxed);
                    }
                    if !e.is_transient() || attempt >= self.config.max_retries {
                        return Err(e);
                    }
                    let delay = self.backoff_delay(attempt);
                    attempt += 1;
                    self.counters.retries.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        "Запрос окон не удался ({}), повтор {}/{} через {:?}",
                        e, attempt, self.config.max_retries, delay
                    );
                    sleep(delay).await;
                }
            }
        }
    }

    fn parse_output(&self, stdout: &str) -> Result<Vec<RawWindowHandle>, ExecError> {
        let parsed = parse_loose(stdout, self.config.max_output_bytes)?;
        if parsed.is_fallback() {
            return Err(ExecError::Validation("вывод не удалось разобрать".to_string()));
        }
        if parsed.strategy != ParseStrategy::Strict {
            warn!("Вывод утилиты восстановлен стратегией {:?}", parsed.strategy);
        }
        Ok(records_from_value(parsed.value))
    }

    async fn run_primary(&self) -> Result<Vec<RawWindowHandle>, ExecError> {
        if !self.check_availability().await {
            return Err(ExecError::Unavailable);
        }

        let primary = &self.config.primary;
        let args = if primary.uses_placeholder(SCRIPT_PLACEHOLDER) {
            let path = self.script.ensure().await?;
            let path = path.to_string_lossy().into_owned();
            self.render(primary, Some(&path))
        } else {
            self.render(primary, None)
        };

        let stdout = self.run_with_retry(&primary.program, &args).await?;
        self.parse_output(&stdout)
    }

    async fn run_fallback(&self) -> Result<Vec<RawWindowHandle>, ExecError> {
        let fallback = &self.config.fallback;
        let args = self.render(fallback, None);
        let stdout = run_command(&fallback.program, &args, self.timeout()).await?;
        self.parse_output(&stdout)
    }

    /// Полный проход: основной запрос, затем упрощённый, затем пустой список
    pub async fn run_query(&self) -> Vec<RawWindowHandle> {
        self.counters.runs.fetch_add(1, Ordering::Relaxed);

        match self.run_primary().await {
            Ok(windows) => {
                debug_if_enabled!("Основной запрос вернул {} окон", windows.len());
                return windows;
            }
            Err(e) => warn!("Основной запрос окон не удался: {}. Пробуем упрощённый", e),
        }

        self.counters.fallbacks.fetch_add(1, Ordering::Relaxed);
        match self.run_fallback().await {
            Ok(windows) => {
                info!("Упрощённый запрос вернул {} окон", windows.len());
                windows
            }
            Err(e) => {
                self.counters.failures.fetch_add(1, Ordering::Relaxed);
                warn!("Упрощённый запрос окон тоже не удался: {}. Окна не обнаружены", e);
                Vec::new()
            }
        }
    }
}

#[async_trait::async_trait]
impl WindowSource for CommandExecutor {
    async fn availability(&self) -> bool {
        self.check_availability().await
    }

    async fn run(&self) -> Vec<RawWindowHandle> {
        self.run_query().await
    }

    fn stats(&self) -> SourceStats {
        let availability = *self.availability.lock();
        SourceStats {
            runs: self.counters.runs.load(Ordering::Relaxed),
            retries: self.counters.retries.load(Ordering::Relaxed),
            timeouts: self.counters.timeouts.load(Ordering::Relaxed),
            fallbacks: self.counters.fallbacks.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
            available: availability.map(|a| a.available),
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> QueryCommand {
        QueryCommand::new("sh", &["-c", script])
    }

    fn config(primary: QueryCommand, fallback: QueryCommand) -> ExecutorConfig {
        ExecutorConfig {
            primary,
            probe: sh("true"),
            fallback,
            process_names: vec!["Dofus".to_string()],
            timeout_ms: 2_000,
            max_retries: 2,
            retry_base_delay_ms: 10,
            retry_max_delay_ms: 40,
            availability_recheck_ms: 60_000,
            max_output_bytes: 64 * 1024,
            script_dir: None,
        }
    }

    fn executor(cfg: ExecutorConfig) -> (CommandExecutor, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        (CommandExecutor::new(cfg, dir.path().to_path_buf()), dir)
    }

    const TWO_WINDOWS: &str = r#"printf '[{"Handle":"11","Title":"Bob - Iop - 2.70 - Release","ProcessId":10,"ClassName":"W","IsActive":true,"Bounds":{"X":0,"Y":0,"Width":800,"Height":600}},{"Handle":"12","Title":"Alice - Cra - 2.70 - Release","ProcessId":20,"ClassName":"W","IsActive":false,"Bounds":{"X":5,"Y":5,"Width":800,"Height":600}}]'"#;

    #[tokio::test]
    async fn primary_output_is_parsed() {
        let (exec, _dir) = executor(config(sh(TWO_WINDOWS), sh("exit 1")));
        let windows = exec.run().await;
        assert_eq!(windows.len(), 2);
        assert_eq!(windows[0].handle, 11);
        assert!(windows[0].is_active);
        assert_eq!(exec.stats().fallbacks, 0);
        assert_eq!(exec.stats().available, Some(true));
    }

    #[tokio::test]
    async fn transient_failures_are_retried_then_fallback_used() {
        let fallback = sh(r#"printf '{"Id":30,"MainWindowTitle":"Zed - Sram - 2.70 - Release","MainWindowHandle":"31"}'"#);
        let (exec, _dir) = executor(config(sh("exit 2"), fallback));

        let windows = exec.run().await;
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].process_id, 30);

        let stats = exec.stats();
        assert_eq!(stats.retries, 2);
        assert_eq!(stats.fallbacks, 1);
        assert_eq!(stats.failures, 0);
    }

    #[tokio::test]
    async fn missing_tool_is_not_retried_and_marks_unavailable() {
        let primary = QueryCommand::new("definitely-not-a-real-tool-4242", &[]);
        let (exec, _dir) = executor(config(primary, sh("printf '[]'")));

        let windows = exec.run().await;
        assert!(windows.is_empty());
        let stats = exec.stats();
        assert_eq!(stats.retries, 0);
        assert_eq!(stats.fallbacks, 1);
        assert_eq!(stats.available, Some(false));
        // Кэш держит "недоступно" до перепроверки
        assert!(!exec.availability().await);
    }

    #[tokio::test]
    async fn total_failure_returns_empty_list() {
        let (exec, _dir) = executor(config(sh("printf 'garbage output'"), sh("exit 1")));
        let windows = exec.run().await;
        assert!(windows.is_empty());
        assert_eq!(exec.stats().failures, 1);
    }

    #[tokio::test]
    async fn malformed_output_is_recovered() {
        let (exec, _dir) = executor(config(
            sh(r#"printf '[{Handle: "7", Title: "Bob - Iop - 2.70 - Release", ProcessId: 10,},]'"#),
            sh("exit 1"),
        ));
        let windows = exec.run().await;
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].handle, 7);
    }

    #[tokio::test]
    async fn script_placeholder_installs_script() {
        let primary = sh(r#"test -f "$0" && printf '[]'"#);
        let mut cfg = config(primary, sh("exit 1"));
        cfg.primary.args.push("{script}".to_string());
        let (exec, _dir) = executor(cfg);

        let windows = exec.run().await;
        assert!(windows.is_empty());
        assert!(exec.script.is_installed());
        assert_eq!(exec.stats().fallbacks, 0);
    }

    #[tokio::test]
    async fn unavailable_probe_goes_straight_to_fallback() {
        let mut cfg = config(sh(TWO_WINDOWS), sh("printf '[]'"));
        cfg.probe = sh("exit 1");
        let (exec, _dir) = executor(cfg);

        assert!(exec.run().await.is_empty());
        assert_eq!(exec.stats().available, Some(false));
        assert_eq!(exec.stats().fallbacks, 1);
    }

    #[test]
    fn backoff_grows_and_is_capped() {
        let (exec, _dir) = executor(config(sh("true"), sh("true")));
        assert_eq!(exec.backoff_delay(0), Duration::from_millis(10));
        assert_eq!(exec.backoff_delay(1), Duration::from_millis(20));
        assert_eq!(exec.backoff_delay(2), Duration::from_millis(40));
        assert_eq!(exec.backoff_delay(10), Duration::from_millis(40));
    }
}
