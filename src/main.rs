use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use multibox_dock::config::Config;
use multibox_dock::services::state_store::StateSnapshot;
use multibox_dock::services::Orchestrator;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "multibox-dock")]
#[command(about = "Обнаружение окон игровых клиентов и сопоставление их с настройками персонажей")]
struct Args {
    /// Путь к файлу конфигурации
    #[arg(short, long, default_value = "multibox-dock.toml")]
    config: String,

    /// Режим сухого запуска (без реальных действий)
    #[arg(long)]
    dry_run: bool,

    /// Уровень логирования (перекрывает logging.filter из конфигурации)
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Периодический опрос окон до Ctrl+C (по умолчанию)
    Watch,
    /// Однократная детекция, список окон в JSON
    List,
    /// Известные классы
    Classes,
    /// Статистика после одного цикла детекции
    Stats,
    /// Экспорт сохранённых настроек окон
    Export { file: PathBuf },
    /// Импорт настроек окон из файла экспорта
    Import { file: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Загрузка конфигурации
    let config = Config::load(&args.config)?;

    // Инициализация системы логирования
    let filter = args.log_level.as_deref().unwrap_or(&config.logging.filter);
    init_tracing(filter, &config.logging.format)?;

    info!("Запуск multibox-dock v{}", env!("CARGO_PKG_VERSION"));
    info!("Конфигурация загружена из: {}", args.config);

    if args.dry_run {
        warn!("Режим сухого запуска - реальные окна не опрашиваются");
    }

    let orchestrator = Arc::new(Orchestrator::from_config(&config, args.dry_run).await);

    match args.command.unwrap_or(Command::Watch) {
        Command::Watch => watch(orchestrator).await,
        Command::List => print_json(&orchestrator.get_windows().await),
        Command::Classes => print_json(&orchestrator.get_classes()),
        Command::Stats => {
            orchestrator.get_windows().await;
            print_json(&orchestrator.get_statistics().await)
        }
        Command::Export { file } => {
            let snapshot = orchestrator.export_states();
            let json = serde_json::to_string_pretty(&snapshot)?;
            tokio::fs::write(&file, json)
                .await
                .with_context(|| format!("Не удалось записать {:?}", file))?;
            info!("Настройки экспортированы в {:?}", file);
            Ok(())
        }
        Command::Import { file } => {
            let json = tokio::fs::read_to_string(&file)
                .await
                .with_context(|| format!("Не удалось прочитать {:?}", file))?;
            let snapshot: StateSnapshot = serde_json::from_str(&json)?;
            orchestrator.import_states(snapshot).await?;
            info!("Настройки импортированы из {:?}", file);
            Ok(())
        }
    }
}

async fn watch(orchestrator: Arc<Orchestrator>) -> Result<()> {
    let mut events = orchestrator.subscribe();
    let poller = tokio::spawn({
        let orchestrator = orchestrator.clone();
        async move { orchestrator.run_polling().await }
    });

    info!("Опрос окон запущен");

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    let names: Vec<&str> = event.windows.iter().map(|w| w.display_name()).collect();
                    info!("Цикл #{}: {} окон {:?}", event.operation_id, names.len(), names);
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Пропущено {} событий детекции", skipped);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
            result = signal::ctrl_c() => {
                match result {
                    Ok(()) => info!("Получен сигнал завершения (Ctrl+C)"),
                    Err(err) => error!("Ошибка при ожидании сигнала завершения: {}", err),
                }
                break;
            }
        }
    }

    info!("Завершение работы...");
    poller.abort();
    let _ = poller.await;

    info!("multibox-dock завершил работу");
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn init_tracing(filter: &str, format: &str) -> Result<()> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(filter))?;

    // Логи в stderr, чтобы не смешивать с JSON в stdout
    let layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
    let registry = tracing_subscriber::registry().with(filter);
    if format == "compact" {
        registry.with(layer.compact()).init();
    } else {
        registry.with(layer).init();
    }

    Ok(())
}
