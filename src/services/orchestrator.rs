use crate::config::{Config, DetectionConfig};
use crate::error::{DockError, Result};
use crate::events::{DetectionEvent, WindowRecord};
use crate::services::activator::{create_window_activator, WindowActivator};
use crate::services::command_executor::{create_window_source, WindowSource};
use crate::services::detector::{display_order, Detector, DetectorStats};
use crate::services::state_store::{
    create_key_value_store, AttributeUpdate, AttributeValidator, KeyValueStore, StateSnapshot, StateStore,
};
use crate::services::title_parser::{classes, ClassInfo, TitleGrammar, TitleParser};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::time::{interval, sleep, Duration, MissedTickBehavior};
use tracing::{error, info, warn};

/// Порядок окон при организации
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind", content = "order")]
pub enum OrganizeLayout {
    /// Инициатива по убыванию
    ByInitiative,
    ByName,
    /// По классу, внутри класса по инициативе
    ByClass,
    /// Явный порядок идентификаторов; остальные окна в конце
    Custom(Vec<String>),
}

/// Сводка для панели настроек
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Statistics {
    pub total_windows: usize,
    pub enabled_windows: usize,
    pub active_window: Option<String>,
    pub by_class: BTreeMap<String, usize>,
    pub stored_attributes: usize,
    pub subscribers: usize,
    pub detector: DetectorStats,
}

/// Точка входа для внешнего слоя (IPC, CLI): собирает все компоненты
pub struct Orchestrator {
    detector: Arc<Detector>,
    store: Arc<StateStore>,
    activator: Arc<dyn WindowActivator>,
    detection: DetectionConfig,
    post_action_refresh: Duration,
}

impl Orchestrator {
    pub fn new(
        config: &Config,
        source: Arc<dyn WindowSource>,
        backend: Arc<dyn KeyValueStore>,
        activator: Arc<dyn WindowActivator>,
    ) -> Self {
        let grammar = if config.detection.strict_titles {
            TitleGrammar::Strict
        } else {
            TitleGrammar::Permissive
        };
        let validator = AttributeValidator::new(config.storage.max_name_len, config.storage.max_initiative);
        let store = Arc::new(StateStore::new(backend, validator));
        let detector = Arc::new(Detector::new(
            source,
            TitleParser::new(grammar),
            store.clone(),
            config.detection.clone(),
        ));

        Self {
            detector,
            store,
            activator,
            detection: config.detection.clone(),
            post_action_refresh: Duration::from_millis(config.activation.post_action_refresh_ms),
        }
    }

    /// Собирает оркестратор из конфигурации и загружает сохранённые атрибуты
    pub async fn from_config(config: &Config, dry_run: bool) -> Self {
        let orchestrator = Self::new(
            config,
            create_window_source(config, dry_run),
            create_key_value_store(config, dry_run),
            create_window_activator(config, dry_run),
        );
        orchestrator.store.load().await;
        orchestrator
    }

    pub async fn get_windows(&self) -> Vec<WindowRecord> {
        self.detector.detect().await
    }

    pub async fn refresh(&self) -> Vec<WindowRecord> {
        self.detector.refresh().await
    }

    /// Активирует окно по идентификатору и планирует обновление списка
    pub async fn activate_window(&self, id: &str) -> Result<bool> {
        let Some(record) = self.detector.find(id).await else {
            return DockError::window_not_found(id);
        };

        let activated = self.activator.activate(&record.title).await;
        if activated {
            info!("Активировано окно {} ({})", record.display_name(), id);
        }

        let detector = self.detector.clone();
        let delay = self.post_action_refresh;
        tokio::spawn(async move {
            if !delay.is_zero() {
                sleep(delay).await;
            }
            detector.refresh().await;
        });

        Ok(activated)
    }

    /// Включённые окна в заданном порядке
    pub async fn organize_windows(&self, layout: OrganizeLayout) -> Vec<WindowRecord> {
        let windows = self.detector.detect().await;
        let mut selected: Vec<WindowRecord> = windows.iter().filter(|w| w.enabled).cloned().collect();
        if selected.is_empty() && self.detection.enable_all_when_none_enabled {
            info!("Нет включённых окон, организуем все {}", windows.len());
            selected = windows;
        }

        match layout {
            OrganizeLayout::ByInitiative => selected.sort_by(display_order),
            OrganizeLayout::ByName => selected.sort_by(|a, b| {
                a.display_name()
                    .to_lowercase()
                    .cmp(&b.display_name().to_lowercase())
                    .then_with(|| a.id.cmp(&b.id))
            }),
            OrganizeLayout::ByClass => {
                selected.sort_by(|a, b| a.class.key().cmp(b.class.key()).then_with(|| display_order(a, b)))
            }
            OrganizeLayout::Custom(order) => {
                let rank: HashMap<&str, usize> = order.iter().enumerate().map(|(i, id)| (id.as_str(), i)).collect();
                selected.sort_by(|a, b| {
                    let ra = rank.get(a.id.as_str()).copied().unwrap_or(usize::MAX);
                    let rb = rank.get(b.id.as_str()).copied().unwrap_or(usize::MAX);
                    ra.cmp(&rb).then_with(|| display_order(a, b))
                });
            }
        }
        selected
    }

    pub async fn update_character_name(&self, id: &str, name: &str) -> Result<()> {
        self.update(id, AttributeUpdate::CustomName(name.to_string())).await
    }

    pub async fn update_initiative(&self, id: &str, initiative: i64) -> Result<()> {
        self.update(id, AttributeUpdate::Initiative(initiative)).await
    }

    pub async fn update_class(&self, id: &str, class: &str) -> Result<()> {
        self.update(id, AttributeUpdate::Class(class.to_string())).await
    }

    pub async fn update_enabled(&self, id: &str, enabled: bool) -> Result<()> {
        self.update(id, AttributeUpdate::Enabled(enabled)).await
    }

    pub async fn update_shortcut(&self, id: &str, shortcut: &str) -> Result<()> {
        self.update(id, AttributeUpdate::Shortcut(shortcut.to_string())).await
    }

    async fn update(&self, id: &str, update: AttributeUpdate) -> Result<()> {
        let kind = update.kind();
        if let Err(e) = self.store.update(id, update).await {
            warn!("Изменение {:?} для {} отклонено: {}", kind, id, e);
            return Err(e);
        }
        self.detector.apply_attributes().await;
        Ok(())
    }

    pub fn get_classes(&self) -> Vec<ClassInfo> {
        classes()
    }

    pub async fn get_statistics(&self) -> Statistics {
        let windows = self.detector.snapshot().await;
        let mut by_class = BTreeMap::new();
        for window in &windows {
            *by_class.entry(window.class.key().to_string()).or_insert(0) += 1;
        }

        Statistics {
            total_windows: windows.len(),
            enabled_windows: windows.iter().filter(|w| w.enabled).count(),
            active_window: windows.iter().find(|w| w.is_active).map(|w| w.id.clone()),
            by_class,
            stored_attributes: self.store.attributes().entry_count(),
            subscribers: self.store.subscriber_count(),
            detector: self.detector.stats(),
        }
    }

    pub fn export_states(&self) -> StateSnapshot {
        self.store.export()
    }

    pub async fn import_states(&self, snapshot: StateSnapshot) -> Result<()> {
        self.store.import(snapshot).await?;
        self.detector.apply_attributes().await;
        Ok(())
    }

    /// Сбрасывает сохранённые атрибуты и каноническое состояние
    pub async fn reset(&self) -> Result<()> {
        self.store.reset().await?;
        self.detector.clear().await;
        Ok(())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DetectionEvent> {
        self.store.subscribe()
    }

    /// Периодический опрос окон. Завершается только вместе с задачей.
    pub async fn run_polling(&self) {
        let period = Duration::from_millis(self.detection.polling_interval_ms);
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!("Опрос окон запущен (интервал {:?})", period);

        loop {
            ticker.tick().await;
            let detector = self.detector.clone();
            // Паника внутри цикла не должна останавливать опрос
            if let Err(e) = tokio::spawn(async move { detector.detect().await }).await {
                error!("Цикл детекции аварийно завершился: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::RawWindowHandle;
    use crate::services::command_executor::fake::ScriptedSource;
    use crate::services::state_store::MemoryStore;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingActivator {
        titles: Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl WindowActivator for RecordingActivator {
        async fn activate(&self, title: &str) -> bool {
            self.titles.lock().push(title.to_string());
            true
        }
    }

    fn windows() -> Vec<RawWindowHandle> {
        vec![
            RawWindowHandle::new(1, "Bob - Iop - 2.70 - Release").with_pid(10).with_active(true),
            RawWindowHandle::new(2, "Alice - Cra - 2.70 - Release").with_pid(20),
            RawWindowHandle::new(3, "Zed - Eniripsa - 2.70 - Release").with_pid(30),
        ]
    }

    fn test_config() -> Config {
        let mut config = Config::default();
        config.detection.debounce_ms = 500;
        config.detection.staleness_ms = 1_000;
        config.detection.batch_delay_ms = 0;
        config.activation.post_action_refresh_ms = 10;
        config
    }

    fn orchestrator_with(config: Config) -> (Orchestrator, Arc<ScriptedSource>, Arc<RecordingActivator>) {
        let source = Arc::new(ScriptedSource::new(windows()));
        let activator = Arc::new(RecordingActivator::default());
        let orchestrator = Orchestrator::new(&config, source.clone(), Arc::new(MemoryStore::new()), activator.clone());
        (orchestrator, source, activator)
    }

    fn ids(windows: &[WindowRecord]) -> Vec<&str> {
        windows.iter().map(|w| w.id.as_str()).collect()
    }

    #[tokio::test]
    async fn updates_are_visible_without_new_detection() {
        let (orchestrator, source, _) = orchestrator_with(test_config());
        orchestrator.get_windows().await;

        orchestrator.update_character_name("alice_cra_20", "Archer").await.unwrap();
        orchestrator.update_initiative("alice_cra_20", 500).await.unwrap();

        let windows = orchestrator.get_windows().await;
        assert_eq!(source.runs(), 1);
        assert_eq!(windows[0].id, "alice_cra_20");
        assert_eq!(windows[0].display_name(), "Archer");
    }

    #[tokio::test]
    async fn invalid_update_is_reported() {
        let (orchestrator, _, _) = orchestrator_with(test_config());
        assert!(orchestrator.update_initiative("bob_iop_10", -1).await.is_err());
        assert!(orchestrator.update_class("bob_iop_10", "paladin").await.is_err());
        assert!(orchestrator.update_shortcut("bob_iop_10", "ctrl+").await.is_err());
    }

    #[tokio::test]
    async fn class_override_keeps_id() {
        let (orchestrator, _, _) = orchestrator_with(test_config());
        orchestrator.get_windows().await;
        orchestrator.update_class("bob_iop_10", "sram").await.unwrap();

        let windows = orchestrator.get_windows().await;
        let bob = windows.iter().find(|w| w.id == "bob_iop_10").unwrap();
        assert_eq!(bob.class.key(), "sram");
        assert_eq!(bob.avatar_ref, "classes/sram.png");
    }

    #[tokio::test]
    async fn cleared_class_override_restores_detected_class() {
        let (orchestrator, _, _) = orchestrator_with(test_config());
        orchestrator.get_windows().await;
        orchestrator.update_class("bob_iop_10", "sram").await.unwrap();
        orchestrator.update_class("bob_iop_10", "").await.unwrap();

        let windows = orchestrator.get_windows().await;
        let bob = windows.iter().find(|w| w.id == "bob_iop_10").unwrap();
        assert_eq!(bob.class.key(), "iop");
        assert_eq!(bob.avatar_ref, "classes/iop.png");
        assert!(orchestrator.export_states().attributes.class_overrides.is_empty());
    }

    #[tokio::test]
    async fn import_without_override_restores_detected_class() {
        let (orchestrator, _, _) = orchestrator_with(test_config());
        orchestrator.get_windows().await;
        orchestrator.update_class("alice_cra_20", "xelor").await.unwrap();

        let (empty, _, _) = orchestrator_with(test_config());
        orchestrator.import_states(empty.export_states()).await.unwrap();

        let windows = orchestrator.get_windows().await;
        let alice = windows.iter().find(|w| w.id == "alice_cra_20").unwrap();
        assert_eq!(alice.class.key(), "cra");
    }

    #[tokio::test]
    async fn activate_unknown_window_fails() {
        let (orchestrator, _, activator) = orchestrator_with(test_config());
        orchestrator.get_windows().await;
        let err = orchestrator.activate_window("ghost_iop_1").await.unwrap_err();
        assert!(matches!(err, DockError::WindowNotFound(_)));
        assert!(activator.titles.lock().is_empty());
    }

    #[tokio::test]
    async fn activate_uses_title_and_schedules_refresh() {
        let (orchestrator, source, activator) = orchestrator_with(test_config());
        orchestrator.get_windows().await;

        assert!(orchestrator.activate_window("alice_cra_20").await.unwrap());
        assert_eq!(activator.titles.lock().as_slice(), ["Alice - Cra - 2.70 - Release"]);

        sleep(Duration::from_millis(60)).await;
        assert_eq!(source.runs(), 2);
    }

    #[tokio::test]
    async fn organize_orders_enabled_windows() {
        let (orchestrator, _, _) = orchestrator_with(test_config());
        orchestrator.get_windows().await;
        orchestrator.update_initiative("zed_eniripsa_30", 900).await.unwrap();
        orchestrator.update_initiative("bob_iop_10", 100).await.unwrap();
        orchestrator.update_enabled("alice_cra_20", false).await.unwrap();

        let by_initiative = orchestrator.organize_windows(OrganizeLayout::ByInitiative).await;
        assert_eq!(ids(&by_initiative), ["zed_eniripsa_30", "bob_iop_10"]);

        let by_name = orchestrator.organize_windows(OrganizeLayout::ByName).await;
        assert_eq!(ids(&by_name), ["bob_iop_10", "zed_eniripsa_30"]);

        let custom = orchestrator
            .organize_windows(OrganizeLayout::Custom(vec!["bob_iop_10".into()]))
            .await;
        assert_eq!(ids(&custom), ["bob_iop_10", "zed_eniripsa_30"]);
    }

    #[tokio::test]
    async fn organize_with_nothing_enabled() {
        let (orchestrator, _, _) = orchestrator_with(test_config());
        orchestrator.get_windows().await;
        for id in ["bob_iop_10", "alice_cra_20", "zed_eniripsa_30"] {
            orchestrator.update_enabled(id, false).await.unwrap();
        }
        assert!(orchestrator.organize_windows(OrganizeLayout::ByClass).await.is_empty());

        let mut config = test_config();
        config.detection.enable_all_when_none_enabled = true;
        let (fallback, _, _) = orchestrator_with(config);
        fallback.get_windows().await;
        fallback.update_enabled("bob_iop_10", false).await.unwrap();
        fallback.update_enabled("alice_cra_20", false).await.unwrap();
        fallback.update_enabled("zed_eniripsa_30", false).await.unwrap();
        let organized = fallback.organize_windows(OrganizeLayout::ByClass).await;
        assert_eq!(ids(&organized), ["alice_cra_20", "zed_eniripsa_30", "bob_iop_10"]);
    }

    #[tokio::test]
    async fn statistics_summarize_state() {
        let (orchestrator, _, _) = orchestrator_with(test_config());
        let _rx = orchestrator.subscribe();
        orchestrator.get_windows().await;
        orchestrator.update_enabled("bob_iop_10", false).await.unwrap();

        let stats = orchestrator.get_statistics().await;
        assert_eq!(stats.total_windows, 3);
        assert_eq!(stats.enabled_windows, 2);
        assert_eq!(stats.active_window.as_deref(), Some("bob_iop_10"));
        assert_eq!(stats.by_class.get("cra"), Some(&1));
        assert_eq!(stats.stored_attributes, 1);
        assert_eq!(stats.subscribers, 1);
        assert_eq!(stats.detector.cycles, 1);
        assert_eq!(stats.detector.source.runs, 1);
    }

    #[tokio::test]
    async fn import_applies_to_live_records() {
        let (source_side, _, _) = orchestrator_with(test_config());
        source_side.update_character_name("bob_iop_10", "Tank").await.unwrap();
        let snapshot = source_side.export_states();

        let (target, _, _) = orchestrator_with(test_config());
        target.get_windows().await;
        target.import_states(snapshot).await.unwrap();
        let bob = target.get_windows().await.into_iter().find(|w| w.id == "bob_iop_10").unwrap();
        assert_eq!(bob.custom_name.as_deref(), Some("Tank"));
    }

    #[tokio::test]
    async fn reset_clears_attributes_and_records() {
        let (orchestrator, _, _) = orchestrator_with(test_config());
        orchestrator.get_windows().await;
        orchestrator.update_initiative("bob_iop_10", 42).await.unwrap();

        orchestrator.reset().await.unwrap();
        assert!(orchestrator.export_states().attributes.is_empty());
        assert_eq!(orchestrator.get_statistics().await.total_windows, 0);

        let windows = orchestrator.get_windows().await;
        assert!(windows.iter().all(|w| w.initiative == 0));
    }

    #[tokio::test]
    async fn polling_notifies_subscribers() {
        let mut config = test_config();
        config.detection.polling_interval_ms = 100;
        let (orchestrator, _, _) = orchestrator_with(config);
        let orchestrator = Arc::new(orchestrator);
        let mut rx = orchestrator.subscribe();

        let poller = tokio::spawn({
            let orchestrator = orchestrator.clone();
            async move { orchestrator.run_polling().await }
        });

        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
        assert_eq!(event.windows.len(), 3);
        poller.abort();
    }
}
