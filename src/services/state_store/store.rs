use super::persistence::KeyValueStore;
use super::validator::AttributeValidator;
use crate::debug_if_enabled;
use crate::dock_error;
use crate::error::Result;
use crate::events::{DetectionEvent, WindowRecord};
use crate::services::title_parser::KnownClass;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tracing::{info, warn};

pub const SNAPSHOT_VERSION: u32 = 1;
const EVENT_CHANNEL_CAPACITY: usize = 16;

/// Вид пользовательского атрибута; каждому соответствует свой ключ в хранилище
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttributeKind {
    CustomName,
    Initiative,
    ClassOverride,
    Shortcut,
    Enabled,
}

impl AttributeKind {
    pub const ALL: [AttributeKind; 5] = [
        AttributeKind::CustomName,
        AttributeKind::Initiative,
        AttributeKind::ClassOverride,
        AttributeKind::Shortcut,
        AttributeKind::Enabled,
    ];

    pub fn namespace(self) -> &'static str {
        match self {
            AttributeKind::CustomName => "customNames",
            AttributeKind::Initiative => "initiatives",
            AttributeKind::ClassOverride => "classOverrides",
            AttributeKind::Shortcut => "shortcuts",
            AttributeKind::Enabled => "enabled",
        }
    }
}

/// Изменение одного атрибута окна
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeUpdate {
    CustomName(String),
    Initiative(i64),
    Class(String),
    Shortcut(String),
    Enabled(bool),
}

impl AttributeUpdate {
    pub fn kind(&self) -> AttributeKind {
        match self {
            AttributeUpdate::CustomName(_) => AttributeKind::CustomName,
            AttributeUpdate::Initiative(_) => AttributeKind::Initiative,
            AttributeUpdate::Class(_) => AttributeKind::ClassOverride,
            AttributeUpdate::Shortcut(_) => AttributeKind::Shortcut,
            AttributeUpdate::Enabled(_) => AttributeKind::Enabled,
        }
    }
}

/// Сохранённые атрибуты по стабильному идентификатору окна.
/// BTreeMap даёт детерминированный порядок при экспорте.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AttributeMaps {
    pub custom_names: BTreeMap<String, String>,
    pub initiatives: BTreeMap<String, u32>,
    pub class_overrides: BTreeMap<String, KnownClass>,
    pub shortcuts: BTreeMap<String, String>,
    pub enabled: BTreeMap<String, bool>,
}

impl AttributeMaps {
    fn namespace_json(&self, kind: AttributeKind) -> Result<String> {
        let json = match kind {
            AttributeKind::CustomName => serde_json::to_string(&self.custom_names)?,
            AttributeKind::Initiative => serde_json::to_string(&self.initiatives)?,
            AttributeKind::ClassOverride => serde_json::to_string(&self.class_overrides)?,
            AttributeKind::Shortcut => serde_json::to_string(&self.shortcuts)?,
            AttributeKind::Enabled => serde_json::to_string(&self.enabled)?,
        };
        Ok(json)
    }

    fn load_namespace(&mut self, kind: AttributeKind, json: &str) -> Result<()> {
        match kind {
            AttributeKind::CustomName => self.custom_names = serde_json::from_str(json)?,
            AttributeKind::Initiative => self.initiatives = serde_json::from_str(json)?,
            AttributeKind::ClassOverride => self.class_overrides = serde_json::from_str(json)?,
            AttributeKind::Shortcut => self.shortcuts = serde_json::from_str(json)?,
            AttributeKind::Enabled => self.enabled = serde_json::from_str(json)?,
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.custom_names.is_empty()
            && self.initiatives.is_empty()
            && self.class_overrides.is_empty()
            && self.shortcuts.is_empty()
            && self.enabled.is_empty()
    }

    pub fn entry_count(&self) -> usize {
        self.custom_names.len()
            + self.initiatives.len()
            + self.class_overrides.len()
            + self.shortcuts.len()
            + self.enabled.len()
    }
}

/// Полная резервная копия атрибутов
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateSnapshot {
    pub version: u32,
    pub exported_at: DateTime<Utc>,
    pub attributes: AttributeMaps,
}

/// Хранение пользовательских атрибутов окон, их проверка и применение
/// к свежеобнаруженным записям. Устаревшие записи удаляет только Detector.
pub struct StateStore {
    backend: Arc<dyn KeyValueStore>,
    validator: AttributeValidator,
    attributes: RwLock<AttributeMaps>,
    // Сериализует цепочку "сохранить -> применить в памяти"
    write_lock: Mutex<()>,
    events: broadcast::Sender<DetectionEvent>,
}

impl StateStore {
    pub fn new(backend: Arc<dyn KeyValueStore>, validator: AttributeValidator) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            backend,
            validator,
            attributes: RwLock::new(AttributeMaps::default()),
            write_lock: Mutex::new(()),
            events,
        }
    }

    /// Читает все пространства имён; нечитаемые начинаются пустыми
    pub async fn load(&self) {
        let mut loaded = AttributeMaps::default();
        for kind in AttributeKind::ALL {
            match self.backend.get(kind.namespace()).await {
                Ok(Some(json)) => {
                    if let Err(e) = loaded.load_namespace(kind, &json) {
                        warn!("Атрибуты '{}' повреждены ({}), начинаем с пустых", kind.namespace(), e);
                    }
                }
                Ok(None) => {}
                Err(e) => warn!("Не удалось прочитать атрибуты '{}': {}", kind.namespace(), e),
            }
        }
        info!("Загружено {} сохранённых атрибутов окон", loaded.entry_count());
        *self.attributes.write() = loaded;
    }

    pub fn attributes(&self) -> AttributeMaps {
        self.attributes.read().clone()
    }

    /// Применяет сохранённые атрибуты к записи
    pub fn enrich(&self, mut record: WindowRecord) -> WindowRecord {
        let attributes = self.attributes.read();
        let id = record.id.as_str();

        record.custom_name = attributes.custom_names.get(id).cloned();
        record.initiative = attributes.initiatives.get(id).copied().unwrap_or(0);
        record.shortcut = attributes.shortcuts.get(id).cloned();
        record.enabled = attributes.enabled.get(id).copied().unwrap_or(true);
        let class = attributes
            .class_overrides
            .get(id)
            .copied()
            .unwrap_or(record.detected_class);
        record.class = class;
        record.avatar_ref = class.avatar_ref();
        record
    }

    /// Проверяет и сохраняет атрибут. При ошибке хранилища состояние в памяти не меняется.
    pub async fn update(&self, id: &str, update: AttributeUpdate) -> Result<()> {
        self.validator.window_id(id)?;
        let kind = update.kind();

        let _guard = self.write_lock.lock().await;
        let mut next = self.attributes.read().clone();
        self.apply_update(&mut next, id, update)?;

        let json = next.namespace_json(kind)?;
        self.backend
            .set(kind.namespace(), json)
            .await
            .map_err(|e| dock_error!(persistence, "не удалось сохранить '{}': {}", kind.namespace(), e))?;

        *self.attributes.write() = next;
        debug_if_enabled!("Атрибут {:?} окна {} обновлён", kind, id);
        Ok(())
    }

    fn apply_update(&self, maps: &mut AttributeMaps, id: &str, update: AttributeUpdate) -> Result<()> {
        let id = id.to_string();
        match update {
            AttributeUpdate::CustomName(name) => match self.validator.custom_name(&name)? {
                Some(name) => {
                    maps.custom_names.insert(id, name);
                }
                None => {
                    maps.custom_names.remove(&id);
                }
            },
            AttributeUpdate::Initiative(value) => {
                maps.initiatives.insert(id, self.validator.initiative(value)?);
            }
            AttributeUpdate::Class(value) => match self.validator.class(&value)? {
                Some(class) => {
                    maps.class_overrides.insert(id, class);
                }
                None => {
                    maps.class_overrides.remove(&id);
                }
            },
            AttributeUpdate::Shortcut(value) => match self.validator.shortcut(&value)? {
                Some(shortcut) => {
                    if let Some((owner, _)) = maps.shortcuts.iter().find(|(owner, s)| **s == shortcut && **owner != id) {
                        return Err(dock_error!(validation, "сочетание {} уже назначено окну {}", shortcut, owner));
                    }
                    maps.shortcuts.insert(id, shortcut);
                }
                None => {
                    maps.shortcuts.remove(&id);
                }
            },
            AttributeUpdate::Enabled(enabled) => {
                maps.enabled.insert(id, enabled);
            }
        }
        Ok(())
    }

    pub fn export(&self) -> StateSnapshot {
        StateSnapshot {
            version: SNAPSHOT_VERSION,
            exported_at: Utc::now(),
            attributes: self.attributes(),
        }
    }

    /// Импорт целиком: снимок сначала проверяется, затем сохраняется
    pub async fn import(&self, snapshot: StateSnapshot) -> Result<()> {
        if snapshot.version > SNAPSHOT_VERSION {
            return Err(dock_error!(
                validation,
                "версия снимка {} новее поддерживаемой {}",
                snapshot.version,
                SNAPSHOT_VERSION
            ));
        }
        self.validate_maps(&snapshot.attributes)?;

        let _guard = self.write_lock.lock().await;
        self.persist_all(&snapshot.attributes).await?;
        info!(
            "Импортировано {} атрибутов (снимок от {})",
            snapshot.attributes.entry_count(),
            snapshot.exported_at
        );
        *self.attributes.write() = snapshot.attributes;
        Ok(())
    }

    /// Полный сброс сохранённых атрибутов
    pub async fn reset(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let empty = AttributeMaps::default();
        self.persist_all(&empty).await?;
        *self.attributes.write() = empty;
        info!("Сохранённые атрибуты окон сброшены");
        Ok(())
    }

    /// Все пространства имён одной записью: при ошибке хранилище не меняется
    async fn persist_all(&self, maps: &AttributeMaps) -> Result<()> {
        let entries = AttributeKind::ALL
            .iter()
            .map(|kind| Ok((kind.namespace().to_string(), maps.namespace_json(*kind)?)))
            .collect::<Result<Vec<_>>>()?;
        self.backend
            .set_many(entries)
            .await
            .map_err(|e| dock_error!(persistence, "не удалось сохранить атрибуты: {}", e))
    }

    fn validate_maps(&self, maps: &AttributeMaps) -> Result<()> {
        let ids = maps
            .custom_names
            .keys()
            .chain(maps.initiatives.keys())
            .chain(maps.class_overrides.keys())
            .chain(maps.shortcuts.keys())
            .chain(maps.enabled.keys());
        for id in ids {
            self.validator.window_id(id)?;
        }
        for name in maps.custom_names.values() {
            if self.validator.custom_name(name)?.as_deref() != Some(name.as_str()) {
                return Err(dock_error!(validation, "имя '{}' не нормализовано", name));
            }
        }
        for initiative in maps.initiatives.values() {
            self.validator.initiative(i64::from(*initiative))?;
        }
        for shortcut in maps.shortcuts.values() {
            if self.validator.shortcut(shortcut)?.as_deref() != Some(shortcut.as_str()) {
                return Err(dock_error!(validation, "сочетание '{}' не нормализовано", shortcut));
            }
        }
        Ok(())
    }

    /// Подписка на завершённые циклы детекции; отписка - drop получателя
    pub fn subscribe(&self) -> broadcast::Receiver<DetectionEvent> {
        self.events.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.events.receiver_count()
    }

    pub fn notify(&self, event: DetectionEvent) {
        let count = event.windows.len();
        // Ошибка означает только отсутствие подписчиков
        if self.events.send(event).is_ok() {
            debug_if_enabled!("Подписчики уведомлены: {} окон", count);
        }
    }
}
