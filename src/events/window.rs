use crate::services::title_parser::KnownClass;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Окно, как его вернула утилита опроса. Живёт один цикл детекции.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawWindowHandle {
    pub handle: u64,
    pub title: String,
    pub process_id: u32,
    pub class_name: String,
    pub is_active: bool,
    pub bounds: WindowBounds,
}

impl RawWindowHandle {
    pub fn new(handle: u64, title: impl Into<String>) -> Self {
        Self {
            handle,
            title: title.into(),
            process_id: 0,
            class_name: String::new(),
            is_active: false,
            bounds: WindowBounds::default(),
        }
    }

    pub fn with_pid(mut self, pid: u32) -> Self {
        self.process_id = pid;
        self
    }

    pub fn with_class_name(mut self, class_name: impl Into<String>) -> Self {
        self.class_name = class_name.into();
        self
    }

    pub fn with_active(mut self, is_active: bool) -> Self {
        self.is_active = is_active;
        self
    }

    pub fn with_bounds(mut self, bounds: WindowBounds) -> Self {
        self.bounds = bounds;
        self
    }
}

impl fmt::Display for RawWindowHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{}\" (hwnd={}, pid={})", self.title, self.handle, self.process_id)
    }
}

/// Геометрия окна
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WindowBounds {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

/// Каноническая запись окна персонажа, которую видит док
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowRecord {
    pub id: String,
    pub handle: u64,
    pub title: String,
    pub character: String,
    /// Класс с учётом пользовательского переопределения
    pub class: KnownClass,
    /// Класс из заголовка окна; от него строится идентификатор
    pub detected_class: KnownClass,
    pub custom_name: Option<String>,
    pub initiative: u32,
    pub enabled: bool,
    pub shortcut: Option<String>,
    pub is_active: bool,
    pub bounds: WindowBounds,
    pub avatar_ref: String,
    pub last_seen: DateTime<Utc>,
}

impl WindowRecord {
    /// Новая запись с пользовательскими полями по умолчанию
    pub fn detected(id: String, raw: &RawWindowHandle, character: String, class: KnownClass) -> Self {
        Self {
            id,
            handle: raw.handle,
            title: raw.title.clone(),
            character,
            class,
            detected_class: class,
            custom_name: None,
            initiative: 0,
            enabled: true,
            shortcut: None,
            is_active: raw.is_active,
            bounds: raw.bounds,
            avatar_ref: class.avatar_ref(),
            last_seen: Utc::now(),
        }
    }

    /// Обновляет только поля присутствия, пользовательские поля не трогаются
    pub fn refresh_presence(&mut self, fresh: &WindowRecord) {
        self.handle = fresh.handle;
        self.title = fresh.title.clone();
        self.is_active = fresh.is_active;
        self.bounds = fresh.bounds;
        self.last_seen = fresh.last_seen;
    }

    /// Имя для отображения: пользовательское, если задано
    pub fn display_name(&self) -> &str {
        self.custom_name.as_deref().unwrap_or(&self.character)
    }
}

impl fmt::Display for WindowRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}] ({})", self.display_name(), self.class, self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw() -> RawWindowHandle {
        RawWindowHandle::new(42, "Bob - Iop - 2.70 - Release")
            .with_pid(1234)
            .with_active(true)
            .with_bounds(WindowBounds { x: 10, y: 20, width: 800, height: 600 })
    }

    #[test]
    fn test_raw_window_creation() {
        let window = raw().with_class_name("ApolloRuntimeContentWindow");

        assert_eq!(window.handle, 42);
        assert_eq!(window.process_id, 1234);
        assert_eq!(window.class_name, "ApolloRuntimeContentWindow");
        assert!(window.is_active);
    }

    #[test]
    fn test_refresh_presence_keeps_user_fields() {
        let mut record = WindowRecord::detected("bob_iop_1234".into(), &raw(), "Bob".into(), KnownClass::Iop);
        record.custom_name = Some("Tank".into());
        record.enabled = false;
        record.initiative = 120;

        let moved = RawWindowHandle::new(99, "Bob - Iop - 2.71 - Release")
            .with_pid(1234)
            .with_bounds(WindowBounds { x: 0, y: 0, width: 1024, height: 768 });
        let fresh = WindowRecord::detected("bob_iop_1234".into(), &moved, "Bob".into(), KnownClass::Iop);
        record.refresh_presence(&fresh);

        assert_eq!(record.handle, 99);
        assert_eq!(record.bounds.width, 1024);
        assert!(!record.is_active);
        assert_eq!(record.custom_name.as_deref(), Some("Tank"));
        assert!(!record.enabled);
        assert_eq!(record.initiative, 120);
        assert_eq!(record.display_name(), "Tank");
    }

    #[test]
    fn test_record_serializes_camel_case() {
        let record = WindowRecord::detected("bob_iop_1234".into(), &raw(), "Bob".into(), KnownClass::Iop);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["customName"], serde_json::Value::Null);
        assert_eq!(json["isActive"], true);
        assert_eq!(json["class"], "iop");
        assert_eq!(json["avatarRef"], "classes/iop.png");
    }
}
