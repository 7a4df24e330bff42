use crate::dock_error;
use crate::error::Result;
use dashmap::DashMap;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Хранилище строк по строковому ключу; одно пространство имён на вид атрибута
#[async_trait::async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: String) -> Result<()>;
    /// Записывает все пары целиком или ничего
    async fn set_many(&self, entries: Vec<(String, String)>) -> Result<()>;
}

/// Хранилище в памяти (dry-run и тесты)
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.get(key).map(|v| v.value().clone()))
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        self.entries.insert(key.to_string(), value);
        Ok(())
    }

    async fn set_many(&self, entries: Vec<(String, String)>) -> Result<()> {
        for (key, value) in entries {
            self.entries.insert(key, value);
        }
        Ok(())
    }
}

/// Один JSON-документ на диске: `{ "<ключ>": <значение>, ... }`.
/// Запись атомарная: временный файл и rename.
pub struct JsonFileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        info!("Хранилище настроек окон: {:?}", path);
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_document(&self) -> Result<Map<String, Value>> {
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Map::new()),
            Err(e) => return Err(e.into()),
        };
        if text.trim().is_empty() {
            return Ok(Map::new());
        }
        match serde_json::from_str::<Value>(&text)? {
            Value::Object(map) => Ok(map),
            _ => Err(dock_error!(persistence, "{:?} не содержит JSON-объект", self.path)),
        }
    }

    async fn write_document(&self, document: &Map<String, Value>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("json.tmp");
        let body = serde_json::to_string_pretty(document)?;
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl KeyValueStore for JsonFileStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let _guard = self.lock.lock().await;
        let document = self.read_document().await?;
        Ok(document.get(key).map(Value::to_string))
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        self.set_many(vec![(key.to_string(), value)]).await
    }

    async fn set_many(&self, entries: Vec<(String, String)>) -> Result<()> {
        let _guard = self.lock.lock().await;
        // Все значения проверяются до записи, файл меняется одним rename
        let parsed = entries
            .into_iter()
            .map(|(key, value)| Ok((key, serde_json::from_str::<Value>(&value)?)))
            .collect::<Result<Vec<_>>>()?;

        let mut document = match self.read_document().await {
            Ok(document) => document,
            Err(e) => {
                // Повреждённый файл откладываем в сторону, чтобы не потерять его окончательно
                let backup = self.path.with_extension("json.corrupt");
                warn!("Файл {:?} повреждён ({}), сохраняем копию в {:?}", self.path, e, backup);
                tokio::fs::rename(&self.path, &backup).await?;
                Map::new()
            }
        };

        document.extend(parsed);
        self.write_document(&document).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_round_trip() {
        let store = MemoryStore::new();
        assert_eq!(store.get("enabled").await.unwrap(), None);
        store.set("enabled", "{\"a\":true}".into()).await.unwrap();
        assert_eq!(store.get("enabled").await.unwrap().as_deref(), Some("{\"a\":true}"));
    }

    #[tokio::test]
    async fn file_store_keeps_other_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("nested").join("state.json"));

        store.set("initiatives", r#"{"bob_iop_1":120}"#.into()).await.unwrap();
        store.set("enabled", r#"{"bob_iop_1":false}"#.into()).await.unwrap();

        let reopened = JsonFileStore::new(store.path().to_path_buf());
        assert_eq!(
            reopened.get("initiatives").await.unwrap().as_deref(),
            Some(r#"{"bob_iop_1":120}"#)
        );
        assert_eq!(
            reopened.get("enabled").await.unwrap().as_deref(),
            Some(r#"{"bob_iop_1":false}"#)
        );
        assert_eq!(reopened.get("shortcuts").await.unwrap(), None);
    }

    #[tokio::test]
    async fn corrupt_file_is_backed_up_on_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{ not json").unwrap();

        let store = JsonFileStore::new(&path);
        assert!(store.get("enabled").await.is_err());

        store.set("enabled", "{}".into()).await.unwrap();
        assert!(path.with_extension("json.corrupt").exists());
        assert_eq!(store.get("enabled").await.unwrap().as_deref(), Some("{}"));
    }

    #[tokio::test]
    async fn batch_with_invalid_value_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("state.json"));
        store.set("customNames", r#"{"a_iop_1":"Old"}"#.into()).await.unwrap();

        let batch = vec![
            ("customNames".to_string(), r#"{"a_iop_1":"New"}"#.to_string()),
            ("initiatives".to_string(), "not json".to_string()),
        ];
        assert!(store.set_many(batch).await.is_err());
        assert_eq!(
            store.get("customNames").await.unwrap().as_deref(),
            Some(r#"{"a_iop_1":"Old"}"#)
        );
        assert_eq!(store.get("initiatives").await.unwrap(), None);
    }

    #[tokio::test]
    async fn set_rejects_non_json_values() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("state.json"));
        assert!(store.set("enabled", "nope".into()).await.is_err());
    }
}
