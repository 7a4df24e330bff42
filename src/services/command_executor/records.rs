use crate::events::{RawWindowHandle, WindowBounds};
use serde_json::{Map, Value};

/// Преобразует разобранный вывод в список окон.
/// Поддерживаются основная схема (`Handle`, `Title`, ...) и упрощённая
/// (`Id`, `MainWindowTitle`, `MainWindowHandle`). Одиночный объект
/// PowerShell печатает без массива.
pub fn records_from_value(value: Value) -> Vec<RawWindowHandle> {
    match value {
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_object)
            .map(record_from_object)
            .collect(),
        Value::Object(ref obj) if !obj.is_empty() => vec![record_from_object(obj)],
        _ => Vec::new(),
    }
}

fn record_from_object(obj: &Map<String, Value>) -> RawWindowHandle {
    let handle = field(obj, &["Handle", "MainWindowHandle", "Hwnd"])
        .and_then(as_u64)
        .unwrap_or(0);
    let title = field(obj, &["Title", "MainWindowTitle"])
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let process_id = field(obj, &["ProcessId", "Id", "Pid"])
        .and_then(as_u64)
        .and_then(|pid| u32::try_from(pid).ok())
        .unwrap_or(0);
    let class_name = field(obj, &["ClassName"])
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let is_active = field(obj, &["IsActive"]).map(as_bool).unwrap_or(false);

    // Вложенный Bounds или плоские поля после ручного извлечения
    let bounds_source = field(obj, &["Bounds"]).and_then(Value::as_object).unwrap_or(obj);

    RawWindowHandle {
        handle,
        title,
        process_id,
        class_name,
        is_active,
        bounds: bounds_from_object(bounds_source),
    }
}

fn bounds_from_object(obj: &Map<String, Value>) -> WindowBounds {
    let int = |keys: &[&str]| field(obj, keys).and_then(as_i64).unwrap_or(0);
    WindowBounds {
        x: int(&["X", "Left"]).clamp(i32::MIN as i64, i32::MAX as i64) as i32,
        y: int(&["Y", "Top"]).clamp(i32::MIN as i64, i32::MAX as i64) as i32,
        width: u32::try_from(int(&["Width"])).unwrap_or(0),
        height: u32::try_from(int(&["Height"])).unwrap_or(0),
    }
}

fn field<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|key| obj.get(*key)).filter(|v| !v.is_null())
}

fn as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64().or_else(|| n.as_i64().map(|i| i as u64)),
        Value::String(s) => s.trim().parse::<i64>().ok().map(|i| i as u64),
        _ => None,
    }
}

fn as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_bool(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => s.eq_ignore_ascii_case("true"),
        Value::Number(n) => n.as_i64() == Some(1),
        _ => false,
    }
}
