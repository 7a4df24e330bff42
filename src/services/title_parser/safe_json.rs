//! Tolerant parsing of the JSON-ish text printed by window query tools.
//!
//! PowerShell output is usually valid JSON, but truncated pipes, stray control
//! characters and hand-edited fallback commands happen. The parser never panics:
//! it runs a strict parse first and then a fixed chain of recovery strategies,
//! ending with an empty structure.

use crate::error::ExecError;
use crate::trace_if_enabled;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

static TRAILING_COMMA: Lazy<Regex> =
    Lazy::new(|| Regex::new(r",\s*([}\]])").expect("valid regex"));
static UNQUOTED_KEY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([{,]\s*)([A-Za-z_][A-Za-z0-9_]*)\s*:").expect("valid regex"));
static SINGLE_QUOTED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"'((?:[^'\\]|\\.)*)'").expect("valid regex"));
static KEY_VALUE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"["']?([A-Za-z_][A-Za-z0-9_]*)["']?\s*:\s*("(?:[^"\\]|\\.)*"|'(?:[^'\\]|\\.)*'|-?\d+(?:\.\d+)?|true|false|null)"#,
    )
    .expect("valid regex")
});

/// Какая стратегия дала результат
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseStrategy {
    Strict,
    Cleanup,
    ManualExtraction,
    EmptyFallback,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LooseParse {
    pub value: Value,
    pub strategy: ParseStrategy,
}

impl LooseParse {
    fn new(value: Value, strategy: ParseStrategy) -> Self {
        Self { value, strategy }
    }

    /// Пустая заглушка вместо разобранных данных
    pub fn is_fallback(&self) -> bool {
        self.strategy == ParseStrategy::EmptyFallback
    }
}

/// Разбирает слабо структурированный вывод. Ошибка возвращается только
/// при превышении лимита размера.
pub fn parse_loose(input: &str, max_bytes: usize) -> Result<LooseParse, ExecError> {
    if input.len() > max_bytes {
        return Err(ExecError::Validation(format!(
            "вывод {} байт превышает лимит {} байт",
            input.len(),
            max_bytes
        )));
    }

    let sanitized = strip_control_chars(input);
    let text = sanitized.trim();

    if text.is_empty() {
        return Ok(LooseParse::new(Value::Null, ParseStrategy::Strict));
    }

    if is_balanced(text) {
        if let Ok(value) = serde_json::from_str::<Value>(text) {
            return Ok(LooseParse::new(value, ParseStrategy::Strict));
        }
    } else {
        trace_if_enabled!("Несбалансированные скобки или кавычки, пропускаем строгий разбор");
    }

    if let Some(value) = try_cleanup(text) {
        return Ok(LooseParse::new(value, ParseStrategy::Cleanup));
    }

    if let Some(value) = try_manual_extraction(text) {
        return Ok(LooseParse::new(value, ParseStrategy::ManualExtraction));
    }

    Ok(LooseParse::new(empty_structure(text), ParseStrategy::EmptyFallback))
}

/// Убирает управляющие символы кроме переводов строк и табуляции
pub fn strip_control_chars(input: &str) -> String {
    input
        .chars()
        .filter(|c| !c.is_control() || matches!(c, '\n' | '\r' | '\t'))
        .filter(|c| *c != '\u{feff}')
        .collect()
}

/// Скобки и двойные кавычки сбалансированы (с учётом строк и экранирования)
pub fn is_balanced(text: &str) -> bool {
    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for ch in text.chars() {
        if in_string {
            match (escaped, ch) {
                (true, _) => escaped = false,
                (false, '\\') => escaped = true,
                (false, '"') => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' | '[' => stack.push(ch),
            '}' => {
                if stack.pop() != Some('{') {
                    return false;
                }
            }
            ']' => {
                if stack.pop() != Some('[') {
                    return false;
                }
            }
            _ => {}
        }
    }

    !in_string && stack.is_empty()
}

fn try_cleanup(text: &str) -> Option<Value> {
    let cleaned = SINGLE_QUOTED.replace_all(text, "\"$1\"");
    let cleaned = TRAILING_COMMA.replace_all(&cleaned, "$1");
    let cleaned = UNQUOTED_KEY.replace_all(&cleaned, "$1\"$2\":");
    serde_json::from_str::<Value>(&cleaned).ok()
}

fn try_manual_extraction(text: &str) -> Option<Value> {
    let mut objects: Vec<Value> = object_chunks(text)
        .into_iter()
        .filter_map(extract_pairs)
        .collect();

    if objects.is_empty() {
        // Вывод вообще без фигурных скобок: `Key: value, Key2: value`
        if let Some(object) = extract_pairs(text) {
            objects.push(object);
        }
    }

    match objects.len() {
        0 => None,
        1 if !text.starts_with('[') => objects.pop(),
        _ => Some(Value::Array(objects)),
    }
}

/// Объекты верхнего уровня; незакрытый хвост тоже считается объектом
fn object_chunks(text: &str) -> Vec<&str> {
    let mut chunks = Vec::new();
    let mut depth = 0usize;
    let mut start = None;
    let mut in_string = false;
    let mut escaped = false;

    for (idx, ch) in text.char_indices() {
        if in_string {
            match (escaped, ch) {
                (true, _) => escaped = false,
                (false, '\\') => escaped = true,
                (false, '"') => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => {
                if depth == 0 {
                    start = Some(idx);
                }
                depth += 1;
            }
            '}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    if let Some(s) = start.take() {
                        chunks.push(&text[s..=idx]);
                    }
                }
            }
            _ => {}
        }
    }

    if let Some(s) = start {
        chunks.push(&text[s..]);
    }
    chunks
}

fn extract_pairs(chunk: &str) -> Option<Value> {
    let mut object = Map::new();
    for caps in KEY_VALUE.captures_iter(chunk) {
        let key = caps[1].to_string();
        let raw = &caps[2];
        object.entry(key).or_insert_with(|| scalar_value(raw));
    }
    if object.is_empty() {
        None
    } else {
        Some(Value::Object(object))
    }
}

fn scalar_value(raw: &str) -> Value {
    if let Some(inner) = raw.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')) {
        return Value::String(inner.to_string());
    }
    if raw.starts_with('"') {
        return serde_json::from_str::<String>(raw)
            .map(Value::String)
            .unwrap_or_else(|_| Value::String(raw.trim_matches('"').to_string()));
    }
    serde_json::from_str::<Value>(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn empty_structure(text: &str) -> Value {
    if text.starts_with('[') {
        Value::Array(Vec::new())
    } else {
        Value::Object(Map::new())
    }
}
