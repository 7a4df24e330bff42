use crate::dock_error;
use crate::error::Result;
use crate::services::title_parser::KnownClass;
use smallvec::SmallVec;
use std::str::FromStr;

pub const MAX_NAME_LEN: usize = 50;
pub const MAX_INITIATIVE: u32 = 9999;
const MAX_ID_LEN: usize = 128;

const NAMED_KEYS: [&str; 15] = [
    "Space", "Tab", "Enter", "Escape", "Backspace", "Delete", "Insert", "Home", "End", "PageUp",
    "PageDown", "Up", "Down", "Left", "Right",
];

/// Проверка значений пользовательских атрибутов перед сохранением
#[derive(Debug, Clone)]
pub struct AttributeValidator {
    max_name_len: usize,
    max_initiative: u32,
}

impl Default for AttributeValidator {
    fn default() -> Self {
        Self {
            max_name_len: MAX_NAME_LEN,
            max_initiative: MAX_INITIATIVE,
        }
    }
}

impl AttributeValidator {
    pub fn new(max_name_len: usize, max_initiative: u32) -> Self {
        Self {
            max_name_len,
            max_initiative,
        }
    }

    pub fn window_id(&self, id: &str) -> Result<()> {
        let well_formed = !id.is_empty()
            && id.len() <= MAX_ID_LEN
            && id.chars().all(|c| c.is_alphanumeric() || c == '_');
        if well_formed {
            Ok(())
        } else {
            Err(dock_error!(validation, "некорректный идентификатор окна '{}'", id))
        }
    }

    /// Пустое имя означает сброс
    pub fn custom_name(&self, name: &str) -> Result<Option<String>> {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }
        if trimmed.chars().count() > self.max_name_len {
            return Err(dock_error!(
                validation,
                "имя длиннее {} символов",
                self.max_name_len
            ));
        }
        if trimmed.chars().any(char::is_control) {
            return Err(dock_error!(validation, "имя содержит управляющие символы"));
        }
        Ok(Some(trimmed.to_string()))
    }

    pub fn initiative(&self, value: i64) -> Result<u32> {
        u32::try_from(value)
            .ok()
            .filter(|v| *v <= self.max_initiative)
            .ok_or_else(|| {
                dock_error!(
                    validation,
                    "инициатива {} вне диапазона [0, {}]",
                    value,
                    self.max_initiative
                )
            })
    }

    /// Пустая строка снимает переопределение класса
    pub fn class(&self, value: &str) -> Result<Option<KnownClass>> {
        if value.trim().is_empty() {
            return Ok(None);
        }
        KnownClass::from_str(value)
            .map(Some)
            .map_err(|e| dock_error!(validation, "{}", e))
    }

    /// `Ctrl+Shift+F1` и подобные. Возвращает нормализованную запись,
    /// пустая строка снимает сочетание.
    pub fn shortcut(&self, value: &str) -> Result<Option<String>> {
        if value.trim().is_empty() {
            return Ok(None);
        }

        let parts: SmallVec<[&str; 5]> = value.split('+').map(str::trim).collect();
        let (key, modifiers) = match parts.split_last() {
            Some((key, modifiers)) if !key.is_empty() => (*key, modifiers),
            _ => return Err(dock_error!(validation, "сочетание '{}' без клавиши", value)),
        };

        let mut flags = [false; 4];
        for modifier in modifiers {
            let slot = match modifier.to_lowercase().as_str() {
                "ctrl" | "control" => 0,
                "alt" => 1,
                "shift" => 2,
                "super" | "win" | "meta" | "cmd" => 3,
                _ => {
                    return Err(dock_error!(
                        validation,
                        "неверный модификатор '{}' в сочетании '{}'",
                        modifier,
                        value
                    ))
                }
            };
            if flags[slot] {
                return Err(dock_error!(validation, "модификатор '{}' повторяется", modifier));
            }
            flags[slot] = true;
        }

        let key = normalize_key(key)
            .ok_or_else(|| dock_error!(validation, "неизвестная клавиша '{}'", key))?;

        let mut normalized: SmallVec<[&str; 5]> = SmallVec::new();
        for (flag, name) in flags.iter().zip(["Ctrl", "Alt", "Shift", "Super"]) {
            if *flag {
                normalized.push(name);
            }
        }
        normalized.push(key.as_str());
        Ok(Some(normalized.join("+")))
    }
}

fn normalize_key(key: &str) -> Option<String> {
    let mut chars = key.chars();
    if let (Some(c), None) = (chars.next(), chars.next()) {
        return c.is_ascii_alphanumeric().then(|| c.to_ascii_uppercase().to_string());
    }

    let upper = key.to_ascii_uppercase();
    if let Some(n) = upper.strip_prefix('F').and_then(|n| n.parse::<u8>().ok()) {
        return (1..=24).contains(&n).then(|| format!("F{}", n));
    }
    if let Some(d) = upper.strip_prefix("NUMPAD").and_then(|n| n.parse::<u8>().ok()) {
        return (d <= 9).then(|| format!("Numpad{}", d));
    }

    NAMED_KEYS
        .iter()
        .find(|named| named.eq_ignore_ascii_case(key))
        .map(|named| named.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_trimmed_and_bounded() {
        let v = AttributeValidator::default();
        assert_eq!(v.custom_name("  Tank ").unwrap().as_deref(), Some("Tank"));
        assert_eq!(v.custom_name("   ").unwrap(), None);
        assert!(v.custom_name(&"x".repeat(51)).is_err());
        assert!(v.custom_name(&"é".repeat(50)).is_ok());
        assert!(v.custom_name("bad\u{1b}name").is_err());
    }

    #[test]
    fn initiative_range() {
        let v = AttributeValidator::default();
        assert_eq!(v.initiative(0).unwrap(), 0);
        assert_eq!(v.initiative(9999).unwrap(), 9999);
        assert!(v.initiative(10_000).is_err());
        assert!(v.initiative(-1).is_err());
    }

    #[test]
    fn class_accepts_aliases() {
        let v = AttributeValidator::default();
        assert_eq!(v.class("Xélor").unwrap(), Some(KnownClass::Xelor));
        assert_eq!(v.class("").unwrap(), None);
        assert!(v.class("paladin").is_err());
    }

    #[test]
    fn shortcuts_are_normalized() {
        let v = AttributeValidator::default();
        assert_eq!(v.shortcut("shift+ctrl+f1").unwrap().as_deref(), Some("Ctrl+Shift+F1"));
        assert_eq!(v.shortcut("alt + 3").unwrap().as_deref(), Some("Alt+3"));
        assert_eq!(v.shortcut("a").unwrap().as_deref(), Some("A"));
        assert_eq!(v.shortcut("Win+numpad4").unwrap().as_deref(), Some("Super+Numpad4"));
        assert_eq!(v.shortcut("ctrl+pagedown").unwrap().as_deref(), Some("Ctrl+PageDown"));
        assert_eq!(v.shortcut("").unwrap(), None);
        assert!(v.shortcut("ctrl+").is_err());
        assert!(v.shortcut("hyper+a").is_err());
        assert!(v.shortcut("ctrl+ctrl+a").is_err());
        assert!(v.shortcut("ctrl+F25").is_err());
    }

    #[test]
    fn window_ids() {
        let v = AttributeValidator::default();
        assert!(v.window_id("bob_iop_1234").is_ok());
        assert!(v.window_id("").is_err());
        assert!(v.window_id("bob iop").is_err());
    }
}
