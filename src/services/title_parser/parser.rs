use super::classes::{normalize_class_token, KnownClass};
use crate::debug_if_enabled;
use crate::events::RawWindowHandle;
use serde::{Deserialize, Serialize};

const TITLE_DELIMITER: &str = " - ";
const MIN_TITLE_LEN: usize = 3;
const MAX_TITLE_LEN: usize = 255;
const UNKNOWN_CHARACTER: &str = "Unknown";

/// Результат разбора заголовка окна
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedIdentity {
    pub character: String,
    pub class: Option<KnownClass>,
    pub valid: bool,
}

impl ParsedIdentity {
    fn valid(character: impl Into<String>, class: KnownClass) -> Self {
        Self {
            character: character.into(),
            class: Some(class),
            valid: true,
        }
    }

    fn invalid() -> Self {
        Self {
            character: String::new(),
            class: None,
            valid: false,
        }
    }
}

/// Грамматика заголовков
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TitleGrammar {
    /// `Имя - Класс[ - ...]` плюс поиск класса по всему заголовку
    #[default]
    Permissive,
    /// Ровно `Имя - Класс - Версия - Release`
    Strict,
}

#[derive(Debug, Clone, Default)]
pub struct TitleParser {
    grammar: TitleGrammar,
}

impl TitleParser {
    pub fn new(grammar: TitleGrammar) -> Self {
        Self { grammar }
    }

    pub fn grammar(&self) -> TitleGrammar {
        self.grammar
    }

    pub fn parse_title(&self, title: &str) -> ParsedIdentity {
        let segments: Vec<&str> = title.split(TITLE_DELIMITER).map(str::trim).collect();

        if self.grammar == TitleGrammar::Strict {
            let shaped = segments.len() == 4 && segments[3].eq_ignore_ascii_case("release");
            if !shaped {
                return ParsedIdentity::invalid();
            }
        }

        // Основной разбор: первый сегмент - персонаж, второй - класс
        if segments.len() >= 2 && !segments[0].is_empty() {
            if let Some(class) = KnownClass::lookup(&normalize_class_token(segments[1])) {
                return ParsedIdentity::valid(segments[0], class);
            }
        }

        if self.grammar == TitleGrammar::Strict {
            return ParsedIdentity::invalid();
        }

        // Запасной вариант: класс где угодно в заголовке
        if let Some(class) = KnownClass::find_in_text(&normalize_class_token(title)) {
            let character = segments
                .first()
                .filter(|s| segments.len() >= 2 && !s.is_empty())
                .copied()
                .unwrap_or(UNKNOWN_CHARACTER);
            return ParsedIdentity::valid(character, class);
        }

        ParsedIdentity::invalid()
    }

    /// Отбрасывает окна без дескриптора, с подозрительным заголовком
    /// или заголовком, который не разбирается
    pub fn filter_valid(&self, raw: Vec<RawWindowHandle>) -> Vec<RawWindowHandle> {
        let total = raw.len();
        let valid: Vec<RawWindowHandle> = raw
            .into_iter()
            .filter(|window| {
                if window.handle == 0 {
                    debug_if_enabled!("Пропускаем окно без дескриптора: {}", window);
                    return false;
                }
                if !has_minimum_shape(&window.title) {
                    debug_if_enabled!("Пропускаем окно с некорректным заголовком: {}", window);
                    return false;
                }
                if !self.parse_title(&window.title).valid {
                    debug_if_enabled!("Заголовок не распознан: {}", window);
                    return false;
                }
                true
            })
            .collect();

        debug_if_enabled!("filter_valid: {} из {} окон прошли проверку", valid.len(), total);
        valid
    }
}

fn has_minimum_shape(title: &str) -> bool {
    let trimmed = title.trim();
    let len = trimmed.chars().count();
    (MIN_TITLE_LEN..=MAX_TITLE_LEN).contains(&len) && !trimmed.chars().any(char::is_control)
}

fn normalize_id_part(part: &str) -> String {
    part.to_lowercase().chars().filter(|c| c.is_alphanumeric()).collect()
}

/// Стабильный идентификатор окна, не зависящий от дескриптора ОС
pub fn generate_stable_id(character: &str, class: &str, process_id: u32) -> Option<String> {
    let character = normalize_id_part(character);
    let class = normalize_id_part(class);
    if character.is_empty() || class.is_empty() {
        return None;
    }
    Some(format!("{}_{}_{}", character, class, process_id))
}
