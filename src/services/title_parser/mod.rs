//! TitleParser: responsibility and boundaries
//!
//! Turns volatile window titles into a stable logical identity (character + class)
//! and owns the tolerant parsing of query tool output. It knows nothing about
//! persisted user attributes or canonical state.

mod classes;
mod parser;
pub mod safe_json;

pub use classes::{normalize_class_token, strip_accents, KnownClass};
pub use parser::{generate_stable_id, ParsedIdentity, TitleGrammar, TitleParser};

use serde::Serialize;

/// Описание класса для панели настроек
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassInfo {
    pub key: &'static str,
    pub display_name: &'static str,
    pub aliases: Vec<&'static str>,
    pub avatar_ref: String,
}

/// Все известные классы в порядке объявления
pub fn classes() -> Vec<ClassInfo> {
    KnownClass::ALL
        .iter()
        .map(|class| ClassInfo {
            key: class.key(),
            display_name: class.display_name(),
            aliases: class.aliases().to_vec(),
            avatar_ref: class.avatar_ref(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classes_lists_every_known_class() {
        let list = classes();
        assert_eq!(list.len(), KnownClass::ALL.len());
        let zobal = list.iter().find(|c| c.key == "zobal").unwrap();
        assert!(zobal.aliases.contains(&"masqueraider"));
        assert_eq!(zobal.avatar_ref, "classes/zobal.png");
    }
}
