use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Игровой класс персонажа
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KnownClass {
    Feca,
    Osamodas,
    Enutrof,
    Sram,
    Xelor,
    Ecaflip,
    Eniripsa,
    Iop,
    Cra,
    Sadida,
    Sacrieur,
    Pandawa,
    Roublard,
    Zobal,
    Steamer,
    Eliotrope,
    Huppermage,
    Ouginak,
    Forgelance,
}

impl KnownClass {
    pub const ALL: [KnownClass; 19] = [
        KnownClass::Feca,
        KnownClass::Osamodas,
        KnownClass::Enutrof,
        KnownClass::Sram,
        KnownClass::Xelor,
        KnownClass::Ecaflip,
        KnownClass::Eniripsa,
        KnownClass::Iop,
        KnownClass::Cra,
        KnownClass::Sadida,
        KnownClass::Sacrieur,
        KnownClass::Pandawa,
        KnownClass::Roublard,
        KnownClass::Zobal,
        KnownClass::Steamer,
        KnownClass::Eliotrope,
        KnownClass::Huppermage,
        KnownClass::Ouginak,
        KnownClass::Forgelance,
    ];

    /// Канонический ключ (строчные буквы, без диакритики)
    pub fn key(self) -> &'static str {
        match self {
            KnownClass::Feca => "feca",
            KnownClass::Osamodas => "osamodas",
            KnownClass::Enutrof => "enutrof",
            KnownClass::Sram => "sram",
            KnownClass::Xelor => "xelor",
            KnownClass::Ecaflip => "ecaflip",
            KnownClass::Eniripsa => "eniripsa",
            KnownClass::Iop => "iop",
            KnownClass::Cra => "cra",
            KnownClass::Sadida => "sadida",
            KnownClass::Sacrieur => "sacrieur",
            KnownClass::Pandawa => "pandawa",
            KnownClass::Roublard => "roublard",
            KnownClass::Zobal => "zobal",
            KnownClass::Steamer => "steamer",
            KnownClass::Eliotrope => "eliotrope",
            KnownClass::Huppermage => "huppermage",
            KnownClass::Ouginak => "ouginak",
            KnownClass::Forgelance => "forgelance",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            KnownClass::Feca => "Féca",
            KnownClass::Osamodas => "Osamodas",
            KnownClass::Enutrof => "Enutrof",
            KnownClass::Sram => "Sram",
            KnownClass::Xelor => "Xélor",
            KnownClass::Ecaflip => "Ecaflip",
            KnownClass::Eniripsa => "Eniripsa",
            KnownClass::Iop => "Iop",
            KnownClass::Cra => "Crâ",
            KnownClass::Sadida => "Sadida",
            KnownClass::Sacrieur => "Sacrieur",
            KnownClass::Pandawa => "Pandawa",
            KnownClass::Roublard => "Roublard",
            KnownClass::Zobal => "Zobal",
            KnownClass::Steamer => "Steamer",
            KnownClass::Eliotrope => "Eliotrope",
            KnownClass::Huppermage => "Huppermage",
            KnownClass::Ouginak => "Ouginak",
            KnownClass::Forgelance => "Forgelance",
        }
    }

    /// Альтернативные написания (локализованные и сокращённые), уже нормализованные
    pub fn aliases(self) -> &'static [&'static str] {
        match self {
            KnownClass::Feca => &["fecas"],
            KnownClass::Osamodas => &["osa", "osamoda"],
            KnownClass::Enutrof => &["enu"],
            KnownClass::Sram => &[],
            KnownClass::Xelor => &["xel"],
            KnownClass::Ecaflip => &["eca"],
            KnownClass::Eniripsa => &["eni"],
            KnownClass::Iop => &[],
            KnownClass::Cra => &[],
            KnownClass::Sadida => &["sadi"],
            KnownClass::Sacrieur => &["sacrier", "sacri", "sac"],
            KnownClass::Pandawa => &["panda"],
            KnownClass::Roublard => &["rogue", "roub"],
            KnownClass::Zobal => &["masqueraider", "masq"],
            KnownClass::Steamer => &["foggernaut", "fogger"],
            KnownClass::Eliotrope => &["eliatrope", "elio"],
            KnownClass::Huppermage => &["hupper"],
            KnownClass::Ouginak => &["ougi"],
            KnownClass::Forgelance => &["forgelancer"],
        }
    }

    pub fn avatar_ref(self) -> String {
        format!("classes/{}.png", self.key())
    }

    /// Поиск по уже нормализованному токену: сначала точное совпадение,
    /// затем вхождение ключа таблицы в токен (длинные ключи раньше)
    pub fn lookup(normalized: &str) -> Option<KnownClass> {
        if normalized.is_empty() {
            return None;
        }
        if let Some(class) = CLASS_TABLE.get(normalized) {
            return Some(*class);
        }
        SUBSTRING_KEYS
            .iter()
            .find(|(key, _)| normalized.contains(key))
            .map(|(_, class)| *class)
    }

    /// Поиск канонического имени класса где угодно в нормализованном тексте
    pub fn find_in_text(normalized_text: &str) -> Option<KnownClass> {
        CANONICAL_BY_LENGTH
            .iter()
            .find(|class| normalized_text.contains(class.key()))
            .copied()
    }
}

impl fmt::Display for KnownClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for KnownClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = normalize_class_token(s);
        CLASS_TABLE
            .get(normalized.as_str())
            .copied()
            .ok_or_else(|| format!("неизвестный класс '{}'", s))
    }
}

/// Таблица: нормализованное написание -> класс
static CLASS_TABLE: Lazy<HashMap<&'static str, KnownClass>> = Lazy::new(|| {
    let mut table = HashMap::new();
    for class in KnownClass::ALL {
        table.insert(class.key(), class);
        for alias in class.aliases() {
            table.insert(*alias, class);
        }
    }
    table
});

/// Короткие сокращения ("osa", "eni") слишком часто встречаются внутри обычных
/// слов, поэтому внутри токена ищутся только канонические ключи и длинные варианты
const MIN_SUBSTRING_ALIAS_LEN: usize = 4;

static SUBSTRING_KEYS: Lazy<Vec<(&'static str, KnownClass)>> = Lazy::new(|| {
    let mut keys: Vec<_> = CLASS_TABLE
        .iter()
        .filter(|(key, class)| **key == class.key() || key.len() >= MIN_SUBSTRING_ALIAS_LEN)
        .map(|(key, class)| (*key, *class))
        .collect();
    keys.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then(a.0.cmp(b.0)));
    keys
});

static CANONICAL_BY_LENGTH: Lazy<Vec<KnownClass>> = Lazy::new(|| {
    let mut classes = KnownClass::ALL.to_vec();
    classes.sort_by(|a, b| b.key().len().cmp(&a.key().len()).then(a.key().cmp(b.key())));
    classes
});

/// Строчные буквы, без диакритики, схлопнутые пробелы
pub fn normalize_class_token(token: &str) -> String {
    let stripped = strip_accents(&token.to_lowercase());
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn strip_accents(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' => out.push('a'),
            'À' | 'Á' | 'Â' | 'Ã' | 'Ä' | 'Å' => out.push('A'),
            'ç' => out.push('c'),
            'Ç' => out.push('C'),
            'è' | 'é' | 'ê' | 'ë' => out.push('e'),
            'È' | 'É' | 'Ê' | 'Ë' => out.push('E'),
            'ì' | 'í' | 'î' | 'ï' => out.push('i'),
            'Ì' | 'Í' | 'Î' | 'Ï' => out.push('I'),
            'ñ' => out.push('n'),
            'Ñ' => out.push('N'),
            'ò' | 'ó' | 'ô' | 'õ' | 'ö' => out.push('o'),
            'Ò' | 'Ó' | 'Ô' | 'Õ' | 'Ö' => out.push('O'),
            'ù' | 'ú' | 'û' | 'ü' => out.push('u'),
            'Ù' | 'Ú' | 'Û' | 'Ü' => out.push('U'),
            'ý' | 'ÿ' => out.push('y'),
            'œ' => out.push_str("oe"),
            'æ' => out.push_str("ae"),
            _ => out.push(ch),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_class_key_round_trips() {
        for class in KnownClass::ALL {
            assert_eq!(KnownClass::from_str(class.key()), Ok(class));
            assert_eq!(KnownClass::lookup(class.key()), Some(class));
        }
    }

    #[test]
    fn accented_and_alternate_spellings() {
        assert_eq!(normalize_class_token("  XÉLOR "), "xelor");
        assert_eq!(KnownClass::from_str("Xélor"), Ok(KnownClass::Xelor));
        assert_eq!(KnownClass::from_str("Crâ"), Ok(KnownClass::Cra));
        assert_eq!(KnownClass::from_str("Féca"), Ok(KnownClass::Feca));
        assert_eq!(KnownClass::from_str("Masqueraider"), Ok(KnownClass::Zobal));
        assert_eq!(KnownClass::from_str("Foggernaut"), Ok(KnownClass::Steamer));
        assert!(KnownClass::from_str("paladin").is_err());
    }

    #[test]
    fn substring_lookup_prefers_longest_key() {
        assert_eq!(KnownClass::lookup("iop (hardcore)"), Some(KnownClass::Iop));
        assert_eq!(KnownClass::lookup("masqueraider lvl 200"), Some(KnownClass::Zobal));
        assert_eq!(KnownClass::lookup("sacrieur"), Some(KnownClass::Sacrieur));
        assert_eq!(KnownClass::lookup(""), None);
        assert_eq!(KnownClass::lookup("2.70"), None);
    }

    #[test]
    fn short_aliases_match_only_whole_tokens() {
        assert_eq!(KnownClass::lookup("osa"), Some(KnownClass::Osamodas));
        assert_eq!(KnownClass::lookup("eni"), Some(KnownClass::Eniripsa));
        assert_eq!(KnownClass::lookup("osaka"), None);
        assert_eq!(KnownClass::lookup("scenic"), None);
        assert_eq!(KnownClass::lookup("decaying"), None);
        assert_eq!(KnownClass::lookup("masq main"), Some(KnownClass::Zobal));
    }

    #[test]
    fn find_in_text_uses_canonical_keys() {
        assert_eq!(KnownClass::find_in_text("dofus eniripsa client"), Some(KnownClass::Eniripsa));
        assert_eq!(KnownClass::find_in_text("random browser window"), None);
    }
}
