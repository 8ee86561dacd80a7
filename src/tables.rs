/// Read-only lookup tables for the pollen monitoring service.
///
/// Two resources are consumed here:
///   - the language map: per language code, the localized allergen names
///     cross-referenced with their Latin botanical names;
///   - the level registry: per language code, exactly five severity names
///     (index 0 = none ... index 4 = very high).
///
/// Both are exposed through the [`TableProvider`] trait so the resolver and
/// the level calculator receive them explicitly instead of reading
/// process-wide dictionaries. [`BundledTables`] builds language blocks and
/// level tables lazily and caches them for the lifetime of the provider.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex};

use serde::Deserialize;
use thiserror::Error;

use crate::logging::DataSource;
use crate::model::REFERENCE_LANGUAGE;

/// Language map shipped with the service.
const BUNDLED_LANGUAGE_MAP: &str = include_str!("../data/language_map.json");

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum TableError {
    #[error("could not read table file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("language map is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("level table for '{language}' has {count} entries, expected 5")]
    LevelCount { language: String, count: usize },
}

// ---------------------------------------------------------------------------
// Level tables
// ---------------------------------------------------------------------------

/// Exactly five severity names for one language.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelTable {
    names: [String; 5],
}

impl LevelTable {
    /// Builds a table, rejecting anything but exactly five names.
    pub fn new(language: &str, names: Vec<String>) -> Result<Self, TableError> {
        let count = names.len();
        let names: [String; 5] = names.try_into().map_err(|_| TableError::LevelCount {
            language: language.to_string(),
            count,
        })?;
        Ok(Self { names })
    }

    /// Name for `index`, or `None` when the index is outside 0..=4.
    pub fn name(&self, index: i64) -> Option<&str> {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.names.get(i))
            .map(String::as_str)
    }

    pub fn names(&self) -> &[String; 5] {
        &self.names
    }
}

/// Static severity names for one supported language.
pub struct LevelEntry {
    /// ISO 639-1 code.
    pub language_code: &'static str,
    /// Native language name, for display.
    pub language: &'static str,
    pub names: [&'static str; 5],
}

/// Every language the upstream serves level names for.
pub static LEVEL_REGISTRY: &[LevelEntry] = &[
    LevelEntry {
        language_code: "de",
        language: "Deutsch",
        names: ["keine Belastung", "gering", "mäßig", "hoch", "sehr hoch"],
    },
    LevelEntry {
        language_code: "en",
        language: "English",
        names: ["none", "low", "moderate", "high", "very high"],
    },
    LevelEntry {
        language_code: "fi",
        language: "Suomi",
        names: ["ei esiintymää", "vähäinen", "kohtalainen", "korkea", "erittäin korkea"],
    },
    LevelEntry {
        language_code: "sv",
        language: "Svenska",
        names: ["ingen", "låg", "måttlig", "hög", "mycket hög"],
    },
    LevelEntry {
        language_code: "fr",
        language: "Français",
        names: ["aucune", "faible", "modérée", "élevée", "très élevée"],
    },
    LevelEntry {
        language_code: "it",
        language: "Italiano",
        names: ["nessuna", "bassa", "moderata", "alta", "molto alta"],
    },
    LevelEntry {
        language_code: "lv",
        language: "Latviešu",
        names: ["nav", "zems", "mērens", "augsts", "ļoti augsts"],
    },
    LevelEntry {
        language_code: "lt",
        language: "Lietuvių",
        names: ["nėra", "maža", "vidutinė", "didelė", "labai didelė"],
    },
    LevelEntry {
        language_code: "pl",
        language: "Polski",
        names: ["brak", "niski", "umiarkowany", "wysoki", "bardzo wysoki"],
    },
    LevelEntry {
        language_code: "pt",
        language: "Português",
        names: ["nenhum", "baixo", "moderado", "alto", "muito alto"],
    },
    LevelEntry {
        language_code: "ru",
        language: "Русский",
        names: ["нет", "низкий", "умеренный", "высокий", "очень высокий"],
    },
    LevelEntry {
        language_code: "sk",
        language: "Slovenčina",
        names: ["žiadny", "nízky", "mierny", "vysoký", "veľmi vysoký"],
    },
    LevelEntry {
        language_code: "es",
        language: "Español",
        names: ["ninguno", "bajo", "moderado", "alto", "muy alto"],
    },
    LevelEntry {
        language_code: "tr",
        language: "Türkçe",
        names: ["yok", "düşük", "orta", "yüksek", "çok yüksek"],
    },
    LevelEntry {
        language_code: "uk",
        language: "Українська",
        names: ["немає", "низький", "помірний", "високий", "дуже високий"],
    },
    LevelEntry {
        language_code: "hu",
        language: "Magyar",
        names: ["nincs", "alacsony", "közepes", "magas", "nagyon magas"],
    },
];

/// Looks up a level registry entry by language code.
pub fn find_levels(language_code: &str) -> Option<&'static LevelEntry> {
    LEVEL_REGISTRY
        .iter()
        .find(|e| e.language_code.eq_ignore_ascii_case(language_code))
}

/// Picks the supported language code that best matches a locale tag.
///
/// Exact code first, then the two-letter prefix (`"de-AT"` -> `"de"`), then
/// the reference language.
pub fn best_language_for_locale(locale: &str) -> &'static str {
    let locale = locale.trim().to_ascii_lowercase();
    if let Some(entry) = find_levels(&locale) {
        return entry.language_code;
    }
    locale
        .get(..2)
        .and_then(find_levels)
        .map(|e| e.language_code)
        .unwrap_or(REFERENCE_LANGUAGE)
}

// ---------------------------------------------------------------------------
// Language blocks
// ---------------------------------------------------------------------------

/// One allergen as named in one language.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AllergenName {
    pub name: String,
    pub latin: String,
}

/// Localized allergen names for one language, cross-referenced by Latin name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LanguageBlock {
    pub language_code: String,
    by_name: HashMap<String, usize>,
    by_latin: HashMap<String, usize>,
    allergens: Vec<AllergenName>,
}

impl LanguageBlock {
    pub fn new(language_code: &str, allergens: Vec<AllergenName>) -> Self {
        let mut by_name = HashMap::new();
        let mut by_latin = HashMap::new();
        for (i, allergen) in allergens.iter().enumerate() {
            // First entry wins when the upstream table repeats a name.
            by_name.entry(fold_key(&allergen.name)).or_insert(i);
            if !allergen.latin.trim().is_empty() {
                by_latin.entry(fold_key(&allergen.latin)).or_insert(i);
            }
        }
        Self {
            language_code: language_code.to_string(),
            by_name,
            by_latin,
            allergens,
        }
    }

    /// Latin name for a localized allergen name.
    pub fn latin_for_name(&self, name: &str) -> Option<&str> {
        self.by_name
            .get(&fold_key(name))
            .map(|&i| self.allergens[i].latin.as_str())
            .filter(|latin| !latin.trim().is_empty())
    }

    /// Localized allergen name for a Latin name.
    pub fn name_for_latin(&self, latin: &str) -> Option<&str> {
        self.by_latin
            .get(&fold_key(latin))
            .map(|&i| self.allergens[i].name.as_str())
    }

    pub fn allergens(&self) -> &[AllergenName] {
        &self.allergens
    }
}

/// Key normalization shared by every table lookup: trimmed, inner
/// whitespace collapsed, lowercased.
pub fn fold_key(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

/// Immutable source of language blocks and level tables.
pub trait TableProvider: Send + Sync {
    fn language_block(&self, language_code: &str) -> Option<Arc<LanguageBlock>>;

    fn level_table(&self, language_code: &str) -> Option<Arc<LevelTable>>;
}

#[derive(Debug, Deserialize)]
struct RawLanguageEntry {
    #[serde(default)]
    poll_titles: Vec<AllergenName>,
}

/// Tables backed by a JSON language map and the static level registry.
pub struct BundledTables {
    raw: BTreeMap<String, RawLanguageEntry>,
    blocks: Mutex<HashMap<String, Arc<LanguageBlock>>>,
    levels: Mutex<HashMap<String, Arc<LevelTable>>>,
}

impl BundledTables {
    /// Tables built from the language map compiled into the binary.
    pub fn bundled() -> Result<Self, TableError> {
        Self::from_json_str(BUNDLED_LANGUAGE_MAP)
    }

    /// Tables built from a language map on disk.
    pub fn from_path(path: &Path) -> Result<Self, TableError> {
        let text = std::fs::read_to_string(path).map_err(|source| TableError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    /// Parses a language map keyed by language code.
    ///
    /// Non-object entries (metadata keys, error markers) are skipped.
    pub fn from_json_str(text: &str) -> Result<Self, TableError> {
        let value: serde_json::Value = serde_json::from_str(text)?;
        let mut raw = BTreeMap::new();
        if let serde_json::Value::Object(entries) = value {
            for (code, entry) in entries {
                if !entry.is_object() {
                    continue;
                }
                match serde_json::from_value::<RawLanguageEntry>(entry) {
                    Ok(parsed) => {
                        raw.insert(code.to_ascii_lowercase(), parsed);
                    }
                    Err(e) => {
                        tracing::warn!(
                            source = %DataSource::Tables,
                            language = %code,
                            error = %e,
                            "skipping malformed language block"
                        );
                    }
                }
            }
        }
        Ok(Self {
            raw,
            blocks: Mutex::new(HashMap::new()),
            levels: Mutex::new(HashMap::new()),
        })
    }

    /// Language codes present in the language map.
    pub fn languages(&self) -> Vec<&str> {
        self.raw.keys().map(String::as_str).collect()
    }
}

impl TableProvider for BundledTables {
    fn language_block(&self, language_code: &str) -> Option<Arc<LanguageBlock>> {
        let code = language_code.to_ascii_lowercase();
        let mut cache = self.blocks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(block) = cache.get(&code) {
            return Some(Arc::clone(block));
        }
        let entry = self.raw.get(&code)?;
        let block = Arc::new(LanguageBlock::new(&code, entry.poll_titles.clone()));
        cache.insert(code, Arc::clone(&block));
        Some(block)
    }

    fn level_table(&self, language_code: &str) -> Option<Arc<LevelTable>> {
        let code = language_code.to_ascii_lowercase();
        let mut cache = self.levels.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(table) = cache.get(&code) {
            return Some(Arc::clone(table));
        }
        let entry = find_levels(&code)?;
        let names = entry.names.iter().map(|n| n.to_string()).collect();
        let table = match LevelTable::new(entry.language_code, names) {
            Ok(table) => Arc::new(table),
            Err(e) => {
                tracing::error!(source = %DataSource::Tables, language = %code, error = %e, "level table rejected");
                return None;
            }
        };
        cache.insert(code, Arc::clone(&table));
        Some(table)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
