//! Locale resolution of upstream allergen labels.
//!
//! Upstream labels are free text in the profile's language, sometimes with
//! the botanical name in parentheses. Resolution maps each label to a
//! language-neutral identity in three steps, applied the same way to every
//! label:
//!
//! 1. a parenthetical in the label supplies the Latin name directly;
//! 2. otherwise the localized name is looked up in the current language block;
//! 3. the Latin name, if any, is looked up in the reference language block.
//!
//! A label that cannot be resolved keeps its localized name as the canonical
//! name. That is a recovered miss, not an error.

use crate::slug::slugify;
use crate::tables::LanguageBlock;

/// Outcome of resolving one upstream label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// Label text before any parenthetical, trimmed.
    pub local_name: String,
    pub latin_name: Option<String>,
    /// Reference-language name, or `local_name` when unresolved.
    pub canonical_name: String,
    /// `slugify(canonical_name)`; may be empty for non-Latin scripts.
    pub slug: String,
    /// True when no reference-language name was found.
    pub missed: bool,
}

/// Splits `"Name (Latin)"` into its two halves.
///
/// An unclosed parenthesis still yields the text after it. Empty halves
/// become `None`.
pub fn split_label(raw_label: &str) -> (String, Option<String>) {
    match raw_label.split_once('(') {
        Some((local, rest)) => {
            let inner = rest.split(')').next().unwrap_or_default().trim();
            let latin = (!inner.is_empty()).then(|| inner.to_string());
            (local.trim().to_string(), latin)
        }
        None => (raw_label.trim().to_string(), None),
    }
}

/// Resolves `raw_label` against the current and reference language blocks.
///
/// Either block may be missing; resolution never fails.
pub fn resolve(
    raw_label: &str,
    current: Option<&LanguageBlock>,
    reference: Option<&LanguageBlock>,
) -> Resolution {
    let (local_name, parenthetical) = split_label(raw_label);

    let latin_name = parenthetical.or_else(|| {
        current
            .and_then(|block| block.latin_for_name(&local_name))
            .map(str::to_string)
    });

    let reference_name = latin_name
        .as_deref()
        .and_then(|latin| reference.and_then(|block| block.name_for_latin(latin)))
        .map(str::to_string);

    let missed = reference_name.is_none();
    if missed {
        tracing::debug!(
            label = %raw_label,
            latin = ?latin_name,
            "no reference name for allergen label, keeping localized name"
        );
    }

    let canonical_name = reference_name.unwrap_or_else(|| local_name.clone());
    let slug = slugify(&canonical_name);

    Resolution {
        local_name,
        latin_name,
        canonical_name,
        slug,
        missed,
    }
}
