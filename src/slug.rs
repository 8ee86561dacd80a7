/// Identifier-safe text encoding.
///
/// `slugify` is a pure, total function: any input yields a string made only
/// of `[a-z0-9_]`, with no leading or trailing underscore. Callers must treat
/// an empty result as "unresolved".

use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

/// Letters that survive canonical decomposition without losing their mark.
const TRANSLITERATIONS: &[(char, &str)] = &[
    ('ß', "ss"),
    ('æ', "ae"),
    ('œ', "oe"),
    ('ø', "o"),
    ('đ', "d"),
    ('ð', "d"),
    ('ł', "l"),
    ('þ', "th"),
    ('ı', "i"),
    ('ħ', "h"),
];

/// Encodes `text` as a lowercase identifier.
///
/// Steps: drop everything from the first `(`; decompose and strip
/// diacritics; lowercase; transliterate the few letters decomposition
/// leaves alone; collapse every run of other characters into one `_`;
/// trim underscores.
pub fn slugify(text: &str) -> String {
    let head = text.split('(').next().unwrap_or_default();

    let folded: String = head
        .nfkd()
        .filter(|c| !is_combining_mark(*c))
        .flat_map(char::to_lowercase)
        .collect();

    let mut slug = String::with_capacity(folded.len());
    let mut pending_separator = false;
    for c in folded.chars() {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            push_piece(&mut slug, &mut pending_separator, c.encode_utf8(&mut [0u8; 4]));
        } else if let Some(replacement) = transliterate(c) {
            push_piece(&mut slug, &mut pending_separator, replacement);
        } else {
            pending_separator = true;
        }
    }
    slug
}

fn transliterate(c: char) -> Option<&'static str> {
    TRANSLITERATIONS
        .iter()
        .find(|(from, _)| *from == c)
        .map(|(_, to)| *to)
}

fn push_piece(slug: &mut String, pending_separator: &mut bool, piece: &str) {
    if *pending_separator && !slug.is_empty() {
        slug.push('_');
    }
    *pending_separator = false;
    slug.push_str(piece);
}

/// Splits an upstream place title into postal code and place name.
///
/// `"9020 Klagenfurt"` becomes `("9020", "Klagenfurt")`. The leading token is
/// only treated as a code when it is alphanumeric (hyphens allowed) and a
/// place name follows it.
pub fn split_location(title: &str) -> (&str, &str) {
    let title = title.trim();
    if let Some((head, rest)) = title.split_once(char::is_whitespace) {
        let is_code = !head.is_empty()
            && head.chars().all(|c| c.is_ascii_alphanumeric() || c == '-');
        let rest = rest.trim_start();
        if is_code && !rest.is_empty() {
            return (head, rest);
        }
    }
    ("", title)
}

/// Slug of the place-name part of an upstream title.
pub fn place_slug(title: &str) -> String {
    slugify(split_location(title).1)
}
