//! Deterministic slug derivation for migrated titles. Greek titles are the
//! common case, so the rules are Unicode-aware: lowercase, strip combining
//! marks via NFD, collapse non-alphanumeric runs to single dashes.

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Slugify a title. "Αγάπη μου" becomes "αγαπη-μου"; the output is stable
/// across invocations and contains no diacritics.
pub fn slugify(input: &str) -> String {
    let mut slug = String::with_capacity(input.len());
    let mut last_dash = false;
    for ch in input.nfd() {
        if is_combining_mark(ch) {
            continue;
        }
        if ch.is_alphanumeric() {
            for lower in ch.to_lowercase() {
                slug.push(lower);
            }
            last_dash = false;
        } else if !last_dash && !slug.is_empty() {
            slug.push('-');
            last_dash = true;
        }
    }
    slug.trim_end_matches('-').to_string()
}

/// Slug for entity types that need global uniqueness (songs, artists): the
/// legacy numeric id is prefixed so title collisions cannot collide slugs.
pub fn slug_with_id(legacy_id: i64, input: &str) -> String {
    let base = slugify(input);
    if base.is_empty() {
        legacy_id.to_string()
    } else {
        format!("{legacy_id}-{base}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_greek_diacritics() {
        assert_eq!(slugify("Αγάπη μου"), "αγαπη-μου");
        // final sigma lowercases as-is, tonos is gone
        assert_eq!(slugify("Φραγκοσυριανή"), "φραγκοσυριανη");
    }

    #[test]
    fn collapses_punctuation_runs() {
        assert_eq!(slugify("Minore  --  της Αυγής!"), "minore-της-αυγης");
        assert_eq!(slugify("  ...  "), "");
    }

    #[test]
    fn id_prefix_is_deterministic() {
        let a = slug_with_id(123, "Αγάπη μου");
        let b = slug_with_id(123, "Αγάπη μου");
        assert_eq!(a, b);
        assert_eq!(a, "123-αγαπη-μου");
        assert!(!a.contains('ά'));
    }

    #[test]
    fn empty_title_falls_back_to_id() {
        assert_eq!(slug_with_id(77, "???"), "77");
    }
}
