//! Parser for the denormalized multi-value reference fields the legacy
//! schema uses everywhere (e.g. a song's `Composer` column holding
//! `"571, 448,571"`).

/// Parse a comma-separated legacy id list into an ordered, deduplicated set.
///
/// Rules:
/// - split on comma, trim each token, drop empties;
/// - keep only tokens that are non-negative integers;
/// - deduplicate preserving discovery order;
/// - a missing field or the literal string "null" (any case) is an empty
///   list, never an error.
pub fn parse_legacy_id_list(raw: Option<&str>) -> Vec<i64> {
    use itertools::Itertools;

    let Some(raw) = raw else {
        return Vec::new();
    };
    let raw = raw.trim();
    if raw.is_empty() || raw.eq_ignore_ascii_case("null") {
        return Vec::new();
    }

    raw.split(',')
        .map(str::trim)
        .filter(|token| !token.is_empty() && token.bytes().all(|b| b.is_ascii_digit()))
        // all-digit but overflowing i64 is treated like any other junk token
        .filter_map(|token| token.parse::<i64>().ok())
        .unique()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deduplicates_preserving_order() {
        assert_eq!(parse_legacy_id_list(Some("571, 448,571")), vec![571, 448]);
    }

    #[test]
    fn null_and_missing_are_empty() {
        assert_eq!(parse_legacy_id_list(Some("null")), Vec::<i64>::new());
        assert_eq!(parse_legacy_id_list(Some("NULL")), Vec::<i64>::new());
        assert_eq!(parse_legacy_id_list(None), Vec::<i64>::new());
        assert_eq!(parse_legacy_id_list(Some("  ")), Vec::<i64>::new());
    }

    #[test]
    fn junk_tokens_are_dropped() {
        assert_eq!(
            parse_legacy_id_list(Some("12, -3, abc, 4x, ,27,")),
            vec![12, 27]
        );
    }

    #[test]
    fn single_value_fields_parse_too() {
        assert_eq!(parse_legacy_id_list(Some("3")), vec![3]);
    }
}
