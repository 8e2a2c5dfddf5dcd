//! Lenient numeric parsing for legacy free-text columns. The source data
//! mixes "1954", " 1954 ", "1954?" and plain garbage in the same column.

/// Whether the field is purely a numeric legacy id (as opposed to free
/// text). Used for self-references like a song's `Based_On` column.
pub fn is_numeric_id(raw: &str) -> bool {
    let raw = raw.trim();
    !raw.is_empty() && raw.bytes().all(|b| b.is_ascii_digit())
}

/// Extract a plausible four-digit year from a loose legacy year field
/// ("1954", "1954;", "~1954"). Anything else is `None`.
pub fn parse_year(raw: Option<&str>) -> Option<i32> {
    let raw = raw?.trim();
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() != 4 {
        return None;
    }
    let year = digits.parse::<i32>().ok()?;
    (1800..=2100).contains(&year).then_some(year)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_id_detection() {
        assert!(is_numeric_id(" 123 "));
        assert!(!is_numeric_id("Μινόρε της αυγής"));
        assert!(!is_numeric_id(""));
        assert!(!is_numeric_id("12a"));
    }

    #[test]
    fn year_extraction() {
        assert_eq!(parse_year(Some("1954")), Some(1954));
        assert_eq!(parse_year(Some("~1954;")), Some(1954));
        assert_eq!(parse_year(Some("54")), None);
        assert_eq!(parse_year(Some("0000")), None);
    }
}
