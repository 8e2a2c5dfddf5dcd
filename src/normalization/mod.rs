pub mod idlist;
pub mod numeric;
pub mod slug;

/// Trim a legacy free-text field; empty strings collapse to `None` so they
/// land as NULL instead of "" in the target store.
pub fn trim_to_opt(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_and_whitespace_become_none() {
        assert_eq!(trim_to_opt(None), None);
        assert_eq!(trim_to_opt(Some("")), None);
        assert_eq!(trim_to_opt(Some("   ")), None);
        assert_eq!(trim_to_opt(Some("  Ρεμπέτικο ")), Some("Ρεμπέτικο".into()));
    }
}
