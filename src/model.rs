//! Role and status vocabularies shared by the transformers and reconcilers.
//! Everything is stored as TEXT in the target schema; the enums exist so the
//! pipeline cannot write a misspelled role.

use std::fmt;

/// Songwriting credit attached directly to a song.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CreditRole {
    Composer,
    Lyricist,
}

impl CreditRole {
    pub fn as_str(self) -> &'static str {
        match self {
            CreditRole::Composer => "COMPOSER",
            CreditRole::Lyricist => "LYRICIST",
        }
    }
}

/// Role of an artist on one recorded version of a song.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VersionRole {
    SingerFront,
    SingerBack,
    Soloist,
    Musician,
    Composer,
    Lyricist,
}

impl VersionRole {
    pub fn as_str(self) -> &'static str {
        match self {
            VersionRole::SingerFront => "SINGER_FRONT",
            VersionRole::SingerBack => "SINGER_BACK",
            VersionRole::Soloist => "SOLOIST",
            VersionRole::Musician => "MUSICIAN",
            VersionRole::Composer => "COMPOSER",
            VersionRole::Lyricist => "LYRICIST",
        }
    }
}

/// Access role of a user on a list or list group. The derived `Ord` is the
/// role-strength ranking: OWNER > EDITOR > VIEWER. When the same wp user id
/// shows up in several legacy ACL fields we keep the maximum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MemberRole {
    Viewer,
    Editor,
    Owner,
}

impl MemberRole {
    pub fn as_str(self) -> &'static str {
        match self {
            MemberRole::Viewer => "VIEWER",
            MemberRole::Editor => "EDITOR",
            MemberRole::Owner => "OWNER",
        }
    }
}

impl fmt::Display for MemberRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Publication state of a migrated entity. The legacy data mixes English,
/// Greek and numeric spellings; anything we do not recognize falls back to
/// `Published` (the WordPress-era default) instead of erroring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EntryStatus {
    #[default]
    Published,
    Draft,
    Hidden,
}

impl EntryStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            EntryStatus::Published => "PUBLISHED",
            EntryStatus::Draft => "DRAFT",
            EntryStatus::Hidden => "HIDDEN",
        }
    }

    pub fn from_legacy(raw: Option<&str>) -> Self {
        let Some(raw) = raw else {
            return EntryStatus::default();
        };
        match raw.trim().to_lowercase().as_str() {
            "" => EntryStatus::default(),
            "publish" | "published" | "public" | "1" | "yes" | "ok" => EntryStatus::Published,
            // Greek variants seen in the legacy dump.
            "ναι" | "δημοσιευμενο" | "δημοσιευμένο" | "ενεργο" | "ενεργό" => {
                EntryStatus::Published
            }
            "draft" | "pending" | "0" | "no" | "προχειρο" | "πρόχειρο" | "οχι" | "όχι" => {
                EntryStatus::Draft
            }
            "hidden" | "private" | "trash" | "κρυφο" | "κρυφό" => EntryStatus::Hidden,
            _ => EntryStatus::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_strength_ranking() {
        assert!(MemberRole::Owner > MemberRole::Editor);
        assert!(MemberRole::Editor > MemberRole::Viewer);
        assert_eq!(
            MemberRole::Viewer.max(MemberRole::Editor),
            MemberRole::Editor
        );
    }

    #[test]
    fn status_maps_localized_variants() {
        assert_eq!(EntryStatus::from_legacy(Some("ΝΑΙ")), EntryStatus::Published);
        assert_eq!(
            EntryStatus::from_legacy(Some(" πρόχειρο ")),
            EntryStatus::Draft
        );
        assert_eq!(EntryStatus::from_legacy(Some("trash")), EntryStatus::Hidden);
    }

    #[test]
    fn unknown_status_falls_back_to_default() {
        assert_eq!(
            EntryStatus::from_legacy(Some("whatever")),
            EntryStatus::Published
        );
        assert_eq!(EntryStatus::from_legacy(None), EntryStatus::Published);
        assert_eq!(EntryStatus::from_legacy(Some("")), EntryStatus::Published);
    }
}
