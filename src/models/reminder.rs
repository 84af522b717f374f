use super::{LibraryKey, MediaKind};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReminderStrategy {
    #[default]
    Ask,
    Always,
    Never,
}

/// What a reminder fires for.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum ReminderScope {
    /// Every future episode of a series.
    All,
    MovieTheatrical,
    MovieDigital,
    Episode {
        #[serde(rename = "episodeSeason")]
        season: u32,
        #[serde(rename = "episodeNumber")]
        episode: u32,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Reminder {
    pub id: String,
    pub tmdb_id: u64,
    pub media_type: MediaKind,
    pub show_name: String,
    #[serde(flatten)]
    pub scope: ReminderScope,
    /// Minutes before the release instant; 0 fires on the day itself.
    #[serde(default)]
    pub offset_minutes: u32,
}

impl Reminder {
    pub fn new(
        key: LibraryKey,
        show_name: impl Into<String>,
        scope: ReminderScope,
        offset_minutes: u32,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            tmdb_id: key.id,
            media_type: key.kind,
            show_name: show_name.into(),
            scope,
            offset_minutes,
        }
    }

    pub fn library_key(&self) -> LibraryKey {
        LibraryKey::new(self.media_type, self.tmdb_id)
    }

    /// Two reminders with the same rule are the same reminder, whatever their ids.
    pub fn same_rule(&self, other: &Reminder) -> bool {
        self.library_key() == other.library_key()
            && self.scope == other.scope
            && self.offset_minutes == other.offset_minutes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn episode_scope_uses_flat_wire_fields() {
        let reminder = Reminder {
            id: "r1".into(),
            tmdb_id: 42,
            media_type: MediaKind::Tv,
            show_name: "Show".into(),
            scope: ReminderScope::Episode {
                season: 2,
                episode: 5,
            },
            offset_minutes: 30,
        };

        let json = serde_json::to_value(&reminder).unwrap();
        assert_eq!(json["scope"], "episode");
        assert_eq!(json["episodeSeason"], 2);
        assert_eq!(json["episodeNumber"], 5);
        assert_eq!(json["offsetMinutes"], 30);

        let back: Reminder = serde_json::from_value(json).unwrap();
        assert_eq!(back, reminder);
    }

    #[test]
    fn negative_offsets_do_not_deserialize() {
        let raw = r#"{"id":"r","tmdbId":1,"mediaType":"tv","showName":"S","scope":"all","offsetMinutes":-5}"#;
        assert!(serde_json::from_str::<Reminder>(raw).is_err());
    }

    #[test]
    fn same_rule_ignores_ids() {
        let a = Reminder::new(LibraryKey::tv(1), "S", ReminderScope::All, 0);
        let b = Reminder::new(LibraryKey::tv(1), "S", ReminderScope::All, 0);
        assert_ne!(a.id, b.id);
        assert!(a.same_rule(&b));
        assert!(!a.same_rule(&Reminder::new(LibraryKey::movie(1), "S", ReminderScope::All, 0)));
    }
}
