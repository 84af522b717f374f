//! Portable snapshot of the whole user state.
//!
//! The same JSON shape is used for file backups and, base64-wrapped, for the
//! device-to-device sync payload. Decoding validates the whole payload before
//! anything is applied to a store.

use crate::models::{
    Interaction, InteractionKey, LibraryItem, Reminder, Settings, SettingsPatch, SubscribedList,
    UserProfile,
};
use crate::store::EntityStore;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ValidationError {
    #[error("Payload is not valid JSON: {0}")]
    Malformed(String),

    #[error("Payload is missing required field '{0}'")]
    MissingField(&'static str),

    #[error("Field '{field}' must be {expected}")]
    WrongType {
        field: &'static str,
        expected: &'static str,
    },

    #[error("Invalid {field}: {message}")]
    Schema { field: String, message: String },

    #[error("Sync payload could not be decoded: {0}")]
    Encoding(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BackupPayload {
    pub user: UserProfile,
    pub watchlist: Vec<LibraryItem>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subscribed_lists: Vec<SubscribedList>,
    #[serde(default)]
    pub interactions: BTreeMap<InteractionKey, Interaction>,
    #[serde(default)]
    pub reminders: Vec<Reminder>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<Settings>,
}

impl BackupPayload {
    /// Units the sync engine fetches individually: watchlist items, then
    /// items of every subscribed list.
    pub fn unit_count(&self) -> usize {
        self.watchlist.len()
            + self
                .subscribed_lists
                .iter()
                .map(|list| list.items.len())
                .sum::<usize>()
    }
}

/// Snapshot everything in `store`.
pub fn encode(store: &EntityStore) -> BackupPayload {
    BackupPayload {
        user: store.user().cloned().unwrap_or_default(),
        watchlist: store.watchlist().to_vec(),
        subscribed_lists: store.subscribed_lists().to_vec(),
        interactions: store.interactions().clone(),
        reminders: store.reminders().to_vec(),
        settings: Some(Settings {
            version: 0,
            ..(*store.settings()).clone()
        }),
    }
}

pub fn to_json(payload: &BackupPayload) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(payload)
}

fn expect_array(value: Option<&Value>, field: &'static str, required: bool) -> Result<(), ValidationError> {
    match value {
        None | Some(Value::Null) if required => Err(ValidationError::MissingField(field)),
        None | Some(Value::Null) | Some(Value::Array(_)) => Ok(()),
        Some(_) => Err(ValidationError::WrongType {
            field,
            expected: "an array",
        }),
    }
}

fn expect_object(value: Option<&Value>, field: &'static str) -> Result<(), ValidationError> {
    match value {
        None | Some(Value::Null) | Some(Value::Object(_)) => Ok(()),
        Some(_) => Err(ValidationError::WrongType {
            field,
            expected: "an object",
        }),
    }
}

fn typed<T: DeserializeOwned>(value: Value, field: &str) -> Result<T, ValidationError> {
    serde_json::from_value(value).map_err(|e| ValidationError::Schema {
        field: field.to_string(),
        message: e.to_string(),
    })
}

/// Parse and validate a backup. Never panics on malformed input.
pub fn decode(raw: &str) -> Result<BackupPayload, ValidationError> {
    let value: Value = serde_json::from_str(raw).map_err(|e| ValidationError::Malformed(e.to_string()))?;
    let Value::Object(mut root) = value else {
        return Err(ValidationError::WrongType {
            field: "payload",
            expected: "an object",
        });
    };

    match root.get("user") {
        None | Some(Value::Null) => return Err(ValidationError::MissingField("user")),
        Some(Value::Object(_)) => {}
        Some(_) => {
            return Err(ValidationError::WrongType {
                field: "user",
                expected: "an object",
            })
        }
    }
    expect_array(root.get("watchlist"), "watchlist", true)?;
    let lists = root.remove("subscribedLists").or_else(|| root.remove("subscribed_lists"));
    expect_array(lists.as_ref(), "subscribedLists", false)?;
    if let Some(Value::Array(lists)) = &lists {
        for list in lists {
            expect_object(Some(list), "subscribedLists[]")?;
            expect_array(list.get("items"), "subscribedLists[].items", true)?;
        }
    }
    expect_object(root.get("interactions"), "interactions")?;
    expect_array(root.get("reminders"), "reminders", false)?;
    expect_object(root.get("settings"), "settings")?;

    let mut take = |field: &str| root.remove(field).filter(|v| !v.is_null());

    let user: UserProfile = typed(take("user").unwrap_or_default(), "user")?;
    let watchlist: Vec<LibraryItem> = typed(take("watchlist").unwrap_or_default(), "watchlist")?;
    let subscribed_lists: Vec<SubscribedList> = match lists.filter(|v| !v.is_null()) {
        Some(lists) => typed(lists, "subscribedLists")?,
        None => Vec::new(),
    };
    let interactions = match take("interactions") {
        Some(value) => typed(value, "interactions")?,
        None => BTreeMap::new(),
    };
    let reminders = match take("reminders") {
        Some(value) => typed(value, "reminders")?,
        None => Vec::new(),
    };
    let settings = take("settings").map(|value| typed(value, "settings")).transpose()?;

    let payload = BackupPayload {
        user,
        watchlist,
        subscribed_lists,
        interactions,
        reminders,
        settings,
    };
    debug!(
        "Decoded backup for '{}': {} watchlist items, {} list items, {} interactions, {} reminders",
        payload.user.username,
        payload.watchlist.len(),
        payload.unit_count() - payload.watchlist.len(),
        payload.interactions.len(),
        payload.reminders.len()
    );
    Ok(payload)
}

/// The string carried over the QR transport.
pub fn encode_sync_payload(payload: &BackupPayload) -> Result<String, serde_json::Error> {
    let json = serde_json::to_vec(payload)?;
    Ok(URL_SAFE_NO_PAD.encode(json))
}

pub fn decode_sync_payload(raw: &str) -> Result<BackupPayload, ValidationError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(raw.trim())
        .map_err(|e| ValidationError::Encoding(e.to_string()))?;
    let json = String::from_utf8(bytes).map_err(|e| ValidationError::Encoding(e.to_string()))?;
    decode(&json)
}

/// Apply a snapshot to `store` without touching the catalog. Collections are
/// merged last-write-wins and settings are replaced wholesale.
pub fn restore_into(store: &mut EntityStore, payload: BackupPayload) {
    if payload.user.username.is_empty() {
        warn!("Restoring a backup without a username");
    }
    store.set_user(payload.user);
    for item in payload.watchlist {
        store.upsert_library_item(item);
    }
    store.set_subscribed_lists(payload.subscribed_lists);
    store.merge_interactions(payload.interactions);
    store.merge_reminders(payload.reminders);
    if let Some(settings) = payload.settings {
        store.update_settings(SettingsPatch::replace_with(settings));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{LibraryKey, MediaKind, ReminderScope, ReminderStrategy};
    use chrono::{TimeZone, Utc};

    fn sample_store() -> EntityStore {
        let mut store = EntityStore::new();
        store.set_user(UserProfile {
            username: "alice".into(),
            tmdb_key: Some("key".into()),
        });
        store.upsert_library_item(LibraryItem {
            id: 42,
            media_type: MediaKind::Tv,
            name: "Show".into(),
            poster_path: Some("/show.jpg".into()),
            first_air_date: None,
        });
        store.upsert_library_item(LibraryItem {
            id: 42,
            media_type: MediaKind::Movie,
            name: "Film".into(),
            poster_path: None,
            first_air_date: None,
        });
        store.mark_watched(
            "episode-42-1-3".parse().unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap(),
        );
        store.mark_unwatched("movie-42-movie-movie".parse().unwrap());
        store.put_reminder(Reminder::new(LibraryKey::tv(42), "Show", ReminderScope::All, 15));
        store.update_settings(SettingsPatch {
            hide_theatrical: Some(true),
            reminder_strategy: Some(ReminderStrategy::Always),
            ..Default::default()
        });
        store
    }

    #[test]
    fn decode_of_encode_restores_an_equal_store() {
        let original = sample_store();
        let json = to_json(&encode(&original)).unwrap();

        let mut restored = EntityStore::new();
        restore_into(&mut restored, decode(&json).unwrap());

        assert_eq!(restored.user(), original.user());
        assert_eq!(restored.watchlist(), original.watchlist());
        assert_eq!(restored.interactions(), original.interactions());
        assert_eq!(restored.reminders(), original.reminders());
        let (a, b) = (restored.settings(), original.settings());
        assert_eq!(a.hide_theatrical, b.hide_theatrical);
        assert_eq!(a.reminder_strategy, b.reminder_strategy);
    }

    #[test]
    fn sync_payload_goes_through_the_same_gate() {
        let payload = encode(&sample_store());
        let raw = encode_sync_payload(&payload).unwrap();

        assert!(!raw.contains('{'));
        assert_eq!(decode_sync_payload(&raw).unwrap(), payload);
        assert!(matches!(
            decode_sync_payload("not base64!"),
            Err(ValidationError::Encoding(_))
        ));

        let no_user = URL_SAFE_NO_PAD.encode(r#"{"watchlist": []}"#);
        assert_eq!(
            decode_sync_payload(&no_user),
            Err(ValidationError::MissingField("user"))
        );
    }

    #[test]
    fn malformed_json_is_a_validation_error() {
        assert!(matches!(decode("{not json"), Err(ValidationError::Malformed(_))));
        assert!(matches!(decode(""), Err(ValidationError::Malformed(_))));
        assert_eq!(
            decode("[]"),
            Err(ValidationError::WrongType {
                field: "payload",
                expected: "an object"
            })
        );
    }

    #[test]
    fn user_is_required() {
        assert_eq!(decode(r#"{"watchlist": []}"#), Err(ValidationError::MissingField("user")));
        assert_eq!(
            decode(r#"{"user": null, "watchlist": []}"#),
            Err(ValidationError::MissingField("user"))
        );
        assert!(matches!(
            decode(r#"{"user": "alice", "watchlist": []}"#),
            Err(ValidationError::WrongType { field: "user", .. })
        ));
    }

    #[test]
    fn collections_must_be_arrays() {
        assert_eq!(
            decode(r#"{"user": {"username": "a"}}"#),
            Err(ValidationError::MissingField("watchlist"))
        );
        assert!(matches!(
            decode(r#"{"user": {"username": "a"}, "watchlist": {}}"#),
            Err(ValidationError::WrongType { field: "watchlist", .. })
        ));
        assert!(matches!(
            decode(r#"{"user": {"username": "a"}, "watchlist": [], "subscribedLists": {}}"#),
            Err(ValidationError::WrongType { field: "subscribedLists", .. })
        ));
        assert!(matches!(
            decode(r#"{"user": {"username": "a"}, "watchlist": [], "subscribedLists": [{"name": "x"}]}"#),
            Err(ValidationError::MissingField("subscribedLists[].items"))
        ));
    }

    #[test]
    fn bad_entries_are_schema_errors() {
        let err = decode(r#"{"user": {"username": "a"}, "watchlist": [{"id": "abc", "name": "x"}]}"#)
            .unwrap_err();
        assert!(matches!(err, ValidationError::Schema { ref field, .. } if field == "watchlist"));

        let err = decode(
            r#"{"user": {"username": "a"}, "watchlist": [], "interactions": {"bogus": {"isWatched": true}}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ValidationError::Schema { ref field, .. } if field == "interactions"));
    }

    #[test]
    fn optional_sections_default_to_empty() {
        let payload = decode(
            r#"{
                "user": {"username": "bob", "tmdb_key": "k"},
                "watchlist": [{"id": 1, "name": "Show"}, {"id": 2, "title": "Film"}],
                "subscribedLists": [{"items": [{"id": 3, "media_type": "tv", "name": "Listed"}]}]
            }"#,
        )
        .unwrap();

        assert_eq!(payload.user.tmdb_key.as_deref(), Some("k"));
        assert_eq!(payload.watchlist[1].key(), LibraryKey::movie(2));
        assert_eq!(payload.unit_count(), 3);
        assert!(payload.interactions.is_empty());
        assert!(payload.reminders.is_empty());
        assert!(payload.settings.is_none());
    }
}
