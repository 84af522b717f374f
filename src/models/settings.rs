use super::{LibraryItem, LibraryKey, ReminderStrategy};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ViewMode {
    #[default]
    Grid,
    List,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReplacementMode {
    #[default]
    Blur,
    Banner,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct SpoilerConfig {
    #[serde(default)]
    pub images: bool,
    #[serde(default)]
    pub title: bool,
    #[serde(default)]
    pub replacement_mode: ReplacementMode,
}

/// User preferences. Snapshots are immutable once published by the store;
/// every change goes through [`Settings::apply`] and bumps `version`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    #[serde(skip)]
    pub version: u64,
    pub view_mode: ViewMode,
    pub compact_calendar: bool,
    pub hide_theatrical: bool,
    pub ignore_specials: bool,
    pub hidden_items: Vec<LibraryItem>,
    pub spoiler_config: SpoilerConfig,
    pub reminder_strategy: ReminderStrategy,
}

impl Settings {
    pub fn is_hidden(&self, key: LibraryKey) -> bool {
        self.hidden_items.iter().any(|item| item.key() == key)
    }

    /// Produce the next snapshot with `patch` applied.
    pub fn apply(&self, patch: SettingsPatch) -> Settings {
        let mut next = self.clone();
        next.version = self.version + 1;

        if let Some(view_mode) = patch.view_mode {
            next.view_mode = view_mode;
        }
        if let Some(compact) = patch.compact_calendar {
            next.compact_calendar = compact;
        }
        if let Some(hide) = patch.hide_theatrical {
            next.hide_theatrical = hide;
        }
        if let Some(ignore) = patch.ignore_specials {
            next.ignore_specials = ignore;
        }
        if let Some(hidden) = patch.hidden_items {
            next.hidden_items = hidden;
        }
        if let Some(spoilers) = patch.spoiler_config {
            next.spoiler_config = spoilers;
        }
        if let Some(strategy) = patch.reminder_strategy {
            next.reminder_strategy = strategy;
        }
        next
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SettingsPatch {
    pub view_mode: Option<ViewMode>,
    pub compact_calendar: Option<bool>,
    pub hide_theatrical: Option<bool>,
    pub ignore_specials: Option<bool>,
    pub hidden_items: Option<Vec<LibraryItem>>,
    pub spoiler_config: Option<SpoilerConfig>,
    pub reminder_strategy: Option<ReminderStrategy>,
}

impl SettingsPatch {
    pub fn reminder_strategy(strategy: ReminderStrategy) -> Self {
        Self {
            reminder_strategy: Some(strategy),
            ..Default::default()
        }
    }

    /// A patch that replaces every field with the values in `settings`.
    pub fn replace_with(settings: Settings) -> Self {
        Self {
            view_mode: Some(settings.view_mode),
            compact_calendar: Some(settings.compact_calendar),
            hide_theatrical: Some(settings.hide_theatrical),
            ignore_specials: Some(settings.ignore_specials),
            hidden_items: Some(settings.hidden_items),
            spoiler_config: Some(settings.spoiler_config),
            reminder_strategy: Some(settings.reminder_strategy),
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MediaKind;

    #[test]
    fn apply_bumps_version_and_leaves_unpatched_fields() {
        let base = Settings {
            ignore_specials: true,
            ..Default::default()
        };
        let next = base.apply(SettingsPatch {
            hide_theatrical: Some(true),
            ..Default::default()
        });

        assert_eq!(next.version, base.version + 1);
        assert!(next.hide_theatrical);
        assert!(next.ignore_specials);
        assert!(!base.hide_theatrical);
    }

    #[test]
    fn missing_settings_fields_fall_back_to_defaults() {
        let settings: Settings =
            serde_json::from_str(r#"{"hideTheatrical": true, "reminderStrategy": "never"}"#).unwrap();
        assert!(settings.hide_theatrical);
        assert_eq!(settings.reminder_strategy, ReminderStrategy::Never);
        assert_eq!(settings.view_mode, ViewMode::Grid);
        assert_eq!(settings.spoiler_config.replacement_mode, ReplacementMode::Blur);
    }

    #[test]
    fn hidden_items_match_by_library_key() {
        let settings = Settings {
            hidden_items: vec![LibraryItem {
                id: 5,
                media_type: MediaKind::Movie,
                name: "Hidden".into(),
                poster_path: None,
                first_air_date: None,
            }],
            ..Default::default()
        };
        assert!(settings.is_hidden(LibraryKey::movie(5)));
        assert!(!settings.is_hidden(LibraryKey::tv(5)));
    }
}
