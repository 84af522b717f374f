use crate::calendar::{self, CalendarIndex};
use crate::models::{
    Episode, Interaction, InteractionKey, LibraryItem, LibraryKey, Reminder, Settings, SettingsPatch,
    SubscribedList, UserProfile,
};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// The store as shared between the sync engine, the reminder resolver and readers.
pub type SharedStore = Arc<RwLock<EntityStore>>;

/// Canonical user state: library, watched state, reminders and settings.
///
/// Settings and the calendar index are published as immutable snapshots, so
/// a reader holding an `Arc` never observes a later mutation.
#[derive(Debug, Default)]
pub struct EntityStore {
    user: Option<UserProfile>,
    watchlist: Vec<LibraryItem>,
    subscribed_lists: Vec<SubscribedList>,
    interactions: BTreeMap<InteractionKey, Interaction>,
    reminders: Vec<Reminder>,
    settings: Arc<Settings>,
    fetched: HashMap<LibraryKey, Vec<Episode>>,
    calendar: Arc<CalendarIndex>,
}

impl EntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_shared(self) -> SharedStore {
        Arc::new(RwLock::new(self))
    }

    pub fn user(&self) -> Option<&UserProfile> {
        self.user.as_ref()
    }

    pub fn set_user(&mut self, user: UserProfile) {
        self.user = Some(user);
    }

    pub fn watchlist(&self) -> &[LibraryItem] {
        &self.watchlist
    }

    pub fn contains(&self, key: LibraryKey) -> bool {
        self.watchlist.iter().any(|item| item.key() == key)
    }

    /// Insert `item`, or refresh the stored metadata if its key is already
    /// tracked. Returns `true` when the item is new.
    pub fn upsert_library_item(&mut self, item: LibraryItem) -> bool {
        match self.watchlist.iter_mut().find(|existing| existing.key() == item.key()) {
            Some(existing) => {
                *existing = item;
                false
            }
            None => {
                debug!("Tracking {} ({})", item.name, item.key());
                self.watchlist.push(item);
                true
            }
        }
    }

    /// Stop tracking `key`, dropping any reminders attached to it.
    pub fn remove_library_item(&mut self, key: LibraryKey) -> Option<LibraryItem> {
        let position = self.watchlist.iter().position(|item| item.key() == key)?;
        let removed = self.watchlist.remove(position);
        self.fetched.remove(&key);
        self.reminders.retain(|reminder| reminder.library_key() != key);
        info!("Removed {} ({}) from library", removed.name, key);
        Some(removed)
    }

    pub fn subscribed_lists(&self) -> &[SubscribedList] {
        &self.subscribed_lists
    }

    pub fn set_subscribed_lists(&mut self, lists: Vec<SubscribedList>) {
        self.subscribed_lists = lists;
    }

    /// Watchlist items followed by subscribed-list items not already on the
    /// watchlist, each key appearing once.
    pub fn tracked_items(&self) -> Vec<LibraryItem> {
        let mut seen = HashSet::new();
        self.watchlist
            .iter()
            .chain(self.subscribed_lists.iter().flat_map(|list| list.items.iter()))
            .filter(|item| seen.insert(item.key()))
            .cloned()
            .collect()
    }

    pub fn interactions(&self) -> &BTreeMap<InteractionKey, Interaction> {
        &self.interactions
    }

    pub fn interaction(&self, key: &InteractionKey) -> Option<&Interaction> {
        self.interactions.get(key)
    }

    pub fn is_watched(&self, key: &InteractionKey) -> bool {
        self.interaction(key).is_some_and(|i| i.is_watched)
    }

    /// Write watched state for `key`, overwriting any previous record.
    pub fn set_interaction(&mut self, key: InteractionKey, interaction: Interaction) {
        self.interactions.insert(key, interaction);
    }

    pub fn mark_watched(&mut self, key: InteractionKey, at: DateTime<Utc>) {
        self.set_interaction(key, Interaction::watched(at));
    }

    pub fn mark_unwatched(&mut self, key: InteractionKey) {
        self.set_interaction(key, Interaction::unwatched());
    }

    /// Last-write-wins merge per composite key. Returns how many records were written.
    pub fn merge_interactions(
        &mut self,
        incoming: impl IntoIterator<Item = (InteractionKey, Interaction)>,
    ) -> usize {
        let mut written = 0;
        for (key, interaction) in incoming {
            self.set_interaction(key, interaction);
            written += 1;
        }
        written
    }

    pub fn reminders(&self) -> &[Reminder] {
        &self.reminders
    }

    pub fn reminders_for(&self, key: LibraryKey) -> impl Iterator<Item = &Reminder> {
        self.reminders.iter().filter(move |r| r.library_key() == key)
    }

    /// Store `reminder`, replacing one with the same id or the same rule.
    /// Returns `true` when nothing was replaced.
    pub fn put_reminder(&mut self, reminder: Reminder) -> bool {
        match self
            .reminders
            .iter_mut()
            .find(|existing| existing.id == reminder.id || existing.same_rule(&reminder))
        {
            Some(existing) => {
                *existing = reminder;
                false
            }
            None => {
                self.reminders.push(reminder);
                true
            }
        }
    }

    pub fn merge_reminders(&mut self, incoming: impl IntoIterator<Item = Reminder>) -> usize {
        let mut written = 0;
        for reminder in incoming {
            self.put_reminder(reminder);
            written += 1;
        }
        written
    }

    pub fn remove_reminder(&mut self, id: &str) -> Option<Reminder> {
        let position = self.reminders.iter().position(|r| r.id == id)?;
        Some(self.reminders.remove(position))
    }

    pub fn settings(&self) -> Arc<Settings> {
        Arc::clone(&self.settings)
    }

    /// The single entry point for settings changes: publishes a new snapshot.
    pub fn update_settings(&mut self, patch: SettingsPatch) -> Arc<Settings> {
        let next = Arc::new(self.settings.apply(patch));
        debug!("Settings updated to version {}", next.version);
        self.settings = Arc::clone(&next);
        next
    }

    pub fn hide_item(&mut self, item: LibraryItem) -> Arc<Settings> {
        let mut hidden = self.settings.hidden_items.clone();
        if !hidden.iter().any(|h| h.key() == item.key()) {
            hidden.push(item);
        }
        self.update_settings(SettingsPatch {
            hidden_items: Some(hidden),
            ..Default::default()
        })
    }

    pub fn unhide_item(&mut self, key: LibraryKey) -> Arc<Settings> {
        let hidden = self
            .settings
            .hidden_items
            .iter()
            .filter(|h| h.key() != key)
            .cloned()
            .collect();
        self.update_settings(SettingsPatch {
            hidden_items: Some(hidden),
            ..Default::default()
        })
    }

    /// Replace the latest catalog releases for `key`. Not visible to
    /// calendar readers until [`EntityStore::rebuild_calendar`].
    pub fn record_releases(&mut self, key: LibraryKey, episodes: Vec<Episode>) {
        self.fetched.insert(key, episodes);
    }

    pub fn releases(&self, key: LibraryKey) -> &[Episode] {
        self.fetched.get(&key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Every recorded fetch result, keyed by library item.
    pub fn release_cache(&self) -> &HashMap<LibraryKey, Vec<Episode>> {
        &self.fetched
    }

    pub fn calendar(&self) -> Arc<CalendarIndex> {
        Arc::clone(&self.calendar)
    }

    /// Rebuild the calendar from the tracked items and their latest releases
    /// and publish it as the new snapshot.
    pub fn rebuild_calendar(&mut self) -> Arc<CalendarIndex> {
        let index = Arc::new(calendar::build_index(&self.tracked_items(), &self.fetched));
        self.calendar = Arc::clone(&index);
        index
    }
}
