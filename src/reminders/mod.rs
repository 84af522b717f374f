//! Reminder decisions for library-add events, and expansion of standing
//! reminder rules into concrete trigger times.

use crate::calendar::CalendarIndex;
use crate::models::{
    Episode, InteractionKey, LibraryItem, MediaKind, ReleaseType, Reminder, ReminderScope,
    ReminderStrategy, SettingsPatch,
};
use crate::store::{EntityStore, SharedStore};
use async_trait::async_trait;
use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use tracing::{debug, info, instrument, warn};

/// Known release dates of a movie at the time it is added.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReleaseWindow {
    pub theatrical: Option<NaiveDate>,
    pub digital: Option<NaiveDate>,
}

impl ReleaseWindow {
    pub fn from_episodes(episodes: &[Episode]) -> Self {
        let first = |kind| {
            episodes
                .iter()
                .filter(|e| e.is_movie && e.release_type == Some(kind))
                .map(|e| e.air_date)
                .min()
        };
        Self {
            theatrical: first(ReleaseType::Theatrical),
            digital: first(ReleaseType::Digital),
        }
    }

    fn theatrical_first(&self) -> bool {
        match (self.theatrical, self.digital) {
            (Some(theatrical), Some(digital)) => theatrical < digital,
            (Some(_), None) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LibraryAdd {
    pub item: LibraryItem,
    pub releases: ReleaseWindow,
}

impl LibraryAdd {
    pub fn new(item: LibraryItem) -> Self {
        Self {
            item,
            releases: ReleaseWindow::default(),
        }
    }

    pub fn with_releases(mut self, releases: ReleaseWindow) -> Self {
        self.releases = releases;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Skip,
    PromptUser(LibraryAdd),
    AutoCommit(Reminder),
}

/// What the user answered when asked about a reminder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptChoice {
    Confirm {
        scope: ReminderScope,
        offset_minutes: u32,
    },
    Decline,
    /// Create a reminder now and stop asking.
    Always,
    /// Skip now and stop asking.
    Never,
}

#[async_trait]
pub trait ReminderPrompt: Send + Sync {
    async fn ask(&self, candidate: &LibraryAdd) -> PromptChoice;
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Skipped,
    Created(Reminder),
}

/// The reminder created without asking: every episode of a series, or the
/// earliest known release window of a movie, on the day itself.
pub fn default_reminder(event: &LibraryAdd) -> Reminder {
    let scope = match event.item.media_type {
        MediaKind::Tv => ReminderScope::All,
        MediaKind::Movie if event.releases.theatrical_first() => ReminderScope::MovieTheatrical,
        MediaKind::Movie => ReminderScope::MovieDigital,
    };
    Reminder::new(event.item.key(), event.item.name.clone(), scope, 0)
}

pub fn evaluate(strategy: ReminderStrategy, event: &LibraryAdd) -> Decision {
    match strategy {
        ReminderStrategy::Never => Decision::Skip,
        ReminderStrategy::Always => Decision::AutoCommit(default_reminder(event)),
        ReminderStrategy::Ask => Decision::PromptUser(event.clone()),
    }
}

pub fn scope_fits(kind: MediaKind, scope: &ReminderScope) -> bool {
    match (kind, scope) {
        (MediaKind::Tv, ReminderScope::All | ReminderScope::Episode { .. }) => true,
        (MediaKind::Movie, ReminderScope::MovieTheatrical | ReminderScope::MovieDigital) => true,
        _ => false,
    }
}

fn commit(store: &mut EntityStore, reminder: Reminder) -> Outcome {
    info!(
        "Reminder {} for {} ({:?}, {} min before)",
        reminder.id, reminder.show_name, reminder.scope, reminder.offset_minutes
    );
    store.put_reminder(reminder.clone());
    Outcome::Created(reminder)
}

/// Apply the user's answer to a prompted add. "Always" and "Never" also
/// change the strategy used for later adds.
pub fn resolve_prompt(store: &mut EntityStore, event: &LibraryAdd, choice: PromptChoice) -> Outcome {
    match choice {
        PromptChoice::Decline => Outcome::Skipped,
        PromptChoice::Confirm {
            scope,
            offset_minutes,
        } => {
            if !scope_fits(event.item.media_type, &scope) {
                warn!(
                    "Reminder scope {:?} does not apply to {} ({}), skipping",
                    scope,
                    event.item.name,
                    event.item.key()
                );
                return Outcome::Skipped;
            }
            let reminder = Reminder::new(event.item.key(), event.item.name.clone(), scope, offset_minutes);
            commit(store, reminder)
        }
        PromptChoice::Always | PromptChoice::Never => {
            let strategy = if choice == PromptChoice::Always {
                ReminderStrategy::Always
            } else {
                ReminderStrategy::Never
            };
            store.update_settings(SettingsPatch::reminder_strategy(strategy));
            match evaluate(strategy, event) {
                Decision::AutoCommit(reminder) => commit(store, reminder),
                _ => Outcome::Skipped,
            }
        }
    }
}

/// Decide and persist the reminder for a library add. The prompt is only
/// consulted under the `ask` strategy, and the store is not locked while
/// waiting on it.
#[instrument(skip(store, prompt, event), fields(item = %event.item.key()))]
pub async fn handle_library_add(
    store: &SharedStore,
    event: &LibraryAdd,
    prompt: &dyn ReminderPrompt,
) -> Outcome {
    let strategy = store.read().await.settings().reminder_strategy;
    debug!("Evaluating reminder with strategy {:?}", strategy);

    match evaluate(strategy, event) {
        Decision::Skip => Outcome::Skipped,
        Decision::AutoCommit(reminder) => commit(&mut *store.write().await, reminder),
        Decision::PromptUser(candidate) => {
            let choice = prompt.ask(&candidate).await;
            resolve_prompt(&mut *store.write().await, &candidate, choice)
        }
    }
}

fn applies_to(reminder: &Reminder, episode: &Episode) -> bool {
    if reminder.library_key() != episode.library_key() {
        return false;
    }
    match reminder.scope {
        ReminderScope::All => true,
        ReminderScope::MovieTheatrical => {
            episode.is_movie && episode.release_type == Some(ReleaseType::Theatrical)
        }
        ReminderScope::MovieDigital => {
            episode.is_movie && episode.release_type == Some(ReleaseType::Digital)
        }
        ReminderScope::Episode { season, episode: number } => {
            !episode.is_movie
                && episode.season_number == Some(season)
                && episode.episode_number == Some(number)
        }
    }
}

/// Local instant a release happens: its air date at `release_hour`.
pub fn release_instant(episode: &Episode, release_hour: u32) -> NaiveDateTime {
    let time = NaiveTime::from_hms_opt(release_hour.min(23), 0, 0).unwrap_or_default();
    episode.air_date.and_time(time)
}

/// When `reminder` fires for `episode`, or `None` if the rule does not cover it.
pub fn expand(reminder: &Reminder, episode: &Episode, release_hour: u32) -> Option<NaiveDateTime> {
    applies_to(reminder, episode).then(|| {
        release_instant(episode, release_hour) - Duration::minutes(reminder.offset_minutes as i64)
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledTrigger {
    pub reminder_id: String,
    pub show_name: String,
    pub release: InteractionKey,
    pub release_name: String,
    pub fire_at: NaiveDateTime,
}

/// Every trigger at or after `now` produced by expanding `reminders` over
/// the releases in `index`, ordered by fire time.
pub fn schedule(
    reminders: &[Reminder],
    index: &CalendarIndex,
    now: NaiveDateTime,
    release_hour: u32,
) -> Vec<ScheduledTrigger> {
    let mut triggers: Vec<ScheduledTrigger> = index
        .days()
        .flat_map(|(_, episodes)| episodes.iter())
        .flat_map(move |episode| {
            reminders.iter().filter_map(move |reminder| {
                let fire_at = expand(reminder, episode, release_hour)?;
                (fire_at >= now).then(|| ScheduledTrigger {
                    reminder_id: reminder.id.clone(),
                    show_name: reminder.show_name.clone(),
                    release: episode.interaction_key(),
                    release_name: episode.name.clone(),
                    fire_at,
                })
            })
        })
        .collect();
    triggers.sort_by_key(|trigger| trigger.fire_at);
    triggers
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::build_index;
    use crate::models::LibraryKey;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingPrompt {
        calls: AtomicUsize,
        answer: PromptChoice,
    }

    impl CountingPrompt {
        fn answering(answer: PromptChoice) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                answer,
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ReminderPrompt for CountingPrompt {
        async fn ask(&self, _candidate: &LibraryAdd) -> PromptChoice {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.answer
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn show_add() -> LibraryAdd {
        LibraryAdd::new(LibraryItem {
            id: 42,
            media_type: MediaKind::Tv,
            name: "Show".into(),
            poster_path: None,
            first_air_date: None,
        })
    }

    fn movie_add(releases: ReleaseWindow) -> LibraryAdd {
        LibraryAdd::new(LibraryItem {
            id: 7,
            media_type: MediaKind::Movie,
            name: "Film".into(),
            poster_path: None,
            first_air_date: None,
        })
        .with_releases(releases)
    }

    fn store_with(strategy: ReminderStrategy) -> SharedStore {
        let mut store = EntityStore::new();
        store.update_settings(SettingsPatch::reminder_strategy(strategy));
        store.into_shared()
    }

    fn episode(show_id: u64, season: u32, number: u32, air: NaiveDate) -> Episode {
        Episode {
            show_id,
            id: number as u64,
            season_number: Some(season),
            episode_number: Some(number),
            name: format!("Episode {}", number),
            overview: String::new(),
            still_path: None,
            poster_path: None,
            air_date: air,
            is_movie: false,
            release_type: None,
        }
    }

    fn movie_release(movie_id: u64, kind: ReleaseType, air: NaiveDate) -> Episode {
        Episode {
            season_number: None,
            episode_number: None,
            is_movie: true,
            release_type: Some(kind),
            ..episode(movie_id, 0, 0, air)
        }
    }

    #[tokio::test]
    async fn never_skips_without_prompting() {
        let store = store_with(ReminderStrategy::Never);
        let prompt = CountingPrompt::answering(PromptChoice::Decline);

        let outcome = handle_library_add(&store, &show_add(), &prompt).await;

        assert_eq!(outcome, Outcome::Skipped);
        assert_eq!(prompt.calls(), 0);
        assert!(store.read().await.reminders().is_empty());
    }

    #[tokio::test]
    async fn always_creates_exactly_one_reminder_without_prompting() {
        let store = store_with(ReminderStrategy::Always);
        let prompt = CountingPrompt::answering(PromptChoice::Decline);

        let outcome = handle_library_add(&store, &show_add(), &prompt).await;

        assert_eq!(prompt.calls(), 0);
        let reminders = store.read().await.reminders().to_vec();
        assert_eq!(reminders.len(), 1);
        assert_eq!(reminders[0].scope, ReminderScope::All);
        assert_eq!(reminders[0].offset_minutes, 0);
        assert_eq!(outcome, Outcome::Created(reminders[0].clone()));
    }

    #[tokio::test]
    async fn ask_prompts_and_applies_confirmation() {
        let store = store_with(ReminderStrategy::Ask);
        let prompt = CountingPrompt::answering(PromptChoice::Confirm {
            scope: ReminderScope::Episode {
                season: 1,
                episode: 2,
            },
            offset_minutes: 60,
        });

        let outcome = handle_library_add(&store, &show_add(), &prompt).await;

        assert_eq!(prompt.calls(), 1);
        let Outcome::Created(reminder) = outcome else {
            panic!("expected a reminder");
        };
        assert_eq!(reminder.offset_minutes, 60);
        assert_eq!(store.read().await.reminders().len(), 1);
    }

    #[tokio::test]
    async fn ask_decline_leaves_strategy_alone() {
        let store = store_with(ReminderStrategy::Ask);
        let prompt = CountingPrompt::answering(PromptChoice::Decline);

        assert_eq!(handle_library_add(&store, &show_add(), &prompt).await, Outcome::Skipped);
        assert_eq!(store.read().await.settings().reminder_strategy, ReminderStrategy::Ask);
    }

    #[tokio::test]
    async fn choosing_always_updates_strategy_for_later_adds() {
        let store = store_with(ReminderStrategy::Ask);
        let prompt = CountingPrompt::answering(PromptChoice::Always);

        let first = handle_library_add(&store, &show_add(), &prompt).await;
        assert!(matches!(first, Outcome::Created(_)));
        assert_eq!(store.read().await.settings().reminder_strategy, ReminderStrategy::Always);

        handle_library_add(&store, &movie_add(ReleaseWindow::default()), &prompt).await;
        assert_eq!(prompt.calls(), 1);
        assert_eq!(store.read().await.reminders().len(), 2);
    }

    #[tokio::test]
    async fn choosing_never_skips_and_updates_strategy() {
        let store = store_with(ReminderStrategy::Ask);
        let prompt = CountingPrompt::answering(PromptChoice::Never);

        assert_eq!(handle_library_add(&store, &show_add(), &prompt).await, Outcome::Skipped);
        assert_eq!(store.read().await.settings().reminder_strategy, ReminderStrategy::Never);
        assert!(store.read().await.reminders().is_empty());
    }

    #[test]
    fn confirming_a_mismatched_scope_is_skipped() {
        let mut store = EntityStore::new();
        let outcome = resolve_prompt(
            &mut store,
            &show_add(),
            PromptChoice::Confirm {
                scope: ReminderScope::MovieDigital,
                offset_minutes: 0,
            },
        );
        assert_eq!(outcome, Outcome::Skipped);
        assert!(store.reminders().is_empty());
    }

    #[test]
    fn movie_defaults_follow_release_order() {
        let digital_only = movie_add(ReleaseWindow {
            theatrical: None,
            digital: Some(date(2024, 6, 1)),
        });
        assert_eq!(default_reminder(&digital_only).scope, ReminderScope::MovieDigital);

        let theatrical_first = movie_add(ReleaseWindow {
            theatrical: Some(date(2024, 3, 1)),
            digital: Some(date(2024, 6, 1)),
        });
        assert_eq!(default_reminder(&theatrical_first).scope, ReminderScope::MovieTheatrical);

        assert_eq!(
            default_reminder(&movie_add(ReleaseWindow::default())).scope,
            ReminderScope::MovieDigital
        );
    }

    #[test]
    fn release_window_uses_earliest_dates() {
        let releases = ReleaseWindow::from_episodes(&[
            movie_release(7, ReleaseType::Digital, date(2024, 6, 1)),
            movie_release(7, ReleaseType::Theatrical, date(2024, 3, 1)),
            movie_release(7, ReleaseType::Theatrical, date(2024, 2, 1)),
        ]);
        assert_eq!(releases.theatrical, Some(date(2024, 2, 1)));
        assert_eq!(releases.digital, Some(date(2024, 6, 1)));
    }

    #[test]
    fn expand_subtracts_offset_from_release_instant() {
        let reminder = Reminder::new(LibraryKey::tv(42), "Show", ReminderScope::All, 90);
        let ep = episode(42, 1, 1, date(2024, 3, 10));

        let fire_at = expand(&reminder, &ep, 20).unwrap();
        assert_eq!(fire_at, date(2024, 3, 10).and_hms_opt(18, 30, 0).unwrap());

        let same_day = Reminder::new(LibraryKey::tv(42), "Show", ReminderScope::All, 0);
        assert_eq!(
            expand(&same_day, &ep, 0).unwrap(),
            date(2024, 3, 10).and_hms_opt(0, 0, 0).unwrap()
        );
    }

    #[test]
    fn expand_respects_scope() {
        let ep = episode(42, 1, 3, date(2024, 3, 10));
        let other_show = episode(43, 1, 3, date(2024, 3, 10));
        let single = Reminder::new(
            LibraryKey::tv(42),
            "Show",
            ReminderScope::Episode {
                season: 1,
                episode: 3,
            },
            0,
        );

        assert!(expand(&single, &ep, 0).is_some());
        assert!(expand(&single, &episode(42, 1, 4, date(2024, 3, 17)), 0).is_none());
        assert!(expand(&single, &other_show, 0).is_none());

        let digital = Reminder::new(LibraryKey::movie(7), "Film", ReminderScope::MovieDigital, 0);
        assert!(expand(&digital, &movie_release(7, ReleaseType::Digital, date(2024, 6, 1)), 0).is_some());
        assert!(expand(&digital, &movie_release(7, ReleaseType::Theatrical, date(2024, 3, 1)), 0).is_none());
    }

    #[test]
    fn schedule_expands_standing_rules_over_future_releases() {
        let library = vec![show_add().item];
        let mut fetched = HashMap::new();
        fetched.insert(
            LibraryKey::tv(42),
            vec![
                episode(42, 1, 1, date(2024, 3, 3)),
                episode(42, 1, 2, date(2024, 3, 10)),
                episode(42, 1, 3, date(2024, 3, 17)),
            ],
        );
        let index = build_index(&library, &fetched);
        let reminders = vec![Reminder::new(LibraryKey::tv(42), "Show", ReminderScope::All, 60)];
        let now = date(2024, 3, 9).and_hms_opt(12, 0, 0).unwrap();

        let triggers = schedule(&reminders, &index, now, 0);

        let fire_times: Vec<NaiveDateTime> = triggers.iter().map(|t| t.fire_at).collect();
        assert_eq!(
            fire_times,
            vec![
                date(2024, 3, 9).and_hms_opt(23, 0, 0).unwrap(),
                date(2024, 3, 16).and_hms_opt(23, 0, 0).unwrap(),
            ]
        );
        assert_eq!(triggers[0].release.to_string(), "episode-42-1-2");
    }
}
