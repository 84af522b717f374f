//! Date-keyed projection of fetched releases.
//!
//! The index is rebuilt from scratch from the per-show fetch results and
//! never patched. Every view filter is applied at read time in [`project`],
//! so toggling a setting never requires a refetch.

use crate::models::{Episode, LibraryItem, LibraryKey, ReleaseType, ReplacementMode, Settings};
use chrono::{Days, NaiveDate};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

pub const DATE_KEY_FORMAT: &str = "%Y-%m-%d";

pub fn date_key(date: NaiveDate) -> String {
    date.format(DATE_KEY_FORMAT).to_string()
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CalendarIndex {
    days: BTreeMap<NaiveDate, Vec<Episode>>,
}

impl CalendarIndex {
    /// Entries stored for `day`, in fetch order. Unknown days are empty.
    pub fn day(&self, day: NaiveDate) -> &[Episode] {
        self.days.get(&day).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Look up a day by its `YYYY-MM-DD` key. Unparseable keys are empty days.
    pub fn day_by_key(&self, key: &str) -> &[Episode] {
        NaiveDate::parse_from_str(key, DATE_KEY_FORMAT)
            .map(|day| self.day(day))
            .unwrap_or(&[])
    }

    pub fn days(&self) -> impl Iterator<Item = (NaiveDate, &[Episode])> {
        self.days.iter().map(|(day, episodes)| (*day, episodes.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.days.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.days.is_empty()
    }
}

/// Group fetched releases by air date.
///
/// Shows are walked in `library` order and each show's releases keep their
/// fetched order, so a day's entries are a concatenation across shows. Fetch
/// results for keys outside `library` are ignored. No deduplication happens here.
pub fn build_index(
    library: &[LibraryItem],
    episodes_by_show: &HashMap<LibraryKey, Vec<Episode>>,
) -> CalendarIndex {
    let mut days: BTreeMap<NaiveDate, Vec<Episode>> = BTreeMap::new();

    for item in library {
        let Some(episodes) = episodes_by_show.get(&item.key()) else {
            continue;
        };
        for episode in episodes {
            days.entry(episode.air_date).or_default().push(episode.clone());
        }
    }

    let index = CalendarIndex { days };
    debug!(
        "Built calendar index: {} releases over {} days",
        index.len(),
        index.days.len()
    );
    index
}

/// Ad-hoc toggles of the current view, independent of persisted settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewFilter {
    pub show_tv: bool,
    pub show_movies: bool,
    /// Show items the user has hidden.
    pub reveal_hidden: bool,
}

impl Default for ViewFilter {
    fn default() -> Self {
        Self {
            show_tv: true,
            show_movies: true,
            reveal_hidden: false,
        }
    }
}

fn is_visible(episode: &Episode, settings: &Settings, view: &ViewFilter) -> bool {
    if settings.hide_theatrical
        && episode.is_movie
        && episode.release_type == Some(ReleaseType::Theatrical)
    {
        return false;
    }
    if settings.ignore_specials && episode.is_special() {
        return false;
    }
    if (episode.is_movie && !view.show_movies) || (!episode.is_movie && !view.show_tv) {
        return false;
    }
    if !view.reveal_hidden && settings.is_hidden(episode.library_key()) {
        return false;
    }
    true
}

/// Visible entries for `day`, as a subsequence of the stored entries.
pub fn project(
    index: &CalendarIndex,
    day: NaiveDate,
    settings: &Settings,
    view: &ViewFilter,
) -> Vec<Episode> {
    index
        .day(day)
        .iter()
        .filter(|episode| is_visible(episode, settings, view))
        .cloned()
        .collect()
}

/// Visible entries for `days` consecutive days from `from`, skipping empty days.
pub fn agenda(
    index: &CalendarIndex,
    from: NaiveDate,
    days: u32,
    settings: &Settings,
    view: &ViewFilter,
) -> Vec<(NaiveDate, Vec<Episode>)> {
    if days == 0 {
        return Vec::new();
    }
    let last = from
        .checked_add_days(Days::new(u64::from(days) - 1))
        .unwrap_or(NaiveDate::MAX);

    index
        .days
        .range(from..=last)
        .filter_map(|(day, _)| {
            let entries = project(index, *day, settings, view);
            (!entries.is_empty()).then_some((*day, entries))
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpoilerMask {
    pub hide_image: bool,
    pub hide_title: bool,
    pub mode: ReplacementMode,
}

/// How much of an entry to conceal. Watched entries are never masked.
pub fn spoiler_mask(settings: &Settings, watched: bool) -> SpoilerMask {
    let spoilers = &settings.spoiler_config;
    SpoilerMask {
        hide_image: !watched && spoilers.images,
        hide_title: !watched && spoilers.title,
        mode: spoilers.replacement_mode,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MediaKind, SpoilerConfig};

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    fn show(id: u64) -> LibraryItem {
        LibraryItem {
            id,
            media_type: MediaKind::Tv,
            name: format!("Show {}", id),
            poster_path: None,
            first_air_date: None,
        }
    }

    fn movie(id: u64) -> LibraryItem {
        LibraryItem {
            media_type: MediaKind::Movie,
            name: format!("Movie {}", id),
            ..show(id)
        }
    }

    fn episode(show_id: u64, season: u32, number: u32, date: NaiveDate) -> Episode {
        Episode {
            show_id,
            id: show_id * 1000 + season as u64 * 100 + number as u64,
            season_number: Some(season),
            episode_number: Some(number),
            name: format!("S{}E{}", season, number),
            overview: String::new(),
            still_path: None,
            poster_path: None,
            air_date: date,
            is_movie: false,
            release_type: None,
        }
    }

    fn release(movie_id: u64, kind: ReleaseType, date: NaiveDate) -> Episode {
        Episode {
            show_id: movie_id,
            id: movie_id,
            season_number: None,
            episode_number: None,
            name: format!("Movie {}", movie_id),
            overview: String::new(),
            still_path: None,
            poster_path: None,
            air_date: date,
            is_movie: true,
            release_type: Some(kind),
        }
    }

    fn sample() -> (Vec<LibraryItem>, HashMap<LibraryKey, Vec<Episode>>) {
        let library = vec![show(1), movie(2), show(3)];
        let mut fetched = HashMap::new();
        fetched.insert(
            LibraryKey::tv(1),
            vec![episode(1, 1, 2, day(5)), episode(1, 0, 1, day(5)), episode(1, 1, 3, day(12))],
        );
        fetched.insert(
            LibraryKey::movie(2),
            vec![
                release(2, ReleaseType::Theatrical, day(5)),
                release(2, ReleaseType::Digital, day(20)),
            ],
        );
        fetched.insert(LibraryKey::tv(3), vec![episode(3, 2, 1, day(5))]);
        (library, fetched)
    }

    fn ids(episodes: &[Episode]) -> Vec<u64> {
        episodes.iter().map(|e| e.id).collect()
    }

    #[test]
    fn build_index_concatenates_in_library_order() {
        let (library, fetched) = sample();
        let index = build_index(&library, &fetched);

        assert_eq!(ids(index.day(day(5))), vec![1102, 1001, 2, 3201]);
        assert_eq!(ids(index.day(day(12))), vec![1103]);
        assert_eq!(index.len(), 6);
        assert_eq!(ids(index.day_by_key("2024-03-20")), vec![2]);
    }

    #[test]
    fn build_index_ignores_untracked_fetch_results() {
        let (library, mut fetched) = sample();
        fetched.insert(LibraryKey::tv(99), vec![episode(99, 1, 1, day(5))]);
        // Same numeric id as a tracked show, but a movie.
        fetched.insert(LibraryKey::movie(1), vec![release(1, ReleaseType::Digital, day(5))]);

        let index = build_index(&library, &fetched);
        assert_eq!(ids(index.day(day(5))), vec![1102, 1001, 2, 3201]);
    }

    #[test]
    fn missing_days_are_empty() {
        let index = CalendarIndex::default();
        assert!(index.day(day(1)).is_empty());
        assert!(index.day_by_key("not-a-date").is_empty());
        assert!(project(&index, day(1), &Settings::default(), &ViewFilter::default()).is_empty());
    }

    #[test]
    fn project_applies_settings_filters() {
        let (library, fetched) = sample();
        let index = build_index(&library, &fetched);

        let settings = Settings {
            hide_theatrical: true,
            ignore_specials: true,
            ..Default::default()
        };
        let visible = project(&index, day(5), &settings, &ViewFilter::default());
        assert_eq!(ids(&visible), vec![1102, 3201]);
    }

    #[test]
    fn project_applies_view_toggles_and_hidden_items() {
        let (library, fetched) = sample();
        let index = build_index(&library, &fetched);
        let settings = Settings {
            hidden_items: vec![show(3)],
            ..Default::default()
        };

        let movies_only = ViewFilter {
            show_tv: false,
            ..Default::default()
        };
        assert_eq!(ids(&project(&index, day(5), &settings, &movies_only)), vec![2]);

        assert_eq!(
            ids(&project(&index, day(5), &settings, &ViewFilter::default())),
            vec![1102, 1001, 2]
        );

        let reveal = ViewFilter {
            reveal_hidden: true,
            ..Default::default()
        };
        assert_eq!(
            ids(&project(&index, day(5), &settings, &reveal)),
            vec![1102, 1001, 2, 3201]
        );
    }

    #[test]
    fn project_is_an_ordered_subsequence_for_every_setting_combination() {
        let (library, fetched) = sample();
        let index = build_index(&library, &fetched);
        let stored = ids(index.day(day(5)));

        for bits in 0u32..64 {
            let flag = |n: u32| bits & (1 << n) != 0;
            let settings = Settings {
                hide_theatrical: flag(0),
                ignore_specials: flag(1),
                hidden_items: if flag(2) { vec![show(1)] } else { vec![] },
                ..Default::default()
            };
            let view = ViewFilter {
                show_tv: flag(3),
                show_movies: flag(4),
                reveal_hidden: flag(5),
            };

            let projected = ids(&project(&index, day(5), &settings, &view));
            let mut remaining = stored.iter();
            for id in &projected {
                assert!(
                    remaining.any(|stored_id| stored_id == id),
                    "projection {:?} is not a subsequence of {:?}",
                    projected,
                    stored
                );
            }
        }
    }

    #[test]
    fn agenda_skips_empty_days() {
        let (library, fetched) = sample();
        let index = build_index(&library, &fetched);

        let agenda = agenda(&index, day(4), 10, &Settings::default(), &ViewFilter::default());
        let dates: Vec<NaiveDate> = agenda.iter().map(|(d, _)| *d).collect();
        assert_eq!(dates, vec![day(5), day(12)]);

        let through_day_five = super::agenda(&index, day(4), 2, &Settings::default(), &ViewFilter::default());
        assert_eq!(through_day_five.len(), 1);
        assert!(super::agenda(&index, day(4), 0, &Settings::default(), &ViewFilter::default()).is_empty());
    }

    #[test]
    fn agenda_stops_at_the_end_of_the_calendar() {
        let (library, fetched) = sample();
        let index = build_index(&library, &fetched);

        let all = agenda(&index, day(4), u32::MAX, &Settings::default(), &ViewFilter::default());
        let dates: Vec<NaiveDate> = all.iter().map(|(d, _)| *d).collect();
        assert_eq!(dates, vec![day(5), day(12), day(20)]);

        let near_max = NaiveDate::MAX - chrono::Duration::days(2);
        assert!(agenda(&index, near_max, u32::MAX, &Settings::default(), &ViewFilter::default()).is_empty());
    }

    #[test]
    fn spoilers_are_only_masked_until_watched() {
        let settings = Settings {
            spoiler_config: SpoilerConfig {
                images: true,
                title: false,
                replacement_mode: ReplacementMode::Banner,
            },
            ..Default::default()
        };

        let unwatched = spoiler_mask(&settings, false);
        assert!(unwatched.hide_image);
        assert!(!unwatched.hide_title);
        assert_eq!(unwatched.mode, ReplacementMode::Banner);

        let watched = spoiler_mask(&settings, true);
        assert!(!watched.hide_image && !watched.hide_title);
    }

    #[test]
    fn date_keys_are_iso_dates() {
        assert_eq!(date_key(day(5)), "2024-03-05");
    }
}
