mod reminder;
mod settings;

pub use reminder::{Reminder, ReminderScope, ReminderStrategy};
pub use settings::{ReplacementMode, Settings, SettingsPatch, SpoilerConfig, ViewMode};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Tv,
    Movie,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Tv => f.write_str("tv"),
            MediaKind::Movie => f.write_str("movie"),
        }
    }
}

impl FromStr for MediaKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tv" => Ok(MediaKind::Tv),
            "movie" => Ok(MediaKind::Movie),
            other => Err(format!("unknown media type '{}'", other)),
        }
    }
}

/// Identity of a tracked show or movie. Catalog ids are only unique per
/// media kind, so `tv:123` and `movie:123` are different keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LibraryKey {
    pub kind: MediaKind,
    pub id: u64,
}

impl LibraryKey {
    pub fn new(kind: MediaKind, id: u64) -> Self {
        Self { kind, id }
    }

    pub fn tv(id: u64) -> Self {
        Self::new(MediaKind::Tv, id)
    }

    pub fn movie(id: u64) -> Self {
        Self::new(MediaKind::Movie, id)
    }
}

impl fmt::Display for LibraryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

impl FromStr for LibraryKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, id) = s
            .split_once(':')
            .ok_or_else(|| format!("library key '{}' is missing a media type", s))?;
        let id = id
            .parse()
            .map_err(|_| format!("library key '{}' has a non-numeric id", s))?;
        Ok(Self::new(kind.parse()?, id))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", try_from = "RawLibraryItem")]
pub struct LibraryItem {
    pub id: u64,
    pub media_type: MediaKind,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poster_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_air_date: Option<NaiveDate>,
}

impl LibraryItem {
    pub fn key(&self) -> LibraryKey {
        LibraryKey::new(self.media_type, self.id)
    }
}

/// Items as found in backups and older exports: `mediaType` may be missing
/// and fields may be snake_case.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawLibraryItem {
    id: u64,
    #[serde(default, alias = "media_type")]
    media_type: Option<MediaKind>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default, alias = "poster_path")]
    poster_path: Option<String>,
    #[serde(default, alias = "first_air_date", alias = "releaseDate", alias = "release_date")]
    first_air_date: Option<String>,
}

impl TryFrom<RawLibraryItem> for LibraryItem {
    type Error = String;

    fn try_from(raw: RawLibraryItem) -> Result<Self, Self::Error> {
        let media_type = raw.media_type.unwrap_or(match (&raw.name, &raw.title) {
            (None, Some(_)) => MediaKind::Movie,
            _ => MediaKind::Tv,
        });
        let name = raw
            .name
            .or(raw.title)
            .ok_or_else(|| format!("item {} has neither a name nor a title", raw.id))?;
        let first_air_date = raw
            .first_air_date
            .filter(|date| !date.is_empty())
            .map(|date| {
                NaiveDate::parse_from_str(date.get(..10).unwrap_or(date.as_str()), "%Y-%m-%d")
                    .map_err(|_| format!("item {} has an invalid date '{}'", raw.id, date))
            })
            .transpose()?;

        Ok(LibraryItem {
            id: raw.id,
            media_type,
            name,
            poster_path: raw.poster_path,
            first_air_date,
        })
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ReleaseType {
    Theatrical,
    Digital,
}

/// A single dated release: an episode of a show, or one release window of a
/// movie. Only ever produced by a catalog fetch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Episode {
    pub show_id: u64,
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub season_number: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub episode_number: Option<u32>,
    pub name: String,
    #[serde(default)]
    pub overview: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub still_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poster_path: Option<String>,
    pub air_date: NaiveDate,
    #[serde(default)]
    pub is_movie: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_type: Option<ReleaseType>,
}

impl Episode {
    pub fn library_key(&self) -> LibraryKey {
        if self.is_movie {
            LibraryKey::movie(self.show_id)
        } else {
            LibraryKey::tv(self.show_id)
        }
    }

    pub fn is_special(&self) -> bool {
        !self.is_movie && self.season_number == Some(0)
    }

    pub fn interaction_key(&self) -> InteractionKey {
        if self.is_movie {
            InteractionKey::Movie {
                movie_id: self.show_id,
            }
        } else {
            InteractionKey::Episode {
                show_id: self.show_id,
                season: self.season_number.unwrap_or(0),
                episode: self.episode_number.unwrap_or(0),
            }
        }
    }
}

/// Join key between catalog data and per-user watched state.
///
/// On the wire this is the composite string `episode-{show}-{season}-{episode}`
/// or `movie-{id}-movie-movie`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum InteractionKey {
    Episode { show_id: u64, season: u32, episode: u32 },
    Movie { movie_id: u64 },
}

const MOVIE_PLACEHOLDER: &str = "movie";

impl fmt::Display for InteractionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InteractionKey::Episode {
                show_id,
                season,
                episode,
            } => write!(f, "episode-{}-{}-{}", show_id, season, episode),
            InteractionKey::Movie { movie_id } => write!(
                f,
                "movie-{}-{}-{}",
                movie_id, MOVIE_PLACEHOLDER, MOVIE_PLACEHOLDER
            ),
        }
    }
}

impl FromStr for InteractionKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('-').collect();
        fn number<T: FromStr>(key: &str, part: &str) -> Result<T, String> {
            part.parse()
                .map_err(|_| format!("interaction key '{}' has an invalid part '{}'", key, part))
        }

        match parts.as_slice() {
            ["episode", show, season, episode] => Ok(InteractionKey::Episode {
                show_id: number(s, show)?,
                season: number(s, season)?,
                episode: number(s, episode)?,
            }),
            ["movie", id] | ["movie", id, MOVIE_PLACEHOLDER, MOVIE_PLACEHOLDER] => {
                Ok(InteractionKey::Movie {
                    movie_id: number(s, id)?,
                })
            }
            _ => Err(format!("unrecognized interaction key '{}'", s)),
        }
    }
}

impl Serialize for InteractionKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for InteractionKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Interaction {
    #[serde(alias = "is_watched")]
    pub is_watched: bool,
    #[serde(default, alias = "watched_at", skip_serializing_if = "Option::is_none")]
    pub watched_at: Option<DateTime<Utc>>,
}

impl Interaction {
    pub fn watched(at: DateTime<Utc>) -> Self {
        Self {
            is_watched: true,
            watched_at: Some(at),
        }
    }

    pub fn unwatched() -> Self {
        Self {
            is_watched: false,
            watched_at: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct UserProfile {
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tmdb_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct SubscribedList {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub items: Vec<LibraryItem>,
}

/// Search/popular listing entry returned by the catalog.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ShowSummary {
    pub key: LibraryKey,
    pub name: String,
    pub poster_path: Option<String>,
    pub first_air_date: Option<NaiveDate>,
    pub overview: String,
}

impl ShowSummary {
    pub fn to_library_item(&self) -> LibraryItem {
        LibraryItem {
            id: self.key.id,
            media_type: self.key.kind,
            name: self.name.clone(),
            poster_path: self.poster_path.clone(),
            first_air_date: self.first_air_date,
        }
    }
}

impl Serialize for LibraryKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for LibraryKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Everything the calendar needs about one tracked item.
#[derive(Debug, Clone, PartialEq)]
pub struct ShowDetails {
    pub item: LibraryItem,
    pub episodes: Vec<Episode>,
}
