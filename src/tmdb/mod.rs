use crate::config::Configuration;
use crate::http::{HttpClient, HttpError};
use crate::models::{
    Episode, LibraryItem, LibraryKey, MediaKind, ReleaseType, ShowDetails, ShowSummary,
};
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::StatusCode;
use serde::Deserialize;
use std::collections::{BTreeSet, HashSet};
use tracing::{debug, info, instrument, warn};

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("{0} was not found in the catalog")]
    NotFound(LibraryKey),

    #[error("Catalog request timed out")]
    Timeout,

    #[error("No TMDB API key configured")]
    MissingApiKey,

    #[error(transparent)]
    Http(HttpError),
}

impl From<HttpError> for CatalogError {
    fn from(e: HttpError) -> Self {
        match e {
            HttpError::Timeout => CatalogError::Timeout,
            other => CatalogError::Http(other),
        }
    }
}

/// Read access to the content catalog.
#[async_trait]
pub trait Catalog: Send + Sync {
    async fn fetch_show_details(&self, key: LibraryKey) -> Result<ShowDetails, CatalogError>;

    async fn search_shows(&self, query: &str) -> Result<Vec<ShowSummary>, CatalogError>;

    async fn get_popular_shows(&self) -> Result<Vec<ShowSummary>, CatalogError>;
}

#[derive(Debug, Deserialize)]
struct TvDetails {
    id: u64,
    name: String,
    poster_path: Option<String>,
    first_air_date: Option<String>,
    #[serde(default)]
    seasons: Vec<SeasonSummary>,
    last_episode_to_air: Option<EpisodeRef>,
    next_episode_to_air: Option<EpisodeRef>,
}

#[derive(Debug, Deserialize)]
struct SeasonSummary {
    season_number: u32,
}

#[derive(Debug, Deserialize)]
struct EpisodeRef {
    season_number: u32,
}

#[derive(Debug, Deserialize)]
struct SeasonDetails {
    poster_path: Option<String>,
    #[serde(default)]
    episodes: Vec<TmdbEpisode>,
}

#[derive(Debug, Deserialize)]
struct TmdbEpisode {
    id: u64,
    name: String,
    #[serde(default)]
    overview: String,
    still_path: Option<String>,
    air_date: Option<String>,
    season_number: u32,
    episode_number: u32,
}

#[derive(Debug, Deserialize)]
struct MovieDetails {
    id: u64,
    title: String,
    #[serde(default)]
    overview: String,
    poster_path: Option<String>,
    backdrop_path: Option<String>,
    release_date: Option<String>,
    release_dates: Option<ReleaseDates>,
}

#[derive(Debug, Deserialize)]
struct ReleaseDates {
    #[serde(default)]
    results: Vec<CountryReleases>,
}

#[derive(Debug, Deserialize)]
struct CountryReleases {
    iso_3166_1: String,
    #[serde(default)]
    release_dates: Vec<ReleaseDateEntry>,
}

#[derive(Debug, Deserialize)]
struct ReleaseDateEntry {
    #[serde(rename = "type")]
    release_type: u8,
    release_date: String,
}

#[derive(Debug, Deserialize)]
struct Page {
    #[serde(default)]
    results: Vec<SearchResult>,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    id: u64,
    media_type: Option<String>,
    name: Option<String>,
    title: Option<String>,
    poster_path: Option<String>,
    first_air_date: Option<String>,
    release_date: Option<String>,
    #[serde(default)]
    overview: String,
}

/// TMDB dates are `YYYY-MM-DD`, an ISO timestamp, or an empty string.
fn parse_date(raw: Option<&str>) -> Option<NaiveDate> {
    let raw = raw?;
    NaiveDate::parse_from_str(raw.get(..10)?, "%Y-%m-%d").ok()
}

/// Season numbers worth fetching for the calendar: the latest season and
/// whatever seasons the last and next episodes belong to.
fn seasons_to_fetch(details: &TvDetails) -> BTreeSet<u32> {
    let mut seasons = BTreeSet::new();
    if let Some(latest) = details
        .seasons
        .iter()
        .map(|s| s.season_number)
        .filter(|n| *n > 0)
        .max()
    {
        seasons.insert(latest);
    }
    for episode in [&details.last_episode_to_air, &details.next_episode_to_air]
        .into_iter()
        .flatten()
    {
        seasons.insert(episode.season_number);
    }
    seasons
}

fn episodes_from_season(show_id: u64, show_poster: Option<&str>, season: SeasonDetails) -> Vec<Episode> {
    let poster = season.poster_path.or_else(|| show_poster.map(str::to_string));
    season
        .episodes
        .into_iter()
        .filter_map(|ep| {
            let air_date = parse_date(ep.air_date.as_deref())?;
            Some(Episode {
                show_id,
                id: ep.id,
                season_number: Some(ep.season_number),
                episode_number: Some(ep.episode_number),
                name: ep.name,
                overview: ep.overview,
                still_path: ep.still_path,
                poster_path: poster.clone(),
                air_date,
                is_movie: false,
                release_type: None,
            })
        })
        .collect()
}

/// One release entry per known theatrical and digital date in `region`.
/// Without regional data, the primary release date counts as theatrical.
fn movie_releases(movie: &MovieDetails, region: &str) -> Vec<Episode> {
    let regional = movie
        .release_dates
        .as_ref()
        .and_then(|dates| dates.results.iter().find(|r| r.iso_3166_1 == region));

    let earliest = |types: &[u8]| {
        regional.and_then(|r| {
            r.release_dates
                .iter()
                .filter(|d| types.contains(&d.release_type))
                .filter_map(|d| parse_date(Some(&d.release_date)))
                .min()
        })
    };

    let mut theatrical = earliest(&[2, 3][..]);
    let digital = earliest(&[4][..]);
    if theatrical.is_none() && digital.is_none() {
        theatrical = parse_date(movie.release_date.as_deref());
    }

    [(ReleaseType::Theatrical, theatrical), (ReleaseType::Digital, digital)]
        .into_iter()
        .filter_map(|(kind, date)| {
            Some(Episode {
                show_id: movie.id,
                id: movie.id,
                season_number: None,
                episode_number: None,
                name: movie.title.clone(),
                overview: movie.overview.clone(),
                still_path: movie.backdrop_path.clone(),
                poster_path: movie.poster_path.clone(),
                air_date: date?,
                is_movie: true,
                release_type: Some(kind),
            })
        })
        .collect()
}

fn summary_from(result: SearchResult, default_kind: MediaKind) -> Option<ShowSummary> {
    let kind = match result.media_type.as_deref() {
        None => default_kind,
        Some(raw) => raw.parse().ok()?,
    };
    let (name, date) = match kind {
        MediaKind::Tv => (result.name, result.first_air_date),
        MediaKind::Movie => (result.title, result.release_date),
    };
    Some(ShowSummary {
        key: LibraryKey::new(kind, result.id),
        name: name?,
        poster_path: result.poster_path,
        first_air_date: parse_date(date.as_deref()),
        overview: result.overview,
    })
}

/// Query parameters for a multi search. reqwest encodes them.
fn search_params(query: &str) -> [(&'static str, &str); 2] {
    [("query", query), ("include_adult", "false")]
}

pub struct TmdbClient {
    http: HttpClient,
    api_key: String,
    base_url: String,
    language: String,
    region: String,
}

impl TmdbClient {
    pub fn new(http: HttpClient, config: &Configuration, fallback_key: Option<&str>) -> Result<Self, CatalogError> {
        let api_key = config
            .tmdb_api_key()
            .or(fallback_key)
            .ok_or(CatalogError::MissingApiKey)?
            .to_string();

        Ok(Self {
            http,
            api_key,
            base_url: config.tmdb_base_url(),
            language: config.tmdb_language(),
            region: config.tmdb_region(),
        })
    }

    async fn get<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        extra: &[(&str, &str)],
    ) -> Result<T, HttpError> {
        let url = format!("{}{}", self.base_url, path);
        let mut query = vec![("api_key", self.api_key.as_str()), ("language", self.language.as_str())];
        query.extend_from_slice(extra);
        self.http.get_json(&url, &query).await
    }

    fn not_found(key: LibraryKey) -> impl FnOnce(HttpError) -> CatalogError {
        move |e| match e {
            HttpError::Status(StatusCode::NOT_FOUND) => CatalogError::NotFound(key),
            other => other.into(),
        }
    }

    #[instrument(skip(self))]
    async fn fetch_tv(&self, id: u64) -> Result<ShowDetails, CatalogError> {
        let key = LibraryKey::tv(id);
        let details: TvDetails = self
            .get(&format!("/tv/{}", id), &[])
            .await
            .map_err(Self::not_found(key))?;

        let mut episodes = Vec::new();
        let mut seen = HashSet::new();
        for season_number in seasons_to_fetch(&details) {
            let season: SeasonDetails = match self
                .get(&format!("/tv/{}/season/{}", id, season_number), &[])
                .await
            {
                Ok(season) => season,
                Err(e) => {
                    warn!("Failed to fetch season {} of {}: {}", season_number, details.name, e);
                    continue;
                }
            };
            episodes.extend(
                episodes_from_season(id, details.poster_path.as_deref(), season)
                    .into_iter()
                    .filter(|ep| seen.insert(ep.id)),
            );
        }

        debug!("Fetched {} dated episodes for {}", episodes.len(), details.name);
        Ok(ShowDetails {
            item: LibraryItem {
                id: details.id,
                media_type: MediaKind::Tv,
                name: details.name,
                poster_path: details.poster_path,
                first_air_date: parse_date(details.first_air_date.as_deref()),
            },
            episodes,
        })
    }

    #[instrument(skip(self))]
    async fn fetch_movie(&self, id: u64) -> Result<ShowDetails, CatalogError> {
        let key = LibraryKey::movie(id);
        let movie: MovieDetails = self
            .get(&format!("/movie/{}", id), &[("append_to_response", "release_dates")])
            .await
            .map_err(Self::not_found(key))?;

        let episodes = movie_releases(&movie, &self.region);
        debug!("Fetched {} release dates for {}", episodes.len(), movie.title);
        Ok(ShowDetails {
            item: LibraryItem {
                id: movie.id,
                media_type: MediaKind::Movie,
                name: movie.title.clone(),
                poster_path: movie.poster_path.clone(),
                first_air_date: parse_date(movie.release_date.as_deref()),
            },
            episodes,
        })
    }
}

#[async_trait]
impl Catalog for TmdbClient {
    async fn fetch_show_details(&self, key: LibraryKey) -> Result<ShowDetails, CatalogError> {
        match key.kind {
            MediaKind::Tv => self.fetch_tv(key.id).await,
            MediaKind::Movie => self.fetch_movie(key.id).await,
        }
    }

    #[instrument(skip(self))]
    async fn search_shows(&self, query: &str) -> Result<Vec<ShowSummary>, CatalogError> {
        info!("Searching catalog: {}", query);
        let page: Page = self.get("/search/multi", &search_params(query)).await?;

        let results: Vec<ShowSummary> = page
            .results
            .into_iter()
            .filter_map(|r| summary_from(r, MediaKind::Tv))
            .collect();
        info!("Found {} results for '{}'", results.len(), query);
        Ok(results)
    }

    #[instrument(skip(self))]
    async fn get_popular_shows(&self) -> Result<Vec<ShowSummary>, CatalogError> {
        let page: Page = self.get("/tv/popular", &[]).await?;
        Ok(page
            .results
            .into_iter()
            .filter_map(|r| summary_from(r, MediaKind::Tv))
            .collect())
    }
}
