mod backup;
mod calendar;
mod config;
mod http;
mod models;
mod persistence;
mod reminders;
mod store;
mod sync;
mod tmdb;

use anyhow::{Context, Result};
use async_trait::async_trait;
use calendar::ViewFilter;
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand, ValueEnum};
use config::Configuration;
use http::HttpClient;
use models::{
    InteractionKey, LibraryKey, MediaKind, ReminderStrategy, ReplacementMode, SettingsPatch,
    SpoilerConfig, ViewMode,
};
use persistence::{LocalFileStore, StateStore};
use reminders::{LibraryAdd, Outcome, PromptChoice, ReleaseWindow, ReminderPrompt};
use std::io::Write;
use std::sync::Arc;
use store::SharedStore;
use sync::{SyncEngine, SyncError, SyncReport, SyncRun};
use tmdb::{Catalog, TmdbClient};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

const LOCAL_USER: &str = "local";

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: String,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Restore a backup file, refetching every tracked item
    Import { file: String },
    /// Apply a sync payload exported on another device
    Sync { payload: String },
    /// Print the current state as a backup
    Export {
        /// Print a compact sync payload instead of JSON
        #[arg(long)]
        sync_payload: bool,
    },
    /// Estimate how long syncing this many items takes
    Estimate { count: usize },
    /// Refetch every tracked item and rebuild the calendar
    Refresh,
    /// Show upcoming releases
    Calendar {
        /// First day to show (defaults to today)
        #[arg(long)]
        from: Option<NaiveDate>,
        #[arg(long, default_value_t = 14)]
        days: u32,
        #[arg(long)]
        no_tv: bool,
        #[arg(long)]
        no_movies: bool,
        #[arg(long)]
        show_hidden: bool,
    },
    /// List reminders and when they fire next
    Reminders {
        /// Delete the reminder with this id
        #[arg(long)]
        remove: Option<String>,
    },
    /// Add a show or movie to the library
    Add {
        kind: MediaKind,
        id: u64,
        /// Minutes before release for a confirmed reminder
        #[arg(long, default_value_t = 0)]
        offset: u32,
    },
    /// Remove a show or movie from the library
    Remove { key: LibraryKey },
    /// Mark a release watched, e.g. episode-42-1-3
    Watched {
        key: InteractionKey,
        #[arg(long)]
        undo: bool,
    },
    /// Search the catalog
    Search { query: String },
    /// Show popular titles
    Popular,
    /// Change settings
    Settings(SettingsArgs),
}

#[derive(clap::Args)]
struct SettingsArgs {
    #[arg(long)]
    view: Option<ViewArg>,
    #[arg(long)]
    compact: Option<bool>,
    #[arg(long)]
    hide_theatrical: Option<bool>,
    #[arg(long)]
    ignore_specials: Option<bool>,
    #[arg(long)]
    spoiler_images: Option<bool>,
    #[arg(long)]
    spoiler_title: Option<bool>,
    #[arg(long)]
    spoiler_mode: Option<SpoilerModeArg>,
    #[arg(long)]
    reminders: Option<StrategyArg>,
    /// Hide a tracked item from the calendar, e.g. tv:1399
    #[arg(long)]
    hide: Option<LibraryKey>,
    #[arg(long)]
    unhide: Option<LibraryKey>,
}

#[derive(Clone, Copy, ValueEnum)]
enum ViewArg {
    Grid,
    List,
}

#[derive(Clone, Copy, ValueEnum)]
enum SpoilerModeArg {
    Blur,
    Banner,
}

#[derive(Clone, Copy, ValueEnum)]
enum StrategyArg {
    Ask,
    Always,
    Never,
}

impl From<ViewArg> for ViewMode {
    fn from(arg: ViewArg) -> Self {
        match arg {
            ViewArg::Grid => ViewMode::Grid,
            ViewArg::List => ViewMode::List,
        }
    }
}

impl From<SpoilerModeArg> for ReplacementMode {
    fn from(arg: SpoilerModeArg) -> Self {
        match arg {
            SpoilerModeArg::Blur => ReplacementMode::Blur,
            SpoilerModeArg::Banner => ReplacementMode::Banner,
        }
    }
}

impl From<StrategyArg> for ReminderStrategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::Ask => ReminderStrategy::Ask,
            StrategyArg::Always => ReminderStrategy::Always,
            StrategyArg::Never => ReminderStrategy::Never,
        }
    }
}

/// Asks on the terminal whether to set a reminder for a newly added item.
struct StdinPrompt {
    offset_minutes: u32,
}

#[async_trait]
impl ReminderPrompt for StdinPrompt {
    async fn ask(&self, candidate: &LibraryAdd) -> PromptChoice {
        print!(
            "Set a reminder for {}? [y]es / [n]o / [a]lways / ne[v]er: ",
            candidate.item.name
        );
        let _ = std::io::stdout().flush();

        let mut line = String::new();
        if let Err(e) = BufReader::new(tokio::io::stdin()).read_line(&mut line).await {
            warn!("Could not read answer: {}", e);
            return PromptChoice::Decline;
        }

        match line.trim().to_lowercase().as_str() {
            "y" | "yes" => PromptChoice::Confirm {
                scope: reminders::default_reminder(candidate).scope,
                offset_minutes: self.offset_minutes,
            },
            "a" | "always" => PromptChoice::Always,
            "v" | "never" => PromptChoice::Never,
            _ => PromptChoice::Decline,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(&cli.log_level)
        .init();

    let config = Configuration::load_or_default(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config))?;
    let state: Arc<dyn StateStore> = Arc::new(LocalFileStore::new(config.state_path()));
    let store = persistence::load_store(state.as_ref(), LOCAL_USER)
        .await?
        .into_shared();

    match cli.command {
        Command::Import { file } => {
            let raw = tokio::fs::read_to_string(&file)
                .await
                .with_context(|| format!("Failed to read backup {}", file))?;
            let payload = backup::decode(&raw)?;
            println!(
                "Restoring {} items, this will take about {}",
                payload.unit_count(),
                sync::estimate_with(payload.unit_count(), config.batch_size(), config.batch_delay())
            );
            let key = payload.user.tmdb_key.clone();
            let catalog = build_catalog(&config, &store, key.as_deref()).await?;
            let engine = SyncEngine::from_config(Arc::clone(&store), catalog, &config)
                .with_state_store(Arc::clone(&state));
            finish_sync(engine.spawn(payload)).await?;
        }
        Command::Sync { payload } => {
            let payload = backup::decode_sync_payload(&payload)?;
            let key = payload.user.tmdb_key.clone();
            let catalog = build_catalog(&config, &store, key.as_deref()).await?;
            let engine = SyncEngine::from_config(Arc::clone(&store), catalog, &config)
                .with_state_store(Arc::clone(&state));
            finish_sync(engine.spawn(payload)).await?;
        }
        Command::Export { sync_payload } => {
            let payload = backup::encode(&*store.read().await);
            if sync_payload {
                println!("{}", backup::encode_sync_payload(&payload)?);
            } else {
                println!("{}", backup::to_json(&payload)?);
            }
        }
        Command::Estimate { count } => {
            println!(
                "{}",
                sync::estimate_with(count, config.batch_size(), config.batch_delay())
            );
        }
        Command::Refresh => {
            let catalog = build_catalog(&config, &store, None).await?;
            let engine = SyncEngine::from_config(Arc::clone(&store), catalog, &config)
                .with_state_store(Arc::clone(&state));
            let mut progress = Vec::new();
            report_sync(engine.refresh(&mut progress).await)?;
        }
        Command::Calendar {
            from,
            days,
            no_tv,
            no_movies,
            show_hidden,
        } => {
            let view = ViewFilter {
                show_tv: !no_tv,
                show_movies: !no_movies,
                reveal_hidden: show_hidden,
            };
            print_calendar(&store, from.unwrap_or_else(|| Local::now().date_naive()), days, &view).await;
        }
        Command::Reminders { remove } => {
            if let Some(id) = remove {
                let removed = store.write().await.remove_reminder(&id);
                match removed {
                    Some(reminder) => println!("Removed reminder for {}", reminder.show_name),
                    None => anyhow::bail!("No reminder with id {}", id),
                }
                persistence::save_store(state.as_ref(), &*store.read().await).await?;
            }
            print_reminders(&store, config.release_hour()).await;
        }
        Command::Add { kind, id, offset } => {
            let catalog = build_catalog(&config, &store, None).await?;
            add_to_library(&store, catalog.as_ref(), LibraryKey::new(kind, id), offset).await?;
            persistence::save_store(state.as_ref(), &*store.read().await).await?;
        }
        Command::Remove { key } => {
            let removed = {
                let mut guard = store.write().await;
                let removed = guard.remove_library_item(key);
                guard.rebuild_calendar();
                removed
            };
            if removed.is_none() {
                anyhow::bail!("{} is not in the library", key);
            }
            persistence::save_store(state.as_ref(), &*store.read().await).await?;
        }
        Command::Watched { key, undo } => {
            {
                let mut guard = store.write().await;
                if undo {
                    guard.mark_unwatched(key);
                } else {
                    guard.mark_watched(key, chrono::Utc::now());
                }
            }
            persistence::save_store(state.as_ref(), &*store.read().await).await?;
        }
        Command::Search { query } => {
            let catalog = build_catalog(&config, &store, None).await?;
            print_summaries(&catalog.search_shows(&query).await?);
        }
        Command::Popular => {
            let catalog = build_catalog(&config, &store, None).await?;
            print_summaries(&catalog.get_popular_shows().await?);
        }
        Command::Settings(args) => {
            let settings = apply_settings(&store, args).await?;
            persistence::save_store(state.as_ref(), &*store.read().await).await?;
            println!("{}", serde_json::to_string_pretty(&*settings)?);
        }
    }

    Ok(())
}

/// TMDB client using the configured key, or one carried in the user's data.
async fn build_catalog(
    config: &Configuration,
    store: &SharedStore,
    payload_key: Option<&str>,
) -> Result<Arc<dyn Catalog>> {
    let stored_key = store.read().await.user().and_then(|u| u.tmdb_key.clone());
    let http = HttpClient::new(config.unit_timeout())?;
    let client = TmdbClient::new(http, config, payload_key.or(stored_key.as_deref()))?;
    Ok(Arc::new(client))
}

async fn finish_sync(mut run: SyncRun) -> Result<()> {
    while let Some(progress) = run.progress.recv().await {
        info!("Synced {}/{}", progress.current, progress.total);
    }
    report_sync(run.handle.await?)
}

fn report_sync(result: Result<SyncReport, SyncError>) -> Result<()> {
    match result {
        Ok(report) => {
            println!(
                "Synced {} of {} items ({} skipped)",
                report.fetched,
                report.total,
                report.failed.len()
            );
            for key in &report.failed {
                println!("  skipped {}", key);
            }
            Ok(())
        }
        Err(SyncError::Persistence { report, source }) => {
            error!(
                "Synced {} of {} items but could not save state: {}",
                report.fetched, report.total, source
            );
            Err(source.into())
        }
        Err(e) => Err(e.into()),
    }
}

async fn add_to_library(
    store: &SharedStore,
    catalog: &dyn Catalog,
    key: LibraryKey,
    offset_minutes: u32,
) -> Result<()> {
    let details = catalog.fetch_show_details(key).await?;
    let window = ReleaseWindow::from_episodes(&details.episodes);
    let item = details.item.clone();

    {
        let mut guard = store.write().await;
        if !guard.upsert_library_item(details.item) {
            println!("{} is already in the library, refreshed", item.name);
        }
        guard.record_releases(key, details.episodes);
        guard.rebuild_calendar();
    }
    println!("Added {} ({})", item.name, key);

    let event = LibraryAdd::new(item).with_releases(window);
    let prompt = StdinPrompt { offset_minutes };
    if let Outcome::Created(reminder) = reminders::handle_library_add(store, &event, &prompt).await {
        println!("Reminder set ({} minutes before release)", reminder.offset_minutes);
    }
    Ok(())
}

async fn print_calendar(store: &SharedStore, from: NaiveDate, days: u32, view: &ViewFilter) {
    let guard = store.read().await;
    let settings = guard.settings();
    let index = guard.calendar();

    let agenda = calendar::agenda(&index, from, days, &settings, view);
    if agenda.is_empty() {
        println!("Nothing scheduled in the next {} days", days);
        return;
    }

    for (day, episodes) in agenda {
        println!("{}", calendar::date_key(day));
        for episode in episodes {
            let mask = calendar::spoiler_mask(&settings, guard.is_watched(&episode.interaction_key()));
            let title = if mask.hide_title {
                "(hidden)".to_string()
            } else {
                episode.name.clone()
            };
            match (episode.is_movie, episode.season_number, episode.episode_number) {
                (false, Some(season), Some(number)) => {
                    println!("  S{:02}E{:02} {}  [{}]", season, number, title, episode.library_key())
                }
                _ => println!("  {}  [{}]", title, episode.library_key()),
            }
        }
    }
}

async fn print_reminders(store: &SharedStore, release_hour: u32) {
    let guard = store.read().await;
    for reminder in guard.reminders() {
        println!(
            "{}  {} {:?} ({} min before)",
            reminder.id, reminder.show_name, reminder.scope, reminder.offset_minutes
        );
    }

    let upcoming = reminders::schedule(
        guard.reminders(),
        &guard.calendar(),
        Local::now().naive_local(),
        release_hour,
    );
    if !upcoming.is_empty() {
        println!();
        for trigger in upcoming {
            println!(
                "{}  {}: {} ({})",
                trigger.fire_at.format("%Y-%m-%d %H:%M"),
                trigger.show_name,
                trigger.release_name,
                trigger.release
            );
        }
    }
}

fn print_summaries(summaries: &[models::ShowSummary]) {
    for summary in summaries {
        let year = summary
            .first_air_date
            .map(|d| d.format("%Y").to_string())
            .unwrap_or_default();
        println!("{:<14} {} {}", summary.key.to_string(), summary.name, year);
    }
}

async fn apply_settings(store: &SharedStore, args: SettingsArgs) -> Result<Arc<models::Settings>> {
    let mut guard = store.write().await;

    if let Some(key) = args.hide {
        let item = guard
            .tracked_items()
            .into_iter()
            .find(|item| item.key() == key)
            .with_context(|| format!("{} is not tracked", key))?;
        guard.hide_item(item);
    }
    if let Some(key) = args.unhide {
        guard.unhide_item(key);
    }

    let current = guard.settings();
    let spoiler_config = (args.spoiler_images.is_some()
        || args.spoiler_title.is_some()
        || args.spoiler_mode.is_some())
    .then(|| SpoilerConfig {
        images: args.spoiler_images.unwrap_or(current.spoiler_config.images),
        title: args.spoiler_title.unwrap_or(current.spoiler_config.title),
        replacement_mode: args
            .spoiler_mode
            .map(Into::into)
            .unwrap_or(current.spoiler_config.replacement_mode),
    });

    let patch = SettingsPatch {
        view_mode: args.view.map(Into::into),
        compact_calendar: args.compact,
        hide_theatrical: args.hide_theatrical,
        ignore_specials: args.ignore_specials,
        hidden_items: None,
        spoiler_config,
        reminder_strategy: args.reminders.map(Into::into),
    };
    if patch.is_empty() {
        return Ok(guard.settings());
    }
    Ok(guard.update_settings(patch))
}
