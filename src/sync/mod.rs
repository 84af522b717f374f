//! Batched restoration of a backup or device sync payload.
//!
//! Units (tracked shows and movies) are fetched from the catalog in fixed-size
//! batches. Fetches within a batch run concurrently, results are merged into
//! the store only once the whole batch has resolved, and a rate limiter gates
//! the start of every following batch. One progress event is emitted per batch.

use crate::backup::{self, BackupPayload, ValidationError};
use crate::config::{Configuration, DEFAULT_BATCH_DELAY_MS, DEFAULT_BATCH_SIZE};
use crate::models::{LibraryItem, LibraryKey, SettingsPatch, ShowDetails};
use crate::persistence::{self, PersistenceError, StateStore};
use crate::store::SharedStore;
use crate::tmdb::{Catalog, CatalogError};
use async_trait::async_trait;
use futures::future::join_all;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncProgress {
    pub current: usize,
    pub total: usize,
}

/// Receives one progress event per completed batch.
pub trait ProgressSink: Send {
    fn emit(&mut self, progress: SyncProgress);
}

impl ProgressSink for Vec<SyncProgress> {
    fn emit(&mut self, progress: SyncProgress) {
        self.push(progress);
    }
}

impl ProgressSink for mpsc::UnboundedSender<SyncProgress> {
    fn emit(&mut self, progress: SyncProgress) {
        // A dropped receiver only means nobody is watching.
        let _ = self.send(progress);
    }
}

/// Gates the start of each batch after the first.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    async fn wait(&self);
}

pub struct FixedDelay(pub Duration);

#[async_trait]
impl RateLimiter for FixedDelay {
    async fn wait(&self) {
        if !self.0.is_zero() {
            tokio::time::sleep(self.0).await;
        }
    }
}

/// Rough wall-clock cost of syncing `count` units, for an upfront notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Estimate {
    Seconds(u64),
    Minutes(u64),
}

impl fmt::Display for Estimate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Estimate::Seconds(n) => write!(f, "{} seconds", n),
            Estimate::Minutes(n) => write!(f, "{} minutes", n),
        }
    }
}

pub fn estimate(count: usize) -> Estimate {
    estimate_with(count, DEFAULT_BATCH_SIZE, Duration::from_millis(DEFAULT_BATCH_DELAY_MS))
}

pub fn estimate_with(count: usize, batch_size: usize, delay: Duration) -> Estimate {
    let batches = count.div_ceil(batch_size.max(1)) as u128;
    let millis = batches * delay.as_millis();
    if millis >= 60_000 {
        Estimate::Minutes(millis.div_ceil(60_000) as u64)
    } else {
        Estimate::Seconds(millis.div_ceil(1_000) as u64)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncReport {
    pub total: usize,
    pub fetched: usize,
    pub failed: Vec<LibraryKey>,
    pub interactions_merged: usize,
    pub reminders_merged: usize,
    pub settings_replaced: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Invalid sync payload: {0}")]
    Validation(#[from] ValidationError),

    #[error("A sync is already running")]
    AlreadyRunning,

    #[error("Sync finished but saving state failed: {source}")]
    Persistence {
        report: SyncReport,
        #[source]
        source: PersistenceError,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Watchlist,
    List,
}

#[derive(Debug, Clone)]
struct Unit {
    item: LibraryItem,
    origin: Origin,
}

/// A run started with [`SyncEngine::spawn`].
pub struct SyncRun {
    pub progress: mpsc::UnboundedReceiver<SyncProgress>,
    pub handle: JoinHandle<Result<SyncReport, SyncError>>,
}

#[derive(Clone)]
pub struct SyncEngine {
    store: SharedStore,
    catalog: Arc<dyn Catalog>,
    limiter: Arc<dyn RateLimiter>,
    state: Option<Arc<dyn StateStore>>,
    batch_size: usize,
    unit_timeout: Duration,
    running: Arc<Mutex<()>>,
}

impl SyncEngine {
    pub fn new(store: SharedStore, catalog: Arc<dyn Catalog>) -> Self {
        Self {
            store,
            catalog,
            limiter: Arc::new(FixedDelay(Duration::from_millis(DEFAULT_BATCH_DELAY_MS))),
            state: None,
            batch_size: DEFAULT_BATCH_SIZE,
            unit_timeout: Duration::from_secs(20),
            running: Arc::new(Mutex::new(())),
        }
    }

    pub fn from_config(store: SharedStore, catalog: Arc<dyn Catalog>, config: &Configuration) -> Self {
        Self::new(store, catalog)
            .with_rate_limiter(Arc::new(FixedDelay(config.batch_delay())))
            .with_batch_size(config.batch_size())
            .with_unit_timeout(config.unit_timeout())
    }

    pub fn with_rate_limiter(mut self, limiter: Arc<dyn RateLimiter>) -> Self {
        self.limiter = limiter;
        self
    }

    pub fn with_state_store(mut self, state: Arc<dyn StateStore>) -> Self {
        self.state = Some(state);
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_unit_timeout(mut self, timeout: Duration) -> Self {
        self.unit_timeout = timeout;
        self
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    /// Restore from a backup file's contents.
    pub async fn import(&self, raw: &str, sink: &mut dyn ProgressSink) -> Result<SyncReport, SyncError> {
        let payload = backup::decode(raw)?;
        self.run(payload, sink).await
    }

    /// Apply a payload received from another device.
    pub async fn process_sync_payload(
        &self,
        raw: &str,
        sink: &mut dyn ProgressSink,
    ) -> Result<SyncReport, SyncError> {
        let payload = backup::decode_sync_payload(raw)?;
        self.run(payload, sink).await
    }

    /// Run in the background, streaming progress over a channel.
    pub fn spawn(&self, payload: BackupPayload) -> SyncRun {
        let (mut tx, rx) = mpsc::unbounded_channel();
        let engine = self.clone();
        let handle = tokio::spawn(async move { engine.run(payload, &mut tx).await });
        SyncRun { progress: rx, handle }
    }

    /// Merge `payload` into the store. Only one run may be active at a time;
    /// a second one is rejected rather than queued.
    #[instrument(skip(self, payload, sink), fields(user = %payload.user.username))]
    pub async fn run(
        &self,
        payload: BackupPayload,
        sink: &mut dyn ProgressSink,
    ) -> Result<SyncReport, SyncError> {
        let _running = self.running.try_lock().map_err(|_| SyncError::AlreadyRunning)?;
        let started = Instant::now();

        let units: Vec<Unit> = payload
            .watchlist
            .iter()
            .map(|item| Unit {
                item: item.clone(),
                origin: Origin::Watchlist,
            })
            .chain(payload.subscribed_lists.iter().flat_map(|list| {
                list.items.iter().map(|item| Unit {
                    item: item.clone(),
                    origin: Origin::List,
                })
            }))
            .collect();

        info!(
            "Starting sync of {} units in batches of {}",
            units.len(),
            self.batch_size
        );
        let mut report = self.fetch_in_batches(&units, sink).await;

        {
            let mut store = self.store.write().await;
            store.set_user(payload.user);
            if !payload.subscribed_lists.is_empty() {
                store.set_subscribed_lists(payload.subscribed_lists);
            }
            report.interactions_merged = store.merge_interactions(payload.interactions);
            report.reminders_merged = store.merge_reminders(payload.reminders);
            if let Some(settings) = payload.settings {
                store.update_settings(SettingsPatch::replace_with(settings));
                report.settings_replaced = true;
            }
            store.rebuild_calendar();
        }

        info!(
            "Sync finished in {:.1}s: {}/{} units fetched, {} skipped, {} interactions, {} reminders",
            started.elapsed().as_secs_f64(),
            report.fetched,
            report.total,
            report.failed.len(),
            report.interactions_merged,
            report.reminders_merged
        );
        self.persist(report).await
    }

    /// Refetch every tracked item and rebuild the calendar.
    #[instrument(skip(self, sink))]
    pub async fn refresh(&self, sink: &mut dyn ProgressSink) -> Result<SyncReport, SyncError> {
        let _running = self.running.try_lock().map_err(|_| SyncError::AlreadyRunning)?;

        let units: Vec<Unit> = {
            let store = self.store.read().await;
            store
                .tracked_items()
                .into_iter()
                .map(|item| Unit {
                    origin: if store.contains(item.key()) {
                        Origin::Watchlist
                    } else {
                        Origin::List
                    },
                    item,
                })
                .collect()
        };

        let report = self.fetch_in_batches(&units, sink).await;
        self.store.write().await.rebuild_calendar();
        info!(
            "Refreshed {}/{} tracked items, {} skipped",
            report.fetched,
            report.total,
            report.failed.len()
        );
        self.persist(report).await
    }

    async fn fetch_unit(&self, key: LibraryKey) -> Result<ShowDetails, CatalogError> {
        match tokio::time::timeout(self.unit_timeout, self.catalog.fetch_show_details(key)).await {
            Ok(result) => result,
            Err(_) => Err(CatalogError::Timeout),
        }
    }

    async fn fetch_in_batches(&self, units: &[Unit], sink: &mut dyn ProgressSink) -> SyncReport {
        let total = units.len();
        let mut progress = SyncProgress { current: 0, total };
        let mut report = SyncReport {
            total,
            ..Default::default()
        };

        if total == 0 {
            sink.emit(progress);
            return report;
        }

        for (batch_number, batch) in units.chunks(self.batch_size).enumerate() {
            if batch_number > 0 {
                self.limiter.wait().await;
            }

            let results = join_all(batch.iter().map(|unit| self.fetch_unit(unit.item.key()))).await;

            {
                let mut store = self.store.write().await;
                for (unit, result) in batch.iter().zip(results) {
                    let key = unit.item.key();
                    match result {
                        Ok(details) => {
                            if unit.origin == Origin::Watchlist {
                                store.upsert_library_item(details.item);
                            }
                            store.record_releases(key, details.episodes);
                            report.fetched += 1;
                        }
                        Err(e) => {
                            warn!("Skipping {} ({}): {}", unit.item.name, key, e);
                            // Keep the item tracked even though its releases are unknown.
                            if unit.origin == Origin::Watchlist && !store.contains(key) {
                                store.upsert_library_item(unit.item.clone());
                            }
                            report.failed.push(key);
                        }
                    }
                }
            }

            progress.current = (progress.current + batch.len()).min(total);
            debug!("Sync progress {}/{}", progress.current, progress.total);
            sink.emit(progress);
        }

        report
    }

    async fn persist(&self, report: SyncReport) -> Result<SyncReport, SyncError> {
        let Some(state) = &self.state else {
            return Ok(report);
        };

        let saved = {
            let store = self.store.read().await;
            persistence::save_store(state.as_ref(), &store).await
        };

        match saved {
            Ok(()) => Ok(report),
            Err(source) => Err(SyncError::Persistence { report, source }),
        }
    }
}
