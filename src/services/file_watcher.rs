// src/services/file_watcher.rs
//! Inbox watcher: waits for task entries, imports each one once, then
//! archives, deletes, quarantines or retains the source

use chrono::Utc;
use futures::FutureExt;
use glob::Pattern;
use serde::Serialize;
use std::collections::BTreeSet;
use std::ffi::OsStr;
use std::future::Future;
use std::path::{Component, Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval_at, sleep, Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::{Config, ConfigError};
use crate::services::event_source::{
    snapshot, EventSource, InboxEvent, NotifyEventSource, PollingEventSource,
};
use crate::models::task::is_partial_name;
use crate::services::importer::ImportError;
use crate::services::processor::ImportProcessor;

/// Suffixes of files still being downloaded or edited.

#[derive(Debug, thiserror::Error)]
pub enum WatcherError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Invalid pattern '{pattern}': {message}")]
    Pattern { pattern: String, message: String },
    #[error("Filesystem error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("File watcher error: {0}")]
    Notify(#[from] notify::Error),
    #[error("Authorization denied while importing {path}: {source}")]
    AuthorizationDenied {
        path: PathBuf,
        #[source]
        source: ImportError,
    },
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> WatcherError + '_ {
    move |source| WatcherError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[derive(Debug, Clone)]
pub struct WatcherSettings {
    pub inbox_dir: PathBuf,
    pub archive_dir: Option<PathBuf>,
    pub quarantine_dir: PathBuf,
    /// Kept out of the candidate set when nested in the inbox
    pub outbox_dir: Option<PathBuf>,
    pub batch_delay: Duration,
    pub settle_interval: Duration,
    pub max_settle_checks: u32,
    pub rescan_interval: Option<Duration>,
    pub include: Vec<Pattern>,
    pub exclude: Vec<Pattern>,
}

fn compile(patterns: &[String]) -> Result<Vec<Pattern>, WatcherError> {
    patterns
        .iter()
        .map(|p| {
            Pattern::new(p).map_err(|e| WatcherError::Pattern {
                pattern: p.clone(),
                message: e.to_string(),
            })
        })
        .collect()
}

impl WatcherSettings {
    pub fn from_config(config: &Config) -> Result<Self, WatcherError> {
        Ok(Self {
            inbox_dir: config.inbox_dir.clone(),
            archive_dir: config.archive_dir.clone(),
            quarantine_dir: config.quarantine_dir.clone(),
            outbox_dir: config.outbox_dir.clone(),
            batch_delay: config.batch_delay(),
            settle_interval: config.settle_interval(),
            max_settle_checks: config.max_settle_checks.max(1),
            rescan_interval: config.rescan_interval(),
            include: compile(&config.include_patterns)?,
            exclude: compile(&config.exclude_patterns)?,
        })
    }

    /// Name filter for direct children of the inbox.
    pub fn accepts(&self, name: &str) -> bool {
        if is_partial_name(name) {
            return false;
        }
        if self.exclude.iter().any(|p| p.matches(name)) {
            return false;
        }
        self.include.is_empty() || self.include.iter().any(|p| p.matches(name))
    }

    fn is_reserved(&self, path: &Path) -> bool {
        Some(path) == self.archive_dir.as_deref()
            || path == self.quarantine_dir
            || Some(path) == self.outbox_dir.as_deref()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Idle,
    WatchingForEvent,
    Dispatching,
    Stopped,
}

/// What happened to an inbox entry after dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Imported; moved to the archive, or deleted when there is none
    Imported { archived_to: Option<PathBuf> },
    /// Already on Pootle; removed like an import
    Duplicate { archived_to: Option<PathBuf> },
    Quarantined(PathBuf),
    /// Left in the inbox for a later retry
    Retained,
    /// Gone before it could be handled
    Skipped,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct WatchSummary {
    pub imported: usize,
    pub duplicates: usize,
    pub quarantined: usize,
    pub retained: usize,
    pub skipped: usize,
}

impl WatchSummary {
    fn record(&mut self, disposition: &Disposition) {
        match disposition {
            Disposition::Imported { .. } => self.imported += 1,
            Disposition::Duplicate { .. } => self.duplicates += 1,
            Disposition::Quarantined(_) => self.quarantined += 1,
            Disposition::Retained => self.retained += 1,
            Disposition::Skipped => self.skipped += 1,
        }
    }
}

enum Wake {
    Event(InboxEvent),
    Rescan,
}

pub struct ImportWatcher {
    settings: WatcherSettings,
    processor: Arc<ImportProcessor>,
    // Resolved form of the inbox path; some backends report canonical paths
    canonical_inbox: Option<PathBuf>,
    state: watch::Sender<MonitorState>,
}

impl ImportWatcher {
    pub fn new(settings: WatcherSettings, processor: Arc<ImportProcessor>) -> Self {
        let canonical_inbox = std::fs::canonicalize(&settings.inbox_dir).ok();
        let (state, _) = watch::channel(MonitorState::Idle);
        Self {
            settings,
            processor,
            canonical_inbox,
            state,
        }
    }

    pub fn processor(&self) -> &Arc<ImportProcessor> {
        &self.processor
    }

    pub fn settings(&self) -> &WatcherSettings {
        &self.settings
    }

    pub fn state(&self) -> MonitorState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<MonitorState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: MonitorState) {
        self.state.send_replace(state);
    }

    /// Watch with native notifications until `shutdown` resolves.
    pub async fn watch<F>(&self, shutdown: F) -> Result<WatchSummary, WatcherError>
    where
        F: Future<Output = ()> + Send,
    {
        self.ensure_directories().await?;
        let source = NotifyEventSource::new(&self.settings.inbox_dir)?;
        self.run(source, shutdown).await
    }

    /// Same as [`watch`](Self::watch) but rescanning every `every` instead.
    pub async fn watch_polling<F>(&self, every: Duration, shutdown: F) -> Result<WatchSummary, WatcherError>
    where
        F: Future<Output = ()> + Send,
    {
        self.ensure_directories().await?;
        let source = PollingEventSource::new(self.settings.inbox_dir.clone(), every)
            .await
            .map_err(io_err(&self.settings.inbox_dir))?;
        self.run(source, shutdown).await
    }

    /// The event loop. Processes what is already in the inbox, then
    /// dispatches entries as `source` reports them, until `shutdown`
    /// resolves or the source is exhausted. An import already running when
    /// shutdown is requested is finished; the rest of its batch stays in
    /// the inbox for the next start.
    pub async fn run<S, F>(&self, mut source: S, shutdown: F) -> Result<WatchSummary, WatcherError>
    where
        S: EventSource,
        F: Future<Output = ()> + Send,
    {
        self.ensure_directories().await?;

        let mut summary = WatchSummary::default();
        let mut stopping = false;
        tokio::pin!(shutdown);

        let existing = self.scan_inbox().await?;
        if !existing.is_empty() {
            info!("Found {} pending entries in the inbox", existing.len());
            self.dispatch(existing, &mut summary, &mut shutdown, &mut stopping)
                .await?;
        }

        let mut rescan = self.settings.rescan_interval.map(|every| {
            let mut interval = interval_at(Instant::now() + every, every);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            interval
        });

        info!("👀 Watching {}", self.settings.inbox_dir.display());

        while !stopping {
            self.set_state(MonitorState::WatchingForEvent);

            let wake = tokio::select! {
                _ = &mut shutdown => break,
                event = source.next_event() => match event {
                    Some(event) => Wake::Event(event),
                    None => {
                        info!("Event source closed");
                        break;
                    }
                },
                _ = next_tick(&mut rescan) => Wake::Rescan,
            };

            let mut batch = BTreeSet::new();
            match wake {
                Wake::Event(event) => batch.extend(self.candidate(&event)),
                Wake::Rescan => {
                    debug!("Rescanning inbox");
                    batch.extend(self.scan_inbox().await?);
                }
            }

            // Gather what arrives close to the first event into the same run
            let mut closed = false;
            let deadline = sleep(self.settings.batch_delay);
            tokio::pin!(deadline);
            loop {
                tokio::select! {
                    _ = &mut deadline => break,
                    _ = &mut shutdown => {
                        stopping = true;
                        break;
                    }
                    event = source.next_event() => match event {
                        Some(event) => batch.extend(self.candidate(&event)),
                        None => {
                            closed = true;
                            break;
                        }
                    },
                }
            }

            if !batch.is_empty() && !stopping {
                self.dispatch(batch.into_iter().collect(), &mut summary, &mut shutdown, &mut stopping)
                    .await?;
            }
            if closed {
                break;
            }
        }

        self.set_state(MonitorState::Stopped);
        info!(
            "Watcher stopped: {} imported, {} duplicates, {} quarantined, {} retained",
            summary.imported, summary.duplicates, summary.quarantined, summary.retained
        );
        Ok(summary)
    }

    async fn dispatch<F>(
        &self,
        batch: Vec<PathBuf>,
        summary: &mut WatchSummary,
        shutdown: &mut Pin<&mut F>,
        stopping: &mut bool,
    ) -> Result<(), WatcherError>
    where
        F: Future<Output = ()>,
    {
        self.set_state(MonitorState::Dispatching);
        let total = batch.len();

        for (done, entry) in batch.into_iter().enumerate() {
            if !*stopping && shutdown.as_mut().now_or_never().is_some() {
                *stopping = true;
            }
            if *stopping {
                info!(
                    "Shutdown requested, leaving {} entries for the next start",
                    total - done
                );
                break;
            }

            let disposition = self.handle_entry(&entry).await;
            match disposition {
                Ok(disposition) => summary.record(&disposition),
                Err(e) => {
                    self.set_state(MonitorState::Idle);
                    return Err(e);
                }
            }
        }

        self.set_state(MonitorState::Idle);
        Ok(())
    }

    /// Settle, import and dispose of one inbox entry. Only errors that
    /// should stop the watcher are returned.
    pub async fn handle_entry(&self, entry: &Path) -> Result<Disposition, WatcherError> {
        match self.wait_until_stable(entry).await {
            Ok(true) => {}
            Ok(false) => {
                info!("{} is still being written, will retry", entry.display());
                return Ok(Disposition::Retained);
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("{} disappeared before import", entry.display());
                return Ok(Disposition::Skipped);
            }
            Err(e) => {
                warn!("Cannot inspect {}: {}", entry.display(), e);
                return Ok(Disposition::Retained);
            }
        }

        match self.processor.process(entry).await {
            Ok(task) => {
                info!(
                    "✅ Imported {} as {}",
                    entry.display(),
                    task.result.unit
                );
                let archived_to = match self.remove_imported(entry).await {
                    Ok(archived_to) => archived_to,
                    Err(e) => {
                        error!("Imported {} but could not remove it: {}", entry.display(), e);
                        return Ok(Disposition::Retained);
                    }
                };
                Ok(Disposition::Imported { archived_to })
            }
            Err(e @ ImportError::DuplicateUnit { .. }) => {
                warn!("Skipping {}: {}", entry.display(), e);
                match self.remove_imported(entry).await {
                    Ok(archived_to) => Ok(Disposition::Duplicate { archived_to }),
                    Err(err) => {
                        error!("Could not remove duplicate {}: {}", entry.display(), err);
                        Ok(Disposition::Retained)
                    }
                }
            }
            Err(
                e @ (ImportError::InvalidMetadata(_)
                | ImportError::UploadRejected(_)
                | ImportError::UnsupportedContent { .. }),
            ) => {
                error!("❌ {} failed with {}: {}", entry.display(), e.tag(), e);
                match self.quarantine(entry, &e).await {
                    Ok(target) => Ok(Disposition::Quarantined(target)),
                    Err(err) => {
                        error!("Could not quarantine {}: {}", entry.display(), err);
                        Ok(Disposition::Retained)
                    }
                }
            }
            Err(e @ ImportError::AuthorizationDenied(_)) => {
                error!("❌ {} failed with {}: {}", entry.display(), e.tag(), e);
                Err(WatcherError::AuthorizationDenied {
                    path: entry.to_path_buf(),
                    source: e,
                })
            }
            Err(e) => {
                warn!(
                    "⚠️ {} failed with {}, leaving it for retry: {}",
                    entry.display(),
                    e.tag(),
                    e
                );
                Ok(Disposition::Retained)
            }
        }
    }

    /// Two equal snapshots `settle_interval` apart mean the writer is done.
    pub async fn wait_until_stable(&self, entry: &Path) -> std::io::Result<bool> {
        let mut previous = snapshot(entry).await?;
        for _ in 0..self.settings.max_settle_checks {
            sleep(self.settings.settle_interval).await;
            let current = snapshot(entry).await?;
            if current == previous {
                return Ok(true);
            }
            previous = current;
        }
        Ok(false)
    }

    /// The inbox child an event refers to, if it is a candidate for import.
    pub fn candidate(&self, event: &InboxEvent) -> Option<PathBuf> {
        if !event.is_arrival() {
            return None;
        }
        let relative = event
            .path
            .strip_prefix(&self.settings.inbox_dir)
            .ok()
            .or_else(|| {
                self.canonical_inbox
                    .as_deref()
                    .and_then(|inbox| event.path.strip_prefix(inbox).ok())
            })?;
        let name = match relative.components().next()? {
            Component::Normal(name) => name,
            _ => return None,
        };
        let entry = self.settings.inbox_dir.join(name);
        self.admits(&entry, name).then_some(entry)
    }

    /// Names that are not UTF-8 go through the filters lossily; the name
    /// parser then rejects them and they end up in quarantine.
    fn admits(&self, entry: &Path, name: &OsStr) -> bool {
        if name.to_str().is_none() {
            warn!("Inbox entry name is not valid UTF-8: {}", entry.display());
        }
        self.settings.accepts(&name.to_string_lossy()) && !self.settings.is_reserved(entry)
    }

    /// Candidate entries currently in the inbox, sorted by name.
    pub async fn scan_inbox(&self) -> Result<Vec<PathBuf>, WatcherError> {
        let inbox = &self.settings.inbox_dir;
        let mut found = Vec::new();
        let mut entries = tokio::fs::read_dir(inbox).await.map_err(io_err(inbox))?;
        while let Some(entry) = entries.next_entry().await.map_err(io_err(inbox))? {
            let path = entry.path();
            if self.admits(&path, &entry.file_name()) {
                found.push(path);
            }
        }
        found.sort();
        Ok(found)
    }

    /// The inbox belongs to Trommons and must exist; our own directories are created.
    async fn ensure_directories(&self) -> Result<(), WatcherError> {
        let inbox = &self.settings.inbox_dir;
        match tokio::fs::metadata(inbox).await {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => return Err(ConfigError::InboxNotDirectory(inbox.clone()).into()),
            Err(_) => return Err(ConfigError::InboxMissing(inbox.clone()).into()),
        }

        let mut dirs = vec![&self.settings.quarantine_dir];
        dirs.extend(self.settings.archive_dir.as_ref());
        dirs.extend(self.settings.outbox_dir.as_ref());
        for dir in dirs {
            tokio::fs::create_dir_all(dir).await.map_err(io_err(dir))?;
        }
        Ok(())
    }

    async fn remove_imported(&self, entry: &Path) -> std::io::Result<Option<PathBuf>> {
        match &self.settings.archive_dir {
            Some(archive) => {
                tokio::fs::create_dir_all(archive).await?;
                let target = unique_target(archive, entry);
                move_entry(entry, &target).await?;
                debug!("Archived {} to {}", entry.display(), target.display());
                Ok(Some(target))
            }
            None => {
                if tokio::fs::metadata(entry).await?.is_dir() {
                    tokio::fs::remove_dir_all(entry).await?;
                } else {
                    tokio::fs::remove_file(entry).await?;
                }
                debug!("Removed {}", entry.display());
                Ok(None)
            }
        }
    }

    async fn quarantine(&self, entry: &Path, reason: &ImportError) -> std::io::Result<PathBuf> {
        tokio::fs::create_dir_all(&self.settings.quarantine_dir).await?;
        let target = unique_target(&self.settings.quarantine_dir, entry);
        move_entry(entry, &target).await?;

        let mut note = target.clone().into_os_string();
        note.push(".error.txt");
        let body = format!(
            "{}\n{}: {}\nsource: {}\n",
            Utc::now().to_rfc3339(),
            reason.tag(),
            reason,
            entry.display()
        );
        tokio::fs::write(PathBuf::from(note), body).await?;

        warn!("Quarantined {} to {}", entry.display(), target.display());
        Ok(target)
    }
}

async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

/// `dir/<name>`, or `dir/<name>.<timestamp>` when that is taken.
fn unique_target(dir: &Path, entry: &Path) -> PathBuf {
    let name = entry
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "entry".into());
    let target = dir.join(&name);
    if !target.exists() {
        return target;
    }
    let mut stamped = name;
    stamped.push(format!(".{}", Utc::now().format("%Y%m%d%H%M%S%3f")));
    dir.join(stamped)
}

/// Rename, falling back to copy and delete for single files across filesystems.
async fn move_entry(from: &Path, to: &Path) -> std::io::Result<()> {
    match tokio::fs::rename(from, to).await {
        Ok(()) => Ok(()),
        Err(e) => {
            if tokio::fs::metadata(from).await?.is_file() {
                tokio::fs::copy(from, to).await?;
                tokio::fs::remove_file(from).await
            } else {
                Err(e)
            }
        }
    }
}
