// src/services/event_source.rs
//! Filesystem event sources feeding the inbox watcher

use async_trait::async_trait;
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboxEventKind {
    Created,
    Modified,
    MovedIn,
    Removed,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboxEvent {
    pub path: PathBuf,
    pub kind: InboxEventKind,
}

impl InboxEvent {
    pub fn new(path: impl Into<PathBuf>, kind: InboxEventKind) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }

    /// Something may have appeared or grown at `path`.
    pub fn is_arrival(&self) -> bool {
        matches!(
            self.kind,
            InboxEventKind::Created | InboxEventKind::Modified | InboxEventKind::MovedIn
        )
    }
}

/// A lazy, unbounded sequence of filesystem events.
#[async_trait]
pub trait EventSource: Send {
    /// Wait for the next event. `None` means the source is exhausted.
    async fn next_event(&mut self) -> Option<InboxEvent>;
}

/// Native notifications through the `notify` crate.
pub struct NotifyEventSource {
    _watcher: RecommendedWatcher,
    rx: mpsc::UnboundedReceiver<InboxEvent>,
}

impl NotifyEventSource {
    /// Watch `path` recursively, so writes inside task bundles are seen too.
    pub fn new(path: &Path) -> Result<Self, notify::Error> {
        let (tx, rx) = mpsc::unbounded_channel();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                for inbox_event in translate(event) {
                    // Receiver gone means the watcher is shutting down
                    let _ = tx.send(inbox_event);
                }
            }
            Err(e) => tracing::warn!("File watcher error: {}", e),
        })?;
        watcher.watch(path, RecursiveMode::Recursive)?;

        tracing::debug!("Watching {} for changes", path.display());
        Ok(Self {
            _watcher: watcher,
            rx,
        })
    }
}

#[async_trait]
impl EventSource for NotifyEventSource {
    async fn next_event(&mut self) -> Option<InboxEvent> {
        self.rx.recv().await
    }
}

fn translate(event: Event) -> Vec<InboxEvent> {
    match event.kind {
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            // paths are [from, to]
            let mut paths = event.paths.into_iter();
            let mut out = Vec::with_capacity(2);
            if let Some(from) = paths.next() {
                out.push(InboxEvent::new(from, InboxEventKind::Removed));
            }
            if let Some(to) = paths.next() {
                out.push(InboxEvent::new(to, InboxEventKind::MovedIn));
            }
            out
        }
        kind => {
            let kind = match kind {
                EventKind::Create(_) => InboxEventKind::Created,
                EventKind::Modify(ModifyKind::Name(RenameMode::To)) => InboxEventKind::MovedIn,
                EventKind::Modify(ModifyKind::Name(RenameMode::From)) => InboxEventKind::Removed,
                EventKind::Modify(_) => InboxEventKind::Modified,
                EventKind::Remove(_) => InboxEventKind::Removed,
                _ => InboxEventKind::Other,
            };
            event
                .paths
                .into_iter()
                .map(|p| InboxEvent::new(p, kind))
                .collect()
        }
    }
}

/// Size and modification time of an inbox entry; directories are summed over their files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntrySnapshot {
    pub len: u64,
    pub files: u64,
    pub modified: Option<SystemTime>,
}

impl EntrySnapshot {
    fn merge(&mut self, other: EntrySnapshot) {
        self.len += other.len;
        self.files += other.files;
        self.modified = self.modified.max(other.modified);
    }
}

pub async fn snapshot(path: &Path) -> std::io::Result<EntrySnapshot> {
    let meta = tokio::fs::metadata(path).await?;
    let mut snap = EntrySnapshot {
        len: if meta.is_file() { meta.len() } else { 0 },
        files: u64::from(meta.is_file()),
        modified: meta.modified().ok(),
    };

    if meta.is_dir() {
        let mut pending = vec![path.to_path_buf()];
        while let Some(dir) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let child = entry.metadata().await?;
                if child.is_dir() {
                    pending.push(entry.path());
                }
                snap.merge(EntrySnapshot {
                    len: if child.is_file() { child.len() } else { 0 },
                    files: u64::from(child.is_file()),
                    modified: child.modified().ok(),
                });
            }
        }
    }
    Ok(snap)
}

/// Rescans the directory on a fixed interval. For filesystems without
/// native notifications (NFS, some containers).
pub struct PollingEventSource {
    dir: PathBuf,
    interval: Interval,
    known: HashMap<PathBuf, EntrySnapshot>,
    pending: VecDeque<InboxEvent>,
}

impl PollingEventSource {
    /// Entries already present count as known; the watcher's startup scan covers them.
    pub async fn new(dir: PathBuf, every: Duration) -> std::io::Result<Self> {
        let mut interval = interval_at(Instant::now() + every, every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut source = Self {
            dir,
            interval,
            known: HashMap::new(),
            pending: VecDeque::new(),
        };
        source.known = source.scan().await?;
        Ok(source)
    }

    async fn scan(&self) -> std::io::Result<HashMap<PathBuf, EntrySnapshot>> {
        let mut current = HashMap::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            // Entry may vanish between listing and stat
            if let Ok(snap) = snapshot(&path).await {
                current.insert(path, snap);
            }
        }
        Ok(current)
    }

    async fn refresh(&mut self) {
        let current = match self.scan().await {
            Ok(current) => current,
            Err(e) => {
                tracing::warn!("Polling {} failed: {}", self.dir.display(), e);
                return;
            }
        };

        let mut events: Vec<InboxEvent> = Vec::new();
        for (path, snap) in &current {
            match self.known.get(path) {
                None => events.push(InboxEvent::new(path.clone(), InboxEventKind::Created)),
                Some(old) if old != snap => {
                    events.push(InboxEvent::new(path.clone(), InboxEventKind::Modified))
                }
                Some(_) => {}
            }
        }
        for path in self.known.keys() {
            if !current.contains_key(path) {
                events.push(InboxEvent::new(path.clone(), InboxEventKind::Removed));
            }
        }
        events.sort_by(|a, b| a.path.cmp(&b.path));

        self.pending.extend(events);
        self.known = current;
    }
}

#[async_trait]
impl EventSource for PollingEventSource {
    async fn next_event(&mut self) -> Option<InboxEvent> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(event);
            }
            self.interval.tick().await;
            self.refresh().await;
        }
    }
}
