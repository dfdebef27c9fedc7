pub mod event_source;
pub mod file_watcher;
pub mod importer;
pub mod notifier;
pub mod pootle_client;
pub mod processor;
pub mod sync;

// Re-export for convenience
pub use event_source::{EventSource, InboxEvent, InboxEventKind, NotifyEventSource, PollingEventSource};
pub use file_watcher::{Disposition, ImportWatcher, MonitorState, WatchSummary, WatcherError, WatcherSettings};
pub use importer::{ImportError, ImportResult, Importer};
pub use notifier::{TrommonsNotice, TrommonsNotifier};
pub use pootle_client::{PootleApi, PootleAuth, PootleClient, PootleError};
pub use processor::{ImportProcessor, ProcessedTask};
pub use sync::{SyncReport, TranslationSync};
