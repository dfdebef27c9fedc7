//! Pootle bridge - imports Trommons translation tasks into Pootle

pub mod config;
pub mod models;
pub mod services;

// Re-export main types for convenience
pub use crate::config::{Config, ConfigError};
pub use crate::models::task::{TaskMetadata, TaskSource};
pub use crate::services::file_watcher::{ImportWatcher, WatcherSettings};
pub use crate::services::importer::{ImportError, ImportResult, Importer};
pub use crate::services::pootle_client::{PootleApi, PootleClient};
pub use crate::services::processor::ImportProcessor;
