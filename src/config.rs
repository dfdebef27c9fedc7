use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use validator::{Validate, ValidationError};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration error: {0}")]
    Load(#[from] config::ConfigError),
    #[error("Invalid configuration: {0}")]
    Invalid(#[from] validator::ValidationErrors),
    #[error("Missing credentials: set api_key or both api_username and api_password")]
    MissingCredentials,
    #[error("Inbox directory does not exist: {0}")]
    InboxMissing(PathBuf),
    #[error("Inbox path is not a directory: {0}")]
    InboxNotDirectory(PathBuf),
}

/// Main configuration for the bridge. Loaded once at startup, immutable afterwards.
#[derive(Debug, Deserialize, Validate, Clone)]
pub struct Config {
    /// Pootle API base URL, e.g. `http://localhost:8000/api/v1/`
    #[validate(url, custom(function = "validate_http_scheme"))]
    pub api_url: String,

    /// User for HTTP basic auth; needs rights to create projects and assign permissions
    pub api_username: String,

    pub api_password: String,

    /// Tastypie API key; when set it is sent instead of basic auth
    pub api_key: Option<String>,

    /// Timeout applied to every outbound request
    #[validate(range(min = 1, max = 600))]
    pub request_timeout_secs: u64,

    /// Directory where Trommons leaves tasks for Pootle
    pub inbox_dir: PathBuf,

    /// Directory where the bridge leaves notices and translations for Trommons
    pub outbox_dir: Option<PathBuf>,

    /// Imported entries are moved here; deleted when unset
    pub archive_dir: Option<PathBuf>,

    /// Entries that can never import (bad metadata, rejected upload) end up here
    pub quarantine_dir: PathBuf,

    /// How long to collect further events after the first one of a batch
    pub batch_delay_ms: u64,

    /// Interval between two size/mtime snapshots of a new entry
    #[validate(range(min = 1))]
    pub settle_interval_ms: u64,

    #[validate(range(min = 1, max = 1000))]
    pub max_settle_checks: u32,

    /// Periodic inbox rescan so retained entries get retried; 0 disables it
    pub rescan_interval_secs: u64,

    /// Scan interval of the polling event source
    #[validate(range(min = 10))]
    pub poll_interval_ms: u64,

    #[validate(custom(function = "validate_patterns"))]
    pub include_patterns: Vec<String>,

    #[validate(custom(function = "validate_patterns"))]
    pub exclude_patterns: Vec<String>,

    /// Permissions granted to the task assignee on its project
    #[validate(length(min = 1))]
    pub translator_permissions: Vec<String>,

    /// Log level (e.g., info, debug, trace)
    pub log_level: String,
}

fn validate_http_scheme(url: &str) -> Result<(), ValidationError> {
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(())
    } else {
        Err(ValidationError::new("unsupported_scheme"))
    }
}

fn validate_patterns(patterns: &Vec<String>) -> Result<(), ValidationError> {
    for pattern in patterns {
        if glob::Pattern::new(pattern).is_err() {
            let mut err = ValidationError::new("invalid_glob");
            err.message = Some(format!("invalid glob pattern '{}'", pattern).into());
            return Err(err);
        }
    }
    Ok(())
}

fn base_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".pootle-bridge")
}

impl Config {
    /// Load from `~/.pootle-bridge/config.toml`.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(None)
    }

    /// Load from defaults, then the given file (or the default one), then
    /// `POOTLE_BRIDGE__*` environment variables.
    pub fn load_from(file: Option<&Path>) -> Result<Self, ConfigError> {
        let base = base_dir();
        let path_default = |name: &str| base.join(name).to_string_lossy().into_owned();

        let file_source = match file {
            Some(path) => config::File::from(path.to_path_buf()).required(true),
            None => config::File::with_name(&path_default("config")).required(false),
        };

        let settings = config::Config::builder()
            .set_default("api_url", "http://localhost:8000/api/v1/")?
            .set_default("api_username", "")?
            .set_default("api_password", "")?
            .set_default("request_timeout_secs", 30)?
            .set_default("inbox_dir", path_default("inbox"))?
            .set_default("quarantine_dir", path_default("quarantine"))?
            .set_default("batch_delay_ms", 100)?
            .set_default("settle_interval_ms", 500)?
            .set_default("max_settle_checks", 20)?
            .set_default("rescan_interval_secs", 60)?
            .set_default("poll_interval_ms", 1000)?
            .set_default("include_patterns", vec!["*"])?
            .set_default("exclude_patterns", Vec::<String>::new())?
            .set_default(
                "translator_permissions",
                vec!["view", "suggest", "translate", "overwrite", "review", "archive"],
            )?
            .set_default("log_level", "info")?
            .add_source(file_source)
            // Environment overrides: POOTLE_BRIDGE__API_URL, POOTLE_BRIDGE__INBOX_DIR, etc.
            .add_source(
                config::Environment::with_prefix("POOTLE_BRIDGE")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("include_patterns")
                    .with_list_parse_key("exclude_patterns")
                    .with_list_parse_key("translator_permissions")
                    .try_parsing(true),
            )
            .build()?;

        let cfg: Config = settings.try_deserialize()?;
        cfg.check()?;
        Ok(cfg)
    }

    /// Field validation plus the cross-field rules.
    pub fn check(&self) -> Result<(), ConfigError> {
        self.validate()?;
        if self.api_key.is_none()
            && (self.api_username.trim().is_empty() || self.api_password.is_empty())
        {
            return Err(ConfigError::MissingCredentials);
        }
        Ok(())
    }

    /// The inbox must already exist; it is owned by Trommons.
    pub fn check_inbox(&self) -> Result<(), ConfigError> {
        if !self.inbox_dir.exists() {
            return Err(ConfigError::InboxMissing(self.inbox_dir.clone()));
        }
        if !self.inbox_dir.is_dir() {
            return Err(ConfigError::InboxNotDirectory(self.inbox_dir.clone()));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }

    pub fn settle_interval(&self) -> Duration {
        Duration::from_millis(self.settle_interval_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// `None` when periodic rescans are disabled.
    pub fn rescan_interval(&self) -> Option<Duration> {
        (self.rescan_interval_secs > 0).then(|| Duration::from_secs(self.rescan_interval_secs))
    }

    /// Configuration rooted at `base` with every other field at its default.
    /// Used by tests and by the one-shot importer when no file is present.
    pub fn with_base_dir(base: &Path, api_url: &str) -> Self {
        Self {
            api_url: api_url.to_string(),
            api_username: "api-user".to_string(),
            api_password: "api-user".to_string(),
            api_key: None,
            request_timeout_secs: 30,
            inbox_dir: base.join("inbox"),
            outbox_dir: Some(base.join("outbox")),
            archive_dir: None,
            quarantine_dir: base.join("quarantine"),
            batch_delay_ms: 100,
            settle_interval_ms: 500,
            max_settle_checks: 20,
            rescan_interval_secs: 60,
            poll_interval_ms: 1000,
            include_patterns: vec!["*".to_string()],
            exclude_patterns: vec![],
            translator_permissions: ["view", "suggest", "translate", "overwrite", "review", "archive"]
                .iter()
                .map(|p| p.to_string())
                .collect(),
            log_level: "info".to_string(),
        }
    }
}
