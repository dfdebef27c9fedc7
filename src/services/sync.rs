// src/services/sync.rs
//! Brings translated stores back from Pootle into the Trommons outbox

use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use crate::models::pootle::TranslationProject;
use crate::services::notifier::{NotifyError, TrommonsNotice, TrommonsNotifier};
use crate::services::pootle_client::{PootleApi, PootleError};

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Project '{0}' not found on Pootle")]
    ProjectNotFound(String),
    #[error("Project '{project}' has no translation project for '{language}'")]
    LanguageNotFound { project: String, language: String },
    #[error(transparent)]
    Pootle(#[from] PootleError),
    #[error(transparent)]
    Notify(#[from] NotifyError),
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    pub project_code: String,
    pub languages: Vec<String>,
    pub files: Vec<PathBuf>,
}

pub struct TranslationSync {
    api: Arc<dyn PootleApi>,
    notifier: TrommonsNotifier,
}

impl TranslationSync {
    pub fn new(api: Arc<dyn PootleApi>, notifier: TrommonsNotifier) -> Self {
        Self { api, notifier }
    }

    /// Download every store of the project (or of one language) into
    /// `<outbox>/<project>/<language>/` and mark the task completed.
    pub async fn sync_project(
        &self,
        project_code: &str,
        language: Option<&str>,
    ) -> Result<SyncReport, SyncError> {
        let project = self
            .api
            .find_project(project_code)
            .await?
            .ok_or_else(|| SyncError::ProjectNotFound(project_code.to_string()))?;

        let mut report = SyncReport {
            project_code: project_code.to_string(),
            ..Default::default()
        };

        for tp in self.api.list_translation_projects(project_code).await? {
            let code = self.language_code(&tp).await?;
            if language.is_some_and(|wanted| !wanted.eq_ignore_ascii_case(&code)) {
                continue;
            }

            for store in self.api.list_stores(&tp).await? {
                let content = self.api.download_store(&store).await?;
                match self
                    .notifier
                    .write_translation(project_code, &code, &store.name, content.as_bytes())
                    .await
                {
                    Ok(path) => report.files.push(path),
                    Err(NotifyError::UnsafeName(name)) => {
                        warn!("Skipping store with unusable name '{}'", name);
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            report.languages.push(code);
        }

        if let Some(wanted) = language {
            if report.languages.is_empty() {
                return Err(SyncError::LanguageNotFound {
                    project: project_code.to_string(),
                    language: wanted.to_string(),
                });
            }
        }

        let notice = TrommonsNotice {
            created: true,
            backlink: project.backlink,
            completed: true,
        };
        self.notifier.notify(project_code, &notice).await?;

        info!(
            "Synced {} files of '{}' ({})",
            report.files.len(),
            project_code,
            report.languages.join(", ")
        );
        Ok(report)
    }

    async fn language_code(&self, tp: &TranslationProject) -> Result<String, PootleError> {
        match tp.language_code() {
            Some(code) => Ok(code.to_string()),
            None => Ok(self.api.get_language(&tp.language).await?.code),
        }
    }
}
