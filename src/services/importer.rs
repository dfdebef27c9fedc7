// src/services/importer.rs
//! Pushes one task file into Pootle: languages, project, translation project, store

use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

use crate::models::pootle::{Language, NewProject, Project, TranslationProject};
use crate::models::task::{MetadataError, TaskMetadata};
use crate::services::notifier::NotifyError;
use crate::services::pootle_client::{PootleApi, PootleError};

#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("Pootle unavailable: {0}")]
    RemoteUnavailable(PootleError),
    #[error("Authorization denied: {0}")]
    AuthorizationDenied(PootleError),
    #[error("Invalid metadata: {0}")]
    InvalidMetadata(String),
    /// A task bundle that is still being filled
    #[error("Task bundle not complete yet: {0}")]
    Incomplete(String),
    #[error("Cannot upload {path}: {reason}")]
    UnsupportedContent { path: PathBuf, reason: String },
    #[error("Store '{unit}' already exists in {translation_project}")]
    DuplicateUnit {
        unit: String,
        translation_project: String,
    },
    #[error("Rejected by Pootle: {0}")]
    UploadRejected(PootleError),
    #[error("Cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// Pootle has the task, Trommons has not been told yet
    #[error("Notice for '{project}' could not be written: {source}")]
    NoticeFailed {
        project: String,
        #[source]
        source: NotifyError,
    },
}

impl From<MetadataError> for ImportError {
    fn from(err: MetadataError) -> Self {
        ImportError::InvalidMetadata(err.to_string())
    }
}

impl ImportError {
    pub fn io(path: &Path, source: std::io::Error) -> Self {
        ImportError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Short tag used in logs and quarantine notes.
    pub fn tag(&self) -> &'static str {
        match self {
            ImportError::RemoteUnavailable(_) => "RemoteUnavailable",
            ImportError::AuthorizationDenied(_) => "AuthorizationDenied",
            ImportError::InvalidMetadata(_) => "InvalidMetadata",
            ImportError::Incomplete(_) => "Incomplete",
            ImportError::UnsupportedContent { .. } => "UnsupportedContent",
            ImportError::DuplicateUnit { .. } => "DuplicateUnit",
            ImportError::UploadRejected(_) => "UploadRejected",
            ImportError::Io { .. } => "Io",
            ImportError::NoticeFailed { .. } => "NoticeFailed",
        }
    }

    /// Worth trying again later without touching the file.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ImportError::RemoteUnavailable(_)
                | ImportError::Io { .. }
                | ImportError::Incomplete(_)
                | ImportError::NoticeFailed { .. }
        )
    }
}

/// Sort a Pootle failure into the import error taxonomy.
pub(crate) fn classify(err: PootleError) -> ImportError {
    match err {
        PootleError::Unauthorized { .. } => ImportError::AuthorizationDenied(err),
        PootleError::Rejected { .. } | PootleError::Conflict { .. } => {
            ImportError::UploadRejected(err)
        }
        _ => ImportError::RemoteUnavailable(err),
    }
}

/// Identifiers of everything an import created or reused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportResult {
    pub project: String,
    pub translation_project: String,
    pub unit: String,
    pub project_created: bool,
    pub translation_project_created: bool,
    /// Project page on Pootle, passed on to Trommons
    pub backlink: Option<String>,
}

pub struct Importer {
    api: Arc<dyn PootleApi>,
    translator_permissions: Vec<String>,
    // One lock per project code so concurrent imports never race on creation
    project_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl Importer {
    pub fn new(api: Arc<dyn PootleApi>, translator_permissions: Vec<String>) -> Self {
        Self {
            api,
            translator_permissions,
            project_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn api(&self) -> &Arc<dyn PootleApi> {
        &self.api
    }

    fn project_lock(&self, code: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .project_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        locks.entry(code.to_string()).or_default().clone()
    }

    /// Drop the map entry once no other import holds or waits for it.
    fn release_project_lock(&self, code: &str, lock: Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self
            .project_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        // One reference in the map, one here
        if Arc::strong_count(&lock) == 2 {
            locks.remove(code);
        }
    }

    /// Number of project codes with a live lock entry.
    pub fn tracked_projects(&self) -> usize {
        self.project_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Import `file_path` as a store described by `metadata`.
    ///
    /// Every creation step is create-if-absent, so a call that failed
    /// halfway can simply be repeated. The upload is the last remote step;
    /// an existing store with the same name fails with
    /// [`ImportError::DuplicateUnit`] instead of being uploaded twice.
    pub async fn import_task(
        &self,
        file_path: &Path,
        metadata: &TaskMetadata,
    ) -> Result<ImportResult, ImportError> {
        metadata.check()?;
        let content = read_task_file(file_path).await?;

        let lock = self.project_lock(&metadata.project_code);
        let result = {
            let _guard = lock.lock().await;
            self.import_locked(metadata, &content).await
        };
        self.release_project_lock(&metadata.project_code, lock);
        result
    }

    async fn import_locked(
        &self,
        metadata: &TaskMetadata,
        content: &str,
    ) -> Result<ImportResult, ImportError> {
        let source = self
            .ensure_language(
                &metadata.source_language,
                metadata.source_language_name.as_deref(),
            )
            .await?;
        let target = self
            .ensure_language(
                &metadata.target_language,
                metadata.target_language_name.as_deref(),
            )
            .await?;

        let (project, project_created) = self.ensure_project(metadata, &source).await?;
        let (tp, tp_created) = self.ensure_translation_project(&project, &target).await?;

        if let Some(existing) = self
            .api
            .find_store(&tp, &metadata.unit_name)
            .await
            .map_err(classify)?
        {
            return Err(ImportError::DuplicateUnit {
                unit: existing.name,
                translation_project: tp.resource_uri,
            });
        }

        if let Some(assignee) = &metadata.assignee {
            self.ensure_translator(assignee, &project).await?;
        }

        let store = match self.api.upload_store(&tp, &metadata.unit_name, content).await {
            Ok(store) => store,
            Err(PootleError::Conflict { .. }) => {
                return Err(ImportError::DuplicateUnit {
                    unit: metadata.unit_name.clone(),
                    translation_project: tp.resource_uri,
                })
            }
            Err(err @ PootleError::Unauthorized { .. }) => {
                return Err(ImportError::AuthorizationDenied(err))
            }
            Err(err @ PootleError::Rejected { .. }) => return Err(ImportError::UploadRejected(err)),
            Err(err) => return Err(ImportError::RemoteUnavailable(err)),
        };

        info!(
            "Uploaded '{}' to {} ({} bytes)",
            metadata.unit_name,
            tp.pootle_path.as_deref().unwrap_or(&tp.resource_uri),
            content.len()
        );

        Ok(ImportResult {
            project: project.resource_uri,
            translation_project: tp.resource_uri,
            unit: store.resource_uri,
            project_created,
            translation_project_created: tp_created,
            backlink: project.backlink,
        })
    }

    async fn ensure_language(
        &self,
        code: &str,
        fullname: Option<&str>,
    ) -> Result<Language, ImportError> {
        if let Some(language) = self.api.find_language(code).await.map_err(classify)? {
            debug!("Language '{}' already exists", code);
            return Ok(language);
        }

        info!("Language '{}' doesn't exist, creating it", code);
        match self.api.create_language(code, fullname.unwrap_or(code)).await {
            Ok(language) => Ok(language),
            Err(PootleError::Conflict { .. }) => self
                .api
                .find_language(code)
                .await
                .map_err(classify)?
                .ok_or_else(|| vanished("language", code)),
            Err(err) => Err(classify(err)),
        }
    }

    async fn ensure_project(
        &self,
        metadata: &TaskMetadata,
        source: &Language,
    ) -> Result<(Project, bool), ImportError> {
        let code = &metadata.project_code;
        if let Some(project) = self.api.find_project(code).await.map_err(classify)? {
            debug!("Project '{}' already exists", code);
            return Ok((project, false));
        }

        let new_project = NewProject {
            code: code.clone(),
            fullname: metadata.project_name.clone(),
            description: metadata.description.clone().unwrap_or_default(),
            source_language: source.resource_uri.clone(),
            translation_projects: vec![],
        };

        match self.api.create_project(&new_project).await {
            Ok(project) => Ok((project, true)),
            Err(PootleError::Conflict { .. }) => {
                warn!("Project '{}' was created concurrently, reusing it", code);
                let project = self
                    .api
                    .find_project(code)
                    .await
                    .map_err(classify)?
                    .ok_or_else(|| vanished("project", code))?;
                Ok((project, false))
            }
            Err(err) => Err(classify(err)),
        }
    }

    async fn ensure_translation_project(
        &self,
        project: &Project,
        language: &Language,
    ) -> Result<(TranslationProject, bool), ImportError> {
        if let Some(tp) = self
            .api
            .find_translation_project(&project.code, &language.code)
            .await
            .map_err(classify)?
        {
            debug!(
                "Translation project for '{}' in '{}' already exists",
                project.code, language.code
            );
            return Ok((tp, false));
        }

        match self.api.create_translation_project(project, language).await {
            Ok(tp) => Ok((tp, true)),
            Err(PootleError::Conflict { .. }) => {
                let tp = self
                    .api
                    .find_translation_project(&project.code, &language.code)
                    .await
                    .map_err(classify)?
                    .ok_or_else(|| {
                        vanished(
                            "translation project",
                            &format!("{}/{}", language.code, project.code),
                        )
                    })?;
                Ok((tp, false))
            }
            Err(err) => Err(classify(err)),
        }
    }

    /// Make sure the assignee exists and can translate in the project.
    async fn ensure_translator(&self, username: &str, project: &Project) -> Result<(), ImportError> {
        let user = match self.api.find_user(username).await.map_err(classify)? {
            Some(user) => {
                debug!("User '{}' already exists", username);
                user
            }
            None => {
                info!("User '{}' doesn't exist, creating it", username);
                match self.api.create_user(username).await {
                    Ok(user) => user,
                    Err(PootleError::Conflict { .. }) => self
                        .api
                        .find_user(username)
                        .await
                        .map_err(classify)?
                        .ok_or_else(|| vanished("user", username))?,
                    Err(err) => return Err(classify(err)),
                }
            }
        };

        match self
            .api
            .grant_permissions(&user, project, &self.translator_permissions)
            .await
        {
            // Already granted by an earlier attempt
            Ok(()) | Err(PootleError::Conflict { .. }) => {
                info!("Assigned '{}' to project '{}'", username, project.code);
                Ok(())
            }
            Err(err) => Err(classify(err)),
        }
    }
}

/// Conflict on create, yet the lookup right after finds nothing.
fn vanished(kind: &str, name: &str) -> ImportError {
    ImportError::RemoteUnavailable(PootleError::InvalidResponse {
        action: format!("{} lookup", kind),
        message: format!("{} '{}' reported as existing but not found", kind, name),
    })
}

async fn read_task_file(path: &Path) -> Result<String, ImportError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| ImportError::io(path, e))?;
    if bytes.is_empty() {
        return Err(ImportError::InvalidMetadata(format!(
            "task file {} is empty",
            path.display()
        )));
    }
    // The store API takes the file as a JSON string
    String::from_utf8(bytes).map_err(|_| ImportError::UnsupportedContent {
        path: path.to_path_buf(),
        reason: "content is not valid UTF-8".to_string(),
    })
}
