// src/services/processor.rs
//! Resolves inbox entries into tasks and runs them through the importer

use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use crate::models::task::{
    is_partial_name, BundleMeta, MetadataError, TaskLayout, TaskMetadata, TaskSource,
    BUNDLE_META_FILENAME,
};
use crate::services::importer::{classify, ImportError, ImportResult, Importer};
use crate::services::notifier::{NotifyError, TrommonsNotice, TrommonsNotifier};

#[derive(Debug, Clone, Serialize)]
pub struct ProcessedTask {
    pub source: TaskSource,
    pub result: ImportResult,
}

#[derive(Clone)]
pub struct ImportProcessor {
    importer: Arc<Importer>,
    notifier: Option<TrommonsNotifier>,
}

impl ImportProcessor {
    pub fn new(importer: Arc<Importer>, notifier: Option<TrommonsNotifier>) -> Self {
        Self { importer, notifier }
    }

    pub fn importer(&self) -> &Arc<Importer> {
        &self.importer
    }

    pub fn notifier(&self) -> Option<&TrommonsNotifier> {
        self.notifier.as_ref()
    }

    /// Work out which layout `entry` uses and extract its metadata.
    pub async fn resolve(&self, entry: &Path) -> Result<TaskSource, ImportError> {
        let meta = tokio::fs::metadata(entry)
            .await
            .map_err(|e| ImportError::io(entry, e))?;

        if meta.is_dir() {
            return read_bundle(entry).await;
        }

        Ok(TaskSource {
            entry: entry.to_path_buf(),
            file_path: entry.to_path_buf(),
            layout: TaskLayout::File,
            metadata: TaskMetadata::from_file_name(entry)?,
        })
    }

    /// Import one inbox entry and tell Trommons about it.
    ///
    /// The entry itself is left where it is; disposing of it is up to the
    /// caller. A notice that cannot be written fails with
    /// [`ImportError::NoticeFailed`] so the entry is kept; the retry then
    /// hits [`ImportError::DuplicateUnit`], which writes the missing notice.
    pub async fn process(&self, entry: &Path) -> Result<ProcessedTask, ImportError> {
        let source = self.resolve(entry).await?;
        let code = &source.metadata.project_code;
        info!(
            "Importing {} into project '{}' ({} -> {})",
            source.file_path.display(),
            code,
            source.metadata.source_language,
            source.metadata.target_language
        );

        let result = match self
            .importer
            .import_task(&source.file_path, &source.metadata)
            .await
        {
            Ok(result) => result,
            Err(e @ ImportError::DuplicateUnit { .. }) => {
                self.ensure_notice(code).await?;
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        if let Some(notifier) = &self.notifier {
            let notice = TrommonsNotice {
                created: true,
                backlink: result.backlink.clone(),
                completed: false,
            };
            notifier
                .notify(code, &notice)
                .await
                .map_err(|source| ImportError::NoticeFailed {
                    project: code.clone(),
                    source,
                })?;
        }

        Ok(ProcessedTask { source, result })
    }

    /// Write the creation notice unless one is already there. Covers a run
    /// that uploaded the store and stopped before notifying.
    async fn ensure_notice(&self, project_code: &str) -> Result<(), ImportError> {
        let Some(notifier) = &self.notifier else {
            return Ok(());
        };
        let failed = |source: NotifyError| ImportError::NoticeFailed {
            project: project_code.to_string(),
            source,
        };

        if notifier.read_notice(project_code).await.map_err(failed)?.is_some() {
            return Ok(());
        }

        let backlink = self
            .importer
            .api()
            .find_project(project_code)
            .await
            .map_err(classify)?
            .and_then(|project| project.backlink);
        warn!(
            "'{}' is on Pootle but Trommons has no notice for it, writing one",
            project_code
        );
        let notice = TrommonsNotice {
            created: true,
            backlink,
            completed: false,
        };
        notifier.notify(project_code, &notice).await.map_err(failed)?;
        Ok(())
    }
}

/// A Trommons task directory: `meta.json` plus exactly one translation file.
///
/// Trommons fills the directory file by file, so a bundle missing one of the
/// two, or still holding a partial download, is [`ImportError::Incomplete`]
/// and gets retried. Anything else that does not fit is invalid.
async fn read_bundle(dir: &Path) -> Result<TaskSource, ImportError> {
    let mut names = Vec::new();
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| ImportError::io(dir, e))?;
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| ImportError::io(dir, e))?
    {
        names.push(entry.file_name().to_string_lossy().into_owned());
    }

    if let Some(partial) = names.iter().find(|n| is_partial_name(n)) {
        return Err(ImportError::Incomplete(format!(
            "{} is still being written in {}",
            partial,
            dir.display()
        )));
    }

    let has_meta = names.iter().any(|n| n == BUNDLE_META_FILENAME);
    let files: Vec<&String> = names.iter().filter(|n| *n != BUNDLE_META_FILENAME).collect();
    if files.len() > 1 {
        return Err(
            MetadataError::Bundle("more than one translation file provided".to_string()).into(),
        );
    }
    if !has_meta {
        return Err(ImportError::Incomplete(format!(
            "no {} in {} yet",
            BUNDLE_META_FILENAME,
            dir.display()
        )));
    }
    let Some(file_name) = files.first() else {
        return Err(ImportError::Incomplete(format!(
            "no translation file in {} yet",
            dir.display()
        )));
    };

    let meta_path = dir.join(BUNDLE_META_FILENAME);
    let json = tokio::fs::read_to_string(&meta_path)
        .await
        .map_err(|e| ImportError::io(&meta_path, e))?;
    let metadata = BundleMeta::parse(&json)?.into_metadata()?;

    if file_name.as_str() != metadata.unit_name {
        return Err(MetadataError::Bundle(format!(
            "translation_filename '{}' does not match {}",
            metadata.unit_name,
            file_name
        ))
        .into());
    }
    let translation = dir.join(file_name.as_str());
    if !tokio::fs::metadata(&translation)
        .await
        .map_err(|e| ImportError::io(&translation, e))?
        .is_file()
    {
        return Err(MetadataError::Bundle(format!("{} is not a file", translation.display())).into());
    }

    Ok(TaskSource {
        entry: dir.to_path_buf(),
        file_path: translation,
        layout: TaskLayout::Bundle,
        metadata,
    })
}
