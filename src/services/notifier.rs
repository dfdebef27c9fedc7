// src/services/notifier.rs
//! Notices and translations left for Trommons in the outbox

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const NOTICE_FILENAME: &str = "meta.json";

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Cannot write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid notice: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Refusing to write outside the outbox: {0}")]
    UnsafeName(String),
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> NotifyError + '_ {
    move |source| NotifyError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Content of `<outbox>/<project>/meta.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrommonsNotice {
    pub created: bool,
    pub backlink: Option<String>,
    pub completed: bool,
}

#[derive(Debug, Clone)]
pub struct TrommonsNotifier {
    outbox: PathBuf,
}

impl TrommonsNotifier {
    pub fn new(outbox: PathBuf) -> Self {
        Self { outbox }
    }

    pub fn outbox(&self) -> &Path {
        &self.outbox
    }

    pub fn task_dir(&self, project_code: &str) -> PathBuf {
        self.outbox.join(project_code)
    }

    /// Write the notice for a project.
    ///
    /// A new task directory is assembled under a hidden staging name and
    /// renamed into place, so Trommons never picks up a directory without
    /// its `meta.json`. An existing notice is replaced atomically.
    pub async fn notify(
        &self,
        project_code: &str,
        notice: &TrommonsNotice,
    ) -> Result<PathBuf, NotifyError> {
        check_name(project_code)?;
        tokio::fs::create_dir_all(&self.outbox)
            .await
            .map_err(io_err(&self.outbox))?;

        let body = serde_json::to_string_pretty(notice)?;
        let task_dir = self.task_dir(project_code);
        let notice_path = task_dir.join(NOTICE_FILENAME);

        if tokio::fs::try_exists(&task_dir).await.unwrap_or(false) {
            write_atomic(&notice_path, body.as_bytes()).await?;
        } else {
            let staging = self.outbox.join(format!(
                ".{}.staging-{}",
                project_code,
                Utc::now().timestamp_nanos_opt().unwrap_or_default()
            ));
            tokio::fs::create_dir_all(&staging)
                .await
                .map_err(io_err(&staging))?;
            let staged_notice = staging.join(NOTICE_FILENAME);
            tokio::fs::write(&staged_notice, body.as_bytes())
                .await
                .map_err(io_err(&staged_notice))?;
            if let Err(e) = tokio::fs::rename(&staging, &task_dir).await {
                let _ = tokio::fs::remove_dir_all(&staging).await;
                return Err(NotifyError::Io {
                    path: task_dir,
                    source: e,
                });
            }
        }

        tracing::info!(
            "Notified Trommons about '{}' (completed: {})",
            project_code,
            notice.completed
        );
        Ok(notice_path)
    }

    pub async fn read_notice(&self, project_code: &str) -> Result<Option<TrommonsNotice>, NotifyError> {
        check_name(project_code)?;
        let path = self.task_dir(project_code).join(NOTICE_FILENAME);
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => Ok(Some(serde_json::from_str(&text)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(NotifyError::Io { path, source: e }),
        }
    }

    /// Store a translated file at `<outbox>/<project>/<language>/<name>`.
    pub async fn write_translation(
        &self,
        project_code: &str,
        language_code: &str,
        name: &str,
        content: &[u8],
    ) -> Result<PathBuf, NotifyError> {
        check_name(project_code)?;
        check_name(language_code)?;
        check_name(name)?;

        let dir = self.task_dir(project_code).join(language_code);
        tokio::fs::create_dir_all(&dir).await.map_err(io_err(&dir))?;
        let path = dir.join(name);
        write_atomic(&path, content).await?;
        Ok(path)
    }
}

fn check_name(name: &str) -> Result<(), NotifyError> {
    if name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\')
    {
        return Err(NotifyError::UnsafeName(name.to_string()));
    }
    Ok(())
}

async fn write_atomic(path: &Path, content: &[u8]) -> Result<(), NotifyError> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(".{}.tmp", file_name));
    tokio::fs::write(&tmp, content).await.map_err(io_err(&tmp))?;
    tokio::fs::rename(&tmp, path).await.map_err(io_err(path))?;
    Ok(())
}
