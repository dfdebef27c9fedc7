use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use validator::{Validate, ValidationError};

/// Extensions Pootle can import as a store. Formats usually stored in
/// UTF-16 or Latin-1 (`.strings`, `.properties`) are left out: the store
/// API only takes UTF-8 text.
pub const SUPPORTED_FORMATS: &[&str] = &[
    "po", "pot", "xlf", "xliff", "ts", "json", "php", "dtd", "ini", "lang", "srt",
];

/// Name of the metadata file inside a Trommons task bundle.
pub const BUNDLE_META_FILENAME: &str = "meta.json";

const PARTIAL_SUFFIXES: &[&str] = &[".part", ".tmp", ".crdownload", ".partial", ".swp", "~"];

/// Hidden files and download leftovers: something is still being written.
pub fn is_partial_name(name: &str) -> bool {
    name.starts_with('.') || PARTIAL_SUFFIXES.iter().any(|s| name.ends_with(s))
}

#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    #[error("File name '{0}' does not follow <project>_<source>_<target>_<unit>.<ext>")]
    FileName(String),
    #[error("Unsupported translation format '{0}'")]
    UnsupportedFormat(String),
    #[error("Invalid task bundle: {0}")]
    Bundle(String),
    #[error("Invalid meta.json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid metadata: {0}")]
    Invalid(#[from] validator::ValidationErrors),
    #[error("Invalid assignee '{0}'")]
    Assignee(String),
}

/// Everything the importer needs to know about a task, whatever layout it came in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct TaskMetadata {
    #[validate(length(min = 1, max = 64), custom(function = "validate_code"))]
    pub project_code: String,

    #[validate(length(min = 1, max = 255))]
    pub project_name: String,

    pub description: Option<String>,

    #[validate(length(min = 1, max = 64), custom(function = "validate_code"))]
    pub source_language: String,

    pub source_language_name: Option<String>,

    #[validate(length(min = 1, max = 64), custom(function = "validate_code"))]
    pub target_language: String,

    pub target_language_name: Option<String>,

    /// Store name the file is uploaded as
    #[validate(length(min = 1, max = 255), custom(function = "validate_unit_name"))]
    pub unit_name: String,

    pub assignee: Option<String>,

    /// Link back to the task on Trommons
    pub backlink: Option<String>,

    pub task_id: Option<u64>,
}

/// Codes: ASCII alphanumeric first, then alphanumerics and `_ - . @`.
pub fn is_valid_code(code: &str) -> bool {
    let mut chars = code.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphanumeric() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '@'))
}

fn validate_code(code: &str) -> Result<(), ValidationError> {
    if is_valid_code(code) {
        Ok(())
    } else {
        let mut err = ValidationError::new("invalid_code");
        err.message = Some(format!("'{}' is not a valid code", code).into());
        Err(err)
    }
}

fn validate_unit_name(name: &str) -> Result<(), ValidationError> {
    if name.contains('/') || name.contains('\\') || name == "." || name == ".." {
        return Err(ValidationError::new("invalid_unit_name"));
    }
    Ok(())
}

impl TaskMetadata {
    /// Field rules plus the optional fields the derive does not cover.
    pub fn check(&self) -> Result<(), MetadataError> {
        self.validate()?;
        if let Some(assignee) = &self.assignee {
            if assignee.len() > 150 || !is_valid_code(assignee) {
                return Err(MetadataError::Assignee(assignee.clone()));
            }
        }
        Ok(())
    }

    /// Metadata from a single file named `<project>_<source>_<target>_<unit>.<ext>`.
    ///
    /// Project and language codes cannot contain `_` here, so regional
    /// variants are written with a dash (`pt-BR`). The unit part may.
    pub fn from_file_name(path: &Path) -> Result<Self, MetadataError> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| MetadataError::FileName(path.display().to_string()))?;

        let (stem, ext) = name
            .rsplit_once('.')
            .ok_or_else(|| MetadataError::FileName(name.to_string()))?;
        let ext_lower = ext.to_ascii_lowercase();
        if !SUPPORTED_FORMATS.contains(&ext_lower.as_str()) {
            return Err(MetadataError::UnsupportedFormat(ext.to_string()));
        }

        let parts: Vec<&str> = stem.splitn(4, '_').collect();
        if parts.len() != 4 || parts.iter().any(|p| p.is_empty()) {
            return Err(MetadataError::FileName(name.to_string()));
        }

        let metadata = Self {
            project_code: parts[0].to_string(),
            project_name: parts[0].to_string(),
            description: None,
            source_language: parts[1].to_string(),
            source_language_name: None,
            target_language: parts[2].to_string(),
            target_language_name: None,
            unit_name: format!("{}.{}", parts[3], ext),
            assignee: None,
            backlink: None,
            task_id: None,
        };
        metadata.check()?;
        Ok(metadata)
    }
}

/// `meta.json` as Trommons writes it into a task bundle. Every field is required.
#[derive(Debug, Clone, Deserialize)]
pub struct BundleMeta {
    pub title: String,
    pub description: String,
    pub source_code: String,
    pub source_name: String,
    pub target_code: String,
    pub target_name: String,
    pub assignee_id: String,
    pub backlink: String,
    pub translation_filename: String,
    pub task_id: u64,
}

impl BundleMeta {
    pub fn parse(json: &str) -> Result<Self, MetadataError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn project_code(&self) -> String {
        format!("task-{}", self.task_id)
    }

    /// Project description shown on Pootle, with a link back to Trommons.
    pub fn project_description(&self) -> String {
        format!(
            "{}<br/><br/><a href=\"{}\">Task in Trommons</a>.",
            self.description.replace("\n\n", "<br/>"),
            self.backlink
        )
    }

    pub fn into_metadata(self) -> Result<TaskMetadata, MetadataError> {
        let metadata = TaskMetadata {
            project_code: self.project_code(),
            description: Some(self.project_description()),
            project_name: self.title,
            source_language: self.source_code,
            source_language_name: Some(self.source_name),
            target_language: self.target_code,
            target_language_name: Some(self.target_name),
            unit_name: self.translation_filename,
            assignee: Some(self.assignee_id).filter(|a| !a.is_empty()),
            backlink: Some(self.backlink).filter(|b| !b.is_empty()),
            task_id: Some(self.task_id),
        };
        metadata.check()?;
        Ok(metadata)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskLayout {
    /// A single translation file, metadata encoded in its name
    File,
    /// A Trommons task directory holding `meta.json` and one translation file
    Bundle,
}

/// An inbox entry resolved to the file to upload and its metadata.
#[derive(Debug, Clone, Serialize)]
pub struct TaskSource {
    /// Direct child of the inbox: the file itself or the bundle directory
    pub entry: PathBuf,
    pub file_path: PathBuf,
    pub layout: TaskLayout,
    pub metadata: TaskMetadata,
}
