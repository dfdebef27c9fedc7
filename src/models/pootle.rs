// Resources of the Pootle v1 (tastypie) API, trimmed to the fields the bridge uses.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
pub struct ListMeta {
    pub total_count: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListResponse<T> {
    pub meta: ListMeta,
    pub objects: Vec<T>,
}

impl<T> ListResponse<T> {
    /// The single match of an exact lookup, `None` when nothing (or more than one) matched.
    pub fn into_single(self) -> Option<T> {
        if self.meta.total_count == 1 {
            self.objects.into_iter().next()
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Language {
    pub code: String,
    #[serde(default)]
    pub fullname: Option<String>,
    pub resource_uri: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub code: String,
    #[serde(default)]
    pub fullname: Option<String>,
    pub resource_uri: String,
    /// URL of the project page on Pootle
    #[serde(default)]
    pub backlink: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewProject {
    pub code: String,
    pub fullname: String,
    pub description: String,
    pub source_language: String,
    pub translation_projects: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranslationProject {
    pub resource_uri: String,
    pub project: String,
    pub language: String,
    /// `/<language>/<project>/`
    #[serde(default)]
    pub pootle_path: Option<String>,
}

impl TranslationProject {
    pub fn id(&self) -> Option<&str> {
        resource_id(&self.resource_uri)
    }

    /// Language code taken from the pootle path, when the server sent one.
    pub fn language_code(&self) -> Option<&str> {
        self.pootle_path
            .as_deref()
            .and_then(|p| p.trim_start_matches('/').split('/').next())
            .filter(|code| !code.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Store {
    pub resource_uri: String,
    pub name: String,
    pub translation_project: String,
    #[serde(default)]
    pub pootle_path: Option<String>,
    /// Download location of the store file
    #[serde(default)]
    pub file: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub username: String,
    pub resource_uri: String,
}

/// Last path segment of a resource URI: `/api/v1/projects/7/` -> `7`.
pub fn resource_id(uri: &str) -> Option<&str> {
    uri.trim_end_matches('/').rsplit('/').next().filter(|id| !id.is_empty())
}
