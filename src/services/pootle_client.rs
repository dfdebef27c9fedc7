// src/services/pootle_client.rs
//! Pootle REST API (v1) client and the trait the importer talks to

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

use crate::config::Config;
use crate::models::pootle::{
    Language, ListResponse, NewProject, Project, Store, TranslationProject, User,
};

#[derive(Error, Debug)]
pub enum PootleError {
    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
    #[error("Pootle unavailable during {action}: status {status}")]
    Unavailable { action: String, status: u16 },
    #[error("Pootle denied {action}: status {status}")]
    Unauthorized { action: String, status: u16 },
    #[error("Pootle reported a conflict during {action}: {message}")]
    Conflict { action: String, message: String },
    #[error("Pootle rejected {action} ({status}): {message}")]
    Rejected {
        action: String,
        status: u16,
        message: String,
    },
    #[error("Invalid response to {action}: {message}")]
    InvalidResponse { action: String, message: String },
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

impl PootleError {
    /// Transport failures, timeouts and 5xx; an operator may retry later.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PootleError::HttpError(_)
                | PootleError::Unavailable { .. }
                | PootleError::InvalidResponse { .. }
        )
    }
}

/// Operations the bridge needs from Pootle.
#[async_trait]
pub trait PootleApi: Send + Sync {
    /// Cheap authenticated request used to fail fast on bad credentials.
    async fn check_auth(&self) -> Result<(), PootleError>;

    async fn find_language(&self, code: &str) -> Result<Option<Language>, PootleError>;
    async fn create_language(&self, code: &str, fullname: &str) -> Result<Language, PootleError>;
    async fn get_language(&self, resource_uri: &str) -> Result<Language, PootleError>;

    async fn find_project(&self, code: &str) -> Result<Option<Project>, PootleError>;
    async fn create_project(&self, project: &NewProject) -> Result<Project, PootleError>;

    async fn find_translation_project(
        &self,
        project_code: &str,
        language_code: &str,
    ) -> Result<Option<TranslationProject>, PootleError>;
    async fn list_translation_projects(
        &self,
        project_code: &str,
    ) -> Result<Vec<TranslationProject>, PootleError>;
    async fn create_translation_project(
        &self,
        project: &Project,
        language: &Language,
    ) -> Result<TranslationProject, PootleError>;

    async fn find_store(
        &self,
        tp: &TranslationProject,
        name: &str,
    ) -> Result<Option<Store>, PootleError>;
    async fn list_stores(&self, tp: &TranslationProject) -> Result<Vec<Store>, PootleError>;
    async fn upload_store(
        &self,
        tp: &TranslationProject,
        name: &str,
        content: &str,
    ) -> Result<Store, PootleError>;
    async fn download_store(&self, store: &Store) -> Result<String, PootleError>;

    async fn find_user(&self, username: &str) -> Result<Option<User>, PootleError>;
    async fn create_user(&self, username: &str) -> Result<User, PootleError>;
    async fn grant_permissions(
        &self,
        user: &User,
        project: &Project,
        permissions: &[String],
    ) -> Result<(), PootleError>;
}

#[derive(Debug, Clone)]
pub enum PootleAuth {
    Basic { username: String, password: String },
    ApiKey { username: String, key: String },
}

impl PootleAuth {
    pub fn from_config(config: &Config) -> Self {
        match &config.api_key {
            Some(key) => PootleAuth::ApiKey {
                username: config.api_username.clone(),
                key: key.clone(),
            },
            None => PootleAuth::Basic {
                username: config.api_username.clone(),
                password: config.api_password.clone(),
            },
        }
    }
}

/// reqwest-backed client for the tastypie API
#[derive(Clone)]
pub struct PootleClient {
    client: Client,
    base_url: Url,
    auth: PootleAuth,
}

impl PootleClient {
    pub fn new(base_url: &str, auth: PootleAuth, timeout: Duration) -> Result<Self, PootleError> {
        let mut base_url =
            Url::parse(base_url).map_err(|e| PootleError::InvalidUrl(format!("{}: {}", base_url, e)))?;
        // Url::join drops the last segment unless the path ends with '/'
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url,
            auth,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, PootleError> {
        Self::new(
            &config.api_url,
            PootleAuth::from_config(config),
            config.request_timeout(),
        )
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn url(&self, path: &str) -> Result<Url, PootleError> {
        // Resource URIs come back absolute (`/api/v1/...`), endpoints are relative
        self.base_url
            .join(path)
            .map_err(|e| PootleError::InvalidUrl(format!("{}: {}", path, e)))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.auth {
            PootleAuth::Basic { username, password } => {
                request.basic_auth(username, Some(password))
            }
            PootleAuth::ApiKey { username, key } => {
                request.header("Authorization", format!("ApiKey {}:{}", username, key))
            }
        }
    }

    async fn get_list<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        query: &[(&str, &str)],
        action: &str,
    ) -> Result<ListResponse<T>, PootleError> {
        let request = self.client.get(self.url(endpoint)?).query(query);
        let response = self.authorize(request).send().await?;
        let response = check_status(response, action).await?;
        parse_body(response, action).await
    }

    async fn post_json<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        body: &serde_json::Value,
        action: &str,
    ) -> Result<T, PootleError> {
        let request = self.client.post(self.url(endpoint)?).json(body);
        let response = self.authorize(request).send().await?;
        let response = check_status(response, action).await?;
        parse_body(response, action).await
    }
}

/// Map the status code onto the error taxonomy; 2xx passes the response through.
async fn check_status(response: Response, action: &str) -> Result<Response, PootleError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let message = response.text().await.unwrap_or_default();
    tracing::debug!("Pootle {} failed with {}: {}", action, status, message);

    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => PootleError::Unauthorized {
            action: action.to_string(),
            status: status.as_u16(),
        },
        StatusCode::CONFLICT => PootleError::Conflict {
            action: action.to_string(),
            message,
        },
        s if s.is_client_error() => PootleError::Rejected {
            action: action.to_string(),
            status: s.as_u16(),
            message,
        },
        s => PootleError::Unavailable {
            action: action.to_string(),
            status: s.as_u16(),
        },
    })
}

async fn parse_body<T: DeserializeOwned>(response: Response, action: &str) -> Result<T, PootleError> {
    let text = response.text().await?;
    serde_json::from_str(&text).map_err(|e| PootleError::InvalidResponse {
        action: action.to_string(),
        message: e.to_string(),
    })
}

#[async_trait]
impl PootleApi for PootleClient {
    async fn check_auth(&self) -> Result<(), PootleError> {
        self.get_list::<Language>("languages/", &[("limit", "1")], "authentication check")
            .await?;
        Ok(())
    }

    async fn find_language(&self, code: &str) -> Result<Option<Language>, PootleError> {
        let found = self
            .get_list::<Language>("languages/", &[("code__iexact", code)], "language lookup")
            .await?;
        Ok(found.into_single())
    }

    async fn create_language(&self, code: &str, fullname: &str) -> Result<Language, PootleError> {
        let body = json!({
            "code": code,
            "fullname": fullname,
            "translation_projects": [],
        });
        let language: Language = self.post_json("languages/", &body, "language creation").await?;
        tracing::info!("Created language '{}'", code);
        Ok(language)
    }

    async fn get_language(&self, resource_uri: &str) -> Result<Language, PootleError> {
        let request = self.client.get(self.url(resource_uri)?);
        let response = self.authorize(request).send().await?;
        let response = check_status(response, "language fetch").await?;
        parse_body(response, "language fetch").await
    }

    async fn find_project(&self, code: &str) -> Result<Option<Project>, PootleError> {
        let found = self
            .get_list::<Project>("projects/", &[("code__exact", code)], "project lookup")
            .await?;
        Ok(found.into_single())
    }

    async fn create_project(&self, project: &NewProject) -> Result<Project, PootleError> {
        // Needs tastypie's always_return_data on the server so the new project comes back
        let body = serde_json::to_value(project).map_err(|e| PootleError::InvalidResponse {
            action: "project creation".to_string(),
            message: e.to_string(),
        })?;
        let created: Project = self.post_json("projects/", &body, "project creation").await?;
        tracing::info!("Created project '{}'", created.code);
        Ok(created)
    }

    async fn find_translation_project(
        &self,
        project_code: &str,
        language_code: &str,
    ) -> Result<Option<TranslationProject>, PootleError> {
        let found = self
            .get_list::<TranslationProject>(
                "translation-projects/",
                &[
                    ("project__code", project_code),
                    ("language__code", language_code),
                ],
                "translation project lookup",
            )
            .await?;
        Ok(found.into_single())
    }

    async fn list_translation_projects(
        &self,
        project_code: &str,
    ) -> Result<Vec<TranslationProject>, PootleError> {
        let found = self
            .get_list::<TranslationProject>(
                "translation-projects/",
                &[("project__code", project_code)],
                "translation project listing",
            )
            .await?;
        Ok(found.objects)
    }

    async fn create_translation_project(
        &self,
        project: &Project,
        language: &Language,
    ) -> Result<TranslationProject, PootleError> {
        let body = json!({
            "project": project.resource_uri,
            "language": language.resource_uri,
        });
        let tp: TranslationProject = self
            .post_json("translation-projects/", &body, "translation project creation")
            .await?;
        tracing::info!(
            "Created translation project for '{}' in '{}'",
            project.code,
            language.code
        );
        Ok(tp)
    }

    async fn find_store(
        &self,
        tp: &TranslationProject,
        name: &str,
    ) -> Result<Option<Store>, PootleError> {
        let tp_id = tp_id(tp)?;
        let found = self
            .get_list::<Store>(
                "stores/",
                &[("translation_project", tp_id), ("name__exact", name)],
                "store lookup",
            )
            .await?;
        Ok(found.into_single())
    }

    async fn list_stores(&self, tp: &TranslationProject) -> Result<Vec<Store>, PootleError> {
        let tp_id = tp_id(tp)?;
        let found = self
            .get_list::<Store>("stores/", &[("translation_project", tp_id)], "store listing")
            .await?;
        Ok(found.objects)
    }

    async fn upload_store(
        &self,
        tp: &TranslationProject,
        name: &str,
        content: &str,
    ) -> Result<Store, PootleError> {
        let body = json!({
            "translation_project": tp.resource_uri,
            "name": name,
            "file_content": content,
        });
        self.post_json("stores/", &body, "store upload").await
    }

    async fn download_store(&self, store: &Store) -> Result<String, PootleError> {
        let location = store
            .file
            .as_deref()
            .ok_or_else(|| PootleError::InvalidResponse {
                action: "store download".to_string(),
                message: format!("store {} has no file location", store.resource_uri),
            })?;
        let request = self.client.get(self.url(location)?);
        let response = self.authorize(request).send().await?;
        let response = check_status(response, "store download").await?;
        Ok(response.text().await?)
    }

    async fn find_user(&self, username: &str) -> Result<Option<User>, PootleError> {
        let found = self
            .get_list::<User>("users/", &[("username__exact", username)], "user lookup")
            .await?;
        Ok(found.into_single())
    }

    async fn create_user(&self, username: &str) -> Result<User, PootleError> {
        let body = json!({
            "username": username,
            "email": username,
        });
        let user: User = self.post_json("users/", &body, "user creation").await?;
        tracing::info!("Created user '{}'", username);
        Ok(user)
    }

    async fn grant_permissions(
        &self,
        user: &User,
        project: &Project,
        permissions: &[String],
    ) -> Result<(), PootleError> {
        let body = json!({
            "user": user.resource_uri,
            "project": project.resource_uri,
            "positive_permissions": permissions,
        });
        let request = self.client.post(self.url("permission-sets/")?).json(&body);
        let response = self.authorize(request).send().await?;
        check_status(response, "permission assignment").await?;
        Ok(())
    }
}

fn tp_id(tp: &TranslationProject) -> Result<&str, PootleError> {
    tp.id().ok_or_else(|| PootleError::InvalidResponse {
        action: "store lookup".to_string(),
        message: format!("bad translation project URI '{}'", tp.resource_uri),
    })
}
