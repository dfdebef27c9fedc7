use pootle_bridge::models::pootle::{NewProject, Project, Store, TranslationProject};
use pootle_bridge::services::pootle_client::{PootleApi, PootleAuth, PootleClient, PootleError};
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{basic_auth, body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer) -> PootleClient {
    PootleClient::new(
        &format!("{}/api/v1/", server.uri()),
        PootleAuth::Basic {
            username: "admin".to_string(),
            password: "secret".to_string(),
        },
        Duration::from_secs(5),
    )
    .unwrap()
}

fn list(objects: serde_json::Value) -> serde_json::Value {
    let count = objects.as_array().map(|a| a.len()).unwrap_or(0);
    json!({"meta": {"total_count": count, "limit": 20, "offset": 0}, "objects": objects})
}

fn tp() -> TranslationProject {
    TranslationProject {
        resource_uri: "/api/v1/translation-projects/4/".to_string(),
        project: "/api/v1/projects/1/".to_string(),
        language: "/api/v1/languages/2/".to_string(),
        pootle_path: Some("/fr/projectA/".to_string()),
    }
}

#[tokio::test]
async fn test_find_language_found() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v1/languages/"))
        .and(query_param("code__iexact", "fr"))
        .and(basic_auth("admin", "secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(list(json!([
            {"code": "fr", "fullname": "French", "resource_uri": "/api/v1/languages/2/"}
        ]))))
        .mount(&mock_server)
        .await;

    let language = client(&mock_server).find_language("fr").await.unwrap().unwrap();
    assert_eq!(language.code, "fr");
    assert_eq!(language.resource_uri, "/api/v1/languages/2/");
}

#[tokio::test]
async fn test_find_project_missing() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v1/projects/"))
        .and(query_param("code__exact", "projectA"))
        .respond_with(ResponseTemplate::new(200).set_body_json(list(json!([]))))
        .mount(&mock_server)
        .await;

    let project = client(&mock_server).find_project("projectA").await.unwrap();
    assert!(project.is_none());
}

#[tokio::test]
async fn test_create_project() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/v1/projects/"))
        .and(body_partial_json(json!({
            "code": "projectA",
            "source_language": "/api/v1/languages/1/"
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "code": "projectA",
            "fullname": "projectA",
            "resource_uri": "/api/v1/projects/7/",
            "backlink": "http://pootle.test/projects/projectA/"
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let project = client(&mock_server)
        .create_project(&NewProject {
            code: "projectA".to_string(),
            fullname: "projectA".to_string(),
            description: String::new(),
            source_language: "/api/v1/languages/1/".to_string(),
            translation_projects: vec![],
        })
        .await
        .unwrap();

    assert_eq!(project.resource_uri, "/api/v1/projects/7/");
    assert_eq!(
        project.backlink.as_deref(),
        Some("http://pootle.test/projects/projectA/")
    );
}

#[tokio::test]
async fn test_status_mapping() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v1/projects/"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/users/"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/users/"))
        .respond_with(ResponseTemplate::new(409).set_body_string("user exists"))
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/languages/"))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad code"))
        .mount(&mock_server)
        .await;

    let client = client(&mock_server);

    let err = client.find_project("projectA").await.unwrap_err();
    assert!(matches!(err, PootleError::Unauthorized { status: 401, .. }));

    let err = client.find_user("translator1").await.unwrap_err();
    assert!(matches!(err, PootleError::Unavailable { status: 503, .. }));
    assert!(err.is_transient());

    let err = client.create_user("translator1").await.unwrap_err();
    assert!(matches!(err, PootleError::Conflict { ref message, .. } if message == "user exists"));

    let err = client.create_language("x y", "Bad").await.unwrap_err();
    assert!(matches!(err, PootleError::Rejected { status: 400, .. }));
    assert!(!err.is_transient());
}

#[tokio::test]
async fn test_invalid_json_body() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v1/languages/"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
        .mount(&mock_server)
        .await;

    let err = client(&mock_server).find_language("fr").await.unwrap_err();
    assert!(matches!(err, PootleError::InvalidResponse { .. }));
}

#[tokio::test]
async fn test_find_store_uses_translation_project_id() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v1/stores/"))
        .and(query_param("translation_project", "4"))
        .and(query_param("name__exact", "task1.po"))
        .respond_with(ResponseTemplate::new(200).set_body_json(list(json!([{
            "resource_uri": "/api/v1/stores/9/",
            "name": "task1.po",
            "translation_project": "/api/v1/translation-projects/4/",
            "pootle_path": "/fr/projectA/task1.po"
        }]))))
        .mount(&mock_server)
        .await;

    let store = client(&mock_server)
        .find_store(&tp(), "task1.po")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(store.resource_uri, "/api/v1/stores/9/");
}

#[tokio::test]
async fn test_upload_store_sends_content() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/v1/stores/"))
        .and(body_partial_json(json!({
            "translation_project": "/api/v1/translation-projects/4/",
            "name": "task1.po",
            "file_content": "msgid \"a\"\nmsgstr \"\"\n"
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "resource_uri": "/api/v1/stores/9/",
            "name": "task1.po",
            "translation_project": "/api/v1/translation-projects/4/"
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let store = client(&mock_server)
        .upload_store(&tp(), "task1.po", "msgid \"a\"\nmsgstr \"\"\n")
        .await
        .unwrap();
    assert_eq!(store.name, "task1.po");
}

#[tokio::test]
async fn test_download_store_follows_file_location() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/export/fr/projectA/task1.po"))
        .respond_with(ResponseTemplate::new(200).set_body_string("msgid \"a\"\nmsgstr \"b\"\n"))
        .mount(&mock_server)
        .await;

    let store = Store {
        resource_uri: "/api/v1/stores/9/".to_string(),
        name: "task1.po".to_string(),
        translation_project: "/api/v1/translation-projects/4/".to_string(),
        pootle_path: Some("/fr/projectA/task1.po".to_string()),
        file: Some("/export/fr/projectA/task1.po".to_string()),
    };
    let content = client(&mock_server).download_store(&store).await.unwrap();
    assert!(content.contains("msgstr \"b\""));
}

#[tokio::test]
async fn test_grant_permissions() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/v1/permission-sets/"))
        .and(body_partial_json(json!({
            "user": "/api/v1/users/3/",
            "project": "/api/v1/projects/7/",
            "positive_permissions": ["view", "translate"]
        })))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&mock_server)
        .await;

    let user = pootle_bridge::models::pootle::User {
        username: "translator1".to_string(),
        resource_uri: "/api/v1/users/3/".to_string(),
    };
    let project = Project {
        code: "projectA".to_string(),
        fullname: None,
        resource_uri: "/api/v1/projects/7/".to_string(),
        backlink: None,
    };
    client(&mock_server)
        .grant_permissions(&user, &project, &["view".to_string(), "translate".to_string()])
        .await
        .unwrap();
}

#[tokio::test]
async fn test_api_key_header() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v1/languages/"))
        .and(header("Authorization", "ApiKey admin:0123abcd"))
        .respond_with(ResponseTemplate::new(200).set_body_json(list(json!([]))))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = PootleClient::new(
        &format!("{}/api/v1", mock_server.uri()),
        PootleAuth::ApiKey {
            username: "admin".to_string(),
            key: "0123abcd".to_string(),
        },
        Duration::from_secs(5),
    )
    .unwrap();
    client.check_auth().await.unwrap();
}

#[tokio::test]
async fn test_timeout_is_transient() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v1/languages/"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(list(json!([])))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&mock_server)
        .await;

    let client = PootleClient::new(
        &format!("{}/api/v1/", mock_server.uri()),
        PootleAuth::Basic {
            username: "admin".to_string(),
            password: "secret".to_string(),
        },
        Duration::from_millis(200),
    )
    .unwrap();

    let err = client.check_auth().await.unwrap_err();
    assert!(matches!(err, PootleError::HttpError(_)));
    assert!(err.is_transient());
}
