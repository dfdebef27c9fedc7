// Full path through the HTTP client against a mocked Pootle
use super::*;
use pootle_bridge::services::pootle_client::PootleClient;
use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn list(objects: serde_json::Value) -> serde_json::Value {
    let count = objects.as_array().map(|a| a.len()).unwrap_or(0);
    json!({"meta": {"total_count": count}, "objects": objects})
}

async fn mount_languages(server: &MockServer) {
    for (id, code) in [(1, "en"), (2, "fr")] {
        Mock::given(method("GET"))
            .and(path("/api/v1/languages/"))
            .and(query_param("code__iexact", code))
            .respond_with(ResponseTemplate::new(200).set_body_json(list(json!([
                {"code": code, "resource_uri": format!("/api/v1/languages/{}/", id)}
            ]))))
            .mount(server)
            .await;
    }
}

fn watcher_for(server: &MockServer, temp: &TempDir) -> (Config, ImportWatcher) {
    let mut config = test_config(temp.path());
    config.api_url = format!("{}/api/v1/", server.uri());
    std::fs::create_dir_all(&config.inbox_dir).unwrap();

    let api: Arc<dyn PootleApi> = Arc::new(PootleClient::from_config(&config).unwrap());
    let settings = WatcherSettings::from_config(&config).unwrap();
    let watcher = ImportWatcher::new(settings, create_processor(&config, api));
    (config, watcher)
}

#[tokio::test]
async fn test_new_project_is_created_and_uploaded() {
    let server = MockServer::start().await;
    let temp = TempDir::new().unwrap();
    mount_languages(&server).await;

    Mock::given(method("GET"))
        .and(path("/api/v1/projects/"))
        .and(query_param("code__exact", "projectA"))
        .respond_with(ResponseTemplate::new(200).set_body_json(list(json!([]))))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/projects/"))
        .and(body_partial_json(json!({"code": "projectA", "source_language": "/api/v1/languages/1/"})))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "code": "projectA",
            "resource_uri": "/api/v1/projects/7/",
            "backlink": "http://pootle.test/projects/projectA/"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/translation-projects/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(list(json!([]))))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/translation-projects/"))
        .and(body_partial_json(json!({"project": "/api/v1/projects/7/", "language": "/api/v1/languages/2/"})))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "resource_uri": "/api/v1/translation-projects/4/",
            "project": "/api/v1/projects/7/",
            "language": "/api/v1/languages/2/",
            "pootle_path": "/fr/projectA/"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/stores/"))
        .and(query_param("translation_project", "4"))
        .respond_with(ResponseTemplate::new(200).set_body_json(list(json!([]))))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/stores/"))
        .and(body_partial_json(json!({"name": "task1.po"})))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "resource_uri": "/api/v1/stores/9/",
            "name": "task1.po",
            "translation_project": "/api/v1/translation-projects/4/"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let (config, watcher) = watcher_for(&server, &temp);
    let entry = config.inbox_dir.join("projectA_en_fr_task1.po");
    std::fs::write(&entry, sample_po("hello")).unwrap();

    let summary = watcher
        .run(ChannelEventSource::closed(), std::future::pending::<()>())
        .await
        .unwrap();

    assert_eq!(summary.imported, 1);
    assert!(!entry.exists());

    let notice = TrommonsNotifier::new(config.outbox_dir.clone().unwrap())
        .read_notice("projectA")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        notice.backlink.as_deref(),
        Some("http://pootle.test/projects/projectA/")
    );
}

#[tokio::test]
async fn test_server_error_leaves_entry_and_creates_nothing() {
    let server = MockServer::start().await;
    let temp = TempDir::new().unwrap();
    mount_languages(&server).await;

    Mock::given(method("GET"))
        .and(path("/api/v1/projects/"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(201))
        .expect(0)
        .mount(&server)
        .await;

    let (config, watcher) = watcher_for(&server, &temp);
    let entry = config.inbox_dir.join("projectA_en_fr_task1.po");
    std::fs::write(&entry, sample_po("hello")).unwrap();

    let summary = watcher
        .run(ChannelEventSource::closed(), std::future::pending::<()>())
        .await
        .unwrap();

    assert_eq!(summary.retained, 1);
    assert!(entry.exists());
    assert!(std::fs::read_dir(&config.quarantine_dir).unwrap().next().is_none());
}
