// tests/unit/processor_test.rs
//! Entry resolution through the public API; nothing here reaches Pootle

use pootle_bridge::models::task::TaskLayout;
use pootle_bridge::services::importer::{ImportError, Importer};
use pootle_bridge::services::pootle_client::{PootleApi, PootleAuth, PootleClient};
use pootle_bridge::services::processor::ImportProcessor;
use std::fs;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

// ============================================
// Test Data Factories
// ============================================

fn bundle_meta_json(filename: &str) -> String {
    serde_json::json!({
        "title": "Brochure",
        "description": "Leaflet",
        "source_code": "en",
        "source_name": "English",
        "target_code": "de",
        "target_name": "German",
        "assignee_id": "translator1",
        "backlink": "http://trommons.test/task/31",
        "translation_filename": filename,
        "task_id": 31,
    })
    .to_string()
}

fn offline_processor() -> ImportProcessor {
    let client = PootleClient::new(
        "http://127.0.0.1:9/api/v1/",
        PootleAuth::Basic {
            username: "u".to_string(),
            password: "p".to_string(),
        },
        Duration::from_secs(1),
    )
    .unwrap();
    let api: Arc<dyn PootleApi> = Arc::new(client);
    ImportProcessor::new(Arc::new(Importer::new(api, vec!["view".to_string()])), None)
}

// ============================================
// Resolution
// ============================================

#[tokio::test]
async fn test_resolve_single_file() {
    let temp = TempDir::new().unwrap();
    let entry = temp.path().join("projectA_en_fr_task1.po");
    fs::write(&entry, "msgid \"\"\nmsgstr \"\"\n").unwrap();

    let source = offline_processor().resolve(&entry).await.unwrap();
    assert_eq!(source.layout, TaskLayout::File);
    assert_eq!(source.entry, entry);
    assert_eq!(source.file_path, entry);
    assert_eq!(source.metadata.unit_name, "task1.po");
}

#[tokio::test]
async fn test_resolve_bundle() {
    let temp = TempDir::new().unwrap();
    let entry = temp.path().join("task-31");
    fs::create_dir(&entry).unwrap();
    fs::write(entry.join("meta.json"), bundle_meta_json("leaflet.xlf")).unwrap();
    fs::write(entry.join("leaflet.xlf"), "<xliff/>").unwrap();

    let source = offline_processor().resolve(&entry).await.unwrap();
    assert_eq!(source.layout, TaskLayout::Bundle);
    assert_eq!(source.file_path, entry.join("leaflet.xlf"));
    assert_eq!(source.metadata.project_code, "task-31");
    assert_eq!(source.metadata.target_language, "de");
    assert_eq!(source.metadata.task_id, Some(31));
}

#[tokio::test]
async fn test_bundle_needs_matching_file() {
    let temp = TempDir::new().unwrap();
    let entry = temp.path().join("task-31");
    fs::create_dir(&entry).unwrap();
    fs::write(entry.join("meta.json"), bundle_meta_json("leaflet.xlf")).unwrap();
    fs::write(entry.join("other.xlf"), "<xliff/>").unwrap();

    let err = offline_processor().resolve(&entry).await.unwrap_err();
    assert!(matches!(err, ImportError::InvalidMetadata(_)));
}

#[tokio::test]
async fn test_bundle_with_two_files() {
    let temp = TempDir::new().unwrap();
    let entry = temp.path().join("task-31");
    fs::create_dir(&entry).unwrap();
    fs::write(entry.join("meta.json"), bundle_meta_json("leaflet.xlf")).unwrap();
    fs::write(entry.join("leaflet.xlf"), "<xliff/>").unwrap();
    fs::write(entry.join("extra.po"), "msgid \"\"").unwrap();

    let err = offline_processor().resolve(&entry).await.unwrap_err();
    assert!(matches!(err, ImportError::InvalidMetadata(ref m) if m.contains("more than one")));
}

#[tokio::test]
async fn test_bundle_without_meta() {
    let temp = TempDir::new().unwrap();
    let entry = temp.path().join("task-31");
    fs::create_dir(&entry).unwrap();
    fs::write(entry.join("leaflet.xlf"), "<xliff/>").unwrap();

    let err = offline_processor().resolve(&entry).await.unwrap_err();
    assert!(matches!(err, ImportError::Incomplete(_)));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_bundle_still_being_filled() {
    let temp = TempDir::new().unwrap();
    let entry = temp.path().join("task-31");
    fs::create_dir(&entry).unwrap();

    let processor = offline_processor();
    let err = processor.resolve(&entry).await.unwrap_err();
    assert!(matches!(err, ImportError::Incomplete(_)));

    fs::write(entry.join("meta.json"), bundle_meta_json("leaflet.xlf")).unwrap();
    let err = processor.resolve(&entry).await.unwrap_err();
    assert!(matches!(err, ImportError::Incomplete(ref m) if m.contains("no translation file")));

    fs::write(entry.join("leaflet.xlf.part"), "<xli").unwrap();
    let err = processor.resolve(&entry).await.unwrap_err();
    assert_eq!(err.tag(), "Incomplete");

    fs::rename(entry.join("leaflet.xlf.part"), entry.join("leaflet.xlf")).unwrap();
    let source = processor.resolve(&entry).await.unwrap();
    assert_eq!(source.file_path, entry.join("leaflet.xlf"));
}

#[tokio::test]
async fn test_vanished_entry_is_io() {
    let temp = TempDir::new().unwrap();
    let err = offline_processor()
        .resolve(&temp.path().join("projectA_en_fr_gone.po"))
        .await
        .unwrap_err();
    assert!(matches!(err, ImportError::Io { .. }));
}

#[tokio::test]
async fn test_bad_name_fails_before_any_request() {
    let temp = TempDir::new().unwrap();
    let entry = temp.path().join("readme.txt");
    fs::write(&entry, "hello").unwrap();

    // The server at port 9 is never reached; a network attempt would be RemoteUnavailable
    let err = offline_processor().process(&entry).await.unwrap_err();
    assert!(matches!(err, ImportError::InvalidMetadata(_)));
}
