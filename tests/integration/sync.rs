use super::*;
use pootle_bridge::models::task::TaskMetadata;
use pootle_bridge::services::sync::{SyncError, TranslationSync};
use tempfile::TempDir;

async fn seed(fake: &Arc<FakePootle>, temp: &TempDir, names: &[&str]) {
    let api: Arc<dyn PootleApi> = fake.clone();
    let importer = Importer::new(api, vec!["view".to_string()]);
    for name in names {
        let path = temp.path().join(name);
        std::fs::write(&path, sample_po(name)).unwrap();
        let meta = TaskMetadata::from_file_name(&path).unwrap();
        importer.import_task(&path, &meta).await.unwrap();
    }
}

fn sync(fake: &Arc<FakePootle>, outbox: &Path) -> TranslationSync {
    let api: Arc<dyn PootleApi> = fake.clone();
    TranslationSync::new(api, TrommonsNotifier::new(outbox.to_path_buf()))
}

#[tokio::test]
async fn test_sync_downloads_every_language() {
    let temp = TempDir::new().unwrap();
    let fake = FakePootle::new();
    seed(&fake, &temp, &["projectA_en_fr_task1.po", "projectA_en_de_task1.po"]).await;
    fake.set_store_content("task1.po", "msgid \"a\"\nmsgstr \"translated\"\n");

    let outbox = temp.path().join("outbox");
    let report = sync(&fake, &outbox).sync_project("projectA", None).await.unwrap();

    assert_eq!(report.languages, vec!["fr", "de"]);
    assert_eq!(report.files.len(), 2);
    let fr = std::fs::read_to_string(outbox.join("projectA/fr/task1.po")).unwrap();
    assert!(fr.contains("translated"));
    assert!(outbox.join("projectA/de/task1.po").exists());

    let notice = TrommonsNotifier::new(outbox)
        .read_notice("projectA")
        .await
        .unwrap()
        .unwrap();
    assert!(notice.completed);
    assert_eq!(
        notice.backlink.as_deref(),
        Some("http://pootle.test/projects/projectA/")
    );
}

#[tokio::test]
async fn test_sync_single_language() {
    let temp = TempDir::new().unwrap();
    let fake = FakePootle::new();
    seed(&fake, &temp, &["projectA_en_fr_task1.po", "projectA_en_de_task1.po"]).await;

    let outbox = temp.path().join("outbox");
    let report = sync(&fake, &outbox)
        .sync_project("projectA", Some("DE"))
        .await
        .unwrap();

    assert_eq!(report.languages, vec!["de"]);
    assert!(!outbox.join("projectA/fr").exists());
}

#[tokio::test]
async fn test_sync_unknown_project_or_language() {
    let temp = TempDir::new().unwrap();
    let fake = FakePootle::new();
    seed(&fake, &temp, &["projectA_en_fr_task1.po"]).await;
    let sync = sync(&fake, &temp.path().join("outbox"));

    assert!(matches!(
        sync.sync_project("nope", None).await,
        Err(SyncError::ProjectNotFound(_))
    ));
    assert!(matches!(
        sync.sync_project("projectA", Some("ja")).await,
        Err(SyncError::LanguageNotFound { .. })
    ));
}
