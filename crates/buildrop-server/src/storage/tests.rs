//! Storage layer tests.

#![allow(clippy::unwrap_used)]

use buildrop_core::{Platform, ReleaseStatus, SigningType};

use super::db::Database;
use super::models::{DownloadLogEntry, MetadataUpdate, NewApp, NewRelease};
use super::DatabaseError;

async fn seeded_db() -> Database {
    let db = Database::open_in_memory().await.unwrap();
    db.create_app(&NewApp {
        id: "app-1",
        organization_id: "org-1",
        name: "Demo",
        platform: Platform::Ios,
        bundle_id: Some("com.example.demo"),
    })
    .await
    .unwrap();
    db.create_release(&NewRelease {
        id: "rel-1",
        app_id: "app-1",
        version: Some("1.2.0"),
        build_number: None,
        artifact_key: "releases/rel-1.ipa",
    })
    .await
    .unwrap();
    db
}

fn sample_update() -> MetadataUpdate {
    MetadataUpdate {
        version: Some("9.9.9".into()),
        build_number: Some("42".into()),
        file_size: 1024,
        signing_type: SigningType::Adhoc,
        provisioning_profile_name: Some("Demo AdHoc".into()),
        team_name: Some("Example Corp".into()),
        provisioning_expires_at: Some(4_070_908_800),
        extracted_bundle_id: Some("com.example.demo".into()),
        min_os_version: Some("15.0".into()),
        display_name: Some("Demo".into()),
        device_families: vec!["iphone".into()],
        permissions: Vec::new(),
        android_heuristic: false,
    }
}

// === Releases ===

#[tokio::test]
async fn new_release_starts_processing_with_zero_downloads() {
    let db = seeded_db().await;
    let (release, app) = db.get_release_with_app("rel-1").await.unwrap();
    assert_eq!(release.status, ReleaseStatus::Processing);
    assert_eq!(release.download_count, 0);
    assert_eq!(release.signing_type, SigningType::Unknown);
    assert_eq!(app.platform, Platform::Ios);
    assert!(release.device_families.0.is_empty());
}

#[tokio::test]
async fn missing_release_is_not_found() {
    let db = seeded_db().await;
    let err = db.get_release("nope").await.unwrap_err();
    assert!(matches!(err, DatabaseError::NotFound(_)));
}

// === Metadata application ===

#[tokio::test]
async fn apply_metadata_merges_and_marks_ready() {
    let db = seeded_db().await;
    assert!(db.apply_metadata("rel-1", &sample_update()).await.unwrap());

    let release = db.get_release("rel-1").await.unwrap();
    assert_eq!(release.status, ReleaseStatus::Ready);
    // Upload-time version wins; missing build number is filled in.
    assert_eq!(release.version.as_deref(), Some("1.2.0"));
    assert_eq!(release.build_number.as_deref(), Some("42"));
    assert_eq!(release.signing_type, SigningType::Adhoc);
    assert_eq!(release.file_size, Some(1024));
    assert_eq!(release.device_families.0, vec!["iphone".to_string()]);
}

#[tokio::test]
async fn apply_metadata_is_idempotent() {
    let db = seeded_db().await;
    assert!(db.apply_metadata("rel-1", &sample_update()).await.unwrap());

    let mut second = sample_update();
    second.signing_type = SigningType::Development;
    assert!(!db.apply_metadata("rel-1", &second).await.unwrap());

    let release = db.get_release("rel-1").await.unwrap();
    assert_eq!(release.signing_type, SigningType::Adhoc);
}

#[tokio::test]
async fn failed_release_can_be_reprocessed() {
    let db = seeded_db().await;
    assert!(db.mark_failed("rel-1", "artifact missing").await.unwrap());
    let release = db.get_release("rel-1").await.unwrap();
    assert_eq!(release.status, ReleaseStatus::Failed);
    assert_eq!(release.failure_reason.as_deref(), Some("artifact missing"));

    // Terminal states do not move without an explicit reprocess.
    assert!(!db.mark_failed("rel-1", "again").await.unwrap());

    db.mark_processing("rel-1").await.unwrap();
    let release = db.get_release("rel-1").await.unwrap();
    assert_eq!(release.status, ReleaseStatus::Processing);
    assert_eq!(release.failure_reason, None);

    assert!(matches!(
        db.mark_processing("nope").await.unwrap_err(),
        DatabaseError::NotFound(_)
    ));
}

// === Memberships ===

#[tokio::test]
async fn membership_lifecycle() {
    let db = seeded_db().await;
    assert!(!db.is_member("org-1", "user-1").await.unwrap());

    db.add_membership("org-1", "user-1", "tester").await.unwrap();
    db.add_membership("org-1", "user-1", "admin").await.unwrap();
    assert!(db.is_member("org-1", "user-1").await.unwrap());
    assert!(!db.is_member("org-2", "user-1").await.unwrap());

    assert!(db.remove_membership("org-1", "user-1").await.unwrap());
    assert!(!db.is_member("org-1", "user-1").await.unwrap());
}

// === Download accounting ===

#[tokio::test]
async fn record_download_increments_and_logs_together() {
    let db = seeded_db().await;
    let entry = DownloadLogEntry {
        subject_id: "user-1".into(),
        client_ip: Some("203.0.113.7".into()),
        user_agent: Some("iOS/17.4".into()),
    };
    db.record_download("rel-1", Some(&entry)).await.unwrap();

    assert_eq!(db.download_count("rel-1").await.unwrap(), 1);
    let logs = db.list_download_logs("rel-1").await.unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].subject_id, "user-1");
    assert_eq!(logs[0].client_ip.as_deref(), Some("203.0.113.7"));
}

#[tokio::test]
async fn record_download_without_entry_only_counts() {
    let db = seeded_db().await;
    db.record_download("rel-1", None).await.unwrap();
    db.record_download("rel-1", None).await.unwrap();

    assert_eq!(db.download_count("rel-1").await.unwrap(), 2);
    assert!(db.list_download_logs("rel-1").await.unwrap().is_empty());
}

#[tokio::test]
async fn record_download_for_unknown_release_writes_nothing() {
    let db = seeded_db().await;
    let entry = DownloadLogEntry {
        subject_id: "user-1".into(),
        client_ip: None,
        user_agent: None,
    };
    let err = db.record_download("ghost", Some(&entry)).await.unwrap_err();
    assert!(matches!(err, DatabaseError::NotFound(_)));

    let orphans: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM download_logs")
        .fetch_one(db.pool())
        .await
        .unwrap();
    assert_eq!(orphans, 0);
}
