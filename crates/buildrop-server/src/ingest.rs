//! Artifact introspection pipeline.
//!
//! A release starts in `processing`. Introspection either runs inline with
//! the request that triggered it or on a background worker fed by a bounded
//! channel. Both paths go through [`Ingestor::process_with_retry`], and the
//! final write is conditional on the release still being `processing`, so a
//! job delivered twice changes nothing the second time.

use std::sync::Arc;
use std::time::Duration;

use buildrop_core::ReleaseStatus;
use buildrop_core::config::{IngestConfig, IngestMode};
use buildrop_inspect::ArtifactMetadata;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;

use crate::blob::{BlobError, BlobStore};
use crate::storage::{Database, DatabaseError, MetadataUpdate};

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Storage(#[from] BlobError),

    #[error("introspection task failed: {0}")]
    Task(String),

    #[error("ingest queue is closed")]
    QueueClosed,
}

impl IngestError {
    /// Whether another attempt could succeed.
    const fn is_transient(&self) -> bool {
        !matches!(self, Self::Database(DatabaseError::NotFound(_)) | Self::QueueClosed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Metadata written and the release moved to `ready`.
    Applied,
    /// The release had already left `processing`; nothing written.
    AlreadyApplied,
    /// The artifact is not in storage; the release moved to `failed`.
    ArtifactMissing,
}

/// Exponential backoff between ingest attempts.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay after the given failed attempt (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.initial_delay
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max_delay)
    }
}

/// Build the row update for an introspection result.
pub fn metadata_update(metadata: ArtifactMetadata, file_size: usize) -> MetadataUpdate {
    MetadataUpdate {
        version: metadata.version,
        build_number: metadata.build_number,
        file_size: i64::try_from(file_size).unwrap_or(i64::MAX),
        signing_type: metadata.signing_type,
        provisioning_profile_name: metadata.provisioning_profile_name,
        team_name: metadata.team_name,
        provisioning_expires_at: metadata.provisioning_expires_at,
        extracted_bundle_id: metadata.bundle_id,
        min_os_version: metadata.min_os_version,
        display_name: metadata.display_name,
        device_families: metadata.device_families,
        permissions: metadata.permissions,
        android_heuristic: metadata.android_heuristic,
    }
}

pub struct Ingestor {
    db: Database,
    blobs: Arc<dyn BlobStore>,
    retry: RetryPolicy,
}

impl Ingestor {
    pub fn new(db: Database, blobs: Arc<dyn BlobStore>, retry: RetryPolicy) -> Self {
        Self { db, blobs, retry }
    }

    /// Introspect one release's artifact and record the result.
    pub async fn process(&self, release_id: &str) -> Result<IngestOutcome, IngestError> {
        let (release, app) = self.db.get_release_with_app(release_id).await?;
        if release.status != ReleaseStatus::Processing {
            return Ok(IngestOutcome::AlreadyApplied);
        }

        let data = match self.blobs.get(&release.artifact_key).await {
            Ok(data) => data,
            Err(BlobError::NotFound(key)) => {
                tracing::warn!(release_id, key = %key, "Artifact missing from storage");
                self.db
                    .mark_failed(release_id, "Artifact not found in storage")
                    .await?;
                return Ok(IngestOutcome::ArtifactMissing);
            }
            Err(e) => return Err(e.into()),
        };

        let file_size = data.len();
        let platform = app.platform;
        let metadata =
            tokio::task::spawn_blocking(move || buildrop_inspect::introspect(&data, platform))
                .await
                .map_err(|e| IngestError::Task(e.to_string()))?;

        if metadata.android_heuristic {
            tracing::info!(
                release_id,
                bundle_id = ?metadata.bundle_id,
                "Package name guessed from binary manifest"
            );
        }

        let update = metadata_update(metadata, file_size);
        if self.db.apply_metadata(release_id, &update).await? {
            tracing::info!(
                release_id,
                signing_type = %update.signing_type,
                file_size,
                "Release metadata applied"
            );
            Ok(IngestOutcome::Applied)
        } else {
            Ok(IngestOutcome::AlreadyApplied)
        }
    }

    /// [`process`](Self::process) with backoff. When every attempt fails the
    /// release is marked `failed` with the last error.
    pub async fn process_with_retry(&self, release_id: &str) -> Result<IngestOutcome, IngestError> {
        let mut attempt: u32 = 0;
        loop {
            match self.process(release_id).await {
                Ok(outcome) => return Ok(outcome),
                Err(e) => {
                    attempt = attempt.saturating_add(1);
                    if !e.is_transient() || attempt >= self.retry.max_attempts {
                        tracing::error!(release_id, attempt, error = %e, "Ingest failed");
                        if e.is_transient() {
                            let reason = format!("Introspection failed: {e}");
                            if let Err(db_err) = self.db.mark_failed(release_id, &reason).await {
                                tracing::error!(release_id, error = %db_err, "Could not mark release failed");
                            }
                        }
                        return Err(e);
                    }
                    let delay = self.retry.delay_for_attempt(attempt - 1);
                    tracing::warn!(
                        release_id,
                        attempt,
                        delay_ms = delay.as_millis(),
                        error = %e,
                        "Ingest attempt failed; retrying"
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct IngestJob {
    pub release_id: String,
}

/// Result of handing a release to the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submitted {
    Completed(IngestOutcome),
    Queued,
}

/// Entry point handlers use to start introspection.
#[derive(Clone)]
pub enum IngestHandle {
    Inline(Arc<Ingestor>),
    Queued(mpsc::Sender<IngestJob>),
}

impl IngestHandle {
    pub async fn submit(&self, release_id: &str) -> Result<Submitted, IngestError> {
        match self {
            Self::Inline(ingestor) => ingestor
                .process_with_retry(release_id)
                .await
                .map(Submitted::Completed),
            Self::Queued(tx) => {
                tx.send(IngestJob {
                    release_id: release_id.to_string(),
                })
                .await
                .map_err(|_| IngestError::QueueClosed)?;
                tracing::debug!(release_id, "Ingest job queued");
                Ok(Submitted::Queued)
            }
        }
    }
}

/// Start the background worker. It runs until every handle is dropped.
pub fn spawn_worker(ingestor: Arc<Ingestor>, capacity: usize) -> (IngestHandle, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<IngestJob>(capacity.max(1));
    let worker = tokio::spawn(async move {
        tracing::info!(capacity, "Ingest worker started");
        while let Some(job) = rx.recv().await {
            match ingestor.process_with_retry(&job.release_id).await {
                Ok(outcome) => {
                    tracing::info!(release_id = %job.release_id, ?outcome, "Ingest job acknowledged");
                }
                Err(e) => {
                    tracing::error!(release_id = %job.release_id, error = %e, "Ingest job dropped");
                }
            }
        }
        tracing::info!("Ingest worker stopped");
    });
    (IngestHandle::Queued(tx), worker)
}

/// Build the handle for the configured mode. The worker handle is `None`
/// for inline ingest.
pub fn from_config(
    config: &IngestConfig,
    db: Database,
    blobs: Arc<dyn BlobStore>,
) -> (IngestHandle, Option<JoinHandle<()>>) {
    let ingestor = Arc::new(Ingestor::new(
        db,
        blobs,
        RetryPolicy {
            max_attempts: config.max_attempts.max(1),
            ..RetryPolicy::default()
        },
    ));
    match config.mode {
        IngestMode::Inline => (IngestHandle::Inline(ingestor), None),
        IngestMode::Queued => {
            let (handle, worker) = spawn_worker(ingestor, config.queue_capacity);
            (handle, Some(worker))
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::io::Write;

    use buildrop_core::{Platform, SigningType};
    use bytes::Bytes;
    use zip::write::SimpleFileOptions;

    use super::*;
    use crate::blob::FilesystemStore;
    use crate::storage::{NewApp, NewRelease};

    const INFO: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<plist version="1.0"><dict>
  <key>CFBundleIdentifier</key><string>com.example.demo</string>
  <key>CFBundleShortVersionString</key><string>3.1.0</string>
  <key>CFBundleVersion</key><string>77</string>
</dict></plist>"#;

    fn ipa() -> Bytes {
        let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
        writer
            .start_file("Payload/Demo.app/Info.plist", SimpleFileOptions::default())
            .unwrap();
        writer.write_all(INFO.as_bytes()).unwrap();
        Bytes::from(writer.finish().unwrap().into_inner())
    }

    async fn setup(with_artifact: bool) -> (Ingestor, Database, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_in_memory().await.unwrap();
        db.create_app(&NewApp {
            id: "app-1",
            organization_id: "org-1",
            name: "Demo",
            platform: Platform::Ios,
            bundle_id: None,
        })
        .await
        .unwrap();
        db.create_release(&NewRelease {
            id: "rel-1",
            app_id: "app-1",
            version: None,
            build_number: None,
            artifact_key: "rel-1.ipa",
        })
        .await
        .unwrap();

        let store = FilesystemStore::new(dir.path());
        if with_artifact {
            store.put("rel-1.ipa", ipa()).await.unwrap();
        }
        let retry = RetryPolicy {
            max_attempts: 2,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(1),
        };
        (Ingestor::new(db.clone(), Arc::new(store), retry), db, dir)
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
        };
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(350));
        assert_eq!(policy.delay_for_attempt(40), Duration::from_millis(350));
    }

    #[tokio::test]
    async fn applies_metadata_once() {
        let (ingestor, db, _dir) = setup(true).await;

        assert_eq!(ingestor.process("rel-1").await.unwrap(), IngestOutcome::Applied);
        let release = db.get_release("rel-1").await.unwrap();
        assert_eq!(release.status, ReleaseStatus::Ready);
        assert_eq!(release.extracted_bundle_id.as_deref(), Some("com.example.demo"));
        assert_eq!(release.version.as_deref(), Some("3.1.0"));
        assert_eq!(release.build_number.as_deref(), Some("77"));
        assert_eq!(release.signing_type, SigningType::Unknown);
        assert!(release.file_size.unwrap() > 0);

        assert_eq!(
            ingestor.process("rel-1").await.unwrap(),
            IngestOutcome::AlreadyApplied
        );
    }

    #[tokio::test]
    async fn missing_artifact_fails_release() {
        let (ingestor, db, _dir) = setup(false).await;
        assert_eq!(
            ingestor.process_with_retry("rel-1").await.unwrap(),
            IngestOutcome::ArtifactMissing
        );
        let release = db.get_release("rel-1").await.unwrap();
        assert_eq!(release.status, ReleaseStatus::Failed);
        assert!(release.failure_reason.is_some());
    }

    #[tokio::test]
    async fn unknown_release_is_not_retried() {
        let (ingestor, _db, _dir) = setup(true).await;
        let err = ingestor.process_with_retry("nope").await.unwrap_err();
        assert!(matches!(err, IngestError::Database(DatabaseError::NotFound(_))));
    }

    #[tokio::test]
    async fn queued_worker_processes_jobs() {
        let (ingestor, db, _dir) = setup(true).await;
        let (handle, worker) = spawn_worker(Arc::new(ingestor), 4);

        assert_eq!(handle.submit("rel-1").await.unwrap(), Submitted::Queued);
        drop(handle);
        worker.await.unwrap();

        let release = db.get_release("rel-1").await.unwrap();
        assert_eq!(release.status, ReleaseStatus::Ready);
    }

    #[tokio::test]
    async fn inline_handle_reports_outcome() {
        let (ingestor, _db, _dir) = setup(true).await;
        let handle = IngestHandle::Inline(Arc::new(ingestor));
        assert_eq!(
            handle.submit("rel-1").await.unwrap(),
            Submitted::Completed(IngestOutcome::Applied)
        );
    }
}
