//! Database queries.

use buildrop_core::ReleaseStatus;
use buildrop_core::db::{DatabaseError, unix_timestamp};
use sqlx::types::Json;

use super::db::Database;
use super::models::{
    App, DownloadLog, DownloadLogEntry, MetadataUpdate, NewApp, NewRelease, Release,
};

impl Database {
    // =========================================================================
    // Apps and releases
    // =========================================================================

    pub async fn create_app(&self, app: &NewApp<'_>) -> Result<App, DatabaseError> {
        sqlx::query(
            "INSERT INTO apps (id, organization_id, name, platform, bundle_id, created_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(app.id)
        .bind(app.organization_id)
        .bind(app.name)
        .bind(app.platform)
        .bind(app.bundle_id)
        .bind(unix_timestamp())
        .execute(self.pool())
        .await?;

        self.get_app(app.id).await
    }

    pub async fn get_app(&self, id: &str) -> Result<App, DatabaseError> {
        sqlx::query_as::<_, App>("SELECT * FROM apps WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("App {id}")))
    }

    /// Insert a release in the `processing` state.
    pub async fn create_release(&self, release: &NewRelease<'_>) -> Result<Release, DatabaseError> {
        let now = unix_timestamp();

        sqlx::query(
            "INSERT INTO releases (id, app_id, version, build_number, artifact_key, status, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(release.id)
        .bind(release.app_id)
        .bind(release.version)
        .bind(release.build_number)
        .bind(release.artifact_key)
        .bind(ReleaseStatus::Processing)
        .bind(now)
        .bind(now)
        .execute(self.pool())
        .await?;

        self.get_release(release.id).await
    }

    pub async fn get_release(&self, id: &str) -> Result<Release, DatabaseError> {
        sqlx::query_as::<_, Release>("SELECT * FROM releases WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("Release {id}")))
    }

    /// A release together with the app it belongs to.
    pub async fn get_release_with_app(&self, id: &str) -> Result<(Release, App), DatabaseError> {
        let release = self.get_release(id).await?;
        let app = self.get_app(&release.app_id).await?;
        Ok((release, app))
    }

    // =========================================================================
    // Introspection state machine
    // =========================================================================

    /// Apply introspected metadata and move the release to `ready`.
    ///
    /// Only a release still in `processing` is touched, so delivering the
    /// same result twice is a no-op. Upload-time version and build number
    /// win over archive values. Returns whether a row was updated.
    pub async fn apply_metadata(
        &self,
        release_id: &str,
        update: &MetadataUpdate,
    ) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            "UPDATE releases SET
                status = ?,
                failure_reason = NULL,
                version = COALESCE(NULLIF(TRIM(version), ''), ?),
                build_number = COALESCE(NULLIF(TRIM(build_number), ''), ?),
                file_size = ?,
                signing_type = ?,
                provisioning_profile_name = ?,
                team_name = ?,
                provisioning_expires_at = ?,
                extracted_bundle_id = ?,
                min_os_version = ?,
                display_name = ?,
                device_families = ?,
                permissions = ?,
                android_heuristic = ?,
                updated_at = ?
             WHERE id = ? AND status = ?",
        )
        .bind(ReleaseStatus::Ready)
        .bind(&update.version)
        .bind(&update.build_number)
        .bind(update.file_size)
        .bind(update.signing_type)
        .bind(&update.provisioning_profile_name)
        .bind(&update.team_name)
        .bind(update.provisioning_expires_at)
        .bind(&update.extracted_bundle_id)
        .bind(&update.min_os_version)
        .bind(&update.display_name)
        .bind(Json(&update.device_families))
        .bind(Json(&update.permissions))
        .bind(update.android_heuristic)
        .bind(unix_timestamp())
        .bind(release_id)
        .bind(ReleaseStatus::Processing)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Move a `processing` release to `failed`. Returns whether it moved.
    pub async fn mark_failed(&self, release_id: &str, reason: &str) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            "UPDATE releases SET status = ?, failure_reason = ?, updated_at = ? WHERE id = ? AND status = ?",
        )
        .bind(ReleaseStatus::Failed)
        .bind(reason)
        .bind(unix_timestamp())
        .bind(release_id)
        .bind(ReleaseStatus::Processing)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Put a release back into `processing` so introspection runs again.
    pub async fn mark_processing(&self, release_id: &str) -> Result<(), DatabaseError> {
        let result = sqlx::query(
            "UPDATE releases SET status = ?, failure_reason = NULL, updated_at = ? WHERE id = ?",
        )
        .bind(ReleaseStatus::Processing)
        .bind(unix_timestamp())
        .bind(release_id)
        .execute(self.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound(format!("Release {release_id}")));
        }
        Ok(())
    }

    // =========================================================================
    // Memberships
    // =========================================================================

    pub async fn add_membership(
        &self,
        organization_id: &str,
        user_id: &str,
        role: &str,
    ) -> Result<(), DatabaseError> {
        sqlx::query(
            "INSERT INTO memberships (organization_id, user_id, role, created_at) VALUES (?, ?, ?, ?)
             ON CONFLICT (organization_id, user_id) DO UPDATE SET role = excluded.role",
        )
        .bind(organization_id)
        .bind(user_id)
        .bind(role)
        .bind(unix_timestamp())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn remove_membership(
        &self,
        organization_id: &str,
        user_id: &str,
    ) -> Result<bool, DatabaseError> {
        let result =
            sqlx::query("DELETE FROM memberships WHERE organization_id = ? AND user_id = ?")
                .bind(organization_id)
                .bind(user_id)
                .execute(self.pool())
                .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn is_member(
        &self,
        organization_id: &str,
        user_id: &str,
    ) -> Result<bool, DatabaseError> {
        let found: Option<i64> = sqlx::query_scalar(
            "SELECT 1 FROM memberships WHERE organization_id = ? AND user_id = ?",
        )
        .bind(organization_id)
        .bind(user_id)
        .fetch_optional(self.pool())
        .await?;
        Ok(found.is_some())
    }

    // =========================================================================
    // Download accounting
    // =========================================================================

    /// Count one completed download and, when given, append its log row.
    ///
    /// Both writes share one transaction: either the counter and the log
    /// row are stored together or neither is.
    pub async fn record_download(
        &self,
        release_id: &str,
        entry: Option<&DownloadLogEntry>,
    ) -> Result<(), DatabaseError> {
        let now = unix_timestamp();
        let mut tx = self.pool().begin().await?;

        let result = sqlx::query(
            "UPDATE releases SET download_count = download_count + 1 WHERE id = ?",
        )
        .bind(release_id)
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound(format!("Release {release_id}")));
        }

        if let Some(entry) = entry {
            sqlx::query(
                "INSERT INTO download_logs (release_id, subject_id, client_ip, user_agent, created_at) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(release_id)
            .bind(&entry.subject_id)
            .bind(&entry.client_ip)
            .bind(&entry.user_agent)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn download_count(&self, release_id: &str) -> Result<i64, DatabaseError> {
        sqlx::query_scalar("SELECT download_count FROM releases WHERE id = ?")
            .bind(release_id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("Release {release_id}")))
    }

    pub async fn list_download_logs(
        &self,
        release_id: &str,
    ) -> Result<Vec<DownloadLog>, DatabaseError> {
        let logs = sqlx::query_as::<_, DownloadLog>(
            "SELECT * FROM download_logs WHERE release_id = ? ORDER BY id",
        )
        .bind(release_id)
        .fetch_all(self.pool())
        .await?;
        Ok(logs)
    }
}
