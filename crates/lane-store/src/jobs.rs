//! Persistent job and app store.
//!
//! Owns the `jobs` and `apps` tables. The scheduler and inspector are the
//! only writers of app build fields; the publish coordinator only reads.
//!
//! Transition rules enforced here:
//! - `enqueue` is idempotent while a non-terminal job exists for the
//!   app/platform pair;
//! - `attempts` increments on enqueue only when the prior terminal state
//!   for the pair was FAILED;
//! - `mark_terminal` clears the lock bookkeeping fields.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, TimeZone, Utc};
use lane_protocol::{AppRecord, BuildJob, JobState, Platform};
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

/// Store failures.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sql(#[from] rusqlite::Error),

    #[error("store poisoned")]
    Poisoned,

    #[error("invalid row: {0}")]
    InvalidRow(String),

    #[error("job '{0}' not found")]
    JobNotFound(String),

    #[error("app '{0}' not found")]
    AppNotFound(String),
}

/// Sqlite-backed store for jobs and apps.
#[derive(Clone)]
pub struct JobStore {
    conn: Arc<Mutex<Connection>>,
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS apps (
    app_id            TEXT PRIMARY KEY,
    name              TEXT NOT NULL,
    package_name      TEXT NOT NULL,
    version_code      INTEGER NOT NULL DEFAULT 0,
    website_url       TEXT NOT NULL,
    theme_color       TEXT NOT NULL,
    features_json     TEXT NOT NULL DEFAULT '{}',
    icon_glyph        TEXT,
    publish_token_enc TEXT,
    artifact_path     TEXT,
    artifact_mime     TEXT,
    artifact_size     INTEGER,
    build_logs        TEXT,
    build_error       TEXT,
    last_build_at_ms  INTEGER
);

CREATE TABLE IF NOT EXISTS jobs (
    id            TEXT PRIMARY KEY,
    app_id        TEXT NOT NULL,
    platform      TEXT NOT NULL,
    state         TEXT NOT NULL,
    attempts      INTEGER NOT NULL DEFAULT 1,
    lock_token    TEXT,
    locked_at_ms  INTEGER,
    error         TEXT,
    created_at_ms INTEGER NOT NULL,
    updated_at_ms INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS jobs_by_app ON jobs (app_id, platform, created_at_ms DESC);
";

impl JobStore {
    /// Open (or create) the store at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// In-memory store, for tests and single-shot CLI runs.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    // === Apps ===

    /// Insert or replace an app record.
    pub fn upsert_app(&self, app: &AppRecord) -> Result<(), StoreError> {
        let conn = self.lock()?;
        let features_json = serde_json::to_string(&app.features)
            .map_err(|e| StoreError::InvalidRow(e.to_string()))?;
        conn.execute(
            "INSERT OR REPLACE INTO apps
             (app_id, name, package_name, version_code, website_url, theme_color,
              features_json, icon_glyph, publish_token_enc, artifact_path,
              artifact_mime, artifact_size, build_logs, build_error, last_build_at_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                app.app_id,
                app.name,
                app.package_name,
                app.version_code,
                app.website_url,
                app.theme_color,
                features_json,
                app.icon_glyph,
                app.publish_token_enc,
                app.artifact_path,
                app.artifact_mime,
                app.artifact_size,
                app.build_logs,
                app.build_error,
                app.last_build_at.map(|t| t.timestamp_millis()),
            ],
        )?;
        Ok(())
    }

    /// Fetch an app record.
    pub fn get_app(&self, app_id: &str) -> Result<AppRecord, StoreError> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT app_id, name, package_name, version_code, website_url, theme_color,
                    features_json, icon_glyph, publish_token_enc, artifact_path,
                    artifact_mime, artifact_size, build_logs, build_error, last_build_at_ms
             FROM apps WHERE app_id = ?1",
            params![app_id],
            app_from_row,
        )
        .optional()?
        .ok_or_else(|| StoreError::AppNotFound(app_id.to_string()))
    }

    /// Record a successful build's artifact on the app row.
    pub fn record_artifact(
        &self,
        app_id: &str,
        path: &str,
        mime: &str,
        size: i64,
        logs: Option<&str>,
    ) -> Result<(), StoreError> {
        let conn = self.lock()?;
        let updated = conn.execute(
            "UPDATE apps SET artifact_path = ?2, artifact_mime = ?3, artifact_size = ?4,
                             build_logs = ?5, build_error = NULL, last_build_at_ms = ?6
             WHERE app_id = ?1",
            params![app_id, path, mime, size, logs, Utc::now().timestamp_millis()],
        )?;
        if updated == 0 {
            return Err(StoreError::AppNotFound(app_id.to_string()));
        }
        Ok(())
    }

    /// Record a failed build on the app row. The previous artifact fields
    /// are left intact; the last good binary stays downloadable.
    pub fn record_build_failure(
        &self,
        app_id: &str,
        error: &str,
        logs: Option<&str>,
    ) -> Result<(), StoreError> {
        let conn = self.lock()?;
        let updated = conn.execute(
            "UPDATE apps SET build_error = ?2, build_logs = ?3, last_build_at_ms = ?4
             WHERE app_id = ?1",
            params![app_id, error, logs, Utc::now().timestamp_millis()],
        )?;
        if updated == 0 {
            return Err(StoreError::AppNotFound(app_id.to_string()));
        }
        Ok(())
    }

    /// Record the version code that was just published. Version codes must
    /// strictly increase across successive published releases.
    pub fn record_published_version(&self, app_id: &str, version_code: i64) -> Result<(), StoreError> {
        let conn = self.lock()?;
        let updated = conn.execute(
            "UPDATE apps SET version_code = ?2 WHERE app_id = ?1 AND version_code < ?2",
            params![app_id, version_code],
        )?;
        if updated == 0 {
            return Err(StoreError::InvalidRow(format!(
                "published version_code {} does not advance app '{}'",
                version_code, app_id
            )));
        }
        Ok(())
    }

    // === Jobs ===

    /// Create (or return the existing non-terminal) job for an
    /// app/platform pair.
    pub fn enqueue(&self, app_id: &str, platform: Platform) -> Result<BuildJob, StoreError> {
        let conn = self.lock()?;

        // An open job for the pair is returned as-is; enqueue is idempotent.
        if let Some(open) = conn
            .query_row(
                "SELECT id, app_id, platform, state, attempts, lock_token, locked_at_ms,
                        error, created_at_ms, updated_at_ms
                 FROM jobs
                 WHERE app_id = ?1 AND platform = ?2 AND state IN ('QUEUED', 'RUNNING')
                 ORDER BY created_at_ms DESC LIMIT 1",
                params![app_id, platform.as_str()],
                job_from_row,
            )
            .optional()?
        {
            return Ok(open);
        }

        let prior: Option<(String, u32)> = conn
            .query_row(
                "SELECT state, attempts FROM jobs
                 WHERE app_id = ?1 AND platform = ?2
                 ORDER BY created_at_ms DESC LIMIT 1",
                params![app_id, platform.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        // Attempts continue counting only across failed retries.
        let attempts = match prior {
            Some((state, prior_attempts)) if state == "FAILED" => prior_attempts + 1,
            _ => 1,
        };

        let now = Utc::now();
        let job = BuildJob {
            id: Uuid::new_v4().to_string(),
            app_id: app_id.to_string(),
            platform,
            state: JobState::Queued,
            attempts,
            lock_token: None,
            locked_at: None,
            error: None,
            created_at: now,
            updated_at: now,
        };
        conn.execute(
            "INSERT INTO jobs (id, app_id, platform, state, attempts, created_at_ms, updated_at_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                job.id,
                job.app_id,
                job.platform.as_str(),
                job.state.as_str(),
                job.attempts,
                now.timestamp_millis(),
                now.timestamp_millis(),
            ],
        )?;
        Ok(job)
    }

    /// Transition a job to RUNNING, recording the held lock token.
    pub fn mark_running(&self, job_id: &str, lock_token: &str) -> Result<(), StoreError> {
        let conn = self.lock()?;
        let now_ms = Utc::now().timestamp_millis();
        let updated = conn.execute(
            "UPDATE jobs SET state = 'RUNNING', lock_token = ?2, locked_at_ms = ?3,
                             updated_at_ms = ?3
             WHERE id = ?1",
            params![job_id, lock_token, now_ms],
        )?;
        if updated == 0 {
            return Err(StoreError::JobNotFound(job_id.to_string()));
        }
        Ok(())
    }

    /// Transition a job to a terminal state and clear lock bookkeeping.
    pub fn mark_terminal(
        &self,
        job_id: &str,
        outcome: JobState,
        error: Option<&str>,
    ) -> Result<(), StoreError> {
        debug_assert!(outcome.is_terminal());
        let conn = self.lock()?;
        let updated = conn.execute(
            "UPDATE jobs SET state = ?2, error = ?3, lock_token = NULL, locked_at_ms = NULL,
                             updated_at_ms = ?4
             WHERE id = ?1",
            params![job_id, outcome.as_str(), error, Utc::now().timestamp_millis()],
        )?;
        if updated == 0 {
            return Err(StoreError::JobNotFound(job_id.to_string()));
        }
        Ok(())
    }

    /// Fetch a job by id.
    pub fn get_job(&self, job_id: &str) -> Result<BuildJob, StoreError> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT id, app_id, platform, state, attempts, lock_token, locked_at_ms,
                    error, created_at_ms, updated_at_ms
             FROM jobs WHERE id = ?1",
            params![job_id],
            job_from_row,
        )
        .optional()?
        .ok_or_else(|| StoreError::JobNotFound(job_id.to_string()))
    }

    /// Most recent job for an app/platform pair, if any.
    pub fn latest_job(&self, app_id: &str, platform: Platform) -> Result<Option<BuildJob>, StoreError> {
        let conn = self.lock()?;
        Ok(conn
            .query_row(
                "SELECT id, app_id, platform, state, attempts, lock_token, locked_at_ms,
                        error, created_at_ms, updated_at_ms
                 FROM jobs WHERE app_id = ?1 AND platform = ?2
                 ORDER BY created_at_ms DESC LIMIT 1",
                params![app_id, platform.as_str()],
                job_from_row,
            )
            .optional()?)
    }
}

fn ms_to_datetime(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
}

fn job_from_row(row: &Row<'_>) -> rusqlite::Result<BuildJob> {
    let platform: String = row.get(2)?;
    let state: String = row.get(3)?;
    let locked_at_ms: Option<i64> = row.get(6)?;
    Ok(BuildJob {
        id: row.get(0)?,
        app_id: row.get(1)?,
        platform: Platform::parse(&platform).unwrap_or(Platform::Web),
        state: JobState::parse(&state).unwrap_or(JobState::Failed),
        attempts: row.get(4)?,
        lock_token: row.get(5)?,
        locked_at: locked_at_ms.map(ms_to_datetime),
        error: row.get(7)?,
        created_at: ms_to_datetime(row.get(8)?),
        updated_at: ms_to_datetime(row.get(9)?),
    })
}

fn app_from_row(row: &Row<'_>) -> rusqlite::Result<AppRecord> {
    let features_json: String = row.get(6)?;
    let features: BTreeMap<String, String> =
        serde_json::from_str(&features_json).unwrap_or_default();
    let last_build_at_ms: Option<i64> = row.get(14)?;
    Ok(AppRecord {
        app_id: row.get(0)?,
        name: row.get(1)?,
        package_name: row.get(2)?,
        version_code: row.get(3)?,
        website_url: row.get(4)?,
        theme_color: row.get(5)?,
        features,
        icon_glyph: row.get(7)?,
        publish_token_enc: row.get(8)?,
        artifact_path: row.get(9)?,
        artifact_mime: row.get(10)?,
        artifact_size: row.get(11)?,
        build_logs: row.get(12)?,
        build_error: row.get(13)?,
        last_build_at: last_build_at_ms.map(ms_to_datetime),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_app(app_id: &str) -> JobStore {
        let store = JobStore::open_in_memory().unwrap();
        let app = AppRecord::new(app_id, "Demo", "com.example.demo", "https://demo.example");
        store.upsert_app(&app).unwrap();
        store
    }

    #[test]
    fn test_enqueue_creates_queued_job() {
        let store = store_with_app("app-1");
        let job = store.enqueue("app-1", Platform::Android).unwrap();
        assert_eq!(job.state, JobState::Queued);
        assert_eq!(job.attempts, 1);
        assert!(job.lock_token.is_none());
    }

    #[test]
    fn test_enqueue_is_idempotent_while_open() {
        let store = store_with_app("app-1");
        let first = store.enqueue("app-1", Platform::Android).unwrap();
        let second = store.enqueue("app-1", Platform::Android).unwrap();
        assert_eq!(first.id, second.id);

        store.mark_running(&first.id, "tok").unwrap();
        let third = store.enqueue("app-1", Platform::Android).unwrap();
        assert_eq!(first.id, third.id);
    }

    #[test]
    fn test_attempts_increment_only_after_failure() {
        let store = store_with_app("app-1");

        let j1 = store.enqueue("app-1", Platform::Android).unwrap();
        store.mark_terminal(&j1.id, JobState::Failed, Some("boom")).unwrap();

        let j2 = store.enqueue("app-1", Platform::Android).unwrap();
        assert_eq!(j2.attempts, 2);
        store.mark_terminal(&j2.id, JobState::Succeeded, None).unwrap();

        // After success the counter resets.
        let j3 = store.enqueue("app-1", Platform::Android).unwrap();
        assert_eq!(j3.attempts, 1);
    }

    #[test]
    fn test_platforms_track_attempts_independently() {
        let store = store_with_app("app-1");

        let android = store.enqueue("app-1", Platform::Android).unwrap();
        store
            .mark_terminal(&android.id, JobState::Failed, Some("boom"))
            .unwrap();

        let web = store.enqueue("app-1", Platform::Web).unwrap();
        assert_eq!(web.attempts, 1);
    }

    #[test]
    fn test_mark_terminal_clears_lock_fields() {
        let store = store_with_app("app-1");
        let job = store.enqueue("app-1", Platform::Android).unwrap();

        store.mark_running(&job.id, "tok-123").unwrap();
        let running = store.get_job(&job.id).unwrap();
        assert_eq!(running.state, JobState::Running);
        assert_eq!(running.lock_token.as_deref(), Some("tok-123"));
        assert!(running.locked_at.is_some());

        store.mark_terminal(&job.id, JobState::Succeeded, None).unwrap();
        let done = store.get_job(&job.id).unwrap();
        assert_eq!(done.state, JobState::Succeeded);
        assert!(done.lock_token.is_none());
        assert!(done.locked_at.is_none());
    }

    #[test]
    fn test_record_artifact_and_failure() {
        let store = store_with_app("app-1");

        store
            .record_artifact("app-1", "/tmp/app.aab", "application/octet-stream", 1234, Some("ok"))
            .unwrap();
        let app = store.get_app("app-1").unwrap();
        assert_eq!(app.artifact_path.as_deref(), Some("/tmp/app.aab"));
        assert_eq!(app.artifact_size, Some(1234));
        assert!(app.build_error.is_none());
        assert!(app.last_build_at.is_some());

        store
            .record_build_failure("app-1", "gradle exploded", None)
            .unwrap();
        let app = store.get_app("app-1").unwrap();
        assert_eq!(app.build_error.as_deref(), Some("gradle exploded"));
        // Prior artifact survives a failed rebuild.
        assert_eq!(app.artifact_path.as_deref(), Some("/tmp/app.aab"));
    }

    #[test]
    fn test_published_version_must_advance() {
        let store = store_with_app("app-1");
        store.record_published_version("app-1", 12).unwrap();
        assert!(store.record_published_version("app-1", 12).is_err());
        assert!(store.record_published_version("app-1", 11).is_err());
        store.record_published_version("app-1", 13).unwrap();
        assert_eq!(store.get_app("app-1").unwrap().version_code, 13);
    }

    #[test]
    fn test_missing_rows_surface_typed_errors() {
        let store = JobStore::open_in_memory().unwrap();
        assert!(matches!(
            store.get_app("ghost"),
            Err(StoreError::AppNotFound(_))
        ));
        assert!(matches!(
            store.get_job("ghost"),
            Err(StoreError::JobNotFound(_))
        ));
        assert!(store.latest_job("ghost", Platform::Web).unwrap().is_none());
    }
}
