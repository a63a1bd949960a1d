use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::info;

use super::data::{Credits, GenerationJob, ImageEntity};
use crate::annotate::annotation::Annotation;
use crate::error::Result;

/// Persistence collaborator for image versions and generation jobs
pub trait RecordStore: Send + Sync {
    /// Completed images (stored pixels present), newest first
    fn load_images(&self, limit: Option<usize>) -> Result<Vec<ImageEntity>>;
    fn load_jobs(&self) -> Result<Vec<GenerationJob>>;
    fn upsert_image(&self, image: &ImageEntity) -> Result<()>;
    /// Record the stored result of a finished generation.
    /// Returns false when no placeholder row exists for `id`.
    fn complete_image(
        &self,
        id: &str,
        storage_ref: &str,
        thumbnail_ref: Option<&str>,
        real_width: u32,
        real_height: u32,
    ) -> Result<bool>;
    fn update_display_dimensions(&self, id: &str, width: u32, height: u32) -> Result<()>;
    fn save_annotations(&self, id: &str, annotations: &[Annotation]) -> Result<()>;
    fn delete_image(&self, id: &str) -> Result<()>;
    fn upsert_job(&self, job: &GenerationJob) -> Result<()>;
    fn delete_job(&self, id: &str) -> Result<()>;
}

/// The Library manages the SQLite catalog database.
/// It stores image versions, their annotations, and in-flight generation jobs.
pub struct Library {
    conn: Mutex<Connection>,
    db_path: Option<PathBuf>,
}

const IMAGE_COLUMNS: &str = "id, parent_id, storage_ref, thumbnail_ref, display_width, display_height, \
     real_width, real_height, title, base_name, version, prompt, draft_prompt, annotations_json, \
     is_generating, generation_started_at, estimated_duration_ms, quality, created_at, updated_at";

impl Library {
    /// Open (or create) the catalog at `db_path`
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(db_path)?;
        info!("📁 Catalog opened at: {}", db_path.display());

        let library = Library {
            conn: Mutex::new(conn),
            db_path: Some(db_path.to_path_buf()),
        };
        library.init_schema()?;
        Ok(library)
    }

    /// Throwaway catalog used by tests and previews
    pub fn open_in_memory() -> Result<Self> {
        let library = Library {
            conn: Mutex::new(Connection::open_in_memory()?),
            db_path: None,
        };
        library.init_schema()?;
        Ok(library)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Initialize the database schema.
    /// Creates all necessary tables and indexes if they don't exist.
    fn init_schema(&self) -> Result<()> {
        let conn = self.conn();

        // One row per image version; placeholders have no storage_ref
        conn.execute(
            "CREATE TABLE IF NOT EXISTS images (
                id                      TEXT PRIMARY KEY,
                parent_id               TEXT,
                storage_ref             TEXT,
                thumbnail_ref           TEXT,
                display_width           INTEGER NOT NULL,
                display_height          INTEGER NOT NULL,
                real_width              INTEGER,
                real_height             INTEGER,
                title                   TEXT,
                base_name               TEXT NOT NULL,
                version                 INTEGER NOT NULL DEFAULT 1,
                prompt                  TEXT,
                draft_prompt            TEXT,
                annotations_json        TEXT NOT NULL DEFAULT '[]',
                is_generating           INTEGER NOT NULL DEFAULT 0,
                generation_started_at   INTEGER,
                estimated_duration_ms   INTEGER,
                quality                 TEXT,
                created_at              INTEGER NOT NULL,
                updated_at              INTEGER NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS generation_jobs (
                id              TEXT PRIMARY KEY,
                parent_id       TEXT,
                status          TEXT NOT NULL,
                quality         TEXT NOT NULL,
                cost            INTEGER NOT NULL,
                created_at      INTEGER NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_images_created_at
             ON images(created_at DESC)",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_images_parent_id
             ON images(parent_id)",
            [],
        )?;

        Ok(())
    }

    /// Get the path to the database file
    pub fn path(&self) -> Option<&PathBuf> {
        self.db_path.as_ref()
    }

    /// Get a count of completed images in the library
    pub fn image_count(&self) -> Result<i64> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM images WHERE storage_ref IS NOT NULL",
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Fetch one image regardless of completion state
    pub fn get_image(&self, id: &str) -> Result<Option<ImageEntity>> {
        let conn = self.conn();
        let image = conn
            .query_row(
                &format!("SELECT {} FROM images WHERE id = ?1", IMAGE_COLUMNS),
                params![id],
                image_from_row,
            )
            .optional()?;
        Ok(image)
    }
}

impl RecordStore for Library {
    fn load_images(&self, limit: Option<usize>) -> Result<Vec<ImageEntity>> {
        let conn = self.conn();
        let limit = limit.map_or(-1, |n| n as i64);
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM images
             WHERE storage_ref IS NOT NULL
             ORDER BY created_at DESC
             LIMIT ?1",
            IMAGE_COLUMNS
        ))?;

        let image_iter = stmt.query_map(params![limit], image_from_row)?;

        let mut images = Vec::new();
        for image in image_iter {
            images.push(image?);
        }

        Ok(images)
    }

    fn load_jobs(&self) -> Result<Vec<GenerationJob>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, parent_id, status, quality, cost, created_at
             FROM generation_jobs
             ORDER BY created_at ASC",
        )?;

        let job_iter = stmt.query_map([], |row| {
            let status: String = row.get(2)?;
            let quality: String = row.get(3)?;
            Ok(GenerationJob {
                id: row.get(0)?,
                parent_id: row.get(1)?,
                status: status.parse().map_err(|e: String| conversion_error(2, e))?,
                quality: quality.parse().map_err(|e: String| conversion_error(3, e))?,
                cost: Credits::from_hundredths(row.get(4)?),
                created_at: millis_to_datetime(row.get(5)?, 5)?,
            })
        })?;

        let mut jobs = Vec::new();
        for job in job_iter {
            jobs.push(job?);
        }

        Ok(jobs)
    }

    fn upsert_image(&self, image: &ImageEntity) -> Result<()> {
        let annotations_json = serde_json::to_string(&image.annotations)?;
        self.conn().execute(
            &format!(
                "INSERT OR REPLACE INTO images ({}) VALUES
                 (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20)",
                IMAGE_COLUMNS
            ),
            params![
                image.id,
                image.parent_id,
                image.storage_ref,
                image.thumbnail_ref,
                image.display_width,
                image.display_height,
                image.real_width,
                image.real_height,
                image.title,
                image.base_name,
                image.version,
                image.prompt,
                image.draft_prompt,
                annotations_json,
                image.is_generating,
                image.generation_started_at.map(|t| t.timestamp_millis()),
                image.estimated_duration_ms.map(|ms| ms.min(i64::MAX as u64) as i64),
                image.quality.map(|q| q.as_str()),
                image.created_at.timestamp_millis(),
                image.updated_at.timestamp_millis(),
            ],
        )?;
        Ok(())
    }

    fn complete_image(
        &self,
        id: &str,
        storage_ref: &str,
        thumbnail_ref: Option<&str>,
        real_width: u32,
        real_height: u32,
    ) -> Result<bool> {
        let changed = self.conn().execute(
            "UPDATE images
             SET storage_ref = ?1, thumbnail_ref = ?2, real_width = ?3, real_height = ?4,
                 is_generating = 0, updated_at = ?5
             WHERE id = ?6",
            params![
                storage_ref,
                thumbnail_ref,
                real_width,
                real_height,
                Utc::now().timestamp_millis(),
                id
            ],
        )?;
        Ok(changed > 0)
    }

    fn update_display_dimensions(&self, id: &str, width: u32, height: u32) -> Result<()> {
        self.conn().execute(
            "UPDATE images SET display_width = ?1, display_height = ?2 WHERE id = ?3",
            params![width, height, id],
        )?;
        Ok(())
    }

    fn save_annotations(&self, id: &str, annotations: &[Annotation]) -> Result<()> {
        let json = serde_json::to_string(annotations)?;
        self.conn().execute(
            "UPDATE images SET annotations_json = ?1, updated_at = ?2 WHERE id = ?3",
            params![json, Utc::now().timestamp_millis(), id],
        )?;
        Ok(())
    }

    fn delete_image(&self, id: &str) -> Result<()> {
        self.conn()
            .execute("DELETE FROM images WHERE id = ?1", params![id])?;
        Ok(())
    }

    fn upsert_job(&self, job: &GenerationJob) -> Result<()> {
        self.conn().execute(
            "INSERT OR REPLACE INTO generation_jobs (id, parent_id, status, quality, cost, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                job.id,
                job.parent_id,
                job.status.as_str(),
                job.quality.as_str(),
                job.cost.hundredths(),
                job.created_at.timestamp_millis(),
            ],
        )?;
        Ok(())
    }

    fn delete_job(&self, id: &str) -> Result<()> {
        self.conn()
            .execute("DELETE FROM generation_jobs WHERE id = ?1", params![id])?;
        Ok(())
    }
}

fn image_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ImageEntity> {
    let annotations_json: String = row.get(13)?;
    let annotations: Vec<Annotation> =
        serde_json::from_str(&annotations_json).map_err(|e| conversion_error(13, e))?;
    let quality: Option<String> = row.get(17)?;
    let quality = quality
        .map(|q| q.parse().map_err(|e: String| conversion_error(17, e)))
        .transpose()?;
    let started: Option<i64> = row.get(15)?;
    let estimated: Option<i64> = row.get(16)?;

    Ok(ImageEntity {
        id: row.get(0)?,
        parent_id: row.get(1)?,
        storage_ref: row.get(2)?,
        thumbnail_ref: row.get(3)?,
        display_width: row.get(4)?,
        display_height: row.get(5)?,
        real_width: row.get(6)?,
        real_height: row.get(7)?,
        title: row.get(8)?,
        base_name: row.get(9)?,
        version: row.get(10)?,
        prompt: row.get(11)?,
        draft_prompt: row.get(12)?,
        annotations,
        is_generating: row.get(14)?,
        generation_started_at: started.map(|ms| millis_to_datetime(ms, 15)).transpose()?,
        estimated_duration_ms: estimated.map(|ms| ms.max(0) as u64),
        quality,
        created_at: millis_to_datetime(row.get(18)?, 18)?,
        updated_at: millis_to_datetime(row.get(19)?, 19)?,
    })
}

fn millis_to_datetime(ms: i64, column: usize) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .ok_or_else(|| conversion_error(column, format!("timestamp {} out of range", ms)))
}

fn conversion_error(column: usize, err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, Type::Text, err.into())
}

// Implement Debug for better error messages
impl std::fmt::Debug for Library {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Library")
            .field("db_path", &self.db_path)
            .finish()
    }
}
