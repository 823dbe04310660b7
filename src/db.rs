use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension, Row};
use tracing::{debug, info};

use crate::error::{IngestError, Result};
use crate::models::{DbMessage, DetectionRecord, MessageKey, MessageRecord};
use crate::schema::{image_detections, telegram_messages};
use crate::validation::InputValidator;

// Type alias for the database connection pool
pub type DbPool = Pool<SqliteConnectionManager>;
pub type DbConnection = r2d2::PooledConnection<SqliteConnectionManager>;

/// Database manager for handling connections and operations
#[derive(Clone)]
pub struct Database {
    pool: DbPool,
}

impl Database {
    /// Create a new database connection pool with default sizing
    pub fn new(database_url: &str) -> Result<Self> {
        Self::with_pool_size(database_url, 4)
    }

    /// Create a new database connection pool
    pub fn with_pool_size(database_url: &str, max_connections: u32) -> Result<Self> {
        let path = Self::path_from_url(database_url);

        // Create parent directory if it doesn't exist
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        // Set up connection manager and pool
        let manager =
            SqliteConnectionManager::file(path).with_init(|conn| conn.busy_timeout(Duration::from_secs(5)));
        let pool = Pool::builder().max_size(max_connections).build(manager)?;

        debug!(path, max_connections, "Opened database pool");
        Ok(Self { pool })
    }

    /// Strip an optional `sqlite:` / `sqlite://` scheme from a database URL
    fn path_from_url(database_url: &str) -> &str {
        database_url
            .strip_prefix("sqlite://")
            .or_else(|| database_url.strip_prefix("sqlite:"))
            .unwrap_or(database_url)
    }

    /// Get a connection from the pool
    pub fn get_connection(&self) -> Result<DbConnection> {
        Ok(self.pool.get()?)
    }

    /// Create the raw message table and its uniqueness constraint if absent
    pub fn create_message_schema(&self) -> Result<()> {
        let conn = self.get_connection()?;
        conn.execute_batch(telegram_messages::CREATE)?;
        info!(table = telegram_messages::TABLE, "Message schema ready");
        Ok(())
    }

    /// Create the detection table and its uniqueness constraint if absent
    pub fn create_detection_schema(&self) -> Result<()> {
        let conn = self.get_connection()?;
        conn.execute_batch(image_detections::CREATE)?;
        info!(table = image_detections::TABLE, "Detection schema ready");
        Ok(())
    }

    /// Upsert a batch of message records in a single transaction.
    ///
    /// New keys are inserted. Existing keys only get their counters and
    /// `loaded_at` refreshed; text, media and timestamps are write-once.
    /// Any failure rolls back the whole batch.
    pub fn upsert_messages(&self, records: &[MessageRecord]) -> Result<usize> {
        let mut conn = self.get_connection()?;
        let tx = conn.transaction()?;
        let loaded_at = Utc::now();

        {
            let mut stmt = tx.prepare(&format!(
                "INSERT INTO {table} ({id}, {channel}, {posted}, {text}, {media}, {image}, {views}, {forwards}, {loaded})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT ({id}, {channel}) DO UPDATE SET
                    {views} = excluded.{views},
                    {forwards} = excluded.{forwards},
                    {loaded} = excluded.{loaded}",
                table = telegram_messages::TABLE,
                id = telegram_messages::MESSAGE_ID,
                channel = telegram_messages::CHANNEL_NAME,
                posted = telegram_messages::POSTED_AT,
                text = telegram_messages::TEXT,
                media = telegram_messages::HAS_MEDIA,
                image = telegram_messages::IMAGE_PATH,
                views = telegram_messages::VIEW_COUNT,
                forwards = telegram_messages::FORWARD_COUNT,
                loaded = telegram_messages::LOADED_AT,
            ))?;

            for record in records {
                stmt.execute(params![
                    record.message_id,
                    record.channel_name,
                    record.posted_at,
                    record.text,
                    record.has_media,
                    record.image_path,
                    record.view_count,
                    record.forward_count,
                    loaded_at,
                ])?;
            }
        }

        tx.commit()?;
        Ok(records.len())
    }

    /// Upsert a batch of detection records in a single transaction
    pub fn upsert_detections(&self, records: &[DetectionRecord]) -> Result<usize> {
        let mut conn = self.get_connection()?;
        let tx = conn.transaction()?;

        {
            let mut stmt = tx.prepare(&format!(
                "INSERT INTO {table} ({id}, {channel}, {image}, {class}, {score}, {category}, {all}, {at})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT ({id}, {channel}) DO UPDATE SET
                    {image} = excluded.{image},
                    {class} = excluded.{class},
                    {score} = excluded.{score},
                    {category} = excluded.{category},
                    {all} = excluded.{all},
                    {at} = excluded.{at}",
                table = image_detections::TABLE,
                id = image_detections::MESSAGE_ID,
                channel = image_detections::CHANNEL_NAME,
                image = image_detections::IMAGE_PATH,
                class = image_detections::DETECTED_CLASS,
                score = image_detections::CONFIDENCE_SCORE,
                category = image_detections::IMAGE_CATEGORY,
                all = image_detections::ALL_DETECTIONS,
                at = image_detections::DETECTED_AT,
            ))?;

            for record in records {
                stmt.execute(params![
                    record.message_id,
                    record.channel_name,
                    record.image_path,
                    record.detected_class,
                    record.confidence_score,
                    record.image_category.as_str(),
                    record.all_detections,
                    record.detected_at,
                ])?;
            }
        }

        tx.commit()?;
        Ok(records.len())
    }

    /// Keys of every message that already has a detection row
    pub fn processed_keys(&self) -> Result<HashSet<MessageKey>> {
        let conn = self.get_connection()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {}, {} FROM {}",
            image_detections::MESSAGE_ID,
            image_detections::CHANNEL_NAME,
            image_detections::TABLE
        ))?;

        let keys = stmt
            .query_map([], |row| Ok(MessageKey::new(row.get(0)?, row.get::<_, String>(1)?)))?
            .collect::<rusqlite::Result<HashSet<_>>>()?;

        Ok(keys)
    }

    /// Get a stored message by natural key
    pub fn get_message(&self, key: &MessageKey) -> Result<Option<DbMessage>> {
        let conn = self.get_connection()?;

        let message = conn
            .query_row(
                &format!(
                    "SELECT * FROM {} WHERE {} = ? AND {} = ?",
                    telegram_messages::TABLE,
                    telegram_messages::MESSAGE_ID,
                    telegram_messages::CHANNEL_NAME
                ),
                params![key.message_id, key.channel_name],
                Self::map_db_message,
            )
            .optional()?;

        Ok(message)
    }

    /// Get a stored detection by natural key
    pub fn get_detection(&self, key: &MessageKey) -> Result<Option<DetectionRecord>> {
        let conn = self.get_connection()?;

        let detection = conn
            .query_row(
                &format!(
                    "SELECT * FROM {} WHERE {} = ? AND {} = ?",
                    image_detections::TABLE,
                    image_detections::MESSAGE_ID,
                    image_detections::CHANNEL_NAME
                ),
                params![key.message_id, key.channel_name],
                Self::map_detection,
            )
            .optional()?;

        Ok(detection)
    }

    /// Count rows in a table. Read-only.
    pub fn count_rows(&self, table: &str) -> Result<i64> {
        InputValidator::validate_table_name(table).map_err(|e| IngestError::Validation(e.to_string()))?;
        let conn = self.get_connection()?;

        let quoted = table
            .split('.')
            .map(|part| format!("\"{part}\""))
            .collect::<Vec<_>>()
            .join(".");
        let count = conn.query_row(&format!("SELECT COUNT(*) FROM {quoted}"), [], |row| row.get(0))?;
        Ok(count)
    }

    /// Map a database row to a DbMessage
    fn map_db_message(row: &Row) -> rusqlite::Result<DbMessage> {
        Ok(DbMessage {
            record: MessageRecord {
                message_id: row.get(telegram_messages::MESSAGE_ID)?,
                channel_name: row.get(telegram_messages::CHANNEL_NAME)?,
                posted_at: row.get(telegram_messages::POSTED_AT)?,
                text: row.get(telegram_messages::TEXT)?,
                has_media: row.get(telegram_messages::HAS_MEDIA)?,
                image_path: row.get(telegram_messages::IMAGE_PATH)?,
                view_count: row.get(telegram_messages::VIEW_COUNT)?,
                forward_count: row.get(telegram_messages::FORWARD_COUNT)?,
            },
            loaded_at: row.get::<_, DateTime<Utc>>(telegram_messages::LOADED_AT)?,
        })
    }

    /// Map a database row to a DetectionRecord
    fn map_detection(row: &Row) -> rusqlite::Result<DetectionRecord> {
        let category: String = row.get(image_detections::IMAGE_CATEGORY)?;
        let image_category = category
            .parse()
            .map_err(|e: String| rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, e.into()))?;

        Ok(DetectionRecord {
            message_id: row.get(image_detections::MESSAGE_ID)?,
            channel_name: row.get(image_detections::CHANNEL_NAME)?,
            image_path: row.get(image_detections::IMAGE_PATH)?,
            detected_class: row.get(image_detections::DETECTED_CLASS)?,
            confidence_score: row.get(image_detections::CONFIDENCE_SCORE)?,
            image_category,
            all_detections: row.get(image_detections::ALL_DETECTIONS)?,
            detected_at: row.get(image_detections::DETECTED_AT)?,
        })
    }
}
