//! Persistence collaborator for completed-session records.
//!
//! The engine only depends on the [`SessionStore`] contract; the SQLite
//! implementation here is one collaborator the application can hand it.

use std::{
    path::{Path, PathBuf},
    sync::{mpsc, Arc, Mutex},
    thread::{self, JoinHandle},
};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{error, info};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

mod migrations;

use crate::session::SessionCategory;
use migrations::run_migrations;

/// One completed session, as handed to the persistence collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub id: String,
    pub focus_level: u8,
    pub duration_minutes: f64,
    pub completed_at: DateTime<Utc>,
    /// User rating, 1 through 5.
    pub rating: Option<u8>,
    pub notes: Option<String>,
    pub frequency_label: String,
    pub brainwave_label: String,
    pub category: SessionCategory,
}

/// Append/read contract the playback controller consumes. Failures surface
/// to the caller; the controller never retries.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Appends one completed session. Also raises the saved focus level when
    /// the record's level exceeds it, so progress to a deeper level sticks.
    async fn append_session_record(&self, record: &SessionRecord) -> Result<()>;

    /// The user's saved focus level, used to pick a default tone
    /// configuration when none is supplied explicitly.
    async fn read_current_focus_level(&self) -> Result<u8>;
}

type DbTask = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

enum DbCommand {
    Execute(DbTask),
    Shutdown,
}

struct DatabaseInner {
    sender: mpsc::Sender<DbCommand>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for DatabaseInner {
    fn drop(&mut self) {
        let mut guard = match self.worker.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(handle) = guard.take() {
            if let Err(err) = self.sender.send(DbCommand::Shutdown) {
                error!("Failed to send shutdown to DB thread: {err}");
            }
            if let Err(join_err) = handle.join() {
                error!("Failed to join DB thread: {join_err:?}");
            }
        }
    }
}

fn parse_datetime(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| anyhow!("invalid datetime '{value}': {err}"))
}

fn category_from_str(value: &str) -> Result<SessionCategory> {
    match value {
        "focus" => Ok(SessionCategory::Focus),
        "relaxation" => Ok(SessionCategory::Relaxation),
        "creativity" => Ok(SessionCategory::Creativity),
        "sleep" => Ok(SessionCategory::Sleep),
        _ => Err(anyhow!("unknown session category '{value}'")),
    }
}

/// SQLite-backed session store. The connection lives on a worker thread and
/// callers post closures to it, so no async executor ever blocks on disk IO.
#[derive(Clone)]
pub struct Database {
    inner: Arc<DatabaseInner>,
    db_path: Arc<PathBuf>,
}

impl Database {
    pub fn new(db_path: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create database directory {}", parent.display())
            })?;
        }

        let (command_tx, command_rx) = mpsc::channel::<DbCommand>();
        let (ready_tx, ready_rx) = mpsc::channel();
        let path_for_thread = db_path.clone();

        let worker = thread::Builder::new()
            .name("entrain-db".into())
            .spawn(move || {
                let mut conn = match Connection::open(&path_for_thread) {
                    Ok(connection) => connection,
                    Err(err) => {
                        let _ = ready_tx.send(Err(anyhow::Error::new(err)
                            .context("failed to open SQLite database")));
                        return;
                    }
                };

                if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
                    error!("Failed to enable WAL mode: {err}");
                }
                if let Err(err) = conn.pragma_update(None, "foreign_keys", "ON") {
                    error!("Failed to enable foreign keys: {err}");
                }

                let init_result =
                    run_migrations(&mut conn).context("failed to run database migrations");
                if ready_tx.send(init_result).is_err() {
                    error!("DB initialization receiver dropped before ready signal");
                    return;
                }

                while let Ok(command) = command_rx.recv() {
                    match command {
                        DbCommand::Execute(task) => {
                            task(&mut conn);
                        }
                        DbCommand::Shutdown => break,
                    }
                }

                info!("Database thread shutting down");
            })
            .with_context(|| "failed to spawn database worker thread")?;

        ready_rx
            .recv()
            .context("database worker exited before signaling readiness")??;

        let db = Self {
            inner: Arc::new(DatabaseInner {
                sender: command_tx,
                worker: Mutex::new(Some(worker)),
            }),
            db_path: Arc::new(db_path),
        };
        info!("Database initialized at {}", db.path().display());

        Ok(db)
    }

    pub fn path(&self) -> &Path {
        self.db_path.as_path()
    }

    async fn execute<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let sender = self.inner.sender.clone();
        let (reply_tx, reply_rx) = oneshot::channel();

        let command = DbCommand::Execute(Box::new(move |conn| {
            let result = task(conn);
            if reply_tx.send(result).is_err() {
                error!("DB caller dropped before receiving result");
            }
        }));

        sender
            .send(command)
            .map_err(|err| anyhow!("failed to send command to DB thread: {err}"))?;

        reply_rx
            .await
            .map_err(|_| anyhow!("database thread terminated unexpectedly"))?
    }

    /// Completed sessions, most recent first.
    pub async fn session_history(&self, limit: u32) -> Result<Vec<SessionRecord>> {
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, focus_level, duration_minutes, completed_at, rating, notes,
                        frequency_label, brainwave_label, category
                 FROM session_records
                 ORDER BY completed_at DESC
                 LIMIT ?1",
            )?;

            let mut rows = stmt.query(params![limit])?;
            let mut records = Vec::new();
            while let Some(row) = rows.next()? {
                records.push(SessionRecord {
                    id: row.get(0)?,
                    focus_level: row.get::<_, i64>(1)? as u8,
                    duration_minutes: row.get(2)?,
                    completed_at: parse_datetime(&row.get::<_, String>(3)?)?,
                    rating: row.get::<_, Option<i64>>(4)?.map(|r| r as u8),
                    notes: row.get(5)?,
                    frequency_label: row.get(6)?,
                    brainwave_label: row.get(7)?,
                    category: category_from_str(&row.get::<_, String>(8)?)?,
                });
            }

            Ok(records)
        })
        .await
    }

    /// Updates the profile's saved focus level, e.g. after the user
    /// progresses to a deeper level.
    pub async fn set_current_focus_level(&self, level: u8) -> Result<()> {
        self.execute(move |conn| {
            conn.execute(
                "UPDATE profile SET current_focus_level = ?1 WHERE id = 1",
                params![i64::from(level)],
            )
            .with_context(|| "failed to update current focus level")?;
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl SessionStore for Database {
    async fn append_session_record(&self, record: &SessionRecord) -> Result<()> {
        let record = record.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO session_records
                 (id, focus_level, duration_minutes, completed_at, rating, notes,
                  frequency_label, brainwave_label, category)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    record.id,
                    i64::from(record.focus_level),
                    record.duration_minutes,
                    record.completed_at.to_rfc3339(),
                    record.rating.map(i64::from),
                    record.notes,
                    record.frequency_label,
                    record.brainwave_label,
                    record.category.as_str(),
                ],
            )
            .with_context(|| "failed to insert session record")?;

            // Completing a deeper level than the saved one counts as
            // progress; the level never moves back down.
            conn.execute(
                "UPDATE profile SET current_focus_level = ?1
                 WHERE id = 1 AND current_focus_level < ?1",
                params![i64::from(record.focus_level)],
            )
            .with_context(|| "failed to raise current focus level")?;
            Ok(())
        })
        .await
    }

    async fn read_current_focus_level(&self) -> Result<u8> {
        self.execute(|conn| {
            let level: i64 = conn
                .query_row("SELECT current_focus_level FROM profile WHERE id = 1", [], |row| {
                    row.get(0)
                })
                .with_context(|| "failed to read current focus level")?;
            Ok(level as u8)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn record(focus_level: u8, minutes: f64) -> SessionRecord {
        SessionRecord {
            id: Uuid::new_v4().to_string(),
            focus_level,
            duration_minutes: minutes,
            completed_at: Utc::now(),
            rating: Some(4),
            notes: Some("deep and quiet".into()),
            frequency_label: "10 Hz".into(),
            brainwave_label: "Alpha".into(),
            category: SessionCategory::Relaxation,
        }
    }

    fn temp_db() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Database::new(dir.path().join("entrain.sqlite3")).expect("open db");
        (dir, db)
    }

    #[tokio::test]
    async fn append_then_read_back() {
        let (_dir, db) = temp_db();
        let rec = record(3, 20.0);
        db.append_session_record(&rec).await.expect("append");

        let history = db.session_history(10).await.expect("history");
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].focus_level, 3);
        assert_eq!(history[0].duration_minutes, 20.0);
        assert_eq!(history[0].rating, Some(4));
        assert_eq!(history[0].category, SessionCategory::Relaxation);
    }

    #[tokio::test]
    async fn history_is_most_recent_first() {
        let (_dir, db) = temp_db();
        let mut older = record(1, 15.0);
        older.completed_at = Utc::now() - chrono::Duration::hours(2);
        db.append_session_record(&older).await.expect("append older");
        db.append_session_record(&record(10, 25.0))
            .await
            .expect("append newer");

        let history = db.session_history(10).await.expect("history");
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].focus_level, 10);
        assert_eq!(history[1].focus_level, 1);
    }

    #[tokio::test]
    async fn focus_level_defaults_to_one() {
        let (_dir, db) = temp_db();
        assert_eq!(db.read_current_focus_level().await.expect("read"), 1);
    }

    #[tokio::test]
    async fn focus_level_roundtrips_across_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("entrain.sqlite3");

        {
            let db = Database::new(path.clone()).expect("open db");
            db.set_current_focus_level(12).await.expect("set");
        }

        let db = Database::new(path).expect("reopen db");
        assert_eq!(db.read_current_focus_level().await.expect("read"), 12);
    }

    #[tokio::test]
    async fn appending_a_deeper_level_raises_saved_focus_level() {
        let (_dir, db) = temp_db();
        db.append_session_record(&record(12, 30.0)).await.expect("append");
        assert_eq!(db.read_current_focus_level().await.expect("read"), 12);

        // A shallower session afterwards never moves the level back down.
        db.append_session_record(&record(3, 20.0)).await.expect("append");
        assert_eq!(db.read_current_focus_level().await.expect("read"), 12);
    }

    #[tokio::test]
    async fn record_without_rating_or_notes() {
        let (_dir, db) = temp_db();
        let mut rec = record(21, 40.0);
        rec.rating = None;
        rec.notes = None;
        db.append_session_record(&rec).await.expect("append");

        let history = db.session_history(1).await.expect("history");
        assert_eq!(history[0].rating, None);
        assert_eq!(history[0].notes, None);
    }
}
