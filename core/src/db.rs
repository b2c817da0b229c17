use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::Local;
use rusqlite::{Connection, OptionalExtension, params};

use crate::error::{StoreError, StoreResult};
use crate::models::{BodyPart, Exercise, WorkoutLog};
use crate::store::{AccountBatch, AccountStore, Listener, ListenerRegistry, Subscription};

/// Stored credentials for the local identity provider.
#[derive(Debug, Clone, PartialEq)]
pub struct AccountRow {
    pub email: String,
    pub user_id: String,
    /// PHC-format hash string; carries its own salt and parameters.
    pub password_hash: String,
}

/// SQLite-backed account store.
///
/// Exercises are one row per `(user_id, id)`; the workout log is one JSON
/// document per user.
pub struct Database {
    conn: Mutex<Connection>,
    listeners: ListenerRegistry,
}

impl Database {
    pub fn open(path: &Path) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        tracing::debug!(path = %path.display(), "opened database");
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> StoreResult<Self> {
        migrate(&conn)?;
        Ok(Database {
            conn: Mutex::new(conn),
            listeners: ListenerRegistry::new(),
        })
    }

    fn conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }

    fn notify(&self, user_id: &str) {
        self.listeners
            .publish_with(user_id, || self.snapshot(user_id));
    }

    // --- User Settings ---

    pub fn set_setting(&self, key: &str, value: &str) -> StoreResult<()> {
        let now = Local::now().to_rfc3339();
        self.conn()?.execute(
            "INSERT INTO user_settings (key, value, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, now],
        )?;
        Ok(())
    }

    pub fn get_setting(&self, key: &str) -> StoreResult<Option<String>> {
        let value = self
            .conn()?
            .query_row(
                "SELECT value FROM user_settings WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    // --- Accounts ---

    /// Insert a new account. Returns `false` if the email is already taken.
    pub fn insert_account(&self, account: &AccountRow) -> StoreResult<bool> {
        let now = Local::now().to_rfc3339();
        let rows = self.conn()?.execute(
            "INSERT INTO accounts (email, user_id, password_hash, created_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(email) DO NOTHING",
            params![account.email, account.user_id, account.password_hash, now],
        )?;
        Ok(rows > 0)
    }

    pub fn find_account(&self, email: &str) -> StoreResult<Option<AccountRow>> {
        let account = self
            .conn()?
            .query_row(
                "SELECT email, user_id, password_hash FROM accounts WHERE email = ?1",
                params![email],
                |row| {
                    Ok(AccountRow {
                        email: row.get(0)?,
                        user_id: row.get(1)?,
                        password_hash: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(account)
    }

    pub fn update_password(&self, email: &str, password_hash: &str) -> StoreResult<bool> {
        let rows = self.conn()?.execute(
            "UPDATE accounts SET password_hash = ?1 WHERE email = ?2",
            params![password_hash, email],
        )?;
        Ok(rows > 0)
    }
}

fn migrate(conn: &Connection) -> StoreResult<()> {
    let version: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

    if version < 1 {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS exercises (
                user_id TEXT NOT NULL,
                id TEXT NOT NULL,
                name TEXT NOT NULL,
                body_part TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                emoji TEXT,
                is_custom INTEGER,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (user_id, id)
            );

            CREATE TABLE IF NOT EXISTS workout_logs (
                user_id TEXT PRIMARY KEY NOT NULL,
                document TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS user_settings (
                key TEXT PRIMARY KEY NOT NULL,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
            );

            PRAGMA user_version = 1;",
        )?;
    }

    if version < 2 {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS accounts (
                email TEXT PRIMARY KEY NOT NULL,
                user_id TEXT NOT NULL UNIQUE,
                password_hash TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            PRAGMA user_version = 2;",
        )?;
    }

    Ok(())
}

// --- Row mapping helpers ---

fn exercise_from_row(row: &rusqlite::Row) -> rusqlite::Result<Exercise> {
    let body_part: String = row.get(2)?;
    let body_part = body_part.parse::<BodyPart>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, e.into())
    })?;
    Ok(Exercise {
        id: row.get(0)?,
        name: row.get(1)?,
        body_part,
        description: row.get(3)?,
        emoji: row.get(4)?,
        is_custom: row.get(5)?,
    })
}

fn upsert_exercise(conn: &Connection, user_id: &str, exercise: &Exercise, now: &str) -> StoreResult<()> {
    if exercise.id.trim().is_empty() {
        return Err(StoreError::Invalid("exercise id must not be empty".into()));
    }
    conn.execute(
        "INSERT INTO exercises (user_id, id, name, body_part, description, emoji, is_custom, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT(user_id, id) DO UPDATE SET
            name = excluded.name,
            body_part = excluded.body_part,
            description = excluded.description,
            emoji = excluded.emoji,
            is_custom = excluded.is_custom,
            updated_at = excluded.updated_at",
        params![
            user_id,
            exercise.id,
            exercise.name,
            exercise.body_part.as_str(),
            exercise.description,
            exercise.emoji,
            exercise.is_custom,
            now,
        ],
    )?;
    Ok(())
}

fn write_log_document(conn: &Connection, user_id: &str, log: &WorkoutLog, now: &str) -> StoreResult<()> {
    let document = serde_json::to_string(&log.clone().normalized())
        .map_err(|e| StoreError::malformed(format!("workout log for {user_id}"), e))?;
    conn.execute(
        "INSERT INTO workout_logs (user_id, document, updated_at)
         VALUES (?1, ?2, ?3)
         ON CONFLICT(user_id) DO UPDATE SET document = excluded.document, updated_at = excluded.updated_at",
        params![user_id, document, now],
    )?;
    Ok(())
}

impl AccountStore for Database {
    fn get_exercises(&self, user_id: &str) -> StoreResult<Vec<Exercise>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, name, body_part, description, emoji, is_custom
             FROM exercises WHERE user_id = ?1 ORDER BY rowid",
        )?;
        let exercises = stmt
            .query_map(params![user_id], exercise_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(exercises)
    }

    fn get_workout_log(&self, user_id: &str) -> StoreResult<WorkoutLog> {
        let document: Option<String> = self
            .conn()?
            .query_row(
                "SELECT document FROM workout_logs WHERE user_id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()?;
        match document {
            Some(doc) => serde_json::from_str::<WorkoutLog>(&doc)
                .map(WorkoutLog::normalized)
                .map_err(|e| StoreError::malformed(format!("workout log for {user_id}"), e)),
            None => Ok(WorkoutLog::new()),
        }
    }

    fn put_exercise(&self, user_id: &str, exercise: &Exercise) -> StoreResult<()> {
        {
            let conn = self.conn()?;
            upsert_exercise(&conn, user_id, exercise, &Local::now().to_rfc3339())?;
        }
        self.notify(user_id);
        Ok(())
    }

    fn delete_exercise(&self, user_id: &str, exercise_id: &str) -> StoreResult<bool> {
        let rows = self.conn()?.execute(
            "DELETE FROM exercises WHERE user_id = ?1 AND id = ?2",
            params![user_id, exercise_id],
        )?;
        if rows > 0 {
            self.notify(user_id);
        }
        Ok(rows > 0)
    }

    fn put_workout_log(&self, user_id: &str, log: &WorkoutLog) -> StoreResult<()> {
        {
            let conn = self.conn()?;
            write_log_document(&conn, user_id, log, &Local::now().to_rfc3339())?;
        }
        self.notify(user_id);
        Ok(())
    }

    fn is_initialized(&self, user_id: &str) -> StoreResult<bool> {
        let exists: bool = self.conn()?.query_row(
            "SELECT EXISTS(SELECT 1 FROM workout_logs WHERE user_id = ?1)",
            params![user_id],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    fn commit(&self, user_id: &str, batch: &AccountBatch) -> StoreResult<()> {
        {
            let mut conn = self.conn()?;
            let tx = conn.transaction()?;
            let now = Local::now().to_rfc3339();
            for exercise in &batch.exercises {
                upsert_exercise(&tx, user_id, exercise, &now)?;
            }
            write_log_document(&tx, user_id, &batch.workout_log, &now)?;
            tx.commit()?;
        }
        tracing::debug!(
            user_id,
            exercises = batch.exercises.len(),
            days = batch.workout_log.len(),
            "committed account batch"
        );
        self.notify(user_id);
        Ok(())
    }

    fn subscribe(&self, user_id: &str, listener: Listener) -> StoreResult<Subscription> {
        Ok(self.listeners.register(user_id, listener))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AccountSnapshot, WorkoutExercise, WorkoutSet};
    use std::sync::Arc;

    fn sample_exercise(id: &str) -> Exercise {
        Exercise {
            id: id.to_string(),
            name: "Cable Row".to_string(),
            body_part: BodyPart::Back,
            description: "Seated row on the cable stack".to_string(),
            emoji: Some("🧗".to_string()),
            is_custom: Some(true),
        }
    }

    fn sample_log() -> WorkoutLog {
        let mut log = WorkoutLog::new();
        log.set_day(
            "2024-06-15",
            vec![WorkoutExercise {
                id: "w1".to_string(),
                exercise_id: "ex1".to_string(),
                sets: vec![
                    WorkoutSet { reps: 8, weight: 55.0, completed: true },
                    WorkoutSet { reps: 8, weight: 57.5, completed: false },
                ],
            }],
        );
        log
    }

    #[test]
    fn test_put_and_get_exercise() {
        let db = Database::open_in_memory().unwrap();
        db.put_exercise("u1", &sample_exercise("a")).unwrap();

        let all = db.get_exercises("u1").unwrap();
        assert_eq!(all, vec![sample_exercise("a")]);
        assert!(db.get_exercises("u2").unwrap().is_empty());
    }

    #[test]
    fn test_put_exercise_is_idempotent_upsert() {
        let db = Database::open_in_memory().unwrap();
        db.put_exercise("u1", &sample_exercise("a")).unwrap();
        db.put_exercise("u1", &sample_exercise("b")).unwrap();
        let mut edited = sample_exercise("a");
        edited.name = "Seated Row".to_string();
        edited.body_part = BodyPart::Arms;
        db.put_exercise("u1", &edited).unwrap();
        db.put_exercise("u1", &edited).unwrap();

        let all = db.get_exercises("u1").unwrap();
        assert_eq!(all.len(), 2);
        // Insertion order survives the update.
        assert_eq!(all[0], edited);
        assert_eq!(all[1].id, "b");
    }

    #[test]
    fn test_optional_fields_round_trip_as_none() {
        let db = Database::open_in_memory().unwrap();
        let mut ex = sample_exercise("a");
        ex.emoji = None;
        ex.is_custom = None;
        db.put_exercise("u1", &ex).unwrap();
        assert_eq!(db.get_exercises("u1").unwrap()[0], ex);
    }

    #[test]
    fn test_delete_exercise_leaves_log_alone() {
        let db = Database::open_in_memory().unwrap();
        db.put_exercise("u1", &sample_exercise("ex1")).unwrap();
        db.put_workout_log("u1", &sample_log()).unwrap();

        assert!(db.delete_exercise("u1", "ex1").unwrap());
        assert!(!db.delete_exercise("u1", "ex1").unwrap());
        assert_eq!(db.get_workout_log("u1").unwrap(), sample_log());
    }

    #[test]
    fn test_workout_log_round_trip() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.get_workout_log("u1").unwrap().is_empty());
        db.put_workout_log("u1", &sample_log()).unwrap();
        assert_eq!(db.get_workout_log("u1").unwrap(), sample_log());
    }

    #[test]
    fn test_put_workout_log_normalizes_empty_days() {
        let db = Database::open_in_memory().unwrap();
        let log: WorkoutLog =
            serde_json::from_str(r#"{"2024-06-14":[],"2024-06-15":[{"id":"w","exerciseId":"ex1","sets":[]}]}"#)
                .unwrap();
        db.put_workout_log("u1", &log).unwrap();
        let stored = db.get_workout_log("u1").unwrap();
        assert_eq!(stored.len(), 1);
        assert!(stored.day("2024-06-14").is_empty());
    }

    #[test]
    fn test_empty_log_document_counts_as_initialized() {
        let db = Database::open_in_memory().unwrap();
        assert!(!db.is_initialized("u1").unwrap());
        db.put_workout_log("u1", &WorkoutLog::new()).unwrap();
        assert!(db.is_initialized("u1").unwrap());
        assert!(!db.is_initialized("u2").unwrap());
    }

    #[test]
    fn test_commit_writes_everything() {
        let db = Database::open_in_memory().unwrap();
        let batch = AccountBatch {
            exercises: vec![sample_exercise("a"), sample_exercise("b")],
            workout_log: sample_log(),
        };
        db.commit("u1", &batch).unwrap();

        let snap = db.snapshot("u1").unwrap();
        assert_eq!(snap.exercises.len(), 2);
        assert_eq!(snap.workout_log, sample_log());
        assert!(db.is_initialized("u1").unwrap());
    }

    #[test]
    fn test_commit_rolls_back_on_bad_record() {
        let db = Database::open_in_memory().unwrap();
        let batch = AccountBatch {
            exercises: vec![sample_exercise("a"), sample_exercise("")],
            workout_log: sample_log(),
        };
        assert!(db.commit("u1", &batch).is_err());
        assert!(db.get_exercises("u1").unwrap().is_empty());
        assert!(!db.is_initialized("u1").unwrap());
    }

    #[test]
    fn test_malformed_log_document_is_typed_error() {
        let db = Database::open_in_memory().unwrap();
        db.conn()
            .unwrap()
            .execute(
                "INSERT INTO workout_logs (user_id, document, updated_at) VALUES ('u1', '{not json', 'now')",
                [],
            )
            .unwrap();
        let err = db.get_workout_log("u1").unwrap_err();
        assert!(matches!(err, StoreError::Malformed { .. }));
    }

    #[test]
    fn test_subscribers_see_commits() {
        let db = Database::open_in_memory().unwrap();
        let seen: Arc<Mutex<Vec<AccountSnapshot>>> = Arc::default();
        let sink = Arc::clone(&seen);
        let sub = db
            .subscribe(
                "u1",
                Arc::new(move |snap: &AccountSnapshot| sink.lock().unwrap().push(snap.clone())),
            )
            .unwrap();

        db.commit(
            "u1",
            &AccountBatch {
                exercises: vec![sample_exercise("a")],
                workout_log: sample_log(),
            },
        )
        .unwrap();
        sub.unsubscribe();
        db.put_workout_log("u1", &WorkoutLog::new()).unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].workout_log, sample_log());
    }

    #[test]
    fn test_settings() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(db.get_setting("locale").unwrap(), None);
        db.set_setting("locale", "es").unwrap();
        db.set_setting("locale", "en").unwrap();
        assert_eq!(db.get_setting("locale").unwrap().as_deref(), Some("en"));
        assert_eq!(db.get_setting("units").unwrap(), None);
    }

    #[test]
    fn test_accounts() {
        let db = Database::open_in_memory().unwrap();
        let row = AccountRow {
            email: "a@b.co".to_string(),
            user_id: "uid-1".to_string(),
            password_hash: "h".to_string(),
        };
        assert!(db.insert_account(&row).unwrap());
        assert!(!db.insert_account(&row).unwrap());
        assert_eq!(db.find_account("a@b.co").unwrap(), Some(row));
        assert!(db.update_password("a@b.co", "h2").unwrap());
        assert_eq!(db.find_account("a@b.co").unwrap().unwrap().password_hash, "h2");
        assert_eq!(db.find_account("x@y.z").unwrap(), None);
    }

    #[test]
    fn test_reopen_on_disk_keeps_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("liftlog.db");
        {
            let db = Database::open(&path).unwrap();
            db.put_workout_log("u1", &sample_log()).unwrap();
        }
        let db = Database::open(&path).unwrap();
        assert_eq!(db.get_workout_log("u1").unwrap(), sample_log());
    }
}
