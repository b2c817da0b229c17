//! One-shot copy of device-local legacy data into the account store.
//!
//! Runs after every successful sign-in. The account's workout-log document is
//! the "already done" marker: once it exists the coordinator never touches the
//! account again. Otherwise legacy data (or the built-in seed set) is written
//! in a single batch, and only then is the legacy copy removed.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StoreResult;
use crate::legacy::{LegacyStorage, exercises_key, workout_logs_key};
use crate::models::{
    Exercise, ExerciseRecord, WorkoutLog, parse_date_key, validate_set, validate_workout_exercise,
};
use crate::seed;
use crate::store::{AccountBatch, AccountStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupPolicy {
    /// Leave legacy keys in place after migrating.
    Keep,
    /// Remove legacy keys once the batch is committed.
    #[default]
    RemoveAfterCommit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationOutcome {
    AlreadyInitialized,
    Seeded,
    Migrated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LegacyNamespace {
    Exercises,
    WorkoutLogs,
}

impl std::fmt::Display for LegacyNamespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            LegacyNamespace::Exercises => "exercises",
            LegacyNamespace::WorkoutLogs => "workout_logs",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationReport {
    pub outcome: MigrationOutcome,
    pub exercises_written: usize,
    pub seed_exercises_added: usize,
    /// Legacy records given a fresh id (missing, duplicate, or reserved).
    pub ids_regenerated: usize,
    /// Legacy exercises without a name. They are left out of the account.
    pub exercises_dropped: usize,
    /// Logged entries with no usable set, no exercise reference or a bad date.
    pub entries_dropped: usize,
    pub log_days: usize,
    pub corrupt: Vec<LegacyNamespace>,
    pub legacy_cleared: bool,
}

impl MigrationReport {
    fn already_initialized() -> Self {
        Self {
            outcome: MigrationOutcome::AlreadyInitialized,
            exercises_written: 0,
            seed_exercises_added: 0,
            ids_regenerated: 0,
            exercises_dropped: 0,
            entries_dropped: 0,
            log_days: 0,
            corrupt: Vec::new(),
            legacy_cleared: false,
        }
    }
}

pub struct MigrationCoordinator<'a> {
    store: &'a dyn AccountStore,
    legacy: &'a dyn LegacyStorage,
    cleanup: CleanupPolicy,
}

impl<'a> MigrationCoordinator<'a> {
    pub fn new(store: &'a dyn AccountStore, legacy: &'a dyn LegacyStorage) -> Self {
        Self {
            store,
            legacy,
            cleanup: CleanupPolicy::default(),
        }
    }

    #[must_use]
    pub fn with_cleanup(mut self, cleanup: CleanupPolicy) -> Self {
        self.cleanup = cleanup;
        self
    }

    /// Initialize the account for `user_id` if that has not happened yet.
    ///
    /// Store and legacy read failures abort before anything is written, so the
    /// next sign-in retries from scratch.
    pub fn run(&self, user_id: &str, email: &str) -> StoreResult<MigrationReport> {
        if self.store.is_initialized(user_id)? {
            tracing::debug!(user_id, "account already initialized");
            return Ok(MigrationReport::already_initialized());
        }

        let ex_key = exercises_key(email);
        let log_key = workout_logs_key(email);
        let legacy_exercises = self.read_legacy(&ex_key)?;
        let legacy_logs = self.read_legacy(&log_key)?;

        if legacy_exercises.is_none() && legacy_logs.is_none() {
            let batch = AccountBatch {
                exercises: seed::builtin_exercises(),
                workout_log: WorkoutLog::new(),
            };
            self.commit(user_id, &batch)?;
            tracing::info!(user_id, exercises = batch.exercises.len(), "seeded new account");
            return Ok(MigrationReport {
                outcome: MigrationOutcome::Seeded,
                exercises_written: batch.exercises.len(),
                seed_exercises_added: batch.exercises.len(),
                ids_regenerated: 0,
                exercises_dropped: 0,
                entries_dropped: 0,
                log_days: 0,
                corrupt: Vec::new(),
                legacy_cleared: false,
            });
        }

        let mut corrupt = Vec::new();

        let records = match legacy_exercises.as_deref().map(parse_exercises) {
            Some(Ok(records)) => records,
            Some(Err(e)) => {
                tracing::warn!(user_id, key = %ex_key, error = %e, "legacy exercises unreadable, using built-ins");
                corrupt.push(LegacyNamespace::Exercises);
                Vec::new()
            }
            None => Vec::new(),
        };
        let merged = merge_with_seeds(records);

        let workout_log = match legacy_logs.as_deref().map(parse_workout_log) {
            Some(Ok(log)) => log,
            Some(Err(e)) => {
                tracing::warn!(user_id, key = %log_key, error = %e, "legacy workout log unreadable, starting empty");
                corrupt.push(LegacyNamespace::WorkoutLogs);
                WorkoutLog::new()
            }
            None => WorkoutLog::new(),
        };
        let (workout_log, entries_dropped) = sanitize_log(&workout_log);
        if merged.exercises_dropped + entries_dropped > 0 {
            tracing::warn!(
                user_id,
                exercises = merged.exercises_dropped,
                entries = entries_dropped,
                "dropped unusable legacy records"
            );
        }

        let batch = AccountBatch {
            exercises: merged.exercises,
            workout_log,
        };
        self.commit(user_id, &batch)?;
        tracing::info!(
            user_id,
            exercises = batch.exercises.len(),
            seeds_added = merged.seeds_added,
            days = batch.workout_log.len(),
            "migrated legacy data"
        );

        let legacy_cleared = match self.cleanup {
            CleanupPolicy::Keep => false,
            CleanupPolicy::RemoveAfterCommit => self.remove_legacy(&[&ex_key, &log_key]),
        };

        Ok(MigrationReport {
            outcome: MigrationOutcome::Migrated,
            exercises_written: batch.exercises.len(),
            seed_exercises_added: merged.seeds_added,
            ids_regenerated: merged.ids_regenerated,
            exercises_dropped: merged.exercises_dropped,
            entries_dropped,
            log_days: batch.workout_log.len(),
            corrupt,
            legacy_cleared,
        })
    }

    fn read_legacy(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self
            .legacy
            .get_item(key)?
            .filter(|value| !value.trim().is_empty()))
    }

    fn commit(&self, user_id: &str, batch: &AccountBatch) -> StoreResult<()> {
        self.store.commit(user_id, batch).inspect_err(|e| {
            tracing::error!(user_id, error = %e, "failed to commit initial account data");
        })
    }

    fn remove_legacy(&self, keys: &[&str]) -> bool {
        let mut cleared = true;
        for key in keys {
            if let Err(e) = self.legacy.remove_item(key) {
                tracing::warn!(key, error = %e, "failed to remove legacy key");
                cleared = false;
            }
        }
        cleared
    }
}

fn parse_exercises(raw: &str) -> serde_json::Result<Vec<ExerciseRecord>> {
    serde_json::from_str(raw)
}

fn parse_workout_log(raw: &str) -> serde_json::Result<WorkoutLog> {
    serde_json::from_str::<WorkoutLog>(raw).map(WorkoutLog::normalized)
}

struct MergedExercises {
    exercises: Vec<Exercise>,
    seeds_added: usize,
    ids_regenerated: usize,
    exercises_dropped: usize,
}

/// Give every legacy record a usable unique id, then append each built-in
/// whose name is not already taken.
fn merge_with_seeds(records: Vec<ExerciseRecord>) -> MergedExercises {
    let mut seen: HashSet<String> = HashSet::new();
    let mut ids_regenerated = 0;
    let mut exercises_dropped = 0;
    let mut exercises: Vec<Exercise> = Vec::with_capacity(records.len());

    for record in records {
        if record.name.trim().is_empty() {
            exercises_dropped += 1;
            continue;
        }
        let keep = record.usable_id().filter(|id| {
            !seen.contains(*id)
                && seed::reserved_name(id).is_none_or(|name| name == record.name)
        });
        let id = match keep {
            Some(id) => id.to_string(),
            None => {
                ids_regenerated += 1;
                Uuid::new_v4().to_string()
            }
        };
        seen.insert(id.clone());
        exercises.push(record.into_exercise(id));
    }

    let mut seeds_added = 0;
    for builtin in seed::builtin_exercises() {
        if exercises.iter().any(|e| e.name == builtin.name) || seen.contains(&builtin.id) {
            continue;
        }
        seen.insert(builtin.id.clone());
        exercises.push(builtin);
        seeds_added += 1;
    }

    MergedExercises {
        exercises,
        seeds_added,
        ids_regenerated,
        exercises_dropped,
    }
}

/// Keep only what every account store accepts. Sets with an unusable weight
/// are removed; an entry left without sets, without an exercise reference or
/// under an unparsable date is dropped. Blank entry ids get a fresh one.
fn sanitize_log(log: &WorkoutLog) -> (WorkoutLog, usize) {
    let mut dropped = 0;
    let mut clean = WorkoutLog::new();
    for (date, entries) in log.iter() {
        if parse_date_key(date).is_none() {
            dropped += entries.len();
            continue;
        }
        let mut kept = Vec::with_capacity(entries.len());
        for entry in entries {
            let mut entry = entry.clone();
            entry.sets.retain(|set| validate_set(set).is_ok());
            if entry.id.trim().is_empty() {
                entry.id = Uuid::new_v4().to_string();
            }
            if validate_workout_exercise(&entry).is_ok() {
                kept.push(entry);
            } else {
                dropped += 1;
            }
        }
        clean.set_day(date.clone(), kept);
    }
    (clean, dropped)
}
