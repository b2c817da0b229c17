use std::collections::BTreeMap;
use std::io::Write;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result, bail};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::{Identity, IdentityProvider};
use crate::legacy::LegacyStorage;
use crate::migration::{CleanupPolicy, MigrationCoordinator, MigrationReport};
use crate::models::{
    BodyPart, Exercise, NewExercise, WorkoutExercise, WorkoutLog, WorkoutSet, date_key,
    validate_new_exercise, validate_workout_exercise,
};
use crate::store::{AccountStore, Listener, Subscription};
use crate::transfer::{self, ImportSummary};
use crate::volume::{self, BodyPartVolume, DayEntry, VolumeQuery};

pub const MAX_SETS: u32 = 10;
pub const MAX_REPS: u32 = 100;
pub const MAX_WEIGHT: f64 = 1000.0;

/// An exercise to add to a day: `sets` identical sets of `reps` at `weight`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedExercise {
    pub exercise_id: String,
    pub sets: u32,
    pub reps: u32,
    pub weight: f64,
}

impl PlannedExercise {
    pub fn validate(&self) -> Result<()> {
        if !(1..=MAX_SETS).contains(&self.sets) {
            bail!("Sets must be between 1 and {MAX_SETS} (got {})", self.sets);
        }
        if !(1..=MAX_REPS).contains(&self.reps) {
            bail!("Reps must be between 1 and {MAX_REPS} (got {})", self.reps);
        }
        if !self.weight.is_finite() || !(0.0..=MAX_WEIGHT).contains(&self.weight) {
            bail!("Weight must be between 0 and {MAX_WEIGHT} (got {})", self.weight);
        }
        Ok(())
    }
}

/// A signed-in user's view of their account.
///
/// Constructing a session runs the migration coordinator, so every session
/// starts on an initialized account.
pub struct Session {
    identity: Identity,
    store: Arc<dyn AccountStore>,
    report: MigrationReport,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl Session {
    /// Open a session for an identity the caller already trusts.
    pub fn open(
        identity: Identity,
        store: Arc<dyn AccountStore>,
        legacy: &dyn LegacyStorage,
        cleanup: CleanupPolicy,
    ) -> Result<Self> {
        let report = MigrationCoordinator::new(store.as_ref(), legacy)
            .with_cleanup(cleanup)
            .run(&identity.user_id, &identity.email)
            .context("Failed to initialize account data")?;
        tracing::info!(user_id = %identity.user_id, outcome = ?report.outcome, "session opened");
        Ok(Self {
            identity,
            store,
            report,
            subscriptions: Mutex::new(Vec::new()),
        })
    }

    pub fn sign_in(
        provider: &dyn IdentityProvider,
        email: &str,
        password: &str,
        store: Arc<dyn AccountStore>,
        legacy: &dyn LegacyStorage,
    ) -> Result<Self> {
        let identity = provider.sign_in(email, password)?;
        Self::open(identity, store, legacy, CleanupPolicy::default())
    }

    pub fn sign_up(
        provider: &dyn IdentityProvider,
        email: &str,
        password: &str,
        store: Arc<dyn AccountStore>,
        legacy: &dyn LegacyStorage,
    ) -> Result<Self> {
        let identity = provider.sign_up(email, password)?;
        Self::open(identity, store, legacy, CleanupPolicy::default())
    }

    #[must_use]
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.identity.user_id
    }

    #[must_use]
    pub fn migration_report(&self) -> &MigrationReport {
        &self.report
    }

    // --- Exercises ---

    pub fn exercises(&self) -> Result<Vec<Exercise>> {
        self.store
            .get_exercises(self.user_id())
            .context("Failed to load exercises")
    }

    pub fn exercise(&self, id: &str) -> Result<Exercise> {
        self.exercises()?
            .into_iter()
            .find(|e| e.id == id)
            .with_context(|| format!("Exercise '{id}' not found"))
    }

    pub fn add_exercise(&self, new: &NewExercise) -> Result<Exercise> {
        validate_new_exercise(new)?;
        let exercise = Exercise {
            id: Uuid::new_v4().to_string(),
            name: new.name.trim().to_string(),
            body_part: new.body_part,
            description: new.description.trim().to_string(),
            emoji: Some(new.body_part.emoji().to_string()),
            is_custom: Some(true),
        };
        self.store
            .put_exercise(self.user_id(), &exercise)
            .context("Failed to save exercise")?;
        Ok(exercise)
    }

    /// Replace an exercise's editable fields. The emoji follows the body part.
    pub fn update_exercise(&self, id: &str, update: &NewExercise) -> Result<Exercise> {
        validate_new_exercise(update)?;
        let existing = self.exercise(id)?;
        let exercise = Exercise {
            name: update.name.trim().to_string(),
            body_part: update.body_part,
            description: update.description.trim().to_string(),
            emoji: Some(update.body_part.emoji().to_string()),
            ..existing
        };
        self.store
            .put_exercise(self.user_id(), &exercise)
            .context("Failed to save exercise")?;
        Ok(exercise)
    }

    /// Delete from the library only. Logged workouts keep their reference.
    pub fn delete_exercise(&self, id: &str) -> Result<bool> {
        self.store
            .delete_exercise(self.user_id(), id)
            .context("Failed to delete exercise")
    }

    // --- Workout log ---

    pub fn workout_log(&self) -> Result<WorkoutLog> {
        self.store
            .get_workout_log(self.user_id())
            .context("Failed to load workout log")
    }

    pub fn day(&self, date: NaiveDate) -> Result<Vec<WorkoutExercise>> {
        Ok(self.workout_log()?.day(&date_key(date)).to_vec())
    }

    fn update_log<T>(&self, edit: impl FnOnce(&mut WorkoutLog) -> Result<T>) -> Result<T> {
        let mut log = self.workout_log()?;
        let out = edit(&mut log)?;
        log.normalize();
        self.store
            .put_workout_log(self.user_id(), &log)
            .context("Failed to save workout log")?;
        Ok(out)
    }

    pub fn add_to_day(&self, date: NaiveDate, planned: &PlannedExercise) -> Result<WorkoutExercise> {
        planned.validate()?;
        self.exercise(&planned.exercise_id)?;
        let entry = WorkoutExercise {
            id: Uuid::new_v4().to_string(),
            exercise_id: planned.exercise_id.clone(),
            sets: (0..planned.sets)
                .map(|_| WorkoutSet {
                    reps: planned.reps,
                    weight: planned.weight,
                    completed: false,
                })
                .collect(),
        };
        let key = date_key(date);
        self.update_log(|log| {
            let mut day = log.day(&key).to_vec();
            day.push(entry.clone());
            log.set_day(key.clone(), day);
            Ok(())
        })?;
        Ok(entry)
    }

    /// Overwrite a logged entry in place, keeping its position in the day.
    pub fn replace_entry(&self, date: NaiveDate, entry: WorkoutExercise) -> Result<()> {
        validate_workout_exercise(&entry)?;
        let key = date_key(date);
        self.update_log(|log| {
            let slot = log
                .day_mut(&key)
                .and_then(|day| day.iter_mut().find(|e| e.id == entry.id))
                .with_context(|| format!("No entry '{}' on {key}", entry.id))?;
            *slot = entry;
            Ok(())
        })
    }

    pub fn remove_entry(&self, date: NaiveDate, entry_id: &str) -> Result<bool> {
        let key = date_key(date);
        self.update_log(|log| {
            let Some(day) = log.day_mut(&key) else {
                return Ok(false);
            };
            let before = day.len();
            day.retain(|e| e.id != entry_id);
            Ok(day.len() != before)
        })
    }

    /// Flip one set's completion flag. Returns the new state.
    pub fn toggle_set(&self, date: NaiveDate, entry_id: &str, set_index: usize) -> Result<bool> {
        let key = date_key(date);
        self.update_log(|log| {
            let entry = log
                .day_mut(&key)
                .and_then(|day| day.iter_mut().find(|e| e.id == entry_id))
                .with_context(|| format!("No entry '{entry_id}' on {key}"))?;
            let count = entry.sets.len();
            let set = entry
                .sets
                .get_mut(set_index)
                .with_context(|| format!("Set {} out of range (entry has {count})", set_index + 1))?;
            set.completed = !set.completed;
            Ok(set.completed)
        })
    }

    /// Append a copy of one day's exercises to another day. Copies get fresh
    /// ids and start with every set not completed.
    pub fn copy_day(&self, from: NaiveDate, to: NaiveDate) -> Result<usize> {
        let (from_key, to_key) = (date_key(from), date_key(to));
        self.update_log(|log| {
            let source = log.day(&from_key);
            if source.is_empty() {
                bail!("Nothing logged on {from_key}");
            }
            let copies: Vec<WorkoutExercise> = source
                .iter()
                .map(|e| WorkoutExercise {
                    id: Uuid::new_v4().to_string(),
                    exercise_id: e.exercise_id.clone(),
                    sets: e
                        .sets
                        .iter()
                        .map(|s| WorkoutSet {
                            completed: false,
                            ..*s
                        })
                        .collect(),
                })
                .collect();
            let copied = copies.len();
            let mut day = log.day(&to_key).to_vec();
            day.extend(copies);
            log.set_day(to_key.clone(), day);
            Ok(copied)
        })
    }

    // --- Progress ---

    pub fn volume(&self, query: &VolumeQuery) -> Result<Vec<BodyPartVolume>> {
        let snapshot = self.store.snapshot(self.user_id())?;
        Ok(volume::volume_by_body_part(
            &snapshot.workout_log,
            &snapshot.exercises,
            query,
        ))
    }

    pub fn calendar(&self) -> Result<BTreeMap<String, Vec<BodyPart>>> {
        let snapshot = self.store.snapshot(self.user_id())?;
        Ok(volume::daily_body_parts(&snapshot.workout_log, &snapshot.exercises))
    }

    pub fn day_detail(&self, date: NaiveDate) -> Result<Vec<DayEntry>> {
        let snapshot = self.store.snapshot(self.user_id())?;
        Ok(volume::day_detail(
            &snapshot.workout_log,
            &snapshot.exercises,
            &date_key(date),
        ))
    }

    // --- Transfer ---

    pub fn import_json(&self, raw: &str) -> Result<ImportSummary> {
        let data = transfer::parse_import(raw)?;
        if data.is_empty() {
            bail!("Import file contains no exercises or workout log");
        }
        transfer::import_into(self.store.as_ref(), self.user_id(), data)
    }

    pub fn export_csv<W: Write>(&self, writer: W) -> Result<usize> {
        let snapshot = self.store.snapshot(self.user_id())?;
        transfer::write_csv(writer, &snapshot)
    }

    // --- Live updates ---

    pub fn subscribe(&self, listener: Listener) -> Result<Subscription> {
        self.store
            .subscribe(self.user_id(), listener)
            .context("Failed to subscribe to account changes")
    }

    /// Subscribe for the lifetime of the session.
    pub fn watch(&self, listener: Listener) -> Result<()> {
        let subscription = self.subscribe(listener)?;
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(subscription);
        Ok(())
    }

    // --- Account ---

    pub fn change_password(
        &self,
        provider: &dyn IdentityProvider,
        current: &str,
        new: &str,
    ) -> Result<()> {
        provider.change_password(&self.identity.email, current, new)?;
        tracing::info!(user_id = %self.identity.user_id, "password changed");
        Ok(())
    }

    /// End the session, dropping every subscription it holds.
    pub fn logout(self) -> Identity {
        let subscriptions = self
            .subscriptions
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner);
        for subscription in subscriptions {
            subscription.unsubscribe();
        }
        tracing::info!(user_id = %self.identity.user_id, "logged out");
        self.identity
    }
}
