use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use crate::error::{StoreError, StoreResult};
use crate::models::{Exercise, WorkoutLog};
use crate::store::{AccountBatch, AccountStore, Listener, ListenerRegistry, Subscription};

#[derive(Default, Clone)]
struct UserData {
    exercises: Vec<Exercise>,
    workout_log: Option<WorkoutLog>,
}

impl UserData {
    fn upsert(&mut self, exercise: &Exercise) {
        if let Some(existing) = self.exercises.iter_mut().find(|e| e.id == exercise.id) {
            *existing = exercise.clone();
        } else {
            self.exercises.push(exercise.clone());
        }
    }
}

/// Process-local account store. Data lives as long as the value does.
#[derive(Default)]
pub struct MemoryStore {
    users: Mutex<HashMap<String, UserData>>,
    listeners: ListenerRegistry,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, HashMap<String, UserData>>> {
        self.users.lock().map_err(|_| StoreError::LockPoisoned)
    }

    fn notify(&self, user_id: &str) {
        self.listeners
            .publish_with(user_id, || self.snapshot(user_id));
    }
}

fn check_exercise(exercise: &Exercise) -> StoreResult<()> {
    if exercise.id.trim().is_empty() {
        return Err(StoreError::Invalid("exercise id must not be empty".into()));
    }
    Ok(())
}

impl AccountStore for MemoryStore {
    fn get_exercises(&self, user_id: &str) -> StoreResult<Vec<Exercise>> {
        Ok(self
            .lock()?
            .get(user_id)
            .map(|u| u.exercises.clone())
            .unwrap_or_default())
    }

    fn get_workout_log(&self, user_id: &str) -> StoreResult<WorkoutLog> {
        Ok(self
            .lock()?
            .get(user_id)
            .and_then(|u| u.workout_log.clone())
            .unwrap_or_default())
    }

    fn put_exercise(&self, user_id: &str, exercise: &Exercise) -> StoreResult<()> {
        check_exercise(exercise)?;
        self.lock()?
            .entry(user_id.to_string())
            .or_default()
            .upsert(exercise);
        self.notify(user_id);
        Ok(())
    }

    fn delete_exercise(&self, user_id: &str, exercise_id: &str) -> StoreResult<bool> {
        let removed = {
            let mut users = self.lock()?;
            match users.get_mut(user_id) {
                Some(user) => {
                    let before = user.exercises.len();
                    user.exercises.retain(|e| e.id != exercise_id);
                    user.exercises.len() != before
                }
                None => false,
            }
        };
        if removed {
            self.notify(user_id);
        }
        Ok(removed)
    }

    fn put_workout_log(&self, user_id: &str, log: &WorkoutLog) -> StoreResult<()> {
        self.lock()?
            .entry(user_id.to_string())
            .or_default()
            .workout_log = Some(log.clone().normalized());
        self.notify(user_id);
        Ok(())
    }

    fn is_initialized(&self, user_id: &str) -> StoreResult<bool> {
        Ok(self
            .lock()?
            .get(user_id)
            .is_some_and(|u| u.workout_log.is_some()))
    }

    fn commit(&self, user_id: &str, batch: &AccountBatch) -> StoreResult<()> {
        for exercise in &batch.exercises {
            check_exercise(exercise)?;
        }
        {
            let mut users = self.lock()?;
            // Build the new state first so a failure above leaves nothing behind.
            let mut next = users.get(user_id).cloned().unwrap_or_default();
            for exercise in &batch.exercises {
                next.upsert(exercise);
            }
            next.workout_log = Some(batch.workout_log.clone().normalized());
            users.insert(user_id.to_string(), next);
        }
        self.notify(user_id);
        Ok(())
    }

    fn subscribe(&self, user_id: &str, listener: Listener) -> StoreResult<Subscription> {
        Ok(self.listeners.register(user_id, listener))
    }
}
