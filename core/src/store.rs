use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use crate::error::StoreResult;
use crate::models::{AccountSnapshot, Exercise, WorkoutLog};

/// Callback invoked with the latest account snapshot after every change.
pub type Listener = Arc<dyn Fn(&AccountSnapshot) + Send + Sync>;

/// Exercises and a workout-log document written as one all-or-nothing unit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountBatch {
    pub exercises: Vec<Exercise>,
    pub workout_log: WorkoutLog,
}

/// Authoritative per-user storage of exercises and the workout log.
///
/// Every method is keyed by the identity provider's user id. Implementations
/// normalize empty days away on write and report failures as `StoreError`.
pub trait AccountStore: Send + Sync {
    /// All exercises for the user, in insertion order. Empty if none stored.
    fn get_exercises(&self, user_id: &str) -> StoreResult<Vec<Exercise>>;

    /// The user's workout log, `{}` if no document exists.
    fn get_workout_log(&self, user_id: &str) -> StoreResult<WorkoutLog>;

    /// Insert or overwrite the exercise with the same id.
    fn put_exercise(&self, user_id: &str, exercise: &Exercise) -> StoreResult<()>;

    /// Remove one exercise. Logged workouts that reference it are left alone.
    fn delete_exercise(&self, user_id: &str, exercise_id: &str) -> StoreResult<bool>;

    /// Replace the whole workout-log document.
    fn put_workout_log(&self, user_id: &str, log: &WorkoutLog) -> StoreResult<()>;

    /// Whether the user's workout-log document exists, even if it is empty.
    fn is_initialized(&self, user_id: &str) -> StoreResult<bool>;

    /// Upsert every exercise in the batch and replace the log document atomically.
    fn commit(&self, user_id: &str, batch: &AccountBatch) -> StoreResult<()>;

    /// Register `listener` for changes to this user's data. Dropping the
    /// returned handle unsubscribes.
    fn subscribe(&self, user_id: &str, listener: Listener) -> StoreResult<Subscription>;

    fn snapshot(&self, user_id: &str) -> StoreResult<AccountSnapshot> {
        Ok(AccountSnapshot {
            exercises: self.get_exercises(user_id)?,
            workout_log: self.get_workout_log(user_id)?,
        })
    }
}

/// Handle returned by [`AccountStore::subscribe`].
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Stop delivery. Writes already in flight still complete.
    pub fn unsubscribe(mut self) {
        self.cancel_now();
    }

    fn cancel_now(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel_now();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

/// Per-user listener bookkeeping shared by the local backends.
#[derive(Clone, Default)]
pub struct ListenerRegistry {
    inner: Arc<Mutex<RegistryState>>,
}

#[derive(Default)]
struct RegistryState {
    next_id: u64,
    listeners: BTreeMap<u64, (String, Listener)>,
}

impl ListenerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, user_id: &str, listener: Listener) -> Subscription {
        let id = {
            let mut state = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            let id = state.next_id;
            state.next_id = state.next_id.saturating_add(1);
            state.listeners.insert(id, (user_id.to_string(), listener));
            id
        };

        let weak = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                let mut state = inner.lock().unwrap_or_else(PoisonError::into_inner);
                state.listeners.remove(&id);
            }
        })
    }

    /// Deliver a snapshot to every listener of `user_id`.
    ///
    /// `load` only runs when somebody is listening. A failed load is logged and
    /// dropped: the write that triggered it already succeeded.
    pub fn publish_with<F>(&self, user_id: &str, load: F)
    where
        F: FnOnce() -> StoreResult<AccountSnapshot>,
    {
        // Listeners are called outside the lock so they may (un)subscribe.
        let targets: Vec<Listener> = {
            let state = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            state
                .listeners
                .values()
                .filter(|(uid, _)| uid == user_id)
                .map(|(_, listener)| Arc::clone(listener))
                .collect()
        };
        if targets.is_empty() {
            return;
        }

        match load() {
            Ok(snapshot) => {
                for listener in targets {
                    listener(&snapshot);
                }
            }
            Err(e) => {
                tracing::warn!(user_id, error = %e, "failed to load snapshot for listeners");
            }
        }
    }
}
