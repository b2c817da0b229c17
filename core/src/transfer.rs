use std::io::Write;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{AccountSnapshot, Exercise, ExerciseRecord, WorkoutLog, validate_workout_log};
use crate::store::{AccountBatch, AccountStore};

pub const CSV_HEADER: [&str; 7] = ["date", "exercise", "bodyPart", "set", "reps", "weight", "volume"];

/// Contents of an import file.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportData {
    #[serde(default)]
    pub exercises: Option<Vec<ExerciseRecord>>,
    #[serde(default)]
    pub workout_log: Option<WorkoutLog>,
}

impl ImportData {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.exercises.is_none() && self.workout_log.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportSummary {
    pub exercises_upserted: usize,
    pub days_imported: usize,
}

/// Parse an import file.
///
/// Accepts `{"exercises": [...], "workoutLog": {...}}` (either key optional),
/// a bare exercise array, or a bare date-keyed workout log.
pub fn parse_import(raw: &str) -> Result<ImportData> {
    let value: serde_json::Value = serde_json::from_str(raw).context("Invalid JSON format")?;
    let is_envelope = value
        .as_object()
        .is_some_and(|map| map.contains_key("exercises") || map.contains_key("workoutLog"));
    let data = if is_envelope {
        serde_json::from_value(value).context("Invalid import file")?
    } else if value.is_array() {
        ImportData {
            exercises: Some(serde_json::from_value(value).context("Invalid exercise list")?),
            workout_log: None,
        }
    } else if value.is_object() {
        ImportData {
            exercises: None,
            workout_log: Some(serde_json::from_value(value).context("Invalid workout log")?),
        }
    } else {
        bail!("Import file must be a JSON object or array");
    };

    if let Some(exercises) = &data.exercises {
        for (i, record) in exercises.iter().enumerate() {
            if record.name.trim().is_empty() {
                bail!("Exercise #{} has an empty name", i + 1);
            }
        }
    }
    if let Some(log) = &data.workout_log {
        validate_workout_log(log)?;
    }
    Ok(data)
}

/// Give imported records an id when they lack one and an emoji from their body part.
#[must_use]
pub fn prepare_exercises(records: Vec<ExerciseRecord>) -> Vec<Exercise> {
    records
        .into_iter()
        .map(|record| {
            let id = record
                .usable_id()
                .map_or_else(|| Uuid::new_v4().to_string(), str::to_string);
            ExerciseRecord {
                emoji: None,
                ..record
            }
            .into_exercise(id)
        })
        .collect()
}

/// Write imported data: exercises are upserted, imported log days replace the
/// same days in the stored log and all other days are kept.
///
/// The account must already be initialized. Writing the log document first
/// would mark it as migrated and its legacy data would never be copied.
pub fn import_into(store: &dyn AccountStore, user_id: &str, data: ImportData) -> Result<ImportSummary> {
    if !store
        .is_initialized(user_id)
        .context("Failed to check account state")?
    {
        return Err(StoreError::NotInitialized(user_id.to_string()).into());
    }
    let exercises = prepare_exercises(data.exercises.unwrap_or_default());
    let imported_log = data.workout_log.map(WorkoutLog::normalized);
    let summary = ImportSummary {
        exercises_upserted: exercises.len(),
        days_imported: imported_log.as_ref().map_or(0, WorkoutLog::len),
    };

    match imported_log {
        Some(imported) => {
            let mut workout_log = store
                .get_workout_log(user_id)
                .context("Failed to read current workout log")?;
            workout_log.merge(imported);
            store
                .commit(user_id, &AccountBatch { exercises, workout_log })
                .context("Failed to save imported data")?;
        }
        None => {
            for exercise in &exercises {
                store
                    .put_exercise(user_id, exercise)
                    .with_context(|| format!("Failed to save exercise '{}'", exercise.name))?;
            }
        }
    }

    tracing::info!(
        user_id,
        exercises = summary.exercises_upserted,
        days = summary.days_imported,
        "imported data"
    );
    Ok(summary)
}

#[derive(Serialize)]
struct CsvRow<'a> {
    date: &'a str,
    exercise: &'a str,
    #[serde(rename = "bodyPart")]
    body_part: &'a str,
    set: usize,
    reps: u32,
    weight: f64,
    volume: f64,
}

/// Export one row per set, oldest day first. Entries whose exercise no longer
/// exists are left out. Returns the number of data rows written.
pub fn write_csv<W: Write>(writer: W, snapshot: &AccountSnapshot) -> Result<usize> {
    let mut wtr = csv::WriterBuilder::new().has_headers(false).from_writer(writer);
    wtr.write_record(CSV_HEADER)?;

    let mut rows = 0;
    for (date, entries) in snapshot.workout_log.iter() {
        for entry in entries {
            let Some(exercise) = snapshot.exercise(&entry.exercise_id) else {
                continue;
            };
            for (i, set) in entry.sets.iter().enumerate() {
                wtr.serialize(CsvRow {
                    date,
                    exercise: &exercise.name,
                    body_part: exercise.body_part.as_str(),
                    set: i + 1,
                    reps: set.reps,
                    weight: set.weight,
                    volume: set.volume(),
                })?;
                rows += 1;
            }
        }
    }
    wtr.flush().context("Failed to write CSV")?;
    Ok(rows)
}
