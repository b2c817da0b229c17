use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use anyhow::{Result, bail};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Fallback emoji when a body part has none (never happens for known parts).
pub const DEFAULT_EMOJI: &str = "💪";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum BodyPart {
    Chest,
    Back,
    Legs,
    Shoulders,
    Arms,
    Core,
}

impl BodyPart {
    pub const ALL: [BodyPart; 6] = [
        BodyPart::Chest,
        BodyPart::Back,
        BodyPart::Legs,
        BodyPart::Shoulders,
        BodyPart::Arms,
        BodyPart::Core,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            BodyPart::Chest => "Chest",
            BodyPart::Back => "Back",
            BodyPart::Legs => "Legs",
            BodyPart::Shoulders => "Shoulders",
            BodyPart::Arms => "Arms",
            BodyPart::Core => "Core",
        }
    }

    #[must_use]
    pub fn emoji(self) -> &'static str {
        match self {
            BodyPart::Chest => "🏋️",
            BodyPart::Back => "🧗",
            BodyPart::Legs => "🏃",
            BodyPart::Shoulders => "🤷",
            BodyPart::Arms => DEFAULT_EMOJI,
            BodyPart::Core => "🧘",
        }
    }
}

impl fmt::Display for BodyPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BodyPart {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let lower = s.trim().to_lowercase();
        BodyPart::ALL
            .into_iter()
            .find(|p| p.as_str().to_lowercase() == lower)
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "Invalid body part '{s}'. Must be one of: Chest, Back, Legs, Shoulders, Arms, Core"
                )
            })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Exercise {
    pub id: String,
    pub name: String,
    pub body_part: BodyPart,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emoji: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_custom: Option<bool>,
}

impl Exercise {
    /// Emoji stored on the record, or the one derived from its body part.
    #[must_use]
    pub fn display_emoji(&self) -> &str {
        self.emoji.as_deref().unwrap_or_else(|| self.body_part.emoji())
    }
}

/// An exercise as found in legacy local storage or an import file.
///
/// Same JSON shape as [`Exercise`] but `id` and `emoji` may be missing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExerciseRecord {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    pub body_part: BodyPart,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub emoji: Option<String>,
    #[serde(default)]
    pub is_custom: Option<bool>,
}

impl ExerciseRecord {
    /// Turn into a stored exercise, filling in the emoji from the body part when absent.
    #[must_use]
    pub fn into_exercise(self, id: String) -> Exercise {
        let emoji = self
            .emoji
            .filter(|e| !e.trim().is_empty())
            .unwrap_or_else(|| self.body_part.emoji().to_string());
        Exercise {
            id,
            name: self.name,
            body_part: self.body_part,
            description: self.description,
            emoji: Some(emoji),
            is_custom: self.is_custom,
        }
    }

    /// The record's id if it carries a usable one.
    #[must_use]
    pub fn usable_id(&self) -> Option<&str> {
        self.id.as_deref().map(str::trim).filter(|id| !id.is_empty())
    }
}

#[derive(Debug, Clone)]
pub struct NewExercise {
    pub name: String,
    pub body_part: BodyPart,
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WorkoutSet {
    pub reps: u32,
    pub weight: f64,
    #[serde(default)]
    pub completed: bool,
}

impl WorkoutSet {
    #[must_use]
    pub fn volume(&self) -> f64 {
        f64::from(self.reps) * self.weight
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkoutExercise {
    pub id: String,
    pub exercise_id: String,
    pub sets: Vec<WorkoutSet>,
}

impl WorkoutExercise {
    /// Sum of reps × weight over every set, completed or not.
    #[must_use]
    pub fn total_volume(&self) -> f64 {
        self.sets.iter().map(WorkoutSet::volume).sum()
    }
}

/// Date-keyed workout log. Days without exercises are never stored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkoutLog(BTreeMap<String, Vec<WorkoutExercise>>);

impl WorkoutLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Exercises logged on `date`; empty when the day has no entry.
    #[must_use]
    pub fn day(&self, date: &str) -> &[WorkoutExercise] {
        self.0.get(date).map_or(&[], Vec::as_slice)
    }

    /// Replace a whole day. An empty list removes the date key.
    pub fn set_day(&mut self, date: impl Into<String>, exercises: Vec<WorkoutExercise>) {
        let date = date.into();
        if exercises.is_empty() {
            self.0.remove(&date);
        } else {
            self.0.insert(date, exercises);
        }
    }

    pub fn day_mut(&mut self, date: &str) -> Option<&mut Vec<WorkoutExercise>> {
        self.0.get_mut(date)
    }

    /// Drop every date whose exercise list is empty.
    pub fn normalize(&mut self) {
        self.0.retain(|_, exercises| !exercises.is_empty());
    }

    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.normalize();
        self
    }

    /// Overlay `other` onto this log: dates in `other` replace ours, the rest are kept.
    pub fn merge(&mut self, other: WorkoutLog) {
        for (date, exercises) in other.0 {
            self.set_day(date, exercises);
        }
    }

    /// Chronological iteration (ISO date keys sort lexically).
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<WorkoutExercise>)> {
        self.0.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, Vec<WorkoutExercise>)> for WorkoutLog {
    fn from_iter<I: IntoIterator<Item = (String, Vec<WorkoutExercise>)>>(iter: I) -> Self {
        let mut log = WorkoutLog::new();
        for (date, exercises) in iter {
            log.set_day(date, exercises);
        }
        log
    }
}

/// Everything stored for one account.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountSnapshot {
    pub exercises: Vec<Exercise>,
    pub workout_log: WorkoutLog,
}

impl AccountSnapshot {
    #[must_use]
    pub fn exercise(&self, id: &str) -> Option<&Exercise> {
        self.exercises.iter().find(|e| e.id == id)
    }
}

#[must_use]
pub fn date_key(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

#[must_use]
pub fn parse_date_key(key: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(key, DATE_FORMAT).ok()
}

pub fn validate_date_key(key: &str) -> Result<NaiveDate> {
    parse_date_key(key).ok_or_else(|| anyhow::anyhow!("Invalid date '{key}'. Use YYYY-MM-DD"))
}

pub fn validate_exercise(exercise: &Exercise) -> Result<()> {
    if exercise.id.trim().is_empty() {
        bail!("Exercise id must not be empty");
    }
    if exercise.name.trim().is_empty() {
        bail!("Exercise name must not be empty");
    }
    Ok(())
}

pub fn validate_new_exercise(exercise: &NewExercise) -> Result<()> {
    if exercise.name.trim().chars().count() < 3 {
        bail!("Exercise name must be at least 3 characters");
    }
    if exercise.description.trim().chars().count() < 10 {
        bail!("Exercise description must be at least 10 characters");
    }
    Ok(())
}

pub fn validate_set(set: &WorkoutSet) -> Result<()> {
    if !set.weight.is_finite() || set.weight < 0.0 {
        bail!("Weight must be a non-negative number (got {})", set.weight);
    }
    Ok(())
}

pub fn validate_workout_exercise(entry: &WorkoutExercise) -> Result<()> {
    if entry.id.trim().is_empty() {
        bail!("Workout entry id must not be empty");
    }
    if entry.exercise_id.trim().is_empty() {
        bail!("Workout entry must reference an exercise");
    }
    if entry.sets.is_empty() {
        bail!("At least one set is required");
    }
    for set in &entry.sets {
        validate_set(set)?;
    }
    Ok(())
}

pub fn validate_workout_log(log: &WorkoutLog) -> Result<()> {
    for (date, exercises) in log.iter() {
        validate_date_key(date)?;
        for entry in exercises {
            validate_workout_exercise(entry)?;
        }
    }
    Ok(())
}
