use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use anyhow::Result;
use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::models::{BodyPart, Exercise, WorkoutLog, WorkoutSet, parse_date_key};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeWindow {
    Today,
    #[default]
    Week,
    Month,
    Year,
    All,
}

impl TimeWindow {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            TimeWindow::Today => "today",
            TimeWindow::Week => "week",
            TimeWindow::Month => "month",
            TimeWindow::Year => "year",
            TimeWindow::All => "all",
        }
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimeWindow {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "today" => Ok(TimeWindow::Today),
            "week" => Ok(TimeWindow::Week),
            "month" => Ok(TimeWindow::Month),
            "year" => Ok(TimeWindow::Year),
            "all" => Ok(TimeWindow::All),
            _ => anyhow::bail!("Invalid window '{s}'. Must be one of: today, week, month, year, all"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum WeekStart {
    Monday,
    #[default]
    Sunday,
}

impl WeekStart {
    /// Spanish locales start the week on Monday, everything else on Sunday.
    #[must_use]
    pub fn from_locale(locale: &str) -> Self {
        let primary = locale.split(['-', '_']).next().unwrap_or_default();
        if primary.eq_ignore_ascii_case("es") {
            WeekStart::Monday
        } else {
            WeekStart::Sunday
        }
    }

    /// First day of the week containing `date`.
    #[must_use]
    pub fn start_of_week(self, date: NaiveDate) -> NaiveDate {
        let offset = match self {
            WeekStart::Monday => date.weekday().num_days_from_monday(),
            WeekStart::Sunday => date.weekday().num_days_from_sunday(),
        };
        date - Duration::days(i64::from(offset))
    }
}

/// Which sets contribute to volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SetPolicy {
    #[default]
    CompletedOnly,
    AllSets,
}

impl SetPolicy {
    #[must_use]
    pub fn counts(self, set: &WorkoutSet) -> bool {
        match self {
            SetPolicy::CompletedOnly => set.completed,
            SetPolicy::AllSets => true,
        }
    }
}

impl FromStr for SetPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "completed" | "completed_only" => Ok(SetPolicy::CompletedOnly),
            "all" | "all_sets" => Ok(SetPolicy::AllSets),
            _ => anyhow::bail!("Invalid set policy '{s}'. Must be one of: completed, all"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct VolumeQuery {
    pub window: TimeWindow,
    pub today: NaiveDate,
    pub week_start: WeekStart,
    pub policy: SetPolicy,
}

impl VolumeQuery {
    #[must_use]
    pub fn new(window: TimeWindow, today: NaiveDate) -> Self {
        Self {
            window,
            today,
            week_start: WeekStart::default(),
            policy: SetPolicy::default(),
        }
    }

    #[must_use]
    pub fn contains(&self, date: NaiveDate) -> bool {
        let today = self.today;
        match self.window {
            TimeWindow::Today => date == today,
            TimeWindow::Week => {
                self.week_start.start_of_week(date) == self.week_start.start_of_week(today)
            }
            TimeWindow::Month => date.year() == today.year() && date.month() == today.month(),
            TimeWindow::Year => date.year() == today.year(),
            TimeWindow::All => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BodyPartVolume {
    pub body_part: BodyPart,
    pub emoji: &'static str,
    pub volume: f64,
}

fn index_exercises(exercises: &[Exercise]) -> HashMap<&str, &Exercise> {
    exercises.iter().map(|e| (e.id.as_str(), e)).collect()
}

/// Total reps × weight per body part for the query window, largest first.
///
/// Unparsable dates and entries whose exercise no longer exists are skipped.
/// Body parts with zero volume are left out.
#[must_use]
pub fn volume_by_body_part(
    log: &WorkoutLog,
    exercises: &[Exercise],
    query: &VolumeQuery,
) -> Vec<BodyPartVolume> {
    let by_id = index_exercises(exercises);
    let mut totals: BTreeMap<BodyPart, f64> = BTreeMap::new();

    for (date, entries) in log.iter() {
        let Some(day) = parse_date_key(date) else {
            continue;
        };
        if !query.contains(day) {
            continue;
        }
        for entry in entries {
            let Some(exercise) = by_id.get(entry.exercise_id.as_str()) else {
                continue;
            };
            let volume: f64 = entry
                .sets
                .iter()
                .filter(|s| query.policy.counts(s))
                .map(WorkoutSet::volume)
                .sum();
            *totals.entry(exercise.body_part).or_default() += volume;
        }
    }

    let mut result: Vec<BodyPartVolume> = totals
        .into_iter()
        .filter(|(_, volume)| *volume > 0.0)
        .map(|(body_part, volume)| BodyPartVolume {
            body_part,
            emoji: body_part.emoji(),
            volume,
        })
        .collect();
    // Stable sort keeps body-part order for ties.
    result.sort_by(|a, b| b.volume.total_cmp(&a.volume));
    result
}

/// Distinct body parts trained on each logged day, in first-seen order.
#[must_use]
pub fn daily_body_parts(log: &WorkoutLog, exercises: &[Exercise]) -> BTreeMap<String, Vec<BodyPart>> {
    let by_id = index_exercises(exercises);
    let mut days = BTreeMap::new();
    for (date, entries) in log.iter() {
        let mut parts: Vec<BodyPart> = Vec::new();
        for entry in entries {
            if let Some(exercise) = by_id.get(entry.exercise_id.as_str()) {
                if !parts.contains(&exercise.body_part) {
                    parts.push(exercise.body_part);
                }
            }
        }
        if !parts.is_empty() {
            days.insert(date.clone(), parts);
        }
    }
    days
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DayEntry {
    pub workout_exercise_id: String,
    pub exercise_id: String,
    /// `None` when the exercise was deleted after being logged.
    pub exercise_name: Option<String>,
    pub body_part: Option<BodyPart>,
    pub emoji: Option<String>,
    pub total_volume: f64,
    pub sets: Vec<WorkoutSet>,
}

/// Everything logged on `date`, joined with the exercise library.
#[must_use]
pub fn day_detail(log: &WorkoutLog, exercises: &[Exercise], date: &str) -> Vec<DayEntry> {
    let by_id = index_exercises(exercises);
    log.day(date)
        .iter()
        .map(|entry| {
            let exercise = by_id.get(entry.exercise_id.as_str());
            DayEntry {
                workout_exercise_id: entry.id.clone(),
                exercise_id: entry.exercise_id.clone(),
                exercise_name: exercise.map(|e| e.name.clone()),
                body_part: exercise.map(|e| e.body_part),
                emoji: exercise.map(|e| e.display_emoji().to_string()),
                total_volume: entry.total_volume(),
                sets: entry.sets.clone(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::WorkoutExercise;
    use crate::seed::builtin_exercises;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn sets(n: usize, reps: u32, weight: f64, completed: bool) -> Vec<WorkoutSet> {
        vec![WorkoutSet { reps, weight, completed }; n]
    }

    fn entry(id: &str, exercise_id: &str, sets: Vec<WorkoutSet>) -> WorkoutExercise {
        WorkoutExercise {
            id: id.to_string(),
            exercise_id: exercise_id.to_string(),
            sets,
        }
    }

    fn log_of(days: Vec<(&str, Vec<WorkoutExercise>)>) -> WorkoutLog {
        days.into_iter().map(|(d, e)| (d.to_string(), e)).collect()
    }

    #[test]
    fn test_three_sets_of_bench_this_week() {
        // 2024-06-15 is a Saturday.
        let log = log_of(vec![("2024-06-15", vec![entry("w1", "ex1", sets(3, 8, 55.0, true))])]);
        let query = VolumeQuery::new(TimeWindow::Week, date("2024-06-15"));

        let result = volume_by_body_part(&log, &builtin_exercises(), &query);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].body_part, BodyPart::Chest);
        assert!((result[0].volume - 1320.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_outside_window_is_zero() {
        let log = log_of(vec![("2024-06-15", vec![entry("w1", "ex1", sets(3, 8, 55.0, true))])]);
        let query = VolumeQuery::new(TimeWindow::Week, date("2024-06-23"));
        assert!(volume_by_body_part(&log, &builtin_exercises(), &query).is_empty());

        let query = VolumeQuery::new(TimeWindow::Today, date("2024-06-16"));
        assert!(volume_by_body_part(&log, &builtin_exercises(), &query).is_empty());
    }

    #[test]
    fn test_week_start_depends_on_locale() {
        // Sunday 2024-06-16 vs Saturday 2024-06-15.
        let log = log_of(vec![("2024-06-15", vec![entry("w1", "ex7", sets(1, 5, 100.0, true))])]);
        let mut query = VolumeQuery::new(TimeWindow::Week, date("2024-06-16"));

        query.week_start = WeekStart::from_locale("en");
        assert!(volume_by_body_part(&log, &builtin_exercises(), &query).is_empty());

        query.week_start = WeekStart::from_locale("es");
        assert_eq!(volume_by_body_part(&log, &builtin_exercises(), &query).len(), 1);
    }

    #[test]
    fn test_from_locale() {
        assert_eq!(WeekStart::from_locale("es"), WeekStart::Monday);
        assert_eq!(WeekStart::from_locale("es-MX"), WeekStart::Monday);
        assert_eq!(WeekStart::from_locale("en"), WeekStart::Sunday);
        assert_eq!(WeekStart::from_locale(""), WeekStart::Sunday);
    }

    #[test]
    fn test_month_and_year_windows() {
        let log = log_of(vec![
            ("2024-06-01", vec![entry("a", "ex4", sets(1, 10, 10.0, true))]),
            ("2024-05-31", vec![entry("b", "ex4", sets(1, 10, 20.0, true))]),
            ("2023-06-01", vec![entry("c", "ex4", sets(1, 10, 40.0, true))]),
        ]);
        let today = date("2024-06-20");
        let vol = |window| {
            volume_by_body_part(&log, &builtin_exercises(), &VolumeQuery::new(window, today))
                .first()
                .map_or(0.0, |v| v.volume)
        };
        assert!((vol(TimeWindow::Month) - 100.0).abs() < f64::EPSILON);
        assert!((vol(TimeWindow::Year) - 300.0).abs() < f64::EPSILON);
        assert!((vol(TimeWindow::All) - 700.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_incomplete_sets_depend_on_policy() {
        let mut mixed = sets(2, 10, 50.0, true);
        mixed.push(WorkoutSet { reps: 10, weight: 50.0, completed: false });
        let log = log_of(vec![("2024-06-15", vec![entry("w", "ex10", mixed)])]);
        let mut query = VolumeQuery::new(TimeWindow::All, date("2024-06-15"));

        let completed = volume_by_body_part(&log, &builtin_exercises(), &query);
        assert!((completed[0].volume - 1000.0).abs() < f64::EPSILON);

        query.policy = SetPolicy::AllSets;
        let all = volume_by_body_part(&log, &builtin_exercises(), &query);
        assert!((all[0].volume - 1500.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_dangling_and_bad_dates_skipped() {
        let log = log_of(vec![
            ("2024-06-15", vec![entry("w1", "gone", sets(3, 8, 55.0, true))]),
            ("yesterday", vec![entry("w2", "ex1", sets(3, 8, 55.0, true))]),
        ]);
        let query = VolumeQuery::new(TimeWindow::All, date("2024-06-15"));
        assert!(volume_by_body_part(&log, &builtin_exercises(), &query).is_empty());
    }

    #[test]
    fn test_sorted_descending_without_zero_parts() {
        let log = log_of(vec![(
            "2024-06-15",
            vec![
                entry("a", "ex1", sets(1, 10, 10.0, true)),
                entry("b", "ex7", sets(1, 10, 100.0, true)),
                entry("c", "ex14", sets(1, 60, 0.0, true)),
            ],
        )]);
        let query = VolumeQuery::new(TimeWindow::All, date("2024-06-15"));
        let parts: Vec<BodyPart> = volume_by_body_part(&log, &builtin_exercises(), &query)
            .into_iter()
            .map(|v| v.body_part)
            .collect();
        assert_eq!(parts, [BodyPart::Legs, BodyPart::Chest]);
    }

    #[test]
    fn test_window_parse() {
        assert_eq!("Month".parse::<TimeWindow>().unwrap(), TimeWindow::Month);
        assert!("fortnight".parse::<TimeWindow>().is_err());
        assert_eq!("all".parse::<SetPolicy>().unwrap(), SetPolicy::AllSets);
    }

    #[test]
    fn test_daily_body_parts_first_seen_order() {
        let log = log_of(vec![
            (
                "2024-06-15",
                vec![
                    entry("a", "ex7", sets(1, 1, 1.0, false)),
                    entry("b", "ex1", sets(1, 1, 1.0, false)),
                    entry("c", "ex8", sets(1, 1, 1.0, false)),
                    entry("d", "gone", sets(1, 1, 1.0, false)),
                ],
            ),
            ("2024-06-16", vec![entry("e", "gone", sets(1, 1, 1.0, false))]),
        ]);
        let days = daily_body_parts(&log, &builtin_exercises());
        assert_eq!(days.len(), 1);
        assert_eq!(days["2024-06-15"], [BodyPart::Legs, BodyPart::Chest]);
    }

    #[test]
    fn test_day_detail() {
        let log = log_of(vec![(
            "2024-06-15",
            vec![
                entry("a", "ex1", sets(2, 10, 50.0, false)),
                entry("b", "gone", sets(1, 5, 5.0, true)),
            ],
        )]);
        let detail = day_detail(&log, &builtin_exercises(), "2024-06-15");
        assert_eq!(detail.len(), 2);
        assert_eq!(detail[0].exercise_name.as_deref(), Some("benchPress"));
        assert!((detail[0].total_volume - 1000.0).abs() < f64::EPSILON);
        assert_eq!(detail[1].exercise_name, None);
        assert_eq!(detail[1].body_part, None);
        assert!(day_detail(&log, &builtin_exercises(), "2024-06-16").is_empty());
    }
}
