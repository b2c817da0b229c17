use anyhow::{Context, Result, bail};
use chrono::{Local, NaiveDate};
use serde::Serialize;

use liftlog_core::models::WorkoutExercise;

pub(crate) fn parse_date(date_str: Option<String>) -> Result<NaiveDate> {
    match date_str {
        None => Ok(Local::now().date_naive()),
        Some(s) => match s.as_str() {
            "today" => Ok(Local::now().date_naive()),
            "yesterday" => Ok(Local::now().date_naive() - chrono::Duration::days(1)),
            "tomorrow" => Ok(Local::now().date_naive() + chrono::Duration::days(1)),
            _ => NaiveDate::parse_from_str(&s, "%Y-%m-%d").with_context(|| {
                format!("Invalid date '{s}'. Use YYYY-MM-DD or today/yesterday/tomorrow")
            }),
        },
    }
}

/// Parse `YYYY-MM` into the first day of that month.
pub(crate) fn parse_month(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(&format!("{}-01", s.trim()), "%Y-%m-%d")
        .with_context(|| format!("Invalid month '{s}'. Use YYYY-MM"))
}

/// Find a logged entry by its 1-based position in the day, its id, or a
/// unique id prefix.
pub(crate) fn resolve_entry<'a>(day: &'a [WorkoutExercise], reference: &str) -> Result<&'a WorkoutExercise> {
    let reference = reference.trim();
    if let Ok(n) = reference.parse::<usize>() {
        if (1..=day.len()).contains(&n) {
            return Ok(&day[n - 1]);
        }
    }
    if let Some(entry) = day.iter().find(|e| e.id == reference) {
        return Ok(entry);
    }
    let mut matches = day.iter().filter(|e| !reference.is_empty() && e.id.starts_with(reference));
    match (matches.next(), matches.next()) {
        (Some(entry), None) => Ok(entry),
        (Some(_), Some(_)) => bail!("Entry reference '{reference}' is ambiguous"),
        _ => bail!("No entry '{reference}' on this day"),
    }
}

/// Use `value` if given, otherwise ask on the terminal without echoing input.
pub(crate) fn password_or_prompt(value: Option<String>, prompt: &str) -> Result<String> {
    if let Some(v) = value {
        return Ok(v);
    }
    rpassword::prompt_password(format!("{prompt}: ")).context("Failed to read password")
}

pub(crate) fn json_error(message: &str) -> String {
    #[derive(Serialize)]
    struct CliError<'a> {
        error: &'a str,
    }
    serde_json::to_string(&CliError { error: message })
        .unwrap_or_else(|_| format!("{{\"error\":\"{message}\"}}"))
}

pub(crate) fn no_neg_zero(v: f64) -> f64 {
    if v == 0.0 { 0.0 } else { v }
}

pub(crate) fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let end = s.char_indices().nth(max - 3).map_or(s.len(), |(i, _)| i);
        format!("{}...", &s[..end])
    }
}
