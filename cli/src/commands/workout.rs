use anyhow::{Result, bail};
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use liftlog_core::models::{WorkoutSet, date_key};
use liftlog_core::service::{PlannedExercise, Session};
use liftlog_core::volume::DayEntry;

use super::helpers::{json_error, no_neg_zero, parse_date, resolve_entry, truncate};

fn format_sets(sets: &[WorkoutSet]) -> String {
    sets.iter()
        .map(|s| {
            let mark = if s.completed { " ✓" } else { "" };
            format!("{}×{}{mark}", s.reps, no_neg_zero(s.weight))
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn print_day_table(entries: &[DayEntry]) {
    #[derive(Tabled)]
    struct EntryRow {
        #[tabled(rename = "#")]
        idx: usize,
        #[tabled(rename = "Exercise")]
        exercise: String,
        #[tabled(rename = "Sets (reps×weight)")]
        sets: String,
        #[tabled(rename = "Volume")]
        volume: String,
    }

    let rows: Vec<EntryRow> = entries
        .iter()
        .enumerate()
        .map(|(i, e)| EntryRow {
            idx: i + 1,
            exercise: match (&e.emoji, &e.exercise_name) {
                (Some(emoji), Some(name)) => format!("{emoji} {}", truncate(name, 30)),
                _ => format!("(deleted: {})", truncate(&e.exercise_id, 20)),
            },
            sets: format_sets(&e.sets),
            volume: format!("{:.0}", no_neg_zero(e.total_volume)),
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(3..4)).with(Alignment::right()))
        .to_string();
    println!("{table}");
}

pub(crate) fn cmd_workout_show(session: &Session, date: Option<String>, json: bool) -> Result<()> {
    let date = parse_date(date)?;
    let entries = session.day_detail(date)?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "date": date_key(date),
                "entries": entries,
            }))?
        );
    } else if entries.is_empty() {
        eprintln!(
            "Nothing logged on {}. Use `liftlog workout add` to add an exercise.",
            date_key(date)
        );
    } else {
        println!("Workout for {}", date_key(date));
        print_day_table(&entries);
        let done: f64 = entries
            .iter()
            .flat_map(|e| &e.sets)
            .filter(|s| s.completed)
            .map(WorkoutSet::volume)
            .sum();
        println!("Completed volume: {:.0}", no_neg_zero(done));
    }
    Ok(())
}

pub(crate) fn cmd_workout_add(
    session: &Session,
    exercise_id: &str,
    sets: u32,
    reps: u32,
    weight: f64,
    date: Option<String>,
    json: bool,
) -> Result<()> {
    let date = parse_date(date)?;
    let entry = session.add_to_day(
        date,
        &PlannedExercise {
            exercise_id: exercise_id.to_string(),
            sets,
            reps,
            weight,
        },
    )?;

    if json {
        println!("{}", serde_json::to_string_pretty(&entry)?);
    } else {
        let name = session.exercise(exercise_id).map_or_else(|_| exercise_id.to_string(), |e| e.name);
        println!(
            "Added {name}: {sets} × {reps} @ {} on {}",
            no_neg_zero(weight),
            date_key(date)
        );
    }
    Ok(())
}

pub(crate) fn cmd_workout_remove(
    session: &Session,
    entry: &str,
    date: Option<String>,
    json: bool,
) -> Result<()> {
    let date = parse_date(date)?;
    let day = session.day(date)?;
    let entry_id = match resolve_entry(&day, entry) {
        Ok(found) => found.id.clone(),
        Err(e) if json => {
            println!("{}", json_error(&format!("{e:#}")));
            return Ok(());
        }
        Err(e) => return Err(e),
    };
    session.remove_entry(date, &entry_id)?;

    if json {
        println!("{}", serde_json::json!({ "removed": entry_id, "date": date_key(date) }));
    } else {
        println!("Removed entry from {}", date_key(date));
    }
    Ok(())
}

pub(crate) fn cmd_workout_done(
    session: &Session,
    entry: &str,
    set: usize,
    date: Option<String>,
    json: bool,
) -> Result<()> {
    if set == 0 {
        bail!("Set numbers start at 1");
    }
    let date = parse_date(date)?;
    let day = session.day(date)?;
    let entry_id = resolve_entry(&day, entry)?.id.clone();
    let completed = session.toggle_set(date, &entry_id, set - 1)?;

    if json {
        println!(
            "{}",
            serde_json::json!({ "entry": entry_id, "set": set, "completed": completed })
        );
    } else if completed {
        println!("Set {set} done ✓");
    } else {
        println!("Set {set} marked not done");
    }
    Ok(())
}

pub(crate) fn cmd_workout_copy(
    session: &Session,
    from: String,
    to: Option<String>,
    json: bool,
) -> Result<()> {
    let from = parse_date(Some(from))?;
    let to = parse_date(to)?;
    if from == to {
        bail!("Source and target day are the same");
    }
    let copied = session.copy_day(from, to)?;

    if json {
        println!(
            "{}",
            serde_json::json!({ "from": date_key(from), "to": date_key(to), "copied": copied })
        );
    } else {
        println!(
            "Copied {copied} exercise(s) from {} to {}",
            date_key(from),
            date_key(to)
        );
    }
    Ok(())
}
