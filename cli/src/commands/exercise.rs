use anyhow::Result;
use tabled::{Table, Tabled, settings::Style};

use liftlog_core::models::{BodyPart, Exercise, NewExercise};
use liftlog_core::service::Session;

use super::helpers::{json_error, truncate};

fn print_exercise_table(exercises: &[Exercise]) {
    #[derive(Tabled)]
    struct ExerciseRow {
        #[tabled(rename = "ID")]
        id: String,
        #[tabled(rename = "")]
        emoji: String,
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "Body Part")]
        body_part: String,
        #[tabled(rename = "Custom")]
        custom: String,
        #[tabled(rename = "Description")]
        description: String,
    }

    let rows: Vec<ExerciseRow> = exercises
        .iter()
        .map(|e| ExerciseRow {
            id: truncate(&e.id, 12),
            emoji: e.display_emoji().to_string(),
            name: truncate(&e.name, 30),
            body_part: e.body_part.to_string(),
            custom: if e.is_custom == Some(true) { "yes".into() } else { String::new() },
            description: truncate(&e.description, 40),
        })
        .collect();

    let table = Table::new(&rows).with(Style::rounded()).to_string();
    println!("{table}");
}

pub(crate) fn cmd_exercise_list(session: &Session, body_part: Option<&str>, json: bool) -> Result<()> {
    let filter = body_part.map(str::parse::<BodyPart>).transpose()?;
    let exercises: Vec<Exercise> = session
        .exercises()?
        .into_iter()
        .filter(|e| filter.is_none_or(|part| e.body_part == part))
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&exercises)?);
    } else if exercises.is_empty() {
        eprintln!("No exercises found. Use `liftlog exercise add` to create one.");
    } else {
        print_exercise_table(&exercises);
    }
    Ok(())
}

pub(crate) fn cmd_exercise_add(
    session: &Session,
    name: &str,
    body_part: &str,
    description: &str,
    json: bool,
) -> Result<()> {
    let exercise = session.add_exercise(&NewExercise {
        name: name.to_string(),
        body_part: body_part.parse()?,
        description: description.to_string(),
    })?;

    if json {
        println!("{}", serde_json::to_string_pretty(&exercise)?);
    } else {
        println!(
            "Added {} {} ({}) [id: {}]",
            exercise.display_emoji(),
            exercise.name,
            exercise.body_part,
            exercise.id
        );
    }
    Ok(())
}

pub(crate) fn cmd_exercise_edit(
    session: &Session,
    id: &str,
    name: Option<String>,
    body_part: Option<&str>,
    description: Option<String>,
    json: bool,
) -> Result<()> {
    let current = session.exercise(id)?;
    let update = NewExercise {
        name: name.unwrap_or(current.name),
        body_part: match body_part {
            Some(part) => part.parse()?,
            None => current.body_part,
        },
        description: description.unwrap_or(current.description),
    };
    let exercise = session.update_exercise(id, &update)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&exercise)?);
    } else {
        println!(
            "Updated {} {} ({})",
            exercise.display_emoji(),
            exercise.name,
            exercise.body_part
        );
    }
    Ok(())
}

pub(crate) fn cmd_exercise_delete(session: &Session, id: &str, json: bool) -> Result<()> {
    let deleted = session.delete_exercise(id)?;
    if json {
        if deleted {
            println!("{}", serde_json::json!({ "deleted": id }));
        } else {
            println!("{}", json_error(&format!("Exercise '{id}' not found")));
        }
    } else if deleted {
        println!("Deleted exercise {id}. Logged workouts that used it are kept.");
    } else {
        eprintln!("Exercise '{id}' not found");
    }
    Ok(())
}
