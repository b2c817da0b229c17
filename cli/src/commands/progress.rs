use anyhow::Result;
use chrono::{Datelike, Local};
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use liftlog_core::db::Database;
use liftlog_core::models::{BodyPart, parse_date_key};
use liftlog_core::service::Session;
use liftlog_core::volume::{BodyPartVolume, SetPolicy, TimeWindow, VolumeQuery, WeekStart};

use super::helpers::{no_neg_zero, parse_date, parse_month};

const LOCALE_SETTING: &str = "locale";
const DEFAULT_LOCALE: &str = "en";
const BAR_WIDTH: usize = 30;

/// Use `locale` and remember it, or fall back to the remembered one.
fn resolve_locale(db: &Database, locale: Option<String>) -> Result<String> {
    if let Some(locale) = locale {
        db.set_setting(LOCALE_SETTING, &locale)?;
        return Ok(locale);
    }
    Ok(db
        .get_setting(LOCALE_SETTING)?
        .unwrap_or_else(|| DEFAULT_LOCALE.to_string()))
}

#[allow(clippy::cast_precision_loss, clippy::cast_sign_loss)]
fn bar(volume: f64, max: f64) -> String {
    if max <= 0.0 {
        return String::new();
    }
    let len = ((volume / max) * BAR_WIDTH as f64).round() as usize;
    "█".repeat(len.max(1))
}

fn window_label(window: TimeWindow) -> &'static str {
    match window {
        TimeWindow::Today => "today",
        TimeWindow::Week => "this week",
        TimeWindow::Month => "this month",
        TimeWindow::Year => "this year",
        TimeWindow::All => "all time",
    }
}

fn print_volume_table(volumes: &[BodyPartVolume]) {
    #[derive(Tabled)]
    struct VolumeRow {
        #[tabled(rename = "Body Part")]
        body_part: String,
        #[tabled(rename = "Volume")]
        volume: String,
        #[tabled(rename = "")]
        bar: String,
    }

    let max = volumes.iter().map(|v| v.volume).fold(0.0, f64::max);
    let rows: Vec<VolumeRow> = volumes
        .iter()
        .map(|v| VolumeRow {
            body_part: format!("{} {}", v.emoji, v.body_part),
            volume: format!("{:.0}", no_neg_zero(v.volume)),
            bar: bar(v.volume, max),
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(1..2)).with(Alignment::right()))
        .to_string();
    println!("{table}");
}

pub(crate) fn cmd_progress(
    session: &Session,
    db: &Database,
    window: &str,
    locale: Option<String>,
    all_sets: bool,
    today: Option<String>,
    json: bool,
) -> Result<()> {
    let window: TimeWindow = window.parse()?;
    let locale = resolve_locale(db, locale)?;
    let mut query = VolumeQuery::new(window, parse_date(today)?);
    query.week_start = WeekStart::from_locale(&locale);
    if all_sets {
        query.policy = SetPolicy::AllSets;
    }
    let volumes = session.volume(&query)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&volumes)?);
    } else if volumes.is_empty() {
        eprintln!("No completed sets {}.", window_label(window));
    } else {
        println!("Volume by body part, {}", window_label(window));
        print_volume_table(&volumes);
    }
    Ok(())
}

pub(crate) fn cmd_calendar(session: &Session, month: Option<&str>, json: bool) -> Result<()> {
    let first = match month {
        Some(m) => parse_month(m)?,
        None => Local::now().date_naive().with_day(1).unwrap_or_default(),
    };
    let days: Vec<(String, Vec<BodyPart>)> = session
        .calendar()?
        .into_iter()
        .filter(|(key, _)| {
            parse_date_key(key).is_some_and(|d| d.year() == first.year() && d.month() == first.month())
        })
        .collect();

    if json {
        let map: serde_json::Map<String, serde_json::Value> = days
            .into_iter()
            .map(|(day, parts)| (day, serde_json::json!(parts)))
            .collect();
        println!("{}", serde_json::to_string_pretty(&map)?);
    } else if days.is_empty() {
        eprintln!("No workouts in {}.", first.format("%B %Y"));
    } else {
        println!("{}", first.format("%B %Y"));
        for (day, parts) in &days {
            let parts = parts
                .iter()
                .map(|p| format!("{} {p}", p.emoji()))
                .collect::<Vec<_>>()
                .join(", ");
            println!("  {day}  {parts}");
        }
    }
    Ok(())
}
