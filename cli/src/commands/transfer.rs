use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use anyhow::{Context, Result};

use liftlog_core::service::Session;

/// Write the CSV export to `output`, or to stdout when no path is given.
pub(crate) fn cmd_export(session: &Session, output: Option<&Path>, json: bool) -> Result<()> {
    let Some(path) = output else {
        session.export_csv(std::io::stdout().lock())?;
        return Ok(());
    };

    let file = File::create(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    let rows = session.export_csv(BufWriter::new(file))?;

    if json {
        println!(
            "{}",
            serde_json::json!({ "path": path.display().to_string(), "rows": rows })
        );
    } else {
        println!("Exported {rows} set(s) to {}", path.display());
    }
    Ok(())
}

pub(crate) fn cmd_import(session: &Session, file: &Path, json: bool) -> Result<()> {
    let raw = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let summary = session
        .import_json(&raw)
        .with_context(|| format!("Failed to import {}", file.display()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!(
            "Imported {} exercise(s) and {} workout day(s)",
            summary.exercises_upserted, summary.days_imported
        );
    }
    Ok(())
}
