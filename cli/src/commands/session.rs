use anyhow::Result;
use serde::Serialize;

use liftlog_core::auth::{AuthError, AuthErrorKind, Identity};
use liftlog_core::migration::{CleanupPolicy, MigrationOutcome, MigrationReport};

use super::Backend;
use super::helpers::password_or_prompt;
use crate::config::SavedSession;

fn describe(err: &AuthError) -> &'static str {
    match err.kind {
        AuthErrorKind::InvalidEmail => "That email address is not valid",
        AuthErrorKind::WrongCredentials => "Incorrect email or password",
        AuthErrorKind::IncorrectCurrentPassword => "Current password is incorrect",
        AuthErrorKind::EmailAlreadyInUse => "An account with this email already exists",
        AuthErrorKind::WeakPassword => "Password must be at least 6 characters",
        AuthErrorKind::Unknown => "Something went wrong, please try again",
    }
}

fn auth_failed(err: AuthError) -> anyhow::Error {
    let message = describe(&err);
    anyhow::Error::new(err).context(message)
}

fn cleanup_policy(keep_legacy: bool) -> CleanupPolicy {
    if keep_legacy {
        CleanupPolicy::Keep
    } else {
        CleanupPolicy::RemoveAfterCommit
    }
}

fn print_report(report: &MigrationReport) {
    match report.outcome {
        MigrationOutcome::AlreadyInitialized => {}
        MigrationOutcome::Seeded => println!(
            "Set up your exercise library with {} built-in exercises.",
            report.seed_exercises_added
        ),
        MigrationOutcome::Migrated => {
            println!(
                "Moved {} exercises and {} workout days from this device to your account.",
                report.exercises_written.saturating_sub(report.seed_exercises_added),
                report.log_days
            );
            if report.seed_exercises_added > 0 {
                println!("  Added {} missing built-in exercises.", report.seed_exercises_added);
            }
            if report.ids_regenerated > 0 {
                println!("  Gave {} exercises a new id.", report.ids_regenerated);
            }
            if report.exercises_dropped > 0 {
                eprintln!("  Skipped {} saved exercises without a name.", report.exercises_dropped);
            }
            if report.entries_dropped > 0 {
                eprintln!("  Skipped {} logged entries with no usable sets.", report.entries_dropped);
            }
            for namespace in &report.corrupt {
                eprintln!("  Warning: saved {namespace} on this device were unreadable and were skipped.");
            }
            if !report.legacy_cleared {
                println!("  Device copy kept.");
            }
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LoginOutput<'a> {
    identity: &'a Identity,
    migration: &'a MigrationReport,
}

pub(crate) fn cmd_login(
    backend: &Backend,
    email: &str,
    password: Option<String>,
    sign_up: bool,
    keep_legacy: bool,
    json: bool,
) -> Result<()> {
    let password = password_or_prompt(password, "Password")?;
    let identity = if sign_up {
        backend.identity.sign_up(email, &password)
    } else {
        backend.identity.sign_in(email, &password)
    }
    .map_err(auth_failed)?;

    // Saved before migrating so a failed migration is retried by the next
    // command, with the same cleanup policy.
    let saved = SavedSession {
        identity,
        cleanup: cleanup_policy(keep_legacy),
    };
    backend.config.save_session(&saved)?;
    let session = backend.open_session(saved)?;

    if json {
        let output = LoginOutput {
            identity: session.identity(),
            migration: session.migration_report(),
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        let verb = if sign_up { "Created account" } else { "Logged in" };
        println!("{verb} as {}", session.identity().email);
        print_report(session.migration_report());
    }
    Ok(())
}

pub(crate) fn cmd_logout(backend: &Backend, json: bool) -> Result<()> {
    let identity = backend.config.load_session()?.map(|saved| saved.identity);
    let removed = backend.config.clear_session()?;
    if json {
        println!("{}", serde_json::json!({ "loggedOut": removed }));
    } else if let Some(identity) = identity.filter(|_| removed) {
        println!("Logged out {}", identity.email);
    } else {
        eprintln!("Not logged in.");
    }
    Ok(())
}

pub(crate) fn cmd_whoami(backend: &Backend, json: bool) -> Result<()> {
    let identity = backend.config.load_session()?.map(|saved| saved.identity);
    let store = backend.config.remote.as_deref().unwrap_or("local");
    if json {
        println!(
            "{}",
            serde_json::json!({ "identity": identity, "store": store })
        );
    } else if let Some(identity) = identity {
        println!("{} ({})", identity.email, identity.user_id);
        println!("Store: {store}");
    } else {
        eprintln!("Not logged in. Run `liftlog login` first.");
    }
    Ok(())
}

/// Run the migration coordinator for the logged-in account and show the result.
pub(crate) fn cmd_migrate(backend: &Backend, keep_legacy: bool, json: bool) -> Result<()> {
    let mut saved = backend
        .config
        .load_session()?
        .ok_or_else(|| anyhow::anyhow!("Not logged in. Run `liftlog login` first."))?;
    if keep_legacy {
        saved.cleanup = CleanupPolicy::Keep;
    }
    let session = backend.open_session(saved)?;
    let report = session.migration_report();

    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else if report.outcome == MigrationOutcome::AlreadyInitialized {
        println!("Account already set up. Nothing to migrate.");
    } else {
        print_report(report);
    }
    Ok(())
}

pub(crate) fn cmd_passwd(
    backend: &Backend,
    current: Option<String>,
    new: Option<String>,
    json: bool,
) -> Result<()> {
    let session = backend.session()?;
    let current = password_or_prompt(current, "Current password")?;
    let new = password_or_prompt(new, "New password")?;
    session
        .change_password(backend.identity.as_ref(), &current, &new)
        .map_err(|e| match e.downcast::<AuthError>() {
            Ok(auth) => auth_failed(auth),
            Err(other) => other,
        })?;

    if json {
        println!("{}", serde_json::json!({ "passwordChanged": true }));
    } else {
        println!("Password changed.");
    }
    Ok(())
}
