mod commands;
mod config;
mod remote;
mod server;

use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::commands::{
    Backend, cmd_calendar, cmd_exercise_add, cmd_exercise_delete, cmd_exercise_edit,
    cmd_exercise_list, cmd_export, cmd_import, cmd_login, cmd_logout, cmd_migrate, cmd_passwd,
    cmd_progress, cmd_whoami, cmd_workout_add, cmd_workout_copy, cmd_workout_done,
    cmd_workout_remove, cmd_workout_show,
};
use crate::config::Config;
use liftlog_core::legacy::FileStorage;

#[derive(Parser)]
#[command(
    name = "liftlog",
    version,
    about = "A simple workout tracker CLI",
    long_about = "\n\n  ██╗     ██╗███████╗████████╗██╗      ██████╗  ██████╗
  ██║     ██║██╔════╝╚══██╔══╝██║     ██╔═══██╗██╔════╝
  ██║     ██║█████╗     ██║   ██║     ██║   ██║██║  ███╗
  ██║     ██║██╔══╝     ██║   ██║     ██║   ██║██║   ██║
  ███████╗██║██║        ██║   ███████╗╚██████╔╝╚██████╔╝
  ╚══════╝╚═╝╚═╝        ╚═╝   ╚══════╝ ╚═════╝  ╚═════╝
        every set counts.
"
)]
struct Cli {
    /// Use the account store of a `liftlog serve` instance (e.g. http://192.168.1.5:8080)
    #[arg(long, global = true, value_name = "URL")]
    remote: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in (or create an account) and move this device's data into it
    Login {
        /// Account email
        email: String,
        /// Password (prompted for when omitted)
        #[arg(long)]
        password: Option<String>,
        /// Create a new account instead of signing in
        #[arg(long)]
        sign_up: bool,
        /// Keep this device's copy of migrated data
        #[arg(long)]
        keep_legacy: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Forget the saved login
    Logout {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the logged-in account
    Whoami {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Move this device's data into the logged-in account if not done yet
    Migrate {
        /// Keep this device's copy of migrated data
        #[arg(long)]
        keep_legacy: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Change the account password
    Passwd {
        /// Current password (prompted for when omitted)
        #[arg(long)]
        current: Option<String>,
        /// New password (prompted for when omitted)
        #[arg(long)]
        new: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Manage the exercise library
    Exercise {
        #[command(subcommand)]
        command: ExerciseCommands,
    },
    /// Log and review workouts
    Workout {
        #[command(subcommand)]
        command: WorkoutCommands,
    },
    /// Show training volume per body part
    Progress {
        /// Time window: today, week, month, year, all
        #[arg(short, long, default_value = "week")]
        window: String,
        /// Locale deciding the first day of the week (remembered, e.g. "es" starts on Monday)
        #[arg(long)]
        locale: Option<String>,
        /// Count every set, not only completed ones
        #[arg(long)]
        all_sets: bool,
        /// Reference day (YYYY-MM-DD, default: today)
        #[arg(long)]
        today: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show which body parts were trained on each day of a month
    Calendar {
        /// Month (YYYY-MM, default: current month)
        month: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Export all logged sets as CSV
    Export {
        /// Output file (default: stdout)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Import exercises and/or a workout log from a JSON file
    Import {
        /// Path to the JSON file
        file: PathBuf,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Start the REST API server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "8080")]
        port: u16,
        /// Address to bind to (default: 127.0.0.1, use 0.0.0.0 to expose to network)
        #[arg(short, long, default_value = "127.0.0.1")]
        bind: String,
        /// Disable API key authentication (for development/testing)
        #[arg(long)]
        no_auth: bool,
    },
}

#[derive(Subcommand)]
enum ExerciseCommands {
    /// List exercises
    List {
        /// Only show one body part: Chest, Back, Legs, Shoulders, Arms, Core
        #[arg(short, long)]
        body_part: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Add a custom exercise
    Add {
        /// Exercise name (at least 3 characters)
        name: String,
        /// Body part: Chest, Back, Legs, Shoulders, Arms, Core
        #[arg(short, long)]
        body_part: String,
        /// Description (at least 10 characters)
        #[arg(short, long)]
        description: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Edit an exercise
    Edit {
        /// Exercise ID
        id: String,
        /// New name
        #[arg(long)]
        name: Option<String>,
        /// New body part
        #[arg(short, long)]
        body_part: Option<String>,
        /// New description
        #[arg(short, long)]
        description: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete an exercise (logged workouts keep their entries)
    Delete {
        /// Exercise ID
        id: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum WorkoutCommands {
    /// Show a day's workout (defaults to today)
    Show {
        /// Date (YYYY-MM-DD or today/yesterday/tomorrow)
        date: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Add an exercise to a day
    Add {
        /// Exercise ID
        exercise_id: String,
        /// Number of sets (1-10)
        #[arg(short, long, default_value = "3")]
        sets: u32,
        /// Reps per set (1-100)
        #[arg(short, long, default_value = "10")]
        reps: u32,
        /// Weight per rep (0-1000)
        #[arg(short, long, default_value = "0")]
        weight: f64,
        /// Date (YYYY-MM-DD or today/yesterday/tomorrow, default: today)
        #[arg(long)]
        date: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Remove an exercise from a day
    Remove {
        /// Entry number from `workout show`, or its ID
        entry: String,
        /// Date (default: today)
        #[arg(long)]
        date: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Toggle a set between done and not done
    Done {
        /// Entry number from `workout show`, or its ID
        entry: String,
        /// Set number, starting at 1
        set: usize,
        /// Date (default: today)
        #[arg(long)]
        date: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Copy a day's exercises onto another day
    Copy {
        /// Source date (YYYY-MM-DD or today/yesterday)
        from: String,
        /// Target date (default: today)
        #[arg(long)]
        to: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

async fn serve(backend: &Backend, port: u16, bind: &str, no_auth: bool) -> Result<()> {
    let config = &backend.config;
    if config.remote.is_some() {
        bail!("`serve` always uses the local database; drop --remote");
    }
    let api_key = if no_auth {
        None
    } else {
        Some(config.load_or_create_api_key()?.0)
    };
    let legacy = Arc::new(FileStorage::new(config.legacy_path.clone()));
    server::start_server(Arc::clone(&backend.db), legacy, port, bind, api_key).await
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load(cli.remote)?;
    let backend = Backend::open(config)?;

    match cli.command {
        Commands::Login {
            email,
            password,
            sign_up,
            keep_legacy,
            json,
        } => cmd_login(&backend, &email, password, sign_up, keep_legacy, json),
        Commands::Logout { json } => cmd_logout(&backend, json),
        Commands::Whoami { json } => cmd_whoami(&backend, json),
        Commands::Migrate { keep_legacy, json } => cmd_migrate(&backend, keep_legacy, json),
        Commands::Passwd { current, new, json } => cmd_passwd(&backend, current, new, json),
        Commands::Exercise { command } => {
            let session = backend.session()?;
            match command {
                ExerciseCommands::List { body_part, json } => {
                    cmd_exercise_list(&session, body_part.as_deref(), json)
                }
                ExerciseCommands::Add {
                    name,
                    body_part,
                    description,
                    json,
                } => cmd_exercise_add(&session, &name, &body_part, &description, json),
                ExerciseCommands::Edit {
                    id,
                    name,
                    body_part,
                    description,
                    json,
                } => cmd_exercise_edit(&session, &id, name, body_part.as_deref(), description, json),
                ExerciseCommands::Delete { id, json } => cmd_exercise_delete(&session, &id, json),
            }
        }
        Commands::Workout { command } => {
            let session = backend.session()?;
            match command {
                WorkoutCommands::Show { date, json } => cmd_workout_show(&session, date, json),
                WorkoutCommands::Add {
                    exercise_id,
                    sets,
                    reps,
                    weight,
                    date,
                    json,
                } => cmd_workout_add(&session, &exercise_id, sets, reps, weight, date, json),
                WorkoutCommands::Remove { entry, date, json } => {
                    cmd_workout_remove(&session, &entry, date, json)
                }
                WorkoutCommands::Done {
                    entry,
                    set,
                    date,
                    json,
                } => cmd_workout_done(&session, &entry, set, date, json),
                WorkoutCommands::Copy { from, to, json } => {
                    cmd_workout_copy(&session, from, to, json)
                }
            }
        }
        Commands::Progress {
            window,
            locale,
            all_sets,
            today,
            json,
        } => {
            let session = backend.session()?;
            cmd_progress(&session, &backend.db, &window, locale, all_sets, today, json)
        }
        Commands::Calendar { month, json } => {
            cmd_calendar(&backend.session()?, month.as_deref(), json)
        }
        Commands::Export { output, json } => {
            cmd_export(&backend.session()?, output.as_deref(), json)
        }
        Commands::Import { file, json } => cmd_import(&backend.session()?, &file, json),
        Commands::Serve {
            port,
            bind,
            no_auth,
        } => serve(&backend, port, &bind, no_auth).await,
    }
}
