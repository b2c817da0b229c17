mod exercise;
mod helpers;
mod progress;
mod session;
mod transfer;
mod workout;

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::config::{Config, SavedSession};
use crate::remote::{RemoteClient, RemoteIdentityProvider, RemoteStore};
use liftlog_core::auth::{IdentityProvider, LocalIdentityProvider};
use liftlog_core::db::Database;
use liftlog_core::error::StoreError;
use liftlog_core::legacy::FileStorage;
use liftlog_core::service::Session;
use liftlog_core::store::AccountStore;

pub(crate) use exercise::{cmd_exercise_add, cmd_exercise_delete, cmd_exercise_edit, cmd_exercise_list};
pub(crate) use progress::{cmd_calendar, cmd_progress};
pub(crate) use session::{cmd_login, cmd_logout, cmd_migrate, cmd_passwd, cmd_whoami};
pub(crate) use transfer::{cmd_export, cmd_import};
pub(crate) use workout::{
    cmd_workout_add, cmd_workout_copy, cmd_workout_done, cmd_workout_remove, cmd_workout_show,
};

/// Where account data and identities come from for this invocation.
pub(crate) struct Backend {
    pub config: Config,
    /// Device-local database. Holds settings even when the account lives remotely.
    pub db: Arc<Database>,
    pub store: Arc<dyn AccountStore>,
    pub identity: Arc<dyn IdentityProvider>,
    pub legacy: FileStorage,
}

impl Backend {
    pub fn open(config: Config) -> Result<Self> {
        let db = Arc::new(Database::open(&config.db_path).with_context(|| {
            format!("Failed to open database: {}", config.db_path.display())
        })?);
        let legacy = FileStorage::new(config.legacy_path.clone());

        let (store, identity): (Arc<dyn AccountStore>, Arc<dyn IdentityProvider>) =
            match &config.remote {
                Some(url) => {
                    let client = Arc::new(RemoteClient::new(url, config.api_key.clone())?);
                    tracing::debug!(url = %url, "using remote account store");
                    (
                        Arc::new(RemoteStore::new(Arc::clone(&client))),
                        Arc::new(RemoteIdentityProvider::new(client)),
                    )
                }
                None => (
                    db.clone(),
                    Arc::new(LocalIdentityProvider::new(db.clone())),
                ),
            };

        Ok(Self {
            config,
            db,
            store,
            identity,
            legacy,
        })
    }

    /// Resume the session saved by `liftlog login`.
    pub fn session(&self) -> Result<Session> {
        let saved = self
            .config
            .load_session()?
            .context("Not logged in. Run `liftlog login` first.")?;
        self.open_session(saved)
    }

    /// Open a session, finishing account setup with the saved cleanup policy
    /// if an earlier attempt did not complete.
    pub fn open_session(&self, saved: SavedSession) -> Result<Session> {
        Session::open(saved.identity, Arc::clone(&self.store), &self.legacy, saved.cleanup)
            .map_err(retry_hint)
    }
}

fn retry_hint(err: anyhow::Error) -> anyhow::Error {
    let transient = err
        .downcast_ref::<StoreError>()
        .is_some_and(StoreError::is_transient);
    if transient {
        err.context("Account store unreachable. Setup will be retried by the next command.")
    } else {
        err
    }
}
