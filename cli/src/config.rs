use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use liftlog_core::auth::Identity;
use liftlog_core::migration::CleanupPolicy;

pub const DATA_DIR_ENV: &str = "LIFTLOG_DATA_DIR";
pub const REMOTE_ENV: &str = "LIFTLOG_REMOTE";
pub const API_KEY_ENV: &str = "LIFTLOG_API_KEY";

/// Contents of `session.json`: who is logged in and how their device data
/// should be treated if setting up the account has to be retried.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedSession {
    #[serde(flatten)]
    pub identity: Identity,
    #[serde(default)]
    pub cleanup: CleanupPolicy,
}

pub struct Config {
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
    /// Device-local key/value file holding pre-account data.
    pub legacy_path: PathBuf,
    pub session_path: PathBuf,
    /// Base URL of a `liftlog serve` instance. `None` means use the local database.
    pub remote: Option<String>,
    pub api_key: Option<String>,
}

impl Config {
    pub fn load(remote: Option<String>) -> Result<Self> {
        let default_dir = ProjectDirs::from("", "", "liftlog").map(|d| d.data_dir().to_path_buf());
        let config = Self::resolve(default_dir, remote, |name| std::env::var(name).ok())?;
        std::fs::create_dir_all(&config.data_dir).with_context(|| {
            format!("Failed to create data directory: {}", config.data_dir.display())
        })?;
        Ok(config)
    }

    /// Combine the platform default, the `--remote` flag and environment overrides.
    pub(crate) fn resolve(
        default_dir: Option<PathBuf>,
        remote: Option<String>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let non_empty = |name: &str| env(name).filter(|v| !v.trim().is_empty());

        let data_dir = match non_empty(DATA_DIR_ENV) {
            Some(dir) => PathBuf::from(dir),
            None => default_dir.context("Could not determine home directory")?,
        };
        let remote = remote
            .or_else(|| non_empty(REMOTE_ENV))
            .map(|url| url.trim_end_matches('/').to_string());

        Ok(Config {
            db_path: data_dir.join("liftlog.db"),
            legacy_path: data_dir.join("local_storage.json"),
            session_path: data_dir.join("session.json"),
            remote,
            api_key: non_empty(API_KEY_ENV),
            data_dir,
        })
    }

    /// Load the API key from disk, or generate a new one.
    ///
    /// Returns `(key, newly_created)` where `newly_created` is true when a
    /// fresh key was just generated (first run).
    pub fn load_or_create_api_key(&self) -> Result<(String, bool)> {
        use rand::Rng;
        use std::fmt::Write;

        let path = self.data_dir.join("api_key");

        if path.exists() {
            let key = std::fs::read_to_string(&path).context("Failed to read API key file")?;
            let key = key.trim().to_string();
            if !key.is_empty() {
                return Ok((key, false));
            }
        }

        let bytes: [u8; 32] = rand::rng().random();
        let key = bytes
            .iter()
            .fold(String::with_capacity(64), |mut acc: String, b| {
                let _ = write!(acc, "{b:02x}");
                acc
            });
        std::fs::write(&path, &key).context("Failed to write API key file")?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))
                .context("Failed to set API key file permissions")?;
        }
        tracing::info!(path = %path.display(), "generated new API key");
        eprintln!("Generated new API key: {key}");
        eprintln!("Include in requests: Authorization: Bearer {key}");
        Ok((key, true))
    }

    /// The session saved by the last `liftlog login`, if any.
    pub fn load_session(&self) -> Result<Option<SavedSession>> {
        read_session(&self.session_path)
    }

    pub fn save_session(&self, session: &SavedSession) -> Result<()> {
        let json = serde_json::to_string_pretty(session)?;
        std::fs::write(&self.session_path, json).with_context(|| {
            format!("Failed to write session file: {}", self.session_path.display())
        })
    }

    /// Forget the saved identity. Returns false if nobody was logged in.
    pub fn clear_session(&self) -> Result<bool> {
        match std::fs::remove_file(&self.session_path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e).context("Failed to remove session file"),
        }
    }
}

fn read_session(path: &Path) -> Result<Option<SavedSession>> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e).context("Failed to read session file"),
    };
    let session = serde_json::from_str(&raw)
        .with_context(|| format!("Corrupt session file: {}", path.display()))?;
    Ok(Some(session))
}
