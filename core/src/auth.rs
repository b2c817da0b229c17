use std::fmt::Display;
use std::sync::Arc;

use argon2::Argon2;
use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::db::{AccountRow, Database};

/// Provider error codes understood by [`AuthError::from_provider_code`].
pub mod codes {
    pub const INVALID_EMAIL: &str = "auth/invalid-email";
    pub const INVALID_CREDENTIAL: &str = "auth/invalid-credential";
    pub const USER_NOT_FOUND: &str = "auth/user-not-found";
    pub const WRONG_PASSWORD: &str = "auth/wrong-password";
    pub const EMAIL_ALREADY_IN_USE: &str = "auth/email-already-in-use";
    pub const WEAK_PASSWORD: &str = "auth/weak-password";
    pub const INTERNAL_ERROR: &str = "auth/internal-error";
}

pub const MIN_PASSWORD_LEN: usize = 6;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub user_id: String,
    pub email: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthAction {
    SignIn,
    SignUp,
    ChangePassword,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthErrorKind {
    InvalidEmail,
    WrongCredentials,
    IncorrectCurrentPassword,
    EmailAlreadyInUse,
    WeakPassword,
    Unknown,
}

impl AuthErrorKind {
    /// Stable key the UI translates into a user-facing message.
    #[must_use]
    pub fn message_key(self) -> &'static str {
        match self {
            AuthErrorKind::InvalidEmail => "invalidEmail",
            AuthErrorKind::WrongCredentials => "userExistsPasswordIncorrect",
            AuthErrorKind::IncorrectCurrentPassword => "incorrectCurrentPassword",
            AuthErrorKind::EmailAlreadyInUse => "emailAlreadyInUse",
            AuthErrorKind::WeakPassword => "passwordTooShort",
            AuthErrorKind::Unknown => "unknownError",
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("authentication failed: {} ({code})", .kind.message_key())]
pub struct AuthError {
    pub kind: AuthErrorKind,
    pub code: String,
}

impl AuthError {
    /// Map a provider error code to a user-facing category. Never retried.
    #[must_use]
    pub fn from_provider_code(code: &str, action: AuthAction) -> Self {
        let kind = match code {
            codes::INVALID_EMAIL => AuthErrorKind::InvalidEmail,
            codes::INVALID_CREDENTIAL if action == AuthAction::ChangePassword => {
                AuthErrorKind::IncorrectCurrentPassword
            }
            codes::INVALID_CREDENTIAL | codes::USER_NOT_FOUND | codes::WRONG_PASSWORD => {
                AuthErrorKind::WrongCredentials
            }
            codes::EMAIL_ALREADY_IN_USE => AuthErrorKind::EmailAlreadyInUse,
            codes::WEAK_PASSWORD => AuthErrorKind::WeakPassword,
            codes::INTERNAL_ERROR => AuthErrorKind::Unknown,
            other => {
                tracing::warn!(code = other, ?action, "unrecognized identity provider error");
                AuthErrorKind::Unknown
            }
        };
        Self {
            kind,
            code: code.to_string(),
        }
    }

    #[must_use]
    pub fn message_key(&self) -> &'static str {
        self.kind.message_key()
    }
}

/// External identity provider. Implementations surface their own error codes
/// through [`AuthError::from_provider_code`].
pub trait IdentityProvider: Send + Sync {
    fn sign_in(&self, email: &str, password: &str) -> Result<Identity, AuthError>;
    fn sign_up(&self, email: &str, password: &str) -> Result<Identity, AuthError>;
    fn change_password(&self, email: &str, current: &str, new: &str) -> Result<(), AuthError>;
}

/// Email/password accounts kept in the local database, hashed with Argon2id.
pub struct LocalIdentityProvider {
    db: Arc<Database>,
}

impl LocalIdentityProvider {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    fn find(&self, email: &str, action: AuthAction) -> Result<Option<AccountRow>, AuthError> {
        self.db.find_account(email).map_err(|e| internal(&e, action))
    }

    fn verify(&self, email: &str, password: &str, action: AuthAction) -> Result<AccountRow, AuthError> {
        let email = normalize_email(email, action)?;
        match self.find(&email, action)? {
            Some(account) if verify_password(&account.password_hash, password) => Ok(account),
            _ => Err(AuthError::from_provider_code(codes::INVALID_CREDENTIAL, action)),
        }
    }
}

impl IdentityProvider for LocalIdentityProvider {
    fn sign_in(&self, email: &str, password: &str) -> Result<Identity, AuthError> {
        let account = self.verify(email, password, AuthAction::SignIn)?;
        Ok(Identity {
            user_id: account.user_id,
            email: account.email,
        })
    }

    fn sign_up(&self, email: &str, password: &str) -> Result<Identity, AuthError> {
        let action = AuthAction::SignUp;
        let email = normalize_email(email, action)?;
        check_password_strength(password, action)?;

        let account = AccountRow {
            email: email.clone(),
            user_id: Uuid::new_v4().to_string(),
            password_hash: hash_password(password).map_err(|e| internal(&e, action))?,
        };
        let inserted = self
            .db
            .insert_account(&account)
            .map_err(|e| internal(&e, action))?;
        if !inserted {
            return Err(AuthError::from_provider_code(codes::EMAIL_ALREADY_IN_USE, action));
        }
        tracing::info!(email = %email, "created account");
        Ok(Identity {
            user_id: account.user_id,
            email,
        })
    }

    fn change_password(&self, email: &str, current: &str, new: &str) -> Result<(), AuthError> {
        let action = AuthAction::ChangePassword;
        let account = self.verify(email, current, action)?;
        check_password_strength(new, action)?;

        let hash = hash_password(new).map_err(|e| internal(&e, action))?;
        self.db
            .update_password(&account.email, &hash)
            .map_err(|e| internal(&e, action))?;
        Ok(())
    }
}

fn internal(err: &dyn Display, action: AuthAction) -> AuthError {
    tracing::error!(error = %err, ?action, "identity store failure");
    AuthError::from_provider_code(codes::INTERNAL_ERROR, action)
}

fn normalize_email(email: &str, action: AuthAction) -> Result<String, AuthError> {
    let email = email.trim().to_lowercase();
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !email.chars().any(char::is_whitespace)
        }
        None => false,
    };
    if valid {
        Ok(email)
    } else {
        Err(AuthError::from_provider_code(codes::INVALID_EMAIL, action))
    }
}

fn check_password_strength(password: &str, action: AuthAction) -> Result<(), AuthError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AuthError::from_provider_code(codes::WEAK_PASSWORD, action));
    }
    Ok(())
}

fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    Ok(Argon2::default()
        .hash_password(password.as_bytes(), &salt)?
        .to_string())
}

/// False for a wrong password and for a stored hash that does not parse.
fn verify_password(stored: &str, password: &str) -> bool {
    PasswordHash::new(stored).is_ok_and(|parsed| {
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok()
    })
}
