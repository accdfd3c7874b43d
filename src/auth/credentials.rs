//! Username → password hash mapping persisted as a single YAML file.
//!
//! The file is read in full for every lookup and rewritten in full on every
//! new user. There is no locking: two concurrent sign-ups can each read the
//! old mapping and the second write drops the first user.

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
};
// rand_core 0.6 is what password-hash/argon2 depends on; must match that version.
use rand_core::OsRng;
use std::{collections::BTreeMap, io, path::PathBuf};

pub type Credentials = BTreeMap<String, String>;

#[derive(thiserror::Error, Debug)]
pub enum CredentialError {
    #[error("Username and Password are required.")]
    MissingFields,
    #[error("Username has been taken")]
    UsernameTaken,
    #[error("Cannot access credential file: {0}")]
    Io(#[from] io::Error),
    #[error("Malformed credential file: {0}")]
    Format(#[from] serde_yml::Error),
    #[error("Password hashing failed: {0}")]
    Hash(String),
}

#[derive(Clone, Debug)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Load the whole mapping. A missing or empty file is an empty mapping.
    pub async fn load(&self) -> Result<Credentials, CredentialError> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(r) => r,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Credentials::new()),
            Err(e) => return Err(e.into()),
        };
        if raw.trim().is_empty() {
            return Ok(Credentials::new());
        }
        Ok(serde_yml::from_str(&raw)?)
    }

    async fn save(&self, users: &Credentials) -> Result<(), CredentialError> {
        let yaml = serde_yml::to_string(users)?;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, yaml).await?;
        Ok(())
    }

    /// Check a username/password pair. Unknown users, unreadable files and
    /// malformed hashes all count as a mismatch.
    pub async fn verify(&self, username: &str, password: &str) -> bool {
        let users = match self.load().await {
            Ok(u) => u,
            Err(e) => {
                tracing::error!("Cannot load credentials: {}", e);
                return false;
            }
        };
        users
            .get(username)
            .is_some_and(|hash| verify_password(password, hash))
    }

    /// Add a new user with a freshly salted hash and persist the mapping.
    pub async fn add_user(&self, username: &str, password: &str) -> Result<(), CredentialError> {
        let username = username.trim();
        if username.is_empty() || password.is_empty() {
            return Err(CredentialError::MissingFields);
        }

        let mut users = self.load().await?;
        if users.contains_key(username) {
            return Err(CredentialError::UsernameTaken);
        }

        users.insert(username.to_string(), hash_password(password)?);
        self.save(&users).await
    }
}

/// Hash a password with argon2id and return the PHC string.
pub fn hash_password(password: &str) -> Result<String, CredentialError> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| CredentialError::Hash(e.to_string()))?
        .to_string();
    Ok(hash)
}

fn verify_password(password: &str, hash: &str) -> bool {
    let parsed = match PasswordHash::new(hash) {
        Ok(h) => h,
        Err(_) => return false,
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}
