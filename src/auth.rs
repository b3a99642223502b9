//! Registration and login against the credential store

use std::sync::Arc;

use crate::error::{AppError, Result};
use crate::models::credentials::Credentials;
use crate::storage::CredentialStore;

/// Validates registration and login requests.
///
/// Unknown usernames and wrong passwords fail identically, and both paths
/// run one bcrypt verification so response time does not reveal which
/// usernames exist.
#[derive(Clone, Debug)]
pub struct Authenticator {
    store: CredentialStore,
    dummy_hash: Arc<str>,
}

impl Authenticator {
    /// Creates an authenticator; `bcrypt_cost` must match the store's cost.
    pub fn new(store: CredentialStore, bcrypt_cost: u32) -> Result<Self> {
        let dummy_hash = bcrypt::hash("imagesim-unknown-user", bcrypt_cost)?;
        Ok(Self {
            store,
            dummy_hash: Arc::from(dummy_hash),
        })
    }

    /// Create a new account.
    pub async fn register(&self, credentials: &Credentials) -> Result<()> {
        credentials.validate()?;

        let store = self.store.clone();
        let Credentials { username, password } = credentials.clone();
        let user = username.clone();
        let outcome =
            tokio::task::spawn_blocking(move || store.create(&username, &password)).await?;

        match &outcome {
            Ok(()) => log::info!("Registered user {}", user),
            Err(AppError::UsernameTaken) => {
                log::info!("Registration rejected for {}: username taken", user)
            }
            Err(e) => log::warn!("Registration failed for {}: {}", user, e),
        }
        outcome
    }

    /// Check a username/password pair against the stored hash.
    pub async fn login(&self, credentials: &Credentials) -> Result<()> {
        credentials.validate()?;

        let store = self.store.clone();
        let dummy_hash = Arc::clone(&self.dummy_hash);
        let Credentials { username, password } = credentials.clone();
        let user = username.clone();

        let outcome = tokio::task::spawn_blocking(move || -> Result<()> {
            match store.find_hash(&username)? {
                Some(hash) => {
                    if bcrypt::verify(&password, &hash)? {
                        Ok(())
                    } else {
                        Err(AppError::InvalidCredentials)
                    }
                }
                None => {
                    let _ = bcrypt::verify(&password, &dummy_hash);
                    Err(AppError::InvalidCredentials)
                }
            }
        })
        .await?;

        match &outcome {
            Ok(()) => log::info!("User {} logged in", user),
            Err(AppError::InvalidCredentials) => log::info!("Login failed for {}", user),
            Err(e) => log::warn!("Login error for {}: {}", user, e),
        }
        outcome
    }
}
