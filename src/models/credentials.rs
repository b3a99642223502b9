use std::fmt;

use serde::Deserialize;

use crate::error::{AppError, Result};

/// A username/password pair submitted for login or registration.
///
/// The password never appears in `Debug` output.
#[derive(Clone, Deserialize)]
pub struct Credentials {
    /// Account name.
    pub username: String,
    /// Plaintext password as typed by the user.
    pub password: String,
}

impl Credentials {
    /// Creates a credential pair.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Rejects empty fields.
    pub fn validate(&self) -> Result<()> {
        if self.username.is_empty() || self.password.is_empty() {
            return Err(AppError::InvalidInput(
                "username and password must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}
