//! Session state machine gluing authentication, embedding, scoring and storage
//!
//! ```text
//! Unauthenticated --login--> Authenticated --logout--> Unauthenticated
//!
//! Authenticated:
//!   AwaitingImages --both images--> ReadyToCompare --compare--> Evaluated
//!         ^                                                        |
//!         +------------------------persist-------------------------+
//! ```
//!
//! A failed comparison drops back to `AwaitingImages`; the session stays
//! logged in. A failed `persist` keeps the result pending for another
//! `persist`, while `compare_and_record` discards it so the next request
//! starts clean.

use std::mem;
use std::sync::Arc;

use serde::Serialize;

use crate::auth::Authenticator;
use crate::core::embeddings::EmbeddingProvider;
use crate::core::similarity::{self, Evaluation};
use crate::error::{AppError, Result};
use crate::models::comparison::{Classification, ComparisonRecord, ImageUpload, NewComparison};
use crate::models::credentials::Credentials;
use crate::state::Config;
use crate::storage::{ComparisonLedger, Database};
use crate::utils::validate_file_extension;

/// Which of the two compared images an upload fills.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageSlot {
    /// The first image.
    First,
    /// The second image.
    Second,
}

/// Comparison sub-flow of an authenticated session.
#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    /// Collecting uploads; either slot may still be empty.
    AwaitingImages {
        /// First image, if supplied.
        first: Option<ImageUpload>,
        /// Second image, if supplied.
        second: Option<ImageUpload>,
    },
    /// Both images supplied.
    ReadyToCompare {
        /// First image.
        first: ImageUpload,
        /// Second image.
        second: ImageUpload,
    },
    /// Scored and waiting to be written to the ledger.
    Evaluated {
        /// First image.
        first: ImageUpload,
        /// Second image.
        second: ImageUpload,
        /// Score and label.
        evaluation: Evaluation,
    },
}

impl Default for Stage {
    fn default() -> Self {
        Self::AwaitingImages {
            first: None,
            second: None,
        }
    }
}

impl Stage {
    fn name(&self) -> &'static str {
        match self {
            Self::AwaitingImages { .. } => "awaiting images",
            Self::ReadyToCompare { .. } => "ready to compare",
            Self::Evaluated { .. } => "evaluated",
        }
    }
}

/// Process-local state of one client.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Session {
    username: Option<String>,
    stage: Stage,
}

impl Session {
    /// A fresh, unauthenticated session.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a login has succeeded on this session.
    pub fn is_authenticated(&self) -> bool {
        self.username.is_some()
    }

    /// The logged-in user, if any.
    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    /// Current comparison stage.
    pub fn stage(&self) -> &Stage {
        &self.stage
    }

    fn require_auth(&self) -> Result<&str> {
        self.username.as_deref().ok_or(AppError::NotAuthenticated)
    }
}

/// Result of a comparison that has been written to the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ComparisonOutcome {
    /// Ledger id of the new record.
    pub id: i64,
    /// Cosine similarity in [-1, 1].
    pub score: f32,
    /// Classification under the configured threshold.
    pub label: Classification,
}

/// Runs the login → upload → evaluate → persist → browse workflow.
#[derive(Debug, Clone)]
pub struct Orchestrator {
    authenticator: Authenticator,
    embedder: Arc<EmbeddingProvider>,
    ledger: ComparisonLedger,
    threshold: f32,
    allowed_extensions: Vec<String>,
}

impl Orchestrator {
    /// Wire the workflow over an open database and a shared embedding provider.
    pub fn new(
        db: &Database,
        embedder: Arc<EmbeddingProvider>,
        config: &Config,
    ) -> Result<Self> {
        let authenticator =
            Authenticator::new(db.credentials(config.bcrypt_cost), config.bcrypt_cost)?;
        Ok(Self {
            authenticator,
            embedder,
            ledger: db.ledger(),
            threshold: config.similarity_threshold,
            allowed_extensions: config.allowed_extensions.clone(),
        })
    }

    /// Threshold used to classify new comparisons.
    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// The shared embedding provider.
    pub fn embedder(&self) -> &Arc<EmbeddingProvider> {
        &self.embedder
    }

    /// Create an account. Does not log in.
    pub async fn register(&self, credentials: &Credentials) -> Result<()> {
        self.authenticator.register(credentials).await
    }

    /// Authenticate `session`. On failure the session is left unchanged.
    pub async fn login(&self, session: &mut Session, credentials: &Credentials) -> Result<()> {
        self.authenticator.login(credentials).await?;
        *session = Session {
            username: Some(credentials.username.clone()),
            stage: Stage::default(),
        };
        Ok(())
    }

    /// Reset `session` to unauthenticated, discarding pending images.
    pub fn logout(&self, session: &mut Session) {
        if let Some(user) = session.username() {
            log::info!("User {} logged out", user);
        }
        *session = Session::new();
    }

    /// Put an upload into one of the two image slots.
    ///
    /// Replacing an image while ready to compare is allowed; supplying one
    /// while a result awaits persistence is not.
    pub fn supply_image(
        &self,
        session: &mut Session,
        slot: ImageSlot,
        upload: ImageUpload,
    ) -> Result<()> {
        session.require_auth()?;
        self.check_extension(&upload)?;

        let (mut first, mut second) = match mem::take(&mut session.stage) {
            Stage::AwaitingImages { first, second } => (first, second),
            Stage::ReadyToCompare { first, second } => (Some(first), Some(second)),
            evaluated @ Stage::Evaluated { .. } => {
                session.stage = evaluated;
                return Err(AppError::InvalidState(
                    "the current result has not been saved yet".to_string(),
                ));
            }
        };

        match slot {
            ImageSlot::First => first = Some(upload),
            ImageSlot::Second => second = Some(upload),
        }

        session.stage = match (first, second) {
            (Some(first), Some(second)) => Stage::ReadyToCompare { first, second },
            (first, second) => Stage::AwaitingImages { first, second },
        };
        Ok(())
    }

    /// Supply both images at once.
    pub fn supply_images(
        &self,
        session: &mut Session,
        first: ImageUpload,
        second: ImageUpload,
    ) -> Result<()> {
        self.supply_image(session, ImageSlot::First, first)?;
        self.supply_image(session, ImageSlot::Second, second)
    }

    /// Embed and score the two supplied images.
    ///
    /// On failure the images are discarded and the session returns to
    /// `AwaitingImages`.
    pub async fn compare(&self, session: &mut Session) -> Result<Evaluation> {
        let user = session.require_auth()?.to_string();

        let (first, second) = match mem::take(&mut session.stage) {
            Stage::ReadyToCompare { first, second } => (first, second),
            other => {
                let err = AppError::InvalidState(format!(
                    "cannot compare while {}",
                    other.name()
                ));
                session.stage = other;
                return Err(err);
            }
        };

        match self.evaluate_pair(&first, &second).await {
            Ok(evaluation) => {
                log::info!(
                    "User {} compared {} and {}: {:.4} ({})",
                    user,
                    first.name,
                    second.name,
                    evaluation.score,
                    evaluation.label
                );
                session.stage = Stage::Evaluated {
                    first,
                    second,
                    evaluation,
                };
                Ok(evaluation)
            }
            Err(e) => {
                log::warn!(
                    "Comparison of {} and {} failed for {}: {}",
                    first.name,
                    second.name,
                    user,
                    e
                );
                session.stage = Stage::default();
                Err(e)
            }
        }
    }

    /// Write the evaluated comparison to the ledger and return its id.
    ///
    /// If the write fails the result stays pending so it can be retried.
    pub async fn persist(&self, session: &mut Session) -> Result<i64> {
        session.require_auth()?;

        let Stage::Evaluated {
            first,
            second,
            evaluation,
        } = &session.stage
        else {
            return Err(AppError::InvalidState(format!(
                "nothing to save while {}",
                session.stage.name()
            )));
        };

        let entry = NewComparison {
            image1: first.clone(),
            image2: second.clone(),
            similarity: evaluation.score,
            classification: evaluation.label,
        };
        let ledger = self.ledger.clone();
        let id = tokio::task::spawn_blocking(move || ledger.record(&entry)).await??;
        session.stage = Stage::default();
        Ok(id)
    }

    /// Supply, compare and persist in one step.
    pub async fn compare_and_record(
        &self,
        session: &mut Session,
        first: ImageUpload,
        second: ImageUpload,
    ) -> Result<ComparisonOutcome> {
        self.supply_images(session, first, second)?;
        let evaluation = self.compare(session).await?;
        let id = match self.persist(session).await {
            Ok(id) => id,
            Err(e) => {
                log::warn!("Discarding unsaved comparison: {}", e);
                session.stage = Stage::default();
                return Err(e);
            }
        };
        Ok(ComparisonOutcome {
            id,
            score: evaluation.score,
            label: evaluation.label,
        })
    }

    /// All stored comparisons, oldest first.
    pub async fn history(&self, session: &Session) -> Result<Vec<ComparisonRecord>> {
        session.require_auth()?;
        let ledger = self.ledger.clone();
        tokio::task::spawn_blocking(move || ledger.list_all()).await?
    }

    async fn evaluate_pair(
        &self,
        first: &ImageUpload,
        second: &ImageUpload,
    ) -> Result<Evaluation> {
        let a = self.embedder.embed(first.bytes.clone()).await?;
        let b = self.embedder.embed(second.bytes.clone()).await?;
        similarity::evaluate(&a, &b, self.threshold)
    }

    fn check_extension(&self, upload: &ImageUpload) -> Result<()> {
        if validate_file_extension(&upload.name, &self.allowed_extensions) {
            Ok(())
        } else {
            Err(AppError::UnsupportedImage(format!(
                "{}: allowed types are {}",
                upload.name,
                self.allowed_extensions.join(", ")
            )))
        }
    }
}
