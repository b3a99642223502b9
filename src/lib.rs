#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

//! # imagesim
//!
//! An authenticated service that compares two images using embeddings from
//! a pretrained vision model and keeps a history of every comparison.
//!
//! ## Features
//!
//! - **Accounts**: register and log in; passwords are stored as bcrypt hashes
//! - **Embeddings**: a pretrained model turns each image into a fixed-length vector,
//!   loaded once per process
//! - **Similarity**: cosine similarity classified against a configurable threshold
//! - **History**: every comparison, including both images, is kept in SQLite
//! - **Web API**: HTTP endpoints for the whole workflow
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use imagesim::{Config, Credentials, Database, EmbeddingProvider, ImageUpload, Orchestrator, Session};
//!
//! # async fn run() -> imagesim::Result<()> {
//! let config = Config::default();
//! let db = Database::open(&config.database_path)?;
//! let embedder = Arc::new(EmbeddingProvider::new(&config.embedding_weights, Duration::from_secs(30)));
//! let orchestrator = Orchestrator::new(&db, embedder, &config)?;
//!
//! let creds = Credentials::new("alice", "secret123");
//! orchestrator.register(&creds).await?;
//! let mut session = Session::new();
//! orchestrator.login(&mut session, &creds).await?;
//!
//! let outcome = orchestrator
//!     .compare_and_record(
//!         &mut session,
//!         ImageUpload::new("cat.jpg", std::fs::read("cat.jpg")?),
//!         ImageUpload::new("dog.jpg", std::fs::read("dog.jpg")?),
//!     )
//!     .await?;
//! println!("{:.4} {}", outcome.score, outcome.label);
//! # Ok(())
//! # }
//! ```

pub mod api;
/// Registration and login.
pub mod auth;
pub mod core;
/// Defines the application's error types and result aliases.
pub mod error;
pub mod models;
mod state;
pub mod storage;
mod utils;
pub mod workflow;

#[cfg(feature = "web")]
mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

// Public API exports
pub use crate::{
    auth::Authenticator,
    core::embeddings::{EmbeddingModel, EmbeddingProvider, EmbeddingVector},
    core::similarity::{cosine_similarity, evaluate, Evaluation},
    error::{AppError, Result},
    models::comparison::{Classification, ComparisonRecord, ImageUpload, NewComparison},
    models::credentials::Credentials,
    state::{AppState, Config, SessionRegistry},
    storage::{ComparisonLedger, CredentialStore, Database},
    workflow::{ComparisonOutcome, ImageSlot, Orchestrator, Session, Stage},
};

#[cfg(feature = "web")]
pub use crate::api::{create_router, health_check, SESSION_HEADER};

/// Initialize logging with default settings
///
/// Should be called once, early in application startup. Honors `RUST_LOG`.
///
/// # Errors
///
/// Returns an error if a global logger is already installed.
pub fn init() -> Result<()> {
    let env = env_logger::Env::default()
        .default_filter_or("info")
        .default_write_style_or("auto");

    env_logger::Builder::from_env(env)
        .format_timestamp_millis()
        .format_module_path(false)
        .try_init()
        .map_err(|e| AppError::Internal(format!("failed to initialize logging: {}", e)))?;

    log::info!("Initializing imagesim {}", env!("CARGO_PKG_VERSION"));
    Ok(())
}
