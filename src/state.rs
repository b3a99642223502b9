use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use uuid::Uuid;

use crate::core::embeddings::EmbeddingProvider;
use crate::error::{AppError, Result};
use crate::storage::Database;
use crate::workflow::{Orchestrator, Session};

const MIN_BCRYPT_COST: u32 = 4;
const MAX_BCRYPT_COST: u32 = 31;
const DEFAULT_SESSION_IDLE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Configuration for the application
#[derive(Clone, Debug)]
pub struct Config {
    /// Address the HTTP server binds to
    pub host: IpAddr,
    /// Port the HTTP server listens on
    pub port: u16,
    /// SQLite database file holding users and comparisons
    pub database_path: PathBuf,
    /// Minimum cosine similarity classified as "Similar"
    pub similarity_threshold: f32,
    /// bcrypt work factor for new password hashes
    pub bcrypt_cost: u32,
    /// Maximum request body size in bytes
    pub max_upload_size: usize,
    /// Allowed file extensions for uploads
    pub allowed_extensions: Vec<String>,
    /// Weights file for the ResNet-50 backbone
    pub embedding_weights: PathBuf,
    /// Upper bound on a single image inference
    pub inference_timeout: Duration,
    /// Sessions unused for this long are dropped
    pub session_idle_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 3000,
            database_path: PathBuf::from("image_similarity.db"),
            similarity_threshold: 0.8,
            bcrypt_cost: bcrypt::DEFAULT_COST,
            max_upload_size: 20 * 1024 * 1024, // 20MB
            allowed_extensions: vec!["jpg", "jpeg", "png"]
                .into_iter()
                .map(String::from)
                .collect(),
            embedding_weights: PathBuf::from("resnet50.ot"),
            inference_timeout: Duration::from_secs(30),
            session_idle_timeout: DEFAULT_SESSION_IDLE_TIMEOUT,
        }
    }
}

impl Config {
    /// Load configuration from environment variables, falling back to defaults.
    ///
    /// Reads a `.env` file first if one exists.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        let defaults = Self::default();

        let config = Self {
            host: env_parse("HOST")?.unwrap_or(defaults.host),
            port: env_parse("PORT")?.unwrap_or(defaults.port),
            database_path: env_parse("DATABASE_PATH")?.unwrap_or(defaults.database_path),
            similarity_threshold: env_parse("SIMILARITY_THRESHOLD")?
                .unwrap_or(defaults.similarity_threshold),
            bcrypt_cost: env_parse("BCRYPT_COST")?.unwrap_or(defaults.bcrypt_cost),
            max_upload_size: env_parse("MAX_UPLOAD_SIZE")?.unwrap_or(defaults.max_upload_size),
            allowed_extensions: std::env::var("ALLOWED_EXTENSIONS")
                .ok()
                .map(|exts| {
                    exts.split(',')
                        .map(|s| s.trim().trim_start_matches('.').to_lowercase())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or(defaults.allowed_extensions),
            embedding_weights: env_parse("EMBEDDING_WEIGHTS")?
                .unwrap_or(defaults.embedding_weights),
            inference_timeout: env_parse("INFERENCE_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.inference_timeout),
            session_idle_timeout: env_parse("SESSION_IDLE_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.session_idle_timeout),
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject values no component can work with.
    pub fn validate(&self) -> Result<()> {
        if !(-1.0..=1.0).contains(&self.similarity_threshold) {
            return Err(AppError::Config(format!(
                "similarity_threshold must be within [-1, 1], got {}",
                self.similarity_threshold
            )));
        }
        if !(MIN_BCRYPT_COST..=MAX_BCRYPT_COST).contains(&self.bcrypt_cost) {
            return Err(AppError::Config(format!(
                "bcrypt_cost must be within [{}, {}], got {}",
                MIN_BCRYPT_COST,
                MAX_BCRYPT_COST,
                self.bcrypt_cost
            )));
        }
        if self.allowed_extensions.is_empty() {
            return Err(AppError::Config(
                "allowed_extensions must not be empty".to_string(),
            ));
        }
        if self.inference_timeout.is_zero() {
            return Err(AppError::Config(
                "inference timeout must be positive".to_string(),
            ));
        }
        if self.session_idle_timeout.is_zero() {
            return Err(AppError::Config(
                "session idle timeout must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Socket address the server binds to.
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

fn env_parse<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| AppError::Config(format!("invalid {}={:?}: {}", key, raw, e))),
        _ => Ok(None),
    }
}

/// Live sessions keyed by the opaque id handed out at login.
///
/// A session unused for longer than the idle timeout is dropped. Expired
/// entries are swept on every insert, so the map holds at most the sessions
/// active within one timeout window.
#[derive(Debug)]
pub struct SessionRegistry {
    idle_timeout: Duration,
    sessions: Mutex<HashMap<Uuid, SessionEntry>>,
}

#[derive(Debug)]
struct SessionEntry {
    session: Arc<Mutex<Session>>,
    last_seen: Instant,
}

impl SessionRegistry {
    /// Creates an empty registry expiring sessions after `idle_timeout`.
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            idle_timeout,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Store an authenticated session and return its id.
    pub async fn insert(&self, session: Session) -> Uuid {
        let id = Uuid::new_v4();
        let mut sessions = self.sessions.lock().await;

        let before = sessions.len();
        sessions.retain(|_, entry| entry.last_seen.elapsed() <= self.idle_timeout);
        if sessions.len() < before {
            log::debug!("Expired {} idle sessions", before - sessions.len());
        }

        sessions.insert(
            id,
            SessionEntry {
                session: Arc::new(Mutex::new(session)),
                last_seen: Instant::now(),
            },
        );
        id
    }

    /// Look up a live session by id, refreshing its idle timer.
    pub async fn get(&self, id: &Uuid) -> Option<Arc<Mutex<Session>>> {
        let mut sessions = self.sessions.lock().await;
        let entry = sessions.get_mut(id)?;
        if entry.last_seen.elapsed() > self.idle_timeout {
            sessions.remove(id);
            return None;
        }
        entry.last_seen = Instant::now();
        Some(Arc::clone(&entry.session))
    }

    /// Drop a session, returning it if it existed.
    pub async fn remove(&self, id: &Uuid) -> Option<Arc<Mutex<Session>>> {
        self.sessions
            .lock()
            .await
            .remove(id)
            .map(|entry| entry.session)
    }

    /// Number of stored sessions, including expired ones not yet swept.
    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_SESSION_IDLE_TIMEOUT)
    }
}

/// Application state that can be shared across handlers
#[derive(Debug)]
pub struct AppState {
    /// Application configuration
    pub config: Config,
    /// Login, comparison and history workflow
    pub orchestrator: Orchestrator,
    /// Sessions of logged-in clients
    pub sessions: SessionRegistry,
}

impl AppState {
    /// Create application state over an already opened database.
    pub fn new(config: Config, db: &Database) -> Result<Arc<Self>> {
        config.validate()?;
        let embedder = Arc::new(EmbeddingProvider::new(
            config.embedding_weights.clone(),
            config.inference_timeout,
        ));
        let orchestrator = Orchestrator::new(db, embedder, &config)?;

        Ok(Arc::new(Self {
            sessions: SessionRegistry::new(config.session_idle_timeout),
            config,
            orchestrator,
        }))
    }

    /// Open the configured database and create application state.
    ///
    /// Fails with `StorageUnavailable` if the schema cannot be initialized.
    pub fn open(config: Config) -> Result<Arc<Self>> {
        let db = Database::open(&config.database_path).map_err(|e| match e {
            AppError::StorageUnavailable(_) => e,
            other => AppError::StorageUnavailable(other.to_string()),
        })?;
        Self::new(config, &db)
    }
}
