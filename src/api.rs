// Travel API surface consumed by the view-models, plus the delayed mock implementation

use crate::config::MockApiConfig;
use crate::models::{Cost, Place, Places};
use crate::repository::PlaceRepository;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

pub const EXPERIMENTAL_API_ERROR: &str = "Error while loading experimental features.";

// Failures a data source can report
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ApiError {
    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Request timeout after {0}ms")]
    Timeout(u64),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("No sources to combine")]
    NoSources,

    #[error("{} sources failed: {}", .0.len(), join_messages(.0))]
    Composite(Vec<ApiError>),

    #[error("{0}")]
    Other(String),

    // A failure that carries no message at all
    #[error("")]
    Unknown,
}

fn join_messages(errors: &[ApiError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl ApiError {
    /// Folds the failures collected from several sources into one error.
    pub fn from_many(mut errors: Vec<ApiError>) -> Option<ApiError> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(ApiError::Composite(errors)),
        }
    }
}

#[async_trait]
pub trait ApiService: Send + Sync + 'static {
    async fn fetch_earth_places(&self) -> Result<Places, ApiError>;

    async fn fetch_mars_places(&self) -> Result<Places, ApiError>;

    async fn fetch_from_experimental_api(&self) -> Result<Places, ApiError>;

    async fn fetch_cost_by_id(&self, id: u32) -> Result<Cost, ApiError>;

    async fn fetch_place_by_id(&self, id: u32) -> Result<Place, ApiError>;
}

#[derive(Debug, Default, Clone)]
pub struct MockApiStats {
    pub requests_started: usize,
    // Requests that survived their artificial delay; cancelled ones never get here
    pub requests_completed: usize,
    pub requests_failed: usize,
}

pub struct MockApiService {
    repository: Arc<PlaceRepository>,
    config: MockApiConfig,
    requests_started: AtomicUsize,
    requests_completed: AtomicUsize,
    requests_failed: AtomicUsize,
}

impl MockApiService {
    pub fn new(repository: Arc<PlaceRepository>, config: MockApiConfig) -> Self {
        Self {
            repository,
            config,
            requests_started: AtomicUsize::new(0),
            requests_completed: AtomicUsize::new(0),
            requests_failed: AtomicUsize::new(0),
        }
    }

    pub fn stats(&self) -> MockApiStats {
        MockApiStats {
            requests_started: self.requests_started.load(Ordering::SeqCst),
            requests_completed: self.requests_completed.load(Ordering::SeqCst),
            requests_failed: self.requests_failed.load(Ordering::SeqCst),
        }
    }

    async fn delayed<T, F>(&self, endpoint: &str, delay: Duration, load: F) -> Result<T, ApiError>
    where
        F: FnOnce(&PlaceRepository) -> Result<T, ApiError>,
    {
        self.requests_started.fetch_add(1, Ordering::SeqCst);

        let jitter = if self.config.jitter_ms > 0 {
            rand::random::<u64>() % self.config.jitter_ms
        } else {
            0
        };
        let delay = delay + Duration::from_millis(jitter);
        debug!(endpoint, delay_ms = delay.as_millis() as u64, "mock request");

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        self.requests_completed.fetch_add(1, Ordering::SeqCst);
        let result = load(&self.repository);
        if result.is_err() {
            self.requests_failed.fetch_add(1, Ordering::SeqCst);
        }
        result
    }
}

#[async_trait]
impl ApiService for MockApiService {
    // Faster than the mars lookup
    async fn fetch_earth_places(&self) -> Result<Places, ApiError> {
        self.delayed("earth", self.config.earth_delay(), |repo| {
            Ok(repo.places_by_planet("Earth"))
        })
        .await
    }

    async fn fetch_mars_places(&self) -> Result<Places, ApiError> {
        self.delayed("mars", self.config.mars_delay(), |repo| {
            Ok(repo.places_by_planet("Mars"))
        })
        .await
    }

    // Fails straight away
    async fn fetch_from_experimental_api(&self) -> Result<Places, ApiError> {
        self.requests_started.fetch_add(1, Ordering::SeqCst);
        self.requests_failed.fetch_add(1, Ordering::SeqCst);
        Err(ApiError::Other(EXPERIMENTAL_API_ERROR.to_string()))
    }

    async fn fetch_cost_by_id(&self, id: u32) -> Result<Cost, ApiError> {
        self.delayed("cost", self.config.cost_delay(), |repo| {
            repo.cost_for_place(id)
        })
        .await
    }

    async fn fetch_place_by_id(&self, id: u32) -> Result<Place, ApiError> {
        self.delayed("place", self.config.place_delay(), |repo| {
            repo.place_by_id(id)
        })
        .await
    }
}
