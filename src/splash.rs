// Splash view-model: seeds the repository with two delayed bulk inserts

use crate::api::ApiError;
use crate::config::SplashConfig;
use crate::models::SeedData;
use crate::orchestrator::LoadOrchestrator;
use crate::repository::PlaceRepository;
use crate::strategies::{merge_as_available, single};
use futures::{future, FutureExt, TryStreamExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub struct SplashViewModel {
    repository: Arc<PlaceRepository>,
    config: SplashConfig,
    orchestrator: LoadOrchestrator<()>,
}

impl SplashViewModel {
    pub fn new(repository: Arc<PlaceRepository>) -> Self {
        Self::with_config(repository, SplashConfig::default())
    }

    pub fn with_config(repository: Arc<PlaceRepository>, config: SplashConfig) -> Self {
        Self {
            repository,
            config,
            orchestrator: LoadOrchestrator::new("splash"),
        }
    }

    pub fn result(&self) -> &LoadOrchestrator<()> {
        &self.orchestrator
    }

    /// Inserts places and costs concurrently; publishes `Complete` once both
    /// inserts have finished.
    pub fn populate_data(&self, seed: SeedData) {
        let SeedData { places, costs } = seed;

        let places_repository = self.repository.clone();
        let place_delay = Duration::from_millis(self.config.place_insert_delay_ms);
        let insert_places = async move {
            tokio::time::sleep(place_delay).await;
            let count = places_repository.bulk_insert_places(places);
            info!(count, "Completed inserting places into database");
            Ok::<(), ApiError>(())
        }
        .boxed();

        let costs_repository = self.repository.clone();
        let cost_delay = Duration::from_millis(self.config.cost_insert_delay_ms);
        let insert_costs = async move {
            tokio::time::sleep(cost_delay).await;
            let count = costs_repository.bulk_insert_costs(costs);
            info!(count, "Completed inserting costs into database");
            Ok::<(), ApiError>(())
        }
        .boxed();

        let merged = merge_as_available(vec![single(insert_places), single(insert_costs)]);
        self.orchestrator
            .start_completable(merged.try_for_each(|()| future::ok(())));
    }

    /// Parses a seed document and populates the repository with it. A
    /// malformed document fails the run without touching the repository.
    pub fn populate_from_json(&self, json: &str) {
        match SeedData::from_json(json) {
            Ok(seed) => self.populate_data(seed),
            Err(error) => {
                let error = ApiError::from(error);
                self.orchestrator.start_completable(future::err(error));
            }
        }
    }
}
