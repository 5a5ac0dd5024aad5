// Load orchestration and stream combinators for the travel-booking sample

pub mod api;
pub mod config;
pub mod models;
pub mod orchestrator;
pub mod place_detail;
pub mod place_list;
pub mod repository;
pub mod splash;
pub mod state;
pub mod strategies;

// Re-export key types for convenience
pub use api::{ApiError, ApiService, MockApiService, MockApiStats};
pub use config::{DemoConfig, MockApiConfig, OrchestratorConfig, SplashConfig};
pub use models::{Cost, Place, PlaceDetail, Places, SeedData, SeedError};
pub use orchestrator::LoadOrchestrator;
pub use place_detail::{compute_cost, PlaceDetailViewModel};
pub use place_list::PlaceListViewModel;
pub use repository::{PlaceRepository, RepositoryStats};
pub use splash::SplashViewModel;
pub use state::{Presenter, State};
pub use strategies::{
    all_then_combine, combine_latest, concat, error_deferred_merge, group_join, interval_stream,
    join, merge_as_available, race_first, single, switch_on_next, zip_with, SourceFuture,
    SourceStream,
};
