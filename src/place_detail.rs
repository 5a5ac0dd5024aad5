// Place detail view-model: zips a place with its cost and prices a trip

use crate::api::ApiService;
use crate::models::{Cost, PlaceDetail};
use crate::orchestrator::LoadOrchestrator;
use crate::strategies::{combine_latest, zip_with};
use futures::stream::BoxStream;
use futures::FutureExt;
use std::sync::Arc;

/// Total price of a trip. Passenger counts are unsigned, so the only
/// degenerate input is zero passengers, which costs nothing.
pub fn compute_cost(unit_price: f64, passenger_count: u32, round_trip: bool) -> f64 {
    let legs = if round_trip { 2.0 } else { 1.0 };
    unit_price * passenger_count as f64 * legs
}

pub struct PlaceDetailViewModel {
    service: Arc<dyn ApiService>,
    orchestrator: LoadOrchestrator<PlaceDetail>,
}

impl PlaceDetailViewModel {
    pub fn new(service: Arc<dyn ApiService>) -> Self {
        Self {
            service,
            orchestrator: LoadOrchestrator::new("place_detail"),
        }
    }

    pub fn result(&self) -> &LoadOrchestrator<PlaceDetail> {
        &self.orchestrator
    }

    pub fn load_place_details(&self, id: u32) {
        let cost_service = self.service.clone();
        let cost = async move { cost_service.fetch_cost_by_id(id).await }.boxed();
        let place_service = self.service.clone();
        let place = async move { place_service.fetch_place_by_id(id).await }.boxed();

        self.orchestrator
            .start_single(zip_with(cost, place, |cost, place| PlaceDetail { place, cost }));
    }

    pub fn calculate_travel_cost(
        &self,
        cost: &Cost,
        passenger_count: u32,
        is_two_way_travel: bool,
    ) -> f64 {
        compute_cost(cost.price, passenger_count, is_two_way_travel)
    }

    /// Re-prices the trip every time the round-trip toggle or the passenger
    /// count changes, always using the latest value of the other input.
    pub fn travel_cost_updates(
        &self,
        cost: &Cost,
        round_trip: BoxStream<'static, bool>,
        passenger_count: BoxStream<'static, u32>,
    ) -> BoxStream<'static, f64> {
        let unit_price = cost.price;
        combine_latest(round_trip, passenger_count, move |round_trip, passengers| {
            compute_cost(unit_price, *passengers, *round_trip)
        })
    }
}
