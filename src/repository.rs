// In-memory store of places and costs backing the mock API

use crate::api::ApiError;
use crate::models::{Cost, Place, Places};
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

#[derive(Debug, Default, Clone)]
pub struct RepositoryStats {
    pub places_count: usize,
    pub costs_count: usize,
    pub lookups: usize,
}

#[derive(Debug, Default)]
pub struct PlaceRepository {
    places: DashMap<u32, Place>,
    // Keyed by the place the cost belongs to
    costs: DashMap<u32, Cost>,
    lookups: AtomicUsize,
}

impl PlaceRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces places, returning how many were written.
    pub fn bulk_insert_places(&self, places: Places) -> usize {
        let count = places.len();
        for place in places {
            self.places.insert(place.id, place);
        }
        debug!(count, "inserted places");
        count
    }

    pub fn bulk_insert_costs(&self, costs: Vec<Cost>) -> usize {
        let count = costs.len();
        for cost in costs {
            self.costs.insert(cost.place_id, cost);
        }
        debug!(count, "inserted costs");
        count
    }

    pub fn places_by_planet(&self, planet: &str) -> Places {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        let mut places: Places = self
            .places
            .iter()
            .filter(|entry| entry.value().planet == planet)
            .map(|entry| entry.value().clone())
            .collect();
        places.sort_by_key(|p| p.id);
        places
    }

    pub fn place_by_id(&self, id: u32) -> Result<Place, ApiError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.places
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| ApiError::NotFound(format!("place {}", id)))
    }

    pub fn cost_for_place(&self, place_id: u32) -> Result<Cost, ApiError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.costs
            .get(&place_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| ApiError::NotFound(format!("cost for place {}", place_id)))
    }

    pub fn stats(&self) -> RepositoryStats {
        RepositoryStats {
            places_count: self.places.len(),
            costs_count: self.costs.len(),
            lookups: self.lookups.load(Ordering::SeqCst),
        }
    }
}
