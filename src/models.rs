use crate::api::ApiError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// Data structures shared by the mock API, the repository and the view-models
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Place {
    pub id: u32,
    pub name: String,
    pub planet: String,
}

pub type Places = Vec<Place>;

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Cost {
    pub id: u32,
    pub place_id: u32,
    pub price: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PlaceDetail {
    pub place: Place,
    pub cost: Cost,
}

// Seed payload used to populate the repository on first launch
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SeedData {
    pub places: Places,
    pub costs: Vec<Cost>,
}

#[derive(Error, Debug)]
pub enum SeedError {
    #[error("JSON parse error: {0}")]
    JsonParseError(#[from] serde_json::Error),

    #[error("Cost {cost_id} references unknown place {place_id}")]
    DanglingCost { cost_id: u32, place_id: u32 },
}

impl From<SeedError> for ApiError {
    fn from(error: SeedError) -> Self {
        ApiError::Database(error.to_string())
    }
}

impl SeedData {
    /// Parses a seed document and checks that every cost points at a known place.
    pub fn from_json(json: &str) -> Result<Self, SeedError> {
        let seed: SeedData = serde_json::from_str(json)?;

        if let Some(cost) = seed
            .costs
            .iter()
            .find(|cost| !seed.places.iter().any(|p| p.id == cost.place_id))
        {
            return Err(SeedError::DanglingCost {
                cost_id: cost.id,
                place_id: cost.place_id,
            });
        }

        Ok(seed)
    }

    pub fn places_on(&self, planet: &str) -> Places {
        self.places
            .iter()
            .filter(|p| p.planet == planet)
            .cloned()
            .collect()
    }
}
