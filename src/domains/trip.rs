use serde::{Deserialize, Serialize};

use crate::domains::timestamp_in_range;
use crate::error::{ParcelExchangeError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TripStatus {
    Active,
    Completed,
    Cancelled,
}

impl TripStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(ParcelExchangeError::Validation(format!(
                "unknown trip status '{other}'"
            ))),
        }
    }
}

/// A published offer of spare luggage capacity.
///
/// `owner_rating` and `owner_verified` are read from the owning user when
/// the trip is loaded and are never written back through the trip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trip {
    pub id: i32,
    pub user_id: i32,
    pub departure_city: String,
    pub arrival_city: String,
    pub departure_at: i64,
    pub arrival_at: Option<i64>,
    pub available_weight: Option<f64>,
    pub price_per_kg: Option<f64>,
    pub status: TripStatus,
    pub owner_rating: Option<f64>,
    pub owner_verified: bool,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTrip {
    pub departure_city: String,
    pub arrival_city: String,
    pub departure_at: i64,
    pub arrival_at: Option<i64>,
    pub available_weight: Option<f64>,
    pub price_per_kg: Option<f64>,
}

impl NewTrip {
    pub fn validate(&self) -> Result<()> {
        if self.departure_city.trim().is_empty() || self.arrival_city.trim().is_empty() {
            return Err(ParcelExchangeError::Validation(
                "departure and arrival cities are required".to_string(),
            ));
        }
        if !timestamp_in_range(self.departure_at)
            || self.arrival_at.is_some_and(|ts| !timestamp_in_range(ts))
        {
            return Err(ParcelExchangeError::Validation(
                "trip dates are out of range".to_string(),
            ));
        }
        if let Some(arrival_at) = self.arrival_at {
            if arrival_at < self.departure_at {
                return Err(ParcelExchangeError::Validation(
                    "arrival must not precede departure".to_string(),
                ));
            }
        }
        if self.available_weight.is_some_and(|w| w < 0.0)
            || self.price_per_kg.is_some_and(|p| p < 0.0)
        {
            return Err(ParcelExchangeError::Validation(
                "weight and price must not be negative".to_string(),
            ));
        }
        Ok(())
    }
}
