use serde::{Deserialize, Serialize};

use crate::domains::timestamp_in_range;
use crate::error::{ParcelExchangeError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParcelStatus {
    Pending,
    Assigned,
    InTransit,
    Delivered,
    Cancelled,
}

impl ParcelStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Assigned => "assigned",
            Self::InTransit => "in_transit",
            Self::Delivered => "delivered",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "pending" => Ok(Self::Pending),
            "assigned" => Ok(Self::Assigned),
            "in_transit" => Ok(Self::InTransit),
            "delivered" => Ok(Self::Delivered),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(ParcelExchangeError::Validation(format!(
                "unknown parcel status '{other}'"
            ))),
        }
    }

    pub fn can_transition_to(&self, next: ParcelStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Assigned)
                | (Self::Assigned, Self::InTransit)
                | (Self::InTransit, Self::Delivered)
                | (Self::Pending, Self::Cancelled)
                | (Self::Assigned, Self::Cancelled)
        )
    }
}

/// A shipment request between two cities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Parcel {
    pub id: i32,
    pub sender_id: i32,
    pub pickup_city: String,
    pub delivery_city: String,
    pub pickup_date: Option<i64>,
    pub weight: Option<f64>,
    pub max_price: Option<f64>,
    pub description: Option<String>,
    pub status: ParcelStatus,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewParcel {
    pub pickup_city: String,
    pub delivery_city: String,
    pub pickup_date: Option<i64>,
    pub weight: Option<f64>,
    pub max_price: Option<f64>,
    pub description: Option<String>,
}

impl NewParcel {
    pub fn validate(&self) -> Result<()> {
        if self.pickup_city.trim().is_empty() || self.delivery_city.trim().is_empty() {
            return Err(ParcelExchangeError::Validation(
                "pickup and delivery cities are required".to_string(),
            ));
        }
        if self.pickup_date.is_some_and(|ts| !timestamp_in_range(ts)) {
            return Err(ParcelExchangeError::Validation(
                "pickup date is out of range".to_string(),
            ));
        }
        if self.weight.is_some_and(|w| w <= 0.0) {
            return Err(ParcelExchangeError::Validation(
                "weight must be positive".to_string(),
            ));
        }
        if self.max_price.is_some_and(|p| p < 0.0) {
            return Err(ParcelExchangeError::Validation(
                "max price must not be negative".to_string(),
            ));
        }
        Ok(())
    }
}
