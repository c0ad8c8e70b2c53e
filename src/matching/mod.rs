//! Compatibility scoring between a parcel and candidate trips.
//!
//! Every trip starts at 100 and is adjusted for price fit, date proximity,
//! the traveler's rating, remaining capacity and identity verification.
//! The total is clamped to `0..=100`. Inputs that are absent skip their
//! adjustment, except the rating which counts as 0.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::domains::parcel::Parcel;
use crate::domains::trip::{Trip, TripStatus};

const BASE_SCORE: i32 = 100;
const SECONDS_PER_DAY: i64 = 86_400;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub price: i32,
    pub date: i32,
    pub rating: i32,
    pub capacity: i32,
    pub verification: i32,
}

impl ScoreBreakdown {
    pub fn total(&self) -> u8 {
        let raw = BASE_SCORE + self.price + self.date + self.rating + self.capacity + self.verification;
        raw.clamp(0, 100) as u8
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MatchCandidate {
    pub trip: Trip,
    pub score: u8,
    pub breakdown: ScoreBreakdown,
    pub estimated_cost: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    #[default]
    Compatibility,
    Price,
    Rating,
    Date,
}

impl SortKey {
    /// Unknown or missing values fall back to compatibility.
    pub fn from_query(value: Option<&str>) -> Self {
        match value.map(|v| v.trim().to_ascii_lowercase()).as_deref() {
            Some("price") => Self::Price,
            Some("rating") => Self::Rating,
            Some("date") => Self::Date,
            _ => Self::Compatibility,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MatchQuery {
    pub sort: SortKey,
    pub min_score: u8,
    pub limit: Option<usize>,
}

impl Default for MatchQuery {
    fn default() -> Self {
        Self {
            sort: SortKey::Compatibility,
            min_score: 0,
            limit: None,
        }
    }
}

pub fn estimated_cost(parcel: &Parcel, trip: &Trip) -> Option<f64> {
    Some(trip.price_per_kg? * parcel.weight?)
}

fn price_adjustment(cost: Option<f64>, max_price: Option<f64>) -> i32 {
    let (Some(cost), Some(max_price)) = (cost, max_price) else {
        return 0;
    };
    if cost > max_price {
        -30
    } else if cost >= max_price * 0.8 {
        -10
    } else {
        0
    }
}

fn calendar_day_gap(a: i64, b: i64) -> Option<i64> {
    let a = OffsetDateTime::from_unix_timestamp(a).ok()?.date();
    let b = OffsetDateTime::from_unix_timestamp(b).ok()?.date();
    Some((a - b).whole_days().abs())
}

fn date_adjustment(departure_at: i64, pickup_date: Option<i64>) -> i32 {
    let Some(gap) = pickup_date.and_then(|pickup| calendar_day_gap(departure_at, pickup)) else {
        return 0;
    };
    match gap {
        0 => 0,
        1 => -5,
        2..=3 => -15,
        _ => -25,
    }
}

fn rating_adjustment(rating: Option<f64>) -> i32 {
    let rating = rating.filter(|r| r.is_finite()).unwrap_or(0.0);
    if rating >= 4.5 {
        5
    } else if rating >= 4.0 {
        0
    } else if rating >= 3.0 {
        -10
    } else {
        -20
    }
}

fn capacity_adjustment(weight: Option<f64>, available: Option<f64>) -> i32 {
    let (Some(weight), Some(available)) = (weight, available) else {
        return 0;
    };
    let ratio = if available > 0.0 {
        weight / available
    } else {
        f64::INFINITY
    };
    if ratio <= 0.5 {
        5
    } else if ratio <= 0.8 {
        0
    } else {
        -10
    }
}

pub fn score_breakdown(parcel: &Parcel, trip: &Trip) -> ScoreBreakdown {
    ScoreBreakdown {
        price: price_adjustment(estimated_cost(parcel, trip), parcel.max_price),
        date: date_adjustment(trip.departure_at, parcel.pickup_date),
        rating: rating_adjustment(trip.owner_rating),
        capacity: capacity_adjustment(parcel.weight, trip.available_weight),
        verification: if trip.owner_verified { 10 } else { 0 },
    }
}

pub fn score_trip(parcel: &Parcel, trip: &Trip) -> u8 {
    score_breakdown(parcel, trip).total()
}

fn normalize_city(city: &str) -> String {
    city.trim().to_lowercase()
}

/// Half-width of the departure window, saturating for huge day counts.
pub fn window_seconds(window_days: i64) -> u64 {
    (window_days.max(0) as u64).saturating_mul(SECONDS_PER_DAY as u64)
}

/// Route and time pre-filter applied before scoring.
pub fn is_candidate(parcel: &Parcel, trip: &Trip, window_days: i64) -> bool {
    if trip.status != TripStatus::Active || trip.user_id == parcel.sender_id {
        return false;
    }
    if normalize_city(&trip.departure_city) != normalize_city(&parcel.pickup_city)
        || normalize_city(&trip.arrival_city) != normalize_city(&parcel.delivery_city)
    {
        return false;
    }
    match parcel.pickup_date {
        Some(pickup) => trip.departure_at.abs_diff(pickup) <= window_seconds(window_days),
        None => true,
    }
}

fn compare_optional_asc(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.total_cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Scores, filters and orders candidate trips for one parcel.
pub fn rank(parcel: &Parcel, trips: Vec<Trip>, query: &MatchQuery) -> Vec<MatchCandidate> {
    let mut candidates: Vec<MatchCandidate> = trips
        .into_iter()
        .map(|trip| {
            let breakdown = score_breakdown(parcel, &trip);
            MatchCandidate {
                estimated_cost: estimated_cost(parcel, &trip),
                score: breakdown.total(),
                breakdown,
                trip,
            }
        })
        .filter(|candidate| candidate.score >= query.min_score)
        .collect();

    match query.sort {
        SortKey::Compatibility => candidates.sort_by(|a, b| b.score.cmp(&a.score)),
        SortKey::Price => {
            candidates.sort_by(|a, b| compare_optional_asc(a.estimated_cost, b.estimated_cost))
        }
        SortKey::Rating => candidates.sort_by(|a, b| {
            let a = a.trip.owner_rating.unwrap_or(0.0);
            let b = b.trip.owner_rating.unwrap_or(0.0);
            b.total_cmp(&a)
        }),
        SortKey::Date => candidates.sort_by_key(|c| c.trip.departure_at),
    }

    if let Some(limit) = query.limit {
        candidates.truncate(limit);
    }
    candidates
}
