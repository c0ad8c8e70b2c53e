#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use parcel_exchange::domains::events::ServerEvent;
use parcel_exchange::domains::parcel::{NewParcel, Parcel};
use parcel_exchange::domains::trip::{NewTrip, Trip};
use parcel_exchange::domains::user::{NewUser, User};
use parcel_exchange::interfaces::providers::{ParcelStore, TripStore, UserDirectory};
use parcel_exchange::services::registry::InMemoryConnectionRegistry;
use parcel_exchange::{InMemoryStore, Relay};

/// 2026-01-05 12:00:00 UTC
pub const PICKUP: i64 = 1_767_614_400;
pub const DAY: i64 = 86_400;

pub async fn user(store: &dyn UserDirectory, name: &str) -> (User, String) {
    user_with(store, name, None, false).await
}

pub async fn user_with(
    store: &dyn UserDirectory,
    name: &str,
    rating: Option<f64>,
    verified: bool,
) -> (User, String) {
    let user = store
        .create_user(NewUser {
            name: name.to_string(),
            email: Some(format!("{}@example.com", name.to_lowercase())),
            rating,
            identity_verified: verified,
        })
        .await
        .unwrap();
    let token = store.issue_token(user.id).await.unwrap();
    (user, token)
}

pub fn new_trip(from: &str, to: &str, departure_at: i64, price_per_kg: Option<f64>) -> NewTrip {
    NewTrip {
        departure_city: from.to_string(),
        arrival_city: to.to_string(),
        departure_at,
        arrival_at: None,
        available_weight: Some(20.0),
        price_per_kg,
    }
}

pub async fn trip(
    store: &dyn TripStore,
    owner: i32,
    from: &str,
    to: &str,
    departure_at: i64,
    price_per_kg: Option<f64>,
) -> Trip {
    store
        .create_trip(owner, new_trip(from, to, departure_at, price_per_kg))
        .await
        .unwrap()
}

pub fn new_parcel(from: &str, to: &str) -> NewParcel {
    NewParcel {
        pickup_city: from.to_string(),
        delivery_city: to.to_string(),
        pickup_date: Some(PICKUP),
        weight: Some(2.0),
        max_price: Some(40.0),
        description: Some("books".to_string()),
    }
}

pub async fn parcel(store: &dyn ParcelStore, sender: i32, from: &str, to: &str) -> Parcel {
    store
        .create_parcel(sender, new_parcel(from, to))
        .await
        .unwrap()
}

pub fn relay(store: Arc<InMemoryStore>) -> Relay {
    Relay::new(
        store.clone(),
        store,
        Arc::new(InMemoryConnectionRegistry::new()),
    )
}

/// Next event, failing the test if none arrives promptly.
pub async fn next_event(rx: &mut mpsc::Receiver<ServerEvent>) -> ServerEvent {
    tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("channel closed")
}

/// Drains whatever is already queued.
pub fn drain(rx: &mut mpsc::Receiver<ServerEvent>) -> Vec<ServerEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
