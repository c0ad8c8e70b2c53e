use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::ws::rejection::WebSocketUpgradeRejection,
    extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
    extract::{Json, Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Router,
};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::auth::bearer_token;
use crate::config::Config;
use crate::config_store;
use crate::domains::conversation::NewConversation;
use crate::domains::parcel::{NewParcel, ParcelStatus};
use crate::domains::trip::NewTrip;
use crate::domains::user::UserIdentity;
use crate::error::{ParcelExchangeError, Result};
use crate::interfaces::providers::MarketplaceStore;
use crate::matching::{self, MatchQuery, SortKey};
use crate::providers::sqlite::SqliteStore;
use crate::services::registry::InMemoryConnectionRegistry;
use crate::services::relay::Relay;

const DEFAULT_MESSAGE_PAGE: usize = 50;
const MAX_MESSAGE_PAGE: usize = 200;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn MarketplaceStore>,
    pub relay: Arc<Relay>,
    pub config: Arc<Config>,
}

impl AppState {
    /// Wires the relay and the HTTP layer around one store.
    pub fn new<S>(store: Arc<S>, config: Config) -> Self
    where
        S: MarketplaceStore + 'static,
    {
        let buffer = config.outbound_buffer();
        let relay = Relay::new(
            store.clone(),
            store.clone(),
            Arc::new(InMemoryConnectionRegistry::new()),
        )
        .with_outbound_buffer(buffer);
        Self {
            store,
            relay: Arc::new(relay),
            config: Arc::new(config),
        }
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Deserialize)]
struct StatusUpdateRequest {
    status: String,
}

#[derive(Deserialize)]
struct MatchParams {
    sort: Option<String>,
    min_score: Option<u8>,
    limit: Option<usize>,
}

#[derive(Serialize)]
struct MatchResponse {
    parcel_id: i32,
    sort: SortKey,
    results: Vec<matching::MatchCandidate>,
}

#[derive(Deserialize)]
struct CreateConversationRequest {
    parcel_id: Option<i32>,
    trip_id: Option<i32>,
    participants: Vec<i32>,
}

#[derive(Deserialize)]
struct PageParams {
    limit: Option<usize>,
}

#[derive(Deserialize)]
struct WsParams {
    token: Option<String>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/trips", post(create_trip).get(list_my_trips))
        .route("/trips/:id", get(get_trip))
        .route("/parcels", post(create_parcel).get(list_my_parcels))
        .route("/parcels/:id", get(get_parcel))
        .route("/parcels/:id/status", patch(update_parcel_status))
        .route("/parcels/:id/matches", get(parcel_matches))
        .route("/conversations", post(create_conversation))
        .route("/conversations/:id/messages", get(list_messages))
        .route("/notifications", get(unread_notifications))
        .route("/notifications/:id/read", post(mark_notification_read))
        .route("/realtime/stats", get(realtime_stats))
        .route("/realtime/online/:user_id", get(user_online))
        .route("/ws", get(ws_handler))
        .with_state(state)
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

async fn caller(state: &AppState, headers: &HeaderMap) -> Result<UserIdentity> {
    let token = bearer_token(headers, None)?;
    state.store.authenticate(&token).await
}

async fn create_trip(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<NewTrip>,
) -> Result<impl IntoResponse> {
    let user = caller(&state, &headers).await?;
    let trip = state.store.create_trip(user.id, payload).await?;
    info!(trip_id = trip.id, user_id = user.id, "trip published");
    Ok((StatusCode::CREATED, Json(trip)))
}

async fn list_my_trips(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse> {
    let user = caller(&state, &headers).await?;
    Ok(Json(state.store.list_trips_by_user(user.id).await?))
}

async fn get_trip(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i32>,
) -> Result<impl IntoResponse> {
    caller(&state, &headers).await?;
    Ok(Json(state.store.get_trip(id).await?))
}

async fn create_parcel(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<NewParcel>,
) -> Result<impl IntoResponse> {
    let user = caller(&state, &headers).await?;
    let parcel = state.store.create_parcel(user.id, payload).await?;
    info!(parcel_id = parcel.id, user_id = user.id, "parcel published");
    Ok((StatusCode::CREATED, Json(parcel)))
}

async fn list_my_parcels(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse> {
    let user = caller(&state, &headers).await?;
    Ok(Json(state.store.list_parcels_by_sender(user.id).await?))
}

async fn get_parcel(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i32>,
) -> Result<impl IntoResponse> {
    caller(&state, &headers).await?;
    Ok(Json(state.store.get_parcel(id).await?))
}

async fn update_parcel_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i32>,
    Json(payload): Json<StatusUpdateRequest>,
) -> Result<impl IntoResponse> {
    let user = caller(&state, &headers).await?;
    let parcel = state.store.get_parcel(id).await?;
    if parcel.sender_id != user.id {
        return Err(ParcelExchangeError::Forbidden(
            "only the sender can change a parcel's status".to_string(),
        ));
    }
    let next = ParcelStatus::parse(payload.status.trim())?;
    if !parcel.status.can_transition_to(next) {
        return Err(ParcelExchangeError::Validation(format!(
            "cannot move parcel from {} to {}",
            parcel.status.as_str(),
            next.as_str()
        )));
    }
    Ok(Json(state.store.set_parcel_status(id, next).await?))
}

async fn parcel_matches(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i32>,
    Query(params): Query<MatchParams>,
) -> Result<impl IntoResponse> {
    let user = caller(&state, &headers).await?;
    let parcel = state.store.get_parcel(id).await?;
    if parcel.sender_id != user.id {
        return Err(ParcelExchangeError::Forbidden(
            "matches are only visible to the sender".to_string(),
        ));
    }
    let query = MatchQuery {
        sort: SortKey::from_query(params.sort.as_deref()),
        min_score: params
            .min_score
            .unwrap_or_else(|| state.config.default_min_score())
            .min(100),
        limit: Some(params.limit.unwrap_or_else(|| state.config.default_match_limit())),
    };
    let trips = state
        .store
        .candidate_trips(&parcel, state.config.date_window_days())
        .await?;
    let results = matching::rank(&parcel, trips, &query);
    debug!(parcel_id = id, results = results.len(), "ranked matches");
    Ok(Json(MatchResponse {
        parcel_id: id,
        sort: query.sort,
        results,
    }))
}

async fn create_conversation(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateConversationRequest>,
) -> Result<impl IntoResponse> {
    let user = caller(&state, &headers).await?;
    let mut participants = payload.participants;
    participants.push(user.id);
    for participant in &participants {
        state.store.get_user(*participant).await?;
    }
    let conversation = state
        .store
        .create_conversation(NewConversation {
            parcel_id: payload.parcel_id,
            trip_id: payload.trip_id,
            participants,
        })
        .await?;
    if conversation.participants.len() < 2 {
        warn!(conversation_id = conversation.id, "conversation has a single participant");
    }
    Ok((StatusCode::CREATED, Json(conversation)))
}

async fn list_messages(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i32>,
    Query(params): Query<PageParams>,
) -> Result<impl IntoResponse> {
    let user = caller(&state, &headers).await?;
    if !state.store.is_participant(id, user.id).await? {
        return Err(ParcelExchangeError::Forbidden(format!(
            "not a participant of conversation {id}"
        )));
    }
    let limit = params
        .limit
        .unwrap_or(DEFAULT_MESSAGE_PAGE)
        .clamp(1, MAX_MESSAGE_PAGE);
    Ok(Json(state.store.list_messages(id, limit).await?))
}

async fn unread_notifications(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<PageParams>,
) -> Result<impl IntoResponse> {
    let user = caller(&state, &headers).await?;
    let limit = params
        .limit
        .unwrap_or(crate::services::relay::UNREAD_NOTIFICATION_LIMIT)
        .clamp(1, MAX_MESSAGE_PAGE);
    Ok(Json(state.store.unread_notifications(user.id, limit).await?))
}

async fn mark_notification_read(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i32>,
) -> Result<impl IntoResponse> {
    let user = caller(&state, &headers).await?;
    if !state.store.mark_notification_read(user.id, id).await? {
        return Err(ParcelExchangeError::NotFound(format!("notification {id}")));
    }
    Ok(Json(json!({"status": "ok"})))
}

async fn realtime_stats(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse> {
    caller(&state, &headers).await?;
    Ok(Json(state.relay.stats().await))
}

async fn user_online(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(user_id): Path<i32>,
) -> Result<impl IntoResponse> {
    caller(&state, &headers).await?;
    let online = state.relay.is_user_online(user_id).await;
    Ok(Json(json!({"user_id": user_id, "online": online})))
}

async fn ws_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<WsParams>,
    upgrade: std::result::Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let identity = match bearer_token(&headers, params.token.as_deref()) {
        Ok(token) => state.store.authenticate(&token).await,
        Err(err) => Err(err),
    };
    let identity = match identity {
        Ok(identity) => identity,
        Err(err) => {
            warn!(error = %err, "realtime handshake rejected");
            return err.into_response();
        }
    };
    match upgrade {
        Ok(upgrade) => upgrade
            .on_upgrade(move |socket| serve_socket(state, identity, socket))
            .into_response(),
        Err(rejection) => rejection.into_response(),
    }
}

async fn serve_socket(state: AppState, identity: UserIdentity, socket: WebSocket) {
    let (connection, mut outbound) = state.relay.connect(identity).await;
    let (mut sink, mut stream) = socket.split();
    let idle_timeout = state.config.idle_timeout();
    let mut heartbeat = tokio::time::interval(state.config.heartbeat_interval());
    heartbeat.tick().await;
    let mut last_seen = Instant::now();

    loop {
        tokio::select! {
            incoming = stream.next() => match incoming {
                Some(Ok(WsMessage::Text(text))) => {
                    last_seen = Instant::now();
                    state.relay.handle_text(connection, &text).await;
                }
                Some(Ok(WsMessage::Close(_))) | None => break,
                Some(Ok(_)) => last_seen = Instant::now(),
                Some(Err(err)) => {
                    debug!(connection, error = %err, "socket read failed");
                    break;
                }
            },
            Some(event) = outbound.recv() => {
                if sink.send(WsMessage::Text(event.to_json())).await.is_err() {
                    break;
                }
            }
            _ = heartbeat.tick() => {
                if last_seen.elapsed() >= idle_timeout {
                    info!(connection, "closing idle connection");
                    let _ = sink.send(WsMessage::Close(None)).await;
                    break;
                }
                if sink.send(WsMessage::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
        }
    }

    state.relay.disconnect(connection).await;
}

pub struct ServeOptions {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub db_path: String,
}

pub async fn run(options: ServeOptions) -> Result<()> {
    run_with_shutdown(options, futures::future::pending::<()>()).await
}

pub async fn run_with_shutdown<F>(options: ServeOptions, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let config = config_store::load_or_init(&options.db_path)?;
    let host = options
        .host
        .or_else(|| config.server.as_ref().and_then(|s| s.host.clone()))
        .unwrap_or_else(|| "127.0.0.1".to_string());
    let port = options
        .port
        .or_else(|| config.server.as_ref().and_then(|s| s.port))
        .unwrap_or(8080);

    let store = Arc::new(SqliteStore::new(&options.db_path).await?);
    let app = build_router(AppState::new(store, config));

    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| ParcelExchangeError::Runtime(e.to_string()))?;
    info!(%addr, db = %options.db_path, "parcel exchange daemon listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| ParcelExchangeError::Runtime(e.to_string()))?;

    info!("parcel exchange daemon stopped");
    Ok(())
}
