use httpmock::Method::GET;
use httpmock::MockServer;
use serde_json::json;

use parcel_exchange::error::ParcelExchangeError;
use parcel_exchange::services::daemon_client::DaemonClient;

#[tokio::test]
async fn fetches_health_and_stats_with_bearer_token() {
    let server = MockServer::start_async().await;
    let health = server
        .mock_async(|when, then| {
            when.method(GET).path("/health");
            then.status(200).json_body(json!({"status": "ok"}));
        })
        .await;
    let stats = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/realtime/stats")
                .header("authorization", "Bearer secret");
            then.status(200)
                .json_body(json!({"connected_users": 2, "connections": 3, "rooms": ["conversation:1"]}));
        })
        .await;

    let client = DaemonClient::new(server.base_url(), "secret").unwrap();
    assert_eq!(client.health().await.unwrap()["status"], "ok");
    let body = client.stats().await.unwrap();
    assert_eq!(body["connections"], 3);

    health.assert_async().await;
    stats.assert_async().await;
}

#[tokio::test]
async fn passes_match_query_parameters() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/parcels/7/matches")
                .query_param("sort", "rating")
                .query_param("min_score", "60")
                .query_param("limit", "3");
            then.status(200)
                .json_body(json!({"parcel_id": 7, "sort": "rating", "results": []}));
        })
        .await;

    let client = DaemonClient::new(format!("{}/", server.base_url()), "secret").unwrap();
    let body = client
        .matches(7, Some("rating"), Some(60), Some(3))
        .await
        .unwrap();
    assert_eq!(body["parcel_id"], 7);
    mock.assert_async().await;
}

#[tokio::test]
async fn maps_error_statuses() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/parcels/1/matches");
            then.status(403)
                .json_body(json!({"error": "forbidden: matches are only visible to the sender"}));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/realtime/stats");
            then.status(401).json_body(json!({"error": "unauthorized: invalid token"}));
        })
        .await;

    let client = DaemonClient::new(server.base_url(), "wrong").unwrap();
    match client.matches(1, None, None, None).await {
        Err(ParcelExchangeError::Forbidden(message)) => assert!(message.contains("sender")),
        other => panic!("unexpected {other:?}"),
    }
    assert!(matches!(
        client.stats().await,
        Err(ParcelExchangeError::Unauthorized(_))
    ));
}
