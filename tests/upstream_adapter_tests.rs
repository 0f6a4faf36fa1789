use chrono::{Duration, Utc};
use serde_json::json;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use price_oracle::models::price::Network;
use price_oracle::services::upstream::{
    LaunchDateSource, MarketDataService, SpotPriceSource, UpstreamOutcome,
};

const RECENT_WINDOW_SECS: i64 = 24 * 3600;

fn service(server: &MockServer) -> MarketDataService {
    MarketDataService::new(
        "test-key".to_string(),
        server.uri(),
        RECENT_WINDOW_SECS,
    )
}

#[tokio::test]
async fn recent_lookups_use_the_current_price_endpoint() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/simple/price"))
        .and(query_param("ids", "ethereum"))
        .and(query_param("vs_currencies", "usd"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"ethereum": {"usd": 2345.678}})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let outcome = service(&server)
        .fetch_spot_price("ETH", Network::Ethereum, Utc::now())
        .await;

    // Rounded to two decimals
    assert_eq!(outcome, UpstreamOutcome::Found(2345.68));
}

#[tokio::test]
async fn old_lookups_use_the_historical_endpoint() {
    let server = MockServer::start().await;
    let at = Utc::now() - Duration::hours(25);
    let date = at.format("%d-%m-%Y").to_string();

    Mock::given(method("GET"))
        .and(path("/coins/ethereum/history"))
        .and(query_param("date", date.as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "market_data": {"current_price": {"usd": 1888.999}}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let outcome = service(&server)
        .fetch_spot_price("ETH", Network::Ethereum, at)
        .await;

    assert_eq!(outcome, UpstreamOutcome::Found(1889.0));
}

#[tokio::test]
async fn client_errors_mean_no_data() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/simple/price"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let outcome = service(&server)
        .fetch_spot_price("ETH", Network::Ethereum, Utc::now())
        .await;

    assert_eq!(outcome, UpstreamOutcome::NoData);
}

#[tokio::test]
async fn server_errors_are_transient() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/simple/price"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let outcome = service(&server)
        .fetch_spot_price("ETH", Network::Ethereum, Utc::now())
        .await;

    assert!(matches!(outcome, UpstreamOutcome::Transient(_)));
}

#[tokio::test]
async fn malformed_payloads_mean_no_data() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/simple/price"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let outcome = service(&server)
        .fetch_spot_price("ETH", Network::Ethereum, Utc::now())
        .await;

    assert_eq!(outcome, UpstreamOutcome::NoData);
}

#[tokio::test]
async fn payload_without_usd_price_means_no_data() {
    let server = MockServer::start().await;
    let at = Utc::now() - Duration::days(30);

    Mock::given(method("GET"))
        .and(path("/coins/ethereum/history"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            // Provider had the coin but no market data for that day
            "id": "ethereum"
        })))
        .mount(&server)
        .await;

    let outcome = service(&server)
        .fetch_spot_price("ETH", Network::Ethereum, at)
        .await;

    assert_eq!(outcome, UpstreamOutcome::NoData);
}

#[tokio::test]
async fn unmapped_tokens_skip_the_network_entirely() {
    let server = MockServer::start().await;
    // No mocks mounted: any request would 404 the mock server's expectations

    let service = service(&server);

    let outcome = service
        .fetch_spot_price("ZZZZZ", Network::Ethereum, Utc::now())
        .await;
    assert_eq!(outcome, UpstreamOutcome::NoData);

    let outcome = service
        .fetch_spot_price(
            "0x1111111111111111111111111111111111111111",
            Network::Ethereum,
            Utc::now(),
        )
        .await;
    assert_eq!(outcome, UpstreamOutcome::NoData);

    assert_eq!(server.received_requests().await.unwrap().len(), 0);
}

#[tokio::test]
async fn known_contract_addresses_resolve_like_symbols() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/simple/price"))
        .and(query_param("ids", "usd-coin"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"usd-coin": {"usd": 1.0}})))
        .expect(1)
        .mount(&server)
        .await;

    let outcome = service(&server)
        .fetch_spot_price(
            "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48",
            Network::Ethereum,
            Utc::now(),
        )
        .await;

    assert_eq!(outcome, UpstreamOutcome::Found(1.0));
}

#[tokio::test]
async fn first_transfer_comes_from_coin_metadata() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/coins/ethereum"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "ethereum",
            "genesis_date": "2015-07-30"
        })))
        .mount(&server)
        .await;

    let first = service(&server)
        .first_transfer("ETH", Network::Ethereum)
        .await
        .expect("genesis date");

    assert_eq!(first.format("%Y-%m-%d").to_string(), "2015-07-30");
}

#[tokio::test]
async fn missing_genesis_date_is_unknown() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/coins/ethereum"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "ethereum",
            "genesis_date": null
        })))
        .mount(&server)
        .await;

    let first = service(&server).first_transfer("ETH", Network::Ethereum).await;
    assert!(first.is_none());
}
