/*
 * HTTP surface tests against in-memory chains and connectors
 */

use dex_gateway::api::create_rocket;
use dex_gateway::chain::{ChainRegistry, WalletKeys};
use dex_gateway::connectors::ConnectorRegistry;
use dex_gateway::models::{ExecutionResult, QuoteSwapResponse};
use dex_gateway::testing::{self, MockChain, MockConnector, MockPositions};
use dex_gateway::{Config, Gateway};
use rocket::http::{ContentType, Status};
use rocket::local::asynchronous::Client;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

struct TestApp {
    client: Client,
    chain: Arc<MockChain>,
}

async fn app() -> TestApp {
    app_with(Config::default()).await
}

async fn app_with(config: Config) -> TestApp {
    let config = Arc::new(config);
    let chain = Arc::new(MockChain::solana());
    let chains = Arc::new(ChainRegistry::new(config.clone(), Arc::new(WalletKeys::default())));
    chains.insert(chain.clone());

    let mut connectors = ConnectorRegistry::new();
    connectors.register_swap(Arc::new(MockConnector::solana("jupiter").with_price(Decimal::from(150))));
    connectors.register_swap(Arc::new(MockConnector::solana("raydium").without_route()));
    connectors.register_liquidity(Arc::new(MockPositions::default()));

    let gateway = Gateway::from_parts(config, chains, Arc::new(testing::token_registry()), connectors)
        .expect("gateway");
    let client = Client::tracked(create_rocket(gateway)).await.expect("rocket");
    TestApp { client, chain }
}

fn dec(value: &str) -> Decimal {
    Decimal::from_str(value).unwrap()
}

async fn quote(app: &TestApp, query: &str) -> (Status, Value) {
    let response = app
        .client
        .get(format!("/connectors/jupiter/quote-swap?{query}"))
        .dispatch()
        .await;
    let status = response.status();
    (status, response.into_json().await.unwrap_or(Value::Null))
}

#[rocket::async_test]
async fn health_is_ok() {
    let app = app().await;
    let response = app.client.get("/health").dispatch().await;
    assert_eq!(response.status(), Status::Ok);
    assert_eq!(response.into_string().await.as_deref(), Some("OK"));
}

#[rocket::async_test]
async fn lists_registered_connectors() {
    let app = app().await;
    let response = app.client.get("/connectors").dispatch().await;
    assert_eq!(response.status(), Status::Ok);
    let body: Value = response.into_json().await.unwrap();
    let names: Vec<&str> = body["connectors"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(Value::as_str)
        .collect();
    assert!(names.contains(&"jupiter"));
    assert!(names.contains(&"mock-clmm"));
}

#[rocket::async_test]
async fn quote_swap_returns_normalized_amounts() {
    let app = app().await;
    let response = app
        .client
        .get("/connectors/jupiter/quote-swap?baseToken=SOL&quoteToken=USDC&amount=0.5&side=SELL")
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Ok);

    let quote: QuoteSwapResponse = response.into_json().await.unwrap();
    assert_eq!(quote.network, "mainnet-beta");
    assert_eq!(quote.token_in.symbol, "SOL");
    assert_eq!(quote.token_out.symbol, "USDC");
    assert_eq!(quote.amount_in, dec("0.5"));
    assert_eq!(quote.amount_out, dec("75"));
    assert_eq!(quote.price, dec("150"));
    assert_eq!(quote.min_amount_out, dec("74.25"));
}

#[rocket::async_test]
async fn unknown_tokens_are_not_found() {
    let app = app().await;
    let (status, body) = quote(&app, "baseToken=NOTATOKEN&quoteToken=USDC&amount=1&side=SELL").await;
    assert_eq!(status, Status::NotFound);
    assert_eq!(body["error"], "NotFound");
    assert_eq!(body["statusCode"], 404);
    assert!(body["message"].as_str().unwrap().contains("NOTATOKEN"));
}

#[rocket::async_test]
async fn invalid_side_and_amount_are_bad_requests() {
    let app = app().await;
    let (status, body) = quote(&app, "baseToken=SOL&quoteToken=USDC&amount=1&side=HOLD").await;
    assert_eq!(status, Status::BadRequest);
    assert_eq!(body["error"], "BadRequest");

    let (status, _) = quote(&app, "baseToken=SOL&quoteToken=USDC&amount=-1&side=SELL").await;
    assert_eq!(status, Status::BadRequest);
}

#[rocket::async_test]
async fn missing_routes_are_not_found() {
    let app = app().await;
    let response = app
        .client
        .get("/connectors/raydium/quote-swap?baseToken=SOL&quoteToken=USDC&amount=1&side=SELL")
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::NotFound);
}

#[rocket::async_test]
async fn executes_a_quote_once() {
    let app = app().await;
    app.chain.set_balance("SOL", dec("2"));
    app.chain.settle_with(vec![
        testing::balance_entry(&testing::sol(), dec("2"), dec("1.5")),
        testing::balance_entry(&testing::usdc(), dec("0"), dec("74.9")),
    ]);

    let (status, quote) = quote(&app, "baseToken=SOL&quoteToken=USDC&amount=0.5&side=SELL").await;
    assert_eq!(status, Status::Ok);
    let body = json!({
        "walletAddress": testing::WALLET,
        "quoteId": quote["quoteId"],
    });

    let response = app
        .client
        .post("/connectors/jupiter/execute-quote")
        .header(ContentType::JSON)
        .body(body.to_string())
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Ok);
    let result: ExecutionResult = response.into_json().await.unwrap();
    assert_eq!(result.total_input_swapped, dec("0.5"));
    assert_eq!(result.total_output_swapped, dec("74.9"));
    assert_eq!(result.base_token_balance_change, dec("-0.5"));

    let replay = app
        .client
        .post("/connectors/jupiter/execute-quote")
        .header(ContentType::JSON)
        .body(body.to_string())
        .dispatch()
        .await;
    assert_eq!(replay.status(), Status::NotFound);
}

async fn post_json(app: &TestApp, uri: &str, body: &Value) -> (Status, Value) {
    let response = app
        .client
        .post(uri.to_string())
        .header(ContentType::JSON)
        .body(body.to_string())
        .dispatch()
        .await;
    let status = response.status();
    (status, response.into_json().await.unwrap_or(Value::Null))
}

#[rocket::async_test]
async fn buy_execution_checks_max_input_and_reports_deltas() {
    let app = app().await;
    app.chain.set_balance("USDC", dec("151.4"));

    let response = app
        .client
        .get("/connectors/jupiter/quote-swap?baseToken=SOL&quoteToken=USDC&amount=1&side=BUY")
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Ok);
    let quote: QuoteSwapResponse = response.into_json().await.unwrap();
    assert_eq!(quote.token_in.symbol, "USDC");
    assert_eq!(quote.amount_in, dec("150"));
    assert_eq!(quote.max_amount_in, dec("151.5"));

    let body = json!({"walletAddress": testing::WALLET, "quoteId": quote.quote_id});
    let (status, error) = post_json(&app, "/connectors/jupiter/execute-quote", &body).await;
    assert_eq!(status, Status::BadRequest);
    assert!(error["message"].as_str().unwrap().contains("required 151.5"));
    assert_eq!(app.chain.submitted(), 0);

    app.chain.set_balance("USDC", dec("200"));
    app.chain.settle_with(vec![
        testing::balance_entry(&testing::sol(), dec("0"), dec("1")),
        testing::balance_entry(&testing::usdc(), dec("200"), dec("50.2")),
    ]);
    let (status, result) = post_json(&app, "/connectors/jupiter/execute-quote", &body).await;
    assert_eq!(status, Status::Ok);
    let result: ExecutionResult = serde_json::from_value(result).unwrap();
    assert_eq!(result.total_input_swapped, dec("149.8"));
    assert_eq!(result.total_output_swapped, dec("1"));
    assert_eq!(result.base_token_balance_change, dec("1"));
    assert_eq!(result.quote_token_balance_change, dec("-149.8"));
}

#[rocket::async_test]
async fn expired_quotes_are_not_found() {
    let mut config = Config::default();
    config.gateway.quote_ttl_secs = 1;
    let app = app_with(config).await;
    app.chain.set_balance("SOL", dec("2"));

    let (status, quote) = quote(&app, "baseToken=SOL&quoteToken=USDC&amount=0.5&side=SELL").await;
    assert_eq!(status, Status::Ok);
    tokio::time::sleep(Duration::from_millis(1100)).await;

    let body = json!({"walletAddress": testing::WALLET, "quoteId": quote["quoteId"]});
    let (status, error) = post_json(&app, "/connectors/jupiter/execute-quote", &body).await;
    assert_eq!(status, Status::NotFound);
    assert_eq!(error["error"], "NotFound");
    assert_eq!(app.chain.submitted(), 0);
}

#[rocket::async_test]
async fn malformed_bodies_are_bad_requests() {
    let app = app().await;
    let (status, error) = post_json(
        &app,
        "/connectors/jupiter/execute-swap",
        &json!({
            "walletAddress": testing::WALLET,
            "baseToken": "SOL",
            "quoteToken": "USDC",
            "amount": "1",
            "side": "HOLD",
        }),
    )
    .await;
    assert_eq!(status, Status::BadRequest);
    assert_eq!(error["error"], "BadRequest");
    assert_eq!(error["statusCode"], 400);

    let (status, error) = post_json(
        &app,
        "/connectors/mock-clmm/open-position",
        &json!({"walletAddress": testing::WALLET, "poolAddress": testing::POOL, "upperPrice": "200"}),
    )
    .await;
    assert_eq!(status, Status::BadRequest);
    assert_eq!(error["statusCode"], 400);
    assert_eq!(app.chain.submitted(), 0);
}

#[rocket::async_test]
async fn execute_swap_settles_in_one_call() {
    let app = app().await;
    app.chain.set_balance("SOL", dec("2"));
    app.chain.settle_with(vec![
        testing::balance_entry(&testing::sol(), dec("2"), dec("1")),
        testing::balance_entry(&testing::usdc(), dec("0"), dec("149")),
    ]);

    let (status, result) = post_json(
        &app,
        "/connectors/jupiter/execute-swap",
        &json!({
            "walletAddress": testing::WALLET,
            "baseToken": "SOL",
            "quoteToken": "USDC",
            "amount": "1",
            "side": "SELL",
        }),
    )
    .await;
    assert_eq!(status, Status::Ok);
    assert_eq!(result["totalOutputSwapped"], "149");
}

#[rocket::async_test]
async fn unconfigured_networks_never_reach_the_filesystem() {
    let app = app().await;
    let (status, body) = quote(
        &app,
        "network=..%2F..%2F..%2Fetc%2Fx&baseToken=SOL&quoteToken=USDC&amount=1&side=SELL",
    )
    .await;
    assert_eq!(status, Status::BadRequest);
    assert!(body["message"].as_str().unwrap().contains("Unsupported network"));

    let response = app.client.get("/chains/solana/tokens?network=..%2Fsecrets").dispatch().await;
    assert_eq!(response.status(), Status::BadRequest);
}

#[rocket::async_test]
async fn insufficient_balance_reports_required_and_available() {
    let app = app().await;
    app.chain.set_balance("SOL", dec("0.5"));

    let (_, quote) = quote(&app, "baseToken=SOL&quoteToken=USDC&amount=0.5&side=SELL").await;
    let response = app
        .client
        .post("/connectors/jupiter/execute-quote")
        .header(ContentType::JSON)
        .body(json!({"walletAddress": testing::WALLET, "quoteId": quote["quoteId"]}).to_string())
        .dispatch()
        .await;

    assert_eq!(response.status(), Status::BadRequest);
    let body: Value = response.into_json().await.unwrap();
    let message = body["message"].as_str().unwrap();
    assert!(message.contains("required 0.51"));
    assert!(message.contains("available 0.5"));
    assert_eq!(app.chain.submitted(), 0);
}

#[rocket::async_test]
async fn unknown_and_malformed_quote_ids() {
    let app = app().await;
    let unknown = app
        .client
        .post("/connectors/jupiter/execute-quote")
        .header(ContentType::JSON)
        .body(
            json!({"walletAddress": testing::WALLET, "quoteId": "6f1c2b8e-4d3a-4e5f-9a7b-1c2d3e4f5a6b"})
                .to_string(),
        )
        .dispatch()
        .await;
    assert_eq!(unknown.status(), Status::NotFound);

    let malformed = app
        .client
        .post("/connectors/jupiter/execute-quote")
        .header(ContentType::JSON)
        .body(json!({"walletAddress": testing::WALLET, "quoteId": "not-a-uuid"}).to_string())
        .dispatch()
        .await;
    assert_eq!(malformed.status(), Status::BadRequest);
}

#[rocket::async_test]
async fn inverted_price_range_is_rejected() {
    let app = app().await;
    let response = app
        .client
        .post("/connectors/mock-clmm/open-position")
        .header(ContentType::JSON)
        .body(
            json!({
                "walletAddress": testing::WALLET,
                "poolAddress": testing::POOL,
                "lowerPrice": "200",
                "upperPrice": "100",
                "baseTokenAmount": "1",
            })
            .to_string(),
        )
        .dispatch()
        .await;

    assert_eq!(response.status(), Status::BadRequest);
    let body: Value = response.into_json().await.unwrap();
    assert_eq!(body["message"], "Upper price must be greater than lower price");
    assert_eq!(app.chain.submitted(), 0);
}

#[rocket::async_test]
async fn position_info_round_trips_through_the_connector() {
    let app = app().await;
    let response = app
        .client
        .get(format!("/connectors/mock-clmm/position-info?positionAddress={}", testing::POSITION))
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Ok);
    let body: Value = response.into_json().await.unwrap();
    assert_eq!(body["poolAddress"], testing::POOL);
    assert_eq!(body["owner"], testing::WALLET);
}

#[rocket::async_test]
async fn unknown_connectors_and_routes_use_the_error_shape() {
    let app = app().await;
    let response = app
        .client
        .get("/connectors/nope/quote-swap?baseToken=SOL&quoteToken=USDC&amount=1&side=SELL")
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::NotFound);

    let response = app.client.get("/does/not/exist").dispatch().await;
    assert_eq!(response.status(), Status::NotFound);
    let body: Value = response.into_json().await.unwrap();
    assert_eq!(body["error"], "NotFound");
    assert_eq!(body["statusCode"], 404);
}

#[rocket::async_test]
async fn chain_balances_are_keyed_by_symbol() {
    let app = app().await;
    app.chain.set_balance("USDC", dec("12.5"));
    let response = app
        .client
        .get(format!("/chains/solana/balances?wallet={}&tokens=USDC", testing::WALLET))
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Ok);
    let body: Value = response.into_json().await.unwrap();
    assert_eq!(body["balances"]["USDC"], "12.5");
    assert!(body["balances"].get("SOL").is_none());
}

#[rocket::async_test]
async fn metrics_expose_quote_counters() {
    let app = app().await;
    quote(&app, "baseToken=SOL&quoteToken=USDC&amount=0.5&side=SELL").await;

    let response = app.client.get("/metrics").dispatch().await;
    assert_eq!(response.status(), Status::Ok);
    let text = response.into_string().await.unwrap();
    assert!(text.contains("dex_gateway_quotes_created_total"));
}
