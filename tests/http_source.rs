//! HttpSourceClient against a local HTTP responder.
//!
//! A bare tokio TcpListener answers every request from a route closure, so
//! the real reqwest stack, status classification, retries and the catalog
//! decoders all run without network access.
//!
//! Run with: `cargo test --test http_source`

use parking_lot::Mutex;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use item_sync::source::catalog::SourceEndpoint;
use item_sync::source::http::{HttpClientConfig, HttpSourceClient};
use item_sync::{
    CircuitBreakerManager, CircuitConfig, ExternalId, FetchParams, ResilientClient, Retrier, RetryConfig,
    SourceClient, SyncContext, SyncError,
};

type Route = dyn Fn(&str, usize) -> (u16, String) + Send + Sync;

/// Records every request target (path and query) it serves.
struct Responder {
    addr: SocketAddr,
    targets: Arc<Mutex<Vec<String>>>,
}

impl Responder {
    async fn start(route: impl Fn(&str, usize) -> (u16, String) + Send + Sync + 'static) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let targets = Arc::new(Mutex::new(Vec::new()));
        let route: Arc<Route> = Arc::new(route);

        let seen = Arc::clone(&targets);
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let seen = Arc::clone(&seen);
                let route = Arc::clone(&route);
                tokio::spawn(async move {
                    let mut buf = Vec::new();
                    let mut chunk = [0u8; 1024];
                    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                        match socket.read(&mut chunk).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => buf.extend_from_slice(&chunk[..n]),
                        }
                    }
                    let head = String::from_utf8_lossy(&buf);
                    let target = head.split_whitespace().nth(1).unwrap_or("/").to_string();

                    let index = {
                        let mut seen = seen.lock();
                        seen.push(target.clone());
                        seen.len() - 1
                    };
                    let (status, body) = route(&target, index);
                    let response = format!(
                        "HTTP/1.1 {status} X\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                        body.len()
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });

        Self { addr, targets }
    }

    fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    fn targets(&self) -> Vec<String> {
        self.targets.lock().clone()
    }
}

fn client(responder: &Responder, api_key: Option<&str>) -> HttpSourceClient {
    let resilient = ResilientClient::new(
        Arc::new(CircuitBreakerManager::new(CircuitConfig::default())),
        Retrier::new(RetryConfig {
            max_retries: 3,
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(20),
            factor: 2.0,
        }),
    );
    let config = HttpClientConfig {
        timeout: Duration::from_secs(5),
        ..HttpClientConfig::default()
    };
    HttpSourceClient::new(&config, resilient)
        .unwrap()
        .with_endpoint("pokemon", SourceEndpoint::new(responder.base_url()))
        .with_endpoint(
            "openweather",
            SourceEndpoint::new(responder.base_url()).with_api_key(api_key.map(String::from)),
        )
}

fn params(value: serde_json::Value) -> FetchParams {
    value.as_object().cloned().unwrap()
}

#[tokio::test]
async fn pokemon_page_is_decoded() {
    let responder = Responder::start(|_, _| {
        let body = json!({
            "count": 1302,
            "next": "https://pokeapi.co/api/v2/pokemon?offset=2&limit=2",
            "previous": null,
            "results": [
                {"name": "bulbasaur", "url": "https://pokeapi.co/api/v2/pokemon/1/"},
                {"name": "ivysaur", "url": "https://pokeapi.co/api/v2/pokemon/2/"}
            ]
        });
        (200, body.to_string())
    })
    .await;

    let page = client(&responder, None)
        .fetch_paginated(&SyncContext::new(), "pokemon", "list", &params(json!({"offset": 0, "limit": 2})))
        .await
        .unwrap();

    assert_eq!(responder.targets(), vec!["/pokemon?limit=2&offset=0"]);
    assert_eq!(page.items.len(), 2);
    assert_eq!(page.items[0].id, ExternalId::Int(1));
    assert_eq!(page.items[1].title, "ivysaur");
    assert_eq!(page.items[0].attributes["raw_data"]["name"], "bulbasaur");
    let pagination = page.pagination.unwrap();
    assert_eq!(pagination.count, 1302);
    assert!(pagination.has_next);
    assert!(!pagination.has_prev);
}

#[tokio::test]
async fn server_errors_are_retried() {
    let responder = Responder::start(|_, index| {
        if index < 2 {
            (503, json!({"error": "busy"}).to_string())
        } else {
            (200, json!({"count": 0, "next": null, "previous": null, "results": []}).to_string())
        }
    })
    .await;

    let records = client(&responder, None)
        .fetch(&SyncContext::new(), "pokemon", "list", &FetchParams::new())
        .await
        .unwrap();

    assert!(records.is_empty());
    assert_eq!(responder.targets().len(), 3);
}

#[tokio::test]
async fn missing_detail_is_not_found_without_retry() {
    let responder = Responder::start(|_, _| (404, json!({"detail": "Not found."}).to_string())).await;

    let err = client(&responder, None)
        .fetch_by_id(&SyncContext::new(), "pokemon", &ExternalId::Int(99_999))
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::NotFound(_)));
    assert_eq!(responder.targets(), vec!["/pokemon/99999"]);
}

#[tokio::test]
async fn pokemon_detail_is_decoded() {
    let responder = Responder::start(|_, _| (200, json!({"id": 25, "name": "pikachu", "height": 4}).to_string())).await;

    let record = client(&responder, None)
        .fetch_by_id(&SyncContext::new(), "pokemon", &ExternalId::Int(25))
        .await
        .unwrap();

    assert_eq!(record.id, ExternalId::Int(25));
    assert_eq!(record.title, "pikachu");
}

#[tokio::test]
async fn malformed_body_is_not_retried() {
    let responder = Responder::start(|_, _| (200, "{not json".to_string())).await;

    let err = client(&responder, None)
        .fetch(&SyncContext::new(), "pokemon", "list", &FetchParams::new())
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::Decode(_)));
    assert_eq!(responder.targets().len(), 1);
}

#[tokio::test]
async fn openweather_city_is_decoded() {
    let responder = Responder::start(|_, _| {
        let body = json!({
            "id": 1642911,
            "name": "Jakarta",
            "main": {"temp": 31.2, "humidity": 70},
            "weather": [{"main": "Clouds", "description": "broken clouds"}]
        });
        (200, body.to_string())
    })
    .await;

    let records = client(&responder, Some("k3y"))
        .fetch(&SyncContext::new(), "openweather", "weather", &params(json!({"city": "Jakarta"})))
        .await
        .unwrap();

    assert_eq!(responder.targets(), vec!["/weather?q=Jakarta&appid=k3y&units=metric"]);
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.id, ExternalId::Int(1_642_911));
    assert_eq!(record.title, "Jakarta");
    assert_eq!(record.attributes["temperature"], 31.2);
    assert_eq!(record.attributes["weather_main"], "Clouds");
    assert_eq!(record.description(), "broken clouds");
}

#[tokio::test]
async fn unauthorized_is_not_retried() {
    let responder = Responder::start(|_, _| (401, json!({"cod": 401}).to_string())).await;

    let err = client(&responder, Some("bad"))
        .fetch(&SyncContext::new(), "openweather", "weather", &params(json!({"city": "Bandung"})))
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::Http { status: 401, .. }));
    assert_eq!(responder.targets().len(), 1);
}
