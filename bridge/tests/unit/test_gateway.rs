//! Provider gateway tests against a local stand-in for the provider

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

use vercelwp::cache::gateway::CachedGateway;
use vercelwp::errors::GatewayError;
use vercelwp::http::client::HttpClient;
use vercelwp::http::gateway::{DeployGateway, VercelGateway};
use vercelwp::models::deployment::{DeploymentState, Environment};
use vercelwp::models::status::SubsystemHealth;
use vercelwp::storage::secrets::{MemorySecretStore, SecretKey};
use vercelwp::storage::settings::GatewaySettings;
use vercelwp::utils::SystemClock;

const API_KEY: &str = "tok_test";
const PROJECT_ID: &str = "prj_1";

#[derive(Clone, Default)]
struct Provider {
    list_calls: Arc<AtomicUsize>,
}

async fn deployments(
    State(provider): State<Provider>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Result<Json<Value>, StatusCode> {
    provider.list_calls.fetch_add(1, Ordering::SeqCst);

    let authorized = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == format!("Bearer {}", API_KEY));
    if !authorized || query.get("projectId").map(String::as_str) != Some(PROJECT_ID) {
        return Err(StatusCode::UNAUTHORIZED);
    }

    // Deliberately out of order, with one record the bridge cannot read
    Ok(Json(json!({
        "deployments": [
            {
                "uid": "dpl_old",
                "state": "READY",
                "createdAt": 1_700_000_000_000_i64,
                "target": "production",
                "meta": { "githubCommitRef": "main" }
            },
            { "uid": "dpl_broken", "state": "READY" },
            {
                "uid": "dpl_new",
                "readyState": "BUILDING",
                "created": 1_700_000_600_000_i64,
                "meta": { "githubCommitRef": "feature/x", "githubCommitMessage": "Tweak" },
                "creator": { "username": "dev" }
            }
        ]
    })))
}

async fn status_page() -> Json<Value> {
    Json(json!({
        "status": {
            "indicators": [
                { "name": "API", "status": "operational" },
                { "name": "Edge Network", "status": "degraded_performance" }
            ]
        }
    }))
}

async fn spawn_provider(provider: Provider) -> String {
    let router = Router::new()
        .route("/hook/ok", post(|| async { StatusCode::CREATED }))
        .route("/hook/fail", post(|| async { StatusCode::INTERNAL_SERVER_ERROR }))
        .route("/v6/deployments", get(deployments))
        .route("/v6/empty", get(|| async { Json(json!({ "deployments": [] })) }))
        .route("/status.json", get(status_page))
        .route("/status/broken", get(|| async { StatusCode::BAD_GATEWAY }))
        .with_state(provider);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

fn gateway(base: &str, deployments: &str, status: &str, webhook: Option<&str>) -> VercelGateway {
    let mut values = vec![(SecretKey::ApiKey, API_KEY), (SecretKey::ProjectId, PROJECT_ID)];
    let webhook = webhook.map(|path| format!("{}{}", base, path));
    if let Some(webhook) = webhook.as_deref() {
        values.push((SecretKey::WebhookAddress, webhook));
    }

    let settings = GatewaySettings {
        deployments_url: format!("{}{}", base, deployments),
        status_url: format!("{}{}", base, status),
        trigger_timeout_secs: 5,
        request_timeout_secs: 5,
        cache_ttl_secs: 30,
    };

    VercelGateway::new(
        HttpClient::new(Duration::from_secs(5)).unwrap(),
        Arc::new(MemorySecretStore::with_values(&values)),
        settings,
        Arc::new(SystemClock),
    )
}

#[tokio::test]
async fn test_trigger_build() {
    let base = spawn_provider(Provider::default()).await;

    let ok = gateway(&base, "/v6/deployments", "/status.json", Some("/hook/ok"));
    assert_eq!(ok.trigger_build().await, Ok(()));

    let failing = gateway(&base, "/v6/deployments", "/status.json", Some("/hook/fail"));
    assert_eq!(
        failing.trigger_build().await,
        Err(GatewayError::HttpError { code: 500 })
    );

    let unset = gateway(&base, "/v6/deployments", "/status.json", None);
    assert!(matches!(
        unset.trigger_build().await,
        Err(GatewayError::NotConfigured(_))
    ));
}

#[tokio::test]
async fn test_deployments_are_sorted_newest_first() {
    let base = spawn_provider(Provider::default()).await;
    let gateway = gateway(&base, "/v6/deployments", "/status.json", None);

    let records = gateway.list_deployments(None).await.unwrap();
    let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["dpl_new", "dpl_old"]);

    let latest = gateway.get_latest_deployment().await.unwrap();
    assert_eq!(latest.id, "dpl_new");
    assert_eq!(latest.state, DeploymentState::Building);
    assert_eq!(latest.branch, "feature/x");
    assert_eq!(latest.author.as_deref(), Some("dev"));
    assert_eq!(latest.environment, Environment::Preview);

    assert_eq!(gateway.list_deployments(Some(1)).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_empty_deployment_list_is_no_data() {
    let base = spawn_provider(Provider::default()).await;
    let gateway = gateway(&base, "/v6/empty", "/status.json", None);

    assert_eq!(
        gateway.get_latest_deployment().await,
        Err(GatewayError::NoData)
    );
}

#[tokio::test]
async fn test_missing_credentials_are_not_configured() {
    let base = spawn_provider(Provider::default()).await;
    let gateway = VercelGateway::new(
        HttpClient::new(Duration::from_secs(5)).unwrap(),
        Arc::new(MemorySecretStore::new()),
        GatewaySettings {
            deployments_url: format!("{}/v6/deployments", base),
            ..GatewaySettings::default()
        },
        Arc::new(SystemClock),
    );

    assert!(matches!(
        gateway.get_latest_deployment().await,
        Err(GatewayError::NotConfigured(_))
    ));
}

#[tokio::test]
async fn test_service_status() {
    let base = spawn_provider(Provider::default()).await;

    let status = gateway(&base, "/v6/deployments", "/status.json", None)
        .get_service_status()
        .await
        .unwrap();
    assert_eq!(status.api, SubsystemHealth::Operational);
    assert_eq!(status.cdn, SubsystemHealth::Degraded);
    assert_eq!(status.issues(), vec!["CDN: degraded".to_string()]);

    // An unreachable status page never fails the call
    let status = gateway(&base, "/v6/deployments", "/status/broken", None)
        .get_service_status()
        .await
        .unwrap();
    assert!(status.is_all_operational());
}

#[tokio::test]
async fn test_cached_gateway_reuses_deployment_list() {
    let provider = Provider::default();
    let base = spawn_provider(provider.clone()).await;
    let inner = Arc::new(gateway(&base, "/v6/deployments", "/status.json", Some("/hook/ok")));
    let cached = CachedGateway::new(inner, Duration::from_secs(60));

    assert_eq!(cached.list_deployments(None).await.unwrap().len(), 2);
    assert_eq!(cached.list_deployments(Some(1)).await.unwrap().len(), 1);
    assert_eq!(provider.list_calls.load(Ordering::SeqCst), 1);

    // Latest always goes to the provider
    cached.get_latest_deployment().await.unwrap();
    assert_eq!(provider.list_calls.load(Ordering::SeqCst), 2);

    // A triggered build drops the cached list
    cached.trigger_build().await.unwrap();
    cached.list_deployments(None).await.unwrap();
    assert_eq!(provider.list_calls.load(Ordering::SeqCst), 3);

    cached.invalidate();
    cached.list_deployments(None).await.unwrap();
    assert_eq!(provider.list_calls.load(Ordering::SeqCst), 4);
}
