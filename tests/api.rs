//! HTTP query surface driven through the router without a socket

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

use arl::api::{router, AppState};
use arl::{BasketId, Item, MiningConfig, MiningPipeline, RuleFilter, TransactionTable};

fn app() -> Router {
    let baskets: [(&str, &[&str]); 4] = [
        ("B1", &["a", "b"]),
        ("B2", &["a", "b"]),
        ("B3", &["a", "c"]),
        ("B4", &["a", "b", "c"]),
    ];
    let table = TransactionTable::from_baskets(baskets.iter().map(|(id, items)| {
        (
            BasketId::new(*id, "2017-08"),
            items.iter().map(|s| Item::new(*s, "1")).collect::<Vec<_>>(),
        )
    }));

    let config = MiningConfig::new(0.5, RuleFilter::confidence(0.5));
    let model = MiningPipeline::new(config)
        .unwrap()
        .run_table(table)
        .unwrap();

    router(AppState::new(Arc::new(model)), Duration::from_secs(5))
}

async fn get(app: Router, uri: &str) -> (StatusCode, Value) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

#[tokio::test]
async fn health_reports_rule_count() {
    let (status, body) = get(app(), "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["rules"], 4);
}

#[tokio::test]
async fn recommendations_follow_lift_order() {
    let (status, body) = get(app(), "/api/v1/recommendations/a_1?count=1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["items"], serde_json::json!(["b_1"]));
    assert_eq!(body["count"], 1);
    assert_eq!(body["matching_rules"], 2);
    assert_eq!(body["details"][0]["because_of"], serde_json::json!(["a_1"]));
}

#[tokio::test]
async fn recommendations_default_count_and_unknown_item() {
    let (status, body) = get(app(), "/api/v1/recommendations/a_1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 4);
    assert_eq!(body["items"], serde_json::json!(["b_1", "c_1"]));

    let (status, body) = get(app(), "/api/v1/recommendations/zzz_9?count=3").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["items"], serde_json::json!([]));
    assert_eq!(body["matching_rules"], 0);
}

#[tokio::test]
async fn malformed_item_label_is_bad_request() {
    let (status, body) = get(app(), "/api/v1/recommendations/nounderscore").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn rules_are_paged_in_rank_order() {
    let (status, body) = get(app(), "/api/v1/rules?limit=2").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 4);
    assert_eq!(body["has_more"], true);

    let rules = body["rules"].as_array().unwrap();
    assert_eq!(rules.len(), 2);
    assert!(rules[0]["lift"].as_f64() >= rules[1]["lift"].as_f64());

    let (_, tail) = get(app(), "/api/v1/rules?limit=2&offset=2").await;
    assert_eq!(tail["has_more"], false);

    let (status, _) = get(app(), "/api/v1/rules?limit=0").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn stats_expose_run_summary() {
    let (status, body) = get(app(), "/api/v1/stats").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["stats"]["baskets"], 4);
    assert_eq!(body["stats"]["frequent_itemsets"], 5);
    assert_eq!(body["report"]["baskets"], 4);
}
