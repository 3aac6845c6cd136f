//! HTTP tool server tests: a real Axum listener on an ephemeral port,
//! exercised with reqwest.

mod support;

use catalog_scout::server::build_router;
use serde_json::{json, Value};
use support::*;

async fn start_server() -> (String, Fixture) {
    let f = fixture().await;
    let app = build_router(f.app.discovery.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}", addr), f)
}

async fn call(base: &str, tool: &str, params: Value) -> (u16, Value) {
    let response = reqwest::Client::new()
        .post(format!("{}/tools/{}", base, tool))
        .json(&params)
        .send()
        .await
        .unwrap();
    let status = response.status().as_u16();
    (status, response.json().await.unwrap())
}

#[tokio::test]
async fn test_health_and_tool_list() {
    let (base, _f) = start_server().await;

    let health: Value = reqwest::get(format!("{}/health", base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["services"], 7);

    let list: Value = reqwest::get(format!("{}/tools/list", base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let names: Vec<&str> = list["tools"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap())
        .collect();
    assert_eq!(
        names,
        vec![
            "search_services",
            "list_entities",
            "inspect_entity",
            "execute_entity_operation"
        ]
    );
    assert_eq!(list["tools"][3]["read_only"], false);
}

#[tokio::test]
async fn test_progressive_flow_over_http() {
    let (base, f) = start_server().await;

    let (status, body) = call(&base, "search_services", json!({ "query": "customer", "domain": "AR" })).await;
    assert_eq!(status, 200);
    let results = body["result"]["results"].as_array().unwrap();
    assert!(!results.is_empty());
    assert!(results[0].get("properties").is_none());
    let service_id = results[0]["service_id"].as_str().unwrap().to_string();

    let (status, body) = call(&base, "list_entities", json!({ "service_id": service_id })).await;
    assert_eq!(status, 200);
    assert_eq!(body["result"]["entities"].as_array().unwrap().len(), 2);

    let (status, body) = call(
        &base,
        "inspect_entity",
        json!({ "service_id": service_id, "entity_name": "Customer" }),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(body["result"]["keys"], json!(["Customer"]));

    let (status, body) = call(
        &base,
        "execute_entity_operation",
        json!({
            "service_id": service_id,
            "entity_name": "Customer",
            "operation": "read",
            "top": 5
        }),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(body["result"]["data"]["count"], 0);
    assert_eq!(f.data.requests()[0].query.top, Some(5));
}

#[tokio::test]
async fn test_error_payloads_and_statuses() {
    let (base, f) = start_server().await;

    let (status, body) = call(
        &base,
        "inspect_entity",
        json!({ "service_id": "ZFAR_CUSTOMER_MASTER_SRV", "entity_name": "NoSuchEntity" }),
    )
    .await;
    assert_eq!(status, 404);
    assert_eq!(body["error"]["code"], "not_found");
    assert_eq!(body["error"]["details"]["available"], json!(["Customer", "OpenItem"]));

    let (status, body) = call(
        &base,
        "execute_entity_operation",
        json!({
            "service_id": "ZFAR_CUSTOMER_MASTER_SRV",
            "entity_name": "Customer",
            "operation": "create",
            "parameters": { "CustomerName": "ACME" }
        }),
    )
    .await;
    assert_eq!(status, 400);
    assert_eq!(body["error"]["code"], "capability_error");
    assert_eq!(body["error"]["details"]["capability"], "creatable");
    assert!(f.data.requests().is_empty());

    let (status, body) = call(
        &base,
        "execute_entity_operation",
        json!({ "service_id": "S", "entity_name": "E", "operation": "upsert" }),
    )
    .await;
    assert_eq!(status, 400);
    assert_eq!(body["error"]["code"], "validation_error");
    assert_eq!(body["error"]["details"]["valid"].as_array().unwrap().len(), 5);

    let (status, body) = call(&base, "inspect_entity", json!({ "service_id": "S" })).await;
    assert_eq!(status, 400);
    assert_eq!(body["error"]["details"]["missing"], json!(["entity_name"]));

    let (status, body) = call(&base, "nonexistent", json!({})).await;
    assert_eq!(status, 404);
    assert_eq!(body["error"]["details"]["kind"], "tool");
}
