//! Mission workflows through the full agent stack: the assess_risk chain,
//! route and evacuation missions, and the cascade update.

mod common;

use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use tower::ServiceExt;

use agos::api::create_app;
use agos::types::MissionState;

use common::*;

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn submit_mission(stack: &TestStack, body: serde_json::Value) -> String {
    let app = create_app(stack.api.clone());
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/orchestrator/mission")
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    body_json(response).await["data"]["mission_id"]
        .as_str()
        .unwrap()
        .to_string()
}

/// Poll the mission endpoint until the record reaches a terminal state.
async fn await_terminal(stack: &TestStack, mission_id: &str) -> serde_json::Value {
    for _ in 0..400 {
        let app = create_app(stack.api.clone());
        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/orchestrator/mission/{mission_id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        if response.status() == StatusCode::OK {
            let v = body_json(response).await;
            let state = v["data"]["state"].as_str().unwrap_or_default().to_string();
            if state == "COMPLETED" || state == "FAILED" {
                return v["data"].clone();
            }
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("mission {mission_id} never reached a terminal state");
}

/// Scenario (e): assess_risk walks scout → flood → hazard and completes
/// with the step summaries accumulated in partial results.
#[tokio::test]
async fn assess_risk_mission_completes() {
    let stack = spawn_stack().await;

    let mission_id = submit_mission(
        &stack,
        serde_json::json!({
            "type": "assess_risk",
            "params": {"location": "Sto. Nino"}
        }),
    )
    .await;

    let record = await_terminal(&stack, &mission_id).await;
    assert_eq!(record["state"], "COMPLETED", "reason: {:?}", record["reason"]);

    let partials = &record["partial_results"];
    // Scout step ran against the replay file
    assert!(partials["raw_posts"].as_u64().unwrap() >= 1);
    // Flood step collected simulated telemetry
    assert!(partials["data_points"].as_u64().unwrap() >= 1);
    // Hazard step fused at least the telemetry stations
    assert!(partials["locations_processed"].as_u64().unwrap() >= 1);
    assert!(partials["edges_updated"].is_u64());
    assert!(partials["histogram"].is_object());
}

/// A route mission completes in a single AWAITING_ROUTING step and embeds
/// the plan in the record.
#[tokio::test]
async fn route_mission_embeds_plan() {
    let stack = spawn_stack().await;

    let mission_id = submit_mission(
        &stack,
        serde_json::json!({
            "type": "route_calculation",
            "params": {
                "start": {"lat": 14.6507, "lon": 121.1029},
                "end": {"lat": 14.6545, "lon": 121.1089},
                "mode": "balanced"
            }
        }),
    )
    .await;

    let record = await_terminal(&stack, &mission_id).await;
    assert_eq!(record["state"], "COMPLETED");
    assert_eq!(record["partial_results"]["route"]["status"], "success");
    assert!(
        record["partial_results"]["route"]["totals"]["distance_m"]
            .as_f64()
            .unwrap()
            > 0.0
    );
}

/// An evacuation mission records the chosen shelter.
#[tokio::test]
async fn evacuation_mission_selects_shelter() {
    let stack = spawn_stack().await;

    let mission_id = submit_mission(
        &stack,
        serde_json::json!({
            "type": "coordinated_evacuation",
            "params": {"user_coord": {"lat": 14.6507, "lon": 121.1029}}
        }),
    )
    .await;

    let record = await_terminal(&stack, &mission_id).await;
    assert_eq!(record["state"], "COMPLETED");
    assert_eq!(
        record["partial_results"]["evacuation"]["shelter"]["name"],
        "North Center"
    );
}

/// cascade_risk_update chains flood collection into a fusion pass.
#[tokio::test]
async fn cascade_mission_updates_field() {
    let stack = spawn_stack().await;

    let mission_id = submit_mission(
        &stack,
        serde_json::json!({"type": "cascade_risk_update"}),
    )
    .await;

    let record = await_terminal(&stack, &mission_id).await;
    assert_eq!(record["state"], "COMPLETED", "reason: {:?}", record["reason"]);
    assert!(record["partial_results"]["data_points"].as_u64().unwrap() >= 1);
    assert!(record["partial_results"]["locations_processed"].as_u64().unwrap() >= 1);
    assert!(stack.stats.hazard.lock().unwrap().passes >= 1);
}

/// A route mission outside the service area fails with a structured reason.
#[tokio::test]
async fn out_of_area_route_mission_fails() {
    let stack = spawn_stack().await;

    let mission_id = submit_mission(
        &stack,
        serde_json::json!({
            "type": "route_calculation",
            "params": {
                "start": {"lat": 10.0, "lon": 120.0},
                "end": {"lat": 14.6545, "lon": 121.1089},
                "mode": "safest"
            }
        }),
    )
    .await;

    let record = await_terminal(&stack, &mission_id).await;
    assert_eq!(record["state"], "FAILED");
    assert!(record["reason"]
        .as_str()
        .unwrap()
        .contains("outside the service area"));
}

/// Mission records survive completion in the ring buffer and stay readable.
#[tokio::test]
async fn completed_missions_stay_readable() {
    let stack = spawn_stack().await;

    let mission_id = submit_mission(
        &stack,
        serde_json::json!({
            "type": "route_calculation",
            "params": {
                "start": {"lat": 14.6507, "lon": 121.1029},
                "end": {"lat": 14.6545, "lon": 121.1089},
                "mode": "fastest"
            }
        }),
    )
    .await;

    let first = await_terminal(&stack, &mission_id).await;
    assert_eq!(first["state"], "COMPLETED");

    // Still present on a later read
    tokio::time::sleep(Duration::from_millis(100)).await;
    let record = await_terminal(&stack, &mission_id).await;
    assert_eq!(
        record["state"].as_str().unwrap(),
        MissionState::Completed.to_string()
    );
}
