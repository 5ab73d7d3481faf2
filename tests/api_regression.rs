//! HTTP surface regression: envelope shapes, validation, and the
//! representative endpoints, driven through `tower::ServiceExt::oneshot`.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use tower::ServiceExt;

use agos::api::create_app;

use common::*;

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn health_reports_graph_and_agents() {
    let stack = spawn_stack().await;
    let app = create_app(stack.api.clone());

    let response = app.oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let v = body_json(response).await;
    assert_eq!(v["data"]["status"], "ok");
    assert_eq!(
        v["data"]["graph"]["edges"].as_u64().unwrap(),
        stack.graph.edge_count() as u64
    );
    assert!(v["data"]["agents"]["hazard"].is_object());
}

#[tokio::test]
async fn route_clear_weather_success() {
    let stack = spawn_stack().await;
    let app = create_app(stack.api.clone());

    let response = app
        .oneshot(post_json(
            "/route",
            serde_json::json!({
                "start": [14.6507, 121.1029],
                "end": [14.6545, 121.1089],
                "preferences": {}
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let v = body_json(response).await;
    assert_eq!(v["data"]["status"], "success");
    assert_eq!(v["data"]["mode"], "balanced");
    assert!(v["data"]["totals"]["distance_m"].as_f64().unwrap() > 0.0);
    assert_eq!(v["data"]["totals"]["max_risk"], 0.0);
    assert_eq!(v["data"]["warnings"].as_array().unwrap().len(), 0);
    assert!(v["data"]["route_id"].is_string());
}

#[tokio::test]
async fn route_preferences_map_to_presets() {
    let stack = spawn_stack().await;

    for (prefs, expected) in [
        (serde_json::json!({"avoid_floods": true}), "safest"),
        (serde_json::json!({"fastest": true}), "fastest"),
        (serde_json::json!({}), "balanced"),
    ] {
        let app = create_app(stack.api.clone());
        let response = app
            .oneshot(post_json(
                "/route",
                serde_json::json!({
                    "start": [14.6507, 121.1029],
                    "end": [14.6545, 121.1089],
                    "preferences": prefs
                }),
            ))
            .await
            .unwrap();
        let v = body_json(response).await;
        assert_eq!(v["data"]["mode"], expected);
    }
}

#[tokio::test]
async fn route_outside_service_area_is_400() {
    let stack = spawn_stack().await;
    let app = create_app(stack.api.clone());

    let response = app
        .oneshot(post_json(
            "/route",
            serde_json::json!({
                "start": [13.0, 121.0],
                "end": [14.6545, 121.1089]
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let v = body_json(response).await;
    assert_eq!(v["error"]["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn evacuation_center_returns_shelter() {
    let stack = spawn_stack().await;
    let app = create_app(stack.api.clone());

    let response = app
        .oneshot(post_json(
            "/evacuation-center",
            serde_json::json!({"location": [14.6507, 121.1029]}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let v = body_json(response).await;
    assert_eq!(v["data"]["status"], "success");
    assert_eq!(v["data"]["shelter"]["name"], "North Center");
    assert_eq!(v["data"]["route"]["status"], "success");
}

#[tokio::test]
async fn evacuation_outside_area_is_400() {
    let stack = spawn_stack().await;
    let app = create_app(stack.api.clone());

    let response = app
        .oneshot(post_json(
            "/evacuation-center",
            serde_json::json!({"location": [10.0, 120.0]}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn feedback_validates_type_and_severity() {
    let stack = spawn_stack().await;

    let app = create_app(stack.api.clone());
    let bad_type = app
        .oneshot(post_json(
            "/feedback",
            serde_json::json!({
                "route_id": "r-1",
                "feedback_type": "sunny",
                "location": [14.6507, 121.1029],
                "severity": 0.5
            }),
        ))
        .await
        .unwrap();
    assert_eq!(bad_type.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let app = create_app(stack.api.clone());
    let bad_severity = app
        .oneshot(post_json(
            "/feedback",
            serde_json::json!({
                "route_id": "r-1",
                "feedback_type": "flooded",
                "location": [14.6507, 121.1029],
                "severity": 3.0
            }),
        ))
        .await
        .unwrap();
    assert_eq!(bad_severity.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let app = create_app(stack.api.clone());
    let ok = app
        .oneshot(post_json(
            "/feedback",
            serde_json::json!({
                "route_id": "r-1",
                "feedback_type": "flooded",
                "location": [14.6507, 121.1029],
                "severity": 0.8,
                "description": "tubig hanggang tuhod"
            }),
        ))
        .await
        .unwrap();
    assert_eq!(ok.status(), StatusCode::OK);
}

#[tokio::test]
async fn geotiff_scenario_admin_flow() {
    let stack = spawn_stack().await;

    // Invalid scenario rejected up front
    let app = create_app(stack.api.clone());
    let bad = app
        .oneshot(post_json(
            "/admin/geotiff/set-scenario",
            serde_json::json!({"rp": "rr09", "ts": 5}),
        ))
        .await
        .unwrap();
    assert_eq!(bad.status(), StatusCode::BAD_REQUEST);

    let app = create_app(stack.api.clone());
    let bad_ts = app
        .oneshot(post_json(
            "/admin/geotiff/set-scenario",
            serde_json::json!({"rp": "rr04", "ts": 19}),
        ))
        .await
        .unwrap();
    assert_eq!(bad_ts.status(), StatusCode::BAD_REQUEST);

    // Valid change lands in the scenario handle via the hazard agent
    let app = create_app(stack.api.clone());
    let ok = app
        .oneshot(post_json(
            "/admin/geotiff/set-scenario",
            serde_json::json!({"rp": "rr04", "ts": 18}),
        ))
        .await
        .unwrap();
    assert_eq!(ok.status(), StatusCode::OK);
    let v = body_json(ok).await;
    assert_eq!(v["data"]["return_period"], "rr04");
    assert_eq!(v["data"]["time_step"], 18);

    // Enable flag
    let app = create_app(stack.api.clone());
    let enabled = app
        .oneshot(post_json("/admin/geotiff/enable", serde_json::json!({})))
        .await
        .unwrap();
    let v = body_json(enabled).await;
    assert_eq!(v["data"]["geotiff_enabled"], true);

    // Status reflects the handle once the agent has applied the change
    tokio::time::sleep(std::time::Duration::from_millis(300)).await;
    let app = create_app(stack.api.clone());
    let status = app.oneshot(get("/admin/geotiff/status")).await.unwrap();
    let v = body_json(status).await;
    assert_eq!(v["data"]["return_period"], "rr04");
    assert_eq!(v["data"]["geotiff_enabled"], true);
}

#[tokio::test]
async fn unknown_mission_is_404() {
    let stack = spawn_stack().await;
    let app = create_app(stack.api.clone());

    let response = app
        .oneshot(get("/orchestrator/mission/nope1234"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn mission_submission_returns_id() {
    let stack = spawn_stack().await;
    let app = create_app(stack.api.clone());

    let response = app
        .oneshot(post_json(
            "/orchestrator/mission",
            serde_json::json!({
                "type": "route_calculation",
                "params": {
                    "start": {"lat": 14.6507, "lon": 121.1029},
                    "end": {"lat": 14.6545, "lon": 121.1089},
                    "mode": "balanced"
                }
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let v = body_json(response).await;
    assert_eq!(v["data"]["mission_id"].as_str().unwrap().len(), 8);
}

#[tokio::test]
async fn admin_stats_exposes_counters() {
    let stack = spawn_stack().await;
    let app = create_app(stack.api.clone());

    let response = app.oneshot(get("/admin/stats")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let v = body_json(response).await;
    assert!(v["data"]["hazard"].is_object());
    assert!(v["data"]["flood_collector"].is_object());
    assert!(v["data"]["scheduler"].is_object());
}
