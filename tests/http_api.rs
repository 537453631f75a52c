mod common;

use std::sync::Arc;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
};
use common::Fixture;
use group_service::{
    AppState, config::Config, middleware::auth_middleware, routes, utils::generate_token,
};
use serde_json::{Value, json};
use tower::ServiceExt;

fn test_config() -> Config {
    Config {
        database_url: String::new(),
        redis_url: String::new(),
        jwt_secret: "test-secret".into(),
        jwt_expiration_secs: 3600,
        server_host: "127.0.0.1".into(),
        server_port: 0,
        api_base_uri: "/api".into(),
        app_admin_user_ids: vec!["admin".into()],
        user_service_url: String::new(),
        msg_service_url: String::new(),
        callback_url: None,
        callback_timeout_secs: 1,
        request_timeout_secs: 1,
        sync_limit: 1000,
        batch_sync_ceiling: 500,
        version_log_retention: 5000,
        notification_queue_capacity: 16,
        notification_workers: 1,
        cache_expire_secs: 60,
    }
}

fn app() -> (Router, Config) {
    let config = test_config();
    let state = AppState {
        config: config.clone(),
        groups: Arc::new(Fixture::new().service),
    };
    let router = Router::new()
        .nest("/group", routes::group::router())
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
        .with_state(state);
    (router, config)
}

fn post(uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

async fn read_json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn missing_token_is_rejected() {
    let (app, _) = app();
    let response = app
        .oneshot(post("/group/get_joined_group_list", None, json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(read_json(response).await["code"], 1002);
}

#[tokio::test]
async fn create_then_domain_error_uses_envelope() {
    let (app, config) = app();
    let (token, _) = generate_token("A", &config).unwrap();

    let response = app
        .clone()
        .oneshot(post(
            "/group/create_group",
            Some(&token),
            json!({
                "owner_user_id": "A",
                "member_user_ids": ["B"],
                "group_info": { "name": "http group" }
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body["code"], 0);
    let group_id = body["resp_data"]["group_info"]["group_id"]
        .as_str()
        .unwrap()
        .to_string();
    assert_eq!(body["resp_data"]["group_info"]["member_count"], 2);

    let response = app
        .oneshot(post(
            "/group/kick_group",
            Some(&token),
            json!({ "group_id": group_id, "kicked_user_ids": ["A"] }),
        ))
        .await
        .unwrap();
    // 业务错误仍然是 200，错误码在响应体中
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(read_json(response).await["code"], 1000);
}
