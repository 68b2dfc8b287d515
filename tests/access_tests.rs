//! Integration tests for reusable Access request templates.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use loadsmith::access::Access;
use loadsmith::config::Config;
use loadsmith::context::UserContext;
use loadsmith::response::Response;

fn ctx_for(base_url: &str) -> UserContext {
    let config = Config {
        base_url: base_url.to_string(),
        ..Config::default()
    };
    UserContext::new(1, Arc::new(config))
}

struct SearchItems;

impl Access for SearchItems {
    fn path(&self) -> String {
        "/items".to_string()
    }

    fn metric_name(&self) -> Option<String> {
        Some("/items [search]".to_string())
    }

    fn default_headers(&self) -> std::collections::HashMap<String, String> {
        [("X-Template".to_string(), "search".to_string())]
            .into_iter()
            .collect()
    }

    fn request_params(&self, ctx: &UserContext) -> Vec<(String, String)> {
        let term = ctx
            .store
            .get("term")
            .and_then(|v| v.as_str())
            .unwrap_or("default")
            .to_string();
        vec![("q".to_string(), term)]
    }
}

struct CreateSession;

#[async_trait]
impl Access for CreateSession {
    fn method(&self) -> reqwest::Method {
        reqwest::Method::POST
    }

    fn path(&self) -> String {
        "/sessions".to_string()
    }

    fn request_json(&self, _ctx: &UserContext) -> Option<Value> {
        Some(json!({ "user": "demo" }))
    }

    async fn before(&self, ctx: &mut UserContext) {
        ctx.store.insert("before_ran".to_string(), json!(true));
    }

    async fn after(&self, ctx: &mut UserContext, response: &Response) {
        if let Some(token) = response.get("token") {
            ctx.store.insert("token".to_string(), token.clone());
        }
    }
}

#[tokio::test]
async fn test_access_composes_params_headers_and_metric_name() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/items"))
        .and(query_param("q", "boots"))
        .and(header("X-Template", "search"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let mut ctx = ctx_for(&server.uri());
    ctx.store.insert("term".to_string(), json!("boots"));

    let response = SearchItems.perform(&mut ctx).await;

    assert_eq!(response.status(), Some(200));
    assert_eq!(ctx.metrics().len(), 1);
    assert_eq!(ctx.metrics()[0].path, "/items [search]");
}

#[tokio::test]
async fn test_access_hooks_run_around_the_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sessions"))
        .and(body_json(json!({ "user": "demo" })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "token": "tok-1" })))
        .mount(&server)
        .await;

    let mut ctx = ctx_for(&server.uri());
    let response = CreateSession.perform(&mut ctx).await;

    assert_eq!(response.status(), Some(201));
    assert_eq!(ctx.store.get("before_ran"), Some(&json!(true)));
    assert_eq!(ctx.store.get("token"), Some(&json!("tok-1")));
}

#[tokio::test]
async fn test_access_after_hook_sees_transport_failures() {
    struct Probe;

    #[async_trait]
    impl Access for Probe {
        fn path(&self) -> String {
            "/probe".to_string()
        }

        async fn after(&self, ctx: &mut UserContext, response: &Response) {
            ctx.store
                .insert("saw_error".to_string(), json!(response.error().is_some()));
        }
    }

    let mut ctx = ctx_for("http://127.0.0.1:9");
    let response = Probe.perform(&mut ctx).await;

    assert!(response.error().is_some());
    assert_eq!(ctx.store.get("saw_error"), Some(&json!(true)));
}
