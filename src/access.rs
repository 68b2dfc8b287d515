//! Reusable request templates.
//!
//! An [`Access`] bundles everything about one logical request — method, path,
//! headers, params, body, metric name — together with before/after hooks, so
//! screens can share request definitions without a class hierarchy. It is a
//! capability set with per-method defaults: implementors override only the
//! parts that vary.
//!
//! Each invocation should use a fresh instance; nothing here persists state
//! between calls.
//!
//! # Example
//! ```
//! use loadsmith::access::Access;
//! use loadsmith::context::UserContext;
//! use serde_json::{json, Value};
//!
//! struct CreateOrder;
//!
//! impl Access for CreateOrder {
//!     fn method(&self) -> reqwest::Method {
//!         reqwest::Method::POST
//!     }
//!
//!     fn path(&self) -> String {
//!         "/api/orders".to_string()
//!     }
//!
//!     fn metric_name(&self) -> Option<String> {
//!         Some("/api/orders [create]".to_string())
//!     }
//!
//!     fn request_json(&self, ctx: &UserContext) -> Option<Value> {
//!         Some(json!({ "cart": ctx.store.get("cart_id") }))
//!     }
//! }
//! ```

use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::Method;
use serde_json::Value;

use crate::context::{RequestOptions, UserContext};
use crate::response::Response;

#[async_trait]
pub trait Access: Send + Sync {
    /// HTTP method; GET unless overridden.
    fn method(&self) -> Method {
        Method::GET
    }

    /// Static request path. Override [`Access::build_path`] instead when the
    /// path depends on context state.
    fn path(&self) -> String;

    /// Name recorded in metrics instead of the raw path.
    fn metric_name(&self) -> Option<String> {
        None
    }

    /// Headers this template always sends.
    fn default_headers(&self) -> HashMap<String, String> {
        HashMap::new()
    }

    /// Runs before the request is composed.
    async fn before(&self, _ctx: &mut UserContext) {}

    /// Runs after the response arrives, successful or not.
    async fn after(&self, _ctx: &mut UserContext, _response: &Response) {}

    /// Final request path, possibly derived from the context.
    fn build_path(&self, _ctx: &UserContext) -> String {
        self.path()
    }

    fn request_headers(&self, _ctx: &UserContext) -> HashMap<String, String> {
        self.default_headers()
    }

    fn request_params(&self, _ctx: &UserContext) -> Vec<(String, String)> {
        Vec::new()
    }

    fn request_json(&self, _ctx: &UserContext) -> Option<Value> {
        None
    }

    fn request_body(&self, _ctx: &UserContext) -> Option<String> {
        None
    }

    /// Drive the full cycle: before hook, compose, dispatch, after hook.
    async fn perform(&self, ctx: &mut UserContext) -> Response {
        self.before(ctx).await;

        let path = self.build_path(ctx);
        let opts = RequestOptions {
            params: self.request_params(ctx),
            headers: self.request_headers(ctx),
            body: self.request_body(ctx),
            json: self.request_json(ctx),
            name: self.metric_name(),
        };

        let response = ctx.request(self.method(), &path, opts).await;
        self.after(ctx, &response).await;
        response
    }
}
