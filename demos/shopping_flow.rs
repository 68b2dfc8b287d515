//! End-to-end demo: a shopping flow with a login hook, weighted branches,
//! and a reusable Access template.
//!
//! Run with: BASE_URL=http://localhost:3000 cargo run --example shopping_flow

use async_trait::async_trait;
use serde_json::{json, Value};

use loadsmith::access::Access;
use loadsmith::context::{RequestOptions, UserContext};
use loadsmith::registry::ScreenFuture;
use loadsmith::response::Response;

struct ListProducts;

impl Access for ListProducts {
    fn path(&self) -> String {
        "/products".to_string()
    }

    fn metric_name(&self) -> Option<String> {
        Some("/products [list]".to_string())
    }

    fn request_params(&self, _ctx: &UserContext) -> Vec<(String, String)> {
        vec![("limit".to_string(), "10".to_string())]
    }
}

struct CreateOrder;

#[async_trait]
impl Access for CreateOrder {
    fn method(&self) -> reqwest::Method {
        reqwest::Method::POST
    }

    fn path(&self) -> String {
        "/orders".to_string()
    }

    fn request_json(&self, ctx: &UserContext) -> Option<Value> {
        Some(json!({ "product": ctx.store.get("product_id") }))
    }

    async fn after(&self, ctx: &mut UserContext, response: &Response) {
        if let Some(id) = response.get("order_id") {
            ctx.store.insert("order_id".to_string(), id.clone());
        }
    }
}

fn login(ctx: &mut UserContext) -> ScreenFuture<'_> {
    Box::pin(async move {
        let reply = ctx
            .post(
                "/login",
                RequestOptions::json(json!({ "user": "demo", "password": "demo" })),
            )
            .await;
        if let Some(token) = reply.get("token").and_then(|t| t.as_str()) {
            ctx.default_headers
                .insert("Authorization".to_string(), format!("Bearer {}", token));
        }
        Ok(())
    })
}

fn catalog(ctx: &mut UserContext) -> ScreenFuture<'_> {
    Box::pin(async move {
        let listing = ListProducts.perform(ctx).await;
        if let Some(id) = listing
            .json()
            .get("products")
            .and_then(|p| p.get(0))
            .and_then(|p| p.get("id"))
        {
            ctx.store.insert("product_id".to_string(), id.clone());
        }
        Ok(())
    })
}

fn product_page(ctx: &mut UserContext) -> ScreenFuture<'_> {
    Box::pin(async move {
        let id = ctx
            .store
            .get("product_id")
            .and_then(|v| v.as_str())
            .unwrap_or("prod-1")
            .to_string();
        ctx.get(
            &format!("/products/{}", id),
            RequestOptions::named("/products/:id"),
        )
        .await;
        Ok(())
    })
}

fn place_order(ctx: &mut UserContext) -> ScreenFuture<'_> {
    Box::pin(async move {
        CreateOrder.perform(ctx).await;
        Ok(())
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt::init();

    loadsmith::configure(|c| {
        c.base_url =
            std::env::var("BASE_URL").unwrap_or_else(|_| "http://localhost:3000".to_string());
        c.users = 10;
        c.spawn_rate = 2.0;
        c.duration = Some(30.0);
    });

    loadsmith::on_start(login);
    loadsmith::screen("catalog", catalog);
    loadsmith::screen("product_page", product_page);
    loadsmith::screen("place_order", place_order);

    loadsmith::scenario("window_shopping", |b| {
        b.visit("catalog").think((1.0, 4.0)).visit("product_page");
    })?;

    loadsmith::scenario("main", |b| {
        b.visit("catalog").think((0.5, 2.0)).choose(|c| {
            c.percent(75, "window_shopping");
            c.percent_steps(25, |inner| {
                inner.visit("product_page").think(1.0).visit("place_order");
            });
        });
    })?;

    loadsmith::run("main").await?;
    Ok(())
}
