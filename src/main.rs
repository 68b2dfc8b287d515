//! Reference embedder for the loadsmith core.
//!
//! Reads configuration from environment variables, registers a small demo
//! specification against `BASE_URL`, and runs either in terminal mode
//! (`loadsmith [scenario]`) or dashboard mode (`loadsmith --web`).

use std::env;
use std::process::ExitCode;

use serde_json::json;
use tracing::error;
use tracing_subscriber::EnvFilter;

use loadsmith::config::Config;
use loadsmith::context::{RequestOptions, UserContext};
use loadsmith::registry::ScreenFuture;
use loadsmith::web;

fn home(ctx: &mut UserContext) -> ScreenFuture<'_> {
    Box::pin(async move {
        ctx.get("/", RequestOptions::default()).await;
        Ok(())
    })
}

fn browse(ctx: &mut UserContext) -> ScreenFuture<'_> {
    Box::pin(async move {
        let listing = ctx.get("/api/items", RequestOptions::default()).await;
        if let Some(first) = listing.json().get("items").and_then(|v| v.get(0)) {
            ctx.store.insert("item".to_string(), first.clone());
        }
        Ok(())
    })
}

fn checkout(ctx: &mut UserContext) -> ScreenFuture<'_> {
    Box::pin(async move {
        let item = ctx.store.get("item").cloned().unwrap_or(json!(null));
        ctx.post("/api/orders", RequestOptions::json(json!({ "item": item })))
            .await;
        Ok(())
    })
}

fn register_demo_spec() -> Result<(), loadsmith::scenario::BuildError> {
    loadsmith::screen("home", home);
    loadsmith::screen("browse", browse);
    loadsmith::screen("checkout", checkout);

    loadsmith::scenario("browse_flow", |b| {
        b.visit("browse").think((0.5, 2.0));
    })?;

    loadsmith::scenario("main", |b| {
        b.visit("home").think((0.5, 1.5)).choose(|c| {
            c.percent(80, "browse_flow");
            c.percent_steps(20, |inner| {
                inner.visit("browse").visit("checkout");
            });
        });
    })?;

    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Invalid configuration");
            eprintln!("Invalid configuration: {}", e);
            return ExitCode::from(2);
        }
    };
    loadsmith::configure(|c| *c = config);

    if let Err(e) = register_demo_spec() {
        eprintln!("Invalid scenario definition: {}", e);
        return ExitCode::from(2);
    }

    let args: Vec<String> = env::args().skip(1).collect();
    let web_mode = args.iter().any(|a| a == "--web");

    if web_mode {
        let port = env::var("LOADSMITH_WEB_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(web::DEFAULT_PORT);
        if let Err(e) = loadsmith::serve_dashboard(port).await {
            eprintln!("Dashboard failed: {}", e);
            return ExitCode::from(1);
        }
        return ExitCode::SUCCESS;
    }

    let scenario = args
        .iter()
        .find(|a| !a.starts_with("--"))
        .cloned()
        .unwrap_or_else(|| "main".to_string());

    match loadsmith::run(&scenario).await {
        Ok(_report) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Run failed validation: {}", e);
            ExitCode::from(2)
        }
    }
}
