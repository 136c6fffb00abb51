//! Browser UI server.
//!
//! Serves a single static page, compiled into the binary, that talks to the
//! API server from the browser. The API base URL is injected into the page
//! at startup. Conversation history and session counters live only in the
//! page.

use axum::{
    http::header,
    response::{Html, IntoResponse},
    routing::get,
    Router,
};
use std::sync::Arc;

use crate::config::Config;

const INDEX_HTML: &str = include_str!("../ui/index.html");
const API_URL_SLOT: &str = "__API_URL__";

/// The page with `api_url` substituted as a JavaScript string literal.
pub fn render_page(api_url: &str) -> String {
    let literal = serde_json::to_string(api_url.trim_end_matches('/'))
        .unwrap_or_else(|_| "\"\"".to_string());
    INDEX_HTML.replace(API_URL_SLOT, &literal)
}

pub fn build_ui_router(api_url: &str) -> Router {
    let page: Arc<str> = Arc::from(render_page(api_url));
    Router::new()
        .route(
            "/",
            get(move || {
                let page = page.clone();
                async move { Html(page.to_string()) }
            }),
        )
        .route(
            "/healthz",
            get(|| async { ([(header::CONTENT_TYPE, "text/plain")], "ok").into_response() }),
        )
}

/// Serve the UI on `[ui].bind` until shutdown.
pub async fn run_ui(config: &Config) -> anyhow::Result<()> {
    let app = build_ui_router(&config.ui.api_url);
    let listener = tokio::net::TcpListener::bind(&config.ui.bind).await?;
    tracing::info!(bind = %config.ui.bind, api_url = %config.ui.api_url, "UI server listening");
    println!("UI available at http://{}", config.ui.bind);
    axum::serve(listener, app).await?;
    Ok(())
}
