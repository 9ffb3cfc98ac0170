//! Minimal guestbook origin.
//!
//! Serves the page shell at `/` (manifest link plus the registration
//! snippet) and the asset directory under `/static`, which is all the
//! worker needs to pre-cache and serve offline.

use std::path::PathBuf;

use axum::{response::Html, routing::get, Router};
use tokio::net::TcpListener;
use tower_http::services::ServeDir;
use tracing::info;

const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html lang="zh-CN">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>Guestbook</title>
<link rel="manifest" href="/static/manifest.json">
<script>
if ('serviceWorker' in navigator) {
    navigator.serviceWorker.register('/static/service-worker.js')
        .then(function (registration) {
            console.log('Service Worker registered with scope:', registration.scope);
        })
        .catch(function (error) {
            console.log('Service Worker registration failed:', error);
        });
}
</script>
</head>
<body>
<h1>Guestbook</h1>
</body>
</html>
"#;

/// Build the origin router over a static asset directory.
pub fn router(static_dir: impl Into<PathBuf>) -> Router {
    Router::new()
        .route("/", get(index))
        .nest_service("/static", ServeDir::new(static_dir.into()))
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

/// Serve the origin on an already bound listener until the task is dropped.
pub async fn serve(listener: TcpListener, static_dir: PathBuf) -> std::io::Result<()> {
    let addr = listener.local_addr()?;
    info!(%addr, static_dir = %static_dir.display(), "Serving guestbook origin");
    axum::serve(listener, router(static_dir)).await
}
