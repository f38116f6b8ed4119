//! Embedded single-page playground served at `/`.

use axum::response::Html;

pub async fn serve_frontend() -> Html<&'static str> {
    Html(include_str!("../assets/index.html"))
}
