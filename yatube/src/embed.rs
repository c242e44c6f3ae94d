use axum::{
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use rust_embed::RustEmbed;

#[derive(RustEmbed)]
#[folder = "static"]
struct Pages;

/// Static informational pages, compiled into the binary.
pub fn about_router() -> Router {
    Router::new()
        .route("/about/author/", get(author))
        .route("/about/tech/", get(tech))
}

async fn author() -> Response {
    serve_page("about/author.html")
}

async fn tech() -> Response {
    serve_page("about/tech.html")
}

fn serve_page(path: &str) -> Response {
    let Some(content) = Pages::get(path) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let mime = mime_guess::from_path(path).first_or_octet_stream();
    let content_type = if mime.type_() == mime_guess::mime::TEXT && mime.get_param("charset").is_none() {
        format!("{}; charset=utf-8", mime.essence_str())
    } else {
        mime.to_string()
    };
    let mut headers = HeaderMap::new();
    if let Ok(value) = HeaderValue::from_str(&content_type) {
        headers.insert(header::CONTENT_TYPE, value);
    }
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    (headers, content.data.into_owned()).into_response()
}
