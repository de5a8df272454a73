//! HTTP surface: every `GET` goes through the render pipeline.

use crate::config::extension_of;
use crate::render::{PageRequest, Rendered, Site};
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use axum::Router;
use std::future::Future;
use std::io;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceExt;
use tower_http::services::ServeFile;
use tower_http::trace::TraceLayer;
use tracing::error;

/// Router that renders every path through `site`
pub fn router(site: Arc<Site>) -> Router {
    Router::new()
        .fallback(handle)
        .with_state(site)
        .layer(TraceLayer::new_for_http())
}

/// Serve `site` on an already-bound listener until `shutdown` resolves
pub async fn serve<F>(listener: TcpListener, site: Arc<Site>, shutdown: F) -> io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, router(site))
        .with_graceful_shutdown(shutdown)
        .await
}

async fn handle(State(site): State<Arc<Site>>, request: Request) -> Response {
    let path = match percent_encoding::percent_decode_str(request.uri().path()).decode_utf8() {
        Ok(path) => path.into_owned(),
        Err(_) => return (StatusCode::BAD_REQUEST, "path is not valid UTF-8").into_response(),
    };
    let page_request = PageRequest {
        method: request.method().to_string(),
        path,
        query: request.uri().query().map(str::to_string),
    };

    let renderer = Arc::clone(&site);
    let rendered = tokio::task::spawn_blocking(move || {
        let result = renderer.render(&page_request);
        (page_request, result)
    })
    .await;

    match rendered {
        Ok((_, Ok(Rendered::Page { name, body }))) => {
            ([(header::CONTENT_TYPE, content_type_for(&name))], body).into_response()
        }
        // The rendered location uses the decoded path; the header needs the raw one.
        Ok((_, Ok(Rendered::Redirect(_)))) => {
            let mut location = format!("{}/", request.uri().path());
            if let Some(query) = request.uri().query() {
                location.push('?');
                location.push_str(query);
            }
            Redirect::permanent(&location).into_response()
        }
        Ok((_, Ok(Rendered::Static(file)))) => match ServeFile::new(file).oneshot(request).await {
            Ok(response) => response.map(Body::new).into_response(),
            Err(never) => match never {},
        },
        Ok((page_request, Err(e))) => {
            error!("{} {}: {}", page_request.method, page_request.path, e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
        Err(e) => {
            error!("Render task failed: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

/// Content type for rendered template output, by the requested file name
fn content_type_for(name: &str) -> &'static str {
    match extension_of(name) {
        Some(".xml") => "application/xml; charset=utf-8",
        Some(".json") => "application/json",
        Some(".txt") => "text/plain; charset=utf-8",
        Some(".css") => "text/css; charset=utf-8",
        Some(".js") => "text/javascript; charset=utf-8",
        _ => "text/html; charset=utf-8",
    }
}
