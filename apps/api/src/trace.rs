use axum::http::Request;
use tower_http::trace::{DefaultOnResponse, HttpMakeClassifier, MakeSpan, TraceLayer};
use tracing::{Level, Span};

/// Request span carrying the path only. The query string stays out of the
/// logs because `/queue/live` takes the access token there.
#[derive(Debug, Clone, Copy, Default)]
pub struct PathOnlySpan;

impl<B> MakeSpan<B> for PathOnlySpan {
    fn make_span(&mut self, request: &Request<B>) -> Span {
        tracing::info_span!(
            "request",
            method = %request.method(),
            path = %request.uri().path(),
            version = ?request.version(),
        )
    }
}

pub fn http_trace_layer() -> TraceLayer<HttpMakeClassifier, PathOnlySpan> {
    TraceLayer::new_for_http()
        .make_span_with(PathOnlySpan)
        .on_response(DefaultOnResponse::new().level(Level::INFO))
}
