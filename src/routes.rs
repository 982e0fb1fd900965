use axum::{
    http::{header, Method},
    routing::post,
    Router,
};
use tower_http::{
    cors::{AllowHeaders, AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

use crate::handlers;
use crate::state::AppState;

/// Translation endpoints, mounted at the root and again under `api_prefix`.
pub fn create_routes(api_prefix: &str) -> Router<AppState> {
    Router::new()
        .merge(translate_routes())
        .nest(api_prefix, translate_routes())
}

fn translate_routes() -> Router<AppState> {
    Router::new()
        .route("/translate", post(handlers::translate))
        .route("/translate/", post(handlers::translate))
}

/// Any origin may call the API with credentials. Credentialed requests cannot
/// use `*`, so origin and request headers are echoed back.
pub fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_methods([Method::POST])
        .allow_credentials(true)
        .expose_headers([header::CONTENT_TYPE])
}

pub fn app(state: AppState, api_prefix: &str) -> Router {
    create_routes(api_prefix)
        .layer(cors_layer())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
