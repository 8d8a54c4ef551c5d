//! Query API
//!
//! `GET /meta` hands back the keeper's current serialized cluster view
//! verbatim: always 200, always `application/json`, even when the view is
//! still the empty placeholder. `GET /health` is a bare liveness probe.

use crate::keeper::ViewKeeper;
use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;

#[derive(Clone)]
pub struct AppState {
    pub keeper: ViewKeeper,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/meta", get(get_meta))
        .with_state(state)
}

// GET /meta (current cluster view)
async fn get_meta(State(app): State<AppState>) -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "application/json")], app.keeper.snapshot())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    async fn body_of(resp: axum::response::Response) -> Vec<u8> {
        axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap().to_vec()
    }

    #[tokio::test]
    async fn meta_returns_placeholder_view_before_any_event() {
        let app = AppState { keeper: ViewKeeper::new() };
        let resp = get_meta(State(app)).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers().get(header::CONTENT_TYPE).unwrap(), "application/json");
        assert_eq!(body_of(resp).await, br#"{"meta":{},"hosts":[]}"#.to_vec());
    }

    #[tokio::test]
    async fn meta_returns_published_view_verbatim() {
        let keeper = ViewKeeper::new();
        let view = br#"{"meta":{"updated_at":"2016-01-01T00:00:00Z"},"hosts":[{"hostname":"node1"}]}"#;
        keeper.publish(view.to_vec());

        let resp = get_meta(State(AppState { keeper })).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_of(resp).await, view.to_vec());
    }
}
