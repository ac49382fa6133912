use anyhow::{Context, Result};
use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, Method, Request, Response, StatusCode};
use axum::middleware::Next;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::info;

use super::models::{ErrorResponse, ScanResponse, SourceRequest, SourceResponse};
use super::state::ServerState;
use crate::engine::{Engine, EngineSnapshot};
use crate::image_source::ImageSource;
use crate::providers::Provider;
use crate::settings::EngineSettings;
use crate::viewport::ScrollEvent;

type ApiError = (StatusCode, Json<ErrorResponse>);

pub async fn run_server<P: Provider>(engine: Engine<P>, addr: String) -> Result<()> {
    let state = Arc::new(ServerState::start(engine));
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| "failed to bind server address")?;
    info!("listening on {}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

pub fn router<P: Provider>(state: Arc<ServerState<P>>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/state", get(engine_state::<P>))
        .route("/settings", get(settings_info::<P>).put(update_settings::<P>))
        .route("/source", post(load_source::<P>))
        .route("/scroll", post(scroll::<P>))
        .route("/scan", post(scan::<P>))
        .route("/notice/dismiss", post(dismiss_notice::<P>))
        .with_state(state)
        .layer(axum::middleware::from_fn(cors_middleware))
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

async fn cors_middleware(req: Request<Body>, next: Next) -> Result<Response<Body>, StatusCode> {
    if req.method() == Method::OPTIONS {
        let mut response = Response::new(Body::empty());
        *response.status_mut() = StatusCode::NO_CONTENT;
        apply_cors_headers(response.headers_mut());
        return Ok(response);
    }
    let mut response = next.run(req).await;
    apply_cors_headers(response.headers_mut());
    Ok(response)
}

fn apply_cors_headers(headers: &mut HeaderMap) {
    headers.insert("access-control-allow-origin", HeaderValue::from_static("*"));
    headers.insert(
        "access-control-allow-methods",
        HeaderValue::from_static("GET,POST,PUT,OPTIONS"),
    );
    headers.insert(
        "access-control-allow-headers",
        HeaderValue::from_static("content-type"),
    );
}

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

fn validate_event(event: &ScrollEvent) -> Result<(), ApiError> {
    if !event.offset.is_finite()
        || !event.viewport_height.is_finite()
        || event.viewport_height <= 0.0
    {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "offset must be finite and viewport_height positive",
        ));
    }
    Ok(())
}

async fn engine_state<P: Provider>(
    State(state): State<Arc<ServerState<P>>>,
) -> Json<EngineSnapshot> {
    Json(state.engine.snapshot(Instant::now()))
}

async fn settings_info<P: Provider>(
    State(state): State<Arc<ServerState<P>>>,
) -> Json<EngineSettings> {
    Json(state.engine.settings())
}

async fn update_settings<P: Provider>(
    State(state): State<Arc<ServerState<P>>>,
    Json(settings): Json<EngineSettings>,
) -> Result<Json<EngineSettings>, ApiError> {
    state
        .engine
        .update_settings(settings)
        .map_err(|err| api_error(StatusCode::BAD_REQUEST, err.to_string()))?;
    Ok(Json(state.engine.settings()))
}

async fn load_source<P: Provider>(
    State(state): State<Arc<ServerState<P>>>,
    Json(payload): Json<SourceRequest>,
) -> Result<Json<SourceResponse>, ApiError> {
    let source = ImageSource::parse(payload.image.as_deref().unwrap_or_default())
        .map_err(|err| api_error(StatusCode::BAD_REQUEST, format!("{:#}", err)))?;
    let kind = source.kind();
    let scan = state.engine.load_source(source, payload.viewport_height);
    Ok(Json(SourceResponse { source: kind, scan }))
}

async fn scroll<P: Provider>(
    State(state): State<Arc<ServerState<P>>>,
    Json(event): Json<ScrollEvent>,
) -> Result<StatusCode, ApiError> {
    validate_event(&event)?;
    state
        .scroll
        .send(event)
        .await
        .map_err(|_| api_error(StatusCode::SERVICE_UNAVAILABLE, "scroll loop is not running"))?;
    Ok(StatusCode::ACCEPTED)
}

async fn scan<P: Provider>(
    State(state): State<Arc<ServerState<P>>>,
    Json(event): Json<ScrollEvent>,
) -> Result<Json<ScanResponse>, ApiError> {
    validate_event(&event)?;
    Ok(Json(ScanResponse {
        scan: state.engine.scan_now(event),
    }))
}

async fn dismiss_notice<P: Provider>(State(state): State<Arc<ServerState<P>>>) -> StatusCode {
    state.engine.dismiss_notice();
    StatusCode::NO_CONTENT
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Dispatch;
    use crate::image_source::test_images::TINY_PNG_BASE64;
    use crate::settings::Settings;
    use crate::test_util::StubProvider;
    use crate::translator::Translator;

    fn server_state(provider: StubProvider) -> Arc<ServerState<StubProvider>> {
        let settings = Settings::default();
        let translator = Translator::new(provider, settings.scan.timeout);
        Arc::new(ServerState::start(Engine::new(translator, settings)))
    }

    fn data_url() -> String {
        format!("data:image/png;base64,{}", TINY_PNG_BASE64)
    }

    #[tokio::test]
    async fn uploading_a_page_scans_and_exposes_regions() {
        let provider = StubProvider::replying(
            r#"{"bubbles": [{"box_2d":[100,100,200,900],"translated_text":"Hello"}]}"#,
        );
        let state = server_state(provider.clone());
        let Json(response) = load_source(
            State(state.clone()),
            Json(SourceRequest {
                image: Some(data_url()),
                viewport_height: Some(800.0),
            }),
        )
        .await
        .expect("source accepted");
        assert_eq!(response.source, "inline");
        assert!(matches!(response.scan, Some(Dispatch::Started(_))));

        state.engine.wait_idle().await;
        let Json(snapshot) = engine_state(State(state)).await;
        let value = serde_json::to_value(&snapshot).expect("serialize");
        assert_eq!(value["processing"], false);
        assert_eq!(value["regions"][0]["translated_text"], "Hello");
        assert_eq!(value["regions"][0]["absolute_y"], 80.0);
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn remote_frame_is_accepted_without_scanning() {
        let provider = StubProvider::replying(r#"{"bubbles": []}"#);
        let state = server_state(provider.clone());
        let Json(response) = load_source(
            State(state.clone()),
            Json(SourceRequest {
                image: Some("https://example.com/chapter/1".to_string()),
                viewport_height: None,
            }),
        )
        .await
        .expect("source accepted");
        assert_eq!(response.source, "remote_frame");
        assert!(response.scan.is_none());

        let Json(response) = scan(State(state), Json(ScrollEvent::new(0.0, 800.0)))
            .await
            .expect("scan response");
        assert_eq!(response.scan, Dispatch::NoImage);
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn failure_notice_can_be_dismissed() {
        let state = server_state(StubProvider::failing("503 overloaded"));
        load_source(
            State(state.clone()),
            Json(SourceRequest {
                image: Some(data_url()),
                viewport_height: None,
            }),
        )
        .await
        .expect("source accepted");
        state.engine.wait_idle().await;

        let Json(snapshot) = engine_state(State(state.clone())).await;
        assert!(
            snapshot
                .notice
                .as_deref()
                .is_some_and(|notice| notice.contains("503 overloaded"))
        );

        let status = dismiss_notice(State(state.clone())).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let Json(snapshot) = engine_state(State(state)).await;
        assert!(snapshot.notice.is_none());
    }

    #[tokio::test]
    async fn unsupported_source_is_rejected() {
        let state = server_state(StubProvider::replying(r#"{"bubbles": []}"#));
        let (status, Json(body)) = load_source(
            State(state),
            Json(SourceRequest {
                image: Some("ftp://example.com/page.png".to_string()),
                viewport_height: None,
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(!body.error.is_empty());
    }

    #[tokio::test]
    async fn invalid_settings_are_rejected() {
        let state = server_state(StubProvider::replying(r#"{"bubbles": []}"#));
        let Json(mut settings) = settings_info(State(state.clone())).await;
        settings.opacity = 3.0;
        let (status, _) = update_settings(State(state.clone()), Json(settings))
            .await
            .unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let Json(mut settings) = settings_info(State(state.clone())).await;
        settings.target_language = "English".to_string();
        let Json(updated) = update_settings(State(state), Json(settings))
            .await
            .expect("valid settings");
        assert_eq!(updated.target_language, "English");
    }

    #[tokio::test]
    async fn scroll_rejects_non_finite_offsets() {
        let state = server_state(StubProvider::replying(r#"{"bubbles": []}"#));
        let (status, _) = scroll(
            State(state.clone()),
            Json(ScrollEvent::new(f64::NAN, 800.0)),
        )
        .await
        .unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let accepted = scroll(State(state), Json(ScrollEvent::new(120.0, 800.0)))
            .await
            .expect("accepted");
        assert_eq!(accepted, StatusCode::ACCEPTED);
    }
}
