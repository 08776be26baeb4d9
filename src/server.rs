//! ==============================================================================
//! server.rs - web server
//! ==============================================================================
//!
//! routes:
//!     GET  /            rendered dashboard
//!     GET  /api/state   json snapshot of the dashboard state
//!     POST /device      switch the selected device
//!     POST /refresh     fetch now, keep showing the current data meanwhile
//!     POST /export      run a csv export, answer with the file or back to the form
//!
//! every POST answers with a redirect (post/redirect/get) except a successful
//! export, which streams the csv back as an attachment.
//!
//! relationships:
//!     - uses: poller.rs, export.rs, view.rs, state.rs
//!     - used by: main.rs
//!
//! ==============================================================================

use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{Html, IntoResponse, Json, Redirect, Response},
    routing::{get, post},
    Form, Router,
};
use serde::Deserialize;
use tower_http::cors::CorsLayer;

use crate::backend::SensorBackend;
use crate::export::{ExportController, ExportError, ExportForm, ExportOutcome};
use crate::images::UrlSigner;
use crate::poller::PollingController;
use crate::state::{DashboardState, SharedState};
use crate::view;

pub struct AppContext<B, S> {
    pub poller: Arc<PollingController<B, S>>,
    pub exporter: Arc<ExportController<B>>,
    pub state: SharedState,
    pub devices: Arc<Vec<String>>,
}

// derive(Clone) would demand B: Clone and S: Clone
impl<B, S> Clone for AppContext<B, S> {
    fn clone(&self) -> Self {
        Self {
            poller: self.poller.clone(),
            exporter: self.exporter.clone(),
            state: self.state.clone(),
            devices: self.devices.clone(),
        }
    }
}

pub fn router<B: SensorBackend, S: UrlSigner>(ctx: AppContext<B, S>) -> Router {
    Router::new()
        .route("/", get(dashboard_handler::<B, S>))
        .route("/api/state", get(state_handler::<B, S>))
        .route("/device", post(device_handler::<B, S>))
        .route("/refresh", post(refresh_handler::<B, S>))
        .route("/export", post(export_handler::<B, S>))
        .layer(CorsLayer::permissive())
        .with_state(ctx)
}

pub async fn serve<B, S, F>(listen: &str, ctx: AppContext<B, S>, shutdown: F) -> Result<()>
where
    B: SensorBackend,
    S: UrlSigner,
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(listen).await?;
    tracing::info!(addr = %listener.local_addr()?, "dashboard live");
    axum::serve(listener, router(ctx))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

// ==============================================================================
// handlers
// ==============================================================================

async fn dashboard_handler<B: SensorBackend, S: UrlSigner>(
    State(ctx): State<AppContext<B, S>>,
) -> Html<String> {
    let state = ctx.state.read().await;
    Html(view::render(&state, &ctx.devices))
}

/// json api endpoint for programmatic access
async fn state_handler<B: SensorBackend, S: UrlSigner>(
    State(ctx): State<AppContext<B, S>>,
) -> Json<DashboardState> {
    let state = ctx.state.read().await;
    Json(state.clone())
}

#[derive(Deserialize)]
struct DeviceForm {
    device_id: String,
}

async fn device_handler<B: SensorBackend, S: UrlSigner>(
    State(ctx): State<AppContext<B, S>>,
    Form(form): Form<DeviceForm>,
) -> Response {
    if !ctx.devices.iter().any(|d| d == &form.device_id) {
        tracing::warn!(device_id = %form.device_id, "rejected unknown device");
        return (
            StatusCode::BAD_REQUEST,
            format!("unknown device: {}", form.device_id),
        )
            .into_response();
    }

    ctx.poller.select_device(&form.device_id).await;
    Redirect::to("/").into_response()
}

async fn refresh_handler<B: SensorBackend, S: UrlSigner>(
    State(ctx): State<AppContext<B, S>>,
) -> Redirect {
    ctx.poller.refresh_now().await;
    Redirect::to("/#top")
}

struct CsvFile {
    filename: String,
    body: Vec<u8>,
}

impl IntoResponse for CsvFile {
    fn into_response(self) -> Response {
        (
            [
                (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"{}\"", self.filename),
                ),
            ],
            self.body,
        )
            .into_response()
    }
}

async fn run_export<B: SensorBackend>(
    exporter: Arc<ExportController<B>>,
    form: ExportForm,
) -> Result<Option<CsvFile>, ExportError> {
    let target = match exporter.export(form).await? {
        ExportOutcome::Download(target) => target,
        ExportOutcome::NotFound => return Ok(None),
    };

    match exporter.download(&target).await {
        Ok(body) => Ok(Some(CsvFile {
            filename: target.filename,
            body,
        })),
        Err(e) => {
            exporter.report(&e).await;
            Err(e)
        }
    }
}

async fn export_handler<B: SensorBackend, S: UrlSigner>(
    State(ctx): State<AppContext<B, S>>,
    Form(form): Form<ExportForm>,
) -> Response {
    if ctx.exporter.is_exporting() {
        tracing::debug!("export already running, ignoring submit");
        return Redirect::to("/#export").into_response();
    }

    // detached so a closed connection cannot leave the export half-finished
    let task = tokio::spawn(run_export(ctx.exporter.clone(), form));

    match task.await {
        Ok(Ok(Some(file))) => file.into_response(),
        Ok(Ok(None)) => Redirect::to("/#export").into_response(),
        Ok(Err(e)) => {
            tracing::debug!(error = %e, "export did not produce a file");
            Redirect::to("/#export").into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "export task panicked");
            Redirect::to("/#export").into_response()
        }
    }
}

// ==============================================================================
// tests
// ==============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::{NOT_FOUND_MESSAGE, REQUIRED_MESSAGE};
    use crate::fetcher::Fetcher;
    use crate::state::{self, Phase};
    use crate::testing::{item, MockBackend, MockSigner};
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use std::time::Duration;
    use tower::ServiceExt;

    struct Harness {
        backend: Arc<MockBackend>,
        ctx: AppContext<MockBackend, MockSigner>,
    }

    fn harness() -> Harness {
        let backend = Arc::new(MockBackend::default());
        backend.set_device_items("22-27", vec![item("22-27", "1718000000")]);
        backend.set_device_items("22-30", vec![item("22-30", "1718000100")]);

        let state = state::shared();
        let poller = PollingController::new(
            Fetcher::new(backend.clone(), 20),
            Arc::new(MockSigner::default()),
            state.clone(),
            Duration::from_secs(30),
        );
        let exporter = ExportController::new(backend.clone(), state.clone(), reqwest::Client::new());

        Harness {
            backend,
            ctx: AppContext {
                poller: Arc::new(poller),
                exporter: Arc::new(exporter),
                state,
                devices: Arc::new(vec!["22-27".to_string(), "22-30".to_string()]),
            },
        }
    }

    fn post_form(uri: &str, body: &str) -> Request<Body> {
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    #[tokio::test]
    async fn test_dashboard_shows_loading_before_first_fetch() {
        let h = harness();
        let response = router(h.ctx.clone())
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_text(response).await.contains("Loading..."));
    }

    #[tokio::test(start_paused = true)]
    async fn test_device_switch_redirects_and_renders_new_device() {
        let h = harness();
        let response = router(h.ctx.clone())
            .oneshot(post_form("/device", "device_id=22-30"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers()[header::LOCATION], "/");

        settle().await;
        {
            let state = h.ctx.state.read().await;
            assert_eq!(state.phase, Phase::Ready);
            assert_eq!(state.selected_device, "22-30");
        }
        assert_eq!(h.backend.list_calls_for("22-30"), 1);

        let html = body_text(
            router(h.ctx.clone())
                .oneshot(Request::get("/").body(Body::empty()).unwrap())
                .await
                .unwrap(),
        )
        .await;
        assert!(html.contains(r#"<option value="22-30" selected>"#));
        h.ctx.poller.shutdown().await;
    }

    #[tokio::test]
    async fn test_unknown_device_is_rejected() {
        let h = harness();
        let response = router(h.ctx.clone())
            .oneshot(post_form("/device", "device_id=99-99"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(h.backend.list_calls_for("99-99"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_fetches_once_more() {
        let h = harness();
        h.ctx.poller.select_device("22-27").await;
        settle().await;

        let response = router(h.ctx.clone())
            .oneshot(post_form("/refresh", ""))
            .await
            .unwrap();

        assert_eq!(response.headers()[header::LOCATION], "/#top");
        assert_eq!(h.backend.list_calls_for("22-27"), 2);
        h.ctx.poller.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_state_endpoint_is_json() {
        let h = harness();
        h.ctx.poller.select_device("22-27").await;
        settle().await;

        let response = router(h.ctx.clone())
            .oneshot(Request::get("/api/state").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();

        assert_eq!(json["phase"], "Ready");
        assert_eq!(json["selected_device"], "22-27");
        assert_eq!(json["records"].as_array().unwrap().len(), 1);
        h.ctx.poller.shutdown().await;
    }

    #[tokio::test]
    async fn test_invalid_export_goes_back_to_form() {
        let h = harness();
        let response = router(h.ctx.clone())
            .oneshot(post_form("/export", "device_id=22-27&start=&end=2024-06-02T00%3A00"))
            .await
            .unwrap();

        assert_eq!(response.headers()[header::LOCATION], "/#export");
        assert!(h.backend.export_calls().is_empty());
        assert_eq!(h.ctx.state.read().await.export.error.as_deref(), Some(REQUIRED_MESSAGE));
    }

    #[tokio::test]
    async fn test_empty_export_reports_not_found() {
        let h = harness();
        h.backend.set_export_url("");
        let response = router(h.ctx.clone())
            .oneshot(post_form(
                "/export",
                "device_id=22-27&start=2024-06-01T00%3A00&end=2024-06-02T00%3A00",
            ))
            .await
            .unwrap();

        assert_eq!(response.headers()[header::LOCATION], "/#export");
        assert_eq!(h.backend.export_calls().len(), 1);
        assert_eq!(h.ctx.state.read().await.export.error.as_deref(), Some(NOT_FOUND_MESSAGE));
    }

    #[test]
    fn test_csv_file_is_an_attachment() {
        let response = CsvFile {
            filename: "export_22-27_1.csv".to_string(),
            body: b"a,b\n".to_vec(),
        }
        .into_response();

        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename=\"export_22-27_1.csv\""
        );
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/csv; charset=utf-8");
    }
}
