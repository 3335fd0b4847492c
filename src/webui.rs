use crate::cache::CacheStats;
use crate::config::{self, MAX_HORIZON_YEARS, MIN_HORIZON_YEARS};
use crate::dashboard::{Dashboard, DisplayMode, Page, Selection, View};
use crate::data::MarketDataSource;
use anyhow::Result;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

const INDEX_HTML: &str = include_str!("../web/index.html");
const APP_JS: &str = include_str!("../web/app.js");

struct WebState<S> {
    dashboard: Arc<Dashboard<S>>,
    render: Arc<Mutex<RenderRuntimeState>>,
}

impl<S> Clone for WebState<S> {
    fn clone(&self) -> Self {
        Self {
            dashboard: self.dashboard.clone(),
            render: self.render.clone(),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
struct ApiError {
    error: String,
}

#[derive(Clone, Debug, Serialize, Default)]
struct RenderRuntimeState {
    last_request: Option<Selection>,
    last_view: Option<Arc<View>>,
    last_error: Option<String>,
    updated_at: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
struct FullUiState {
    render: RenderRuntimeState,
    history_cache: CacheStats,
    forecast_cache: CacheStats,
}

#[derive(Clone, Debug, Serialize)]
struct StockOption {
    name: &'static str,
    symbol: &'static str,
}

#[derive(Clone, Debug, Serialize)]
struct OptionsResponse {
    pages: Vec<&'static str>,
    stocks: Vec<StockOption>,
    display_modes: Vec<&'static str>,
    min_years: u8,
    max_years: u8,
    source: &'static str,
    defaults: Selection,
}

fn router<S: MarketDataSource + 'static>(state: WebState<S>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/app.js", get(app_js))
        .route("/api/health", get(health))
        .route("/api/options", get(options::<S>))
        .route("/api/state", get(full_state::<S>))
        .route("/api/render", post(render::<S>))
        .route("/api/cache/clear", post(clear_cache::<S>))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run_webui_server<S: MarketDataSource + 'static>(
    port: u16,
    dashboard: Arc<Dashboard<S>>,
) -> Result<()> {
    let state = WebState {
        dashboard,
        render: Arc::new(Mutex::new(RenderRuntimeState::default())),
    };
    let app = router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!("WebUI listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn app_js() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "text/javascript; charset=utf-8")], APP_JS)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "ok": true }))
}

async fn options<S: MarketDataSource + 'static>(State(state): State<WebState<S>>) -> Json<OptionsResponse> {
    Json(OptionsResponse {
        pages: Page::ALL.iter().map(|p| p.label()).collect(),
        stocks: config::STOCKS
            .iter()
            .map(|&(name, symbol)| StockOption { name, symbol })
            .collect(),
        display_modes: DisplayMode::ALL.iter().map(|m| m.label()).collect(),
        min_years: MIN_HORIZON_YEARS,
        max_years: MAX_HORIZON_YEARS,
        source: state.dashboard.source().name(),
        defaults: Selection::default(),
    })
}

async fn render<S: MarketDataSource + 'static>(
    State(state): State<WebState<S>>,
    Json(selection): Json<Selection>,
) -> Result<Json<Arc<View>>, (StatusCode, Json<ApiError>)> {
    if let Err(e) = selection.symbols() {
        return Err(api_err(StatusCode::BAD_REQUEST, &e.to_string()));
    }

    {
        let mut rs = state.render.lock().await;
        rs.last_request = Some(selection.clone());
        rs.last_error = None;
    }

    match state.dashboard.render(&selection).await {
        Ok(view) => {
            let view = Arc::new(view);
            let mut rs = state.render.lock().await;
            rs.last_view = Some(view.clone());
            rs.updated_at = Some(chrono::Local::now().to_rfc3339());
            Ok(Json(view))
        }
        Err(e) => {
            warn!("Render failed: {:#}", e);
            let mut rs = state.render.lock().await;
            rs.last_error = Some(format!("{:#}", e));
            rs.updated_at = Some(chrono::Local::now().to_rfc3339());
            Err(internal_err(e))
        }
    }
}

async fn full_state<S: MarketDataSource + 'static>(
    State(state): State<WebState<S>>,
) -> Result<Json<FullUiState>, (StatusCode, Json<ApiError>)> {
    let (history_cache, forecast_cache) = state.dashboard.cache_stats().await;
    Ok(Json(FullUiState {
        render: state.render.lock().await.clone(),
        history_cache,
        forecast_cache,
    }))
}

async fn clear_cache<S: MarketDataSource + 'static>(
    State(state): State<WebState<S>>,
) -> Json<serde_json::Value> {
    state.dashboard.clear_cache().await;
    Json(serde_json::json!({ "ok": true }))
}

fn api_err(status: StatusCode, message: &str) -> (StatusCode, Json<ApiError>) {
    (
        status,
        Json(ApiError {
            error: message.to_string(),
        }),
    )
}

fn internal_err(err: anyhow::Error) -> (StatusCode, Json<ApiError>) {
    api_err(StatusCode::INTERNAL_SERVER_ERROR, &format!("{:#}", err))
}
