pub mod config;
pub mod context;
pub mod error;
pub mod metrics;
pub mod persistence;
pub mod pipeline;
pub mod validation;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Bytes,
    extract::{Request, State},
    http::{HeaderValue, Method},
    middleware::Next,
    response::Response,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tower::ServiceBuilder;
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::GlobalKeyExtractor, GovernorLayer,
};
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    map_response_body::MapResponseBodyLayer,
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::error::ApiError;
use crate::metrics::{AppMetrics, DetailedMetricsResponse, EndpointMetricsResponse, SystemMetrics};
use crate::pipeline::{TeachingPipeline, TeachingResponse};
use crate::validation::validate_teaching_request;

/// Largest accepted request body. A maximal valid `/teach` payload is well
/// under this.
pub const MAX_BODY_BYTES: usize = 64 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<TeachingPipeline>,
    pub metrics: AppMetrics,
    pub request_count: Arc<AtomicU64>,
    pub config: ServerConfig,
    pub started_at: Instant,
}

impl AppState {
    /// Wrap a pipeline so that its counters show up under `/metrics`.
    pub fn new(pipeline: TeachingPipeline, config: ServerConfig) -> Self {
        let metrics = AppMetrics::new();
        let pipeline = pipeline.with_metrics(metrics.pipeline.clone());
        Self {
            pipeline: Arc::new(pipeline),
            metrics,
            request_count: Arc::new(AtomicU64::new(0)),
            config,
            started_at: Instant::now(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TeachResponse {
    pub success: bool,
    pub teacher_response: TeacherResponse,
    pub lesson_complete: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TeacherResponse {
    pub audio_text: String,
    pub display_text: String,
    pub diagram: Option<String>,
    pub combined_audio_encoded: String,
}

impl From<TeachingResponse> for TeachResponse {
    fn from(response: TeachingResponse) -> Self {
        Self {
            success: true,
            teacher_response: TeacherResponse {
                audio_text: response.audio_text,
                display_text: response.display_text,
                diagram: response.diagram,
                combined_audio_encoded: tts_core::encode_base64(&response.combined_audio),
            },
            lesson_complete: response.lesson_complete,
        }
    }
}

/// Build the application router with the full middleware stack.
pub fn build_router(state: AppState) -> anyhow::Result<Router> {
    let config = &state.config;

    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(u64::from(config.rate_limit_per_minute / 60).max(1))
            .burst_size(config.rate_limit_per_minute.max(1))
            .key_extractor(GlobalKeyExtractor)
            .finish()
            .ok_or_else(|| anyhow::anyhow!("invalid rate limit configuration"))?,
    );
    info!("Rate limiting: {} requests per minute", config.rate_limit_per_minute);

    let middleware_stack = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(GovernorLayer::new(governor_conf))
        .layer(TimeoutLayer::new(config.request_timeout()))
        .layer(MapResponseBodyLayer::new(axum::body::Body::new))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(cors_layer(config.cors_allowed_origins.as_deref()))
        .into_inner();

    let public_api = Router::new()
        .route("/health", get(health_check))
        .route("/healthz", get(health_check))
        .route("/teach", post(teach_endpoint));

    // Metrics endpoint - consider adding authentication in production
    let metrics_api = Router::new().route("/metrics", get(metrics_endpoint));

    let api = Router::new().merge(public_api).merge(metrics_api);

    Ok(Router::new()
        .merge(api.clone())
        .nest("/api", api)
        .layer(axum::middleware::from_fn(add_request_id))
        .layer(middleware_stack)
        .with_state(state))
}

fn cors_layer(allowed_origins: Option<&[String]>) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
        .allow_credentials(false);

    let origins: Vec<HeaderValue> = allowed_origins
        .unwrap_or_default()
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();

    if origins.is_empty() {
        warn!("No valid CORS_ALLOWED_ORIGINS, allowing all origins (development mode)");
        base.allow_origin(Any)
    } else {
        info!("CORS configured for {} origin(s)", origins.len());
        base.allow_origin(AllowOrigin::list(origins))
    }
}

/// Tag every request and response with an `x-request-id`.
async fn add_request_id(mut request: Request, next: Next) -> Response {
    let request_id = uuid::Uuid::new_v4().to_string();
    let header = HeaderValue::from_str(&request_id).ok();
    if let Some(value) = header.clone() {
        request.headers_mut().insert("x-request-id", value);
    }
    let mut response = next.run(request).await;
    if let Some(value) = header {
        response.headers_mut().insert("x-request-id", value);
    }
    response
}

pub async fn health_check() -> &'static str {
    "ok"
}

pub async fn teach_endpoint(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<TeachResponse>, ApiError> {
    state.request_count.fetch_add(1, Ordering::Relaxed);
    let start_time = Instant::now();

    let body: serde_json::Value = serde_json::from_slice(&body)
        .map_err(|e| ApiError::InvalidInput(format!("Request body must be valid JSON: {e}")))?;
    let request = validate_teaching_request(&body)?;

    info!(
        session_id = %request.session_id,
        lesson_id = %request.lesson_id,
        message_len = request.user_message.len(),
        "Teach request received"
    );

    let outcome = state.pipeline.run(&request).await;
    let latency_ms = start_time.elapsed().as_millis() as u64;
    state.metrics.teach.record_request(latency_ms);

    match outcome {
        Ok(response) => {
            info!(
                session_id = %request.session_id,
                latency_ms,
                audio_bytes = response.combined_audio.len(),
                lesson_complete = response.lesson_complete,
                "Teach request completed"
            );
            Ok(Json(response.into()))
        }
        Err(e) => {
            state.metrics.teach.record_error();
            Err(e.into())
        }
    }
}

pub async fn metrics_endpoint(State(state): State<AppState>) -> Json<DetailedMetricsResponse> {
    let mut system = sysinfo::System::new();
    system.refresh_cpu();
    system.refresh_memory();

    let cpu_usage = system.global_cpu_info().cpu_usage();
    let memory_used = system.used_memory();
    let memory_total = system.total_memory();
    let memory_usage_percent = if memory_total > 0 {
        (memory_used as f64 / memory_total as f64 * 100.0) as f32
    } else {
        0.0
    };

    // Unix-like systems only
    let system_load = {
        #[cfg(unix)]
        {
            std::fs::read_to_string("/proc/loadavg")
                .ok()
                .and_then(|loadavg| loadavg.split_whitespace().next()?.parse::<f64>().ok())
        }
        #[cfg(not(unix))]
        None
    };

    Json(DetailedMetricsResponse {
        timestamp: chrono::Utc::now(),
        system: SystemMetrics {
            cpu_usage_percent: cpu_usage,
            memory_used_mb: memory_used / 1024 / 1024,
            memory_total_mb: memory_total / 1024 / 1024,
            memory_usage_percent,
            request_count: state.request_count.load(Ordering::Relaxed),
            uptime_seconds: state.started_at.elapsed().as_secs(),
            system_load,
        },
        endpoints: EndpointMetricsResponse {
            teach: state.metrics.teach.stats(),
        },
        pipeline: state.metrics.pipeline.snapshot(),
    })
}
