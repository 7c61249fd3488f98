use std::{sync::Arc, time::Duration};

use axum::{
    extract::State,
    http::{header, HeaderValue, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::Utc;
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::{json, Value};
use tower_http::{
    cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing::warn;

use admin_service_storage::Database;
use admin_service_util::AppConfig;

use crate::application_service::ApplicationService;
use crate::auth::TokenValidator;
use crate::domain_service::DomainService;
use crate::notifier::Notifier;
use crate::problem::ProblemResponse;
use crate::service::{Clock, ServiceError};
use crate::{application_routes, domain_routes, telemetry};

/// Knobs shared by the domain and application services.
#[derive(Debug, Clone, Copy)]
pub struct ServiceOptions {
    pub operation_timeout: Duration,
    pub notify_application_created: bool,
}

/// Mount point and cross-origin policy of the HTTP surface.
#[derive(Debug, Clone, Default)]
pub struct ApiOptions {
    pub prefix: String,
    pub cors_origins: Vec<String>,
}

impl From<&AppConfig> for ApiOptions {
    fn from(config: &AppConfig) -> Self {
        Self {
            prefix: config.api_prefix.clone(),
            cors_origins: config.cors_origins.clone(),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    metrics: PrometheusHandle,
    domains: DomainService,
    applications: ApplicationService,
    tokens: TokenValidator,
    token_url: Arc<str>,
}

impl AppState {
    pub fn new(
        metrics: PrometheusHandle,
        database: Database,
        notifier: Notifier,
        tokens: TokenValidator,
        options: ServiceOptions,
        token_url: String,
    ) -> Self {
        Self::with_clock(
            metrics,
            database,
            notifier,
            tokens,
            options,
            token_url,
            Arc::new(Utc::now),
        )
    }

    pub fn with_clock(
        metrics: PrometheusHandle,
        database: Database,
        notifier: Notifier,
        tokens: TokenValidator,
        options: ServiceOptions,
        token_url: String,
        clock: Clock,
    ) -> Self {
        let (domains, applications) = build_services(&database, &notifier, &clock, options);
        Self {
            metrics,
            domains,
            applications,
            tokens,
            token_url: Arc::from(token_url),
        }
    }

    pub fn metrics(&self) -> &PrometheusHandle {
        &self.metrics
    }

    pub fn domains(&self) -> &DomainService {
        &self.domains
    }

    pub fn applications(&self) -> &ApplicationService {
        &self.applications
    }

    pub fn tokens(&self) -> &TokenValidator {
        &self.tokens
    }

    pub fn token_url(&self) -> &str {
        &self.token_url
    }
}

fn build_services(
    database: &Database,
    notifier: &Notifier,
    clock: &Clock,
    options: ServiceOptions,
) -> (DomainService, ApplicationService) {
    let domains = DomainService::new(
        database.clone(),
        notifier.clone(),
        clock.clone(),
        options.operation_timeout,
    );
    let applications = ApplicationService::new(
        database.clone(),
        notifier.clone(),
        clock.clone(),
        options.operation_timeout,
        options.notify_application_created,
    );
    (domains, applications)
}

pub fn app_router(state: AppState, options: &ApiOptions) -> Router {
    let api = Router::new()
        .merge(domain_routes::routes())
        .merge(application_routes::routes());
    // Nesting at the root is not allowed, so an empty prefix merges instead.
    let api = if options.prefix.is_empty() {
        Router::new().merge(api)
    } else {
        Router::new().nest(&options.prefix, api)
    };

    let router = api
        .route("/", get(root))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .with_state(state);
    let router = match cors_layer(&options.cors_origins) {
        Some(cors) => router.layer(cors),
        None => router,
    };
    router.layer(TraceLayer::new_for_http())
}

fn cors_layer(origins: &[String]) -> Option<CorsLayer> {
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(stage = "app", origin = %origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    if allowed.is_empty() {
        return None;
    }
    Some(
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(allowed))
            .allow_credentials(true)
            .allow_methods(AllowMethods::mirror_request())
            .allow_headers(AllowHeaders::mirror_request()),
    )
}

/// Converts a service result into a response and counts it per route.
pub(crate) fn respond<T>(
    route: &'static str,
    result: Result<T, ServiceError>,
) -> Result<T, ProblemResponse> {
    let label = match &result {
        Ok(_) => "ok",
        Err(err) => err.kind(),
    };
    counter!("api_requests_total", "route" => route, "result" => label).increment(1);
    result.map_err(ProblemResponse::from)
}

async fn root(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "message": "Welcome to the Admin Service",
        "token_url": state.token_url(),
    }))
}

async fn health() -> Json<Value> {
    Json(json!({"status": "healthy"}))
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let body = telemetry::render_metrics(state.metrics());
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
}
