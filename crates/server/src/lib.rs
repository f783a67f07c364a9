//! Server crate provides HTTP server functionality.
//!
//! This module implements the HTTP API for the inventory backend:
//! product creation and listing, stock purchase/sale endpoints, health
//! and metrics endpoints, and serving static front-end content. All API
//! responses share the `{success, message, data, errors}` envelope.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    extract::{Query, State, rejection::JsonRejection, rejection::QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use model::{NewProduct, StockRequest};
use prometheus::{CounterVec, HistogramOpts, HistogramVec, Opts, Registry};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use service::{ProductService, ServiceError, StockService};
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};

/// Uniform response envelope shared by every API endpoint.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub message: String,
    pub data: Option<T>,
    pub errors: Option<Value>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T, message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Some(data),
            errors: None,
        }
    }

    pub fn ok_empty(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: None,
            errors: None,
        }
    }

    pub fn fail(message: impl Into<String>, errors: Option<Value>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: None,
            errors,
        }
    }
}

/// Server represents the HTTP server for the inventory API.
pub struct Server {
    product_service: Arc<dyn ProductService>,
    stock_service: Arc<dyn StockService>,
    static_dir: String,
    port: String,
    metrics: Arc<Metrics>,
}

/// Metrics collects and exposes HTTP server metrics.
struct Metrics {
    registry: Registry,
    http_requests_total: CounterVec,
    http_request_duration_seconds: HistogramVec,
    errors_total: CounterVec,
}

impl Metrics {
    fn new() -> Self {
        let registry = Registry::new();

        let http_requests_total = CounterVec::new(
            Opts::new("http_requests_total", "Total number of HTTP requests"),
            &["method", "endpoint", "status"],
        )
        .expect("Failed to create http_requests_total metric");

        let http_request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "http_request_duration_seconds",
                "HTTP request duration in seconds",
            ),
            &["method", "endpoint"],
        )
        .expect("Failed to create http_request_duration_seconds metric");

        let errors_total = CounterVec::new(
            Opts::new("errors_total", "Total number of errors"),
            &["source", "endpoint"],
        )
        .expect("Failed to create errors_total metric");

        registry
            .register(Box::new(http_requests_total.clone()))
            .expect("Failed to register http_requests_total metric");
        registry
            .register(Box::new(http_request_duration_seconds.clone()))
            .expect("Failed to register http_request_duration_seconds metric");
        registry
            .register(Box::new(errors_total.clone()))
            .expect("Failed to register errors_total metric");

        Self {
            registry,
            http_requests_total,
            http_request_duration_seconds,
            errors_total,
        }
    }

    fn record_request(&self, method: &str, endpoint: &str, status: u16, duration: Duration) {
        self.http_requests_total
            .with_label_values(&[method, endpoint, &status.to_string()])
            .inc();
        self.http_request_duration_seconds
            .with_label_values(&[method, endpoint])
            .observe(duration.as_secs_f64());
    }

    fn record_error(&self, source: &str, endpoint: &str) {
        self.errors_total
            .with_label_values(&[source, endpoint])
            .inc();
    }
}

/// Query parameters of the paged product listing.
#[derive(Debug, Deserialize)]
struct ListQuery {
    page: Option<i64>,
    #[serde(rename = "pageSize")]
    page_size: Option<i64>,
    active: Option<bool>,
}

impl Server {
    /// Creates a new Server instance.
    ///
    /// # Arguments
    ///
    /// * `port` - The port on which the server will listen
    /// * `product_service` - Business logic for product creation and listing
    /// * `stock_service` - Business logic for stock mutations
    /// * `static_dir` - The directory for static files (e.g., index.html)
    pub fn new(
        port: String,
        product_service: Arc<dyn ProductService>,
        stock_service: Arc<dyn StockService>,
        static_dir: String,
    ) -> Self {
        info!("Initializing HTTP server on port {}", port);

        Self {
            product_service,
            stock_service,
            static_dir,
            port,
            metrics: Arc::new(Metrics::new()),
        }
    }

    /// Starts the server and blocks until it's shut down.
    pub async fn start(&self) -> Result<()> {
        let app = self.create_router();

        let listener = TcpListener::bind(format!("0.0.0.0:{}", self.port))
            .await
            .context("Failed to bind to port")?;

        info!("HTTP server listening on port {}", self.port);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .context("Server error")?;

        info!("HTTP server shut down gracefully");
        Ok(())
    }

    fn create_router(&self) -> Router {
        let metrics = self.metrics.clone();

        Router::new()
            .route(
                "/api/products",
                post(Self::handle_create_product).get(Self::handle_get_products),
            )
            .route("/api/stock/purchase", post(Self::handle_add_stock))
            .route("/api/stock/sale", post(Self::handle_remove_stock))
            .route("/health", get(Self::handle_health))
            .route("/metrics", get(Self::handle_metrics))
            .fallback(Self::handle_static)
            .layer(axum::middleware::from_fn_with_state(
                metrics.clone(),
                Self::metrics_middleware,
            ))
            .with_state(AppState {
                product_service: self.product_service.clone(),
                stock_service: self.stock_service.clone(),
                static_dir: self.static_dir.clone(),
                metrics,
            })
    }

    /// Middleware for collecting metrics on HTTP requests
    async fn metrics_middleware(
        State(metrics): State<Arc<Metrics>>,
        req: axum::extract::Request,
        next: axum::middleware::Next,
    ) -> Response {
        let method = req.method().to_string();
        let path = req.uri().path().to_string();

        let start = std::time::Instant::now();
        let response = next.run(req).await;
        let duration = start.elapsed();

        let status = response.status().as_u16();
        metrics.record_request(&method, &path, status, duration);
        if status >= 400 {
            metrics.record_error("http", &path);
        }

        response
    }

    async fn handle_create_product(
        State(state): State<AppState>,
        payload: Result<Json<NewProduct>, JsonRejection>,
    ) -> Response {
        let Json(input) = match payload {
            Ok(payload) => payload,
            Err(rejection) => return malformed_body(rejection),
        };

        info!("Received create-product request: {}", input.product_code);
        match state.product_service.create_product(&input).await {
            Ok(id) => (
                StatusCode::CREATED,
                Json(ApiResponse::ok(
                    json!({ "id": id }),
                    "Product created successfully.",
                )),
            )
                .into_response(),
            Err(err) => error_response(err),
        }
    }

    async fn handle_get_products(
        State(state): State<AppState>,
        query: Result<Query<ListQuery>, QueryRejection>,
    ) -> Response {
        let Query(query) = match query {
            Ok(query) => query,
            Err(rejection) => {
                warn!("Malformed listing query: {}", rejection);
                return (
                    StatusCode::BAD_REQUEST,
                    Json(ApiResponse::<Value>::fail("Validation failed.", None)),
                )
                    .into_response();
            }
        };

        let page = query.page.unwrap_or(service::DEFAULT_PAGE);
        let page_size = query.page_size.unwrap_or(service::DEFAULT_PAGE_SIZE);
        info!("Listing products - Page:{} Size:{}", page, page_size);

        match state
            .product_service
            .get_products(page, page_size, query.active)
            .await
        {
            Ok(result) => (StatusCode::OK, Json(ApiResponse::ok(result, "Success"))).into_response(),
            Err(err) => error_response(err),
        }
    }

    async fn handle_add_stock(
        State(state): State<AppState>,
        payload: Result<Json<StockRequest>, JsonRejection>,
    ) -> Response {
        let Json(req) = match payload {
            Ok(payload) => payload,
            Err(rejection) => return malformed_body(rejection),
        };

        match state.stock_service.add_stock(&req).await {
            Ok(()) => (
                StatusCode::OK,
                Json(ApiResponse::<Value>::ok_empty("Stock added successfully.")),
            )
                .into_response(),
            Err(err) => error_response(err),
        }
    }

    async fn handle_remove_stock(
        State(state): State<AppState>,
        payload: Result<Json<StockRequest>, JsonRejection>,
    ) -> Response {
        let Json(req) = match payload {
            Ok(payload) => payload,
            Err(rejection) => return malformed_body(rejection),
        };

        match state.stock_service.remove_stock(&req).await {
            Ok(()) => (
                StatusCode::OK,
                Json(ApiResponse::<Value>::ok_empty("Stock removed successfully.")),
            )
                .into_response(),
            Err(err) => error_response(err),
        }
    }

    async fn handle_health() -> &'static str {
        info!("Health check requested");
        "OK"
    }

    async fn handle_metrics(State(state): State<AppState>) -> Response {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();

        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&state.metrics.registry.gather(), &mut buffer) {
            error!("Failed to encode metrics: {}", e);
            return (StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics").into_response();
        }

        match String::from_utf8(buffer) {
            Ok(metrics_text) => (StatusCode::OK, metrics_text).into_response(),
            Err(e) => {
                error!("Failed to convert metrics to UTF-8: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Invalid metrics data").into_response()
            }
        }
    }

    async fn handle_static(State(state): State<AppState>, uri: axum::http::Uri) -> Response {
        let path = uri.path().trim_start_matches('/');
        let path = if path.is_empty() { "index.html" } else { path };

        let file_path = Path::new(&state.static_dir).join(path);
        info!("Serving static file: {:?}", file_path);

        match tokio::fs::read_to_string(file_path).await {
            Ok(content) => {
                let content_type = if path.ends_with(".html") {
                    "text/html"
                } else if path.ends_with(".css") {
                    "text/css"
                } else if path.ends_with(".js") {
                    "application/javascript"
                } else {
                    "text/plain"
                };

                Response::builder()
                    .header("Content-Type", content_type)
                    .body(content.into())
                    .unwrap_or_else(|_| {
                        (StatusCode::INTERNAL_SERVER_ERROR, "Failed to create response")
                            .into_response()
                    })
            }
            Err(_) => (StatusCode::NOT_FOUND, "File not found").into_response(),
        }
    }
}

/// Application state shared between request handlers
#[derive(Clone)]
struct AppState {
    product_service: Arc<dyn ProductService>,
    stock_service: Arc<dyn StockService>,
    static_dir: String,
    metrics: Arc<Metrics>,
}

/// Maps a service error to its HTTP status code.
fn status_for(err: &ServiceError) -> StatusCode {
    match err {
        ServiceError::Invalid(_) => StatusCode::BAD_REQUEST,
        ServiceError::DuplicateCode(_) => StatusCode::CONFLICT,
        ServiceError::SubVariantNotFound => StatusCode::NOT_FOUND,
        ServiceError::InsufficientStock { .. } => StatusCode::BAD_REQUEST,
        ServiceError::Db(_) | ServiceError::Pool(_) | ServiceError::Unexpected(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// Translates a [`ServiceError`] into an enveloped HTTP response.
///
/// Domain errors carry their message to the caller; infrastructure errors
/// are logged in full server-side and reported with a generic message.
fn error_response(err: ServiceError) -> Response {
    let status = status_for(&err);

    if status == StatusCode::INTERNAL_SERVER_ERROR {
        error!("Internal error: {}", err);
        return (
            status,
            Json(ApiResponse::<Value>::fail(
                "An unexpected error occurred.",
                None,
            )),
        )
            .into_response();
    }

    warn!("Request failed: {}", err);
    let (message, errors) = match &err {
        ServiceError::Invalid(fields) => (
            "Validation failed.".to_string(),
            Some(serde_json::to_value(fields).unwrap_or(Value::Null)),
        ),
        other => (other.to_string(), None),
    };
    (status, Json(ApiResponse::<Value>::fail(message, errors))).into_response()
}

/// 400 response for a request body that failed to parse as JSON.
fn malformed_body(rejection: JsonRejection) -> Response {
    warn!("Malformed request body: {}", rejection);
    (
        StatusCode::BAD_REQUEST,
        Json(ApiResponse::<Value>::fail(
            "Validation failed.",
            Some(json!({ "body": rejection.body_text() })),
        )),
    )
        .into_response()
}

/// Waits for a shutdown signal (Ctrl+C)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use model::{PagedResult, ProductSummary};
    use rust_decimal::Decimal;
    use service::FieldError;
    use uuid::Uuid;

    struct StubProductService;

    #[async_trait]
    impl ProductService for StubProductService {
        async fn create_product(&self, _input: &NewProduct) -> Result<Uuid, ServiceError> {
            Ok(Uuid::new_v4())
        }

        async fn get_products(
            &self,
            page: i64,
            page_size: i64,
            _active: Option<bool>,
        ) -> Result<PagedResult<ProductSummary>, ServiceError> {
            Ok(PagedResult::new(vec![], 0, page, page_size))
        }
    }

    struct StubStockService;

    #[async_trait]
    impl StockService for StubStockService {
        async fn add_stock(&self, _req: &StockRequest) -> Result<(), ServiceError> {
            Ok(())
        }

        async fn remove_stock(&self, _req: &StockRequest) -> Result<(), ServiceError> {
            Ok(())
        }
    }

    fn create_test_server() -> Server {
        Server::new(
            "8080".to_string(),
            Arc::new(StubProductService),
            Arc::new(StubStockService),
            "static".to_string(),
        )
    }

    #[test]
    fn test_server_creation() {
        let server = create_test_server();
        assert_eq!(server.port, "8080");
        assert_eq!(server.static_dir, "static");
        // Router wiring must not panic
        let _router = server.create_router();
    }

    #[test]
    fn test_envelope_field_names() {
        let response = ApiResponse::ok(json!({ "id": 1 }), "Success");
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["success"], json!(true));
        assert_eq!(value["message"], json!("Success"));
        assert_eq!(value["data"], json!({ "id": 1 }));
        assert_eq!(value["errors"], Value::Null);

        let response = ApiResponse::<Value>::fail("Validation failed.", Some(json!([])));
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["success"], json!(false));
        assert_eq!(value["data"], Value::Null);
        assert_eq!(value["errors"], json!([]));
    }

    #[test]
    fn test_status_mapping() {
        let invalid = ServiceError::Invalid(vec![FieldError {
            field: "quantity".to_string(),
            message: "Quantity must be greater than 0.".to_string(),
        }]);
        assert_eq!(status_for(&invalid), StatusCode::BAD_REQUEST);
        assert_eq!(
            status_for(&ServiceError::DuplicateCode("SKU-1".to_string())),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_for(&ServiceError::SubVariantNotFound),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_for(&ServiceError::InsufficientStock {
                available: Decimal::from(5),
                requested: Decimal::from(10),
            }),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(&ServiceError::Unexpected("boom".to_string())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_insufficient_stock_message_reports_amounts() {
        let err = ServiceError::InsufficientStock {
            available: Decimal::from(5),
            requested: Decimal::from(10),
        };
        assert_eq!(
            err.to_string(),
            "Insufficient stock. Available: 5, Requested: 10"
        );
    }
}
