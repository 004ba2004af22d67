// Car Discounts - Web Server
// REST API over the car lifecycle service + the hourly discount scheduler

use anyhow::{Context, Result};
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use car_discounts::{
    init_logging, Car, CarError, CarService, Config, CreateCarRequest, DiscountScheduler,
    Manufacturer, Owner, SqliteStore, TickHandle, TickOutcome, UpdateCarRequest,
};

/// Shared application state
#[derive(Clone)]
struct AppState {
    service: CarService<SqliteStore>,
    ticks: TickHandle<SqliteStore>,
}

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

impl ApiResponse<()> {
    fn err(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

struct ApiError(CarError);

impl From<CarError> for ApiError {
    fn from(err: CarError) -> Self {
        ApiError(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError(CarError::BadRequest(rejection.body_text()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            CarError::NotFound(_) => StatusCode::NOT_FOUND,
            CarError::Conflict(_) => StatusCode::CONFLICT,
            CarError::PreconditionFailed(_) => StatusCode::PRECONDITION_FAILED,
            CarError::BadRequest(_) => StatusCode::BAD_REQUEST,
            CarError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let message = if self.0.is_infrastructure() {
            error!(error = %self.0, "store failure");
            "An internal error occurred".to_string()
        } else {
            self.0.to_string()
        };

        (status, Json(ApiResponse::err(message))).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

// ============================================================================
// Responses
// ============================================================================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct OwnerResponse {
    id: String,
    name: String,
    purchase_date: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CarResponse {
    id: String,
    manufacturer: Manufacturer,
    price: f64,
    first_registration_date: String,
    owners: Vec<OwnerResponse>,
    discounted: bool,
}

impl From<Owner> for OwnerResponse {
    fn from(owner: Owner) -> Self {
        Self {
            id: owner.id,
            name: owner.name,
            purchase_date: owner.purchase_date.to_rfc3339(),
        }
    }
}

impl From<Car> for CarResponse {
    fn from(car: Car) -> Self {
        Self {
            id: car.id,
            manufacturer: car.manufacturer,
            price: car.price,
            first_registration_date: car.first_registration_date.to_rfc3339(),
            owners: car.owners.into_iter().map(Into::into).collect(),
            discounted: car.discounted,
        }
    }
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /health - Health check
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok("OK"))
}

/// POST /cars - Create a car
async fn create_car(
    State(state): State<AppState>,
    payload: std::result::Result<Json<CreateCarRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(request) = payload?;
    info!(car_id = ?request.id, "POST /cars");

    let car = request.into_car(Utc::now())?;
    let created = state.service.create(car).await?;

    Ok((StatusCode::CREATED, Json(ApiResponse::ok(CarResponse::from(created)))))
}

/// GET /cars - Get all cars
async fn get_cars(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let cars = state.service.get_all().await?;
    let response: Vec<CarResponse> = cars.into_iter().map(Into::into).collect();

    Ok(Json(ApiResponse::ok(response)))
}

/// GET /cars/:id - Get one car
async fn get_car(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let car = state.service.get(&id).await?;

    Ok(Json(ApiResponse::ok(CarResponse::from(car))))
}

/// GET /cars/:id/manufacturer - Get the manufacturer of a car
async fn get_manufacturer(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let car = state.service.get(&id).await?;

    Ok(Json(ApiResponse::ok(car.manufacturer)))
}

/// PUT /cars/:id - Merge a partial update into a car
async fn update_car(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: std::result::Result<Json<UpdateCarRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(request) = payload?;
    info!(car_id = %id, "PUT /cars");

    let car = state.service.get(&id).await?;
    let merged = request.merge_into(car, Utc::now())?;
    let updated = state.service.update(merged).await?;

    Ok(Json(ApiResponse::ok(CarResponse::from(updated))))
}

/// DELETE /cars/:id - Delete a car without owners
async fn delete_car(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    info!(car_id = %id, "DELETE /cars");

    let car = state.service.get(&id).await?;
    state.service.delete(&car).await?;

    Ok(StatusCode::NO_CONTENT)
}

/// POST /reconcile - Run one reconciliation tick now
async fn run_reconcile(State(state): State<AppState>) -> Json<ApiResponse<TickOutcome>> {
    Json(ApiResponse::ok(state.ticks.run_tick().await))
}

fn app(state: AppState) -> Router {
    let car_routes = Router::new()
        .route("/", post(create_car).get(get_cars))
        .route("/:id", get(get_car).put(update_car).delete(delete_car))
        .route("/:id/manufacturer", get(get_manufacturer));

    Router::new()
        .route("/health", get(health_check))
        .route("/reconcile", post(run_reconcile))
        .nest("/cars", car_routes)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for ctrl-c");
    }
    info!("shutdown requested");
}

// ============================================================================
// Main Server
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let config = Config::from_env()?;

    let store = SqliteStore::open(&config.database_path)
        .with_context(|| format!("Failed to open database {:?}", config.database_path))?;
    info!(path = ?config.database_path, "database opened");

    let service = CarService::new(Arc::new(store));
    let mut scheduler = DiscountScheduler::with_interval(service.clone(), config.tick_interval)?;

    let state = AppState {
        service,
        ticks: scheduler.tick_handle(),
    };

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;

    scheduler.start()?;
    info!(addr = %config.bind_addr, "server running");

    let served = axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await;

    // In-flight tick finishes before we exit
    scheduler.stop().await;

    served.context("Server error")
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn test_app() -> Router {
        let store = SqliteStore::open_in_memory().unwrap();
        let service = CarService::new(Arc::new(store));
        let scheduler = DiscountScheduler::new(service.clone());

        app(AppState {
            service,
            ticks: scheduler.tick_handle(),
        })
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(match body {
                Some(body) => Body::from(body.to_string()),
                None => Body::empty(),
            })
            .unwrap();

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };

        (status, value)
    }

    fn new_car(id: &str, owners: Value) -> Value {
        json!({
            "id": id,
            "manufacturer": { "id": "renault", "name": "Renault", "phone": "0102030405", "siret": 78012998703591i64 },
            "price": 12000.0,
            "firstRegistrationDate": "2024-07-15T00:00:00Z",
            "owners": owners,
        })
    }

    #[tokio::test]
    async fn test_create_then_get() {
        let app = test_app();

        let (status, body) = send(&app, "POST", "/cars", Some(new_car("R5", json!([])))).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["data"]["id"], "R5");

        let (status, body) = send(&app, "GET", "/cars/R5", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["price"], 12000.0);

        let (status, body) = send(&app, "GET", "/cars/R5/manufacturer", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["name"], "Renault");
    }

    #[tokio::test]
    async fn test_error_statuses() {
        let app = test_app();
        send(&app, "POST", "/cars", Some(new_car("R5", json!([{ "id": "o-1", "name": "Alice" }])))).await;

        let (status, _) = send(&app, "POST", "/cars", Some(new_car("R5", json!([])))).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _) = send(&app, "GET", "/cars/missing", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = send(&app, "DELETE", "/cars/R5", None).await;
        assert_eq!(status, StatusCode::PRECONDITION_FAILED);
        assert_eq!(body["error"], "Car has owners");

        let mut bad = new_car("R6", json!([]));
        bad["firstRegistrationDate"] = json!("not a date");
        let (status, _) = send(&app, "POST", "/cars", Some(bad)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_update_clears_owners_then_delete_succeeds() {
        let app = test_app();
        send(&app, "POST", "/cars", Some(new_car("R5", json!([{ "id": "o-1", "name": "Alice" }])))).await;

        let (status, body) = send(&app, "PUT", "/cars/R5", Some(json!({ "owners": [] }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["owners"], json!([]));

        let (status, _) = send(&app, "DELETE", "/cars/R5", None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, _) = send(&app, "GET", "/cars/R5", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_reconcile_endpoint_reports_tick() {
        let app = test_app();

        let (status, body) = send(&app, "POST", "/reconcile", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["outcome"], "completed");
    }
}
