use axum::{
    extract::{Path, State},
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use log::error;
use serde::Deserialize;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, Mutex};
use tower_http::cors::{Any, CorsLayer};

use lib::DosingEngine;
use models::{DosingError, InspectionOutcome};

mod config;
pub use crate::config::{load_rest_api_config, load_seed_data, RestApiConfig, SeedData};

// Define the REST API error enum
#[derive(Debug, Error)]
pub enum RestApiError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error(transparent)]
    Dosing(#[from] DosingError),
    #[error("General error: {0}")]
    GeneralError(String),
}

// Convert engine and validation failures into structured HTTP responses.
// Domain errors keep their message; infrastructure causes are redacted from
// the body and logged server-side. Every failure body says whether the
// action was applied, so callers know if a retry is safe.
impl IntoResponse for RestApiError {
    fn into_response(self) -> Response {
        let (status, message, applied) = match self {
            RestApiError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, msg, false),
            RestApiError::Dosing(e) => match e {
                DosingError::OrderNotFound(_)
                | DosingError::DoseNotFound(_)
                | DosingError::BottleNotFound(_) => (StatusCode::NOT_FOUND, e.to_string(), false),
                DosingError::OrderClosed(_) | DosingError::AlreadyReturned(_) => {
                    (StatusCode::CONFLICT, e.to_string(), false)
                }
                DosingError::DeviceNotReady(_) | DosingError::InvalidData(_) => {
                    (StatusCode::BAD_REQUEST, e.to_string(), false)
                }
                DosingError::PostDispenseFailure { .. } => {
                    // The dispense itself happened; retrying would dose twice.
                    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string(), true)
                }
                other => {
                    error!("internal error: {}", other);
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "internal error; the operation was not applied".to_string(),
                        false,
                    )
                }
            },
            RestApiError::GeneralError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg, false),
        };

        let body = Json(json!({
            "status": "error",
            "message": message,
            "applied": applied,
        }));

        (status, body).into_response()
    }
}

// Shared state for the Axum application
#[derive(Clone)]
struct AppState {
    engine: Arc<DosingEngine>,
    rest_api_shutdown_tx: Arc<Mutex<Option<oneshot::Sender<()>>>>,
}

#[derive(Debug, Deserialize)]
pub struct ExecuteDoseRequest {
    pub patient_id: i32,
    pub ml: f64,
    pub witness_signature: String,
    pub performed_by: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct IssueKitRequest {
    pub issued_by: Option<String>,
    pub seal_batch: Option<String>,
    pub source_bottle: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ReturnIntakeRequest {
    pub bottle_uid: String,
    pub seal_intact: bool,
    pub residue_ml_est: f64,
    pub notes: Option<String>,
    pub outcome: InspectionOutcome,
    pub inspector_id: Option<String>,
}

// Handler for the /api/v1/dose/execute endpoint
async fn execute_dose_handler(
    State(state): State<AppState>,
    Json(payload): Json<ExecuteDoseRequest>,
) -> Result<Json<Value>, RestApiError> {
    let performed_by = payload
        .performed_by
        .filter(|a| !a.trim().is_empty())
        .ok_or_else(|| RestApiError::InvalidInput("performed_by is required".to_string()))?;

    let event = state
        .engine
        .execute_dose(
            &performed_by,
            payload.patient_id,
            payload.ml,
            &payload.witness_signature,
            None,
        )
        .await?;

    // An aborted dispense is a valid result, not an error: the dose event
    // itself is real data even when the hardware failed.
    Ok(Json(json!({
        "status": "success",
        "dose_event_id": event.id,
        "actual_ml": event.dispensed_ml,
        "outcome": event.outcome,
        "device_events": event.device_events,
    })))
}

// Handler for the /api/v1/takehome/kits/:order_id/issue endpoint
async fn issue_kit_handler(
    State(state): State<AppState>,
    Path(order_id): Path<i32>,
    payload: Option<Json<IssueKitRequest>>,
) -> Result<Json<Value>, RestApiError> {
    let payload = payload.map(|Json(p)| p).unwrap_or_default();
    let issued_by = payload
        .issued_by
        .filter(|a| !a.trim().is_empty())
        .ok_or_else(|| RestApiError::InvalidInput("issued_by is required".to_string()))?;

    let (kit, doses) = state
        .engine
        .issue_kit(order_id, &issued_by, payload.seal_batch, payload.source_bottle)
        .await?;

    Ok(Json(json!({
        "status": "success",
        "kit": {
            "id": kit.id,
            "issue_time": kit.issue_time,
            "issued_by": kit.issued_by,
            "seal_batch": kit.seal_batch,
            "source_bottle": kit.source_bottle,
            "status": kit.status,
            "doses": doses,
        },
    })))
}

// Handler for the /api/v1/takehome/returns/intake endpoint
async fn return_intake_handler(
    State(state): State<AppState>,
    Json(payload): Json<ReturnIntakeRequest>,
) -> Result<Json<Value>, RestApiError> {
    let inspector_id = payload
        .inspector_id
        .filter(|a| !a.trim().is_empty())
        .ok_or_else(|| RestApiError::InvalidInput("inspector_id is required".to_string()))?;

    let (inspection, compliance_action) = state
        .engine
        .process_return(
            &payload.bottle_uid,
            payload.seal_intact,
            payload.residue_ml_est,
            payload.notes.as_deref().unwrap_or(""),
            payload.outcome,
            &inspector_id,
        )
        .await?;

    Ok(Json(json!({
        "status": "success",
        "inspection": inspection,
        "compliance_action": compliance_action,
    })))
}

// Handler for the /api/v1/patients/:patient_id/holds endpoint. Consumed by
// the external dosing workflow to decide whether to authorize a dispense.
async fn patient_holds_handler(
    State(state): State<AppState>,
    Path(patient_id): Path<i32>,
) -> Result<Json<Value>, RestApiError> {
    let holds = state.engine.blocking_holds(patient_id).await?;
    Ok(Json(json!({
        "status": "success",
        "patient_id": patient_id,
        "dosing_blocked": !holds.is_empty(),
        "holds": holds,
    })))
}

// Handler for the /api/v1/health endpoint
async fn health_check_handler() -> (StatusCode, Json<Value>) {
    (StatusCode::OK, Json(json!({ "status": "ok", "message": "Dosing REST API is healthy" })))
}

// Handler for the /api/v1/version endpoint
async fn version_handler() -> (StatusCode, Json<Value>) {
    (StatusCode::OK, Json(json!({ "version": "0.1.0", "api_level": 1 })))
}

// Handler for the /api/v1/shutdown endpoint
async fn shutdown_handler(State(state): State<AppState>) -> Result<Json<Value>, RestApiError> {
    let mut tx_guard = state.rest_api_shutdown_tx.lock().await;
    if let Some(tx) = tx_guard.take() {
        let _ = tx.send(());
        Ok(Json(json!({
            "status": "success",
            "message": "Shutting down REST API server."
        })))
    } else {
        Err(RestApiError::GeneralError(
            "Shutdown signal already sent or not available.".to_string(),
        ))
    }
}

// Main function to start the REST API server
pub async fn start_server(
    host: &str,
    port: u16,
    shutdown_rx: oneshot::Receiver<()>,
    engine: Arc<DosingEngine>,
) -> anyhow::Result<()> {
    let app_state = AppState {
        engine,
        rest_api_shutdown_tx: Arc::new(Mutex::new(None)),
    };

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_origin(Any);

    let app = Router::new()
        .route("/api/v1/dose/execute", post(execute_dose_handler))
        .route("/api/v1/takehome/kits/:order_id/issue", post(issue_kit_handler))
        .route("/api/v1/takehome/returns/intake", post(return_intake_handler))
        .route("/api/v1/patients/:patient_id/holds", get(patient_holds_handler))
        .route("/api/v1/health", get(health_check_handler))
        .route("/api/v1/version", get(version_handler))
        .route("/api/v1/shutdown", get(shutdown_handler))
        .with_state(app_state.clone())
        .layer(cors);

    let addr: SocketAddr = format!("{}:{}", host, port)
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid listen address {}:{}: {}", host, port, e))?;
    log::info!("Dosing REST API server listening on {}", addr);

    let (tx, rx_internal) = oneshot::channel();
    *app_state.rest_api_shutdown_tx.lock().await = Some(tx);

    let combined_shutdown_signal = async {
        tokio::select! {
            _ = shutdown_rx => {
                log::info!("Received external shutdown signal.");
            }
            _ = rx_internal => {
                log::info!("Received internal shutdown signal.");
            }
        }
    };

    let listener = TcpListener::bind(&addr).await?;

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(combined_shutdown_signal)
        .await?;

    log::info!("REST API server stopped.");
    Ok(())
}
