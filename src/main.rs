use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::{OpenApi, ToSchema};
use uuid::Uuid;

use lme_core::constants::DISEASE_CODE_FIELD;
use lme_core::{
    flag_from_env_value, resolve_scratch_dir, selection_backend_from_env_value, CoreConfig,
    DocumentError, DocumentService, ErrorCategory, MedicationCatalogue, PackagedDocument,
    ProtocolRegistry,
};
use lme_types::SubmissionData;

const DEFAULT_REST_ADDR: &str = "0.0.0.0:3000";
const DEFAULT_BASE_TEMPLATE: &str = "lme_base.pdf";

/// Application state shared across REST API handlers
#[derive(Clone)]
struct AppState {
    service: Arc<DocumentService>,
    protocols: Arc<ProtocolRegistry>,
    medications: Arc<MedicationCatalogue>,
}

#[derive(Serialize, ToSchema)]
struct HealthRes {
    status: String,
    protocols: usize,
}

#[derive(Deserialize, ToSchema)]
struct GenerateDocumentReq {
    /// Flat field map of the LME form. `cid` selects the protocol.
    #[schema(value_type = Object)]
    submission: SubmissionData,
}

#[derive(Serialize, ToSchema)]
struct ErrorRes {
    error: String,
    request_id: String,
}

#[derive(OpenApi)]
#[openapi(
    paths(health, generate_document),
    components(schemas(HealthRes, GenerateDocumentReq, ErrorRes))
)]
struct ApiDoc;

/// Main entry point for the LME document service
///
/// # Environment Variables
/// - `LME_REST_ADDR`: REST server address (default: "0.0.0.0:3000")
/// - `LME_TEMPLATE_DIR`: template root, one directory per protocol (required)
/// - `LME_BASE_TEMPLATE`: base LME template, relative to the template root (default: "lme_base.pdf")
/// - `LME_REPORT_TEMPLATE` / `LME_EXAMS_TEMPLATE`: optional report and exam request templates
/// - `LME_PROTOCOL_DIR`: directory of protocol YAML/JSON files (required)
/// - `LME_MEDICATIONS_FILE`: medication catalogue YAML/JSON file (required)
/// - `LME_SCRATCH_DIR`: scratch directory (default: /dev/shm)
/// - `LME_PDFTK_BIN`: pdftk executable (default: "pdftk")
/// - `LME_SELECTION_BACKEND`: "declarative" (default) or "directory-glob"
/// - `LME_FLATTEN` / `LME_PROPAGATE_FILL_FAILURES`: on/off switches
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive("lme=info".parse()?))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let state = build_state()?;
    let rest_addr = std::env::var("LME_REST_ADDR").unwrap_or_else(|_| DEFAULT_REST_ADDR.into());

    tracing::info!("++ Starting LME REST on {}", rest_addr);

    let app = router(state);
    let listener = tokio::net::TcpListener::bind(&rest_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn required_env(name: &str) -> anyhow::Result<String> {
    std::env::var(name).map_err(|_| anyhow::anyhow!("{name} must be set"))
}

fn optional_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn build_state() -> anyhow::Result<AppState> {
    let template_dir = PathBuf::from(required_env("LME_TEMPLATE_DIR")?);
    let base_template = optional_env("LME_BASE_TEMPLATE").unwrap_or_else(|| DEFAULT_BASE_TEMPLATE.into());
    let scratch_dir = resolve_scratch_dir(optional_env("LME_SCRATCH_DIR").map(PathBuf::from))?;

    let mut config = CoreConfig::new(template_dir, PathBuf::from(base_template), scratch_dir)?
        .with_report_template(optional_env("LME_REPORT_TEMPLATE").map(PathBuf::from))
        .with_exams_template(optional_env("LME_EXAMS_TEMPLATE").map(PathBuf::from))
        .with_selection_backend(selection_backend_from_env_value(optional_env("LME_SELECTION_BACKEND"))?)
        .with_flatten(flag_from_env_value(optional_env("LME_FLATTEN"), true)?)
        .with_propagate_fill_failures(flag_from_env_value(
            optional_env("LME_PROPAGATE_FILL_FAILURES"),
            false,
        )?);
    if let Some(bin) = optional_env("LME_PDFTK_BIN") {
        config = config.with_pdftk_bin(PathBuf::from(bin));
    }

    let protocols = ProtocolRegistry::load_dir(&PathBuf::from(required_env("LME_PROTOCOL_DIR")?))?;
    let medications = MedicationCatalogue::load(&PathBuf::from(required_env("LME_MEDICATIONS_FILE")?))?;
    if protocols.is_empty() {
        tracing::warn!("no protocols configured, every request will be rejected");
    }

    tracing::info!(
        templates = %config.template_root().display(),
        scratch = %config.scratch_dir().display(),
        backend = ?config.selection_backend(),
        "configuration resolved"
    );

    Ok(AppState {
        service: Arc::new(DocumentService::from_config(&config)?),
        protocols: Arc::new(protocols),
        medications: Arc::new(medications),
    })
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/documents", post(generate_document))
        .route("/api-docs/openapi.json", get(openapi))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn openapi() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Health check response", body = HealthRes)
    )
)]
/// Health check endpoint, reporting how many disease codes have a protocol.
async fn health(State(state): State<AppState>) -> Json<HealthRes> {
    Json(HealthRes {
        status: "ok".into(),
        protocols: state.protocols.disease_codes().count(),
    })
}

#[utoipa::path(
    post,
    path = "/documents",
    request_body = GenerateDocumentReq,
    responses(
        (status = 200, description = "Generated LME document", content_type = "application/pdf"),
        (status = 404, description = "No protocol for the disease code", body = ErrorRes),
        (status = 422, description = "Submission data is invalid", body = ErrorRes),
        (status = 500, description = "Document could not be generated", body = ErrorRes)
    )
)]
/// Generate the LME document for one submission
///
/// Generation shells out to the form-filling tool, so it runs on the blocking pool.
async fn generate_document(
    State(state): State<AppState>,
    Json(req): Json<GenerateDocumentReq>,
) -> Result<Response, ApiError> {
    let request_id = Uuid::new_v4();
    let span = tracing::info_span!("document_request", %request_id);

    let result = tokio::task::spawn_blocking(move || {
        let _guard = span.enter();
        generate_blocking(&state, req.submission)
    })
    .await;

    match result {
        Ok(Ok(document)) => document_response(document, request_id),
        Ok(Err(error)) => Err(ApiError::from_document(error, request_id)),
        Err(join_error) => {
            tracing::error!(%request_id, error = %join_error, "generation task failed");
            Err(ApiError::internal(request_id))
        }
    }
}

fn generate_blocking(state: &AppState, submission: SubmissionData) -> Result<PackagedDocument, DocumentError> {
    let disease_code = submission
        .rendered(DISEASE_CODE_FIELD)
        .ok_or_else(|| DocumentError::MissingField(DISEASE_CODE_FIELD.into()))?;
    let protocol = state.protocols.resolve(&disease_code)?;

    state
        .service
        .generate(protocol, state.medications.as_ref(), submission)
}

fn document_response(document: PackagedDocument, request_id: Uuid) -> Result<Response, ApiError> {
    let disposition = HeaderValue::from_str(&document.content_disposition()).map_err(|_| {
        tracing::error!(%request_id, "filename is not a valid header value");
        ApiError::internal(request_id)
    })?;

    tracing::info!(
        %request_id,
        size_bytes = document.metadata().size_bytes,
        sha256 = %document.metadata().sha256,
        "document delivered"
    );

    let content_type = document.content_type();
    let length = document.bytes().len();
    let mut response = Response::new(Body::from(document.into_bytes()));
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    headers.insert(header::CONTENT_DISPOSITION, disposition);
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
    headers.insert(header::X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("SAMEORIGIN"));
    if let Ok(id) = HeaderValue::from_str(&request_id.to_string()) {
        headers.insert("x-request-id", id);
    }

    Ok(response)
}

struct ApiError {
    status: StatusCode,
    message: String,
    request_id: Uuid,
}

impl ApiError {
    fn from_document(error: DocumentError, request_id: Uuid) -> Self {
        let status = status_for(&error);
        if status.is_server_error() {
            tracing::error!(%request_id, error = %error, "document generation failed");
        } else {
            tracing::warn!(%request_id, error = %error, "document request rejected");
        }
        Self {
            status,
            message: error.user_message(),
            request_id,
        }
    }

    fn internal(request_id: Uuid) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: DocumentError::NoContentProduced.user_message(),
            request_id,
        }
    }
}

fn status_for(error: &DocumentError) -> StatusCode {
    if let DocumentError::ProtocolNotFound(_) = error {
        return StatusCode::NOT_FOUND;
    }
    match error.category() {
        ErrorCategory::Data => StatusCode::UNPROCESSABLE_ENTITY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorRes {
                error: self.message,
                request_id: self.request_id.to_string(),
            }),
        )
            .into_response()
    }
}
