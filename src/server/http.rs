use super::extract::JsonOrForm;
use super::http_errors::{map_enqueue_error, map_mail_read_error};
use super::http_types::{
    EnqueueMailRequest, EnqueueMailResponse, HealthResponse, MailResponse, StatusResponse,
};
use super::state::AppState;
use crate::domain::{OutboundMail, RealtimeEvent};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{on, MethodFilter, MethodRouter},
    Json,
};
use std::collections::HashMap;
use tracing::{error, info};
use utoipa::OpenApi;
use uuid::Uuid;
use validator::Validate;

/// Binds one operation to the HTTP method its description declares.
pub(super) type HandlerFactory = fn(MethodFilter) -> MethodRouter<AppState>;

/// Every handler an API description may reference, keyed by operation id.
pub(super) fn handler_table() -> HashMap<&'static str, HandlerFactory> {
    let mut table: HashMap<&'static str, HandlerFactory> = HashMap::new();
    table.insert("health_check", |method| on(method, health_check));
    table.insert("service_status", |method| on(method, service_status));
    table.insert("enqueue_mail", |method| on(method, enqueue_mail));
    table.insert("get_mail", |method| on(method, get_mail));
    table
}

#[derive(OpenApi)]
#[openapi(
    paths(health_check, service_status, enqueue_mail, get_mail),
    components(
        schemas(
            HealthResponse,
            StatusResponse,
            EnqueueMailRequest,
            EnqueueMailResponse,
            MailResponse,
        )
    ),
    tags(
        (name = "Health", description = "Health and startup status endpoints"),
        (name = "Mail", description = "Outbound mail queue endpoints"),
    ),
    info(
        title = "Postroom API",
        version = "0.1.0",
        description = "Outbound mail queue with background delivery and archive retention",
        license(name = "MIT")
    )
)]
pub(super) struct ApiDoc;

/// Health check endpoint
///
/// Verifies database connectivity and returns service health status.
#[utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse),
        (status = 503, description = "Service is unhealthy", body = HealthResponse)
    )
)]
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.db.probe.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "healthy".to_string(),
                error: None,
            }),
        ),
        Err(e) => {
            error!(error = %e, "Health check failed: DB connectivity issue");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "unhealthy".to_string(),
                    error: Some("Database connectivity failed".to_string()),
                }),
            )
        }
    }
}

/// Startup phase, background service counters and realtime client count
#[utoipa::path(
    get,
    path = "/status",
    tag = "Health",
    responses((status = 200, description = "Current service status", body = StatusResponse))
)]
async fn service_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(StatusResponse {
        phase: state.phase.get().to_string(),
        cors_insecure: state.config.enable_cors_insecurely,
        realtime_clients: state.hub.connected_clients(),
        services: state.services.snapshot(),
    })
}

/// Queue a mail for background delivery
#[utoipa::path(
    post,
    path = "/mail",
    tag = "Mail",
    request_body(
        content = EnqueueMailRequest,
        content_type = "application/json",
        description = "Also accepted as application/x-www-form-urlencoded"
    ),
    responses(
        (status = 201, description = "Mail queued", body = EnqueueMailResponse),
        (status = 400, description = "Invalid mail request", body = Object),
        (status = 415, description = "Unsupported content type", body = Object),
        (status = 500, description = "Failed to queue mail", body = Object)
    )
)]
async fn enqueue_mail(
    State(state): State<AppState>,
    JsonOrForm(req): JsonOrForm<EnqueueMailRequest>,
) -> impl IntoResponse {
    if let Err(errors) = req.validate() {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": "Invalid mail request", "details": errors})),
        );
    }

    let mail = OutboundMail::new(req.recipient, req.subject, req.body);
    if let Err(e) = state.db.mail.enqueue(&mail).await {
        error!(error = %e, "Failed to queue mail");
        let (status, body) = map_enqueue_error(&e);
        return (status, Json(body));
    }

    info!(mail_id = %mail.id, "Mail queued");
    state.hub.publish(RealtimeEvent::MailQueued {
        id: mail.id,
        recipient: mail.recipient.clone(),
    });

    (
        StatusCode::CREATED,
        Json(serde_json::json!(EnqueueMailResponse {
            id: mail.id,
            status: mail.status.to_string(),
        })),
    )
}

#[utoipa::path(
    get,
    path = "/mail/{id}",
    tag = "Mail",
    params(("id" = Uuid, Path, description = "Mail ID")),
    responses(
        (status = 200, description = "Mail found", body = MailResponse),
        (status = 404, description = "Mail not found", body = Object),
        (status = 500, description = "Failed to get mail", body = Object)
    )
)]
async fn get_mail(State(state): State<AppState>, Path(id): Path<Uuid>) -> impl IntoResponse {
    match state.db.mail.get_by_id(id).await {
        Ok(mail) => (StatusCode::OK, Json(serde_json::json!(MailResponse::from(mail)))),
        Err(e) => {
            let (status, body) = map_mail_read_error(&e);
            (status, Json(body))
        }
    }
}
