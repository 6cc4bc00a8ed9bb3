use axum::{
    async_trait,
    extract::{FromRequest, Request},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Form, Json,
};
use serde::de::DeserializeOwned;

/// Request body accepted as either JSON or an URL-encoded form.
pub struct JsonOrForm<T>(pub T);

enum BodyKind {
    Json,
    Form,
    Other,
}

#[async_trait]
impl<S, T> FromRequest<S> for JsonOrForm<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let kind = match req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
        {
            Some(ct) if ct.starts_with("application/json") => BodyKind::Json,
            Some(ct) if ct.starts_with("application/x-www-form-urlencoded") => BodyKind::Form,
            _ => BodyKind::Other,
        };

        match kind {
            BodyKind::Json => {
                let Json(value) = Json::<T>::from_request(req, state)
                    .await
                    .map_err(IntoResponse::into_response)?;
                Ok(Self(value))
            }
            BodyKind::Form => {
                let Form(value) = Form::<T>::from_request(req, state)
                    .await
                    .map_err(IntoResponse::into_response)?;
                Ok(Self(value))
            }
            BodyKind::Other => Err((
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
                Json(serde_json::json!({
                    "error": "Unsupported content type",
                    "allowed": ["application/json", "application/x-www-form-urlencoded"]
                })),
            )
                .into_response()),
        }
    }
}
