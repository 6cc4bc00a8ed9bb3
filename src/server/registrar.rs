//! Route table binding from a declarative OpenAPI description.
//!
//! The description is read from `{app_root}/api/openapi.json` when that file
//! exists, otherwise the one generated from the annotated handlers is used.
//! Every operation it declares must resolve to a handler by operation id;
//! anything else fails registration.

use super::http::{handler_table, ApiDoc, HandlerFactory};
use super::socket::SOCKET_PATH;
use super::state::AppState;
use async_trait::async_trait;
use axum::{
    routing::{MethodFilter, MethodRouter},
    Router,
};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;
use utoipa::openapi::{OpenApi as OpenApiDescription, PathItemType};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

pub const DESCRIPTION_FILE: &str = "api/openapi.json";
pub const DOCS_PATH: &str = "/docs";
pub const DESCRIPTION_URL: &str = "/api-docs/openapi.json";

#[derive(Error, Debug)]
pub enum RegistrationError {
    #[error("failed to read API description {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid API description {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("API description declares no operations")]
    Empty,
    #[error("{method} {path} has no operationId")]
    MissingOperationId { method: &'static str, path: String },
    #[error("no handler for operation '{operation_id}' ({method} {path})")]
    MissingHandler {
        operation_id: String,
        method: &'static str,
        path: String,
    },
    #[error("unsupported method {method} on {path}")]
    UnsupportedMethod { method: &'static str, path: String },
    #[error("invalid path '{0}'")]
    InvalidPath(String),
    #[error("paths collide after conversion: {0}")]
    DuplicatePath(String),
    #[error("path '{0}' is reserved for the docs or the realtime channel")]
    ReservedPath(String),
}

/// Builds the HTTP route table that the listener will serve.
#[async_trait]
pub trait ApiRegistrar: Send + Sync {
    async fn register(&self, app_root: &Path, state: AppState) -> Result<Router, RegistrationError>;
}

#[derive(Debug, Default, Clone)]
pub struct OpenApiRegistrar;

#[async_trait]
impl ApiRegistrar for OpenApiRegistrar {
    async fn register(&self, app_root: &Path, state: AppState) -> Result<Router, RegistrationError> {
        let description = load_description(app_root).await?;
        bind_routes(description, &handler_table(), state)
    }
}

/// Route table from the built-in description, for embedding in a host app.
pub fn router(state: AppState) -> Result<Router, RegistrationError> {
    bind_routes(ApiDoc::openapi(), &handler_table(), state)
}

async fn load_description(app_root: &Path) -> Result<OpenApiDescription, RegistrationError> {
    let path = app_root.join(DESCRIPTION_FILE);

    match tokio::fs::read(&path).await {
        Ok(bytes) => {
            info!(path = %path.display(), "Loading API description from disk");
            serde_json::from_slice(&bytes).map_err(|source| RegistrationError::Parse { path, source })
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!("Using built-in API description");
            Ok(ApiDoc::openapi())
        }
        Err(source) => Err(RegistrationError::Read { path, source }),
    }
}

fn bind_routes(
    description: OpenApiDescription,
    handlers: &HashMap<&'static str, HandlerFactory>,
    state: AppState,
) -> Result<Router, RegistrationError> {
    let mut routes: BTreeMap<String, MethodRouter<AppState>> = BTreeMap::new();
    let mut operations = 0usize;

    let mut shapes: HashMap<String, String> = HashMap::new();
    let mut param_names: HashMap<String, (String, String)> = HashMap::new();

    for (path, item) in &description.paths.paths {
        let axum_path = to_axum_path(path)?;
        if is_reserved(&axum_path) {
            return Err(RegistrationError::ReservedPath(path.clone()));
        }
        if let Some(previous) = shapes.insert(route_shape(&axum_path), path.clone()) {
            return Err(RegistrationError::DuplicatePath(format!("{previous} and {path}")));
        }
        check_param_names(&axum_path, path, &mut param_names)?;

        let mut method_router: Option<MethodRouter<AppState>> = None;
        for (item_type, operation) in &item.operations {
            let method = method_name(item_type);
            let filter = method_filter(item_type).ok_or_else(|| {
                RegistrationError::UnsupportedMethod {
                    method,
                    path: path.clone(),
                }
            })?;
            let operation_id = operation.operation_id.as_deref().ok_or_else(|| {
                RegistrationError::MissingOperationId {
                    method,
                    path: path.clone(),
                }
            })?;
            let factory = handlers.get(operation_id).ok_or_else(|| {
                RegistrationError::MissingHandler {
                    operation_id: operation_id.to_string(),
                    method,
                    path: path.clone(),
                }
            })?;

            let bound = factory(filter);
            method_router = Some(match method_router {
                Some(existing) => existing.merge(bound),
                None => bound,
            });
            operations += 1;
        }

        if let Some(method_router) = method_router {
            routes.insert(axum_path, method_router);
        }
    }

    if operations == 0 {
        return Err(RegistrationError::Empty);
    }

    let mut router: Router<AppState> = Router::new();
    for (path, method_router) in routes {
        router = router.route(&path, method_router);
    }

    info!(operations, "API routes registered");

    Ok(router
        .merge(SwaggerUi::new(DOCS_PATH).url(DESCRIPTION_URL, description))
        .with_state(state))
}

/// `/mail/{id}` becomes `/mail/:id`. A template must fill a whole segment.
fn to_axum_path(path: &str) -> Result<String, RegistrationError> {
    let invalid = || RegistrationError::InvalidPath(path.to_string());
    let rest = path.strip_prefix('/').ok_or_else(invalid)?;

    let mut out = String::with_capacity(path.len());
    for segment in rest.split('/') {
        out.push('/');
        match segment.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
            Some(name) => {
                if name.is_empty() || !name.chars().all(is_name_char) {
                    return Err(invalid());
                }
                out.push(':');
                out.push_str(name);
            }
            None => {
                if segment.contains(['{', '}', ':', '*']) {
                    return Err(invalid());
                }
                out.push_str(segment);
            }
        }
    }

    Ok(out)
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

/// Two paths with the same shape match the same requests: `/mail/:id` and
/// `/mail/:key` are both `/mail/:_`.
fn route_shape(axum_path: &str) -> String {
    axum_path
        .split('/')
        .map(|segment| if segment.starts_with(':') { ":_" } else { segment })
        .collect::<Vec<_>>()
        .join("/")
}

/// Templates at the same position must share a name: `/mail/{id}` and
/// `/mail/{key}/raw` cannot both be routed. `seen` maps the shape before a
/// template to its name and the path that introduced it.
fn check_param_names(
    axum_path: &str,
    path: &str,
    seen: &mut HashMap<String, (String, String)>,
) -> Result<(), RegistrationError> {
    let mut prefix = String::new();
    for segment in axum_path.split('/').skip(1) {
        match segment.strip_prefix(':') {
            Some(name) => {
                let (existing, previous) = seen
                    .entry(prefix.clone())
                    .or_insert_with(|| (name.to_string(), path.to_string()));
                if existing.as_str() != name {
                    return Err(RegistrationError::DuplicatePath(format!(
                        "{previous} and {path}"
                    )));
                }
                prefix.push_str("/:_");
            }
            None => {
                prefix.push('/');
                prefix.push_str(segment);
            }
        }
    }
    Ok(())
}

/// Paths mounted next to the API routes: the docs UI, the description and
/// the realtime channel.
fn is_reserved(axum_path: &str) -> bool {
    axum_path == DOCS_PATH
        || axum_path
            .strip_prefix(DOCS_PATH)
            .is_some_and(|rest| rest.starts_with('/'))
        || axum_path == DESCRIPTION_URL
        || axum_path == SOCKET_PATH
}

fn method_filter(item_type: &PathItemType) -> Option<MethodFilter> {
    match item_type {
        PathItemType::Get => Some(MethodFilter::GET),
        PathItemType::Post => Some(MethodFilter::POST),
        PathItemType::Put => Some(MethodFilter::PUT),
        PathItemType::Delete => Some(MethodFilter::DELETE),
        PathItemType::Patch => Some(MethodFilter::PATCH),
        PathItemType::Head => Some(MethodFilter::HEAD),
        PathItemType::Options => Some(MethodFilter::OPTIONS),
        PathItemType::Trace => Some(MethodFilter::TRACE),
        PathItemType::Connect => None,
    }
}

fn method_name(item_type: &PathItemType) -> &'static str {
    match item_type {
        PathItemType::Get => "GET",
        PathItemType::Post => "POST",
        PathItemType::Put => "PUT",
        PathItemType::Delete => "DELETE",
        PathItemType::Patch => "PATCH",
        PathItemType::Head => "HEAD",
        PathItemType::Options => "OPTIONS",
        PathItemType::Trace => "TRACE",
        PathItemType::Connect => "CONNECT",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_openapi_params_to_axum_params() {
        assert_eq!(to_axum_path("/mail/{id}").unwrap(), "/mail/:id");
        assert_eq!(to_axum_path("/a/{x}/b/{y}").unwrap(), "/a/:x/b/:y");
        assert_eq!(to_axum_path("/health").unwrap(), "/health");
    }

    #[test]
    fn rejects_malformed_paths() {
        assert!(to_axum_path("mail").is_err());
        assert!(to_axum_path("/mail/{id").is_err());
        assert!(to_axum_path("/mail/{}").is_err());
        assert!(to_axum_path("/mail/id}").is_err());
        assert!(to_axum_path("/mail/x{id}").is_err());
        assert!(to_axum_path("/mail/{a/b}").is_err());
        assert!(to_axum_path("/mail/:id").is_err());
        assert!(to_axum_path("/mail/*rest").is_err());
    }

    #[test]
    fn templated_segments_share_a_shape() {
        assert_eq!(route_shape("/mail/:id"), route_shape("/mail/:key"));
        assert_eq!(route_shape("/mail/:id"), "/mail/:_");
        assert_ne!(route_shape("/mail/:id"), route_shape("/mail/new"));
    }

    #[test]
    fn template_names_must_agree_by_position() {
        let mut seen = HashMap::new();
        assert!(check_param_names("/mail/:id", "/mail/{id}", &mut seen).is_ok());
        assert!(check_param_names("/mail/:id/raw", "/mail/{id}/raw", &mut seen).is_ok());
        assert!(check_param_names("/mail/new", "/mail/new", &mut seen).is_ok());
        assert!(matches!(
            check_param_names("/mail/:key/raw", "/mail/{key}/raw", &mut seen),
            Err(RegistrationError::DuplicatePath(_))
        ));
    }

    #[test]
    fn mounted_paths_are_reserved() {
        assert!(is_reserved("/docs"));
        assert!(is_reserved("/docs/index.html"));
        assert!(is_reserved(DESCRIPTION_URL));
        assert!(is_reserved(SOCKET_PATH));
        assert!(!is_reserved("/docsearch"));
        assert!(!is_reserved("/mail"));
    }

    #[test]
    fn connect_is_not_routable() {
        assert!(method_filter(&PathItemType::Connect).is_none());
        assert_eq!(method_filter(&PathItemType::Get), Some(MethodFilter::GET));
    }
}
