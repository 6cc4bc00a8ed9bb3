//! Postroom
//!
//! Outbound mail queue service: a failure-aware startup sequence (config →
//! database → background services → OpenAPI route table → realtime socket →
//! listener), background mail delivery and archive retention.
//!
//! ## Standalone
//!
//! Run the binary:
//! ```bash
//! POSTROOM_DATABASE_URL=postgres://localhost/postroom POSTROOM_MAIN_PORT=4000 postroom-server
//! ```
//!
//! ## Embedded (Axum)
//!
//! When the `server` feature is enabled, the route table can be mounted into a larger Axum app:
//! ```rust,ignore
//! use axum::Router;
//! use postroom::server::{router, AppState};
//!
//! let state: AppState = build_state_somehow();
//! let app = Router::new().nest("/postroom", router(state)?);
//! ```

pub mod application;
pub mod domain;
pub mod infrastructure;

// Standalone + embedded HTTP server support (Axum).
// Enabled behind the `server` feature so the core library can be used without Axum.
#[cfg(feature = "server")]
pub mod server;

pub use application::*;
pub use domain::*;
pub use infrastructure::*;
