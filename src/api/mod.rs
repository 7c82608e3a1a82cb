//! HTTP submission and status API plus inbound-event ingress.

pub mod error;
pub mod routes;

pub use error::{ApiError, ApiResult};
pub use routes::{AppState, api_routes};
