//! Local web API

pub mod messages;
pub mod routes;

pub use routes::{router, ApiError, AppState};
