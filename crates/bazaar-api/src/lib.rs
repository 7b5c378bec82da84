//! HTTP API for the Bazaar marketplace: auth, listings, users and messaging
//! services plus the axum handlers and router that expose them.

pub mod auth;
pub mod error;
pub mod extract;
pub mod listings;
pub mod messages;
pub mod middleware;
pub mod routes;
pub mod state;
pub mod storage;
pub mod users;

pub use error::{ApiError, ApiResult};
pub use routes::router;
pub use state::{AppState, AppStateInner};
