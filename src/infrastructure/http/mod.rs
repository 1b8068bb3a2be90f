//! HTTP surface.

pub mod middleware;
pub mod server;

pub use middleware::{idempotency_middleware, IdempotencyLayerState};
pub use server::{router, serve, AppState};
