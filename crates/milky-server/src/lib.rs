//! HTTP operator surface for the companion engine.

pub mod error;
pub mod handlers;
pub mod health;
pub mod server;
pub mod shutdown;

pub use error::{ApiError, ApiResult};
pub use server::{AppState, MilkyServer};
pub use shutdown::ShutdownCoordinator;
