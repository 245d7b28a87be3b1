//! Control-plane HTTP surface: model admission, cluster status, recipe and
//! settings CRUD, and the data-plane proxy entry point (§6). Laid out as an
//! `app.rs` state/router split plus a `routes/` module per resource.

pub mod app;
pub mod error;
pub mod exec_mode;
pub mod group_spec;
pub mod health_check;
pub mod placement;
pub mod routes;

pub use app::{router, run_serve, run_serve_on_listener, AppState, Runtime};
pub use error::AppError;
