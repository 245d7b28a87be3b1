//! Route handlers, one module per resource (§6).

pub mod cluster;
pub mod healthz;
pub mod models;
pub mod proxy;
pub mod recipes;
