//! HTTP-boundary error mapping: every route returns `Result<_, AppError>`,
//! and `AppError` is the only place outside `fabric_core::error::ApiError`
//! that knows about status codes, grounded on the same single-boundary
//! rule `ApiError` already applies inside `fabric-core`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use fabric_core::error::{ClusterStatusError, CommandBuildError, ExecError, GroupError, InventoryError};
use fabric_core::ApiError;
use fabric_model::RecipeError;
use fabric_store::StoreError;
use serde::Serialize;

#[derive(Debug)]
pub enum AppError {
    Api(ApiError),
    NotFound(String),
}

impl From<ApiError> for AppError {
    fn from(e: ApiError) -> Self {
        AppError::Api(e)
    }
}

/// Every `fabric-core` taxonomy error converts to `AppError` through
/// `ApiError` — the one HTTP-boundary mapping, never duplicated here.
macro_rules! from_core_taxonomy {
    ($ty:ty) => {
        impl From<$ty> for AppError {
            fn from(e: $ty) -> Self {
                AppError::Api(ApiError::from(e))
            }
        }
    };
}

from_core_taxonomy!(ExecError);
from_core_taxonomy!(InventoryError);
from_core_taxonomy!(GroupError);
from_core_taxonomy!(CommandBuildError);
from_core_taxonomy!(ClusterStatusError);

impl From<RecipeError> for AppError {
    fn from(e: RecipeError) -> Self {
        match e {
            RecipeError::NotFound(r) => AppError::NotFound(format!("unknown recipe ref: {r}")),
            other => AppError::Api(ApiError {
                kind: fabric_core::error::ErrorKind::Config,
                message: other.to_string(),
                trace_id: None,
            }),
        }
    }
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        AppError::Api(ApiError {
            kind: fabric_core::error::ErrorKind::Config,
            message: e.to_string(),
            trace_id: None,
        })
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    #[serde(rename = "traceId", skip_serializing_if = "Option::is_none")]
    trace_id: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message, trace_id) = match self {
            AppError::Api(e) => {
                let status = StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                (status, e.message, e.trace_id.map(|id| id.to_string()))
            }
            AppError::NotFound(message) => (StatusCode::NOT_FOUND, message, None),
        };
        (status, Json(ErrorBody { error: message, trace_id })).into_response()
    }
}
