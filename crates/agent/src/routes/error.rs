//! Maps the host-wide error taxonomy onto HTTP status codes and a uniform
//! JSON error body (section 7).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use flynn_core::HostError;
use flynn_store::JobsError;
use serde::Serialize;

#[derive(Debug)]
pub struct ApiError(HostError);

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    retry: bool,
}

impl From<HostError> for ApiError {
    fn from(e: HostError) -> Self {
        ApiError(e)
    }
}

impl From<JobsError> for ApiError {
    fn from(e: JobsError) -> Self {
        let mapped = match e {
            JobsError::AlreadyExists(id) => HostError::Conflict(format!("job {id} already exists")),
            JobsError::NotFound(id) => HostError::NotFound(format!("job {id} not found")),
            JobsError::IllegalTransition { id, from, to } => {
                HostError::Conflict(format!("job {id} cannot transition from {from} to {to}"))
            }
            JobsError::Backend(msg) => HostError::Fatal(msg),
        };
        ApiError(mapped)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            HostError::Validation(_) => StatusCode::BAD_REQUEST,
            HostError::NotFound(_) => StatusCode::NOT_FOUND,
            HostError::Conflict(_) => StatusCode::CONFLICT,
            HostError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            HostError::Unauthorized => StatusCode::UNAUTHORIZED,
            HostError::Transient(_) => StatusCode::SERVICE_UNAVAILABLE,
            HostError::Fatal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = ErrorBody { error: self.0.to_string(), retry: self.0.is_retryable() };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn already_exists_maps_to_conflict() {
        let id = flynn_core::job::JobId::new();
        let api: ApiError = JobsError::AlreadyExists(id).into();
        assert!(matches!(api.0, HostError::Conflict(_)));
    }

    #[test]
    fn not_found_job_error_maps_to_not_found() {
        let id = flynn_core::job::JobId::new();
        let api: ApiError = JobsError::NotFound(id).into();
        assert!(matches!(api.0, HostError::NotFound(_)));
    }
}
