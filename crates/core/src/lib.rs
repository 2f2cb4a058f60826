pub mod config;
pub mod util;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};

pub enum AppError {
    Status(StatusCode),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            Self::Status(status) if status == StatusCode::NOT_FOUND => {
                (status, "Not found").into_response()
            }
            Self::Status(status) if status == StatusCode::METHOD_NOT_ALLOWED => {
                (status, "Invalid method").into_response()
            }
            Self::Status(status) => status.into_response(),
        }
    }
}
