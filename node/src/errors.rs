// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use experience_fabric::FabricError;
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Fabric(#[from] FabricError),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Internal server error")]
    Internal,
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Fabric(e) => match e {
                FabricError::PolicyViolation { .. } => StatusCode::FORBIDDEN,
                FabricError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
                FabricError::InvalidSignal | FabricError::InvalidConfig(_) => StatusCode::BAD_REQUEST,
                FabricError::SinkSaturated { .. } | FabricError::Closed => StatusCode::SERVICE_UNAVAILABLE,
                FabricError::Io(_)
                | FabricError::Codec(_)
                | FabricError::SequenceGap { .. }
                | FabricError::ArchiveCorrupted { .. } => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
            ApiError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            ApiError::Fabric(e) => e.kind(),
            ApiError::InvalidInput(_) => "invalid_input",
            ApiError::Internal => "internal",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        }

        let body = Json(json!({
            "error": self.to_string(),
            "kind": self.kind(),
        }));

        (status, body).into_response()
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(e: tokio::task::JoinError) -> Self {
        tracing::error!("Blocking task failed: {}", e);
        ApiError::Internal
    }
}
