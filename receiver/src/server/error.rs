//! HTTP mapping of receiver errors.

use std::time::Duration;

use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};

use crate::error::Error;

/// Error returned by the HTTP handlers.
///
/// Bodies are plain text so remote-write clients can log them verbatim.
#[derive(Debug)]
pub struct ApiError {
    error: Error,
    retry_after: Option<Duration>,
}

impl ApiError {
    /// Refusal from the memory gate, telling clients when to come back.
    pub fn memory_full(retry_after: Duration) -> Self {
        Self {
            error: Error::MemoryFull,
            retry_after: Some(retry_after),
        }
    }

    pub fn status(&self) -> StatusCode {
        match &self.error {
            Error::Decode { .. } | Error::SampleRejected(_) | Error::InvalidConfig(_) => {
                StatusCode::BAD_REQUEST
            }
            Error::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Error::Transport(_) | Error::Encode(_) | Error::Commit(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Error::MemoryFull => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Label for `remote_write_request_errors_total`, `None` for refusals.
    pub fn reason(&self) -> Option<&'static str> {
        match &self.error {
            Error::Transport(_) => Some("http_read"),
            Error::PayloadTooLarge { .. } => Some("too_large"),
            Error::Decode { stage, .. } => Some(stage.as_str()),
            Error::SampleRejected(_) => Some("append"),
            Error::Commit(_) => Some("commit"),
            Error::Encode(_) | Error::InvalidConfig(_) | Error::MemoryFull => None,
        }
    }
}

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        Self {
            error,
            retry_after: None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let mut response = (status, format!("{}\n", self.error)).into_response();
        if let Some(retry_after) = self.retry_after {
            let secs = retry_after.as_secs().max(1);
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use common::{AppendError, StorageError};

    use super::*;
    use crate::error::DecodeStage;

    #[test]
    fn should_map_errors_to_status_codes() {
        let cases = [
            (Error::Transport("reset".into()), StatusCode::INTERNAL_SERVER_ERROR),
            (Error::PayloadTooLarge { limit: 10 }, StatusCode::PAYLOAD_TOO_LARGE),
            (
                Error::Decode {
                    stage: DecodeStage::Decompress,
                    message: "corrupt input".into(),
                },
                StatusCode::BAD_REQUEST,
            ),
            (
                Error::SampleRejected(AppendError::OutOfOrderSample),
                StatusCode::BAD_REQUEST,
            ),
            (
                Error::Commit(StorageError::Storage("disk full".into())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (error, expected) in cases {
            assert_eq!(ApiError::from(error).status(), expected);
        }
    }

    #[test]
    fn should_label_decode_errors_by_stage() {
        // given
        let error = ApiError::from(Error::Decode {
            stage: DecodeStage::Deserialize,
            message: "invalid wire type".into(),
        });

        // when/then
        assert_eq!(error.reason(), Some("deserialize"));
    }

    #[test]
    fn should_set_retry_after_on_memory_full() {
        // given
        let error = ApiError::memory_full(Duration::from_secs(10));

        // when
        let response = error.into_response();

        // then
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.headers()[header::RETRY_AFTER], "10");
    }

    #[test]
    fn should_round_sub_second_retry_after_up() {
        // given
        let error = ApiError::memory_full(Duration::from_millis(200));

        // when
        let response = error.into_response();

        // then
        assert_eq!(response.headers()[header::RETRY_AFTER], "1");
    }
}
