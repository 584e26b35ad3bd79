use ota_core::OtaError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;

#[cfg(target_os = "espidf")]
use super::HttpRequest;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    NotFound,
    BadRequest,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::BadRequest => "BAD_REQUEST",
        }
    }

    pub fn status(&self) -> u16 {
        match self {
            ErrorCode::NotFound => 404,
            ErrorCode::BadRequest => 400,
        }
    }
}

impl From<&OtaError> for ErrorCode {
    fn from(err: &OtaError) -> Self {
        match err {
            OtaError::FileStore(e) if e.kind() == io::ErrorKind::NotFound => ErrorCode::NotFound,
            _ => ErrorCode::BadRequest,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiError {
    pub code: String,
    pub message: String,
    pub request_id: String,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code.as_str().to_string(),
            message: message.into(),
            request_id: generate_request_id(),
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

/// Error reply for an HTTP handler.
///
/// OTA routes answer with the bare diagnostic text, file routes with a JSON
/// body.
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: ApiError,
    #[serde(skip)]
    status: u16,
}

impl ErrorResponse {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            error: ApiError::new(code, message),
            status: code.status(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::BadRequest, message)
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| format!("{{\"error\":\"{}\"}}", self.error.code))
    }
}

impl From<&OtaError> for ErrorResponse {
    fn from(err: &OtaError) -> Self {
        Self::new(ErrorCode::from(err), err.to_string())
    }
}

#[cfg(target_os = "espidf")]
impl ErrorResponse {
    pub fn send_json(self, req: HttpRequest<'_, '_>) -> anyhow::Result<()> {
        self.send(req, "application/json", self.to_json())
    }

    pub fn send_text(self, req: HttpRequest<'_, '_>) -> anyhow::Result<()> {
        let body = self.error.message.clone();
        self.send(req, "text/plain", body)
    }

    fn send(
        &self,
        req: HttpRequest<'_, '_>,
        content_type: &str,
        body: String,
    ) -> anyhow::Result<()> {
        use embedded_svc::io::Write;

        log::warn!("HTTP {} [{}]: {}", self.status, self.error.request_id, self.error.message);
        // Handlers may already have committed headers
        match req.into_response(
            self.status,
            None,
            &[("Content-Type", content_type), ("Connection", "close")],
        ) {
            Ok(mut response) => {
                if let Err(e) = response.write_all(body.as_bytes()) {
                    log::warn!("Error body for [{}] not sent: {:?}", self.error.request_id, e);
                }
            }
            Err(e) => {
                log::warn!("Error response [{}] not sent: {:?}", self.error.request_id, e);
            }
        }
        Ok(())
    }
}

fn generate_request_id() -> String {
    use std::sync::atomic::{AtomicU32, Ordering};
    static COUNTER: AtomicU32 = AtomicU32::new(0);

    let count = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("req_{:08x}", count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ota_core::SinkError;

    #[test]
    fn test_ota_failures_are_bad_requests() {
        let err = OtaError::SinkFinalizeFailure(SinkError::new(0x1503, "validate failed"));
        let response = ErrorResponse::from(&err);
        assert_eq!(response.status(), 400);
        assert_eq!(response.error.message, err.to_string());
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let err = OtaError::FileStore(io::Error::new(io::ErrorKind::NotFound, "gone"));
        assert_eq!(ErrorResponse::from(&err).status(), 404);
    }

    #[test]
    fn test_json_body() {
        let json = ErrorResponse::bad_request("Missing X-Filename header").to_json();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["error"]["code"], "BAD_REQUEST");
        assert_eq!(value["error"]["message"], "Missing X-Filename header");
        assert!(value.get("status").is_none());
    }

    #[test]
    fn test_request_ids_differ() {
        assert_ne!(generate_request_id(), generate_request_id());
    }
}
