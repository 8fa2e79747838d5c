/// Uniform JSON envelope for API responses
///
/// Every response body the service produces, success or failure, has the
/// shape `{ "code": <status>, "data": <payload or null>, "message": <text> }`.

use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub code: u16,
    pub data: Option<T>,
    pub message: String,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn new(code: u16, data: T, message: impl Into<String>) -> Self {
        Self {
            code,
            data: Some(data),
            message: message.into(),
        }
    }
}

impl ApiResponse<()> {
    /// Envelope with no payload, used for errors and data-free successes.
    pub fn message_only(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            data: None,
            message: message.into(),
        }
    }
}
