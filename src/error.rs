use thiserror::Error;

/// Result type for device operations
pub type Result<T> = std::result::Result<T, DeviceError>;

/// Errors that can occur when discovering or controlling Sony audio devices
#[derive(Error, Debug)]
pub enum DeviceError {
    /// The device answered a request with an `error` field.
    /// Error codes are documented in the Audio Control API error-code reference.
    #[error("device API error (code {code}): {message}")]
    Api {
        /// Device-reported error code, 1 when the device did not specify one
        code: i64,
        /// Diagnostic message built from the error payload
        message: String,
    },

    /// The requested method/version pair is absent from the device's
    /// capability matrix; the request was never sent (API error code 14)
    #[error("unsupported API version: {0}")]
    UnsupportedVersion(String),

    /// A real device, but not of a product category this crate supports.
    /// Raised only during device construction and fatal to that registration.
    #[error("incompatible device category: {0}")]
    IncompatibleCategory(String),

    /// WebSocket transport error
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// HTTP transport error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Device description XML could not be parsed
    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::DeError),

    /// URL construction error
    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Connection was closed unexpectedly
    #[error("connection closed")]
    ConnectionClosed,

    /// Structurally unexpected response from the device
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// The device description did not advertise an IRCC control service
    #[error("remote control service not available")]
    RemoteControlUnavailable,

    /// Event channel error
    #[error("channel error: {0}")]
    Channel(String),
}

impl DeviceError {
    /// The API error code carried by this error, if it maps onto the
    /// device error-code space.
    pub fn api_code(&self) -> Option<i64> {
        match self {
            DeviceError::Api { code, .. } => Some(*code),
            DeviceError::UnsupportedVersion(_) => Some(14),
            _ => None,
        }
    }
}
