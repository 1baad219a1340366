use parley_types::events::FrameError;
use thiserror::Error;

/// Why a credential was refused. Always fatal to the connection.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid or expired token: {0}")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),

    #[error("token subject is not a user id: {0}")]
    MalformedSubject(String),

    #[error("user {0} does not exist")]
    UnknownUser(i64),

    #[error("user lookup failed: {0}")]
    Lookup(String),
}

/// The durable store refused or failed an operation.
#[derive(Debug, Error)]
#[error("storage failure: {message}")]
pub struct StorageError {
    pub message: String,
}

impl StorageError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<anyhow::Error> for StorageError {
    fn from(e: anyhow::Error) -> Self {
        Self::new(format!("{:#}", e))
    }
}

/// Failures inside the gateway. Only `AuthFailure` ends a connection on
/// purpose; the rest are per-frame or per-delivery.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("authentication failed: {0}")]
    AuthFailure(#[from] AuthError),

    #[error("malformed frame: {0}")]
    MalformedFrame(#[from] FrameError),

    #[error(transparent)]
    StorageFailure(#[from] StorageError),

    #[error("delivery to user {user_id} timed out")]
    DeliveryTimeout { user_id: i64 },

    #[error("connection closed")]
    Disconnected,
}
