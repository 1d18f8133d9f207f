use thiserror::Error;

use crate::auth::AuthError;
use crate::store::StoreError;

/// Failure of a single user or admin action.
///
/// Every variant is scoped to the request that produced it; nothing here is
/// fatal to the process.
#[derive(Debug, Error)]
pub enum ShipmentError {
    #[error("{field} is required")]
    MissingField { field: &'static str },

    #[error("invalid {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    /// Body or path the router could not decode. `status` is the HTTP
    /// status the decoder chose.
    #[error("malformed request: {message}")]
    MalformedRequest { status: u16, message: String },

    #[error("Shipment not found")]
    NotFound,

    #[error("sign in required")]
    Unauthenticated,

    #[error("admin access required")]
    Forbidden,

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ShipmentError {
    pub fn missing(field: &'static str) -> Self {
        Self::MissingField { field }
    }

    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field,
            reason: reason.into(),
        }
    }

    /// True for errors the caller can fix by changing the submitted data.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::MissingField { .. } | Self::InvalidField { .. } | Self::MalformedRequest { .. }
        )
    }
}
