//! Authentication error types.
//!
//! User-initiated operations (`login`, `handle_callback`, `logout`) surface
//! these errors. Passive checks swallow them and resolve to "logged out".

use std::fmt;

use crate::config::ConfigError;
use crate::discovery::DiscoveryError;

/// Errors raised while completing an authorization callback.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CallbackError {
    /// The callback URL carries no authorization code.
    #[error("Authorization code missing from callback URL")]
    MissingCode,

    /// No pending login (code verifier) exists in storage.
    #[error("No pending login: code verifier not found")]
    MissingVerifier,

    /// The returned `state` is absent or does not match the stored nonce.
    #[error("State mismatch: authorization response does not belong to this login")]
    StateMismatch,

    /// The token endpoint or the claims fetch failed.
    #[error("Token exchange failed: {0}")]
    TokenExchangeFailed(String),

    /// A callback is already being processed or has completed.
    #[error("Callback already handled")]
    AlreadyHandled,
}

impl CallbackError {
    /// Creates a new `TokenExchangeFailed` error.
    #[must_use]
    pub fn token_exchange(message: impl Into<String>) -> Self {
        Self::TokenExchangeFailed(message.into())
    }

    /// Returns `true` if the error indicates a forged or stale response.
    ///
    /// These clear every piece of session state, including the pending login.
    #[must_use]
    pub fn is_integrity_failure(&self) -> bool {
        matches!(self, Self::MissingVerifier | Self::StateMismatch)
    }

    /// Returns `true` if the error left storage untouched.
    #[must_use]
    pub fn is_side_effect_free(&self) -> bool {
        matches!(self, Self::MissingCode | Self::AlreadyHandled)
    }
}

/// Errors that can occur in the auth client.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The configuration is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Provider metadata could not be resolved.
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    /// The authorization callback was rejected.
    #[error(transparent)]
    Callback(#[from] CallbackError),

    /// The userinfo endpoint could not be queried.
    #[error("Claims fetch failed: {message}")]
    ClaimsFetch {
        /// Description of the failure.
        message: String,
    },

    /// The refresh grant failed.
    #[error("Token refresh failed: {message}")]
    Refresh {
        /// Description of the failure.
        message: String,
    },

    /// Persisted session state could not be read or written.
    #[error("Storage error: {message}")]
    Storage {
        /// Description of the storage error.
        message: String,
    },

    /// A navigation target could not be built.
    #[error("Navigation error: {message}")]
    Navigation {
        /// Description of the navigation error.
        message: String,
    },

    /// The auth service has not been created yet.
    #[error("Auth service not initialized")]
    NotInitialized,
}

impl AuthError {
    /// Creates a new `ClaimsFetch` error.
    #[must_use]
    pub fn claims_fetch(message: impl Into<String>) -> Self {
        Self::ClaimsFetch {
            message: message.into(),
        }
    }

    /// Creates a new `Refresh` error.
    #[must_use]
    pub fn refresh(message: impl Into<String>) -> Self {
        Self::Refresh {
            message: message.into(),
        }
    }

    /// Creates a new `Storage` error.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Creates a new `Navigation` error.
    #[must_use]
    pub fn navigation(message: impl Into<String>) -> Self {
        Self::Navigation {
            message: message.into(),
        }
    }

    /// Returns the callback error, if this is one.
    #[must_use]
    pub fn as_callback(&self) -> Option<&CallbackError> {
        match self {
            Self::Callback(e) => Some(e),
            _ => None,
        }
    }

    /// Returns `true` if talking to the identity provider failed.
    #[must_use]
    pub fn is_provider_error(&self) -> bool {
        matches!(
            self,
            Self::Discovery(_)
                | Self::ClaimsFetch { .. }
                | Self::Refresh { .. }
                | Self::Callback(CallbackError::TokenExchangeFailed(_))
        )
    }

    /// Returns `true` if the error points at a local problem (config, storage).
    #[must_use]
    pub fn is_local_error(&self) -> bool {
        matches!(
            self,
            Self::Config(_) | Self::Storage { .. } | Self::Navigation { .. } | Self::NotInitialized
        )
    }

    /// Returns the error category for logging purposes.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Config(_) => ErrorCategory::Configuration,
            Self::Discovery(_) => ErrorCategory::Discovery,
            Self::Callback(CallbackError::TokenExchangeFailed(_)) => ErrorCategory::Token,
            Self::Callback(_) => ErrorCategory::Integrity,
            Self::ClaimsFetch { .. } => ErrorCategory::Claims,
            Self::Refresh { .. } => ErrorCategory::Token,
            Self::Storage { .. } => ErrorCategory::Infrastructure,
            Self::Navigation { .. } => ErrorCategory::Infrastructure,
            Self::NotInitialized => ErrorCategory::Lifecycle,
        }
    }
}

/// Categories of auth errors for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Invalid configuration.
    Configuration,
    /// Provider metadata resolution.
    Discovery,
    /// Callback integrity checks (state, verifier, replay).
    Integrity,
    /// Token endpoint failures.
    Token,
    /// Userinfo failures.
    Claims,
    /// Storage or host failures.
    Infrastructure,
    /// Service lifecycle misuse.
    Lifecycle,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration => write!(f, "configuration"),
            Self::Discovery => write!(f, "discovery"),
            Self::Integrity => write!(f, "integrity"),
            Self::Token => write!(f, "token"),
            Self::Claims => write!(f, "claims"),
            Self::Infrastructure => write!(f, "infrastructure"),
            Self::Lifecycle => write!(f, "lifecycle"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AuthError::claims_fetch("HTTP 401");
        assert_eq!(err.to_string(), "Claims fetch failed: HTTP 401");

        let err = AuthError::storage("disk full");
        assert_eq!(err.to_string(), "Storage error: disk full");

        let err = AuthError::NotInitialized;
        assert_eq!(err.to_string(), "Auth service not initialized");

        let err: AuthError = CallbackError::StateMismatch.into();
        assert!(err.to_string().starts_with("State mismatch"));

        let err: AuthError = CallbackError::token_exchange("invalid_grant: code expired").into();
        assert_eq!(
            err.to_string(),
            "Token exchange failed: invalid_grant: code expired"
        );
    }

    #[test]
    fn test_callback_error_classification() {
        assert!(CallbackError::StateMismatch.is_integrity_failure());
        assert!(CallbackError::MissingVerifier.is_integrity_failure());
        assert!(!CallbackError::MissingCode.is_integrity_failure());

        assert!(CallbackError::MissingCode.is_side_effect_free());
        assert!(CallbackError::AlreadyHandled.is_side_effect_free());
        assert!(!CallbackError::token_exchange("x").is_side_effect_free());
    }

    #[test]
    fn test_is_provider_error() {
        assert!(AuthError::claims_fetch("x").is_provider_error());
        assert!(AuthError::refresh("x").is_provider_error());
        assert!(AuthError::from(CallbackError::token_exchange("x")).is_provider_error());
        assert!(AuthError::from(DiscoveryError::HttpError(500)).is_provider_error());
        assert!(!AuthError::from(CallbackError::StateMismatch).is_provider_error());
        assert!(!AuthError::storage("x").is_provider_error());
    }

    #[test]
    fn test_is_local_error() {
        assert!(AuthError::storage("x").is_local_error());
        assert!(AuthError::NotInitialized.is_local_error());
        assert!(AuthError::from(ConfigError::Missing("issuer".into())).is_local_error());
        assert!(!AuthError::claims_fetch("x").is_local_error());
    }

    #[test]
    fn test_error_category() {
        assert_eq!(
            AuthError::from(CallbackError::StateMismatch).category(),
            ErrorCategory::Integrity
        );
        assert_eq!(
            AuthError::from(CallbackError::token_exchange("x")).category(),
            ErrorCategory::Token
        );
        assert_eq!(
            AuthError::NotInitialized.category(),
            ErrorCategory::Lifecycle
        );
        assert_eq!(
            AuthError::from(DiscoveryError::HttpError(404)).category(),
            ErrorCategory::Discovery
        );
    }

    #[test]
    fn test_category_display() {
        assert_eq!(ErrorCategory::Integrity.to_string(), "integrity");
        assert_eq!(ErrorCategory::Infrastructure.to_string(), "infrastructure");
    }

    #[test]
    fn test_as_callback() {
        let err = AuthError::from(CallbackError::MissingCode);
        assert!(matches!(err.as_callback(), Some(CallbackError::MissingCode)));
        assert!(AuthError::NotInitialized.as_callback().is_none());
    }
}
