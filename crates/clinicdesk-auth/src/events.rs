//! Auth lifecycle events.
//!
//! The auth service reports what it does through an injected
//! [`AuthObserver`] instead of logging inline. [`TracingObserver`] is the
//! default and forwards every event to `tracing`. Events never carry token
//! values.

use std::fmt;

/// Why local session state was cleared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClearReason {
    /// The persisted token set had expired.
    Expired,
    /// Persisted state could not be read or decoded.
    Unreadable,
    /// Claims could not be fetched for a valid token set.
    ClaimsUnavailable,
    /// A callback failed its verifier or state check.
    IntegrityFailure,
    /// The code exchange or its claims fetch failed.
    ExchangeFailed,
    /// Starting a login failed.
    LoginFailed,
    /// The user logged out.
    Logout,
}

impl fmt::Display for ClearReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Expired => write!(f, "expired"),
            Self::Unreadable => write!(f, "unreadable"),
            Self::ClaimsUnavailable => write!(f, "claims_unavailable"),
            Self::IntegrityFailure => write!(f, "integrity_failure"),
            Self::ExchangeFailed => write!(f, "exchange_failed"),
            Self::LoginFailed => write!(f, "login_failed"),
            Self::Logout => write!(f, "logout"),
        }
    }
}

/// Something the auth service did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    /// `init()` finished.
    Initialized {
        /// Whether a valid session was restored.
        authenticated: bool,
    },
    /// Local session state was removed.
    SessionCleared {
        reason: ClearReason,
    },
    /// The browser is being sent to the authorization endpoint.
    LoginStarted {
        authorization_endpoint: String,
    },
    /// A callback was refused before any token request.
    CallbackRejected {
        reason: String,
    },
    /// The authorization code was exchanged for tokens.
    TokensExchanged {
        expires_at: i64,
    },
    /// Claims were fetched from the userinfo endpoint.
    ClaimsFetched {
        subject: String,
    },
    /// The userinfo endpoint could not be queried.
    ClaimsFetchFailed {
        message: String,
    },
    /// The refresh grant replaced the token set.
    TokenRefreshed {
        expires_at: i64,
    },
    /// The refresh grant failed.
    RefreshFailed {
        message: String,
    },
    /// A cached discovery document was dropped after a network failure.
    DiscoveryInvalidated {
        issuer: String,
    },
    /// Logout navigated away.
    LoggedOut {
        /// `true` when the provider's end-session endpoint was used, `false`
        /// for the local landing page fallback.
        provider_logout: bool,
    },
}

impl AuthEvent {
    /// Short, stable event name for log fields.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Initialized { .. } => "initialized",
            Self::SessionCleared { .. } => "session_cleared",
            Self::LoginStarted { .. } => "login_started",
            Self::CallbackRejected { .. } => "callback_rejected",
            Self::TokensExchanged { .. } => "tokens_exchanged",
            Self::ClaimsFetched { .. } => "claims_fetched",
            Self::ClaimsFetchFailed { .. } => "claims_fetch_failed",
            Self::TokenRefreshed { .. } => "token_refreshed",
            Self::RefreshFailed { .. } => "refresh_failed",
            Self::DiscoveryInvalidated { .. } => "discovery_invalidated",
            Self::LoggedOut { .. } => "logged_out",
        }
    }

    /// Returns `true` for events that report a failure.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Self::CallbackRejected { .. } | Self::ClaimsFetchFailed { .. } | Self::RefreshFailed { .. }
        )
    }
}

/// Receives auth events.
///
/// Observers are called synchronously from the state machine, so they should
/// return quickly. Hand heavy work off to a channel.
pub trait AuthObserver: Send + Sync {
    /// Name for diagnostics.
    fn name(&self) -> &str;

    /// Handles one event.
    fn on_event(&self, event: &AuthEvent);
}

/// Forwards events to `tracing` under the `clinicdesk_auth` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl AuthObserver for TracingObserver {
    fn name(&self) -> &str {
        "tracing"
    }

    fn on_event(&self, event: &AuthEvent) {
        let name = event.name();
        match event {
            AuthEvent::Initialized { authenticated } => {
                tracing::info!(event = name, authenticated, "Auth service initialized");
            }
            AuthEvent::SessionCleared { reason } => {
                tracing::info!(event = name, reason = %reason, "Session cleared");
            }
            AuthEvent::LoginStarted {
                authorization_endpoint,
            } => {
                tracing::info!(event = name, endpoint = %authorization_endpoint, "Redirecting to identity provider");
            }
            AuthEvent::CallbackRejected { reason } => {
                tracing::warn!(event = name, reason = %reason, "Authorization callback rejected");
            }
            AuthEvent::TokensExchanged { expires_at } => {
                tracing::info!(event = name, expires_at, "Authorization code exchanged");
            }
            AuthEvent::ClaimsFetched { subject } => {
                tracing::debug!(event = name, sub = %subject, "User claims fetched");
            }
            AuthEvent::ClaimsFetchFailed { message } => {
                tracing::warn!(event = name, error = %message, "User claims fetch failed");
            }
            AuthEvent::TokenRefreshed { expires_at } => {
                tracing::debug!(event = name, expires_at, "Access token refreshed");
            }
            AuthEvent::RefreshFailed { message } => {
                tracing::warn!(event = name, error = %message, "Access token refresh failed");
            }
            AuthEvent::DiscoveryInvalidated { issuer } => {
                tracing::debug!(event = name, issuer = %issuer, "Discovery cache entry dropped");
            }
            AuthEvent::LoggedOut { provider_logout } => {
                tracing::info!(event = name, provider_logout, "Logged out");
            }
        }
    }
}
