//! OIDC Authorization Code + PKCE client.
//!
//! [`OidcAuthService`] is the protocol state machine:
//!
//! ```text
//! LoggedOut ──login()──▶ PendingCallback ──handle_callback()──▶ ExchangingCode
//!     ▲                        ▲                                     │
//!     │                        └────────── exchange failed ──────────┤
//!     │                                                              ▼
//!     └──── logout() / integrity failure / expiry ──────────── Authenticated ◀─▶ Refreshing
//! ```
//!
//! `init()` can move straight from `LoggedOut` to `Authenticated` by
//! restoring a persisted token set, or to `PendingCallback` when a login was
//! started before the page reloaded.
//!
//! Persisted state is authoritative: every check re-reads the session store,
//! because another tab or process may have changed it. The in-memory state
//! only guards against replayed or concurrent callbacks and refreshes. The
//! state lock is never held across a network request.
//!
//! # Security Considerations
//!
//! - The verifier and state nonce are single-use and cleared on any integrity
//!   failure
//! - Passive checks fail closed: anything unexpected means "logged out"
//! - Tokens are never logged

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use url::Url;

use crate::config::{AuthConfig, ConfigError};
use crate::discovery::{DiscoveryCache, DiscoveryError, DiscoveryOptions, OidcDiscoveryClient};
use crate::error::CallbackError;
use crate::events::{AuthEvent, AuthObserver, ClearReason};
use crate::host::{HostCapabilities, Navigator, RandomSource};
use crate::oidc::OidcDiscoveryDocument;
use crate::pkce::{PkceChallenge, PkceVerifier, random_token};
use crate::storage::SessionStore;
use crate::types::{
    AuthUser, OAuthErrorResponse, PendingLogin, TokenResponse, TokenSet, UserInfo, unix_now,
};
use crate::{AuthError, AuthResult};

/// Authorization parameters owned by the protocol. Extra parameters with
/// these names are dropped.
const RESERVED_AUTHORIZATION_PARAMS: &[&str] = &[
    "response_type",
    "client_id",
    "scope",
    "redirect_uri",
    "code_challenge",
    "code_challenge_method",
    "state",
];

/// The auth contract the rest of the application programs against.
#[async_trait]
pub trait AuthService: Send + Sync {
    /// Restores persisted session state. Never fails: anything unreadable
    /// leaves a cleared, logged-out session.
    async fn init(&self);

    /// Starts an Authorization Code + PKCE login and navigates the host to
    /// the provider.
    async fn login(&self) -> AuthResult<()>;

    /// Clears the local session and navigates to the provider's logout.
    async fn logout(&self) -> AuthResult<()>;

    /// `true` iff a persisted token set exists and has not expired.
    async fn is_authenticated(&self) -> bool;

    /// The current user, or `None` when not authenticated.
    async fn get_user(&self) -> Option<AuthUser>;

    /// The access token, only while unexpired. Never refreshes.
    async fn get_token(&self) -> Option<String>;

    /// Ensures the access token stays valid for at least `min_validity`,
    /// refreshing when needed. Returns `false` on any failure.
    async fn update_token(&self, min_validity: Duration) -> bool;

    /// Completes a login from the provider's redirect URL.
    async fn handle_callback(&self, callback_url: &str) -> AuthResult<()>;

    /// The current state-machine state.
    async fn state(&self) -> AuthState;
}

/// Protocol state of an [`OidcAuthService`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthState {
    LoggedOut,
    /// A login was started; waiting for the provider to redirect back.
    PendingCallback,
    ExchangingCode,
    Authenticated,
    Refreshing,
}

impl AuthState {
    /// Returns `true` if a callback arriving now must be refused.
    #[must_use]
    pub fn rejects_callback(&self) -> bool {
        matches!(
            self,
            Self::ExchangingCode | Self::Authenticated | Self::Refreshing
        )
    }
}

impl fmt::Display for AuthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LoggedOut => write!(f, "logged_out"),
            Self::PendingCallback => write!(f, "pending_callback"),
            Self::ExchangingCode => write!(f, "exchanging_code"),
            Self::Authenticated => write!(f, "authenticated"),
            Self::Refreshing => write!(f, "refreshing"),
        }
    }
}

/// OpenID Connect public client using Authorization Code + PKCE.
pub struct OidcAuthService {
    config: AuthConfig,
    issuer: Url,
    http_client: reqwest::Client,
    discovery: DiscoveryCache,
    store: SessionStore,
    random: Arc<dyn RandomSource>,
    navigator: Arc<dyn Navigator>,
    observer: Arc<dyn AuthObserver>,
    state: Mutex<AuthState>,
    refresh_done: Notify,
}

impl fmt::Debug for OidcAuthService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OidcAuthService")
            .field("issuer", &self.issuer.as_str())
            .field("client_id", &self.config.client_id)
            .finish_non_exhaustive()
    }
}

impl OidcAuthService {
    /// Creates a service. No network traffic happens until the first call.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the configuration fails validation or the
    /// HTTP client cannot be built.
    pub fn new(config: AuthConfig, host: HostCapabilities) -> Result<Self, ConfigError> {
        config.validate()?;
        let issuer = config.issuer_url()?;

        let http_client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ConfigError::InvalidValue(format!("HTTP client: {}", e)))?;

        let discovery = DiscoveryCache::new(OidcDiscoveryClient::new(
            http_client.clone(),
            DiscoveryOptions::from(&config),
        ));

        tracing::debug!(
            issuer = %issuer,
            client_id = %config.client_id,
            redirect_uri = %config.redirect_uri,
            scope = %config.scope,
            "OIDC auth service created"
        );

        Ok(Self {
            config,
            issuer,
            http_client,
            discovery,
            store: SessionStore::new(host.store),
            random: host.random,
            navigator: host.navigator,
            observer: host.observer,
            state: Mutex::new(AuthState::LoggedOut),
            refresh_done: Notify::new(),
        })
    }

    /// The configuration this service was built with.
    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    fn emit(&self, event: AuthEvent) {
        self.observer.on_event(&event);
    }

    async fn set_state(&self, next: AuthState) {
        *self.state.lock().await = next;
    }

    /// Removes every session key and reports why.
    async fn clear_session(&self, reason: ClearReason) {
        if let Err(e) = self.store.clear_all().await {
            tracing::warn!(error = %e, "Session storage could not be fully cleared");
        }
        self.emit(AuthEvent::SessionCleared { reason });
    }

    async fn discover(&self) -> Result<OidcDiscoveryDocument, DiscoveryError> {
        let result = self.discovery.get(&self.issuer).await;
        if let Err(e) = &result
            && e.is_network()
        {
            self.invalidate_discovery().await;
        }
        result
    }

    async fn invalidate_discovery(&self) {
        self.discovery.invalidate(&self.issuer).await;
        self.emit(AuthEvent::DiscoveryInvalidated {
            issuer: self.issuer.to_string(),
        });
    }

    /// Builds the authorization redirect for a pending login.
    fn authorization_url(
        &self,
        endpoint: &str,
        challenge: &PkceChallenge,
        state: &str,
    ) -> AuthResult<Url> {
        let mut url = Url::parse(endpoint).map_err(|e| {
            AuthError::navigation(format!("Invalid authorization endpoint '{}': {}", endpoint, e))
        })?;

        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("response_type", &self.config.response_type)
                .append_pair("client_id", &self.config.client_id)
                .append_pair("scope", &self.config.scope)
                .append_pair("redirect_uri", &self.config.redirect_uri)
                .append_pair("code_challenge", challenge.as_str())
                .append_pair("code_challenge_method", challenge.method().as_str())
                .append_pair("state", state);

            for (key, value) in &self.config.extra_params {
                if RESERVED_AUTHORIZATION_PARAMS.contains(&key.as_str()) {
                    tracing::warn!(param = %key, "Ignoring extra parameter that overrides a protocol parameter");
                    continue;
                }
                query.append_pair(key, value);
            }
        }

        Ok(url)
    }

    /// POSTs a grant to the token endpoint.
    async fn token_request(
        &self,
        token_endpoint: &str,
        params: &[(&str, &str)],
    ) -> Result<TokenResponse, String> {
        let response = match self
            .http_client
            .post(token_endpoint)
            .form(params)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                self.invalidate_discovery().await;
                return Err(format!("Token endpoint unreachable: {}", e));
            }
        };

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();

            if let Ok(oauth_error) = serde_json::from_str::<OAuthErrorResponse>(&body) {
                return Err(oauth_error.to_string());
            }

            return Err(format!("HTTP {} - {}", status, body));
        }

        response
            .json::<TokenResponse>()
            .await
            .map_err(|e| format!("Failed to parse token response: {}", e))
    }

    /// Fetches claims for `tokens` and caches them.
    async fn fetch_claims(&self, tokens: &TokenSet) -> AuthResult<UserInfo> {
        let document = self.discover().await?;
        let endpoint = document
            .userinfo_endpoint
            .ok_or_else(|| DiscoveryError::MissingField("userinfo_endpoint".to_string()))?;

        let response = match self
            .http_client
            .get(&endpoint)
            .bearer_auth(&tokens.access_token)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                self.invalidate_discovery().await;
                return Err(AuthError::claims_fetch(e.to_string()));
            }
        };

        if !response.status().is_success() {
            return Err(AuthError::claims_fetch(format!(
                "Userinfo request failed: HTTP {}",
                response.status()
            )));
        }

        let claims: UserInfo = response.json().await.map_err(|e| {
            AuthError::claims_fetch(format!("Failed to parse userinfo response: {}", e))
        })?;

        self.store.save_claims(&claims).await?;
        self.emit(AuthEvent::ClaimsFetched {
            subject: claims.sub.clone(),
        });

        Ok(claims)
    }

    /// Cached claims, or freshly fetched ones. On failure the session is
    /// cleared.
    async fn claims_or_clear(&self, tokens: &TokenSet) -> Option<UserInfo> {
        if let Ok(Some(claims)) = self.store.load_claims().await {
            return Some(claims);
        }

        match self.fetch_claims(tokens).await {
            Ok(claims) => Some(claims),
            Err(e) => {
                self.emit(AuthEvent::ClaimsFetchFailed {
                    message: e.to_string(),
                });
                self.clear_session(ClearReason::ClaimsUnavailable).await;
                self.set_state(AuthState::LoggedOut).await;
                None
            }
        }
    }

    /// Valid persisted token set, if any. Storage failures read as `None`.
    async fn valid_tokens(&self) -> Option<TokenSet> {
        match self.store.load_token_set().await {
            Ok(Some(tokens)) if tokens.is_valid_at(unix_now()) => Some(tokens),
            Ok(_) => None,
            Err(e) => {
                tracing::debug!(error = %e, "Token set unreadable");
                None
            }
        }
    }

    /// Rejects a callback before the token request. Integrity failures wipe
    /// the whole session.
    async fn reject_callback(&self, error: CallbackError) -> AuthError {
        self.emit(AuthEvent::CallbackRejected {
            reason: error.to_string(),
        });
        if error.is_integrity_failure() {
            self.clear_session(ClearReason::IntegrityFailure).await;
            self.set_state(AuthState::LoggedOut).await;
        }
        error.into()
    }

    /// Exchange-stage failure: drop tokens and claims, keep the pending login
    /// so the user can retry.
    async fn fail_exchange(&self, error: AuthError) -> AuthError {
        if let Err(e) = self.store.clear_tokens().await {
            tracing::warn!(error = %e, "Token set could not be cleared");
        }
        self.emit(AuthEvent::SessionCleared {
            reason: ClearReason::ExchangeFailed,
        });
        self.set_state(AuthState::PendingCallback).await;

        match error {
            AuthError::Callback(_) => error,
            other => CallbackError::token_exchange(other.to_string()).into(),
        }
    }

    /// Checks the callback against the stored pending login.
    async fn verify_pending(&self, returned_state: Option<&str>) -> Result<PkceVerifier, CallbackError> {
        let verifier = match self.store.load_verifier().await {
            Ok(Some(raw)) => PkceVerifier::new(raw).map_err(|e| {
                tracing::warn!(error = %e, "Stored code verifier is malformed");
                CallbackError::MissingVerifier
            })?,
            Ok(None) => return Err(CallbackError::MissingVerifier),
            Err(e) => {
                tracing::warn!(error = %e, "Code verifier unreadable");
                return Err(CallbackError::MissingVerifier);
            }
        };

        let stored_state = self.store.load_state().await.ok().flatten();
        match (returned_state, stored_state.as_deref()) {
            (Some(returned), Some(stored)) if returned == stored => Ok(verifier),
            _ => Err(CallbackError::StateMismatch),
        }
    }

    /// Token exchange, claims fetch and persistence.
    async fn exchange_code(&self, code: &str, verifier: &PkceVerifier) -> AuthResult<()> {
        let document = self.discover().await?;

        let now = unix_now();
        let response = self
            .token_request(
                &document.token_endpoint,
                &[
                    ("grant_type", "authorization_code"),
                    ("code", code),
                    ("redirect_uri", self.config.redirect_uri.as_str()),
                    ("client_id", self.config.client_id.as_str()),
                    ("code_verifier", verifier.as_str()),
                ],
            )
            .await
            .map_err(CallbackError::TokenExchangeFailed)?;

        let tokens = TokenSet::from_response(response, now, self.config.clock_tolerance, None);
        self.store.save_token_set(&tokens).await?;
        self.emit(AuthEvent::TokensExchanged {
            expires_at: tokens.expires_at,
        });

        self.fetch_claims(&tokens).await?;
        Ok(())
    }

    /// One `refresh_token` grant, replacing the stored token set.
    async fn refresh(&self, current: &TokenSet, refresh_token: &str) -> AuthResult<TokenSet> {
        let document = self.discover().await?;

        let now = unix_now();
        let response = self
            .token_request(
                &document.token_endpoint,
                &[
                    ("grant_type", "refresh_token"),
                    ("refresh_token", refresh_token),
                    ("client_id", self.config.client_id.as_str()),
                ],
            )
            .await
            .map_err(AuthError::refresh)?;

        let refreshed =
            TokenSet::from_response(response, now, self.config.clock_tolerance, Some(current));
        self.store.save_token_set(&refreshed).await?;
        Ok(refreshed)
    }
}

/// Extracts `code` and `state` from a callback URL. Empty values count as
/// absent.
fn parse_callback(callback_url: &str) -> (Option<String>, Option<String>) {
    let Ok(url) = Url::parse(callback_url) else {
        return (None, None);
    };

    let mut code = None;
    let mut state = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" if code.is_none() && !value.is_empty() => code = Some(value.into_owned()),
            "state" if state.is_none() && !value.is_empty() => state = Some(value.into_owned()),
            _ => {}
        }
    }
    (code, state)
}

fn saturating_secs(duration: Duration) -> i64 {
    i64::try_from(duration.as_secs()).unwrap_or(i64::MAX)
}

#[async_trait]
impl AuthService for OidcAuthService {
    async fn init(&self) {
        let tokens = match self.store.load_token_set().await {
            Ok(tokens) => tokens,
            Err(e) => {
                tracing::warn!(error = %e, "Persisted session unreadable");
                self.clear_session(ClearReason::Unreadable).await;
                self.set_state(AuthState::LoggedOut).await;
                self.emit(AuthEvent::Initialized {
                    authenticated: false,
                });
                return;
            }
        };

        let authenticated = match tokens {
            None => {
                self.set_state(AuthState::LoggedOut).await;
                false
            }
            Some(tokens) if !tokens.is_valid_at(unix_now()) => {
                self.clear_session(ClearReason::Expired).await;
                self.set_state(AuthState::LoggedOut).await;
                false
            }
            Some(tokens) => {
                if self.claims_or_clear(&tokens).await.is_some() {
                    self.set_state(AuthState::Authenticated).await;
                    true
                } else {
                    false
                }
            }
        };

        // A login started over a live session still expects its callback.
        if self.store.has_pending_login().await {
            self.set_state(AuthState::PendingCallback).await;
        }

        self.emit(AuthEvent::Initialized { authenticated });
    }

    async fn login(&self) -> AuthResult<()> {
        let verifier = PkceVerifier::generate(self.random.as_ref());
        let state = random_token(self.random.as_ref());
        let challenge = PkceChallenge::from_verifier(&verifier);

        self.store
            .save_pending(&PendingLogin {
                code_verifier: verifier.into_inner(),
                state: state.clone(),
            })
            .await?;

        let url = match self.discover().await {
            Ok(document) => {
                self.authorization_url(&document.authorization_endpoint, &challenge, &state)
            }
            Err(e) => Err(e.into()),
        };

        let url = match url {
            Ok(url) => url,
            Err(e) => {
                if let Err(clear_err) = self.store.clear_pending().await {
                    tracing::warn!(error = %clear_err, "Pending login could not be cleared");
                }
                self.emit(AuthEvent::SessionCleared {
                    reason: ClearReason::LoginFailed,
                });
                return Err(e);
            }
        };

        self.set_state(AuthState::PendingCallback).await;

        let mut endpoint = url.clone();
        endpoint.set_query(None);
        self.emit(AuthEvent::LoginStarted {
            authorization_endpoint: endpoint.to_string(),
        });

        self.navigator.navigate(&url);
        Ok(())
    }

    async fn logout(&self) -> AuthResult<()> {
        let id_token = self
            .store
            .load_token_set()
            .await
            .ok()
            .flatten()
            .and_then(|tokens| tokens.id_token);

        self.clear_session(ClearReason::Logout).await;
        self.set_state(AuthState::LoggedOut).await;

        let end_session = match self.discover().await {
            Ok(document) => document
                .end_session_endpoint
                .and_then(|endpoint| Url::parse(&endpoint).ok()),
            Err(e) => {
                tracing::warn!(error = %e, "Provider metadata unavailable for logout");
                None
            }
        };

        match end_session {
            Some(mut url) => {
                {
                    let mut query = url.query_pairs_mut();
                    if let Some(id_token) = &id_token {
                        query.append_pair("id_token_hint", id_token);
                    }
                    query
                        .append_pair("post_logout_redirect_uri", self.config.post_logout_redirect())
                        .append_pair("state", &random_token(self.random.as_ref()));
                }
                self.emit(AuthEvent::LoggedOut {
                    provider_logout: true,
                });
                self.navigator.navigate(&url);
            }
            None => {
                let landing = self.config.landing_url()?;
                self.emit(AuthEvent::LoggedOut {
                    provider_logout: false,
                });
                self.navigator.navigate(&landing);
            }
        }

        Ok(())
    }

    async fn is_authenticated(&self) -> bool {
        self.valid_tokens().await.is_some()
    }

    async fn get_user(&self) -> Option<AuthUser> {
        let tokens = self.valid_tokens().await?;
        let claims = self.claims_or_clear(&tokens).await?;
        Some(AuthUser::from_claims(
            &claims,
            &tokens,
            &self.config.roles_claim,
        ))
    }

    async fn get_token(&self) -> Option<String> {
        self.valid_tokens().await.map(|tokens| tokens.access_token)
    }

    async fn update_token(&self, min_validity: Duration) -> bool {
        let min_validity = saturating_secs(min_validity);

        loop {
            let tokens = match self.store.load_token_set().await {
                Ok(Some(tokens)) => tokens,
                _ => return false,
            };

            if tokens.remaining_secs(unix_now()) > min_validity {
                return true;
            }

            let Some(refresh_token) = tokens.refresh_token.clone() else {
                return false;
            };

            let previous = {
                let mut state = self.state.lock().await;
                if *state == AuthState::Refreshing {
                    // Another caller is refreshing; wait and re-check.
                    let done = self.refresh_done.notified();
                    drop(state);
                    done.await;
                    continue;
                }
                std::mem::replace(&mut *state, AuthState::Refreshing)
            };

            let refreshed = match self.refresh(&tokens, &refresh_token).await {
                Ok(refreshed) => {
                    let next = if previous == AuthState::PendingCallback {
                        previous
                    } else {
                        AuthState::Authenticated
                    };
                    self.set_state(next).await;
                    self.emit(AuthEvent::TokenRefreshed {
                        expires_at: refreshed.expires_at,
                    });
                    true
                }
                Err(e) => {
                    self.set_state(previous).await;
                    self.emit(AuthEvent::RefreshFailed {
                        message: e.to_string(),
                    });
                    false
                }
            };

            self.refresh_done.notify_waiters();
            return refreshed;
        }
    }

    async fn handle_callback(&self, callback_url: &str) -> AuthResult<()> {
        let (code, returned_state) = parse_callback(callback_url);

        let Some(code) = code else {
            return Err(self.reject_callback(CallbackError::MissingCode).await);
        };

        {
            let mut state = self.state.lock().await;
            if state.rejects_callback() {
                drop(state);
                return Err(self.reject_callback(CallbackError::AlreadyHandled).await);
            }
            *state = AuthState::ExchangingCode;
        }

        let verifier = match self.verify_pending(returned_state.as_deref()).await {
            Ok(verifier) => verifier,
            Err(e) => return Err(self.reject_callback(e).await),
        };

        if let Err(e) = self.exchange_code(&code, &verifier).await {
            return Err(self.fail_exchange(e).await);
        }

        if let Err(e) = self.store.clear_pending().await {
            tracing::warn!(error = %e, "Pending login could not be cleared");
        }
        self.set_state(AuthState::Authenticated).await;
        Ok(())
    }

    async fn state(&self) -> AuthState {
        *self.state.lock().await
    }
}
