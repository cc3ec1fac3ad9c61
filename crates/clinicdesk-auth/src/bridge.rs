//! Session state for UI code.
//!
//! [`SessionBridge`] turns the auth service into an observable
//! [`SessionSnapshot`] (`is_authenticated`, `is_loading`, `user`) published on
//! a `tokio::sync::watch` channel. Mounting it initializes the service once
//! and, when the current URL is a provider callback, completes the login once
//! and scrubs the protocol parameters from the visible URL.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use tokio::sync::{OnceCell, watch};
use url::Url;

use crate::AuthResult;
use crate::host::Navigator;
use crate::rbac::Rbac;
use crate::service::AuthService;
use crate::types::AuthUser;

/// Query parameters a provider appends to the redirect URI.
const CALLBACK_PARAMS: &[&str] = &["code", "state", "session_state", "iss"];

/// What UI code sees of the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub is_authenticated: bool,
    pub is_loading: bool,
    pub user: Option<AuthUser>,
}

impl SessionSnapshot {
    fn unauthenticated(is_loading: bool) -> Self {
        Self {
            is_authenticated: false,
            is_loading,
            user: None,
        }
    }
}

impl Default for SessionSnapshot {
    /// Nothing is known before the first mount.
    fn default() -> Self {
        Self::unauthenticated(true)
    }
}

/// Observable session view over an [`AuthService`].
pub struct SessionBridge {
    service: Arc<dyn AuthService>,
    navigator: Arc<dyn Navigator>,
    tx: watch::Sender<SessionSnapshot>,
    initialized: OnceCell<()>,
    callback_handled: AtomicBool,
    in_flight: AtomicUsize,
}

impl std::fmt::Debug for SessionBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionBridge")
            .field("snapshot", &*self.tx.borrow())
            .finish_non_exhaustive()
    }
}

impl SessionBridge {
    /// Creates a bridge. Nothing runs until [`mount`](Self::mount).
    #[must_use]
    pub fn new(service: Arc<dyn AuthService>, navigator: Arc<dyn Navigator>) -> Self {
        let (tx, _rx) = watch::channel(SessionSnapshot::default());
        Self {
            service,
            navigator,
            tx,
            initialized: OnceCell::new(),
            callback_handled: AtomicBool::new(false),
            in_flight: AtomicUsize::new(0),
        }
    }

    /// Subscribes to snapshot changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.tx.subscribe()
    }

    /// The current snapshot.
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        self.tx.borrow().clone()
    }

    /// Role checks for the current user.
    #[must_use]
    pub fn rbac(&self) -> Rbac {
        Rbac::for_user(self.tx.borrow().user.as_ref())
    }

    /// Brings the session up to date with the host.
    ///
    /// The service is initialized once no matter how often or how
    /// concurrently this is called. If the current URL carries an
    /// authorization code, the callback is handled exactly once and the
    /// protocol parameters are removed from the visible URL; otherwise the
    /// authentication state is re-checked.
    pub async fn mount(&self) {
        self.begin();
        self.initialized
            .get_or_init(|| async {
                self.service.init().await;
            })
            .await;

        let current = self.navigator.current_url();
        if is_callback_url(&current) {
            if !self.callback_handled.swap(true, Ordering::SeqCst) {
                self.complete_callback(&current).await;
            }
        } else {
            self.check_auth().await;
        }
        self.end();
    }

    /// Re-reads authentication state from the service.
    pub async fn refresh(&self) {
        self.begin();
        self.check_auth().await;
        self.end();
    }

    /// Starts a login.
    ///
    /// # Errors
    ///
    /// Returns the service error when the redirect cannot be started.
    pub async fn login(&self) -> AuthResult<()> {
        self.begin();
        let result = self.service.login().await;
        if let Err(e) = &result {
            tracing::warn!(error = %e, "Login failed");
        }
        self.end();
        result
    }

    /// Logs out. The snapshot turns unauthenticated before the service is
    /// called, so it is cleared even if logout fails.
    ///
    /// # Errors
    ///
    /// Returns the service error.
    pub async fn logout(&self) -> AuthResult<()> {
        self.begin();
        self.publish(false, None);
        let result = self.service.logout().await;
        if let Err(e) = &result {
            tracing::warn!(error = %e, "Logout failed");
        }
        self.end();
        result
    }

    /// The access token, if the session is valid.
    pub async fn get_token(&self) -> Option<String> {
        self.service.get_token().await
    }

    async fn complete_callback(&self, current: &Url) {
        tracing::debug!("Authorization code found, handling callback");
        match self.service.handle_callback(current.as_str()).await {
            Ok(()) => {
                self.check_auth().await;
                self.navigator.replace_history(&strip_callback_params(current));
            }
            Err(e) => {
                tracing::warn!(error = %e, category = %e.category(), "Auth callback failed");
                self.publish(false, None);
            }
        }
    }

    async fn check_auth(&self) {
        if !self.service.is_authenticated().await {
            self.publish(false, None);
            return;
        }

        // A failed claims fetch logs the service out, so no user means no
        // session.
        let user = self.service.get_user().await;
        self.publish(user.is_some(), user);
    }

    fn publish(&self, is_authenticated: bool, user: Option<AuthUser>) {
        self.tx.send_modify(|snapshot| {
            snapshot.is_authenticated = is_authenticated;
            snapshot.user = user;
        });
    }

    fn begin(&self) {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        self.tx.send_if_modified(|snapshot| {
            let changed = !snapshot.is_loading;
            snapshot.is_loading = true;
            changed
        });
    }

    fn end(&self) {
        if self.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.tx.send_if_modified(|snapshot| {
                let changed = snapshot.is_loading;
                snapshot.is_loading = false;
                changed
            });
        }
    }
}

fn is_callback_url(url: &Url) -> bool {
    url.query_pairs().any(|(key, _)| key == "code")
}

/// `url` without the provider's callback parameters.
fn strip_callback_params(url: &Url) -> Url {
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| !CALLBACK_PARAMS.contains(&key.as_ref()))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    let mut clean = url.clone();
    if kept.is_empty() {
        clean.set_query(None);
    } else {
        clean.query_pairs_mut().clear().extend_pairs(kept);
    }
    clean
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::error::{AuthError, CallbackError};
    use crate::host::HeadlessNavigator;
    use crate::service::AuthState;

    /// Scriptable service double counting every call.
    #[derive(Default)]
    struct MockAuthService {
        authenticated: AtomicBool,
        fail_callback: bool,
        init_calls: AtomicUsize,
        callback_calls: AtomicUsize,
        auth_checks: AtomicUsize,
        logout_calls: AtomicUsize,
    }

    fn mock_user() -> AuthUser {
        AuthUser {
            id: "test-user".into(),
            username: "testuser".into(),
            email: "test@example.com".into(),
            first_name: "Test".into(),
            last_name: "User".into(),
            roles: ["admin".to_string()].into_iter().collect(),
            access_token: Some("mock-token".into()),
            id_token: None,
        }
    }

    #[async_trait]
    impl AuthService for MockAuthService {
        async fn init(&self) {
            self.init_calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        async fn login(&self) -> AuthResult<()> {
            Ok(())
        }

        async fn logout(&self) -> AuthResult<()> {
            self.logout_calls.fetch_add(1, Ordering::SeqCst);
            self.authenticated.store(false, Ordering::SeqCst);
            Ok(())
        }

        async fn is_authenticated(&self) -> bool {
            self.auth_checks.fetch_add(1, Ordering::SeqCst);
            self.authenticated.load(Ordering::SeqCst)
        }

        async fn get_user(&self) -> Option<AuthUser> {
            self.authenticated
                .load(Ordering::SeqCst)
                .then(mock_user)
        }

        async fn get_token(&self) -> Option<String> {
            self.authenticated
                .load(Ordering::SeqCst)
                .then(|| "mock-token".to_string())
        }

        async fn update_token(&self, _min_validity: Duration) -> bool {
            true
        }

        async fn handle_callback(&self, _callback_url: &str) -> AuthResult<()> {
            self.callback_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_callback {
                return Err(AuthError::from(CallbackError::StateMismatch));
            }
            self.authenticated.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn state(&self) -> AuthState {
            if self.authenticated.load(Ordering::SeqCst) {
                AuthState::Authenticated
            } else {
                AuthState::LoggedOut
            }
        }
    }

    fn bridge(service: Arc<MockAuthService>, url: &str) -> (SessionBridge, Arc<HeadlessNavigator>) {
        let navigator = Arc::new(HeadlessNavigator::new(Url::parse(url).unwrap()));
        (SessionBridge::new(service, navigator.clone()), navigator)
    }

    #[test]
    fn test_strip_callback_params() {
        let url = Url::parse(
            "https://app.test/patients?tab=2&code=abc&state=xyz&session_state=s&iss=https%3A%2F%2Fidp",
        )
        .unwrap();
        assert_eq!(
            strip_callback_params(&url).as_str(),
            "https://app.test/patients?tab=2"
        );

        let url = Url::parse("https://app.test/callback?code=abc&state=xyz").unwrap();
        assert_eq!(strip_callback_params(&url).as_str(), "https://app.test/callback");
    }

    #[test]
    fn test_initial_snapshot_is_loading() {
        let snapshot = SessionSnapshot::default();
        assert!(snapshot.is_loading);
        assert!(!snapshot.is_authenticated);
        assert!(snapshot.user.is_none());
    }

    #[tokio::test]
    async fn test_mount_initializes_once_and_checks_auth() {
        let service = Arc::new(MockAuthService::default());
        service.authenticated.store(true, Ordering::SeqCst);
        let (bridge, _nav) = bridge(service.clone(), "https://app.test/dashboard");

        tokio::join!(bridge.mount(), bridge.mount());
        bridge.mount().await;

        assert_eq!(service.init_calls.load(Ordering::SeqCst), 1);
        let snapshot = bridge.snapshot();
        assert!(snapshot.is_authenticated);
        assert!(!snapshot.is_loading);
        assert_eq!(snapshot.user, Some(mock_user()));
        assert!(bridge.rbac().has_role("admin"));
        assert_eq!(bridge.get_token().await.as_deref(), Some("mock-token"));
    }

    #[tokio::test]
    async fn test_callback_handled_once_and_url_scrubbed() {
        let service = Arc::new(MockAuthService::default());
        let (bridge, nav) = bridge(
            service.clone(),
            "https://app.test/callback?code=abc&state=xyz",
        );

        tokio::join!(bridge.mount(), bridge.mount());

        assert_eq!(service.callback_calls.load(Ordering::SeqCst), 1);
        assert_eq!(nav.current_url().as_str(), "https://app.test/callback");
        assert!(nav.navigations().is_empty());
        assert!(bridge.snapshot().is_authenticated);
    }

    #[tokio::test]
    async fn test_callback_path_skips_mount_time_check() {
        let service = Arc::new(MockAuthService {
            fail_callback: true,
            ..MockAuthService::default()
        });
        let (bridge, nav) = bridge(service.clone(), "https://app.test/callback?code=abc");

        bridge.mount().await;

        assert_eq!(service.callback_calls.load(Ordering::SeqCst), 1);
        assert_eq!(service.auth_checks.load(Ordering::SeqCst), 0);
        assert!(nav.current_url().query().is_some());
        let snapshot = bridge.snapshot();
        assert!(!snapshot.is_authenticated);
        assert!(!snapshot.is_loading);
    }

    #[tokio::test]
    async fn test_logout_clears_snapshot() {
        let service = Arc::new(MockAuthService::default());
        service.authenticated.store(true, Ordering::SeqCst);
        let (bridge, _nav) = bridge(service.clone(), "https://app.test/");
        bridge.mount().await;

        let mut rx = bridge.subscribe();
        bridge.logout().await.unwrap();

        assert!(rx.has_changed().unwrap());
        let snapshot = rx.borrow_and_update().clone();
        assert!(!snapshot.is_authenticated);
        assert!(snapshot.user.is_none());
        assert!(!bridge.rbac().has_role("admin"));
        assert_eq!(service.logout_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_refresh_picks_up_external_login() {
        let service = Arc::new(MockAuthService::default());
        let (bridge, _nav) = bridge(service.clone(), "https://app.test/");
        bridge.mount().await;
        assert!(!bridge.snapshot().is_authenticated);

        service.authenticated.store(true, Ordering::SeqCst);
        bridge.refresh().await;
        assert!(bridge.snapshot().is_authenticated);
    }
}
