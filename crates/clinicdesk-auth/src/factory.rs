//! Lifecycle owner for the single auth service of an application.
//!
//! The factory is an ordinary value owned by the application root and passed
//! to whoever needs it; there is no process-global instance. It builds and
//! initializes the [`OidcAuthService`] at most once and hands out cheap
//! [`AuthHandle`]s that all delegate to that instance.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::config::AuthConfig;
use crate::host::HostCapabilities;
use crate::service::{AuthService, AuthState, OidcAuthService};
use crate::types::AuthUser;
use crate::{AuthError, AuthResult};

/// Creates, shares and tears down the application's auth service.
#[derive(Debug, Default)]
pub struct AuthServiceFactory {
    // Held across `init()` so that concurrent creators build one service.
    instance: Mutex<Option<Arc<OidcAuthService>>>,
}

impl AuthServiceFactory {
    /// Creates an empty factory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a handle to the service, building and initializing it on the
    /// first call.
    ///
    /// Once an instance exists, `config` and `host` are ignored and a handle
    /// to the existing instance is returned.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Config` if the first construction fails
    /// validation.
    pub async fn create_instance(
        &self,
        config: AuthConfig,
        host: HostCapabilities,
    ) -> AuthResult<AuthHandle> {
        let mut slot = self.instance.lock().await;

        if let Some(existing) = slot.as_ref() {
            tracing::debug!("Auth service already created, returning existing instance");
            return Ok(AuthHandle::new(existing.clone()));
        }

        let service = Arc::new(OidcAuthService::new(config, host)?);
        service.init().await;
        *slot = Some(service.clone());

        Ok(AuthHandle::new(service))
    }

    /// Returns a handle to the existing service.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::NotInitialized` before `create_instance`.
    pub async fn get_instance(&self) -> AuthResult<AuthHandle> {
        self.instance
            .lock()
            .await
            .as_ref()
            .map(|service| AuthHandle::new(service.clone()))
            .ok_or(AuthError::NotInitialized)
    }

    /// Returns `true` if a service currently exists.
    pub async fn is_created(&self) -> bool {
        self.instance.lock().await.is_some()
    }

    /// Logs the service out and releases it so a new one can be created.
    ///
    /// Does nothing when no service exists. Outstanding handles keep working
    /// against the released instance.
    ///
    /// # Errors
    ///
    /// Returns the logout error. The instance is released either way.
    pub async fn destroy_instance(&self) -> AuthResult<()> {
        let released = self.instance.lock().await.take();
        match released {
            Some(service) => service.logout().await,
            None => Ok(()),
        }
    }
}

/// Cloneable handle delegating to the factory's service.
#[derive(Debug, Clone)]
pub struct AuthHandle {
    inner: Arc<OidcAuthService>,
}

impl AuthHandle {
    fn new(inner: Arc<OidcAuthService>) -> Self {
        Self { inner }
    }

    /// Returns `true` if both handles point at the same service.
    #[must_use]
    pub fn same_instance(&self, other: &AuthHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// The configuration of the underlying service.
    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        self.inner.config()
    }
}

#[async_trait]
impl AuthService for AuthHandle {
    async fn init(&self) {
        self.inner.init().await;
    }

    async fn login(&self) -> AuthResult<()> {
        self.inner.login().await
    }

    async fn logout(&self) -> AuthResult<()> {
        self.inner.logout().await
    }

    async fn is_authenticated(&self) -> bool {
        self.inner.is_authenticated().await
    }

    async fn get_user(&self) -> Option<AuthUser> {
        self.inner.get_user().await
    }

    async fn get_token(&self) -> Option<String> {
        self.inner.get_token().await
    }

    async fn update_token(&self, min_validity: Duration) -> bool {
        self.inner.update_token(min_validity).await
    }

    async fn handle_callback(&self, callback_url: &str) -> AuthResult<()> {
        self.inner.handle_callback(callback_url).await
    }

    async fn state(&self) -> AuthState {
        self.inner.state().await
    }
}
