use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clinicdesk_auth::{
    AuthHandle, AuthServiceFactory, FileStore, HeadlessNavigator, HostCapabilities, SessionBridge,
    SessionStore,
};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use url::Url;

use crate::settings::{self, Settings};

/// The auth service wired to a profile's session file.
///
/// A terminal has no browser, so navigation is recorded by a
/// [`HeadlessNavigator`] and the commands print where the browser should go.
pub struct AuthContext {
    pub factory: AuthServiceFactory,
    pub handle: AuthHandle,
    pub navigator: Arc<HeadlessNavigator>,
    pub store: SessionStore,
    pub session_file: PathBuf,
}

impl AuthContext {
    /// Opens the profile's session as if the host were showing `current`.
    /// Without `current`, the app's landing page is assumed.
    pub async fn open(settings: &Settings, profile: &str, current: Option<Url>) -> Result<Self> {
        let session_file = settings::session_path(profile)?;
        Self::open_at(settings, session_file, current).await
    }

    pub async fn open_at(
        settings: &Settings,
        session_file: PathBuf,
        current: Option<Url>,
    ) -> Result<Self> {
        let current = match current {
            Some(url) => url,
            None => settings.auth.landing_url()?,
        };

        let kv = Arc::new(FileStore::new(&session_file));
        let navigator = Arc::new(HeadlessNavigator::new(current));
        let host = HostCapabilities::new(kv.clone(), navigator.clone());

        tracing::debug!(session_file = %session_file.display(), "Opening session");

        let factory = AuthServiceFactory::new();
        let handle = factory
            .create_instance(settings.auth.clone(), host)
            .await
            .context("Failed to create auth service")?;

        Ok(Self {
            factory,
            handle,
            navigator,
            store: SessionStore::new(kv),
            session_file,
        })
    }

    /// A session bridge over this context's service.
    pub fn bridge(&self) -> SessionBridge {
        SessionBridge::new(Arc::new(self.handle.clone()), self.navigator.clone())
    }

    /// Expiry of the stored token set, formatted for display.
    pub async fn token_expiry(&self) -> Option<String> {
        let tokens = self.store.load_token_set().await.ok().flatten()?;
        OffsetDateTime::from_unix_timestamp(tokens.expires_at)
            .ok()?
            .format(&Rfc3339)
            .ok()
    }

    /// The last URL the service asked the host to open.
    pub fn redirect(&self) -> Option<Url> {
        self.navigator.last_navigation()
    }
}

#[cfg(test)]
mod tests {
    use clinicdesk_auth::{AuthConfig, AuthService, Navigator};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    async fn provider() -> MockServer {
        let server = MockServer::start().await;
        let issuer = server.uri();
        Mock::given(method("GET"))
            .and(path("/.well-known/openid-configuration"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "issuer": issuer,
                "authorization_endpoint": format!("{issuer}/auth"),
                "token_endpoint": format!("{issuer}/token"),
                "userinfo_endpoint": format!("{issuer}/userinfo"),
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "cli-access",
                "refresh_token": "cli-refresh",
                "expires_in": 600,
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/userinfo"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "sub": "u-7",
                "preferred_username": "frontdesk",
                "realm_access": { "roles": ["reception"] },
            })))
            .mount(&server)
            .await;
        server
    }

    fn settings(server: &MockServer) -> Settings {
        Settings {
            auth: AuthConfig::new(server.uri(), "clinicdesk-cli", "http://localhost:5173/callback")
                .with_allow_http(true),
        }
    }

    #[tokio::test]
    async fn test_session_survives_across_invocations() {
        let server = provider().await;
        let settings = settings(&server);
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("session.test.json");

        // `clinicdesk login`
        let ctx = AuthContext::open_at(&settings, file.clone(), None).await.unwrap();
        ctx.handle.login().await.unwrap();
        let auth_url = ctx.redirect().unwrap();
        let state = auth_url
            .query_pairs()
            .find(|(k, _)| k == "state")
            .map(|(_, v)| v.into_owned())
            .unwrap();
        drop(ctx);

        // `clinicdesk callback <url>`
        let callback =
            Url::parse(&format!("http://localhost:5173/callback?code=xyz&state={state}")).unwrap();
        let ctx = AuthContext::open_at(&settings, file.clone(), Some(callback))
            .await
            .unwrap();
        let bridge = ctx.bridge();
        bridge.mount().await;
        assert!(bridge.snapshot().is_authenticated);
        assert_eq!(
            ctx.navigator.current_url().as_str(),
            "http://localhost:5173/callback"
        );
        drop(ctx);

        // `clinicdesk whoami`
        let ctx = AuthContext::open_at(&settings, file.clone(), None).await.unwrap();
        assert_eq!(ctx.handle.get_token().await.as_deref(), Some("cli-access"));
        let user = ctx.handle.get_user().await.unwrap();
        assert_eq!(user.username, "frontdesk");
        assert!(ctx.token_expiry().await.is_some());

        // `clinicdesk logout`
        ctx.factory.destroy_instance().await.unwrap();
        let ctx = AuthContext::open_at(&settings, file, None).await.unwrap();
        assert!(!ctx.handle.is_authenticated().await);
        assert!(ctx.token_expiry().await.is_none());
    }
}
