//! OpenID Connect client configuration.
//!
//! [`AuthConfig`] is supplied once at startup and never changes for the
//! lifetime of an auth service. It can be built in code or deserialized from
//! any serde source (the CLI layers a TOML file with environment variables).
//!
//! # Example (TOML)
//!
//! ```toml
//! [auth]
//! issuer = "https://idp.example.com/realms/clinic"
//! client_id = "clinicdesk"
//! redirect_uri = "https://clinic.example.com/callback"
//! scope = "openid profile email"
//! clock_tolerance = "60s"
//!
//! [auth.extra_params]
//! prompt = "login"
//! ```

use std::time::Duration;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use url::Url;

/// Default scope requested from the provider.
pub const DEFAULT_SCOPE: &str = "openid profile email";

/// Default OAuth 2.0 response type.
pub const DEFAULT_RESPONSE_TYPE: &str = "code";

/// Default dotted claim path holding the user's roles (Keycloak realm roles).
pub const DEFAULT_ROLES_CLAIM: &str = "realm_access.roles";

/// OpenID Connect client configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Issuer URL of the identity provider.
    pub issuer: String,

    /// OAuth 2.0 client identifier registered with the provider.
    pub client_id: String,

    /// Redirect URI the provider sends the authorization response to.
    pub redirect_uri: String,

    /// Space-separated scopes to request.
    pub scope: String,

    /// OAuth 2.0 response type.
    pub response_type: String,

    /// Extra provider-specific authorization parameters, in insertion order.
    pub extra_params: IndexMap<String, String>,

    /// Tolerance applied to provider-supplied absolute timestamps.
    #[serde(with = "humantime_serde")]
    pub clock_tolerance: Duration,

    /// Where the provider sends the browser after logout.
    /// Falls back to `redirect_uri` when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_logout_redirect_uri: Option<String>,

    /// Dotted path of the claim holding the role list.
    pub roles_claim: String,

    /// Timeout applied to every request against the provider.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,

    /// How long a discovery document is reused before it is fetched again.
    #[serde(with = "humantime_serde")]
    pub discovery_ttl: Duration,

    /// Allow plain HTTP provider URLs. Only meant for local testing.
    pub allow_http: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            issuer: String::new(),
            client_id: String::new(),
            redirect_uri: String::new(),
            scope: DEFAULT_SCOPE.to_string(),
            response_type: DEFAULT_RESPONSE_TYPE.to_string(),
            extra_params: IndexMap::new(),
            clock_tolerance: Duration::from_secs(60),
            post_logout_redirect_uri: None,
            roles_claim: DEFAULT_ROLES_CLAIM.to_string(),
            request_timeout: Duration::from_secs(30),
            discovery_ttl: Duration::from_secs(3600),
            allow_http: false,
        }
    }
}

/// Configuration validation errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// An invalid configuration value was provided.
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    /// A required configuration value is missing.
    #[error("Missing required configuration: {0}")]
    Missing(String),
}

impl AuthConfig {
    /// Creates a configuration with the three required provider settings.
    #[must_use]
    pub fn new(
        issuer: impl Into<String>,
        client_id: impl Into<String>,
        redirect_uri: impl Into<String>,
    ) -> Self {
        Self {
            issuer: issuer.into(),
            client_id: client_id.into(),
            redirect_uri: redirect_uri.into(),
            ..Self::default()
        }
    }

    /// Sets the requested scope.
    #[must_use]
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = scope.into();
        self
    }

    /// Adds an extra authorization parameter.
    #[must_use]
    pub fn with_extra_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_params.insert(key.into(), value.into());
        self
    }

    /// Sets the clock-skew tolerance.
    #[must_use]
    pub fn with_clock_tolerance(mut self, tolerance: Duration) -> Self {
        self.clock_tolerance = tolerance;
        self
    }

    /// Sets the post-logout redirect URI.
    #[must_use]
    pub fn with_post_logout_redirect_uri(mut self, uri: impl Into<String>) -> Self {
        self.post_logout_redirect_uri = Some(uri.into());
        self
    }

    /// Sets the dotted claim path for roles.
    #[must_use]
    pub fn with_roles_claim(mut self, claim: impl Into<String>) -> Self {
        self.roles_claim = claim.into();
        self
    }

    /// Sets the provider request timeout.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Allows HTTP (non-HTTPS) provider URLs.
    #[must_use]
    pub fn with_allow_http(mut self, allow: bool) -> Self {
        self.allow_http = allow;
        self
    }

    /// Parsed issuer URL.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if the issuer is not a valid URL.
    pub fn issuer_url(&self) -> Result<Url, ConfigError> {
        Url::parse(&self.issuer)
            .map_err(|e| ConfigError::InvalidValue(format!("issuer '{}': {}", self.issuer, e)))
    }

    /// Parsed redirect URI.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if the redirect URI is not a valid URL.
    pub fn redirect_url(&self) -> Result<Url, ConfigError> {
        Url::parse(&self.redirect_uri).map_err(|e| {
            ConfigError::InvalidValue(format!("redirect_uri '{}': {}", self.redirect_uri, e))
        })
    }

    /// The URI the provider should return to after logout.
    #[must_use]
    pub fn post_logout_redirect(&self) -> &str {
        self.post_logout_redirect_uri
            .as_deref()
            .unwrap_or(&self.redirect_uri)
    }

    /// Same-origin landing page used when the provider cannot be reached.
    ///
    /// # Errors
    ///
    /// Returns an error if the redirect URI cannot be parsed.
    pub fn landing_url(&self) -> Result<Url, ConfigError> {
        let mut url = self.redirect_url()?;
        url.set_path("/");
        url.set_query(None);
        url.set_fragment(None);
        Ok(url)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Missing` if the issuer, client ID or redirect URI
    /// is empty, and `ConfigError::InvalidValue` if a URL does not parse, uses
    /// a disallowed scheme, or the scope/roles claim is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.issuer.trim().is_empty() {
            return Err(ConfigError::Missing("issuer".to_string()));
        }
        if self.client_id.trim().is_empty() {
            return Err(ConfigError::Missing("client_id".to_string()));
        }
        if self.redirect_uri.trim().is_empty() {
            return Err(ConfigError::Missing("redirect_uri".to_string()));
        }

        let issuer = self.issuer_url()?;
        match issuer.scheme() {
            "https" => {}
            "http" if self.allow_http => {}
            other => {
                return Err(ConfigError::InvalidValue(format!(
                    "issuer scheme '{}' is not allowed",
                    other
                )));
            }
        }

        self.redirect_url()?;
        if let Some(uri) = &self.post_logout_redirect_uri {
            Url::parse(uri).map_err(|e| {
                ConfigError::InvalidValue(format!("post_logout_redirect_uri '{}': {}", uri, e))
            })?;
        }

        if self.scope.trim().is_empty() {
            return Err(ConfigError::InvalidValue(
                "scope cannot be empty".to_string(),
            ));
        }

        if self.response_type.trim().is_empty() {
            return Err(ConfigError::InvalidValue(
                "response_type cannot be empty".to_string(),
            ));
        }

        if self.roles_claim.trim().is_empty() {
            return Err(ConfigError::InvalidValue(
                "roles_claim cannot be empty".to_string(),
            ));
        }

        if self.request_timeout.is_zero() {
            return Err(ConfigError::InvalidValue(
                "request_timeout must be > 0".to_string(),
            ));
        }

        Ok(())
    }
}
