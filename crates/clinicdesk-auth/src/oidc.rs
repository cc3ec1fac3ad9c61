//! OpenID Connect provider metadata.
//!
//! Only the subset of [OpenID Connect Discovery 1.0] that a public
//! Authorization-Code client needs is modeled. Unknown fields are ignored.
//!
//! [OpenID Connect Discovery 1.0]: https://openid.net/specs/openid-connect-discovery-1_0.html

use serde::{Deserialize, Serialize};

/// Provider metadata returned from `/.well-known/openid-configuration`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OidcDiscoveryDocument {
    /// URL that the provider asserts as its Issuer Identifier.
    pub issuer: String,

    /// URL of the Authorization Endpoint.
    pub authorization_endpoint: String,

    /// URL of the Token Endpoint.
    pub token_endpoint: String,

    /// URL of the UserInfo Endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub userinfo_endpoint: Option<String>,

    /// URL of the RP-initiated logout endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_session_endpoint: Option<String>,

    /// URL of the provider's JSON Web Key Set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwks_uri: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scopes_supported: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_types_supported: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grant_types_supported: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_challenge_methods_supported: Option<Vec<String>>,
}

impl OidcDiscoveryDocument {
    /// Returns `true` if the provider advertises the grant type.
    ///
    /// A document without `grant_types_supported` implies the OIDC default of
    /// `authorization_code` and `implicit`.
    #[must_use]
    pub fn supports_grant_type(&self, grant_type: &str) -> bool {
        match &self.grant_types_supported {
            Some(grants) => grants.iter().any(|g| g == grant_type),
            None => matches!(grant_type, "authorization_code" | "implicit"),
        }
    }

    /// Returns `true` if the provider advertises the PKCE method.
    #[must_use]
    pub fn supports_pkce_method(&self, method: &str) -> bool {
        self.code_challenge_methods_supported
            .as_ref()
            .is_some_and(|methods| methods.iter().any(|m| m == method))
    }

    /// Returns `true` if the provider advertises the scope.
    #[must_use]
    pub fn supports_scope(&self, scope: &str) -> bool {
        self.scopes_supported
            .as_ref()
            .is_some_and(|scopes| scopes.iter().any(|s| s == scope))
    }

    /// Returns `true` if the provider advertises the `refresh_token` grant.
    #[must_use]
    pub fn supports_refresh_token(&self) -> bool {
        self.supports_grant_type("refresh_token")
    }
}
