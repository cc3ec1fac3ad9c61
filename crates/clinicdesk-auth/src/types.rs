//! Session data types: tokens, claims and the derived user.

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Lifetime assumed when the provider reports no expiry at all.
pub const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 3600;

/// Default `token_type` when the provider omits it.
pub const DEFAULT_TOKEN_TYPE: &str = "Bearer";

/// Current wall-clock time as Unix seconds.
#[must_use]
pub fn unix_now() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

/// Tokens issued by the provider, as persisted under the `tokenSet` key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSet {
    /// Bearer token presented to resource servers.
    pub access_token: String,

    /// OpenID Connect ID token, used as `id_token_hint` on logout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,

    /// Token used for the `refresh_token` grant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// Token type, normally `Bearer`.
    #[serde(default = "default_token_type")]
    pub token_type: String,

    /// Absolute expiry as Unix seconds.
    pub expires_at: i64,
}

fn default_token_type() -> String {
    DEFAULT_TOKEN_TYPE.to_string()
}

impl TokenSet {
    /// Builds a token set from a token endpoint response received at `now`.
    ///
    /// `expires_at` is `now + expires_in`. Without `expires_in`, an absolute
    /// `expires_at` from the provider is trusted only after subtracting
    /// `clock_tolerance`; without either, a one hour lifetime applies.
    ///
    /// On refresh, `previous` supplies the refresh and ID tokens when the
    /// provider does not rotate them.
    #[must_use]
    pub fn from_response(
        response: TokenResponse,
        now: i64,
        clock_tolerance: Duration,
        previous: Option<&TokenSet>,
    ) -> Self {
        let expires_at = match (response.expires_in, response.expires_at) {
            (Some(expires_in), _) => now.saturating_add(expires_in),
            (None, Some(absolute)) => absolute.saturating_sub(tolerance_secs(clock_tolerance)),
            (None, None) => now.saturating_add(DEFAULT_TOKEN_LIFETIME_SECS),
        };

        let refresh_token = response
            .refresh_token
            .or_else(|| previous.and_then(|p| p.refresh_token.clone()));
        let id_token = response
            .id_token
            .or_else(|| previous.and_then(|p| p.id_token.clone()));

        Self {
            access_token: response.access_token,
            id_token,
            refresh_token,
            token_type: response
                .token_type
                .filter(|t| !t.is_empty())
                .unwrap_or_else(default_token_type),
            expires_at,
        }
    }

    /// Returns `true` while `expires_at` lies strictly after `now`.
    #[must_use]
    pub fn is_valid_at(&self, now: i64) -> bool {
        self.expires_at > now
    }

    /// Seconds left before expiry (negative once expired).
    #[must_use]
    pub fn remaining_secs(&self, now: i64) -> i64 {
        self.expires_at.saturating_sub(now)
    }
}

fn tolerance_secs(tolerance: Duration) -> i64 {
    i64::try_from(tolerance.as_secs()).unwrap_or(i64::MAX)
}

/// Successful token endpoint response (RFC 6749 Section 5.1).
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default, deserialize_with = "lenient_seconds")]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub id_token: Option<String>,
    /// Non-standard absolute expiry some providers send.
    #[serde(default, deserialize_with = "lenient_seconds")]
    pub expires_at: Option<i64>,
}

/// Accepts seconds as an integer, a float or a numeric string. Fractions are
/// truncated; a string that is not a number reads as absent.
fn lenient_seconds<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Seconds {
        Int(i64),
        Float(f64),
        Text(String),
    }

    let secs = match Option::<Seconds>::deserialize(deserializer)? {
        None => None,
        Some(Seconds::Int(secs)) => Some(secs),
        Some(Seconds::Float(secs)) => Some(secs as i64),
        Some(Seconds::Text(text)) => {
            let text = text.trim();
            let parsed = text.parse::<i64>().ok().or_else(|| {
                text.parse::<f64>()
                    .ok()
                    .filter(|secs| secs.is_finite())
                    .map(|secs| secs as i64)
            });
            if parsed.is_none() {
                tracing::warn!(value = %text, "Ignoring non-numeric token lifetime");
            }
            parsed
        }
    };
    Ok(secs)
}

/// OAuth 2.0 error response (RFC 6749 Section 5.2).
#[derive(Debug, Clone, Deserialize)]
pub struct OAuthErrorResponse {
    pub error: String,
    #[serde(default)]
    pub error_description: Option<String>,
}

impl std::fmt::Display for OAuthErrorResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.error_description {
            Some(description) => write!(f, "{}: {}", self.error, description),
            None => write!(f, "{}", self.error),
        }
    }
}

/// Claims returned by the userinfo endpoint, persisted under `userInfo`.
///
/// Standard profile claims are typed. Everything else, including the
/// provider-specific role claim, is kept verbatim in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserInfo {
    pub sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub given_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family_name: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl UserInfo {
    /// Reads the role list at a dotted claim path such as
    /// `realm_access.roles`.
    ///
    /// The claim may be a JSON array of strings or a comma-separated string.
    /// A missing or malformed claim yields no roles.
    #[must_use]
    pub fn roles(&self, claim_path: &str) -> HashSet<String> {
        let mut segments = claim_path.split('.');
        let Some(first) = segments.next() else {
            return HashSet::new();
        };

        let mut current = self.extra.get(first);
        for segment in segments {
            current = current.and_then(|v| v.get(segment));
        }

        match current {
            Some(serde_json::Value::Array(values)) => values
                .iter()
                .filter_map(|v| v.as_str())
                .map(str::to_string)
                .collect(),
            Some(serde_json::Value::String(s)) => s
                .split(',')
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .map(str::to_string)
                .collect(),
            _ => HashSet::new(),
        }
    }
}

/// The application's view of the signed-in user.
///
/// Derived from [`UserInfo`] and the current [`TokenSet`]; never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthUser {
    pub id: String,
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    /// Role names, compared case-sensitively.
    pub roles: HashSet<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
}

impl AuthUser {
    /// Maps claims and tokens to a user, reading roles at `roles_claim`.
    #[must_use]
    pub fn from_claims(claims: &UserInfo, tokens: &TokenSet, roles_claim: &str) -> Self {
        Self {
            id: claims.sub.clone(),
            username: claims.preferred_username.clone().unwrap_or_default(),
            email: claims.email.clone().unwrap_or_default(),
            first_name: claims.given_name.clone().unwrap_or_default(),
            last_name: claims.family_name.clone().unwrap_or_default(),
            roles: claims.roles(roles_claim),
            access_token: Some(tokens.access_token.clone()),
            id_token: tokens.id_token.clone(),
        }
    }

    /// Display name, falling back to the username.
    #[must_use]
    pub fn display_name(&self) -> String {
        let full = format!("{} {}", self.first_name, self.last_name);
        let full = full.trim();
        if full.is_empty() {
            self.username.clone()
        } else {
            full.to_string()
        }
    }
}

/// The in-flight half of an Authorization Code login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingLogin {
    /// PKCE code verifier (`code_verifier` key).
    pub code_verifier: String,
    /// Anti-CSRF state nonce (`auth_state` key).
    pub state: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(json: serde_json::Value) -> TokenResponse {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_expires_at_from_expires_in() {
        let tokens = TokenSet::from_response(
            response(serde_json::json!({"access_token": "a", "expires_in": 300})),
            1_000,
            Duration::from_secs(60),
            None,
        );
        assert_eq!(tokens.expires_at, 1_300);
        assert_eq!(tokens.token_type, "Bearer");
    }

    #[test]
    fn test_absolute_expiry_minus_tolerance() {
        let tokens = TokenSet::from_response(
            response(serde_json::json!({"access_token": "a", "expires_at": 5_000})),
            1_000,
            Duration::from_secs(60),
            None,
        );
        assert_eq!(tokens.expires_at, 4_940);
    }

    #[test]
    fn test_default_lifetime_when_no_expiry() {
        let tokens = TokenSet::from_response(
            response(serde_json::json!({"access_token": "a", "token_type": "DPoP"})),
            1_000,
            Duration::from_secs(60),
            None,
        );
        assert_eq!(tokens.expires_at, 1_000 + DEFAULT_TOKEN_LIFETIME_SECS);
        assert_eq!(tokens.token_type, "DPoP");
    }

    #[test]
    fn test_lifetime_accepts_strings_and_floats() {
        let parse = |value: serde_json::Value| {
            response(serde_json::json!({"access_token": "a", "expires_in": value})).expires_in
        };
        assert_eq!(parse(serde_json::json!("3600")), Some(3600));
        assert_eq!(parse(serde_json::json!(" 300 ")), Some(300));
        assert_eq!(parse(serde_json::json!(3600.0)), Some(3600));
        assert_eq!(parse(serde_json::json!(299.9)), Some(299));
        assert_eq!(parse(serde_json::json!("120.5")), Some(120));
        assert_eq!(parse(serde_json::json!("soon")), None);
        assert_eq!(parse(serde_json::Value::Null), None);

        let tokens = TokenSet::from_response(
            response(serde_json::json!({"access_token": "a", "expires_at": "5000"})),
            1_000,
            Duration::from_secs(60),
            None,
        );
        assert_eq!(tokens.expires_at, 4_940);
    }

    #[test]
    fn test_string_lifetime_sets_expiry() {
        let tokens = TokenSet::from_response(
            response(serde_json::json!({"access_token": "a", "expires_in": "300"})),
            1_000,
            Duration::from_secs(60),
            None,
        );
        assert_eq!(tokens.expires_at, 1_300);
    }

    #[test]
    fn test_remaining_secs_saturates() {
        let tokens = TokenSet::from_response(
            response(serde_json::json!({"access_token": "a", "expires_at": i64::MIN})),
            1_000,
            Duration::from_secs(60),
            None,
        );
        assert_eq!(tokens.expires_at, i64::MIN);
        assert!(!tokens.is_valid_at(1_000));
        assert_eq!(tokens.remaining_secs(1_000), i64::MIN);
        assert_eq!(tokens.remaining_secs(-1), i64::MIN + 1);
    }

    #[test]
    fn test_refresh_keeps_previous_tokens_when_omitted() {
        let previous = TokenSet {
            access_token: "old".into(),
            id_token: Some("id-old".into()),
            refresh_token: Some("r-old".into()),
            token_type: "Bearer".into(),
            expires_at: 0,
        };

        let tokens = TokenSet::from_response(
            response(serde_json::json!({"access_token": "new", "expires_in": 60})),
            100,
            Duration::ZERO,
            Some(&previous),
        );
        assert_eq!(tokens.access_token, "new");
        assert_eq!(tokens.refresh_token.as_deref(), Some("r-old"));
        assert_eq!(tokens.id_token.as_deref(), Some("id-old"));

        let rotated = TokenSet::from_response(
            response(serde_json::json!({"access_token": "new", "refresh_token": "r-new"})),
            100,
            Duration::ZERO,
            Some(&previous),
        );
        assert_eq!(rotated.refresh_token.as_deref(), Some("r-new"));
    }

    #[test]
    fn test_validity_is_strict() {
        let tokens = TokenSet {
            access_token: "a".into(),
            id_token: None,
            refresh_token: None,
            token_type: "Bearer".into(),
            expires_at: 100,
        };
        assert!(tokens.is_valid_at(99));
        assert!(!tokens.is_valid_at(100));
        assert_eq!(tokens.remaining_secs(40), 60);
    }

    #[test]
    fn test_persisted_token_set_format() {
        let stored = r#"{"access_token":"a","refresh_token":"r","token_type":"Bearer","expires_at":1700000000}"#;
        let tokens: TokenSet = serde_json::from_str(stored).unwrap();
        assert_eq!(tokens.refresh_token.as_deref(), Some("r"));
        assert!(tokens.id_token.is_none());
        assert_eq!(serde_json::to_string(&tokens).unwrap(), stored);
    }

    #[test]
    fn test_roles_from_nested_array() {
        let claims: UserInfo = serde_json::from_value(serde_json::json!({
            "sub": "u1",
            "realm_access": { "roles": ["admin", "doctor", 7] }
        }))
        .unwrap();

        let roles = claims.roles("realm_access.roles");
        assert_eq!(roles.len(), 2);
        assert!(roles.contains("admin"));
        assert!(roles.contains("doctor"));
    }

    #[test]
    fn test_roles_from_comma_separated_string() {
        let claims: UserInfo = serde_json::from_value(serde_json::json!({
            "sub": "u1",
            "groups": "nurse, reception,,"
        }))
        .unwrap();

        let roles = claims.roles("groups");
        assert_eq!(roles.len(), 2);
        assert!(roles.contains("reception"));
    }

    #[test]
    fn test_roles_missing_claim() {
        let claims: UserInfo = serde_json::from_value(serde_json::json!({"sub": "u1"})).unwrap();
        assert!(claims.roles("realm_access.roles").is_empty());
    }

    #[test]
    fn test_auth_user_from_claims() {
        let claims: UserInfo = serde_json::from_value(serde_json::json!({
            "sub": "u1",
            "preferred_username": "jdoe",
            "email": "jdoe@clinic.test",
            "given_name": "Jo",
            "realm_access": { "roles": ["Admin"] }
        }))
        .unwrap();
        let tokens = TokenSet {
            access_token: "at".into(),
            id_token: Some("it".into()),
            refresh_token: None,
            token_type: "Bearer".into(),
            expires_at: 1,
        };

        let user = AuthUser::from_claims(&claims, &tokens, "realm_access.roles");
        assert_eq!(user.id, "u1");
        assert_eq!(user.username, "jdoe");
        assert_eq!(user.last_name, "");
        assert!(user.roles.contains("Admin"));
        assert!(!user.roles.contains("admin"));
        assert_eq!(user.access_token.as_deref(), Some("at"));
        assert_eq!(user.id_token.as_deref(), Some("it"));
        assert_eq!(user.display_name(), "Jo");
    }

    #[test]
    fn test_claims_round_trip_keeps_unknown_fields() {
        let json = serde_json::json!({
            "sub": "u1",
            "email": "a@b.c",
            "realm_access": { "roles": ["admin"] },
            "locale": "de"
        });
        let claims: UserInfo = serde_json::from_value(json.clone()).unwrap();
        assert_eq!(serde_json::to_value(&claims).unwrap(), json);
    }

    #[test]
    fn test_oauth_error_display() {
        let err: OAuthErrorResponse = serde_json::from_str(
            r#"{"error":"invalid_grant","error_description":"Code not valid"}"#,
        )
        .unwrap();
        assert_eq!(err.to_string(), "invalid_grant: Code not valid");
    }
}
