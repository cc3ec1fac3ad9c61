//! OpenID Connect Discovery client and caching.
//!
//! - [`OidcDiscoveryClient`] fetches `{issuer}/.well-known/openid-configuration`
//!   and checks that the returned `issuer` matches the one requested.
//! - [`DiscoveryCache`] keeps one document per issuer for a configurable TTL.
//!   The auth service invalidates an entry when a call against one of its
//!   endpoints fails at the network level, so a moved endpoint is picked up on
//!   the next attempt.
//!
//! # Security Considerations
//!
//! - Only HTTPS issuer URLs are accepted unless `allow_http` is set
//! - The response body is size-limited
//! - Every request inherits the client's timeout
//!
//! # References
//!
//! - [OpenID Connect Discovery 1.0](https://openid.net/specs/openid-connect-discovery-1_0.html)

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use url::Url;

use crate::config::AuthConfig;
use crate::oidc::OidcDiscoveryDocument;

/// Maximum discovery document size accepted by default (1 MB).
pub const DEFAULT_MAX_RESPONSE_SIZE: usize = 1024 * 1024;

/// Options for discovery fetching and caching.
#[derive(Debug, Clone)]
pub struct DiscoveryOptions {
    /// Time-to-live for cached documents (default: 1 hour).
    pub ttl: Duration,

    /// Maximum response size in bytes (default: 1 MB).
    pub max_response_size: usize,

    /// Whether to allow HTTP (non-HTTPS) issuer URLs.
    pub allow_http: bool,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(3600),
            max_response_size: DEFAULT_MAX_RESPONSE_SIZE,
            allow_http: false,
        }
    }
}

impl DiscoveryOptions {
    /// Sets the cache TTL.
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Sets the maximum response size.
    #[must_use]
    pub fn with_max_response_size(mut self, size: usize) -> Self {
        self.max_response_size = size;
        self
    }

    /// Allows HTTP (non-HTTPS) issuer URLs. Testing only.
    #[must_use]
    pub fn with_allow_http(mut self, allow: bool) -> Self {
        self.allow_http = allow;
        self
    }
}

impl From<&AuthConfig> for DiscoveryOptions {
    fn from(config: &AuthConfig) -> Self {
        Self {
            ttl: config.discovery_ttl,
            max_response_size: DEFAULT_MAX_RESPONSE_SIZE,
            allow_http: config.allow_http,
        }
    }
}

/// Errors that can occur during OIDC discovery.
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    /// A network error occurred while fetching the discovery document.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// The HTTP request returned a non-success status code.
    #[error("HTTP error: status {0}")]
    HttpError(u16),

    /// The discovery document could not be parsed as JSON.
    #[error("Failed to parse discovery document: {0}")]
    ParseError(String),

    /// The issuer URL could not be parsed or is invalid.
    #[error("Invalid issuer URL: {0}")]
    InvalidIssuer(String),

    /// The issuer in the discovery document does not match the expected issuer.
    #[error("Issuer mismatch: expected {expected}, got {actual}")]
    IssuerMismatch {
        /// The expected issuer URL.
        expected: String,
        /// The issuer URL from the discovery document.
        actual: String,
    },

    /// The provider does not advertise an endpoint the caller needs.
    #[error("Missing required field: {0}")]
    MissingField(String),

    /// The issuer URL scheme is not allowed.
    #[error("Invalid URL scheme: {0} (only HTTPS is allowed)")]
    InvalidScheme(String),

    /// The response exceeded the maximum allowed size.
    #[error("Response exceeds maximum size of {max_size} bytes")]
    ResponseTooLarge {
        /// The maximum allowed size.
        max_size: usize,
    },
}

impl DiscoveryError {
    /// Returns `true` if the provider could not be reached at all.
    #[must_use]
    pub fn is_network(&self) -> bool {
        matches!(self, Self::NetworkError(_))
    }
}

/// Client for fetching OIDC discovery documents.
#[derive(Debug, Clone)]
pub struct OidcDiscoveryClient {
    http_client: reqwest::Client,
    options: DiscoveryOptions,
}

impl OidcDiscoveryClient {
    /// Creates a discovery client on top of an existing HTTP client.
    ///
    /// The HTTP client's timeout applies to every discovery request.
    #[must_use]
    pub fn new(http_client: reqwest::Client, options: DiscoveryOptions) -> Self {
        Self {
            http_client,
            options,
        }
    }

    /// Fetches and validates the discovery document for `issuer`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The issuer URL is not HTTPS (unless `allow_http` is set)
    /// - The document cannot be fetched or exceeds the size limit
    /// - The document cannot be parsed
    /// - The `issuer` in the document does not match
    pub async fn discover(&self, issuer: &Url) -> Result<OidcDiscoveryDocument, DiscoveryError> {
        self.validate_issuer_scheme(issuer)?;

        let discovery_url = build_discovery_url(issuer);

        let response = self
            .http_client
            .get(discovery_url)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(issuer = %issuer, error = %e, "Failed to fetch OIDC discovery");
                DiscoveryError::NetworkError(e.to_string())
            })?;

        if !response.status().is_success() {
            return Err(DiscoveryError::HttpError(response.status().as_u16()));
        }

        let max_size = self.options.max_response_size;
        if let Some(len) = response.content_length()
            && len as usize > max_size
        {
            return Err(DiscoveryError::ResponseTooLarge { max_size });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| DiscoveryError::NetworkError(e.to_string()))?;
        if body.len() > max_size {
            return Err(DiscoveryError::ResponseTooLarge { max_size });
        }

        let document: OidcDiscoveryDocument = serde_json::from_slice(&body).map_err(|e| {
            tracing::warn!(issuer = %issuer, error = %e, "Failed to parse OIDC discovery document");
            DiscoveryError::ParseError(e.to_string())
        })?;

        validate_issuer(&document, issuer)?;

        tracing::debug!(issuer = %document.issuer, "Discovered OIDC configuration");

        Ok(document)
    }

    fn validate_issuer_scheme(&self, issuer: &Url) -> Result<(), DiscoveryError> {
        match issuer.scheme() {
            "https" => Ok(()),
            "http" if self.options.allow_http => Ok(()),
            other => Err(DiscoveryError::InvalidScheme(other.to_string())),
        }
    }
}

/// `{issuer}/.well-known/openid-configuration`, keeping any issuer path.
fn build_discovery_url(issuer: &Url) -> Url {
    let mut discovery_url = issuer.clone();
    let path = issuer.path().trim_end_matches('/');
    discovery_url.set_path(&format!("{}/.well-known/openid-configuration", path));
    discovery_url.set_query(None);
    discovery_url.set_fragment(None);
    discovery_url
}

/// The document's issuer must be identical to the one used for the lookup
/// (trailing slashes aside).
fn validate_issuer(document: &OidcDiscoveryDocument, expected: &Url) -> Result<(), DiscoveryError> {
    let document_issuer = Url::parse(&document.issuer).map_err(|e| {
        DiscoveryError::InvalidIssuer(format!(
            "Invalid issuer URL in document: {} - {}",
            document.issuer, e
        ))
    })?;

    let expected_normalized = normalize_issuer_key(expected);
    let document_normalized = normalize_issuer_key(&document_issuer);

    if expected_normalized != document_normalized {
        return Err(DiscoveryError::IssuerMismatch {
            expected: expected_normalized,
            actual: document_normalized,
        });
    }

    Ok(())
}

struct CachedDiscovery {
    document: OidcDiscoveryDocument,
    fetched_at: Instant,
}

/// In-memory, per-issuer cache of discovery documents.
pub struct DiscoveryCache {
    client: OidcDiscoveryClient,
    entries: RwLock<HashMap<String, CachedDiscovery>>,
    ttl: Duration,
}

impl DiscoveryCache {
    /// Creates an empty cache backed by `client`.
    #[must_use]
    pub fn new(client: OidcDiscoveryClient) -> Self {
        let ttl = client.options.ttl;
        Self {
            client,
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Returns the cached document for `issuer`, fetching it when absent or
    /// older than the TTL.
    ///
    /// # Errors
    ///
    /// Returns an error if a fetch is needed and fails.
    pub async fn get(&self, issuer: &Url) -> Result<OidcDiscoveryDocument, DiscoveryError> {
        let key = normalize_issuer_key(issuer);

        {
            let entries = self.entries.read().await;
            if let Some(cached) = entries.get(&key) {
                if cached.fetched_at.elapsed() < self.ttl {
                    tracing::trace!(issuer = %key, "OIDC discovery cache hit");
                    return Ok(cached.document.clone());
                }
                tracing::trace!(issuer = %key, "OIDC discovery cache entry expired");
            }
        }

        let document = self.client.discover(issuer).await?;

        self.entries.write().await.insert(
            key,
            CachedDiscovery {
                document: document.clone(),
                fetched_at: Instant::now(),
            },
        );

        Ok(document)
    }

    /// Drops the cached document for `issuer`.
    pub async fn invalidate(&self, issuer: &Url) {
        let key = normalize_issuer_key(issuer);
        if self.entries.write().await.remove(&key).is_some() {
            tracing::debug!(issuer = %key, "Invalidated OIDC discovery cache entry");
        }
    }

    /// Drops every cached document.
    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    /// Returns the number of cached documents.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Returns `true` if nothing is cached.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

fn normalize_issuer_key(issuer: &Url) -> String {
    issuer.as_str().trim_end_matches('/').to_string()
}
