//! # clinicdesk-auth
//!
//! OpenID Connect client for the ClinicDesk practice-management front end.
//!
//! This crate provides:
//! - Authorization Code + PKCE login against any discoverable OIDC provider
//! - Token set persistence, expiry checks and refresh
//! - A session bridge publishing observable session snapshots to UI code
//! - Role-based access decisions for routes and inline content
//!
//! ## Overview
//!
//! Everything the client needs from its host (persistent storage, randomness,
//! navigation and event observation) is injected through
//! [`HostCapabilities`], so the same state machine runs in a browser shell,
//! a CLI or a test harness.
//!
//! ## Modules
//!
//! - [`config`] - Client configuration and validation
//! - [`discovery`] - OIDC discovery document fetching and caching
//! - [`pkce`] - PKCE verifier and challenge generation
//! - [`service`] - The [`AuthService`] contract and the OIDC state machine
//! - [`factory`] - Single-instance lifecycle of the auth service
//! - [`bridge`] - Observable session state for UI code
//! - [`rbac`] - Role checks, route guards and conditional visibility
//! - [`storage`] - Key-value persistence of session state
//! - [`events`] - Lifecycle events and observers
//! - [`host`] - Injected host capabilities

pub mod bridge;
pub mod config;
pub mod discovery;
pub mod error;
pub mod events;
pub mod factory;
pub mod host;
pub mod oidc;
pub mod pkce;
pub mod rbac;
pub mod service;
pub mod storage;
pub mod types;

pub use bridge::{SessionBridge, SessionSnapshot};
pub use config::{AuthConfig, ConfigError};
pub use discovery::{DiscoveryCache, DiscoveryError, DiscoveryOptions, OidcDiscoveryClient};
pub use error::{AuthError, CallbackError, ErrorCategory};
pub use events::{AuthEvent, AuthObserver, ClearReason, TracingObserver};
pub use factory::{AuthHandle, AuthServiceFactory};
pub use host::{HeadlessNavigator, HostCapabilities, Navigator, OsRandom, RandomSource};
pub use oidc::OidcDiscoveryDocument;
pub use pkce::{PkceChallenge, PkceChallengeMethod, PkceError, PkceVerifier};
pub use rbac::{GuardDecision, Rbac, RoleQuery, RouteGuard, Visibility};
pub use service::{AuthService, AuthState, OidcAuthService};
pub use storage::{FileStore, KeyValueStore, MemoryStore, SessionStore};
pub use types::{AuthUser, TokenSet, UserInfo};

/// Type alias for auth results.
pub type AuthResult<T> = Result<T, AuthError>;

/// Prelude module for convenient imports.
///
/// ```ignore
/// use clinicdesk_auth::prelude::*;
/// ```
pub mod prelude {
    pub use crate::AuthResult;
    pub use crate::bridge::{SessionBridge, SessionSnapshot};
    pub use crate::config::AuthConfig;
    pub use crate::error::{AuthError, CallbackError, ErrorCategory};
    pub use crate::factory::{AuthHandle, AuthServiceFactory};
    pub use crate::host::{HostCapabilities, Navigator};
    pub use crate::rbac::{GuardDecision, Rbac, RouteGuard, Visibility};
    pub use crate::service::{AuthService, AuthState};
    pub use crate::storage::{FileStore, KeyValueStore, MemoryStore};
    pub use crate::types::AuthUser;
}
