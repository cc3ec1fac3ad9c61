//! Typed access to persisted session state.

use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;

use super::kv::KeyValueStore;
use crate::types::{PendingLogin, TokenSet, UserInfo};
use crate::{AuthError, AuthResult};

/// Storage keys. They match what the web front end writes to local storage,
/// so a browser host and this crate can share one session.
pub mod keys {
    /// JSON-encoded [`TokenSet`](crate::types::TokenSet).
    pub const TOKEN_SET: &str = "tokenSet";
    /// JSON-encoded [`UserInfo`](crate::types::UserInfo) claims.
    pub const USER_INFO: &str = "userInfo";
    /// Raw PKCE code verifier of the pending login.
    pub const CODE_VERIFIER: &str = "code_verifier";
    /// Raw state nonce of the pending login.
    pub const AUTH_STATE: &str = "auth_state";
}

/// Typed wrapper over a [`KeyValueStore`].
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<dyn KeyValueStore>,
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore").finish_non_exhaustive()
    }
}

impl SessionStore {
    /// Wraps a key-value store.
    #[must_use]
    pub fn new(inner: Arc<dyn KeyValueStore>) -> Self {
        Self { inner }
    }

    /// Reads the persisted token set.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the store fails or the value is not a valid
    /// token set.
    pub async fn load_token_set(&self) -> AuthResult<Option<TokenSet>> {
        self.load_json(keys::TOKEN_SET).await
    }

    /// Persists the token set.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the store cannot be written.
    pub async fn save_token_set(&self, tokens: &TokenSet) -> AuthResult<()> {
        self.save_json(keys::TOKEN_SET, tokens).await
    }

    /// Reads the cached claims.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the store fails or the value is malformed.
    pub async fn load_claims(&self) -> AuthResult<Option<UserInfo>> {
        self.load_json(keys::USER_INFO).await
    }

    /// Caches the claims.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the store cannot be written.
    pub async fn save_claims(&self, claims: &UserInfo) -> AuthResult<()> {
        self.save_json(keys::USER_INFO, claims).await
    }

    /// Reads the pending login's code verifier.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the store cannot be read.
    pub async fn load_verifier(&self) -> AuthResult<Option<String>> {
        self.inner.get(keys::CODE_VERIFIER).await
    }

    /// Reads the pending login's state nonce.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the store cannot be read.
    pub async fn load_state(&self) -> AuthResult<Option<String>> {
        self.inner.get(keys::AUTH_STATE).await
    }

    /// Returns `true` if both halves of a pending login are stored.
    pub async fn has_pending_login(&self) -> bool {
        matches!(
            (self.load_verifier().await, self.load_state().await),
            (Ok(Some(_)), Ok(Some(_)))
        )
    }

    /// Persists a pending login.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the store cannot be written.
    pub async fn save_pending(&self, pending: &PendingLogin) -> AuthResult<()> {
        self.inner
            .set(keys::CODE_VERIFIER, &pending.code_verifier)
            .await?;
        self.inner.set(keys::AUTH_STATE, &pending.state).await
    }

    /// Removes the pending login.
    ///
    /// # Errors
    ///
    /// Returns the first storage error; every key is still attempted.
    pub async fn clear_pending(&self) -> AuthResult<()> {
        self.remove_all(&[keys::CODE_VERIFIER, keys::AUTH_STATE])
            .await
    }

    /// Removes the token set and cached claims, keeping any pending login.
    ///
    /// # Errors
    ///
    /// Returns the first storage error; every key is still attempted.
    pub async fn clear_tokens(&self) -> AuthResult<()> {
        self.remove_all(&[keys::TOKEN_SET, keys::USER_INFO]).await
    }

    /// Removes every session key.
    ///
    /// # Errors
    ///
    /// Returns the first storage error; every key is still attempted.
    pub async fn clear_all(&self) -> AuthResult<()> {
        self.remove_all(&[
            keys::TOKEN_SET,
            keys::USER_INFO,
            keys::CODE_VERIFIER,
            keys::AUTH_STATE,
        ])
        .await
    }

    async fn remove_all(&self, keys: &[&str]) -> AuthResult<()> {
        let mut first_error = None;
        for key in keys {
            if let Err(e) = self.inner.remove(key).await {
                tracing::warn!(key = %key, error = %e, "Failed to remove session key");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    async fn load_json<T: DeserializeOwned>(&self, key: &str) -> AuthResult<Option<T>> {
        match self.inner.get(key).await? {
            None => Ok(None),
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| AuthError::storage(format!("Malformed '{}' entry: {}", key, e))),
        }
    }

    async fn save_json<T: Serialize>(&self, key: &str, value: &T) -> AuthResult<()> {
        let raw = serde_json::to_string(value)
            .map_err(|e| AuthError::storage(format!("Failed to encode '{}': {}", key, e)))?;
        self.inner.set(key, &raw).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    fn tokens() -> TokenSet {
        TokenSet {
            access_token: "at".into(),
            id_token: Some("it".into()),
            refresh_token: Some("rt".into()),
            token_type: "Bearer".into(),
            expires_at: 42,
        }
    }

    fn pending() -> PendingLogin {
        PendingLogin {
            code_verifier: "v".repeat(43),
            state: "s".into(),
        }
    }

    #[tokio::test]
    async fn test_token_set_round_trip() {
        let kv = Arc::new(MemoryStore::new());
        let store = SessionStore::new(kv.clone());

        assert!(store.load_token_set().await.unwrap().is_none());
        store.save_token_set(&tokens()).await.unwrap();
        assert_eq!(store.load_token_set().await.unwrap(), Some(tokens()));

        let raw = kv.get(keys::TOKEN_SET).await.unwrap().unwrap();
        assert!(raw.contains("\"expires_at\":42"));
    }

    #[tokio::test]
    async fn test_malformed_token_set_is_storage_error() {
        let kv = Arc::new(MemoryStore::new());
        kv.set(keys::TOKEN_SET, "{broken").await.unwrap();

        let err = SessionStore::new(kv).load_token_set().await.unwrap_err();
        assert!(matches!(err, AuthError::Storage { .. }));
    }

    #[tokio::test]
    async fn test_pending_login_uses_raw_values() {
        let kv = Arc::new(MemoryStore::new());
        let store = SessionStore::new(kv.clone());

        assert!(!store.has_pending_login().await);
        store.save_pending(&pending()).await.unwrap();
        assert!(store.has_pending_login().await);
        assert_eq!(
            kv.get(keys::AUTH_STATE).await.unwrap().as_deref(),
            Some("s")
        );

        store.clear_pending().await.unwrap();
        assert!(store.load_verifier().await.unwrap().is_none());
        assert!(store.load_state().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_clear_tokens_keeps_pending_login() {
        let kv = Arc::new(MemoryStore::new());
        let store = SessionStore::new(kv.clone());
        store.save_token_set(&tokens()).await.unwrap();
        store.save_pending(&pending()).await.unwrap();

        store.clear_tokens().await.unwrap();
        assert!(store.load_token_set().await.unwrap().is_none());
        assert!(store.has_pending_login().await);

        store.clear_all().await.unwrap();
        assert!(kv.is_empty().await);
    }
}
