//! Host capabilities used by the auth state machine.
//!
//! The protocol logic never touches process globals directly. Entropy and
//! page navigation are reached through the narrow traits below so the same
//! state machine runs in a browser shell, a terminal or a unit test. Durable
//! storage lives in [`crate::storage`].

use std::sync::{Arc, Mutex};

use rand::RngCore;
use url::Url;

use crate::events::{AuthObserver, TracingObserver};
use crate::storage::KeyValueStore;

/// Source of cryptographically secure random bytes.
pub trait RandomSource: Send + Sync {
    /// Fills `buf` with random bytes.
    fn fill_bytes(&self, buf: &mut [u8]);
}

/// [`RandomSource`] backed by the operating system RNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsRandom;

impl RandomSource for OsRandom {
    fn fill_bytes(&self, buf: &mut [u8]) {
        rand::rngs::OsRng.fill_bytes(buf);
    }
}

/// Page navigation for the host.
///
/// `navigate` is a full navigation: in a browser the current page is torn
/// down, so callers treat a successful call as the end of the current flow.
/// `replace_history` swaps the visible URL without reloading.
pub trait Navigator: Send + Sync {
    /// The URL the host is currently showing.
    fn current_url(&self) -> Url;

    /// Performs a full navigation to `url`.
    fn navigate(&self, url: &Url);

    /// Replaces the visible URL without a reload or a new history entry.
    fn replace_history(&self, url: &Url);
}

/// A [`Navigator`] for hosts without a real browser.
///
/// It keeps the "current" URL in memory and records every full navigation,
/// which lets a terminal host print the redirect target and lets tests assert
/// on it.
#[derive(Debug)]
pub struct HeadlessNavigator {
    inner: Mutex<HeadlessState>,
}

#[derive(Debug)]
struct HeadlessState {
    current: Url,
    navigations: Vec<Url>,
}

impl HeadlessNavigator {
    /// Creates a navigator positioned at `current`.
    #[must_use]
    pub fn new(current: Url) -> Self {
        Self {
            inner: Mutex::new(HeadlessState {
                current,
                navigations: Vec::new(),
            }),
        }
    }

    /// All full navigations performed so far, oldest first.
    #[must_use]
    pub fn navigations(&self) -> Vec<Url> {
        self.lock().navigations.clone()
    }

    /// The most recent full navigation, if any.
    #[must_use]
    pub fn last_navigation(&self) -> Option<Url> {
        self.lock().navigations.last().cloned()
    }

    /// Moves the navigator to `url` as if the user had opened it.
    pub fn set_current(&self, url: Url) {
        self.lock().current = url;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HeadlessState> {
        // A poisoned lock only means another thread panicked mid-update; the
        // recorded URLs are still usable.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Navigator for HeadlessNavigator {
    fn current_url(&self) -> Url {
        self.lock().current.clone()
    }

    fn navigate(&self, url: &Url) {
        let mut state = self.lock();
        state.current = url.clone();
        state.navigations.push(url.clone());
    }

    fn replace_history(&self, url: &Url) {
        self.lock().current = url.clone();
    }
}

/// Everything the auth service needs from its host.
#[derive(Clone)]
pub struct HostCapabilities {
    pub store: Arc<dyn KeyValueStore>,
    pub random: Arc<dyn RandomSource>,
    pub navigator: Arc<dyn Navigator>,
    pub observer: Arc<dyn AuthObserver>,
}

impl HostCapabilities {
    /// Capabilities with OS randomness and the tracing observer.
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>, navigator: Arc<dyn Navigator>) -> Self {
        Self {
            store,
            random: Arc::new(OsRandom),
            navigator,
            observer: Arc::new(TracingObserver),
        }
    }

    /// Replaces the random source.
    #[must_use]
    pub fn with_random(mut self, random: Arc<dyn RandomSource>) -> Self {
        self.random = random;
        self
    }

    /// Replaces the event observer.
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn AuthObserver>) -> Self {
        self.observer = observer;
        self
    }
}

impl std::fmt::Debug for HostCapabilities {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostCapabilities")
            .field("observer", &self.observer.name())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_os_random_fills_buffer() {
        let mut a = [0u8; 32];
        let mut b = [0u8; 32];
        OsRandom.fill_bytes(&mut a);
        OsRandom.fill_bytes(&mut b);
        assert_ne!(a, b);
    }

    #[test]
    fn test_headless_navigator_records_navigations() {
        let nav = HeadlessNavigator::new(Url::parse("https://app.test/").unwrap());
        assert!(nav.last_navigation().is_none());

        let target = Url::parse("https://idp.test/authorize?x=1").unwrap();
        nav.navigate(&target);
        assert_eq!(nav.current_url(), target);
        assert_eq!(nav.last_navigation(), Some(target));
        assert_eq!(nav.navigations().len(), 1);
    }

    #[test]
    fn test_replace_history_does_not_record() {
        let nav = HeadlessNavigator::new(Url::parse("https://app.test/cb?code=x").unwrap());
        nav.replace_history(&Url::parse("https://app.test/cb").unwrap());
        assert_eq!(nav.current_url().as_str(), "https://app.test/cb");
        assert!(nav.navigations().is_empty());
    }
}
