//! Role-based access decisions.
//!
//! [`Rbac`] is a pure view over the current user's role set. Every check
//! returns `false` when nobody is signed in. Role names are compared
//! case-sensitively.
//!
//! [`RouteGuard`] and [`Visibility`] are the two decision contracts UI code
//! builds on: one gates whole routes with a redirect, the other picks between
//! content and an optional fallback inline.

use std::collections::HashSet;

use crate::types::AuthUser;

/// Default redirect target for denied routes.
pub const DEFAULT_DENIED_REDIRECT: &str = "/dashboard";

/// Role query accepted by [`Rbac::has_role`]: one role, or a list where any
/// entry suffices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoleQuery<'a> {
    One(&'a str),
    AnyOf(Vec<&'a str>),
}

impl<'a> From<&'a str> for RoleQuery<'a> {
    fn from(role: &'a str) -> Self {
        Self::One(role)
    }
}

impl<'a> From<&'a String> for RoleQuery<'a> {
    fn from(role: &'a String) -> Self {
        Self::One(role)
    }
}

impl<'a> From<&'a [&'a str]> for RoleQuery<'a> {
    fn from(roles: &'a [&'a str]) -> Self {
        Self::AnyOf(roles.to_vec())
    }
}

impl<'a, const N: usize> From<[&'a str; N]> for RoleQuery<'a> {
    fn from(roles: [&'a str; N]) -> Self {
        Self::AnyOf(roles.to_vec())
    }
}

impl<'a> From<&'a [String]> for RoleQuery<'a> {
    fn from(roles: &'a [String]) -> Self {
        Self::AnyOf(roles.iter().map(String::as_str).collect())
    }
}

impl<'a> From<&'a Vec<String>> for RoleQuery<'a> {
    fn from(roles: &'a Vec<String>) -> Self {
        Self::from(roles.as_slice())
    }
}

/// Role checks for the current user.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Rbac {
    // `None` when no user is signed in.
    roles: Option<HashSet<String>>,
}

impl Rbac {
    /// Derives the decision view for `user`.
    #[must_use]
    pub fn for_user(user: Option<&AuthUser>) -> Self {
        Self {
            roles: user.map(|u| u.roles.clone()),
        }
    }

    /// A view with no signed-in user. Every check is `false`.
    #[must_use]
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Returns `true` if a user is signed in.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.roles.is_some()
    }

    /// The held roles, sorted. Empty when nobody is signed in.
    #[must_use]
    pub fn roles(&self) -> Vec<&str> {
        let mut roles: Vec<&str> = self
            .roles
            .iter()
            .flatten()
            .map(String::as_str)
            .collect();
        roles.sort_unstable();
        roles
    }

    fn holds(&self, role: &str) -> bool {
        self.roles.as_ref().is_some_and(|roles| roles.contains(role))
    }

    /// `true` if the role is held, or for a list, if any entry is held.
    #[must_use]
    pub fn has_role<'a>(&self, query: impl Into<RoleQuery<'a>>) -> bool {
        match query.into() {
            RoleQuery::One(role) => self.holds(role),
            RoleQuery::AnyOf(roles) => roles.iter().any(|r| self.holds(r)),
        }
    }

    /// `true` if at least one of `roles` is held. An empty list is `false`.
    #[must_use]
    pub fn has_any_role<I, S>(&self, roles: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        roles.into_iter().any(|r| self.holds(r.as_ref()))
    }

    /// `true` if every one of `roles` is held. An empty list is `true` for a
    /// signed-in user and `false` otherwise.
    #[must_use]
    pub fn has_all_roles<I, S>(&self, roles: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.is_authenticated() && roles.into_iter().all(|r| self.holds(r.as_ref()))
    }

    fn allows(&self, roles: &[String], require_all: bool) -> bool {
        if require_all {
            self.has_all_roles(roles)
        } else {
            self.has_any_role(roles)
        }
    }
}

/// Outcome of a [`RouteGuard`] check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    /// Render the route.
    Allow,
    /// Replace the current history entry with `to`, remembering `from`.
    Redirect { to: String, from: String },
}

impl GuardDecision {
    /// Returns `true` for [`GuardDecision::Allow`].
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }
}

/// Role requirement for a route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteGuard {
    pub roles: Vec<String>,
    pub require_all: bool,
    pub redirect_to: String,
}

impl RouteGuard {
    /// A guard allowing any one of `roles`, redirecting to `/dashboard`.
    #[must_use]
    pub fn new<I, S>(roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            roles: roles.into_iter().map(Into::into).collect(),
            require_all: false,
            redirect_to: DEFAULT_DENIED_REDIRECT.to_string(),
        }
    }

    /// Requires every role instead of any.
    #[must_use]
    pub fn require_all(mut self) -> Self {
        self.require_all = true;
        self
    }

    /// Overrides the redirect target.
    #[must_use]
    pub fn redirect_to(mut self, path: impl Into<String>) -> Self {
        self.redirect_to = path.into();
        self
    }

    /// Decides whether the route at `from` may render.
    #[must_use]
    pub fn check(&self, rbac: &Rbac, from: &str) -> GuardDecision {
        if rbac.allows(&self.roles, self.require_all) {
            return GuardDecision::Allow;
        }

        tracing::debug!(
            path = %from,
            required = ?self.roles,
            require_all = self.require_all,
            roles = ?rbac.roles(),
            "Route access denied"
        );

        GuardDecision::Redirect {
            to: self.redirect_to.clone(),
            from: from.to_string(),
        }
    }
}

/// Role requirement for an inline fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Visibility {
    pub roles: Vec<String>,
    pub require_all: bool,
}

impl Visibility {
    /// Visible to holders of any one of `roles`.
    #[must_use]
    pub fn any<I, S>(roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            roles: roles.into_iter().map(Into::into).collect(),
            require_all: false,
        }
    }

    /// Visible only to holders of every one of `roles`.
    #[must_use]
    pub fn all<I, S>(roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            require_all: true,
            ..Self::any(roles)
        }
    }

    /// Returns `true` if the fragment is visible.
    #[must_use]
    pub fn is_visible(&self, rbac: &Rbac) -> bool {
        rbac.allows(&self.roles, self.require_all)
    }

    /// Picks `content` when visible, else `fallback`.
    pub fn select<T>(&self, rbac: &Rbac, content: T, fallback: Option<T>) -> Option<T> {
        if self.is_visible(rbac) {
            Some(content)
        } else {
            fallback
        }
    }
}
