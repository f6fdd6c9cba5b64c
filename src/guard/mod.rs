pub mod engine;
pub mod errors;
pub mod issuer;
pub mod lists;
pub mod pattern;
pub mod token;

use std::collections::BTreeSet;

use axum::http::Method;
use serde::{Deserialize, Serialize};

use crate::errors::PalisadeError;

pub use engine::DecisionEngine;
pub use errors::AuthError;
pub use issuer::TokenIssuer;
pub use pattern::Pattern;
pub use token::{TokenClaims, TokenConfig};

/// Immutable description of one inbound API request, built by the host layer
/// before evaluation. `route` is the path below the API mount prefix with a
/// leading slash and no query string.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    pub method: Method,
    pub route: String,
    /// Top-level namespaces registered on the guarded API.
    pub namespaces: BTreeSet<String>,
    /// Raw value of the authorization header, if one was sent.
    pub authorization: Option<String>,
}

impl RequestDescriptor {
    pub fn new(method: Method, route: impl Into<String>) -> Self {
        let mut route = route.into();
        if let Some(idx) = route.find('?') {
            route.truncate(idx);
        }
        if !route.starts_with('/') {
            route.insert(0, '/');
        }
        Self {
            method,
            route,
            namespaces: BTreeSet::new(),
            authorization: None,
        }
    }

    pub fn with_namespaces(mut self, namespaces: impl IntoIterator<Item = String>) -> Self {
        self.namespaces = namespaces.into_iter().collect();
        self
    }

    pub fn with_authorization(mut self, header: Option<String>) -> Self {
        self.authorization = header;
        self
    }
}

/// Snapshot of the stored policy record for one evaluation. Rebuilt per
/// request from the settings store; every field can still be superseded by an
/// [`OverrideProvider`] at decision time.
///
/// Absent or malformed stored values degrade to this struct's defaults: every
/// boolean false, both lists empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub prevent_anonymous_access: bool,
    pub allow_index_access: bool,
    pub allow_namespace_access: bool,
    pub allow_user_access: bool,
    pub check_options_requests: bool,
    pub require_anonymous_token: bool,
    pub allow_user_token: bool,
    /// One wildcard pattern per line. Presence makes anonymous access
    /// default-closed: anything unmatched is denied.
    pub anonymous_requests_allowlist: String,
    /// One wildcard pattern per line. Only consulted when the allowlist is
    /// empty.
    pub anonymous_requests_denylist: String,
}

/// A resolved user principal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    pub id: String,
    pub login: String,
}

/// The effective caller as seen by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    Anonymous,
    User(UserIdentity),
}

/// Why a request was denied. Client responses always carry the generic
/// unauthorized message; the reason is for logs only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    AnonymousAccessRestricted,
    IndexAccessDisabled,
    NamespaceAccessDisabled,
    UserEndpointDisabled,
    ListRule,
}

impl std::fmt::Display for DenyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let reason = match self {
            DenyReason::AnonymousAccessRestricted => "blanket anonymous restriction",
            DenyReason::IndexAccessDisabled => "index access disabled",
            DenyReason::NamespaceAccessDisabled => "namespace index access disabled",
            DenyReason::UserEndpointDisabled => "users endpoint disabled",
            DenyReason::ListRule => "list rule",
        };
        f.write_str(reason)
    }
}

/// Terminal output of the engine for one request.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    /// Proceed. When token validation promoted the caller, the resolved user
    /// rides along so the host can set the effective identity for the rest of
    /// the request.
    Allow(Option<UserIdentity>),
    Deny(DenyReason),
    Error(AuthError),
}

/// Per-decision override hooks. One method per named hook; each defaults to
/// "no opinion" and, when implemented, takes precedence over the stored
/// setting regardless of its value. Queried fresh on every decision.
pub trait OverrideProvider: Send + Sync {
    fn prevent_anonymous_access(&self, _request: &RequestDescriptor) -> Option<bool> {
        None
    }

    fn allow_index_access(&self) -> Option<bool> {
        None
    }

    fn allow_namespace_access(&self, _namespace: &str) -> Option<bool> {
        None
    }

    fn allow_user_access(&self) -> Option<bool> {
        None
    }

    fn check_options_requests(&self) -> Option<bool> {
        None
    }

    fn require_anonymous_token(&self, _request: &RequestDescriptor) -> Option<bool> {
        None
    }

    fn allow_user_token(&self, _request: &RequestDescriptor) -> Option<bool> {
        None
    }

    fn anonymous_requests_allowlist(&self, _request: &RequestDescriptor) -> Option<Vec<String>> {
        None
    }

    fn anonymous_requests_denylist(&self, _request: &RequestDescriptor) -> Option<Vec<String>> {
        None
    }

    fn jwt_issuer(&self) -> Option<String> {
        None
    }

    fn jwt_audience(&self) -> Option<String> {
        None
    }

    fn jwt_secret(&self) -> Option<String> {
        None
    }

    /// Additional claims to merge into a minted token for `user`. Reserved
    /// claims in the returned map are discarded at issuance.
    fn jwt_additional_claims(
        &self,
        _user: &UserIdentity,
    ) -> Option<std::collections::BTreeMap<String, serde_json::Value>> {
        None
    }

    fn unauthorized_message(&self) -> Option<String> {
        None
    }

    fn invalid_jwt_message(&self) -> Option<String> {
        None
    }
}

/// The no-op provider: every stored setting stands.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOverrides;

impl OverrideProvider for NoOverrides {}

/// Maps a token subject to a known user.
#[async_trait::async_trait]
pub trait IdentityResolver: Send + Sync {
    async fn lookup_user(&self, id: &str) -> Result<Option<UserIdentity>, PalisadeError>;
}
