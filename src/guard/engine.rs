use axum::http::Method;
use once_cell::sync::Lazy;
use regex::Regex;

use super::lists::{self, ListDecision};
use super::pattern::Pattern;
use super::token::{self, TokenConfig};
use super::{
    DenyReason, Identity, IdentityResolver, OverrideProvider, PolicyConfig, RequestDescriptor,
    Verdict,
};

// The core users endpoints, with or without a trailing sub-route.
static USERS_ROUTE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^/wp/v\d+/users($|/)").expect("users route regex"));

/// Orchestrates token validation and route rules under a fixed precedence
/// order. First applicable rule wins; every path terminates in exactly one
/// [`Verdict`].
pub struct DecisionEngine<'a> {
    overrides: &'a dyn OverrideProvider,
    resolver: &'a dyn IdentityResolver,
    token_config: TokenConfig,
    route_prefix: String,
}

impl<'a> DecisionEngine<'a> {
    pub fn new(
        overrides: &'a dyn OverrideProvider,
        resolver: &'a dyn IdentityResolver,
        token_config: TokenConfig,
        route_prefix: impl Into<String>,
    ) -> Self {
        Self {
            overrides,
            resolver,
            token_config,
            route_prefix: route_prefix.into(),
        }
    }

    pub async fn decide(
        &self,
        request: &RequestDescriptor,
        config: &PolicyConfig,
        caller_is_authenticated: bool,
    ) -> Verdict {
        // Authenticated callers bypass all anonymous-access policy.
        if caller_is_authenticated {
            return Verdict::Allow(None);
        }

        match token::validate(
            request,
            config,
            &self.token_config,
            self.overrides,
            self.resolver,
        )
        .await
        {
            Err(error) => return Verdict::Error(error),
            Ok(Some(Identity::User(user))) => return Verdict::Allow(Some(user)),
            Ok(Some(Identity::Anonymous)) | Ok(None) => {}
        }

        // Unless explicitly opted in, OPTIONS requests are not subject to the
        // anonymous-access rules either (preflights must succeed).
        if request.method == Method::OPTIONS
            && !self
                .overrides
                .check_options_requests()
                .unwrap_or(config.check_options_requests)
        {
            return Verdict::Allow(None);
        }

        if self
            .overrides
            .prevent_anonymous_access(request)
            .unwrap_or(config.prevent_anonymous_access)
        {
            return Verdict::Deny(DenyReason::AnonymousAccessRestricted);
        }

        let route = request.route.as_str();

        if route == "/"
            && !self
                .overrides
                .allow_index_access()
                .unwrap_or(config.allow_index_access)
        {
            return Verdict::Deny(DenyReason::IndexAccessDisabled);
        }

        // A route that exactly names a registered namespace targets that
        // namespace's index; sub-routes below it do not.
        let bare = route.strip_prefix('/').unwrap_or(route);
        if request.namespaces.contains(bare)
            && !self
                .overrides
                .allow_namespace_access(bare)
                .unwrap_or(config.allow_namespace_access)
        {
            return Verdict::Deny(DenyReason::NamespaceAccessDisabled);
        }

        if USERS_ROUTE.is_match(route)
            && !self
                .overrides
                .allow_user_access()
                .unwrap_or(config.allow_user_access)
        {
            return Verdict::Deny(DenyReason::UserEndpointDisabled);
        }

        let allowlist = self.compiled_list(
            self.overrides.anonymous_requests_allowlist(request),
            &config.anonymous_requests_allowlist,
        );
        let denylist = self.compiled_list(
            self.overrides.anonymous_requests_denylist(request),
            &config.anonymous_requests_denylist,
        );

        match lists::evaluate(route, &allowlist, &denylist) {
            ListDecision::Deny => Verdict::Deny(DenyReason::ListRule),
            // Default-open: nothing above had an objection.
            ListDecision::Allow | ListDecision::NoOpinion => Verdict::Allow(None),
        }
    }

    fn compiled_list(&self, overridden: Option<Vec<String>>, stored: &str) -> Vec<Pattern> {
        let rules = overridden.unwrap_or_else(|| lists::split_patterns(stored));
        rules
            .iter()
            .map(|rule| Pattern::compile(rule, &self.route_prefix))
            .collect()
    }
}
