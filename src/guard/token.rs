use std::collections::BTreeMap;
use std::time::SystemTime;

use axum::http::Method;
use josekit::jws::HS256;
use josekit::jwt::{self, JwtPayload};
use josekit::JoseError;
use serde_json::Value;

use super::errors::AuthError;
use super::{Identity, IdentityResolver, OverrideProvider, PolicyConfig, RequestDescriptor};

/// Claims that make up the core payload. Extra claims may only add new keys;
/// these can never be replaced.
pub const RESERVED_CLAIMS: [&str; 6] = ["iss", "aud", "iat", "exp", "sub", "login"];

const BEARER_PREFIX: &str = "Bearer ";

/// Token parameters shared by validation and issuance: who mints tokens, for
/// whom, and with what HMAC-SHA-256 secret. Built once per decision from the
/// static settings plus the stored secret; individual values can still be
/// superseded by overrides.
#[derive(Debug, Clone)]
pub struct TokenConfig {
    pub issuer: String,
    pub audience: String,
    pub secret: String,
}

/// Decoded payload of a bearer token, with caller-supplied claims kept
/// strictly apart from the reserved core.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TokenClaims {
    pub issuer: Option<String>,
    pub audience: Option<String>,
    pub issued_at: Option<SystemTime>,
    pub expires_at: Option<SystemTime>,
    pub subject: Option<String>,
    pub login: Option<String>,
    pub extra: BTreeMap<String, Value>,
}

impl TokenClaims {
    pub fn from_payload(payload: &JwtPayload) -> Self {
        // A multi-valued `aud` can never equal the single configured audience,
        // so it decodes as absent.
        let audience = payload.audience().and_then(|values| {
            if values.len() == 1 {
                Some(values[0].to_string())
            } else {
                None
            }
        });

        let extra: BTreeMap<String, Value> = payload
            .claims_set()
            .iter()
            .filter(|(key, _)| !RESERVED_CLAIMS.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        Self {
            issuer: payload.issuer().map(String::from),
            audience,
            issued_at: payload.issued_at(),
            expires_at: payload.expires_at(),
            subject: payload.subject().map(String::from),
            login: payload
                .claim("login")
                .and_then(Value::as_str)
                .map(String::from),
            extra,
        }
    }

    /// Build a payload for signing. Reserved keys inside `extra` are dropped,
    /// which is what makes the reserved-claim invariant hold at issuance.
    pub fn to_payload(&self) -> Result<JwtPayload, JoseError> {
        let mut payload = JwtPayload::new();

        if let Some(issuer) = &self.issuer {
            payload.set_issuer(issuer);
        }
        if let Some(audience) = &self.audience {
            payload.set_audience(vec![audience.clone()]);
        }
        if let Some(issued_at) = &self.issued_at {
            payload.set_issued_at(issued_at);
        }
        if let Some(expires_at) = &self.expires_at {
            payload.set_expires_at(expires_at);
        }
        if let Some(subject) = &self.subject {
            payload.set_subject(subject);
        }
        if let Some(login) = &self.login {
            payload.set_claim("login", Some(Value::String(login.clone())))?;
        }
        for (key, value) in &self.extra {
            if RESERVED_CLAIMS.contains(&key.as_str()) {
                continue;
            }
            payload.set_claim(key, Some(value.clone()))?;
        }

        Ok(payload)
    }
}

/// Authenticate the bearer credential on `request`, if any.
///
/// Returns `Ok(None)` when token checking has nothing to say about the request
/// (no flags enabled, OPTIONS skip, or a valid anonymous token) and
/// `Ok(Some(Identity::User))` when a user token promoted the caller; every
/// failure is a terminal [`AuthError`].
pub async fn validate(
    request: &RequestDescriptor,
    config: &PolicyConfig,
    token_config: &TokenConfig,
    overrides: &dyn OverrideProvider,
    resolver: &dyn IdentityResolver,
) -> Result<Option<Identity>, AuthError> {
    // OPTIONS requests are not checked unless explicitly opted in.
    if request.method == Method::OPTIONS
        && !overrides
            .check_options_requests()
            .unwrap_or(config.check_options_requests)
    {
        return Ok(None);
    }

    let require_anonymous_token = overrides
        .require_anonymous_token(request)
        .unwrap_or(config.require_anonymous_token);
    let allow_user_token = overrides
        .allow_user_token(request)
        .unwrap_or(config.allow_user_token);

    if !require_anonymous_token && !allow_user_token {
        return Ok(None);
    }

    let Some(header) = request.authorization.as_deref() else {
        if require_anonymous_token {
            return Err(AuthError::MissingToken);
        }
        return Ok(None);
    };

    // The prefix match is case-sensitive with exactly one trailing space.
    let token = header
        .strip_prefix(BEARER_PREFIX)
        .ok_or(AuthError::MalformedHeader)?;

    let secret = overrides
        .jwt_secret()
        .unwrap_or_else(|| token_config.secret.clone());
    let verifier = HS256
        .verifier_from_bytes(secret.as_bytes())
        .map_err(|error| AuthError::InvalidToken(error.to_string()))?;
    let (payload, _header) = jwt::decode_with_verifier(token, &verifier)
        .map_err(|error| AuthError::InvalidToken(error.to_string()))?;

    let claims = TokenClaims::from_payload(&payload);

    // Tokens without an `exp` claim never expire. Zero clock-skew tolerance.
    if let Some(expires_at) = claims.expires_at {
        if expires_at <= SystemTime::now() {
            return Err(AuthError::InvalidToken("the token has expired".into()));
        }
    }

    let issuer = overrides
        .jwt_issuer()
        .unwrap_or_else(|| token_config.issuer.clone());
    let audience = overrides
        .jwt_audience()
        .unwrap_or_else(|| token_config.audience.clone());

    if claims.issuer.as_deref() != Some(issuer.as_str())
        || claims.audience.as_deref() != Some(audience.as_str())
    {
        return Err(AuthError::InvalidIssuerOrAudience);
    }

    if allow_user_token {
        if let Some(subject) = claims.subject.as_deref() {
            let user = match resolver.lookup_user(subject).await {
                Ok(user) => user,
                Err(error) => {
                    tracing::warn!(%error, subject, "user lookup failed during token validation");
                    None
                }
            };
            return match user {
                Some(user) => Ok(Some(Identity::User(user))),
                None => Err(AuthError::UnknownUser),
            };
        }
    }

    // Token-checked but still anonymous; route rules decide from here.
    Ok(None)
}
