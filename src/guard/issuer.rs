use std::collections::BTreeMap;
use std::time::{Duration, SystemTime};

use josekit::jws::{JwsHeader, HS256};
use josekit::jwt;
use serde_json::Value;

use super::token::TokenClaims;
use super::UserIdentity;
use crate::errors::PalisadeError;

/// Mints signed tokens that [`super::token::validate`] will accept: same
/// HMAC-SHA-256 secret, same issuer and audience.
#[derive(Debug, Clone)]
pub struct TokenIssuer {
    issuer: String,
    audience: String,
    secret: String,
}

impl TokenIssuer {
    pub fn new(issuer: String, audience: String, secret: String) -> Self {
        Self {
            issuer,
            audience,
            secret,
        }
    }

    /// Build and sign a compact token.
    ///
    /// `iss`, `aud`, and `iat` are always set; `exp` only when `expiration` is
    /// given. A subject adds `sub` and `login`. Extra claims may add keys but
    /// never replace a reserved one.
    pub fn issue(
        &self,
        expiration: Option<Duration>,
        subject: Option<&UserIdentity>,
        extra_claims: &BTreeMap<String, Value>,
    ) -> Result<String, PalisadeError> {
        let now = SystemTime::now();

        let claims = TokenClaims {
            issuer: Some(self.issuer.clone()),
            audience: Some(self.audience.clone()),
            issued_at: Some(now),
            expires_at: expiration.map(|lifetime| now + lifetime),
            subject: subject.map(|user| user.id.clone()),
            login: subject.map(|user| user.login.clone()),
            extra: extra_claims.clone(),
        };

        let payload = claims.to_payload()?;

        let mut header = JwsHeader::new();
        header.set_token_type("JWT");

        let signer = HS256.signer_from_bytes(self.secret.as_bytes())?;
        Ok(jwt::encode_with_signer(&payload, &header, &signer)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "a-test-secret-of-reasonable-length";

    fn issuer() -> TokenIssuer {
        TokenIssuer::new(
            "https://api.example.com".to_string(),
            "palisade".to_string(),
            SECRET.to_string(),
        )
    }

    fn decode(token: &str) -> jwt::JwtPayload {
        let verifier = HS256.verifier_from_bytes(SECRET.as_bytes()).unwrap();
        let (payload, _header) = jwt::decode_with_verifier(token, &verifier).unwrap();
        payload
    }

    #[test]
    fn test_core_claims_are_always_present() {
        let token = issuer().issue(None, None, &BTreeMap::new()).unwrap();
        let payload = decode(&token);

        assert_eq!(payload.issuer(), Some("https://api.example.com"));
        assert_eq!(payload.audience(), Some(vec!["palisade"]));
        assert!(payload.issued_at().is_some());
        assert!(payload.expires_at().is_none());
        assert!(payload.subject().is_none());
    }

    #[test]
    fn test_expiration_is_issued_at_plus_lifetime() {
        let lifetime = Duration::from_secs(3600);
        let token = issuer().issue(Some(lifetime), None, &BTreeMap::new()).unwrap();
        let payload = decode(&token);

        let issued_at = payload.issued_at().unwrap();
        let expires_at = payload.expires_at().unwrap();
        assert_eq!(expires_at, issued_at + lifetime);
    }

    #[test]
    fn test_subject_sets_sub_and_login() {
        let user = UserIdentity {
            id: "user-1".to_string(),
            login: "alice".to_string(),
        };
        let token = issuer().issue(None, Some(&user), &BTreeMap::new()).unwrap();
        let payload = decode(&token);

        assert_eq!(payload.subject(), Some("user-1"));
        assert_eq!(
            payload.claim("login"),
            Some(&Value::String("alice".to_string()))
        );
    }

    #[test]
    fn test_extra_claims_may_add_but_not_replace() {
        let user = UserIdentity {
            id: "user-1".to_string(),
            login: "alice".to_string(),
        };
        let mut extra = BTreeMap::new();
        extra.insert("sub".to_string(), Value::String("attacker-id".to_string()));
        extra.insert(
            "login".to_string(),
            Value::String("administrator".to_string()),
        );
        extra.insert(
            "user_email".to_string(),
            Value::String("alice@example.com".to_string()),
        );

        let token = issuer().issue(None, Some(&user), &extra).unwrap();
        let payload = decode(&token);

        // Reserved claims keep their core values.
        assert_eq!(payload.subject(), Some("user-1"));
        assert_eq!(
            payload.claim("login"),
            Some(&Value::String("alice".to_string()))
        );
        // New keys pass through untouched.
        assert_eq!(
            payload.claim("user_email"),
            Some(&Value::String("alice@example.com".to_string()))
        );
    }
}
