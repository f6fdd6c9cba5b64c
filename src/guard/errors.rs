use miette::Diagnostic;
use thiserror::Error;

/// Authentication failures. Each one is terminal for the request and maps 1:1
/// to a client-visible `invalid_token` error; the message is safe to expose.
#[derive(Debug, Clone, PartialEq, Eq, Error, Diagnostic)]
pub enum AuthError {
    #[error("no bearer token was provided")]
    #[diagnostic(code(palisade::guard::missing_token))]
    MissingToken,

    #[error("the authorization header is malformed")]
    #[diagnostic(
        code(palisade::guard::malformed_header),
        help("The header value must be the token prefixed with `Bearer ` exactly")
    )]
    MalformedHeader,

    #[error("invalid token: {0}")]
    #[diagnostic(code(palisade::guard::invalid_token))]
    InvalidToken(String),

    #[error("the token issuer or audience does not match this site")]
    #[diagnostic(code(palisade::guard::issuer_audience))]
    InvalidIssuerOrAudience,

    #[error("the token subject does not map to a known user")]
    #[diagnostic(code(palisade::guard::unknown_user))]
    UnknownUser,

    #[error("the subject could not be resolved to a real user")]
    #[diagnostic(code(palisade::guard::invalid_subject))]
    InvalidSubject,
}
