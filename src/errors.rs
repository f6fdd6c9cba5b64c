use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum PalisadeError {
    #[error("I/O error: {0}")]
    #[diagnostic(code(palisade::io))]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    #[diagnostic(code(palisade::config))]
    Config(#[from] config::ConfigError),

    #[error("Serialization error: {0}")]
    #[diagnostic(code(palisade::serde))]
    Serde(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    #[diagnostic(code(palisade::db))]
    Db(#[from] sea_orm::DbErr),

    #[error("JOSE error: {0}")]
    #[diagnostic(code(palisade::jose))]
    Jose(String),

    #[error("Unknown user: {0}")]
    #[diagnostic(code(palisade::unknown_user))]
    UnknownUser(String),

    #[error("{0}")]
    #[diagnostic(code(palisade::other))]
    Other(String),
}

impl From<josekit::JoseError> for PalisadeError {
    fn from(value: josekit::JoseError) -> Self {
        PalisadeError::Jose(value.to_string())
    }
}
