use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};
use tracing_subscriber::{fmt, EnvFilter};

use palisade::guard::{AuthError, NoOverrides, OverrideProvider, TokenIssuer, UserIdentity};
use palisade::{settings, storage, web};

use migration::MigratorTrait;

#[derive(Parser, Debug)]
#[command(name = "palisade", version, about = "Authorization gate for REST APIs")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "palisade.toml")]
    config: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the gate (the default)
    Serve,
    /// Mint a JSON Web Token the gate will accept
    GenerateJwt {
        /// Token lifetime in seconds; omit for a non-expiring token
        #[arg(long)]
        expiration: Option<u64>,
        /// Subject user id; omit for an anonymous token
        #[arg(long)]
        user: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // logging
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();

    // load settings
    let settings = settings::Settings::load(&cli.config)?;
    tracing::info!(?settings, "Loaded configuration");

    // init storage (database) and bring the schema up to date
    let db = storage::init(&settings.database).await?;
    migration::Migrator::up(&db, None).await.into_diagnostic()?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            ensure_seed_user(&db).await?;
            web::serve(settings, db).await?;
        }
        Command::GenerateJwt { expiration, user } => {
            let token = generate_jwt(&settings, &db, expiration, user.as_deref()).await?;
            println!("{token}");
        }
    }

    Ok(())
}

async fn generate_jwt(
    settings: &settings::Settings,
    db: &sea_orm::DatabaseConnection,
    expiration: Option<u64>,
    user: Option<&str>,
) -> Result<String> {
    let subject = match user {
        Some(id) => {
            let record = storage::get_user_by_subject(db, id)
                .await?
                .filter(|record| record.enabled != 0)
                .ok_or(AuthError::InvalidSubject)?;
            Some(UserIdentity {
                id: record.subject,
                login: record.username,
            })
        }
        None => None,
    };

    let secret = storage::get_or_create_jwt_secret(db).await?;
    let issuer = TokenIssuer::new(settings.jwt_issuer(), settings.jwt.audience.clone(), secret);

    let overrides = NoOverrides;
    let extra_claims = subject
        .as_ref()
        .and_then(|user| overrides.jwt_additional_claims(user))
        .unwrap_or_default();

    Ok(issuer.issue(
        expiration.map(std::time::Duration::from_secs),
        subject.as_ref(),
        &extra_claims,
    )?)
}

async fn ensure_seed_user(db: &sea_orm::DatabaseConnection) -> Result<()> {
    // A known subject so `generate-jwt --user` works on a fresh install.
    if storage::get_user_by_username(db, "admin").await?.is_none() {
        let user = storage::create_user(db, "admin", Some("admin@example.com".to_string())).await?;
        tracing::info!(subject = %user.subject, "Created default admin user");
    }
    Ok(())
}
