use crate::entities;
use crate::errors::PalisadeError;
use crate::guard::{lists, IdentityResolver, PolicyConfig, UserIdentity};
use crate::settings::Database as DbCfg;
use base64ct::Encoding;
use chrono::Utc;
use rand::RngCore;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Database, DatabaseConnection, DbErr, EntityTrait, QueryFilter,
    Set,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Owner component of every record this crate keeps in the settings store.
pub const SETTINGS_OWNER: &str = "palisade";
/// Key of the policy record.
pub const POLICY_KEY: &str = "policy";
/// Key of the signing-secret record, stored separately from the policy.
pub const JWT_SECRET_KEY: &str = "jwt_secret";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub subject: String,
    pub username: String,
    pub email: Option<String>,
    pub created_at: i64,
    pub enabled: i64,
}

impl From<entities::user::Model> for User {
    fn from(model: entities::user::Model) -> Self {
        Self {
            subject: model.subject,
            username: model.username,
            email: model.email,
            created_at: model.created_at,
            enabled: model.enabled,
        }
    }
}

pub async fn init(cfg: &DbCfg) -> Result<DatabaseConnection, PalisadeError> {
    let db = Database::connect(&cfg.url).await?;
    Ok(db)
}

pub async fn get_setting(
    db: &DatabaseConnection,
    key: &str,
) -> Result<Option<Value>, PalisadeError> {
    use entities::setting::{Column, Entity};

    if let Some(model) = Entity::find()
        .filter(Column::Owner.eq(SETTINGS_OWNER))
        .filter(Column::Key.eq(key))
        .one(db)
        .await?
    {
        let json: Value = serde_json::from_str(&model.value)?;
        Ok(Some(json))
    } else {
        Ok(None)
    }
}

pub async fn set_setting(
    db: &DatabaseConnection,
    key: &str,
    value: &Value,
) -> Result<(), PalisadeError> {
    use entities::setting::{Column, Entity};
    use sea_orm::sea_query::OnConflict;

    let now = Utc::now().timestamp();
    let json = serde_json::to_string(value)?;

    let record = entities::setting::ActiveModel {
        owner: Set(SETTINGS_OWNER.to_string()),
        key: Set(key.to_string()),
        value: Set(json),
        updated_at: Set(now),
    };

    Entity::insert(record)
        .on_conflict(
            OnConflict::columns([Column::Owner, Column::Key])
                .update_columns([Column::Value, Column::UpdatedAt])
                .to_owned(),
        )
        .exec(db)
        .await?;

    Ok(())
}

/// Load the stored policy record. Absent or malformed records degrade to the
/// default config: every boolean false, both lists empty.
pub async fn load_policy_config(db: &DatabaseConnection) -> Result<PolicyConfig, PalisadeError> {
    Ok(get_setting(db, POLICY_KEY)
        .await?
        .map(|value| serde_json::from_value(value).unwrap_or_default())
        .unwrap_or_default())
}

/// Persist the policy record, normalizing the list fields to trimmed,
/// newline-separated text first.
pub async fn save_policy_config(
    db: &DatabaseConnection,
    config: &PolicyConfig,
) -> Result<(), PalisadeError> {
    let mut sanitized = config.clone();
    sanitized.anonymous_requests_allowlist =
        lists::split_patterns(&sanitized.anonymous_requests_allowlist).join("\n");
    sanitized.anonymous_requests_denylist =
        lists::split_patterns(&sanitized.anonymous_requests_denylist).join("\n");

    set_setting(db, POLICY_KEY, &serde_json::to_value(&sanitized)?).await
}

/// Fetch the signing secret, generating and persisting one on first use.
///
/// Concurrent first use is resolved by the store: insert-or-ignore means one
/// writer wins and everyone reads that value back.
pub async fn get_or_create_jwt_secret(db: &DatabaseConnection) -> Result<String, PalisadeError> {
    use entities::setting::{Column, Entity};
    use sea_orm::sea_query::OnConflict;

    if let Some(value) = get_setting(db, JWT_SECRET_KEY).await? {
        if let Some(secret) = value.as_str() {
            return Ok(secret.to_string());
        }
    }

    let candidate = random_secret();
    let record = entities::setting::ActiveModel {
        owner: Set(SETTINGS_OWNER.to_string()),
        key: Set(JWT_SECRET_KEY.to_string()),
        value: Set(serde_json::to_string(&Value::String(candidate))?),
        updated_at: Set(Utc::now().timestamp()),
    };

    match Entity::insert(record)
        .on_conflict(
            OnConflict::columns([Column::Owner, Column::Key])
                .do_nothing()
                .to_owned(),
        )
        .exec(db)
        .await
    {
        Ok(_) => {}
        // Another writer landed first; their secret stands.
        Err(DbErr::RecordNotInserted) => {}
        Err(err) => return Err(err.into()),
    }

    get_setting(db, JWT_SECRET_KEY)
        .await?
        .and_then(|value| value.as_str().map(String::from))
        .ok_or_else(|| PalisadeError::Other("signing secret missing after creation".to_string()))
}

pub async fn create_user(
    db: &DatabaseConnection,
    username: &str,
    email: Option<String>,
) -> Result<User, PalisadeError> {
    let subject = random_id();
    let created_at = Utc::now().timestamp();

    let user = entities::user::ActiveModel {
        subject: Set(subject.clone()),
        username: Set(username.to_string()),
        email: Set(email.clone()),
        created_at: Set(created_at),
        enabled: Set(1),
    };

    user.insert(db).await?;

    Ok(User {
        subject,
        username: username.to_string(),
        email,
        created_at,
        enabled: 1,
    })
}

pub async fn get_user_by_subject(
    db: &DatabaseConnection,
    subject: &str,
) -> Result<Option<User>, PalisadeError> {
    use entities::user::{Column, Entity};

    Ok(Entity::find()
        .filter(Column::Subject.eq(subject))
        .one(db)
        .await?
        .map(User::from))
}

pub async fn get_user_by_username(
    db: &DatabaseConnection,
    username: &str,
) -> Result<Option<User>, PalisadeError> {
    use entities::user::{Column, Entity};

    Ok(Entity::find()
        .filter(Column::Username.eq(username))
        .one(db)
        .await?
        .map(User::from))
}

/// Database-backed [`IdentityResolver`]. Disabled users do not resolve.
#[derive(Clone)]
pub struct DbIdentityResolver {
    db: DatabaseConnection,
}

impl DbIdentityResolver {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

#[async_trait::async_trait]
impl IdentityResolver for DbIdentityResolver {
    async fn lookup_user(&self, id: &str) -> Result<Option<UserIdentity>, PalisadeError> {
        Ok(get_user_by_subject(&self.db, id)
            .await?
            .filter(|user| user.enabled != 0)
            .map(|user| UserIdentity {
                id: user.subject,
                login: user.username,
            }))
    }
}

fn random_id() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    base64ct::Base64UrlUnpadded::encode_string(&bytes)
}

fn random_secret() -> String {
    let mut bytes = [0u8; 64];
    rand::thread_rng().fill_bytes(&mut bytes);
    base64ct::Base64UrlUnpadded::encode_string(&bytes)
}
