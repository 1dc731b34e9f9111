//! Raw declarative config: application settings, API versions and entity descriptors.

use crate::error::ConfigError;
use crate::service::QueryLimitConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Test,
    Production,
}

impl Environment {
    pub fn is_production(self) -> bool {
        matches!(self, Environment::Production)
    }
}

impl std::str::FromStr for Environment {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "test" => Ok(Environment::Test),
            "production" | "prod" => Ok(Environment::Production),
            other => Err(ConfigError::Validation(format!(
                "invalid environment: {} (expected development, test or production)",
                other
            ))),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_client")]
    pub client: String,
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            client: default_client(),
            url: "postgres://localhost/resourceful".into(),
            max_connections: default_max_connections(),
        }
    }
}

fn default_client() -> String {
    "postgres".into()
}

fn default_max_connections() -> u32 {
    5
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApplicationConfig {
    #[serde(default)]
    pub env: Environment,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Root URL prefix, e.g. "api" in `/api/v1/posts`.
    #[serde(default = "default_prefix")]
    pub prefix: String,
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Maximum request body size in bytes.
    #[serde(default = "default_body_limit")]
    pub body_limit: usize,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        ApplicationConfig {
            env: Environment::default(),
            port: default_port(),
            prefix: default_prefix(),
            database: DatabaseConfig::default(),
            body_limit: default_body_limit(),
        }
    }
}

fn default_port() -> u16 {
    3000
}

fn default_prefix() -> String {
    "api".into()
}

fn default_body_limit() -> usize {
    1024 * 1024
}

impl ApplicationConfig {
    /// Read settings from `APP_*` / `DATABASE_*` env vars, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = ApplicationConfig::default();
        if let Ok(env) = std::env::var("APP_ENV") {
            config.env = env.parse()?;
        }
        if let Ok(port) = std::env::var("APP_PORT") {
            config.port = port
                .parse()
                .map_err(|_| ConfigError::Validation(format!("invalid APP_PORT: {}", port)))?;
        }
        if let Ok(prefix) = std::env::var("APP_PREFIX") {
            config.prefix = prefix;
        }
        if let Ok(limit) = std::env::var("APP_BODY_LIMIT") {
            config.body_limit = limit
                .parse()
                .map_err(|_| ConfigError::Validation(format!("invalid APP_BODY_LIMIT: {}", limit)))?;
        }
        if let Ok(client) = std::env::var("DATABASE_CLIENT") {
            config.database.client = client;
        }
        if let Ok(url) = std::env::var("DATABASE_URL") {
            config.database.url = url;
        }
        if let Ok(max) = std::env::var("DATABASE_MAX_CONNECTIONS") {
            config.database.max_connections = max
                .parse()
                .map_err(|_| ConfigError::Validation(format!("invalid DATABASE_MAX_CONNECTIONS: {}", max)))?;
        }
        Ok(config)
    }
}

/// CRUD action exposed for an entity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    #[serde(alias = "create", alias = "store")]
    Insert,
    #[serde(alias = "list_paginated")]
    Paginate,
    #[serde(alias = "list_all")]
    All,
    #[serde(alias = "read_one")]
    Show,
    #[serde(alias = "update_full")]
    Update,
    #[serde(alias = "update_partial")]
    Patch,
    Delete,
    ForceDelete,
}

/// Every operation, in route-table order.
pub const ALL_OPERATIONS: &[Operation] = &[
    Operation::Insert,
    Operation::Paginate,
    Operation::All,
    Operation::Show,
    Operation::Update,
    Operation::Patch,
    Operation::Delete,
    Operation::ForceDelete,
];

/// Operations an entity gets when its descriptor does not list any.
pub const DEFAULT_OPERATIONS: &[Operation] = &[
    Operation::Insert,
    Operation::Paginate,
    Operation::Show,
    Operation::Update,
    Operation::Patch,
    Operation::Delete,
];

fn default_operations() -> Vec<Operation> {
    DEFAULT_OPERATIONS.to_vec()
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Insert => "insert",
            Operation::Paginate => "paginate",
            Operation::All => "all",
            Operation::Show => "show",
            Operation::Update => "update",
            Operation::Patch => "patch",
            Operation::Delete => "delete",
            Operation::ForceDelete => "force_delete",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T: PartialEq> OneOrMany<T> {
    pub fn contains(&self, item: &T) -> bool {
        match self {
            OneOrMany::One(v) => v == item,
            OneOrMany::Many(vs) => vs.contains(item),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRule {
    #[serde(alias = "handler", alias = "handlers")]
    pub operations: OneOrMany<Operation>,
    pub transaction: bool,
}

/// `true`/`false` for every operation, or per-operation overrides where the last matching
/// entry wins.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TransactionPolicy {
    Flag(bool),
    Rules(Vec<TransactionRule>),
    Rule(TransactionRule),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    HasOne,
    HasMany,
    BelongsTo,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RelationConfig {
    #[serde(rename = "type")]
    pub kind: RelationKind,
    /// Target entity name.
    pub model: String,
    /// Display name used for nested paths and `with=`; defaults from the target name.
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub primary_key: Option<String>,
    #[serde(default)]
    pub foreign_key: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ValidationRule {
    #[serde(default)]
    pub required: Option<bool>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub max_length: Option<u32>,
    #[serde(default)]
    pub min_length: Option<u32>,
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub allowed: Option<Vec<serde_json::Value>>,
    #[serde(default)]
    pub minimum: Option<f64>,
    #[serde(default)]
    pub maximum: Option<f64>,
}

pub type ValidationRules = HashMap<String, ValidationRule>;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MethodValidations {
    #[serde(default)]
    pub post: Option<ValidationRules>,
    #[serde(default)]
    pub put: Option<ValidationRules>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ValidationsConfig {
    PerMethod(MethodValidations),
    All(ValidationRules),
}

impl Default for ValidationsConfig {
    fn default() -> Self {
        ValidationsConfig::All(HashMap::new())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FillableConfig {
    All(Vec<String>),
    PerMethod {
        #[serde(default)]
        post: Option<Vec<String>>,
        #[serde(default)]
        put: Option<Vec<String>>,
        #[serde(default)]
        patch: Option<Vec<String>>,
    },
}

impl Default for FillableConfig {
    fn default() -> Self {
        FillableConfig::All(Vec::new())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MiddlewareConfig {
    /// Named middleware applied to every operation.
    Name(String),
    Bound {
        #[serde(default)]
        operations: Option<OneOrMany<Operation>>,
        names: Vec<String>,
    },
}

/// Lifecycle hook names bound to operations (every operation when `operations` is absent).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct HookConfig {
    #[serde(default)]
    pub operations: Option<OneOrMany<Operation>>,
    #[serde(default)]
    pub before: Vec<String>,
    #[serde(default)]
    pub after: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EntityConfig {
    /// PascalCase entity name, e.g. "Post".
    pub name: String,
    /// Storage table; defaults to the snake_case plural of the name.
    #[serde(default)]
    pub table: Option<String>,
    #[serde(default = "default_primary_key")]
    pub primary_key: String,
    /// Declared columns in order. Must contain the primary key.
    pub columns: Vec<String>,
    #[serde(default)]
    pub fillable: FillableConfig,
    #[serde(default)]
    pub validations: ValidationsConfig,
    /// Columns never exposed in API responses (e.g. password hashes).
    #[serde(default)]
    pub hidden: Vec<String>,
    #[serde(default = "default_operations")]
    pub operations: Vec<Operation>,
    #[serde(default)]
    pub relations: Vec<RelationConfig>,
    #[serde(default)]
    pub limits: Vec<QueryLimitConfig>,
    /// Absent inherits the version policy.
    #[serde(default)]
    pub transaction: Option<TransactionPolicy>,
    #[serde(default)]
    pub middlewares: Vec<MiddlewareConfig>,
    #[serde(default)]
    pub hooks: Vec<HookConfig>,
    #[serde(default)]
    pub serializer: Option<String>,
    #[serde(default)]
    pub created_at_column: Option<String>,
    #[serde(default)]
    pub updated_at_column: Option<String>,
    /// Enables soft delete when set.
    #[serde(default)]
    pub deleted_at_column: Option<String>,
    #[serde(default)]
    pub ignore: bool,
}

fn default_primary_key() -> String {
    "id".into()
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct QueryConfig {
    #[serde(default)]
    pub limits: Vec<QueryLimitConfig>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VersionConfig {
    pub name: String,
    #[serde(default)]
    pub transaction: Option<TransactionPolicy>,
    /// Registered serializer names applied to every entity of the version, in order.
    #[serde(default)]
    pub serializers: Vec<String>,
    #[serde(default = "default_languages")]
    pub supported_languages: Vec<String>,
    #[serde(default = "default_language")]
    pub default_language: String,
    #[serde(default)]
    pub query: QueryConfig,
    /// Registered init hook run before this version's routes are built.
    #[serde(default, alias = "onBeforeInit")]
    pub on_before_init: Option<String>,
    /// Registered init hook run after this version's routes are built.
    #[serde(default, alias = "onAfterInit")]
    pub on_after_init: Option<String>,
    #[serde(default)]
    pub entities: Vec<EntityConfig>,
}

fn default_languages() -> Vec<String> {
    vec![default_language()]
}

fn default_language() -> String {
    "en".into()
}

/// Everything needed to build the API in one struct.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FullConfig {
    #[serde(default)]
    pub application: ApplicationConfig,
    #[serde(default)]
    pub versions: Vec<VersionConfig>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_defaults() {
        let e: EntityConfig = serde_json::from_str(r#"{"name": "Post", "columns": ["id", "title"]}"#).unwrap();
        assert_eq!(e.primary_key, "id");
        assert_eq!(e.operations, DEFAULT_OPERATIONS.to_vec());
        assert!(e.transaction.is_none());
        assert!(!e.ignore);
    }

    #[test]
    fn transaction_policy_shapes() {
        let p: TransactionPolicy = serde_json::from_str("true").unwrap();
        assert_eq!(p, TransactionPolicy::Flag(true));

        let p: TransactionPolicy =
            serde_json::from_str(r#"[{"operations": ["insert", "update"], "transaction": true}]"#).unwrap();
        match p {
            TransactionPolicy::Rules(rules) => {
                assert!(rules[0].operations.contains(&Operation::Update));
                assert!(!rules[0].operations.contains(&Operation::Delete));
            }
            other => panic!("unexpected policy {:?}", other),
        }

        let p: TransactionPolicy = serde_json::from_str(r#"{"handler": "delete", "transaction": false}"#).unwrap();
        assert!(matches!(p, TransactionPolicy::Rule(_)));
    }

    #[test]
    fn operation_aliases() {
        let ops: Vec<Operation> =
            serde_json::from_str(r#"["create", "list_paginated", "read_one", "force_delete"]"#).unwrap();
        assert_eq!(ops, vec![Operation::Insert, Operation::Paginate, Operation::Show, Operation::ForceDelete]);
    }

    #[test]
    fn validations_per_method_or_flat() {
        let v: ValidationsConfig = serde_json::from_str(r#"{"post": {"title": {"required": true}}}"#).unwrap();
        assert!(matches!(v, ValidationsConfig::PerMethod(MethodValidations { post: Some(_), put: None })));

        let v: ValidationsConfig = serde_json::from_str(r#"{"title": {"required": true}}"#).unwrap();
        assert!(matches!(v, ValidationsConfig::All(_)));
    }

    #[test]
    fn hooks_and_init_hooks() {
        let v: VersionConfig = serde_json::from_str(
            r#"{"name": "v1", "onBeforeInit": "warm", "entities": [
                {"name": "Post", "columns": ["id"], "hooks": [{"operations": "insert", "after": ["audit"]}]}
            ]}"#,
        )
        .unwrap();
        assert_eq!(v.on_before_init.as_deref(), Some("warm"));
        assert!(v.on_after_init.is_none());
        let hook = &v.entities[0].hooks[0];
        assert!(hook.before.is_empty());
        assert_eq!(hook.after, vec!["audit"]);
        assert!(hook.operations.as_ref().unwrap().contains(&Operation::Insert));
    }

    #[test]
    fn environment_parse() {
        assert_eq!("production".parse::<Environment>().unwrap(), Environment::Production);
        assert!("staging".parse::<Environment>().is_err());
    }
}
