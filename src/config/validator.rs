//! Config validation: referential integrity and API consistency.

use crate::config::{
    EntityConfig, FillableConfig, FullConfig, MiddlewareConfig, Operation, RelationKind, ValidationRules,
    ValidationsConfig, VersionConfig,
};
use crate::error::ConfigError;
use crate::extensions::Extensions;
use crate::service::compiled;
use std::collections::HashSet;

pub fn validate(config: &FullConfig, extensions: &Extensions) -> Result<(), ConfigError> {
    let client = config.application.database.client.to_lowercase();
    if client != "postgres" && client != "postgresql" && client != "pg" {
        return Err(ConfigError::UnsupportedDialect(config.application.database.client.clone()));
    }

    let mut version_names = HashSet::new();
    for version in &config.versions {
        if version.name.trim().is_empty() || version.name.contains('/') {
            return Err(ConfigError::Validation(format!("invalid version name: '{}'", version.name)));
        }
        if !version_names.insert(version.name.as_str()) {
            return Err(ConfigError::Validation(format!("duplicate version: {}", version.name)));
        }
        validate_version(version, extensions)?;
    }
    Ok(())
}

fn validate_version(version: &VersionConfig, extensions: &Extensions) -> Result<(), ConfigError> {
    if !version.supported_languages.contains(&version.default_language) {
        return Err(ConfigError::Validation(format!(
            "version {}: default language '{}' is not in supported languages",
            version.name, version.default_language
        )));
    }
    for name in &version.serializers {
        if !extensions.has_serializer(name) {
            return Err(ConfigError::MissingReference {
                kind: "serializer",
                id: name.clone(),
            });
        }
    }
    for name in [&version.on_before_init, &version.on_after_init].into_iter().flatten() {
        if !extensions.has_init_hook(name) {
            return Err(ConfigError::MissingReference {
                kind: "init hook",
                id: name.clone(),
            });
        }
    }
    for limit in &version.query.limits {
        limit
            .rules()
            .map_err(|e| ConfigError::Validation(format!("version {}: {}", version.name, e)))?;
    }

    let mut names = HashSet::new();
    for entity in &version.entities {
        if !names.insert(entity.name.as_str()) {
            return Err(ConfigError::DuplicateEntity(entity.name.clone()));
        }
    }
    for entity in &version.entities {
        validate_entity(version, entity, extensions)?;
    }
    Ok(())
}

fn validate_entity(version: &VersionConfig, entity: &EntityConfig, extensions: &Extensions) -> Result<(), ConfigError> {
    let columns: HashSet<&str> = entity.columns.iter().map(String::as_str).collect();
    let column_ref = |column: &str| -> Result<(), ConfigError> {
        if columns.contains(column) {
            Ok(())
        } else {
            Err(ConfigError::MissingReference {
                kind: "column",
                id: format!("{}.{}", entity.name, column),
            })
        }
    };

    if !columns.contains(entity.primary_key.as_str()) {
        return Err(ConfigError::InvalidPrimaryKey {
            entity: entity.name.clone(),
            column: entity.primary_key.clone(),
        });
    }
    for column in &entity.hidden {
        column_ref(column.as_str())?;
    }
    for column in [&entity.created_at_column, &entity.updated_at_column, &entity.deleted_at_column]
        .into_iter()
        .flatten()
    {
        column_ref(column.as_str())?;
    }
    match &entity.fillable {
        FillableConfig::All(cols) => cols.iter().try_for_each(|c| column_ref(c.as_str()))?,
        FillableConfig::PerMethod { post, put, patch } => {
            for cols in [post, put, patch].into_iter().flatten() {
                cols.iter().try_for_each(|c| column_ref(c.as_str()))?;
            }
        }
    }
    let rule_sets: Vec<&ValidationRules> = match &entity.validations {
        ValidationsConfig::All(rules) => vec![rules],
        ValidationsConfig::PerMethod(per) => [&per.post, &per.put].into_iter().flatten().collect(),
    };
    for rules in rule_sets {
        for (column, rule) in rules {
            column_ref(column.as_str())?;
            if let Some(pattern) = &rule.pattern {
                compiled(pattern).map_err(|e| {
                    ConfigError::Validation(format!("entity {}: invalid pattern for {}: {}", entity.name, column, e))
                })?;
            }
        }
    }
    if entity.operations.contains(&Operation::ForceDelete) && entity.deleted_at_column.is_none() {
        return Err(ConfigError::Validation(format!(
            "entity {}: force_delete requires deleted_at_column",
            entity.name
        )));
    }
    for limit in &entity.limits {
        limit
            .rules()
            .map_err(|e| ConfigError::Validation(format!("entity {}: {}", entity.name, e)))?;
    }
    for middleware in &entity.middlewares {
        let names: &[String] = match middleware {
            MiddlewareConfig::Name(name) => std::slice::from_ref(name),
            MiddlewareConfig::Bound { names, .. } => names,
        };
        for name in names {
            if !extensions.has_middleware(name) {
                return Err(ConfigError::MissingReference {
                    kind: "middleware",
                    id: name.clone(),
                });
            }
        }
    }
    for name in entity.hooks.iter().flat_map(|h| h.before.iter().chain(&h.after)) {
        if !extensions.has_hook(name) {
            return Err(ConfigError::MissingReference {
                kind: "hook",
                id: name.clone(),
            });
        }
    }
    if let Some(name) = &entity.serializer {
        if !extensions.has_serializer(name) {
            return Err(ConfigError::MissingReference {
                kind: "serializer",
                id: name.clone(),
            });
        }
    }

    let mut relation_names = HashSet::new();
    for relation in &entity.relations {
        let target = version
            .entities
            .iter()
            .find(|e| e.name == relation.model)
            .ok_or_else(|| ConfigError::MissingReference {
                kind: "entity",
                id: relation.model.clone(),
            })?;
        let name = super::loader::relation_name(relation);
        if !relation_names.insert(name.clone()) {
            return Err(ConfigError::Validation(format!(
                "entity {}: duplicate relation {}",
                entity.name, name
            )));
        }
        let (primary_key, foreign_key) = super::loader::relation_keys(entity, target, relation);
        let target_columns: HashSet<&str> = target.columns.iter().map(String::as_str).collect();
        let (ours, theirs) = match relation.kind {
            RelationKind::HasMany => (primary_key, foreign_key),
            RelationKind::HasOne | RelationKind::BelongsTo => (foreign_key, primary_key),
        };
        column_ref(ours.as_str())?;
        if !target_columns.contains(theirs.as_str()) {
            return Err(ConfigError::MissingReference {
                kind: "column",
                id: format!("{}.{}", target.name, theirs),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(json: serde_json::Value) -> FullConfig {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn rejects_unknown_dialect() {
        let c = config(serde_json::json!({
            "application": {"database": {"client": "mysql"}},
            "versions": []
        }));
        assert!(matches!(
            validate(&c, &Extensions::default()),
            Err(ConfigError::UnsupportedDialect(_))
        ));
    }

    #[test]
    fn rejects_primary_key_outside_columns() {
        let c = config(serde_json::json!({
            "versions": [{"name": "v1", "entities": [
                {"name": "Post", "primary_key": "uuid", "columns": ["id", "title"]}
            ]}]
        }));
        assert!(matches!(
            validate(&c, &Extensions::default()),
            Err(ConfigError::InvalidPrimaryKey { .. })
        ));
    }

    #[test]
    fn rejects_dangling_relation_and_duplicates() {
        let c = config(serde_json::json!({
            "versions": [{"name": "v1", "entities": [
                {"name": "Post", "columns": ["id"], "relations": [{"type": "has_many", "model": "Comment"}]}
            ]}]
        }));
        assert!(matches!(
            validate(&c, &Extensions::default()),
            Err(ConfigError::MissingReference { kind: "entity", .. })
        ));

        let c = config(serde_json::json!({
            "versions": [{"name": "v1", "entities": [
                {"name": "Post", "columns": ["id"]},
                {"name": "Post", "columns": ["id"]}
            ]}]
        }));
        assert!(matches!(
            validate(&c, &Extensions::default()),
            Err(ConfigError::DuplicateEntity(_))
        ));
    }

    #[test]
    fn rejects_missing_foreign_key_column() {
        let c = config(serde_json::json!({
            "versions": [{"name": "v1", "entities": [
                {"name": "Post", "columns": ["id"], "relations": [{"type": "has_many", "model": "Comment"}]},
                {"name": "Comment", "columns": ["id", "body"]}
            ]}]
        }));
        match validate(&c, &Extensions::default()) {
            Err(ConfigError::MissingReference { kind, id }) => {
                assert_eq!(kind, "column");
                assert_eq!(id, "Comment.post_id");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn malformed_pattern_is_fatal() {
        let c = config(serde_json::json!({
            "versions": [{"name": "v1", "entities": [
                {"name": "Post", "columns": ["id", "title"], "validations": {"title": {"pattern": "("}}}
            ]}]
        }));
        match validate(&c, &Extensions::default()) {
            Err(ConfigError::Validation(message)) => assert!(message.contains("invalid pattern for title")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn force_delete_needs_soft_delete_column() {
        let c = config(serde_json::json!({
            "versions": [{"name": "v1", "entities": [
                {"name": "Post", "columns": ["id"], "operations": ["delete", "force_delete"]}
            ]}]
        }));
        assert!(matches!(validate(&c, &Extensions::default()), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn unknown_middleware_is_rejected() {
        let c = config(serde_json::json!({
            "versions": [{"name": "v1", "entities": [
                {"name": "Post", "columns": ["id"], "middlewares": ["auth"]}
            ]}]
        }));
        assert!(matches!(
            validate(&c, &Extensions::default()),
            Err(ConfigError::MissingReference { kind: "middleware", .. })
        ));
    }

    #[test]
    fn unknown_hooks_are_rejected() {
        let c = config(serde_json::json!({
            "versions": [{"name": "v1", "entities": [
                {"name": "Post", "columns": ["id"], "hooks": [{"before": ["stamp"]}]}
            ]}]
        }));
        assert!(matches!(
            validate(&c, &Extensions::default()),
            Err(ConfigError::MissingReference { kind: "hook", .. })
        ));

        let c = config(serde_json::json!({
            "versions": [{"name": "v1", "onAfterInit": "warm", "entities": [{"name": "Post", "columns": ["id"]}]}]
        }));
        assert!(matches!(
            validate(&c, &Extensions::default()),
            Err(ConfigError::MissingReference { kind: "init hook", .. })
        ));
        let extensions = Extensions::default().with_init_hook("warm", |_| Ok(()));
        assert!(validate(&c, &extensions).is_ok());
    }
}
