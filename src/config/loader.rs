//! Load config from JSON files and resolve it into the entity graph.

use crate::case::{pluralize, to_snake_case};
use crate::config::resolved::{
    EntityGraph, EntityId, EntityNode, HookBinding, ResolvedApi, ResolvedRelation, ResolvedVersion,
    TransactionSource,
};
use crate::config::types::*;
use crate::config::{validate, FullConfig};
use crate::error::ConfigError;
use crate::extensions::Extensions;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;

/// Build the resolved API from full config. Validates first.
pub fn resolve(config: &FullConfig, extensions: &Extensions) -> Result<ResolvedApi, ConfigError> {
    validate(config, extensions)?;
    let versions = config
        .versions
        .iter()
        .map(resolve_version)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ResolvedApi {
        application: config.application.clone(),
        versions,
    })
}

/// Join keys for `relation` declared on `owner`, as `(primary_key, foreign_key)`.
pub fn relation_keys(owner: &EntityConfig, target: &EntityConfig, relation: &RelationConfig) -> (String, String) {
    match relation.kind {
        RelationKind::HasMany => (
            relation.primary_key.clone().unwrap_or_else(|| owner.primary_key.clone()),
            relation
                .foreign_key
                .clone()
                .unwrap_or_else(|| format!("{}_id", to_snake_case(&owner.name))),
        ),
        RelationKind::HasOne | RelationKind::BelongsTo => (
            relation.primary_key.clone().unwrap_or_else(|| target.primary_key.clone()),
            relation
                .foreign_key
                .clone()
                .unwrap_or_else(|| format!("{}_id", to_snake_case(&target.name))),
        ),
    }
}

/// Display name of a relation: explicit name, else the target in snake case, pluralized for has_many.
pub fn relation_name(relation: &RelationConfig) -> String {
    match &relation.name {
        Some(name) => name.clone(),
        None => match relation.kind {
            RelationKind::HasMany => pluralize(&to_snake_case(&relation.model)),
            RelationKind::HasOne | RelationKind::BelongsTo => to_snake_case(&relation.model),
        },
    }
}

fn resolve_version(version: &VersionConfig) -> Result<ResolvedVersion, ConfigError> {
    let by_name: HashMap<String, EntityId> = version
        .entities
        .iter()
        .enumerate()
        .map(|(i, e)| (e.name.clone(), EntityId(i)))
        .collect();

    let mut version_rules = Vec::new();
    for limit in &version.query.limits {
        version_rules.extend(limit.rules().map_err(ConfigError::Validation)?);
    }

    let mut nodes = Vec::with_capacity(version.entities.len());
    for (index, entity) in version.entities.iter().enumerate() {
        let id = EntityId(index);
        let mut relations = Vec::with_capacity(entity.relations.len());
        for relation in &entity.relations {
            let target = *by_name.get(&relation.model).ok_or_else(|| ConfigError::MissingReference {
                kind: "entity",
                id: relation.model.clone(),
            })?;
            let (primary_key, foreign_key) = relation_keys(entity, &version.entities[target.0], relation);
            relations.push(ResolvedRelation {
                kind: relation.kind,
                name: relation_name(relation),
                target,
                target_name: relation.model.clone(),
                primary_key,
                foreign_key,
            });
        }

        let mut children = Vec::new();
        let mut is_recursive = false;
        for relation in relations.iter().filter(|r| r.is_to_many()) {
            if relation.target == id {
                is_recursive = true;
            } else if !children.contains(&relation.target) {
                children.push(relation.target);
            }
        }

        let mut limits = version_rules.clone();
        for limit in &entity.limits {
            limits.extend(limit.rules().map_err(ConfigError::Validation)?);
        }

        let mut serializers = version.serializers.clone();
        serializers.extend(entity.serializer.clone());

        nodes.push(EntityNode {
            id,
            name: entity.name.clone(),
            table: entity
                .table
                .clone()
                .unwrap_or_else(|| pluralize(&to_snake_case(&entity.name))),
            primary_key: entity.primary_key.clone(),
            columns: entity.columns.clone(),
            fillable: entity.fillable.clone(),
            validations: entity.validations.clone(),
            hidden: entity.hidden.iter().cloned().collect(),
            operations: entity.operations.clone(),
            relations,
            children,
            is_recursive,
            limits,
            transaction: TransactionSource {
                entity: entity.transaction.clone(),
                version: version.transaction.clone(),
            },
            middlewares: bind_middlewares(&entity.middlewares),
            hooks: bind_hooks(&entity.hooks),
            serializers,
            created_at_column: entity.created_at_column.clone(),
            updated_at_column: entity.updated_at_column.clone(),
            deleted_at_column: entity.deleted_at_column.clone(),
            ignore: entity.ignore,
        });
    }

    let child_ids: HashSet<EntityId> = nodes.iter().flat_map(|n| n.children.iter().copied()).collect();
    let roots: Vec<EntityId> = nodes.iter().map(|n| n.id).filter(|id| !child_ids.contains(id)).collect();

    // Every entity must hang off some root, otherwise it sits in a has_many cycle.
    let mut reached: HashSet<EntityId> = HashSet::new();
    let mut queue: VecDeque<EntityId> = roots.iter().copied().collect();
    while let Some(id) = queue.pop_front() {
        if reached.insert(id) {
            queue.extend(nodes[id.0].children.iter().copied());
        }
    }
    if reached.len() != nodes.len() {
        let stranded: Vec<&str> = nodes
            .iter()
            .filter(|n| !reached.contains(&n.id))
            .map(|n| n.name.as_str())
            .collect();
        return Err(ConfigError::RelationCycle(stranded.join(", ")));
    }

    tracing::debug!(version = %version.name, entities = nodes.len(), roots = roots.len(), "version resolved");
    Ok(ResolvedVersion {
        name: version.name.clone(),
        supported_languages: version.supported_languages.clone(),
        default_language: version.default_language.clone(),
        on_before_init: version.on_before_init.clone(),
        on_after_init: version.on_after_init.clone(),
        graph: EntityGraph {
            nodes,
            by_name: by_name.into_iter().collect(),
            roots,
        },
    })
}

fn bind_middlewares(config: &[MiddlewareConfig]) -> HashMap<Operation, Vec<String>> {
    let mut bound: HashMap<Operation, Vec<String>> = HashMap::new();
    for entry in config {
        let (operations, names) = match entry {
            MiddlewareConfig::Name(name) => (None, std::slice::from_ref(name)),
            MiddlewareConfig::Bound { operations, names } => (operations.as_ref(), names.as_slice()),
        };
        for &op in ALL_OPERATIONS {
            if operations.map_or(true, |ops| ops.contains(&op)) {
                bound.entry(op).or_default().extend(names.iter().cloned());
            }
        }
    }
    bound
}

fn bind_hooks(config: &[HookConfig]) -> HashMap<Operation, HookBinding> {
    let mut bound: HashMap<Operation, HookBinding> = HashMap::new();
    for entry in config {
        for &op in ALL_OPERATIONS {
            if entry.operations.as_ref().map_or(true, |ops| ops.contains(&op)) {
                let binding = bound.entry(op).or_default();
                binding.before.extend(entry.before.iter().cloned());
                binding.after.extend(entry.after.iter().cloned());
            }
        }
    }
    bound
}

/// Parse one config file holding a full config (`{application?, versions}`).
pub fn load_from_file(path: impl AsRef<Path>) -> Result<FullConfig, ConfigError> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Load(format!("{}: {}", path.display(), e)))?;
    serde_json::from_str(&raw).map_err(|e| ConfigError::Load(format!("{}: {}", path.display(), e)))
}

/// Read every `*.json` file in `dir` as one version, in file name order. Application settings
/// come from the environment.
pub fn load_from_dir(dir: impl AsRef<Path>) -> Result<FullConfig, ConfigError> {
    let dir = dir.as_ref();
    let mut files = Vec::new();
    let entries = std::fs::read_dir(dir).map_err(|e| ConfigError::Load(format!("{}: {}", dir.display(), e)))?;
    for entry in entries {
        let path = entry.map_err(|e| ConfigError::Load(e.to_string()))?.path();
        if path.extension().and_then(|e| e.to_str()) == Some("json") {
            files.push(path);
        }
    }
    files.sort();

    let mut versions = Vec::with_capacity(files.len());
    for path in files {
        let raw = std::fs::read_to_string(&path).map_err(|e| ConfigError::Load(format!("{}: {}", path.display(), e)))?;
        let version: VersionConfig =
            serde_json::from_str(&raw).map_err(|e| ConfigError::Load(format!("{}: {}", path.display(), e)))?;
        tracing::info!(file = %path.display(), version = %version.name, "loaded version config");
        versions.push(version);
    }
    Ok(FullConfig {
        application: ApplicationConfig::from_env()?,
        versions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extensions::HookStage;
    use crate::service::{Polarity, QueryFeature};

    fn resolve_json(json: serde_json::Value) -> Result<ResolvedApi, ConfigError> {
        let config: FullConfig = serde_json::from_value(json).unwrap();
        resolve(&config, &Extensions::default())
    }

    #[test]
    fn derives_children_roots_and_keys() {
        let api = resolve_json(serde_json::json!({
            "versions": [{"name": "v1", "entities": [
                {"name": "Post", "columns": ["id", "title"],
                 "relations": [{"type": "has_many", "model": "Comment"}]},
                {"name": "Comment", "columns": ["id", "post_id", "body"],
                 "relations": [{"type": "belongs_to", "model": "Post"}]}
            ]}]
        }))
        .unwrap();
        let graph = &api.versions[0].graph;
        let post = graph.by_name("Post").unwrap();
        let comment = graph.by_name("Comment").unwrap();

        assert_eq!(post.table, "posts");
        assert_eq!(post.children, vec![comment.id]);
        assert_eq!(graph.roots, vec![post.id]);
        assert_eq!(post.pk_param(), "postId");

        let rel = post.relation("comments").unwrap();
        assert_eq!(rel.our_key(), "id");
        assert_eq!(rel.their_key(), "post_id");

        let back = comment.relation("post").unwrap();
        assert_eq!(back.our_key(), "post_id");
        assert_eq!(back.their_key(), "id");
    }

    #[test]
    fn self_reference_marks_recursive() {
        let api = resolve_json(serde_json::json!({
            "versions": [{"name": "v1", "entities": [
                {"name": "Category", "columns": ["id", "category_id", "name"],
                 "relations": [{"type": "has_many", "model": "Category", "name": "categories"}]}
            ]}]
        }))
        .unwrap();
        let category = api.versions[0].graph.by_name("Category").unwrap();
        assert!(category.is_recursive);
        assert!(category.children.is_empty());
        assert_eq!(api.versions[0].graph.roots, vec![category.id]);
    }

    #[test]
    fn cycle_without_root_is_fatal() {
        let err = resolve_json(serde_json::json!({
            "versions": [{"name": "v1", "entities": [
                {"name": "A", "columns": ["id", "b_id"], "relations": [{"type": "has_many", "model": "B"}]},
                {"name": "B", "columns": ["id", "a_id"], "relations": [{"type": "has_many", "model": "A"}]}
            ]}]
        }))
        .unwrap_err();
        assert!(matches!(err, ConfigError::RelationCycle(_)));
    }

    #[test]
    fn limits_merge_version_then_entity() {
        let api = resolve_json(serde_json::json!({
            "versions": [{"name": "v1",
                "query": {"limits": [{"allow": "where_all"}]},
                "entities": [
                    {"name": "Post", "columns": ["id", "secret"],
                     "limits": [{"deny": "where_equal", "keys": ["secret"]}]}
                ]}]
        }))
        .unwrap();
        let post = api.versions[0].graph.by_name("Post").unwrap();
        assert_eq!(post.limits.len(), 15);
        let last = post.limits.last().unwrap();
        assert_eq!(last.polarity, Polarity::Deny);
        assert_eq!(last.feature, QueryFeature::WhereEqual);
    }

    #[test]
    fn middleware_bindings_follow_operations() {
        let config: FullConfig = serde_json::from_value(serde_json::json!({
            "versions": [{"name": "v1", "entities": [
                {"name": "Post", "columns": ["id"], "middlewares": [
                    "audit",
                    {"operations": ["insert", "update"], "names": ["auth"]}
                ]}
            ]}]
        }))
        .unwrap();
        let extensions = Extensions::default()
            .with_middleware("audit", |req, next| async move { next.run(req).await })
            .with_middleware("auth", |req, next| async move { next.run(req).await });
        let api = resolve(&config, &extensions).unwrap();
        let post = api.versions[0].graph.by_name("Post").unwrap();
        assert_eq!(post.middlewares_for(Operation::Insert), ["audit", "auth"]);
        assert_eq!(post.middlewares_for(Operation::Show), ["audit"]);
    }

    fn noop(_ctx: crate::extensions::HookContext<'_>) -> crate::extensions::HookFuture<'_> {
        Box::pin(async { Ok(()) })
    }

    #[test]
    fn hook_bindings_follow_operations() {
        let config: FullConfig = serde_json::from_value(serde_json::json!({
            "versions": [{"name": "v1", "entities": [
                {"name": "Post", "columns": ["id"], "hooks": [
                    {"before": ["stamp"]},
                    {"operations": "insert", "before": ["check"], "after": ["audit"]}
                ]}
            ]}]
        }))
        .unwrap();
        let extensions = Extensions::default()
            .with_hook("stamp", noop)
            .with_hook("check", noop)
            .with_hook("audit", noop);
        let api = resolve(&config, &extensions).unwrap();
        let post = api.versions[0].graph.by_name("Post").unwrap();
        assert_eq!(post.hooks_for(Operation::Insert, HookStage::Before), ["stamp", "check"]);
        assert_eq!(post.hooks_for(Operation::Insert, HookStage::After), ["audit"]);
        assert_eq!(post.hooks_for(Operation::Show, HookStage::Before), ["stamp"]);
        assert!(post.hooks_for(Operation::Show, HookStage::After).is_empty());
    }
}
