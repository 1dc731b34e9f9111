//! Resolved entity model: config validated and flattened into an arena graph for runtime use.
//!
//! Relations point at their target through [`EntityId`] indices into [`EntityGraph::nodes`],
//! so self-referential and mutually related entities need no ownership cycles.

use crate::case::uc_first;
use crate::config::{
    ApplicationConfig, FillableConfig, Operation, RelationKind, TransactionPolicy, ValidationRules,
    ValidationsConfig,
};
use crate::extensions::HookStage;
use crate::service::{transaction, QueryLimitRule};
use serde::Serialize;
use std::collections::{HashMap, HashSet};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct EntityId(pub usize);

#[derive(Clone, Debug, Serialize)]
pub struct ResolvedRelation {
    pub kind: RelationKind,
    /// Display name (nested path segment, `with=` key).
    pub name: String,
    pub target: EntityId,
    pub target_name: String,
    /// Key on the "one" side: owner for has_many, target for has_one/belongs_to.
    pub primary_key: String,
    /// Key on the referencing side: target for has_many, owner for has_one/belongs_to.
    pub foreign_key: String,
}

impl ResolvedRelation {
    pub fn is_to_many(&self) -> bool {
        matches!(self.kind, RelationKind::HasMany)
    }

    /// Column on the owning entity used by the join.
    pub fn our_key(&self) -> &str {
        if self.is_to_many() {
            &self.primary_key
        } else {
            &self.foreign_key
        }
    }

    /// Column on the target entity used by the join.
    pub fn their_key(&self) -> &str {
        if self.is_to_many() {
            &self.foreign_key
        } else {
            &self.primary_key
        }
    }
}

/// Lifecycle hook names bound to one operation, in declaration order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct HookBinding {
    pub before: Vec<String>,
    pub after: Vec<String>,
}

/// Entity and version transaction policies; resolved per request.
#[derive(Clone, Debug, Default, Serialize)]
pub struct TransactionSource {
    pub entity: Option<TransactionPolicy>,
    pub version: Option<TransactionPolicy>,
}

impl TransactionSource {
    pub fn resolve(&self, operation: Operation) -> bool {
        transaction::resolve(self.entity.as_ref(), self.version.as_ref(), operation)
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct EntityNode {
    pub id: EntityId,
    pub name: String,
    pub table: String,
    pub primary_key: String,
    pub columns: Vec<String>,
    pub fillable: FillableConfig,
    pub validations: ValidationsConfig,
    pub hidden: HashSet<String>,
    pub operations: Vec<Operation>,
    pub relations: Vec<ResolvedRelation>,
    /// Distinct has_many targets other than the entity itself.
    pub children: Vec<EntityId>,
    /// Has a has_many relation to itself.
    pub is_recursive: bool,
    /// Version rules followed by entity rules, declaration order.
    pub limits: Vec<QueryLimitRule>,
    pub transaction: TransactionSource,
    /// Middleware names bound per operation, in declaration order.
    pub middlewares: HashMap<Operation, Vec<String>>,
    pub hooks: HashMap<Operation, HookBinding>,
    /// Serializer names: version-wide first, then the entity's own.
    pub serializers: Vec<String>,
    pub created_at_column: Option<String>,
    pub updated_at_column: Option<String>,
    pub deleted_at_column: Option<String>,
    pub ignore: bool,
}

impl EntityNode {
    pub fn supports(&self, operation: Operation) -> bool {
        self.operations.contains(&operation)
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column)
    }

    pub fn relation(&self, name: &str) -> Option<&ResolvedRelation> {
        self.relations.iter().find(|r| r.name == name)
    }

    /// Route parameter carrying this entity's primary key: the lowercased name followed by
    /// the capitalized key, e.g. `postId`, `blogpostId`.
    pub fn pk_param(&self) -> String {
        format!("{}{}", self.name.to_lowercase(), uc_first(&self.primary_key))
    }

    /// Columns a request body may set for `operation`. An empty flat list means every column
    /// except the primary key and the managed timestamp columns.
    pub fn fillable_for(&self, operation: Operation) -> Vec<&str> {
        match &self.fillable {
            FillableConfig::All(cols) if cols.is_empty() => self
                .columns
                .iter()
                .map(String::as_str)
                .filter(|c| *c != self.primary_key && !self.is_managed_column(c))
                .collect(),
            FillableConfig::All(cols) => cols.iter().map(String::as_str).collect(),
            FillableConfig::PerMethod { post, put, patch } => {
                let list = match operation {
                    Operation::Insert => post.as_ref(),
                    Operation::Patch => patch.as_ref().or(put.as_ref()),
                    _ => put.as_ref(),
                };
                list.map(|cols| cols.iter().map(String::as_str).collect()).unwrap_or_default()
            }
        }
    }

    /// Timestamp and soft-delete columns maintained by the handlers.
    pub fn is_managed_column(&self, column: &str) -> bool {
        [&self.created_at_column, &self.updated_at_column, &self.deleted_at_column]
            .into_iter()
            .flatten()
            .any(|c| c == column)
    }

    pub fn validations_for(&self, operation: Operation) -> Option<&ValidationRules> {
        match &self.validations {
            ValidationsConfig::All(rules) => Some(rules),
            ValidationsConfig::PerMethod(per) => match operation {
                Operation::Insert => per.post.as_ref(),
                _ => per.put.as_ref(),
            },
        }
    }

    pub fn middlewares_for(&self, operation: Operation) -> &[String] {
        self.middlewares.get(&operation).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn hooks_for(&self, operation: Operation, stage: HookStage) -> &[String] {
        match (self.hooks.get(&operation), stage) {
            (Some(binding), HookStage::Before) => &binding.before,
            (Some(binding), HookStage::After) => &binding.after,
            (None, _) => &[],
        }
    }

    /// Columns visible in responses.
    pub fn visible_columns(&self) -> impl Iterator<Item = &String> {
        self.columns.iter().filter(|c| !self.hidden.contains(*c))
    }
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct EntityGraph {
    pub nodes: Vec<EntityNode>,
    pub by_name: HashMap<String, EntityId>,
    /// Entities that are not a has_many child of another entity.
    pub roots: Vec<EntityId>,
}

impl EntityGraph {
    pub fn node(&self, id: EntityId) -> &EntityNode {
        &self.nodes[id.0]
    }

    pub fn by_name(&self, name: &str) -> Option<&EntityNode> {
        self.by_name.get(name).map(|id| self.node(*id))
    }

    pub fn roots(&self) -> impl Iterator<Item = &EntityNode> {
        self.roots.iter().map(|id| self.node(*id))
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct ResolvedVersion {
    pub name: String,
    pub supported_languages: Vec<String>,
    pub default_language: String,
    pub on_before_init: Option<String>,
    pub on_after_init: Option<String>,
    pub graph: EntityGraph,
}

#[derive(Clone, Debug, Serialize)]
pub struct ResolvedApi {
    pub application: ApplicationConfig,
    pub versions: Vec<ResolvedVersion>,
}

impl ResolvedApi {
    pub fn version(&self, name: &str) -> Option<&ResolvedVersion> {
        self.versions.iter().find(|v| v.name == name)
    }

    /// Root prefix without leading/trailing slashes, e.g. "api".
    pub fn root_prefix(&self) -> &str {
        self.application.prefix.trim_matches('/')
    }
}
