//! Route-tree builder: walks each version's entity graph from its roots and emits one route
//! per declared operation, nesting has-many children under their parent's item path.

use crate::case::{pluralize, to_kebab_case, uc_first};
use crate::config::{EntityGraph, EntityId, EntityNode, Operation, ResolvedApi, TransactionSource};
use crate::error::ConfigError;
use crate::extensions::{Extensions, HookStage, InitContext};
use crate::routes::docs::DocumentationCollector;
use axum::http::Method;
use std::collections::HashSet;

/// Path shape of an operation relative to the resource path.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PathShape {
    Collection,
    All,
    Item,
    ItemForce,
}

/// Fixed operation table: method and path shape per operation, in emission order.
const OPERATION_TABLE: &[(Operation, Method, PathShape)] = &[
    (Operation::Insert, Method::POST, PathShape::Collection),
    (Operation::Paginate, Method::GET, PathShape::Collection),
    (Operation::All, Method::GET, PathShape::All),
    (Operation::Show, Method::GET, PathShape::Item),
    (Operation::Update, Method::PUT, PathShape::Item),
    (Operation::Patch, Method::PATCH, PathShape::Item),
    (Operation::Delete, Method::DELETE, PathShape::Item),
    (Operation::ForceDelete, Method::DELETE, PathShape::ItemForce),
];

/// The parent a nested route is scoped to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParentBinding {
    pub entity: EntityId,
    /// Relation on the parent that leads here.
    pub relation: String,
    /// Path parameter carrying the parent key.
    pub param: String,
    /// Column on this entity holding the parent key.
    pub foreign_key: String,
}

#[derive(Clone, Debug)]
pub struct RouteDefinition {
    pub operation: Operation,
    pub method: Method,
    /// axum path template, e.g. `/api/v1/posts/:postId/comments`.
    pub path: String,
    pub version: usize,
    pub entity: EntityId,
    pub entity_name: String,
    /// Path parameter carrying this entity's own primary key on item routes.
    pub pk_param: String,
    pub parent: Option<ParentBinding>,
    pub middlewares: Vec<String>,
    pub transaction: TransactionSource,
}

impl RouteDefinition {
    /// `(method, path)` with every parameter name erased, the shape the router matches on.
    pub fn shape(&self) -> (Method, String) {
        let normalized = self
            .path
            .split('/')
            .map(|segment| if segment.starts_with(':') { ":" } else { segment })
            .collect::<Vec<_>>()
            .join("/");
        (self.method.clone(), normalized)
    }
}

#[derive(Clone, Debug, Default)]
pub struct RouteTable {
    pub routes: Vec<RouteDefinition>,
}

impl RouteTable {
    pub fn iter(&self) -> impl Iterator<Item = &RouteDefinition> {
        self.routes.iter()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// `["GET /api/v1/posts", ...]` in emission order.
    pub fn summary(&self) -> Vec<String> {
        self.routes.iter().map(|r| format!("{} {}", r.method, r.path)).collect()
    }
}

struct Visit<'a> {
    version: usize,
    graph: &'a EntityGraph,
    base: String,
}

pub struct RouteTreeBuilder<'a> {
    docs: &'a mut DocumentationCollector,
    extensions: Option<&'a Extensions>,
    table: RouteTable,
    shapes: HashSet<(Method, String)>,
}

impl<'a> RouteTreeBuilder<'a> {
    pub fn new(docs: &'a mut DocumentationCollector) -> Self {
        RouteTreeBuilder {
            docs,
            extensions: None,
            table: RouteTable::default(),
            shapes: HashSet::new(),
        }
    }

    /// Registry the versions' init hooks are looked up in.
    pub fn with_extensions(mut self, extensions: &'a Extensions) -> Self {
        self.extensions = Some(extensions);
        self
    }

    fn run_init_hook(
        &self,
        name: Option<&String>,
        version: &str,
        stage: HookStage,
        start: usize,
    ) -> Result<(), ConfigError> {
        let Some(name) = name else {
            return Ok(());
        };
        let hook = self
            .extensions
            .and_then(|e| e.init_hook(name))
            .ok_or_else(|| ConfigError::MissingReference {
                kind: "init hook",
                id: name.clone(),
            })?;
        tracing::debug!(version, hook = %name, ?stage, "init hook");
        hook(&InitContext {
            version,
            stage,
            routes: &self.table.routes[start..],
        })
    }

    /// Emit routes for every version. Errors are fatal at startup.
    pub fn build(mut self, api: &ResolvedApi) -> Result<RouteTable, ConfigError> {
        let root_prefix = api.root_prefix();
        for (index, version) in api.versions.iter().enumerate() {
            let base = if root_prefix.is_empty() {
                format!("/{}", version.name)
            } else {
                format!("/{}/{}", root_prefix, version.name)
            };
            let visit = Visit {
                version: index,
                graph: &version.graph,
                base,
            };
            let start = self.table.len();
            self.run_init_hook(version.on_before_init.as_ref(), &version.name, HookStage::Before, start)?;
            for root in version.graph.roots() {
                let resource = to_kebab_case(&pluralize(&root.name));
                let mut stack = Vec::new();
                self.visit_entity(&visit, root, "", &resource, None, &[], true, &mut stack)?;
            }
            tracing::info!(version = %version.name, routes = self.table.len() - start, "version routes created");
            self.run_init_hook(version.on_after_init.as_ref(), &version.name, HookStage::After, start)?;
        }
        tracing::info!(routes = self.table.len(), "route table built");
        Ok(self.table)
    }

    #[allow(clippy::too_many_arguments)]
    fn visit_entity(
        &mut self,
        visit: &Visit<'_>,
        node: &EntityNode,
        prefix: &str,
        resource: &str,
        parent: Option<ParentBinding>,
        params_in_prefix: &[String],
        allow_self_nesting: bool,
        stack: &mut Vec<EntityId>,
    ) -> Result<(), ConfigError> {
        if node.ignore {
            return Ok(());
        }
        stack.push(node.id);

        let mut pk_param = node.pk_param();
        if params_in_prefix.contains(&pk_param) {
            pk_param = format!("child{}", uc_first(&pk_param));
        }
        let resource_path = format!("{}/{}{}", visit.base, prefix, resource);

        for (operation, method, shape) in OPERATION_TABLE {
            if !node.supports(*operation) {
                continue;
            }
            let path = match shape {
                PathShape::Collection => resource_path.clone(),
                PathShape::All => format!("{}/all", resource_path),
                PathShape::Item => format!("{}/:{}", resource_path, pk_param),
                PathShape::ItemForce => format!("{}/:{}/force", resource_path, pk_param),
            };
            self.push(RouteDefinition {
                operation: *operation,
                method: method.clone(),
                path,
                version: visit.version,
                entity: node.id,
                entity_name: node.name.clone(),
                pk_param: pk_param.clone(),
                parent: parent.clone(),
                middlewares: node.middlewares_for(*operation).to_vec(),
                transaction: node.transaction.clone(),
            })?;
        }

        let child_prefix = format!("{}{}/:{}/", prefix, resource, pk_param);
        let mut child_params = params_in_prefix.to_vec();
        child_params.push(pk_param.clone());
        for relation in node.relations.iter().filter(|r| r.is_to_many()) {
            let is_self = relation.target == node.id;
            if is_self && !(node.is_recursive && allow_self_nesting) {
                continue;
            }
            if !is_self && stack.contains(&relation.target) {
                tracing::debug!(entity = %node.name, relation = %relation.name, "skipping relation back into nesting path");
                continue;
            }
            let child = visit.graph.node(relation.target);
            let binding = ParentBinding {
                entity: node.id,
                relation: relation.name.clone(),
                param: pk_param.clone(),
                foreign_key: relation.their_key().to_string(),
            };
            self.visit_entity(
                visit,
                child,
                &child_prefix,
                &to_kebab_case(&relation.name),
                Some(binding),
                &child_params,
                !is_self,
                stack,
            )?;
        }

        stack.pop();
        Ok(())
    }

    fn push(&mut self, route: RouteDefinition) -> Result<(), ConfigError> {
        if !self.shapes.insert(route.shape()) {
            return Err(ConfigError::DuplicateRoute {
                method: route.method.to_string(),
                path: route.path,
            });
        }
        tracing::debug!(method = %route.method, route = %route.path, entity = %route.entity_name, "route");
        self.docs.record(&route.method, &route.path, &route.entity_name);
        self.table.routes.push(route);
        Ok(())
    }
}
