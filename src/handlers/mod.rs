//! Request context, the per-operation CRUD handlers and the dispatcher that runs them.

pub mod dispatch;
pub mod entity;

pub use dispatch::dispatch;

use crate::config::{EntityGraph, EntityId, EntityNode, Environment, Operation, ResolvedApi, ResolvedVersion};
use crate::db::DbScope;
use crate::error::{AppError, ConfigError};
use crate::extensions::{Extensions, HookContext, HookStage, SerializeContext};
use crate::routes::RouteDefinition;
use crate::sql::Scope;
use axum::response::Response;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = Result<Response, AppError>> + Send + 'a>>;

/// One CRUD handler. It runs every statement through `ctx.db` and returns the response;
/// the dispatcher owns commit and rollback.
pub type Handler = for<'a> fn(&'a mut RequestContext) -> HandlerFuture<'a>;

/// Everything a handler sees for one request.
pub struct RequestContext {
    pub route: Arc<RouteDefinition>,
    pub api: Arc<ResolvedApi>,
    pub extensions: Arc<Extensions>,
    pub db: DbScope,
    pub path_params: HashMap<String, String>,
    pub query: HashMap<String, String>,
    pub body: Option<Value>,
    pub language: String,
    pub env: Environment,
}

impl RequestContext {
    pub fn operation(&self) -> Operation {
        self.route.operation
    }

    pub fn version(&self) -> &ResolvedVersion {
        &self.api.versions[self.route.version]
    }

    pub fn graph(&self) -> &EntityGraph {
        &self.version().graph
    }

    pub fn entity(&self) -> &EntityNode {
        self.graph().node(self.route.entity)
    }

    pub fn entity_id(&self) -> EntityId {
        self.route.entity
    }

    /// Primary key taken from the route's item parameter.
    pub fn primary_key(&self) -> Result<Value, AppError> {
        self.param(&self.route.pk_param)
    }

    /// Equality scope on the parent's foreign key for nested routes.
    pub fn parent_scope(&self) -> Result<Option<Scope>, AppError> {
        match &self.route.parent {
            Some(parent) => Ok(Some(Scope {
                column: parent.foreign_key.clone(),
                value: self.param(&parent.param)?,
            })),
            None => Ok(None),
        }
    }

    /// Parent scope followed by the primary key scope.
    pub fn item_scopes(&self) -> Result<Vec<Scope>, AppError> {
        let mut scopes: Vec<Scope> = self.parent_scope()?.into_iter().collect();
        scopes.push(Scope {
            column: self.entity().primary_key.clone(),
            value: self.primary_key()?,
        });
        Ok(scopes)
    }

    fn param(&self, name: &str) -> Result<Value, AppError> {
        self.path_params
            .get(name)
            .map(|v| Value::String(v.clone()))
            .ok_or_else(|| AppError::BadRequest(format!("missing path parameter: {}", name)))
    }

    /// Request body as a JSON object.
    pub fn body_object(&self) -> Result<Map<String, Value>, AppError> {
        match &self.body {
            Some(Value::Object(map)) => Ok(map.clone()),
            None => Ok(Map::new()),
            Some(_) => Err(AppError::BadRequest("body must be a JSON object".into())),
        }
    }

    /// Path parameters as a JSON object.
    pub fn params_value(&self) -> Value {
        Value::Object(
            self.path_params
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect(),
        )
    }

    /// Run the entity's hooks bound to this operation and `stage`, in declaration order.
    /// The first error stops the chain.
    pub async fn run_hooks(&mut self, stage: HookStage, data: &mut Value) -> Result<(), AppError> {
        let api = self.api.clone();
        let route = self.route.clone();
        let extensions = self.extensions.clone();
        let entity = api.versions[route.version].graph.node(route.entity);
        for name in entity.hooks_for(route.operation, stage) {
            let hook = extensions.hook(name).ok_or_else(|| ConfigError::MissingReference {
                kind: "hook",
                id: name.clone(),
            })?;
            tracing::debug!(entity = %entity.name, hook = %name, ?stage, "hook");
            hook(HookContext {
                entity: &entity.name,
                operation: route.operation,
                stage,
                db: &mut self.db,
                data: &mut *data,
            })
            .await?;
        }
        Ok(())
    }

    /// Strip hidden columns and run the version serializers, then the entity's.
    pub fn present(&self, row: Value) -> Value {
        let entity = self.entity();
        let mut row = crate::service::strip_hidden(entity, row);
        let context = SerializeContext {
            entity: &entity.name,
            operation: self.operation(),
            language: &self.language,
        };
        for name in &entity.serializers {
            if let Some(serializer) = self.extensions.serializer(name) {
                serializer(&mut row, &context);
            }
        }
        row
    }
}

/// Handler for an operation.
pub fn handler_for(operation: Operation) -> Handler {
    match operation {
        Operation::Insert => entity::insert,
        Operation::Paginate => entity::paginate,
        Operation::All => entity::all,
        Operation::Show => entity::show,
        Operation::Update => entity::update,
        Operation::Patch => entity::patch,
        Operation::Delete => entity::delete,
        Operation::ForceDelete => entity::force_delete,
    }
}
