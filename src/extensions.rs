//! Named hooks referenced from config: route middlewares, response serializers, entity
//! lifecycle hooks and version init hooks.

use crate::config::Operation;
use crate::db::DbScope;
use crate::error::{AppError, ConfigError};
use crate::routes::RouteDefinition;
use axum::{extract::Request, middleware::Next, response::Response};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

pub type MiddlewareFuture = Pin<Box<dyn Future<Output = Response> + Send + 'static>>;

/// Async middleware in `axum::middleware::from_fn` shape.
pub type Middleware = Arc<dyn Fn(Request, Next) -> MiddlewareFuture + Send + Sync>;

/// What a serializer knows about the request whose response it shapes.
#[derive(Clone, Debug)]
pub struct SerializeContext<'a> {
    pub entity: &'a str,
    pub operation: Operation,
    pub language: &'a str,
}

/// Rewrites one response item in place.
pub type Serializer = Arc<dyn Fn(&mut Value, &SerializeContext<'_>) + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HookStage {
    Before,
    After,
}

/// What a lifecycle hook sees. Statements run through `db` join the request's transaction
/// when there is one.
///
/// `data` is the filtered, validated body for before-hooks of insert/update/patch and the
/// path parameters for every other before-hook. After-hooks get the result: the row, or an
/// array of rows for paginate and all.
pub struct HookContext<'a> {
    pub entity: &'a str,
    pub operation: Operation,
    pub stage: HookStage,
    pub db: &'a mut DbScope,
    pub data: &'a mut Value,
}

pub type HookFuture<'a> = Pin<Box<dyn Future<Output = Result<(), AppError>> + Send + 'a>>;

/// Entity lifecycle hook. An error aborts the operation and rolls back its transaction.
pub type Hook = Arc<dyn for<'a> Fn(HookContext<'a>) -> HookFuture<'a> + Send + Sync>;

/// Version init hook input. `routes` is empty before init and holds the version's routes after.
#[derive(Clone, Copy, Debug)]
pub struct InitContext<'a> {
    pub version: &'a str,
    pub stage: HookStage,
    pub routes: &'a [RouteDefinition],
}

/// Runs around route building for one version. An error aborts startup.
pub type InitHook = Arc<dyn Fn(&InitContext<'_>) -> Result<(), ConfigError> + Send + Sync>;

#[derive(Clone, Default)]
pub struct Extensions {
    middlewares: HashMap<String, Middleware>,
    serializers: HashMap<String, Serializer>,
    hooks: HashMap<String, Hook>,
    init_hooks: HashMap<String, InitHook>,
}

impl Extensions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_middleware<F, Fut>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Request, Next) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Response> + Send + 'static,
    {
        let middleware: Middleware = Arc::new(move |req, next| Box::pin(f(req, next)));
        self.middlewares.insert(name.into(), middleware);
        self
    }

    pub fn with_serializer<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&mut Value, &SerializeContext<'_>) + Send + Sync + 'static,
    {
        self.serializers.insert(name.into(), Arc::new(f));
        self
    }

    pub fn with_hook<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: for<'a> Fn(HookContext<'a>) -> HookFuture<'a> + Send + Sync + 'static,
    {
        self.hooks.insert(name.into(), Arc::new(f));
        self
    }

    pub fn with_init_hook<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&InitContext<'_>) -> Result<(), ConfigError> + Send + Sync + 'static,
    {
        self.init_hooks.insert(name.into(), Arc::new(f));
        self
    }

    pub fn has_middleware(&self, name: &str) -> bool {
        self.middlewares.contains_key(name)
    }

    pub fn has_serializer(&self, name: &str) -> bool {
        self.serializers.contains_key(name)
    }

    pub fn has_hook(&self, name: &str) -> bool {
        self.hooks.contains_key(name)
    }

    pub fn has_init_hook(&self, name: &str) -> bool {
        self.init_hooks.contains_key(name)
    }

    pub fn hook(&self, name: &str) -> Option<Hook> {
        self.hooks.get(name).cloned()
    }

    pub fn init_hook(&self, name: &str) -> Option<InitHook> {
        self.init_hooks.get(name).cloned()
    }

    pub fn middleware(&self, name: &str) -> Option<Middleware> {
        self.middlewares.get(name).cloned()
    }

    pub fn serializer(&self, name: &str) -> Option<Serializer> {
        self.serializers.get(name).cloned()
    }
}

impl std::fmt::Debug for Extensions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fn names<T>(map: &HashMap<String, T>) -> Vec<&String> {
            let mut names: Vec<&String> = map.keys().collect();
            names.sort();
            names
        }
        f.debug_struct("Extensions")
            .field("middlewares", &names(&self.middlewares))
            .field("serializers", &names(&self.serializers))
            .field("hooks", &names(&self.hooks))
            .field("init_hooks", &names(&self.init_hooks))
            .finish()
    }
}
