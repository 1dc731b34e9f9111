//! Route-tree building, mounting, and the operator routes around it.

pub mod builder;
pub mod common;
pub mod docs;
pub mod entity;

pub use builder::{ParentBinding, RouteDefinition, RouteTable, RouteTreeBuilder};
pub use common::common_routes;
pub use docs::{docs_routes_for, DocumentationCollector, DocumentedRoute};
pub use entity::mount;

use crate::config::ResolvedApi;
use crate::db::Database;
use crate::error::ConfigError;
use crate::extensions::Extensions;
use crate::state::AppState;
use axum::Router;
use std::sync::Arc;
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};

/// Build the route table for `api` and the full application router: entity routes, common
/// routes, docs routes (outside production), body limit and request tracing.
pub fn application(
    db: Arc<dyn Database>,
    api: ResolvedApi,
    extensions: Extensions,
) -> Result<(Router, AppState), ConfigError> {
    let mut docs = DocumentationCollector::default();
    let table = RouteTreeBuilder::new(&mut docs).with_extensions(&extensions).build(&api)?;
    let body_limit = api.application.body_limit;
    let state = AppState {
        db,
        api: Arc::new(api),
        extensions: Arc::new(extensions),
        docs: Arc::new(docs),
    };
    let router = mount(&table, state.clone())?
        .merge(common_routes(state.clone()))
        .merge(docs_routes_for(state.clone()))
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(TraceLayer::new_for_http());
    Ok((router, state))
}
