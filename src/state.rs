//! Shared application state handed to every route. Immutable after startup.

use crate::config::ResolvedApi;
use crate::db::Database;
use crate::extensions::Extensions;
use crate::routes::DocumentationCollector;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<dyn Database>,
    pub api: Arc<ResolvedApi>,
    pub extensions: Arc<Extensions>,
    /// Routes recorded by the route-tree builder.
    pub docs: Arc<DocumentationCollector>,
}
