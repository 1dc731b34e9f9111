//! In-process route documentation, served outside production.

use crate::config::{EntityGraph, EntityNode};
use crate::state::AppState;
use axum::{extract::State, http::Method, routing::get, Json, Router};
use serde::Serialize;
use serde_json::Value;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DocumentedRoute {
    pub method: String,
    pub path: String,
    pub entity: String,
}

/// Routes recorded while the route tree is built, in emission order.
#[derive(Clone, Debug, Default)]
pub struct DocumentationCollector {
    routes: Vec<DocumentedRoute>,
}

impl DocumentationCollector {
    pub fn record(&mut self, method: &Method, path: &str, entity: &str) {
        self.routes.push(DocumentedRoute {
            method: method.to_string(),
            path: path.to_string(),
            entity: entity.to_string(),
        });
    }

    pub fn routes(&self) -> &[DocumentedRoute] {
        &self.routes
    }

    pub fn summary(&self) -> Vec<String> {
        self.routes.iter().map(|r| format!("{} {}", r.method, r.path)).collect()
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DocsBody<'a> {
    routes: &'a [DocumentedRoute],
    model_tree: Value,
}

fn model_tree(state: &AppState) -> Value {
    let mut versions = serde_json::Map::new();
    for version in &state.api.versions {
        let roots: Vec<Value> = version
            .graph
            .roots()
            .map(|root| entity_tree(&version.graph, root, &mut Vec::new()))
            .collect();
        versions.insert(version.name.clone(), Value::Array(roots));
    }
    Value::Object(versions)
}

fn entity_tree(graph: &EntityGraph, node: &EntityNode, path: &mut Vec<usize>) -> Value {
    path.push(node.id.0);
    let relations: Vec<Value> = node
        .relations
        .iter()
        .map(|r| {
            serde_json::json!({
                "name": r.name,
                "type": r.kind,
                "model": r.target_name,
            })
        })
        .collect();
    let mut children = Vec::new();
    for id in &node.children {
        if !path.contains(&id.0) {
            children.push(entity_tree(graph, graph.node(*id), path));
        }
    }
    path.pop();
    serde_json::json!({
        "name": node.name,
        "table": node.table,
        "primaryKey": node.primary_key,
        "operations": node.operations,
        "recursive": node.is_recursive,
        "relations": relations,
        "children": children,
    })
}

async fn docs(State(state): State<AppState>) -> Json<Value> {
    let body = DocsBody {
        routes: state.docs.routes(),
        model_tree: model_tree(&state),
    };
    Json(serde_json::to_value(body).unwrap_or(Value::Null))
}

async fn docs_routes(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(state.docs.summary())
}

/// GET /docs and GET /docs/routes. Empty in production.
pub fn docs_routes_for(state: AppState) -> Router {
    if state.api.application.env.is_production() {
        return Router::new();
    }
    Router::new()
        .route("/docs", get(docs))
        .route("/docs/routes", get(docs_routes))
        .with_state(state)
}
