//! Mounts a built route table on an axum router. Each route closes over its own
//! [`RouteDefinition`] and hands the request to the dispatcher.

use crate::error::ConfigError;
use crate::extractors::{negotiate_language, CurrentLanguage, LanguageSettings};
use crate::handlers::dispatch::{dispatch, Incoming};
use crate::routes::{RouteDefinition, RouteTable};
use crate::state::AppState;
use axum::{
    body::Bytes,
    extract::{Path, Query, Request, State},
    middleware::{from_fn, Next},
    routing::{on, MethodFilter, MethodRouter},
    Router,
};
use std::collections::HashMap;
use std::sync::Arc;

fn method_router(state: &AppState, route: RouteDefinition) -> Result<MethodRouter<AppState>, ConfigError> {
    let filter = MethodFilter::try_from(route.method.clone())
        .map_err(|e| ConfigError::Validation(format!("{} {}: {}", route.method, route.path, e)))?;
    let middlewares = route.middlewares.clone();
    let version = &state.api.versions[route.version];
    let settings = Arc::new(LanguageSettings {
        supported: version.supported_languages.clone(),
        default: version.default_language.clone(),
    });
    let route = Arc::new(route);

    let handler = move |State(state): State<AppState>,
                        path: Option<Path<HashMap<String, String>>>,
                        Query(query): Query<HashMap<String, String>>,
                        CurrentLanguage(language): CurrentLanguage,
                        body: Bytes| {
        let route = route.clone();
        async move {
            let incoming = Incoming {
                path_params: path.map(|Path(p)| p).unwrap_or_default(),
                query,
                body,
                language,
            };
            dispatch(&state, route, incoming).await
        }
    };
    let mut method_router = on(filter, handler);

    // Declaration order runs outermost first, so wrap in reverse.
    for name in middlewares.iter().rev() {
        let Some(middleware) = state.extensions.middleware(name) else {
            return Err(ConfigError::MissingReference {
                kind: "middleware",
                id: name.clone(),
            });
        };
        method_router = method_router.layer(from_fn(move |req: Request, next: Next| middleware(req, next)));
    }
    Ok(method_router.layer(from_fn(move |req: Request, next: Next| {
        negotiate_language(settings.clone(), req, next)
    })))
}

/// One axum route per path, with every method declared for it.
pub fn mount(table: &RouteTable, state: AppState) -> Result<Router, ConfigError> {
    let mut paths: Vec<(String, Vec<MethodRouter<AppState>>)> = Vec::new();
    for route in table.iter() {
        let service = method_router(&state, route.clone())?;
        match paths.iter_mut().find(|(p, _)| *p == route.path) {
            Some((_, services)) => services.push(service),
            None => paths.push((route.path.clone(), vec![service])),
        }
    }
    let mut router = Router::new();
    for (path, services) in paths {
        if let Some(service) = services.into_iter().reduce(|a, b| a.merge(b)) {
            router = router.route(&path, service);
        }
    }
    tracing::info!(paths = table.len(), "entity routes mounted");
    Ok(router.with_state(state))
}
