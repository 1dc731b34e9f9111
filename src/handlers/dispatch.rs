//! Request dispatcher: resolves the transaction policy, opens the database scope, runs the
//! route's handler and commits or rolls back before the response leaves.
//!
//! Stages: `received -> policy_resolved -> (transaction_opened | no_transaction) ->
//! handler_executing -> (committed | rolled_back) -> response_sent`.
//!
//! If the request future is dropped mid-flight the open transaction is dropped with it;
//! [`Transaction`](crate::db::Transaction) implementations roll back on drop.

use super::{handler_for, RequestContext};
use crate::db::DbScope;
use crate::error::AppError;
use crate::routes::RouteDefinition;
use crate::state::AppState;
use axum::body::Bytes;
use axum::response::Response;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::Instrument;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Received,
    PolicyResolved,
    TransactionOpened,
    NoTransaction,
    HandlerExecuting,
    Committed,
    RolledBack,
    ResponseSent,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Received => "received",
            Stage::PolicyResolved => "policy_resolved",
            Stage::TransactionOpened => "transaction_opened",
            Stage::NoTransaction => "no_transaction",
            Stage::HandlerExecuting => "handler_executing",
            Stage::Committed => "committed",
            Stage::RolledBack => "rolled_back",
            Stage::ResponseSent => "response_sent",
        })
    }
}

/// Raw request pieces extracted by the mounted route.
#[derive(Debug, Default)]
pub struct Incoming {
    pub path_params: HashMap<String, String>,
    pub query: HashMap<String, String>,
    pub body: Bytes,
    pub language: String,
}

fn parse_body(body: &Bytes) -> Result<Option<Value>, AppError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    serde_json::from_slice(body)
        .map(Some)
        .map_err(|e| AppError::BadRequest(format!("invalid JSON body: {}", e)))
}

pub async fn dispatch(state: &AppState, route: Arc<RouteDefinition>, incoming: Incoming) -> Response {
    let span = tracing::info_span!(
        "dispatch",
        method = %route.method,
        route = %route.path,
        operation = %route.operation,
    );
    run(state, route, incoming).instrument(span).await
}

async fn run(state: &AppState, route: Arc<RouteDefinition>, incoming: Incoming) -> Response {
    let env = state.api.application.env;
    tracing::debug!(stage = %Stage::Received);

    let body = match parse_body(&incoming.body) {
        Ok(body) => body,
        Err(err) => return err.into_response_for(env),
    };

    let transactional = route.transaction.resolve(route.operation);
    tracing::debug!(stage = %Stage::PolicyResolved, transactional);

    let db = if transactional {
        match state.db.begin().await {
            Ok(tx) => {
                tracing::debug!(stage = %Stage::TransactionOpened);
                DbScope::Transaction(tx)
            }
            Err(err) => return err.into_response_for(env),
        }
    } else {
        tracing::debug!(stage = %Stage::NoTransaction);
        DbScope::Direct(state.db.clone())
    };

    let mut ctx = RequestContext {
        route: route.clone(),
        api: state.api.clone(),
        extensions: state.extensions.clone(),
        db,
        path_params: incoming.path_params,
        query: incoming.query,
        body,
        language: incoming.language,
        env,
    };

    tracing::debug!(stage = %Stage::HandlerExecuting);
    let handler = handler_for(route.operation);
    let result = handler(&mut ctx).await;

    let response = match (result, ctx.db) {
        (Ok(response), DbScope::Transaction(tx)) => match tx.commit().await {
            Ok(()) => {
                tracing::debug!(stage = %Stage::Committed);
                response
            }
            Err(err) => err.into_response_for(env),
        },
        (Err(err), DbScope::Transaction(tx)) => {
            if let Err(rollback) = tx.rollback().await {
                tracing::error!(error = %rollback, "rollback failed");
            }
            tracing::debug!(stage = %Stage::RolledBack, error = %err);
            err.into_response_for(env)
        }
        (Ok(response), DbScope::Direct(_)) => response,
        (Err(err), DbScope::Direct(_)) => err.into_response_for(env),
    };
    tracing::debug!(stage = %Stage::ResponseSent, status = response.status().as_u16());
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_body_is_absent() {
        assert_eq!(parse_body(&Bytes::new()).unwrap(), None);
        assert_eq!(parse_body(&Bytes::from_static(b" \n")).unwrap(), None);
    }

    #[test]
    fn malformed_body_is_bad_request() {
        let err = parse_body(&Bytes::from_static(b"{nope")).unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }
}
