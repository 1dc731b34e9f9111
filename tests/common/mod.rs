//! Shared fixtures: an in-memory database double that records every statement and
//! transaction boundary, and an application builder over it.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::Body;
use axum::http::Response;
use axum::Router;
use resourceful::sql::{PgBindValue, QueryBuf};
use resourceful::{application, resolve, AppError, Database, Extensions, FullConfig, Transaction};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};

#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    Begin,
    Commit,
    Rollback,
    Query {
        sql: String,
        params: Vec<PgBindValue>,
        in_transaction: bool,
    },
}

impl Event {
    pub fn is_query(&self) -> bool {
        matches!(self, Event::Query { .. })
    }
}

enum Outcome {
    Rows(Vec<Value>),
    Fail(String),
}

struct Canned {
    pattern: String,
    outcome: Outcome,
}

#[derive(Default)]
struct Inner {
    canned: Vec<Canned>,
    events: Mutex<Vec<Event>>,
}

impl Inner {
    fn run(&self, q: &QueryBuf, in_transaction: bool) -> Result<Vec<Value>, AppError> {
        self.events.lock().unwrap().push(Event::Query {
            sql: q.sql.clone(),
            params: q.params.clone(),
            in_transaction,
        });
        match self.canned.iter().find(|c| q.sql.contains(&c.pattern)) {
            Some(Canned {
                outcome: Outcome::Rows(rows),
                ..
            }) => Ok(rows.clone()),
            Some(Canned {
                outcome: Outcome::Fail(message),
                ..
            }) => Err(AppError::Internal(message.clone())),
            None => Ok(Vec::new()),
        }
    }

    fn record(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

/// Answers each statement with the first canned outcome whose pattern the SQL contains,
/// else with no rows.
#[derive(Clone, Default)]
pub struct RecordingDatabase {
    inner: Arc<Inner>,
}

impl RecordingDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    fn with(mut self, pattern: &str, outcome: Outcome) -> Self {
        Arc::get_mut(&mut self.inner)
            .expect("configure before sharing")
            .canned
            .push(Canned {
                pattern: pattern.to_string(),
                outcome,
            });
        self
    }

    pub fn rows(self, pattern: &str, rows: Vec<Value>) -> Self {
        self.with(pattern, Outcome::Rows(rows))
    }

    pub fn fails(self, pattern: &str, message: &str) -> Self {
        self.with(pattern, Outcome::Fail(message.to_string()))
    }

    pub fn events(&self) -> Vec<Event> {
        self.inner.events.lock().unwrap().clone()
    }

    /// Everything except the queries themselves.
    pub fn boundaries(&self) -> Vec<Event> {
        self.events().into_iter().filter(|e| !e.is_query()).collect()
    }

    pub fn queries(&self) -> Vec<(String, Vec<PgBindValue>)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Query { sql, params, .. } => Some((sql, params)),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl Database for RecordingDatabase {
    async fn fetch_all(&self, q: &QueryBuf) -> Result<Vec<Value>, AppError> {
        self.inner.run(q, false)
    }

    async fn fetch_optional(&self, q: &QueryBuf) -> Result<Option<Value>, AppError> {
        Ok(self.inner.run(q, false)?.into_iter().next())
    }

    async fn execute(&self, q: &QueryBuf) -> Result<u64, AppError> {
        Ok(self.inner.run(q, false)?.len() as u64)
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>, AppError> {
        self.inner.record(Event::Begin);
        Ok(Box::new(RecordingTransaction {
            inner: self.inner.clone(),
        }))
    }

    async fn ping(&self) -> Result<(), AppError> {
        Ok(())
    }
}

struct RecordingTransaction {
    inner: Arc<Inner>,
}

#[async_trait]
impl Transaction for RecordingTransaction {
    async fn fetch_all(&mut self, q: &QueryBuf) -> Result<Vec<Value>, AppError> {
        self.inner.run(q, true)
    }

    async fn fetch_optional(&mut self, q: &QueryBuf) -> Result<Option<Value>, AppError> {
        Ok(self.inner.run(q, true)?.into_iter().next())
    }

    async fn execute(&mut self, q: &QueryBuf) -> Result<u64, AppError> {
        Ok(self.inner.run(q, true)?.len() as u64)
    }

    async fn commit(self: Box<Self>) -> Result<(), AppError> {
        self.inner.record(Event::Commit);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), AppError> {
        self.inner.record(Event::Rollback);
        Ok(())
    }
}

/// Blog descriptor used across the integration tests.
pub fn blog_config() -> Value {
    json!({
        "versions": [{
            "name": "v1",
            "transaction": [{"operations": ["insert", "update", "patch", "delete"], "transaction": true}],
            "supported_languages": ["en", "fr"],
            "default_language": "en",
            "query": {"limits": [{"allow": "where_all"}]},
            "entities": [
                {
                    "name": "Post",
                    "columns": ["id", "title", "secret", "user_id"],
                    "validations": {"title": {"required": true}},
                    "relations": [{"type": "has_many", "model": "Comment"}],
                    "limits": [
                        {"deny": "where_equal", "keys": ["secret"]},
                        {"allow": "with_all"}
                    ]
                },
                {
                    "name": "Comment",
                    "columns": ["id", "post_id", "body"],
                    "operations": ["insert", "paginate", "show"],
                    "transaction": false
                },
                {
                    "name": "Category",
                    "columns": ["id", "category_id", "name"],
                    "operations": ["paginate", "show"],
                    "relations": [{"type": "has_many", "model": "Category", "name": "categories"}]
                }
            ]
        }]
    })
}

pub fn app(config: Value, db: RecordingDatabase, extensions: Extensions) -> Router {
    let config: FullConfig = serde_json::from_value(config).unwrap();
    let api = resolve(&config, &extensions).unwrap();
    let (router, _state) = application(Arc::new(db), api, extensions).unwrap();
    router
}

pub async fn body_json(resp: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    if bytes.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(&bytes).unwrap()
}
