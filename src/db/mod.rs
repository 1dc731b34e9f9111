//! Database seam: query execution and transactions behind object-safe traits.
//!
//! Handlers run every statement through a [`DbScope`], which is either the shared
//! connection pool or one open transaction owned by the request.

mod postgres;
pub use postgres::{PgDatabase, PgTransaction};

use crate::error::AppError;
use crate::sql::QueryBuf;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

#[async_trait]
pub trait Database: Send + Sync {
    async fn fetch_all(&self, q: &QueryBuf) -> Result<Vec<Value>, AppError>;

    async fn fetch_optional(&self, q: &QueryBuf) -> Result<Option<Value>, AppError>;

    /// Rows affected.
    async fn execute(&self, q: &QueryBuf) -> Result<u64, AppError>;

    async fn begin(&self) -> Result<Box<dyn Transaction>, AppError>;

    /// Round trip used by readiness checks.
    async fn ping(&self) -> Result<(), AppError>;
}

/// An open transaction. Dropping it without `commit` must roll it back.
#[async_trait]
pub trait Transaction: Send {
    async fn fetch_all(&mut self, q: &QueryBuf) -> Result<Vec<Value>, AppError>;

    async fn fetch_optional(&mut self, q: &QueryBuf) -> Result<Option<Value>, AppError>;

    async fn execute(&mut self, q: &QueryBuf) -> Result<u64, AppError>;

    async fn commit(self: Box<Self>) -> Result<(), AppError>;

    async fn rollback(self: Box<Self>) -> Result<(), AppError>;
}

/// Where a handler's statements go: straight to the pool, or into the request's transaction.
pub enum DbScope {
    Direct(Arc<dyn Database>),
    Transaction(Box<dyn Transaction>),
}

impl DbScope {
    pub fn is_transaction(&self) -> bool {
        matches!(self, DbScope::Transaction(_))
    }

    pub async fn fetch_all(&mut self, q: &QueryBuf) -> Result<Vec<Value>, AppError> {
        tracing::debug!(sql = %q.sql, params = ?q.params, tx = self.is_transaction(), "query");
        match self {
            DbScope::Direct(db) => db.fetch_all(q).await,
            DbScope::Transaction(tx) => tx.fetch_all(q).await,
        }
    }

    pub async fn fetch_optional(&mut self, q: &QueryBuf) -> Result<Option<Value>, AppError> {
        tracing::debug!(sql = %q.sql, params = ?q.params, tx = self.is_transaction(), "query");
        match self {
            DbScope::Direct(db) => db.fetch_optional(q).await,
            DbScope::Transaction(tx) => tx.fetch_optional(q).await,
        }
    }

    pub async fn execute(&mut self, q: &QueryBuf) -> Result<u64, AppError> {
        tracing::debug!(sql = %q.sql, params = ?q.params, tx = self.is_transaction(), "execute");
        match self {
            DbScope::Direct(db) => db.execute(q).await,
            DbScope::Transaction(tx) => tx.execute(q).await,
        }
    }
}

impl std::fmt::Debug for DbScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DbScope::Direct(_) => f.write_str("DbScope::Direct"),
            DbScope::Transaction(_) => f.write_str("DbScope::Transaction"),
        }
    }
}
