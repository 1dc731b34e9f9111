//! Generic CRUD execution through a request's database scope.

use crate::config::{EntityGraph, EntityNode};
use crate::db::DbScope;
use crate::error::AppError;
use crate::query::WithRelation;
use crate::sql::{count, delete, insert, select, select_by_column_in, soft_delete, update, Scope, SelectSpec};
use serde_json::{Map, Value};
use std::future::Future;
use std::pin::Pin;

pub struct CrudService;

impl CrudService {
    pub async fn list(db: &mut DbScope, spec: &SelectSpec<'_>) -> Result<Vec<Value>, AppError> {
        db.fetch_all(&select(spec)).await
    }

    pub async fn count(db: &mut DbScope, spec: &SelectSpec<'_>) -> Result<u64, AppError> {
        let row = db.fetch_optional(&count(spec)).await?;
        Ok(row
            .as_ref()
            .and_then(|r| r.get("total"))
            .and_then(|t| t.as_u64().or_else(|| t.as_str().and_then(|s| s.parse().ok())))
            .unwrap_or(0))
    }

    /// First row matching `spec`, if any.
    pub async fn read(db: &mut DbScope, spec: &SelectSpec<'_>) -> Result<Option<Value>, AppError> {
        let mut spec = spec.clone();
        spec.limit = Some(1);
        db.fetch_optional(&select(&spec)).await
    }

    /// Insert one row; `now_columns` are stamped by the database. Returns the created row.
    pub async fn create(
        db: &mut DbScope,
        entity: &EntityNode,
        body: &Map<String, Value>,
        now_columns: &[&str],
    ) -> Result<Value, AppError> {
        let q = insert(entity, body, now_columns);
        db.fetch_optional(&q)
            .await?
            .ok_or_else(|| AppError::Internal(format!("insert into {} returned no row", entity.table)))
    }

    /// Update the row matching `scopes`. Returns the updated row.
    pub async fn update(
        db: &mut DbScope,
        entity: &EntityNode,
        scopes: &[Scope],
        body: &Map<String, Value>,
        now_columns: &[&str],
    ) -> Result<Option<Value>, AppError> {
        db.fetch_optional(&update(entity, scopes, body, now_columns)).await
    }

    /// Hard delete. Returns the deleted row or None.
    pub async fn delete(db: &mut DbScope, entity: &EntityNode, scopes: &[Scope]) -> Result<Option<Value>, AppError> {
        db.fetch_optional(&delete(entity, scopes)).await
    }

    pub async fn soft_delete(
        db: &mut DbScope,
        entity: &EntityNode,
        scopes: &[Scope],
        deleted_at: &str,
    ) -> Result<Option<Value>, AppError> {
        db.fetch_optional(&soft_delete(entity, scopes, deleted_at)).await
    }

    /// Attach `with=` relations to `rows`: one batched query per relation and nesting level.
    /// Related rows lose their entity's hidden columns.
    pub fn load_relations<'a>(
        db: &'a mut DbScope,
        graph: &'a EntityGraph,
        entity: &'a EntityNode,
        rows: &'a mut [Value],
        with: &'a [WithRelation],
    ) -> Pin<Box<dyn Future<Output = Result<(), AppError>> + Send + 'a>> {
        Box::pin(async move {
            for requested in with {
                let Some(relation) = entity.relation(&requested.name) else {
                    return Err(AppError::BadRequest(format!(
                        "Unknown relation on {}: {}",
                        entity.name, requested.name
                    )));
                };
                let target = graph.node(relation.target);
                let our_key = relation.our_key();
                let their_key = relation.their_key();

                let mut keys: Vec<Value> = Vec::new();
                for row in rows.iter() {
                    if let Some(k) = row.get(our_key).filter(|v| !v.is_null()) {
                        if !keys.contains(k) {
                            keys.push(k.clone());
                        }
                    }
                }

                let mut columns = requested.fields.clone();
                if !columns.is_empty() {
                    let mut required = vec![their_key.to_string(), target.primary_key.clone()];
                    for child in &requested.children {
                        if let Some(r) = target.relation(&child.name) {
                            required.push(r.our_key().to_string());
                        }
                    }
                    for c in required {
                        if !columns.contains(&c) {
                            columns.push(c);
                        }
                    }
                }

                let mut related = if keys.is_empty() {
                    Vec::new()
                } else {
                    db.fetch_all(&select_by_column_in(target, &columns, their_key, &keys)).await?
                };
                if !requested.children.is_empty() {
                    Self::load_relations(db, graph, target, &mut related, &requested.children).await?;
                }

                for row in rows.iter_mut() {
                    let key = row.get(our_key).cloned().unwrap_or(Value::Null);
                    let matches = related.iter().filter(|r| !key.is_null() && r.get(their_key) == Some(&key));
                    let attached = if relation.is_to_many() {
                        Value::Array(matches.map(|r| strip_hidden(target, r.clone())).collect())
                    } else {
                        matches.map(|r| strip_hidden(target, r.clone())).next().unwrap_or(Value::Null)
                    };
                    if let Value::Object(map) = row {
                        map.insert(requested.name.clone(), attached);
                    }
                }
            }
            Ok(())
        })
    }
}

/// Remove the entity's hidden columns from one row.
pub fn strip_hidden(entity: &EntityNode, mut row: Value) -> Value {
    if let Value::Object(map) = &mut row {
        for hidden in &entity.hidden {
            map.remove(hidden);
        }
    }
    row
}
