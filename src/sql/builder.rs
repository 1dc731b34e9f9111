//! Builds parameterized INSERT, SELECT, UPDATE, DELETE from a resolved entity.
//!
//! Column types are not declared in config, so values reach typed columns through
//! `jsonb_populate_record(NULL::<table>, $n)`: PostgreSQL converts each JSON value to the
//! column's own type.

use crate::config::EntityNode;
use crate::query::{Condition, ConditionOp, Joiner, SortField, WhereClause, WhereItem};
use crate::sql::PgBindValue;
use serde_json::{Map, Value};

const MAIN_ALIAS: &str = "main";

/// Quote identifier for PostgreSQL (safe: only from config).
fn quoted(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

/// Table name, schema-qualified when written as `schema.table`.
fn qualified_table(table: &str) -> String {
    match table.split_once('.') {
        Some((schema, table)) => format!("{}.{}", quoted(schema), quoted(table)),
        None => quoted(table),
    }
}

fn column(name: &str) -> String {
    format!("{}.{}", MAIN_ALIAS, quoted(name))
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct QueryBuf {
    pub sql: String,
    pub params: Vec<PgBindValue>,
}

impl QueryBuf {
    fn new() -> Self {
        QueryBuf::default()
    }

    fn push_param(&mut self, v: PgBindValue) -> usize {
        self.params.push(v);
        self.params.len()
    }

    /// Placeholder expression carrying `value` converted to the type of `table.col`.
    fn typed(&mut self, table: &str, col: &str, value: &Value) -> String {
        let mut record = Map::new();
        record.insert(col.to_string(), value.clone());
        let n = self.push_param(PgBindValue::Json(Value::Object(record)));
        format!(
            "(jsonb_populate_record(NULL::{}, ${}::jsonb)).{}",
            qualified_table(table),
            n,
            quoted(col)
        )
    }
}

/// Equality filter on `main.<column>` that is always applied (parent scope, primary key).
#[derive(Clone, Debug, PartialEq)]
pub struct Scope {
    pub column: String,
    pub value: Value,
}

/// Everything a SELECT over one entity can carry.
#[derive(Clone, Debug)]
pub struct SelectSpec<'a> {
    pub entity: &'a EntityNode,
    /// Empty selects every column.
    pub columns: Vec<String>,
    pub conditions: &'a [WhereClause],
    pub scopes: Vec<Scope>,
    pub with_trashed: bool,
    pub sort: &'a [SortField],
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl<'a> SelectSpec<'a> {
    pub fn new(entity: &'a EntityNode) -> Self {
        SelectSpec {
            entity,
            columns: Vec::new(),
            conditions: &[],
            scopes: Vec::new(),
            with_trashed: false,
            sort: &[],
            limit: None,
            offset: None,
        }
    }
}

fn where_clause(q: &mut QueryBuf, spec: &SelectSpec<'_>) -> String {
    let mut parts = Vec::new();
    for scope in &spec.scopes {
        let rhs = q.typed(&spec.entity.table, &scope.column, &scope.value);
        parts.push(format!("{} = {}", column(&scope.column), rhs));
    }
    if let (Some(deleted_at), false) = (&spec.entity.deleted_at_column, spec.with_trashed) {
        parts.push(format!("{} IS NULL", column(deleted_at)));
    }
    if !spec.conditions.is_empty() {
        parts.push(format!("({})", render_conditions(q, &spec.entity.table, spec.conditions)));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", parts.join(" AND "))
    }
}

fn render_conditions(q: &mut QueryBuf, table: &str, clauses: &[WhereClause]) -> String {
    let mut sql = String::new();
    for (i, clause) in clauses.iter().enumerate() {
        if i > 0 {
            sql.push_str(match clause.joiner {
                Joiner::And => " AND ",
                Joiner::Or => " OR ",
            });
        }
        match &clause.item {
            WhereItem::Condition(condition) => sql.push_str(&render_condition(q, table, condition)),
            WhereItem::Group(nested) => {
                sql.push('(');
                sql.push_str(&render_conditions(q, table, nested));
                sql.push(')');
            }
        }
    }
    sql
}

fn render_condition(q: &mut QueryBuf, table: &str, condition: &Condition) -> String {
    let col = column(&condition.field);
    let field = condition.field.as_str();
    let binary = |q: &mut QueryBuf, op: &str| format!("{} {} {}", col, op, q.typed(table, field, &condition.value));
    let list = |q: &mut QueryBuf| -> Vec<String> {
        match &condition.value {
            Value::Array(items) => items.iter().map(|v| q.typed(table, field, v)).collect(),
            other => vec![q.typed(table, field, other)],
        }
    };
    match condition.op {
        ConditionOp::Equal => binary(q, "="),
        ConditionOp::NotEqual => binary(q, "<>"),
        ConditionOp::Gt => binary(q, ">"),
        ConditionOp::Gte => binary(q, ">="),
        ConditionOp::Lt => binary(q, "<"),
        ConditionOp::Lte => binary(q, "<="),
        ConditionOp::Like | ConditionOp::NotLike => {
            let text = condition.value.as_str().unwrap_or_default().to_string();
            let n = q.push_param(PgBindValue::Text(text));
            let op = if condition.op == ConditionOp::Like { "LIKE" } else { "NOT LIKE" };
            format!("{}::text {} ${}", col, op, n)
        }
        ConditionOp::In => format!("{} IN ({})", col, list(q).join(", ")),
        ConditionOp::NotIn => format!("{} NOT IN ({})", col, list(q).join(", ")),
        ConditionOp::Between | ConditionOp::NotBetween => {
            let bounds = list(q);
            let op = if condition.op == ConditionOp::Between { "BETWEEN" } else { "NOT BETWEEN" };
            let low = bounds.first().cloned().unwrap_or_else(|| "NULL".into());
            let high = bounds.get(1).cloned().unwrap_or_else(|| "NULL".into());
            format!("{} {} {} AND {}", col, op, low, high)
        }
        ConditionOp::Null => format!("{} IS NULL", col),
        ConditionOp::NotNull => format!("{} IS NOT NULL", col),
    }
}

fn select_list(spec: &SelectSpec<'_>) -> String {
    if spec.columns.is_empty() {
        format!("{}.*", MAIN_ALIAS)
    } else {
        spec.columns.iter().map(|c| column(c)).collect::<Vec<_>>().join(", ")
    }
}

/// SELECT with filters, soft-delete guard, ORDER BY (pk when unsorted), optional LIMIT/OFFSET.
pub fn select(spec: &SelectSpec<'_>) -> QueryBuf {
    let mut q = QueryBuf::new();
    let table = qualified_table(&spec.entity.table);
    let where_clause = where_clause(&mut q, spec);
    let order_clause = if spec.sort.is_empty() {
        format!(" ORDER BY {}", column(&spec.entity.primary_key))
    } else {
        let parts: Vec<String> = spec
            .sort
            .iter()
            .map(|s| format!("{} {}", column(&s.field), if s.descending { "DESC" } else { "ASC" }))
            .collect();
        format!(" ORDER BY {}", parts.join(", "))
    };
    let limit_clause = spec.limit.map(|n| format!(" LIMIT {}", n)).unwrap_or_default();
    let offset_clause = spec.offset.map(|n| format!(" OFFSET {}", n)).unwrap_or_default();
    q.sql = format!(
        "SELECT {} FROM {} {}{}{}{}{}",
        select_list(spec),
        table,
        MAIN_ALIAS,
        where_clause,
        order_clause,
        limit_clause,
        offset_clause
    );
    q
}

/// COUNT(*) over the same filters as [`select`], returned as column `total`.
pub fn count(spec: &SelectSpec<'_>) -> QueryBuf {
    let mut q = QueryBuf::new();
    let table = qualified_table(&spec.entity.table);
    let where_clause = where_clause(&mut q, spec);
    q.sql = format!("SELECT COUNT(*) AS \"total\" FROM {} {}{}", table, MAIN_ALIAS, where_clause);
    q
}

/// SELECT rows whose `column_name` is one of `values`. Used for batch-loading related rows.
pub fn select_by_column_in(entity: &EntityNode, columns: &[String], column_name: &str, values: &[Value]) -> QueryBuf {
    let mut q = QueryBuf::new();
    let table = qualified_table(&entity.table);
    let cols = if columns.is_empty() {
        format!("{}.*", MAIN_ALIAS)
    } else {
        columns.iter().map(|c| column(c)).collect::<Vec<_>>().join(", ")
    };
    if values.is_empty() {
        q.sql = format!("SELECT {} FROM {} {} WHERE 1 = 0", cols, table, MAIN_ALIAS);
        return q;
    }
    let placeholders: Vec<String> = values.iter().map(|v| q.typed(&entity.table, column_name, v)).collect();
    let soft_delete = entity
        .deleted_at_column
        .as_deref()
        .map(|c| format!(" AND {} IS NULL", column(c)))
        .unwrap_or_default();
    q.sql = format!(
        "SELECT {} FROM {} {} WHERE {} IN ({}){} ORDER BY {}",
        cols,
        table,
        MAIN_ALIAS,
        column(column_name),
        placeholders.join(", "),
        soft_delete,
        column(&entity.primary_key)
    );
    q
}

/// INSERT one row from `body` (declared columns only); `now_columns` are set to NOW().
pub fn insert(entity: &EntityNode, body: &Map<String, Value>, now_columns: &[&str]) -> QueryBuf {
    let mut q = QueryBuf::new();
    let table = qualified_table(&entity.table);
    let mut record = Map::new();
    let mut cols = Vec::new();
    let mut values = Vec::new();
    for c in &entity.columns {
        if now_columns.contains(&c.as_str()) {
            cols.push(quoted(c));
            values.push("NOW()".to_string());
        } else if let Some(v) = body.get(c) {
            record.insert(c.clone(), v.clone());
            cols.push(quoted(c));
            values.push(format!("r.{}", quoted(c)));
        }
    }
    if cols.is_empty() {
        q.sql = format!("INSERT INTO {} DEFAULT VALUES RETURNING *", table);
        return q;
    }
    let n = q.push_param(PgBindValue::Json(Value::Object(record)));
    q.sql = format!(
        "INSERT INTO {} ({}) SELECT {} FROM jsonb_populate_record(NULL::{}, ${}::jsonb) AS r RETURNING *",
        table,
        cols.join(", "),
        values.join(", "),
        table,
        n
    );
    q
}

/// UPDATE the row matching every scope: SET the declared columns present in `body` and
/// `now_columns` to NOW(). The primary key is never updated.
pub fn update(entity: &EntityNode, scopes: &[Scope], body: &Map<String, Value>, now_columns: &[&str]) -> QueryBuf {
    let mut q = QueryBuf::new();
    let table = qualified_table(&entity.table);
    let mut record = Map::new();
    let mut sets = Vec::new();
    for c in &entity.columns {
        if *c == entity.primary_key {
            continue;
        }
        if now_columns.contains(&c.as_str()) {
            sets.push(format!("{} = NOW()", quoted(c)));
        } else if let Some(v) = body.get(c) {
            record.insert(c.clone(), v.clone());
            sets.push(format!("{} = r.{}", quoted(c), quoted(c)));
        }
    }
    let predicates: Vec<String> = scopes
        .iter()
        .map(|s| format!("{} = {}", column(&s.column), q.typed(&entity.table, &s.column, &s.value)))
        .collect();
    let where_clause = predicates.join(" AND ");
    if sets.is_empty() {
        q.sql = format!("SELECT {}.* FROM {} {} WHERE {}", MAIN_ALIAS, table, MAIN_ALIAS, where_clause);
        return q;
    }
    let n = q.push_param(PgBindValue::Json(Value::Object(record)));
    q.sql = format!(
        "UPDATE {} AS {} SET {} FROM jsonb_populate_record(NULL::{}, ${}::jsonb) AS r WHERE {} RETURNING {}.*",
        table,
        MAIN_ALIAS,
        sets.join(", "),
        table,
        n,
        where_clause,
        MAIN_ALIAS
    );
    q
}

/// DELETE the row matching every scope.
pub fn delete(entity: &EntityNode, scopes: &[Scope]) -> QueryBuf {
    let mut q = QueryBuf::new();
    let table = qualified_table(&entity.table);
    let predicates: Vec<String> = scopes
        .iter()
        .map(|s| format!("{} = {}", column(&s.column), q.typed(&entity.table, &s.column, &s.value)))
        .collect();
    q.sql = format!(
        "DELETE FROM {} AS {} WHERE {} RETURNING {}.*",
        table,
        MAIN_ALIAS,
        predicates.join(" AND "),
        MAIN_ALIAS
    );
    q
}

/// Mark the row matching every scope as deleted by setting `deleted_at` to NOW().
pub fn soft_delete(entity: &EntityNode, scopes: &[Scope], deleted_at: &str) -> QueryBuf {
    let mut q = QueryBuf::new();
    let table = qualified_table(&entity.table);
    let predicates: Vec<String> = scopes
        .iter()
        .map(|s| format!("{} = {}", column(&s.column), q.typed(&entity.table, &s.column, &s.value)))
        .collect();
    q.sql = format!(
        "UPDATE {} AS {} SET {} = NOW() WHERE {} AND {} IS NULL RETURNING {}.*",
        table,
        MAIN_ALIAS,
        quoted(deleted_at),
        predicates.join(" AND "),
        column(deleted_at),
        MAIN_ALIAS
    );
    q
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{resolve, FullConfig};
    use crate::extensions::Extensions;
    use crate::query::parse_where;
    use serde_json::json;

    fn post() -> EntityNode {
        let config: FullConfig = serde_json::from_value(json!({
            "versions": [{"name": "v1", "entities": [
                {"name": "Post", "columns": ["id", "title", "user_id", "deleted_at"],
                 "deleted_at_column": "deleted_at"}
            ]}]
        }))
        .unwrap();
        let api = resolve(&config, &Extensions::default()).unwrap();
        api.versions[0].graph.by_name("Post").unwrap().clone()
    }

    #[test]
    fn select_with_scope_conditions_and_paging() {
        let entity = post();
        let conditions = parse_where(&json!({"title.$like": "%a%", "$or.id.$gt": 3})).unwrap();
        let sort = vec![SortField {
            field: "title".into(),
            descending: true,
        }];
        let mut spec = SelectSpec::new(&entity);
        spec.columns = vec!["id".into(), "title".into()];
        spec.scopes = vec![Scope {
            column: "user_id".into(),
            value: json!("7"),
        }];
        spec.conditions = &conditions;
        spec.sort = &sort;
        spec.limit = Some(10);
        spec.offset = Some(20);
        let q = select(&spec);
        assert_eq!(
            q.sql,
            "SELECT main.\"id\", main.\"title\" FROM \"posts\" main WHERE main.\"user_id\" = \
             (jsonb_populate_record(NULL::\"posts\", $1::jsonb)).\"user_id\" AND main.\"deleted_at\" IS NULL \
             AND (main.\"title\"::text LIKE $2 OR main.\"id\" > \
             (jsonb_populate_record(NULL::\"posts\", $3::jsonb)).\"id\") \
             ORDER BY main.\"title\" DESC LIMIT 10 OFFSET 20"
        );
        assert_eq!(q.params.len(), 3);
        assert_eq!(q.params[0], PgBindValue::Json(json!({"user_id": "7"})));
        assert_eq!(q.params[1], PgBindValue::Text("%a%".into()));
    }

    #[test]
    fn trashed_lifts_soft_delete_guard() {
        let entity = post();
        let mut spec = SelectSpec::new(&entity);
        spec.with_trashed = true;
        assert_eq!(count(&spec).sql, "SELECT COUNT(*) AS \"total\" FROM \"posts\" main");
    }

    #[test]
    fn insert_binds_one_record() {
        let entity = post();
        let body = json!({"title": "hello", "unknown": 1}).as_object().cloned().unwrap();
        let q = insert(&entity, &body, &[]);
        assert_eq!(
            q.sql,
            "INSERT INTO \"posts\" (\"title\") SELECT r.\"title\" FROM \
             jsonb_populate_record(NULL::\"posts\", $1::jsonb) AS r RETURNING *"
        );
        assert_eq!(q.params, vec![PgBindValue::Json(json!({"title": "hello"}))]);
    }

    #[test]
    fn soft_delete_sets_timestamp() {
        let entity = post();
        let scopes = [Scope {
            column: "id".into(),
            value: json!("1"),
        }];
        let q = soft_delete(&entity, &scopes, "deleted_at");
        assert!(q.sql.starts_with("UPDATE \"posts\" AS main SET \"deleted_at\" = NOW() WHERE main.\"id\" = "));
        assert!(q.sql.ends_with("AND main.\"deleted_at\" IS NULL RETURNING main.*"));
    }

    #[test]
    fn schema_qualified_table() {
        assert_eq!(qualified_table("blog.posts"), "\"blog\".\"posts\"");
    }
}
