//! Query-string options for list/show routes: `q`, `fields`, `sort`, `page`, `per_page`,
//! `with`, `trashed`.

use crate::config::{EntityGraph, EntityNode, RelationKind};
use crate::error::AppError;
use crate::service::{authorize, QueryFeature};
use serde_json::Value;
use std::collections::HashMap;

pub const DEFAULT_PER_PAGE: u32 = 10;
pub const MAX_PER_PAGE: u32 = 100;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConditionOp {
    Equal,
    NotEqual,
    Gt,
    Gte,
    Lt,
    Lte,
    Like,
    NotLike,
    In,
    NotIn,
    Between,
    NotBetween,
    Null,
    NotNull,
}

impl ConditionOp {
    fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "$not" => ConditionOp::NotEqual,
            "$gt" => ConditionOp::Gt,
            "$gte" => ConditionOp::Gte,
            "$lt" => ConditionOp::Lt,
            "$lte" => ConditionOp::Lte,
            "$like" => ConditionOp::Like,
            "$notLike" => ConditionOp::NotLike,
            "$in" => ConditionOp::In,
            "$notIn" => ConditionOp::NotIn,
            "$between" => ConditionOp::Between,
            "$notBetween" => ConditionOp::NotBetween,
            "$null" => ConditionOp::Null,
            "$notNull" => ConditionOp::NotNull,
            _ => return None,
        })
    }

    pub fn feature(self) -> QueryFeature {
        match self {
            ConditionOp::Equal => QueryFeature::WhereEqual,
            ConditionOp::NotEqual => QueryFeature::WhereNotEqual,
            ConditionOp::Gt => QueryFeature::WhereGt,
            ConditionOp::Gte => QueryFeature::WhereGte,
            ConditionOp::Lt => QueryFeature::WhereLt,
            ConditionOp::Lte => QueryFeature::WhereLte,
            ConditionOp::Like => QueryFeature::WhereLike,
            ConditionOp::NotLike => QueryFeature::WhereNotLike,
            ConditionOp::In => QueryFeature::WhereIn,
            ConditionOp::NotIn => QueryFeature::WhereNotIn,
            ConditionOp::Between => QueryFeature::WhereBetween,
            ConditionOp::NotBetween => QueryFeature::WhereNotBetween,
            ConditionOp::Null => QueryFeature::WhereNull,
            ConditionOp::NotNull => QueryFeature::WhereNotNull,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Joiner {
    And,
    Or,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Condition {
    pub field: String,
    pub op: ConditionOp,
    pub value: Value,
}

#[derive(Clone, Debug, PartialEq)]
pub enum WhereItem {
    Condition(Condition),
    Group(Vec<WhereClause>),
}

/// One term of a WHERE expression and how it joins the term before it.
#[derive(Clone, Debug, PartialEq)]
pub struct WhereClause {
    pub joiner: Joiner,
    pub item: WhereItem,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SortField {
    pub field: String,
    pub descending: bool,
}

/// `with=` entry: relation name, optional column selection and nested relations.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WithRelation {
    pub name: String,
    pub fields: Vec<String>,
    pub children: Vec<WithRelation>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct QueryOptions {
    pub fields: Vec<String>,
    pub sort: Vec<SortField>,
    pub page: u32,
    pub per_page: u32,
    /// `per_page` came from the request rather than the default.
    pub per_page_requested: bool,
    pub conditions: Vec<WhereClause>,
    pub with: Vec<WithRelation>,
    pub trashed: bool,
}

impl Default for QueryOptions {
    fn default() -> Self {
        QueryOptions {
            fields: Vec::new(),
            sort: Vec::new(),
            page: 1,
            per_page: DEFAULT_PER_PAGE,
            per_page_requested: false,
            conditions: Vec::new(),
            with: Vec::new(),
            trashed: false,
        }
    }
}

impl QueryOptions {
    pub fn parse(params: &HashMap<String, String>) -> Result<Self, AppError> {
        let mut options = QueryOptions::default();

        if let Some(fields) = params.get("fields") {
            options.fields = split_list(fields);
        }
        if let Some(sort) = params.get("sort") {
            options.sort = split_list(sort)
                .into_iter()
                .map(|s| match s.strip_prefix('-') {
                    Some(field) => SortField {
                        field: field.to_string(),
                        descending: true,
                    },
                    None => SortField {
                        field: s,
                        descending: false,
                    },
                })
                .collect();
        }
        if let Some(page) = params.get("page") {
            options.page = page
                .trim()
                .parse::<u32>()
                .map_err(|_| AppError::BadRequest(format!("invalid page: {}", page)))?
                .max(1);
        }
        if let Some(per_page) = params.get("per_page") {
            options.per_page = per_page
                .trim()
                .parse::<u32>()
                .map_err(|_| AppError::BadRequest(format!("invalid per_page: {}", per_page)))?
                .clamp(1, MAX_PER_PAGE);
            options.per_page_requested = true;
        }
        if let Some(q) = params.get("q").filter(|q| !q.trim().is_empty()) {
            let value: Value =
                serde_json::from_str(q).map_err(|e| AppError::BadRequest(format!("invalid q: {}", e)))?;
            options.conditions = parse_where(&value)?;
        }
        if let Some(with) = params.get("with").filter(|w| !w.trim().is_empty()) {
            options.with = parse_with(with)?;
        }
        if let Some(trashed) = params.get("trashed") {
            options.trashed = matches!(trashed.as_str(), "true" | "1");
        }
        Ok(options)
    }

    pub fn offset(&self) -> u32 {
        (self.page - 1).saturating_mul(self.per_page)
    }

    /// Check every requested feature against the entity's limit rules and reject unknown
    /// columns and relations.
    pub fn authorize(&self, node: &EntityNode, graph: &EntityGraph) -> Result<(), AppError> {
        for field in &self.fields {
            known_column(node, field)?;
            authorize(&node.limits, QueryFeature::FieldsAll, Some(field))?;
        }
        for sort in &self.sort {
            known_column(node, &sort.field)?;
            authorize(&node.limits, QueryFeature::Sorting, Some(&sort.field))?;
        }
        if self.per_page_requested {
            authorize(&node.limits, QueryFeature::Limits, None)?;
        }
        authorize_conditions(&self.conditions, node)?;
        authorize_with(&self.with, node, graph)?;
        if self.trashed {
            authorize(&node.limits, QueryFeature::Trashed, None)?;
        }
        Ok(())
    }
}

fn known_column(node: &EntityNode, column: &str) -> Result<(), AppError> {
    if node.has_column(column) {
        Ok(())
    } else {
        Err(AppError::BadRequest(format!("Unknown column on {}: {}", node.name, column)))
    }
}

fn authorize_conditions(clauses: &[WhereClause], node: &EntityNode) -> Result<(), AppError> {
    for clause in clauses {
        match &clause.item {
            WhereItem::Condition(condition) => {
                known_column(node, &condition.field)?;
                authorize(&node.limits, condition.op.feature(), Some(&condition.field))?;
            }
            WhereItem::Group(nested) => authorize_conditions(nested, node)?,
        }
    }
    Ok(())
}

fn authorize_with(relations: &[WithRelation], node: &EntityNode, graph: &EntityGraph) -> Result<(), AppError> {
    for with in relations {
        let relation = node
            .relation(&with.name)
            .ok_or_else(|| AppError::BadRequest(format!("Unknown relation on {}: {}", node.name, with.name)))?;
        let feature = match relation.kind {
            RelationKind::HasMany => QueryFeature::WithHasMany,
            RelationKind::HasOne | RelationKind::BelongsTo => QueryFeature::WithHasOne,
        };
        authorize(&node.limits, feature, Some(&with.name))?;
        let target = graph.node(relation.target);
        for field in &with.fields {
            known_column(target, field)?;
            authorize(&target.limits, QueryFeature::FieldsAll, Some(field))?;
        }
        authorize_with(&with.children, target, graph)?;
    }
    Ok(())
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// `q` grammar: an object is an AND of `field[.$op]: value` entries (a `$or.` key prefix
/// joins that entry with OR); an array is a list of nested groups.
pub fn parse_where(value: &Value) -> Result<Vec<WhereClause>, AppError> {
    match value {
        Value::Object(map) => {
            let mut clauses = Vec::with_capacity(map.len());
            for (key, value) in map {
                let (joiner, key) = match key.strip_prefix("$or.") {
                    Some(rest) => (Joiner::Or, rest),
                    None => (Joiner::And, key.as_str()),
                };
                if key.is_empty() {
                    return Err(AppError::BadRequest("invalid q: empty field".into()));
                }
                clauses.push(WhereClause {
                    joiner,
                    item: WhereItem::Condition(parse_condition(key, value)?),
                });
            }
            Ok(clauses)
        }
        Value::Array(items) => {
            let mut clauses = Vec::with_capacity(items.len());
            for item in items {
                let nested = parse_where(item)?;
                if nested.is_empty() {
                    continue;
                }
                let joiner = nested[0].joiner;
                clauses.push(WhereClause {
                    joiner,
                    item: WhereItem::Group(nested),
                });
            }
            Ok(clauses)
        }
        _ => Err(AppError::BadRequest("invalid q: expected an object or an array".into())),
    }
}

fn parse_condition(key: &str, value: &Value) -> Result<Condition, AppError> {
    let (field, op) = match key.split_once(".$") {
        Some((field, op)) => {
            let op_name = format!("${}", op);
            let op = ConditionOp::parse(&op_name)
                .ok_or_else(|| AppError::BadRequest(format!("unknown q operator: {}", op_name)))?;
            (field, op)
        }
        None => (key, ConditionOp::Equal),
    };
    let value = match op {
        ConditionOp::Like | ConditionOp::NotLike => match value {
            Value::String(s) => Value::String(s.replace('*', "%")),
            other => return Err(AppError::BadRequest(format!("{}: like expects a string, got {}", field, other))),
        },
        ConditionOp::In | ConditionOp::NotIn => match value {
            Value::Array(items) if !items.is_empty() => value.clone(),
            Value::String(s) => Value::Array(split_list(s).into_iter().map(Value::String).collect()),
            _ => return Err(AppError::BadRequest(format!("{}: in expects a non-empty list", field))),
        },
        ConditionOp::Between | ConditionOp::NotBetween => match value {
            Value::Array(items) if items.len() == 2 => value.clone(),
            _ => return Err(AppError::BadRequest(format!("{}: between expects two values", field))),
        },
        ConditionOp::Null | ConditionOp::NotNull => Value::Null,
        _ if value.is_array() || value.is_object() => {
            return Err(AppError::BadRequest(format!("{}: expected a scalar value", field)))
        }
        _ => value.clone(),
    };
    Ok(Condition {
        field: field.to_string(),
        op,
        value,
    })
}

/// `with` grammar: `rel1,rel2{col|col|child{col}}`.
pub fn parse_with(raw: &str) -> Result<Vec<WithRelation>, AppError> {
    let chars: Vec<char> = raw.chars().filter(|c| !c.is_whitespace()).collect();
    let mut pos = 0;
    let mut relations = vec![parse_with_item(&chars, &mut pos)?];
    while chars.get(pos) == Some(&',') {
        pos += 1;
        relations.push(parse_with_item(&chars, &mut pos)?);
    }
    if pos != chars.len() {
        return Err(AppError::BadRequest(format!("invalid with: unexpected '{}'", chars[pos])));
    }
    Ok(relations)
}

fn parse_with_item(chars: &[char], pos: &mut usize) -> Result<WithRelation, AppError> {
    let name = read_name(chars, pos);
    if name.is_empty() {
        return Err(AppError::BadRequest("invalid with: empty relation name".into()));
    }
    let mut relation = WithRelation {
        name,
        ..WithRelation::default()
    };
    if chars.get(*pos) != Some(&'{') {
        return Ok(relation);
    }
    *pos += 1;
    loop {
        let start = *pos;
        let item = read_name(chars, pos);
        if item.is_empty() {
            return Err(AppError::BadRequest("invalid with: empty item".into()));
        }
        if chars.get(*pos) == Some(&'{') {
            *pos = start;
            relation.children.push(parse_with_item(chars, pos)?);
        } else {
            relation.fields.push(item);
        }
        match chars.get(*pos) {
            Some('|') => *pos += 1,
            Some('}') => {
                *pos += 1;
                return Ok(relation);
            }
            _ => return Err(AppError::BadRequest("invalid with: unclosed '{'".into())),
        }
    }
}

fn read_name(chars: &[char], pos: &mut usize) -> String {
    let start = *pos;
    while let Some(c) = chars.get(*pos) {
        if c.is_alphanumeric() || *c == '_' || *c == '-' {
            *pos += 1;
        } else {
            break;
        }
    }
    chars[start..*pos].iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn defaults_and_clamping() {
        let o = QueryOptions::parse(&HashMap::new()).unwrap();
        assert_eq!(o.page, 1);
        assert_eq!(o.per_page, DEFAULT_PER_PAGE);
        assert!(!o.per_page_requested);

        let o = QueryOptions::parse(&params(&[("per_page", "500"), ("page", "0")])).unwrap();
        assert_eq!(o.per_page, MAX_PER_PAGE);
        assert_eq!(o.page, 1);
        assert!(QueryOptions::parse(&params(&[("page", "x")])).is_err());
    }

    #[test]
    fn fields_and_sort() {
        let o = QueryOptions::parse(&params(&[("fields", "id, title"), ("sort", "-created_at,title")])).unwrap();
        assert_eq!(o.fields, vec!["id", "title"]);
        assert_eq!(
            o.sort,
            vec![
                SortField {
                    field: "created_at".into(),
                    descending: true
                },
                SortField {
                    field: "title".into(),
                    descending: false
                },
            ]
        );
    }

    #[test]
    fn where_object_and_operators() {
        let clauses = parse_where(&json!({"title.$like": "*rust*", "$or.id.$in": [1, 2]})).unwrap();
        assert_eq!(clauses.len(), 2);
        let by_field = |f: &str| {
            clauses
                .iter()
                .find_map(|c| match &c.item {
                    WhereItem::Condition(cond) if cond.field == f => Some((c.joiner, cond.clone())),
                    _ => None,
                })
                .unwrap()
        };
        let (joiner, title) = by_field("title");
        assert_eq!(joiner, Joiner::And);
        assert_eq!(title.op, ConditionOp::Like);
        assert_eq!(title.value, json!("%rust%"));
        let (joiner, id) = by_field("id");
        assert_eq!(joiner, Joiner::Or);
        assert_eq!(id.op, ConditionOp::In);
    }

    #[test]
    fn where_array_builds_groups() {
        let clauses = parse_where(&json!([{"a": 1}, {"$or.b.$gt": 2}])).unwrap();
        assert_eq!(clauses.len(), 2);
        assert_eq!(clauses[1].joiner, Joiner::Or);
        assert!(matches!(clauses[0].item, WhereItem::Group(_)));
    }

    #[test]
    fn where_rejects_bad_input() {
        assert!(parse_where(&json!({"a.$nope": 1})).is_err());
        assert!(parse_where(&json!({"a.$between": [1]})).is_err());
        assert!(parse_where(&json!("a")).is_err());
        assert!(QueryOptions::parse(&params(&[("q", "{not json")])).is_err());
    }

    #[test]
    fn with_grammar() {
        let w = parse_with("author,comments{id|body|user{name}}").unwrap();
        assert_eq!(w.len(), 2);
        assert_eq!(w[0].name, "author");
        assert_eq!(w[1].name, "comments");
        assert_eq!(w[1].fields, vec!["id", "body"]);
        assert_eq!(w[1].children.len(), 1);
        assert_eq!(w[1].children[0].name, "user");
        assert_eq!(w[1].children[0].fields, vec!["name"]);

        assert!(parse_with("comments{id").is_err());
        assert!(parse_with(",").is_err());
    }
}
