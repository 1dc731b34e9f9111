//! Query-capability permissions: ordered allow/deny rules per entity.
//!
//! A rule is keyed by a fine-grained [`QueryFeature`] and an optional field or relation
//! name. Evaluation picks the last rule naming the requested key, else the last rule
//! without a key, else denies.

use crate::error::AppError;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryFeature {
    FieldsAll,
    Sorting,
    Limits,
    WhereAll,
    WhereEqual,
    WhereNotEqual,
    WhereGt,
    WhereGte,
    WhereLt,
    WhereLte,
    WhereLike,
    WhereNotLike,
    WhereIn,
    WhereNotIn,
    WhereBetween,
    WhereNotBetween,
    WhereNull,
    WhereNotNull,
    Trashed,
    WithAll,
    WithHasOne,
    WithHasMany,
}

const WHERE_FEATURES: &[QueryFeature] = &[
    QueryFeature::WhereEqual,
    QueryFeature::WhereNotEqual,
    QueryFeature::WhereGt,
    QueryFeature::WhereGte,
    QueryFeature::WhereLt,
    QueryFeature::WhereLte,
    QueryFeature::WhereLike,
    QueryFeature::WhereNotLike,
    QueryFeature::WhereIn,
    QueryFeature::WhereNotIn,
    QueryFeature::WhereBetween,
    QueryFeature::WhereNotBetween,
    QueryFeature::WhereNull,
    QueryFeature::WhereNotNull,
];

const WITH_FEATURES: &[QueryFeature] = &[QueryFeature::WithHasOne, QueryFeature::WithHasMany];

impl QueryFeature {
    /// Fine-grained features a declaration of `self` stands for.
    pub fn expand(self) -> &'static [QueryFeature] {
        match self {
            QueryFeature::WhereAll => WHERE_FEATURES,
            QueryFeature::WithAll => WITH_FEATURES,
            QueryFeature::FieldsAll => &[QueryFeature::FieldsAll],
            QueryFeature::Sorting => &[QueryFeature::Sorting],
            QueryFeature::Limits => &[QueryFeature::Limits],
            QueryFeature::WhereEqual => &[QueryFeature::WhereEqual],
            QueryFeature::WhereNotEqual => &[QueryFeature::WhereNotEqual],
            QueryFeature::WhereGt => &[QueryFeature::WhereGt],
            QueryFeature::WhereGte => &[QueryFeature::WhereGte],
            QueryFeature::WhereLt => &[QueryFeature::WhereLt],
            QueryFeature::WhereLte => &[QueryFeature::WhereLte],
            QueryFeature::WhereLike => &[QueryFeature::WhereLike],
            QueryFeature::WhereNotLike => &[QueryFeature::WhereNotLike],
            QueryFeature::WhereIn => &[QueryFeature::WhereIn],
            QueryFeature::WhereNotIn => &[QueryFeature::WhereNotIn],
            QueryFeature::WhereBetween => &[QueryFeature::WhereBetween],
            QueryFeature::WhereNotBetween => &[QueryFeature::WhereNotBetween],
            QueryFeature::WhereNull => &[QueryFeature::WhereNull],
            QueryFeature::WhereNotNull => &[QueryFeature::WhereNotNull],
            QueryFeature::Trashed => &[QueryFeature::Trashed],
            QueryFeature::WithHasOne => &[QueryFeature::WithHasOne],
            QueryFeature::WithHasMany => &[QueryFeature::WithHasMany],
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            QueryFeature::FieldsAll => "fields_all",
            QueryFeature::Sorting => "sorting",
            QueryFeature::Limits => "limits",
            QueryFeature::WhereAll => "where_all",
            QueryFeature::WhereEqual => "where_equal",
            QueryFeature::WhereNotEqual => "where_not_equal",
            QueryFeature::WhereGt => "where_gt",
            QueryFeature::WhereGte => "where_gte",
            QueryFeature::WhereLt => "where_lt",
            QueryFeature::WhereLte => "where_lte",
            QueryFeature::WhereLike => "where_like",
            QueryFeature::WhereNotLike => "where_not_like",
            QueryFeature::WhereIn => "where_in",
            QueryFeature::WhereNotIn => "where_not_in",
            QueryFeature::WhereBetween => "where_between",
            QueryFeature::WhereNotBetween => "where_not_between",
            QueryFeature::WhereNull => "where_null",
            QueryFeature::WhereNotNull => "where_not_null",
            QueryFeature::Trashed => "trashed",
            QueryFeature::WithAll => "with_all",
            QueryFeature::WithHasOne => "with_has_one",
            QueryFeature::WithHasMany => "with_has_many",
        }
    }
}

impl fmt::Display for QueryFeature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Polarity {
    Allow,
    Deny,
}

/// One expanded rule. `key: None` applies to every field/relation of the feature.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct QueryLimitRule {
    pub polarity: Polarity,
    pub feature: QueryFeature,
    pub key: Option<String>,
}

/// Declared form: `{ "allow": "where_all" }` or `{ "deny": "where_equal", "keys": ["secret"] }`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueryLimitConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow: Option<QueryFeature>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deny: Option<QueryFeature>,
    #[serde(default)]
    pub keys: Vec<String>,
}

impl QueryLimitConfig {
    pub fn rules(&self) -> Result<Vec<QueryLimitRule>, String> {
        match (self.allow, self.deny) {
            (Some(feature), None) => Ok(generate(Polarity::Allow, feature, &self.keys)),
            (None, Some(feature)) => Ok(generate(Polarity::Deny, feature, &self.keys)),
            _ => Err("query limit must name exactly one of 'allow' or 'deny'".into()),
        }
    }
}

fn generate(polarity: Polarity, feature: QueryFeature, keys: &[String]) -> Vec<QueryLimitRule> {
    let keys: Vec<Option<String>> = if keys.is_empty() {
        vec![None]
    } else {
        keys.iter().cloned().map(Some).collect()
    };
    feature
        .expand()
        .iter()
        .flat_map(|sub| {
            keys.iter().map(move |key| QueryLimitRule {
                polarity,
                feature: *sub,
                key: key.clone(),
            })
        })
        .collect()
}

/// Rules permitting `feature` for the given keys (all keys when empty).
pub fn allow(feature: QueryFeature, keys: &[&str]) -> Vec<QueryLimitRule> {
    let keys: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
    generate(Polarity::Allow, feature, &keys)
}

/// Rules forbidding `feature` for the given keys (all keys when empty).
pub fn deny(feature: QueryFeature, keys: &[&str]) -> Vec<QueryLimitRule> {
    let keys: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
    generate(Polarity::Deny, feature, &keys)
}

/// Decide whether `feature` (optionally for `key`) may be used against an entity whose
/// merged rule list is `rules`. Coarse features are checked as each of their parts.
pub fn authorize(rules: &[QueryLimitRule], feature: QueryFeature, key: Option<&str>) -> Result<(), AppError> {
    for sub in feature.expand() {
        authorize_one(rules, *sub, key)?;
    }
    Ok(())
}

fn authorize_one(rules: &[QueryLimitRule], feature: QueryFeature, key: Option<&str>) -> Result<(), AppError> {
    let denied = || AppError::PermissionDenied {
        feature,
        key: key.map(str::to_string),
    };

    if let Some(key) = key {
        let specific = rules
            .iter()
            .filter(|r| r.feature == feature && r.key.as_deref() == Some(key))
            .last();
        if let Some(rule) = specific {
            return match rule.polarity {
                Polarity::Allow => Ok(()),
                Polarity::Deny => Err(denied()),
            };
        }
    }

    let generic = rules.iter().filter(|r| r.feature == feature && r.key.is_none()).last();
    match generic.map(|r| r.polarity) {
        Some(Polarity::Allow) => Ok(()),
        Some(Polarity::Deny) | None => Err(denied()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules(groups: Vec<Vec<QueryLimitRule>>) -> Vec<QueryLimitRule> {
        groups.into_iter().flatten().collect()
    }

    #[test]
    fn last_generic_rule_wins() {
        let r = rules(vec![allow(QueryFeature::Sorting, &[]), deny(QueryFeature::Sorting, &[])]);
        assert!(authorize(&r, QueryFeature::Sorting, None).is_err());

        let r = rules(vec![deny(QueryFeature::Sorting, &[]), allow(QueryFeature::Sorting, &[])]);
        assert!(authorize(&r, QueryFeature::Sorting, None).is_ok());
    }

    #[test]
    fn specific_key_overrides_generic() {
        let r = rules(vec![allow(QueryFeature::Sorting, &[]), deny(QueryFeature::Sorting, &["x"])]);
        assert!(authorize(&r, QueryFeature::Sorting, Some("x")).is_err());
        assert!(authorize(&r, QueryFeature::Sorting, Some("y")).is_ok());
    }

    #[test]
    fn specific_allow_beats_generic_deny() {
        let r = rules(vec![deny(QueryFeature::FieldsAll, &[]), allow(QueryFeature::FieldsAll, &["id"])]);
        assert!(authorize(&r, QueryFeature::FieldsAll, Some("id")).is_ok());
        assert!(authorize(&r, QueryFeature::FieldsAll, Some("title")).is_err());
    }

    #[test]
    fn no_rules_denies() {
        assert!(authorize(&[], QueryFeature::WhereLike, Some("title")).is_err());
        assert!(authorize(&[], QueryFeature::Trashed, None).is_err());
        let r = allow(QueryFeature::Sorting, &[]);
        assert!(authorize(&r, QueryFeature::Limits, None).is_err());
    }

    #[test]
    fn coarse_feature_expands_at_declaration() {
        let r = allow(QueryFeature::WhereAll, &[]);
        assert_eq!(r.len(), 14);
        assert!(r.iter().all(|rule| rule.key.is_none() && rule.polarity == Polarity::Allow));
        assert!(authorize(&r, QueryFeature::WhereBetween, Some("age")).is_ok());

        let keyed = deny(QueryFeature::WithAll, &["author", "comments"]);
        assert_eq!(keyed.len(), 4);
        assert_eq!(keyed[0].feature, QueryFeature::WithHasOne);
        assert_eq!(keyed[0].key.as_deref(), Some("author"));
        assert_eq!(keyed[1].key.as_deref(), Some("comments"));
    }

    #[test]
    fn field_level_deny_inside_blanket_allow() {
        let r = rules(vec![
            allow(QueryFeature::WhereAll, &[]),
            deny(QueryFeature::WhereEqual, &["secret"]),
        ]);
        let err = authorize(&r, QueryFeature::WhereEqual, Some("secret")).unwrap_err();
        assert_eq!(err.to_string(), "Unsupported query feature: where_equal [secret]");
        assert!(authorize(&r, QueryFeature::WhereEqual, Some("title")).is_ok());
        assert!(authorize(&r, QueryFeature::WhereLike, Some("secret")).is_ok());
    }

    #[test]
    fn declared_config_produces_rules() {
        let cfg: QueryLimitConfig = serde_json::from_str(r#"{"deny": "where_equal", "keys": ["secret"]}"#).unwrap();
        let r = cfg.rules().unwrap();
        assert_eq!(
            r,
            vec![QueryLimitRule {
                polarity: Polarity::Deny,
                feature: QueryFeature::WhereEqual,
                key: Some("secret".into()),
            }]
        );

        let bad: QueryLimitConfig = serde_json::from_str(r#"{"allow": "sorting", "deny": "sorting"}"#).unwrap();
        assert!(bad.rules().is_err());
    }
}
