//! Request body validation from config rules. Every failing field is reported.

use crate::config::{ValidationRule, ValidationRules};
use crate::error::{AppError, FieldErrors};
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{OnceLock, RwLock};

pub struct RequestValidator;

impl RequestValidator {
    /// Validate body against per-column rules. All required fields must be present.
    pub fn validate(body: &Map<String, Value>, rules: &ValidationRules) -> Result<(), AppError> {
        let mut errors = FieldErrors::new();
        for (col, rule) in rules {
            let val = body.get(col);
            if rule.required == Some(true) && (val.is_none() || val == Some(&Value::Null)) {
                push(&mut errors, col, format!("{} is required", col));
                continue;
            }
            if let Some(v) = val {
                validate_field(&mut errors, col, v, rule);
            }
        }
        finish(errors)
    }

    /// Validate only the fields present in body (PATCH). Required is not enforced for missing fields.
    pub fn validate_partial(body: &Map<String, Value>, rules: &ValidationRules) -> Result<(), AppError> {
        let mut errors = FieldErrors::new();
        for (col, v) in body {
            if let Some(rule) = rules.get(col) {
                if rule.required == Some(true) && v.is_null() {
                    push(&mut errors, col, format!("{} is required", col));
                    continue;
                }
                validate_field(&mut errors, col, v, rule);
            }
        }
        finish(errors)
    }
}

fn push(errors: &mut FieldErrors, col: &str, message: String) {
    errors.entry(col.to_string()).or_default().push(message);
}

fn finish(errors: FieldErrors) -> Result<(), AppError> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(AppError::Validation(errors))
    }
}

fn validate_field(errors: &mut FieldErrors, col: &str, v: &Value, rule: &ValidationRule) {
    if v.is_null() {
        return;
    }
    if let Some(format) = &rule.format {
        if let Some(message) = validate_format(col, v, format) {
            push(errors, col, message);
        }
    }
    if let (Some(max), Some(s)) = (rule.max_length, v.as_str()) {
        if s.chars().count() > max as usize {
            push(errors, col, format!("{} must be at most {} characters", col, max));
        }
    }
    if let (Some(min), Some(s)) = (rule.min_length, v.as_str()) {
        if s.chars().count() < min as usize {
            push(errors, col, format!("{} must be at least {} characters", col, min));
        }
    }
    if let (Some(pattern), Some(s)) = (&rule.pattern, v.as_str()) {
        match compiled(pattern) {
            Ok(re) => {
                if !re.is_match(s) {
                    push(errors, col, format!("{} does not match required pattern", col));
                }
            }
            Err(e) => tracing::error!(column = %col, error = %e, "pattern skipped"),
        }
    }
    if let Some(ref allowed) = rule.allowed {
        if !allowed.iter().any(|a| value_eq(v, a)) {
            push(
                errors,
                col,
                format!("{} must be one of: {:?}", col, allowed.iter().take(5).collect::<Vec<_>>()),
            );
        }
    }
    if let (Some(min), Some(n)) = (rule.minimum, v.as_f64()) {
        if n < min {
            push(errors, col, format!("{} must be at least {}", col, min));
        }
    }
    if let (Some(max), Some(n)) = (rule.maximum, v.as_f64()) {
        if n > max {
            push(errors, col, format!("{} must be at most {}", col, max));
        }
    }
}

static PATTERNS: OnceLock<RwLock<HashMap<String, Regex>>> = OnceLock::new();

/// Compiled `pattern`, cached for the life of the process. Patterns are checked when the
/// config is loaded, so a failure here means the rule bypassed validation.
pub fn compiled(pattern: &str) -> Result<Regex, regex::Error> {
    let cache = PATTERNS.get_or_init(Default::default);
    if let Some(re) = cache.read().ok().and_then(|c| c.get(pattern).cloned()) {
        return Ok(re);
    }
    let re = Regex::new(pattern)?;
    if let Ok(mut c) = cache.write() {
        c.insert(pattern.to_string(), re.clone());
    }
    Ok(re)
}

fn value_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::String(s), Value::String(t)) => s == t,
        (Value::Number(n), Value::Number(m)) => n.as_f64() == m.as_f64(),
        _ => a == b,
    }
}

fn validate_format(col: &str, v: &Value, format: &str) -> Option<String> {
    let s = v.as_str()?;
    match format.to_lowercase().as_str() {
        "email" if !s.contains('@') || s.len() < 3 => Some(format!("{} must be a valid email", col)),
        "uuid" if uuid::Uuid::parse_str(s).is_err() => Some(format!("{} must be a valid UUID", col)),
        "date" if chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d").is_err() => {
            Some(format!("{} must be a valid date", col))
        }
        "datetime" if chrono::DateTime::parse_from_rfc3339(s).is_err() => {
            Some(format!("{} must be a valid RFC 3339 timestamp", col))
        }
        _ => None,
    }
}
