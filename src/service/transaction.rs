//! Transaction policy resolution: entity policy, then version policy, then no transaction.

use crate::config::{Operation, TransactionPolicy};

/// Whether `operation` must run inside a transaction. The entity policy decides when it
/// names the operation; otherwise the version policy; otherwise `false`.
pub fn resolve(entity: Option<&TransactionPolicy>, version: Option<&TransactionPolicy>, operation: Operation) -> bool {
    entity
        .and_then(|p| evaluate(p, operation))
        .or_else(|| version.and_then(|p| evaluate(p, operation)))
        .unwrap_or(false)
}

/// Outcome a single policy specifies for `operation`, if any. For override lists the last
/// entry containing the operation wins.
pub fn evaluate(policy: &TransactionPolicy, operation: Operation) -> Option<bool> {
    match policy {
        TransactionPolicy::Flag(value) => Some(*value),
        TransactionPolicy::Rule(rule) => rule.operations.contains(&operation).then_some(rule.transaction),
        TransactionPolicy::Rules(rules) => rules
            .iter()
            .filter(|rule| rule.operations.contains(&operation))
            .last()
            .map(|rule| rule.transaction),
    }
}
