//! Purpose: Turn a request's scope filter into the candidate account set.
//! Exports: `AccountDirectory`, `resolve_candidates`, `parse_badges`, `parse_badge_operator`.
//! Role: First pipeline stage; runs before any output is produced.
//! Invariants: Candidates never leave the caller's organization.
//! Invariants: Explicit scopes win over badges; badges are not validated when scopes are given.
//! Invariants: Candidates are a requested scope only and must still pass the permission filter.
use std::collections::BTreeSet;

use serde_json::{Map, Value};

use crate::core::error::{Error, ErrorKind};
use crate::core::model::{Account, Badge, BadgeInput, BadgeOperator, ScopeFilter, User};

/// Account metadata lookups backing scope resolution.
pub trait AccountDirectory: Send + Sync {
    fn organization_accounts(&self, organization_id: u64) -> Result<Vec<Account>, Error>;
}

pub fn resolve_candidates(
    user: &User,
    filter: &ScopeFilter,
    directory: &dyn AccountDirectory,
) -> Result<BTreeSet<u64>, Error> {
    if !filter.scopes.is_empty() {
        let requested: BTreeSet<&str> = filter.scopes.iter().map(String::as_str).collect();
        let accounts = directory.organization_accounts(user.organization_id)?;
        return Ok(accounts
            .iter()
            .filter(|account| account.organization_id == user.organization_id)
            .filter(|account| requested.contains(account.resource_id.as_str()))
            .map(|account| account.organization_service_id)
            .collect());
    }

    if !filter.badges.is_empty() {
        let badges = parse_badges(&filter.badges)?;
        let operator = parse_badge_operator(filter.badge_operator.as_deref())?;
        let accounts = directory.organization_accounts(user.organization_id)?;
        return Ok(accounts
            .iter()
            .filter(|account| account.organization_id == user.organization_id)
            .filter(|account| badges_match(account, &badges, operator))
            .map(|account| account.organization_service_id)
            .collect());
    }

    let accounts = directory.organization_accounts(user.organization_id)?;
    Ok(accounts
        .iter()
        .filter(|account| account.organization_id == user.organization_id)
        .map(|account| account.organization_service_id)
        .collect())
}

pub fn parse_badges(inputs: &[BadgeInput]) -> Result<Vec<Badge>, Error> {
    inputs
        .iter()
        .enumerate()
        .map(|(index, input)| {
            let Some(entry) = input.as_value().as_object() else {
                return Err(malformed_badge(index, "is not a key/value object"));
            };
            let key = badge_field(index, entry, "key")?
                .filter(|key| !key.trim().is_empty())
                .ok_or_else(|| malformed_badge(index, "is missing a key"))?;
            let value = badge_field(index, entry, "value")?
                .ok_or_else(|| malformed_badge(index, "is missing a value"))?;
            Ok(Badge {
                key: key.to_string(),
                value: value.to_string(),
            })
        })
        .collect()
}

// Absent and null both read as missing; any other non-string is malformed.
fn badge_field<'a>(
    index: usize,
    entry: &'a Map<String, Value>,
    field: &str,
) -> Result<Option<&'a str>, Error> {
    match entry.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(text)) => Ok(Some(text.as_str())),
        Some(_) => Err(malformed_badge(index, &format!("has a non-string {field}"))),
    }
}

pub fn parse_badge_operator(operator: Option<&str>) -> Result<BadgeOperator, Error> {
    let Some(operator) = operator else {
        return Ok(BadgeOperator::default());
    };
    if operator.eq_ignore_ascii_case("and") {
        Ok(BadgeOperator::And)
    } else if operator.eq_ignore_ascii_case("or") {
        Ok(BadgeOperator::Or)
    } else {
        Err(Error::new(ErrorKind::InvalidFilter)
            .with_message(format!("unknown badge_filter_operator `{operator}`"))
            .with_hint("Use \"AND\" or \"OR\"."))
    }
}

fn badges_match(account: &Account, badges: &[Badge], operator: BadgeOperator) -> bool {
    let has = |badge: &Badge| account.badges.iter().any(|tag| tag == badge);
    match operator {
        BadgeOperator::And => badges.iter().all(has),
        BadgeOperator::Or => badges.iter().any(has),
    }
}

fn malformed_badge(index: usize, problem: &str) -> Error {
    Error::new(ErrorKind::InvalidFilter)
        .with_message(format!("badge {index} {problem}"))
        .with_hint("Each badge must be an object like {\"key\": \"env\", \"value\": \"prod\"}.")
}
