// Inventory rows, account metadata, and request-scoped filter values.
use std::collections::BTreeSet;

use serde::Deserialize;
use serde_json::{Value, json};
use time::OffsetDateTime;

/// One discovered cloud resource joined with its owning account.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InventoryRecord {
    /// Numeric account key used for ordering and authorization; not exported.
    pub organization_service_id: u64,
    pub provider_id: String,
    pub name: String,
    pub region_name: String,
    pub resource_type: String,
    pub cloud_resource_type: String,
    pub namespace_id: Option<String>,
    pub creation_timestamp: Option<OffsetDateTime>,
    pub discovered_timestamp: Option<OffsetDateTime>,
    pub account_id: String,
    pub account_name: String,
    pub cloud_type_id: String,
}

/// The authenticated caller as reported by the session collaborator.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct User {
    pub user_id: String,
    pub organization_id: u64,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct Badge {
    pub key: String,
    pub value: String,
}

/// A cloud account (organization service) registered under an organization.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct Account {
    pub organization_service_id: u64,
    pub organization_id: u64,
    /// External scope identifier matched by explicit `scopes` filters.
    pub resource_id: String,
    pub account_id: String,
    pub name: String,
    pub cloud_type_id: String,
    #[serde(default)]
    pub badges: Vec<Badge>,
}

/// Badge entry as received from a request, kept as raw JSON.
///
/// Its shape is checked by the scope resolver, and only when badges are the
/// active filter; a request with explicit scopes never inspects it.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(transparent)]
pub struct BadgeInput(Value);

impl BadgeInput {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self(json!({ "key": key.into(), "value": value.into() }))
    }

    pub fn from_value(value: Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum BadgeOperator {
    And,
    #[default]
    Or,
}

/// Request-scoped filter; discarded once the authorized scope is derived.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ScopeFilter {
    pub scopes: Vec<String>,
    pub resource_types: Vec<String>,
    pub badges: Vec<BadgeInput>,
    pub badge_operator: Option<String>,
}

/// Permission-checked account keys an export may read.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct AuthorizedScope {
    accounts: BTreeSet<u64>,
}

impl AuthorizedScope {
    pub(crate) fn from_accounts(accounts: BTreeSet<u64>) -> Self {
        Self { accounts }
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    pub fn contains(&self, organization_service_id: u64) -> bool {
        self.accounts.contains(&organization_service_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = u64> + '_ {
        self.accounts.iter().copied()
    }
}

/// One bounded batch of records; owned so it is released when dropped.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Page {
    records: Vec<InventoryRecord>,
}

impl Page {
    pub fn new(records: Vec<InventoryRecord>) -> Self {
        Self { records }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[InventoryRecord] {
        &self.records
    }
}

impl IntoIterator for Page {
    type Item = InventoryRecord;
    type IntoIter = std::vec::IntoIter<InventoryRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.into_iter()
    }
}
