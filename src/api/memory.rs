//! Purpose: In-memory backend implementing every export collaborator from a JSON fixture.
//! Exports: `Fixture`, `MemoryBackend`.
//! Role: Reference storage/session/permission provider for the server, CLI, and tests.
//! Invariants: Resources are joined once at load (inner join on account and resource-type
//!             matrix) and sorted by `record_order`; each fetch walks them lazily.
//! Invariants: Non-admin users see only accounts listed in their `viewable` grants.
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::Deserialize;
use time::OffsetDateTime;

use crate::core::access::{PermissionFilter, SessionResolver};
use crate::core::error::{Error, ErrorKind};
use crate::core::export::ExportContext;
use crate::core::model::{Account, InventoryRecord, Page, User};
use crate::core::pages::{InventoryQuery, InventoryStore, record_order};
use crate::core::scope::AccountDirectory;

#[derive(Clone, Debug, Default, Deserialize)]
pub struct Fixture {
    #[serde(default)]
    pub accounts: Vec<Account>,
    #[serde(default)]
    pub resource_types: Vec<ResourceTypeEntry>,
    #[serde(default)]
    pub resources: Vec<ResourceRow>,
    #[serde(default)]
    pub users: Vec<FixtureUser>,
}

/// Human label for a resource type on a given cloud.
#[derive(Clone, Debug, Deserialize)]
pub struct ResourceTypeEntry {
    pub cloud_type_id: String,
    pub resource_type: String,
    pub name: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ResourceRow {
    pub organization_service_id: u64,
    pub provider_id: String,
    pub name: String,
    pub region_name: String,
    pub resource_type: String,
    #[serde(default)]
    pub namespace_id: Option<String>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub creation_timestamp: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub discovered_timestamp: Option<OffsetDateTime>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct FixtureUser {
    pub user_id: String,
    pub organization_id: u64,
    pub token: String,
    #[serde(default)]
    pub admin: bool,
    #[serde(default)]
    pub viewable: BTreeSet<u64>,
}

#[derive(Debug)]
pub struct MemoryBackend {
    accounts: HashMap<u64, Account>,
    records: Vec<InventoryRecord>,
    users: Vec<FixtureUser>,
    queries: AtomicUsize,
}

impl MemoryBackend {
    pub fn new(fixture: Fixture) -> Self {
        let accounts: HashMap<u64, Account> = fixture
            .accounts
            .into_iter()
            .map(|account| (account.organization_service_id, account))
            .collect();
        let resource_types: HashMap<(String, String), String> = fixture
            .resource_types
            .into_iter()
            .map(|entry| ((entry.cloud_type_id, entry.resource_type), entry.name))
            .collect();
        let mut records: Vec<InventoryRecord> = fixture
            .resources
            .into_iter()
            .filter_map(|row| join(row, &accounts, &resource_types))
            .collect();
        records.sort_by(record_order);
        Self {
            accounts,
            records,
            users: fixture.users,
            queries: AtomicUsize::new(0),
        }
    }

    pub fn from_json(text: &str) -> Result<Self, Error> {
        let fixture: Fixture = serde_json::from_str(text).map_err(|err| {
            Error::new(ErrorKind::Usage)
                .with_message("invalid inventory fixture")
                .with_hint("The --data file must be JSON with accounts, resource_types, resources, and users.")
                .with_source(err)
        })?;
        Ok(Self::new(fixture))
    }

    pub fn load(path: &Path) -> Result<Self, Error> {
        let text = std::fs::read_to_string(path).map_err(|err| {
            let kind = if err.kind() == std::io::ErrorKind::NotFound {
                ErrorKind::NotFound
            } else {
                ErrorKind::Io
            };
            Error::new(kind)
                .with_message(format!("failed to read fixture {}", path.display()))
                .with_source(err)
        })?;
        let backend = Self::from_json(&text)?;
        tracing::info!(
            path = %path.display(),
            accounts = backend.accounts.len(),
            records = backend.records.len(),
            "loaded inventory fixture"
        );
        Ok(backend)
    }

    /// Number of `fetch_page` calls served so far.
    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    pub fn export_context(self: &Arc<Self>, page_size: usize) -> ExportContext {
        ExportContext {
            directory: self.clone(),
            permissions: self.clone(),
            store: self.clone(),
            page_size,
        }
    }

    fn matches(&self, record: &InventoryRecord, query: &InventoryQuery) -> bool {
        if !query.accounts.contains(record.organization_service_id) {
            return false;
        }
        if !query.resource_types.is_empty()
            && !query.resource_types.iter().any(|kind| kind == &record.resource_type)
        {
            return false;
        }
        self.accounts
            .get(&record.organization_service_id)
            .is_some_and(|account| account.organization_id == query.organization_id)
    }
}

// Rows without a known account or a matrix entry for their type drop out.
fn join(
    row: ResourceRow,
    accounts: &HashMap<u64, Account>,
    resource_types: &HashMap<(String, String), String>,
) -> Option<InventoryRecord> {
    let account = accounts.get(&row.organization_service_id)?;
    let cloud_resource_type = resource_types
        .get(&(account.cloud_type_id.clone(), row.resource_type.clone()))?
        .clone();
    Some(InventoryRecord {
        organization_service_id: row.organization_service_id,
        provider_id: row.provider_id,
        name: row.name,
        region_name: row.region_name,
        resource_type: row.resource_type,
        cloud_resource_type,
        namespace_id: row.namespace_id,
        creation_timestamp: row.creation_timestamp,
        discovered_timestamp: row.discovered_timestamp,
        account_id: account.account_id.clone(),
        account_name: account.name.clone(),
        cloud_type_id: account.cloud_type_id.clone(),
    })
}

impl AccountDirectory for MemoryBackend {
    fn organization_accounts(&self, organization_id: u64) -> Result<Vec<Account>, Error> {
        let mut accounts: Vec<Account> = self
            .accounts
            .values()
            .filter(|account| account.organization_id == organization_id)
            .cloned()
            .collect();
        accounts.sort_by_key(|account| account.organization_service_id);
        Ok(accounts)
    }
}

impl PermissionFilter for MemoryBackend {
    fn filter_viewable(
        &self,
        candidates: &BTreeSet<u64>,
        user: &User,
    ) -> Result<BTreeSet<u64>, Error> {
        let Some(grants) = self
            .users
            .iter()
            .find(|entry| entry.user_id == user.user_id)
        else {
            return Ok(BTreeSet::new());
        };
        if grants.admin {
            return Ok(candidates.clone());
        }
        Ok(candidates.intersection(&grants.viewable).copied().collect())
    }
}

impl SessionResolver for MemoryBackend {
    fn resolve_session(&self, token: &str) -> Option<User> {
        self.users
            .iter()
            .find(|entry| entry.token == token)
            .map(|entry| User {
                user_id: entry.user_id.clone(),
                organization_id: entry.organization_id,
            })
    }
}

impl InventoryStore for MemoryBackend {
    fn fetch_page(
        &self,
        query: &InventoryQuery,
        limit: usize,
        offset: Option<usize>,
    ) -> Result<Page, Error> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        let records = self
            .records
            .iter()
            .filter(|record| self.matches(record, query))
            .skip(offset.unwrap_or(0))
            .take(limit)
            .cloned()
            .collect();
        Ok(Page::new(records))
    }
}
