//! Purpose: Fetch inventory in bounded, stably ordered pages.
//! Exports: `InventoryStore`, `InventoryQuery`, `PageIterator`, `record_order`, `DEFAULT_PAGE_SIZE`.
//! Role: Storage-facing pipeline stage; the driver decides when to stop.
//! Invariants: Records are ordered by (organization_service_id, provider_id, resource_type).
//! Invariants: An empty authorized scope returns an empty page without touching the store.
//! Invariants: The first fetch carries no offset; each fetch advances the offset by the page size.
//! Invariants: A page never exceeds the page size and never contains out-of-scope accounts.
use std::cmp::Ordering;
use std::sync::Arc;

use crate::core::error::{Error, ErrorKind};
use crate::core::model::{AuthorizedScope, InventoryRecord, Page};

pub const DEFAULT_PAGE_SIZE: usize = 10_000;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InventoryQuery {
    pub organization_id: u64,
    pub accounts: AuthorizedScope,
    pub resource_types: Vec<String>,
}

/// Filtered, ordered, offset/limit-bounded retrieval of inventory rows.
///
/// Implementations return at most `limit` records sorted by [`record_order`],
/// skipping `offset` records (none when `offset` is `None`). Any cursor or
/// result handle is released before the call returns.
pub trait InventoryStore: Send + Sync {
    fn fetch_page(
        &self,
        query: &InventoryQuery,
        limit: usize,
        offset: Option<usize>,
    ) -> Result<Page, Error>;
}

pub fn record_order(a: &InventoryRecord, b: &InventoryRecord) -> Ordering {
    a.organization_service_id
        .cmp(&b.organization_service_id)
        .then_with(|| a.provider_id.cmp(&b.provider_id))
        .then_with(|| a.resource_type.cmp(&b.resource_type))
}

pub struct PageIterator {
    store: Arc<dyn InventoryStore>,
    query: InventoryQuery,
    page_size: usize,
    offset: Option<usize>,
    fetches: usize,
}

impl PageIterator {
    pub fn new(
        store: Arc<dyn InventoryStore>,
        query: InventoryQuery,
        page_size: usize,
    ) -> Result<Self, Error> {
        if page_size == 0 {
            return Err(Error::new(ErrorKind::Usage).with_message("page size must be greater than zero"));
        }
        Ok(Self {
            store,
            query,
            page_size,
            offset: None,
            fetches: 0,
        })
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Number of store queries issued so far.
    pub fn fetches(&self) -> usize {
        self.fetches
    }

    pub fn scope_is_empty(&self) -> bool {
        self.query.accounts.is_empty()
    }

    pub fn next_page(&mut self) -> Result<Page, Error> {
        if self.scope_is_empty() {
            return Ok(Page::empty());
        }

        let page = self
            .store
            .fetch_page(&self.query, self.page_size, self.offset)?;
        self.fetches += 1;

        if page.len() > self.page_size {
            return Err(Error::new(ErrorKind::Internal).with_message(format!(
                "store returned {} records for a page of {}",
                page.len(),
                self.page_size
            )));
        }
        if let Some(stray) = page
            .records()
            .iter()
            .find(|record| !self.query.accounts.contains(record.organization_service_id))
        {
            return Err(Error::new(ErrorKind::Internal).with_message(format!(
                "store returned a record for unauthorized account {}",
                stray.organization_service_id
            )));
        }

        tracing::debug!(
            offset = self.offset.unwrap_or(0),
            records = page.len(),
            "fetched inventory page"
        );
        self.offset = Some(self.offset.unwrap_or(0) + self.page_size);
        Ok(page)
    }
}
