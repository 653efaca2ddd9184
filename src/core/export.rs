//! Purpose: Drive a streaming CSV export from resolved scope to final chunk.
//! Exports: `ExportContext`, `ExportDriver`, `ExportMetadata`, `ExportState`, `export_filename`.
//! Role: Orchestrates the scope resolver, permission filter, page iterator and encoder.
//! Invariants: The header is the first chunk and is emitted exactly once, before any query.
//! Invariants: Filter errors surface from `ExportContext::prepare`, never after the header.
//! Invariants: A page shorter than the page size ends the export; an exact multiple costs
//!             one extra (empty) fetch.
//! Invariants: After an error the driver yields nothing further and issues no fetches.
use std::sync::Arc;

use bytes::Bytes;
use time::Date;

use crate::core::access::{self, PermissionFilter};
use crate::core::csv_rows::CsvEncoder;
use crate::core::error::Error;
use crate::core::model::{InventoryRecord, ScopeFilter, User};
use crate::core::pages::{InventoryQuery, InventoryStore, PageIterator};
use crate::core::scope::{self, AccountDirectory};

pub const CSV_CONTENT_TYPE: &str = "text/csv";

/// Collaborators for one export, passed explicitly rather than looked up.
#[derive(Clone)]
pub struct ExportContext {
    pub directory: Arc<dyn AccountDirectory>,
    pub permissions: Arc<dyn PermissionFilter>,
    pub store: Arc<dyn InventoryStore>,
    pub page_size: usize,
}

impl ExportContext {
    /// Resolves and authorizes the scope, then returns a driver ready to emit its header.
    pub fn prepare(
        &self,
        user: &User,
        filter: &ScopeFilter,
        started_on: Date,
    ) -> Result<ExportDriver, Error> {
        let candidates = scope::resolve_candidates(user, filter, self.directory.as_ref())?;
        let accounts = access::authorize(candidates, user, self.permissions.as_ref())?;
        let query = InventoryQuery {
            organization_id: user.organization_id,
            accounts,
            resource_types: filter.resource_types.clone(),
        };
        let pages = PageIterator::new(Arc::clone(&self.store), query, self.page_size)?;
        Ok(ExportDriver::new(pages, started_on))
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ExportMetadata {
    pub started_on: Date,
    pub filename: String,
}

impl ExportMetadata {
    pub fn for_date(started_on: Date) -> Self {
        Self {
            started_on,
            filename: export_filename(started_on),
        }
    }

    pub fn content_type(&self) -> &'static str {
        CSV_CONTENT_TYPE
    }

    pub fn content_disposition(&self) -> String {
        format!("attachment; filename={}", self.filename)
    }
}

pub fn export_filename(date: Date) -> String {
    format!(
        "resourceinventory-{:04}.{:02}.{:02}.csv",
        date.year(),
        u8::from(date.month()),
        date.day()
    )
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ExportState {
    Init,
    HeaderSent,
    Fetching,
    Encoding,
    Done,
}

pub struct ExportDriver {
    metadata: ExportMetadata,
    state: ExportState,
    encoder: CsvEncoder,
    pages: PageIterator,
    current: std::vec::IntoIter<InventoryRecord>,
    current_len: usize,
    rows: u64,
}

impl ExportDriver {
    pub fn new(pages: PageIterator, started_on: Date) -> Self {
        Self {
            metadata: ExportMetadata::for_date(started_on),
            state: ExportState::Init,
            encoder: CsvEncoder::new(),
            pages,
            current: Vec::new().into_iter(),
            current_len: 0,
            rows: 0,
        }
    }

    pub fn metadata(&self) -> &ExportMetadata {
        &self.metadata
    }

    pub fn state(&self) -> ExportState {
        self.state
    }

    pub fn rows_emitted(&self) -> u64 {
        self.rows
    }

    pub fn fetches(&self) -> usize {
        self.pages.fetches()
    }

    /// Advances the state machine until it has a chunk to hand out or is done.
    pub fn next_chunk(&mut self) -> Result<Option<Bytes>, Error> {
        let result = self.step();
        if result.is_err() {
            self.release();
            self.state = ExportState::Done;
        }
        result
    }

    fn step(&mut self) -> Result<Option<Bytes>, Error> {
        loop {
            match self.state {
                ExportState::Init => {
                    let header = self.encoder.emit_header()?;
                    self.state = ExportState::HeaderSent;
                    return Ok(Some(header));
                }
                ExportState::HeaderSent => {
                    if self.pages.scope_is_empty() {
                        self.finish();
                        return Ok(None);
                    }
                    self.state = ExportState::Fetching;
                }
                ExportState::Fetching => {
                    let page = self.pages.next_page()?;
                    self.current_len = page.len();
                    self.current = page.into_iter();
                    self.state = ExportState::Encoding;
                }
                ExportState::Encoding => match self.current.next() {
                    Some(record) => {
                        let chunk = self.encoder.emit_row(&record)?;
                        self.rows += 1;
                        return Ok(Some(chunk));
                    }
                    None => {
                        self.release();
                        if self.current_len < self.pages.page_size() {
                            self.finish();
                            return Ok(None);
                        }
                        self.state = ExportState::Fetching;
                    }
                },
                ExportState::Done => return Ok(None),
            }
        }
    }

    // Drops the consumed page before anything else is fetched.
    fn release(&mut self) {
        self.current = Vec::new().into_iter();
    }

    fn finish(&mut self) {
        self.state = ExportState::Done;
        tracing::info!(
            filename = %self.metadata.filename,
            rows = self.rows,
            fetches = self.pages.fetches(),
            "inventory export complete"
        );
    }
}

impl Iterator for ExportDriver {
    type Item = Result<Bytes, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_chunk().transpose()
    }
}
