//! Purpose: Define the stable public Rust API boundary for resinv.
//! Exports: Pipeline types, collaborator traits, request parsing, and the fixture backend.
//! Role: Single import path for the binary, integration tests, and embedders.
//! Invariants: Additive-only surface; core internals stay reachable through `crate::core`.

mod memory;
mod request;

#[doc(hidden)]
pub use crate::core::error::to_exit_code;
pub use crate::core::access::{PermissionFilter, SessionResolver, authorize};
pub use crate::core::csv_rows::{CsvEncoder, HEADER};
pub use crate::core::error::{Error, ErrorKind};
pub use crate::core::export::{
    CSV_CONTENT_TYPE, ExportContext, ExportDriver, ExportMetadata, ExportState, export_filename,
};
pub use crate::core::model::{
    Account, AuthorizedScope, Badge, BadgeInput, BadgeOperator, InventoryRecord, Page, ScopeFilter,
    User,
};
pub use crate::core::pages::{
    DEFAULT_PAGE_SIZE, InventoryQuery, InventoryStore, PageIterator, record_order,
};
pub use crate::core::scope::{AccountDirectory, resolve_candidates};
pub use memory::{Fixture, FixtureUser, MemoryBackend, ResourceRow, ResourceTypeEntry};
pub use request::ExportRequest;
