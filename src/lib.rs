//! Purpose: Shared library crate used by the `resinv` CLI, server, and tests.
//! Exports: `core` (pipeline stages, model, errors) and `api` (stable surface + fixture backend).
//! Role: Backs the binary; collaborators are traits so other backends can plug in.
//! Invariants: Core modules take collaborators as explicit inputs, never as globals.
pub mod api;
pub mod core;
