// Core modules implementing the export pipeline and error modeling.
pub mod access;
pub mod csv_rows;
pub mod error;
pub mod export;
pub mod model;
pub mod pages;
pub mod scope;
