//! Schema catalog.
//!
//! Supplies each table's record format, ordered columns and index
//! definitions to the engine, and persists them across restarts.

mod schema;
mod store;

pub use schema::{Column, ColumnType, Index, Table, PRIMARY_INDEX};
pub use store::Catalog;
