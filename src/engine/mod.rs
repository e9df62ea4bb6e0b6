//! Statement handling on top of the storage engine.
//!
//! [`Database`] resolves table and index names through the
//! [`Catalog`](crate::catalog::Catalog) and drives the record file and
//! every index of a table on one shared [`BufferPool`](crate::buffer::BufferPool).

mod database;

pub use database::Database;
