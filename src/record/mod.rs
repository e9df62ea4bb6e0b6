//! Record storage.
//!
//! - [`RecordFile`] - fixed-format records with free-list slot reuse
//! - [`Predicate`] - conjunctive scan filters

mod predicate;
mod record_file;

pub use predicate::{CompareOp, Condition, Predicate};
pub use record_file::{RecordFile, RecordHeader, RECORD_HEADER_SIZE};
