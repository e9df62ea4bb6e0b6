//! Common types and utilities shared across tablestore.
//!
//! This module contains fundamental primitives used throughout the codebase:
//! - Configuration constants and [`StorageConfig`]
//! - Error types
//! - Identifiers ([`FileId`], [`BlockId`], [`FrameId`])
//! - Column [`Value`]s and the packed [`Layout`] descriptor

pub mod config;
pub mod error;
mod ids;
pub mod layout;
pub mod value;

pub use config::StorageConfig;
pub use error::{Error, Result};
pub use ids::{BlockId, FileId, FrameId};
pub use layout::{Field, FieldKind, Layout};
pub use value::{Row, Value};
