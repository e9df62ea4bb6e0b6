//! The catalog of tables and indexes, and its on-disk form.
//!
//! # File Format
//! ```text
//! ┌───────────┬──────────────┬──────────────┬──────────────────────────┐
//! │ "TSCT"    │ crc32 (u32)  │ length (u32) │ bincode(Catalog)         │
//! └───────────┴──────────────┴──────────────┴──────────────────────────┘
//! ```
//! The checksum covers the payload only. Saves go through a temporary
//! file and a rename, so a crash leaves either the old or the new catalog.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::common::{Error, Result};

use super::schema::{Column, Index, Table, PRIMARY_INDEX};

const MAGIC: &[u8; 4] = b"TSCT";
const FRAME_HEADER_SIZE: usize = 12;

/// Every table known to the database.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    tables: BTreeMap<String, Table>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Lookups
    // ========================================================================

    pub fn table(&self, name: &str) -> Result<&Table> {
        self.tables
            .get(name)
            .ok_or_else(|| Error::Catalog(format!("no table named {}", name)))
    }

    pub fn tables(&self) -> impl Iterator<Item = &Table> {
        self.tables.values()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    /// Full record format of a table.
    pub fn format(&self, table: &str) -> Result<String> {
        Ok(self.table(table)?.fmt())
    }

    pub fn columns(&self, table: &str) -> Result<&[Column]> {
        Ok(&self.table(table)?.columns)
    }

    pub fn indexes(&self, table: &str) -> Result<impl Iterator<Item = &Index>> {
        Ok(self.table(table)?.indexes.values())
    }

    // ========================================================================
    // DDL
    // ========================================================================

    /// Add a table. Its primary key columns get the `PRIMARY` index.
    ///
    /// # Errors
    /// `Error::Catalog` for a duplicate table name, no columns, duplicate
    /// column names or no primary key.
    pub fn add_table(&mut self, name: &str, columns: Vec<Column>) -> Result<&Table> {
        if self.tables.contains_key(name) {
            return Err(Error::Catalog(format!("already have a table named {}", name)));
        }
        if columns.is_empty() {
            return Err(Error::Catalog(format!("table {} has no columns", name)));
        }
        for (i, column) in columns.iter().enumerate() {
            if columns[..i].iter().any(|c| c.name == column.name) {
                return Err(Error::Catalog(format!(
                    "duplicate column {} on table {}",
                    column.name, name
                )));
            }
        }

        let primary: Vec<String> = columns
            .iter()
            .filter(|c| c.primary_key)
            .map(|c| c.name.clone())
            .collect();
        if primary.is_empty() {
            return Err(Error::Catalog(format!("table {} has no primary key", name)));
        }

        let mut indexes = BTreeMap::new();
        indexes.insert(
            PRIMARY_INDEX.to_string(),
            Index {
                name: PRIMARY_INDEX.to_string(),
                columns: primary,
            },
        );
        let table = Table {
            name: name.to_string(),
            columns,
            indexes,
        };
        Ok(self.tables.entry(name.to_string()).or_insert(table))
    }

    pub fn drop_table(&mut self, name: &str) -> Result<Table> {
        self.tables
            .remove(name)
            .ok_or_else(|| Error::Catalog(format!("no table named {}", name)))
    }

    /// Add an index over `columns` of `table`.
    ///
    /// # Errors
    /// `Error::Catalog` for an unknown table or column, a duplicate index
    /// name, or an empty column list.
    pub fn add_index(&mut self, table: &str, index: &str, columns: &[&str]) -> Result<&Index> {
        let entry = self
            .tables
            .get_mut(table)
            .ok_or_else(|| Error::Catalog(format!("no table named {}", table)))?;
        if columns.is_empty() {
            return Err(Error::Catalog(format!("index {} has no columns", index)));
        }
        if entry.indexes.contains_key(index) {
            return Err(Error::Catalog(format!(
                "already have an index named {} on table {}",
                index, table
            )));
        }
        for column in columns {
            entry.column(column)?;
        }

        let index_def = Index {
            name: index.to_string(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
        };
        Ok(entry.indexes.entry(index.to_string()).or_insert(index_def))
    }

    /// Remove an index definition. `PRIMARY` cannot be dropped.
    pub fn drop_index(&mut self, table: &str, index: &str) -> Result<Index> {
        if index == PRIMARY_INDEX {
            return Err(Error::Catalog("cannot drop the primary index".to_string()));
        }
        let entry = self
            .tables
            .get_mut(table)
            .ok_or_else(|| Error::Catalog(format!("no table named {}", table)))?;
        entry.indexes.remove(index).ok_or_else(|| {
            Error::Catalog(format!("no index named {} on table {}", index, table))
        })
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let payload = bincode::serialize(self)
            .map_err(|e| Error::Catalog(format!("cannot encode catalog: {}", e)))?;
        let len = u32::try_from(payload.len())
            .map_err(|_| Error::Catalog("catalog too large".to_string()))?;

        let mut buf = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len());
        buf.extend_from_slice(MAGIC);
        buf.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
        buf.extend_from_slice(&len.to_le_bytes());
        buf.extend_from_slice(&payload);
        Ok(buf)
    }

    /// # Errors
    /// `Error::Corrupted` for a bad magic, length or checksum, or an
    /// undecodable payload.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < FRAME_HEADER_SIZE || &bytes[..4] != MAGIC {
            return Err(Error::Corrupted("not a catalog file".to_string()));
        }
        let crc = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        let len = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize;
        let payload = &bytes[FRAME_HEADER_SIZE..];
        if payload.len() != len {
            return Err(Error::Corrupted(format!(
                "catalog payload is {}B, header says {}B",
                payload.len(),
                len
            )));
        }
        if crc32fast::hash(payload) != crc {
            return Err(Error::Corrupted("catalog checksum mismatch".to_string()));
        }
        bincode::deserialize(payload)
            .map_err(|e| Error::Corrupted(format!("cannot decode catalog: {}", e)))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, self.to_bytes()?)?;
        fs::rename(&tmp, path)?;
        tracing::debug!(path = %path.display(), tables = self.tables.len(), "saved catalog");
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        Self::from_bytes(&fs::read(path)?)
    }

    /// Load the catalog, or start an empty one if the file doesn't exist.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match Self::load(path) {
            Err(e) if e.is_not_found() => Ok(Self::new()),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ColumnType;
    use tempfile::tempdir;

    fn catalog_with_people() -> Catalog {
        let mut catalog = Catalog::new();
        catalog
            .add_table(
                "people",
                vec![
                    Column::new("id", ColumnType::Int).primary_key(),
                    Column::new("name", ColumnType::Char(5)),
                ],
            )
            .unwrap();
        catalog
    }

    #[test]
    fn test_add_table_creates_primary_index() {
        let catalog = catalog_with_people();
        let table = catalog.table("people").unwrap();
        assert_eq!(table.index(PRIMARY_INDEX).unwrap().columns, vec!["id"]);
        assert_eq!(catalog.format("people").unwrap(), "<i5s");
        assert_eq!(catalog.columns("people").unwrap().len(), 2);
        assert_eq!(catalog.indexes("people").unwrap().count(), 1);
    }

    #[test]
    fn test_add_table_errors() {
        let mut catalog = catalog_with_people();
        let dup = catalog.add_table("people", vec![Column::new("id", ColumnType::Int).primary_key()]);
        assert!(matches!(dup, Err(Error::Catalog(_))));

        let no_pk = catalog.add_table("t", vec![Column::new("id", ColumnType::Int)]);
        assert!(matches!(no_pk, Err(Error::Catalog(_))));

        assert!(catalog.add_table("empty", Vec::new()).is_err());

        let dup_col = catalog.add_table(
            "d",
            vec![
                Column::new("a", ColumnType::Int).primary_key(),
                Column::new("a", ColumnType::Float),
            ],
        );
        assert!(dup_col.is_err());
        assert!(!catalog.contains("d"));
    }

    #[test]
    fn test_index_ddl() {
        let mut catalog = catalog_with_people();
        catalog.add_index("people", "by_name", &["name"]).unwrap();
        assert!(catalog.add_index("people", "by_name", &["id"]).is_err());
        assert!(catalog.add_index("people", "by_age", &["age"]).is_err());
        assert!(catalog.add_index("people", "none", &[]).is_err());
        assert!(catalog.add_index("ghosts", "x", &["id"]).is_err());

        assert!(catalog.drop_index("people", PRIMARY_INDEX).is_err());
        assert_eq!(catalog.drop_index("people", "by_name").unwrap().columns, vec!["name"]);
        assert!(catalog.drop_index("people", "by_name").is_err());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("catalog.bin");

        let mut catalog = catalog_with_people();
        catalog.add_index("people", "by_name", &["name", "id"]).unwrap();
        catalog.save(&path).unwrap();

        assert_eq!(Catalog::load(&path).unwrap(), catalog);
    }

    #[test]
    fn test_load_missing_is_empty() {
        let dir = tempdir().unwrap();
        let catalog = Catalog::load_or_default(&dir.path().join("catalog.bin")).unwrap();
        assert_eq!(catalog.tables().count(), 0);
    }

    #[test]
    fn test_corruption_detected() {
        let mut bytes = catalog_with_people().to_bytes().unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        assert!(matches!(Catalog::from_bytes(&bytes), Err(Error::Corrupted(_))));

        assert!(matches!(Catalog::from_bytes(b"nope"), Err(Error::Corrupted(_))));

        let mut truncated = catalog_with_people().to_bytes().unwrap();
        truncated.pop();
        assert!(matches!(Catalog::from_bytes(&truncated), Err(Error::Corrupted(_))));
    }
}
