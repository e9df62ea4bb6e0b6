//! Statement-level operations over the catalog, record files and indexes.
//!
//! # Directory Layout
//! ```text
//! {data_dir}/
//!   ├── catalog.bin
//!   └── tables/
//!       └── {table}/
//!           ├── {table}.table      record file
//!           ├── PRIMARY.index      primary key index
//!           └── {index}.index      one per secondary index
//! ```

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;

use crate::buffer::BufferPool;
use crate::catalog::{Catalog, Column, Index, Table, PRIMARY_INDEX};
use crate::common::value::display_row;
use crate::common::{Error, Result, Row, StorageConfig, Value};
use crate::index::{IndexTree, TreeShape};
use crate::record::{CompareOp, Condition, Predicate, RecordFile};

const CATALOG_FILE: &str = "catalog.bin";
const TABLES_DIR: &str = "tables";

/// An open index and where its key columns sit in a record.
struct OpenIndex {
    tree: IndexTree,
    positions: Vec<usize>,
}

impl OpenIndex {
    fn key_of(&self, row: &[Value]) -> Row {
        self.positions.iter().map(|&p| row[p].clone()).collect()
    }
}

/// The open files of one table.
struct TableFiles {
    records: RecordFile,
    indexes: BTreeMap<String, OpenIndex>,
}

impl TableFiles {
    fn persist_headers(&self) -> Result<()> {
        for index in self.indexes.values() {
            index.tree.persist_header()?;
        }
        Ok(())
    }

    /// Primary index first, then the rest by name.
    fn indexes_by_preference(&self) -> impl Iterator<Item = &OpenIndex> {
        self.indexes.get(PRIMARY_INDEX).into_iter().chain(
            self.indexes
                .iter()
                .filter(|(name, _)| name.as_str() != PRIMARY_INDEX)
                .map(|(_, index)| index),
        )
    }
}

/// A database directory: one catalog, one buffer pool, and every table's
/// record file and indexes.
///
/// Every statement keeps all of a table's indexes in step with its record
/// file. Index headers are written to their block 0 after each statement;
/// nothing reaches disk until blocks are evicted or [`flush`](Self::flush)
/// / [`close`](Self::close) runs.
///
/// ```no_run
/// use tablestore::catalog::{Column, ColumnType};
/// use tablestore::{CompareOp, Database, Predicate, StorageConfig, Value};
///
/// let config = StorageConfig::builder().data_dir("./data").build();
/// let mut db = Database::open(config).unwrap();
/// db.create_table(
///     "people",
///     vec![
///         Column::new("id", ColumnType::Int).primary_key(),
///         Column::new("name", ColumnType::Char(5)),
///     ],
/// )
/// .unwrap();
/// db.insert("people", &[Value::Int(1), Value::from("ab")]).unwrap();
/// let rows = db
///     .select("people", &Predicate::new().with(0, CompareOp::Eq, 1))
///     .unwrap();
/// db.close().unwrap();
/// ```
pub struct Database {
    config: StorageConfig,
    pool: Arc<BufferPool>,
    catalog: Catalog,
    tables: HashMap<String, TableFiles>,
}

impl Database {
    /// Open the database in `config.data_dir`, creating the directory and
    /// an empty catalog the first time.
    ///
    /// # Errors
    /// `Error::Config` for an invalid config, `Error::Corrupted` for an
    /// unreadable catalog, or an I/O error if a table's files are missing.
    pub fn open(config: StorageConfig) -> Result<Self> {
        config.validate()?;
        fs::create_dir_all(config.data_dir.join(TABLES_DIR))?;
        let pool = Arc::new(BufferPool::from_config(&config)?);
        let catalog = Catalog::load_or_default(&config.data_dir.join(CATALOG_FILE))?;

        let mut db = Self {
            config,
            pool,
            catalog,
            tables: HashMap::new(),
        };
        let names: Vec<String> = db.catalog.tables().map(|t| t.name.clone()).collect();
        for name in names {
            let files = db.open_table_files(db.catalog.table(&name)?)?;
            db.tables.insert(name, files);
        }

        tracing::info!(
            data_dir = %db.config.data_dir.display(),
            tables = db.tables.len(),
            block_size = db.config.block_size,
            pool_blocks = db.config.pool_blocks,
            "opened database"
        );
        Ok(db)
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// Persist index headers, write back every dirty block and save the
    /// catalog.
    pub fn flush(&self) -> Result<()> {
        for files in self.tables.values() {
            files.persist_headers()?;
        }
        self.pool.flush_all()?;
        self.save_catalog()
    }

    /// [`flush`](Self::flush) and close.
    pub fn close(self) -> Result<()> {
        self.flush()?;
        tracing::info!(data_dir = %self.config.data_dir.display(), "closed database");
        Ok(())
    }

    // ========================================================================
    // DDL
    // ========================================================================

    /// Create a table and its `PRIMARY` index.
    ///
    /// # Errors
    /// `Error::Catalog` for a bad name or schema (see
    /// [`Catalog::add_table`]); `Error::Format` if a record or primary key
    /// is too wide for one block. Nothing is left behind on failure.
    pub fn create_table(&mut self, name: &str, columns: Vec<Column>) -> Result<()> {
        check_name("table", name)?;
        let table = self.catalog.add_table(name, columns)?.clone();

        match self.create_table_files(&table) {
            Ok(files) => {
                self.tables.insert(name.to_string(), files);
            }
            Err(e) => {
                self.catalog.drop_table(name).ok();
                self.discard_table_dir(name);
                return Err(e);
            }
        }
        self.save_catalog()?;

        tracing::info!(table = name, format = %table.fmt(), "created table");
        Ok(())
    }

    /// Drop a table, its indexes and its files.
    pub fn drop_table(&mut self, name: &str) -> Result<()> {
        self.catalog.drop_table(name)?;
        if let Some(files) = self.tables.remove(name) {
            self.pool.detach(files.records.file_id());
            for index in files.indexes.values() {
                self.pool.detach(index.tree.file_id());
            }
        }
        match fs::remove_dir_all(self.table_dir(name)) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        self.save_catalog()?;

        tracing::info!(table = name, "dropped table");
        Ok(())
    }

    /// Create an index over `columns` and fill it from the table's
    /// existing records.
    ///
    /// # Errors
    /// `Error::Catalog` for a bad name or column list,
    /// `Error::DuplicateKey` if two existing records share a key. Nothing
    /// is left behind on failure.
    pub fn create_index(&mut self, table: &str, name: &str, columns: &[&str]) -> Result<()> {
        check_name("index", name)?;
        let index = self.catalog.add_index(table, name, columns)?.clone();
        let def = self.catalog.table(table)?.clone();

        let built = self.open_index(&def, &index, true).and_then(|mut open| {
            match self.fill_index(table, &mut open) {
                Ok(rows) => Ok((open, rows)),
                Err(e) => {
                    if let Err(cleanup) = self.pool.remove_file(open.tree.file_id()) {
                        tracing::warn!(index = name, error = %cleanup, "failed to remove index file");
                    }
                    Err(e)
                }
            }
        });
        let (open, rows) = match built {
            Ok(built) => built,
            Err(e) => {
                self.catalog.drop_index(table, name).ok();
                return Err(e);
            }
        };

        self.tables
            .get_mut(table)
            .ok_or_else(|| no_table(table))?
            .indexes
            .insert(name.to_string(), open);
        self.save_catalog()?;

        tracing::info!(table, index = name, columns = ?index.columns, rows, "created index");
        Ok(())
    }

    /// Drop a secondary index and delete its file.
    ///
    /// # Errors
    /// `Error::Catalog` for `PRIMARY` or an unknown index.
    pub fn drop_index(&mut self, table: &str, name: &str) -> Result<()> {
        self.catalog.drop_index(table, name)?;
        let files = self.tables.get_mut(table).ok_or_else(|| no_table(table))?;
        if let Some(index) = files.indexes.remove(name) {
            self.pool.remove_file(index.tree.file_id())?;
        }
        self.save_catalog()?;

        tracing::info!(table, index = name, "dropped index");
        Ok(())
    }

    // ========================================================================
    // DML
    // ========================================================================

    /// Store a row and add its keys to every index. Returns the record's
    /// offset.
    ///
    /// # Errors
    /// `Error::Format` if the row doesn't match the columns,
    /// `Error::DuplicateKey` if any index already holds its key. A
    /// rejected row leaves no trace in the record file or any index.
    pub fn insert(&mut self, table: &str, values: &[Value]) -> Result<i32> {
        self.catalog.table(table)?.check_row(values)?;
        let files = self.tables.get_mut(table).ok_or_else(|| no_table(table))?;
        let offset = files.records.insert(values)?;

        let mut added = 0;
        let mut failure = None;
        for index in files.indexes.values_mut() {
            let key = index.key_of(values);
            if let Err(e) = index.tree.insert(&key, offset) {
                failure = Some(e);
                break;
            }
            added += 1;
        }

        if let Some(e) = failure {
            for index in files.indexes.values_mut().take(added) {
                let key = index.key_of(values);
                index.tree.delete(&key)?;
            }
            files.records.remove(offset)?;
            files.persist_headers()?;
            tracing::debug!(table, offset, error = %e, "rolled back insert");
            return Err(e);
        }

        files.persist_headers()?;
        Ok(offset)
    }

    /// Rows matching `predicate`.
    ///
    /// If an index leads with a column that carries an `=`, `>` or `<`
    /// clause, the index narrows the candidates and rows come back in that
    /// index's key order; otherwise the record file is scanned and rows
    /// come back in offset order. Every clause is checked either way.
    pub fn select(&self, table: &str, predicate: &Predicate) -> Result<Vec<Row>> {
        let def = self.catalog.table(table)?;
        check_predicate(def, predicate)?;
        let files = self.tables.get(table).ok_or_else(|| no_table(table))?;

        match choose_index(def, files, predicate) {
            Some((index, condition)) => select_by_index(files, index, condition, predicate),
            None => files.records.scan_select(predicate),
        }
    }

    /// Delete rows matching `predicate`. Returns how many were deleted.
    pub fn delete(&mut self, table: &str, predicate: &Predicate) -> Result<usize> {
        check_predicate(self.catalog.table(table)?, predicate)?;
        let files = self.tables.get_mut(table).ok_or_else(|| no_table(table))?;

        let removed = files.records.scan_delete(predicate)?;
        for index in files.indexes.values_mut() {
            for (_, row) in &removed {
                let key = index.key_of(row);
                index.tree.delete(&key)?;
            }
        }
        files.persist_headers()?;

        tracing::debug!(table, rows = removed.len(), "deleted rows");
        Ok(removed.len())
    }

    /// Set `(column position, value)` pairs on every row matching
    /// `predicate`. Returns how many rows changed.
    ///
    /// # Errors
    /// `Error::Format` for an unknown column or a value that doesn't fit,
    /// `Error::DuplicateKey` if the new values would give two rows the
    /// same key in any index. Both are detected before anything changes.
    pub fn update(
        &mut self,
        table: &str,
        predicate: &Predicate,
        changes: &[(usize, Value)],
    ) -> Result<usize> {
        let def = self.catalog.table(table)?;
        check_predicate(def, predicate)?;
        if let Some((column, _)) = changes.iter().find(|(c, _)| *c >= def.columns.len()) {
            return Err(Error::Format(format!(
                "table {} has no column {}",
                table, column
            )));
        }
        let files = self.tables.get_mut(table).ok_or_else(|| no_table(table))?;

        let mut plan = Vec::new();
        for (offset, old) in files.records.scan(predicate)? {
            let mut new = old.clone();
            for (column, value) in changes {
                new[*column] = value.clone();
            }
            def.check_row(&new)?;
            plan.push((offset, old, new));
        }

        let offsets: BTreeSet<i32> = plan.iter().map(|(offset, _, _)| *offset).collect();
        for index in files.indexes.values() {
            let mut seen = BTreeSet::new();
            for (_, old, new) in &plan {
                let new_key = index.key_of(new);
                if !seen.insert(new_key.clone()) {
                    return Err(Error::DuplicateKey(display_row(&new_key)));
                }
                if index.key_of(old) == new_key {
                    continue;
                }
                if let Some(holder) = index.tree.get(&new_key)? {
                    if !offsets.contains(&holder) {
                        return Err(Error::DuplicateKey(display_row(&new_key)));
                    }
                }
            }
        }

        for index in files.indexes.values_mut() {
            let rekeyed: Vec<(i32, Row, Row)> = plan
                .iter()
                .map(|(offset, old, new)| (*offset, index.key_of(old), index.key_of(new)))
                .filter(|(_, old_key, new_key)| old_key != new_key)
                .collect();
            for (_, old_key, _) in &rekeyed {
                index.tree.delete(old_key)?;
            }
            for (offset, _, new_key) in &rekeyed {
                index.tree.insert(new_key, *offset)?;
            }
        }
        for (offset, _, new) in &plan {
            files.records.modify(new, *offset)?;
        }
        files.persist_headers()?;

        tracing::debug!(table, rows = plan.len(), "updated rows");
        Ok(plan.len())
    }

    /// Check an index's structure. See [`IndexTree::verify`].
    pub fn verify_index(&self, table: &str, index: &str) -> Result<TreeShape> {
        let files = self.tables.get(table).ok_or_else(|| no_table(table))?;
        files
            .indexes
            .get(index)
            .ok_or_else(|| Error::Catalog(format!("no index named {} on table {}", index, table)))?
            .tree
            .verify()
    }

    // ========================================================================
    // Internal: files and paths
    // ========================================================================

    fn create_table_files(&self, table: &Table) -> Result<TableFiles> {
        fs::create_dir_all(self.table_dir(&table.name))?;
        let records = RecordFile::create(
            Arc::clone(&self.pool),
            self.record_path(&table.name),
            &table.fmt(),
        )?;
        let mut indexes = BTreeMap::new();
        for index in table.indexes.values() {
            indexes.insert(index.name.clone(), self.open_index(table, index, true)?);
        }
        Ok(TableFiles { records, indexes })
    }

    fn open_table_files(&self, table: &Table) -> Result<TableFiles> {
        let records = RecordFile::open(
            Arc::clone(&self.pool),
            self.record_path(&table.name),
            &table.fmt(),
        )?;
        let mut indexes = BTreeMap::new();
        for index in table.indexes.values() {
            indexes.insert(index.name.clone(), self.open_index(table, index, false)?);
        }
        Ok(TableFiles { records, indexes })
    }

    fn open_index(&self, table: &Table, index: &Index, create: bool) -> Result<OpenIndex> {
        let path = self.index_path(&table.name, &index.name);
        let format = table.key_format(index)?;
        let pool = Arc::clone(&self.pool);
        let tree = if create {
            IndexTree::create(pool, path, &format)?
        } else {
            IndexTree::open(pool, path, &format)?
        };
        Ok(OpenIndex {
            tree,
            positions: table.key_positions(index)?,
        })
    }

    /// Add every live record of `table` to `index`, by true record offset.
    fn fill_index(&self, table: &str, index: &mut OpenIndex) -> Result<usize> {
        let files = self.tables.get(table).ok_or_else(|| no_table(table))?;
        let rows = files.records.scan(&Predicate::new())?;
        for (offset, row) in &rows {
            let key = index.key_of(row);
            index.tree.insert(&key, *offset)?;
        }
        index.tree.persist_header()?;
        Ok(rows.len())
    }

    fn discard_table_dir(&self, table: &str) {
        if let Err(e) = fs::remove_dir_all(self.table_dir(table)) {
            if e.kind() != ErrorKind::NotFound {
                tracing::warn!(table, error = %e, "failed to remove table directory");
            }
        }
    }

    fn save_catalog(&self) -> Result<()> {
        self.catalog.save(&self.config.data_dir.join(CATALOG_FILE))
    }

    fn table_dir(&self, table: &str) -> PathBuf {
        self.config.data_dir.join(TABLES_DIR).join(table)
    }

    fn record_path(&self, table: &str) -> PathBuf {
        self.table_dir(table).join(format!("{}.table", table))
    }

    fn index_path(&self, table: &str, index: &str) -> PathBuf {
        self.table_dir(table).join(format!("{}.index", index))
    }
}

/// Table and index names become file names.
fn check_name(kind: &str, name: &str) -> Result<()> {
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(Error::Catalog(format!(
            "{} name {:?} must be non-empty ASCII letters, digits or '_'",
            kind, name
        )));
    }
    Ok(())
}

fn no_table(table: &str) -> Error {
    Error::Catalog(format!("no table named {}", table))
}

/// Every clause must name a column of `table` and compare it with a
/// constant of a matching kind.
fn check_predicate(table: &Table, predicate: &Predicate) -> Result<()> {
    for (position, conditions) in predicate.clauses() {
        let column = table.columns.get(position).ok_or_else(|| {
            Error::Format(format!("table {} has no column {}", table.name, position))
        })?;
        if let Some(bad) = conditions
            .iter()
            .find(|c| !column.column_type.compares_with(&c.value))
        {
            return Err(Error::Format(format!(
                "cannot compare {} column {} with {}",
                column.column_type, column.name, bad.value
            )));
        }
    }
    Ok(())
}

/// The index and clause to drive a select with: an `=` clause on some
/// index's leading column beats a range clause, and `PRIMARY` wins ties.
/// Clauses whose constant doesn't fit the column are left to the filter.
fn choose_index<'a>(
    table: &Table,
    files: &'a TableFiles,
    predicate: &'a Predicate,
) -> Option<(&'a OpenIndex, &'a Condition)> {
    let mut best: Option<(u8, &OpenIndex, &Condition)> = None;
    for index in files.indexes_by_preference() {
        let column = index.positions[0];
        let column_type = table.columns[column].column_type;
        for condition in predicate.conditions_on(column) {
            if !column_type.accepts(&condition.value) {
                continue;
            }
            let rank = match condition.op {
                CompareOp::Eq => 0,
                CompareOp::Gt | CompareOp::Lt => 1,
            };
            if best.map_or(true, |(r, _, _)| rank < r) {
                best = Some((rank, index, condition));
            }
        }
    }
    best.map(|(_, index, condition)| (index, condition))
}

fn select_by_index(
    files: &TableFiles,
    index: &OpenIndex,
    condition: &Condition,
    predicate: &Predicate,
) -> Result<Vec<Row>> {
    let bound = &condition.value;
    let entries = match condition.op {
        CompareOp::Lt => index.tree.iter_leaves(),
        CompareOp::Eq | CompareOp::Gt => index.tree.find(std::slice::from_ref(bound)),
    };
    let entries = match entries {
        Ok(entries) => entries,
        Err(Error::EmptyIndex(_)) => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut rows = Vec::new();
    for entry in entries {
        let (key, offset) = entry?;
        let lead = &key[0];
        match condition.op {
            CompareOp::Eq if lead != bound => break,
            CompareOp::Gt if lead <= bound => continue,
            CompareOp::Lt if lead >= bound => break,
            _ => {}
        }
        let row = files.records.read(offset)?;
        if predicate.matches(&row) {
            rows.push(row);
        }
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ColumnType;
    use tempfile::{tempdir, TempDir};

    fn open_db(dir: &TempDir) -> Database {
        let config = StorageConfig::builder()
            .data_dir(dir.path())
            .block_size(128)
            .pool_blocks(32)
            .build();
        Database::open(config).unwrap()
    }

    fn people(db: &mut Database) {
        db.create_table(
            "people",
            vec![
                Column::new("id", ColumnType::Int).primary_key(),
                Column::new("name", ColumnType::Char(5)),
                Column::new("age", ColumnType::Int),
            ],
        )
        .unwrap();
    }

    fn row(id: i32, name: &str, age: i32) -> Row {
        vec![Value::Int(id), Value::from(name), Value::Int(age)]
    }

    #[test]
    fn test_create_table_lays_out_files() {
        let dir = tempdir().unwrap();
        let mut db = open_db(&dir);
        people(&mut db);

        let table_dir = dir.path().join("tables").join("people");
        assert!(table_dir.join("people.table").exists());
        assert!(table_dir.join("PRIMARY.index").exists());
        assert!(dir.path().join("catalog.bin").exists());
    }

    #[test]
    fn test_bad_names_rejected() {
        let dir = tempdir().unwrap();
        let mut db = open_db(&dir);
        let cols = vec![Column::new("id", ColumnType::Int).primary_key()];
        assert!(matches!(db.create_table("../x", cols.clone()), Err(Error::Catalog(_))));
        assert!(matches!(db.create_table("", cols), Err(Error::Catalog(_))));
    }

    #[test]
    fn test_oversized_key_leaves_nothing_behind() {
        let dir = tempdir().unwrap();
        let mut db = open_db(&dir);
        let wide = vec![Column::new("name", ColumnType::Char(100)).primary_key()];
        assert!(db.create_table("wide", wide).is_err());
        assert!(!db.catalog().contains("wide"));
        assert!(!dir.path().join("tables").join("wide").exists());
    }

    #[test]
    fn test_select_uses_index_and_filters() {
        let dir = tempdir().unwrap();
        let mut db = open_db(&dir);
        people(&mut db);
        for id in [5, 3, 9, 1, 7] {
            db.insert("people", &row(id, "p", id * 10)).unwrap();
        }

        let gt = db
            .select("people", &Predicate::new().with(0, CompareOp::Gt, 3))
            .unwrap();
        let ids: Vec<Value> = gt.iter().map(|r| r[0].clone()).collect();
        assert_eq!(ids, vec![Value::Int(5), Value::Int(7), Value::Int(9)]);

        let lt = db
            .select(
                "people",
                &Predicate::new()
                    .with(0, CompareOp::Lt, 9)
                    .with(2, CompareOp::Gt, 20),
            )
            .unwrap();
        assert_eq!(lt, vec![row(3, "p", 30), row(5, "p", 50), row(7, "p", 70)]);

        let eq = db
            .select("people", &Predicate::new().with(0, CompareOp::Eq, 7))
            .unwrap();
        assert_eq!(eq, vec![row(7, "p", 70)]);

        let none = db
            .select("people", &Predicate::new().with(0, CompareOp::Eq, 4))
            .unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn test_select_unknown_column() {
        let dir = tempdir().unwrap();
        let mut db = open_db(&dir);
        people(&mut db);
        let result = db.select("people", &Predicate::new().with(3, CompareOp::Eq, 1));
        assert!(matches!(result, Err(Error::Format(_))));
    }

    #[test]
    fn test_predicate_constant_must_match_column_kind() {
        let dir = tempdir().unwrap();
        let mut db = open_db(&dir);
        people(&mut db);
        db.insert("people", &row(1, "amy", 30)).unwrap();

        let name_gt_number = Predicate::new().with(1, CompareOp::Gt, 5);
        let id_eq_text = Predicate::new().with(0, CompareOp::Eq, "abc");
        assert!(matches!(db.select("people", &name_gt_number), Err(Error::Format(_))));
        assert!(matches!(db.select("people", &id_eq_text), Err(Error::Format(_))));
        assert!(matches!(db.delete("people", &id_eq_text), Err(Error::Format(_))));
        assert!(matches!(
            db.update("people", &name_gt_number, &[(2, Value::Int(1))]),
            Err(Error::Format(_))
        ));
        assert_eq!(db.select("people", &Predicate::new()).unwrap().len(), 1);

        // Width and numeric kind don't matter for comparisons.
        let wide = Predicate::new().with(1, CompareOp::Lt, "zzzzzzzz");
        assert_eq!(db.select("people", &wide).unwrap().len(), 1);
        let fractional = Predicate::new().with(2, CompareOp::Lt, 30.5);
        assert_eq!(db.select("people", &fractional).unwrap().len(), 1);
    }

    #[test]
    fn test_update_rekeys_indexes() {
        let dir = tempdir().unwrap();
        let mut db = open_db(&dir);
        people(&mut db);
        db.create_index("people", "by_name", &["name"]).unwrap();
        db.insert("people", &row(1, "ann", 30)).unwrap();
        db.insert("people", &row(2, "bob", 40)).unwrap();

        let changed = db
            .update(
                "people",
                &Predicate::new().with(0, CompareOp::Eq, 1),
                &[(0, Value::Int(10)), (1, Value::from("amy"))],
            )
            .unwrap();
        assert_eq!(changed, 1);

        let by_new_id = db
            .select("people", &Predicate::new().with(0, CompareOp::Eq, 10))
            .unwrap();
        assert_eq!(by_new_id, vec![row(10, "amy", 30)]);
        let by_old_name = db
            .select("people", &Predicate::new().with(1, CompareOp::Eq, "ann"))
            .unwrap();
        assert!(by_old_name.is_empty());
        assert_eq!(db.verify_index("people", "by_name").unwrap().keys, 2);
    }

    #[test]
    fn test_update_rejects_duplicate_before_changing() {
        let dir = tempdir().unwrap();
        let mut db = open_db(&dir);
        people(&mut db);
        db.insert("people", &row(1, "ann", 30)).unwrap();
        db.insert("people", &row(2, "bob", 40)).unwrap();

        let result = db.update(
            "people",
            &Predicate::new().with(0, CompareOp::Eq, 1),
            &[(0, Value::Int(2))],
        );
        assert!(matches!(result, Err(Error::DuplicateKey(_))));

        // Two rows collapsing onto one key.
        let result = db.update("people", &Predicate::new(), &[(0, Value::Int(7))]);
        assert!(matches!(result, Err(Error::DuplicateKey(_))));

        let all = db.select("people", &Predicate::new()).unwrap();
        assert_eq!(all, vec![row(1, "ann", 30), row(2, "bob", 40)]);
    }

    #[test]
    fn test_update_swapping_keys_is_allowed() {
        let dir = tempdir().unwrap();
        let mut db = open_db(&dir);
        people(&mut db);
        db.insert("people", &row(1, "ann", 30)).unwrap();
        db.insert("people", &row(2, "bob", 40)).unwrap();

        // Both ids shift up by one: 1 -> 2 frees 2's old key.
        db.update("people", &Predicate::new().with(0, CompareOp::Eq, 2), &[(0, Value::Int(3))])
            .unwrap();
        db.update("people", &Predicate::new().with(0, CompareOp::Eq, 1), &[(0, Value::Int(2))])
            .unwrap();
        let all = db.select("people", &Predicate::new().with(0, CompareOp::Gt, 0)).unwrap();
        assert_eq!(all, vec![row(2, "ann", 30), row(3, "bob", 40)]);
    }

    #[test]
    fn test_drop_index_removes_file() {
        let dir = tempdir().unwrap();
        let mut db = open_db(&dir);
        people(&mut db);
        db.create_index("people", "by_age", &["age"]).unwrap();
        let path = dir.path().join("tables").join("people").join("by_age.index");
        assert!(path.exists());

        assert!(matches!(db.drop_index("people", PRIMARY_INDEX), Err(Error::Catalog(_))));
        db.drop_index("people", "by_age").unwrap();
        assert!(!path.exists());
        assert!(db.verify_index("people", "by_age").is_err());
    }

    #[test]
    fn test_reopen_restores_tables_and_indexes() {
        let dir = tempdir().unwrap();
        {
            let mut db = open_db(&dir);
            people(&mut db);
            db.create_index("people", "by_age", &["age"]).unwrap();
            for id in 0..40 {
                db.insert("people", &row(id, "x", 100 - id)).unwrap();
            }
            db.close().unwrap();
        }

        let db = open_db(&dir);
        assert_eq!(db.verify_index("people", PRIMARY_INDEX).unwrap().keys, 40);
        let young = db
            .select("people", &Predicate::new().with(2, CompareOp::Lt, 63))
            .unwrap();
        let ids: Vec<Value> = young.iter().map(|r| r[0].clone()).collect();
        assert_eq!(ids, vec![Value::Int(39), Value::Int(38)]);
    }
}
