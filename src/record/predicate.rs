//! Scan predicates: conjunctions of per-column comparisons.

use std::collections::BTreeMap;
use std::fmt;

use crate::common::{Row, Value};

/// A comparison between a column value and a constant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Eq,
    Gt,
    Lt,
}

impl CompareOp {
    /// Does `value <op> bound` hold?
    pub fn holds(&self, value: &Value, bound: &Value) -> bool {
        match self {
            CompareOp::Eq => value == bound,
            CompareOp::Gt => value > bound,
            CompareOp::Lt => value < bound,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Gt => ">",
            CompareOp::Lt => "<",
        }
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// One clause on a column.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub op: CompareOp,
    pub value: Value,
}

/// Column position → comparisons that must all hold.
///
/// An empty predicate matches every live record. Disjunctions are built
/// by callers from several scans.
///
/// ```ignore
/// // id > 3 AND id < 10 AND name = 'ab'
/// let pred = Predicate::new()
///     .with(0, CompareOp::Gt, 3)
///     .with(0, CompareOp::Lt, 10)
///     .with(1, CompareOp::Eq, "ab");
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Predicate {
    clauses: BTreeMap<usize, Vec<Condition>>,
}

impl Predicate {
    /// The predicate that matches everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a clause, builder style.
    pub fn with(mut self, column: usize, op: CompareOp, value: impl Into<Value>) -> Self {
        self.add(column, op, value);
        self
    }

    pub fn add(&mut self, column: usize, op: CompareOp, value: impl Into<Value>) {
        self.clauses.entry(column).or_default().push(Condition {
            op,
            value: value.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// Clauses on one column (empty if none).
    pub fn conditions_on(&self, column: usize) -> &[Condition] {
        self.clauses.get(&column).map_or(&[], Vec::as_slice)
    }

    /// Every constrained column with its clauses, by position.
    pub fn clauses(&self) -> impl Iterator<Item = (usize, &[Condition])> {
        self.clauses.iter().map(|(&col, conds)| (col, conds.as_slice()))
    }

    /// Highest constrained column position, if any.
    pub fn max_column(&self) -> Option<usize> {
        self.clauses.keys().next_back().copied()
    }

    /// Does `row` satisfy every clause? A clause on a column the row
    /// doesn't have never holds.
    pub fn matches(&self, row: &Row) -> bool {
        self.clauses.iter().all(|(&column, conds)| match row.get(column) {
            Some(value) => conds.iter().all(|c| c.op.holds(value, &c.value)),
            None => false,
        })
    }
}
