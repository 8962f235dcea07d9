//! Pull-based query plans and executors.
//!
//! A plan is a small tree of scan and filter nodes; `start` turns it into
//! an executor tree that yields one record per `next` call. Scan bounds
//! and filters are typed predicate objects, which keeps plans inspectable
//! through `explain`.

pub mod parser;

use tracing::debug;

use crate::btree::{BTree, SearchMode};
use crate::buffer::BufferPoolManager;
use crate::disk::PageId;
use crate::errors::Error;
use crate::tuple;

/// A decoded record: one byte string per column.
pub type Tuple = Vec<Vec<u8>>;

/// Where a scan starts, in decoded-column terms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TupleSearchMode {
    Start,
    Key(Vec<Vec<u8>>),
}

impl TupleSearchMode {
    fn to_search_mode(&self) -> SearchMode {
        match self {
            TupleSearchMode::Start => SearchMode::Start,
            TupleSearchMode::Key(elems) => {
                let mut key = Vec::new();
                tuple::encode(elems.iter().map(|e| e.as_slice()), &mut key);
                SearchMode::Key(key)
            }
        }
    }
}

/// Byte-wise comparison operators of the query language.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
}

impl Op {
    /// Maps a `$`-prefixed operator name; equality has no name, it is
    /// expressed by a bare literal in the query.
    fn parse(name: &str) -> Option<Op> {
        match name {
            "$ne" => Some(Op::Ne),
            "$lt" => Some(Op::Lt),
            "$lte" => Some(Op::Lte),
            "$gt" => Some(Op::Gt),
            "$gte" => Some(Op::Gte),
            _ => None,
        }
    }

    fn matches(self, left: &[u8], right: &[u8]) -> bool {
        match self {
            Op::Eq => left == right,
            Op::Ne => left != right,
            Op::Lt => left < right,
            Op::Lte => left <= right,
            Op::Gt => left > right,
            Op::Gte => left >= right,
        }
    }
}

/// One `column <op> literal` check against a decoded tuple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnCond {
    pub column: usize,
    pub op: Op,
    pub value: Vec<u8>,
}

impl ColumnCond {
    fn matches(&self, tuple: &[Vec<u8>]) -> bool {
        self.op.matches(&tuple[self.column], &self.value)
    }
}

/// Conjunction of column checks; empty means "always true".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Condition(pub Vec<ColumnCond>);

impl Condition {
    pub fn always() -> Condition {
        Condition(Vec::new())
    }

    pub fn single(column: usize, op: Op, value: Vec<u8>) -> Condition {
        Condition(vec![ColumnCond { column, op, value }])
    }

    fn matches(&self, tuple: &[Vec<u8>]) -> bool {
        self.0.iter().all(|cond| cond.matches(tuple))
    }
}

pub enum PlanNode {
    SeqScan(SeqScan),
    IndexScan(IndexScan),
    IndexOnlyScan(IndexOnlyScan),
    Filter(Filter),
}

/// Scans the clustered table tree. `while_cond` is evaluated against the
/// decoded primary-key columns and stops the scan on its first miss.
pub struct SeqScan {
    pub table_meta_page_id: PageId,
    pub search_mode: TupleSearchMode,
    pub while_cond: Condition,
}

/// Scans a unique-index tree and fetches each record from the table tree
/// by primary key. `while_cond` sees the decoded secondary-key columns.
pub struct IndexScan {
    pub table_meta_page_id: PageId,
    pub index_meta_page_id: PageId,
    pub search_mode: TupleSearchMode,
    pub while_cond: Condition,
}

/// Like `IndexScan` but answers from the index alone: yields the decoded
/// primary-key columns without touching the table tree.
pub struct IndexOnlyScan {
    pub index_meta_page_id: PageId,
    pub search_mode: TupleSearchMode,
    pub while_cond: Condition,
}

/// Re-emits the inner node's records that satisfy `cond`.
pub struct Filter {
    pub inner_plan: Box<PlanNode>,
    pub cond: Condition,
}

impl PlanNode {
    pub fn start(&self, bufmgr: &mut BufferPoolManager) -> Result<Executor, Error> {
        debug!(plan = ?self.explain(), "starting plan");
        match self {
            PlanNode::SeqScan(plan) => {
                let tree = BTree::new(plan.table_meta_page_id);
                let table_iter = tree.search(bufmgr, &plan.search_mode.to_search_mode())?;
                Ok(Executor::SeqScan(ExecSeqScan {
                    table_iter,
                    while_cond: plan.while_cond.clone(),
                }))
            }
            PlanNode::IndexScan(plan) => {
                let index_tree = BTree::new(plan.index_meta_page_id);
                let index_iter = index_tree.search(bufmgr, &plan.search_mode.to_search_mode())?;
                Ok(Executor::IndexScan(ExecIndexScan {
                    table_tree: BTree::new(plan.table_meta_page_id),
                    index_iter,
                    while_cond: plan.while_cond.clone(),
                }))
            }
            PlanNode::IndexOnlyScan(plan) => {
                let index_tree = BTree::new(plan.index_meta_page_id);
                let index_iter = index_tree.search(bufmgr, &plan.search_mode.to_search_mode())?;
                Ok(Executor::IndexOnlyScan(ExecIndexOnlyScan {
                    index_iter,
                    while_cond: plan.while_cond.clone(),
                }))
            }
            PlanNode::Filter(plan) => {
                let inner_iter = plan.inner_plan.start(bufmgr)?;
                Ok(Executor::Filter(ExecFilter {
                    inner_iter: Box::new(inner_iter),
                    cond: plan.cond.clone(),
                }))
            }
        }
    }

    /// Node-type names, outermost first.
    pub fn explain(&self) -> Vec<String> {
        match self {
            PlanNode::SeqScan(_) => vec!["SeqScan".to_string()],
            PlanNode::IndexScan(_) => vec!["IndexScan".to_string()],
            PlanNode::IndexOnlyScan(_) => vec!["IndexOnlyScan".to_string()],
            PlanNode::Filter(plan) => {
                let mut ret = vec!["Filter".to_string()];
                ret.extend(plan.inner_plan.explain());
                ret
            }
        }
    }
}

/// A started plan. Dropping an executor releases every page it pins.
pub enum Executor {
    SeqScan(ExecSeqScan),
    IndexScan(ExecIndexScan),
    IndexOnlyScan(ExecIndexOnlyScan),
    Filter(ExecFilter),
}

impl Executor {
    /// The next record, or `EndOfIterator` once the scan is exhausted.
    pub fn next(&mut self, bufmgr: &mut BufferPoolManager) -> Result<Tuple, Error> {
        match self {
            Executor::SeqScan(exec) => exec.next(bufmgr),
            Executor::IndexScan(exec) => exec.next(bufmgr),
            Executor::IndexOnlyScan(exec) => exec.next(bufmgr),
            Executor::Filter(exec) => exec.next(bufmgr),
        }
    }
}

pub struct ExecSeqScan {
    table_iter: crate::btree::Iter,
    while_cond: Condition,
}

impl ExecSeqScan {
    fn next(&mut self, bufmgr: &mut BufferPoolManager) -> Result<Tuple, Error> {
        let (pkey_bytes, tuple_bytes) = self.table_iter.next(bufmgr)?;
        let mut record = Vec::new();
        tuple::decode(&pkey_bytes, &mut record);
        if !self.while_cond.matches(&record) {
            return Err(Error::EndOfIterator);
        }
        tuple::decode(&tuple_bytes, &mut record);
        Ok(record)
    }
}

pub struct ExecIndexScan {
    table_tree: BTree,
    index_iter: crate::btree::Iter,
    while_cond: Condition,
}

impl ExecIndexScan {
    fn next(&mut self, bufmgr: &mut BufferPoolManager) -> Result<Tuple, Error> {
        let (skey_bytes, pkey_bytes) = self.index_iter.next(bufmgr)?;
        let mut skey = Vec::new();
        tuple::decode(&skey_bytes, &mut skey);
        if !self.while_cond.matches(&skey) {
            return Err(Error::EndOfIterator);
        }

        // Point lookup of the record; the leaf pin is dropped right after.
        let mut table_iter = self
            .table_tree
            .search(bufmgr, &SearchMode::Key(pkey_bytes))?;
        let (pkey_bytes, tuple_bytes) = match table_iter.next(bufmgr) {
            Err(Error::EndOfIterator) => panic!("unique index points at a missing record"),
            other => other?,
        };
        let mut record = Vec::new();
        tuple::decode(&pkey_bytes, &mut record);
        tuple::decode(&tuple_bytes, &mut record);
        Ok(record)
    }
}

pub struct ExecIndexOnlyScan {
    index_iter: crate::btree::Iter,
    while_cond: Condition,
}

impl ExecIndexOnlyScan {
    fn next(&mut self, bufmgr: &mut BufferPoolManager) -> Result<Tuple, Error> {
        let (skey_bytes, pkey_bytes) = self.index_iter.next(bufmgr)?;
        let mut skey = Vec::new();
        tuple::decode(&skey_bytes, &mut skey);
        if !self.while_cond.matches(&skey) {
            return Err(Error::EndOfIterator);
        }

        let mut record = Vec::new();
        tuple::decode(&pkey_bytes, &mut record);
        Ok(record)
    }
}

pub struct ExecFilter {
    inner_iter: Box<Executor>,
    cond: Condition,
}

impl ExecFilter {
    fn next(&mut self, bufmgr: &mut BufferPoolManager) -> Result<Tuple, Error> {
        loop {
            let record = self.inner_iter.next(bufmgr)?;
            if self.cond.matches(&record) {
                return Ok(record);
            }
        }
    }
}
