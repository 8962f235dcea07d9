//! Lowers a JSON condition object `{ column: predicate }` to a plan tree.
//!
//! The first strategy that applies wins: a primary-key predicate becomes a
//! bounded `SeqScan`, a unique-index predicate becomes an `IndexScan`, and
//! everything else falls back to a full `SeqScan`. Predicates not consumed
//! by the chosen scan are wrapped into one `Filter` above it.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use tracing::debug;

use crate::btree::BTree;
use crate::buffer::BufferPoolManager;
use crate::disk::PageId;
use crate::errors::Error;
use crate::table::TableMeta;

use super::{
    ColumnCond, Condition, Filter, IndexScan, Op, PlanNode, SeqScan, TupleSearchMode,
};

static NUMERIC_COLUMN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+$").unwrap());

pub struct Parser {
    meta: TableMeta,
}

impl Parser {
    /// Loads the schema blob persisted in the table's meta page (page 0).
    pub fn new(bufmgr: &mut BufferPoolManager) -> Result<Parser, Error> {
        let tree = BTree::new(PageId(0));
        let buf = tree.read_meta_app_area(bufmgr)?;
        let meta = TableMeta::from_bytes(&buf);
        Ok(Parser { meta })
    }

    pub fn parse(&self, query: &str) -> Result<PlanNode, Error> {
        let decoded: Value = serde_json::from_str(query).map_err(|_| Error::JsonParse)?;
        let mut where_ = match decoded {
            Value::Object(map) => map,
            _ => return Err(Error::InvalidCondition),
        };
        self.revert_col_names(&mut where_);

        let scan = self.build_scan_node(&mut where_)?;
        let plan = self.build_filter(&where_, scan)?;
        debug!(plan = ?plan.explain(), "query lowered");
        Ok(plan)
    }

    /// Rewrites known column names to their positions. Unknown names are
    /// left alone and rejected later by the filter builder.
    fn revert_col_names(&self, where_: &mut Map<String, Value>) {
        let named: Vec<String> = where_
            .keys()
            .filter(|key| !NUMERIC_COLUMN.is_match(key))
            .cloned()
            .collect();
        for name in named {
            if let Some(col) = self.meta.col_names.iter().position(|n| n == &name) {
                let cond = where_.remove(&name).expect("key collected from this map");
                where_.insert(col.to_string(), cond);
            }
        }
    }

    fn build_scan_node(&self, where_: &mut Map<String, Value>) -> Result<PlanNode, Error> {
        // Primary key first.
        let scan = if self.meta.num_key_elems == 1 {
            self.build_single_pkey_scan(where_)?
        } else {
            self.build_composite_pkey_scan(where_)?
        };
        if let Some(scan) = scan {
            return Ok(scan);
        }

        // Then each unique index, in creation order.
        for (index_no, unique_index) in self.meta.unique_indices().iter().enumerate() {
            let scan = if unique_index.len() == 1 {
                self.build_single_skey_scan(where_, index_no, unique_index)?
            } else {
                self.build_composite_skey_scan(where_, index_no, unique_index)?
            };
            if let Some(scan) = scan {
                return Ok(scan);
            }
        }

        // No key predicate matched: scan everything.
        Ok(PlanNode::SeqScan(SeqScan {
            table_meta_page_id: PageId(0),
            search_mode: TupleSearchMode::Start,
            while_cond: Condition::always(),
        }))
    }

    fn build_single_pkey_scan(
        &self,
        where_: &mut Map<String, Value>,
    ) -> Result<Option<PlanNode>, Error> {
        let pkey = "0";
        let cond = match where_.get(pkey) {
            Some(cond) => cond.clone(),
            None => return Ok(None),
        };
        let scan = match cond {
            Value::String(value) => {
                let (search_mode, while_cond) = make_equal_cond_with_single_key(&value);
                // Fully answered by the scan bound, no residual filter.
                where_.remove(pkey);
                PlanNode::SeqScan(SeqScan {
                    table_meta_page_id: PageId(0),
                    search_mode,
                    while_cond,
                })
            }
            Value::Object(exprs) => {
                let (search_mode, while_cond) = make_range_cond_with_single_key(&exprs)?;
                PlanNode::SeqScan(SeqScan {
                    table_meta_page_id: PageId(0),
                    search_mode,
                    while_cond,
                })
            }
            _ => return Err(Error::InvalidCondition),
        };
        Ok(Some(scan))
    }

    fn build_composite_pkey_scan(
        &self,
        where_: &mut Map<String, Value>,
    ) -> Result<Option<PlanNode>, Error> {
        let index: Vec<usize> = (0..self.meta.num_key_elems as usize).collect();
        let conds = make_cond_with_composite_key(&index, where_);
        let (search_mode, while_cond) = match conds {
            Some(conds) => conds,
            None => return Ok(None),
        };
        for pkey in index {
            where_.remove(&pkey.to_string());
        }
        Ok(Some(PlanNode::SeqScan(SeqScan {
            table_meta_page_id: PageId(0),
            search_mode,
            while_cond,
        })))
    }

    fn build_single_skey_scan(
        &self,
        where_: &mut Map<String, Value>,
        index_no: usize,
        unique_index: &[usize],
    ) -> Result<Option<PlanNode>, Error> {
        let skey = unique_index[0].to_string();
        let cond = match where_.get(&skey) {
            Some(cond) => cond.clone(),
            None => return Ok(None),
        };
        let index_meta_page_id = index_meta_page_id(index_no);
        let scan = match cond {
            Value::String(value) => {
                let (search_mode, while_cond) = make_equal_cond_with_single_key(&value);
                where_.remove(&skey);
                PlanNode::IndexScan(IndexScan {
                    table_meta_page_id: PageId(0),
                    index_meta_page_id,
                    search_mode,
                    while_cond,
                })
            }
            Value::Object(exprs) => {
                let (search_mode, while_cond) = make_range_cond_with_single_key(&exprs)?;
                PlanNode::IndexScan(IndexScan {
                    table_meta_page_id: PageId(0),
                    index_meta_page_id,
                    search_mode,
                    while_cond,
                })
            }
            _ => return Err(Error::InvalidCondition),
        };
        Ok(Some(scan))
    }

    fn build_composite_skey_scan(
        &self,
        where_: &mut Map<String, Value>,
        index_no: usize,
        unique_index: &[usize],
    ) -> Result<Option<PlanNode>, Error> {
        let conds = make_cond_with_composite_key(unique_index, where_);
        let (search_mode, while_cond) = match conds {
            Some(conds) => conds,
            None => return Ok(None),
        };
        for skey in unique_index {
            where_.remove(&skey.to_string());
        }
        Ok(Some(PlanNode::IndexScan(IndexScan {
            table_meta_page_id: PageId(0),
            index_meta_page_id: index_meta_page_id(index_no),
            search_mode,
            while_cond,
        })))
    }

    /// Turns every predicate the scan did not consume into one conjunctive
    /// filter above it. Columns must resolve to valid positions here.
    fn build_filter(
        &self,
        where_: &Map<String, Value>,
        scan: PlanNode,
    ) -> Result<PlanNode, Error> {
        let mut conds = Vec::new();
        for (key, value) in where_ {
            let col: usize = key.parse().map_err(|_| Error::InvalidCondition)?;
            if col >= self.meta.num_cols as usize {
                return Err(Error::InvalidCondition);
            }
            match value {
                Value::String(v) => conds.push(ColumnCond {
                    column: col,
                    op: Op::Eq,
                    value: v.as_bytes().to_vec(),
                }),
                Value::Object(exprs) => {
                    for (op_name, right) in exprs {
                        let op = Op::parse(op_name).ok_or(Error::InvalidCondition)?;
                        let right = string_operand(right)?;
                        conds.push(ColumnCond {
                            column: col,
                            op,
                            value: right,
                        });
                    }
                }
                _ => return Err(Error::InvalidCondition),
            }
        }
        if conds.is_empty() {
            return Ok(scan);
        }
        Ok(PlanNode::Filter(Filter {
            inner_plan: Box::new(scan),
            cond: Condition(conds),
        }))
    }
}

/// Page-id convention set by `Table::create`: index `i` allocates its meta
/// page right after the previous tree's two pages.
fn index_meta_page_id(index_no: usize) -> PageId {
    PageId(((index_no + 1) * 2) as u64)
}

fn string_operand(value: &Value) -> Result<Vec<u8>, Error> {
    match value {
        Value::String(s) => Ok(s.as_bytes().to_vec()),
        _ => Err(Error::InvalidCondition),
    }
}

fn make_equal_cond_with_single_key(value: &str) -> (TupleSearchMode, Condition) {
    let search_mode = TupleSearchMode::Key(vec![value.as_bytes().to_vec()]);
    let while_cond = Condition::single(0, Op::Eq, value.as_bytes().to_vec());
    (search_mode, while_cond)
}

/// Lowers an operator object on a single key column to a scan start bound
/// and an upper-bound while-condition. The bounds are conservative (widest
/// lower bound, widest upper bound); the residual filter restores exact
/// semantics.
fn make_range_cond_with_single_key(
    exprs: &Map<String, Value>,
) -> Result<(TupleSearchMode, Condition), Error> {
    let mut search_key_begin: Option<Vec<u8>> = None;
    let mut search_key_end: Option<Vec<u8>> = None;

    for (op_name, right) in exprs {
        let op = Op::parse(op_name).ok_or(Error::InvalidCondition)?;
        let right = string_operand(right)?;
        match op {
            Op::Gt | Op::Gte => {
                if search_key_begin.as_ref().map_or(true, |begin| begin > &right) {
                    search_key_begin = Some(right);
                }
            }
            Op::Lt | Op::Lte => {
                if search_key_end.as_ref().map_or(true, |end| end < &right) {
                    search_key_end = Some(right);
                }
            }
            _ => {}
        }
    }

    let search_mode = match search_key_begin {
        None => TupleSearchMode::Start,
        Some(begin) => TupleSearchMode::Key(vec![begin]),
    };
    let while_cond = match search_key_end {
        None => Condition::always(),
        Some(end) => Condition::single(0, Op::Lte, end),
    };
    Ok((search_mode, while_cond))
}

/// Collects full-equality predicates over every column of a composite key.
/// Returns `None` unless all of them are present as plain strings.
fn make_cond_with_composite_key(
    index: &[usize],
    where_: &Map<String, Value>,
) -> Option<(TupleSearchMode, Condition)> {
    let mut search_keys = Vec::new();
    let mut conds = Vec::new();
    for (i, skey) in index.iter().enumerate() {
        let value = match where_.get(&skey.to_string()) {
            Some(value) => value,
            None => break,
        };
        if let Value::String(v) = value {
            search_keys.push(v.as_bytes().to_vec());
            conds.push(ColumnCond {
                column: i,
                op: Op::Eq,
                value: v.as_bytes().to_vec(),
            });
        }
    }
    if search_keys.len() != index.len() {
        return None;
    }
    Some((TupleSearchMode::Key(search_keys), Condition(conds)))
}
