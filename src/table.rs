//! Tables and unique secondary indexes.
//!
//! A table is a clustered B+Tree: the key is the memcomparable encoding of
//! the first `num_key_elems` columns, the value the encoding of the rest.
//! Each unique index is its own B+Tree mapping the encoded indexed columns
//! to the encoded primary key. The table schema is persisted as a bincode
//! blob in the primary tree's meta-page app area.

use bincode::{config, Decode, Encode};
use tracing::{debug, info};

use crate::btree::BTree;
use crate::buffer::BufferPoolManager;
use crate::disk::PageId;
use crate::errors::Error;
use crate::tuple;

const META_CURRENT_VERSION: u32 = 1;

pub struct Table {
    pub meta_page_id: PageId,
    pub num_cols: usize,
    pub num_key_elems: usize,
    pub col_names: Vec<String>,
    pub unique_indices: Vec<UniqueIndex>,
}

impl Table {
    /// Creates the primary tree, then every index tree, then persists the
    /// schema blob. Allocation order pins down the page-id convention the
    /// query parser relies on: table meta at page 0, root at page 1, index
    /// `i` meta at page `(i + 1) * 2`.
    pub fn create(&mut self, bufmgr: &mut BufferPoolManager) -> Result<(), Error> {
        let tree = BTree::create(bufmgr)?;
        self.meta_page_id = tree.meta_page_id;
        for unique_index in self.unique_indices.iter_mut() {
            unique_index.create(bufmgr)?;
        }

        let mut meta = TableMeta::new(self.num_cols, self.num_key_elems, self.col_names.clone());
        for unique_index in &self.unique_indices {
            meta.add_unique_index(&unique_index.skey);
        }
        tree.write_meta_app_area(bufmgr, &meta.to_bytes())?;
        info!(
            meta_page_id = self.meta_page_id.to_u64(),
            num_indices = self.unique_indices.len(),
            "table created"
        );
        Ok(())
    }

    /// Inserts a record into the primary tree and every unique index.
    pub fn insert(&self, bufmgr: &mut BufferPoolManager, record: &[&[u8]]) -> Result<(), Error> {
        let tree = BTree::new(self.meta_page_id);
        let mut key = Vec::new();
        tuple::encode(record[..self.num_key_elems].iter().copied(), &mut key);
        let mut value = Vec::new();
        tuple::encode(record[self.num_key_elems..].iter().copied(), &mut value);
        tree.insert(bufmgr, &key, &value)?;
        for unique_index in &self.unique_indices {
            unique_index.insert(bufmgr, &key, record)?;
        }
        Ok(())
    }
}

/// A clustered table without secondary indexes or a persisted schema.
/// Handy for scratch data sets and tests; real tables use [`Table`].
pub struct SimpleTable {
    pub meta_page_id: PageId,
    pub num_key_elems: usize,
}

impl SimpleTable {
    pub fn create(&mut self, bufmgr: &mut BufferPoolManager) -> Result<(), Error> {
        let tree = BTree::create(bufmgr)?;
        self.meta_page_id = tree.meta_page_id;
        Ok(())
    }

    pub fn insert(&self, bufmgr: &mut BufferPoolManager, record: &[&[u8]]) -> Result<(), Error> {
        let tree = BTree::new(self.meta_page_id);
        let mut key = Vec::new();
        tuple::encode(record[..self.num_key_elems].iter().copied(), &mut key);
        let mut value = Vec::new();
        tuple::encode(record[self.num_key_elems..].iter().copied(), &mut value);
        tree.insert(bufmgr, &key, &value)?;
        Ok(())
    }
}

pub struct UniqueIndex {
    pub meta_page_id: PageId,
    /// Positions of the indexed columns within a record.
    pub skey: Vec<usize>,
}

impl UniqueIndex {
    pub fn create(&mut self, bufmgr: &mut BufferPoolManager) -> Result<(), Error> {
        let tree = BTree::create(bufmgr)?;
        self.meta_page_id = tree.meta_page_id;
        Ok(())
    }

    pub fn insert(
        &self,
        bufmgr: &mut BufferPoolManager,
        pkey: &[u8],
        record: &[&[u8]],
    ) -> Result<(), Error> {
        let tree = BTree::new(self.meta_page_id);
        let mut skey = Vec::new();
        tuple::encode(self.skey.iter().map(|&col| record[col]), &mut skey);
        debug!(
            index_meta_page_id = self.meta_page_id.to_u64(),
            "index insert"
        );
        tree.insert(bufmgr, &skey, pkey)?;
        Ok(())
    }
}

/// The schema blob stored in the primary tree's meta page. Unique indexes
/// are encoded as comma-joined column-position strings.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct TableMeta {
    pub version: u32,
    pub num_cols: u32,
    pub num_key_elems: u32,
    pub col_names: Vec<String>,
    pub unique_indices: Vec<String>,
}

impl TableMeta {
    pub fn new(num_cols: usize, num_key_elems: usize, col_names: Vec<String>) -> TableMeta {
        TableMeta {
            version: META_CURRENT_VERSION,
            num_cols: num_cols as u32,
            num_key_elems: num_key_elems as u32,
            col_names,
            unique_indices: Vec::new(),
        }
    }

    pub fn add_unique_index(&mut self, cols: &[usize]) {
        let joined = cols
            .iter()
            .map(|col| col.to_string())
            .collect::<Vec<_>>()
            .join(",");
        self.unique_indices.push(joined);
    }

    /// The column-position lists of every unique index, in creation order.
    pub fn unique_indices(&self) -> Vec<Vec<usize>> {
        self.unique_indices
            .iter()
            .map(|joined| {
                joined
                    .split(',')
                    .map(|col| col.parse().expect("corrupt schema blob"))
                    .collect()
            })
            .collect()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        bincode::encode_to_vec(self, config::standard()).expect("schema encoding cannot fail")
    }

    /// Panics on malformed input: the app area is written exclusively by
    /// `to_bytes` at table-creation time.
    pub fn from_bytes(buf: &[u8]) -> TableMeta {
        let (meta, _) =
            bincode::decode_from_slice(buf, config::standard()).expect("corrupt schema blob");
        meta
    }
}
