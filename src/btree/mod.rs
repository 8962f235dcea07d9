//! Disk-backed B+Tree over buffer-pool pages.
//!
//! The tree is addressed by its meta page id; the meta page tracks the
//! current root, so a root split only ever rewrites the meta header.
//! Leaves form a doubly-linked chain in ascending key order.

pub mod branch;
pub mod leaf;
pub mod meta;
pub mod node;
pub mod pair;
pub mod slotted;

use std::rc::Rc;

use tracing::debug;

use crate::buffer::{Buffer, BufferPoolManager};
use crate::disk::PageId;
use crate::errors::Error;

use branch::Branch;
use leaf::Leaf;
use meta::Meta;
use node::NodeType;

/// Where a search starts: at the first pair of the whole tree, or at the
/// first pair whose key is `>=` the given one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchMode {
    Start,
    Key(Vec<u8>),
}

impl SearchMode {
    fn child_page_id<B: AsRef<[u8]>>(&self, branch: &Branch<B>) -> PageId {
        match self {
            SearchMode::Start => branch.child_at(0),
            SearchMode::Key(key) => branch.search_child(key),
        }
    }

    fn tuple_slot_id<B: AsRef<[u8]>>(&self, leaf: &Leaf<B>) -> usize {
        match self {
            SearchMode::Start => 0,
            SearchMode::Key(key) => match leaf.search_slot_id(key) {
                Ok(slot_id) | Err(slot_id) => slot_id,
            },
        }
    }
}

pub struct BTree {
    pub meta_page_id: PageId,
}

impl BTree {
    /// Allocates a meta page and an empty leaf as the initial root.
    pub fn create(bufmgr: &mut BufferPoolManager) -> Result<BTree, Error> {
        let meta_buffer = bufmgr.create_page()?;
        let root_buffer = bufmgr.create_page()?;
        {
            let mut root_page = root_buffer.page.borrow_mut();
            let mut root = Leaf::new(&mut root_page[..]);
            root.initialize();
        }
        {
            let mut meta_page = meta_buffer.page.borrow_mut();
            let mut meta = Meta::new(&mut meta_page[..]);
            meta.set_root_page_id(root_buffer.page_id);
        }
        Ok(BTree::new(meta_buffer.page_id))
    }

    pub fn new(meta_page_id: PageId) -> BTree {
        BTree { meta_page_id }
    }

    /// Copies the meta page's application-reserved bytes.
    pub fn read_meta_app_area(&self, bufmgr: &mut BufferPoolManager) -> Result<Vec<u8>, Error> {
        let meta_buffer = bufmgr.fetch_page(self.meta_page_id)?;
        let meta_page = meta_buffer.page.borrow();
        let meta = Meta::new(&meta_page[..]);
        Ok(meta.app_area().to_vec())
    }

    /// Stores `data` in the meta page's application-reserved bytes.
    pub fn write_meta_app_area(
        &self,
        bufmgr: &mut BufferPoolManager,
        data: &[u8],
    ) -> Result<(), Error> {
        let meta_buffer = bufmgr.fetch_page(self.meta_page_id)?;
        let mut meta_page = meta_buffer.page.borrow_mut();
        let mut meta = Meta::new(&mut meta_page[..]);
        let app_area = meta.app_area_mut();
        if app_area.len() < data.len() {
            return Err(Error::TooLongData);
        }
        app_area[..data.len()].copy_from_slice(data);
        meta_buffer.is_dirty.set(true);
        Ok(())
    }

    fn fetch_root_page(&self, bufmgr: &mut BufferPoolManager) -> Result<Rc<Buffer>, Error> {
        let root_page_id = {
            let meta_buffer = bufmgr.fetch_page(self.meta_page_id)?;
            let meta_page = meta_buffer.page.borrow();
            Meta::new(&meta_page[..]).root_page_id()
        };
        bufmgr.fetch_page(root_page_id)
    }

    /// Descends to a leaf and returns an iterator positioned according to
    /// `search_mode`. The iterator keeps that leaf pinned until dropped.
    pub fn search(
        &self,
        bufmgr: &mut BufferPoolManager,
        search_mode: &SearchMode,
    ) -> Result<Iter, Error> {
        let root_buffer = self.fetch_root_page(bufmgr)?;
        Self::search_internal(bufmgr, root_buffer, search_mode)
    }

    fn search_internal(
        bufmgr: &mut BufferPoolManager,
        node_buffer: Rc<Buffer>,
        search_mode: &SearchMode,
    ) -> Result<Iter, Error> {
        let page = node_buffer.page.borrow();
        match NodeType::of(&page[..]) {
            NodeType::Leaf => {
                let leaf = Leaf::new(&page[..]);
                let slot_id = search_mode.tuple_slot_id(&leaf);
                drop(page);
                Ok(Iter {
                    buffer: Some(node_buffer),
                    slot_id,
                })
            }
            NodeType::Branch => {
                let child_page_id = {
                    let branch = Branch::new(&page[..]);
                    search_mode.child_page_id(&branch)
                };
                drop(page);
                drop(node_buffer);
                let child_buffer = bufmgr.fetch_page(child_page_id)?;
                Self::search_internal(bufmgr, child_buffer, search_mode)
            }
        }
    }

    /// Inserts a pair. Keys are unique: inserting an existing key fails
    /// with `DuplicateKey`. Splits propagate bottom-up; when the root
    /// itself overflows, a new branch root is installed via the meta page.
    pub fn insert(
        &self,
        bufmgr: &mut BufferPoolManager,
        key: &[u8],
        value: &[u8],
    ) -> Result<(), Error> {
        let meta_buffer = bufmgr.fetch_page(self.meta_page_id)?;
        let root_page_id = {
            let meta_page = meta_buffer.page.borrow();
            Meta::new(&meta_page[..]).root_page_id()
        };
        let root_buffer = bufmgr.fetch_page(root_page_id)?;
        if let Some((up_key, up_child_page_id)) =
            Self::insert_internal(bufmgr, &root_buffer, key, value)?
        {
            debug!(
                new_root_child = up_child_page_id.to_u64(),
                "root split, growing tree"
            );
            let new_root_buffer = bufmgr.create_page()?;
            {
                let mut new_root_page = new_root_buffer.page.borrow_mut();
                let mut branch = Branch::new(&mut new_root_page[..]);
                branch.initialize(&up_key, up_child_page_id, root_page_id);
            }
            let mut meta_page = meta_buffer.page.borrow_mut();
            let mut meta = Meta::new(&mut meta_page[..]);
            meta.set_root_page_id(new_root_buffer.page_id);
            meta_buffer.is_dirty.set(true);
        }
        Ok(())
    }

    /// Returns `Some((separator, new_page_id))` when this subtree split
    /// and the parent has to absorb a new child.
    fn insert_internal(
        bufmgr: &mut BufferPoolManager,
        buffer: &Rc<Buffer>,
        key: &[u8],
        value: &[u8],
    ) -> Result<Option<(Vec<u8>, PageId)>, Error> {
        let mut page = buffer.page.borrow_mut();
        match NodeType::of(&page[..]) {
            NodeType::Leaf => {
                let mut leaf = Leaf::new(&mut page[..]);
                let slot_id = match leaf.search_slot_id(key) {
                    Ok(_) => return Err(Error::DuplicateKey),
                    Err(slot_id) => slot_id,
                };
                match leaf.insert(slot_id, key, value) {
                    Ok(()) => {
                        buffer.is_dirty.set(true);
                        Ok(None)
                    }
                    Err(Error::NoSpace) => {
                        // Split: the new leaf is stitched into the chain
                        // before this one and takes the smaller keys.
                        let prev_page_id = leaf.prev_page_id();
                        let new_leaf_buffer = bufmgr.create_page()?;
                        if let Some(prev_page_id) = prev_page_id {
                            let prev_leaf_buffer = bufmgr.fetch_page(prev_page_id)?;
                            let mut prev_page = prev_leaf_buffer.page.borrow_mut();
                            let mut prev_leaf = Leaf::new(&mut prev_page[..]);
                            prev_leaf.set_next_page_id(new_leaf_buffer.page_id);
                            prev_leaf_buffer.is_dirty.set(true);
                        }
                        leaf.set_prev_page_id(new_leaf_buffer.page_id);

                        let mut new_page = new_leaf_buffer.page.borrow_mut();
                        let mut new_leaf = Leaf::new(&mut new_page[..]);
                        let overflow_key = leaf.split_insert(&mut new_leaf, key, value);
                        new_leaf.set_next_page_id(buffer.page_id);
                        new_leaf.set_prev_page_id(prev_page_id.unwrap_or(PageId::INVALID));
                        buffer.is_dirty.set(true);
                        debug!(
                            leaf = buffer.page_id.to_u64(),
                            new_leaf = new_leaf_buffer.page_id.to_u64(),
                            "leaf split"
                        );
                        Ok(Some((overflow_key, new_leaf_buffer.page_id)))
                    }
                    Err(err) => Err(err),
                }
            }
            NodeType::Branch => {
                let (child_idx, child_page_id) = {
                    let branch = Branch::new(&page[..]);
                    let child_idx = branch.search_child_idx(key);
                    (child_idx, branch.child_at(child_idx))
                };
                let child_buffer = bufmgr.fetch_page(child_page_id)?;
                let overflow = Self::insert_internal(bufmgr, &child_buffer, key, value)?;
                drop(child_buffer);
                if let Some((up_key, up_child_page_id)) = overflow {
                    let mut branch = Branch::new(&mut page[..]);
                    match branch.insert(child_idx, &up_key, up_child_page_id) {
                        Ok(()) => {
                            buffer.is_dirty.set(true);
                            Ok(None)
                        }
                        Err(Error::NoSpace) => {
                            let new_branch_buffer = bufmgr.create_page()?;
                            let mut new_page = new_branch_buffer.page.borrow_mut();
                            let mut new_branch = Branch::new(&mut new_page[..]);
                            let promoted_key =
                                branch.split_insert(&mut new_branch, &up_key, up_child_page_id);
                            buffer.is_dirty.set(true);
                            new_branch_buffer.is_dirty.set(true);
                            debug!(
                                branch = buffer.page_id.to_u64(),
                                new_branch = new_branch_buffer.page_id.to_u64(),
                                "branch split"
                            );
                            Ok(Some((promoted_key, new_branch_buffer.page_id)))
                        }
                        Err(err) => Err(err),
                    }
                } else {
                    Ok(None)
                }
            }
        }
    }
}

/// Cursor over the leaf chain. Holds one leaf pinned; dropping the
/// iterator releases the pin.
pub struct Iter {
    buffer: Option<Rc<Buffer>>,
    slot_id: usize,
}

impl Iter {
    fn buffer(&self) -> &Rc<Buffer> {
        self.buffer
            .as_ref()
            .expect("iterator used after a failed advance")
    }

    /// The pair under the cursor, or `EndOfIterator` past the last slot.
    pub fn get(&self) -> Result<(Vec<u8>, Vec<u8>), Error> {
        let page = self.buffer().page.borrow();
        let leaf = Leaf::new(&page[..]);
        if self.slot_id < leaf.num_pairs() {
            let pair = leaf.pair_at(self.slot_id);
            Ok((pair.key, pair.value))
        } else {
            Err(Error::EndOfIterator)
        }
    }

    /// Returns the current pair and advances, hopping to the next leaf in
    /// the chain when this one is exhausted.
    pub fn next(&mut self, bufmgr: &mut BufferPoolManager) -> Result<(Vec<u8>, Vec<u8>), Error> {
        let pair = self.get()?;
        self.slot_id += 1;
        let next_page_id = {
            let page = self.buffer().page.borrow();
            let leaf = Leaf::new(&page[..]);
            if self.slot_id < leaf.num_pairs() {
                return Ok(pair);
            }
            leaf.next_page_id()
        };
        if let Some(next_page_id) = next_page_id {
            // Release the exhausted leaf before pinning its successor.
            self.buffer = None;
            self.buffer = Some(bufmgr.fetch_page(next_page_id)?);
            self.slot_id = 0;
        }
        Ok(pair)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferPool;
    use crate::disk::DiskManager;

    fn make_manager(pool_size: usize) -> BufferPoolManager {
        let file = tempfile::tempfile().unwrap();
        let disk = DiskManager::new(file).unwrap();
        BufferPoolManager::new(disk, BufferPool::new(pool_size))
    }

    fn key(n: u64) -> [u8; 8] {
        n.to_be_bytes()
    }

    #[test]
    fn test_search() {
        let mut bufmgr = make_manager(10);
        let btree = BTree::create(&mut bufmgr).unwrap();

        btree.insert(&mut bufmgr, &key(6), b"world").unwrap();
        btree.insert(&mut bufmgr, &key(3), b"hello").unwrap();
        btree.insert(&mut bufmgr, &key(8), b"!").unwrap();
        btree.insert(&mut bufmgr, &key(4), b",").unwrap();

        let iter = btree
            .search(&mut bufmgr, &SearchMode::Key(key(3).to_vec()))
            .unwrap();
        let (_, value) = iter.get().unwrap();
        assert_eq!(b"hello".to_vec(), value);

        let iter = btree
            .search(&mut bufmgr, &SearchMode::Key(key(8).to_vec()))
            .unwrap();
        let (_, value) = iter.get().unwrap();
        assert_eq!(b"!".to_vec(), value);
    }

    #[test]
    fn test_split() {
        let mut bufmgr = make_manager(5);
        let btree = BTree::create(&mut bufmgr).unwrap();

        let long_data_list = [
            vec![0xC0u8; 1000],
            vec![0x01u8; 1000],
            vec![0xCAu8; 1000],
            vec![0xFEu8; 1000],
            vec![0xDEu8; 1000],
            vec![0xADu8; 1000],
            vec![0xBEu8; 1000],
            vec![0xAEu8; 1000],
        ];
        for data in &long_data_list {
            btree.insert(&mut bufmgr, data, data).unwrap();
        }

        let mut sorted = long_data_list.to_vec();
        sorted.sort();

        // Full scan from the start visits every pair in ascending order.
        let mut iter = btree.search(&mut bufmgr, &SearchMode::Start).unwrap();
        for data in &sorted {
            let (k, v) = iter.next(&mut bufmgr).unwrap();
            assert_eq!(data, &k);
            assert_eq!(data, &v);
        }
        match iter.next(&mut bufmgr) {
            Err(Error::EndOfIterator) => {}
            other => panic!("next() = {:?}, want EndOfIterator", other),
        }
        drop(iter);

        // Every pair is also reachable by point lookup.
        for data in &long_data_list {
            let iter = btree
                .search(&mut bufmgr, &SearchMode::Key(data.clone()))
                .unwrap();
            let (k, v) = iter.get().unwrap();
            assert_eq!(data, &k);
            assert_eq!(data, &v);
        }
    }

    #[test]
    fn test_duplicate_key() {
        let mut bufmgr = make_manager(10);
        let btree = BTree::create(&mut bufmgr).unwrap();

        btree.insert(&mut bufmgr, &key(6), b"world").unwrap();
        match btree.insert(&mut bufmgr, &key(6), b"world") {
            Err(Error::DuplicateKey) => {}
            other => panic!("insert() = {:?}, want DuplicateKey", other),
        }
    }

    #[test]
    fn test_many_inserts_multi_level() {
        let mut bufmgr = make_manager(64);
        let btree = BTree::create(&mut bufmgr).unwrap();

        // Descending inserts exercise the new-leaf-before-current split
        // path; the value size forces several branch levels.
        let n: u64 = 5000;
        let value = vec![0x5Au8; 256];
        for i in (0..n).rev() {
            btree.insert(&mut bufmgr, &key(i), &value).unwrap();
        }

        let mut iter = btree.search(&mut bufmgr, &SearchMode::Start).unwrap();
        for i in 0..n {
            let (k, v) = iter.next(&mut bufmgr).unwrap();
            assert_eq!(key(i).to_vec(), k, "key {}", i);
            assert_eq!(value, v);
        }
        match iter.next(&mut bufmgr) {
            Err(Error::EndOfIterator) => {}
            other => panic!("next() = {:?}, want EndOfIterator", other),
        }
        drop(iter);

        for i in [0, 1, 2499, 4998, 4999] {
            let iter = btree
                .search(&mut bufmgr, &SearchMode::Key(key(i).to_vec()))
                .unwrap();
            let (k, _) = iter.get().unwrap();
            assert_eq!(key(i).to_vec(), k);
        }

        // A key search positions the cursor at the first key >= target.
        let mut iter = btree
            .search(&mut bufmgr, &SearchMode::Key(key(1000).to_vec()))
            .unwrap();
        for i in 1000..1010 {
            let (k, _) = iter.next(&mut bufmgr).unwrap();
            assert_eq!(key(i).to_vec(), k);
        }
    }

    #[test]
    fn test_meta_app_area() {
        let mut bufmgr = make_manager(10);
        let btree = BTree::create(&mut bufmgr).unwrap();

        btree.write_meta_app_area(&mut bufmgr, b"schema blob").unwrap();
        let area = btree.read_meta_app_area(&mut bufmgr).unwrap();
        assert_eq!(b"schema blob", &area[..11]);

        let oversized = vec![0u8; crate::disk::PAGE_SIZE];
        match btree.write_meta_app_area(&mut bufmgr, &oversized) {
            Err(Error::TooLongData) => {}
            other => panic!("write_meta_app_area() = {:?}, want TooLongData", other),
        }
    }
}
