//! Leaf node view: sibling links plus a slotted body of key/value pairs
//! sorted ascending by key.
//!
//! Layout on top of the page: node tag (8 bytes), previous page id (u64),
//! next page id (u64), then the slotted region.

use crate::bsearch::binary_search_by;
use crate::disk::PageId;
use crate::errors::Error;

use super::node::{NodeType, TAG_SIZE};
use super::pair::Pair;
use super::slotted::{Slotted, POINTER_SIZE};

const PREV_PAGE_ID_OFFSET: usize = TAG_SIZE;
const NEXT_PAGE_ID_OFFSET: usize = TAG_SIZE + 8;
const SLOTTED_OFFSET: usize = TAG_SIZE + 16;

pub struct Leaf<B> {
    bytes: B,
}

impl<B: AsRef<[u8]>> Leaf<B> {
    pub fn new(bytes: B) -> Leaf<B> {
        debug_assert!(
            bytes.as_ref().len() > SLOTTED_OFFSET,
            "leaf page must be larger than its header"
        );
        Leaf { bytes }
    }

    fn slotted(&self) -> Slotted<&[u8]> {
        Slotted::new(&self.bytes.as_ref()[SLOTTED_OFFSET..])
    }

    /// `None` means this is the leftmost leaf.
    pub fn prev_page_id(&self) -> Option<PageId> {
        PageId::from_bytes(&self.bytes.as_ref()[PREV_PAGE_ID_OFFSET..]).valid()
    }

    /// `None` means this is the rightmost leaf.
    pub fn next_page_id(&self) -> Option<PageId> {
        PageId::from_bytes(&self.bytes.as_ref()[NEXT_PAGE_ID_OFFSET..]).valid()
    }

    pub fn num_pairs(&self) -> usize {
        self.slotted().num_slots()
    }

    /// `Ok(slot)` when `key` is present, `Err(insertion_point)` otherwise.
    pub fn search_slot_id(&self, key: &[u8]) -> Result<usize, usize> {
        binary_search_by(self.num_pairs(), |slot_id| {
            self.pair_at(slot_id).key.as_slice().cmp(key)
        })
    }

    pub fn pair_at(&self, slot_id: usize) -> Pair {
        Pair::from_bytes(self.slotted().read_data(slot_id))
    }

    /// Upper bound on a serialized pair. Keeping every pair within half a
    /// body guarantees that a split always leaves room for two pairs.
    pub fn max_pair_size(&self) -> usize {
        self.slotted().capacity() / 2 - POINTER_SIZE
    }

    fn is_half_full(&self) -> bool {
        2 * self.slotted().free_space() < self.slotted().capacity()
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> Leaf<B> {
    fn slotted_mut(&mut self) -> Slotted<&mut [u8]> {
        Slotted::new(&mut self.bytes.as_mut()[SLOTTED_OFFSET..])
    }

    pub fn initialize(&mut self) {
        NodeType::Leaf.write_tag(self.bytes.as_mut());
        self.set_prev_page_id(PageId::INVALID);
        self.set_next_page_id(PageId::INVALID);
        self.slotted_mut().initialize();
    }

    pub fn set_prev_page_id(&mut self, prev_page_id: PageId) {
        self.bytes.as_mut()[PREV_PAGE_ID_OFFSET..PREV_PAGE_ID_OFFSET + 8]
            .copy_from_slice(&prev_page_id.to_bytes());
    }

    pub fn set_next_page_id(&mut self, next_page_id: PageId) {
        self.bytes.as_mut()[NEXT_PAGE_ID_OFFSET..NEXT_PAGE_ID_OFFSET + 8]
            .copy_from_slice(&next_page_id.to_bytes());
    }

    pub fn insert(&mut self, slot_id: usize, key: &[u8], value: &[u8]) -> Result<(), Error> {
        let pair_bytes = Pair::new(key, value).to_bytes();
        if pair_bytes.len() > self.max_pair_size() {
            return Err(Error::TooLongData);
        }
        let mut slotted = self.slotted_mut();
        slotted.insert(slot_id, pair_bytes.len())?;
        slotted.write_data(slot_id, &pair_bytes);
        Ok(())
    }

    /// Splits this full leaf into `new_leaf` (which takes the smaller keys)
    /// and inserts the pending pair on whichever side it sorts into.
    /// Returns the separator key: the first key remaining in `self`.
    pub fn split_insert<C: AsRef<[u8]> + AsMut<[u8]>>(
        &mut self,
        new_leaf: &mut Leaf<C>,
        new_key: &[u8],
        new_value: &[u8],
    ) -> Vec<u8> {
        new_leaf.initialize();
        loop {
            if new_leaf.is_half_full() {
                let slot_id = self
                    .search_slot_id(new_key)
                    .expect_err("split key must be absent");
                self.insert(slot_id, new_key, new_value)
                    .expect("old leaf must have space");
                break;
            }
            if self.pair_at(0).key.as_slice() < new_key {
                self.transfer(new_leaf);
            } else {
                new_leaf
                    .insert(new_leaf.num_pairs(), new_key, new_value)
                    .expect("new leaf must have space");
                while !new_leaf.is_half_full() {
                    self.transfer(new_leaf);
                }
                break;
            }
        }
        self.pair_at(0).key
    }

    /// Moves the first pair of `self` to the end of `dest`.
    fn transfer<C: AsRef<[u8]> + AsMut<[u8]>>(&mut self, dest: &mut Leaf<C>) {
        let next_index = dest.num_pairs();
        let payload = self.slotted().read_data(0).to_vec();
        let mut dest_slotted = dest.slotted_mut();
        dest_slotted
            .insert(next_index, payload.len())
            .expect("transfer destination must have space");
        dest_slotted.write_data(next_index, &payload);
        self.slotted_mut().remove(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn insert_miss<B: AsRef<[u8]> + AsMut<[u8]>>(
        leaf: &mut Leaf<B>,
        key: &[u8],
        value: &[u8],
        want_slot: usize,
    ) {
        let slot_id = leaf.search_slot_id(key).expect_err("unexpected hit");
        assert_eq!(want_slot, slot_id);
        leaf.insert(slot_id, key, value).unwrap();
    }

    fn assert_pair_at<B: AsRef<[u8]>>(leaf: &Leaf<B>, slot_id: usize, key: &[u8], value: &[u8]) {
        let pair = leaf.pair_at(slot_id);
        assert_eq!(key, pair.key.as_slice());
        assert_eq!(value, pair.value.as_slice());
    }

    fn lookup<B: AsRef<[u8]>>(leaf: &Leaf<B>, key: &[u8]) -> Vec<u8> {
        let slot_id = leaf.search_slot_id(key).expect("missing key");
        leaf.pair_at(slot_id).value
    }

    #[test]
    fn test_insert_keeps_order() {
        let mut page = vec![0u8; 100];
        let mut leaf = Leaf::new(&mut page[..]);
        leaf.initialize();
        assert_eq!(None, leaf.prev_page_id());
        assert_eq!(None, leaf.next_page_id());

        insert_miss(&mut leaf, b"deadbeef", b"world", 0);
        assert_pair_at(&leaf, 0, b"deadbeef", b"world");

        insert_miss(&mut leaf, b"facebook", b"!", 1);
        assert_pair_at(&leaf, 0, b"deadbeef", b"world");
        assert_pair_at(&leaf, 1, b"facebook", b"!");

        insert_miss(&mut leaf, b"beefdead", b"hello", 0);
        assert_pair_at(&leaf, 0, b"beefdead", b"hello");
        assert_pair_at(&leaf, 1, b"deadbeef", b"world");
        assert_pair_at(&leaf, 2, b"facebook", b"!");

        assert_eq!(b"hello".to_vec(), lookup(&leaf, b"beefdead"));
    }

    #[test]
    fn test_split_insert_new_key_to_new_leaf() {
        let mut page = vec![0u8; 88];
        let mut leaf = Leaf::new(&mut page[..]);
        leaf.initialize();

        insert_miss(&mut leaf, b"deadbeef", b"world", 0);
        insert_miss(&mut leaf, b"facebook", b"!", 1);
        insert_miss(&mut leaf, b"hoge", b"fuga", 2);
        // The page is now too full for another pair.
        let slot_id = leaf.search_slot_id(b"beefdead").expect_err("unexpected hit");
        assert_eq!(0, slot_id);
        match leaf.insert(slot_id, b"beefdead", b"hello") {
            Err(Error::NoSpace) => {}
            other => panic!("insert() = {:?}, want NoSpace", other),
        }

        let mut new_page = vec![0u8; 88];
        let mut new_leaf = Leaf::new(&mut new_page[..]);
        let separator = leaf.split_insert(&mut new_leaf, b"beefdead", b"hello");
        assert_eq!(b"facebook".to_vec(), separator);

        assert_eq!(2, new_leaf.num_pairs());
        assert_eq!(b"hello".to_vec(), lookup(&new_leaf, b"beefdead"));
        assert_eq!(b"world".to_vec(), lookup(&new_leaf, b"deadbeef"));
        assert_eq!(2, leaf.num_pairs());
        assert_eq!(b"!".to_vec(), lookup(&leaf, b"facebook"));
        assert_eq!(b"fuga".to_vec(), lookup(&leaf, b"hoge"));
        assert!(leaf.is_half_full());
        assert!(new_leaf.is_half_full());
    }

    #[test]
    fn test_split_insert_new_key_to_old_leaf() {
        let mut page = vec![0u8; 88];
        let mut leaf = Leaf::new(&mut page[..]);
        leaf.initialize();

        insert_miss(&mut leaf, b"deadbeef", b"world", 0);
        insert_miss(&mut leaf, b"facebook", b"!", 1);
        insert_miss(&mut leaf, b"hoge", b"fuga", 2);

        let mut new_page = vec![0u8; 88];
        let mut new_leaf = Leaf::new(&mut new_page[..]);
        // Sorts after every existing key, so it lands in the old leaf.
        let separator = leaf.split_insert(&mut new_leaf, b"zzzzzzzz", b"end");
        assert_eq!(b"hoge".to_vec(), separator);

        assert_eq!(2, new_leaf.num_pairs());
        assert_eq!(b"world".to_vec(), lookup(&new_leaf, b"deadbeef"));
        assert_eq!(b"!".to_vec(), lookup(&new_leaf, b"facebook"));
        assert_eq!(2, leaf.num_pairs());
        assert_eq!(b"fuga".to_vec(), lookup(&leaf, b"hoge"));
        assert_eq!(b"end".to_vec(), lookup(&leaf, b"zzzzzzzz"));
    }

    #[test]
    fn test_too_long_data() {
        let mut page = vec![0u8; 100];
        let mut leaf = Leaf::new(&mut page[..]);
        leaf.initialize();

        let long = vec![0xABu8; 100];
        match leaf.insert(0, &long, b"") {
            Err(Error::TooLongData) => {}
            other => panic!("insert() = {:?}, want TooLongData", other),
        }
    }
}
