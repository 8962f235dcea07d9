//! Branch node view: a rightmost-child pointer plus a slotted body of
//! `(separator key, left child page id)` pairs sorted ascending by key.
//! For `n` pairs there are `n + 1` children.

use crate::bsearch::binary_search_by;
use crate::disk::PageId;
use crate::errors::Error;

use super::node::{NodeType, TAG_SIZE};
use super::pair::Pair;
use super::slotted::{Slotted, POINTER_SIZE};

const RIGHT_CHILD_OFFSET: usize = TAG_SIZE;
const SLOTTED_OFFSET: usize = TAG_SIZE + 8;

pub struct Branch<B> {
    bytes: B,
}

impl<B: AsRef<[u8]>> Branch<B> {
    pub fn new(bytes: B) -> Branch<B> {
        debug_assert!(
            bytes.as_ref().len() > SLOTTED_OFFSET,
            "branch page must be larger than its header"
        );
        Branch { bytes }
    }

    fn slotted(&self) -> Slotted<&[u8]> {
        Slotted::new(&self.bytes.as_ref()[SLOTTED_OFFSET..])
    }

    fn right_child(&self) -> PageId {
        PageId::from_bytes(&self.bytes.as_ref()[RIGHT_CHILD_OFFSET..])
    }

    pub fn num_pairs(&self) -> usize {
        self.slotted().num_slots()
    }

    pub fn search_slot_id(&self, key: &[u8]) -> Result<usize, usize> {
        binary_search_by(self.num_pairs(), |slot_id| {
            self.pair_at(slot_id).key.as_slice().cmp(key)
        })
    }

    /// Index of the child to descend into for `key`. A key equal to a
    /// separator belongs to the child on its right.
    pub fn search_child_idx(&self, key: &[u8]) -> usize {
        match self.search_slot_id(key) {
            Ok(slot_id) => slot_id + 1,
            Err(slot_id) => slot_id,
        }
    }

    pub fn search_child(&self, key: &[u8]) -> PageId {
        self.child_at(self.search_child_idx(key))
    }

    pub fn child_at(&self, child_idx: usize) -> PageId {
        if child_idx == self.num_pairs() {
            self.right_child()
        } else {
            PageId::from_bytes(&self.pair_at(child_idx).value)
        }
    }

    pub fn pair_at(&self, slot_id: usize) -> Pair {
        Pair::from_bytes(self.slotted().read_data(slot_id))
    }

    pub fn max_pair_size(&self) -> usize {
        self.slotted().capacity() / 2 - POINTER_SIZE
    }

    fn is_half_full(&self) -> bool {
        2 * self.slotted().free_space() < self.slotted().capacity()
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> Branch<B> {
    fn slotted_mut(&mut self) -> Slotted<&mut [u8]> {
        Slotted::new(&mut self.bytes.as_mut()[SLOTTED_OFFSET..])
    }

    fn format(&mut self) {
        NodeType::Branch.write_tag(self.bytes.as_mut());
        self.slotted_mut().initialize();
    }

    fn set_right_child(&mut self, page_id: PageId) {
        self.bytes.as_mut()[RIGHT_CHILD_OFFSET..RIGHT_CHILD_OFFSET + 8]
            .copy_from_slice(&page_id.to_bytes());
    }

    /// Sets this page up as a branch with one separator and two children.
    pub fn initialize(&mut self, key: &[u8], left_child: PageId, right_child: PageId) {
        self.format();
        self.insert(0, key, left_child)
            .expect("initial pair must fit an empty branch");
        self.set_right_child(right_child);
    }

    pub fn insert(&mut self, slot_id: usize, key: &[u8], page_id: PageId) -> Result<(), Error> {
        let pair_bytes = Pair::new(key, &page_id.to_bytes()).to_bytes();
        if pair_bytes.len() > self.max_pair_size() {
            return Err(Error::TooLongData);
        }
        let mut slotted = self.slotted_mut();
        slotted.insert(slot_id, pair_bytes.len())?;
        slotted.write_data(slot_id, &pair_bytes);
        Ok(())
    }

    /// Splits this full branch into `new_branch` (smaller keys) and inserts
    /// the pending pair on the side it sorts into. The last pair left in
    /// `new_branch` is promoted: its child becomes the new branch's
    /// rightmost child and its key is returned for the parent.
    pub fn split_insert<C: AsRef<[u8]> + AsMut<[u8]>>(
        &mut self,
        new_branch: &mut Branch<C>,
        new_key: &[u8],
        new_page_id: PageId,
    ) -> Vec<u8> {
        new_branch.format();
        loop {
            if new_branch.is_half_full() {
                let slot_id = self
                    .search_slot_id(new_key)
                    .expect_err("split key must be absent");
                self.insert(slot_id, new_key, new_page_id)
                    .expect("old branch must have space");
                break;
            }
            if self.pair_at(0).key.as_slice() < new_key {
                self.transfer(new_branch);
            } else {
                new_branch
                    .insert(new_branch.num_pairs(), new_key, new_page_id)
                    .expect("new branch must have space");
                while !new_branch.is_half_full() {
                    self.transfer(new_branch);
                }
                break;
            }
        }
        new_branch.fill_right_child()
    }

    /// Promotes the last pair: removes it, points the rightmost child at
    /// its value and hands its key up to the caller.
    fn fill_right_child(&mut self) -> Vec<u8> {
        let last_id = self.num_pairs() - 1;
        let pair = self.pair_at(last_id);
        let right_child = PageId::from_bytes(&pair.value);
        self.slotted_mut().remove(last_id);
        self.set_right_child(right_child);
        pair.key
    }

    fn transfer<C: AsRef<[u8]> + AsMut<[u8]>>(&mut self, dest: &mut Branch<C>) {
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

    fn key(n: u64) -> [u8; 8] {
        n.to_be_bytes()
    }

    #[test]
    fn test_search_child() {
        let mut page = vec![0u8; 100];
        let mut branch = Branch::new(&mut page[..]);
        branch.initialize(&key(5), PageId(1), PageId(2));
        branch.insert(1, &key(8), PageId(3)).unwrap();
        branch.insert(2, &key(11), PageId(4)).unwrap();

        let tests = [
            (1, PageId(1)),
            (5, PageId(3)),
            (6, PageId(3)),
            (8, PageId(4)),
            (10, PageId(4)),
            (11, PageId(2)),
            (12, PageId(2)),
        ];
        for (k, want) in tests {
            assert_eq!(want, branch.search_child(&key(k)), "search_child({})", k);
        }
    }

    #[test]
    fn test_split_insert() {
        let mut page = vec![0u8; 100];
        let mut branch = Branch::new(&mut page[..]);
        branch.initialize(&key(5), PageId(1), PageId(2));
        branch.insert(1, &key(8), PageId(3)).unwrap();
        branch.insert(2, &key(11), PageId(4)).unwrap();

        let mut new_page = vec![0u8; 100];
        let mut new_branch = Branch::new(&mut new_page[..]);
        let promoted = branch.split_insert(&mut new_branch, &key(10), PageId(5));
        assert_eq!(key(8).to_vec(), promoted);

        assert_eq!(2, branch.num_pairs());
        assert_eq!(1, new_branch.num_pairs());

        for (k, want) in [(1, PageId(1)), (5, PageId(3)), (6, PageId(3))] {
            assert_eq!(want, new_branch.search_child(&key(k)), "new branch {}", k);
        }
        for (k, want) in [(9, PageId(5)), (10, PageId(4)), (11, PageId(2)), (12, PageId(2))] {
            assert_eq!(want, branch.search_child(&key(k)), "old branch {}", k);
        }
    }
}
