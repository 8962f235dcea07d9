//! Slotted page body: a directory of fixed-size pointers at the low end
//! and variable-length payloads growing down from the high end.
//!
//! Layout (all little-endian, offsets relative to the managed region):
//!
//! | bytes      | field                                  |
//! |------------|----------------------------------------|
//! | 0..2       | number of slots (u16)                  |
//! | 2..4       | free space offset (u16, body-relative) |
//! | 4..8       | padding                                |
//! | 8..        | body: pointers, free space, payloads   |
//!
//! Each pointer is `(offset: u16, length: u16)`; payload `i` lives at
//! `body[offset..offset + length]`. Slot ids are dense and stay stable
//! across inserts and removes at other positions.

use crate::errors::Error;

const HEADER_SIZE: usize = 8;
pub const POINTER_SIZE: usize = 4;

pub struct Slotted<B> {
    bytes: B,
}

impl<B: AsRef<[u8]>> Slotted<B> {
    pub fn new(bytes: B) -> Slotted<B> {
        debug_assert!(
            bytes.as_ref().len() > HEADER_SIZE,
            "slotted region must be larger than its header"
        );
        Slotted { bytes }
    }

    fn get_u16(&self, offset: usize) -> u16 {
        let bytes = self.bytes.as_ref();
        u16::from_le_bytes([bytes[offset], bytes[offset + 1]])
    }

    fn body(&self) -> &[u8] {
        &self.bytes.as_ref()[HEADER_SIZE..]
    }

    pub fn capacity(&self) -> usize {
        self.body().len()
    }

    pub fn num_slots(&self) -> usize {
        self.get_u16(0) as usize
    }

    fn free_space_offset(&self) -> usize {
        self.get_u16(2) as usize
    }

    pub fn free_space(&self) -> usize {
        self.free_space_offset() - POINTER_SIZE * self.num_slots()
    }

    /// `(offset, length)` of the payload of `index`, body-relative.
    fn pointer(&self, index: usize) -> (usize, usize) {
        debug_assert!(index < self.num_slots(), "slot index out of range");
        let at = HEADER_SIZE + index * POINTER_SIZE;
        (self.get_u16(at) as usize, self.get_u16(at + 2) as usize)
    }

    pub fn read_data(&self, index: usize) -> &[u8] {
        let (offset, length) = self.pointer(index);
        &self.body()[offset..offset + length]
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> Slotted<B> {
    fn put_u16(&mut self, offset: usize, value: u16) {
        self.bytes.as_mut()[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
    }

    fn body_mut(&mut self) -> &mut [u8] {
        &mut self.bytes.as_mut()[HEADER_SIZE..]
    }

    fn set_num_slots(&mut self, num_slots: usize) {
        self.put_u16(0, num_slots as u16);
    }

    fn set_free_space_offset(&mut self, free_space_offset: usize) {
        self.put_u16(2, free_space_offset as u16);
    }

    fn set_pointer(&mut self, index: usize, offset: usize, length: usize) {
        let at = HEADER_SIZE + index * POINTER_SIZE;
        self.put_u16(at, offset as u16);
        self.put_u16(at + 2, length as u16);
    }

    pub fn initialize(&mut self) {
        self.set_num_slots(0);
        let capacity = self.capacity();
        self.set_free_space_offset(capacity);
    }

    /// Makes room for a `length`-byte payload at slot `index`, shifting the
    /// pointers of later slots up by one. The payload bytes themselves are
    /// left untouched; callers follow up with `write_data`.
    pub fn insert(&mut self, index: usize, length: usize) -> Result<(), Error> {
        if self.free_space() < POINTER_SIZE + length {
            return Err(Error::NoSpace);
        }
        let num_slots_orig = self.num_slots();
        debug_assert!(index <= num_slots_orig, "insert index out of range");
        let free_space_offset = self.free_space_offset() - length;
        self.set_free_space_offset(free_space_offset);
        self.set_num_slots(num_slots_orig + 1);
        self.body_mut().copy_within(
            index * POINTER_SIZE..num_slots_orig * POINTER_SIZE,
            index * POINTER_SIZE + POINTER_SIZE,
        );
        self.set_pointer(index, free_space_offset, length);
        Ok(())
    }

    /// Drops slot `index`: compacts its payload space away, then shifts
    /// the pointers of later slots down by one.
    pub fn remove(&mut self, index: usize) {
        self.resize(index, 0)
            .expect("shrinking a slot cannot fail");
        let num_slots = self.num_slots();
        self.body_mut().copy_within(
            (index + 1) * POINTER_SIZE..num_slots * POINTER_SIZE,
            index * POINTER_SIZE,
        );
        self.set_num_slots(num_slots - 1);
    }

    /// Changes the payload length of slot `index`, sliding every payload
    /// between the free space boundary and this one to keep the region
    /// contiguous, and rewriting the affected pointers.
    pub fn resize(&mut self, index: usize, len_new: usize) -> Result<(), Error> {
        let (offset_orig, len_orig) = self.pointer(index);
        let len_incr = len_new as isize - len_orig as isize;
        if len_incr == 0 {
            return Ok(());
        }
        if len_incr > self.free_space() as isize {
            return Err(Error::NoSpace);
        }

        let free_space_offset = self.free_space_offset();
        let free_space_offset_new = (free_space_offset as isize - len_incr) as usize;
        self.set_free_space_offset(free_space_offset_new);
        self.body_mut()
            .copy_within(free_space_offset..offset_orig, free_space_offset_new);

        for i in 0..self.num_slots() {
            let (offset, length) = self.pointer(i);
            if offset <= offset_orig {
                self.set_pointer(i, (offset as isize - len_incr) as usize, length);
            }
        }
        let (offset_now, _) = self.pointer(index);
        if len_new == 0 {
            self.set_pointer(index, free_space_offset_new, 0);
        } else {
            self.set_pointer(index, offset_now, len_new);
        }
        Ok(())
    }

    pub fn write_data(&mut self, index: usize, buf: &[u8]) {
        let (offset, length) = self.pointer(index);
        debug_assert_eq!(buf.len(), length, "payload must fill its slot");
        self.body_mut()[offset..offset + length].copy_from_slice(buf);
    }
}
