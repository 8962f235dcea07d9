//! The heap file: a flat sequence of fixed-size pages addressed by page id.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::errors::Error;

/// Page size 4 kilobytes because it is the same size as a page used in
/// the virtual memory systems of most computer architectures.
pub const PAGE_SIZE: usize = 4096;

/// Identifies one page in the heap file. Pages are numbered 0, 1, 2, ...
/// in allocation order; the all-ones pattern is the "invalid" sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PageId(pub u64);

impl PageId {
    pub const INVALID: PageId = PageId(u64::MAX);

    /// Returns `None` for the invalid sentinel.
    pub fn valid(self) -> Option<PageId> {
        if self == PageId::INVALID {
            None
        } else {
            Some(self)
        }
    }

    pub fn to_u64(self) -> u64 {
        self.0
    }

    pub fn to_bytes(self) -> [u8; 8] {
        self.0.to_le_bytes()
    }

    /// Reads a page id from the first 8 bytes of `bytes` (little-endian).
    pub fn from_bytes(bytes: &[u8]) -> PageId {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&bytes[..8]);
        PageId(u64::from_le_bytes(buf))
    }
}

pub struct DiskManager {
    heap_file: File,
    next_page_id: u64,
}

impl DiskManager {
    /// Wraps an already opened heap file. The next page id is derived from
    /// the current file size.
    pub fn new(heap_file: File) -> Result<DiskManager, Error> {
        let heap_file_size = heap_file.metadata()?.len();
        let next_page_id = heap_file_size / PAGE_SIZE as u64;
        Ok(DiskManager {
            heap_file,
            next_page_id,
        })
    }

    pub fn open(heap_file_path: impl AsRef<Path>) -> Result<DiskManager, Error> {
        let heap_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(heap_file_path)?;
        DiskManager::new(heap_file)
    }

    /// Hands out the next page id. No write happens until the caller stores
    /// the page.
    pub fn allocate_page(&mut self) -> PageId {
        let page_id = self.next_page_id;
        self.next_page_id += 1;
        PageId(page_id)
    }

    pub fn read_page_data(&mut self, page_id: PageId, data: &mut [u8]) -> Result<(), Error> {
        let offset = PAGE_SIZE as u64 * page_id.to_u64();
        self.heap_file.seek(SeekFrom::Start(offset))?;
        self.heap_file.read_exact(data)?;
        Ok(())
    }

    pub fn write_page_data(&mut self, page_id: PageId, data: &[u8]) -> Result<(), Error> {
        let offset = PAGE_SIZE as u64 * page_id.to_u64();
        self.heap_file.seek(SeekFrom::Start(offset))?;
        self.heap_file.write_all(data)?;
        Ok(())
    }

    pub fn sync(&mut self) -> Result<(), Error> {
        self.heap_file.flush()?;
        self.heap_file.sync_all()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_write_reopen() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let path = file.path().to_path_buf();

        let mut hello = vec![0u8; PAGE_SIZE];
        hello[..5].copy_from_slice(b"hello");
        let mut world = vec![0u8; PAGE_SIZE];
        world[..5].copy_from_slice(b"world");

        let (hello_page_id, world_page_id) = {
            let mut disk = DiskManager::new(file.reopen().unwrap()).unwrap();
            let hello_page_id = disk.allocate_page();
            disk.write_page_data(hello_page_id, &hello).unwrap();
            let world_page_id = disk.allocate_page();
            disk.write_page_data(world_page_id, &world).unwrap();
            disk.sync().unwrap();
            (hello_page_id, world_page_id)
        };
        assert_eq!(PageId(0), hello_page_id);
        assert_eq!(PageId(1), world_page_id);

        let mut disk = DiskManager::open(&path).unwrap();
        // Two pages on disk, so the next allocation is page 2.
        assert_eq!(PageId(2), disk.allocate_page());

        let mut buf = vec![0u8; PAGE_SIZE];
        disk.read_page_data(hello_page_id, &mut buf).unwrap();
        assert_eq!(hello, buf);
        disk.read_page_data(world_page_id, &mut buf).unwrap();
        assert_eq!(world, buf);
    }

    #[test]
    fn test_page_id_bytes() {
        let page_id = PageId(0xDEAD);
        assert_eq!(page_id, PageId::from_bytes(&page_id.to_bytes()));
        assert_eq!(None, PageId::INVALID.valid());
        assert_eq!(Some(page_id), page_id.valid());
    }
}
