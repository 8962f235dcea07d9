//! The buffer pool: a fixed number of in-memory page frames over the heap
//! file, with reference-counted pins and clock eviction.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use tracing::debug;

use crate::disk::{DiskManager, PageId, PAGE_SIZE};
use crate::errors::Error;

pub type Page = [u8; PAGE_SIZE];

/// One cached page. Handles returned by the manager are `Rc<Buffer>`;
/// holding a handle pins the page, dropping it releases the pin. The page
/// bytes sit behind a `RefCell` so that callers can edit them in place
/// through a shared handle (the engine is single-threaded).
pub struct Buffer {
    pub page_id: PageId,
    pub page: RefCell<Page>,
    pub is_dirty: Cell<bool>,
}

impl Buffer {
    fn new() -> Buffer {
        Buffer {
            page_id: PageId::INVALID,
            page: RefCell::new([0; PAGE_SIZE]),
            is_dirty: Cell::new(false),
        }
    }
}

struct Frame {
    usage_count: u64,
    buffer: Rc<Buffer>,
}

impl Frame {
    /// Number of handles currently lent out for this frame's page. The pool
    /// itself always holds one `Rc`, so anything above that is a pin.
    fn ref_count(&self) -> usize {
        Rc::strong_count(&self.buffer) - 1
    }
}

pub struct BufferPool {
    frames: Vec<Frame>,
    next_victim_id: usize,
}

impl BufferPool {
    pub fn new(pool_size: usize) -> BufferPool {
        let mut frames = Vec::with_capacity(pool_size);
        for _ in 0..pool_size {
            frames.push(Frame {
                usage_count: 0,
                buffer: Rc::new(Buffer::new()),
            });
        }
        BufferPool {
            frames,
            next_victim_id: 0,
        }
    }

    fn size(&self) -> usize {
        self.frames.len()
    }

    /// Clock sweep. The usage count works as an accumulated second-chance
    /// counter; a pinned frame is never reused. Fails with `NoFreeBuffer`
    /// once a full round of consecutive pinned frames has been seen.
    fn evict(&mut self) -> Result<usize, Error> {
        let pool_size = self.size();
        let mut consecutive_pinned = 0;
        loop {
            let frame = &mut self.frames[self.next_victim_id];
            if frame.usage_count == 0 {
                return Ok(self.next_victim_id);
            }
            if frame.ref_count() == 0 {
                frame.usage_count -= 1;
                consecutive_pinned = 0;
            } else {
                consecutive_pinned += 1;
                if consecutive_pinned >= pool_size {
                    return Err(Error::NoFreeBuffer);
                }
            }
            self.next_victim_id = (self.next_victim_id + 1) % pool_size;
        }
    }
}

/// Owns the disk manager and the frame pool, and keeps the page table
/// (page id -> frame) consistent with the frames' contents.
pub struct BufferPoolManager {
    disk: DiskManager,
    pool: BufferPool,
    page_table: HashMap<PageId, usize>,
}

impl BufferPoolManager {
    pub fn new(disk: DiskManager, pool: BufferPool) -> BufferPoolManager {
        BufferPoolManager {
            disk,
            pool,
            page_table: HashMap::new(),
        }
    }

    /// Pins the page with `page_id`, loading it from disk unless it is
    /// already cached. The returned handle keeps the frame unevictable
    /// until it is dropped.
    pub fn fetch_page(&mut self, page_id: PageId) -> Result<Rc<Buffer>, Error> {
        if let Some(&buffer_id) = self.page_table.get(&page_id) {
            let frame = &mut self.pool.frames[buffer_id];
            frame.usage_count += 1;
            return Ok(Rc::clone(&frame.buffer));
        }
        let buffer_id = self.pool.evict()?;
        let frame = &mut self.pool.frames[buffer_id];
        let evict_page_id = frame.buffer.page_id;
        {
            let buffer = Rc::get_mut(&mut frame.buffer).expect("evicted frame must not be pinned");
            if evict_page_id != PageId::INVALID && buffer.is_dirty.get() {
                debug!(page_id = evict_page_id.to_u64(), "writing back dirty page");
                self.disk
                    .write_page_data(evict_page_id, &buffer.page.get_mut()[..])?;
            }
            buffer.page_id = page_id;
            buffer.is_dirty.set(false);
            self.disk.read_page_data(page_id, buffer.page.get_mut())?;
        }
        frame.usage_count = 1;
        if evict_page_id != PageId::INVALID {
            self.page_table.remove(&evict_page_id);
        }
        self.page_table.insert(page_id, buffer_id);
        Ok(Rc::clone(&self.pool.frames[buffer_id].buffer))
    }

    /// Allocates a fresh page id and pins a zeroed page for it. The new
    /// page is born dirty so it reaches disk on eviction or flush.
    pub fn create_page(&mut self) -> Result<Rc<Buffer>, Error> {
        let buffer_id = self.pool.evict()?;
        let frame = &mut self.pool.frames[buffer_id];
        let evict_page_id = frame.buffer.page_id;
        {
            let buffer = Rc::get_mut(&mut frame.buffer).expect("evicted frame must not be pinned");
            if evict_page_id != PageId::INVALID && buffer.is_dirty.get() {
                debug!(page_id = evict_page_id.to_u64(), "writing back dirty page");
                self.disk
                    .write_page_data(evict_page_id, &buffer.page.get_mut()[..])?;
            }
            let page_id = self.disk.allocate_page();
            buffer.page_id = page_id;
            *buffer.page.get_mut() = [0; PAGE_SIZE];
            buffer.is_dirty.set(true);
        }
        frame.usage_count = 1;
        if evict_page_id != PageId::INVALID {
            self.page_table.remove(&evict_page_id);
        }
        let frame = &self.pool.frames[buffer_id];
        self.page_table.insert(frame.buffer.page_id, buffer_id);
        debug!(page_id = frame.buffer.page_id.to_u64(), "created page");
        Ok(Rc::clone(&frame.buffer))
    }

    /// Writes every cached page back to disk, clears the dirty flags and
    /// syncs the heap file.
    pub fn flush(&mut self) -> Result<(), Error> {
        for (&page_id, &buffer_id) in self.page_table.iter() {
            let frame = &self.pool.frames[buffer_id];
            debug_assert_eq!(page_id, frame.buffer.page_id);
            self.disk.write_page_data(page_id, &frame.buffer.page.borrow()[..])?;
            frame.buffer.is_dirty.set(false);
        }
        self.disk.sync()?;
        Ok(())
    }
}
