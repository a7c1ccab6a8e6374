use std::collections::VecDeque;
use std::sync::Arc;
use parking_lot::{Mutex, RwLock};

use crate::common::types::{FrameId, Page, PageId, PagePtr, INVALID_PAGE_ID};
use crate::container::ExtendibleHashTable;
use crate::storage::buffer::error::BufferPoolError;
use crate::storage::buffer::replacer::LruKReplacer;
use crate::storage::disk::DiskManager;

const PAGE_TABLE_BUCKET_SIZE: usize = 8;

/// A buffer pool frame: the slot metadata plus the resident page bytes.
/// The page bytes are shared out to callers as a `PagePtr`; the metadata
/// never leaves the pool mutex.
struct Frame {
    page: PagePtr,
    page_id: PageId,
    pin_count: u32,
    is_dirty: bool,
}

impl Frame {
    fn new() -> Self {
        Self {
            page: Arc::new(RwLock::new(Page::new(INVALID_PAGE_ID))),
            page_id: INVALID_PAGE_ID,
            pin_count: 0,
            is_dirty: false,
        }
    }
}

struct Pool {
    frames: Vec<Frame>,
    free_list: VecDeque<FrameId>,
    replacer: LruKReplacer,
    next_page_id: PageId,
}

/// BufferPoolManager hands out pinned page references backed by a fixed
/// array of frames, writing dirty evictees back through the DiskManager.
///
/// A single pool-wide mutex guards all bookkeeping; page I/O happens while
/// holding it. Callers are expected to do their heavy work on the returned
/// `PagePtr` after the entry point returns.
pub struct BufferPoolManager {
    pool_size: usize,
    latch: Mutex<Pool>,
    page_table: ExtendibleHashTable<PageId, FrameId>,
    disk_manager: Arc<DiskManager>,
}

impl BufferPoolManager {
    pub fn new(
        pool_size: usize,
        replacer_k: usize,
        disk_manager: Arc<DiskManager>,
    ) -> Result<Self, BufferPoolError> {
        let mut frames = Vec::with_capacity(pool_size);
        let mut free_list = VecDeque::with_capacity(pool_size);
        for frame_id in 0..pool_size {
            frames.push(Frame::new());
            free_list.push_back(frame_id);
        }
        // Page ids are never recycled; on an existing database the counter
        // resumes past every page already on disk.
        let next_page_id = disk_manager.num_pages()? as PageId;

        Ok(Self {
            pool_size,
            latch: Mutex::new(Pool {
                frames,
                free_list,
                replacer: LruKReplacer::new(pool_size, replacer_k),
                next_page_id,
            }),
            page_table: ExtendibleHashTable::new(PAGE_TABLE_BUCKET_SIZE),
            disk_manager,
        })
    }

    /// Allocate a fresh page id and pin it in a zeroed frame.
    pub fn new_page(&self) -> Result<(PagePtr, PageId), BufferPoolError> {
        let mut pool = self.latch.lock();
        let frame_id = self.get_frame(&mut pool)?;

        let page_id = pool.next_page_id;
        pool.next_page_id += 1;

        let frame = &mut pool.frames[frame_id];
        {
            let mut page = frame.page.write();
            page.reset();
            page.page_id = page_id;
        }
        frame.page_id = page_id;
        frame.pin_count = 1;
        frame.is_dirty = false;
        let page = Arc::clone(&frame.page);

        pool.replacer.record_access(frame_id);
        pool.replacer.set_evictable(frame_id, false);
        self.page_table.insert(page_id, frame_id);

        Ok((page, page_id))
    }

    /// Fetch a page, reading it from disk if it is not resident.
    pub fn fetch_page(&self, page_id: PageId) -> Result<PagePtr, BufferPoolError> {
        if page_id < 0 {
            return Err(BufferPoolError::InvalidPageId(page_id));
        }
        let mut pool = self.latch.lock();

        if let Some(frame_id) = self.page_table.find(&page_id) {
            if pool.frames[frame_id].pin_count == 0 {
                pool.replacer.set_evictable(frame_id, false);
            }
            pool.frames[frame_id].pin_count += 1;
            pool.replacer.record_access(frame_id);
            return Ok(Arc::clone(&pool.frames[frame_id].page));
        }

        let frame_id = self.get_frame(&mut pool)?;
        let frame = &mut pool.frames[frame_id];
        {
            let mut page = frame.page.write();
            page.reset();
            self.disk_manager.read_page(page_id, &mut page.data)?;
            page.page_id = page_id;
        }
        frame.page_id = page_id;
        frame.pin_count = 1;
        frame.is_dirty = false;
        let page = Arc::clone(&frame.page);

        pool.replacer.record_access(frame_id);
        pool.replacer.set_evictable(frame_id, false);
        self.page_table.insert(page_id, frame_id);

        Ok(page)
    }

    /// Drop one pin; the frame becomes evictable when the count reaches 0.
    /// The dirty flag is OR-ed in, never cleared here.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> Result<(), BufferPoolError> {
        let mut pool = self.latch.lock();
        let frame_id = self
            .page_table
            .find(&page_id)
            .ok_or(BufferPoolError::PageNotFound(page_id))?;

        {
            let frame = &mut pool.frames[frame_id];
            if frame.pin_count == 0 {
                return Err(BufferPoolError::PageNotPinned(page_id));
            }
            frame.pin_count -= 1;
            frame.is_dirty |= is_dirty;
        }
        if pool.frames[frame_id].pin_count == 0 {
            pool.replacer.set_evictable(frame_id, true);
        }
        Ok(())
    }

    /// Write a resident page to disk and clear its dirty flag.
    pub fn flush_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        let mut pool = self.latch.lock();
        let frame_id = self
            .page_table
            .find(&page_id)
            .ok_or(BufferPoolError::PageNotFound(page_id))?;
        self.flush_frame(&mut pool, frame_id)
    }

    /// Flush every resident page, skipping empty frames.
    pub fn flush_all_pages(&self) -> Result<(), BufferPoolError> {
        let mut pool = self.latch.lock();
        for frame_id in 0..self.pool_size {
            if pool.frames[frame_id].page_id != INVALID_PAGE_ID {
                self.flush_frame(&mut pool, frame_id)?;
            }
        }
        Ok(())
    }

    /// Evict a page from the pool. Succeeds trivially when the page is not
    /// resident; fails when it is pinned. The page id is not recycled.
    pub fn delete_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        let mut pool = self.latch.lock();
        let Some(frame_id) = self.page_table.find(&page_id) else {
            return Ok(());
        };

        let frame = &mut pool.frames[frame_id];
        if frame.pin_count > 0 {
            return Err(BufferPoolError::PagePinned(page_id));
        }

        frame.page.write().reset();
        frame.page_id = INVALID_PAGE_ID;
        frame.is_dirty = false;

        self.page_table.remove(&page_id);
        pool.replacer.remove(frame_id);
        pool.free_list.push_back(frame_id);
        Ok(())
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    pub fn disk_manager(&self) -> &Arc<DiskManager> {
        &self.disk_manager
    }

    /// Pin count of a resident page, if any. Test and assertion hook.
    pub fn pin_count(&self, page_id: PageId) -> Option<u32> {
        let pool = self.latch.lock();
        self.page_table
            .find(&page_id)
            .map(|frame_id| pool.frames[frame_id].pin_count)
    }

    fn flush_frame(&self, pool: &mut Pool, frame_id: FrameId) -> Result<(), BufferPoolError> {
        let frame = &mut pool.frames[frame_id];
        {
            let page = frame.page.read();
            self.disk_manager.write_page(frame.page_id, &page.data)?;
        }
        frame.is_dirty = false;
        Ok(())
    }

    /// Obtain a frame for a new resident: free list first, then eviction.
    /// A dirty victim is written back and its mapping removed.
    fn get_frame(&self, pool: &mut Pool) -> Result<FrameId, BufferPoolError> {
        if let Some(frame_id) = pool.free_list.pop_front() {
            return Ok(frame_id);
        }

        let Some(frame_id) = pool.replacer.evict() else {
            return Err(BufferPoolError::PoolExhausted);
        };

        let frame = &mut pool.frames[frame_id];
        debug_assert_eq!(frame.pin_count, 0, "evicted a pinned frame");
        if frame.is_dirty {
            let page = frame.page.read();
            self.disk_manager.write_page(frame.page_id, &page.data)?;
        }
        let frame = &mut pool.frames[frame_id];
        frame.is_dirty = false;
        self.page_table.remove(&frame.page_id);
        frame.page_id = INVALID_PAGE_ID;
        Ok(frame_id)
    }
}
