use std::fs::OpenOptions;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use log::{debug, warn};

use crate::error::{DbError, DbResult};
use crate::storage::page::{Page, PageId, PAGE_SIZE};

struct Frame {
    page: Box<Page>,
    pin_count: u32,
    dirty: bool,
}

/// Pager: manages reading/writing 4 KiB pages from/into the database file and
/// keeps an in-memory frame per touched page. Every `fetch_page` must be paired
/// with exactly one `release_page`; the release carries the dirty flag so the
/// pager knows which frames need writing back. The scoped accessors
/// (`read_page`, `update_page`, `with_new_page`) enforce that pairing on every
/// exit path and are what the catalog, heap and index layers use.
///
/// The pager has no internal locking: callers serialize mutation through the
/// `&mut self` receivers.
pub struct Pager {
    file: File,

    /// The number of pages that already existed on disk when we opened this file.
    file_length_pages: u32,

    /// The total number of pages that the pager knows about right now
    /// (including any newly allocated ones not yet flushed).
    num_pages: u32,

    /// `frames[page_num]` is `Some` once that page has been allocated or
    /// fetched in this process.
    frames: Vec<Option<Frame>>,
}

impl Pager {
    /// Open (or create) the database file at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        let file_len = file.metadata()?.len();
        let file_length_pages = (file_len as usize / PAGE_SIZE) as u32;

        Ok(Pager {
            file,
            file_length_pages,
            num_pages: file_length_pages,
            frames: Vec::new(),
        })
    }

    /// Allocate a new zeroed page at the end of the file. The frame starts
    /// dirty: the page exists only in memory until flushed.
    pub fn allocate_page(&mut self) -> DbResult<PageId> {
        let page_num = self.num_pages;
        self.num_pages += 1;
        if self.frames.len() <= page_num as usize {
            self.frames.resize_with(page_num as usize + 1, || None);
        }
        self.frames[page_num as usize] = Some(Frame {
            page: Box::new(Page::new()),
            pin_count: 0,
            dirty: true,
        });
        debug!("allocated page {}", page_num);
        Ok(page_num)
    }

    /// Pin `page_num` and return its buffer, loading it from disk on first
    /// touch. Fetching a page that was never allocated is an error, not an
    /// implicit allocation.
    pub fn fetch_page(&mut self, page_num: PageId) -> DbResult<&mut Page> {
        if page_num >= self.num_pages {
            return Err(DbError::Internal(format!(
                "fetch of unallocated page {} (have {})",
                page_num, self.num_pages
            )));
        }

        if self.frames.len() <= page_num as usize {
            self.frames.resize_with(page_num as usize + 1, || None);
        }

        if self.frames[page_num as usize].is_none() {
            let mut page = Box::new(Page::new());
            if page_num < self.file_length_pages {
                let offset = (page_num as u64) * (PAGE_SIZE as u64);
                self.file.seek(SeekFrom::Start(offset))?;
                self.file.read_exact(&mut page.data)?;
            }
            self.frames[page_num as usize] = Some(Frame { page, pin_count: 0, dirty: false });
        }

        let frame = self.frames[page_num as usize].as_mut().unwrap();
        frame.pin_count += 1;
        Ok(&mut frame.page)
    }

    /// Unpin a previously fetched page. `dirty` records whether the caller
    /// modified the buffer; the flag accumulates until the page is flushed.
    pub fn release_page(&mut self, page_num: PageId, dirty: bool) {
        match self.frames.get_mut(page_num as usize).and_then(Option::as_mut) {
            Some(frame) => {
                if frame.pin_count == 0 {
                    warn!("release of unpinned page {}", page_num);
                } else {
                    frame.pin_count -= 1;
                }
                frame.dirty |= dirty;
            }
            None => warn!("release of unknown page {}", page_num),
        }
    }

    /// Run `f` against a pinned page and release it clean, whatever path `f`
    /// returns through.
    pub fn read_page<R>(
        &mut self,
        page_num: PageId,
        f: impl FnOnce(&Page) -> DbResult<R>,
    ) -> DbResult<R> {
        let result = match self.fetch_page(page_num) {
            Ok(page) => f(page),
            Err(e) => return Err(e),
        };
        self.release_page(page_num, false);
        result
    }

    /// Run `f` against a pinned page and release it dirty, whatever path `f`
    /// returns through. A failed mutation may have written part of the buffer,
    /// so the frame is conservatively dirty even on error.
    pub fn update_page<R>(
        &mut self,
        page_num: PageId,
        f: impl FnOnce(&mut Page) -> DbResult<R>,
    ) -> DbResult<R> {
        let result = match self.fetch_page(page_num) {
            Ok(page) => f(page),
            Err(e) => return Err(e),
        };
        self.release_page(page_num, true);
        result
    }

    /// Allocate a fresh page and run `f` against it, releasing it dirty.
    pub fn with_new_page<R>(
        &mut self,
        f: impl FnOnce(PageId, &mut Page) -> DbResult<R>,
    ) -> DbResult<(PageId, R)> {
        let page_num = self.allocate_page()?;
        let result = self.update_page(page_num, |page| f(page_num, page))?;
        Ok((page_num, result))
    }

    /// Write page `page_num` back to disk, clearing its dirty flag. A page
    /// with no in-memory frame has nothing newer than disk and is a no-op.
    pub fn flush_page(&mut self, page_num: PageId) -> DbResult<()> {
        if let Some(frame) = self.frames.get_mut(page_num as usize).and_then(Option::as_mut) {
            let offset = (page_num as u64) * (PAGE_SIZE as u64);
            self.file.seek(SeekFrom::Start(offset))?;
            self.file.write_all(&frame.page.data)?;
            self.file.flush()?;
            frame.dirty = false;

            if page_num >= self.file_length_pages {
                self.file_length_pages = page_num + 1;
            }
        }
        Ok(())
    }

    /// Write every dirty frame back to disk.
    pub fn flush_all(&mut self) -> DbResult<()> {
        for page_num in 0..self.num_pages {
            let needs_write = matches!(
                self.frames.get(page_num as usize).and_then(Option::as_ref),
                Some(frame) if frame.dirty
            );
            if needs_write {
                self.flush_page(page_num)?;
            }
        }
        Ok(())
    }

    /// How many pages were already in the file when we opened it?
    pub fn file_length_pages(&self) -> u32 {
        self.file_length_pages
    }

    /// How many pages does the pager know about right now (on-disk + newly allocated)?
    pub fn num_pages(&self) -> u32 {
        self.num_pages
    }
}

impl Drop for Pager {
    fn drop(&mut self) {
        for (page_num, frame) in self.frames.iter().enumerate() {
            if let Some(frame) = frame {
                if frame.pin_count > 0 {
                    warn!("page {} still pinned ({}) at pager drop", page_num, frame.pin_count);
                }
            }
        }
    }
}
