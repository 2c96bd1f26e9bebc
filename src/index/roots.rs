//! The index roots table: a well-known page mapping each index id to the
//! current root page of its B+tree. The tree's root moves when it splits, and
//! descriptors never change after creation, so the moving pointer lives here
//! instead of in the index descriptor.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::catalog::IndexId;
use crate::error::{DbError, DbResult};
use crate::storage::page::{Page, PageId, PAGE_SIZE};
use crate::storage::pager::Pager;

/// Well-known location of the roots table, reserved at database
/// initialization alongside the directory page.
pub const INDEX_ROOTS_PAGE_ID: PageId = 1;

// Layout: `[count:4]{[index_id:4][root_page:4]}×count`.

fn read_entries(page: &Page) -> DbResult<Vec<(IndexId, PageId)>> {
    let mut buf = &page.data[..];
    let count = buf.read_u32::<LittleEndian>()? as usize;
    if 4 + count * 8 > PAGE_SIZE {
        return Err(DbError::Corrupted("index roots table overruns its page".into()));
    }
    let mut entries = Vec::with_capacity(count);
    for _ in 0..count {
        let index_id = buf.read_u32::<LittleEndian>()?;
        let root = buf.read_u32::<LittleEndian>()?;
        entries.push((index_id, root));
    }
    Ok(entries)
}

fn write_entries(page: &mut Page, entries: &[(IndexId, PageId)]) -> DbResult<()> {
    if 4 + entries.len() * 8 > PAGE_SIZE {
        return Err(DbError::Internal("too many indexes for the roots table".into()));
    }
    page.zero_from(0);
    let mut buf = &mut page.data[..];
    buf.write_u32::<LittleEndian>(entries.len() as u32)?;
    for &(index_id, root) in entries {
        buf.write_u32::<LittleEndian>(index_id)?;
        buf.write_u32::<LittleEndian>(root)?;
    }
    Ok(())
}

/// Reset the roots table to empty (fresh-database initialization).
pub(crate) fn init(pager: &mut Pager) -> DbResult<()> {
    pager.update_page(INDEX_ROOTS_PAGE_ID, |page| write_entries(page, &[]))
}

/// Current root of `index_id`'s tree, if the index is registered.
pub(crate) fn get(pager: &mut Pager, index_id: IndexId) -> DbResult<Option<PageId>> {
    pager.read_page(INDEX_ROOTS_PAGE_ID, |page| {
        Ok(read_entries(page)?
            .into_iter()
            .find(|&(id, _)| id == index_id)
            .map(|(_, root)| root))
    })
}

/// Record (or move) the root of `index_id`'s tree.
pub(crate) fn set(pager: &mut Pager, index_id: IndexId, root: PageId) -> DbResult<()> {
    pager.update_page(INDEX_ROOTS_PAGE_ID, |page| {
        let mut entries = read_entries(page)?;
        match entries.iter_mut().find(|(id, _)| *id == index_id) {
            Some(entry) => entry.1 = root,
            None => entries.push((index_id, root)),
        }
        write_entries(page, &entries)
    })
}

/// Unregister `index_id` (index drop).
pub(crate) fn remove(pager: &mut Pager, index_id: IndexId) -> DbResult<()> {
    pager.update_page(INDEX_ROOTS_PAGE_ID, |page| {
        let mut entries = read_entries(page)?;
        entries.retain(|&(id, _)| id != index_id);
        write_entries(page, &entries)
    })
}
