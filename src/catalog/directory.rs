use std::collections::BTreeMap;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::catalog::{IndexId, TableId};
use crate::storage::page::{PageId, PAGE_SIZE};

/// Well-known location of the directory page. Reserved at database
/// initialization and never reassigned.
pub const DIRECTORY_PAGE_ID: PageId = 0;

/// Marker validating that page 0 really holds a catalog directory.
const DIRECTORY_MAGIC: u32 = 0x4154_4C53; // "ATLS"

/// The root record of the catalog: one per database instance, living at
/// [`DIRECTORY_PAGE_ID`]. Maps every table and index id to the page holding
/// its serialized descriptor. Kept as ordered maps so the on-disk layout is
/// deterministic and recovery walks entities in id order.
///
/// Layout:
/// `[magic:4][table_count:4][index_count:4]`
/// `{[table_id:4][meta_page_id:4]}×table_count`
/// `{[index_id:4][meta_page_id:4]}×index_count`
#[derive(Debug, Default, PartialEq, Eq)]
pub struct DirectoryPage {
    table_pages: BTreeMap<TableId, PageId>,
    index_pages: BTreeMap<IndexId, PageId>,
}

impl DirectoryPage {
    /// An empty directory, used when initializing a fresh database.
    pub fn new() -> DirectoryPage {
        DirectoryPage::default()
    }

    pub fn serialized_size(&self) -> usize {
        3 * 4 + 8 * (self.table_pages.len() + self.index_pages.len())
    }

    /// Write the directory into a page buffer. The directory is the root of
    /// everything on disk, so outgrowing its single page is unrecoverable
    /// catalog misuse and aborts rather than returning a status.
    pub fn serialize_into(&self, buf: &mut [u8]) {
        assert!(
            self.serialized_size() <= PAGE_SIZE,
            "catalog directory outgrew its page ({} entries)",
            self.table_pages.len() + self.index_pages.len()
        );
        let mut buf = &mut buf[..];
        buf.write_u32::<LittleEndian>(DIRECTORY_MAGIC).unwrap();
        buf.write_u32::<LittleEndian>(self.table_pages.len() as u32).unwrap();
        buf.write_u32::<LittleEndian>(self.index_pages.len() as u32).unwrap();
        for (&id, &page_id) in &self.table_pages {
            buf.write_u32::<LittleEndian>(id).unwrap();
            buf.write_u32::<LittleEndian>(page_id).unwrap();
        }
        for (&id, &page_id) in &self.index_pages {
            buf.write_u32::<LittleEndian>(id).unwrap();
            buf.write_u32::<LittleEndian>(page_id).unwrap();
        }
    }

    /// Rebuild the directory from a page buffer. A wrong magic marker means
    /// the database root is unreadable; nothing can safely continue from
    /// there, so this aborts instead of returning a status.
    pub fn deserialize_from(buf: &[u8]) -> DirectoryPage {
        let mut buf = &buf[..];
        let magic = buf.read_u32::<LittleEndian>().unwrap();
        assert_eq!(
            magic, DIRECTORY_MAGIC,
            "catalog directory page corrupted: bad magic {:#010x}",
            magic
        );
        let table_count = buf.read_u32::<LittleEndian>().unwrap();
        let index_count = buf.read_u32::<LittleEndian>().unwrap();
        let mut directory = DirectoryPage::new();
        for _ in 0..table_count {
            let id = buf.read_u32::<LittleEndian>().unwrap();
            let page_id = buf.read_u32::<LittleEndian>().unwrap();
            directory.table_pages.insert(id, page_id);
        }
        for _ in 0..index_count {
            let id = buf.read_u32::<LittleEndian>().unwrap();
            let page_id = buf.read_u32::<LittleEndian>().unwrap();
            directory.index_pages.insert(id, page_id);
        }
        directory
    }

    pub fn insert_table(&mut self, id: TableId, meta_page_id: PageId) {
        self.table_pages.insert(id, meta_page_id);
    }

    pub fn remove_table(&mut self, id: TableId) {
        self.table_pages.remove(&id);
    }

    pub fn insert_index(&mut self, id: IndexId, meta_page_id: PageId) {
        self.index_pages.insert(id, meta_page_id);
    }

    pub fn remove_index(&mut self, id: IndexId) {
        self.index_pages.remove(&id);
    }

    /// `(table_id, meta_page_id)` pairs in ascending id order.
    pub fn tables(&self) -> impl Iterator<Item = (TableId, PageId)> + '_ {
        self.table_pages.iter().map(|(&id, &page)| (id, page))
    }

    /// `(index_id, meta_page_id)` pairs in ascending id order.
    pub fn indexes(&self) -> impl Iterator<Item = (IndexId, PageId)> + '_ {
        self.index_pages.iter().map(|(&id, &page)| (id, page))
    }

    pub fn max_table_id(&self) -> Option<TableId> {
        self.table_pages.keys().next_back().copied()
    }

    pub fn max_index_id(&self) -> Option<IndexId> {
        self.index_pages.keys().next_back().copied()
    }
}
