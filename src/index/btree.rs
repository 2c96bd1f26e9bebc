use log::debug;

use crate::catalog::schema::Schema;
use crate::catalog::IndexId;
use crate::error::{DbError, DbResult};
use crate::index::key::encode_key;
use crate::index::roots;
use crate::storage::page::{Page, PageId, PAGE_SIZE};
use crate::storage::pager::Pager;
use crate::storage::row::{RowData, RowId};
use crate::transaction::Txn;

// Node pages share an 8-byte header:
// ┌─────────────────────────────────────────────────────────────────────────┐
// │ Offset │ Length │ Description                                           │
// │────────┼────────┼───────────────────────────────────────────────────────│
// │   0    │   1    │ NODE_TYPE (0 = internal, 1 = leaf)                    │
// │   1    │   1    │ IS_ROOT   (0 = false, 1 = true)                       │
// │   2    │   4    │ PARENT_PAGE (u32): page number of parent (0 if none)  │
// │   6    │   2    │ CELL_COUNT (u16)                                      │
// └─────────────────────────────────────────────────────────────────────────┘
//
// LEAF body: cells of fixed size `key_capacity + 8`:
//   [key bytes : capacity][row page_id : 4][row slot : 4]
//
// INTERNAL body:
//   [leftmost_child : 4] then cells [separator key : capacity][child : 4];
//   number of children = cell_count + 1.

const NODE_TYPE_OFFSET: usize = 0;
const IS_ROOT_OFFSET: usize = 1;
const PARENT_PAGE_OFFSET: usize = 2;
const CELL_COUNT_OFFSET: usize = 6;
const HEADER_SIZE: usize = 8;

const NODE_INTERNAL: u8 = 0;
const NODE_LEAF: u8 = 1;

fn get_node_type(page: &Page) -> u8 {
    page.data[NODE_TYPE_OFFSET]
}

fn set_is_root(page: &mut Page, is_root: bool) {
    page.data[IS_ROOT_OFFSET] = if is_root { 1 } else { 0 };
}

fn get_parent(page: &Page) -> PageId {
    u32::from_le_bytes(page.data[PARENT_PAGE_OFFSET..PARENT_PAGE_OFFSET + 4].try_into().unwrap())
}

fn set_parent(page: &mut Page, parent: PageId) {
    page.data[PARENT_PAGE_OFFSET..PARENT_PAGE_OFFSET + 4].copy_from_slice(&parent.to_le_bytes());
}

fn get_cell_count(page: &Page) -> u16 {
    u16::from_le_bytes(page.data[CELL_COUNT_OFFSET..CELL_COUNT_OFFSET + 2].try_into().unwrap())
}

fn set_cell_count(page: &mut Page, count: u16) {
    page.data[CELL_COUNT_OFFSET..CELL_COUNT_OFFSET + 2].copy_from_slice(&count.to_le_bytes());
}

fn init_node(page: &mut Page, node_type: u8, is_root: bool) {
    page.zero_from(0);
    page.data[NODE_TYPE_OFFSET] = node_type;
    set_is_root(page, is_root);
    set_parent(page, 0);
    set_cell_count(page, 0);
}

/// One leaf cell: an encoded key and the heap location it points at.
#[derive(Debug, Clone)]
struct Entry {
    key: Vec<u8>,
    rid: RowId,
}

/// A B+tree keyed by fixed-capacity encoded byte keys, valued by heap row
/// locations. Grows to arbitrary height by splitting leaves and internal
/// nodes; the current root page is registered in the index roots table so the
/// tree can be re-opened after a restart.
///
/// On insert:
///   1. Descend from the root to the right leaf.
///   2. Read the leaf's entries, insert the new one in key order, write back.
///   3. On leaf overflow, split: allocate a new leaf, move the upper half
///      across, and push the first right-hand key into the parent.
///   4. Parent overflow splits the internal node the same way; splitting the
///      root allocates a fresh root and re-registers it.
pub struct BTreeIndex {
    index_id: IndexId,
    key_schema: Schema,
    key_capacity: usize,
    root_page: PageId,
}

impl BTreeIndex {
    /// Create a fresh tree: allocates an empty leaf root and registers it.
    pub fn create(
        pager: &mut Pager,
        index_id: IndexId,
        key_schema: Schema,
        key_capacity: usize,
    ) -> DbResult<BTreeIndex> {
        let (root_page, ()) = pager.with_new_page(|_, page| {
            init_node(page, NODE_LEAF, true);
            Ok(())
        })?;
        roots::set(pager, index_id, root_page)?;
        debug!("index {}: new tree rooted at page {}", index_id, root_page);
        Ok(BTreeIndex { index_id, key_schema, key_capacity, root_page })
    }

    /// Re-open a tree from its registered root (recovery path).
    pub fn open(
        pager: &mut Pager,
        index_id: IndexId,
        key_schema: Schema,
        key_capacity: usize,
    ) -> DbResult<BTreeIndex> {
        let root_page = roots::get(pager, index_id)?.ok_or_else(|| {
            DbError::Corrupted(format!("index {} has no registered root", index_id))
        })?;
        Ok(BTreeIndex { index_id, key_schema, key_capacity, root_page })
    }

    pub fn key_capacity(&self) -> usize {
        self.key_capacity
    }

    /// Insert `(key_row, rid)`. Keys are unique; re-inserting one fails.
    /// `_txn` is the caller's transaction context, opaque to the tree.
    pub fn insert(
        &mut self,
        pager: &mut Pager,
        key_row: &RowData,
        rid: RowId,
        _txn: Option<&Txn>,
    ) -> DbResult<()> {
        let key = encode_key(key_row, &self.key_schema, self.key_capacity)?;
        debug!("index {}: insert into root {}", self.index_id, self.root_page);
        self.insert_into_page(pager, self.root_page, key, rid)
    }

    /// Find the heap location stored under `key_row`, if any.
    pub fn lookup(&self, pager: &mut Pager, key_row: &RowData) -> DbResult<Option<RowId>> {
        let key = encode_key(key_row, &self.key_schema, self.key_capacity)?;
        let mut page_num = self.root_page;
        loop {
            let node_type = pager.read_page(page_num, |page| Ok(get_node_type(page)))?;
            if node_type == NODE_LEAF {
                let entries = self.read_leaf(pager, page_num)?;
                return Ok(entries
                    .binary_search_by(|e| e.key.as_slice().cmp(&key))
                    .ok()
                    .map(|i| entries[i].rid));
            }
            let (keys, children) = self.read_internal(pager, page_num)?;
            page_num = Self::descend(&keys, &children, &key);
        }
    }

    /// Unregister the tree's root. The node pages themselves are not
    /// reclaimed; the pager has no free list.
    pub fn destroy(self, pager: &mut Pager) -> DbResult<()> {
        roots::remove(pager, self.index_id)
    }

    /// Child of an internal node that covers `key`: the child left of the
    /// first separator greater than `key`, or the rightmost child.
    fn descend(keys: &[Vec<u8>], children: &[PageId], key: &[u8]) -> PageId {
        for (i, separator) in keys.iter().enumerate() {
            if key < separator.as_slice() {
                return children[i];
            }
        }
        children[keys.len()]
    }

    fn max_leaf_entries(&self) -> usize {
        (PAGE_SIZE - HEADER_SIZE) / (self.key_capacity + 8)
    }

    fn max_internal_keys(&self) -> usize {
        (PAGE_SIZE - HEADER_SIZE - 4) / (self.key_capacity + 4)
    }

    /// Recursive helper to insert into page `page_num`. May split leaf or
    /// internal pages on the way back up.
    fn insert_into_page(
        &mut self,
        pager: &mut Pager,
        page_num: PageId,
        key: Vec<u8>,
        rid: RowId,
    ) -> DbResult<()> {
        let node_type = pager.read_page(page_num, |page| Ok(get_node_type(page)))?;

        if node_type == NODE_LEAF {
            let mut entries = self.read_leaf(pager, page_num)?;
            let position = match entries.binary_search_by(|e| e.key.as_slice().cmp(&key)) {
                Ok(_) => {
                    return Err(DbError::Internal(format!(
                        "duplicate key in index {}",
                        self.index_id
                    )));
                }
                Err(position) => position,
            };
            entries.insert(position, Entry { key, rid });

            if entries.len() <= self.max_leaf_entries() {
                return self.write_leaf(pager, page_num, &entries);
            }
            debug!("index {}: leaf {} overflowed, splitting", self.index_id, page_num);
            return self.split_leaf(pager, page_num, entries);
        }

        let (keys, children) = self.read_internal(pager, page_num)?;
        let child = Self::descend(&keys, &children, &key);
        self.insert_into_page(pager, child, key, rid)
    }

    /// Split an overflowing leaf: keep the lower half in place, move the upper
    /// half to a new leaf, and push the first right-hand key to the parent.
    fn split_leaf(
        &mut self,
        pager: &mut Pager,
        leaf_page: PageId,
        entries: Vec<Entry>,
    ) -> DbResult<()> {
        let split_at = entries.len() / 2;
        let (left, right) = entries.split_at(split_at);

        self.write_leaf(pager, leaf_page, left)?;

        let parent = pager.read_page(leaf_page, |page| Ok(get_parent(page)))?;
        let (new_leaf, ()) = pager.with_new_page(|_, page| {
            init_node(page, NODE_LEAF, false);
            set_parent(page, parent);
            Ok(())
        })?;
        self.write_leaf(pager, new_leaf, right)?;

        let separator = right[0].key.clone();
        debug!(
            "index {}: split leaf {} -> {} ({} + {} entries)",
            self.index_id,
            leaf_page,
            new_leaf,
            left.len(),
            right.len()
        );
        self.insert_in_parent(pager, leaf_page, separator, new_leaf)
    }

    /// Insert a `(separator, new_page)` entry into the parent of `old_page`,
    /// growing a new root when `old_page` was the root.
    fn insert_in_parent(
        &mut self,
        pager: &mut Pager,
        old_page: PageId,
        separator: Vec<u8>,
        new_page: PageId,
    ) -> DbResult<()> {
        if old_page == self.root_page {
            let capacity = self.key_capacity;
            let (new_root, ()) = pager.with_new_page(|_, page| {
                init_node(page, NODE_INTERNAL, true);
                let mut offset = HEADER_SIZE;
                page.data[offset..offset + 4].copy_from_slice(&old_page.to_le_bytes());
                offset += 4;
                page.data[offset..offset + capacity].copy_from_slice(&separator);
                offset += capacity;
                page.data[offset..offset + 4].copy_from_slice(&new_page.to_le_bytes());
                set_cell_count(page, 1);
                Ok(())
            })?;
            for child in [old_page, new_page] {
                pager.update_page(child, |page| {
                    set_is_root(page, false);
                    set_parent(page, new_root);
                    Ok(())
                })?;
            }
            self.root_page = new_root;
            roots::set(pager, self.index_id, new_root)?;
            debug!("index {}: new root at page {}", self.index_id, new_root);
            return Ok(());
        }

        let parent_page = pager.read_page(old_page, |page| Ok(get_parent(page)))?;
        let (mut keys, mut children) = self.read_internal(pager, parent_page)?;

        let mut insert_idx = 0;
        while insert_idx < keys.len() && separator.as_slice() > keys[insert_idx].as_slice() {
            insert_idx += 1;
        }
        children.insert(insert_idx + 1, new_page);
        keys.insert(insert_idx, separator);

        if keys.len() <= self.max_internal_keys() {
            self.write_internal(pager, parent_page, &keys, &children)?;
            return pager.update_page(new_page, |page| {
                set_parent(page, parent_page);
                Ok(())
            });
        }
        debug!(
            "index {}: internal {} overflowed, splitting",
            self.index_id, parent_page
        );
        self.split_internal(pager, parent_page, keys, children)
    }

    /// Split an overflowing internal node, pushing the middle key up.
    fn split_internal(
        &mut self,
        pager: &mut Pager,
        page_num: PageId,
        keys: Vec<Vec<u8>>,
        children: Vec<PageId>,
    ) -> DbResult<()> {
        let mid = keys.len() / 2;
        let separator = keys[mid].clone();

        let left_keys = &keys[..mid];
        let left_children = &children[..mid + 1];
        let right_keys = &keys[mid + 1..];
        let right_children = &children[mid + 1..];

        self.write_internal(pager, page_num, left_keys, left_children)?;

        let parent = pager.read_page(page_num, |page| Ok(get_parent(page)))?;
        let (new_internal, ()) = pager.with_new_page(|_, page| {
            init_node(page, NODE_INTERNAL, false);
            set_parent(page, parent);
            Ok(())
        })?;
        self.write_internal(pager, new_internal, right_keys, right_children)?;

        for &child in right_children {
            pager.update_page(child, |page| {
                set_parent(page, new_internal);
                Ok(())
            })?;
        }

        if page_num == self.root_page {
            let capacity = self.key_capacity;
            let (new_root, ()) = pager.with_new_page(|_, page| {
                init_node(page, NODE_INTERNAL, true);
                let mut offset = HEADER_SIZE;
                page.data[offset..offset + 4].copy_from_slice(&page_num.to_le_bytes());
                offset += 4;
                page.data[offset..offset + capacity].copy_from_slice(&separator);
                offset += capacity;
                page.data[offset..offset + 4].copy_from_slice(&new_internal.to_le_bytes());
                set_cell_count(page, 1);
                Ok(())
            })?;
            for child in [page_num, new_internal] {
                pager.update_page(child, |page| {
                    set_is_root(page, false);
                    set_parent(page, new_root);
                    Ok(())
                })?;
            }
            self.root_page = new_root;
            roots::set(pager, self.index_id, new_root)?;
            debug!("index {}: new root at page {}", self.index_id, new_root);
            return Ok(());
        }

        self.insert_in_parent(pager, page_num, separator, new_internal)
    }

    /// Read every entry of a leaf, in key order.
    fn read_leaf(&self, pager: &mut Pager, page_num: PageId) -> DbResult<Vec<Entry>> {
        let capacity = self.key_capacity;
        pager.read_page(page_num, |page| {
            if get_node_type(page) != NODE_LEAF {
                return Err(DbError::Corrupted(format!("page {} is not a leaf", page_num)));
            }
            let count = get_cell_count(page) as usize;
            let cell_size = capacity + 8;
            if HEADER_SIZE + count * cell_size > PAGE_SIZE {
                return Err(DbError::Corrupted(format!("leaf {} cell count overruns page", page_num)));
            }
            let mut entries = Vec::with_capacity(count);
            let mut offset = HEADER_SIZE;
            for _ in 0..count {
                let key = page.data[offset..offset + capacity].to_vec();
                let page_id = u32::from_le_bytes(
                    page.data[offset + capacity..offset + capacity + 4].try_into().unwrap(),
                );
                let slot = u32::from_le_bytes(
                    page.data[offset + capacity + 4..offset + cell_size].try_into().unwrap(),
                );
                entries.push(Entry { key, rid: RowId::new(page_id, slot) });
                offset += cell_size;
            }
            Ok(entries)
        })
    }

    /// Rewrite a leaf with the given (sorted) entries.
    fn write_leaf(&self, pager: &mut Pager, page_num: PageId, entries: &[Entry]) -> DbResult<()> {
        let capacity = self.key_capacity;
        if entries.len() > self.max_leaf_entries() {
            return Err(DbError::Internal(format!("leaf {} cannot hold {} entries", page_num, entries.len())));
        }
        pager.update_page(page_num, |page| {
            page.zero_from(HEADER_SIZE);
            let mut offset = HEADER_SIZE;
            for entry in entries {
                page.data[offset..offset + capacity].copy_from_slice(&entry.key);
                page.data[offset + capacity..offset + capacity + 4]
                    .copy_from_slice(&entry.rid.page_id.to_le_bytes());
                page.data[offset + capacity + 4..offset + capacity + 8]
                    .copy_from_slice(&entry.rid.slot.to_le_bytes());
                offset += capacity + 8;
            }
            set_cell_count(page, entries.len() as u16);
            Ok(())
        })
    }

    /// Read an internal node into its separator keys and child pointers;
    /// `children.len() == keys.len() + 1`.
    fn read_internal(
        &self,
        pager: &mut Pager,
        page_num: PageId,
    ) -> DbResult<(Vec<Vec<u8>>, Vec<PageId>)> {
        let capacity = self.key_capacity;
        pager.read_page(page_num, |page| {
            if get_node_type(page) != NODE_INTERNAL {
                return Err(DbError::Corrupted(format!("page {} is not an internal node", page_num)));
            }
            let count = get_cell_count(page) as usize;
            if HEADER_SIZE + 4 + count * (capacity + 4) > PAGE_SIZE {
                return Err(DbError::Corrupted(format!("internal {} cell count overruns page", page_num)));
            }
            let mut keys = Vec::with_capacity(count);
            let mut children = Vec::with_capacity(count + 1);
            let mut offset = HEADER_SIZE;
            children.push(u32::from_le_bytes(page.data[offset..offset + 4].try_into().unwrap()));
            offset += 4;
            for _ in 0..count {
                keys.push(page.data[offset..offset + capacity].to_vec());
                offset += capacity;
                children.push(u32::from_le_bytes(page.data[offset..offset + 4].try_into().unwrap()));
                offset += 4;
            }
            Ok((keys, children))
        })
    }

    /// Rewrite an internal node from its keys and children.
    fn write_internal(
        &self,
        pager: &mut Pager,
        page_num: PageId,
        keys: &[Vec<u8>],
        children: &[PageId],
    ) -> DbResult<()> {
        if children.len() != keys.len() + 1 {
            return Err(DbError::Internal(
                "internal node children must outnumber keys by one".into(),
            ));
        }
        if keys.len() > self.max_internal_keys() {
            return Err(DbError::Internal(format!(
                "internal {} cannot hold {} keys",
                page_num,
                keys.len()
            )));
        }
        let capacity = self.key_capacity;
        pager.update_page(page_num, |page| {
            page.zero_from(HEADER_SIZE);
            let mut offset = HEADER_SIZE;
            page.data[offset..offset + 4].copy_from_slice(&children[0].to_le_bytes());
            offset += 4;
            for (key, &child) in keys.iter().zip(&children[1..]) {
                page.data[offset..offset + capacity].copy_from_slice(key);
                offset += capacity;
                page.data[offset..offset + 4].copy_from_slice(&child.to_le_bytes());
                offset += 4;
            }
            set_cell_count(page, keys.len() as u16);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::schema::Column;
    use crate::storage::row::{ColumnType, ColumnValue};

    fn int_key_schema() -> Schema {
        Schema::new(vec![Column::new("n", ColumnType::Integer)])
    }

    fn key(n: i32) -> RowData {
        RowData(vec![ColumnValue::Integer(n)])
    }

    fn fresh_tree(dir: &tempfile::TempDir) -> (Pager, BTreeIndex) {
        let mut pager = Pager::open(dir.path().join("index.db")).unwrap();
        pager.allocate_page().unwrap(); // page 0: directory slot
        pager.allocate_page().unwrap(); // page 1: roots table
        roots::init(&mut pager).unwrap();
        let tree = BTreeIndex::create(&mut pager, 0, int_key_schema(), 16).unwrap();
        (pager, tree)
    }

    #[test]
    fn inserts_survive_leaf_splits() {
        let dir = tempfile::tempdir().unwrap();
        let (mut pager, mut tree) = fresh_tree(&dir);

        // 16-byte keys, so a leaf holds ~170 entries; 2000 forces several
        // levels of splits.
        let total = 2000;
        for n in 0..total {
            let spread = (n * 7919) % total; // non-sequential insertion order
            tree.insert(&mut pager, &key(spread), RowId::new(100 + spread as u32, 0), None)
                .unwrap();
        }

        for n in 0..total {
            let found = tree.lookup(&mut pager, &key(n)).unwrap();
            assert_eq!(found, Some(RowId::new(100 + n as u32, 0)), "key {}", n);
        }
        assert_eq!(tree.lookup(&mut pager, &key(total)).unwrap(), None);
    }

    #[test]
    fn wide_keys_split_internal_nodes() {
        let dir = tempfile::tempdir().unwrap();
        let mut pager = Pager::open(dir.path().join("index.db")).unwrap();
        pager.allocate_page().unwrap();
        pager.allocate_page().unwrap();
        roots::init(&mut pager).unwrap();

        // 256-byte keys leave room for ~15 entries per node, so a few hundred
        // inserts split internal nodes too, not just leaves.
        let schema = Schema::new(vec![Column::new("code", ColumnType::Char(248))]);
        let mut tree = BTreeIndex::create(&mut pager, 1, schema, 256).unwrap();
        let wide_key = |n: i32| RowData(vec![ColumnValue::Char(format!("k{:06}", n))]);

        let total = 400;
        for n in 0..total {
            let spread = (n * 211) % total;
            tree.insert(&mut pager, &wide_key(spread), RowId::new(spread as u32, 2), None)
                .unwrap();
        }
        for n in 0..total {
            assert_eq!(
                tree.lookup(&mut pager, &wide_key(n)).unwrap(),
                Some(RowId::new(n as u32, 2)),
                "key {}",
                n
            );
        }
    }

    #[test]
    fn duplicate_key_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (mut pager, mut tree) = fresh_tree(&dir);

        tree.insert(&mut pager, &key(1), RowId::new(5, 0), None).unwrap();
        assert!(tree.insert(&mut pager, &key(1), RowId::new(6, 0), None).is_err());
        assert_eq!(tree.lookup(&mut pager, &key(1)).unwrap(), Some(RowId::new(5, 0)));
    }

    #[test]
    fn reopen_finds_persisted_root() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.db");

        {
            let mut pager = Pager::open(&path).unwrap();
            pager.allocate_page().unwrap();
            pager.allocate_page().unwrap();
            roots::init(&mut pager).unwrap();
            let mut tree = BTreeIndex::create(&mut pager, 4, int_key_schema(), 16).unwrap();
            for n in 0..500 {
                tree.insert(&mut pager, &key(n), RowId::new(n as u32, 1), None).unwrap();
            }
            pager.flush_all().unwrap();
        }

        let mut pager = Pager::open(&path).unwrap();
        let tree = BTreeIndex::open(&mut pager, 4, int_key_schema(), 16).unwrap();
        assert_eq!(tree.lookup(&mut pager, &key(123)).unwrap(), Some(RowId::new(123, 1)));
        assert_eq!(tree.lookup(&mut pager, &key(777)).unwrap(), None);
    }

    #[test]
    fn destroy_unregisters_root() {
        let dir = tempfile::tempdir().unwrap();
        let (mut pager, tree) = fresh_tree(&dir);
        tree.destroy(&mut pager).unwrap();
        assert!(BTreeIndex::open(&mut pager, 0, int_key_schema(), 16).is_err());
    }
}
