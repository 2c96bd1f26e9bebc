use log::debug;

use crate::catalog::schema::Schema;
use crate::error::{DbError, DbResult};
use crate::storage::page::{Page, PageId, PAGE_SIZE};
use crate::storage::pager::Pager;
use crate::storage::row::{RowData, RowId};

// ┌──────────────────────────────────────────────────────────────────────┐
// │ Offset │ Length │ Description                                        │
// │────────┼────────┼────────────────────────────────────────────────────│
// │   0    │   4    │ NEXT_PAGE (u32): next page in the chain (0 = none) │
// │   4    │   2    │ CELL_COUNT (u16): rows stored in this page         │
// │────────┼────────┼────────────────────────────────────────────────────│
// │   6    │ (PAGE_SIZE − 6) │ Cells: [row_len,u32][row_bytes]…          │
// └──────────────────────────────────────────────────────────────────────┘

const NEXT_PAGE_OFFSET: usize = 0;
const CELL_COUNT_OFFSET: usize = 4;
const HEAP_HEADER_SIZE: usize = 6;

fn get_next_page(page: &Page) -> PageId {
    u32::from_le_bytes(page.data[NEXT_PAGE_OFFSET..NEXT_PAGE_OFFSET + 4].try_into().unwrap())
}

fn set_next_page(page: &mut Page, next: PageId) {
    page.data[NEXT_PAGE_OFFSET..NEXT_PAGE_OFFSET + 4].copy_from_slice(&next.to_le_bytes());
}

fn get_cell_count(page: &Page) -> u16 {
    u16::from_le_bytes(page.data[CELL_COUNT_OFFSET..CELL_COUNT_OFFSET + 2].try_into().unwrap())
}

fn set_cell_count(page: &mut Page, count: u16) {
    page.data[CELL_COUNT_OFFSET..CELL_COUNT_OFFSET + 2].copy_from_slice(&count.to_le_bytes());
}

/// Byte offset just past the last cell, and the number of cells.
fn used_extent(page: &Page) -> DbResult<(usize, u16)> {
    let count = get_cell_count(page);
    let mut offset = HEAP_HEADER_SIZE;
    for _ in 0..count {
        if offset + 4 > PAGE_SIZE {
            return Err(DbError::Corrupted("heap cell runs past page end".into()));
        }
        let len = u32::from_le_bytes(page.data[offset..offset + 4].try_into().unwrap()) as usize;
        offset += 4 + len;
        if offset > PAGE_SIZE {
            return Err(DbError::Corrupted("heap cell runs past page end".into()));
        }
    }
    Ok((offset, count))
}

/// Row storage for one table: a singly linked chain of pages holding
/// serialized rows, entered through a first page whose id is recorded in the
/// table's on-disk metadata. Rows are append-only; the catalog layer does not
/// update or delete them.
pub struct TableHeap {
    first_page_id: PageId,
    schema: Schema,
}

impl TableHeap {
    /// Create a fresh heap: allocates and initializes its first page.
    pub fn create(pager: &mut Pager, schema: Schema) -> DbResult<TableHeap> {
        let (first_page_id, ()) = pager.with_new_page(|_, page| {
            set_next_page(page, 0);
            set_cell_count(page, 0);
            Ok(())
        })?;
        debug!("created table heap entered at page {}", first_page_id);
        Ok(TableHeap { first_page_id, schema })
    }

    /// Re-open a heap from its recorded entry page (recovery path). No pages
    /// are touched until the heap is used.
    pub fn open(first_page_id: PageId, schema: Schema) -> TableHeap {
        TableHeap { first_page_id, schema }
    }

    pub fn first_page_id(&self) -> PageId {
        self.first_page_id
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Append `row` to the heap, linking a new page onto the chain when the
    /// last one is full. Returns where the row landed.
    pub fn insert_row(&mut self, pager: &mut Pager, row: &RowData) -> DbResult<RowId> {
        if row.0.len() != self.schema.len() {
            return Err(DbError::Internal(format!(
                "row has {} values, schema has {} columns",
                row.0.len(),
                self.schema.len()
            )));
        }
        let bytes = row.serialize();
        let cell_size = 4 + bytes.len();
        if HEAP_HEADER_SIZE + cell_size > PAGE_SIZE {
            return Err(DbError::Internal(format!(
                "row of {} bytes does not fit in one page",
                bytes.len()
            )));
        }

        let last = self.last_page(pager)?;
        let fits = pager.read_page(last, |page| {
            let (used, _) = used_extent(page)?;
            Ok(used + cell_size <= PAGE_SIZE)
        })?;

        let target = if fits {
            last
        } else {
            let (fresh, ()) = pager.with_new_page(|_, page| {
                set_next_page(page, 0);
                set_cell_count(page, 0);
                Ok(())
            })?;
            pager.update_page(last, |page| {
                set_next_page(page, fresh);
                Ok(())
            })?;
            debug!("heap page {} full, chained page {}", last, fresh);
            fresh
        };

        let slot = pager.update_page(target, |page| {
            let (used, count) = used_extent(page)?;
            page.data[used..used + 4].copy_from_slice(&(bytes.len() as u32).to_le_bytes());
            page.data[used + 4..used + 4 + bytes.len()].copy_from_slice(&bytes);
            set_cell_count(page, count + 1);
            Ok(count as u32)
        })?;

        Ok(RowId::new(target, slot))
    }

    /// Walk the whole chain and return every row with its location, in
    /// insertion order.
    pub fn scan(&self, pager: &mut Pager) -> DbResult<Vec<(RowId, RowData)>> {
        let mut rows = Vec::new();
        let mut page_id = self.first_page_id;
        while page_id != 0 {
            let next = pager.read_page(page_id, |page| {
                let count = get_cell_count(page);
                let mut offset = HEAP_HEADER_SIZE;
                for slot in 0..count {
                    if offset + 4 > PAGE_SIZE {
                        return Err(DbError::Corrupted("heap cell runs past page end".into()));
                    }
                    let len = u32::from_le_bytes(
                        page.data[offset..offset + 4].try_into().unwrap(),
                    ) as usize;
                    offset += 4;
                    if offset + len > PAGE_SIZE {
                        return Err(DbError::Corrupted("heap cell runs past page end".into()));
                    }
                    let row = RowData::deserialize(&page.data[offset..offset + len])?;
                    rows.push((RowId::new(page_id, slot as u32), row));
                    offset += len;
                }
                Ok(get_next_page(page))
            })?;
            page_id = next;
        }
        Ok(rows)
    }

    fn last_page(&self, pager: &mut Pager) -> DbResult<PageId> {
        let mut page_id = self.first_page_id;
        loop {
            let next = pager.read_page(page_id, |page| Ok(get_next_page(page)))?;
            if next == 0 {
                return Ok(page_id);
            }
            page_id = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::schema::Column;
    use crate::storage::row::{ColumnType, ColumnValue};

    fn test_schema() -> Schema {
        Schema::new(vec![
            Column::new("id", ColumnType::Integer),
            Column::new("name", ColumnType::Text),
        ])
    }

    fn row(i: i32) -> RowData {
        RowData(vec![
            ColumnValue::Integer(i),
            ColumnValue::Text(format!("user{:04}", i)),
        ])
    }

    #[test]
    fn insert_and_scan_across_page_boundary() {
        let dir = tempfile::tempdir().unwrap();
        let mut pager = Pager::open(dir.path().join("heap.db")).unwrap();
        let mut heap = TableHeap::create(&mut pager, test_schema()).unwrap();

        // Each row costs ~30 bytes, so a few hundred spill past one page.
        let total = 400;
        for i in 0..total {
            heap.insert_row(&mut pager, &row(i)).unwrap();
        }

        let rows = heap.scan(&mut pager).unwrap();
        assert_eq!(rows.len(), total as usize);
        assert_eq!(rows[0].1, row(0));
        assert_eq!(rows[total as usize - 1].1, row(total - 1));

        let distinct_pages: std::collections::HashSet<_> =
            rows.iter().map(|(rid, _)| rid.page_id).collect();
        assert!(distinct_pages.len() > 1, "expected the chain to grow");
    }

    #[test]
    fn oversized_row_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut pager = Pager::open(dir.path().join("heap.db")).unwrap();
        let schema = Schema::new(vec![Column::new("blob", ColumnType::Text)]);
        let mut heap = TableHeap::create(&mut pager, schema).unwrap();

        let huge = RowData(vec![ColumnValue::Text("x".repeat(PAGE_SIZE))]);
        assert!(heap.insert_row(&mut pager, &huge).is_err());

        assert!(heap.scan(&mut pager).unwrap().is_empty());
    }

    #[test]
    fn wrong_arity_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut pager = Pager::open(dir.path().join("heap.db")).unwrap();
        let mut heap = TableHeap::create(&mut pager, test_schema()).unwrap();

        let short = RowData(vec![ColumnValue::Integer(1)]);
        assert!(heap.insert_row(&mut pager, &short).is_err());
    }
}
