use std::collections::HashMap;

use log::{debug, info, warn};

use crate::error::{DbError, DbResult};
use crate::index::roots;
use crate::storage::heap::TableHeap;
use crate::storage::page::PageId;
use crate::storage::pager::Pager;
use crate::storage::row::{RowData, RowId};
use crate::transaction::Txn;

pub mod directory;
pub mod index;
pub mod schema;
pub mod table;

pub use directory::{DirectoryPage, DIRECTORY_PAGE_ID};
pub use index::{IndexInfo, IndexMetadata};
pub use schema::{Column, Schema};
pub use table::{TableInfo, TableMetadata};

/// Identifier of a table, unique for the lifetime of the database and never
/// reused after a drop.
pub type TableId = u32;

/// Identifier of an index, with the same uniqueness guarantee.
pub type IndexId = u32;

/// The catalog: the single entry point the rest of the engine uses to create,
/// drop, look up and recover tables and indexes. It owns the pager, the
/// directory page mirror, and every runtime handle; after each successful
/// mutation the in-memory maps and the persisted directory agree.
///
/// The catalog performs no internal locking. Callers must serialize mutating
/// operations, which the `&mut self` receivers enforce within one process.
pub struct Catalog {
    pager: Pager,
    directory: DirectoryPage,
    table_names: HashMap<String, TableId>,
    tables: HashMap<TableId, TableInfo>,
    /// Index namespaces, nested per table: table name → index name → id.
    index_names: HashMap<String, HashMap<String, IndexId>>,
    indexes: HashMap<IndexId, IndexInfo>,
    next_table_id: TableId,
    next_index_id: IndexId,
}

impl Catalog {
    /// Bring up the catalog over `pager`. With `init` set, reserves the
    /// well-known pages and persists an empty directory (fresh database);
    /// otherwise reads the directory back and reconstructs a runtime handle
    /// for every table and index it references — tables first, since an index
    /// load resolves its owning table's handle.
    pub fn open(mut pager: Pager, init: bool) -> DbResult<Catalog> {
        if init {
            while pager.num_pages() <= roots::INDEX_ROOTS_PAGE_ID {
                pager.allocate_page()?;
            }
            let directory = DirectoryPage::new();
            pager.update_page(DIRECTORY_PAGE_ID, |page| {
                page.zero_from(0);
                directory.serialize_into(&mut page.data);
                Ok(())
            })?;
            roots::init(&mut pager)?;
            pager.flush_page(DIRECTORY_PAGE_ID)?;
            pager.flush_page(roots::INDEX_ROOTS_PAGE_ID)?;
            info!("initialized fresh catalog");
            return Ok(Catalog {
                pager,
                directory,
                table_names: HashMap::new(),
                tables: HashMap::new(),
                index_names: HashMap::new(),
                indexes: HashMap::new(),
                next_table_id: 0,
                next_index_id: 0,
            });
        }

        let directory = pager.read_page(DIRECTORY_PAGE_ID, |page| {
            Ok(DirectoryPage::deserialize_from(&page.data))
        })?;
        let next_table_id = directory.max_table_id().map_or(0, |id| id + 1);
        let next_index_id = directory.max_index_id().map_or(0, |id| id + 1);

        let mut catalog = Catalog {
            pager,
            directory,
            table_names: HashMap::new(),
            tables: HashMap::new(),
            index_names: HashMap::new(),
            indexes: HashMap::new(),
            next_table_id,
            next_index_id,
        };

        let tables: Vec<_> = catalog.directory.tables().collect();
        for (table_id, page_id) in tables {
            catalog.load_table(table_id, page_id)?;
        }
        let indexes: Vec<_> = catalog.directory.indexes().collect();
        for (index_id, page_id) in indexes {
            catalog.load_index(index_id, page_id)?;
        }
        info!(
            "opened catalog: {} tables, {} indexes",
            catalog.tables.len(),
            catalog.indexes.len()
        );
        Ok(catalog)
    }

    /// Create a table and return its handle. The catalog stores its own copy
    /// of `schema`, independent of the caller's.
    pub fn create_table(&mut self, name: &str, schema: &Schema) -> DbResult<&TableInfo> {
        if self.table_names.contains_key(name) {
            return Err(DbError::TableAlreadyExists(name.into()));
        }

        let table_id = self.next_table_id;
        let owned = schema.deep_copy();
        let heap = TableHeap::create(&mut self.pager, owned.clone())?;
        let metadata = TableMetadata::new(table_id, name, heap.first_page_id(), owned);
        let (meta_page_id, ()) = self
            .pager
            .with_new_page(|_, page| metadata.serialize_into(&mut page.data))?;

        self.directory.insert_table(table_id, meta_page_id);
        if let Err(e) = self.persist_directory() {
            self.directory.remove_table(table_id);
            return Err(e);
        }

        self.next_table_id += 1;
        self.table_names.insert(name.to_string(), table_id);
        self.index_names.insert(name.to_string(), HashMap::new());
        self.tables.insert(table_id, TableInfo::new(metadata, heap));
        info!("created table '{}' (id {}, descriptor page {})", name, table_id, meta_page_id);
        Ok(&self.tables[&table_id])
    }

    pub fn get_table(&self, name: &str) -> DbResult<&TableInfo> {
        let table_id = self
            .table_names
            .get(name)
            .ok_or_else(|| DbError::TableNotExist(name.into()))?;
        self.tables
            .get(table_id)
            .ok_or_else(|| DbError::Internal(format!("table id {} has no runtime handle", table_id)))
    }

    pub fn get_table_by_id(&self, table_id: TableId) -> DbResult<&TableInfo> {
        self.tables
            .get(&table_id)
            .ok_or_else(|| DbError::TableNotExist(format!("#{}", table_id)))
    }

    /// Every table handle, in id order. An empty catalog is an error here,
    /// not an empty success.
    pub fn get_tables(&self) -> DbResult<Vec<&TableInfo>> {
        if self.tables.is_empty() {
            return Err(DbError::Internal("catalog holds no tables".into()));
        }
        let mut all: Vec<_> = self.tables.values().collect();
        all.sort_by_key(|t| t.table_id());
        Ok(all)
    }

    /// Create an index over `key_columns` of `table_name`. Column names are
    /// resolved against the table's schema in the given order; the first
    /// unknown name rejects the whole index.
    pub fn create_index(
        &mut self,
        table_name: &str,
        index_name: &str,
        key_columns: &[&str],
    ) -> DbResult<&IndexInfo> {
        let table_id = *self
            .table_names
            .get(table_name)
            .ok_or_else(|| DbError::TableNotExist(table_name.into()))?;
        if self
            .index_names
            .get(table_name)
            .is_some_and(|namespace| namespace.contains_key(index_name))
        {
            return Err(DbError::IndexAlreadyExists(index_name.into()));
        }

        let table = &self.tables[&table_id];
        let mut key_map = Vec::with_capacity(key_columns.len());
        for column in key_columns {
            match table.schema().column_index(column) {
                Some(position) => key_map.push(position as u32),
                None => return Err(DbError::ColumnNameNotExist((*column).into())),
            }
        }

        let index_id = self.next_index_id;
        let metadata = IndexMetadata::new(index_id, index_name, table_id, key_map)?;
        let binding = IndexInfo::build(&mut self.pager, metadata.clone(), table)?;

        let meta_page_id = match self
            .pager
            .with_new_page(|_, page| metadata.serialize_into(&mut page.data))
        {
            Ok((page_id, ())) => page_id,
            Err(e) => {
                let _ = binding.destroy(&mut self.pager);
                return Err(e);
            }
        };

        self.directory.insert_index(index_id, meta_page_id);
        if let Err(e) = self.persist_directory() {
            self.directory.remove_index(index_id);
            let _ = binding.destroy(&mut self.pager);
            return Err(e);
        }

        self.next_index_id += 1;
        self.index_names
            .entry(table_name.to_string())
            .or_default()
            .insert(index_name.to_string(), index_id);
        self.indexes.insert(index_id, binding);
        info!(
            "created index '{}' on '{}' (id {}, descriptor page {})",
            index_name, table_name, index_id, meta_page_id
        );
        Ok(&self.indexes[&index_id])
    }

    pub fn get_index(&self, table_name: &str, index_name: &str) -> DbResult<&IndexInfo> {
        if !self.table_names.contains_key(table_name) {
            return Err(DbError::TableNotExist(table_name.into()));
        }
        let index_id = self
            .index_names
            .get(table_name)
            .and_then(|namespace| namespace.get(index_name))
            .ok_or_else(|| DbError::IndexNotFound(index_name.into()))?;
        self.indexes
            .get(index_id)
            .ok_or_else(|| DbError::Internal(format!("index id {} has no runtime handle", index_id)))
    }

    /// Every index registered under `table_name`, in id order. Unlike
    /// [`Catalog::get_tables`], an empty list is a valid answer.
    pub fn get_table_indexes(&self, table_name: &str) -> DbResult<Vec<&IndexInfo>> {
        let namespace = self
            .index_names
            .get(table_name)
            .ok_or_else(|| DbError::TableNotExist(table_name.into()))?;
        let mut all: Vec<_> = namespace
            .values()
            .filter_map(|id| self.indexes.get(id))
            .collect();
        all.sort_by_key(|i| i.index_id());
        Ok(all)
    }

    /// Drop a table and everything under it: dependent indexes go first, then
    /// the table itself, and the persisted directory reflects the result.
    pub fn drop_table(&mut self, name: &str) -> DbResult<()> {
        let table_id = *self
            .table_names
            .get(name)
            .ok_or_else(|| DbError::TableNotExist(name.into()))?;

        let dependent: Vec<IndexId> = self
            .index_names
            .get(name)
            .map(|namespace| namespace.values().copied().collect())
            .unwrap_or_default();
        for index_id in dependent {
            if let Some(binding) = self.indexes.remove(&index_id) {
                if let Err(e) = binding.destroy(&mut self.pager) {
                    warn!("failed to unregister index {} while dropping '{}': {}", index_id, name, e);
                }
            }
            self.directory.remove_index(index_id);
        }
        self.index_names.remove(name);
        self.table_names.remove(name);
        self.tables.remove(&table_id);
        self.directory.remove_table(table_id);
        self.persist_directory()?;
        info!("dropped table '{}' (id {})", name, table_id);
        Ok(())
    }

    /// Drop one index. The table's or the index's absence both surface as
    /// [`DbError::IndexNotFound`].
    pub fn drop_index(&mut self, table_name: &str, index_name: &str) -> DbResult<()> {
        let index_id = *self
            .index_names
            .get(table_name)
            .and_then(|namespace| namespace.get(index_name))
            .ok_or_else(|| DbError::IndexNotFound(index_name.into()))?;

        if let Some(binding) = self.indexes.remove(&index_id) {
            if let Err(e) = binding.destroy(&mut self.pager) {
                warn!("failed to unregister index {}: {}", index_id, e);
            }
        }
        if let Some(namespace) = self.index_names.get_mut(table_name) {
            namespace.remove(index_name);
        }
        self.directory.remove_index(index_id);
        self.persist_directory()?;
        info!("dropped index '{}' on '{}' (id {})", index_name, table_name, index_id);
        Ok(())
    }

    /// Force the directory page to durable storage.
    pub fn flush_directory(&mut self) -> DbResult<()> {
        self.pager.flush_page(DIRECTORY_PAGE_ID)
    }

    /// Append `row` to `table_name`'s heap.
    pub fn insert_row(&mut self, table_name: &str, row: &RowData) -> DbResult<RowId> {
        let table_id = *self
            .table_names
            .get(table_name)
            .ok_or_else(|| DbError::TableNotExist(table_name.into()))?;
        let table = self
            .tables
            .get_mut(&table_id)
            .ok_or_else(|| DbError::Internal(format!("table id {} has no runtime handle", table_id)))?;
        table.heap_mut().insert_row(&mut self.pager, row)
    }

    /// Every row of `table_name`, in insertion order.
    pub fn scan_table(&mut self, table_name: &str) -> DbResult<Vec<(RowId, RowData)>> {
        let table_id = *self
            .table_names
            .get(table_name)
            .ok_or_else(|| DbError::TableNotExist(table_name.into()))?;
        let table = self
            .tables
            .get(&table_id)
            .ok_or_else(|| DbError::Internal(format!("table id {} has no runtime handle", table_id)))?;
        table.heap().scan(&mut self.pager)
    }

    /// Insert `(key_row, row_id)` into a named index.
    pub fn insert_index_entry(
        &mut self,
        table_name: &str,
        index_name: &str,
        key_row: &RowData,
        row_id: RowId,
        txn: Option<&Txn>,
    ) -> DbResult<()> {
        let index_id = self.resolve_index(table_name, index_name)?;
        let binding = self
            .indexes
            .get_mut(&index_id)
            .ok_or_else(|| DbError::Internal(format!("index id {} has no runtime handle", index_id)))?;
        binding.insert_entry(&mut self.pager, key_row, row_id, txn)
    }

    /// Probe a named index for `key_row`.
    pub fn lookup_index_entry(
        &mut self,
        table_name: &str,
        index_name: &str,
        key_row: &RowData,
    ) -> DbResult<Option<RowId>> {
        let index_id = self.resolve_index(table_name, index_name)?;
        let binding = self
            .indexes
            .get(&index_id)
            .ok_or_else(|| DbError::Internal(format!("index id {} has no runtime handle", index_id)))?;
        binding.lookup_entry(&mut self.pager, key_row)
    }

    fn resolve_index(&self, table_name: &str, index_name: &str) -> DbResult<IndexId> {
        if !self.table_names.contains_key(table_name) {
            return Err(DbError::TableNotExist(table_name.into()));
        }
        self.index_names
            .get(table_name)
            .and_then(|namespace| namespace.get(index_name))
            .copied()
            .ok_or_else(|| DbError::IndexNotFound(index_name.into()))
    }

    /// Recovery path: read one table descriptor and register its runtime
    /// handle exactly as the create path does, without allocating storage.
    fn load_table(&mut self, table_id: TableId, page_id: PageId) -> DbResult<()> {
        let metadata = self
            .pager
            .read_page(page_id, |page| TableMetadata::deserialize_from(&page.data))?;
        if metadata.table_id() != table_id {
            return Err(DbError::Corrupted(format!(
                "descriptor at page {} claims table id {}, directory says {}",
                page_id,
                metadata.table_id(),
                table_id
            )));
        }
        let heap = TableHeap::open(metadata.first_page_id(), metadata.schema().clone());
        debug!("loaded table '{}' (id {})", metadata.name(), table_id);
        self.table_names.insert(metadata.name().to_string(), table_id);
        self.index_names.insert(metadata.name().to_string(), HashMap::new());
        self.tables.insert(table_id, TableInfo::new(metadata, heap));
        Ok(())
    }

    /// Recovery path: read one index descriptor and rebuild its binding. The
    /// owning table must already be loaded.
    fn load_index(&mut self, index_id: IndexId, page_id: PageId) -> DbResult<()> {
        let metadata = self
            .pager
            .read_page(page_id, |page| IndexMetadata::deserialize_from(&page.data))?;
        if metadata.index_id() != index_id {
            return Err(DbError::Corrupted(format!(
                "descriptor at page {} claims index id {}, directory says {}",
                page_id,
                metadata.index_id(),
                index_id
            )));
        }
        let table = self.tables.get(&metadata.table_id()).ok_or_else(|| {
            DbError::Corrupted(format!(
                "index '{}' references unknown table id {}",
                metadata.name(),
                metadata.table_id()
            ))
        })?;
        let table_name = table.name().to_string();
        let binding = IndexInfo::open(&mut self.pager, metadata, table)?;
        debug!("loaded index '{}' on '{}' (id {})", binding.name(), table_name, index_id);
        self.index_names
            .entry(table_name)
            .or_default()
            .insert(binding.name().to_string(), index_id);
        self.indexes.insert(index_id, binding);
        Ok(())
    }

    fn persist_directory(&mut self) -> DbResult<()> {
        let directory = &self.directory;
        self.pager.update_page(DIRECTORY_PAGE_ID, |page| {
            page.zero_from(0);
            directory.serialize_into(&mut page.data);
            Ok(())
        })
    }
}

impl Drop for Catalog {
    fn drop(&mut self) {
        if let Err(e) = self.pager.flush_all() {
            warn!("failed to flush catalog state at teardown: {}", e);
        }
    }
}
