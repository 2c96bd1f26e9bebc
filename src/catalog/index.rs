use std::io::Write;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use log::debug;

use crate::catalog::schema::Schema;
use crate::catalog::table::TableInfo;
use crate::catalog::{IndexId, TableId};
use crate::error::{DbError, DbResult};
use crate::index::btree::BTreeIndex;
use crate::storage::page::PAGE_SIZE;
use crate::storage::pager::Pager;
use crate::storage::row::{RowData, RowId};
use crate::transaction::Txn;

const INDEX_METADATA_MAGIC: u32 = 0x4958_4D44; // "IXMD"

/// Supported fixed key capacities of the B+tree index, smallest first.
const KEY_CAPACITIES: [usize; 5] = [16, 32, 64, 128, 256];

/// Largest key the widest encoding accepts.
const MAX_KEY_BYTES: usize = 248;

/// Pick the smallest capacity bucket holding a key of `key_bytes` bytes.
pub fn select_key_capacity(key_bytes: usize) -> DbResult<usize> {
    if key_bytes > MAX_KEY_BYTES {
        return Err(DbError::Internal(format!(
            "index key of {} bytes exceeds the {}-byte limit",
            key_bytes, MAX_KEY_BYTES
        )));
    }
    Ok(*KEY_CAPACITIES
        .iter()
        .find(|&&capacity| capacity >= key_bytes)
        .expect("capacity table covers every size up to the limit"))
}

/// Persistent descriptor of one index, occupying one page referenced from the
/// directory. `key_map` lists the owning table's column positions forming the
/// key, in index column order.
///
/// Layout:
/// `[magic:4][index_id:4][name_len:4][name][table_id:4][key_count:4][key:4]…`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexMetadata {
    index_id: IndexId,
    name: String,
    table_id: TableId,
    key_map: Vec<u32>,
}

impl IndexMetadata {
    /// A key column may appear only once; a repeat is a construction error.
    pub fn new(
        index_id: IndexId,
        name: impl Into<String>,
        table_id: TableId,
        key_map: Vec<u32>,
    ) -> DbResult<IndexMetadata> {
        for (i, col) in key_map.iter().enumerate() {
            if key_map[..i].contains(col) {
                return Err(DbError::Internal(format!(
                    "column position {} repeats in index key",
                    col
                )));
            }
        }
        Ok(IndexMetadata { index_id, name: name.into(), table_id, key_map })
    }

    pub fn index_id(&self) -> IndexId {
        self.index_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table_id(&self) -> TableId {
        self.table_id
    }

    pub fn key_map(&self) -> &[u32] {
        &self.key_map
    }

    pub fn serialized_size(&self) -> usize {
        4 + 4 + 4 + self.name.len() + 4 + 4 + 4 * self.key_map.len()
    }

    pub fn serialize_into(&self, buf: &mut [u8]) -> DbResult<()> {
        let size = self.serialized_size();
        if size > PAGE_SIZE || size > buf.len() {
            return Err(DbError::Internal(format!(
                "index descriptor for '{}' needs {} bytes, page holds {}",
                self.name, size, PAGE_SIZE
            )));
        }
        let mut cursor = &mut buf[..];
        cursor.write_u32::<LittleEndian>(INDEX_METADATA_MAGIC)?;
        cursor.write_u32::<LittleEndian>(self.index_id)?;
        cursor.write_u32::<LittleEndian>(self.name.len() as u32)?;
        cursor.write_all(self.name.as_bytes())?;
        cursor.write_u32::<LittleEndian>(self.table_id)?;
        cursor.write_u32::<LittleEndian>(self.key_map.len() as u32)?;
        for &col in &self.key_map {
            cursor.write_u32::<LittleEndian>(col)?;
        }
        Ok(())
    }

    pub fn deserialize_from(buf: &[u8]) -> DbResult<IndexMetadata> {
        let mut buf = &buf[..];
        let magic = buf.read_u32::<LittleEndian>()?;
        if magic != INDEX_METADATA_MAGIC {
            return Err(DbError::Corrupted(format!(
                "index descriptor has bad magic {:#010x}",
                magic
            )));
        }
        let index_id = buf.read_u32::<LittleEndian>()?;
        let name_len = buf.read_u32::<LittleEndian>()? as usize;
        let raw = buf
            .get(..name_len)
            .ok_or_else(|| DbError::Corrupted("index descriptor name truncated".into()))?;
        let name = String::from_utf8_lossy(raw).to_string();
        buf = &buf[name_len..];
        let table_id = buf.read_u32::<LittleEndian>()?;
        let key_count = buf.read_u32::<LittleEndian>()? as usize;
        let mut key_map = Vec::with_capacity(key_count);
        for _ in 0..key_count {
            key_map.push(buf.read_u32::<LittleEndian>()?);
        }
        IndexMetadata::new(index_id, name, table_id, key_map)
            .map_err(|_| DbError::Corrupted("index descriptor repeats a key column".into()))
    }
}

/// Runtime binding of an index: its descriptor, the key schema projected from
/// the owning table, and the constructed B+tree. The owning table is referred
/// to by id only; the catalog owns both handles.
pub struct IndexInfo {
    metadata: IndexMetadata,
    key_schema: Schema,
    index: BTreeIndex,
}

impl IndexInfo {
    /// Create-path binding: derives the key schema, sizes the key encoding,
    /// and constructs a fresh B+tree. Fails before touching storage when the
    /// key does not fit any capacity bucket.
    pub fn build(
        pager: &mut Pager,
        metadata: IndexMetadata,
        table: &TableInfo,
    ) -> DbResult<IndexInfo> {
        Self::bind(pager, metadata, table, true)
    }

    /// Recovery-path binding: same derivation, but re-opens the tree already
    /// rooted on disk instead of allocating one.
    pub fn open(
        pager: &mut Pager,
        metadata: IndexMetadata,
        table: &TableInfo,
    ) -> DbResult<IndexInfo> {
        Self::bind(pager, metadata, table, false)
    }

    fn bind(
        pager: &mut Pager,
        metadata: IndexMetadata,
        table: &TableInfo,
        create: bool,
    ) -> DbResult<IndexInfo> {
        if let Some(&out_of_range) = metadata
            .key_map()
            .iter()
            .find(|&&col| col as usize >= table.schema().len())
        {
            return Err(DbError::Corrupted(format!(
                "index '{}' maps column {} but table '{}' has {} columns",
                metadata.name(),
                out_of_range,
                table.name(),
                table.schema().len()
            )));
        }
        let key_schema = table.schema().project(metadata.key_map());
        let key_bytes: usize = key_schema.columns().iter().map(|c| c.byte_length()).sum();
        let capacity = select_key_capacity(key_bytes)?;
        debug!(
            "binding index '{}': {} key bytes in {}-byte capacity",
            metadata.name(),
            key_bytes,
            capacity
        );
        let index = if create {
            BTreeIndex::create(pager, metadata.index_id(), key_schema.clone(), capacity)?
        } else {
            BTreeIndex::open(pager, metadata.index_id(), key_schema.clone(), capacity)?
        };
        Ok(IndexInfo { metadata, key_schema, index })
    }

    pub fn index_id(&self) -> IndexId {
        self.metadata.index_id()
    }

    pub fn name(&self) -> &str {
        self.metadata.name()
    }

    pub fn table_id(&self) -> TableId {
        self.metadata.table_id()
    }

    pub fn key_schema(&self) -> &Schema {
        &self.key_schema
    }

    pub fn metadata(&self) -> &IndexMetadata {
        &self.metadata
    }

    pub fn key_capacity(&self) -> usize {
        self.index.key_capacity()
    }

    /// Insert `(key_row, row_id)` into the underlying index, returning its
    /// result unchanged.
    pub fn insert_entry(
        &mut self,
        pager: &mut Pager,
        key_row: &RowData,
        row_id: RowId,
        txn: Option<&Txn>,
    ) -> DbResult<()> {
        self.index.insert(pager, key_row, row_id, txn)
    }

    pub fn lookup_entry(&self, pager: &mut Pager, key_row: &RowData) -> DbResult<Option<RowId>> {
        self.index.lookup(pager, key_row)
    }

    /// Tear the binding down, unregistering the tree's on-disk root.
    pub fn destroy(self, pager: &mut Pager) -> DbResult<()> {
        self.index.destroy(pager)
    }
}
