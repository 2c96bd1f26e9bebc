use std::io::Write;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::catalog::schema::Schema;
use crate::catalog::TableId;
use crate::error::{DbError, DbResult};
use crate::storage::heap::TableHeap;
use crate::storage::page::{PageId, PAGE_SIZE};

const TABLE_METADATA_MAGIC: u32 = 0x5442_4C4D; // "TBLM"

/// Persistent descriptor of one table, occupying one page referenced from the
/// directory. Written once at creation and read back on recovery; it only
/// disappears when the table is dropped.
///
/// Layout: `[magic:4][table_id:4][name_len:4][name][first_page_id:4][schema]`.
#[derive(Debug, Clone, PartialEq)]
pub struct TableMetadata {
    table_id: TableId,
    name: String,
    first_page_id: PageId,
    schema: Schema,
}

impl TableMetadata {
    pub fn new(
        table_id: TableId,
        name: impl Into<String>,
        first_page_id: PageId,
        schema: Schema,
    ) -> TableMetadata {
        TableMetadata { table_id, name: name.into(), first_page_id, schema }
    }

    pub fn table_id(&self) -> TableId {
        self.table_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn first_page_id(&self) -> PageId {
        self.first_page_id
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn serialized_size(&self) -> usize {
        4 + 4 + 4 + self.name.len() + 4 + self.schema.serialized_size()
    }

    /// Serialize into a descriptor page. Fails cleanly when the descriptor
    /// (a long name, a wide schema) would not fit one page.
    pub fn serialize_into(&self, buf: &mut [u8]) -> DbResult<()> {
        let size = self.serialized_size();
        if size > PAGE_SIZE || size > buf.len() {
            return Err(DbError::Internal(format!(
                "table descriptor for '{}' needs {} bytes, page holds {}",
                self.name, size, PAGE_SIZE
            )));
        }
        let mut cursor = &mut buf[..];
        cursor.write_u32::<LittleEndian>(TABLE_METADATA_MAGIC)?;
        cursor.write_u32::<LittleEndian>(self.table_id)?;
        cursor.write_u32::<LittleEndian>(self.name.len() as u32)?;
        cursor.write_all(self.name.as_bytes())?;
        cursor.write_u32::<LittleEndian>(self.first_page_id)?;
        let schema_at = 16 + self.name.len();
        self.schema.serialize_into(&mut buf[schema_at..])?;
        Ok(())
    }

    pub fn deserialize_from(buf: &[u8]) -> DbResult<TableMetadata> {
        let mut buf = &buf[..];
        let magic = buf.read_u32::<LittleEndian>()?;
        if magic != TABLE_METADATA_MAGIC {
            return Err(DbError::Corrupted(format!(
                "table descriptor has bad magic {:#010x}",
                magic
            )));
        }
        let table_id = buf.read_u32::<LittleEndian>()?;
        let name_len = buf.read_u32::<LittleEndian>()? as usize;
        let raw = buf
            .get(..name_len)
            .ok_or_else(|| DbError::Corrupted("table descriptor name truncated".into()))?;
        let name = String::from_utf8_lossy(raw).to_string();
        buf = &buf[name_len..];
        let first_page_id = buf.read_u32::<LittleEndian>()?;
        let schema = Schema::deserialize_from(buf)?;
        Ok(TableMetadata { table_id, name, first_page_id, schema })
    }
}

/// Runtime handle for one table: its descriptor plus the live heap bound to
/// the descriptor's entry page. Owned by the catalog, addressed by id.
pub struct TableInfo {
    metadata: TableMetadata,
    heap: TableHeap,
}

impl TableInfo {
    pub fn new(metadata: TableMetadata, heap: TableHeap) -> TableInfo {
        TableInfo { metadata, heap }
    }

    pub fn table_id(&self) -> TableId {
        self.metadata.table_id()
    }

    pub fn name(&self) -> &str {
        self.metadata.name()
    }

    pub fn schema(&self) -> &Schema {
        self.metadata.schema()
    }

    pub fn metadata(&self) -> &TableMetadata {
        &self.metadata
    }

    pub fn heap(&self) -> &TableHeap {
        &self.heap
    }

    pub fn heap_mut(&mut self) -> &mut TableHeap {
        &mut self.heap
    }
}
