use std::io::Write;
use std::sync::Arc;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{DbError, DbResult};
use crate::storage::row::ColumnType;

/// One column of a table: a name and a type. Columns are shared between a
/// table's schema and the key schemas projected from it, so they live behind
/// `Arc` and are never mutated after construction.
#[derive(Debug, PartialEq, Eq)]
pub struct Column {
    name: String,
    ty: ColumnType,
}

impl Column {
    pub fn new(name: impl Into<String>, ty: ColumnType) -> Column {
        Column { name: name.into(), ty }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ty(&self) -> ColumnType {
        self.ty
    }

    /// Width this column contributes to an encoded index key.
    pub fn byte_length(&self) -> usize {
        self.ty.byte_length()
    }
}

/// An ordered set of columns. A schema either owns its columns outright (a
/// table schema deep-copied into the catalog) or shares them with the schema
/// it was projected from (an index key schema).
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    columns: Vec<Arc<Column>>,
}

impl Schema {
    pub fn new(columns: Vec<Column>) -> Schema {
        Schema { columns: columns.into_iter().map(Arc::new).collect() }
    }

    pub fn columns(&self) -> &[Arc<Column>] {
        &self.columns
    }

    pub fn column(&self, index: usize) -> Option<&Column> {
        self.columns.get(index).map(Arc::as_ref)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Position of the column called `name`, if any.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name() == name)
    }

    /// An independently owned copy: fresh columns, no sharing with `self`.
    /// This is what the catalog stores when a caller hands it a schema.
    pub fn deep_copy(&self) -> Schema {
        Schema {
            columns: self
                .columns
                .iter()
                .map(|c| Arc::new(Column::new(c.name(), c.ty())))
                .collect(),
        }
    }

    /// A view of `self` restricted to `indices`, in that order. Columns are
    /// shared, not copied; callers guarantee the indices are in bounds.
    pub fn project(&self, indices: &[u32]) -> Schema {
        Schema {
            columns: indices
                .iter()
                .map(|&i| Arc::clone(&self.columns[i as usize]))
                .collect(),
        }
    }

    pub fn serialized_size(&self) -> usize {
        let mut size = 4;
        for column in &self.columns {
            size += 4 + column.name().len() + 4 + 4;
        }
        size
    }

    /// Layout: `[col_count:4]` then per column
    /// `[name_len:4][name][type_code:4][char_len:4]`.
    pub fn serialize_into(&self, mut buf: &mut [u8]) -> DbResult<()> {
        buf.write_u32::<LittleEndian>(self.columns.len() as u32)?;
        for column in &self.columns {
            buf.write_u32::<LittleEndian>(column.name().len() as u32)?;
            buf.write_all(column.name().as_bytes())?;
            buf.write_u32::<LittleEndian>(column.ty().to_code())?;
            let char_len = match column.ty() {
                ColumnType::Char(len) => len as u32,
                _ => 0,
            };
            buf.write_u32::<LittleEndian>(char_len)?;
        }
        Ok(())
    }

    pub fn deserialize_from(buf: &[u8]) -> DbResult<Schema> {
        let mut buf = buf;
        let count = buf.read_u32::<LittleEndian>()? as usize;
        let mut columns = Vec::with_capacity(count);
        for _ in 0..count {
            let name_len = buf.read_u32::<LittleEndian>()? as usize;
            let raw = buf
                .get(..name_len)
                .ok_or_else(|| DbError::Corrupted("schema column name truncated".into()))?;
            let name = String::from_utf8_lossy(raw).to_string();
            buf = &buf[name_len..];
            let code = buf.read_u32::<LittleEndian>()?;
            let char_len = buf.read_u32::<LittleEndian>()? as usize;
            let ty = ColumnType::from_code(code, char_len)
                .ok_or_else(|| DbError::Corrupted(format!("unknown column type code {}", code)))?;
            columns.push(Arc::new(Column::new(name, ty)));
        }
        Ok(Schema { columns })
    }
}
