use crate::catalog::schema::Schema;
use crate::error::{DbError, DbResult};
use crate::storage::row::{ColumnType, ColumnValue, RowData};

/// Encode `row` against `key_schema` into exactly `capacity` bytes, such that
/// byte-wise comparison of two encoded keys matches the key order column by
/// column:
///
/// - INTEGER: big-endian with the sign bit flipped, so negative values sort
///   below positive ones,
/// - BOOLEAN: a single 0/1 byte,
/// - CHAR(n)/TEXT: raw bytes truncated or zero-padded to the column's fixed
///   key width.
///
/// The tail up to `capacity` is zero-padded; the capacity only changes how
/// densely keys pack, never how they compare.
pub fn encode_key(row: &RowData, key_schema: &Schema, capacity: usize) -> DbResult<Vec<u8>> {
    if row.0.len() != key_schema.len() {
        return Err(DbError::Internal(format!(
            "key row has {} values, key schema has {} columns",
            row.0.len(),
            key_schema.len()
        )));
    }
    let mut key = Vec::with_capacity(capacity);
    for (value, column) in row.0.iter().zip(key_schema.columns()) {
        match (value, column.ty()) {
            (ColumnValue::Integer(i), ColumnType::Integer) => {
                key.extend(((*i as u32) ^ 0x8000_0000).to_be_bytes());
            }
            (ColumnValue::Boolean(b), ColumnType::Boolean) => {
                key.push(if *b { 1 } else { 0 });
            }
            (ColumnValue::Char(s), ColumnType::Char(_))
            | (ColumnValue::Text(s), ColumnType::Text) => {
                let width = column.byte_length();
                let bytes = s.as_bytes();
                let take = bytes.len().min(width);
                key.extend(&bytes[..take]);
                key.resize(key.len() + (width - take), 0);
            }
            _ => {
                return Err(DbError::Internal(format!(
                    "value does not match key column '{}'",
                    column.name()
                )));
            }
        }
    }
    if key.len() > capacity {
        return Err(DbError::Internal(format!(
            "encoded key of {} bytes exceeds capacity {}",
            key.len(),
            capacity
        )));
    }
    key.resize(capacity, 0);
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::schema::Column;

    fn int_schema() -> Schema {
        Schema::new(vec![Column::new("n", ColumnType::Integer)])
    }

    #[test]
    fn integer_order_is_preserved() {
        let schema = int_schema();
        let encode =
            |n| encode_key(&RowData(vec![ColumnValue::Integer(n)]), &schema, 16).unwrap();
        assert!(encode(-5) < encode(-1));
        assert!(encode(-1) < encode(0));
        assert!(encode(0) < encode(7));
        assert!(encode(7) < encode(i32::MAX));
        assert!(encode(i32::MIN) < encode(-100));
    }

    #[test]
    fn char_columns_pad_to_declared_width() {
        let schema = Schema::new(vec![Column::new("code", ColumnType::Char(6))]);
        let short =
            encode_key(&RowData(vec![ColumnValue::Char("ab".into())]), &schema, 16).unwrap();
        let long = encode_key(&RowData(vec![ColumnValue::Char("abcdefgh".into())]), &schema, 16)
            .unwrap();
        assert_eq!(short.len(), 16);
        assert_eq!(&short[..6], b"ab\0\0\0\0");
        assert_eq!(&long[..6], b"abcdef");
        assert!(short < long);
    }

    #[test]
    fn composite_keys_compare_column_by_column() {
        let schema = Schema::new(vec![
            Column::new("code", ColumnType::Char(4)),
            Column::new("n", ColumnType::Integer),
        ]);
        let encode = |code: &str, n| {
            encode_key(
                &RowData(vec![ColumnValue::Char(code.into()), ColumnValue::Integer(n)]),
                &schema,
                16,
            )
            .unwrap()
        };
        assert!(encode("aa", 9) < encode("ab", 0));
        assert!(encode("aa", 1) < encode("aa", 2));
    }

    #[test]
    fn arity_mismatch_is_rejected() {
        let schema = int_schema();
        let row = RowData(vec![ColumnValue::Integer(1), ColumnValue::Boolean(true)]);
        assert!(encode_key(&row, &schema, 16).is_err());
    }

    #[test]
    fn type_mismatch_is_rejected() {
        let schema = int_schema();
        let row = RowData(vec![ColumnValue::Boolean(true)]);
        assert!(encode_key(&row, &schema, 16).is_err());
    }
}
