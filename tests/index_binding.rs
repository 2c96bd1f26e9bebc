use atlasdb::catalog::{Catalog, Column, Schema};
use atlasdb::storage::pager::Pager;
use atlasdb::storage::row::{ColumnType, ColumnValue, RowData, RowId};

fn fresh_catalog(dir: &tempfile::TempDir) -> Catalog {
    let pager = Pager::open(dir.path().join("catalog.db")).unwrap();
    Catalog::open(pager, true).unwrap()
}

#[test]
fn ten_byte_key_selects_the_16_byte_capacity() {
    let dir = tempfile::tempdir().unwrap();
    let mut catalog = fresh_catalog(&dir);

    let schema = Schema::new(vec![
        Column::new("code", ColumnType::Char(10)),
        Column::new("n", ColumnType::Integer),
    ]);
    catalog.create_table("t", &schema).unwrap();
    let index = catalog.create_index("t", "by_code", &["code"]).unwrap();
    assert_eq!(index.key_capacity(), 16);
}

#[test]
fn capacity_grows_with_the_key() {
    let dir = tempfile::tempdir().unwrap();
    let mut catalog = fresh_catalog(&dir);

    let schema = Schema::new(vec![
        Column::new("a", ColumnType::Integer),
        Column::new("b", ColumnType::Integer),
        Column::new("wide", ColumnType::Char(30)),
        Column::new("flag", ColumnType::Boolean),
    ]);
    catalog.create_table("t", &schema).unwrap();

    // 4 + 4 = 8 bytes → 16.
    assert_eq!(
        catalog.create_index("t", "ints", &["a", "b"]).unwrap().key_capacity(),
        16
    );
    // 30 + 4 = 34 bytes → 64.
    assert_eq!(
        catalog.create_index("t", "wide_a", &["wide", "a"]).unwrap().key_capacity(),
        64
    );
    // 30 + 4 + 4 + 1 = 39 bytes → 64, and key_map order follows the request.
    let index = catalog
        .create_index("t", "all", &["wide", "b", "a", "flag"])
        .unwrap();
    assert_eq!(index.key_capacity(), 64);
    let names: Vec<_> = index
        .key_schema()
        .columns()
        .iter()
        .map(|c| c.name().to_string())
        .collect();
    assert_eq!(names, vec!["wide", "b", "a", "flag"]);
}

#[test]
fn a_250_byte_key_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let mut catalog = fresh_catalog(&dir);

    let schema = Schema::new(vec![Column::new("blob", ColumnType::Char(250))]);
    catalog.create_table("t", &schema).unwrap();

    assert!(catalog.create_index("t", "by_blob", &["blob"]).is_err());
    assert!(catalog.get_table_indexes("t").unwrap().is_empty());

    // A 248-byte key is the largest accepted, landing in the 256 bucket.
    let schema = Schema::new(vec![Column::new("blob", ColumnType::Char(248))]);
    catalog.create_table("t2", &schema).unwrap();
    assert_eq!(
        catalog.create_index("t2", "by_blob", &["blob"]).unwrap().key_capacity(),
        256
    );
}

#[test]
fn text_columns_never_fit_an_index_key() {
    let dir = tempfile::tempdir().unwrap();
    let mut catalog = fresh_catalog(&dir);

    let schema = Schema::new(vec![Column::new("body", ColumnType::Text)]);
    catalog.create_table("t", &schema).unwrap();
    assert!(catalog.create_index("t", "by_body", &["body"]).is_err());
}

#[test]
fn entries_inserted_through_the_binding_are_found_after_splits() {
    let dir = tempfile::tempdir().unwrap();
    let mut catalog = fresh_catalog(&dir);

    let schema = Schema::new(vec![
        Column::new("id", ColumnType::Integer),
        Column::new("label", ColumnType::Char(16)),
    ]);
    catalog.create_table("t", &schema).unwrap();
    catalog.create_index("t", "by_id", &["id"]).unwrap();

    // Enough entries to split 16-byte-capacity leaves several times.
    let total = 1500;
    for i in 0..total {
        let key = RowData(vec![ColumnValue::Integer(i)]);
        catalog
            .insert_index_entry("t", "by_id", &key, RowId::new(50 + i as u32, 0), None)
            .unwrap();
    }

    for i in (0..total).step_by(97) {
        let key = RowData(vec![ColumnValue::Integer(i)]);
        assert_eq!(
            catalog.lookup_index_entry("t", "by_id", &key).unwrap(),
            Some(RowId::new(50 + i as u32, 0))
        );
    }
    let missing = RowData(vec![ColumnValue::Integer(total)]);
    assert_eq!(catalog.lookup_index_entry("t", "by_id", &missing).unwrap(), None);
}

#[test]
fn duplicate_index_keys_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let mut catalog = fresh_catalog(&dir);

    let schema = Schema::new(vec![Column::new("id", ColumnType::Integer)]);
    catalog.create_table("t", &schema).unwrap();
    catalog.create_index("t", "by_id", &["id"]).unwrap();

    let key = RowData(vec![ColumnValue::Integer(5)]);
    catalog
        .insert_index_entry("t", "by_id", &key, RowId::new(9, 0), None)
        .unwrap();
    assert!(catalog
        .insert_index_entry("t", "by_id", &key, RowId::new(10, 0), None)
        .is_err());
    // The original entry is untouched.
    assert_eq!(
        catalog.lookup_index_entry("t", "by_id", &key).unwrap(),
        Some(RowId::new(9, 0))
    );
}
