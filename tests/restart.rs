use atlasdb::catalog::{Catalog, Column, Schema};
use atlasdb::error::DbError;
use atlasdb::storage::pager::Pager;
use atlasdb::storage::row::{ColumnType, ColumnValue, RowData, RowId};
use atlasdb::transaction::Txn;

fn open_catalog(path: &std::path::Path, init: bool) -> Catalog {
    let _ = env_logger::builder().is_test(true).try_init();
    Catalog::open(Pager::open(path).unwrap(), init).unwrap()
}

fn schema_for(i: usize) -> Schema {
    Schema::new(vec![
        Column::new("id", ColumnType::Integer),
        Column::new(format!("payload{}", i), ColumnType::Char(8 + i)),
    ])
}

#[test]
fn tables_and_indexes_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("catalog.db");

    let mut expected = Vec::new();
    {
        let mut catalog = open_catalog(&path, true);
        for i in 0..3 {
            let name = format!("table{}", i);
            let id = catalog.create_table(&name, &schema_for(i)).unwrap().table_id();
            expected.push((name, id));
        }
        catalog.create_index("table0", "by_id", &["id"]).unwrap();
        catalog.create_index("table0", "by_payload", &["payload0"]).unwrap();
        catalog.flush_directory().unwrap();
        // Dropping the catalog flushes every dirty page.
    }

    let catalog = open_catalog(&path, false);
    for (name, id) in &expected {
        let table = catalog.get_table(name).unwrap();
        assert_eq!(table.table_id(), *id);
        assert_eq!(table.schema(), &schema_for(*id as usize));
    }
    let names: Vec<_> = catalog
        .get_table_indexes("table0")
        .unwrap()
        .into_iter()
        .map(|i| i.name().to_string())
        .collect();
    assert_eq!(names, vec!["by_id", "by_payload"]);
    assert!(catalog.get_table_indexes("table1").unwrap().is_empty());
}

#[test]
fn rows_and_index_entries_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("catalog.db");

    {
        let mut catalog = open_catalog(&path, true);
        catalog.create_table("events", &schema_for(0)).unwrap();
        catalog.create_index("events", "by_id", &["id"]).unwrap();
        let txn = Txn::new(1);
        for i in 0..200 {
            let row = RowData(vec![
                ColumnValue::Integer(i),
                ColumnValue::Char(format!("p{:06}", i)),
            ]);
            let rid = catalog.insert_row("events", &row).unwrap();
            let key = RowData(vec![ColumnValue::Integer(i)]);
            catalog
                .insert_index_entry("events", "by_id", &key, rid, Some(&txn))
                .unwrap();
        }
    }

    let mut catalog = open_catalog(&path, false);
    let rows = catalog.scan_table("events").unwrap();
    assert_eq!(rows.len(), 200);

    let key = RowData(vec![ColumnValue::Integer(137)]);
    let rid = catalog.lookup_index_entry("events", "by_id", &key).unwrap();
    let expected: Vec<RowId> = rows
        .iter()
        .filter(|(_, row)| row.0[0] == ColumnValue::Integer(137))
        .map(|(rid, _)| *rid)
        .collect();
    assert_eq!(rid, Some(expected[0]));

    let missing = RowData(vec![ColumnValue::Integer(9999)]);
    assert_eq!(catalog.lookup_index_entry("events", "by_id", &missing).unwrap(), None);
}

#[test]
fn dropped_entities_stay_dropped_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("catalog.db");

    {
        let mut catalog = open_catalog(&path, true);
        catalog.create_table("keep", &schema_for(0)).unwrap();
        catalog.create_table("gone", &schema_for(1)).unwrap();
        catalog.create_index("gone", "idx", &["id"]).unwrap();
        catalog.create_index("keep", "kept_idx", &["id"]).unwrap();
        catalog.drop_table("gone").unwrap();
    }

    let catalog = open_catalog(&path, false);
    assert!(catalog.get_table("keep").is_ok());
    assert!(matches!(catalog.get_table("gone"), Err(DbError::TableNotExist(_))));
    // The cascade removed the dropped table's index from the directory too.
    assert_eq!(catalog.get_table_indexes("keep").unwrap().len(), 1);
    assert!(matches!(
        catalog.get_index("gone", "idx"),
        Err(DbError::TableNotExist(_))
    ));
}

#[test]
fn identifier_allocation_resumes_past_persisted_ids() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("catalog.db");

    let last_id = {
        let mut catalog = open_catalog(&path, true);
        catalog.create_table("t0", &schema_for(0)).unwrap();
        catalog.create_table("t1", &schema_for(1)).unwrap().table_id()
    };

    let mut catalog = open_catalog(&path, false);
    let new_id = catalog.create_table("t2", &schema_for(2)).unwrap().table_id();
    assert!(new_id > last_id);
}

#[test]
fn reopened_empty_catalog_still_treats_get_tables_as_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("catalog.db");

    {
        open_catalog(&path, true);
    }
    let catalog = open_catalog(&path, false);
    assert!(catalog.get_tables().is_err());
}
