mod common;

use colstore::{btree::page_cache::PageCache, Transaction};

use crate::common::{int_row, new_int_table, scan_ints, setup};
use colstore::utils::HandyRwLock;

/// Single-row transactions, each leaving its own run item behind, so
/// the TID leaf actually fills up and splits.
fn insert_one_by_one(table: &colstore::ColumnarTable, values: std::ops::Range<i64>) {
    for i in values {
        let tx = Transaction::new();
        table.insert_row(&tx, &int_row(&[i])).unwrap();
        tx.commit().unwrap();
    }
}

#[test]
fn leaf_split_builds_a_root() {
    // small pages to make splitting cheap to reach
    let _guard = setup();
    PageCache::set_page_size(1024);

    let table_rc = new_int_table("split_newroot.db", 1);
    let table = table_rc.rl();

    // a 1024-byte page holds ~47 tid run items; three times that many
    // single-row transactions forces at least two leaf splits and a
    // new root above them
    insert_one_by_one(&table, 1..151);

    let root = table.get_tree_root(0).unwrap();
    assert!(root.level >= 1, "tid tree still a single leaf");

    let rows = scan_ints(&table);
    assert_eq!(rows.len(), 150);
    for (idx, row) in rows.iter().enumerate() {
        assert_eq!(row[0], Some(idx as i64 + 1));
    }

    table.check_integrity();
}

#[test]
fn bulk_insert_splits_attribute_leaves() {
    let _guard = setup();
    PageCache::set_page_size(1024);

    let table_rc = new_int_table("split_attr.db", 2);
    let table = table_rc.rl();

    // one wide transaction: the TID tree stays one run, the attribute
    // payload spills over several leaves
    crate::common::insert_sequence(&table, 1..2001);

    let attr_root = table.get_tree_root(1).unwrap();
    assert!(attr_root.level >= 1, "attribute tree never split");

    let rows = scan_ints(&table);
    assert_eq!(rows.len(), 2000);
    assert_eq!(rows[1999], vec![Some(2000), Some(2001)]);

    table.check_integrity();
}

#[test]
fn growth_preserves_order_across_splits() {
    let _guard = setup();
    PageCache::set_page_size(1024);

    let table_rc = new_int_table("split_order.db", 1);
    let table = table_rc.rl();

    insert_one_by_one(&table, 1..401);

    let rows = scan_ints(&table);
    assert_eq!(rows.len(), 400);
    let values: Vec<i64> = rows.iter().map(|r| r[0].unwrap()).collect();
    let mut sorted = values.clone();
    sorted.sort();
    assert_eq!(values, sorted);

    table.check_integrity();
}
